//! # FHIR Desk管理模块
//!
//! 提供分层配置管理与日志初始化

pub mod config;
pub mod logging;

pub use config::{AuthConfig, AuthMode, ConfigManager, ConfigValidator, DeskConfig};
pub use logging::init_logging;
