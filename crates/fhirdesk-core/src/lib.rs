//! # FHIR Desk Core
//!
//! 客户端的核心模块，提供FHIR资源模型、嵌套值对象构造、列表过滤排序、
//! 错误定义和通用工具。

pub mod builders;
pub mod error;
pub mod models;
pub mod query;
pub mod utils;

pub use error::{DeskError, Result};
pub use models::*;
pub use query::{ListQuery, Searchable};
