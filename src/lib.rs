//! # FHIR Desk
//!
//! 远程FHIR服务器上患者与观察记录的管理客户端。
//!
//! - [`core`]：资源模型、值对象构造、列表过滤排序与错误类型
//! - [`client`]：传输、认证、读取、交叉引用解析、写操作与表单提交
//! - [`admin`]：分层配置与日志初始化

pub use fhirdesk_admin as admin;
pub use fhirdesk_client as client;
pub use fhirdesk_core as core;

pub use fhirdesk_client::FhirDesk;
pub use fhirdesk_core::{DeskError, Result};
