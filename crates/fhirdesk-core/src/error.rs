//! 错误定义模块

use thiserror::Error;

/// FHIR Desk统一错误类型
#[derive(Error, Debug)]
pub enum DeskError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("请求失败: HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("解析错误: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("未认证")]
    NotAuthenticated,

    #[error("认证失败: {0}")]
    Auth(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("附件错误: {0}")]
    Attachment(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },
}

impl DeskError {
    /// 对应的HTTP状态码（若有）
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DeskError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// FHIR Desk统一结果类型
pub type Result<T> = std::result::Result<T, DeskError>;
