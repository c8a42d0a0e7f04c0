//! 日志初始化
//!
//! `RUST_LOG` 优先于配置中的日志级别。日志写到stderr，stdout留给命令输出。

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// 解析日志过滤表达式，例如 `info` 或 `fhirdesk_client=debug,info`
pub fn parse_filter(level: &str) -> Result<EnvFilter> {
    if level.trim().is_empty() {
        return Err(anyhow::anyhow!("Log level cannot be empty"));
    }
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {}", level))
}

/// 初始化全局日志订阅者，只能调用一次
pub fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::debug!("Logging initialized with level {}", level);
    Ok(())
}
