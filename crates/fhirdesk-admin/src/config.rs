//! 配置管理
//!
//! 配置按以下顺序叠加，后者覆盖前者：
//! 1. 内置默认值
//! 2. 可选的TOML配置文件
//! 3. `FHIRDESK_` 前缀的环境变量，嵌套字段以 `__` 分隔，
//!    例如 `FHIRDESK_SERVER__BASE_URL`

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<DeskConfig>>,
    /// 配置文件路径
    config_path: PathBuf,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeskConfig {
    /// FHIR服务器
    pub server: ServerConfig,
    /// 认证
    pub auth: AuthConfig,
    /// 分页
    pub paging: PagingConfig,
    /// 附件缓存
    pub cache: CacheConfig,
    /// 日志
    pub logging: LoggingConfig,
}

/// FHIR服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// FHIR API根地址
    pub base_url: String,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 请求超时（秒）
    pub request_timeout_secs: u64,
}

/// 凭证来源
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// 不携带令牌
    #[default]
    Anonymous,
    /// 预先签发的令牌
    Token,
    /// OAuth2客户端凭证授权
    ClientCredentials,
}

/// 认证配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// `mode = "token"` 时使用
    pub token: Option<String>,
    /// 身份提供方地址
    pub issuer: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub audience: Option<String>,
    /// 登录完成后的回调地址
    pub redirect_uri: String,
    /// 登出后的返回地址
    pub logout_return_to: String,
    /// 写操作前是否要求已认证
    pub require_auth: bool,
}

/// 分页配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagingConfig {
    /// 每页条数
    pub page_size: u32,
}

/// 附件缓存配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 最大条目数
    pub max_entries: usize,
    /// 最大总字节数
    pub max_bytes: usize,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别，支持 `EnvFilter` 语法
    pub level: String,
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&DeskConfig) -> Result<()>,
}

impl ConfigManager {
    /// 加载配置；配置文件不存在时只使用默认值和环境变量
    pub fn new(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = Self::load_config(&config_path)?;
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
            validator,
        })
    }

    fn load_config(config_path: &Path) -> Result<DeskConfig> {
        let defaults = Config::try_from(&DeskConfig::default())
            .context("Failed to build default configuration")?;

        let settings = Config::builder()
            .add_source(defaults)
            .add_source(File::from(config_path).required(false))
            .add_source(
                Environment::with_prefix("FHIRDESK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration sources")?;

        let config: DeskConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        info!("Configuration loaded from: {}", config_path.display());
        Ok(config)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// 获取配置
    pub async fn get_config(&self) -> DeskConfig {
        self.config.read().await.clone()
    }

    /// 验证并替换配置，随后写回文件
    pub async fn update_config(&self, new_config: DeskConfig) -> Result<()> {
        self.validator.validate(&new_config)?;

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        self.save_config().await?;

        info!("Configuration updated successfully");
        Ok(())
    }

    /// 保存配置到文件
    pub async fn save_config(&self) -> Result<()> {
        let config = self.config.read().await;
        let config_str =
            toml::to_string_pretty(&*config).context("Failed to serialize configuration")?;

        if let Some(parent) = self.config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create configuration directory")?;
        }
        tokio::fs::write(&self.config_path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", self.config_path.display());
        Ok(())
    }

    /// 按点分路径读取配置值，例如 `paging.page_size`
    pub async fn get_value<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let config = self.config.read().await;
        let value = extract_nested_value(&config, path)
            .with_context(|| format!("Configuration path not found: {}", path))?;

        serde_json::from_value(value).context("Failed to deserialize configuration value")
    }
}

/// 提取嵌套值
fn extract_nested_value(config: &DeskConfig, path: &str) -> Result<serde_json::Value> {
    let config_json = serde_json::to_value(config).context("Failed to serialize config to JSON")?;

    let mut current = &config_json;
    for part in path.split('.') {
        match current {
            serde_json::Value::Object(map) => {
                current = map
                    .get(part)
                    .ok_or_else(|| anyhow::anyhow!("Path segment not found: {}", part))?;
            }
            _ => return Err(anyhow::anyhow!("Invalid path at segment: {}", part)),
        }
    }

    Ok(current.clone())
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).is_some_and(|v| !v.is_empty())
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "server.base_url",
                validator: |config| {
                    let url = url::Url::parse(&config.server.base_url)
                        .with_context(|| format!("Invalid base URL: {}", config.server.base_url))?;
                    match url.scheme() {
                        "http" | "https" => Ok(()),
                        other => Err(anyhow::anyhow!("Unsupported URL scheme: {}", other)),
                    }
                },
            },
            ValidationRule {
                field_path: "server.request_timeout_secs",
                validator: |config| {
                    if config.server.request_timeout_secs == 0 || config.server.connect_timeout_secs == 0 {
                        Err(anyhow::anyhow!("Timeouts must be greater than 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "paging.page_size",
                validator: |config| {
                    if config.paging.page_size == 0 {
                        Err(anyhow::anyhow!("Page size cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "cache.max_entries",
                validator: |config| {
                    if config.cache.max_entries == 0 || config.cache.max_bytes == 0 {
                        Err(anyhow::anyhow!("Cache limits must be greater than 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "auth.mode",
                validator: |config| {
                    let auth = &config.auth;
                    match auth.mode {
                        AuthMode::Anonymous => Ok(()),
                        AuthMode::Token if present(&auth.token) => Ok(()),
                        AuthMode::Token => Err(anyhow::anyhow!("auth.token is required in token mode")),
                        AuthMode::ClientCredentials
                            if present(&auth.issuer)
                                && present(&auth.client_id)
                                && present(&auth.client_secret) =>
                        {
                            Ok(())
                        }
                        AuthMode::ClientCredentials => Err(anyhow::anyhow!(
                            "auth.issuer, auth.client_id and auth.client_secret are required"
                        )),
                    }
                },
            },
            ValidationRule {
                field_path: "logging.level",
                validator: |config| crate::logging::parse_filter(&config.logging.level).map(|_| ()),
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置，返回第一条未通过的规则
    pub fn validate(&self, config: &DeskConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(e.context(format!("Invalid configuration value: {}", rule.field_path)));
            }
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/fhir".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Anonymous,
            token: None,
            issuer: None,
            client_id: None,
            client_secret: None,
            audience: None,
            redirect_uri: "http://localhost:3000".to_string(),
            logout_return_to: "http://localhost:3000".to_string(),
            require_auth: true,
        }
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self { page_size: 20 }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 64,
            max_bytes: 32 * 1024 * 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(dir.path().join("missing.toml")).unwrap();

        let config = manager.get_config().await;
        assert_eq!(config.server.base_url, "http://localhost:8080/fhir");
        assert_eq!(config.paging.page_size, 20);
        assert_eq!(config.auth.mode, AuthMode::Anonymous);
        assert!(config.auth.require_auth);
    }

    #[tokio::test]
    async fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fhirdesk.toml");
        std::fs::write(
            &path,
            r#"
[server]
base_url = "https://fhir.example.org/r4"

[auth]
mode = "token"
token = "abc"

[paging]
page_size = 50
"#,
        )
        .unwrap();

        let manager = ConfigManager::new(&path).unwrap();
        let config = manager.get_config().await;
        assert_eq!(config.server.base_url, "https://fhir.example.org/r4");
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.auth.mode, AuthMode::Token);
        assert_eq!(config.auth.token.as_deref(), Some("abc"));
        assert_eq!(manager.get_value::<u32>("paging.page_size").await.unwrap(), 50);
        assert!(manager.get_value::<u32>("paging.missing").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fhirdesk.toml");
        std::fs::write(&path, "[auth]\nmode = \"token\"\n").unwrap();

        assert!(ConfigManager::new(&path).is_err());
    }

    #[tokio::test]
    async fn test_update_validates_and_saves() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("fhirdesk.toml");
        let manager = ConfigManager::new(&path).unwrap();

        let mut bad = manager.get_config().await;
        bad.paging.page_size = 0;
        assert!(manager.update_config(bad).await.is_err());
        assert!(!path.exists());

        let mut good = manager.get_config().await;
        good.cache.max_entries = 8;
        manager.update_config(good).await.unwrap();

        let reloaded = ConfigManager::new(&path).unwrap();
        assert_eq!(reloaded.get_config().await.cache.max_entries, 8);
    }

    #[test]
    fn test_validator_rules() {
        let validator = ConfigValidator::new();
        assert!(validator.validate(&DeskConfig::default()).is_ok());

        let mut config = DeskConfig::default();
        config.server.base_url = "ftp://example.org".to_string();
        assert!(validator.validate(&config).is_err());

        let mut config = DeskConfig::default();
        config.auth.mode = AuthMode::ClientCredentials;
        config.auth.issuer = Some("https://id.example.org".to_string());
        config.auth.client_id = Some("desk".to_string());
        assert!(validator.validate(&config).is_err());
        config.auth.client_secret = Some("secret".to_string());
        assert!(validator.validate(&config).is_ok());
    }
}
