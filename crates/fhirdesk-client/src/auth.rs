//! 身份认证
//!
//! 每次出站调用前都会重新向 [`CredentialProvider`] 获取令牌，
//! 不在长期共享的状态中持有令牌。

use async_trait::async_trait;
use chrono::Utc;
use fhirdesk_core::{DeskError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::transport::{HttpMethod, HttpRequest, HttpTransport};

/// 令牌过期前提前刷新的秒数
const EXPIRY_BUFFER_SECS: i64 = 300;

/// 令牌来源
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// 获取bearer令牌；匿名访问时返回None
    async fn bearer_token(&self) -> Result<Option<String>>;
}

/// 匿名访问（不附带令牌）
pub struct Anonymous;

#[async_trait]
impl CredentialProvider for Anonymous {
    async fn bearer_token(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// 预先签发的静态令牌
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn bearer_token(&self) -> Result<Option<String>> {
        if self.token.is_empty() {
            return Err(DeskError::NotAuthenticated);
        }
        Ok(Some(self.token.clone()))
    }
}

/// 令牌端点响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        now < self.expires_at - EXPIRY_BUFFER_SECS
    }
}

/// 身份提供方的地址与客户端信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProvider {
    /// 签发方根地址，例如 `https://tenant.eu.auth0.com`
    pub issuer: String,
    pub client_id: String,
    pub audience: Option<String>,
    pub redirect_uri: String,
    pub logout_return_to: String,
}

impl IdentityProvider {
    fn url(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/{}", self.issuer.trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|e| DeskError::Config(format!("Invalid issuer URL '{}': {}", raw, e)))
    }

    pub fn token_url(&self) -> Result<Url> {
        self.url("oauth/token")
    }

    /// 登录跳转地址（授权码流程）
    pub fn login_url(&self, state: &str) -> Result<Url> {
        let mut url = self.url("authorize")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("scope", "openid profile email")
                .append_pair("state", state);
            if let Some(audience) = &self.audience {
                pairs.append_pair("audience", audience);
            }
        }
        Ok(url)
    }

    /// 注销跳转地址，完成后返回到 `logout_return_to`
    pub fn logout_url(&self) -> Result<Url> {
        let mut url = self.url("v2/logout")?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("returnTo", &self.logout_return_to);
        Ok(url)
    }
}

/// OAuth2客户端凭证模式，令牌静默缓存至过期前五分钟
pub struct ClientCredentials {
    provider: IdentityProvider,
    client_secret: String,
    transport: Arc<dyn HttpTransport>,
    cached: RwLock<Option<CachedToken>>,
}

impl ClientCredentials {
    pub fn new(
        provider: IdentityProvider,
        client_secret: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            provider,
            client_secret: client_secret.into(),
            transport,
            cached: RwLock::new(None),
        }
    }

    async fn request_token(&self) -> Result<CachedToken> {
        let mut body = serde_json::json!({
            "grant_type": "client_credentials",
            "client_id": self.provider.client_id,
            "client_secret": self.client_secret,
        });
        if let Some(audience) = &self.provider.audience {
            body["audience"] = serde_json::Value::String(audience.clone());
        }

        let response = self
            .transport
            .send(HttpRequest {
                method: HttpMethod::Post,
                url: self.provider.token_url()?,
                bearer_token: None,
                body: Some(body),
            })
            .await?;

        if !response.is_success() {
            return Err(DeskError::Auth(format!(
                "token endpoint returned {}: {}",
                response.status,
                response.text()
            )));
        }

        let token: TokenResponse = response.json()?;
        let expires_in = token.expires_in.unwrap_or(3600);
        info!("Acquired access token valid for {}s", expires_in);

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now().timestamp() + expires_in,
        })
    }

    /// 丢弃缓存的令牌
    pub async fn logout(&self) {
        *self.cached.write().await = None;
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentials {
    async fn bearer_token(&self) -> Result<Option<String>> {
        let now = Utc::now().timestamp();
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
                debug!("Using cached access token");
                return Ok(Some(token.access_token.clone()));
            }
        }

        let token = self.request_token().await?;
        let access_token = token.access_token.clone();
        *self.cached.write().await = Some(token);
        Ok(Some(access_token))
    }
}

/// 受保护操作前的认证检查
pub async fn require_authenticated(provider: &dyn CredentialProvider) -> Result<String> {
    match provider.bearer_token().await? {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(DeskError::NotAuthenticated),
    }
}
