//! 由配置组装客户端

use anyhow::{Context, Result};
use fhirdesk_admin::{AuthConfig, AuthMode, DeskConfig};
use fhirdesk_client::{
    Anonymous, AttachmentCache, ClientCredentials, CredentialProvider, FhirConnection, FhirDesk,
    FhirEndpoint, HttpTransport, IdentityProvider, PageRequest, ReqwestTransport, StaticToken,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 身份提供方信息；未配置签发方或客户端ID时报错
pub fn identity_provider(auth: &AuthConfig) -> Result<IdentityProvider> {
    let issuer = auth.issuer.clone().context("auth.issuer is not configured")?;
    let client_id = auth.client_id.clone().context("auth.client_id is not configured")?;

    Ok(IdentityProvider {
        issuer,
        client_id,
        audience: auth.audience.clone(),
        redirect_uri: auth.redirect_uri.clone(),
        logout_return_to: auth.logout_return_to.clone(),
    })
}

/// 按认证模式选择令牌来源
pub fn credentials(auth: &AuthConfig, transport: Arc<dyn HttpTransport>) -> Result<Arc<dyn CredentialProvider>> {
    let provider: Arc<dyn CredentialProvider> = match auth.mode {
        AuthMode::Anonymous => Arc::new(Anonymous),
        AuthMode::Token => Arc::new(StaticToken::new(auth.token.clone().unwrap_or_default())),
        AuthMode::ClientCredentials => {
            let secret = auth
                .client_secret
                .clone()
                .context("auth.client_secret is not configured")?;
            Arc::new(ClientCredentials::new(identity_provider(auth)?, secret, transport))
        }
    };
    debug!("Using {:?} credentials", auth.mode);
    Ok(provider)
}

pub fn build_desk(config: &DeskConfig) -> Result<FhirDesk> {
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(
        Duration::from_secs(config.server.connect_timeout_secs),
        Duration::from_secs(config.server.request_timeout_secs),
    )?);
    build_desk_with(config, transport)
}

pub fn build_desk_with(config: &DeskConfig, transport: Arc<dyn HttpTransport>) -> Result<FhirDesk> {
    let endpoint = FhirEndpoint::new(&config.server.base_url)?;
    let credentials = credentials(&config.auth, transport.clone())?;
    let connection = FhirConnection::new(endpoint, transport, credentials);
    let cache = AttachmentCache::new(config.cache.max_entries, config.cache.max_bytes);

    Ok(FhirDesk::new(connection, cache).with_auth_required(config.auth.require_auth))
}

/// 命令行分页参数，缺省时使用配置中的页大小
pub fn page_request(config: &DeskConfig, count: Option<u32>, offset: i64) -> PageRequest {
    PageRequest::new(count.unwrap_or(config.paging.page_size), offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unused_transport() -> Arc<dyn HttpTransport> {
        Arc::new(ReqwestTransport::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap())
    }

    #[tokio::test]
    async fn test_credentials_follow_mode() {
        let mut auth = AuthConfig::default();
        let anonymous = credentials(&auth, unused_transport()).unwrap();
        assert_eq!(anonymous.bearer_token().await.unwrap(), None);

        auth.mode = AuthMode::Token;
        auth.token = Some("abc".to_string());
        let token = credentials(&auth, unused_transport()).unwrap();
        assert_eq!(token.bearer_token().await.unwrap().as_deref(), Some("abc"));

        auth.mode = AuthMode::ClientCredentials;
        assert!(credentials(&auth, unused_transport()).is_err());
    }

    #[test]
    fn test_identity_provider_requires_issuer() {
        let mut auth = AuthConfig::default();
        assert!(identity_provider(&auth).is_err());

        auth.issuer = Some("https://id.example.org".to_string());
        auth.client_id = Some("desk".to_string());
        let provider = identity_provider(&auth).unwrap();
        assert_eq!(provider.redirect_uri, "http://localhost:3000");
    }

    #[test]
    fn test_page_request_defaults_to_config() {
        let config = DeskConfig::default();
        assert_eq!(page_request(&config, None, -5), PageRequest::new(20, 0));
        assert_eq!(page_request(&config, Some(5), 10).count, 5);
    }
}
