//! 到远程FHIR API的连接
//!
//! 读取与写入共用同一个请求入口：每次调用前重新获取令牌，
//! 发送一次请求，不重试。

use fhirdesk_core::Result;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::auth::CredentialProvider;
use crate::transport::{FhirEndpoint, HttpMethod, HttpRequest, HttpResponse, HttpTransport};

/// 端点、传输与凭证的组合，可廉价克隆
#[derive(Clone)]
pub struct FhirConnection {
    endpoint: FhirEndpoint,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialProvider>,
}

impl FhirConnection {
    pub fn new(
        endpoint: FhirEndpoint,
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            endpoint,
            transport,
            credentials,
        }
    }

    pub fn endpoint(&self) -> &FhirEndpoint {
        &self.endpoint
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    /// 发送一次请求，非2xx状态转换为错误
    pub async fn execute(
        &self,
        method: HttpMethod,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<HttpResponse> {
        let bearer_token = self.credentials.bearer_token().await?;

        debug!("{} {}", method, url);
        let response = self
            .transport
            .send(HttpRequest {
                method,
                url: url.clone(),
                bearer_token,
                body,
            })
            .await?;

        if !response.is_success() {
            warn!("{} {} failed with status {}", method, url, response.status);
        }
        response.error_for_status()
    }
}
