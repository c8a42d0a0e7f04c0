//! HTTP传输层
//!
//! 所有对远程FHIR API的调用都经过 [`HttpTransport`]，
//! 生产环境使用 [`ReqwestTransport`]，测试中替换为记录请求的模拟实现。

use async_trait::async_trait;
use fhirdesk_core::{DeskError, ResourceKind, Result};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// HTTP方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// 一次出站请求
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub bearer_token: Option<String>,
    pub body: Option<serde_json::Value>,
}

/// 一次响应
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 解码JSON响应体，空响应体按 `null` 解码
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::from_slice(b"null")?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// 非2xx状态转换为错误
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        match self.status {
            404 => Err(DeskError::NotFound(self.text())),
            401 => Err(DeskError::NotAuthenticated),
            status => Err(DeskError::Status {
                status,
                body: self.text(),
            }),
        }
    }
}

/// 传输层接口
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// 基于reqwest的传输实现
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| DeskError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, request.url.clone())
            .header("Accept", "application/fhir+json, application/json");

        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DeskError::Network(format!("{} {}: {}", request.method, request.url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| DeskError::Network(format!("Failed to read response body: {}", e)))?
            .to_vec();

        debug!("{} {} -> {}", request.method, request.url, status);
        Ok(HttpResponse { status, body })
    }
}

/// FHIR服务根地址与资源URL构造
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FhirEndpoint {
    base: String,
}

impl FhirEndpoint {
    pub fn new(base_url: &str) -> Result<Self> {
        let cleaned = base_url.trim_end_matches('/');
        let parsed = Url::parse(cleaned)
            .map_err(|e| DeskError::Config(format!("Invalid URL '{}': {}", cleaned, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DeskError::Config(format!(
                "URL must use http or https scheme, got: {}",
                parsed.scheme()
            )));
        }

        Ok(Self {
            base: cleaned.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn parse(&self, raw: String) -> Result<Url> {
        Url::parse(&raw).map_err(|e| DeskError::Config(format!("Invalid URL '{}': {}", raw, e)))
    }

    /// `<base>/<Kind>?k=v...`
    pub fn collection_url(&self, kind: ResourceKind, params: &[(&str, String)]) -> Result<Url> {
        let mut url = self.parse(format!("{}/{}", self.base, kind))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// `<base>/<Kind>/<id>`
    pub fn resource_url(&self, kind: ResourceKind, id: &str) -> Result<Url> {
        let mut url = self.parse(format!("{}/{}", self.base, kind))?;
        url.path_segments_mut()
            .map_err(|_| DeskError::Config(format!("URL cannot be a base: {}", self.base)))?
            .push(id);
        Ok(url)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::HeaderMap, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_endpoint_validation() {
        assert!(FhirEndpoint::new("http://localhost:8080/fhir/").is_ok());
        assert!(FhirEndpoint::new("not-a-url").is_err());
        assert!(FhirEndpoint::new("ftp://localhost:8080/fhir").is_err());
    }

    #[test]
    fn test_endpoint_urls() {
        let endpoint = FhirEndpoint::new("http://localhost:8080/fhir/").unwrap();

        let url = endpoint
            .collection_url(
                ResourceKind::Patient,
                &[("_count", "20".to_string()), ("_offset", "40".to_string())],
            )
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/fhir/Patient?_count=20&_offset=40");

        let url = endpoint.resource_url(ResourceKind::Media, "a b").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/fhir/Media/a%20b");
    }

    #[test]
    fn test_error_for_status() {
        let ok = HttpResponse { status: 201, body: Vec::new() };
        assert!(ok.error_for_status().is_ok());

        let missing = HttpResponse { status: 404, body: b"gone".to_vec() };
        assert!(matches!(missing.error_for_status(), Err(DeskError::NotFound(_))));

        let failed = HttpResponse { status: 500, body: b"boom".to_vec() };
        let err = failed.error_for_status().unwrap_err();
        assert_eq!(err.status_code(), Some(500));
    }

    #[test]
    fn test_empty_body_decodes_as_null() {
        let response = HttpResponse { status: 204, body: Vec::new() };
        let value: serde_json::Value = response.json().unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn test_reqwest_transport_against_local_server() {
        async fn patients(
            headers: HeaderMap,
            Query(params): Query<HashMap<String, String>>,
        ) -> Json<serde_json::Value> {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            Json(json!({
                "resourceType": "Bundle",
                "auth": auth,
                "count": params.get("_count"),
            }))
        }

        let app = Router::new().route("/fhir/Patient", get(patients));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let endpoint = FhirEndpoint::new(&format!("http://{}/fhir", addr)).unwrap();
        let transport =
            ReqwestTransport::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap();

        let response = transport
            .send(HttpRequest {
                method: HttpMethod::Get,
                url: endpoint
                    .collection_url(ResourceKind::Patient, &[("_count", "5".to_string())])
                    .unwrap(),
                bearer_token: Some("secret".to_string()),
                body: None,
            })
            .await
            .unwrap();

        assert!(response.is_success());
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["auth"], "Bearer secret");
        assert_eq!(body["count"], "5");
    }
}
