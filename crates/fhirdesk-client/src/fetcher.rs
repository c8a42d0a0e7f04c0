//! 资源读取
//!
//! 分页读取资源集合，解包分页信封为平铺列表。

use fhirdesk_core::{Bundle, FhirResource, Observation, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::FhirConnection;
use crate::transport::HttpMethod;

/// 默认每页条数
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// 分页参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub count: u32,
    pub offset: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            count: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl PageRequest {
    /// 负数偏移量按0处理
    pub fn new(count: u32, offset: i64) -> Self {
        Self {
            count,
            offset: offset.clamp(0, u32::MAX as i64) as u32,
        }
    }

    pub fn next(&self) -> Self {
        Self {
            count: self.count,
            offset: self.offset.saturating_add(self.count),
        }
    }

    pub fn previous(&self) -> Self {
        Self {
            count: self.count,
            offset: self.offset.saturating_sub(self.count),
        }
    }

    fn params(&self) -> [(&'static str, String); 2] {
        [("_count", self.count.to_string()), ("_offset", self.offset.to_string())]
    }
}

/// 资源读取器
#[derive(Clone)]
pub struct ResourceFetcher {
    connection: FhirConnection,
}

impl ResourceFetcher {
    pub fn new(connection: FhirConnection) -> Self {
        Self { connection }
    }

    /// 读取一页资源
    pub async fn fetch_page<T: FhirResource>(&self, page: PageRequest) -> Result<Vec<T>> {
        self.search(&[], page).await
    }

    /// 带等值条件的分页查询，例如 `subject=<id>`、`identifier=<value>`
    pub async fn search<T: FhirResource>(
        &self,
        params: &[(&str, String)],
        page: PageRequest,
    ) -> Result<Vec<T>> {
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.extend(page.params());

        let resources = self.query::<T>(&query).await?;
        debug!(
            "Fetched {} {} resources (offset {})",
            resources.len(),
            T::KIND,
            page.offset
        );
        Ok(resources)
    }

    async fn query<T: FhirResource>(&self, params: &[(&str, String)]) -> Result<Vec<T>> {
        let url = self.connection.endpoint().collection_url(T::KIND, params)?;
        let response = self.connection.execute(HttpMethod::Get, url, None).await?;
        let bundle: Bundle<T> = response.json()?;
        Ok(bundle.into_resources())
    }

    /// 按逻辑ID读取单个资源
    pub async fn read<T: FhirResource>(&self, id: &str) -> Result<T> {
        let url = self.connection.endpoint().resource_url(T::KIND, id)?;
        let response = self.connection.execute(HttpMethod::Get, url, None).await?;
        response.json()
    }

    /// 按业务标识符查找第一个匹配的资源
    pub async fn find_by_identifier<T: FhirResource>(&self, value: &str) -> Result<Option<T>> {
        let mut found: Vec<T> = self.query(&[("identifier", value.to_string())]).await?;
        Ok(if found.is_empty() { None } else { Some(found.swap_remove(0)) })
    }

    /// 指定患者的观察记录
    pub async fn patient_observations(
        &self,
        patient_id: &str,
        page: PageRequest,
    ) -> Result<Vec<Observation>> {
        self.search(&[("subject", patient_id.to_string())], page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::transport::mock::{json_response, MockTransport};
    use crate::transport::FhirEndpoint;
    use fhirdesk_core::{DeskError, Patient};
    use serde_json::json;
    use std::sync::Arc;

    fn fetcher(transport: Arc<MockTransport>) -> ResourceFetcher {
        ResourceFetcher::new(FhirConnection::new(
            FhirEndpoint::new("http://localhost:8080/fhir").unwrap(),
            transport,
            Arc::new(StaticToken::new("abc")),
        ))
    }

    #[test]
    fn test_page_request_clamps_and_moves() {
        let page = PageRequest::new(20, -40);
        assert_eq!(page.offset, 0);
        assert_eq!(page.previous().offset, 0);
        assert_eq!(page.next().offset, 20);
        assert_eq!(page.next().next().previous().offset, 20);
    }

    #[tokio::test]
    async fn test_fetch_page_unwraps_bundle() {
        let transport = Arc::new(MockTransport::new(|_| {
            json_response(
                200,
                json!({
                    "resourceType": "Bundle",
                    "entry": [
                        { "resource": { "resourceType": "Patient", "id": "1" } },
                        { "resource": { "resourceType": "Patient", "id": "2" } }
                    ]
                }),
            )
        }));
        let fetcher = fetcher(transport.clone());

        let patients: Vec<Patient> = fetcher.fetch_page(PageRequest::new(20, 40)).await.unwrap();
        assert_eq!(patients.len(), 2);
        assert_eq!(patients[1].id.as_deref(), Some("2"));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].url.as_str(),
            "http://localhost:8080/fhir/Patient?_count=20&_offset=40"
        );
        assert_eq!(requests[0].bearer_token.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_search_by_subject() {
        let transport = Arc::new(MockTransport::new(|_| json_response(200, json!({ "resourceType": "Bundle" }))));
        let fetcher = fetcher(transport.clone());

        let observations = fetcher
            .patient_observations("7", PageRequest::default())
            .await
            .unwrap();
        assert!(observations.is_empty());
        assert_eq!(
            transport.requests()[0].url.query(),
            Some("subject=7&_count=20&_offset=0")
        );
    }

    #[tokio::test]
    async fn test_decode_and_status_failures() {
        let transport = Arc::new(MockTransport::new(|request| {
            if request.url.path().ends_with("/Patient") {
                Ok(crate::transport::HttpResponse { status: 200, body: b"<html>".to_vec() })
            } else {
                json_response(503, json!({}))
            }
        }));
        let fetcher = fetcher(transport);

        let err = fetcher.fetch_page::<Patient>(PageRequest::default()).await.unwrap_err();
        assert!(matches!(err, DeskError::Decode(_)));

        let err = fetcher.read::<Observation>("9").await.unwrap_err();
        assert_eq!(err.status_code(), Some(503));
    }

    #[tokio::test]
    async fn test_find_by_identifier_takes_first() {
        let transport = Arc::new(MockTransport::new(|_| {
            json_response(
                200,
                json!({ "entry": [
                    { "resource": { "resourceType": "Patient", "id": "a" } },
                    { "resource": { "resourceType": "Patient", "id": "b" } }
                ]}),
            )
        }));
        let fetcher = fetcher(transport.clone());

        let found: Option<Patient> = fetcher.find_by_identifier("p-1").await.unwrap();
        assert_eq!(found.unwrap().id.as_deref(), Some("a"));
        assert_eq!(transport.requests()[0].url.query(), Some("identifier=p-1"));
    }
}
