//! 列表视图状态
//!
//! 每个视图独占自己拉取的列表，不与其他视图共享。
//! 刷新失败时保留上一次成功的数据。

use fhirdesk_core::{FhirResource, ListQuery, Searchable};
use tracing::{debug, error};

use crate::fetcher::{PageRequest, ResourceFetcher};

/// 视图持有的资源列表
pub struct ResourceList<T> {
    fetcher: ResourceFetcher,
    items: Vec<T>,
    page: PageRequest,
    query: ListQuery,
    /// 固定的等值查询条件，例如 `subject=<患者ID>`
    params: Vec<(String, String)>,
}

impl<T: FhirResource + Searchable> ResourceList<T> {
    pub fn new(fetcher: ResourceFetcher, page: PageRequest) -> Self {
        Self {
            fetcher,
            items: Vec::new(),
            page,
            query: T::default_query(),
            params: Vec::new(),
        }
    }

    /// 附加固定查询条件
    pub fn with_search(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_query(mut self, query: ListQuery) -> Self {
        self.query = query;
        self
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn page(&self) -> PageRequest {
        self.page
    }

    pub fn query(&self) -> &ListQuery {
        &self.query
    }

    pub fn set_query(&mut self, query: ListQuery) {
        self.query = query;
    }

    /// 重新拉取当前页；失败时保留已有数据并返回false
    pub async fn refresh(&mut self) -> bool {
        let params: Vec<(&str, String)> = self
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();

        match self.fetcher.search::<T>(&params, self.page).await {
            Ok(items) => {
                debug!("{} list refreshed with {} items", T::KIND, items.len());
                self.items = items;
                true
            }
            Err(e) => {
                error!(
                    "Failed to refresh {} list (offset {}): {}; keeping {} stale items",
                    T::KIND,
                    self.page.offset,
                    e,
                    self.items.len()
                );
                false
            }
        }
    }

    pub async fn next_page(&mut self) -> bool {
        self.page = self.page.next();
        self.refresh().await
    }

    pub async fn previous_page(&mut self) -> bool {
        self.page = self.page.previous();
        self.refresh().await
    }

    /// 过滤并排序后的可见行
    pub fn visible(&self) -> Vec<T> {
        self.query.apply(&self.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::connection::FhirConnection;
    use crate::transport::mock::{json_response, MockTransport};
    use crate::transport::FhirEndpoint;
    use fhirdesk_core::{DeskError, Observation, Patient};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fetcher(transport: Arc<MockTransport>) -> ResourceFetcher {
        ResourceFetcher::new(FhirConnection::new(
            FhirEndpoint::new("http://localhost:8080/fhir").unwrap(),
            transport,
            Arc::new(StaticToken::new("abc")),
        ))
    }

    fn patient_bundle() -> serde_json::Value {
        json!({ "entry": [
            { "resource": { "resourceType": "Patient", "id": "2", "name": [{ "given": ["Ben"] }] } },
            { "resource": { "resourceType": "Patient", "id": "1", "name": [{ "given": ["Anna"] }] } },
            { "resource": { "resourceType": "Patient", "id": "3", "name": [{ "given": ["cara"] }] } }
        ]})
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_items() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let transport = Arc::new(MockTransport::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                json_response(200, patient_bundle())
            } else {
                Err(DeskError::Network("offline".to_string()))
            }
        }));
        let mut list: ResourceList<Patient> = ResourceList::new(fetcher(transport), PageRequest::default());

        assert!(list.refresh().await);
        assert_eq!(list.items().len(), 3);

        assert!(!list.refresh().await);
        assert_eq!(list.items().len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_visible_rows_are_filtered_and_sorted() {
        let transport = Arc::new(MockTransport::new(|_| json_response(200, patient_bundle())));
        let mut list: ResourceList<Patient> = ResourceList::new(fetcher(transport), PageRequest::default());
        list.refresh().await;

        let ids: Vec<_> = list.visible().iter().map(|p| p.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        list.set_query(ListQuery {
            filter_attribute: "name".to_string(),
            search_text: "an".to_string(),
            sort_attribute: "name".to_string(),
        });
        let names: Vec<_> = list.visible().iter().map(|p| p.display_name()).collect();
        assert_eq!(names, vec!["Anna"]);
    }

    #[tokio::test]
    async fn test_paging_with_fixed_search() {
        let transport = Arc::new(MockTransport::new(|_| json_response(200, json!({}))));
        let mut list: ResourceList<Observation> =
            ResourceList::new(fetcher(transport.clone()), PageRequest::new(10, 0)).with_search("subject", "7");

        list.next_page().await;
        list.next_page().await;
        list.previous_page().await;
        assert_eq!(list.page().offset, 10);

        let queries: Vec<_> = transport
            .requests()
            .iter()
            .map(|r| r.url.query().unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            queries,
            vec![
                "subject=7&_count=10&_offset=10",
                "subject=7&_count=10&_offset=20",
                "subject=7&_count=10&_offset=10",
            ]
        );
    }
}
