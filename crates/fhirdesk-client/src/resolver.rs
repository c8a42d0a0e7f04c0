//! 交叉引用解析
//!
//! 按观察记录的 `derivedFrom` 反向引用逐条查询关联媒体。
//! 单条引用失败只记录日志并跳过，不会中断其余引用的解析。

use fhirdesk_core::{Media, Observation, Reference, ResourceKind, Result};
use tracing::{debug, warn};

use crate::dispatcher::MutationDispatcher;
use crate::fetcher::ResourceFetcher;

/// 观察记录及其已解析的媒体
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationDetails {
    pub observation: Observation,
    pub media: Vec<Media>,
}

/// 关联媒体删除计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaDeletion {
    pub deleted: usize,
    pub failed: usize,
}

/// 交叉引用解析器
#[derive(Clone)]
pub struct CrossReferenceResolver {
    fetcher: ResourceFetcher,
}

impl CrossReferenceResolver {
    pub fn new(fetcher: ResourceFetcher) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &ResourceFetcher {
        &self.fetcher
    }

    async fn resolve_one(&self, reference: &Reference) -> Result<Option<Media>> {
        if let Some(value) = reference.identifier_value() {
            return self.fetcher.find_by_identifier::<Media>(value).await;
        }
        if let Some(id) = reference.literal_id(ResourceKind::Media) {
            return self.fetcher.read::<Media>(id).await.map(Some);
        }
        Ok(None)
    }

    /// 逐条解析引用，保持引用顺序；解析失败或无结果的引用被省略
    pub async fn resolve_references(&self, references: &[Reference]) -> Vec<Media> {
        let mut resolved = Vec::with_capacity(references.len());

        for (index, reference) in references.iter().enumerate() {
            match self.resolve_one(reference).await {
                Ok(Some(media)) => resolved.push(media),
                Ok(None) => {
                    warn!("derivedFrom[{}] resolved to no media: {:?}", index, reference);
                }
                Err(e) => {
                    warn!("Failed to resolve derivedFrom[{}]: {}", index, e);
                }
            }
        }

        debug!("Resolved {} of {} media references", resolved.len(), references.len());
        resolved
    }

    pub async fn resolve_media(&self, observation: &Observation) -> Vec<Media> {
        self.resolve_references(&observation.derived_from).await
    }

    /// 读取观察记录并解析其媒体
    pub async fn observation_details(&self, id: &str) -> Result<ObservationDetails> {
        let observation: Observation = self.fetcher.read(id).await?;
        let media = self.resolve_media(&observation).await;
        Ok(ObservationDetails { observation, media })
    }

    async fn media_server_id(&self, reference: &Reference) -> Result<Option<String>> {
        if let Some(id) = reference.literal_id(ResourceKind::Media) {
            return Ok(Some(id.to_string()));
        }
        match reference.identifier_value() {
            Some(value) => Ok(self
                .fetcher
                .find_by_identifier::<Media>(value)
                .await?
                .and_then(|media| media.id)),
            None => Ok(None),
        }
    }

    /// 尽力删除观察记录关联的媒体
    ///
    /// 字面引用 `Media/<id>` 直接删除，仅有标识符的引用先查询出服务端ID再删除。
    pub async fn delete_derived_media(
        &self,
        observation: &Observation,
        dispatcher: &MutationDispatcher,
    ) -> MediaDeletion {
        let mut outcome = MediaDeletion::default();

        for reference in &observation.derived_from {
            let id = match self.media_server_id(reference).await {
                Ok(Some(id)) => id,
                Ok(None) => {
                    warn!("No media found for reference {:?}", reference);
                    outcome.failed += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Failed to look up media for deletion: {}", e);
                    outcome.failed += 1;
                    continue;
                }
            };

            match dispatcher.delete(ResourceKind::Media, &id).await {
                Ok(()) => outcome.deleted += 1,
                Err(e) => {
                    warn!("Failed to delete Media/{}: {}", id, e);
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::connection::FhirConnection;
    use crate::transport::mock::{json_response, MockTransport};
    use crate::transport::{FhirEndpoint, HttpMethod};
    use fhirdesk_core::{builders, DeskError, FhirResource, Identifier};
    use serde_json::json;
    use std::sync::Arc;

    fn resolver(transport: Arc<MockTransport>) -> CrossReferenceResolver {
        CrossReferenceResolver::new(ResourceFetcher::new(FhirConnection::new(
            FhirEndpoint::new("http://localhost:8080/fhir").unwrap(),
            transport,
            Arc::new(StaticToken::new("abc")),
        )))
    }

    fn observation_with(values: &[&str]) -> Observation {
        Observation {
            id: Some("obs-1".to_string()),
            derived_from: values
                .iter()
                .map(|v| builders::identifier_reference(ResourceKind::Media, &Identifier::new(*v)))
                .collect(),
            ..Default::default()
        }
    }

    fn identifier_param(request: &crate::transport::HttpRequest) -> String {
        request
            .url
            .query_pairs()
            .find(|(k, _)| k == "identifier")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_missing_reference_is_omitted() {
        let transport = Arc::new(MockTransport::new(|request| {
            if identifier_param(request) == "m-1" {
                json_response(
                    200,
                    json!({ "entry": [{ "resource": {
                        "resourceType": "Media",
                        "id": "10",
                        "identifier": [{ "value": "m-1" }]
                    }}]}),
                )
            } else {
                json_response(200, json!({ "resourceType": "Bundle", "total": 0 }))
            }
        }));
        let resolver = resolver(transport.clone());

        let media = resolver.resolve_media(&observation_with(&["m-1", "m-2"])).await;
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].identifier_value(), Some("m-1"));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_later_references() {
        let transport = Arc::new(MockTransport::new(|request| match identifier_param(request).as_str() {
            "m-1" => Err(DeskError::Network("connection reset".to_string())),
            "m-2" => json_response(500, json!({})),
            other => json_response(
                200,
                json!({ "entry": [{ "resource": {
                    "resourceType": "Media",
                    "identifier": [{ "value": other }]
                }}]}),
            ),
        }));
        let resolver = resolver(transport);

        let media = resolver
            .resolve_media(&observation_with(&["m-1", "m-2", "m-3", "m-4"]))
            .await;
        let values: Vec<_> = media.iter().map(|m| m.identifier_value()).collect();
        assert_eq!(values, vec![Some("m-3"), Some("m-4")]);
    }

    #[tokio::test]
    async fn test_observation_details() {
        let transport = Arc::new(MockTransport::new(|request| {
            if request.url.path() == "/fhir/Observation/obs-1" {
                json_response(200, serde_json::to_value(observation_with(&["m-1"])).unwrap())
            } else {
                json_response(
                    200,
                    json!({ "entry": [{ "resource": { "resourceType": "Media", "id": "10" } }] }),
                )
            }
        }));
        let resolver = resolver(transport.clone());

        let details = resolver.observation_details("obs-1").await.unwrap();
        assert_eq!(details.observation.id(), Some("obs-1"));
        assert_eq!(details.media.len(), 1);
        assert!(transport.requests().iter().all(|r| r.method == HttpMethod::Get));
    }

    #[tokio::test]
    async fn test_literal_reference_is_read_directly() {
        let transport = Arc::new(MockTransport::new(|request| {
            assert_eq!(request.url.path(), "/fhir/Media/55");
            json_response(200, json!({ "resourceType": "Media", "id": "55" }))
        }));
        let resolver = resolver(transport);

        let references = vec![Reference {
            reference: Some("Media/55".to_string()),
            ..Default::default()
        }];
        let media = resolver.resolve_references(&references).await;
        assert_eq!(media[0].id(), Some("55"));
    }
}
