//! 写操作分发
//!
//! POST / PUT / DELETE 共用一个请求入口，一次调用只发送一次写请求，不重试。

use fhirdesk_core::{FhirResource, Observation, ResourceKind, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};

use crate::connection::FhirConnection;
use crate::resolver::{CrossReferenceResolver, MediaDeletion};
use crate::transport::HttpMethod;

/// 对外展示的二值提交状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Success,
    Failure,
}

impl SubmissionStatus {
    pub fn from_result<T>(result: &Result<T>) -> Self {
        if result.is_ok() {
            SubmissionStatus::Success
        } else {
            SubmissionStatus::Failure
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionStatus::Success => f.write_str("success"),
            SubmissionStatus::Failure => f.write_str("failure"),
        }
    }
}

/// 观察记录删除结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservationDeletion {
    pub media: MediaDeletion,
}

/// 写操作分发器
#[derive(Clone)]
pub struct MutationDispatcher {
    connection: FhirConnection,
}

impl MutationDispatcher {
    pub fn new(connection: FhirConnection) -> Self {
        Self { connection }
    }

    async fn write(
        &self,
        method: HttpMethod,
        url: url::Url,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        match self.connection.execute(method, url.clone(), body).await {
            Ok(response) => {
                info!("{} {} -> {}", method, url, response.status);
                response.json()
            }
            Err(e) => {
                error!("{} {} failed: {}", method, url, e);
                Err(e)
            }
        }
    }

    /// 新建资源，返回解码后的响应体
    pub async fn post<T: FhirResource>(&self, resource: &T) -> Result<serde_json::Value> {
        let body = serde_json::to_value(resource)?;
        let url = self.connection.endpoint().collection_url(T::KIND, &[])?;
        self.write(HttpMethod::Post, url, Some(body)).await
    }

    /// 整体替换资源
    pub async fn put<T: FhirResource>(&self, id: &str, resource: &T) -> Result<serde_json::Value> {
        let body = serde_json::to_value(resource)?;
        let url = self.connection.endpoint().resource_url(T::KIND, id)?;
        self.write(HttpMethod::Put, url, Some(body)).await
    }

    pub async fn delete(&self, kind: ResourceKind, id: &str) -> Result<()> {
        let url = self.connection.endpoint().resource_url(kind, id)?;
        self.write(HttpMethod::Delete, url, None).await?;
        Ok(())
    }

    /// 新建资源并解码服务端返回的版本；响应体为空时返回提交的内容
    pub async fn create<T: FhirResource>(&self, resource: &T) -> Result<T> {
        let value = self.post(resource).await?;
        if value.is_null() {
            return Ok(resource.clone());
        }
        Ok(serde_json::from_value(value)?)
    }

    /// 更新资源并解码服务端返回的版本；响应体为空时返回提交的内容
    pub async fn update<T: FhirResource>(&self, id: &str, resource: &T) -> Result<T> {
        let value = self.put(id, resource).await?;
        if value.is_null() {
            return Ok(resource.clone());
        }
        Ok(serde_json::from_value(value)?)
    }

    /// 删除观察记录：先尽力删除关联媒体，再删除观察记录本身
    pub async fn delete_observation(
        &self,
        resolver: &CrossReferenceResolver,
        id: &str,
    ) -> Result<ObservationDeletion> {
        let observation: Observation = resolver.fetcher().read(id).await?;

        let media = resolver.delete_derived_media(&observation, self).await;
        if media.failed > 0 {
            warn!(
                "{} of {} media for observation {} could not be deleted",
                media.failed,
                media.failed + media.deleted,
                id
            );
        }

        self.delete(ResourceKind::Observation, id).await?;
        Ok(ObservationDeletion { media })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::fetcher::ResourceFetcher;
    use crate::transport::mock::{json_response, MockTransport};
    use crate::transport::{FhirEndpoint, HttpResponse};
    use fhirdesk_core::{builders, DeskError, Identifier, Patient};
    use serde_json::json;
    use std::sync::Arc;

    fn connection(transport: Arc<MockTransport>) -> FhirConnection {
        FhirConnection::new(
            FhirEndpoint::new("http://localhost:8080/fhir").unwrap(),
            transport,
            Arc::new(StaticToken::new("abc")),
        )
    }

    #[tokio::test]
    async fn test_post_sends_resource_json() {
        let transport = Arc::new(MockTransport::new(|request| {
            let mut echoed = request.body.clone().unwrap();
            echoed["id"] = json!("101");
            json_response(201, echoed)
        }));
        let dispatcher = MutationDispatcher::new(connection(transport.clone()));

        let patient = Patient {
            identifier: vec![Identifier::new("p-1")],
            ..Default::default()
        };
        let created = dispatcher.create(&patient).await.unwrap();
        assert_eq!(created.id.as_deref(), Some("101"));

        let requests = transport.requests();
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].url.as_str(), "http://localhost:8080/fhir/Patient");
        assert_eq!(requests[0].body.as_ref().unwrap()["resourceType"], "Patient");
    }

    #[tokio::test]
    async fn test_put_with_empty_response_returns_submitted() {
        let transport = Arc::new(MockTransport::new(|_| Ok(HttpResponse { status: 200, body: Vec::new() })));
        let dispatcher = MutationDispatcher::new(connection(transport.clone()));

        let patient = Patient {
            id: Some("5".to_string()),
            birth_date: Some("2001-01-01".to_string()),
            ..Default::default()
        };
        let updated = dispatcher.update("5", &patient).await.unwrap();
        assert_eq!(updated, patient);
        assert_eq!(transport.requests()[0].method, HttpMethod::Put);
        assert_eq!(transport.requests()[0].url.path(), "/fhir/Patient/5");
    }

    #[tokio::test]
    async fn test_failed_write_is_reported_once() {
        let transport = Arc::new(MockTransport::new(|_| json_response(500, json!({}))));
        let dispatcher = MutationDispatcher::new(connection(transport.clone()));

        let result = dispatcher.post(&Patient::default()).await;
        assert_eq!(SubmissionStatus::from_result(&result), SubmissionStatus::Failure);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_observation_removes_media_first() {
        let transport = Arc::new(MockTransport::new(|request| match (request.method, request.url.path()) {
            (HttpMethod::Get, "/fhir/Observation/42") => json_response(
                200,
                json!({
                    "resourceType": "Observation",
                    "id": "42",
                    "derivedFrom": [
                        { "reference": "Media/m1" },
                        { "type": "Media", "identifier": { "value": "ident-2" } }
                    ]
                }),
            ),
            (HttpMethod::Get, "/fhir/Media") => json_response(
                200,
                json!({ "entry": [{ "resource": { "resourceType": "Media", "id": "m2" } }] }),
            ),
            (HttpMethod::Delete, _) => Ok(HttpResponse { status: 204, body: Vec::new() }),
            _ => Err(DeskError::Network("unexpected".to_string())),
        }));
        let connection = connection(transport.clone());
        let dispatcher = MutationDispatcher::new(connection.clone());
        let resolver = CrossReferenceResolver::new(ResourceFetcher::new(connection));

        let outcome = dispatcher.delete_observation(&resolver, "42").await.unwrap();
        assert_eq!(outcome.media, MediaDeletion { deleted: 2, failed: 0 });

        let deletes: Vec<String> = transport
            .requests()
            .into_iter()
            .filter(|r| r.method == HttpMethod::Delete)
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(
            deletes,
            vec!["/fhir/Media/m1", "/fhir/Media/m2", "/fhir/Observation/42"]
        );
    }

    #[tokio::test]
    async fn test_delete_observation_continues_past_media_failures() {
        let transport = Arc::new(MockTransport::new(|request| match (request.method, request.url.path()) {
            (HttpMethod::Get, "/fhir/Observation/7") => {
                let observation = Observation {
                    id: Some("7".to_string()),
                    derived_from: vec![builders::identifier_reference(
                        ResourceKind::Media,
                        &Identifier::new("gone"),
                    )],
                    ..Default::default()
                };
                json_response(200, serde_json::to_value(observation).unwrap())
            }
            (HttpMethod::Get, "/fhir/Media") => json_response(200, json!({ "resourceType": "Bundle" })),
            (HttpMethod::Delete, "/fhir/Observation/7") => Ok(HttpResponse { status: 200, body: Vec::new() }),
            _ => Err(DeskError::Network("unexpected".to_string())),
        }));
        let connection = connection(transport.clone());
        let dispatcher = MutationDispatcher::new(connection.clone());
        let resolver = CrossReferenceResolver::new(ResourceFetcher::new(connection));

        let outcome = dispatcher.delete_observation(&resolver, "7").await.unwrap();
        assert_eq!(outcome.media, MediaDeletion { deleted: 0, failed: 1 });
        assert_eq!(transport.requests().last().unwrap().url.path(), "/fhir/Observation/7");
    }
}
