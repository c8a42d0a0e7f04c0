//! # FHIR Desk客户端
//!
//! 远程FHIR API的类型化客户端，包括：
//! - HTTP传输层与凭证来源，每次调用前重新获取令牌
//! - 分页资源读取与列表视图状态（刷新失败保留旧数据）
//! - Observation → Media 的交叉引用解析，单条失败不影响其余
//! - 写操作分发、表单校验与提交状态机
//! - 附件读取与有界图像缓存

pub mod attachment;
pub mod auth;
pub mod cache;
pub mod connection;
pub mod dispatcher;
pub mod fetcher;
pub mod forms;
pub mod resolver;
pub mod submission;
pub mod transport;
pub mod views;

pub use auth::{Anonymous, ClientCredentials, CredentialProvider, IdentityProvider, StaticToken};
pub use cache::{AttachmentCache, CacheStats};
pub use connection::FhirConnection;
pub use dispatcher::{MutationDispatcher, ObservationDeletion, SubmissionStatus};
pub use fetcher::{PageRequest, ResourceFetcher};
pub use forms::{ObservationEdit, ObservationForm, PatientEdit, PatientForm, SubmissionReport};
pub use resolver::{CrossReferenceResolver, MediaDeletion, ObservationDetails};
pub use submission::{Submission, SubmissionEvent, SubmissionState};
pub use transport::{FhirEndpoint, HttpTransport, ReqwestTransport};
pub use views::ResourceList;

use fhirdesk_core::{Attachment, Observation, Patient, ResourceKind, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// 各组件的组合入口
pub struct FhirDesk {
    fetcher: ResourceFetcher,
    resolver: CrossReferenceResolver,
    dispatcher: MutationDispatcher,
    credentials: Arc<dyn CredentialProvider>,
    cache: Mutex<AttachmentCache>,
    require_auth: bool,
}

impl FhirDesk {
    pub fn new(connection: FhirConnection, cache: AttachmentCache) -> Self {
        let fetcher = ResourceFetcher::new(connection.clone());
        Self {
            resolver: CrossReferenceResolver::new(fetcher.clone()),
            dispatcher: MutationDispatcher::new(connection.clone()),
            credentials: connection.credentials().clone(),
            fetcher,
            cache: Mutex::new(cache),
            require_auth: true,
        }
    }

    /// 写操作前是否要求已认证（默认要求）
    pub fn with_auth_required(mut self, required: bool) -> Self {
        self.require_auth = required;
        self
    }

    pub fn fetcher(&self) -> &ResourceFetcher {
        &self.fetcher
    }

    pub fn resolver(&self) -> &CrossReferenceResolver {
        &self.resolver
    }

    pub fn dispatcher(&self) -> &MutationDispatcher {
        &self.dispatcher
    }

    /// 当前凭证来源给出的令牌
    pub async fn bearer_token(&self) -> Result<Option<String>> {
        self.credentials.bearer_token().await
    }

    async fn gate(&self) -> Result<()> {
        if self.require_auth {
            auth::require_authenticated(self.credentials.as_ref()).await?;
        }
        Ok(())
    }

    pub fn patients(&self, page: PageRequest) -> ResourceList<Patient> {
        ResourceList::new(self.fetcher.clone(), page)
    }

    pub fn observations(&self, page: PageRequest) -> ResourceList<Observation> {
        ResourceList::new(self.fetcher.clone(), page)
    }

    /// 指定患者的观察记录列表
    pub fn patient_observations(&self, patient_id: &str, page: PageRequest) -> ResourceList<Observation> {
        ResourceList::new(self.fetcher.clone(), page)
            .with_search("subject", patient_id)
            .with_query(fhirdesk_core::ListQuery::new("identifier", "creationDate"))
    }

    pub async fn patient(&self, id: &str) -> Result<Patient> {
        self.fetcher.read(id).await
    }

    pub async fn observation_details(&self, id: &str) -> Result<ObservationDetails> {
        self.resolver.observation_details(id).await
    }

    pub async fn create_patient(&self, form: PatientForm) -> Result<SubmissionReport<Patient>> {
        self.gate().await?;
        forms::submit_patient(&self.dispatcher, form).await
    }

    pub async fn create_observation(
        &self,
        patient_id: &str,
        form: ObservationForm,
    ) -> Result<SubmissionReport<Observation>> {
        self.gate().await?;
        forms::submit_observation(&self.dispatcher, patient_id, form).await
    }

    pub async fn edit_patient(&self, id: &str, edit: PatientEdit) -> Result<SubmissionReport<Patient>> {
        self.gate().await?;
        let patient = self.patient(id).await?;
        forms::save_patient_edit(&self.dispatcher, patient, edit).await
    }

    pub async fn edit_observation(
        &self,
        id: &str,
        edit: ObservationEdit,
    ) -> Result<SubmissionReport<Observation>> {
        self.gate().await?;
        let observation: Observation = self.fetcher.read(id).await?;
        forms::save_observation_edit(&self.dispatcher, observation, edit).await
    }

    pub async fn delete_patient(&self, id: &str) -> Result<()> {
        self.gate().await?;
        self.dispatcher.delete(ResourceKind::Patient, id).await?;
        info!("Deleted patient {}", id);
        Ok(())
    }

    pub async fn delete_observation(&self, id: &str) -> Result<ObservationDeletion> {
        self.gate().await?;
        let outcome = self.dispatcher.delete_observation(&self.resolver, id).await?;
        info!(
            "Deleted observation {} ({} media deleted, {} failed)",
            id, outcome.media.deleted, outcome.media.failed
        );
        Ok(outcome)
    }

    /// 解码附件，经由有界缓存
    pub async fn attachment_bytes(&self, attachment: &Attachment) -> Result<Arc<Vec<u8>>> {
        self.cache.lock().await.get_or_decode(attachment)
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }
}
