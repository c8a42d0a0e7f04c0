//! FHIR Desk演示程序
//!
//! 连接 `FHIRDESK_SERVER__BASE_URL`（默认 http://localhost:8080/fhir）上的FHIR服务器，
//! 依次演示：
//! - 创建患者
//! - 为患者创建观察记录并查看详情
//! - 列表过滤与排序
//! - 删除观察记录及其媒体

use anyhow::Result;
use fhirdesk::admin::{init_logging, ConfigManager};
use fhirdesk::client::{
    AttachmentCache, ClientCredentials, CredentialProvider, FhirConnection, FhirEndpoint, HttpTransport,
    ObservationForm, PageRequest, PatientForm, ReqwestTransport, StaticToken, SubmissionStatus,
};
use fhirdesk::core::utils::generate_identifier;
use fhirdesk::core::{FhirResource, ListQuery};
use fhirdesk::FhirDesk;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let manager = ConfigManager::new("fhirdesk.toml")?;
    let config = manager.get_config().await;
    init_logging(&config.logging.level)?;

    info!("🚀 启动FHIR Desk演示，服务器: {}", config.server.base_url);

    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(
        Duration::from_secs(config.server.connect_timeout_secs),
        Duration::from_secs(config.server.request_timeout_secs),
    )?);
    let credentials: Arc<dyn CredentialProvider> = match (&config.auth.client_secret, &config.auth.issuer) {
        (Some(secret), Some(issuer)) => Arc::new(ClientCredentials::new(
            fhirdesk::client::IdentityProvider {
                issuer: issuer.clone(),
                client_id: config.auth.client_id.clone().unwrap_or_default(),
                audience: config.auth.audience.clone(),
                redirect_uri: config.auth.redirect_uri.clone(),
                logout_return_to: config.auth.logout_return_to.clone(),
            },
            secret.clone(),
            transport.clone(),
        )),
        _ => Arc::new(StaticToken::new(config.auth.token.clone().unwrap_or_else(|| "demo".to_string()))),
    };

    let desk = FhirDesk::new(
        FhirConnection::new(FhirEndpoint::new(&config.server.base_url)?, transport, credentials),
        AttachmentCache::new(config.cache.max_entries, config.cache.max_bytes),
    );

    let Some(patient_id) = demo_create_patient(&desk).await? else {
        warn!("❌ 患者创建失败，演示结束");
        return Ok(());
    };
    demo_observation(&desk, &patient_id).await?;
    demo_patient_list(&desk).await;

    info!("✅ 演示完成");
    Ok(())
}

/// 创建患者
async fn demo_create_patient(desk: &FhirDesk) -> Result<Option<String>> {
    info!("\n👤 创建患者");

    let form = PatientForm {
        identifier: generate_identifier(),
        given: "Alice".to_string(),
        family: "Smith".to_string(),
        gender: "female".to_string(),
        birth_date: "1985-04-12".to_string(),
        phone: "555-123-4567".to_string(),
        email: "alice.smith@example.org".to_string(),
        street: "Hauptstraße 5".to_string(),
        city: "Berlin".to_string(),
        state: "BE".to_string(),
        postal_code: "10115".to_string(),
        country: "Germany".to_string(),
        active: true,
        ..PatientForm::default()
    };

    let report = desk.create_patient(form).await?;
    info!("   状态: {}", report.status());
    Ok(report.resource.and_then(|p| p.id().map(str::to_string)))
}

/// 创建、查看并删除观察记录
async fn demo_observation(desk: &FhirDesk, patient_id: &str) -> Result<()> {
    info!("\n🔬 为患者 {} 创建观察记录", patient_id);

    let form = ObservationForm {
        category: "laboratory".to_string(),
        loinc: "2345-7".to_string(),
        body_site: "368209003".to_string(),
        performer: "Dr. Example".to_string(),
        low: Some(70.0),
        high: Some(110.0),
        unit: "mg/dL".to_string(),
        interpretation: "Normal".to_string(),
        note: "Fasting glucose".to_string(),
        ..ObservationForm::default()
    };

    let report = desk.create_observation(patient_id, form).await?;
    if report.status() == SubmissionStatus::Failure {
        warn!("❌ 观察记录创建失败: {}", report.errors.join("; "));
        return Ok(());
    }
    let Some(observation_id) = report.resource.as_ref().and_then(|o| o.id()).map(str::to_string) else {
        return Ok(());
    };

    let details = desk.observation_details(&observation_id).await?;
    info!(
        "   观察记录 {}: {} 条媒体",
        details.observation.identifier_value().unwrap_or("-"),
        details.media.len()
    );

    let mut list = desk.patient_observations(patient_id, PageRequest::default());
    if list.refresh().await {
        info!("   患者共有 {} 条观察记录（当前页）", list.items().len());
    }

    let deletion = desk.delete_observation(&observation_id).await?;
    info!(
        "   已删除观察记录，媒体删除 {} 条，失败 {} 条",
        deletion.media.deleted, deletion.media.failed
    );
    Ok(())
}

/// 列表过滤与排序
async fn demo_patient_list(desk: &FhirDesk) {
    info!("\n📋 患者列表");

    let mut list = desk.patients(PageRequest::new(50, 0));
    if !list.refresh().await {
        warn!("❌ 患者列表加载失败");
        return;
    }

    list.set_query(ListQuery::new("family", "name").with_search_text("smith"));
    for patient in list.visible() {
        info!("   {} {}", patient.id().unwrap_or("-"), patient.display_name());
    }
}
