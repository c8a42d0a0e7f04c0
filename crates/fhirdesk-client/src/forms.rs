//! 表单状态与提交
//!
//! 表单字段以显式类型保存，提交前先校验，再通过构造函数生成请求体。
//! 附件总是在写请求发出之前读取完成。

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use fhirdesk_core::builders;
use fhirdesk_core::utils::{generate_identifier, now_iso};
use fhirdesk_core::{
    Address, Attachment, ContactPoint, ContactPointSystem, DeskError, Gender, HumanName,
    Identifier, Media, MediaStatus, MediaType, Observation, ObservationStatus, Patient,
    PatientCommunication, ResourceKind, Result,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::attachment::read_attachment;
use crate::dispatcher::{MutationDispatcher, SubmissionStatus};
use crate::submission::{Submission, SubmissionEvent};

/// 观察类别可选值
pub const OBSERVATION_CATEGORIES: [&str; 8] = [
    "vital-signs",
    "imaging",
    "laboratory",
    "procedure",
    "survey",
    "exam",
    "therapy",
    "activity",
];

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn non_blank(value: &str) -> Option<String> {
    (!blank(value)).then(|| value.trim().to_string())
}

/// 校验 `YYYY`、`YYYY-MM` 或 `YYYY-MM-DD` 格式的日期
pub fn validate_birth_date(value: &str) -> Result<()> {
    let candidate = match value.len() {
        4 => format!("{}-01-01", value),
        7 => format!("{}-01", value),
        _ => value.to_string(),
    };
    NaiveDate::parse_from_str(&candidate, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| DeskError::Validation(format!("invalid birth date: {}", value)))
}

/// 将表单时间规范化为带毫秒的UTC ISO-8601字符串
pub fn normalize_timestamp(value: &str) -> Result<String> {
    let format = |dt: DateTime<Utc>| dt.to_rfc3339_opts(SecondsFormat::Millis, true);

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(format(dt.with_timezone(&Utc)));
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, pattern) {
            return Ok(format(naive.and_utc()));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(format(naive.and_utc()));
        }
    }
    Err(DeskError::Validation(format!("invalid date/time: {}", value)))
}

/// 新建患者表单
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientForm {
    pub identifier: String,
    pub title: String,
    pub given: String,
    pub family: String,
    pub gender: String,
    pub birth_date: String,
    pub phone: String,
    pub email: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub marital_status_code: String,
    pub marital_status_display: String,
    pub language_code: String,
    pub language_display: String,
    pub active: bool,
    pub photo: Option<PathBuf>,
}

impl PatientForm {
    pub fn validate(&self) -> Result<()> {
        if blank(&self.identifier) {
            return Err(DeskError::Validation("identifier is required".to_string()));
        }
        if blank(&self.given) && blank(&self.family) {
            return Err(DeskError::Validation("given or family name is required".to_string()));
        }
        if !blank(&self.gender) {
            self.gender.trim().parse::<Gender>()?;
        }
        if !blank(&self.birth_date) {
            validate_birth_date(self.birth_date.trim())?;
        }
        if !blank(&self.email) && !self.email.contains('@') {
            return Err(DeskError::Validation(format!("invalid email: {}", self.email)));
        }
        Ok(())
    }

    /// 生成请求体；联系方式固定为 [电话, 邮箱]
    pub fn into_patient(self, photo: Option<Attachment>) -> Result<Patient> {
        self.validate()?;

        let gender = non_blank(&self.gender)
            .map(|g| g.parse::<Gender>())
            .transpose()?;

        let address = builders::address(
            &self.street,
            &self.city,
            &self.state,
            &self.postal_code,
            &self.country,
        );

        let marital_status = non_blank(&self.marital_status_code)
            .map(|code| builders::marital_status(&code, self.marital_status_display.trim()));

        let communication = non_blank(&self.language_code)
            .map(|code| PatientCommunication {
                language: builders::language(&code, self.language_display.trim()),
            })
            .into_iter()
            .collect();

        Ok(Patient {
            identifier: vec![Identifier::new(self.identifier.trim())],
            active: Some(self.active),
            name: vec![HumanName {
                name_use: None,
                family: non_blank(&self.family),
                given: non_blank(&self.given).into_iter().collect(),
                prefix: non_blank(&self.title).into_iter().collect(),
            }],
            telecom: vec![
                builders::phone(self.phone.trim()),
                builders::email(self.email.trim()),
            ],
            gender,
            birth_date: non_blank(&self.birth_date),
            address: if address == Address::default() { Vec::new() } else { vec![address] },
            marital_status,
            communication,
            photo: photo.into_iter().collect(),
            ..Default::default()
        })
    }
}

/// 新建观察记录表单；每个选中的文件生成一条媒体记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationForm {
    /// 为空时自动生成
    pub identifier: String,
    pub status: String,
    pub category: String,
    pub loinc: String,
    /// 为空时取当前时间
    pub issued: String,
    pub body_site: String,
    pub performer: String,
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub unit: String,
    pub interpretation: String,
    pub note: String,
    pub media_type: String,
    pub media_status: String,
    pub files: Vec<PathBuf>,
}

impl Default for ObservationForm {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            status: "preliminary".to_string(),
            category: String::new(),
            loinc: String::new(),
            issued: String::new(),
            body_site: String::new(),
            performer: String::new(),
            low: None,
            high: None,
            unit: String::new(),
            interpretation: String::new(),
            note: String::new(),
            media_type: "image".to_string(),
            media_status: "completed".to_string(),
            files: Vec::new(),
        }
    }
}

impl ObservationForm {
    pub fn validate(&self) -> Result<()> {
        self.status.trim().parse::<ObservationStatus>()?;

        if !OBSERVATION_CATEGORIES.contains(&self.category.trim()) {
            return Err(DeskError::Validation(format!(
                "category must be one of {}, got: {}",
                OBSERVATION_CATEGORIES.join(", "),
                self.category
            )));
        }
        if blank(&self.loinc) {
            return Err(DeskError::Validation("LOINC code is required".to_string()));
        }
        if !blank(&self.issued) {
            normalize_timestamp(self.issued.trim())?;
        }
        if let (Some(low), Some(high)) = (self.low, self.high) {
            if low > high {
                return Err(DeskError::Validation(format!(
                    "reference range low ({}) is above high ({})",
                    low, high
                )));
            }
        }
        if (self.low.is_some() || self.high.is_some()) && blank(&self.unit) {
            return Err(DeskError::Validation("reference range needs a unit".to_string()));
        }
        if !self.files.is_empty() {
            self.media_type.trim().parse::<MediaType>()?;
            self.media_status.trim().parse::<MediaStatus>()?;
        }
        Ok(())
    }

    /// 生成观察记录及其媒体记录
    ///
    /// 媒体标识符在客户端生成，`derivedFrom` 在任何写请求完成之前同步构建。
    pub fn into_resources(
        self,
        patient_id: &str,
        attachments: Vec<Attachment>,
    ) -> Result<(Observation, Vec<Media>)> {
        self.validate()?;

        let identifier = Identifier::new(
            non_blank(&self.identifier).unwrap_or_else(generate_identifier),
        );
        let subject = builders::patient_reference(patient_id);
        let body_site = non_blank(&self.body_site).map(|site| builders::body_site(&site));
        let now = now_iso();
        let note: Vec<_> = non_blank(&self.note)
            .map(|text| builders::note(&text, &now))
            .into_iter()
            .collect();
        let issued = match non_blank(&self.issued) {
            Some(value) => normalize_timestamp(&value)?,
            None => now.clone(),
        };

        let mut media = Vec::with_capacity(attachments.len());
        let mut derived_from = Vec::with_capacity(attachments.len());
        if !attachments.is_empty() {
            let media_type: MediaType = self.media_type.trim().parse()?;
            let media_status: MediaStatus = self.media_status.trim().parse()?;

            for content in attachments {
                let media_identifier = Identifier::new(generate_identifier());
                derived_from.push(builders::identifier_reference(ResourceKind::Media, &media_identifier));
                media.push(Media {
                    identifier: vec![media_identifier],
                    part_of: vec![builders::identifier_reference(ResourceKind::Observation, &identifier)],
                    status: Some(media_status),
                    media_type: Some(builders::media_type(media_type)),
                    subject: Some(subject.clone()),
                    created_date_time: Some(now.clone()),
                    body_site: body_site.clone(),
                    content,
                    note: note.clone(),
                    ..Default::default()
                });
            }
        }

        let reference_range = if self.low.is_some() || self.high.is_some() {
            vec![builders::reference_range(self.low, self.high, self.unit.trim())]
        } else {
            Vec::new()
        };

        let observation = Observation {
            identifier: vec![identifier],
            status: Some(self.status.trim().parse()?),
            category: vec![builders::category(self.category.trim())],
            code: Some(builders::loinc(self.loinc.trim())),
            issued: Some(issued),
            body_site,
            interpretation: non_blank(&self.interpretation)
                .map(|text| builders::interpretation(&text))
                .into_iter()
                .collect(),
            reference_range,
            performer: non_blank(&self.performer)
                .map(|display| builders::performer(&display))
                .into_iter()
                .collect(),
            note,
            subject: Some(subject),
            derived_from,
            ..Default::default()
        };

        Ok((observation, media))
    }
}

/// 患者编辑表单；None表示保持原值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientEdit {
    pub given: Option<String>,
    pub family: Option<String>,
    pub birth_date: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub photo: Option<PathBuf>,
}

fn set_contact(telecom: &mut Vec<ContactPoint>, system: ContactPointSystem, value: &str) {
    match telecom.iter_mut().find(|c| c.system == Some(system)) {
        Some(contact) => contact.value = Some(value.to_string()),
        None => telecom.push(ContactPoint {
            system: Some(system),
            value: Some(value.to_string()),
        }),
    }
}

impl PatientEdit {
    pub fn validate(&self) -> Result<()> {
        if let Some(birth_date) = self.birth_date.as_deref().filter(|d| !blank(d)) {
            validate_birth_date(birth_date.trim())?;
        }
        if let Some(email) = self.email.as_deref().filter(|e| !blank(e)) {
            if !email.contains('@') {
                return Err(DeskError::Validation(format!("invalid email: {}", email)));
            }
        }
        Ok(())
    }

    /// 应用到已有患者；新照片沿用旧照片的附件ID
    pub fn apply_to(&self, patient: &mut Patient, photo: Option<Attachment>) -> Result<()> {
        self.validate()?;

        if self.given.is_some() || self.family.is_some() {
            if patient.name.is_empty() {
                patient.name.push(HumanName::default());
            }
            let name = &mut patient.name[0];
            if let Some(given) = &self.given {
                name.given = non_blank(given).into_iter().collect();
            }
            if let Some(family) = &self.family {
                name.family = non_blank(family);
            }
        }
        if let Some(birth_date) = &self.birth_date {
            patient.birth_date = non_blank(birth_date);
        }
        if let Some(phone) = &self.phone {
            set_contact(&mut patient.telecom, ContactPointSystem::Phone, phone.trim());
        }
        if let Some(email) = &self.email {
            set_contact(&mut patient.telecom, ContactPointSystem::Email, email.trim());
        }
        if let Some(mut photo) = photo {
            if let Some(previous_id) = patient.photo.first().and_then(|p| p.id.clone()) {
                photo.id = Some(previous_id);
            }
            patient.photo = vec![photo];
        }
        Ok(())
    }
}

/// 观察记录编辑表单；None表示保持原值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationEdit {
    pub identifier: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub effective_date_time: Option<String>,
}

impl ObservationEdit {
    pub fn validate(&self) -> Result<()> {
        if let Some(status) = &self.status {
            status.trim().parse::<ObservationStatus>()?;
        }
        if let Some(category) = &self.category {
            if !OBSERVATION_CATEGORIES.contains(&category.trim()) {
                return Err(DeskError::Validation(format!("unknown category: {}", category)));
            }
        }
        if let Some(value) = self.effective_date_time.as_deref().filter(|v| !blank(v)) {
            normalize_timestamp(value.trim())?;
        }
        Ok(())
    }

    pub fn apply_to(&self, observation: &mut Observation) -> Result<()> {
        self.validate()?;

        if let Some(identifier) = self.identifier.as_deref().and_then(non_blank) {
            match observation.identifier.first_mut() {
                Some(existing) => existing.value = Some(identifier),
                None => observation.identifier.push(Identifier::new(identifier)),
            }
        }
        if let Some(status) = &self.status {
            observation.status = Some(status.trim().parse()?);
        }
        if let Some(category) = &self.category {
            observation.category = vec![builders::category(category.trim())];
        }
        if let Some(value) = &self.effective_date_time {
            observation.effective_date_time = match non_blank(value) {
                Some(v) => Some(normalize_timestamp(&v)?),
                None => None,
            };
        }
        Ok(())
    }
}

/// 一次提交的结果
#[derive(Debug)]
pub struct SubmissionReport<T> {
    pub submission: Submission,
    /// 成功时为服务端返回的资源
    pub resource: Option<T>,
    /// 成功创建的媒体记录
    pub media: Vec<Media>,
    pub errors: Vec<String>,
}

impl<T> SubmissionReport<T> {
    fn new(submission: Submission) -> Self {
        Self {
            submission,
            resource: None,
            media: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn status(&self) -> SubmissionStatus {
        self.submission.status().unwrap_or(SubmissionStatus::Failure)
    }

    fn fail(mut self, message: String) -> Result<Self> {
        error!("Submission failed: {}", message);
        self.errors.push(message);
        self.submission.fire(SubmissionEvent::Failed)?;
        Ok(self)
    }
}

enum PhotoRead {
    Ready(Option<Attachment>),
    Failed(DeskError),
}

/// 读取可选的单个附件并推进状态机
async fn read_optional_photo(submission: &mut Submission, photo: Option<&PathBuf>) -> Result<PhotoRead> {
    let Some(path) = photo else {
        submission.fire(SubmissionEvent::Submit)?;
        return Ok(PhotoRead::Ready(None));
    };

    submission.fire(SubmissionEvent::AttachmentChosen)?;
    match read_attachment(path).await {
        Ok(attachment) => {
            submission.fire(SubmissionEvent::AttachmentRead)?;
            Ok(PhotoRead::Ready(Some(attachment)))
        }
        Err(e) => Ok(PhotoRead::Failed(e)),
    }
}

/// 提交新患者
///
/// 校验失败时不发出任何请求并直接返回错误；网络与状态错误体现在报告的Failure状态中。
pub async fn submit_patient(
    dispatcher: &MutationDispatcher,
    form: PatientForm,
) -> Result<SubmissionReport<Patient>> {
    form.validate()?;

    let mut report = SubmissionReport::new(Submission::new());
    let photo = match read_optional_photo(&mut report.submission, form.photo.as_ref()).await? {
        PhotoRead::Ready(photo) => photo,
        PhotoRead::Failed(e) => return report.fail(e.to_string()),
    };

    let patient = form.into_patient(photo)?;
    match dispatcher.create(&patient).await {
        Ok(created) => {
            info!("Created patient {}", created.display_name());
            report.resource = Some(created);
            report.submission.fire(SubmissionEvent::Succeeded)?;
            Ok(report)
        }
        Err(e) => report.fail(e.to_string()),
    }
}

enum WriteOutcome {
    Observation(Result<Observation>),
    Media(Result<Media>),
}

/// 提交新观察记录及其媒体
///
/// 所有附件先读取完毕；随后媒体写请求与观察记录写请求并发发出，
/// 任一写请求失败则整个提交为Failure。
pub async fn submit_observation(
    dispatcher: &MutationDispatcher,
    patient_id: &str,
    form: ObservationForm,
) -> Result<SubmissionReport<Observation>> {
    form.validate()?;

    let mut report = SubmissionReport::new(Submission::new());
    let mut attachments = Vec::with_capacity(form.files.len());

    if form.files.is_empty() {
        report.submission.fire(SubmissionEvent::Submit)?;
    } else {
        report.submission.fire(SubmissionEvent::AttachmentChosen)?;
        for path in &form.files {
            match read_attachment(path).await {
                Ok(attachment) => attachments.push(attachment),
                Err(e) => return report.fail(e.to_string()),
            }
        }
        report.submission.fire(SubmissionEvent::AttachmentRead)?;
    }

    let (observation, media) = form.into_resources(patient_id, attachments)?;

    let mut writes = JoinSet::new();
    for item in media {
        let dispatcher = dispatcher.clone();
        writes.spawn(async move { WriteOutcome::Media(dispatcher.create(&item).await) });
    }
    {
        let dispatcher = dispatcher.clone();
        writes.spawn(async move { WriteOutcome::Observation(dispatcher.create(&observation).await) });
    }

    while let Some(joined) = writes.join_next().await {
        match joined {
            Ok(WriteOutcome::Observation(Ok(created))) => report.resource = Some(created),
            Ok(WriteOutcome::Media(Ok(created))) => report.media.push(created),
            Ok(WriteOutcome::Observation(Err(e))) => {
                report.errors.push(format!("observation: {}", e));
            }
            Ok(WriteOutcome::Media(Err(e))) => {
                warn!("Media write failed: {}", e);
                report.errors.push(format!("media: {}", e));
            }
            Err(e) => report.errors.push(format!("write task aborted: {}", e)),
        }
    }

    if report.errors.is_empty() {
        info!(
            "Created observation with {} media for patient {}",
            report.media.len(),
            patient_id
        );
        report.submission.fire(SubmissionEvent::Succeeded)?;
        Ok(report)
    } else {
        let summary = format!("{} write(s) failed", report.errors.len());
        report.fail(summary)
    }
}

/// 保存患者编辑
pub async fn save_patient_edit(
    dispatcher: &MutationDispatcher,
    mut patient: Patient,
    edit: PatientEdit,
) -> Result<SubmissionReport<Patient>> {
    edit.validate()?;
    let id = patient
        .id
        .clone()
        .ok_or_else(|| DeskError::Validation("patient has no server id".to_string()))?;

    let mut report = SubmissionReport::new(Submission::new());
    let photo = match read_optional_photo(&mut report.submission, edit.photo.as_ref()).await? {
        PhotoRead::Ready(photo) => photo,
        PhotoRead::Failed(e) => return report.fail(e.to_string()),
    };

    edit.apply_to(&mut patient, photo)?;
    match dispatcher.update(&id, &patient).await {
        Ok(updated) => {
            report.resource = Some(updated);
            report.submission.fire(SubmissionEvent::Succeeded)?;
            Ok(report)
        }
        Err(e) => report.fail(e.to_string()),
    }
}

/// 保存观察记录编辑
pub async fn save_observation_edit(
    dispatcher: &MutationDispatcher,
    mut observation: Observation,
    edit: ObservationEdit,
) -> Result<SubmissionReport<Observation>> {
    let id = observation
        .id
        .clone()
        .ok_or_else(|| DeskError::Validation("observation has no server id".to_string()))?;
    edit.apply_to(&mut observation)?;

    let mut report = SubmissionReport::new(Submission::new());
    report.submission.fire(SubmissionEvent::Submit)?;
    match dispatcher.update(&id, &observation).await {
        Ok(updated) => {
            report.resource = Some(updated);
            report.submission.fire(SubmissionEvent::Succeeded)?;
            Ok(report)
        }
        Err(e) => report.fail(e.to_string()),
    }
}
