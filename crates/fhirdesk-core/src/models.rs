//! 核心数据模型定义
//!
//! 远程FHIR资源在客户端的投影，序列化形状与服务端JSON一致。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DeskError;

/// 资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Patient,
    Observation,
    Media,
}

impl ResourceKind {
    /// URL中的资源集合名
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceKind::Patient => "Patient",
            ResourceKind::Observation => "Observation",
            ResourceKind::Media => "Media",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// 所有可经由远程API读写的资源
pub trait FhirResource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: ResourceKind;

    /// 服务端分配的逻辑ID
    fn id(&self) -> Option<&str>;

    /// 第一个业务标识符的值
    fn identifier_value(&self) -> Option<&str>;
}

/// 业务标识符
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            system: None,
            value: Some(value.into()),
        }
    }
}

/// 编码
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// 可编码概念
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    /// 第一个编码的code
    pub fn first_code(&self) -> Option<&str> {
        self.coding.first().and_then(|c| c.code.as_deref())
    }

    /// 第一个编码的display
    pub fn first_display(&self) -> Option<&str> {
        self.coding.first().and_then(|c| c.display.as_deref())
    }
}

/// 资源引用
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Reference {
    /// 引用所携带的标识符值
    pub fn identifier_value(&self) -> Option<&str> {
        self.identifier.as_ref().and_then(|i| i.value.as_deref())
    }

    /// 字面引用 `Kind/id` 中的ID部分，仅当类型匹配时返回
    pub fn literal_id(&self, kind: ResourceKind) -> Option<&str> {
        let reference = self.reference.as_deref()?;
        let (prefix, id) = reference.split_once('/')?;
        (prefix == kind.collection() && !id.is_empty()).then_some(id)
    }
}

/// 附件（base64内嵌）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Attachment {
    /// 是否携带非空的数据
    pub fn has_data(&self) -> bool {
        self.data.as_deref().is_some_and(|d| !d.is_empty())
    }
}

/// 联系方式类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactPointSystem {
    Phone,
    Fax,
    Email,
    Pager,
    Url,
    Sms,
    Other,
}

/// 联系方式
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactPoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<ContactPointSystem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// 姓名
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanName {
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub name_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub given: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prefix: Vec<String>,
}

/// 地址（自由文本或结构化）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// 数量
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// 参考范围
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<Quantity>,
}

/// 备注
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

/// 患者沟通语言
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientCommunication {
    #[serde(default)]
    pub language: CodeableConcept,
}

/// 性别枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
    Unknown,
}

impl FromStr for Gender {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            "unknown" => Ok(Gender::Unknown),
            _ => Err(DeskError::Validation(format!("unknown gender: {}", s))),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
            Gender::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// 观察记录状态
///
/// 表单只允许录入 registered / preliminary / final，
/// 其余取值仅用于解码服务端已有的数据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObservationStatus {
    Registered,
    Preliminary,
    Final,
    Amended,
    Corrected,
    Cancelled,
    EnteredInError,
    Unknown,
}

impl ObservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationStatus::Registered => "registered",
            ObservationStatus::Preliminary => "preliminary",
            ObservationStatus::Final => "final",
            ObservationStatus::Amended => "amended",
            ObservationStatus::Corrected => "corrected",
            ObservationStatus::Cancelled => "cancelled",
            ObservationStatus::EnteredInError => "entered-in-error",
            ObservationStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for ObservationStatus {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(ObservationStatus::Registered),
            "preliminary" => Ok(ObservationStatus::Preliminary),
            "final" => Ok(ObservationStatus::Final),
            _ => Err(DeskError::Validation(format!(
                "observation status must be registered, preliminary or final, got: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for ObservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 媒体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaStatus {
    Preparation,
    InProgress,
    NotDone,
    OnHold,
    Stopped,
    Completed,
    EnteredInError,
    Unknown,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStatus::Preparation => "preparation",
            MediaStatus::InProgress => "in-progress",
            MediaStatus::NotDone => "not-done",
            MediaStatus::OnHold => "on-hold",
            MediaStatus::Stopped => "stopped",
            MediaStatus::Completed => "completed",
            MediaStatus::EnteredInError => "entered-in-error",
            MediaStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for MediaStatus {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preparation" => Ok(MediaStatus::Preparation),
            "in-progress" => Ok(MediaStatus::InProgress),
            "not-done" => Ok(MediaStatus::NotDone),
            "on-hold" => Ok(MediaStatus::OnHold),
            "stopped" => Ok(MediaStatus::Stopped),
            "completed" => Ok(MediaStatus::Completed),
            "entered-in-error" => Ok(MediaStatus::EnteredInError),
            "unknown" => Ok(MediaStatus::Unknown),
            _ => Err(DeskError::Validation(format!("unknown media status: {}", s))),
        }
    }
}

impl fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        }
    }
}

impl FromStr for MediaType {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaType::Image),
            "video" => Ok(MediaType::Video),
            "audio" => Ok(MediaType::Audio),
            _ => Err(DeskError::Validation(format!("unknown media type: {}", s))),
        }
    }
}

/// 患者信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Patient {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<HumanName>,
    /// 约定：下标0为电话，下标1为邮箱
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub telecom: Vec<ContactPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marital_status: Option<CodeableConcept>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub communication: Vec<PatientCommunication>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub photo: Vec<Attachment>,
}

impl Default for Patient {
    fn default() -> Self {
        Self {
            resource_type: ResourceKind::Patient.collection().to_string(),
            id: None,
            identifier: Vec::new(),
            active: None,
            name: Vec::new(),
            telecom: Vec::new(),
            gender: None,
            birth_date: None,
            address: Vec::new(),
            marital_status: None,
            communication: Vec::new(),
            photo: Vec::new(),
        }
    }
}

impl Patient {
    /// 第一个姓名的第一个名
    pub fn given_name(&self) -> Option<&str> {
        self.name.first().and_then(|n| n.given.first()).map(String::as_str)
    }

    /// 第一个姓名的姓
    pub fn family_name(&self) -> Option<&str> {
        self.name.first().and_then(|n| n.family.as_deref())
    }

    /// 用于列表展示的全名
    pub fn display_name(&self) -> String {
        let given = self.given_name().unwrap_or("");
        let family = self.family_name().unwrap_or("");
        let full = format!("{} {}", given, family).trim().to_string();
        if full.is_empty() {
            "Unknown Patient".to_string()
        } else {
            full
        }
    }

    pub fn phone(&self) -> Option<&str> {
        self.telecom.first().and_then(|c| c.value.as_deref())
    }

    pub fn email(&self) -> Option<&str> {
        self.telecom.get(1).and_then(|c| c.value.as_deref())
    }
}

impl FhirResource for Patient {
    const KIND: ResourceKind = ResourceKind::Patient;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn identifier_value(&self) -> Option<&str> {
        self.identifier.first().and_then(|i| i.value.as_deref())
    }
}

/// 观察记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Observation {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ObservationStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<CodeableConcept>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_site: Option<CodeableConcept>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interpretation: Vec<CodeableConcept>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reference_range: Vec<ReferenceRange>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub performer: Vec<Reference>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub note: Vec<Annotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,
    /// 指向关联媒体的反向引用
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub derived_from: Vec<Reference>,
}

impl Default for Observation {
    fn default() -> Self {
        Self {
            resource_type: ResourceKind::Observation.collection().to_string(),
            id: None,
            identifier: Vec::new(),
            status: None,
            category: Vec::new(),
            code: None,
            effective_date_time: None,
            issued: None,
            body_site: None,
            interpretation: Vec::new(),
            reference_range: Vec::new(),
            performer: Vec::new(),
            note: Vec::new(),
            subject: None,
            derived_from: Vec::new(),
        }
    }
}

impl Observation {
    /// 生效时间，缺失时退回到签发时间
    pub fn date_time(&self) -> Option<&str> {
        self.effective_date_time
            .as_deref()
            .or(self.issued.as_deref())
    }

    /// 所属患者的逻辑ID
    pub fn subject_id(&self) -> Option<&str> {
        self.subject
            .as_ref()
            .and_then(|s| s.literal_id(ResourceKind::Patient))
    }

    pub fn performer_display(&self) -> Option<&str> {
        self.performer.first().and_then(|p| p.display.as_deref())
    }
}

impl FhirResource for Observation {
    const KIND: ResourceKind = ResourceKind::Observation;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn identifier_value(&self) -> Option<&str> {
        self.identifier.first().and_then(|i| i.value.as_deref())
    }
}

/// 媒体记录（每条携带一个附件）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Media {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,
    /// 指向所属观察记录的反向引用
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub part_of: Vec<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MediaStatus>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<CodeableConcept>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_site: Option<CodeableConcept>,
    pub content: Attachment,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub note: Vec<Annotation>,
}

impl Default for Media {
    fn default() -> Self {
        Self {
            resource_type: ResourceKind::Media.collection().to_string(),
            id: None,
            identifier: Vec::new(),
            part_of: Vec::new(),
            status: None,
            media_type: None,
            subject: None,
            created_date_time: None,
            body_site: None,
            content: Attachment::default(),
            note: Vec::new(),
        }
    }
}

impl FhirResource for Media {
    const KIND: ResourceKind = ResourceKind::Media;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn identifier_value(&self) -> Option<&str> {
        self.identifier.first().and_then(|i| i.value.as_deref())
    }
}

/// 分页信封中的条目
#[derive(Debug, Clone, Deserialize)]
pub struct BundleEntry<T> {
    pub resource: T,
}

/// 分页信封，解包后即丢弃
#[derive(Debug, Clone, Deserialize)]
pub struct Bundle<T> {
    #[serde(default = "Vec::new")]
    pub entry: Vec<BundleEntry<T>>,
    #[serde(default)]
    pub total: Option<u64>,
}

impl<T> Bundle<T> {
    /// 解包为平铺的资源列表
    pub fn into_resources(self) -> Vec<T> {
        self.entry.into_iter().map(|e| e.resource).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patient_wire_shape() {
        let patient = Patient {
            identifier: vec![Identifier::new("p-1")],
            gender: Some(Gender::Female),
            birth_date: Some("1990-02-03".to_string()),
            ..Default::default()
        };

        let value = serde_json::to_value(&patient).unwrap();
        assert_eq!(value["resourceType"], "Patient");
        assert_eq!(value["identifier"][0]["value"], "p-1");
        assert_eq!(value["gender"], "female");
        assert_eq!(value["birthDate"], "1990-02-03");
        assert!(value.get("photo").is_none());
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_observation_decode_tolerates_unknown_fields() {
        let value = json!({
            "resourceType": "Observation",
            "id": "42",
            "meta": { "versionId": "1" },
            "status": "amended",
            "subject": { "reference": "Patient/7" },
            "derivedFrom": [{ "type": "Media", "identifier": { "value": "m-1" } }]
        });

        let observation: Observation = serde_json::from_value(value).unwrap();
        assert_eq!(observation.id(), Some("42"));
        assert_eq!(observation.status, Some(ObservationStatus::Amended));
        assert_eq!(observation.subject_id(), Some("7"));
        assert_eq!(observation.derived_from[0].identifier_value(), Some("m-1"));
    }

    #[test]
    fn test_bundle_without_entry_is_empty() {
        let bundle: Bundle<Patient> =
            serde_json::from_value(json!({ "resourceType": "Bundle", "total": 0 })).unwrap();
        assert!(bundle.into_resources().is_empty());
    }

    #[test]
    fn test_literal_reference_kind_must_match() {
        let reference = Reference {
            reference: Some("Media/9".to_string()),
            ..Default::default()
        };
        assert_eq!(reference.literal_id(ResourceKind::Media), Some("9"));
        assert_eq!(reference.literal_id(ResourceKind::Patient), None);
    }

    #[test]
    fn test_form_statuses_are_restricted() {
        assert!("final".parse::<ObservationStatus>().is_ok());
        assert!("amended".parse::<ObservationStatus>().is_err());
        assert_eq!("on-hold".parse::<MediaStatus>().unwrap(), MediaStatus::OnHold);
        assert!("loud".parse::<MediaType>().is_err());
    }

    #[test]
    fn test_patient_contact_convention() {
        let patient = Patient {
            telecom: vec![
                ContactPoint { system: Some(ContactPointSystem::Phone), value: Some("123".into()) },
                ContactPoint { system: Some(ContactPointSystem::Email), value: Some("a@b.c".into()) },
            ],
            ..Default::default()
        };
        assert_eq!(patient.phone(), Some("123"));
        assert_eq!(patient.email(), Some("a@b.c"));
        assert_eq!(patient.display_name(), "Unknown Patient");
    }
}
