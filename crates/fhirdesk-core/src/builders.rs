//! 嵌套值对象构造函数
//!
//! 每种编码/引用只有一个入口，固定的代码系统集中在此处。

use crate::models::{
    Address, Annotation, CodeableConcept, Coding, ContactPoint, ContactPointSystem, Identifier,
    MediaType, Quantity, Reference, ReferenceRange, ResourceKind,
};

pub const OBSERVATION_CATEGORY_SYSTEM: &str = "http://hl7.org/fhir/ValueSet/observation-category";
pub const BODY_SITE_SYSTEM: &str = "http://hl7.org/fhir/ValueSet/body-site";
pub const LOINC_SYSTEM: &str = "http://loinc.org";
pub const INTERPRETATION_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/v3-ObservationInterpretation";
pub const MEDIA_TYPE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/media-type";
pub const MARITAL_STATUS_SYSTEM: &str = "http://hl7.org/fhir/ValueSet/marital-status";
pub const LANGUAGE_SYSTEM: &str = "urn:ietf:bcp:47";

fn coded(system: &str, code: &str, display: Option<&str>) -> CodeableConcept {
    CodeableConcept {
        coding: vec![Coding {
            system: Some(system.to_string()),
            code: Some(code.to_string()),
            display: display.map(str::to_string),
        }],
        text: None,
    }
}

/// 观察类别
pub fn category(code: &str) -> CodeableConcept {
    coded(OBSERVATION_CATEGORY_SYSTEM, code, None)
}

/// 身体部位，text与code相同
pub fn body_site(code: &str) -> CodeableConcept {
    CodeableConcept {
        text: Some(code.to_string()),
        ..coded(BODY_SITE_SYSTEM, code, None)
    }
}

/// LOINC检验/操作编码
pub fn loinc(code: &str) -> CodeableConcept {
    coded(LOINC_SYSTEM, code, None)
}

/// 结果解释：code取输入首字母大写，display保留原文
pub fn interpretation(text: &str) -> CodeableConcept {
    let code: String = text
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_default();
    coded(INTERPRETATION_SYSTEM, &code, Some(text))
}

pub fn media_type(kind: MediaType) -> CodeableConcept {
    coded(MEDIA_TYPE_SYSTEM, kind.as_str(), None)
}

pub fn marital_status(code: &str, display: &str) -> CodeableConcept {
    coded(MARITAL_STATUS_SYSTEM, code, Some(display))
}

pub fn language(code: &str, display: &str) -> CodeableConcept {
    coded(LANGUAGE_SYSTEM, code, Some(display))
}

fn quantity(value: f64, unit: &str) -> Quantity {
    Quantity {
        value: Some(value),
        unit: Some(unit.to_string()),
        system: None,
        code: Some(unit.to_string()),
    }
}

/// 参考范围，上下界共用同一单位
pub fn reference_range(low: Option<f64>, high: Option<f64>, unit: &str) -> ReferenceRange {
    ReferenceRange {
        low: low.map(|v| quantity(v, unit)),
        high: high.map(|v| quantity(v, unit)),
    }
}

/// 指向患者的字面引用
pub fn patient_reference(patient_id: &str) -> Reference {
    Reference {
        reference: Some(format!("{}/{}", ResourceKind::Patient, patient_id)),
        kind: Some(ResourceKind::Patient.to_string()),
        identifier: None,
        display: None,
    }
}

/// 仅携带标识符的逻辑引用（Observation <-> Media）
pub fn identifier_reference(kind: ResourceKind, identifier: &Identifier) -> Reference {
    Reference {
        reference: None,
        kind: Some(kind.to_string()),
        identifier: Some(identifier.clone()),
        display: None,
    }
}

pub fn performer(display: &str) -> Reference {
    Reference {
        reference: None,
        kind: Some("Practitioner".to_string()),
        identifier: None,
        display: Some(display.to_string()),
    }
}

pub fn note(text: &str, time: &str) -> Annotation {
    Annotation {
        text: Some(text.to_string()),
        time: Some(time.to_string()),
    }
}

pub fn phone(value: &str) -> ContactPoint {
    ContactPoint {
        system: Some(ContactPointSystem::Phone),
        value: Some(value.to_string()),
    }
}

pub fn email(value: &str) -> ContactPoint {
    ContactPoint {
        system: Some(ContactPointSystem::Email),
        value: Some(value.to_string()),
    }
}

/// 结构化地址，空字段省略
pub fn address(line: &str, city: &str, state: &str, postal_code: &str, country: &str) -> Address {
    let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());
    Address {
        text: None,
        line: non_empty(line).into_iter().collect(),
        city: non_empty(city),
        state: non_empty(state),
        postal_code: non_empty(postal_code),
        country: non_empty(country),
    }
}
