//! 通用工具函数

use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

use crate::models::{Patient, ReferenceRange};

/// 生成客户端侧的业务标识符
pub fn generate_identifier() -> String {
    Uuid::new_v4().to_string()
}

/// 当前时间的ISO-8601字符串
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 结果解释代码对应的显示文本，未知代码原样返回
pub fn interpretation_display(code: &str) -> &str {
    match code {
        "H" => "High",
        "L" => "Low",
        "N" => "Normal",
        "R" => "Resistant",
        "S" => "Susceptible",
        "U" => "Unable to Determine",
        other => other,
    }
}

/// 参考范围的展示文本
pub fn reference_range_display(ranges: &[ReferenceRange]) -> String {
    let Some(range) = ranges.first() else {
        return "-".to_string();
    };

    let (Some(low), Some(high)) = (&range.low, &range.high) else {
        return "-".to_string();
    };

    match (low.value, &low.unit, high.value, &high.unit) {
        (Some(low_value), Some(low_unit), Some(high_value), Some(high_unit)) => format!(
            "{} {} ({}) - {} {} ({})",
            low_value,
            low_unit,
            low.code.as_deref().unwrap_or(""),
            high_value,
            high_unit,
            high.code.as_deref().unwrap_or("")
        ),
        _ => "-".to_string(),
    }
}

/// 患者第一个地址的展示文本
pub fn patient_address(patient: &Patient) -> String {
    if let Some(address) = patient.address.first() {
        if let Some(text) = &address.text {
            return text.clone();
        }
        if let (false, Some(city), Some(state), Some(postal_code)) = (
            address.line.is_empty(),
            &address.city,
            &address.state,
            &address.postal_code,
        ) {
            return format!("{} {}, {} {}", address.line.join(", "), city, state, postal_code);
        }
    }
    "No address available".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders;
    use crate::models::Address;

    #[test]
    fn test_generate_identifier_is_unique() {
        let a = generate_identifier();
        let b = generate_identifier();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_interpretation_display() {
        assert_eq!(interpretation_display("H"), "High");
        assert_eq!(interpretation_display("U"), "Unable to Determine");
        assert_eq!(interpretation_display("X"), "X");
    }

    #[test]
    fn test_reference_range_display() {
        assert_eq!(reference_range_display(&[]), "-");

        let range = builders::reference_range(Some(1.0), Some(2.5), "mg");
        assert_eq!(reference_range_display(&[range]), "1 mg (mg) - 2.5 mg (mg)");

        let open = builders::reference_range(Some(1.0), None, "mg");
        assert_eq!(reference_range_display(&[open]), "-");
    }

    #[test]
    fn test_patient_address() {
        let mut patient = Patient::default();
        assert_eq!(patient_address(&patient), "No address available");

        patient.address = vec![builders::address("Goethestraße 3", "Munich", "Bavaria", "80331", "")];
        assert_eq!(patient_address(&patient), "Goethestraße 3 Munich, Bavaria 80331");

        patient.address = vec![Address {
            text: Some("Somewhere 1".to_string()),
            ..Default::default()
        }];
        assert_eq!(patient_address(&patient), "Somewhere 1");
    }
}
