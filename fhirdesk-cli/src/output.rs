//! 终端输出

use fhirdesk_client::ObservationDetails;
use fhirdesk_core::utils::{interpretation_display, patient_address, reference_range_display};
use fhirdesk_core::{FhirResource, Media, Observation, Patient};
use std::fmt::Write;

const EMPTY: &str = "-";

fn or_empty(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or(EMPTY)
}

fn field(out: &mut String, label: &str, value: &str) {
    let _ = writeln!(out, "{:<16}{}", format!("{}:", label), value);
}

pub fn patient_table(patients: &[Patient]) -> String {
    let mut out = format!(
        "{:<10} {:<38} {:<24} {:<8} {:<12} {}\n",
        "ID", "IDENTIFIER", "NAME", "GENDER", "BIRTH DATE", "PHONE"
    );
    for patient in patients {
        let gender = patient.gender.map(|g| g.to_string());
        let _ = writeln!(
            out,
            "{:<10} {:<38} {:<24} {:<8} {:<12} {}",
            or_empty(patient.id()),
            or_empty(patient.identifier_value()),
            patient.display_name(),
            or_empty(gender.as_deref()),
            or_empty(patient.birth_date.as_deref()),
            or_empty(patient.phone()),
        );
    }
    if patients.is_empty() {
        out.push_str("(no patients)\n");
    }
    out
}

pub fn patient_details(patient: &Patient) -> String {
    let mut out = String::new();
    let gender = patient.gender.map(|g| g.to_string());
    let language = patient
        .communication
        .first()
        .and_then(|c| c.language.first_display().or(c.language.first_code()));
    let marital_status = patient
        .marital_status
        .as_ref()
        .and_then(|m| m.first_display().or(m.first_code()));

    field(&mut out, "ID", or_empty(patient.id()));
    field(&mut out, "Identifier", or_empty(patient.identifier_value()));
    field(&mut out, "Name", &patient.display_name());
    field(&mut out, "Gender", or_empty(gender.as_deref()));
    field(&mut out, "Birth date", or_empty(patient.birth_date.as_deref()));
    field(&mut out, "Phone", or_empty(patient.phone()));
    field(&mut out, "Email", or_empty(patient.email()));
    field(&mut out, "Address", &patient_address(patient));
    field(&mut out, "Marital status", or_empty(marital_status));
    field(&mut out, "Language", or_empty(language));
    field(
        &mut out,
        "Active",
        match patient.active {
            Some(true) => "yes",
            Some(false) => "no",
            None => EMPTY,
        },
    );
    match patient.photo.first() {
        Some(photo) => field(
            &mut out,
            "Photo",
            &format!(
                "{} ({} base64 chars)",
                or_empty(photo.content_type.as_deref()),
                photo.data.as_deref().map(str::len).unwrap_or(0)
            ),
        ),
        None => field(&mut out, "Photo", EMPTY),
    }
    out
}

fn observation_code(observation: &Observation) -> Option<&str> {
    observation.code.as_ref().and_then(|c| c.first_code())
}

pub fn observation_table(observations: &[Observation]) -> String {
    let mut out = format!(
        "{:<10} {:<38} {:<12} {:<10} {:<26} {}\n",
        "ID", "IDENTIFIER", "STATUS", "CODE", "DATE", "BODY SITE"
    );
    for observation in observations {
        let _ = writeln!(
            out,
            "{:<10} {:<38} {:<12} {:<10} {:<26} {}",
            or_empty(observation.id()),
            or_empty(observation.identifier_value()),
            or_empty(observation.status.map(|s| s.as_str())),
            or_empty(observation_code(observation)),
            or_empty(observation.date_time()),
            or_empty(observation.body_site.as_ref().and_then(|b| b.first_code())),
        );
    }
    if observations.is_empty() {
        out.push_str("(no observations)\n");
    }
    out
}

fn media_line(media: &Media) -> String {
    format!(
        "{} [{}] {} {}",
        or_empty(media.identifier_value()),
        or_empty(media.status.map(|s| s.as_str())),
        or_empty(media.content.content_type.as_deref()),
        or_empty(media.created_date_time.as_deref()),
    )
}

pub fn observation_details(details: &ObservationDetails) -> String {
    let observation = &details.observation;
    let mut out = String::new();
    let category = observation.category.first().and_then(|c| c.first_code());
    let interpretation = observation
        .interpretation
        .first()
        .and_then(|i| i.first_code().or(i.text.as_deref()))
        .map(interpretation_display);
    let note = observation.note.first().and_then(|n| n.text.as_deref());

    field(&mut out, "ID", or_empty(observation.id()));
    field(&mut out, "Identifier", or_empty(observation.identifier_value()));
    field(&mut out, "Status", or_empty(observation.status.map(|s| s.as_str())));
    field(&mut out, "Category", or_empty(category));
    field(&mut out, "Code", or_empty(observation_code(observation)));
    field(&mut out, "Date", or_empty(observation.date_time()));
    field(&mut out, "Patient", or_empty(observation.subject_id()));
    field(
        &mut out,
        "Body site",
        or_empty(observation.body_site.as_ref().and_then(|b| b.first_code())),
    );
    field(&mut out, "Performer", or_empty(observation.performer_display()));
    field(&mut out, "Interpretation", or_empty(interpretation));
    field(&mut out, "Reference range", &reference_range_display(&observation.reference_range));
    field(&mut out, "Note", or_empty(note));

    let _ = writeln!(out, "Media ({}/{} resolved):", details.media.len(), observation.derived_from.len());
    for media in &details.media {
        let _ = writeln!(out, "  {}", media_line(media));
    }
    out
}
