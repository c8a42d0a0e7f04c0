//! 随机演示患者

use fhirdesk_client::{FhirDesk, PatientForm, SubmissionStatus};
use fhirdesk_core::utils::generate_identifier;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

const FIRST_NAMES: [&str; 6] = ["Alice", "Bob", "Charlie", "David", "Eve", "Frank"];
const LAST_NAMES: [&str; 5] = ["Smith", "Johnson", "Brown", "Davis", "Miller"];
const STREET_NAMES: [&str; 5] = [
    "Hauptstraße",
    "Bahnhofstraße",
    "Berliner Straße",
    "Goethestraße",
    "Mozartstraße",
];
const STREET_TYPES: [&str; 5] = ["Straße", "Allee", "Weg", "Platz", "Gasse"];
const CITIES: [&str; 5] = ["Berlin", "Munich", "Hamburg", "Frankfurt", "Cologne"];
const GENDERS: [&str; 4] = ["male", "female", "other", "unknown"];
const COUNTRY: &str = "Germany";

fn pick<'a, R: Rng>(rng: &mut R, values: &[&'a str]) -> &'a str {
    values.choose(rng).copied().unwrap_or_default()
}

/// `ddd-ddd-dddd` 格式的电话号码
pub fn random_phone<R: Rng>(rng: &mut R) -> String {
    format!(
        "{:03}-{:03}-{:04}",
        rng.gen_range(100..1000),
        rng.gen_range(100..1000),
        rng.gen_range(1000..10000)
    )
}

pub fn random_patient<R: Rng>(rng: &mut R) -> PatientForm {
    let given = pick(rng, &FIRST_NAMES);
    let family = pick(rng, &LAST_NAMES);

    PatientForm {
        identifier: generate_identifier(),
        given: given.to_string(),
        family: family.to_string(),
        gender: pick(rng, &GENDERS).to_string(),
        birth_date: format!(
            "{:04}-{:02}-{:02}",
            rng.gen_range(1940..2020),
            rng.gen_range(1..=12),
            rng.gen_range(1..=28)
        ),
        phone: random_phone(rng),
        email: format!("{}.{}@example.org", given.to_lowercase(), family.to_lowercase()),
        street: format!(
            "{} {} {}",
            pick(rng, &STREET_NAMES),
            rng.gen_range(1..=100),
            pick(rng, &STREET_TYPES)
        ),
        city: pick(rng, &CITIES).to_string(),
        postal_code: format!("{:05}", rng.gen_range(0..100000)),
        country: COUNTRY.to_string(),
        active: true,
        ..PatientForm::default()
    }
}

/// 逐个提交随机患者，返回成功条数
pub async fn seed_patients(desk: &FhirDesk, count: usize) -> anyhow::Result<usize> {
    let mut created = 0;
    for n in 0..count {
        let form = random_patient(&mut rand::thread_rng());
        let name = format!("{} {}", form.given, form.family);
        let report = desk.create_patient(form).await?;

        match report.status() {
            SubmissionStatus::Success => {
                created += 1;
                info!("Seeded patient {}/{}: {}", n + 1, count, name);
            }
            SubmissionStatus::Failure => {
                warn!("Failed to seed patient {}: {}", name, report.errors.join("; "));
            }
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_phone_format() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let phone = random_phone(&mut rng);
            let parts: Vec<_> = phone.split('-').map(str::len).collect();
            assert_eq!(parts, vec![3, 3, 4]);
        }
    }

    #[test]
    fn test_random_patient_is_valid() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let form = random_patient(&mut rng);
            form.validate().unwrap();
            assert!(FIRST_NAMES.contains(&form.given.as_str()));
            assert_eq!(form.country, "Germany");
            assert_eq!(form.postal_code.len(), 5);
        }
    }
}
