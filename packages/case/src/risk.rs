//! Derived-field computation.
//!
//! [`assess`] is a pure function of the subject, the circumstances and the
//! elapsed time. Every code path that changes subject or circumstance data
//! (and the periodic sweep) calls it, so category, risk level and search
//! radius never drift from their inputs.

use chrono::{DateTime, Utc};
use safe_return_case_models::{
    Assessment, CaseCategory, Circumstances, RiskConfig, RiskLevel, Subject, TransportationMethod,
};

/// Condition substrings indicating cognitive impairment.
const COGNITIVE_MARKERS: &[&str] = &[
    "dementia",
    "alzheimer",
    "cognitive",
    "memory loss",
    "intellectual disability",
    "autism",
    "down syndrome",
];

/// Other condition substrings that raise risk when the person is missing.
const CRITICAL_CONDITIONS: &[&str] = &[
    "diabetes",
    "epilepsy",
    "seizure",
    "heart",
    "insulin",
    "suicidal",
    "depression",
    "schizophrenia",
    "bipolar",
];

/// Behavior-note substrings that count as reported distress.
const DISTRESS_KEYWORDS: &[&str] = &[
    "distress",
    "confused",
    "disoriented",
    "agitated",
    "suicidal",
    "panic",
    "crying",
];

const MAX_MEDICAL_POINTS: u32 = 3;
const MAX_CIRCUMSTANCE_POINTS: u32 = 2;
const MAX_TIME_MULTIPLIER: f64 = 3.0;

/// Computes every derived case field.
#[must_use]
pub fn assess(
    subject: &Subject,
    circumstances: &Circumstances,
    disappeared_at: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &RiskConfig,
) -> Assessment {
    let hours = elapsed_hours(disappeared_at, now);
    let risk_score = age_points(subject.age)
        + medical_points(&subject.medical_conditions)
        + circumstance_points(circumstances)
        + time_points(hours);

    Assessment {
        category: category(subject),
        risk_score,
        risk_level: level_for(risk_score, config),
        search_radius_meters: search_radius(subject.age, circumstances, hours, config),
    }
}

/// `child` under 18, `vulnerable_adult` at 65+ or with a cognitive marker,
/// otherwise `adult`.
#[must_use]
pub fn category(subject: &Subject) -> CaseCategory {
    match subject.age {
        Some(age) if age < 18 => CaseCategory::Child,
        Some(age) if age >= 65 => CaseCategory::VulnerableAdult,
        _ if subject
            .medical_conditions
            .iter()
            .any(|c| has_marker(c, COGNITIVE_MARKERS)) =>
        {
            CaseCategory::VulnerableAdult
        }
        _ => CaseCategory::Adult,
    }
}

/// Buckets a score.
#[must_use]
pub const fn level_for(score: u32, config: &RiskConfig) -> RiskLevel {
    if score >= config.critical_at {
        RiskLevel::Critical
    } else if score >= config.high_at {
        RiskLevel::High
    } else if score >= config.medium_at {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

const fn age_points(age: Option<u32>) -> u32 {
    match age {
        Some(a) if a < 5 => 3,
        Some(a) if a < 12 => 2,
        Some(a) if a < 18 => 1,
        Some(a) if a >= 80 => 3,
        Some(a) if a >= 65 => 2,
        _ => 0,
    }
}

fn medical_points(conditions: &[String]) -> u32 {
    let points: u32 = conditions
        .iter()
        .map(|c| {
            if has_marker(c, COGNITIVE_MARKERS) {
                2
            } else if has_marker(c, CRITICAL_CONDITIONS) {
                1
            } else {
                0
            }
        })
        .sum();
    points.min(MAX_MEDICAL_POINTS)
}

fn circumstance_points(circumstances: &Circumstances) -> u32 {
    let mut points = 0;
    if matches!(
        circumstances.transportation_method,
        TransportationMethod::Vehicle | TransportationMethod::PublicTransit
    ) {
        points += 1;
    }
    let distressed_notes = circumstances
        .behavior_notes
        .as_deref()
        .is_some_and(|notes| has_marker(notes, DISTRESS_KEYWORDS));
    if circumstances.distress_reported || distressed_notes {
        points += 1;
    }
    points.min(MAX_CIRCUMSTANCE_POINTS)
}

fn time_points(hours: f64) -> u32 {
    if hours > 24.0 {
        2
    } else if hours > 12.0 {
        1
    } else {
        0
    }
}

fn search_radius(
    age: Option<u32>,
    circumstances: &Circumstances,
    hours: f64,
    config: &RiskConfig,
) -> f64 {
    let age_multiplier = match age {
        Some(a) if a < 6 => 0.5,
        Some(a) if a < 13 => 0.75,
        Some(a) if a >= 80 => 0.6,
        Some(a) if a >= 65 => 0.8,
        _ => 1.0,
    };
    let transport_multiplier = match circumstances.transportation_method {
        TransportationMethod::Walking | TransportationMethod::Unknown => 1.0,
        TransportationMethod::Bicycle => 2.0,
        TransportationMethod::Vehicle | TransportationMethod::PublicTransit => 3.0,
    };
    let time_multiplier = (1.0 + hours / 12.0).min(MAX_TIME_MULTIPLIER);

    config.base_search_radius_meters * age_multiplier * transport_multiplier * time_multiplier
}

#[allow(clippy::cast_precision_loss)]
fn elapsed_hours(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - since).num_seconds().max(0) as f64 / 3600.0
}

fn has_marker(text: &str, markers: &[&str]) -> bool {
    let text = text.to_lowercase();
    markers.iter().any(|m| text.contains(m))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn now() -> DateTime<Utc> {
        "2025-03-01T12:00:00Z".parse().unwrap()
    }

    fn subject(age: Option<u32>, conditions: &[&str]) -> Subject {
        Subject {
            name: "Test Person".to_string(),
            age,
            medical_conditions: conditions.iter().map(ToString::to_string).collect(),
            ..Subject::default()
        }
    }

    fn on_foot() -> Circumstances {
        Circumstances {
            transportation_method: TransportationMethod::Walking,
            ..Circumstances::default()
        }
    }

    #[test]
    fn elderly_person_with_dementia_missing_a_day_is_critical() {
        let result = assess(
            &subject(Some(80), &["dementia"]),
            &on_foot(),
            now() - Duration::hours(25),
            now(),
            &RiskConfig::default(),
        );
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert_eq!(result.category, CaseCategory::VulnerableAdult);
        assert_eq!(result.risk_score, 7);
    }

    #[test]
    fn categories() {
        assert_eq!(category(&subject(Some(9), &[])), CaseCategory::Child);
        assert_eq!(category(&subject(Some(17), &[])), CaseCategory::Child);
        assert_eq!(category(&subject(Some(18), &[])), CaseCategory::Adult);
        assert_eq!(
            category(&subject(Some(65), &[])),
            CaseCategory::VulnerableAdult
        );
        assert_eq!(
            category(&subject(Some(40), &["Early-onset Alzheimer's"])),
            CaseCategory::VulnerableAdult
        );
        assert_eq!(category(&subject(None, &[])), CaseCategory::Adult);
    }

    #[test]
    fn risk_never_decreases_with_elapsed_time() {
        let subject = subject(Some(30), &["diabetes"]);
        let circumstances = Circumstances {
            transportation_method: TransportationMethod::Vehicle,
            ..Circumstances::default()
        };
        let config = RiskConfig::default();
        let mut previous = RiskLevel::Low;
        let mut previous_radius = 0.0;
        for hours in 0..72 {
            let result = assess(
                &subject,
                &circumstances,
                now() - Duration::hours(hours),
                now(),
                &config,
            );
            assert!(result.risk_level >= previous, "dropped at {hours}h");
            assert!(result.search_radius_meters >= previous_radius);
            previous = result.risk_level;
            previous_radius = result.search_radius_meters;
        }
        assert_eq!(previous, RiskLevel::High);
    }

    #[test]
    fn medical_and_circumstance_points_are_capped() {
        assert_eq!(
            medical_points(&[
                "dementia".to_string(),
                "autism".to_string(),
                "epilepsy".to_string(),
            ]),
            3
        );
        let circumstances = Circumstances {
            transportation_method: TransportationMethod::PublicTransit,
            behavior_notes: Some("Seemed confused and agitated".to_string()),
            distress_reported: true,
            ..Circumstances::default()
        };
        assert_eq!(circumstance_points(&circumstances), 2);
    }

    #[test]
    fn buckets_follow_config() {
        let config = RiskConfig::default();
        assert_eq!(level_for(0, &config), RiskLevel::Low);
        assert_eq!(level_for(1, &config), RiskLevel::Low);
        assert_eq!(level_for(2, &config), RiskLevel::Medium);
        assert_eq!(level_for(3, &config), RiskLevel::Medium);
        assert_eq!(level_for(4, &config), RiskLevel::High);
        assert_eq!(level_for(6, &config), RiskLevel::Critical);

        let strict = RiskConfig {
            critical_at: 10,
            ..config
        };
        assert_eq!(level_for(7, &strict), RiskLevel::High);
    }

    #[test]
    fn search_radius_scales_with_age_transport_and_time() {
        let config = RiskConfig::default();
        let walking = on_foot();
        let cycling = Circumstances {
            transportation_method: TransportationMethod::Bicycle,
            ..Circumstances::default()
        };

        let adult_now = search_radius(Some(30), &walking, 0.0, &config);
        assert!((adult_now - 2_000.0).abs() < 1e-9);

        let toddler = search_radius(Some(4), &walking, 0.0, &config);
        assert!((toddler - 1_000.0).abs() < 1e-9);

        let cyclist_12h = search_radius(Some(30), &cycling, 12.0, &config);
        assert!((cyclist_12h - 8_000.0).abs() < 1e-9);

        let capped = search_radius(Some(30), &walking, 240.0, &config);
        assert!((capped - 6_000.0).abs() < 1e-9);
    }

    #[test]
    fn future_disappearance_counts_as_no_elapsed_time() {
        let result = assess(
            &subject(Some(30), &[]),
            &on_foot(),
            now() + Duration::hours(3),
            now(),
            &RiskConfig::default(),
        );
        assert_eq!(result.risk_score, 0);
        assert!((result.search_radius_meters - 2_000.0).abs() < 1e-9);
    }
}
