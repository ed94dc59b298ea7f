//! Flat service configuration.
//!
//! Every key is optional and falls back to its default, so a config file
//! only needs the values it overrides. Keys are camelCase; unknown keys
//! are ignored.
//!
//! ```toml
//! minRadius = 75.0
//! checkIntervalMs = 30000
//!
//! [escalationThresholds]
//! medium = 5400000
//! ```

use std::path::Path;

use safe_return_case_models::{CaseConfig, EscalationThresholds, RiskConfig};
use safe_return_geofence_models::GeofenceLimits;
use serde::{Deserialize, Serialize};

use crate::ServiceError;

/// Upper bound for every millisecond interval and threshold.
const MAX_INTERVAL_MS: u64 = 365 * 24 * 3_600_000;

/// All tunables, as supplied at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Radius (m) for geofences created without one.
    #[serde(default = "default_radius")]
    pub default_radius: f64,
    /// Smallest allowed geofence radius (m).
    #[serde(default = "default_min_radius")]
    pub min_radius: f64,
    /// Largest allowed geofence radius (m).
    #[serde(default = "default_max_radius")]
    pub max_radius: f64,
    /// Escalation sweep interval.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_max_geofences_per_owner")]
    pub max_geofences_per_owner: usize,
    /// Time allowed in each priority tier, in milliseconds.
    #[serde(default)]
    pub escalation_thresholds: ThresholdsMs,
    /// Resolved cases untouched this long are archived.
    #[serde(default = "default_auto_archive_days")]
    pub auto_archive_days: u32,
    #[serde(default = "default_max_active_cases_per_reporter")]
    pub max_active_cases_per_reporter: usize,
    /// Retained location samples older than this are dropped.
    #[serde(default = "default_stale_location_horizon_ms")]
    pub stale_location_horizon_ms: u64,
    /// How often stale samples are reaped.
    #[serde(default = "default_stale_sweep_interval_ms")]
    pub stale_sweep_interval_ms: u64,
    /// Sanity ceiling on reported location accuracy (m).
    #[serde(default = "default_max_accuracy_meters")]
    pub max_accuracy_meters: f64,
    #[serde(default = "default_max_subscribers_per_topic")]
    pub max_subscribers_per_topic: usize,
    /// Per-subscriber event buffer.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default)]
    pub risk: RiskConfig,
}

/// Escalation thresholds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdsMs {
    #[serde(default = "default_low_ms")]
    pub low: u64,
    #[serde(default = "default_medium_ms")]
    pub medium: u64,
    #[serde(default = "default_high_ms")]
    pub high: u64,
    /// Reminder cadence for cases already at critical.
    #[serde(default = "default_critical_ms")]
    pub critical: u64,
}

const fn default_radius() -> f64 {
    100.0
}

const fn default_min_radius() -> f64 {
    50.0
}

const fn default_max_radius() -> f64 {
    10_000.0
}

const fn default_check_interval_ms() -> u64 {
    60_000
}

const fn default_max_geofences_per_owner() -> usize {
    10
}

const fn default_auto_archive_days() -> u32 {
    30
}

const fn default_max_active_cases_per_reporter() -> usize {
    5
}

const fn default_stale_location_horizon_ms() -> u64 {
    3_600_000
}

const fn default_stale_sweep_interval_ms() -> u64 {
    300_000
}

const fn default_max_accuracy_meters() -> f64 {
    10_000.0
}

const fn default_max_subscribers_per_topic() -> usize {
    16
}

const fn default_subscriber_buffer() -> usize {
    256
}

const fn default_low_ms() -> u64 {
    4 * 3_600_000
}

const fn default_medium_ms() -> u64 {
    2 * 3_600_000
}

const fn default_high_ms() -> u64 {
    3_600_000
}

const fn default_critical_ms() -> u64 {
    1_800_000
}

impl Default for ThresholdsMs {
    fn default() -> Self {
        Self {
            low: default_low_ms(),
            medium: default_medium_ms(),
            high: default_high_ms(),
            critical: default_critical_ms(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_radius: default_radius(),
            min_radius: default_min_radius(),
            max_radius: default_max_radius(),
            check_interval_ms: default_check_interval_ms(),
            max_geofences_per_owner: default_max_geofences_per_owner(),
            escalation_thresholds: ThresholdsMs::default(),
            auto_archive_days: default_auto_archive_days(),
            max_active_cases_per_reporter: default_max_active_cases_per_reporter(),
            stale_location_horizon_ms: default_stale_location_horizon_ms(),
            stale_sweep_interval_ms: default_stale_sweep_interval_ms(),
            max_accuracy_meters: default_max_accuracy_meters(),
            max_subscribers_per_topic: default_max_subscribers_per_topic(),
            subscriber_buffer: default_subscriber_buffer(),
            risk: RiskConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// * [`ServiceError::Toml`] if the document does not parse
    /// * [`ServiceError::Config`] if a value is out of range
    pub fn from_toml_str(input: &str) -> Result<Self, ServiceError> {
        let config: Self = toml::de::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// * [`ServiceError::Io`] if the file cannot be read
    /// * see [`Self::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let input = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&input)?;
        log::debug!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<(), ServiceError> {
        let radii = [self.default_radius, self.min_radius, self.max_radius];
        if radii.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(invalid("radii must be positive numbers"));
        }
        if self.min_radius > self.max_radius {
            return Err(invalid(format!(
                "minRadius {} exceeds maxRadius {}",
                self.min_radius, self.max_radius
            )));
        }
        if self.default_radius < self.min_radius || self.default_radius > self.max_radius {
            return Err(invalid(format!(
                "defaultRadius {} is outside [{}, {}]",
                self.default_radius, self.min_radius, self.max_radius
            )));
        }
        if !self.max_accuracy_meters.is_finite() || self.max_accuracy_meters <= 0.0 {
            return Err(invalid("maxAccuracyMeters must be a positive number"));
        }

        let intervals = [
            ("checkIntervalMs", self.check_interval_ms),
            ("staleLocationHorizonMs", self.stale_location_horizon_ms),
            ("staleSweepIntervalMs", self.stale_sweep_interval_ms),
            ("escalationThresholds.low", self.escalation_thresholds.low),
            (
                "escalationThresholds.medium",
                self.escalation_thresholds.medium,
            ),
            ("escalationThresholds.high", self.escalation_thresholds.high),
            (
                "escalationThresholds.critical",
                self.escalation_thresholds.critical,
            ),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, ms)| *ms == 0) {
            return Err(invalid(format!("{name} must be greater than zero")));
        }
        if let Some((name, ms)) = intervals.iter().find(|(_, ms)| *ms > MAX_INTERVAL_MS) {
            return Err(invalid(format!(
                "{name} {ms} exceeds the maximum of {MAX_INTERVAL_MS} ms (365 days)"
            )));
        }

        let caps = [
            ("maxGeofencesPerOwner", self.max_geofences_per_owner),
            (
                "maxActiveCasesPerReporter",
                self.max_active_cases_per_reporter,
            ),
            ("maxSubscribersPerTopic", self.max_subscribers_per_topic),
            ("subscriberBuffer", self.subscriber_buffer),
        ];
        if let Some((name, _)) = caps.iter().find(|(_, n)| *n == 0) {
            return Err(invalid(format!("{name} must be greater than zero")));
        }

        let risk = &self.risk;
        if !(risk.medium_at <= risk.high_at && risk.high_at <= risk.critical_at) {
            return Err(invalid(
                "risk thresholds must satisfy mediumAt <= highAt <= criticalAt",
            ));
        }
        if !risk.base_search_radius_meters.is_finite() || risk.base_search_radius_meters <= 0.0 {
            return Err(invalid("risk.baseSearchRadiusMeters must be positive"));
        }
        Ok(())
    }

    /// Geofence bounds for the registry and tracker.
    #[must_use]
    pub const fn geofence_limits(&self) -> GeofenceLimits {
        GeofenceLimits {
            default_radius: self.default_radius,
            min_radius: self.min_radius,
            max_radius: self.max_radius,
            max_per_owner: self.max_geofences_per_owner,
            max_accuracy_meters: self.max_accuracy_meters,
        }
    }

    /// Case policy for the engine.
    #[must_use]
    pub fn case_config(&self) -> CaseConfig {
        let t = &self.escalation_thresholds;
        CaseConfig {
            escalation: EscalationThresholds {
                low: millis(t.low),
                medium: millis(t.medium),
                high: millis(t.high),
                critical: millis(t.critical),
            },
            risk: self.risk,
            auto_archive_after: chrono::Duration::days(i64::from(self.auto_archive_days)),
            max_active_per_reporter: self.max_active_cases_per_reporter,
        }
    }

    /// Escalation sweep period.
    #[must_use]
    pub const fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.check_interval_ms)
    }

    /// Stale-sample reaper period.
    #[must_use]
    pub const fn stale_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stale_sweep_interval_ms)
    }

    /// Age after which a retained sample is reaped.
    #[must_use]
    pub fn stale_location_horizon(&self) -> chrono::Duration {
        millis(self.stale_location_horizon_ms)
    }
}

fn millis(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

fn invalid(message: impl Into<String>) -> ServiceError {
    ServiceError::Config {
        message: message.into(),
    }
}
