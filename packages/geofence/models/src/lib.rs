#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geofence and location-stream types.
//!
//! A [`Geofence`] is a circular zone owned by one monitored subject. The
//! location tracker compares consecutive [`LocationSample`]s against every
//! enabled zone of the subject and produces [`TransitionEvent`]s when the
//! containment state flips.

use chrono::{DateTime, Utc};
use safe_return_geometry::Coordinates;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Identifier of a monitored subject (a person carrying a tracked device).
pub type SubjectId = String;

/// Whether a zone is somewhere the subject should stay in or stay out of.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GeofenceKind {
    /// Leaving this zone is cause for concern (home, care facility).
    SafeZone,
    /// Entering this zone is cause for concern (river bank, highway).
    RestrictedArea,
}

/// A circular zone owned by one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    /// Unique zone ID.
    pub id: Uuid,
    /// The subject (or guardian account) that owns this zone.
    pub owner_id: SubjectId,
    /// Display name.
    pub name: String,
    /// Center of the circle.
    pub center: Coordinates,
    /// Radius in meters.
    pub radius_meters: f64,
    /// Safe zone or restricted area.
    pub kind: GeofenceKind,
    /// Emit an event when the subject enters the zone.
    pub alert_on_entry: bool,
    /// Emit an event when the subject leaves the zone.
    pub alert_on_exit: bool,
    /// Disabled zones are ignored by containment checks.
    pub enabled: bool,
    /// When the zone was created.
    pub created_at: DateTime<Utc>,
    /// When the zone was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields for creating a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceSpec {
    /// Display name.
    pub name: String,
    /// Center of the circle.
    pub center: Coordinates,
    /// Radius in meters. Falls back to the configured default.
    #[serde(default)]
    pub radius_meters: Option<f64>,
    /// Safe zone or restricted area.
    pub kind: GeofenceKind,
    #[serde(default = "default_true")]
    pub alert_on_entry: bool,
    #[serde(default = "default_true")]
    pub alert_on_exit: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl GeofenceSpec {
    /// A zone with alerts in both directions and the default radius.
    #[must_use]
    pub fn new(name: impl Into<String>, center: Coordinates, kind: GeofenceKind) -> Self {
        Self {
            name: name.into(),
            center,
            radius_meters: None,
            kind,
            alert_on_entry: true,
            alert_on_exit: true,
            enabled: true,
        }
    }

    /// Sets an explicit radius.
    #[must_use]
    pub const fn with_radius(mut self, radius_meters: f64) -> Self {
        self.radius_meters = Some(radius_meters);
        self
    }
}

/// Partial update of a zone. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeofencePatch {
    pub name: Option<String>,
    pub center: Option<Coordinates>,
    pub radius_meters: Option<f64>,
    pub kind: Option<GeofenceKind>,
    pub alert_on_entry: Option<bool>,
    pub alert_on_exit: Option<bool>,
    pub enabled: Option<bool>,
}

impl GeofencePatch {
    /// Whether applying this patch would change nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.center.is_none()
            && self.radius_meters.is_none()
            && self.kind.is_none()
            && self.alert_on_entry.is_none()
            && self.alert_on_exit.is_none()
            && self.enabled.is_none()
    }
}

/// Bounds and quotas enforced by the geofence registry and tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceLimits {
    /// Radius used when a spec omits one.
    pub default_radius: f64,
    /// Smallest allowed radius (inclusive).
    pub min_radius: f64,
    /// Largest allowed radius (inclusive).
    pub max_radius: f64,
    /// Maximum zones per owner.
    pub max_per_owner: usize,
    /// Largest plausible `accuracy_meters` on a location report.
    pub max_accuracy_meters: f64,
}

impl Default for GeofenceLimits {
    fn default() -> Self {
        Self {
            default_radius: 100.0,
            min_radius: 50.0,
            max_radius: 10_000.0,
            max_per_owner: 10,
            max_accuracy_meters: 10_000.0,
        }
    }
}

/// A raw location report as pushed by a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    /// Latitude (WGS84).
    pub lat: f64,
    /// Longitude (WGS84).
    pub lng: f64,
    /// Reported horizontal accuracy in meters.
    #[serde(default)]
    pub accuracy_meters: f64,
    /// When the device captured the fix.
    pub captured_at: DateTime<Utc>,
}

impl LocationReport {
    /// The report's position.
    #[must_use]
    pub const fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

/// A validated location report retained for a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    /// Subject the sample belongs to.
    pub subject_id: SubjectId,
    /// Position.
    pub location: Coordinates,
    /// Reported horizontal accuracy in meters.
    pub accuracy_meters: f64,
    /// When the device captured the fix.
    pub captured_at: DateTime<Utc>,
}

/// Direction of a boundary crossing.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransitionKind {
    /// The subject moved from outside to inside the zone.
    Entry,
    /// The subject moved from inside to outside the zone.
    Exit,
}

/// A detected boundary crossing. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    /// Entry or exit.
    #[serde(rename = "type")]
    pub kind: TransitionKind,
    /// Subject that crossed the boundary.
    pub subject_id: SubjectId,
    /// Zone that was crossed.
    pub geofence_id: Uuid,
    /// Kind of the crossed zone at detection time.
    pub geofence_kind: GeofenceKind,
    /// Name of the crossed zone at detection time.
    pub geofence_name: String,
    /// Position of the sample that completed the crossing.
    pub location: Coordinates,
    /// Capture time of the sample that completed the crossing.
    pub occurred_at: DateTime<Utc>,
    /// Distance from the zone center to `location`.
    pub distance_meters: f64,
}

impl TransitionEvent {
    /// Whether this crossing puts the subject somewhere unsafe: leaving a
    /// safe zone or entering a restricted area.
    #[must_use]
    pub const fn is_concerning(&self) -> bool {
        matches!(
            (self.kind, self.geofence_kind),
            (TransitionKind::Exit, GeofenceKind::SafeZone)
                | (TransitionKind::Entry, GeofenceKind::RestrictedArea)
        )
    }
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_alerts_on() {
        let spec: GeofenceSpec = serde_json::from_str(
            r#"{"name":"Home","center":{"lat":24.8,"lng":120.9},"kind":"safe_zone"}"#,
        )
        .unwrap();
        assert!(spec.alert_on_entry);
        assert!(spec.alert_on_exit);
        assert!(spec.enabled);
        assert_eq!(spec.radius_meters, None);
    }

    #[test]
    fn transition_serializes_type_field() {
        let event = TransitionEvent {
            kind: TransitionKind::Exit,
            subject_id: "subject-1".to_string(),
            geofence_id: Uuid::nil(),
            geofence_kind: GeofenceKind::SafeZone,
            geofence_name: "Home".to_string(),
            location: Coordinates { lat: 1.0, lng: 2.0 },
            occurred_at: DateTime::<Utc>::UNIX_EPOCH,
            distance_meters: 12.5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "exit");
        assert_eq!(json["geofenceKind"], "safe_zone");
        assert!(event.is_concerning());
    }

    #[test]
    fn concerning_crossings() {
        let mut event = TransitionEvent {
            kind: TransitionKind::Entry,
            subject_id: "s".to_string(),
            geofence_id: Uuid::nil(),
            geofence_kind: GeofenceKind::SafeZone,
            geofence_name: "Home".to_string(),
            location: Coordinates { lat: 0.0, lng: 0.0 },
            occurred_at: DateTime::<Utc>::UNIX_EPOCH,
            distance_meters: 0.0,
        };
        assert!(!event.is_concerning());
        event.geofence_kind = GeofenceKind::RestrictedArea;
        assert!(event.is_concerning());
        event.kind = TransitionKind::Exit;
        assert!(!event.is_concerning());
    }

    #[test]
    fn empty_patch() {
        assert!(GeofencePatch::default().is_empty());
        let patch = GeofencePatch {
            enabled: Some(false),
            ..GeofencePatch::default()
        };
        assert!(!patch.is_empty());
    }
}
