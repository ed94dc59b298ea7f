#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Missing-person case types.
//!
//! Defines the [`Case`] record with its timeline, leads and watchers, the
//! classification enums used by risk assessment and escalation, the
//! request types used to create and modify cases, and the search query
//! shape accepted by the case ledger.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use safe_return_geometry::Coordinates;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Case identifier.
pub type CaseId = Uuid;

/// Identifier of a user account (reporter, watcher, volunteer).
pub type UserId = String;

/// Actor recorded on timeline entries written by the engine itself.
pub const SYSTEM_ACTOR: &str = "system";

/// Search priority of a case. Ordered from least to most urgent.
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
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// The next tier up, or `None` at [`Priority::Critical`].
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Low => Some(Self::Medium),
            Self::Medium => Some(Self::High),
            Self::High => Some(Self::Critical),
            Self::Critical => None,
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Low, Self::Medium, Self::High, Self::Critical]
    }
}

impl From<RiskLevel> for Priority {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low => Self::Low,
            RiskLevel::Medium => Self::Medium,
            RiskLevel::High => Self::High,
            RiskLevel::Critical => Self::Critical,
        }
    }
}

/// Lifecycle state of a case.
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
pub enum CaseStatus {
    /// Search in progress; subject to automatic escalation.
    Active,
    /// Being worked by investigators; not escalated automatically.
    Investigating,
    /// Subject found; waiting to be archived.
    Resolved,
    /// Archived. Terminal except for an explicit reopen.
    Closed,
}

/// Derived classification of the missing person.
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
pub enum CaseCategory {
    /// Under 18.
    Child,
    /// 65 or older, or living with a cognitive impairment.
    VulnerableAdult,
    Adult,
}

/// Derived risk bucket.
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
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// How the missing person is believed to be travelling.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransportationMethod {
    Walking,
    Bicycle,
    Vehicle,
    PublicTransit,
    #[default]
    Unknown,
}

/// Description of the missing person.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subject {
    /// Full name.
    pub name: String,
    /// Age in years, if known.
    pub age: Option<u32>,
    /// Free-text medical conditions (e.g. "dementia", "type 1 diabetes").
    pub medical_conditions: Vec<String>,
    /// Clothing last seen wearing.
    pub clothing: Option<String>,
    /// Scars, tattoos, mobility aids, etc.
    pub distinguishing_features: Vec<String>,
}

/// Circumstances of the disappearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Circumstances {
    /// When the person was last seen. Falls back to case creation time.
    pub time_of_disappearance: Option<DateTime<Utc>>,
    /// How the person is believed to be travelling.
    pub transportation_method: TransportationMethod,
    /// Free-text behavior notes from the reporter.
    pub behavior_notes: Option<String>,
    /// Places the person might head to.
    pub possible_destinations: Vec<String>,
    /// The reporter explicitly flagged the person as distressed.
    pub distress_reported: bool,
}

/// Output of risk assessment. Every field is derived; none is set by
/// callers directly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub category: CaseCategory,
    /// Raw accumulated points behind `risk_level`.
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub search_radius_meters: f64,
}

/// What a timeline entry records.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TimelineKind {
    Created,
    Updated,
    StatusChange,
    PriorityChange,
    Note,
    LeadAdded,
    LeadUpdated,
    Closed,
    Reopened,
    AutoEscalation,
    AutoArchive,
    GeofenceTransition,
}

/// One immutable entry in a case's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub id: Uuid,
    pub kind: TimelineKind,
    /// Who caused the entry; [`SYSTEM_ACTOR`] for automatic changes.
    pub actor: UserId,
    pub at: DateTime<Utc>,
    pub description: String,
    /// Value before the change, when the entry records a transition.
    pub previous: Option<serde_json::Value>,
    /// Value after the change, when the entry records a transition.
    pub new: Option<serde_json::Value>,
}

impl TimelineEntry {
    /// A plain entry without before/after values.
    #[must_use]
    pub fn new(
        kind: TimelineKind,
        actor: impl Into<UserId>,
        at: DateTime<Utc>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            actor: actor.into(),
            at,
            description: description.into(),
            previous: None,
            new: None,
        }
    }

    /// Attaches before/after values.
    #[must_use]
    pub fn with_change(mut self, previous: serde_json::Value, new: serde_json::Value) -> Self {
        self.previous = Some(previous);
        self.new = Some(new);
        self
    }
}

/// Review state of a lead.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Investigating,
    Verified,
    Dismissed,
}

/// A tip or sighting attached to a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Uuid,
    pub reported_by: UserId,
    pub description: String,
    pub location: Option<Coordinates>,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields for a new lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLead {
    pub description: String,
    #[serde(default)]
    pub location: Option<Coordinates>,
}

/// Partial update of a lead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeadPatch {
    pub description: Option<String>,
    pub location: Option<Coordinates>,
    pub status: Option<LeadStatus>,
}

/// A missing-person case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: CaseId,
    pub reporter_id: UserId,
    /// Location-tracker subject linked to this case, if the person carries
    /// a tracked device.
    pub monitored_subject_id: Option<String>,
    pub subject: Subject,
    pub last_known_location: Coordinates,
    pub circumstances: Circumstances,
    pub priority: Priority,
    pub status: CaseStatus,
    pub category: CaseCategory,
    pub risk_level: RiskLevel,
    pub risk_score: u32,
    pub search_radius_meters: f64,
    pub timeline: Vec<TimelineEntry>,
    pub leads: Vec<Lead>,
    pub watchers: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// When the case entered its current priority tier.
    pub priority_since: DateTime<Utc>,
    /// Last time a "still critical" reminder went out.
    pub last_reminded_at: Option<DateTime<Utc>>,
}

impl Case {
    /// Whether the case is archived.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status == CaseStatus::Closed
    }

    /// Copies derived fields from an assessment.
    pub fn apply_assessment(&mut self, assessment: &Assessment) {
        self.category = assessment.category;
        self.risk_level = assessment.risk_level;
        self.risk_score = assessment.risk_score;
        self.search_radius_meters = assessment.search_radius_meters;
    }

    /// The instant elapsed-time risk is measured from.
    #[must_use]
    pub fn disappeared_at(&self) -> DateTime<Utc> {
        self.circumstances
            .time_of_disappearance
            .unwrap_or(self.created_at)
    }

    /// Whether `user_id` may modify this case.
    #[must_use]
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.reporter_id == user_id || self.watchers.contains(user_id)
    }

    /// Finds a lead by ID.
    #[must_use]
    pub fn lead(&self, lead_id: Uuid) -> Option<&Lead> {
        self.leads.iter().find(|l| l.id == lead_id)
    }
}

/// Caller-supplied fields for a new case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewCase {
    pub reporter_id: UserId,
    pub monitored_subject_id: Option<String>,
    pub subject: Subject,
    pub last_known_location: Option<Coordinates>,
    pub circumstances: Circumstances,
    /// Explicit starting priority; derived from the risk level when absent.
    pub priority: Option<Priority>,
}

/// Partial update of a case. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CasePatch {
    pub subject: Option<Subject>,
    pub last_known_location: Option<Coordinates>,
    pub circumstances: Option<Circumstances>,
    /// Manual override; may lower priority.
    pub priority: Option<Priority>,
    /// Any status except `closed` (use close instead).
    pub status: Option<CaseStatus>,
    pub monitored_subject_id: Option<String>,
}

impl CasePatch {
    /// Whether the patch touches inputs of risk assessment.
    #[must_use]
    pub const fn touches_assessment(&self) -> bool {
        self.subject.is_some() || self.circumstances.is_some()
    }
}

/// A circle used to filter cases by last known location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingCircle {
    pub center: Coordinates,
    pub radius_meters: f64,
}

/// Inclusive creation-time window. Either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Whether `at` falls within the range.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at <= to)
    }
}

/// Conjunctive case filters. Absent fields match everything; unknown keys
/// in serialized form are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaseFilter {
    pub status: Option<CaseStatus>,
    pub priority: Option<Priority>,
    pub reporter_id: Option<UserId>,
    pub bounding_circle: Option<BoundingCircle>,
    pub date_range: Option<DateRange>,
    pub category: Option<CaseCategory>,
    pub risk_level: Option<RiskLevel>,
}

/// Field to sort search results by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Priority,
    RiskLevel,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Sort order. Defaults to newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaseSort {
    pub field: SortField,
    pub direction: SortDirection,
}

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A full search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaseQuery {
    #[serde(flatten)]
    pub filter: CaseFilter,
    pub sort: CaseSort,
    pub page: Page,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub cases: Vec<Case>,
    /// Total matches before pagination.
    pub total_count: usize,
    /// Whether more matches exist beyond this page.
    pub has_more: bool,
}

/// How long a case may sit in each priority tier before the sweep
/// promotes it. The `critical` entry is the reminder cadence for cases
/// that cannot climb any further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationThresholds {
    pub low: Duration,
    pub medium: Duration,
    pub high: Duration,
    pub critical: Duration,
}

impl EscalationThresholds {
    /// Threshold for a tier.
    #[must_use]
    pub const fn for_priority(&self, priority: Priority) -> Duration {
        match priority {
            Priority::Low => self.low,
            Priority::Medium => self.medium,
            Priority::High => self.high,
            Priority::Critical => self.critical,
        }
    }
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            low: Duration::hours(4),
            medium: Duration::hours(2),
            high: Duration::hours(1),
            critical: Duration::minutes(30),
        }
    }
}

/// Risk bucket boundaries and search-radius base.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskConfig {
    /// Minimum score for [`RiskLevel::Medium`].
    pub medium_at: u32,
    /// Minimum score for [`RiskLevel::High`].
    pub high_at: u32,
    /// Minimum score for [`RiskLevel::Critical`].
    pub critical_at: u32,
    /// Search radius before multipliers, in meters.
    pub base_search_radius_meters: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            medium_at: 2,
            high_at: 4,
            critical_at: 6,
            base_search_radius_meters: 2_000.0,
        }
    }
}

/// Engine-wide case policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaseConfig {
    pub escalation: EscalationThresholds,
    pub risk: RiskConfig,
    /// Resolved cases untouched for this long are closed by the sweep.
    pub auto_archive_after: Duration,
    /// Maximum non-closed cases per reporter.
    pub max_active_per_reporter: usize,
}

impl Default for CaseConfig {
    fn default() -> Self {
        Self {
            escalation: EscalationThresholds::default(),
            risk: RiskConfig::default(),
            auto_archive_after: Duration::days(30),
            max_active_per_reporter: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ladder_ends_at_critical() {
        let mut p = Priority::Low;
        let mut climbed = vec![p];
        while let Some(next) = p.next() {
            assert!(next > p);
            climbed.push(next);
            p = next;
        }
        assert_eq!(climbed, Priority::all());
    }

    #[test]
    fn enums_use_snake_case() {
        assert_eq!(CaseCategory::VulnerableAdult.to_string(), "vulnerable_adult");
        assert_eq!(
            serde_json::to_value(TimelineKind::AutoEscalation).unwrap(),
            "auto_escalation"
        );
        assert_eq!(
            "public_transit".parse::<TransportationMethod>().unwrap(),
            TransportationMethod::PublicTransit
        );
    }

    #[test]
    fn query_ignores_unknown_keys() {
        let query: CaseQuery = serde_json::from_str(
            r#"{"status":"active","favouriteColour":"green","page":{"limit":10}}"#,
        )
        .unwrap();
        assert_eq!(query.filter.status, Some(CaseStatus::Active));
        assert_eq!(query.page.limit, 10);
        assert_eq!(query.page.offset, 0);
        assert_eq!(query.sort, CaseSort::default());
    }

    #[test]
    fn date_range_is_inclusive() {
        let t = DateTime::<Utc>::UNIX_EPOCH;
        let range = DateRange {
            from: Some(t),
            to: Some(t + Duration::hours(1)),
        };
        assert!(range.contains(t));
        assert!(range.contains(t + Duration::hours(1)));
        assert!(!range.contains(t + Duration::hours(2)));
        assert!(DateRange::default().contains(t));
    }
}
