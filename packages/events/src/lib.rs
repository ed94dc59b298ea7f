#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Event topics and the outbound side channel.
//!
//! Two in-process topics carry domain events between components:
//!
//! * [`Topic::GeofenceEvents`] carries [`TransitionEvent`]s from the location
//!   tracker.
//! * [`Topic::CaseEvents`] carries [`CaseEvent`]s from the case engine
//!   (creation, escalation, closure, ...).
//!
//! Each topic is an [`EventBus`] with a bounded list of subscribers.
//! Side effects that leave the process (persistence, notifications,
//! audit) go through the [`Outbox`] instead, so a slow or failing
//! downstream never blocks or rolls back an in-memory state change.

pub mod bus;
pub mod outbound;

use safe_return_case_models::{CaseId, Priority, RiskLevel};
use safe_return_geofence_models::TransitionEvent;
use serde::Serialize;
use strum_macros::{AsRefStr, Display};

pub use bus::{BusError, EventBus};
pub use outbound::{AuditRecord, Notification, Outbound, Outbox};

/// Named event topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Topic {
    GeofenceEvents,
    CaseEvents,
}

/// Something that happened to a case.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CaseEvent {
    /// A case was opened.
    Created {
        case_id: CaseId,
        priority: Priority,
        risk_level: RiskLevel,
    },
    /// Case fields changed through a caller update.
    Updated { case_id: CaseId },
    /// Priority was raised, by the sweep or at creation for critical cases.
    Escalated {
        case_id: CaseId,
        from: Option<Priority>,
        to: Priority,
    },
    /// A critical case is still open.
    CriticalReminder { case_id: CaseId },
    /// A lead was added or changed.
    LeadChanged { case_id: CaseId, lead_id: uuid::Uuid },
    /// The case was closed, manually or by auto-archive.
    Closed { case_id: CaseId, automatic: bool },
    /// A closed case was reopened.
    Reopened { case_id: CaseId },
    /// The linked subject crossed a geofence boundary.
    GeofenceAlert {
        case_id: CaseId,
        transition: TransitionEvent,
    },
}

impl CaseEvent {
    /// The case this event concerns.
    #[must_use]
    pub const fn case_id(&self) -> CaseId {
        match self {
            Self::Created { case_id, .. }
            | Self::Updated { case_id }
            | Self::Escalated { case_id, .. }
            | Self::CriticalReminder { case_id }
            | Self::LeadChanged { case_id, .. }
            | Self::Closed { case_id, .. }
            | Self::Reopened { case_id }
            | Self::GeofenceAlert { case_id, .. } => *case_id,
        }
    }

    /// Short machine-readable name, used as the watcher notification type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "case_created",
            Self::Updated { .. } => "case_updated",
            Self::Escalated { .. } => "case_escalated",
            Self::CriticalReminder { .. } => "critical_reminder",
            Self::LeadChanged { .. } => "lead_changed",
            Self::Closed { .. } => "case_closed",
            Self::Reopened { .. } => "case_reopened",
            Self::GeofenceAlert { .. } => "geofence_alert",
        }
    }
}
