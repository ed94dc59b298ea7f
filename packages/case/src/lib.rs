#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Missing-person case management.
//!
//! * [`risk`] derives category, risk level and search radius from case
//!   data. It is the only place those fields are computed.
//! * [`ledger::CaseLedger`] stores cases behind per-case locks and answers
//!   searches.
//! * [`engine::CaseEngine`] implements the caller-facing case lifecycle
//!   and publishes [`CaseEvent`]s.
//! * [`escalation`] is the periodic sweep: priority escalation, critical
//!   reminders, risk refresh and auto-archive.
//!
//! [`CaseEvent`]: safe_return_events::CaseEvent

pub mod engine;
pub mod escalation;
pub mod ledger;
pub mod risk;

use safe_return_case_models::CaseId;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use uuid::Uuid;

pub use engine::CaseEngine;
pub use escalation::{SweepFailure, SweepReport};
pub use ledger::CaseLedger;

/// Why a lifecycle transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum TransitionRejection {
    /// The case is already closed.
    AlreadyClosed,
    /// Only closed cases can be reopened.
    NotClosed,
}

/// Errors from case operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaseError {
    /// Malformed or missing input. Nothing was changed.
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// No case with this ID exists.
    #[error("Case {case_id} not found")]
    NotFound {
        /// The requested case ID.
        case_id: CaseId,
    },

    /// The case has no lead with this ID.
    #[error("Lead {lead_id} not found on case {case_id}")]
    LeadNotFound {
        /// The case that was searched.
        case_id: CaseId,
        /// The requested lead ID.
        lead_id: Uuid,
    },

    /// The actor is neither the reporter nor a watcher of the case.
    #[error("{actor} may not modify case {case_id}")]
    Unauthorized {
        /// The case ID.
        case_id: CaseId,
        /// Who attempted the operation.
        actor: String,
    },

    /// The reporter already has the maximum number of open cases.
    #[error("Reporter {reporter_id} already has the maximum of {limit} open cases")]
    QuotaExceeded {
        /// The reporter that hit the cap.
        reporter_id: String,
        /// The configured cap.
        limit: usize,
    },

    /// The requested lifecycle transition is not allowed from the current
    /// status.
    #[error("Invalid transition for case {case_id}: {rejection}")]
    InvalidTransition {
        /// The case ID.
        case_id: CaseId,
        /// Why it was refused.
        rejection: TransitionRejection,
    },

    /// A previous writer panicked while holding the case lock.
    #[error("Case {case_id} is unavailable: lock poisoned")]
    Poisoned {
        /// The case ID.
        case_id: CaseId,
    },
}

impl CaseError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_errors_name_the_rejection() {
        let err = CaseError::InvalidTransition {
            case_id: Uuid::nil(),
            rejection: TransitionRejection::AlreadyClosed,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for case 00000000-0000-0000-0000-000000000000: already_closed"
        );
    }
}
