#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geofence registry and location tracker.
//!
//! The [`registry::GeofenceRegistry`] owns every circular zone, keyed by
//! ID and indexed by owner. The [`tracker::LocationTracker`] keeps the
//! latest sample per subject and turns each new report into zero or more
//! entry/exit [`TransitionEvent`]s by comparing containment before and
//! after the report (edge-triggered, never level-triggered).
//!
//! [`TransitionEvent`]: safe_return_geofence_models::TransitionEvent

pub mod registry;
pub mod tracker;

use thiserror::Error;
use uuid::Uuid;

pub use registry::{GeofenceRegistry, NearbyGeofence};
pub use tracker::LocationTracker;

/// Errors from geofence and location operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeofenceError {
    /// Malformed or out-of-range zone definition.
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// Malformed or out-of-range location report.
    #[error("Invalid location: {message}")]
    InvalidLocation {
        /// What was wrong with the report.
        message: String,
    },

    /// No zone with this ID exists.
    #[error("Geofence {id} not found")]
    NotFound {
        /// The requested zone ID.
        id: Uuid,
    },

    /// The actor does not own the zone.
    #[error("{actor} is not the owner of geofence {id}")]
    Unauthorized {
        /// The zone ID.
        id: Uuid,
        /// Who attempted the operation.
        actor: String,
    },

    /// The owner already holds the maximum number of zones.
    #[error("Owner {owner_id} already has the maximum of {limit} geofences")]
    QuotaExceeded {
        /// The owner that hit the cap.
        owner_id: String,
        /// The configured cap.
        limit: usize,
    },
}
