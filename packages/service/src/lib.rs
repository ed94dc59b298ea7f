#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Service boundary for the geofence tracker and case engine.
//!
//! [`Service::start`] wires the components together from a
//! [`ServiceConfig`], loads persisted state, and spawns the background
//! tasks:
//!
//! * the outbox dispatcher, which forwards persistence, notification and
//!   audit messages to the [`Collaborators`];
//! * the transition listener, which feeds every detected transition into
//!   the case engine over its own unbounded channel, so a slow engine never
//!   loses a crossing the way a lagging `geofence_events` subscriber can;
//! * the periodic case sweep and the stale-location reaper.
//!
//! [`Service::shutdown`] stops the loops, waits for them, then drains the
//! outbox.

pub mod collaborators;
pub mod config;
mod dispatch;
mod tasks;

use std::sync::Arc;

use safe_return_case::{CaseEngine, CaseError, CaseLedger, SweepReport};
use safe_return_case_models::{
    Case, CaseId, CasePatch, CaseQuery, Lead, LeadPatch, NewCase, NewLead, SearchResult,
    TimelineEntry,
};
use safe_return_events::{AuditRecord, BusError, CaseEvent, EventBus, Outbound, Outbox, Topic};
use safe_return_geofence::{GeofenceError, GeofenceRegistry, LocationTracker, NearbyGeofence};
use safe_return_geofence_models::{
    Geofence, GeofencePatch, GeofenceSpec, LocationReport, TransitionEvent,
};
use safe_return_geometry::Coordinates;
use safe_return_time::Clock;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use collaborators::{
    AuditSink, CollaboratorError, Collaborators, DurableStore, MemoryAuditLog, MemoryNotifier,
    MemoryStore, Notifier,
};
pub use config::{ServiceConfig, ThresholdsMs};

/// Errors returned by the service facade.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Geofence(#[from] GeofenceError),

    #[error(transparent)]
    Case(#[from] CaseError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What [`Service::hydrate`] loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrateReport {
    pub geofences: usize,
    pub cases: usize,
    /// Stored geofences that no longer satisfy the configured bounds.
    pub rejected: usize,
}

/// The running engine.
pub struct Service {
    config: ServiceConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<GeofenceRegistry>,
    tracker: Arc<LocationTracker>,
    engine: Arc<CaseEngine>,
    geofence_events: Arc<EventBus<TransitionEvent>>,
    engine_transitions: mpsc::UnboundedSender<TransitionEvent>,
    case_events: Arc<EventBus<CaseEvent>>,
    outbox: Outbox,
    collaborators: Collaborators,
    stop_tasks: watch::Sender<bool>,
    stop_dispatch: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    dispatcher: JoinHandle<()>,
}

impl Service {
    /// Validates `config`, builds every component, loads persisted state
    /// from the store and spawns the background tasks.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// * [`ServiceError::Config`] if the configuration is invalid
    /// * [`ServiceError::Collaborator`] if persisted state cannot be read
    pub async fn start(
        config: ServiceConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let (outbox, outbound) = Outbox::channel();
        let registry = Arc::new(GeofenceRegistry::new(
            config.geofence_limits(),
            Arc::clone(&clock),
        ));
        let tracker = Arc::new(LocationTracker::new(Arc::clone(&registry)));
        let geofence_events = Arc::new(EventBus::new(
            Topic::GeofenceEvents,
            config.max_subscribers_per_topic,
            config.subscriber_buffer,
        ));
        let case_events = Arc::new(EventBus::new(
            Topic::CaseEvents,
            config.max_subscribers_per_topic,
            config.subscriber_buffer,
        ));
        let ledger = Arc::new(CaseLedger::new(outbox.clone()));
        let engine = Arc::new(CaseEngine::new(
            config.case_config(),
            Arc::clone(&clock),
            ledger,
            Arc::clone(&case_events),
            outbox.clone(),
        ));

        let (engine_transitions, transitions) = mpsc::unbounded_channel();
        let (stop_tasks, stop_tasks_rx) = watch::channel(false);
        let (stop_dispatch, stop_dispatch_rx) = watch::channel(false);
        let dispatcher = dispatch::spawn(outbound, collaborators.clone(), stop_dispatch_rx);

        let mut service = Self {
            config,
            clock,
            registry,
            tracker,
            engine,
            geofence_events,
            engine_transitions,
            case_events,
            outbox,
            collaborators,
            stop_tasks,
            stop_dispatch,
            tasks: Vec::new(),
            dispatcher,
        };

        let hydrated = match service.hydrate().await {
            Ok(hydrated) => hydrated,
            Err(e) => {
                service.shutdown().await;
                return Err(e);
            }
        };
        log::info!(
            "Hydrated {} geofence(s) and {} case(s) ({} rejected)",
            hydrated.geofences,
            hydrated.cases,
            hydrated.rejected
        );

        service.spawn_tasks(transitions, &stop_tasks_rx);

        log::info!(
            "Service started (sweep every {:?}, reaper every {:?})",
            service.config.check_interval(),
            service.config.stale_sweep_interval()
        );
        Ok(service)
    }

    fn spawn_tasks(
        &mut self,
        transitions: mpsc::UnboundedReceiver<TransitionEvent>,
        stop: &watch::Receiver<bool>,
    ) {
        self.tasks.push(tasks::spawn_transition_listener(
            Arc::clone(&self.engine),
            transitions,
            stop.clone(),
        ));
        self.tasks.push(tasks::spawn_sweeper(
            Arc::clone(&self.engine),
            self.config.check_interval(),
            stop.clone(),
        ));
        self.tasks.push(tasks::spawn_reaper(
            Arc::clone(&self.tracker),
            Arc::clone(&self.clock),
            self.config.stale_location_horizon(),
            self.config.stale_sweep_interval(),
            stop.clone(),
        ));
    }

    /// Loads every stored geofence and case into memory. Stored entries
    /// replace in-memory ones with the same ID.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Collaborator`] if the store cannot be read.
    pub async fn hydrate(&self) -> Result<HydrateReport, ServiceError> {
        let mut report = HydrateReport::default();

        for zone in self.collaborators.store.list_geofences().await? {
            let id = zone.id;
            match self.registry.restore(zone) {
                Ok(()) => report.geofences += 1,
                Err(e) => {
                    log::warn!("Skipping stored geofence {id}: {e}");
                    report.rejected += 1;
                }
            }
        }
        for case in self.collaborators.store.list_cases().await? {
            self.engine.ledger().upsert(case);
            report.cases += 1;
        }
        Ok(report)
    }

    /// Stops the background loops, waits for them to finish, then delivers
    /// everything already queued for the collaborators.
    pub async fn shutdown(self) {
        log::info!("Shutting down");
        self.stop_tasks.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("Background task ended abnormally: {e}");
            }
        }

        self.stop_dispatch.send_replace(true);
        if let Err(e) = self.dispatcher.await {
            log::error!("Dispatcher ended abnormally: {e}");
        }
        log::info!("Shutdown complete");
    }

    /// The effective configuration.
    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Accepts a location report, hands the resulting transitions to the
    /// case engine and publishes them on `geofence_events`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Geofence`] with
    /// [`GeofenceError::InvalidLocation`] for a malformed report.
    pub fn update_location(
        &self,
        subject_id: &str,
        report: LocationReport,
    ) -> Result<Vec<TransitionEvent>, ServiceError> {
        let events = self.tracker.update_location(subject_id, report)?;
        for event in &events {
            if self.engine_transitions.send(event.clone()).is_err() {
                log::warn!(
                    "Transition listener is gone; {} of geofence {} not recorded on cases",
                    event.kind,
                    event.geofence_id
                );
            }
            self.geofence_events.publish(event);
        }
        Ok(events)
    }

    /// Creates a geofence owned by `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Geofence`] for invalid input or an exhausted
    /// quota.
    pub fn create_geofence(
        &self,
        owner_id: &str,
        spec: GeofenceSpec,
    ) -> Result<Geofence, ServiceError> {
        let zone = self.registry.create(owner_id, spec)?;
        self.persist_geofence(&zone, owner_id, "geofence.create");
        Ok(zone)
    }

    /// Changes a geofence on behalf of its owner.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Geofence`] if the zone is missing, not
    /// owned by `actor`, or the patch is invalid.
    pub fn update_geofence(
        &self,
        id: Uuid,
        actor: &str,
        patch: GeofencePatch,
    ) -> Result<Geofence, ServiceError> {
        let zone = self.registry.update(id, actor, patch)?;
        self.persist_geofence(&zone, actor, "geofence.update");
        Ok(zone)
    }

    /// Deletes a geofence. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Geofence`] if `owner_id` does not own it.
    pub fn delete_geofence(&self, id: Uuid, owner_id: &str) -> Result<bool, ServiceError> {
        let deleted = self.registry.delete(id, owner_id)?;
        if deleted {
            self.outbox.send_all([
                Outbound::DeleteGeofence(id),
                Outbound::Audit(AuditRecord::for_geofence(
                    "geofence.delete",
                    owner_id,
                    id,
                    self.clock.now(),
                )),
            ]);
        }
        Ok(deleted)
    }

    /// Every geofence owned by `owner_id`, enabled or not.
    #[must_use]
    pub fn list_geofences(&self, owner_id: &str) -> Vec<Geofence> {
        self.registry.list(owner_id)
    }

    /// Enabled geofences near `location`, nearest first.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Geofence`] for an invalid location or
    /// radius.
    pub fn nearby_geofences(
        &self,
        location: Coordinates,
        search_radius: f64,
    ) -> Result<Vec<NearbyGeofence>, ServiceError> {
        Ok(self.registry.nearby(location, search_radius)?)
    }

    /// See [`CaseEngine::create_case`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Case`] on validation or quota failure.
    pub fn create_case(&self, data: NewCase) -> Result<Case, ServiceError> {
        Ok(self.engine.create_case(data)?)
    }

    /// See [`CaseEngine::update_case`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Case`] if the update is rejected.
    pub fn update_case(
        &self,
        case_id: CaseId,
        actor: &str,
        patch: CasePatch,
    ) -> Result<Case, ServiceError> {
        Ok(self.engine.update_case(case_id, actor, patch)?)
    }

    /// See [`CaseEngine::close_case`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Case`] if the close is rejected.
    pub fn close_case(
        &self,
        case_id: CaseId,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Case, ServiceError> {
        Ok(self.engine.close_case(case_id, actor, reason)?)
    }

    /// See [`CaseEngine::reopen_case`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Case`] if the reopen is rejected.
    pub fn reopen_case(
        &self,
        case_id: CaseId,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Case, ServiceError> {
        Ok(self.engine.reopen_case(case_id, actor, reason)?)
    }

    /// See [`CaseEngine::add_lead`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Case`] if the lead is rejected.
    pub fn add_lead(
        &self,
        case_id: CaseId,
        actor: &str,
        lead: NewLead,
    ) -> Result<Lead, ServiceError> {
        Ok(self.engine.add_lead(case_id, actor, lead)?)
    }

    /// See [`CaseEngine::update_lead`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Case`] if the update is rejected.
    pub fn update_lead(
        &self,
        case_id: CaseId,
        lead_id: Uuid,
        actor: &str,
        patch: LeadPatch,
    ) -> Result<Lead, ServiceError> {
        Ok(self.engine.update_lead(case_id, lead_id, actor, patch)?)
    }

    /// See [`CaseEngine::add_timeline_entry`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Case`] if the note is rejected.
    pub fn add_timeline_entry(
        &self,
        case_id: CaseId,
        actor: &str,
        description: &str,
    ) -> Result<TimelineEntry, ServiceError> {
        Ok(self.engine.add_timeline_entry(case_id, actor, description)?)
    }

    /// See [`CaseEngine::add_watcher`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Case`] if the case does not exist.
    pub fn add_watcher(&self, case_id: CaseId, user_id: &str) -> Result<bool, ServiceError> {
        Ok(self.engine.add_watcher(case_id, user_id)?)
    }

    /// See [`CaseEngine::remove_watcher`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Case`] if the case does not exist.
    pub fn remove_watcher(&self, case_id: CaseId, user_id: &str) -> Result<bool, ServiceError> {
        Ok(self.engine.remove_watcher(case_id, user_id)?)
    }

    /// A copy of one case.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Case`] if the case does not exist.
    pub fn get_case(&self, case_id: CaseId) -> Result<Case, ServiceError> {
        Ok(self.engine.get_case(case_id)?)
    }

    /// Filtered, sorted, paginated case search.
    #[must_use]
    pub fn search_cases(&self, query: &CaseQuery) -> SearchResult {
        self.engine.search_cases(query)
    }

    /// Subscribes to `case_events`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Bus`] if the topic is full.
    pub fn subscribe_case_events(&self) -> Result<mpsc::Receiver<CaseEvent>, ServiceError> {
        Ok(self.case_events.subscribe()?)
    }

    /// Subscribes to `geofence_events`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Bus`] if the topic is full.
    pub fn subscribe_geofence_events(
        &self,
    ) -> Result<mpsc::Receiver<TransitionEvent>, ServiceError> {
        Ok(self.geofence_events.subscribe()?)
    }

    /// Runs one case sweep now, outside the regular schedule.
    #[must_use]
    pub fn run_sweep(&self) -> SweepReport {
        self.engine.run_sweep()
    }

    /// Reaps stale location samples now. Returns how many were dropped.
    #[must_use]
    pub fn reap_stale_locations(&self) -> usize {
        self.tracker
            .sweep_stale(self.clock.now(), self.config.stale_location_horizon())
    }

    fn persist_geofence(&self, zone: &Geofence, actor: &str, action: &str) {
        self.outbox.send_all([
            Outbound::PersistGeofence(Box::new(zone.clone())),
            Outbound::Audit(AuditRecord::for_geofence(
                action,
                actor,
                zone.id,
                self.clock.now(),
            )),
        ]);
    }
}
