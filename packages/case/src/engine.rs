//! Caller-facing case lifecycle.
//!
//! Every successful mutation appends an immutable timeline entry, then
//! (after the case lock is released) queues a persist message and an
//! audit record on the outbox and publishes a [`CaseEvent`], which is also
//! fanned out to the case's watchers. Rejected operations change nothing
//! and emit nothing.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use safe_return_case_models::{
    Assessment, Case, CaseConfig, CaseId, CasePatch, CaseQuery, CaseStatus, Lead, LeadPatch,
    LeadStatus, NewCase, NewLead, Priority, RiskConfig, SYSTEM_ACTOR, SearchResult, TimelineEntry,
    TimelineKind,
};
use safe_return_events::{AuditRecord, CaseEvent, EventBus, Outbound, Outbox};
use safe_return_geofence_models::{TransitionEvent, TransitionKind};
use safe_return_geometry::Coordinates;
use safe_return_time::Clock;
use serde::Serialize;
use uuid::Uuid;

use crate::{CaseError, CaseLedger, TransitionRejection, risk};

const MAX_AGE: u32 = 150;

/// Orchestrates case creation, updates, leads and lifecycle transitions.
pub struct CaseEngine {
    pub(crate) config: CaseConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ledger: Arc<CaseLedger>,
    events: Arc<EventBus<CaseEvent>>,
    outbox: Outbox,
    /// Serializes the per-reporter quota check with the insert it guards.
    intake: Mutex<()>,
}

impl CaseEngine {
    #[must_use]
    pub fn new(
        config: CaseConfig,
        clock: Arc<dyn Clock>,
        ledger: Arc<CaseLedger>,
        events: Arc<EventBus<CaseEvent>>,
        outbox: Outbox,
    ) -> Self {
        Self {
            config,
            clock,
            ledger,
            events,
            outbox,
            intake: Mutex::new(()),
        }
    }

    /// The backing ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<CaseLedger> {
        &self.ledger
    }

    /// The active case policy.
    #[must_use]
    pub const fn config(&self) -> &CaseConfig {
        &self.config
    }

    /// Opens a new case.
    ///
    /// Derived fields come from [`risk::assess`]. The starting priority is
    /// the caller's, or the one matching the risk level. A case that starts
    /// at [`Priority::Critical`] is announced as escalated right away.
    ///
    /// # Errors
    ///
    /// * [`CaseError::Validation`] if the reporter, subject name or last
    ///   known location is missing or malformed
    /// * [`CaseError::QuotaExceeded`] if the reporter already has the
    ///   maximum number of open cases
    pub fn create_case(&self, data: NewCase) -> Result<Case, CaseError> {
        let reporter_id = data.reporter_id.trim().to_string();
        if reporter_id.is_empty() {
            return Err(CaseError::validation("reporterId is required"));
        }
        validate_subject_name(&data.subject.name)?;
        validate_age(data.subject.age)?;
        let location = data
            .last_known_location
            .ok_or_else(|| CaseError::validation("lastKnownLocation is required"))?;
        validate_location(location)?;

        let now = self.clock.now();
        validate_disappearance(data.circumstances.time_of_disappearance, now)?;

        let intake = self.intake.lock().unwrap_or_else(PoisonError::into_inner);
        self.check_quota(&reporter_id)?;

        let disappeared_at = data.circumstances.time_of_disappearance.unwrap_or(now);
        let assessment = risk::assess(
            &data.subject,
            &data.circumstances,
            disappeared_at,
            now,
            &self.config.risk,
        );
        let priority = data
            .priority
            .unwrap_or_else(|| assessment.risk_level.into());

        let created = TimelineEntry::new(
            TimelineKind::Created,
            reporter_id.clone(),
            now,
            format!(
                "Case opened for {} ({} risk, {} priority)",
                data.subject.name, assessment.risk_level, priority
            ),
        );

        let case = Case {
            id: Uuid::new_v4(),
            reporter_id: reporter_id.clone(),
            monitored_subject_id: data.monitored_subject_id,
            subject: data.subject,
            last_known_location: location,
            circumstances: data.circumstances,
            priority,
            status: CaseStatus::Active,
            category: assessment.category,
            risk_level: assessment.risk_level,
            risk_score: assessment.risk_score,
            search_radius_meters: assessment.search_radius_meters,
            timeline: vec![created],
            leads: Vec::new(),
            watchers: BTreeSet::from([reporter_id.clone()]),
            created_at: now,
            updated_at: now,
            closed_at: None,
            priority_since: now,
            last_reminded_at: None,
        };
        self.ledger.upsert(case.clone());
        drop(intake);

        log::info!(
            "Case {} created by {reporter_id}: {} risk (score {}), {} priority, {:.0} m search radius",
            case.id,
            case.risk_level,
            case.risk_score,
            case.priority,
            case.search_radius_meters
        );

        let mut events = vec![CaseEvent::Created {
            case_id: case.id,
            priority: case.priority,
            risk_level: case.risk_level,
        }];
        if case.priority == Priority::Critical {
            events.push(CaseEvent::Escalated {
                case_id: case.id,
                from: None,
                to: Priority::Critical,
            });
        }
        self.commit(&case, &reporter_id, "case.create", &events);
        Ok(case)
    }

    /// Applies a partial update.
    ///
    /// Each changed field is recorded with its previous and new value. A
    /// priority change restarts the escalation clock. Changes to the subject
    /// or circumstances re-run risk assessment.
    ///
    /// # Errors
    ///
    /// * [`CaseError::Validation`] for malformed input or an attempt to set
    ///   `closed` (use [`Self::close_case`])
    /// * [`CaseError::NotFound`] / [`CaseError::Unauthorized`]
    /// * [`CaseError::InvalidTransition`] if the case is closed
    pub fn update_case(
        &self,
        case_id: CaseId,
        actor: &str,
        patch: CasePatch,
    ) -> Result<Case, CaseError> {
        if patch.status == Some(CaseStatus::Closed) {
            return Err(CaseError::validation(
                "status cannot be set to closed; close the case instead",
            ));
        }
        if let Some(subject) = &patch.subject {
            validate_subject_name(&subject.name)?;
            validate_age(subject.age)?;
        }
        if let Some(location) = patch.last_known_location {
            validate_location(location)?;
        }
        let now = self.clock.now();
        if let Some(circumstances) = &patch.circumstances {
            validate_disappearance(circumstances.time_of_disappearance, now)?;
        }
        let risk = self.config.risk;

        let (changed, case) = self.ledger.update(case_id, |case| {
            authorize(case, actor)?;
            ensure_open(case)?;
            let before = case.timeline.len();

            if let Some(status) = patch.status.filter(|s| *s != case.status) {
                case.timeline.push(
                    TimelineEntry::new(
                        TimelineKind::StatusChange,
                        actor,
                        now,
                        format!("Status changed from {} to {status}", case.status),
                    )
                    .with_change(json(&case.status), json(&status)),
                );
                case.status = status;
            }

            if let Some(priority) = patch.priority.filter(|p| *p != case.priority) {
                case.timeline.push(
                    TimelineEntry::new(
                        TimelineKind::PriorityChange,
                        actor,
                        now,
                        format!("Priority changed from {} to {priority}", case.priority),
                    )
                    .with_change(json(&case.priority), json(&priority)),
                );
                case.priority = priority;
                case.priority_since = now;
                case.last_reminded_at = None;
            }

            let mut previous = serde_json::Map::new();
            let mut new = serde_json::Map::new();
            if let Some(subject) = patch.subject.filter(|s| *s != case.subject) {
                previous.insert("subject".to_string(), json(&case.subject));
                new.insert("subject".to_string(), json(&subject));
                case.subject = subject;
            }
            if let Some(location) = patch
                .last_known_location
                .filter(|l| *l != case.last_known_location)
            {
                previous.insert(
                    "lastKnownLocation".to_string(),
                    json(&case.last_known_location),
                );
                new.insert("lastKnownLocation".to_string(), json(&location));
                case.last_known_location = location;
            }
            if let Some(circumstances) = patch
                .circumstances
                .filter(|c| *c != case.circumstances)
            {
                previous.insert("circumstances".to_string(), json(&case.circumstances));
                new.insert("circumstances".to_string(), json(&circumstances));
                case.circumstances = circumstances;
            }
            if let Some(subject_id) = patch
                .monitored_subject_id
                .filter(|s| case.monitored_subject_id.as_ref() != Some(s))
            {
                previous.insert(
                    "monitoredSubjectId".to_string(),
                    json(&case.monitored_subject_id),
                );
                new.insert("monitoredSubjectId".to_string(), json(&subject_id));
                case.monitored_subject_id = Some(subject_id);
            }
            if !new.is_empty() {
                let fields: Vec<&str> = new.keys().map(String::as_str).collect();
                let description = format!("Updated {}", fields.join(", "));
                case.timeline.push(
                    TimelineEntry::new(TimelineKind::Updated, actor, now, description)
                        .with_change(previous.into(), new.into()),
                );
                reassess(case, actor, now, &risk);
            }

            let changed = case.timeline.len() > before;
            if changed {
                case.updated_at = now;
            }
            Ok(changed)
        })?;

        if changed {
            log::info!("Case {case_id} updated by {actor}");
            self.commit(
                &case,
                actor,
                "case.update",
                &[CaseEvent::Updated { case_id }],
            );
        } else {
            log::debug!("Update of case {case_id} by {actor} changed nothing");
        }
        Ok(case)
    }

    /// Appends a free-text note.
    ///
    /// # Errors
    ///
    /// * [`CaseError::Validation`] if the note is empty
    /// * [`CaseError::NotFound`] / [`CaseError::Unauthorized`]
    /// * [`CaseError::InvalidTransition`] if the case is closed
    pub fn add_timeline_entry(
        &self,
        case_id: CaseId,
        actor: &str,
        description: &str,
    ) -> Result<TimelineEntry, CaseError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(CaseError::validation("note must not be empty"));
        }
        let now = self.clock.now();

        let (entry, case) = self.ledger.update(case_id, |case| {
            authorize(case, actor)?;
            ensure_open(case)?;
            let entry = TimelineEntry::new(TimelineKind::Note, actor, now, description);
            case.timeline.push(entry.clone());
            case.updated_at = now;
            Ok(entry)
        })?;

        self.commit(&case, actor, "case.note", &[CaseEvent::Updated { case_id }]);
        Ok(entry)
    }

    /// Attaches a lead. Anyone may report a lead; the reporter of the lead
    /// may later update it.
    ///
    /// # Errors
    ///
    /// * [`CaseError::Validation`] for an empty description, missing actor
    ///   or bad location
    /// * [`CaseError::NotFound`]
    /// * [`CaseError::InvalidTransition`] if the case is closed
    pub fn add_lead(&self, case_id: CaseId, actor: &str, lead: NewLead) -> Result<Lead, CaseError> {
        if actor.trim().is_empty() {
            return Err(CaseError::validation("actor is required"));
        }
        if lead.description.trim().is_empty() {
            return Err(CaseError::validation("lead description must not be empty"));
        }
        if let Some(location) = lead.location {
            validate_location(location)?;
        }
        let now = self.clock.now();

        let (lead, case) = self.ledger.update(case_id, |case| {
            ensure_open(case)?;
            let lead = Lead {
                id: Uuid::new_v4(),
                reported_by: actor.to_string(),
                description: lead.description,
                location: lead.location,
                status: LeadStatus::New,
                created_at: now,
                updated_at: now,
            };
            case.timeline.push(
                TimelineEntry::new(
                    TimelineKind::LeadAdded,
                    actor,
                    now,
                    format!("Lead added: {}", lead.description),
                )
                .with_change(serde_json::Value::Null, json(&lead)),
            );
            case.leads.push(lead.clone());
            case.updated_at = now;
            Ok(lead)
        })?;

        log::info!("Lead {} added to case {case_id} by {actor}", lead.id);
        self.commit(
            &case,
            actor,
            "case.lead.add",
            &[CaseEvent::LeadChanged {
                case_id,
                lead_id: lead.id,
            }],
        );
        Ok(lead)
    }

    /// Updates a lead's description, location or review status.
    ///
    /// # Errors
    ///
    /// * [`CaseError::Validation`] for an empty description or bad location
    /// * [`CaseError::NotFound`] / [`CaseError::LeadNotFound`]
    /// * [`CaseError::Unauthorized`] unless the actor is a participant of
    ///   the case or reported the lead
    /// * [`CaseError::InvalidTransition`] if the case is closed
    pub fn update_lead(
        &self,
        case_id: CaseId,
        lead_id: Uuid,
        actor: &str,
        patch: LeadPatch,
    ) -> Result<Lead, CaseError> {
        if patch
            .description
            .as_deref()
            .is_some_and(|d| d.trim().is_empty())
        {
            return Err(CaseError::validation("lead description must not be empty"));
        }
        if let Some(location) = patch.location {
            validate_location(location)?;
        }
        let now = self.clock.now();

        let ((lead, changed), case) = self.ledger.update(case_id, |case| {
            let index = case
                .leads
                .iter()
                .position(|l| l.id == lead_id)
                .ok_or(CaseError::LeadNotFound { case_id, lead_id })?;
            if !case.is_participant(actor) && case.leads[index].reported_by != actor {
                return Err(CaseError::Unauthorized {
                    case_id,
                    actor: actor.to_string(),
                });
            }
            ensure_open(case)?;

            let previous = case.leads[index].clone();
            let lead = &mut case.leads[index];
            if let Some(description) = patch.description {
                lead.description = description;
            }
            if let Some(location) = patch.location {
                lead.location = Some(location);
            }
            if let Some(status) = patch.status {
                lead.status = status;
            }
            if *lead == previous {
                return Ok((previous, false));
            }
            lead.updated_at = now;
            let lead = lead.clone();

            let description = if lead.status == previous.status {
                "Lead updated".to_string()
            } else {
                format!("Lead marked {}", lead.status)
            };
            case.timeline.push(
                TimelineEntry::new(TimelineKind::LeadUpdated, actor, now, description)
                    .with_change(json(&previous), json(&lead)),
            );
            case.updated_at = now;
            Ok((lead, true))
        })?;

        if changed {
            self.commit(
                &case,
                actor,
                "case.lead.update",
                &[CaseEvent::LeadChanged { case_id, lead_id }],
            );
        }
        Ok(lead)
    }

    /// Closes (archives) a case.
    ///
    /// # Errors
    ///
    /// * [`CaseError::NotFound`] / [`CaseError::Unauthorized`]
    /// * [`CaseError::InvalidTransition`] with
    ///   [`TransitionRejection::AlreadyClosed`] if it is already closed
    pub fn close_case(
        &self,
        case_id: CaseId,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Case, CaseError> {
        let now = self.clock.now();
        let ((), case) = self.ledger.update(case_id, |case| {
            authorize(case, actor)?;
            ensure_open(case)?;
            let description = reason.map_or_else(
                || "Case closed".to_string(),
                |r| format!("Case closed: {r}"),
            );
            close(case, TimelineKind::Closed, actor, now, description);
            Ok(())
        })?;

        log::info!("Case {case_id} closed by {actor}");
        self.commit(
            &case,
            actor,
            "case.close",
            &[CaseEvent::Closed {
                case_id,
                automatic: false,
            }],
        );
        Ok(case)
    }

    /// Reopens a closed case as `active`. Derived fields are recomputed and
    /// the escalation clock restarts.
    ///
    /// # Errors
    ///
    /// * [`CaseError::NotFound`] / [`CaseError::Unauthorized`]
    /// * [`CaseError::InvalidTransition`] with
    ///   [`TransitionRejection::NotClosed`] unless the case is closed
    /// * [`CaseError::QuotaExceeded`] if the reporter already has the
    ///   maximum number of open cases
    pub fn reopen_case(
        &self,
        case_id: CaseId,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Case, CaseError> {
        let current = self.ledger.get(case_id)?;
        authorize(&current, actor)?;
        if !current.is_closed() {
            return Err(CaseError::InvalidTransition {
                case_id,
                rejection: TransitionRejection::NotClosed,
            });
        }

        let intake = self.intake.lock().unwrap_or_else(PoisonError::into_inner);
        self.check_quota(&current.reporter_id)?;

        let now = self.clock.now();
        let risk = self.config.risk;
        let ((), case) = self.ledger.update(case_id, |case| {
            authorize(case, actor)?;
            if !case.is_closed() {
                return Err(CaseError::InvalidTransition {
                    case_id,
                    rejection: TransitionRejection::NotClosed,
                });
            }
            let description = reason.map_or_else(
                || "Case reopened".to_string(),
                |r| format!("Case reopened: {r}"),
            );
            case.timeline.push(
                TimelineEntry::new(TimelineKind::Reopened, actor, now, description)
                    .with_change(json(&case.status), json(&CaseStatus::Active)),
            );
            case.status = CaseStatus::Active;
            case.closed_at = None;
            case.priority_since = now;
            case.last_reminded_at = None;
            case.updated_at = now;
            reassess(case, actor, now, &risk);
            Ok(())
        })?;
        drop(intake);

        log::info!("Case {case_id} reopened by {actor}");
        self.commit(
            &case,
            actor,
            "case.reopen",
            &[CaseEvent::Reopened { case_id }],
        );
        Ok(case)
    }

    /// A copy of one case.
    ///
    /// # Errors
    ///
    /// * [`CaseError::NotFound`] / [`CaseError::Poisoned`]
    pub fn get_case(&self, case_id: CaseId) -> Result<Case, CaseError> {
        self.ledger.get(case_id)
    }

    /// Runs a search against the ledger.
    #[must_use]
    pub fn search_cases(&self, query: &CaseQuery) -> SearchResult {
        self.ledger.search(query)
    }

    /// Subscribes `user_id` to a case's notifications. Returns `false` if
    /// they were already watching.
    ///
    /// # Errors
    ///
    /// * [`CaseError::Validation`] if `user_id` is empty
    /// * [`CaseError::NotFound`] / [`CaseError::Poisoned`]
    pub fn add_watcher(&self, case_id: CaseId, user_id: &str) -> Result<bool, CaseError> {
        if user_id.trim().is_empty() {
            return Err(CaseError::validation("userId is required"));
        }
        let added = self.ledger.add_watcher(case_id, user_id)?;
        if added {
            self.persist(case_id, user_id, "case.watch");
        }
        Ok(added)
    }

    /// Unsubscribes `user_id`. Returns `false` if they were not watching.
    ///
    /// # Errors
    ///
    /// * [`CaseError::NotFound`] / [`CaseError::Poisoned`]
    pub fn remove_watcher(&self, case_id: CaseId, user_id: &str) -> Result<bool, CaseError> {
        let removed = self.ledger.remove_watcher(case_id, user_id)?;
        if removed {
            self.persist(case_id, user_id, "case.unwatch");
        }
        Ok(removed)
    }

    /// Records a boundary crossing on every open case linked to the
    /// subject. Leaving a safe zone or entering a restricted area also moves
    /// the case's last known location. Returns how many cases were
    /// annotated.
    pub fn handle_transition(&self, transition: &TransitionEvent) -> usize {
        let now = self.clock.now();
        let mut annotated = 0;

        for case_id in self.ledger.open_cases_for_subject(&transition.subject_id) {
            let result = self.ledger.update(case_id, |case| {
                if case.is_closed() {
                    return Ok(false);
                }
                case.timeline.push(
                    TimelineEntry::new(
                        TimelineKind::GeofenceTransition,
                        SYSTEM_ACTOR,
                        transition.occurred_at,
                        format!(
                            "Subject {} {} '{}' ({:.0} m from center)",
                            verb(transition),
                            transition.geofence_kind,
                            transition.geofence_name,
                            transition.distance_meters
                        ),
                    )
                    .with_change(serde_json::Value::Null, json(transition)),
                );
                if transition.is_concerning() {
                    case.last_known_location = transition.location;
                }
                case.updated_at = now;
                Ok(true)
            });

            match result {
                Ok((true, case)) => {
                    annotated += 1;
                    self.commit(
                        &case,
                        SYSTEM_ACTOR,
                        "case.geofence_transition",
                        &[CaseEvent::GeofenceAlert {
                            case_id,
                            transition: transition.clone(),
                        }],
                    );
                }
                Ok((false, _)) => {}
                Err(e) => {
                    log::warn!("Failed to record geofence transition on case {case_id}: {e}");
                }
            }
        }

        if annotated > 0 {
            log::info!(
                "Recorded {} of geofence {} by {} on {annotated} case(s)",
                transition.kind,
                transition.geofence_id,
                transition.subject_id
            );
        }
        annotated
    }

    /// Queues persistence and audit for a committed case, then publishes
    /// and fans out its events.
    pub(crate) fn commit(&self, case: &Case, actor: &str, action: &str, events: &[CaseEvent]) {
        self.outbox.send_all([
            Outbound::PersistCase(Box::new(case.clone())),
            Outbound::Audit(AuditRecord::for_case(
                action,
                actor,
                case.id,
                self.clock.now(),
            )),
        ]);
        for event in events {
            self.announce(event);
        }
    }

    /// Like [`Self::commit`] without an audit record, for changes that are
    /// pure bookkeeping (derived-field refresh, reminder timestamps).
    pub(crate) fn commit_quiet(&self, case: &Case, events: &[CaseEvent]) {
        self.outbox
            .send(Outbound::PersistCase(Box::new(case.clone())));
        for event in events {
            self.announce(event);
        }
    }

    fn announce(&self, event: &CaseEvent) {
        let delivered = self.events.publish(event);
        log::debug!("Published {} to {delivered} subscriber(s)", event.name());

        let case_id = event.case_id();
        if let Err(e) =
            self.ledger
                .notify_watchers(case_id, event.name(), &describe(event), &json(event))
        {
            log::warn!("Could not notify watchers of case {case_id}: {e}");
        }
    }

    fn persist(&self, case_id: CaseId, actor: &str, action: &str) {
        match self.ledger.get(case_id) {
            Ok(case) => self.outbox.send_all([
                Outbound::PersistCase(Box::new(case)),
                Outbound::Audit(AuditRecord::for_case(
                    action,
                    actor,
                    case_id,
                    self.clock.now(),
                )),
            ]),
            Err(e) => log::warn!("Could not persist case {case_id}: {e}"),
        }
    }

    fn check_quota(&self, reporter_id: &str) -> Result<(), CaseError> {
        let limit = self.config.max_active_per_reporter;
        if self.ledger.open_count_for_reporter(reporter_id) >= limit {
            return Err(CaseError::QuotaExceeded {
                reporter_id: reporter_id.to_string(),
                limit,
            });
        }
        Ok(())
    }
}

/// Recomputes derived fields. A change of risk level is recorded on the
/// timeline. Returns whether any derived field changed.
pub(crate) fn reassess(
    case: &mut Case,
    actor: &str,
    now: DateTime<Utc>,
    config: &RiskConfig,
) -> bool {
    let assessment = risk::assess(
        &case.subject,
        &case.circumstances,
        case.disappeared_at(),
        now,
        config,
    );
    let current = Assessment {
        category: case.category,
        risk_score: case.risk_score,
        risk_level: case.risk_level,
        search_radius_meters: case.search_radius_meters,
    };
    if assessment == current {
        return false;
    }

    if assessment.risk_level != current.risk_level {
        case.timeline.push(
            TimelineEntry::new(
                TimelineKind::Updated,
                actor,
                now,
                format!(
                    "Risk level changed from {} to {}",
                    current.risk_level, assessment.risk_level
                ),
            )
            .with_change(json(&current.risk_level), json(&assessment.risk_level)),
        );
    }
    case.apply_assessment(&assessment);
    true
}

/// Moves a case to `closed` with a timeline entry of `kind`.
pub(crate) fn close(
    case: &mut Case,
    kind: TimelineKind,
    actor: &str,
    now: DateTime<Utc>,
    description: String,
) {
    case.timeline.push(
        TimelineEntry::new(kind, actor, now, description)
            .with_change(json(&case.status), json(&CaseStatus::Closed)),
    );
    case.status = CaseStatus::Closed;
    case.closed_at = Some(now);
    case.updated_at = now;
}

pub(crate) fn json<T: Serialize + ?Sized>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn authorize(case: &Case, actor: &str) -> Result<(), CaseError> {
    if case.is_participant(actor) {
        Ok(())
    } else {
        Err(CaseError::Unauthorized {
            case_id: case.id,
            actor: actor.to_string(),
        })
    }
}

fn ensure_open(case: &Case) -> Result<(), CaseError> {
    if matches!(case.status, CaseStatus::Closed) {
        return Err(CaseError::InvalidTransition {
            case_id: case.id,
            rejection: TransitionRejection::AlreadyClosed,
        });
    }
    Ok(())
}

fn validate_subject_name(name: &str) -> Result<(), CaseError> {
    if name.trim().is_empty() {
        return Err(CaseError::validation("subject.name is required"));
    }
    Ok(())
}

fn validate_age(age: Option<u32>) -> Result<(), CaseError> {
    match age {
        Some(age) if age > MAX_AGE => Err(CaseError::validation(format!(
            "subject.age {age} is out of range"
        ))),
        _ => Ok(()),
    }
}

fn validate_location(location: Coordinates) -> Result<(), CaseError> {
    location
        .validate()
        .map_err(|e| CaseError::validation(e.to_string()))
}

fn validate_disappearance(
    at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), CaseError> {
    match at {
        Some(at) if at > now => Err(CaseError::validation(
            "timeOfDisappearance is in the future",
        )),
        _ => Ok(()),
    }
}

const fn verb(transition: &TransitionEvent) -> &'static str {
    match transition.kind {
        TransitionKind::Entry => "entered",
        TransitionKind::Exit => "exited",
    }
}

fn describe(event: &CaseEvent) -> String {
    match event {
        CaseEvent::Created { priority, .. } => format!("New {priority} priority case opened"),
        CaseEvent::Updated { .. } => "Case updated".to_string(),
        CaseEvent::Escalated {
            from: Some(from),
            to,
            ..
        } => format!("Case escalated from {from} to {to} priority"),
        CaseEvent::Escalated { from: None, to, .. } => format!("Case opened at {to} priority"),
        CaseEvent::CriticalReminder { .. } => "Case is still open at critical priority".to_string(),
        CaseEvent::LeadChanged { .. } => "A lead was added or updated".to_string(),
        CaseEvent::Closed {
            automatic: true, ..
        } => "Case archived after inactivity".to_string(),
        CaseEvent::Closed { .. } => "Case closed".to_string(),
        CaseEvent::Reopened { .. } => "Case reopened".to_string(),
        CaseEvent::GeofenceAlert { transition, .. } => format!(
            "Subject {} {} '{}'",
            verb(transition),
            transition.geofence_kind,
            transition.geofence_name
        ),
    }
}
