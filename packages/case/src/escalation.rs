//! Periodic case sweep.
//!
//! One pass visits every case through a snapshot of handles, locking each
//! case only while it is examined:
//!
//! * `active` cases get their derived fields refreshed, then climb one
//!   priority tier if they have been open longer than the threshold of
//!   their current tier. A case climbs at most one tier per sweep. Cases
//!   already at `critical` cannot climb; their watchers are reminded every
//!   `critical` threshold after reaching it instead.
//! * `resolved` cases untouched for longer than the archive window are
//!   closed with an `auto_archive` entry.
//! * `investigating` and `closed` cases are left alone.
//!
//! A failure (or panic) while examining one case is recorded in the
//! [`SweepReport`] and the sweep moves on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use safe_return_case_models::{
    Case, CaseId, CaseStatus, Priority, SYSTEM_ACTOR, TimelineEntry, TimelineKind,
};
use safe_return_events::CaseEvent;
use serde::Serialize;

use crate::engine::{close, json, reassess};
use crate::ledger::update_locked;
use crate::{CaseEngine, CaseError};

/// A case the sweep could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepFailure {
    pub case_id: CaseId,
    pub reason: String,
}

/// Counters from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Active and resolved cases looked at.
    pub examined: usize,
    /// Cases moved up one priority tier.
    pub escalated: usize,
    /// Critical cases whose watchers were reminded.
    pub reminded: usize,
    /// Resolved cases closed for inactivity.
    pub archived: usize,
    /// Cases whose derived fields changed with elapsed time.
    pub refreshed: usize,
    pub failures: Vec<SweepFailure>,
}

#[derive(Debug, Default)]
struct Outcome {
    escalated: Option<(Priority, Priority)>,
    reminded: bool,
    archived: bool,
    refreshed: bool,
}

impl Outcome {
    const fn changed(&self) -> bool {
        self.escalated.is_some() || self.reminded || self.archived || self.refreshed
    }
}

impl CaseEngine {
    /// Runs one sweep at the clock's current time.
    pub fn run_sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for (case_id, handle) in self.ledger.handles() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.sweep_case(case_id, &handle, now)
            }));

            let (outcome, case) = match result {
                Ok(Ok(Some(swept))) => swept,
                Ok(Ok(None)) => continue,
                Ok(Err(e)) => {
                    log::error!("Sweep skipped case {case_id}: {e}");
                    report.failures.push(SweepFailure {
                        case_id,
                        reason: e.to_string(),
                    });
                    continue;
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    log::error!("Sweep panicked on case {case_id}: {reason}");
                    report.failures.push(SweepFailure { case_id, reason });
                    continue;
                }
            };

            report.examined += 1;
            if outcome.refreshed {
                report.refreshed += 1;
            }
            if outcome.reminded {
                report.reminded += 1;
            }
            if outcome.archived {
                report.archived += 1;
            }
            if outcome.escalated.is_some() {
                report.escalated += 1;
            }
            self.publish_outcome(&case, &outcome);
        }

        if report.escalated + report.reminded + report.archived > 0 || !report.failures.is_empty()
        {
            log::info!(
                "Sweep complete: examined={} escalated={} reminded={} archived={} refreshed={} failures={}",
                report.examined,
                report.escalated,
                report.reminded,
                report.archived,
                report.refreshed,
                report.failures.len()
            );
        } else {
            log::debug!(
                "Sweep complete: examined={} refreshed={}",
                report.examined,
                report.refreshed
            );
        }
        report
    }

    fn sweep_case(
        &self,
        case_id: CaseId,
        handle: &Mutex<Case>,
        now: DateTime<Utc>,
    ) -> Result<Option<(Outcome, Case)>, CaseError> {
        let (outcome, case) = update_locked(case_id, handle, |case| {
            Ok(match case.status {
                CaseStatus::Active => Some(self.sweep_active(case, now)),
                CaseStatus::Resolved => Some(self.sweep_resolved(case, now)),
                CaseStatus::Investigating | CaseStatus::Closed => None,
            })
        })?;
        Ok(outcome.map(|outcome| (outcome, case)))
    }

    fn sweep_active(&self, case: &mut Case, now: DateTime<Utc>) -> Outcome {
        let thresholds = &self.config.escalation;
        let mut outcome = Outcome {
            refreshed: reassess(case, SYSTEM_ACTOR, now, &self.config.risk),
            ..Outcome::default()
        };

        let threshold = thresholds.for_priority(case.priority);
        let open_for = now - case.created_at;
        match case.priority.next() {
            Some(next) if open_for > threshold => {
                let from = case.priority;
                case.timeline.push(
                    TimelineEntry::new(
                        TimelineKind::AutoEscalation,
                        SYSTEM_ACTOR,
                        now,
                        format!(
                            "Escalated from {from} to {next} after {} minutes open",
                            open_for.num_minutes()
                        ),
                    )
                    .with_change(json(&from), json(&next)),
                );
                case.priority = next;
                case.priority_since = now;
                case.last_reminded_at = None;
                case.updated_at = now;
                outcome.escalated = Some((from, next));
            }
            Some(_) => {}
            None => {
                let since = case.last_reminded_at.unwrap_or(case.priority_since);
                if now - since > threshold {
                    case.last_reminded_at = Some(now);
                    outcome.reminded = true;
                }
            }
        }
        outcome
    }

    fn sweep_resolved(&self, case: &mut Case, now: DateTime<Utc>) -> Outcome {
        let window = self.config.auto_archive_after;
        if now - case.updated_at <= window {
            return Outcome::default();
        }
        close(
            case,
            TimelineKind::AutoArchive,
            SYSTEM_ACTOR,
            now,
            format!(
                "Archived after {} days without activity since resolution",
                window.num_days()
            ),
        );
        Outcome {
            archived: true,
            ..Outcome::default()
        }
    }

    fn publish_outcome(&self, case: &Case, outcome: &Outcome) {
        if !outcome.changed() {
            return;
        }
        let case_id = case.id;
        let mut events = Vec::new();

        if let Some((from, to)) = outcome.escalated {
            log::info!("Case {case_id} escalated from {from} to {to}");
            events.push(CaseEvent::Escalated {
                case_id,
                from: Some(from),
                to,
            });
            self.commit(case, SYSTEM_ACTOR, "case.escalate", &events);
        } else if outcome.archived {
            log::info!("Case {case_id} auto-archived");
            events.push(CaseEvent::Closed {
                case_id,
                automatic: true,
            });
            self.commit(case, SYSTEM_ACTOR, "case.archive", &events);
        } else {
            if outcome.reminded {
                log::info!("Case {case_id} is still critical; reminding watchers");
                events.push(CaseEvent::CriticalReminder { case_id });
            }
            self.commit_quiet(case, &events);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use safe_return_case_models::{CaseConfig, CasePatch};
    use safe_return_events::Outbound;
    use safe_return_time::Clock;

    use super::*;
    use crate::engine::tests::{Harness, new_case};

    fn kinds(case: &Case) -> Vec<TimelineKind> {
        case.timeline.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn climbs_one_tier_per_sweep_once_open_past_threshold() {
        let mut h = Harness::new(CaseConfig::default());
        let case = h.engine.create_case(new_case("alice")).unwrap();
        assert_eq!(case.priority, Priority::Low);
        h.drain_events();

        h.clock.advance(Duration::hours(4));
        let report = h.engine.run_sweep();
        assert_eq!(report.examined, 1);
        assert_eq!(report.escalated, 0);
        assert_eq!(h.engine.get_case(case.id).unwrap().priority, Priority::Low);

        h.clock.advance(Duration::minutes(1));
        assert_eq!(h.engine.run_sweep().escalated, 1);
        let medium = h.engine.get_case(case.id).unwrap();
        assert_eq!(medium.priority, Priority::Medium);
        assert_eq!(medium.priority_since, h.clock.now());
        let entry = medium.timeline.last().unwrap();
        assert_eq!(entry.kind, TimelineKind::AutoEscalation);
        assert_eq!(entry.actor, SYSTEM_ACTOR);
        assert_eq!(entry.description, "Escalated from low to medium after 241 minutes open");
        assert_eq!(entry.previous, Some(serde_json::json!("low")));
        assert_eq!(entry.new, Some(serde_json::json!("medium")));

        // Already open past the medium and high thresholds.
        assert_eq!(h.engine.run_sweep().escalated, 1);
        assert_eq!(h.engine.get_case(case.id).unwrap().priority, Priority::High);
        assert_eq!(h.engine.run_sweep().escalated, 1);
        assert_eq!(
            h.engine.get_case(case.id).unwrap().priority,
            Priority::Critical
        );
        assert_eq!(h.engine.run_sweep().escalated, 0);

        let escalations: Vec<_> = h
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                CaseEvent::Escalated { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            escalations,
            vec![
                (Some(Priority::Low), Priority::Medium),
                (Some(Priority::Medium), Priority::High),
                (Some(Priority::High), Priority::Critical),
            ]
        );
    }

    #[test]
    fn elapsed_time_counts_from_creation_not_last_escalation() {
        let h = Harness::new(CaseConfig::default());
        let mut data = new_case("alice");
        data.priority = Some(Priority::Medium);
        let case = h.engine.create_case(data).unwrap();

        h.clock.advance(Duration::minutes(121));
        assert_eq!(h.engine.run_sweep().escalated, 1);
        assert_eq!(h.engine.get_case(case.id).unwrap().priority, Priority::High);

        h.clock.advance(Duration::minutes(2));
        assert_eq!(h.engine.run_sweep().escalated, 1);
        assert_eq!(
            h.engine.get_case(case.id).unwrap().priority,
            Priority::Critical
        );
    }

    #[test]
    fn critical_cases_are_reminded_not_escalated() {
        let mut h = Harness::new(CaseConfig::default());
        let mut data = new_case("alice");
        data.priority = Some(Priority::Critical);
        let case = h.engine.create_case(data).unwrap();
        h.drain_events();

        h.clock.advance(Duration::minutes(20));
        assert_eq!(h.engine.run_sweep().reminded, 0);

        h.clock.advance(Duration::minutes(11));
        let report = h.engine.run_sweep();
        assert_eq!(report.reminded, 1);
        assert_eq!(report.escalated, 0);

        h.clock.advance(Duration::minutes(10));
        assert_eq!(h.engine.run_sweep().reminded, 0);

        let after = h.engine.get_case(case.id).unwrap();
        assert_eq!(after.priority, Priority::Critical);
        assert_eq!(kinds(&after), vec![TimelineKind::Created]);
        assert_eq!(
            h.drain_events(),
            vec![CaseEvent::CriticalReminder { case_id: case.id }]
        );
    }

    #[test]
    fn closed_and_investigating_cases_are_skipped() {
        let h = Harness::new(CaseConfig::default());
        let closed = h.engine.create_case(new_case("alice")).unwrap();
        let closed = h.engine.close_case(closed.id, "alice", None).unwrap();
        let investigating = h.engine.create_case(new_case("alice")).unwrap();
        let investigating = h
            .engine
            .update_case(
                investigating.id,
                "alice",
                CasePatch {
                    status: Some(CaseStatus::Investigating),
                    ..CasePatch::default()
                },
            )
            .unwrap();

        h.clock.advance(Duration::days(3));
        let report = h.engine.run_sweep();
        assert_eq!(report, SweepReport::default());
        assert_eq!(h.engine.get_case(closed.id).unwrap(), closed);
        assert_eq!(h.engine.get_case(investigating.id).unwrap(), investigating);
    }

    #[test]
    fn priority_never_decreases_across_sweeps() {
        let h = Harness::new(CaseConfig::default());
        let ids: Vec<_> = (0..3)
            .map(|_| h.engine.create_case(new_case("alice")).unwrap().id)
            .collect();

        let mut last = vec![Priority::Low; ids.len()];
        for step in 0..40 {
            h.clock.advance(Duration::minutes(17 + step % 5));
            h.engine.run_sweep();
            for (i, id) in ids.iter().enumerate() {
                let priority = h.engine.get_case(*id).unwrap().priority;
                assert!(priority >= last[i]);
                last[i] = priority;
            }
        }
        assert!(last.iter().all(|p| *p == Priority::Critical));
    }

    #[test]
    fn resolved_cases_are_archived_after_the_window() {
        let mut h = Harness::new(CaseConfig::default());
        let case = h.engine.create_case(new_case("alice")).unwrap();
        h.engine
            .update_case(
                case.id,
                "alice",
                CasePatch {
                    status: Some(CaseStatus::Resolved),
                    ..CasePatch::default()
                },
            )
            .unwrap();
        h.drain_events();

        h.clock.advance(Duration::days(30));
        assert_eq!(h.engine.run_sweep().archived, 0);

        h.clock.advance(Duration::minutes(1));
        let report = h.engine.run_sweep();
        assert_eq!(report.archived, 1);

        let archived = h.engine.get_case(case.id).unwrap();
        assert_eq!(archived.status, CaseStatus::Closed);
        assert_eq!(archived.closed_at, Some(h.clock.now()));
        assert_eq!(
            archived.timeline.last().map(|e| e.kind),
            Some(TimelineKind::AutoArchive)
        );
        assert_eq!(
            h.drain_events(),
            vec![CaseEvent::Closed {
                case_id: case.id,
                automatic: true,
            }]
        );
        assert!(h.drain_outbound().iter().any(
            |m| matches!(m, Outbound::Audit(a) if a.action == "case.archive" && a.actor == SYSTEM_ACTOR)
        ));
    }

    #[test]
    fn elapsed_time_refreshes_risk() {
        let h = Harness::new(CaseConfig::default());
        let mut data = new_case("alice");
        data.subject.medical_conditions = vec!["epilepsy".to_string()];
        data.priority = Some(Priority::Critical);
        let case = h.engine.create_case(data).unwrap();
        assert_eq!(case.risk_score, 1);

        h.clock.advance(Duration::hours(13));
        let report = h.engine.run_sweep();
        assert_eq!(report.refreshed, 1);

        let refreshed = h.engine.get_case(case.id).unwrap();
        assert_eq!(refreshed.risk_score, 2);
        assert!(refreshed.search_radius_meters > case.search_radius_meters);
        let entry = refreshed.timeline.last().unwrap();
        assert_eq!(entry.kind, TimelineKind::Updated);
        assert_eq!(entry.description, "Risk level changed from low to medium");
    }

    #[test]
    fn one_broken_case_does_not_stop_the_sweep() {
        let h = Harness::new(CaseConfig::default());
        let broken = h.engine.create_case(new_case("alice")).unwrap();
        let healthy = h.engine.create_case(new_case("bob")).unwrap();

        let (_, handle) = h
            .engine
            .ledger()
            .handles()
            .into_iter()
            .find(|(id, _)| *id == broken.id)
            .unwrap();
        let _ = std::thread::spawn(move || {
            let _guard = handle.lock().unwrap();
            panic!("writer died");
        })
        .join();

        h.clock.advance(Duration::hours(5));
        let report = h.engine.run_sweep();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].case_id, broken.id);
        assert_eq!(report.escalated, 1);
        assert_eq!(
            h.engine.get_case(healthy.id).unwrap().priority,
            Priority::Medium
        );
    }
}
