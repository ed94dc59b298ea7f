//! Edge-triggered location tracking.
//!
//! For every subject the tracker retains the latest accepted sample plus
//! the one before it. A new report is compared zone by zone against the
//! latest sample; an event fires only when containment flips, so a
//! subject lingering inside a zone produces a single `entry`.
//!
//! Reports can arrive out of capture order when two devices (or two
//! retries) race. A report older than the latest sample but newer than
//! the prior one is spliced in between: if it reveals a round trip the
//! latest comparison missed (e.g. prior outside, late sample inside,
//! latest outside), the two compensating events are emitted. The final
//! set of transitions therefore matches time-ordered application.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use safe_return_geofence_models::{
    Geofence, GeofenceLimits, LocationReport, LocationSample, SubjectId, TransitionEvent,
    TransitionKind,
};
use safe_return_geometry::{distance_meters, within_radius};

use crate::{GeofenceError, GeofenceRegistry};

#[derive(Debug, Default)]
struct SubjectTrack {
    latest: Option<LocationSample>,
    prior: Option<LocationSample>,
}

/// Retains the latest location per subject and detects boundary
/// crossings.
pub struct LocationTracker {
    registry: Arc<GeofenceRegistry>,
    limits: GeofenceLimits,
    subjects: RwLock<BTreeMap<SubjectId, Arc<Mutex<SubjectTrack>>>>,
}

impl LocationTracker {
    /// Creates a tracker that checks reports against `registry`.
    #[must_use]
    pub fn new(registry: Arc<GeofenceRegistry>) -> Self {
        let limits = *registry.limits();
        Self {
            registry,
            limits,
            subjects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Accepts a location report for `subject_id` and returns the
    /// transitions it causes.
    ///
    /// Reports for the same subject are serialized; reports for different
    /// subjects proceed independently.
    ///
    /// # Errors
    ///
    /// Returns [`GeofenceError::InvalidLocation`] if the coordinates are
    /// out of range or the accuracy is negative or implausibly large. No
    /// state is touched in that case.
    pub fn update_location(
        &self,
        subject_id: &str,
        report: LocationReport,
    ) -> Result<Vec<TransitionEvent>, GeofenceError> {
        let sample = self.validate(subject_id, report)?;
        let handle = self.handle_for(subject_id);
        let mut track = handle.lock().unwrap_or_else(PoisonError::into_inner);
        let zones = self.registry.list_active(subject_id);

        let events = match track.latest.take() {
            None => {
                let events = crossings(&zones, None, &sample);
                track.latest = Some(sample);
                events
            }
            Some(latest) if sample.captured_at > latest.captured_at => {
                let events = crossings(&zones, Some(&latest), &sample);
                track.prior = Some(latest);
                track.latest = Some(sample);
                events
            }
            Some(latest) if sample.captured_at == latest.captured_at => {
                log::debug!(
                    "Ignoring duplicate sample for {subject_id} at {}",
                    sample.captured_at
                );
                track.latest = Some(latest);
                Vec::new()
            }
            Some(latest) => {
                let too_late = track
                    .prior
                    .as_ref()
                    .is_some_and(|p| sample.captured_at <= p.captured_at);
                let events = if too_late {
                    log::warn!(
                        "Dropping out-of-order sample for {subject_id} captured at {} \
                         (already past {})",
                        sample.captured_at,
                        latest.captured_at
                    );
                    Vec::new()
                } else {
                    let events = splice(&zones, track.prior.as_ref(), &sample, &latest);
                    track.prior = Some(sample);
                    events
                };
                track.latest = Some(latest);
                events
            }
        };
        drop(track);

        for event in &events {
            log::debug!(
                "{subject_id} {} geofence {} '{}' ({:.1} m from center)",
                event.kind,
                event.geofence_id,
                event.geofence_name,
                event.distance_meters
            );
        }
        Ok(events)
    }

    /// The latest retained sample for `subject_id`.
    #[must_use]
    pub fn latest(&self, subject_id: &str) -> Option<LocationSample> {
        let handle = self
            .subjects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject_id)
            .cloned()?;
        let track = handle.lock().unwrap_or_else(PoisonError::into_inner);
        track.latest.clone()
    }

    /// Drops the retained state for `subject_id`.
    pub fn forget(&self, subject_id: &str) -> bool {
        self.subjects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(subject_id)
            .is_some()
    }

    /// Number of subjects with retained state.
    #[must_use]
    pub fn tracked_subjects(&self) -> usize {
        self.subjects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Discards subjects whose latest sample was captured more than
    /// `horizon` before `now`. Returns how many were removed.
    ///
    /// Only memory is reclaimed; a reaped subject's next report is treated
    /// as a first report.
    ///
    /// A horizon reaching past the earliest representable instant reaps
    /// nothing.
    pub fn sweep_stale(&self, now: DateTime<Utc>, horizon: Duration) -> usize {
        let Some(cutoff) = now.checked_sub_signed(horizon) else {
            log::debug!("Stale horizon {horizon} reaches past the earliest instant; nothing to reap");
            return 0;
        };
        let is_stale = |track: &Mutex<SubjectTrack>| {
            track
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .latest
                .as_ref()
                .is_none_or(|s| s.captured_at < cutoff)
        };

        let candidates: Vec<(SubjectId, Arc<Mutex<SubjectTrack>>)> = self
            .subjects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();
        let stale: Vec<SubjectId> = candidates
            .into_iter()
            .filter(|(_, handle)| is_stale(handle))
            .map(|(id, _)| id)
            .collect();
        if stale.is_empty() {
            return 0;
        }

        let mut subjects = self.subjects.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for id in stale {
            // A report may have landed between the scan and the write lock.
            if subjects.get(&id).is_some_and(|handle| is_stale(handle)) {
                subjects.remove(&id);
                removed += 1;
            }
        }
        drop(subjects);

        if removed > 0 {
            log::info!("Reaped {removed} stale subject location(s)");
        }
        removed
    }

    fn validate(
        &self,
        subject_id: &str,
        report: LocationReport,
    ) -> Result<LocationSample, GeofenceError> {
        if subject_id.trim().is_empty() {
            return Err(GeofenceError::InvalidLocation {
                message: "subject id must not be empty".to_string(),
            });
        }
        let location = report.coordinates();
        location
            .validate()
            .map_err(|e| GeofenceError::InvalidLocation {
                message: e.to_string(),
            })?;
        let accuracy = report.accuracy_meters;
        if !accuracy.is_finite() || accuracy < 0.0 || accuracy > self.limits.max_accuracy_meters {
            return Err(GeofenceError::InvalidLocation {
                message: format!(
                    "accuracy {accuracy} m outside 0..={} m",
                    self.limits.max_accuracy_meters
                ),
            });
        }
        Ok(LocationSample {
            subject_id: subject_id.to_string(),
            location,
            accuracy_meters: accuracy,
            captured_at: report.captured_at,
        })
    }

    fn handle_for(&self, subject_id: &str) -> Arc<Mutex<SubjectTrack>> {
        if let Some(handle) = self
            .subjects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject_id)
        {
            return handle.clone();
        }
        self.subjects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(subject_id.to_string())
            .or_default()
            .clone()
    }
}

fn is_inside(zone: &Geofence, sample: &LocationSample) -> bool {
    within_radius(sample.location, zone.center, zone.radius_meters)
}

fn transition(
    zone: &Geofence,
    sample: &LocationSample,
    was_inside: bool,
    is_inside: bool,
) -> Option<TransitionEvent> {
    let kind = match (was_inside, is_inside) {
        (false, true) if zone.alert_on_entry => TransitionKind::Entry,
        (true, false) if zone.alert_on_exit => TransitionKind::Exit,
        _ => return None,
    };
    Some(TransitionEvent {
        kind,
        subject_id: sample.subject_id.clone(),
        geofence_id: zone.id,
        geofence_kind: zone.kind,
        geofence_name: zone.name.clone(),
        location: sample.location,
        occurred_at: sample.captured_at,
        distance_meters: distance_meters(sample.location, zone.center),
    })
}

/// Transitions between `previous` (if any) and `current`.
fn crossings(
    zones: &[Geofence],
    previous: Option<&LocationSample>,
    current: &LocationSample,
) -> Vec<TransitionEvent> {
    zones
        .iter()
        .filter_map(|zone| {
            let was_inside = previous.is_some_and(|p| is_inside(zone, p));
            transition(zone, current, was_inside, is_inside(zone, current))
        })
        .collect()
}

/// Compensating transitions for a `late` sample captured between `prior`
/// and `latest`, given that `prior -> latest` was already evaluated.
fn splice(
    zones: &[Geofence],
    prior: Option<&LocationSample>,
    late: &LocationSample,
    latest: &LocationSample,
) -> Vec<TransitionEvent> {
    let mut events = Vec::new();
    for zone in zones {
        let before = prior.is_some_and(|p| is_inside(zone, p));
        let during = is_inside(zone, late);
        let after = is_inside(zone, latest);
        if before == after && during != before {
            events.extend(transition(zone, late, before, during));
            events.extend(transition(zone, latest, during, after));
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use safe_return_geofence_models::{GeofenceKind, GeofenceSpec};
    use safe_return_geometry::Coordinates;
    use safe_return_time::ManualClock;

    use super::*;

    const CENTER: Coordinates = Coordinates {
        lat: 24.8047,
        lng: 120.9688,
    };

    fn t(minutes: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000) + Duration::minutes(minutes)
    }

    fn report(at: Coordinates, minutes: i64) -> LocationReport {
        LocationReport {
            lat: at.lat,
            lng: at.lng,
            accuracy_meters: 5.0,
            captured_at: t(minutes),
        }
    }

    fn setup() -> (Arc<GeofenceRegistry>, LocationTracker, Geofence) {
        let clock = Arc::new(ManualClock::new(t(0)));
        let registry = Arc::new(GeofenceRegistry::new(GeofenceLimits::default(), clock));
        let zone = registry
            .create(
                "grandpa",
                GeofenceSpec::new("Home", CENTER, GeofenceKind::SafeZone).with_radius(100.0),
            )
            .unwrap();
        let tracker = LocationTracker::new(registry.clone());
        (registry, tracker, zone)
    }

    fn kinds(events: &[TransitionEvent]) -> Vec<TransitionKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn center_then_far_yields_single_exit() {
        let (_, tracker, zone) = setup();
        // First sample inside counts as an entry from "unknown/outside".
        let first = tracker
            .update_location("grandpa", report(CENTER, 0))
            .unwrap();
        assert_eq!(kinds(&first), vec![TransitionKind::Entry]);

        let events = tracker
            .update_location("grandpa", report(CENTER.offset_north(500.0), 1))
            .unwrap();
        assert_eq!(kinds(&events), vec![TransitionKind::Exit]);
        assert_eq!(events[0].geofence_id, zone.id);
        assert!((events[0].distance_meters - 500.0).abs() < 1.0);
    }

    #[test]
    fn staying_inside_is_edge_triggered() {
        let (_, tracker, _) = setup();
        let mut all = Vec::new();
        for minute in 0..10 {
            let jitter = f64::from(i32::try_from(minute % 3).unwrap()) * 10.0;
            all.extend(
                tracker
                    .update_location("grandpa", report(CENTER.offset_north(jitter), minute))
                    .unwrap(),
            );
        }
        assert_eq!(kinds(&all), vec![TransitionKind::Entry]);

        let exit = tracker
            .update_location("grandpa", report(CENTER.offset_north(300.0), 11))
            .unwrap();
        assert_eq!(kinds(&exit), vec![TransitionKind::Exit]);
        let still_out = tracker
            .update_location("grandpa", report(CENTER.offset_north(350.0), 12))
            .unwrap();
        assert!(still_out.is_empty());
    }

    #[test]
    fn alert_flags_suppress_events() {
        let (registry, tracker, zone) = setup();
        registry
            .update(
                zone.id,
                "grandpa",
                safe_return_geofence_models::GeofencePatch {
                    alert_on_entry: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(
            tracker
                .update_location("grandpa", report(CENTER, 0))
                .unwrap()
                .is_empty()
        );
        let exit = tracker
            .update_location("grandpa", report(CENTER.offset_north(500.0), 1))
            .unwrap();
        assert_eq!(kinds(&exit), vec![TransitionKind::Exit]);
    }

    #[test]
    fn disabled_and_deleted_zones_are_ignored() {
        let (registry, tracker, zone) = setup();
        tracker.update_location("grandpa", report(CENTER, 0)).unwrap();
        assert_eq!(registry.delete(zone.id, "grandpa"), Ok(true));
        let events = tracker
            .update_location("grandpa", report(CENTER.offset_north(500.0), 1))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn other_subjects_zones_do_not_apply() {
        let (_, tracker, _) = setup();
        let events = tracker.update_location("stranger", report(CENTER, 0)).unwrap();
        assert!(events.is_empty());
        assert_eq!(tracker.tracked_subjects(), 1);
    }

    #[test]
    fn invalid_reports_leave_state_untouched() {
        let (_, tracker, _) = setup();
        tracker.update_location("grandpa", report(CENTER, 0)).unwrap();

        let mut bad = report(CENTER, 1);
        bad.lat = 123.0;
        assert!(matches!(
            tracker.update_location("grandpa", bad),
            Err(GeofenceError::InvalidLocation { .. })
        ));

        let mut inaccurate = report(CENTER, 1);
        inaccurate.accuracy_meters = -1.0;
        assert!(tracker.update_location("grandpa", inaccurate).is_err());
        inaccurate.accuracy_meters = 1e9;
        assert!(tracker.update_location("grandpa", inaccurate).is_err());

        assert_eq!(tracker.latest("grandpa").unwrap().captured_at, t(0));
    }

    #[test]
    fn duplicate_timestamp_is_ignored() {
        let (_, tracker, _) = setup();
        tracker.update_location("grandpa", report(CENTER, 0)).unwrap();
        let events = tracker
            .update_location("grandpa", report(CENTER.offset_north(500.0), 0))
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(tracker.latest("grandpa").unwrap().location, CENTER);
    }

    fn sorted(events: Vec<TransitionEvent>) -> Vec<(TransitionKind, uuid::Uuid)> {
        let mut out: Vec<_> = events.into_iter().map(|e| (e.kind, e.geofence_id)).collect();
        out.sort();
        out
    }

    /// Runs `samples` in the given arrival order on a fresh tracker over
    /// `registry`, after a shared warm-up, and returns every emitted
    /// transition.
    fn run(
        registry: &Arc<GeofenceRegistry>,
        arrival: &[(Coordinates, i64)],
    ) -> Vec<TransitionEvent> {
        let tracker = LocationTracker::new(registry.clone());
        let mut events = tracker
            .update_location("grandpa", report(CENTER.offset_north(800.0), 0))
            .unwrap();
        for (at, minute) in arrival {
            events.extend(tracker.update_location("grandpa", report(*at, *minute)).unwrap());
        }
        events
    }

    #[test]
    fn out_of_order_round_trip_matches_sequential() {
        let (registry, _, zone) = setup();
        let inside = (CENTER, 5);
        let outside = (CENTER.offset_north(600.0), 10);

        let sequential = run(&registry, &[inside, outside]);
        let reversed = run(&registry, &[outside, inside]);

        assert_eq!(
            kinds(&sequential),
            vec![TransitionKind::Entry, TransitionKind::Exit]
        );
        assert!(reversed.iter().all(|e| e.geofence_id == zone.id));
        assert_eq!(sorted(sequential), sorted(reversed));
    }

    #[test]
    fn out_of_order_single_crossing_matches_sequential() {
        let (registry, _, _) = setup();
        let outside = (CENTER.offset_north(700.0), 5);
        let inside = (CENTER, 10);

        let sequential = run(&registry, &[outside, inside]);
        let reversed = run(&registry, &[inside, outside]);

        assert_eq!(kinds(&sequential), vec![TransitionKind::Entry]);
        assert_eq!(sorted(sequential), sorted(reversed));
    }

    #[test]
    fn concurrent_updates_agree_with_time_order() {
        let (registry, tracker, _) = setup();
        let tracker = Arc::new(tracker);
        tracker
            .update_location("grandpa", report(CENTER.offset_north(800.0), 0))
            .unwrap();

        let a = {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                tracker
                    .update_location("grandpa", report(CENTER, 5))
                    .unwrap()
            })
        };
        let b = {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                tracker
                    .update_location("grandpa", report(CENTER.offset_north(600.0), 10))
                    .unwrap()
            })
        };
        let mut events = a.join().unwrap();
        events.extend(b.join().unwrap());

        assert_eq!(
            sorted(events),
            sorted(run(
                &registry,
                &[(CENTER, 5), (CENTER.offset_north(600.0), 10)]
            ))
        );
        assert_eq!(tracker.latest("grandpa").unwrap().captured_at, t(10));
    }

    #[test]
    fn samples_older_than_prior_are_dropped() {
        let (_, tracker, _) = setup();
        tracker
            .update_location("grandpa", report(CENTER.offset_north(800.0), 10))
            .unwrap();
        tracker
            .update_location("grandpa", report(CENTER.offset_north(850.0), 20))
            .unwrap();
        let events = tracker.update_location("grandpa", report(CENTER, 5)).unwrap();
        assert!(events.is_empty());
        assert_eq!(tracker.latest("grandpa").unwrap().captured_at, t(20));
    }

    #[test]
    fn stale_subjects_are_reaped() {
        let (_, tracker, _) = setup();
        tracker.update_location("grandpa", report(CENTER, 0)).unwrap();
        tracker.update_location("visitor", report(CENTER, 50)).unwrap();

        assert_eq!(tracker.sweep_stale(t(61), Duration::hours(1)), 1);
        assert!(tracker.latest("grandpa").is_none());
        assert!(tracker.latest("visitor").is_some());

        // After reaping, the next inside report is a fresh entry.
        let events = tracker.update_location("grandpa", report(CENTER, 62)).unwrap();
        assert_eq!(kinds(&events), vec![TransitionKind::Entry]);
    }

    #[test]
    fn horizon_beyond_the_epoch_reaps_nothing() {
        let (_, tracker, _) = setup();
        tracker.update_location("grandpa", report(CENTER, 0)).unwrap();

        assert_eq!(
            tracker.sweep_stale(t(1), Duration::milliseconds(i64::MAX)),
            0
        );
        assert!(tracker.latest("grandpa").is_some());
    }
}
