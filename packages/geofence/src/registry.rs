//! Per-owner registry of circular geofences.
//!
//! Zones are validated against [`GeofenceLimits`] on every write. Reads
//! hand out clones so callers never hold the registry lock while doing
//! containment math.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use safe_return_geofence_models::{
    Geofence, GeofenceLimits, GeofencePatch, GeofenceSpec, SubjectId,
};
use safe_return_geometry::{Coordinates, distance_meters, within_radius};
use safe_return_time::Clock;
use uuid::Uuid;

use crate::GeofenceError;

/// A zone returned by [`GeofenceRegistry::nearby`] with its distance from
/// the query point.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyGeofence {
    /// The zone.
    pub geofence: Geofence,
    /// Distance from the query point to the zone center, in meters.
    pub distance_meters: f64,
}

#[derive(Default)]
struct Zones {
    by_id: BTreeMap<Uuid, Geofence>,
    by_owner: BTreeMap<SubjectId, BTreeSet<Uuid>>,
}

impl Zones {
    fn insert(&mut self, zone: Geofence) {
        self.by_owner
            .entry(zone.owner_id.clone())
            .or_default()
            .insert(zone.id);
        self.by_id.insert(zone.id, zone);
    }

    fn remove(&mut self, id: Uuid) -> Option<Geofence> {
        let zone = self.by_id.remove(&id)?;
        if let Some(ids) = self.by_owner.get_mut(&zone.owner_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_owner.remove(&zone.owner_id);
            }
        }
        Some(zone)
    }

    fn owned_by(&self, owner_id: &str) -> impl Iterator<Item = &Geofence> {
        self.by_owner
            .get(owner_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
    }

    fn count_for(&self, owner_id: &str) -> usize {
        self.by_owner.get(owner_id).map_or(0, BTreeSet::len)
    }
}

/// In-memory authoritative set of geofences.
pub struct GeofenceRegistry {
    limits: GeofenceLimits,
    clock: Arc<dyn Clock>,
    zones: RwLock<Zones>,
}

impl GeofenceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(limits: GeofenceLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            clock,
            zones: RwLock::new(Zones::default()),
        }
    }

    /// The limits this registry enforces.
    #[must_use]
    pub const fn limits(&self) -> &GeofenceLimits {
        &self.limits
    }

    /// Creates a zone for `owner_id`.
    ///
    /// # Errors
    ///
    /// * [`GeofenceError::Validation`] if the name is blank, the center is
    ///   out of range, or the radius is outside `min_radius..=max_radius`.
    /// * [`GeofenceError::QuotaExceeded`] if the owner already holds
    ///   `max_per_owner` zones.
    pub fn create(&self, owner_id: &str, spec: GeofenceSpec) -> Result<Geofence, GeofenceError> {
        if owner_id.trim().is_empty() {
            return Err(GeofenceError::Validation {
                message: "owner id must not be empty".to_string(),
            });
        }
        let radius = spec.radius_meters.unwrap_or(self.limits.default_radius);
        self.validate(&spec.name, spec.center, radius)?;

        let now = self.clock.now();
        let zone = Geofence {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            name: spec.name.trim().to_string(),
            center: spec.center,
            radius_meters: radius,
            kind: spec.kind,
            alert_on_entry: spec.alert_on_entry,
            alert_on_exit: spec.alert_on_exit,
            enabled: spec.enabled,
            created_at: now,
            updated_at: now,
        };

        let mut zones = self.write();
        if zones.count_for(owner_id) >= self.limits.max_per_owner {
            return Err(GeofenceError::QuotaExceeded {
                owner_id: owner_id.to_string(),
                limit: self.limits.max_per_owner,
            });
        }
        zones.insert(zone.clone());
        drop(zones);

        log::info!(
            "Created geofence {} '{}' for {owner_id} ({} m, {})",
            zone.id,
            zone.name,
            zone.radius_meters,
            zone.kind
        );
        Ok(zone)
    }

    /// Applies `patch` to zone `id` on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// * [`GeofenceError::NotFound`] if no such zone exists.
    /// * [`GeofenceError::Unauthorized`] if `actor` is not the owner.
    /// * [`GeofenceError::Validation`] if the patched zone is invalid; the
    ///   stored zone is left unchanged.
    pub fn update(
        &self,
        id: Uuid,
        actor: &str,
        patch: GeofencePatch,
    ) -> Result<Geofence, GeofenceError> {
        let mut zones = self.write();
        let current = zones.by_id.get(&id).ok_or(GeofenceError::NotFound { id })?;
        if current.owner_id != actor {
            return Err(GeofenceError::Unauthorized {
                id,
                actor: actor.to_string(),
            });
        }
        if patch.is_empty() {
            return Ok(current.clone());
        }

        let mut updated = current.clone();
        if let Some(name) = patch.name {
            updated.name = name.trim().to_string();
        }
        if let Some(center) = patch.center {
            updated.center = center;
        }
        if let Some(radius) = patch.radius_meters {
            updated.radius_meters = radius;
        }
        if let Some(kind) = patch.kind {
            updated.kind = kind;
        }
        if let Some(alert) = patch.alert_on_entry {
            updated.alert_on_entry = alert;
        }
        if let Some(alert) = patch.alert_on_exit {
            updated.alert_on_exit = alert;
        }
        if let Some(enabled) = patch.enabled {
            updated.enabled = enabled;
        }
        self.validate(&updated.name, updated.center, updated.radius_meters)?;
        updated.updated_at = self.clock.now();

        zones.by_id.insert(id, updated.clone());
        drop(zones);

        log::debug!("Updated geofence {id}");
        Ok(updated)
    }

    /// Removes zone `id` if `owner_id` owns it.
    ///
    /// Returns `false` when the zone does not exist (already deleted).
    ///
    /// # Errors
    ///
    /// Returns [`GeofenceError::Unauthorized`] if the zone belongs to
    /// someone else.
    pub fn delete(&self, id: Uuid, owner_id: &str) -> Result<bool, GeofenceError> {
        let mut zones = self.write();
        match zones.by_id.get(&id) {
            None => Ok(false),
            Some(zone) if zone.owner_id != owner_id => Err(GeofenceError::Unauthorized {
                id,
                actor: owner_id.to_string(),
            }),
            Some(_) => {
                zones.remove(id);
                drop(zones);
                log::info!("Deleted geofence {id} for {owner_id}");
                Ok(true)
            }
        }
    }

    /// Looks up a zone by ID.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Geofence> {
        self.read().by_id.get(&id).cloned()
    }

    /// All zones for `owner_id`, enabled or not, oldest first.
    #[must_use]
    pub fn list(&self, owner_id: &str) -> Vec<Geofence> {
        let mut zones: Vec<Geofence> = self.read().owned_by(owner_id).cloned().collect();
        zones.sort_by_key(|z| z.created_at);
        zones
    }

    /// Enabled zones for `owner_id`, oldest first. These are the zones
    /// that participate in transition detection.
    #[must_use]
    pub fn list_active(&self, owner_id: &str) -> Vec<Geofence> {
        let mut zones: Vec<Geofence> = self
            .read()
            .owned_by(owner_id)
            .filter(|z| z.enabled)
            .cloned()
            .collect();
        zones.sort_by_key(|z| z.created_at);
        zones
    }

    /// Enabled zones whose center lies within `search_radius` meters of
    /// `location`, nearest first.
    ///
    /// # Errors
    ///
    /// Returns [`GeofenceError::Validation`] if `location` is out of range
    /// or `search_radius` is negative.
    pub fn nearby(
        &self,
        location: Coordinates,
        search_radius: f64,
    ) -> Result<Vec<NearbyGeofence>, GeofenceError> {
        location.validate().map_err(|e| GeofenceError::Validation {
            message: e.to_string(),
        })?;
        if !search_radius.is_finite() || search_radius < 0.0 {
            return Err(GeofenceError::Validation {
                message: format!("search radius {search_radius} must be a non-negative number"),
            });
        }

        let mut found: Vec<NearbyGeofence> = self
            .read()
            .by_id
            .values()
            .filter(|z| z.enabled && within_radius(z.center, location, search_radius))
            .map(|z| NearbyGeofence {
                distance_meters: distance_meters(location, z.center),
                geofence: z.clone(),
            })
            .collect();
        found.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        Ok(found)
    }

    /// Inserts a previously persisted zone without quota checks.
    ///
    /// Used when hydrating from the durable store at startup.
    ///
    /// # Errors
    ///
    /// Returns [`GeofenceError::Validation`] if the stored zone no longer
    /// satisfies the configured bounds.
    pub fn restore(&self, zone: Geofence) -> Result<(), GeofenceError> {
        self.validate(&zone.name, zone.center, zone.radius_meters)?;
        let mut zones = self.write();
        zones.remove(zone.id);
        zones.insert(zone);
        Ok(())
    }

    /// Total number of zones across all owners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    /// Whether the registry holds no zones.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().by_id.is_empty()
    }

    fn validate(&self, name: &str, center: Coordinates, radius: f64) -> Result<(), GeofenceError> {
        if name.trim().is_empty() {
            return Err(GeofenceError::Validation {
                message: "geofence name must not be empty".to_string(),
            });
        }
        center.validate().map_err(|e| GeofenceError::Validation {
            message: e.to_string(),
        })?;
        if !radius.is_finite() || radius < self.limits.min_radius || radius > self.limits.max_radius
        {
            return Err(GeofenceError::Validation {
                message: format!(
                    "radius {radius} m outside allowed range {}..={} m",
                    self.limits.min_radius, self.limits.max_radius
                ),
            });
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Zones> {
        self.zones.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Zones> {
        self.zones.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use safe_return_geofence_models::GeofenceKind;
    use safe_return_time::ManualClock;

    use super::*;

    const HOME: Coordinates = Coordinates {
        lat: 24.8047,
        lng: 120.9688,
    };

    fn registry_with(limits: GeofenceLimits) -> (GeofenceRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
        (GeofenceRegistry::new(limits, clock.clone()), clock)
    }

    fn registry() -> GeofenceRegistry {
        registry_with(GeofenceLimits::default()).0
    }

    #[test]
    fn create_uses_default_radius() {
        let registry = registry();
        let zone = registry
            .create("alice", GeofenceSpec::new("Home", HOME, GeofenceKind::SafeZone))
            .unwrap();
        assert!((zone.radius_meters - 100.0).abs() < f64::EPSILON);
        assert_eq!(registry.get(zone.id), Some(zone));
    }

    #[test]
    fn radius_below_minimum_is_rejected() {
        let registry = registry();
        let err = registry
            .create(
                "alice",
                GeofenceSpec::new("Tiny", HOME, GeofenceKind::SafeZone).with_radius(30.0),
            )
            .unwrap_err();
        assert!(matches!(err, GeofenceError::Validation { .. }), "{err:?}");
        assert!(registry.is_empty());
    }

    #[test]
    fn out_of_range_center_is_rejected() {
        let registry = registry();
        let spec = GeofenceSpec::new(
            "Nowhere",
            Coordinates {
                lat: 95.0,
                lng: 0.0,
            },
            GeofenceKind::RestrictedArea,
        );
        assert!(matches!(
            registry.create("alice", spec),
            Err(GeofenceError::Validation { .. })
        ));
    }

    #[test]
    fn per_owner_cap_is_enforced() {
        let (registry, _) = registry_with(GeofenceLimits {
            max_per_owner: 2,
            ..GeofenceLimits::default()
        });
        for i in 0..2 {
            registry
                .create(
                    "alice",
                    GeofenceSpec::new(format!("Zone {i}"), HOME, GeofenceKind::SafeZone),
                )
                .unwrap();
        }
        let err = registry
            .create("alice", GeofenceSpec::new("Third", HOME, GeofenceKind::SafeZone))
            .unwrap_err();
        assert_eq!(
            err,
            GeofenceError::QuotaExceeded {
                owner_id: "alice".to_string(),
                limit: 2
            }
        );
        // Another owner is unaffected.
        assert!(
            registry
                .create("bob", GeofenceSpec::new("Home", HOME, GeofenceKind::SafeZone))
                .is_ok()
        );
    }

    #[test]
    fn delete_requires_owner_and_is_idempotent() {
        let registry = registry();
        let zone = registry
            .create("alice", GeofenceSpec::new("Home", HOME, GeofenceKind::SafeZone))
            .unwrap();

        assert!(matches!(
            registry.delete(zone.id, "mallory"),
            Err(GeofenceError::Unauthorized { .. })
        ));
        assert_eq!(registry.delete(zone.id, "alice"), Ok(true));
        assert_eq!(registry.delete(zone.id, "alice"), Ok(false));
        assert!(registry.list_active("alice").is_empty());
    }

    #[test]
    fn update_validates_and_preserves_on_failure() {
        let (registry, clock) = registry_with(GeofenceLimits::default());
        let zone = registry
            .create("alice", GeofenceSpec::new("Home", HOME, GeofenceKind::SafeZone))
            .unwrap();

        let bad = GeofencePatch {
            radius_meters: Some(1_000_000.0),
            ..GeofencePatch::default()
        };
        assert!(matches!(
            registry.update(zone.id, "alice", bad),
            Err(GeofenceError::Validation { .. })
        ));
        assert_eq!(registry.get(zone.id), Some(zone.clone()));

        clock.advance(Duration::minutes(5));
        let updated = registry
            .update(
                zone.id,
                "alice",
                GeofencePatch {
                    radius_meters: Some(250.0),
                    enabled: Some(false),
                    ..GeofencePatch::default()
                },
            )
            .unwrap();
        assert!((updated.radius_meters - 250.0).abs() < f64::EPSILON);
        assert!(!updated.enabled);
        assert!(updated.updated_at > zone.updated_at);
        assert!(registry.list_active("alice").is_empty());
        assert_eq!(registry.list("alice").len(), 1);

        assert!(matches!(
            registry.update(zone.id, "bob", GeofencePatch::default()),
            Err(GeofenceError::Unauthorized { .. })
        ));
        assert!(matches!(
            registry.update(Uuid::new_v4(), "alice", GeofencePatch::default()),
            Err(GeofenceError::NotFound { .. })
        ));
    }

    #[test]
    fn nearby_sorted_by_distance() {
        let registry = registry();
        let far = registry
            .create(
                "alice",
                GeofenceSpec::new("Park", HOME.offset_north(900.0), GeofenceKind::SafeZone),
            )
            .unwrap();
        let near = registry
            .create(
                "bob",
                GeofenceSpec::new("River", HOME.offset_north(200.0), GeofenceKind::RestrictedArea),
            )
            .unwrap();
        registry
            .create(
                "carol",
                GeofenceSpec::new("Mall", HOME.offset_north(5_000.0), GeofenceKind::SafeZone),
            )
            .unwrap();

        let found = registry.nearby(HOME, 1_000.0).unwrap();
        let ids: Vec<Uuid> = found.iter().map(|n| n.geofence.id).collect();
        assert_eq!(ids, vec![near.id, far.id]);
        assert!(found[0].distance_meters < found[1].distance_meters);

        assert!(registry.nearby(HOME, -1.0).is_err());
    }
}
