//! Outward-facing collaborators.
//!
//! The core never implements persistence, notification delivery or audit
//! storage; it calls out through these traits. In-memory implementations
//! back tests and the CLI.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use safe_return_case_models::{Case, CaseId};
use safe_return_events::{AuditRecord, Notification};
use safe_return_geofence_models::Geofence;
use thiserror::Error;
use uuid::Uuid;

/// A failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Collaborator error: {message}")]
pub struct CollaboratorError {
    pub message: String,
}

impl CollaboratorError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Durable key-value storage for cases and geofences.
#[async_trait::async_trait]
pub trait DurableStore: Send + Sync {
    /// Writes the current state of a case.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the write fails.
    async fn put_case(&self, case: &Case) -> Result<(), CollaboratorError>;

    /// Reads one case.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the read fails.
    async fn get_case(&self, id: CaseId) -> Result<Option<Case>, CollaboratorError>;

    /// Reads every case.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the read fails.
    async fn list_cases(&self) -> Result<Vec<Case>, CollaboratorError>;

    /// Writes the current state of a geofence.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the write fails.
    async fn put_geofence(&self, geofence: &Geofence) -> Result<(), CollaboratorError>;

    /// Reads every geofence.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the read fails.
    async fn list_geofences(&self) -> Result<Vec<Geofence>, CollaboratorError>;

    /// Removes a geofence. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the delete fails.
    async fn delete_geofence(&self, id: Uuid) -> Result<bool, CollaboratorError>;
}

/// Delivers messages to users.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Sends one notification.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if delivery fails.
    async fn notify(&self, notification: &Notification) -> Result<(), CollaboratorError>;
}

/// Records auditable actions.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    /// Records one action.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the record cannot be stored.
    async fn record(&self, record: &AuditRecord) -> Result<(), CollaboratorError>;
}

/// The set of collaborators a service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DurableStore>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditSink>,
}

impl Collaborators {
    /// Fresh in-memory collaborators.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
            notifier: Arc::new(MemoryNotifier::default()),
            audit: Arc::new(MemoryAuditLog::default()),
        }
    }
}

/// [`DurableStore`] backed by in-process maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cases: Mutex<BTreeMap<CaseId, Case>>,
    geofences: Mutex<BTreeMap<Uuid, Geofence>>,
}

impl MemoryStore {
    /// Number of stored cases.
    #[must_use]
    pub fn case_count(&self) -> usize {
        self.cases.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of stored geofences.
    #[must_use]
    pub fn geofence_count(&self) -> usize {
        self.geofences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait::async_trait]
impl DurableStore for MemoryStore {
    async fn put_case(&self, case: &Case) -> Result<(), CollaboratorError> {
        self.cases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(case.id, case.clone());
        Ok(())
    }

    async fn get_case(&self, id: CaseId) -> Result<Option<Case>, CollaboratorError> {
        Ok(self
            .cases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }

    async fn list_cases(&self) -> Result<Vec<Case>, CollaboratorError> {
        Ok(self
            .cases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn put_geofence(&self, geofence: &Geofence) -> Result<(), CollaboratorError> {
        self.geofences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(geofence.id, geofence.clone());
        Ok(())
    }

    async fn list_geofences(&self) -> Result<Vec<Geofence>, CollaboratorError> {
        Ok(self
            .geofences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn delete_geofence(&self, id: Uuid) -> Result<bool, CollaboratorError> {
        Ok(self
            .geofences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some())
    }
}

/// [`Notifier`] that keeps every notification in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    /// Notifications delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), CollaboratorError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
        Ok(())
    }
}

/// [`AuditSink`] that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    /// Records received so far.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, record: &AuditRecord) -> Result<(), CollaboratorError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use safe_return_geofence_models::GeofenceKind;
    use safe_return_geometry::Coordinates;

    use super::*;

    fn zone() -> Geofence {
        let at = DateTime::<Utc>::UNIX_EPOCH;
        Geofence {
            id: Uuid::new_v4(),
            owner_id: "device-1".to_string(),
            name: "Home".to_string(),
            center: Coordinates::new(24.8047, 120.9688).unwrap(),
            radius_meters: 100.0,
            kind: GeofenceKind::SafeZone,
            alert_on_entry: true,
            alert_on_exit: true,
            enabled: true,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn memory_store_round_trips_geofences() {
        let store = MemoryStore::default();
        let zone = zone();
        store.put_geofence(&zone).await.unwrap();
        assert_eq!(store.list_geofences().await.unwrap(), vec![zone.clone()]);
        assert!(store.delete_geofence(zone.id).await.unwrap());
        assert!(!store.delete_geofence(zone.id).await.unwrap());
        assert_eq!(store.geofence_count(), 0);
    }

    #[tokio::test]
    async fn memory_notifier_records_deliveries() {
        let notifier = MemoryNotifier::default();
        let notification = Notification {
            user_id: "alice".to_string(),
            case_id: None,
            event_type: "case_created".to_string(),
            message: "hello".to_string(),
            payload: serde_json::Value::Null,
        };
        notifier.notify(&notification).await.unwrap();
        assert_eq!(notifier.sent(), vec![notification]);
    }
}
