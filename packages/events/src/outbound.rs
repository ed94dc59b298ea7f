//! Fire-and-forget side channel to external collaborators.
//!
//! Components push [`Outbound`] messages into an [`Outbox`]; a dispatcher
//! task owned by the service drains them into the durable store, the
//! notification dispatcher, and the audit sink. Sending never blocks and
//! never fails from the caller's point of view.

use chrono::{DateTime, Utc};
use safe_return_case_models::{Case, CaseId, UserId};
use safe_return_geofence_models::Geofence;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A message for a single user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Recipient.
    pub user_id: UserId,
    /// Case the message is about, if any.
    pub case_id: Option<CaseId>,
    /// Machine-readable event type (e.g. `"case_escalated"`).
    pub event_type: String,
    /// Human-readable message.
    pub message: String,
    /// Structured event details.
    pub payload: serde_json::Value,
}

/// One auditable action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// What happened (e.g. `"case.close"`).
    pub action: String,
    /// Who did it.
    pub actor: String,
    /// Affected entity, as `kind:id`.
    pub entity: String,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl AuditRecord {
    /// Builds a record for a case action.
    #[must_use]
    pub fn for_case(action: &str, actor: &str, case_id: CaseId, at: DateTime<Utc>) -> Self {
        Self {
            action: action.to_string(),
            actor: actor.to_string(),
            entity: format!("case:{case_id}"),
            at,
        }
    }

    /// Builds a record for a geofence action.
    #[must_use]
    pub fn for_geofence(action: &str, actor: &str, geofence_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            action: action.to_string(),
            actor: actor.to_string(),
            entity: format!("geofence:{geofence_id}"),
            at,
        }
    }
}

/// A side effect destined for an external collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Write the current state of a case.
    PersistCase(Box<Case>),
    /// Write the current state of a geofence.
    PersistGeofence(Box<Geofence>),
    /// Remove a geofence.
    DeleteGeofence(Uuid),
    /// Deliver a notification.
    Notify(Notification),
    /// Record an audit event.
    Audit(AuditRecord),
}

/// Sending half of the side channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Outbox {
    /// Creates a connected outbox and the receiver the dispatcher drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues a message. If the dispatcher is gone the message is dropped
    /// with a warning; the caller's state change stands.
    pub fn send(&self, message: Outbound) {
        if let Err(e) = self.tx.send(message) {
            log::warn!("Outbox closed; dropping {} message", kind_of(&e.0));
        }
    }

    /// Queues a batch of messages.
    pub fn send_all(&self, messages: impl IntoIterator<Item = Outbound>) {
        for message in messages {
            self.send(message);
        }
    }
}

const fn kind_of(message: &Outbound) -> &'static str {
    match message {
        Outbound::PersistCase(_) => "PersistCase",
        Outbound::PersistGeofence(_) => "PersistGeofence",
        Outbound::DeleteGeofence(_) => "DeleteGeofence",
        Outbound::Notify(_) => "Notify",
        Outbound::Audit(_) => "Audit",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_after_receiver_dropped_does_not_panic() {
        let (outbox, rx) = Outbox::channel();
        drop(rx);
        outbox.send(Outbound::DeleteGeofence(Uuid::nil()));
    }

    #[test]
    fn messages_arrive_in_order() {
        let (outbox, mut rx) = Outbox::channel();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        outbox.send_all([
            Outbound::DeleteGeofence(first),
            Outbound::DeleteGeofence(second),
        ]);
        assert_eq!(rx.try_recv().unwrap(), Outbound::DeleteGeofence(first));
        assert_eq!(rx.try_recv().unwrap(), Outbound::DeleteGeofence(second));
    }

    #[test]
    fn audit_entities_are_prefixed() {
        let at = DateTime::<Utc>::UNIX_EPOCH;
        let record = AuditRecord::for_case("case.create", "alice", Uuid::nil(), at);
        assert_eq!(
            record.entity,
            "case:00000000-0000-0000-0000-000000000000"
        );
    }
}
