//! Drains the outbox into the collaborators.
//!
//! Runs as its own task. A failing collaborator is logged and the message
//! dropped; the in-memory state change that produced it stands.

use safe_return_events::Outbound;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::collaborators::{CollaboratorError, Collaborators};

/// Spawns the dispatcher. It runs until `stop` flips to `true`, then
/// delivers whatever is already queued and exits.
pub(crate) fn spawn(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    collaborators: Collaborators,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                message = rx.recv() => match message {
                    Some(message) => deliver(&collaborators, message).await,
                    None => break,
                },
                _ = stop.changed() => {
                    rx.close();
                    let mut drained = 0_usize;
                    while let Some(message) = rx.recv().await {
                        deliver(&collaborators, message).await;
                        drained += 1;
                    }
                    log::debug!("Dispatcher drained {drained} queued message(s)");
                    break;
                }
            }
        }
        log::debug!("Dispatcher stopped");
    })
}

/// Sends one message to its collaborator.
pub(crate) async fn deliver(collaborators: &Collaborators, message: Outbound) {
    let (kind, result): (&str, Result<(), CollaboratorError>) = match &message {
        Outbound::PersistCase(case) => ("persist case", collaborators.store.put_case(case).await),
        Outbound::PersistGeofence(zone) => (
            "persist geofence",
            collaborators.store.put_geofence(zone).await,
        ),
        Outbound::DeleteGeofence(id) => (
            "delete geofence",
            collaborators.store.delete_geofence(*id).await.map(|_| ()),
        ),
        Outbound::Notify(notification) => (
            "notify",
            collaborators.notifier.notify(notification).await,
        ),
        Outbound::Audit(record) => ("audit", collaborators.audit.record(record).await),
    };

    if let Err(e) = result {
        log::warn!("Downstream {kind} failed; state change kept: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use safe_return_events::{AuditRecord, Notification, Outbox};
    use uuid::Uuid;

    use super::*;
    use crate::collaborators::{MemoryAuditLog, MemoryStore, Notifier};

    struct BrokenNotifier;

    #[async_trait]
    impl Notifier for BrokenNotifier {
        async fn notify(&self, _: &Notification) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::new("smtp down"))
        }
    }

    #[tokio::test]
    async fn failures_do_not_stop_delivery() {
        let audit = Arc::new(MemoryAuditLog::default());
        let collaborators = Collaborators {
            store: Arc::new(MemoryStore::default()),
            notifier: Arc::new(BrokenNotifier),
            audit: audit.clone(),
        };
        let (outbox, rx) = Outbox::channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = spawn(rx, collaborators, stop_rx);

        let at = DateTime::<Utc>::UNIX_EPOCH;
        outbox.send_all([
            Outbound::Notify(Notification {
                user_id: "alice".to_string(),
                case_id: None,
                event_type: "case_created".to_string(),
                message: "hi".to_string(),
                payload: serde_json::Value::Null,
            }),
            Outbound::Audit(AuditRecord::for_case("case.create", "alice", Uuid::nil(), at)),
        ]);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(audit.records().len(), 1);
        outbox.send(Outbound::DeleteGeofence(Uuid::nil()));
    }
}
