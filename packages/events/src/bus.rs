//! Bounded fan-out for one topic.
//!
//! Every subscriber gets its own bounded [`mpsc`] channel. Publishing never
//! blocks: a subscriber whose buffer is full misses that event (logged),
//! and a subscriber whose receiver was dropped is pruned. Each event is
//! delivered at most once per subscriber.

use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::Topic;

/// Errors from subscribing to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The topic already has its maximum number of subscribers.
    #[error("Topic {topic} already has the maximum of {limit} subscribers")]
    SubscriberLimit {
        /// The full topic.
        topic: Topic,
        /// The configured cap.
        limit: usize,
    },
}

/// Publish/subscribe hub for a single topic.
pub struct EventBus<T> {
    topic: Topic,
    max_subscribers: usize,
    buffer: usize,
    subscribers: Mutex<Vec<mpsc::Sender<T>>>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Creates a bus for `topic` accepting up to `max_subscribers`
    /// subscribers, each with a channel of `buffer` events.
    #[must_use]
    pub fn new(topic: Topic, max_subscribers: usize, buffer: usize) -> Self {
        Self {
            topic,
            max_subscribers,
            buffer: buffer.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// The topic this bus carries.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        self.topic
    }

    /// Registers a new subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriberLimit`] if the topic is full. Closed
    /// subscribers are pruned first, so dropping a receiver frees its slot.
    pub fn subscribe(&self) -> Result<mpsc::Receiver<T>, BusError> {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| !tx.is_closed());
        if subscribers.len() >= self.max_subscribers {
            return Err(BusError::SubscriberLimit {
                topic: self.topic,
                limit: self.max_subscribers,
            });
        }
        let (tx, rx) = mpsc::channel(self.buffer);
        subscribers.push(tx);
        drop(subscribers);

        log::debug!("New subscriber on {}", self.topic);
        Ok(rx)
    }

    /// Sends `event` to every live subscriber. Returns how many received
    /// it.
    pub fn publish(&self, event: &T) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Subscriber on {} is full; dropping event", self.topic);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Pruning closed subscriber on {}", self.topic);
                false
            }
        });
        delivered
    }

    /// Number of registered subscribers (including ones not yet pruned).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fans_out_to_every_subscriber_once() {
        let bus = EventBus::new(Topic::CaseEvents, 4, 8);
        let mut a = bus.subscribe().unwrap();
        let mut b = bus.subscribe().unwrap();

        assert_eq!(bus.publish(&1u32), 2);
        assert_eq!(bus.publish(&2u32), 2);

        assert_eq!(a.recv().await, Some(1));
        assert_eq!(a.recv().await, Some(2));
        assert_eq!(b.recv().await, Some(1));
        assert_eq!(b.recv().await, Some(2));
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn subscriber_list_is_bounded() {
        let bus: EventBus<u32> = EventBus::new(Topic::GeofenceEvents, 1, 8);
        let first = bus.subscribe().unwrap();
        assert_eq!(
            bus.subscribe().unwrap_err(),
            BusError::SubscriberLimit {
                topic: Topic::GeofenceEvents,
                limit: 1
            }
        );

        drop(first);
        assert!(bus.subscribe().is_ok());
    }

    #[test]
    fn full_subscriber_misses_events_without_blocking() {
        let bus = EventBus::new(Topic::CaseEvents, 2, 1);
        let mut slow = bus.subscribe().unwrap();

        assert_eq!(bus.publish(&1u32), 1);
        assert_eq!(bus.publish(&2u32), 0);
        assert_eq!(slow.try_recv().unwrap(), 1);
        assert!(slow.try_recv().is_err());
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn closed_subscribers_are_pruned_on_publish() {
        let bus = EventBus::new(Topic::CaseEvents, 2, 4);
        let gone = bus.subscribe().unwrap();
        let _kept = bus.subscribe().unwrap();
        drop(gone);

        assert_eq!(bus.publish(&7u32), 1);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
