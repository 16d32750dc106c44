//! In-process publish/subscribe channel between independently rendered views.
//!
//! Delivery is synchronous and best-effort: no persistence, no replay.
//! Payloads are informational; subscribers that cache derived totals must
//! re-read them through the repositories.

use crate::services::metrics::record_bus_delivery;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Topic {
    PaymentRecorded,
    PaymentCorrected,
    ClientReconciled,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::PaymentRecorded => "payment-recorded",
            Topic::PaymentCorrected => "payment-corrected",
            Topic::ClientReconciled => "client-reconciled",
        }
    }

    pub fn all() -> [Topic; 3] {
        [
            Topic::PaymentRecorded,
            Topic::PaymentCorrected,
            Topic::ClientReconciled,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "topic", rename_all = "kebab-case")]
pub enum BusEvent {
    PaymentRecorded {
        client_id: Uuid,
        amount: Decimal,
        invoice_id: Uuid,
    },
    PaymentCorrected {
        client_id: Uuid,
        entry_id: Uuid,
        corrects: Uuid,
    },
    ClientReconciled {
        client_id: Uuid,
    },
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::PaymentRecorded { .. } => Topic::PaymentRecorded,
            BusEvent::PaymentCorrected { .. } => Topic::PaymentCorrected,
            BusEvent::ClientReconciled { .. } => Topic::ClientReconciled,
        }
    }

    pub fn client_id(&self) -> Uuid {
        match self {
            BusEvent::PaymentRecorded { client_id, .. }
            | BusEvent::PaymentCorrected { client_id, .. }
            | BusEvent::ClientReconciled { client_id } => *client_id,
        }
    }
}

pub type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    subscribers: DashMap<Topic, Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, topic: Topic, id: u64) -> bool {
        match self.subscribers.get_mut(&topic) {
            Some(mut handlers) => {
                let before = handlers.len();
                handlers.retain(|(sid, _)| *sid != id);
                handlers.len() != before
            }
            None => false,
        }
    }
}

/// Cheap to clone; clones share subscribers.
#[derive(Clone, Default)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));

        debug!(topic = topic.as_str(), subscription_id = id, "Subscribed");

        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    /// Deliver `event` to every current subscriber of its topic and return
    /// how many handlers completed. A panicking handler is logged and skipped.
    pub fn publish(&self, event: &BusEvent) -> usize {
        let topic = event.topic();
        // Snapshot so handlers can (un)subscribe without deadlocking the map.
        let handlers: Vec<Handler> = match self.inner.subscribers.get(&topic) {
            Some(entry) => entry.iter().map(|(_, h)| h.clone()).collect(),
            None => Vec::new(),
        };

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(
                    topic = topic.as_str(),
                    client_id = %event.client_id(),
                    "Subscriber panicked while handling event"
                ),
            }
        }

        record_bus_delivery(topic.as_str(), delivered);
        debug!(topic = topic.as_str(), delivered = delivered, "Event published");
        delivered
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .subscribers
            .get(&topic)
            .map(|h| h.len())
            .unwrap_or(0)
    }
}

/// Handle returned by [`NotificationBus::subscribe`]. Dropping it keeps the
/// subscription alive; call [`Subscription::unsubscribe`] to end it.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Returns false if the bus is gone or the handler was already removed.
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove(self.topic, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorded(client_id: Uuid) -> BusEvent {
        BusEvent::PaymentRecorded {
            client_id,
            amount: Decimal::from(100),
            invoice_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn only_matching_topic_is_delivered() {
        let bus = NotificationBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = bus.subscribe(Topic::PaymentRecorded, move |e| {
            sink.lock().unwrap().push(e.clone());
        });

        let client_id = Uuid::new_v4();
        assert_eq!(bus.publish(&recorded(client_id)), 1);
        assert_eq!(
            bus.publish(&BusEvent::ClientReconciled { client_id }),
            0
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].client_id(), client_id);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = NotificationBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let sub = bus.subscribe(Topic::PaymentRecorded, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&recorded(Uuid::new_v4()));
        assert!(sub.unsubscribe());
        bus.publish(&recorded(Uuid::new_v4()));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(Topic::PaymentRecorded), 0);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bus = NotificationBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let _bad = bus.subscribe(Topic::PaymentRecorded, |_| panic!("view crashed"));
        let _good = bus.subscribe(Topic::PaymentRecorded, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish(&recorded(Uuid::new_v4())), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_subscribe_during_delivery() {
        let bus = NotificationBus::new();
        let inner_bus = bus.clone();
        let _sub = bus.subscribe(Topic::PaymentRecorded, move |_| {
            let _nested = inner_bus.subscribe(Topic::ClientReconciled, |_| {});
        });

        bus.publish(&recorded(Uuid::new_v4()));
        assert_eq!(bus.subscriber_count(Topic::ClientReconciled), 1);
    }

    #[test]
    fn event_serializes_with_topic_tag() {
        let client_id = Uuid::new_v4();
        let json = serde_json::to_value(BusEvent::ClientReconciled { client_id }).unwrap();
        assert_eq!(json["topic"], "client-reconciled");
        assert_eq!(json["client_id"], client_id.to_string());
    }
}
