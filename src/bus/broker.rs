//! Publish/subscribe broker
//!
//! Delivery within a topic follows subscription order; ordering across
//! topics is unspecified. `publish` returns once the event is enqueued to
//! every live subscriber; it never waits for handlers to run, so a slow
//! consumer cannot stall a producer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::event::{BusEvent, Payload, Topic};

/// A subscriber's receiving end for one topic.
///
/// Dropping the subscription unsubscribes; the broker prunes the closed
/// channel on the next publish to that topic, so dropping mid-dispatch
/// is safe.
pub struct Subscription {
    topic: Topic,
    id: u64,
    rx: mpsc::UnboundedReceiver<BusEvent>,
}

impl Subscription {
    /// Receive the next event on this topic. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        self.rx.try_recv().ok()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Slot {
    id: u64,
    tx: mpsc::UnboundedSender<BusEvent>,
}

/// The event bus. Cheap to share behind an `Arc`.
pub struct EventBus {
    subscribers: Mutex<HashMap<Topic, Vec<Slot>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber for one topic.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subs = self.subscribers.lock().unwrap();
        subs.entry(topic).or_default().push(Slot { id, tx });
        debug!(?topic, id, "subscriber registered");

        Subscription { topic, id, rx }
    }

    /// Publish an event to every subscriber of its topic.
    ///
    /// A closed subscriber is logged and pruned; it never stops delivery
    /// to the remaining subscribers.
    pub fn publish(&self, payload: Payload) {
        let topic = payload.topic();
        let event = BusEvent::new(payload);

        let mut subs = self.subscribers.lock().unwrap();
        let Some(slots) = subs.get_mut(&topic) else {
            debug!(?topic, "published with no subscribers");
            return;
        };

        slots.retain(|slot| {
            if slot.tx.send(event.clone()).is_err() {
                warn!(?topic, id = slot.id, "dropping dead subscriber");
                false
            } else {
                true
            }
        });
    }

    /// Number of live subscribers on a topic. Used in tests and status
    /// reporting.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(&topic)
            .map_or(0, |slots| slots.len())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers_in_order() {
        let bus = EventBus::new();
        let mut first = bus.subscribe(Topic::ModeChanged);
        let mut second = bus.subscribe(Topic::ModeChanged);

        bus.publish(Payload::ModeChanged {
            mode: Mode::Listening,
        });

        for sub in [&mut first, &mut second] {
            let event = sub.recv().await.unwrap();
            assert!(matches!(
                event.payload,
                Payload::ModeChanged {
                    mode: Mode::Listening
                }
            ));
        }
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = EventBus::new();
        let mut changed = bus.subscribe(Topic::ModeChanged);
        let mut started = bus.subscribe(Topic::SessionStarted);

        bus.publish(Payload::SessionStarted {
            session_id: "s1".into(),
        });

        let event = started.recv().await.unwrap();
        assert!(matches!(event.payload, Payload::SessionStarted { .. }));

        // Nothing was published on ModeChanged.
        assert!(tokio::time::timeout(
            std::time::Duration::from_millis(20),
            changed.recv()
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_dead_subscriber_does_not_stop_delivery() {
        let bus = EventBus::new();
        let dropped = bus.subscribe(Topic::ModeChanged);
        let mut live = bus.subscribe(Topic::ModeChanged);
        drop(dropped);

        bus.publish(Payload::ModeChanged { mode: Mode::Idle });

        let event = live.recv().await.unwrap();
        assert!(matches!(event.payload, Payload::ModeChanged { .. }));
        assert_eq!(bus.subscriber_count(Topic::ModeChanged), 1);
    }

    #[tokio::test]
    async fn test_publication_order_preserved_per_subscriber() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Topic::ModeChanged);

        bus.publish(Payload::ModeChanged {
            mode: Mode::Listening,
        });
        bus.publish(Payload::ModeChanged { mode: Mode::Idle });

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert!(matches!(
            first.payload,
            Payload::ModeChanged {
                mode: Mode::Listening
            }
        ));
        assert!(matches!(
            second.payload,
            Payload::ModeChanged { mode: Mode::Idle }
        ));
    }
}
