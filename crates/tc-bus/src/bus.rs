//! Topic registry with non-blocking fan-out.
//!
//! Each subscription owns a bounded `mpsc` channel. `publish` offers the
//! payload to every subscriber of the topic with `try_send`; a full or
//! closed buffer is skipped and counted, never awaited.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use tc_telemetry::Metrics;

use crate::event::Event;
use crate::topic::Topic;

struct Subscriber<T> {
    id: u64,
    tx: mpsc::Sender<T>,
}

struct Registry<T> {
    topics: RwLock<HashMap<Topic, Vec<Subscriber<T>>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl<T> Registry<T> {
    fn remove(&self, topic: Topic, id: u64) -> bool {
        let mut topics = self.topics.write();
        let Some(subs) = topics.get_mut(&topic) else {
            return false;
        };
        let before = subs.len();
        // Dropping the sender closes the channel once no publish holds a clone.
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            topics.remove(&topic);
        }
        removed
    }
}

/// In-process publish/subscribe broker.
///
/// Cheap to clone; all clones share one registry.
pub struct EventBus<T = Event> {
    inner: Arc<Registry<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for EventBus<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.inner.topics.read();
        f.debug_struct("EventBus")
            .field("topics", &topics.len())
            .field("dropped", &self.inner.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> EventBus<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Registry {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new subscriber on `topic` with a buffer of `buffer` payloads.
    ///
    /// A zero buffer is raised to one. The returned handle removes exactly
    /// this subscription and closes its channel.
    pub fn subscribe(&self, topic: Topic, buffer: usize) -> (mpsc::Receiver<T>, Unsubscribe<T>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .topics
            .write()
            .entry(topic)
            .or_default()
            .push(Subscriber { id, tx });

        debug!(%topic, id, buffer, "Subscribed");

        let handle = Unsubscribe {
            registry: Arc::downgrade(&self.inner),
            topic,
            id,
        };
        (rx, handle)
    }

    /// Offer `payload` to every current subscriber of `topic`.
    ///
    /// Never blocks. Returns the number of subscribers that accepted it.
    pub fn publish(&self, topic: Topic, payload: T) -> usize {
        let mut delivered = 0;
        let mut saw_closed = false;

        {
            let topics = self.inner.topics.read();
            let Some(subs) = topics.get(&topic) else {
                trace!(%topic, "Publish with no subscribers");
                return 0;
            };

            for sub in subs {
                match sub.tx.try_send(payload.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                        Metrics::bus_dropped(topic.as_str());
                        trace!(%topic, id = sub.id, "Subscriber buffer full, dropped");
                    }
                    Err(TrySendError::Closed(_)) => {
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                        Metrics::bus_dropped(topic.as_str());
                        saw_closed = true;
                    }
                }
            }
        }

        Metrics::bus_published(topic.as_str());

        if saw_closed {
            self.prune_closed(topic);
        }
        delivered
    }

    /// Current number of subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .topics
            .read()
            .get(&topic)
            .map_or(0, |subs| subs.len())
    }

    /// Total payloads dropped across all topics since creation.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Remove subscribers whose receiver was dropped without unsubscribing.
    fn prune_closed(&self, topic: Topic) {
        let mut topics = self.inner.topics.write();
        if let Some(subs) = topics.get_mut(&topic) {
            let before = subs.len();
            subs.retain(|s| !s.tx.is_closed());
            let pruned = before - subs.len();
            if pruned > 0 {
                debug!(%topic, pruned, "Pruned closed subscribers");
            }
            if subs.is_empty() {
                topics.remove(&topic);
            }
        }
    }
}

/// Handle that removes one subscription.
///
/// Calling [`Unsubscribe::unsubscribe`] more than once is a no-op, as is
/// calling it after the bus itself was dropped.
#[must_use = "dropping the handle keeps the subscription registered"]
pub struct Unsubscribe<T> {
    registry: Weak<Registry<T>>,
    topic: Topic,
    id: u64,
}

impl<T> Unsubscribe<T> {
    /// Remove the subscription and close its channel.
    ///
    /// Returns `true` only for the call that actually removed it.
    pub fn unsubscribe(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = registry.remove(self.topic, self.id);
        if removed {
            debug!(topic = %self.topic, id = self.id, "Unsubscribed");
        }
        removed
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

impl<T> std::fmt::Debug for Unsubscribe<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PriceTick;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicBool;
    use tc_core::{Price, Symbol};
    use tokio::sync::mpsc::error::TryRecvError;

    fn tick(price: rust_decimal::Decimal) -> Event {
        Event::PriceTick(PriceTick::new(Symbol::new("BTC"), Price::new(price)))
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers_of_topic() {
        let bus: EventBus = EventBus::new();
        let (mut a, _ua) = bus.subscribe(Topic::PriceTick, 4);
        let (mut b, _ub) = bus.subscribe(Topic::PriceTick, 4);

        assert_eq!(bus.publish(Topic::PriceTick, tick(dec!(100))), 2);

        assert_eq!(a.recv().await, Some(tick(dec!(100))));
        assert_eq!(b.recv().await, Some(tick(dec!(100))));
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus: EventBus<u32> = EventBus::new();
        let (mut ticks, _u1) = bus.subscribe(Topic::PriceTick, 4);
        let (mut alerts, _u2) = bus.subscribe(Topic::RiskAlert, 4);

        bus.publish(Topic::RiskAlert, 7);

        assert_eq!(alerts.recv().await, Some(7));
        assert!(ticks.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus: EventBus<u32> = EventBus::new();
        assert_eq!(bus.publish(Topic::OrderFilled, 1), 0);
        assert_eq!(bus.dropped_count(), 0);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_without_blocking() {
        let bus: EventBus<u32> = EventBus::new();
        let (mut rx, _u) = bus.subscribe(Topic::PriceTick, 1);

        assert_eq!(bus.publish(Topic::PriceTick, 1), 1);
        assert_eq!(bus.publish(Topic::PriceTick, 2), 0);
        assert_eq!(bus.dropped_count(), 1);

        assert_eq!(rx.recv().await, Some(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_starve_others() {
        let bus: EventBus<u32> = EventBus::new();
        let (_slow, _u1) = bus.subscribe(Topic::PriceTick, 1);
        let (mut fast, _u2) = bus.subscribe(Topic::PriceTick, 8);

        for i in 0..5 {
            bus.publish(Topic::PriceTick, i);
        }

        for i in 0..5 {
            assert_eq!(fast.recv().await, Some(i));
        }
        assert_eq!(bus.dropped_count(), 4);
    }

    #[test]
    fn test_zero_buffer_is_raised_to_one() {
        let bus: EventBus<u32> = EventBus::new();
        let (mut rx, _u) = bus.subscribe(Topic::PriceTick, 0);

        assert_eq!(bus.publish(Topic::PriceTick, 9), 1);
        assert_eq!(rx.try_recv().ok(), Some(9));
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel_and_is_idempotent() {
        let bus: EventBus<u32> = EventBus::new();
        let (mut rx, handle) = bus.subscribe(Topic::RiskAlert, 4);
        let (mut other, _keep) = bus.subscribe(Topic::RiskAlert, 4);

        assert!(handle.unsubscribe());
        assert!(!handle.unsubscribe());
        assert_eq!(bus.subscriber_count(Topic::RiskAlert), 1);

        assert_eq!(rx.recv().await, None);

        bus.publish(Topic::RiskAlert, 3);
        assert_eq!(other.recv().await, Some(3));
    }

    #[test]
    fn test_unsubscribe_after_bus_dropped() {
        let bus: EventBus<u32> = EventBus::new();
        let (_rx, handle) = bus.subscribe(Topic::PriceTick, 1);
        drop(bus);
        assert!(!handle.unsubscribe());
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let bus: EventBus<u32> = EventBus::new();
        let (rx, _handle) = bus.subscribe(Topic::PositionChange, 2);
        drop(rx);

        assert_eq!(bus.publish(Topic::PositionChange, 1), 0);
        assert_eq!(bus.subscriber_count(Topic::PositionChange), 0);
        assert_eq!(bus.dropped_count(), 1);
    }

    #[test]
    fn test_clones_share_registry() {
        let bus: EventBus<u32> = EventBus::new();
        let clone = bus.clone();
        let (mut rx, _u) = clone.subscribe(Topic::OrderAccepted, 2);

        bus.publish(Topic::OrderAccepted, 5);
        assert_eq!(rx.try_recv().ok(), Some(5));
    }

    #[test]
    fn test_publish_concurrent_with_unsubscribe() {
        let bus: EventBus<u64> = EventBus::new();
        let (mut steady, _keep) = bus.subscribe(Topic::PriceTick, 64);
        let stop = Arc::new(AtomicBool::new(false));

        let publishers: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    let mut n = 0u64;
                    while !stop.load(Ordering::Relaxed) {
                        bus.publish(Topic::PriceTick, n);
                        n += 1;
                    }
                })
            })
            .collect();

        let churners: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let (mut rx, handle) = bus.subscribe(Topic::PriceTick, 8);
                        assert!(handle.unsubscribe());
                        loop {
                            match rx.try_recv() {
                                Ok(_) => continue,
                                Err(e) => {
                                    assert_eq!(e, TryRecvError::Disconnected);
                                    break;
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        for h in churners {
            h.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        for h in publishers {
            h.join().unwrap();
        }

        assert_eq!(bus.subscriber_count(Topic::PriceTick), 1);
        while steady.try_recv().is_ok() {}
        assert_eq!(bus.publish(Topic::PriceTick, u64::MAX), 1);
        assert_eq!(steady.try_recv().ok(), Some(u64::MAX));
    }
}
