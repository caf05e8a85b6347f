//! Broadcast bus for routing events.
//!
//! Built on `tokio::sync::broadcast`: publishers never wait for
//! subscribers, each subscriber has its own bounded queue, and a
//! subscriber that falls behind is skipped forward rather than holding
//! up delivery to anyone else.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::event::Event;

/// Default per-subscriber queue depth.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Fan-out bus for [`Event`]s.
///
/// Cloning is cheap; all clones publish into the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Create a bus with a custom per-subscriber queue depth.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast an event to all current subscribers.
    ///
    /// Best-effort: with no subscribers the event is dropped.
    pub fn publish(&self, event: Event) {
        debug!(message = %event.message, "Broadcasting event");
        if self.tx.send(event).is_err() {
            debug!("No event subscribers, event dropped");
        }
    }

    /// Subscribe to all events broadcast after this call.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of a subscription.
///
/// Events arrive in publish order. If the subscriber lags past its queue
/// depth the oldest events are dropped and reception resumes from the
/// oldest retained event.
pub struct EventSubscriber {
    rx: broadcast::Receiver<Event>,
}

impl EventSubscriber {
    /// Wait for the next event.
    ///
    /// Returns `None` once the bus has been dropped and all queued
    /// events have been consumed.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll for an already-queued event.
    pub fn try_next(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivery_is_fifo_per_subscriber() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        bus.publish(Event::new("first"));
        bus.publish(Event::new("second"));
        bus.publish(Event::new("third"));

        assert_eq!(sub.next().await.unwrap().message, "first");
        assert_eq!(sub.next().await.unwrap().message, "second");
        assert_eq!(sub.next().await.unwrap().message, "third");
    }

    #[tokio::test]
    async fn all_subscribers_receive_broadcasts() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(Event::new("hello"));

        assert_eq!(a.next().await.unwrap().message, "hello");
        assert_eq!(b.next().await.unwrap().message, "hello");
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::new("into the void"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_forward_without_blocking() {
        let bus = EventBus::with_capacity(4);
        let mut slow = bus.subscribe();
        let mut fast = bus.subscribe();

        for i in 0..10 {
            bus.publish(Event::new(format!("event-{}", i)));
        }

        // The fast subscriber drains immediately and still sees the tail.
        let mut fast_seen = Vec::new();
        while let Some(event) = fast.try_next() {
            fast_seen.push(event.message);
        }
        assert_eq!(fast_seen.last().unwrap(), "event-9");

        // The slow subscriber lost the head but resumes in order.
        let first = slow.next().await.unwrap();
        let second = slow.next().await.unwrap();
        assert!(first.message < second.message);
        assert!(slow.try_next().is_some());
    }

    #[tokio::test]
    async fn subscriber_sees_only_events_after_subscribe() {
        let bus = EventBus::new();
        bus.publish(Event::new("before"));

        let mut sub = bus.subscribe();
        bus.publish(Event::new("after"));

        assert_eq!(sub.next().await.unwrap().message, "after");
        assert!(sub.try_next().is_none());
    }
}
