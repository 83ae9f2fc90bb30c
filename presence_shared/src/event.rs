//! Event and messaging system.
//!
//! A small owned publish/subscribe bus. Publishers hold the [`EventBus`];
//! each consumer holds a [`Subscription`] and unsubscribes by dropping it.
//! The bus outlives any single consumer, so a long-lived network session
//! can keep one subscription while publishers come and go.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// Default number of undelivered events retained per subscriber.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Typed broadcast bus.
///
/// A subscriber that falls behind skips the oldest events and keeps the
/// newest ones, so the most recent event is always delivered.
#[derive(Debug, Clone)]
pub struct EventBus<E: Clone> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event. Returns how many subscribers will see it;
    /// publishing with no subscribers is not an error.
    pub fn publish(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription<E> {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// One consumer's view of an [`EventBus`].
#[derive(Debug)]
pub struct Subscription<E: Clone> {
    rx: broadcast::Receiver<E>,
}

impl<E: Clone> Subscription<E> {
    /// Waits for the next event. `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Bus subscriber lagged; skipping to newest events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Bus subscriber lagged; skipping to newest events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_each_event() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.publish(7u32), 2);
        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = EventBus::<u32>::new(8);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(1), 0);
    }

    #[test]
    fn lagging_subscriber_keeps_newest() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..10u32 {
            bus.publish(i);
        }
        let mut seen = Vec::new();
        while let Some(e) = sub.try_recv() {
            seen.push(e);
        }
        assert_eq!(seen.last(), Some(&9));
        assert!(seen.len() <= 2);
    }

    #[tokio::test]
    async fn recv_ends_when_bus_dropped() {
        let bus = EventBus::<u32>::new(4);
        let mut sub = bus.subscribe();
        drop(bus);
        assert_eq!(sub.recv().await, None);
    }
}
