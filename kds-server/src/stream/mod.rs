//! Subscriber fan-out plumbing shared by the ticket and order-item stream
//! servers
//!
//! ```text
//!                    ┌────────────────────────────┐
//!  change channel ──►│ dispatcher (one task)      │
//!                    │   read-lock registry       │
//!                    │   try_send per subscriber  │──► mpsc(B) ──► writer task
//!                    └────────────────────────────┘──► mpsc(B) ──► writer task
//! ```
//!
//! Every subscription owns a bounded buffer. A full buffer drops the new
//! event for that subscriber only and bumps its drop counter; the
//! publishing path never blocks on a slow consumer.

pub mod tcp_server;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Default per-subscriber buffer capacity
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 100;

/// Station selector for a subscription
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationFilter {
    #[default]
    All,
    Station(String),
}

impl StationFilter {
    pub fn from_station(station: Option<String>) -> Self {
        match station {
            Some(s) => StationFilter::Station(s),
            None => StationFilter::All,
        }
    }

    pub fn station(&self) -> Option<&str> {
        match self {
            StationFilter::All => None,
            StationFilter::Station(s) => Some(s),
        }
    }

    /// Whether an event tagged with `station` passes this filter.
    /// Events without a station only reach unfiltered subscribers.
    pub fn matches(&self, station: Option<&str>) -> bool {
        match self {
            StationFilter::All => true,
            StationFilter::Station(wanted) => station == Some(wanted.as_str()),
        }
    }
}

/// An event that can be routed by station
pub trait StreamEvent: Clone + Send + Sync + 'static {
    fn station_id(&self) -> Option<&str>;
}

impl StreamEvent for shared::TicketEvent {
    fn station_id(&self) -> Option<&str> {
        Some(&self.station_id)
    }
}

impl StreamEvent for shared::OrderItemEvent {
    fn station_id(&self) -> Option<&str> {
        self.station_id.as_deref()
    }
}

struct SubscriberEntry<E> {
    filter: StationFilter,
    tx: mpsc::Sender<E>,
    dropped: Arc<AtomicU64>,
}

struct HubShared<E> {
    /// Hub name for log lines
    name: &'static str,
    buffer: usize,
    subscribers: RwLock<HashMap<u64, SubscriberEntry<E>>>,
    next_id: AtomicU64,
    dropped_total: AtomicU64,
}

impl<E> HubShared<E> {
    fn unsubscribe(&self, id: u64) {
        if self.subscribers.write().remove(&id).is_some() {
            tracing::debug!(hub = self.name, subscriber = id, "Unsubscribed");
        }
    }
}

/// Multiplexer from one publisher to many bounded subscribers
pub struct SubscriberHub<E> {
    inner: Arc<HubShared<E>>,
}

impl<E> Clone for SubscriberHub<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: StreamEvent> SubscriberHub<E> {
    pub fn new(name: &'static str, buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubShared {
                name,
                buffer,
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                dropped_total: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber. The returned subscription unsubscribes on drop.
    pub fn subscribe(&self, filter: StationFilter) -> Subscription<E> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let dropped = Arc::new(AtomicU64::new(0));
        self.inner.subscribers.write().insert(
            id,
            SubscriberEntry {
                filter,
                tx,
                dropped: dropped.clone(),
            },
        );
        tracing::debug!(hub = self.inner.name, subscriber = id, "Subscribed");
        Subscription {
            id,
            rx,
            dropped,
            hub: self.inner.clone(),
        }
    }

    /// Deposit an event into every matching subscriber buffer without
    /// blocking. Full buffers drop the event for that subscriber only.
    pub fn publish(&self, event: &E) {
        let mut stale: Vec<u64> = Vec::new();
        {
            let subscribers = self.inner.subscribers.read();
            for (id, entry) in subscribers.iter() {
                if !entry.filter.matches(event.station_id()) {
                    continue;
                }
                match entry.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        let count = entry.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        self.inner.dropped_total.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            hub = self.inner.name,
                            subscriber = *id,
                            dropped = count,
                            "Subscriber buffer full, event dropped"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        stale.push(*id);
                    }
                }
            }
        }
        // Receivers that went away are pruned outside the read lock
        if !stale.is_empty() {
            let mut subscribers = self.inner.subscribers.write();
            for id in stale {
                subscribers.remove(&id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Events dropped across all subscribers since start
    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped_total.load(Ordering::Relaxed)
    }
}

/// A live subscription handle
///
/// Holds the receiving end of the bounded buffer. Dropping the handle
/// unsubscribes and discards any buffered events.
pub struct Subscription<E> {
    id: u64,
    rx: mpsc::Receiver<E>,
    dropped: Arc<AtomicU64>,
    hub: Arc<HubShared<E>>,
}

impl<E> Subscription<E> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Events dropped for this subscriber because its buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<E, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Ticket, TicketEvent};
    use uuid::Uuid;

    fn event(station: &str) -> TicketEvent {
        let ticket = Ticket::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            station,
            "Dish",
            shared::ticket::station_display_name(station),
            None,
            1,
            None,
        );
        TicketEvent::created(&ticket)
    }

    #[tokio::test]
    async fn station_filter_routes_events() {
        let hub: SubscriberHub<TicketEvent> = SubscriberHub::new("test", 16);
        let mut all = hub.subscribe(StationFilter::All);
        let mut bar = hub.subscribe(StationFilter::Station("bar".to_string()));

        hub.publish(&event("kitchen"));
        hub.publish(&event("bar"));

        assert_eq!(all.recv().await.unwrap().station_id, "kitchen");
        assert_eq!(all.recv().await.unwrap().station_id, "bar");
        assert_eq!(bar.recv().await.unwrap().station_id, "bar");
        assert!(bar.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_drops_do_not_affect_fast_one() {
        let hub: SubscriberHub<TicketEvent> = SubscriberHub::new("test", 2);
        let mut fast = hub.subscribe(StationFilter::All);
        let slow = hub.subscribe(StationFilter::All);

        for _ in 0..5 {
            hub.publish(&event("kitchen"));
            // Keep the fast subscriber's buffer empty
            fast.recv().await.unwrap();
        }

        // Slow subscriber kept its first 2, dropped 3
        assert_eq!(slow.dropped(), 3);
        assert_eq!(hub.dropped_total(), 3);
    }

    #[tokio::test]
    async fn dropping_a_subscription_unsubscribes() {
        let hub: SubscriberHub<TicketEvent> = SubscriberHub::new("test", 4);
        let sub = hub.subscribe(StationFilter::All);
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);

        // Publishing with no subscribers is a no-op
        hub.publish(&event("kitchen"));
        assert_eq!(hub.dropped_total(), 0);
    }

    #[test]
    fn filter_matching_rules() {
        let all = StationFilter::All;
        let bar = StationFilter::Station("bar".to_string());
        assert!(all.matches(Some("bar")));
        assert!(all.matches(None));
        assert!(bar.matches(Some("bar")));
        assert!(!bar.matches(Some("kitchen")));
        assert!(!bar.matches(None));
    }
}
