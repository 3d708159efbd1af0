//! Event bus: persistent streams with durable consumers, plus ephemeral
//! pub/sub subjects
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        EventBus                          │
//! │  ┌─────────────────────────┐  ┌───────────────────────┐  │
//! │  │ StreamLog (redb)        │  │ ephemeral subjects    │  │
//! │  │  orders.items           │  │  tables.status        │  │
//! │  │  kitchen.tickets        │  │  tables.intent        │  │
//! │  │  + consumer positions   │  │  (tokio broadcast)    │  │
//! │  └─────────────────────────┘  └───────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Persistent streams give at-least-once delivery: a durable consumer is a
//! named position on the log; `next()` re-returns the first message past
//! that position until it is acknowledged. Two consumers on the same stream
//! (cache replay and the status reflector both read `kitchen.tickets`)
//! track positions independently and must not share a consumer name.
//!
//! Ephemeral subjects are lossy tokio broadcast channels with no position
//! tracking; a subscriber that joins late or lags simply misses messages.

pub mod log;

pub use log::{LogError, StreamLog};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;

// ========== Stream and subject names ==========

/// Order-item lifecycle events (persistent)
pub const ORDERS_ITEMS: &str = "orders.items";
/// Ticket lifecycle events (persistent)
pub const KITCHEN_TICKETS: &str = "kitchen.tickets";
/// Table state notifications (ephemeral)
pub const TABLES_STATUS: &str = "tables.status";
/// Table intent negotiation (ephemeral, adjacent subsystems)
pub const TABLES_INTENT: &str = "tables.intent";
/// Order/table assignment chatter (ephemeral, adjacent subsystems)
pub const ORDERS_TABLES: &str = "orders.tables";

/// Buffer of each ephemeral subject channel
const EPHEMERAL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Log error: {0}")]
    Log(#[from] LogError),

    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type BusResult<T> = Result<T, BusError>;

/// A message delivered from a persistent stream
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub stream: &'static str,
    pub seq: u64,
    pub published_at: DateTime<Utc>,
    payload: Vec<u8>,
}

impl BusMessage {
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Unified event bus handle, cheap to clone
#[derive(Clone)]
pub struct EventBus {
    log: StreamLog,
    notifiers: Arc<DashMap<String, Arc<Notify>>>,
    ephemeral: Arc<DashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl EventBus {
    pub fn new(log: StreamLog) -> Self {
        Self {
            log,
            notifiers: Arc::new(DashMap::new()),
            ephemeral: Arc::new(DashMap::new()),
        }
    }

    /// Open the bus at the given log path
    pub fn open(path: impl AsRef<std::path::Path>) -> BusResult<Self> {
        Ok(Self::new(StreamLog::open(path)?))
    }

    #[cfg(test)]
    pub fn open_in_memory() -> BusResult<Self> {
        Ok(Self::new(StreamLog::open_in_memory()?))
    }

    fn notifier(&self, stream: &str) -> Arc<Notify> {
        self.notifiers
            .entry(stream.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .value()
            .clone()
    }

    // ========== Persistent streams ==========

    /// Append a message to a persistent stream and wake its consumers
    pub fn publish<T: Serialize>(&self, stream: &'static str, message: &T) -> BusResult<u64> {
        let payload = serde_json::to_vec(message)?;
        let seq = self
            .log
            .append(stream, &payload, shared::util::now_millis())?;
        self.notifier(stream).notify_waiters();
        tracing::trace!(stream, seq, "Published to stream");
        Ok(seq)
    }

    /// Create a durable consumer on a persistent stream
    ///
    /// The position is registered immediately so the retention sweep never
    /// deletes messages a known consumer has not acknowledged.
    pub fn durable_consumer(
        &self,
        stream: &'static str,
        name: &str,
    ) -> BusResult<DurableConsumer> {
        let pos = self.log.register_consumer(stream, name)?;
        tracing::info!(stream, consumer = name, pos, "Durable consumer attached");
        Ok(DurableConsumer {
            bus: self.clone(),
            stream,
            name: name.to_string(),
        })
    }

    /// Remove stream messages older than `retention` that every registered
    /// consumer has acknowledged. Returns the number of messages removed.
    pub fn sweep_retention(&self, retention: Duration) -> BusResult<u64> {
        let cutoff = shared::util::now_millis() - retention.as_millis() as i64;
        let mut removed = 0;
        for stream in self.log.streams()? {
            let keep_floor = self
                .log
                .consumers_of(&stream)?
                .into_iter()
                .map(|(_, pos)| pos)
                .min()
                .unwrap_or(u64::MAX);
            removed += self.log.sweep(&stream, cutoff, keep_floor)?;
        }
        Ok(removed)
    }

    /// Drop all stream state (admin reset)
    pub fn purge(&self) -> BusResult<()> {
        self.log.purge()?;
        Ok(())
    }

    // ========== Ephemeral subjects ==========

    fn ephemeral_sender(&self, subject: &str) -> broadcast::Sender<Vec<u8>> {
        self.ephemeral
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(EPHEMERAL_CAPACITY).0)
            .value()
            .clone()
    }

    /// Publish on an ephemeral subject. Lossy: subscribers that lag miss
    /// messages, and publishing with no subscribers is a no-op.
    pub fn publish_ephemeral<T: Serialize>(&self, subject: &str, message: &T) -> BusResult<()> {
        let payload = serde_json::to_vec(message)?;
        // An Err here only means nobody is listening
        let _ = self.ephemeral_sender(subject).send(payload);
        Ok(())
    }

    pub fn subscribe_ephemeral(&self, subject: &str) -> broadcast::Receiver<Vec<u8>> {
        self.ephemeral_sender(subject).subscribe()
    }
}

/// A named position on a persistent stream
///
/// `next()` always returns the first message past the acknowledged
/// position, so a message that was delivered but never acked is delivered
/// again — the caller decides when a message is done by calling `ack`.
pub struct DurableConsumer {
    bus: EventBus,
    stream: &'static str,
    name: String,
}

impl DurableConsumer {
    pub fn stream(&self) -> &'static str {
        self.stream
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> BusResult<Option<BusMessage>> {
        let pos = self.bus.log.consumer_pos(self.stream, &self.name)?;
        let stored = self.bus.log.read_after(self.stream, pos)?;
        Ok(stored.map(|m| BusMessage {
            stream: self.stream,
            seq: m.seq,
            published_at: DateTime::<Utc>::from_timestamp_millis(m.published_at)
                .unwrap_or_else(Utc::now),
            payload: m.payload,
        }))
    }

    /// Wait for the next unacknowledged message. Returns `None` when the
    /// shutdown token fires first.
    pub async fn next(&self, shutdown: &CancellationToken) -> BusResult<Option<BusMessage>> {
        let notify = self.bus.notifier(self.stream);
        loop {
            if let Some(msg) = self.fetch()? {
                return Ok(Some(msg));
            }
            // Register for the wakeup before the second emptiness check so
            // a publish between check and await cannot be lost.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(msg) = self.fetch()? {
                return Ok(Some(msg));
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = &mut notified => {}
            }
        }
    }

    /// Acknowledge a message, advancing the durable position
    pub fn ack(&self, seq: u64) -> BusResult<()> {
        self.bus.log.ack(self.stream, &self.name, seq)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered() {
        let bus = EventBus::open_in_memory().unwrap();
        let consumer = bus.durable_consumer(ORDERS_ITEMS, "test").unwrap();
        let shutdown = CancellationToken::new();

        bus.publish(ORDERS_ITEMS, &Ping { n: 1 }).unwrap();

        let first = consumer.next(&shutdown).await.unwrap().unwrap();
        assert_eq!(first.decode::<Ping>().unwrap(), Ping { n: 1 });

        // Not acked: the same message comes back
        let again = consumer.next(&shutdown).await.unwrap().unwrap();
        assert_eq!(again.seq, first.seq);

        consumer.ack(first.seq).unwrap();
        bus.publish(ORDERS_ITEMS, &Ping { n: 2 }).unwrap();
        let second = consumer.next(&shutdown).await.unwrap().unwrap();
        assert_eq!(second.decode::<Ping>().unwrap(), Ping { n: 2 });
    }

    #[tokio::test]
    async fn consumers_track_positions_independently() {
        let bus = EventBus::open_in_memory().unwrap();
        let replay = bus.durable_consumer(KITCHEN_TICKETS, "cache-replay").unwrap();
        let reflect = bus.durable_consumer(KITCHEN_TICKETS, "order-reflect").unwrap();
        let shutdown = CancellationToken::new();

        bus.publish(KITCHEN_TICKETS, &Ping { n: 7 }).unwrap();

        let a = replay.next(&shutdown).await.unwrap().unwrap();
        replay.ack(a.seq).unwrap();

        // The second consumer still sees the message
        let b = reflect.next(&shutdown).await.unwrap().unwrap();
        assert_eq!(b.seq, a.seq);
    }

    #[tokio::test]
    async fn next_wakes_on_publish() {
        let bus = EventBus::open_in_memory().unwrap();
        let consumer = bus.durable_consumer(ORDERS_ITEMS, "waker").unwrap();
        let shutdown = CancellationToken::new();

        let publisher = bus.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(ORDERS_ITEMS, &Ping { n: 3 }).unwrap();
        });

        let msg = tokio::time::timeout(Duration::from_secs(2), consumer.next(&shutdown))
            .await
            .expect("consumer should wake")
            .unwrap()
            .unwrap();
        assert_eq!(msg.decode::<Ping>().unwrap(), Ping { n: 3 });
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn next_returns_none_on_shutdown() {
        let bus = EventBus::open_in_memory().unwrap();
        let consumer = bus.durable_consumer(ORDERS_ITEMS, "idle").unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert!(consumer.next(&shutdown).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retention_keeps_unacked_messages() {
        let bus = EventBus::open_in_memory().unwrap();
        let consumer = bus.durable_consumer(ORDERS_ITEMS, "slow").unwrap();
        let shutdown = CancellationToken::new();

        bus.publish(ORDERS_ITEMS, &Ping { n: 1 }).unwrap();
        bus.publish(ORDERS_ITEMS, &Ping { n: 2 }).unwrap();
        // Make the messages strictly older than the sweep cutoff
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Zero retention would delete everything by age, but nothing is
        // acked yet so both survive.
        assert_eq!(bus.sweep_retention(Duration::ZERO).unwrap(), 0);

        let msg = consumer.next(&shutdown).await.unwrap().unwrap();
        consumer.ack(msg.seq).unwrap();
        assert_eq!(bus.sweep_retention(Duration::ZERO).unwrap(), 1);
    }

    #[tokio::test]
    async fn ephemeral_subjects_fan_out() {
        let bus = EventBus::open_in_memory().unwrap();
        let mut rx1 = bus.subscribe_ephemeral(TABLES_STATUS);
        let mut rx2 = bus.subscribe_ephemeral(TABLES_STATUS);

        bus.publish_ephemeral(TABLES_STATUS, &Ping { n: 9 }).unwrap();

        let a: Ping = serde_json::from_slice(&rx1.recv().await.unwrap()).unwrap();
        let b: Ping = serde_json::from_slice(&rx2.recv().await.unwrap()).unwrap();
        assert_eq!(a, Ping { n: 9 });
        assert_eq!(b, Ping { n: 9 });
    }
}
