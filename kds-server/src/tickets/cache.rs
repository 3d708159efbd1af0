//! TicketCache - in-memory projection of live kitchen tickets
//!
//! The authoritative read path for dashboards and the fan-out source for
//! the ticket stream server. Two writers feed it: the ingest worker (direct
//! sets after storage writes) and the `cache-replay` durable consumer on
//! `kitchen.tickets`. Both apply records through [`TicketCache::apply`],
//! which is idempotent: last-writer-wins by `updated_at`, a tie goes to the
//! incoming record, and re-applying an identical record is a no-op that
//! emits no change.
//!
//! Readers take the shared lock and copy out; writers take the exclusive
//! lock, complete in O(1) against the primary map, and emit the change
//! notification while still holding the lock so notifications observe
//! apply order. The notification channel is a tokio broadcast — sending
//! never blocks, so the cache never waits on the stream server.

use crate::db::repository::{self, RepoResult};
use crate::stream::StationFilter;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use shared::{Ticket, TicketStatus};
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Change notification capacity. Dispatchers that lag this far behind lose
/// notifications and log it; dashboards recover by resubscribing.
const CHANGE_CHANNEL_CAPACITY: usize = 8192;

/// A write applied to the cache
#[derive(Debug, Clone)]
pub struct CacheChange {
    pub ticket: Ticket,
    /// Status before the write; `None` means the ticket is new to the cache
    pub previous_status: Option<TicketStatus>,
}

#[derive(Default)]
struct CacheInner {
    tickets: HashMap<Uuid, Ticket>,
    /// Per-station ordering index for list queries, keyed by creation time
    by_station: HashMap<String, BTreeSet<(DateTime<Utc>, Uuid)>>,
}

impl CacheInner {
    fn index_insert(&mut self, ticket: &Ticket) {
        self.by_station
            .entry(ticket.station_id.clone())
            .or_default()
            .insert((ticket.created_at, ticket.id));
    }

    fn index_remove(&mut self, ticket: &Ticket) {
        if let Some(set) = self.by_station.get_mut(&ticket.station_id) {
            set.remove(&(ticket.created_at, ticket.id));
            if set.is_empty() {
                self.by_station.remove(&ticket.station_id);
            }
        }
    }

    fn insert(&mut self, ticket: Ticket) {
        if let Some(old) = self.tickets.insert(ticket.id, ticket.clone()) {
            self.index_remove(&old);
        }
        self.index_insert(&ticket);
    }

    fn collect(&self, filter: &StationFilter) -> Vec<Ticket> {
        match filter {
            StationFilter::All => {
                let mut tickets: Vec<Ticket> = self.tickets.values().cloned().collect();
                tickets.sort_by_key(|t| (t.created_at, t.id));
                tickets
            }
            StationFilter::Station(station) => self
                .by_station
                .get(station)
                .map(|set| {
                    set.iter()
                        .filter_map(|(_, id)| self.tickets.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

pub struct TicketCache {
    inner: RwLock<CacheInner>,
    change_tx: broadcast::Sender<CacheChange>,
}

impl TicketCache {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(CacheInner::default()),
            change_tx,
        }
    }

    /// Subscribe to change notifications
    pub fn subscribe_changes(&self) -> broadcast::Receiver<CacheChange> {
        self.change_tx.subscribe()
    }

    /// Load all non-terminal tickets from the store. Called once on start,
    /// before the stream servers accept subscribers; emits no changes.
    pub async fn warm(&self, pool: &SqlitePool) -> RepoResult<usize> {
        let tickets = repository::ticket::list_non_terminal(pool).await?;
        let count = tickets.len();
        let mut inner = self.inner.write();
        for ticket in tickets {
            inner.insert(ticket);
        }
        Ok(count)
    }

    /// Apply a ticket record. Returns whether the write landed.
    pub fn apply(&self, ticket: Ticket) -> bool {
        let mut inner = self.inner.write();
        let previous_status = match inner.tickets.get(&ticket.id) {
            Some(existing) if existing.updated_at > ticket.updated_at => {
                tracing::debug!(ticket = %ticket.id, "Stale cache write ignored");
                return false;
            }
            // Idempotent re-application of the same record
            Some(existing) if *existing == ticket => return false,
            Some(existing) => Some(existing.status),
            None => None,
        };
        inner.insert(ticket.clone());
        // Send while holding the lock so notification order follows apply
        // order; broadcast::send never blocks.
        let _ = self.change_tx.send(CacheChange {
            ticket,
            previous_status,
        });
        true
    }

    pub fn get(&self, id: Uuid) -> Option<Ticket> {
        self.inner.read().tickets.get(&id).cloned()
    }

    /// Copy out the tickets matching a filter, ordered by creation time
    pub fn list(&self, filter: &StationFilter) -> Vec<Ticket> {
        self.inner.read().collect(filter)
    }

    /// Capture a snapshot and run `f` while still holding the shared lock.
    ///
    /// The stream server registers its subscriber inside `f`: any write
    /// that misses the snapshot must wait for the exclusive lock and is
    /// therefore dispatched to the already-registered subscriber. The
    /// subscriber may see a change twice, never not at all.
    pub fn with_snapshot<R>(
        &self,
        filter: &StationFilter,
        f: impl FnOnce() -> R,
    ) -> (Vec<Ticket>, R) {
        let inner = self.inner.read();
        let snapshot = inner.collect(filter);
        let result = f();
        (snapshot, result)
    }

    /// Remove one entry without emitting a change (seed cleanup)
    pub fn remove(&self, id: Uuid) -> Option<Ticket> {
        let mut inner = self.inner.write();
        let removed = inner.tickets.remove(&id);
        if let Some(ticket) = &removed {
            inner.index_remove(ticket);
        }
        removed
    }

    /// Drop terminal tickets whose terminal timestamp is older than the
    /// retention window. Returns the number evicted.
    pub fn evict_terminal(&self, retention: Duration) -> usize {
        let cutoff = shared::util::now()
            - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
        let mut inner = self.inner.write();
        let expired: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.terminal_at().is_some_and(|at| at <= cutoff))
            .cloned()
            .collect();
        for ticket in &expired {
            inner.tickets.remove(&ticket.id);
            inner.index_remove(ticket);
        }
        expired.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.tickets.clear();
        inner.by_station.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().tickets.is_empty()
    }
}

impl Default for TicketCache {
    fn default() -> Self {
        Self::new()
    }
}
