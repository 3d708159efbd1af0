//! Read-through table-state cache
//!
//! Fed by the ephemeral `tables.status` subject with last-writer-wins per
//! table. Losing a message only delays convergence until the next status
//! publish for that table.

use crate::bus::{EventBus, TABLES_STATUS};
use dashmap::DashMap;
use shared::{TableStatus, TableStatusEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct TableStatusCache {
    tables: DashMap<String, TableStatusEvent>,
}

impl TableStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-writer-wins per table by `occurred_at`
    pub fn apply(&self, event: TableStatusEvent) -> bool {
        match self.tables.entry(event.table_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().occurred_at > event.occurred_at {
                    return false;
                }
                occupied.insert(event);
                true
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(event);
                true
            }
        }
    }

    pub fn get(&self, table_id: &str) -> Option<TableStatus> {
        self.tables.get(table_id).map(|e| e.status)
    }

    pub fn all(&self) -> Vec<TableStatusEvent> {
        let mut entries: Vec<TableStatusEvent> =
            self.tables.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.table_id.cmp(&b.table_id));
        entries
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Listener task: ephemeral subject → cache
pub async fn run_table_status_listener(
    cache: Arc<TableStatusCache>,
    bus: EventBus,
    shutdown: CancellationToken,
) {
    let mut rx = bus.subscribe_ephemeral(TABLES_STATUS);
    tracing::info!("Table status listener started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = rx.recv() => {
                match msg {
                    Ok(payload) => match serde_json::from_slice::<TableStatusEvent>(&payload) {
                        Ok(event) => {
                            cache.apply(event);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Undecodable table status message");
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Ephemeral subject; later statuses overwrite anyway
                        tracing::warn!(skipped = n, "Table status listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    tracing::info!("Table status listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_writer_wins_per_table() {
        let cache = TableStatusCache::new();
        let newer = TableStatusEvent::new("T1", TableStatus::Occupied);
        let mut older = TableStatusEvent::new("T1", TableStatus::Available);
        older.occurred_at = newer.occurred_at - chrono::Duration::seconds(5);

        assert!(cache.apply(newer));
        assert!(!cache.apply(older));
        assert_eq!(cache.get("T1"), Some(TableStatus::Occupied));
    }

    #[tokio::test]
    async fn listener_applies_published_statuses() {
        let bus = EventBus::open_in_memory().unwrap();
        let cache = Arc::new(TableStatusCache::new());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(run_table_status_listener(
            cache.clone(),
            bus.clone(),
            shutdown.clone(),
        ));
        // Let the listener subscribe before publishing
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        bus.publish_ephemeral(TABLES_STATUS, &TableStatusEvent::new("T2", TableStatus::Reserved))
            .unwrap();

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while cache.get("T2").is_none() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(cache.get("T2"), Some(TableStatus::Reserved));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
