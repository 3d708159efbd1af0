//! TicketStreamServer - multiplexes cache changes to dashboard subscribers
//!
//! Each subscription receives a synthetic snapshot of the current cache
//! contents (as *created* events, ordered by creation time) followed by
//! deltas in arrival order. The snapshot is captured under the cache's
//! shared lock while the subscriber registers in the hub, so a concurrent
//! write is either in the snapshot or dispatched as a delta - possibly
//! both, never neither.

use crate::stream::{StationFilter, SubscriberHub, Subscription};
use crate::tickets::cache::{CacheChange, TicketCache};
use shared::TicketEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub struct TicketSubscription {
    /// Current matching cache contents as synthetic *created* events
    pub snapshot: Vec<TicketEvent>,
    pub deltas: Subscription<TicketEvent>,
}

pub struct TicketStreamServer {
    cache: Arc<TicketCache>,
    hub: SubscriberHub<TicketEvent>,
}

impl TicketStreamServer {
    pub fn new(cache: Arc<TicketCache>, buffer: usize) -> Self {
        Self {
            cache,
            hub: SubscriberHub::new("tickets", buffer),
        }
    }

    pub fn subscribe(&self, filter: StationFilter) -> TicketSubscription {
        let (tickets, deltas) = self
            .cache
            .with_snapshot(&filter, || self.hub.subscribe(filter.clone()));
        let snapshot = tickets.iter().map(TicketEvent::created).collect();
        TicketSubscription { snapshot, deltas }
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    pub fn dropped_total(&self) -> u64 {
        self.hub.dropped_total()
    }

    /// Dispatcher: drains cache change notifications into subscriber
    /// buffers. A *created* notification becomes a *created* wire event,
    /// anything else a *status_changed* with the previous status copied
    /// from the notification.
    pub async fn run_dispatcher(
        &self,
        mut changes: broadcast::Receiver<CacheChange>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("Ticket stream dispatcher started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Ticket stream dispatcher received shutdown signal");
                    break;
                }
                change = changes.recv() => {
                    match change {
                        Ok(change) => {
                            let event = match change.previous_status {
                                None => TicketEvent::created(&change.ticket),
                                Some(previous) => {
                                    TicketEvent::status_changed(&change.ticket, previous, None)
                                }
                            };
                            self.hub.publish(&event);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            // Subscribers lose deltas; they recover by
                            // resubscribing for a fresh snapshot.
                            tracing::error!(
                                skipped = n,
                                "Ticket dispatcher lagged behind cache changes"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Cache change channel closed, dispatcher stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Ticket, TicketStatus};
    use uuid::Uuid;

    fn ticket(station: &str) -> Ticket {
        Ticket::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            station,
            "Dish",
            shared::ticket::station_display_name(station),
            None,
            1,
            None,
        )
    }

    #[tokio::test]
    async fn snapshot_then_deltas() {
        let cache = Arc::new(TicketCache::new());
        let server = Arc::new(TicketStreamServer::new(cache.clone(), 16));
        let shutdown = CancellationToken::new();

        let existing = ticket("kitchen");
        cache.apply(existing.clone());

        let dispatcher = server.clone();
        let changes = cache.subscribe_changes();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            dispatcher.run_dispatcher(changes, token).await;
        });

        let mut sub = server.subscribe(StationFilter::All);
        assert_eq!(sub.snapshot.len(), 1);
        assert_eq!(sub.snapshot[0].ticket_id, existing.id);
        assert!(sub.snapshot[0].is_created());

        // A post-subscribe write arrives as a delta
        let mut t = existing.clone();
        t.transition(
            TicketStatus::Started,
            t.updated_at + chrono::Duration::seconds(1),
        )
        .unwrap();
        cache.apply(t);

        let delta = tokio::time::timeout(std::time::Duration::from_secs(2), sub.deltas.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!delta.is_created());
        assert_eq!(delta.status(), TicketStatus::Started);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn station_filter_narrows_snapshot() {
        let cache = Arc::new(TicketCache::new());
        let server = TicketStreamServer::new(cache.clone(), 16);

        cache.apply(ticket("kitchen"));
        cache.apply(ticket("bar"));

        let sub = server.subscribe(StationFilter::Station("bar".to_string()));
        assert_eq!(sub.snapshot.len(), 1);
        assert_eq!(sub.snapshot[0].station_id, "bar");
    }
}
