//! OrderItemStreamServer - symmetric multiplexer for order-item changes

use crate::db::repository::{self, RepoResult};
use crate::orders::OrderItemChange;
use crate::stream::{StationFilter, SubscriberHub, Subscription};
use shared::OrderItemEvent;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub struct OrderItemSubscription {
    /// Non-terminal items matching the filter, as synthetic *created* events
    pub snapshot: Vec<OrderItemEvent>,
    pub deltas: Subscription<OrderItemEvent>,
}

pub struct OrderItemStreamServer {
    pool: SqlitePool,
    hub: SubscriberHub<OrderItemEvent>,
}

impl OrderItemStreamServer {
    pub fn new(pool: SqlitePool, buffer: usize) -> Self {
        Self {
            pool,
            hub: SubscriberHub::new("order_items", buffer),
        }
    }

    /// Subscribe with a snapshot from the order-item store.
    ///
    /// The hub registration happens before the snapshot query, so a change
    /// racing the query is buffered and delivered after the snapshot;
    /// duplicates are tolerated, losses are not.
    pub async fn subscribe(&self, filter: StationFilter) -> RepoResult<OrderItemSubscription> {
        let deltas = self.hub.subscribe(filter.clone());
        let items = repository::order_item::list_active(&self.pool, filter.station()).await?;
        let snapshot = items.iter().map(OrderItemEvent::created).collect();
        Ok(OrderItemSubscription { snapshot, deltas })
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    pub fn dropped_total(&self) -> u64 {
        self.hub.dropped_total()
    }

    /// Dispatcher: order-item changes (fed by the status reflector) into
    /// subscriber buffers.
    pub async fn run_dispatcher(
        &self,
        mut changes: broadcast::Receiver<OrderItemChange>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("Order-item stream dispatcher started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Order-item stream dispatcher received shutdown signal");
                    break;
                }
                change = changes.recv() => {
                    match change {
                        Ok(change) => {
                            let event = match change.previous_status {
                                None => OrderItemEvent::created(&change.item),
                                Some(previous) => {
                                    OrderItemEvent::status_changed(&change.item, previous)
                                }
                            };
                            self.hub.publish(&event);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::error!(
                                skipped = n,
                                "Order-item dispatcher lagged behind changes"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Order-item change channel closed, dispatcher stopping");
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
    use crate::db::DbService;
    use shared::{OrderItem, OrderItemStatus};
    use std::sync::Arc;
    use uuid::Uuid;

    fn item(station: &str) -> OrderItem {
        let now = shared::util::now();
        OrderItem {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            group_id: None,
            menu_item_id: Uuid::new_v4(),
            name: "Flan".to_string(),
            category: None,
            notes: None,
            price: 4.5,
            quantity: 1,
            requires_production: true,
            station_id: Some(station.to_string()),
            table_label: None,
            status: OrderItemStatus::Pending,
            created_at: now,
            updated_at: now,
            created_by: None,
        }
    }

    #[tokio::test]
    async fn snapshot_comes_from_store_and_deltas_from_channel() {
        let pool = DbService::new(":memory:").await.unwrap().pool;
        let server = Arc::new(OrderItemStreamServer::new(pool.clone(), 16));
        let (change_tx, change_rx) = broadcast::channel(64);
        let shutdown = CancellationToken::new();

        let stored = item("dessert");
        repository::order_item::insert(&pool, &stored).await.unwrap();

        let dispatcher = server.clone();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            dispatcher.run_dispatcher(change_rx, token).await;
        });

        let mut sub = server.subscribe(StationFilter::All).await.unwrap();
        assert_eq!(sub.snapshot.len(), 1);
        assert_eq!(sub.snapshot[0].order_item_id, stored.id);

        let mut changed = stored.clone();
        changed.status = OrderItemStatus::Preparing;
        change_tx
            .send(OrderItemChange {
                item: changed,
                previous_status: Some(OrderItemStatus::Pending),
            })
            .unwrap();

        let delta = tokio::time::timeout(std::time::Duration::from_secs(2), sub.deltas.recv())
            .await
            .unwrap()
            .unwrap();
        let doc = serde_json::to_value(&delta).unwrap();
        assert_eq!(doc["event_type"], "status_changed");
        assert_eq!(doc["previous_status"], "pending");

        shutdown.cancel();
        handle.await.unwrap();
    }
}
