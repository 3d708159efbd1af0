//! StatusReflector - maps kitchen ticket transitions back to order items
//!
//! Second durable consumer on `kitchen.tickets` (position independent from
//! the cache replay). Only *status_changed* events are acted on: *created*
//! originates from the order side, and reflecting it would close the
//! orders → tickets → orders loop.
//!
//! The write is a derived value, so re-application is idempotent, and the
//! store update is last-write-wins on `updated_at` against concurrent
//! writes from the order HTTP path. The order item is written before the
//! message is acknowledged, so kitchen progress lands on the order side
//! before any later transition is consumed.

use crate::bus::{BusMessage, EventBus, KITCHEN_TICKETS};
use crate::common::{Backoff, ConsumeError};
use crate::db::repository;
use crate::orders::OrderItemChange;
use shared::{TicketEvent, TicketEventPayload};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Durable consumer name on `kitchen.tickets`
pub const REFLECT_CONSUMER: &str = "order-reflect";

pub struct StatusReflector {
    pool: SqlitePool,
    bus: EventBus,
    changes: broadcast::Sender<OrderItemChange>,
}

impl StatusReflector {
    pub fn new(
        pool: SqlitePool,
        bus: EventBus,
        changes: broadcast::Sender<OrderItemChange>,
    ) -> Self {
        Self { pool, bus, changes }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let consumer = match self.bus.durable_consumer(KITCHEN_TICKETS, REFLECT_CONSUMER) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Status reflector failed to attach consumer");
                return;
            }
        };

        tracing::info!("Status reflector started");
        let mut backoff = Backoff::new();

        loop {
            let msg = match consumer.next(&shutdown).await {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Status reflector fetch failed");
                    backoff.wait(&shutdown).await;
                    if shutdown.is_cancelled() {
                        break;
                    }
                    continue;
                }
            };

            match self.handle(&msg).await {
                Ok(()) => {
                    if let Err(e) = consumer.ack(msg.seq) {
                        tracing::error!(seq = msg.seq, error = %e, "Ack failed");
                    }
                    backoff.reset();
                }
                Err(ConsumeError::Structural(reason)) => {
                    // Unknown kitchen vocabulary also decodes as a failure
                    // and is dropped here, per the unknown-mapping policy.
                    tracing::warn!(seq = msg.seq, %reason, "Dropping unreflectable ticket event");
                    let _ = consumer.ack(msg.seq);
                }
                Err(ConsumeError::Transient(reason)) => {
                    tracing::warn!(seq = msg.seq, %reason, "Transient reflection failure");
                    backoff.wait(&shutdown).await;
                }
            }
        }

        tracing::info!("Status reflector stopped");
    }

    async fn handle(&self, msg: &BusMessage) -> Result<(), ConsumeError> {
        let event: TicketEvent = msg
            .decode()
            .map_err(|e| ConsumeError::Structural(format!("decode failed: {e}")))?;

        let status = match &event.payload {
            TicketEventPayload::Created { .. } => return Ok(()),
            TicketEventPayload::StatusChanged { status, .. } => *status,
        };
        let target = status.order_item_status();

        let Some(item) = repository::order_item::find_by_id(&self.pool, event.order_item_id).await?
        else {
            // The item is gone; nothing to reflect onto
            return Ok(());
        };
        if item.status == target {
            // Re-applied transition; no net outbound event
            return Ok(());
        }

        let matched = repository::order_item::set_status(
            &self.pool,
            item.id,
            target,
            event.occurred_at,
        )
        .await?;
        if matched == 0 {
            // A newer write from the order path won; benign
            tracing::debug!(
                order_item = %item.id,
                "Reflection lost last-write-wins race, skipping"
            );
            return Ok(());
        }

        let previous = item.status;
        let mut updated = item;
        updated.status = target;
        updated.updated_at = event.occurred_at;

        tracing::info!(
            order_item = %updated.id,
            from = %previous,
            to = %target,
            "Reflected kitchen transition onto order item"
        );
        // Local fan-out to the order-item stream server; lossy by design
        let _ = self.changes.send(OrderItemChange {
            item: updated,
            previous_status: Some(previous),
        });
        Ok(())
    }
}
