//! Cache replay - second write source of the ticket cache
//!
//! Durable consumer `cache-replay` on `kitchen.tickets`. Reconstructs a
//! ticket record from each event and applies it to the cache; the cache's
//! last-writer-wins rule makes this idempotent against the ingest worker's
//! direct sets, and a restart simply replays from the acknowledged
//! position. Events are facts emitted after validation, so reconstruction
//! assigns status without re-running the state machine.

use crate::bus::{BusMessage, EventBus, KITCHEN_TICKETS};
use crate::common::{Backoff, ConsumeError};
use crate::db::repository;
use crate::tickets::cache::TicketCache;
use shared::ticket::TICKET_SCHEMA_VERSION;
use shared::{Ticket, TicketEvent, TicketEventPayload};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Durable consumer name on `kitchen.tickets`; independent of the
/// reflector's position on the same stream.
pub const REPLAY_CONSUMER: &str = "cache-replay";

pub struct CacheReplayWorker {
    pool: SqlitePool,
    bus: EventBus,
    cache: Arc<TicketCache>,
}

impl CacheReplayWorker {
    pub fn new(pool: SqlitePool, bus: EventBus, cache: Arc<TicketCache>) -> Self {
        Self { pool, bus, cache }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let consumer = match self.bus.durable_consumer(KITCHEN_TICKETS, REPLAY_CONSUMER) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Cache replay failed to attach consumer");
                return;
            }
        };

        tracing::info!("Cache replay worker started");
        let mut backoff = Backoff::new();

        loop {
            let msg = match consumer.next(&shutdown).await {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Cache replay fetch failed");
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
                    tracing::warn!(seq = msg.seq, %reason, "Dropping undecodable ticket event");
                    let _ = consumer.ack(msg.seq);
                }
                Err(ConsumeError::Transient(reason)) => {
                    tracing::warn!(seq = msg.seq, %reason, "Transient replay failure");
                    backoff.wait(&shutdown).await;
                }
            }
        }

        tracing::info!("Cache replay worker stopped");
    }

    async fn handle(&self, msg: &BusMessage) -> Result<(), ConsumeError> {
        let event: TicketEvent = msg
            .decode()
            .map_err(|e| ConsumeError::Structural(format!("decode failed: {e}")))?;

        match &event.payload {
            TicketEventPayload::Created {
                status,
                quantity,
                notes,
            } => {
                let ticket = Ticket {
                    id: event.ticket_id,
                    order_id: event.order_id,
                    order_item_id: event.order_item_id,
                    menu_item_id: event.menu_item_id,
                    station_id: event.station_id.clone(),
                    menu_item_name: event.menu_item_name.clone(),
                    station_name: event.station_name.clone(),
                    table_label: event.table_label.clone(),
                    quantity: *quantity,
                    status: *status,
                    notes: notes.clone(),
                    created_at: event.occurred_at,
                    updated_at: event.occurred_at,
                    started_at: None,
                    finished_at: None,
                    delivered_at: None,
                    schema_version: TICKET_SCHEMA_VERSION,
                    created_by: None,
                };
                self.cache.apply(ticket);
                Ok(())
            }
            TicketEventPayload::StatusChanged {
                status,
                started_at,
                finished_at,
                delivered_at,
                ..
            } => {
                // Overlay the transition onto the current record; fall back
                // to the store when the cache has already evicted it.
                let base = match self.cache.get(event.ticket_id) {
                    Some(t) => Some(t),
                    None => repository::ticket::find_by_id(&self.pool, event.ticket_id).await?,
                };
                let Some(mut ticket) = base else {
                    tracing::debug!(
                        ticket = %event.ticket_id,
                        "No base record for status change, skipping"
                    );
                    return Ok(());
                };
                if ticket.updated_at >= event.occurred_at {
                    // Already at or past this transition
                    return Ok(());
                }
                ticket.status = *status;
                ticket.started_at = *started_at;
                ticket.finished_at = *finished_at;
                ticket.delivered_at = *delivered_at;
                ticket.updated_at = event.occurred_at;
                self.cache.apply(ticket);
                Ok(())
            }
        }
    }
}
