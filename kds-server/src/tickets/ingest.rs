//! TicketIngestWorker - turns order-item events into kitchen tickets
//!
//! Durable consumer on `orders.items` with explicit acknowledgement.
//! Every inbound message is idempotent with respect to the ticket keyed by
//! its `order_item_id`:
//!
//! - *created* (production item): insert ticket, set cache, publish a
//!   *created* ticket event. A duplicate delivery finds the ticket present
//!   and acks without side effects; losing the insert race surfaces as a
//!   unique-key violation, which is re-read and treated the same way.
//! - *updated*: overwrite quantity/notes on the live ticket; no event.
//! - *cancelled*: transition the ticket, publish *status_changed*.
//! - *status_changed*: ignored, that kind flows the other way.
//!
//! Transient storage failures withhold the ack so the stream redelivers;
//! undecodable or structurally invalid messages are acked and counted so
//! they cannot wedge the consumer.

use crate::bus::{BusMessage, EventBus, KITCHEN_TICKETS, ORDERS_ITEMS};
use crate::common::{Backoff, ConsumeError};
use crate::db::repository;
use crate::tickets::cache::TicketCache;
use shared::ticket::station_display_name;
use shared::{OrderItemEvent, OrderItemEventPayload, Ticket, TicketEvent, TicketStatus};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Durable consumer name on `orders.items`
pub const INGEST_CONSUMER: &str = "ticket-ingest";

pub struct TicketIngestWorker {
    pool: SqlitePool,
    bus: EventBus,
    cache: Arc<TicketCache>,
    poisoned: AtomicU64,
}

impl TicketIngestWorker {
    pub fn new(pool: SqlitePool, bus: EventBus, cache: Arc<TicketCache>) -> Self {
        Self {
            pool,
            bus,
            cache,
            poisoned: AtomicU64::new(0),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let consumer = match self.bus.durable_consumer(ORDERS_ITEMS, INGEST_CONSUMER) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Ticket ingest failed to attach consumer");
                return;
            }
        };

        tracing::info!("Ticket ingest worker started");
        let mut backoff = Backoff::new();

        loop {
            let msg = match consumer.next(&shutdown).await {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Ticket ingest fetch failed");
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
                    let total = self.poisoned.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        seq = msg.seq,
                        total_dropped = total,
                        %reason,
                        "Dropping structurally invalid order-item message"
                    );
                    let _ = consumer.ack(msg.seq);
                }
                Err(ConsumeError::Transient(reason)) => {
                    tracing::warn!(
                        seq = msg.seq,
                        %reason,
                        "Transient ingest failure, message will be redelivered"
                    );
                    backoff.wait(&shutdown).await;
                }
            }
        }

        tracing::info!("Ticket ingest worker stopped");
    }

    async fn handle(&self, msg: &BusMessage) -> Result<(), ConsumeError> {
        // Undecodable payloads are poison: unknown event kinds also land
        // here and are acknowledged for forward compatibility.
        let event: OrderItemEvent = msg
            .decode()
            .map_err(|e| ConsumeError::Structural(format!("decode failed: {e}")))?;

        match &event.payload {
            OrderItemEventPayload::Created { .. } => self.handle_created(&event).await,
            OrderItemEventPayload::Updated {} => self.handle_updated(&event).await,
            OrderItemEventPayload::Cancelled { reason } => {
                self.handle_cancelled(&event, reason.clone()).await
            }
            // Status reflection comes from the kitchen side; re-ingesting
            // it would close a loop.
            OrderItemEventPayload::StatusChanged { .. } => Ok(()),
        }
    }

    async fn handle_created(&self, event: &OrderItemEvent) -> Result<(), ConsumeError> {
        if !event.requires_production {
            return Ok(());
        }
        let station_id = event.station_id.clone().ok_or_else(|| {
            ConsumeError::Structural(format!(
                "production item {} without station",
                event.order_item_id
            ))
        })?;
        if event.quantity < 1 {
            return Err(ConsumeError::Structural(format!(
                "production item {} with quantity {}",
                event.order_item_id, event.quantity
            )));
        }

        if let Some(existing) =
            repository::ticket::find_by_order_item(&self.pool, event.order_item_id).await?
        {
            tracing::debug!(
                ticket = %existing.id,
                order_item = %event.order_item_id,
                "Duplicate created event, ticket already present"
            );
            return Ok(());
        }

        let mut ticket = Ticket::new(
            event.order_id,
            event.order_item_id,
            event.menu_item_id,
            station_id.clone(),
            event.name.clone(),
            station_display_name(&station_id),
            event.table_label.clone(),
            event.quantity,
            event.notes.clone(),
        );
        // Anchor the ticket timeline to the order event, not to receipt time
        ticket.created_at = event.occurred_at;
        ticket.updated_at = event.occurred_at;

        match repository::ticket::insert(&self.pool, &ticket).await {
            Ok(()) => {}
            Err(e) if e.is_duplicate() => {
                // Lost the insert race; the winner's ticket is authoritative
                tracing::debug!(
                    order_item = %event.order_item_id,
                    "Concurrent insert collapsed by unique index"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        self.cache.apply(ticket.clone());
        self.bus.publish(KITCHEN_TICKETS, &TicketEvent::created(&ticket))?;
        tracing::info!(
            ticket = %ticket.id,
            order_item = %ticket.order_item_id,
            station = %ticket.station_id,
            "Ticket created"
        );
        Ok(())
    }

    async fn handle_updated(&self, event: &OrderItemEvent) -> Result<(), ConsumeError> {
        let Some(mut ticket) =
            repository::ticket::find_by_order_item(&self.pool, event.order_item_id).await?
        else {
            return Ok(());
        };
        if ticket.is_terminal() {
            return Ok(());
        }
        if ticket.quantity == event.quantity && ticket.notes == event.notes {
            return Ok(());
        }

        ticket.apply_item_update(event.quantity, event.notes.clone(), event.occurred_at);
        let matched = repository::ticket::update(&self.pool, &ticket).await?;
        if matched == 0 {
            // Row vanished concurrently; redelivery is pointless
            return Ok(());
        }
        self.cache.apply(ticket);
        // No status-affecting field changed, so no ticket event
        Ok(())
    }

    async fn handle_cancelled(
        &self,
        event: &OrderItemEvent,
        reason: Option<String>,
    ) -> Result<(), ConsumeError> {
        let Some(mut ticket) =
            repository::ticket::find_by_order_item(&self.pool, event.order_item_id).await?
        else {
            return Ok(());
        };
        if ticket.is_terminal() {
            return Ok(());
        }

        let previous = ticket
            .transition(TicketStatus::Cancelled, event.occurred_at)
            .map_err(|e| ConsumeError::Structural(e.to_string()))?;

        let matched = repository::ticket::update(&self.pool, &ticket).await?;
        if matched == 0 {
            return Ok(());
        }
        self.cache.apply(ticket.clone());
        self.bus.publish(
            KITCHEN_TICKETS,
            &TicketEvent::status_changed(&ticket, previous, reason),
        )?;
        tracing::info!(
            ticket = %ticket.id,
            order_item = %ticket.order_item_id,
            "Ticket cancelled from order side"
        );
        Ok(())
    }
}
