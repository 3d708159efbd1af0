//! Ticket wire events published on the `kitchen.tickets` stream
//!
//! Self-describing JSON documents discriminated by the `event_type` field.
//! Optional timestamps are omitted when unset.

use super::{Ticket, TicketStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A ticket lifecycle event
///
/// The header is common to every kind; the payload is flattened so the
/// discriminator sits at the top level of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketEvent {
    /// When the change took effect (equals the ticket's `updated_at`)
    pub occurred_at: DateTime<Utc>,
    pub ticket_id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Uuid,
    pub menu_item_id: Uuid,
    pub station_id: String,
    pub menu_item_name: String,
    pub station_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_label: Option<String>,
    #[serde(flatten)]
    pub payload: TicketEventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TicketEventPayload {
    Created {
        /// Always `created` on the wire; carried for self-description
        status: TicketStatus,
        quantity: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    StatusChanged {
        status: TicketStatus,
        previous_status: TicketStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        started_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        finished_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        delivered_at: Option<DateTime<Utc>>,
    },
}

impl TicketEvent {
    fn header(ticket: &Ticket, payload: TicketEventPayload) -> Self {
        Self {
            occurred_at: ticket.updated_at,
            ticket_id: ticket.id,
            order_id: ticket.order_id,
            order_item_id: ticket.order_item_id,
            menu_item_id: ticket.menu_item_id,
            station_id: ticket.station_id.clone(),
            menu_item_name: ticket.menu_item_name.clone(),
            station_name: ticket.station_name.clone(),
            table_label: ticket.table_label.clone(),
            payload,
        }
    }

    /// Build a *created* event from a freshly created ticket
    pub fn created(ticket: &Ticket) -> Self {
        Self::header(
            ticket,
            TicketEventPayload::Created {
                status: ticket.status,
                quantity: ticket.quantity,
                notes: ticket.notes.clone(),
            },
        )
    }

    /// Build a *status_changed* event after a transition
    pub fn status_changed(
        ticket: &Ticket,
        previous_status: TicketStatus,
        reason: Option<String>,
    ) -> Self {
        Self::header(
            ticket,
            TicketEventPayload::StatusChanged {
                status: ticket.status,
                previous_status,
                reason,
                started_at: ticket.started_at,
                finished_at: ticket.finished_at,
                delivered_at: ticket.delivered_at,
            },
        )
    }

    pub fn status(&self) -> TicketStatus {
        match &self.payload {
            TicketEventPayload::Created { status, .. } => *status,
            TicketEventPayload::StatusChanged { status, .. } => *status,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self.payload, TicketEventPayload::Created { .. })
    }
}
