//! Kitchen tickets - the kitchen's unit of work for one order line

mod event;
mod status;

pub use event::{TicketEvent, TicketEventPayload};
pub use status::{InvalidTransition, TicketStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display name of a production station
///
/// The well-known stations get their board titles; anything else falls
/// back to a capitalized identifier.
pub fn station_display_name(station_id: &str) -> String {
    match station_id {
        "kitchen" => "Kitchen".to_string(),
        "bar" => "Bar".to_string(),
        "coffee" => "Coffee".to_string(),
        "dessert" => "Dessert".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        }
    }
}

/// Current ticket record schema version, stamped on creation.
/// Bumped when the persisted shape changes; readers must accept any
/// version less than or equal to their own.
pub const TICKET_SCHEMA_VERSION: i32 = 1;

/// A kitchen ticket
///
/// One ticket per production order item (`order_item_id` is unique across
/// live tickets). Display fields are denormalized at creation so dashboards
/// never join against the menu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Ticket {
    /// Stable identifier, assigned on creation
    pub id: Uuid,
    /// Originating order
    pub order_id: Uuid,
    /// Originating order item (at most one ticket per item)
    pub order_item_id: Uuid,
    /// Menu item being prepared
    pub menu_item_id: Uuid,
    /// Preparation station (kitchen, bar, coffee, dessert)
    pub station_id: String,
    pub menu_item_name: String,
    pub station_name: String,
    /// Table label for dine-in orders, absent for retail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_label: Option<String>,
    pub quantity: i32,
    pub status: TicketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    pub schema_version: i32,
    /// Provenance tag; `demo-seed` marks seeded records so they can be cleared
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl Ticket {
    /// Create a fresh ticket in `created` state
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: Uuid,
        order_item_id: Uuid,
        menu_item_id: Uuid,
        station_id: impl Into<String>,
        menu_item_name: impl Into<String>,
        station_name: impl Into<String>,
        table_label: Option<String>,
        quantity: i32,
        notes: Option<String>,
    ) -> Self {
        let now = crate::util::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            order_item_id,
            menu_item_id,
            station_id: station_id.into(),
            menu_item_name: menu_item_name.into(),
            station_name: station_name.into(),
            table_label,
            quantity,
            status: TicketStatus::Created,
            notes,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            delivered_at: None,
            schema_version: TICKET_SCHEMA_VERSION,
            created_by: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// When the ticket entered its terminal state, if it has
    pub fn terminal_at(&self) -> Option<DateTime<Utc>> {
        self.is_terminal().then_some(self.updated_at)
    }

    /// Apply a status transition, stamping the matching lifecycle timestamp.
    ///
    /// Returns the previous status on success. Terminal tickets and
    /// transitions outside the state machine are rejected; nothing is
    /// mutated in that case.
    pub fn transition(
        &mut self,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> Result<TicketStatus, InvalidTransition> {
        let from = self.status;
        if !from.can_transition(to) {
            return Err(InvalidTransition { from, to });
        }
        self.status = to;
        match to {
            TicketStatus::Started => self.started_at = Some(at),
            TicketStatus::Ready => self.finished_at = Some(at),
            TicketStatus::Delivered => self.delivered_at = Some(at),
            TicketStatus::Created | TicketStatus::Cancelled => {}
        }
        self.updated_at = at;
        Ok(from)
    }

    /// Overwrite the fields an order-item update may change
    pub fn apply_item_update(
        &mut self,
        quantity: i32,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.quantity = quantity;
        self.notes = notes;
        self.updated_at = at;
    }
}
