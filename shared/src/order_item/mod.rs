//! Order items - one line within an order, optionally requiring production

mod event;

pub use event::{OrderItemEvent, OrderItemEventPayload};

use crate::ticket::TicketStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of order-item states on the order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum OrderItemStatus {
    Pending,
    Preparing,
    Ready,
    Delivered,
    Cancelled,
}

impl OrderItemStatus {
    pub const ALL: [OrderItemStatus; 5] = [
        OrderItemStatus::Pending,
        OrderItemStatus::Preparing,
        OrderItemStatus::Ready,
        OrderItemStatus::Delivered,
        OrderItemStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderItemStatus::Delivered | OrderItemStatus::Cancelled)
    }

    /// Order-item → kitchen status, the inverse of the non-cancelled rows
    /// of [`TicketStatus::order_item_status`]. Used at seed boundaries only;
    /// `cancelled` has no kitchen counterpart here and yields `None`.
    pub fn ticket_status(self) -> Option<TicketStatus> {
        match self {
            OrderItemStatus::Pending => Some(TicketStatus::Created),
            OrderItemStatus::Preparing => Some(TicketStatus::Started),
            OrderItemStatus::Ready => Some(TicketStatus::Ready),
            OrderItemStatus::Delivered => Some(TicketStatus::Delivered),
            OrderItemStatus::Cancelled => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderItemStatus::Pending => "pending",
            OrderItemStatus::Preparing => "preparing",
            OrderItemStatus::Ready => "ready",
            OrderItemStatus::Delivered => "delivered",
            OrderItemStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line within an order
///
/// Only items with `requires_production = true` ever get a kitchen ticket;
/// `station_id` is set for those. Dish fields are denormalized from the menu
/// at ordering time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    /// Course/serving group, when the order is grouped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    pub menu_item_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub price: f64,
    pub quantity: i32,
    pub requires_production: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_id: Option<String>,
    /// Table label of the parent order, denormalized for display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_label: Option<String>,
    pub status: OrderItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_boundary_mapping_skips_cancelled() {
        assert_eq!(
            OrderItemStatus::Pending.ticket_status(),
            Some(TicketStatus::Created)
        );
        assert_eq!(
            OrderItemStatus::Preparing.ticket_status(),
            Some(TicketStatus::Started)
        );
        assert_eq!(OrderItemStatus::Cancelled.ticket_status(), None);
    }

    #[test]
    fn delivered_and_cancelled_are_terminal() {
        for status in OrderItemStatus::ALL {
            assert_eq!(
                status.is_terminal(),
                matches!(
                    status,
                    OrderItemStatus::Delivered | OrderItemStatus::Cancelled
                )
            );
        }
    }
}
