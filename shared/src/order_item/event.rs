//! Order-item wire events carried on the `orders.items` stream

use super::{OrderItem, OrderItemStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An order-item lifecycle event
///
/// The header carries the item's current denormalized fields for every
/// kind, so consumers never have to resolve the order to render a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItemEvent {
    pub occurred_at: DateTime<Utc>,
    pub order_id: Uuid,
    pub order_item_id: Uuid,
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_label: Option<String>,
    #[serde(flatten)]
    pub payload: OrderItemEventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum OrderItemEventPayload {
    Created {
        status: OrderItemStatus,
    },
    /// Mutable fields changed; new values are in the header
    Updated {},
    Cancelled {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    StatusChanged {
        status: OrderItemStatus,
        previous_status: OrderItemStatus,
    },
}

impl OrderItemEvent {
    fn header(item: &OrderItem, payload: OrderItemEventPayload) -> Self {
        Self {
            occurred_at: item.updated_at,
            order_id: item.order_id,
            order_item_id: item.id,
            menu_item_id: item.menu_item_id,
            name: item.name.clone(),
            category: item.category.clone(),
            notes: item.notes.clone(),
            price: item.price,
            quantity: item.quantity,
            requires_production: item.requires_production,
            station_id: item.station_id.clone(),
            table_label: item.table_label.clone(),
            payload,
        }
    }

    pub fn created(item: &OrderItem) -> Self {
        Self::header(item, OrderItemEventPayload::Created { status: item.status })
    }

    pub fn updated(item: &OrderItem) -> Self {
        Self::header(item, OrderItemEventPayload::Updated {})
    }

    pub fn cancelled(item: &OrderItem, reason: Option<String>) -> Self {
        Self::header(item, OrderItemEventPayload::Cancelled { reason })
    }

    pub fn status_changed(item: &OrderItem, previous_status: OrderItemStatus) -> Self {
        Self::header(
            item,
            OrderItemEventPayload::StatusChanged {
                status: item.status,
                previous_status,
            },
        )
    }
}
