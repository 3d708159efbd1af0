//! Ticket status state machine
//!
//! ```text
//! created → started → ready → delivered
//! created → cancelled
//! started → cancelled
//! ready   → cancelled
//! ```
//!
//! `delivered` and `cancelled` are terminal.

use crate::order_item::OrderItemStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of kitchen ticket states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum TicketStatus {
    Created,
    Started,
    Ready,
    Delivered,
    Cancelled,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 5] = [
        TicketStatus::Created,
        TicketStatus::Started,
        TicketStatus::Ready,
        TicketStatus::Delivered,
        TicketStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, TicketStatus::Delivered | TicketStatus::Cancelled)
    }

    /// Whether the state machine allows `self → to`
    pub fn can_transition(self, to: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, to),
            (Created, Started)
                | (Started, Ready)
                | (Ready, Delivered)
                | (Created, Cancelled)
                | (Started, Cancelled)
                | (Ready, Cancelled)
        )
    }

    /// Kitchen → order-item status mapping, total on the closed set
    pub fn order_item_status(self) -> OrderItemStatus {
        match self {
            TicketStatus::Created => OrderItemStatus::Pending,
            TicketStatus::Started => OrderItemStatus::Preparing,
            TicketStatus::Ready => OrderItemStatus::Ready,
            TicketStatus::Delivered => OrderItemStatus::Delivered,
            TicketStatus::Cancelled => OrderItemStatus::Cancelled,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Created => "created",
            TicketStatus::Started => "started",
            TicketStatus::Ready => "ready",
            TicketStatus::Delivered => "delivered",
            TicketStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid ticket transition: {from} → {to}")]
pub struct InvalidTransition {
    pub from: TicketStatus,
    pub to: TicketStatus,
}
