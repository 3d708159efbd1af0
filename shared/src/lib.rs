//! Shared types for the Galley kitchen pipeline
//!
//! Domain models, wire events, status state machines and the unified
//! error type used by the kds-server service and its clients.

pub mod error;
pub mod order_item;
pub mod table;
pub mod ticket;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use error::{AppError, AppResult, ErrorCode};
pub use order_item::{OrderItem, OrderItemEvent, OrderItemEventPayload, OrderItemStatus};
pub use table::{TableStatus, TableStatusEvent};
pub use ticket::{InvalidTransition, Ticket, TicketEvent, TicketEventPayload, TicketStatus};
