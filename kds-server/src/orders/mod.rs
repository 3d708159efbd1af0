//! Order side of the pipeline: status reflection and fan-out

pub mod reflect;
pub mod stream;

pub use reflect::StatusReflector;
pub use stream::{OrderItemStreamServer, OrderItemSubscription};

use shared::{OrderItem, OrderItemStatus};

/// A write applied to an order item, fed to the order-item stream server
#[derive(Debug, Clone)]
pub struct OrderItemChange {
    pub item: OrderItem,
    /// Status before the write; `None` means the item is new
    pub previous_status: Option<OrderItemStatus>,
}
