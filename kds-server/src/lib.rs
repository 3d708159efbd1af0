//! Galley KDS server
//!
//! Real-time kitchen-ticket fan-out pipeline: ingests order-item events
//! from the `orders.items` stream, projects kitchen tickets into a warm
//! in-memory cache, multiplexes every change to connected dashboards, and
//! reflects kitchen progress back onto order items.
//!
//! ```text
//! orders.items ──► TicketIngestWorker ──► tickets store
//!                        │                     │ warm
//!                        ├──► kitchen.tickets  ▼
//!                        └────────────► TicketCache ──► TicketStreamServer ──► dashboards
//!                                            ▲
//! kitchen.tickets ──► CacheReplayWorker ─────┘
//! kitchen.tickets ──► StatusReflector ──► order_items store ──► OrderItemStreamServer
//! ```

pub mod api;
pub mod bus;
pub mod common;
pub mod core;
pub mod db;
pub mod orders;
pub mod seed;
pub mod stream;
pub mod tables;
pub mod tickets;

pub use crate::common::{cleanup_old_logs, init_logger, init_logger_with_file};
pub use crate::core::{AppState, BackgroundTasks, Config, Server, TaskKind};

/// 打印启动横幅
pub fn print_banner() {
    println!(
        r#"
   ___       _ _
  / __|__ _ | | | ___  _  _
 | (_ / _` || | |/ -_)| || |
  \___\__,_||_|_|\___| \_, |
   Kitchen Display     |__/
"#
    );
}
