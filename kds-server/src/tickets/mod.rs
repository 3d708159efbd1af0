//! Kitchen side of the pipeline: ingest, cache, replay and fan-out

pub mod cache;
pub mod ingest;
pub mod replay;
pub mod stream;

pub use cache::{CacheChange, TicketCache};
pub use ingest::TicketIngestWorker;
pub use replay::CacheReplayWorker;
pub use stream::{TicketStreamServer, TicketSubscription};
