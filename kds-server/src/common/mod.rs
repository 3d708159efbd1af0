//! Cross-cutting helpers: logging setup, retry backoff, error aliases

pub mod backoff;
pub mod logger;

pub use backoff::Backoff;
pub use logger::{cleanup_old_logs, init_logger, init_logger_with_file};
pub use shared::{AppError, AppResult};

use crate::db::repository::RepoError;

/// Failure classes for at-least-once consumer handlers
///
/// Transient failures are retried by withholding the acknowledgement (the
/// stream redelivers); structural failures are acknowledged and dropped so
/// a poison message cannot wedge a consumer.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("structural: {0}")]
    Structural(String),
}

impl From<RepoError> for ConsumeError {
    fn from(err: RepoError) -> Self {
        match err {
            // Storage trouble heals with redelivery
            RepoError::Database(msg) => ConsumeError::Transient(msg),
            // Everything else will fail the same way again
            other => ConsumeError::Structural(other.to_string()),
        }
    }
}

impl From<crate::bus::BusError> for ConsumeError {
    fn from(err: crate::bus::BusError) -> Self {
        ConsumeError::Transient(err.to_string())
    }
}
