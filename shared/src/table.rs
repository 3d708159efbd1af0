//! Table state carried on the ephemeral `tables.status` subject

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Available,
    Occupied,
    Reserved,
    Cleaning,
}

/// Last-writer-wins status notification for a single table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStatusEvent {
    pub table_id: String,
    pub status: TableStatus,
    pub occurred_at: DateTime<Utc>,
}

impl TableStatusEvent {
    pub fn new(table_id: impl Into<String>, status: TableStatus) -> Self {
        Self {
            table_id: table_id.into(),
            status,
            occurred_at: crate::util::now(),
        }
    }
}
