//! redb-based storage for the persistent event streams
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `messages` | `(stream, seq)` | `u64 millis ∥ payload` | Append-only stream log |
//! | `stream_seq` | `stream` | `u64` | Last assigned sequence per stream |
//! | `consumer_pos` | `(stream, consumer)` | `u64` | Acknowledged position per durable consumer |
//!
//! # Durability
//!
//! redb commits with `Durability::Immediate`: a message is persistent as
//! soon as `append` returns, and consumer positions survive restarts. This
//! is what makes the named consumers durable in the at-least-once sense —
//! an unacknowledged message is re-read on the next fetch.

use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Stream log: key = (stream, sequence), value = timestamp-prefixed payload
const MESSAGES_TABLE: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("messages");

/// Last assigned sequence per stream
const STREAM_SEQ_TABLE: TableDefinition<&str, u64> = TableDefinition::new("stream_seq");

/// Acknowledged position per (stream, consumer)
const CONSUMER_POS_TABLE: TableDefinition<(&str, &str), u64> =
    TableDefinition::new("consumer_pos");

/// Millisecond timestamp prefix on every stored record
const TIMESTAMP_PREFIX_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Corrupt record in stream {0} at seq {1}")]
    CorruptRecord(String, u64),
}

pub type LogResult<T> = Result<T, LogError>;

/// A raw message read back from a stream
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub seq: u64,
    /// Publish time, Unix milliseconds
    pub published_at: i64,
    pub payload: Vec<u8>,
}

/// Append-only stream log backed by redb
#[derive(Clone)]
pub struct StreamLog {
    db: Arc<Database>,
}

impl StreamLog {
    /// Open or create the log at the given path
    pub fn open(path: impl AsRef<Path>) -> LogResult<Self> {
        let db = Database::create(path)?;
        let log = Self { db: Arc::new(db) };
        log.init_tables()?;
        Ok(log)
    }

    /// Open an in-memory log (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> LogResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        let log = Self { db: Arc::new(db) };
        log.init_tables()?;
        Ok(log)
    }

    fn init_tables(&self) -> LogResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(MESSAGES_TABLE)?;
            let _ = write_txn.open_table(STREAM_SEQ_TABLE)?;
            let _ = write_txn.open_table(CONSUMER_POS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // ========== Append ==========

    /// Append a payload to a stream, returning the assigned sequence
    pub fn append(&self, stream: &str, payload: &[u8], published_at: i64) -> LogResult<u64> {
        let txn = self.db.begin_write()?;
        let seq = {
            let mut seq_table = txn.open_table(STREAM_SEQ_TABLE)?;
            let current = seq_table.get(stream)?.map(|g| g.value()).unwrap_or(0);
            let next = current + 1;
            seq_table.insert(stream, next)?;

            let mut messages = txn.open_table(MESSAGES_TABLE)?;
            let mut record = Vec::with_capacity(TIMESTAMP_PREFIX_LEN + payload.len());
            record.extend_from_slice(&published_at.to_le_bytes());
            record.extend_from_slice(payload);
            messages.insert((stream, next), record.as_slice())?;
            next
        };
        txn.commit()?;
        Ok(seq)
    }

    // ========== Read ==========

    /// Read the first message of a stream with sequence greater than `after`
    pub fn read_after(&self, stream: &str, after: u64) -> LogResult<Option<StoredMessage>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;

        let range_start = (stream, after.saturating_add(1));
        let range_end = (stream, u64::MAX);

        for result in table.range(range_start..=range_end)? {
            let (key, value) = result?;
            let (_, seq) = key.value();
            return Ok(Some(decode_record(stream, seq, value.value())?));
        }
        Ok(None)
    }

    /// Last assigned sequence of a stream (0 when empty)
    pub fn last_seq(&self, stream: &str) -> LogResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STREAM_SEQ_TABLE)?;
        Ok(table.get(stream)?.map(|g| g.value()).unwrap_or(0))
    }

    /// All streams that have ever been appended to
    pub fn streams(&self) -> LogResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STREAM_SEQ_TABLE)?;
        let mut streams = Vec::new();
        for result in table.iter()? {
            let (key, _) = result?;
            streams.push(key.value().to_string());
        }
        Ok(streams)
    }

    // ========== Consumer positions ==========

    /// Acknowledged position of a durable consumer (0 when never acked)
    pub fn consumer_pos(&self, stream: &str, consumer: &str) -> LogResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONSUMER_POS_TABLE)?;
        Ok(table
            .get((stream, consumer))?
            .map(|g| g.value())
            .unwrap_or(0))
    }

    /// Advance a consumer position. Positions only move forward; a stale
    /// ack is ignored.
    pub fn ack(&self, stream: &str, consumer: &str, seq: u64) -> LogResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CONSUMER_POS_TABLE)?;
            let current = table.get((stream, consumer))?.map(|g| g.value()).unwrap_or(0);
            if seq > current {
                table.insert((stream, consumer), seq)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Register a consumer position if absent, so retention accounts for it
    /// before its first ack.
    pub fn register_consumer(&self, stream: &str, consumer: &str) -> LogResult<u64> {
        let txn = self.db.begin_write()?;
        let pos = {
            let mut table = txn.open_table(CONSUMER_POS_TABLE)?;
            let existing = table.get((stream, consumer))?.map(|g| g.value());
            match existing {
                Some(v) => v,
                None => {
                    table.insert((stream, consumer), 0u64)?;
                    0
                }
            }
        };
        txn.commit()?;
        Ok(pos)
    }

    /// Acknowledged positions of every consumer on a stream
    pub fn consumers_of(&self, stream: &str) -> LogResult<Vec<(String, u64)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONSUMER_POS_TABLE)?;
        let mut consumers = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            let (s, consumer) = key.value();
            if s == stream {
                consumers.push((consumer.to_string(), value.value()));
            }
        }
        Ok(consumers)
    }

    // ========== Retention ==========

    /// Remove messages of a stream published before `cutoff_millis` whose
    /// sequence is at or below `keep_floor`. Returns the number removed.
    pub fn sweep(&self, stream: &str, cutoff_millis: i64, keep_floor: u64) -> LogResult<u64> {
        // Collect expired keys in a read pass, then delete.
        let expired: Vec<u64> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(MESSAGES_TABLE)?;
            let mut expired = Vec::new();
            for result in table.range((stream, 0u64)..=(stream, keep_floor))? {
                let (key, value) = result?;
                let (_, seq) = key.value();
                let record = decode_record(stream, seq, value.value())?;
                if record.published_at < cutoff_millis {
                    expired.push(seq);
                }
            }
            expired
        };

        if expired.is_empty() {
            return Ok(0);
        }

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(MESSAGES_TABLE)?;
            for seq in &expired {
                table.remove((stream, *seq))?;
            }
        }
        txn.commit()?;
        Ok(expired.len() as u64)
    }

    /// Drop every message and consumer position (admin reset)
    pub fn purge(&self) -> LogResult<()> {
        let txn = self.db.begin_write()?;
        {
            txn.delete_table(MESSAGES_TABLE)?;
            txn.delete_table(STREAM_SEQ_TABLE)?;
            txn.delete_table(CONSUMER_POS_TABLE)?;
        }
        txn.commit()?;
        self.init_tables()
    }

    #[allow(dead_code)]
    fn begin_write(&self) -> LogResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }
}

fn decode_record(stream: &str, seq: u64, raw: &[u8]) -> LogResult<StoredMessage> {
    if raw.len() < TIMESTAMP_PREFIX_LEN {
        return Err(LogError::CorruptRecord(stream.to_string(), seq));
    }
    let mut millis = [0u8; TIMESTAMP_PREFIX_LEN];
    millis.copy_from_slice(&raw[..TIMESTAMP_PREFIX_LEN]);
    Ok(StoredMessage {
        seq,
        published_at: i64::from_le_bytes(millis),
        payload: raw[TIMESTAMP_PREFIX_LEN..].to_vec(),
    })
}
