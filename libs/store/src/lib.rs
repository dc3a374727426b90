//! Keyed storage for orchestrator state.
//!
//! Both the manager and the workers keep their records behind the same
//! [`Store`] trait so the binaries can choose at startup between a plain
//! in-memory map and a durable single-file SQLite store. Callers branch on
//! [`StoreError::NotFound`] to tell "missing" apart from "broken".

mod memory;
mod sqlite;

use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key has no value. Distinguished from I/O failures so callers can
    /// branch on "missing" without string matching.
    #[error("key not found")]
    NotFound,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A keyed collection of records.
///
/// Values are stored whole; `put` with an existing key replaces the record.
pub trait Store<K, V> {
    /// All stored values, in unspecified order.
    fn list(&self) -> Result<Vec<V>, StoreError>;

    /// Number of stored values.
    fn count(&self) -> Result<usize, StoreError>;

    /// The value for `key`, or [`StoreError::NotFound`].
    fn get(&self, key: &K) -> Result<V, StoreError>;

    /// Create or replace the value for `key`.
    fn put(&mut self, key: K, value: V) -> Result<(), StoreError>;

    /// Release any underlying resources. Further calls may fail.
    fn close(&mut self) -> Result<(), StoreError>;
}
