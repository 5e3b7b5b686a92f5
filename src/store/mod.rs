//! Persistence for generated QR codes.
//!
//! The store is an append-only table of [`QrRecord`]s. Records are created
//! by the generate operation and never updated or deleted, so the trait
//! only exposes insert and read paths.
//!
//! Implementations are synchronous. Handlers call them through
//! `tokio::task::spawn_blocking` so SQLite I/O never stalls the runtime.

mod sqlite;

use std::sync::Arc;

use thiserror::Error;

use crate::models::QrRecord;

pub use sqlite::{DEFAULT_BUSY_TIMEOUT_MS, IN_MEMORY_PATH, SqliteStore};

/// Store errors. All of them surface to clients as an opaque 500.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error around the database file.
    #[error("store io error: {0}")]
    Io(String),
    /// SQLite engine error.
    #[error("store db error: {0}")]
    Db(String),
    /// A previous holder of the connection panicked.
    #[error("store connection mutex poisoned")]
    Poisoned,
    /// Caller passed data the store refuses to persist.
    #[error("store invalid data: {0}")]
    Invalid(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Db(err.to_string())
    }
}

/// Persistence operations for QR records.
///
/// The store serializes its own writes; callers never hold a transaction
/// across operations.
pub trait QrStore: Send + Sync {
    /// Persist new content and return the stored record with its assigned id.
    fn insert(&self, content: &str) -> Result<QrRecord, StoreError>;

    /// Look up a record by id.
    fn get(&self, id: i64) -> Result<Option<QrRecord>, StoreError>;

    /// All records, newest first.
    fn list(&self) -> Result<Vec<QrRecord>, StoreError>;

    /// Cheap liveness probe used by `/health`.
    fn ping(&self) -> Result<(), StoreError>;
}

/// Shared handle to the configured store.
pub type SharedStore = Arc<dyn QrStore>;
