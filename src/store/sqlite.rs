use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};

use super::{QrStore, StoreError};
use crate::models::QrRecord;

/// Path value that selects a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Busy timeout applied to every connection (ms).
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS qrcodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);";

/// SQLite-backed [`QrStore`].
///
/// One connection guarded by a mutex. Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// [`IN_MEMORY_PATH`] opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the file cannot be opened or the schema
    /// cannot be created.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        if path == IN_MEMORY_PATH {
            return Self::open_in_memory();
        }

        let path_ref = Path::new(path);
        if path_ref.is_dir() {
            return Err(StoreError::Invalid(format!(
                "store path {path} is a directory"
            )));
        }
        ensure_parent_dir(path_ref)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection = Connection::open_with_flags(path_ref, flags)?;
        info!(path, "Opened SQLite store");
        Self::from_connection(connection)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory()?;
        debug!("Opened in-memory SQLite store");
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> Result<Self, StoreError> {
        connection.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl QrStore for SqliteStore {
    fn insert(&self, content: &str) -> Result<QrRecord, StoreError> {
        if content.is_empty() {
            return Err(StoreError::Invalid("content must not be empty".to_string()));
        }

        let created_at = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO qrcodes (content, created_at) VALUES (?1, ?2)",
            params![content, created_at],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        Ok(QrRecord {
            id,
            content: content.to_string(),
            created_at,
        })
    }

    fn get(&self, id: i64) -> Result<Option<QrRecord>, StoreError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, content, created_at FROM qrcodes WHERE id = ?1",
                params![id],
                map_record,
            )
            .optional()?;
        Ok(record)
    }

    fn list(&self) -> Result<Vec<QrRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, content, created_at FROM qrcodes ORDER BY created_at DESC, id DESC",
        )?;
        let records = stmt
            .query_map([], map_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn ping(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

fn map_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<QrRecord> {
    let created_at: DateTime<Utc> = row.get(2)?;
    Ok(QrRecord {
        id: row.get(0)?,
        content: row.get(1)?,
        created_at,
    })
}

fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|err| StoreError::Io(err.to_string()))
        }
        _ => Ok(()),
    }
}
