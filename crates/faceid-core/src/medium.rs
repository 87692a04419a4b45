//! Persistent key-value medium behind the descriptor store.
//!
//! The store writes its whole profile set as one value under a fixed key,
//! so the medium only needs single-key get/set/delete. `MemoryMedium` is
//! the in-process fake used by tests; `SqliteMedium` is the on-disk one.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediumError {
    #[error("medium: storage error: {0}")]
    Storage(String),
    #[error("medium: sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type MediumResult<T> = Result<T, MediumError>;

/// Byte-valued key-value storage.
pub trait KeyValueMedium: Send + Sync {
    fn get(&self, key: &str) -> MediumResult<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> MediumResult<()>;

    fn delete(&self, key: &str) -> MediumResult<()>;
}

/// In-memory medium backed by a shared `HashMap`. Clones share data.
#[derive(Clone, Default)]
pub struct MemoryMedium {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueMedium for MemoryMedium {
    fn get(&self, key: &str) -> MediumResult<Option<Vec<u8>>> {
        let data = self
            .data
            .lock()
            .map_err(|e| MediumError::Storage(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> MediumResult<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| MediumError::Storage(e.to_string()))?;
        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> MediumResult<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| MediumError::Storage(e.to_string()))?;
        data.remove(key);
        Ok(())
    }
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY,
    value BLOB NOT NULL
)";

/// SQLite-backed medium: one `kv` table, one row per key.
pub struct SqliteMedium {
    conn: Mutex<Connection>,
}

impl SqliteMedium {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> MediumResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MediumError::Storage(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened profile database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> MediumResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> MediumResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MediumResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| MediumError::Storage(e.to_string()))
    }
}

impl KeyValueMedium for SqliteMedium {
    fn get(&self, key: &str) -> MediumResult<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> MediumResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> MediumResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}
