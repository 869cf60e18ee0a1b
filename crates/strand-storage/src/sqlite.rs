//! SQLite implementation of [`ByteStore`].
//!
//! [`SqliteStore`] persists bytes in a single `kv` table of a SQLite database
//! in WAL mode, with automatic schema migrations. Each call is one statement,
//! so every write is atomic and durable once it returns.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;
use crate::traits::ByteStore;

/// SQLite-backed implementation of [`ByteStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ByteStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let value = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, bytes],
        )?;
        if inserted == 1 {
            return Ok(());
        }
        let existing: Vec<u8> =
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })?;
        if existing == bytes {
            Ok(())
        } else {
            Err(StorageError::KeyExists {
                key: key.to_string(),
            })
        }
    }

    fn overwrite(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, bytes],
        )?;
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.conn();
        // `>=` on the prefix plus a starts-with filter avoids LIKE escaping.
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE key >= ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for key in rows {
            let key = key?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }
}
