//! SQLite layout for [`SqliteStore`](crate::SqliteStore).
//!
//! Everything lives in one `kv` table: node bytes under `nodes/<hex hash>`
//! and the head pointer under `refs/head`. Nodes are immutable once written,
//! so the table only ever sees inserts plus the single head overwrite per
//! commit. Schema changes ship as `rusqlite_migration` steps tracked in
//! `user_version`.

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::StorageError;

/// Schema steps; the index into this list is the stored `user_version`.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!("migrations/001_initial_schema.sql"))])
}

/// Opens the database file at `path`, creating the `kv` table if needed.
pub fn open_database(path: &str) -> Result<Connection, StorageError> {
    prepare(Connection::open(path)?)
}

/// A private in-memory database with the same layout, for tests and
/// throwaway stores.
pub fn open_in_memory() -> Result<Connection, StorageError> {
    prepare(Connection::open_in_memory()?)
}

fn prepare(mut conn: Connection) -> Result<Connection, StorageError> {
    // One writer appends nodes while readers resolve them.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // A lost head update after a crash falls back to an older committed head.
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    migrations()
        .to_latest(&mut conn)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    Ok(conn)
}
