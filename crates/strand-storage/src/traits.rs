//! The [`ByteStore`] trait: the byte-level storage contract.
//!
//! The database core never touches a backend directly; it reads and writes
//! opaque byte values under string keys. Backends (memory, SQLite) implement
//! this trait and are fully swappable.
//!
//! Methods take `&self`: one store is shared by every connection and
//! transaction on an instance, so backends synchronize internally. A write
//! must be visible to reads issued after it returns within the same process.

use crate::error::StorageError;

/// Namespaced key/value byte storage.
pub trait ByteStore: Send + Sync {
    /// Reads the bytes under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Inserts `bytes` under a new key.
    ///
    /// Writing identical bytes to an existing key is a no-op (content-addressed
    /// data is idempotent); different bytes fail with
    /// [`StorageError::KeyExists`].
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Inserts or replaces the bytes under `key`.
    fn overwrite(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, in ascending order.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// True if `key` holds a value.
    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }
}
