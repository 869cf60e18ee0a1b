//! In-memory implementation of [`ByteStore`].
//!
//! [`MemoryStore`] is a first-class backend for tests and ephemeral
//! databases. It keeps every key in a `BTreeMap` with the same semantics as
//! the SQLite backend, so prefix listing comes out sorted for free.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::StorageError;
use crate::traits::ByteStore;

/// Process-local byte store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ByteStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(existing) if existing.as_slice() == bytes => Ok(()),
            Some(_) => Err(StorageError::KeyExists {
                key: key.to_string(),
            }),
            None => {
                entries.insert(key.to_string(), bytes.to_vec());
                Ok(())
            }
        }
    }

    fn overwrite(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
