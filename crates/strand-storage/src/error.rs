//! Storage error types for strand-storage.
//!
//! [`StorageError`] covers the failure modes of the byte stores, the node
//! codec, and the node store built on top of them.

use strand_core::Hash;
use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// `put` found different bytes already stored under the key.
    #[error("key already holds different bytes: {key}")]
    KeyExists { key: String },

    /// A node could not be encoded or decoded.
    #[error("codec error: {reason}")]
    Codec { reason: String },

    /// A node links to a parent that has no content address yet.
    #[error("node has an unhashed parent; store parents first")]
    UnhashedParent,

    /// The stored head pointer is not a valid hash.
    #[error("corrupt head pointer: {value}")]
    CorruptHead { value: String },

    /// Stored node bytes hash to something other than their key.
    #[error("node {expected} hashes to {actual}")]
    HashMismatch { expected: Hash, actual: Hash },
}
