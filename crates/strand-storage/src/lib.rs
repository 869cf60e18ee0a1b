//! Storage layer for strand.
//!
//! The database core sees storage as namespaced bytes: the [`ByteStore`]
//! trait, with [`MemoryStore`] and [`SqliteStore`] as first-class backends.
//! On top of that, [`NodeStore`] persists DAG nodes by content hash through a
//! swappable [`NodeCodec`] and keeps the head pointer.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: key layout (node namespace, head key)
//! - [`traits`]: ByteStore trait definition
//! - [`codec`]: node wire format, JsonCodec
//! - [`hash`]: content hashing of encoded nodes
//! - [`memory`]: MemoryStore implementation
//! - [`schema`]: SQL schema and migration setup
//! - [`sqlite`]: SqliteStore implementation
//! - [`node_store`]: NodeStore over any ByteStore

pub mod codec;
pub mod error;
pub mod hash;
pub mod memory;
pub mod node_store;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use codec::{JsonCodec, NodeCodec};
pub use error::StorageError;
pub use hash::{encode_and_hash, hash_node};
pub use memory::MemoryStore;
pub use node_store::NodeStore;
pub use sqlite::SqliteStore;
pub use traits::ByteStore;
pub use types::{node_key, HEAD_KEY, NODES_PREFIX};
