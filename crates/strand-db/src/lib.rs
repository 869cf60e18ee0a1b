//! Embedded fact database over a content-addressed DAG.
//!
//! Entities are written as nested drafts ([`Entity`]) inside a transaction
//! ([`Trx`]), validated against the schema stored in the database itself,
//! and committed as one immutable node. Every committed head comes with an
//! [`Index`] for attribute/value queries and nested pulls.
//!
//! # Modules
//!
//! - [`error`]: DbError enum with all failure modes
//! - [`config`]: connection settings, from code or `STRAND_*` variables
//! - [`entity`]: entity drafts, temp ids, nested and referenced entities
//! - [`schema`]: bootstrap facts, attribute declarations, instance state
//! - [`index`]: immutable EAV index, predicates, pulls
//! - [`validator`]: type, uniqueness and cardinality rules
//! - [`writer`]: node appends and subgraph copies
//! - [`trx`]: staged transactions and commit
//! - [`conn`]: connections, snapshots, head compare-and-set
//! - [`sync`]: instance forks and history merges

pub mod config;
pub mod conn;
pub mod entity;
pub mod error;
pub mod index;
pub mod schema;
pub mod sync;
pub mod trx;
pub mod validator;
pub mod writer;

pub use config::DbConfig;
pub use conn::{Conn, Snapshot};
pub use entity::{Entity, EntityId, FieldValue, TempId};
pub use error::DbError;
pub use index::{Index, Pred, Pulled, PulledValue, Query};
pub use schema::{AttrDef, InstanceState};
pub use sync::MergeOutcome;
pub use trx::{CommitOutcome, Trx, TrxState, WriteResult};
pub use writer::{TrxLog, Writer};
