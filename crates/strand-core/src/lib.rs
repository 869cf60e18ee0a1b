//! Data model and DAG resolution for strand.
//!
//! strand stores (entity, attribute, value) facts in a content-addressed DAG
//! of immutable transaction nodes. This crate holds the pieces every other
//! layer shares:
//!
//! - [`id`]: `Gid`, `InstanceId`, the per-instance allocator and fork ranges
//! - [`value`]: fact values, value types and attribute type codes
//! - [`fact`]: facts and per-entity fact views
//! - [`attr`]: attribute definitions, meta attribute names, schema lookup
//! - [`hash`]: 20-byte node content addresses
//! - [`node`]: `Root`/`Leaf`/`Merge` nodes and `Ref`/`Val` links
//! - [`graph`]: lazy resolver over a pluggable node source
//! - [`history`]: full-history petgraph view for inspection

pub mod attr;
pub mod error;
pub mod fact;
pub mod graph;
pub mod hash;
pub mod history;
pub mod id;
pub mod node;
pub mod value;

// Re-export commonly used types
pub use attr::{meta, Attr, Overlay, SchemaLookup};
pub use error::CoreError;
pub use fact::{AttrValues, EntityFacts, Fact, NodeData};
pub use graph::{Graph, Lineage, NodeSource};
pub use hash::Hash;
pub use id::{Gid, GidAllocator, InstanceId, InstanceSpace};
pub use node::{Node, NodeKind, NodeVal};
pub use value::{Decimal, TypeCode, Value, ValueType};
