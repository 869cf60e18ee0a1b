//! Core error types for strand-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! data model and graph resolution.

use thiserror::Error;

use crate::hash::Hash;
use crate::id::InstanceId;

/// Boxed failure reported by a [`NodeSource`](crate::graph::NodeSource).
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Core errors produced by the strand-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A referenced node hash could not be found. The graph is missing a
    /// durable node or is inconsistent; not retryable.
    #[error("corrupted graph: node {hash} cannot be resolved")]
    CorruptedGraph { hash: Hash },

    /// The node source failed while loading a node.
    #[error("failed to load node {hash}: {source}")]
    NodeSource {
        hash: Hash,
        #[source]
        source: SourceError,
    },

    /// An attribute definition is inconsistent.
    #[error("invalid attribute '{name}': {reason}")]
    InvalidAttribute { name: String, reason: String },

    /// Text did not parse as a hex node hash.
    #[error("invalid hash: '{input}'")]
    InvalidHash { input: String },

    /// Text did not parse as `instance:local`.
    #[error("invalid gid: '{input}'")]
    InvalidGid { input: String },

    /// The instance has used every local id.
    #[error("gid space exhausted for instance {instance}")]
    GidSpaceExhausted { instance: InstanceId },

    /// The instance owns no further instance ids to fork.
    #[error("instance {instance} has no instance ids left to fork")]
    InstanceSpaceExhausted { instance: InstanceId },
}
