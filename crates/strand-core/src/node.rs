//! Transaction DAG nodes.
//!
//! Every committed transaction is one immutable [`NodeVal`]: a `Root` (no
//! parent), a `Leaf` (one parent) or a `Merge` (two parents). Parent links are
//! [`Node`] references, which are either materialized (`Val`) or just a content
//! address (`Ref`) to be resolved lazily through a
//! [`Graph`](crate::graph::Graph). This lets one in-memory graph span nodes
//! that live in different stores or have not been fetched yet.
//!
//! A node's own hash is not part of its payload; it is `None` until the node
//! has been serialized and stored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use smallvec::SmallVec;

use crate::fact::NodeData;
use crate::hash::Hash;
use crate::id::InstanceId;

/// A reference to a node: resolved or hash-only.
#[derive(Debug, Clone)]
pub enum Node {
    Ref(Hash),
    Val(Arc<NodeVal>),
}

impl Node {
    /// The content address, if known. Always known for `Ref`.
    pub fn hash(&self) -> Option<Hash> {
        match self {
            Node::Ref(hash) => Some(*hash),
            Node::Val(val) => val.hash,
        }
    }

    pub fn as_val(&self) -> Option<&Arc<NodeVal>> {
        match self {
            Node::Ref(_) => None,
            Node::Val(val) => Some(val),
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Node::Ref(_))
    }

    /// Identity: equal hashes, or the very same unhashed allocation.
    pub fn same_node(&self, other: &Node) -> bool {
        match (self.hash(), other.hash()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Node::Val(a), Node::Val(b)) => Arc::ptr_eq(a, b),
                _ => false,
            },
        }
    }

    /// Downgrades to a hash-only reference when the hash is known.
    pub fn to_ref(&self) -> Node {
        match self.hash() {
            Some(hash) => Node::Ref(hash),
            None => self.clone(),
        }
    }
}

impl From<Arc<NodeVal>> for Node {
    fn from(val: Arc<NodeVal>) -> Self {
        Node::Val(val)
    }
}

impl From<NodeVal> for Node {
    fn from(val: NodeVal) -> Self {
        Node::Val(Arc::new(val))
    }
}

impl From<Hash> for Node {
    fn from(hash: Hash) -> Self {
        Node::Ref(hash)
    }
}

/// Variant-specific parent links.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Root,
    Leaf { parent: Node },
    Merge { parent1: Node, parent2: Node },
}

/// A materialized node.
#[derive(Debug, Clone)]
pub struct NodeVal {
    pub hash: Option<Hash>,
    pub source: InstanceId,
    pub timestamp: DateTime<Utc>,
    pub kind: NodeKind,
    pub data: NodeData,
}

impl NodeVal {
    pub fn root(source: InstanceId, timestamp: DateTime<Utc>, data: NodeData) -> Self {
        NodeVal {
            hash: None,
            source,
            timestamp,
            kind: NodeKind::Root,
            data,
        }
    }

    pub fn leaf(
        parent: Node,
        source: InstanceId,
        timestamp: DateTime<Utc>,
        data: NodeData,
    ) -> Self {
        NodeVal {
            hash: None,
            source,
            timestamp,
            kind: NodeKind::Leaf { parent },
            data,
        }
    }

    pub fn merge(
        parent1: Node,
        parent2: Node,
        source: InstanceId,
        timestamp: DateTime<Utc>,
        data: NodeData,
    ) -> Self {
        NodeVal {
            hash: None,
            source,
            timestamp,
            kind: NodeKind::Merge { parent1, parent2 },
            data,
        }
    }

    /// Returns this node with its content address filled in.
    pub fn with_hash(mut self, hash: Hash) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Parents in order (`parent1` before `parent2`).
    pub fn parents(&self) -> SmallVec<[&Node; 2]> {
        match &self.kind {
            NodeKind::Root => SmallVec::new(),
            NodeKind::Leaf { parent } => smallvec::smallvec![parent],
            NodeKind::Merge { parent1, parent2 } => smallvec::smallvec![parent1, parent2],
        }
    }

    /// The parent followed by single-lineage reads.
    pub fn primary_parent(&self) -> Option<&Node> {
        match &self.kind {
            NodeKind::Root => None,
            NodeKind::Leaf { parent } => Some(parent),
            NodeKind::Merge { parent1, .. } => Some(parent1),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Root => "root",
            NodeKind::Leaf { .. } => "leaf",
            NodeKind::Merge { .. } => "merge",
        }
    }
}
