//! Appending nodes to the durable graph.
//!
//! [`Writer`] turns fact batches into stored `Root`/`Leaf`/`Merge` nodes and
//! copies foreign subgraphs into the local store. [`TrxLog`] is the narrow
//! interface transactions use: "facts plus a base node in, new head out".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use strand_core::{Graph, Hash, InstanceId, Node, NodeData, NodeKind, NodeVal};
use strand_storage::NodeStore;

use crate::error::DbError;

/// Turns fact batches into new head nodes.
pub trait TrxLog {
    /// Appends a `Leaf` holding `facts` on top of `base`.
    fn append(&self, base: &Node, facts: NodeData) -> Result<Arc<NodeVal>, DbError>;

    /// Appends a `Merge` of two diverged heads; `ours` becomes parent1.
    fn merge_with(&self, ours: &Node, theirs: &Node, facts: NodeData)
        -> Result<Arc<NodeVal>, DbError>;
}

/// Stores nodes authored by one instance.
pub struct Writer {
    store: NodeStore,
    graph: Arc<Graph>,
    source: InstanceId,
}

impl Writer {
    pub fn new(store: NodeStore, graph: Arc<Graph>, source: InstanceId) -> Self {
        Writer {
            store,
            graph,
            source,
        }
    }

    pub fn source(&self) -> InstanceId {
        self.source
    }

    /// Stores the Root node of a fresh database.
    pub fn store_root(&self, facts: NodeData) -> Result<Arc<NodeVal>, DbError> {
        self.persist(NodeVal::root(self.source, Utc::now(), facts))
    }

    /// Stores a `Leaf` on `parent`, which must already be durable.
    pub fn store(&self, parent: &Node, facts: NodeData) -> Result<Arc<NodeVal>, DbError> {
        let parent_hash = self.durable_hash(parent)?;
        self.persist(NodeVal::leaf(
            Node::Ref(parent_hash),
            self.source,
            Utc::now(),
            facts,
        ))
    }

    /// Stores a `Merge` of two durable parents.
    pub fn store_merge(
        &self,
        parent1: &Node,
        parent2: &Node,
        facts: NodeData,
    ) -> Result<Arc<NodeVal>, DbError> {
        let first = self.durable_hash(parent1)?;
        let second = self.durable_hash(parent2)?;
        self.persist(NodeVal::merge(
            Node::Ref(first),
            Node::Ref(second),
            self.source,
            Utc::now(),
            facts,
        ))
    }

    /// Makes `node` and all its ancestors durable, ancestors first.
    ///
    /// `Val` ancestors missing from the store are written; `Ref` ancestors
    /// must already resolve, else [`DbError::CorruptedGraph`]. A `Val` that
    /// carries a hash must re-hash to it.
    pub fn append_graph(&self, node: &Node) -> Result<Arc<NodeVal>, DbError> {
        let mut stored: HashMap<*const NodeVal, Hash> = HashMap::new();
        let mut stack = vec![(node.clone(), false)];

        while let Some((next, parents_done)) = stack.pop() {
            let val = match &next {
                Node::Ref(hash) => {
                    if !self.store.contains(hash)? {
                        self.graph.resolve_hash(hash)?;
                    }
                    continue;
                }
                Node::Val(val) => Arc::clone(val),
            };
            let key = Arc::as_ptr(&val);
            if stored.contains_key(&key) {
                continue;
            }
            if let Some(hash) = val.hash {
                if self.store.contains(&hash)? {
                    stored.insert(key, hash);
                    continue;
                }
            }
            if !parents_done {
                stack.push((next.clone(), true));
                stack.extend(val.parents().into_iter().map(|p| (p.clone(), false)));
                continue;
            }

            let relink = |parent: &Node| -> Result<Node, DbError> {
                match parent {
                    Node::Ref(hash) => Ok(Node::Ref(*hash)),
                    Node::Val(p) => stored
                        .get(&Arc::as_ptr(p))
                        .map(|hash| Node::Ref(*hash))
                        .ok_or_else(|| DbError::NodeStoreError {
                            reason: "ancestor was not stored before its child".into(),
                        }),
                }
            };
            let kind = match &val.kind {
                NodeKind::Root => NodeKind::Root,
                NodeKind::Leaf { parent } => NodeKind::Leaf {
                    parent: relink(parent)?,
                },
                NodeKind::Merge { parent1, parent2 } => NodeKind::Merge {
                    parent1: relink(parent1)?,
                    parent2: relink(parent2)?,
                },
            };
            let rebuilt = NodeVal {
                hash: None,
                source: val.source,
                timestamp: val.timestamp,
                kind,
                data: val.data.clone(),
            };
            let hash = self.store.save(&rebuilt)?;
            if let Some(claimed) = val.hash {
                if claimed != hash {
                    return Err(DbError::NodeStoreError {
                        reason: format!("node claims hash {claimed} but hashes to {hash}"),
                    });
                }
            }
            self.graph.remember(Arc::new(rebuilt.with_hash(hash)));
            stored.insert(key, hash);
        }

        let head = match node {
            Node::Ref(hash) => *hash,
            Node::Val(val) => *stored
                .get(&Arc::as_ptr(val))
                .ok_or_else(|| DbError::NodeStoreError {
                    reason: "head was not stored".into(),
                })?,
        };
        Ok(self.graph.resolve_hash(&head)?)
    }

    fn durable_hash(&self, node: &Node) -> Result<Hash, DbError> {
        let hash = node.hash().ok_or_else(|| DbError::NodeStoreError {
            reason: "parent has no hash".into(),
        })?;
        if !self.store.contains(&hash)? {
            return Err(DbError::NodeStoreError {
                reason: format!("parent {hash} is not durably stored"),
            });
        }
        Ok(hash)
    }

    fn persist(&self, node: NodeVal) -> Result<Arc<NodeVal>, DbError> {
        let hash = self.store.save(&node)?;
        let val = Arc::new(node.with_hash(hash));
        self.graph.remember(Arc::clone(&val));
        tracing::debug!(
            hash = %hash.short(),
            kind = val.kind_name(),
            facts = val.data.len(),
            "appended node"
        );
        Ok(val)
    }
}

impl TrxLog for Writer {
    fn append(&self, base: &Node, facts: NodeData) -> Result<Arc<NodeVal>, DbError> {
        self.store(base, facts)
    }

    fn merge_with(
        &self,
        ours: &Node,
        theirs: &Node,
        facts: NodeData,
    ) -> Result<Arc<NodeVal>, DbError> {
        self.store_merge(ours, theirs, facts)
    }
}
