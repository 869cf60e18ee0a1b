//! Lazy resolution of the transaction DAG.
//!
//! [`Graph`] turns [`Node::Ref`] links into [`NodeVal`]s through an injected
//! [`NodeSource`], caching recently resolved and written nodes in a bounded
//! hash-keyed arena. A miss falls through to the source, so the arena never
//! has to hold the whole history. Edges stay hash references; the DAG is
//! acyclic by construction because a node's hash covers its parents' hashes.
//!
//! Besides plain resolution the graph answers the questions the sync path
//! needs: which ancestor was last authored by a given instance
//! ([`find_subgraph`](Graph::find_subgraph)), which refs a partially
//! materialized graph still points at ([`reachable_refs`](Graph::reachable_refs)),
//! and the materialized subgraph another store is missing
//! ([`extract`](Graph::extract)).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::error::{CoreError, SourceError};
use crate::hash::Hash;
use crate::id::InstanceId;
use crate::node::{Node, NodeKind, NodeVal};

/// Where unresolved nodes come from (typically a node store).
pub trait NodeSource: Send + Sync {
    /// Loads the node stored under `hash`, `None` if there is none.
    fn load(&self, hash: &Hash) -> Result<Option<NodeVal>, SourceError>;
}

/// Nodes kept resident by default.
pub const DEFAULT_ARENA_CAPACITY: usize = 1024;

/// Bounded node cache; the oldest insertion is evicted first.
struct Arena {
    capacity: usize,
    nodes: HashMap<Hash, Arc<NodeVal>>,
    order: VecDeque<Hash>,
}

impl Arena {
    fn new(capacity: usize) -> Self {
        Arena {
            capacity,
            nodes: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, hash: Hash, val: Arc<NodeVal>) {
        if self.capacity == 0 {
            return;
        }
        if self.nodes.insert(hash, val).is_none() {
            self.order.push_back(hash);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.nodes.remove(&oldest);
            }
        }
    }
}

/// Resolver and arena cache over one node source.
pub struct Graph {
    source: Arc<dyn NodeSource>,
    arena: RwLock<Arena>,
}

impl Graph {
    pub fn new(source: Arc<dyn NodeSource>) -> Self {
        Self::with_capacity(source, DEFAULT_ARENA_CAPACITY)
    }

    /// A graph keeping at most `capacity` nodes resident. Zero disables
    /// caching; every resolve then goes to the source.
    pub fn with_capacity(source: Arc<dyn NodeSource>, capacity: usize) -> Self {
        Graph {
            source,
            arena: RwLock::new(Arena::new(capacity)),
        }
    }

    /// Number of nodes currently resident in the arena.
    pub fn cached_len(&self) -> usize {
        self.arena.read().nodes.len()
    }

    /// Materializes `node`. A `Ref` that neither the arena nor the source
    /// knows is [`CoreError::CorruptedGraph`].
    pub fn resolve(&self, node: &Node) -> Result<Arc<NodeVal>, CoreError> {
        match node {
            Node::Val(val) => Ok(Arc::clone(val)),
            Node::Ref(hash) => self.resolve_hash(hash),
        }
    }

    pub fn resolve_hash(&self, hash: &Hash) -> Result<Arc<NodeVal>, CoreError> {
        if let Some(val) = self.cached(hash) {
            return Ok(val);
        }
        let loaded = self
            .source
            .load(hash)
            .map_err(|source| CoreError::NodeSource {
                hash: *hash,
                source,
            })?
            .ok_or(CoreError::CorruptedGraph { hash: *hash })?;
        let val = Arc::new(loaded.with_hash(*hash));
        self.remember(Arc::clone(&val));
        Ok(val)
    }

    /// True if `hash` resolves, without treating absence as corruption.
    pub fn contains(&self, hash: &Hash) -> Result<bool, CoreError> {
        match self.resolve_hash(hash) {
            Ok(_) => Ok(true),
            Err(CoreError::CorruptedGraph { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Adds an already-hashed node to the arena. The node must also be
    /// loadable from the source, since it may be evicted at any time.
    pub fn remember(&self, val: Arc<NodeVal>) {
        if let Some(hash) = val.hash {
            self.arena.write().insert(hash, val);
        }
    }

    fn cached(&self, hash: &Hash) -> Option<Arc<NodeVal>> {
        self.arena.read().nodes.get(hash).cloned()
    }

    /// Walks the primary lineage from `head` to the root
    /// (`Leaf` → parent, `Merge` → parent1).
    pub fn lineage(&self, head: &Node) -> Lineage<'_> {
        Lineage {
            graph: self,
            next: Some(head.clone()),
        }
    }

    /// Breadth-first from `node` (inclusive) over all parents; returns a ref to
    /// the first node authored by `source`, or `None`.
    pub fn find_subgraph(
        &self,
        node: &Node,
        source: InstanceId,
    ) -> Result<Option<Node>, CoreError> {
        let mut queue = VecDeque::from([node.clone()]);
        let mut seen = HashSet::new();
        while let Some(next) = queue.pop_front() {
            if let Some(hash) = next.hash() {
                if !seen.insert(hash) {
                    continue;
                }
            }
            let val = self.resolve(&next)?;
            if val.source == source {
                return Ok(Some(next.to_ref()));
            }
            queue.extend(val.parents().into_iter().cloned());
        }
        Ok(None)
    }

    /// Every `Ref` reachable from `node` through materialized nodes. Nothing
    /// is resolved; this is what must be fetched before replaying `node`.
    pub fn reachable_refs(node: &Node) -> HashSet<Hash> {
        let mut refs = HashSet::new();
        let mut seen_vals: HashSet<*const NodeVal> = HashSet::new();
        let mut stack = vec![node.clone()];
        while let Some(next) = stack.pop() {
            match next {
                Node::Ref(hash) => {
                    refs.insert(hash);
                }
                Node::Val(val) => {
                    if seen_vals.insert(Arc::as_ptr(&val)) {
                        stack.extend(val.parents().into_iter().cloned());
                    }
                }
            }
        }
        refs
    }

    /// Materializes the subgraph from `head` down to the nodes `have` reports
    /// present. Present nodes become `Ref` boundaries; everything above them
    /// is rebuilt as `Val`s with materialized parent links.
    pub fn extract(&self, head: &Hash, have: impl Fn(&Hash) -> bool) -> Result<Node, CoreError> {
        if have(head) {
            return Ok(Node::Ref(*head));
        }

        // Collect the missing nodes and their parent edges.
        let mut dag: DiGraphMap<Hash, ()> = DiGraphMap::new();
        let mut vals: HashMap<Hash, Arc<NodeVal>> = HashMap::new();
        let mut stack = vec![*head];
        while let Some(hash) = stack.pop() {
            if vals.contains_key(&hash) {
                continue;
            }
            let val = self.resolve_hash(&hash)?;
            dag.add_node(hash);
            for parent in val.parents() {
                let parent_hash = parent
                    .hash()
                    .ok_or(CoreError::CorruptedGraph { hash })?;
                if !have(&parent_hash) {
                    dag.add_edge(parent_hash, hash, ());
                    stack.push(parent_hash);
                }
            }
            vals.insert(hash, val);
        }

        // Ancestors first, so every parent is rebuilt before its children.
        let order = toposort(&dag, None).map_err(|cycle| CoreError::CorruptedGraph {
            hash: cycle.node_id(),
        })?;
        let mut built: HashMap<Hash, Node> = HashMap::new();
        for hash in order {
            let val = &vals[&hash];
            let relink = |parent: &Node| -> Node {
                parent
                    .hash()
                    .and_then(|h| built.get(&h).cloned())
                    .unwrap_or_else(|| parent.to_ref())
            };
            let kind = match &val.kind {
                NodeKind::Root => NodeKind::Root,
                NodeKind::Leaf { parent } => NodeKind::Leaf {
                    parent: relink(parent),
                },
                NodeKind::Merge { parent1, parent2 } => NodeKind::Merge {
                    parent1: relink(parent1),
                    parent2: relink(parent2),
                },
            };
            let rebuilt = NodeVal {
                hash: val.hash,
                source: val.source,
                timestamp: val.timestamp,
                kind,
                data: val.data.clone(),
            };
            built.insert(hash, Node::Val(Arc::new(rebuilt)));
        }
        built
            .remove(head)
            .ok_or(CoreError::CorruptedGraph { hash: *head })
    }
}

/// Iterator over a node's primary lineage, newest first.
pub struct Lineage<'g> {
    graph: &'g Graph,
    next: Option<Node>,
}

impl Iterator for Lineage<'_> {
    type Item = Result<Arc<NodeVal>, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next.take()?;
        match self.graph.resolve(&node) {
            Ok(val) => {
                self.next = val.primary_parent().cloned();
                Some(Ok(val))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
