//! Database connections.
//!
//! A [`Conn`] owns the node store, a resolving [`Graph`] over it and the
//! current [`Snapshot`] (head node plus its index). Readers clone the
//! snapshot `Arc` and never block writers; commits swap it under a short
//! lock after a compare-and-set on the head hash.

use std::sync::Arc;

use parking_lot::Mutex;

use strand_core::history::{HistoryGraph, NodeSummary};
use strand_core::{Gid, Graph, Hash, InstanceId, Node, NodeVal};
use strand_storage::{MemoryStore, NodeStore, SqliteStore};

use crate::config::DbConfig;
use crate::entity::Entity;
use crate::error::DbError;
use crate::index::Index;
use crate::schema::{bootstrap_facts, AttrDef};
use crate::trx::{CommitOutcome, Trx, WriteResult};
use crate::writer::Writer;

/// A committed head and the index built from it.
#[derive(Debug)]
pub struct Snapshot {
    pub hash: Hash,
    pub head: Arc<NodeVal>,
    pub index: Index,
}

impl Snapshot {
    pub fn new(head: Arc<NodeVal>, index: Index) -> Result<Self, DbError> {
        let hash = head.hash.ok_or_else(|| DbError::NodeStoreError {
            reason: "snapshot head is not stored".into(),
        })?;
        Ok(Snapshot { hash, head, index })
    }
}

/// A connection to one database, writing as one instance.
pub struct Conn {
    pub(crate) store: NodeStore,
    pub(crate) graph: Arc<Graph>,
    pub(crate) writer: Writer,
    pub(crate) config: DbConfig,
    current: Mutex<Arc<Snapshot>>,
}

impl Conn {
    /// Opens the database in `store`, bootstrapping it if it has no head.
    ///
    /// Only the root instance can bootstrap. A non-root instance must find
    /// its `Instance` entity under the stored head, else
    /// [`DbError::UnknownInstance`].
    pub fn open(store: NodeStore, config: DbConfig) -> Result<Self, DbError> {
        let graph = Arc::new(Graph::new(Arc::new(store.clone())));
        let writer = Writer::new(store.clone(), Arc::clone(&graph), config.instance);

        let head = match store.head()? {
            Some(hash) => graph.resolve_hash(&hash)?,
            None => {
                if config.instance != InstanceId::ROOT {
                    return Err(DbError::UnknownInstance {
                        instance: config.instance,
                    });
                }
                let root = writer.store_root(bootstrap_facts())?;
                let hash = root.hash.ok_or_else(|| DbError::NodeStoreError {
                    reason: "root node was stored without a hash".into(),
                })?;
                store.set_head(&hash)?;
                tracing::info!("Bootstrapped new database at {}", hash.short());
                root
            }
        };

        if config.verify_on_open {
            verify_lineage(&store, &graph, &head)?;
        }

        let index = Index::build(&graph, &Node::Val(Arc::clone(&head)))?;
        if index.instance_state(config.instance).is_none() {
            return Err(DbError::UnknownInstance {
                instance: config.instance,
            });
        }
        let snapshot = Snapshot::new(head, index)?;
        tracing::info!(
            "Opened database at {} as instance {} ({} entities)",
            snapshot.hash.short(),
            config.instance,
            snapshot.index.entity_count()
        );

        Ok(Conn {
            store,
            graph,
            writer,
            config,
            current: Mutex::new(Arc::new(snapshot)),
        })
    }

    /// A fresh in-memory database owned by the root instance.
    pub fn open_memory() -> Result<Self, DbError> {
        Self::open(NodeStore::new(Arc::new(MemoryStore::new())), DbConfig::default())
    }

    /// Opens (or creates) a SQLite-backed database at `path`.
    pub fn open_sqlite(path: &str, config: DbConfig) -> Result<Self, DbError> {
        let bytes = SqliteStore::new(path)?;
        Self::open(NodeStore::new(Arc::new(bytes)), config)
    }

    pub fn instance(&self) -> InstanceId {
        self.config.instance
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub(crate) fn writer(&self) -> &Writer {
        &self.writer
    }

    /// The current snapshot. Later commits do not affect it.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.lock().clone()
    }

    /// The current index.
    pub fn db(&self) -> Index {
        self.snapshot().index.clone()
    }

    pub fn head(&self) -> Arc<NodeVal> {
        Arc::clone(&self.snapshot().head)
    }

    pub fn head_hash(&self) -> Hash {
        self.snapshot().hash
    }

    /// Starts a transaction on the current snapshot.
    pub fn trx(&self) -> Trx<'_> {
        Trx::new(self, self.snapshot())
    }

    /// Persists `entities` in a transaction of their own and commits it.
    pub fn persist(&self, entities: &[Entity]) -> Result<WriteResult, DbError> {
        let mut trx = self.trx();
        let result = trx.persist(entities)?;
        trx.commit()?;
        Ok(result)
    }

    /// Declares attributes in one commit.
    pub fn declare(&self, defs: &[AttrDef]) -> Result<WriteResult, DbError> {
        let drafts: Vec<Entity> = defs.iter().map(AttrDef::to_entity).collect();
        self.persist(&drafts)
    }

    /// Tombstones `gid` in a transaction of its own.
    pub fn delete(&self, gid: Gid) -> Result<CommitOutcome, DbError> {
        let mut trx = self.trx();
        trx.delete(gid)?;
        trx.commit()
    }

    /// Moves the head from `expected` to `next`.
    ///
    /// Fails with [`DbError::ConcurrentModification`] if the head is no
    /// longer `expected`; the durable head and the snapshot are then
    /// untouched.
    pub fn update(&self, expected: Hash, next: Arc<Snapshot>) -> Result<(), DbError> {
        let mut current = self.current.lock();
        if current.hash != expected {
            tracing::warn!(
                "Rejected commit based on {}: head moved to {}",
                expected.short(),
                current.hash.short()
            );
            return Err(DbError::ConcurrentModification {
                expected,
                actual: current.hash,
            });
        }
        self.store.set_head(&next.hash)?;
        tracing::info!("Head {} -> {}", expected.short(), next.hash.short());
        *current = next;
        Ok(())
    }

    /// The primary lineage from the head, newest first.
    pub fn log(&self, limit: usize) -> Result<Vec<NodeSummary>, DbError> {
        let mut out = Vec::new();
        for node in self.graph.lineage(&Node::Val(self.head())).take(limit) {
            let node = node?;
            let Some(hash) = node.hash else { continue };
            out.push(NodeSummary {
                hash,
                kind: node.kind_name(),
                source: node.source,
                timestamp: node.timestamp,
                fact_count: node.data.len(),
            });
        }
        Ok(out)
    }

    /// Every node reachable from the head, through both merge parents.
    pub fn history(&self) -> Result<HistoryGraph, DbError> {
        Ok(HistoryGraph::load(&self.graph, &Node::Val(self.head()))?)
    }
}

/// Re-hashes every stored node on the primary lineage of `head`.
fn verify_lineage(store: &NodeStore, graph: &Graph, head: &Arc<NodeVal>) -> Result<(), DbError> {
    let mut checked = 0usize;
    for node in graph.lineage(&Node::Val(Arc::clone(head))) {
        let node = node?;
        let hash = node.hash.ok_or_else(|| DbError::NodeStoreError {
            reason: "lineage node has no hash".into(),
        })?;
        if !store.verify(&hash)? {
            return Err(DbError::CorruptedGraph { hash });
        }
        checked += 1;
    }
    tracing::info!("Verified {} nodes on the head lineage", checked);
    Ok(())
}
