//! Forking instances and merging their histories.
//!
//! An instance owns a range of instance ids. [`Conn::fork`] hands the upper
//! half of it to a new child instance; the child's connection starts from a
//! copy of the parent's graph ([`Conn::open_fork`]) and from then on both
//! allocate disjoint Gids. [`Conn::merge_from`] pulls the other side's
//! missing nodes and records a `Merge` node reconciling the two heads:
//!
//! - scalar attributes: the newest write wins, by node timestamp
//! - list attributes: union of both sides
//! - tombstones: a deletion on either side deletes the entity

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use strand_core::{meta, Attr, Fact, Gid, Graph, Hash, InstanceId, Node, NodeVal, Overlay, SchemaLookup, Value};
use strand_storage::NodeStore;

use crate::config::DbConfig;
use crate::conn::{Conn, Snapshot};
use crate::entity::Entity;
use crate::error::DbError;
use crate::index::Index;
use crate::writer::{TrxLog, Writer};

/// Result of [`Conn::merge_from`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The other head is already part of our history.
    UpToDate,
    /// A `Merge` node was committed.
    Merged { head: Hash, facts: usize },
}

impl Conn {
    /// Splits this instance's id range and commits the child's `Instance`
    /// entity. Returns the child's id.
    pub fn fork(&self) -> Result<InstanceId, DbError> {
        let snapshot = self.snapshot();
        let state = snapshot
            .index
            .instance_state(self.instance())
            .ok_or(DbError::UnknownInstance {
                instance: self.instance(),
            })?;
        let (parent, child) = state.space.fork()?;

        self.persist(&[
            Entity::existing(Gid::instance_entity(parent.id))
                .set(meta::INSTANCE_SPAN, parent.span as i64),
            Entity::existing(Gid::instance_entity(child.id))
                .set(meta::INSTANCE_ID, i64::from(child.id.0))
                .set(meta::INSTANCE_SPAN, child.span as i64)
                .set(meta::INSTANCE_NEXT_EID, 1i64),
        ])?;
        tracing::info!(
            "Forked instance {} from {} (span {})",
            child.id,
            parent.id,
            child.span
        );
        Ok(child.id)
    }

    /// Opens a connection for `instance` on `store`, seeding the store with
    /// `parent`'s graph if it has no head yet.
    pub fn open_fork(parent: &Conn, store: NodeStore, instance: InstanceId) -> Result<Conn, DbError> {
        if store.head()?.is_none() {
            let head = parent.head_hash();
            let extracted = parent
                .graph
                .extract(&head, |hash| store.contains(hash).unwrap_or(false))?;
            let copy = Conn::seed_writer(&store, instance);
            let copied = copy.append_graph(&extracted)?;
            let hash = copied.hash.ok_or_else(|| DbError::NodeStoreError {
                reason: "copied head has no hash".into(),
            })?;
            store.set_head(&hash)?;
            tracing::info!("Seeded fork store for instance {} at {}", instance, hash.short());
        }
        let config = DbConfig {
            instance,
            ..parent.config
        };
        Conn::open(store, config)
    }

    /// Reconciles `remote`'s history into ours with a `Merge` node.
    pub fn merge_from(&self, remote: &Conn) -> Result<MergeOutcome, DbError> {
        let ours = self.snapshot();
        let theirs = remote.snapshot();
        if ours.hash == theirs.hash {
            return Ok(MergeOutcome::UpToDate);
        }

        let extracted = remote
            .graph
            .extract(&theirs.hash, |hash| self.store.contains(hash).unwrap_or(false))?;
        self.writer.append_graph(&extracted)?;

        let reach_ours = self.ancestors(ours.hash)?;
        if reach_ours.contains_key(&theirs.hash) {
            return Ok(MergeOutcome::UpToDate);
        }
        let reach_theirs = self.ancestors(theirs.hash)?;

        let local: Vec<&Arc<NodeVal>> = reach_ours
            .iter()
            .filter(|(hash, _)| !reach_theirs.contains_key(*hash))
            .map(|(_, node)| node)
            .collect();
        let mut remote_only: Vec<&Arc<NodeVal>> = reach_theirs
            .iter()
            .filter(|(hash, _)| !reach_ours.contains_key(*hash))
            .map(|(_, node)| node)
            .collect();
        remote_only.sort_by_key(|node| (node.timestamp, node.hash));

        let facts = reconcile(self.instance(), &ours.index, &theirs.index, &local, &remote_only);
        let merge = self.writer.merge_with(
            &Node::Val(Arc::clone(&ours.head)),
            &Node::Ref(theirs.hash),
            facts.clone(),
        )?;
        let next = Arc::new(Snapshot::new(Arc::clone(&merge), ours.index.add_facts(&facts))?);
        let head = next.hash;
        self.update(ours.hash, next)?;
        tracing::info!(
            "Merged {} from instance {} ({} remote nodes, {} facts)",
            theirs.hash.short(),
            remote.instance(),
            remote_only.len(),
            facts.len()
        );
        Ok(MergeOutcome::Merged {
            head,
            facts: facts.len(),
        })
    }

    fn seed_writer(store: &NodeStore, instance: InstanceId) -> Writer {
        let graph = Arc::new(Graph::new(Arc::new(store.clone())));
        Writer::new(store.clone(), graph, instance)
    }

    /// Every node reachable from `head` through all parents, by hash.
    fn ancestors(&self, head: Hash) -> Result<HashMap<Hash, Arc<NodeVal>>, DbError> {
        let mut seen = HashMap::new();
        let mut stack = vec![head];
        while let Some(hash) = stack.pop() {
            if seen.contains_key(&hash) {
                continue;
            }
            let node = self.graph.resolve_hash(&hash)?;
            for parent in node.parents() {
                let parent_hash = parent.hash().ok_or(DbError::CorruptedGraph { hash })?;
                stack.push(parent_hash);
            }
            seen.insert(hash, node);
        }
        Ok(seen)
    }
}

/// Facts the merge node must carry so that our index reflects both sides.
///
/// `local` are nodes only we have; `remote` are nodes only they have, oldest
/// first. Writes to our own `Instance` entity never come from the remote.
fn reconcile(
    instance: InstanceId,
    ours: &Index,
    theirs: &Index,
    local: &[&Arc<NodeVal>],
    remote: &[&Arc<NodeVal>],
) -> Vec<Fact> {
    let own_entity = Gid::instance_entity(instance);

    let mut local_latest: HashMap<(Gid, &str), DateTime<Utc>> = HashMap::new();
    for node in local {
        for fact in &node.data {
            let entry = local_latest
                .entry((fact.entity, fact.attr.as_str()))
                .or_insert(node.timestamp);
            *entry = (*entry).max(node.timestamp);
        }
    }

    let mut remote_groups: IndexMap<(Gid, &str), (DateTime<Utc>, Vec<Value>)> = IndexMap::new();
    let mut remote_deleted = BTreeSet::new();
    for node in remote {
        let mut batch: IndexMap<(Gid, &str), Vec<Value>> = IndexMap::new();
        for fact in &node.data {
            if fact.attr == meta::TOMBSTONE {
                if fact.value == Value::Bool(true) {
                    remote_deleted.insert(fact.entity);
                }
                continue;
            }
            let values = batch.entry((fact.entity, fact.attr.as_str())).or_default();
            if !values.contains(&fact.value) {
                values.push(fact.value.clone());
            }
        }
        for (key, values) in batch {
            remote_groups.insert(key, (node.timestamp, values));
        }
    }

    let schema = Overlay {
        top: ours,
        base: theirs,
    };
    let mut out = Vec::new();
    for ((entity, attr), (written, values)) in remote_groups {
        if entity == own_entity || ours.is_tombstoned(entity) || remote_deleted.contains(&entity) {
            continue;
        }
        let current: Vec<Value> = ours
            .entity(entity)
            .map(|facts| facts.values(attr).to_vec())
            .unwrap_or_default();
        let merged = if schema.attr(attr).is_some_and(Attr::is_list) {
            let mut union = current.clone();
            for value in values {
                if !union.contains(&value) {
                    union.push(value);
                }
            }
            union
        } else {
            let local_newer = local_latest
                .get(&(entity, attr))
                .is_some_and(|ours_written| *ours_written > written);
            if local_newer {
                continue;
            }
            values
        };
        if merged != current {
            out.extend(merged.into_iter().map(|v| Fact::new(entity, attr, v)));
        }
    }

    for gid in remote_deleted {
        if !ours.is_tombstoned(gid) {
            out.push(Fact::new(gid, meta::TOMBSTONE, true));
        }
    }
    out
}
