//! Staged transactions.
//!
//! A [`Trx`] captures the connection's snapshot when it is created and
//! never sees later commits. `persist` unfolds entity drafts into facts,
//! drops everything the snapshot already holds, validates the rest and folds
//! it into a private working index, so reads inside the transaction see its
//! own writes. `commit` appends one node and asks the connection to move its
//! head; if another commit got there first the transaction fails for good.
//!
//! ```text
//! Open --persist--> Open --commit--> Committed --persist--> Open
//!   |                 |
//!   |                 +--commit (stale head)--> ConflictFailed
//!   +--rollback--> RolledBack
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use indexmap::IndexMap;

use strand_core::{meta, Fact, Gid, GidAllocator, Hash, Node, NodeData, NodeVal, Overlay, SchemaLookup, Value};

use crate::conn::{Conn, Snapshot};
use crate::entity::{Entity, EntityId, FieldValue, TempId};
use crate::error::DbError;
use crate::index::Index;
use crate::validator::Validator;
use crate::writer::TrxLog;

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrxState {
    Open,
    /// Last commit succeeded; further `persist` calls reopen it.
    Committed,
    /// Lost a commit race. Terminal.
    ConflictFailed,
    /// Terminal.
    RolledBack,
}

/// What one `persist` call staged.
#[derive(Debug, Clone, Default)]
pub struct WriteResult {
    /// Gids assigned to new entities.
    pub tempids: HashMap<TempId, Gid>,
    /// Facts added to the transaction; empty if nothing changed.
    pub facts: Vec<Fact>,
}

impl WriteResult {
    /// The Gid `entity` was persisted under.
    pub fn gid(&self, entity: &Entity) -> Option<Gid> {
        match entity.id() {
            EntityId::Existing(gid) => Some(gid),
            EntityId::Temp(temp) => self.tempids.get(&temp).copied(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.facts.is_empty()
    }
}

/// Result of a successful `commit`.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// Nothing was staged; no node was appended.
    NoOp,
    /// The new head node.
    Committed(Arc<NodeVal>),
}

impl CommitOutcome {
    pub fn head_hash(&self) -> Option<Hash> {
        match self {
            CommitOutcome::NoOp => None,
            CommitOutcome::Committed(node) => node.hash,
        }
    }
}

/// One entity draft with ids resolved.
struct Draft {
    gid: Gid,
    fields: BTreeMap<String, Vec<Value>>,
}

/// A transaction against one connection.
pub struct Trx<'c> {
    conn: &'c Conn,
    base: Arc<Snapshot>,
    current: Index,
    pending: IndexMap<(Gid, String), Vec<Value>>,
    alloc: GidAllocator,
    state: TrxState,
}

impl<'c> Trx<'c> {
    pub(crate) fn new(conn: &'c Conn, base: Arc<Snapshot>) -> Self {
        let instance = conn.instance();
        let next = base
            .index
            .instance_state(instance)
            .map_or(1, |state| state.next_eid);
        Trx {
            conn,
            current: base.index.clone(),
            base,
            pending: IndexMap::new(),
            alloc: GidAllocator::new(instance, next),
            state: TrxState::Open,
        }
    }

    pub fn state(&self) -> TrxState {
        self.state
    }

    /// The working index: the snapshot plus everything persisted so far.
    pub fn db(&self) -> &Index {
        &self.current
    }

    /// Hash of the head this transaction builds on.
    pub fn base_hash(&self) -> Hash {
        self.base.hash
    }

    /// Number of staged facts.
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Stages the changes `entities` describe.
    ///
    /// On error nothing is staged and the working index is unchanged.
    pub fn persist(&mut self, entities: &[Entity]) -> Result<WriteResult, DbError> {
        self.ensure_usable()?;

        let mut alloc = self.alloc.clone();
        let (drafts, tempids) = unfold(entities, &mut alloc)?;

        let raw: Vec<Fact> = drafts
            .iter()
            .flat_map(|d| {
                d.fields.iter().flat_map(move |(attr, values)| {
                    values.iter().map(move |v| Fact::new(d.gid, attr.as_str(), v.clone()))
                })
            })
            .collect();
        let validator = Validator::new(&self.current);
        let declared = validator.declared_attrs(&raw)?;
        let schema = Overlay {
            top: &declared,
            base: &self.current,
        };

        let mut facts = Vec::new();
        for draft in &drafts {
            let stored = self.current.entity(draft.gid);
            for (attr, values) in &draft.fields {
                let declared_type = schema.attr(attr).map(|a| a.value_type());
                let mut desired: Vec<Value> = Vec::with_capacity(values.len());
                for value in values {
                    let value = match declared_type {
                        Some(ty) if ty.is_integer() => value.clone().coerce_to(ty),
                        _ => value.clone(),
                    };
                    if !desired.contains(&value) {
                        desired.push(value);
                    }
                }
                let current = stored.map_or(&[][..], |facts| facts.values(attr));
                if desired.as_slice() == current || desired.is_empty() {
                    continue;
                }
                facts.extend(desired.into_iter().map(|v| Fact::new(draft.gid, attr.as_str(), v)));
            }
        }

        if alloc.high_water() != self.alloc.high_water() {
            facts.push(Fact::new(
                Gid::instance_entity(alloc.instance()),
                meta::INSTANCE_NEXT_EID,
                i64::from(alloc.high_water()),
            ));
        }

        validator.validate(&facts)?;

        if facts.is_empty() {
            tracing::debug!(entities = entities.len(), "persist changed nothing");
            return Ok(WriteResult {
                tempids,
                facts,
            });
        }

        self.stage(&facts);
        self.alloc = alloc;
        tracing::debug!(facts = facts.len(), new = tempids.len(), "staged facts");
        Ok(WriteResult { tempids, facts })
    }

    /// Stages a tombstone for `gid`. Deleting an absent entity stages nothing.
    pub fn delete(&mut self, gid: Gid) -> Result<WriteResult, DbError> {
        self.ensure_usable()?;
        if !self.current.contains(gid) {
            return Ok(WriteResult::default());
        }
        let facts = vec![Fact::new(gid, meta::TOMBSTONE, true)];
        Validator::new(&self.current).validate(&facts)?;
        self.stage(&facts);
        Ok(WriteResult {
            tempids: HashMap::new(),
            facts,
        })
    }

    /// Appends the staged facts and moves the connection's head.
    ///
    /// With nothing staged this is [`CommitOutcome::NoOp`]. A stale base head
    /// fails with [`DbError::ConcurrentModification`] and leaves the
    /// transaction in [`TrxState::ConflictFailed`].
    pub fn commit(&mut self) -> Result<CommitOutcome, DbError> {
        self.ensure_usable()?;
        if self.pending.is_empty() {
            self.state = TrxState::Committed;
            return Ok(CommitOutcome::NoOp);
        }

        let data: NodeData = self
            .pending
            .iter()
            .flat_map(|((gid, attr), values)| {
                values.iter().map(move |v| Fact::new(*gid, attr.as_str(), v.clone()))
            })
            .collect();
        let node = self
            .conn
            .writer()
            .append(&Node::Val(Arc::clone(&self.base.head)), data)?;
        let next = Arc::new(Snapshot::new(Arc::clone(&node), self.current.clone())?);

        if let Err(err) = self.conn.update(self.base.hash, Arc::clone(&next)) {
            if err.is_conflict() {
                self.state = TrxState::ConflictFailed;
                self.pending.clear();
            }
            return Err(err);
        }

        self.base = next;
        self.pending.clear();
        self.state = TrxState::Committed;
        Ok(CommitOutcome::Committed(node))
    }

    /// Discards everything staged. Later `persist`/`commit` calls fail.
    pub fn rollback(&mut self) {
        self.pending.clear();
        self.current = self.base.index.clone();
        self.state = TrxState::RolledBack;
    }

    fn ensure_usable(&mut self) -> Result<(), DbError> {
        match self.state {
            TrxState::RolledBack => Err(DbError::TransactionAlreadyRolledBack),
            TrxState::ConflictFailed => Err(DbError::TransactionConflicted),
            TrxState::Open | TrxState::Committed => {
                self.state = TrxState::Open;
                Ok(())
            }
        }
    }

    /// Records `facts` as pending, one group per `(entity, attr)`; a later
    /// group for the same pair replaces the earlier one.
    fn stage(&mut self, facts: &[Fact]) {
        let mut groups: IndexMap<(Gid, String), Vec<Value>> = IndexMap::new();
        for fact in facts {
            groups
                .entry((fact.entity, fact.attr.clone()))
                .or_default()
                .push(fact.value.clone());
        }
        for (key, values) in groups {
            self.pending.insert(key, values);
        }
        self.current = self.current.add_facts(facts);
    }
}

/// Flattens drafts and their nested drafts, assigning one Gid per temp id.
fn unfold(
    entities: &[Entity],
    alloc: &mut GidAllocator,
) -> Result<(Vec<Draft>, HashMap<TempId, Gid>), DbError> {
    fn collect<'e>(entity: &'e Entity, out: &mut Vec<&'e Entity>) {
        out.push(entity);
        for (_, field) in entity.fields() {
            for value in &field.values {
                if let FieldValue::Nested(child) = value {
                    collect(child, out);
                }
            }
        }
    }

    let mut flat = Vec::new();
    for entity in entities {
        collect(entity, &mut flat);
    }

    let mut tempids = HashMap::new();
    for entity in &flat {
        if let EntityId::Temp(temp) = entity.id() {
            if !tempids.contains_key(&temp) {
                tempids.insert(temp, alloc.allocate()?);
            }
        }
    }

    let resolve = |id: EntityId| -> Result<Gid, DbError> {
        match id {
            EntityId::Existing(gid) => Ok(gid),
            EntityId::Temp(temp) => tempids
                .get(&temp)
                .copied()
                .ok_or(DbError::UnresolvedTempId { temp }),
        }
    };

    let mut drafts: Vec<Draft> = Vec::new();
    let mut by_gid: HashMap<Gid, usize> = HashMap::new();
    for entity in flat {
        let gid = resolve(entity.id())?;
        let mut fields = BTreeMap::new();
        for (attr, field) in entity.fields() {
            let mut values = Vec::with_capacity(field.values.len());
            for value in &field.values {
                values.push(match value {
                    FieldValue::Value(v) => v.clone(),
                    FieldValue::Ref(id) => Value::Ref(resolve(*id)?),
                    FieldValue::Nested(child) => Value::Ref(resolve(child.id())?),
                });
            }
            fields.insert(attr.clone(), values);
        }
        match by_gid.get(&gid) {
            Some(&seen) if drafts[seen].fields == fields => {}
            Some(_) => return Err(DbError::ConflictingEntityStates { entity: gid }),
            None => {
                by_gid.insert(gid, drafts.len());
                drafts.push(Draft { gid, fields });
            }
        }
    }

    Ok((drafts, tempids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Pred;
    use crate::schema::AttrDef;
    use strand_core::ValueType;

    fn conn() -> Conn {
        let conn = Conn::open_memory().unwrap();
        conn.declare(&[
            AttrDef::new("User/name", ValueType::Str).unique(),
            AttrDef::new("User/age", ValueType::Int),
            AttrDef::new("User/tags", ValueType::Str).list(),
            AttrDef::new("User/friend", ValueType::Ref),
        ])
        .unwrap();
        conn
    }

    #[test]
    fn reads_own_writes_before_commit() {
        let conn = conn();
        let mut trx = conn.trx();
        let ann = Entity::new().set("User/name", "ann");
        let result = trx.persist(&[ann.clone()]).unwrap();
        let gid = result.gid(&ann).unwrap();

        assert_eq!(trx.db().entity(gid).unwrap().get("User/name"), Some(&Value::from("ann")));
        assert!(conn.db().entity(gid).is_none());

        trx.commit().unwrap();
        assert!(conn.db().entity(gid).is_some());
    }

    #[test]
    fn new_entities_get_ids_from_the_instance_and_advance_next_eid() {
        let conn = conn();
        let before = conn.db().instance_state(conn.instance()).unwrap().next_eid;
        let a = Entity::new().set("User/name", "a");
        let b = Entity::new().set("User/name", "b");
        let result = conn.persist(&[a.clone(), b.clone()]).unwrap();

        let ga = result.gid(&a).unwrap();
        let gb = result.gid(&b).unwrap();
        assert_eq!(ga.instance, conn.instance().0);
        assert_eq!(ga.local, before);
        assert_eq!(gb.local, before + 1);
        assert_eq!(
            conn.db().instance_state(conn.instance()).unwrap().next_eid,
            before + 2
        );
    }

    #[test]
    fn unchanged_attributes_are_not_restaged() {
        let conn = conn();
        let ann = Entity::new().set("User/name", "ann").set("User/age", 30);
        let gid = conn.persist(&[ann.clone()]).unwrap().gid(&ann).unwrap();

        let mut trx = conn.trx();
        let result = trx
            .persist(&[Entity::existing(gid).set("User/name", "ann").set("User/age", 31)])
            .unwrap();
        assert_eq!(result.facts, vec![Fact::new(gid, "User/age", Value::Int(31))]);
    }

    #[test]
    fn integer_values_take_the_declared_type() {
        let conn = conn();
        let ann = Entity::new().set("User/name", "ann").set("User/age", 30i64);
        let gid = conn.persist(&[ann.clone()]).unwrap().gid(&ann).unwrap();
        assert_eq!(conn.db().entity(gid).unwrap().get("User/age"), Some(&Value::Int(30)));
    }

    #[test]
    fn failed_persist_leaves_working_state_alone() {
        let conn = conn();
        let mut trx = conn.trx();
        trx.persist(&[Entity::new().set("User/name", "ann")]).unwrap();
        let staged = trx.pending_len();
        let facts = trx.db().fact_count();

        let err = trx
            .persist(&[Entity::new().set("User/name", "ann")])
            .unwrap_err();
        assert!(matches!(err, DbError::UniquenessViolation { .. }));
        assert_eq!(trx.pending_len(), staged);
        assert_eq!(trx.db().fact_count(), facts);
        assert_eq!(trx.state(), TrxState::Open);
    }

    #[test]
    fn nested_entities_share_one_gid_per_draft() {
        let conn = conn();
        let bob = Entity::new().set("User/name", "bob");
        let ann = Entity::new()
            .set("User/name", "ann")
            .set_entity("User/friend", bob.clone());
        let cat = Entity::new().set("User/name", "cat").set_ref("User/friend", &bob);
        let result = conn.persist(&[ann.clone(), cat.clone(), bob.clone()]).unwrap();

        let bob_gid = result.gid(&bob).unwrap();
        let db = conn.db();
        let ann_gid = result.gid(&ann).unwrap();
        let cat_gid = result.gid(&cat).unwrap();
        assert_eq!(db.entity(ann_gid).unwrap().get("User/friend"), Some(&Value::Ref(bob_gid)));
        assert_eq!(db.entity(cat_gid).unwrap().get("User/friend"), Some(&Value::Ref(bob_gid)));
        assert_eq!(result.tempids.len(), 3);
    }

    #[test]
    fn conflicting_drafts_are_rejected() {
        let conn = conn();
        let ann = Entity::new().set("User/name", "ann");
        let gid = conn.persist(&[ann.clone()]).unwrap().gid(&ann).unwrap();

        let err = conn
            .trx()
            .persist(&[
                Entity::existing(gid).set("User/age", 1),
                Entity::existing(gid).set("User/age", 2),
            ])
            .unwrap_err();
        assert!(matches!(err, DbError::ConflictingEntityStates { entity } if entity == gid));
    }

    #[test]
    fn refs_to_drafts_outside_the_call_are_unresolved() {
        let conn = conn();
        let stray = Entity::new().set("User/name", "stray");
        let err = conn
            .trx()
            .persist(&[Entity::new().set_ref("User/friend", &stray)])
            .unwrap_err();
        assert!(matches!(err, DbError::UnresolvedTempId { .. }));
    }

    #[test]
    fn rolled_back_trx_rejects_further_use() {
        let conn = conn();
        let mut trx = conn.trx();
        trx.persist(&[Entity::new().set("User/name", "ann")]).unwrap();
        trx.rollback();
        assert_eq!(trx.state(), TrxState::RolledBack);
        assert_eq!(trx.pending_len(), 0);
        assert!(matches!(
            trx.persist(&[Entity::new().set("User/name", "bob")]),
            Err(DbError::TransactionAlreadyRolledBack)
        ));
        assert!(matches!(trx.commit(), Err(DbError::TransactionAlreadyRolledBack)));
        assert_eq!(conn.db().query(&[Pred::has("User/name")]).count(), 0);
    }

    #[test]
    fn committed_trx_chains_further_commits() {
        let conn = conn();
        let mut trx = conn.trx();
        trx.persist(&[Entity::new().set("User/name", "ann")]).unwrap();
        let first = trx.commit().unwrap().head_hash().unwrap();
        assert_eq!(trx.state(), TrxState::Committed);
        assert_eq!(trx.base_hash(), first);

        trx.persist(&[Entity::new().set("User/name", "bob")]).unwrap();
        let second = trx.commit().unwrap().head_hash().unwrap();
        assert_eq!(conn.head_hash(), second);
        assert_eq!(conn.db().query(&[Pred::has("User/name")]).count(), 2);
    }

    #[test]
    fn repeated_persists_of_one_attribute_commit_one_value() {
        let conn = conn();
        let ann = Entity::new().set("User/name", "ann");
        let gid = conn.persist(&[ann.clone()]).unwrap().gid(&ann).unwrap();

        let mut trx = conn.trx();
        trx.persist(&[Entity::existing(gid).set("User/age", 1)]).unwrap();
        trx.persist(&[Entity::existing(gid).set("User/age", 2)]).unwrap();
        trx.persist(&[Entity::new().set("User/name", "bob")]).unwrap();
        trx.persist(&[Entity::new().set("User/name", "cat")]).unwrap();
        let head = match trx.commit().unwrap() {
            CommitOutcome::Committed(node) => node,
            CommitOutcome::NoOp => panic!("expected a node"),
        };
        let ages: Vec<&Fact> = head.data.iter().filter(|f| f.attr == "User/age").collect();
        assert_eq!(ages.len(), 1);
        let next_eids = head
            .data
            .iter()
            .filter(|f| f.attr == meta::INSTANCE_NEXT_EID)
            .count();
        assert_eq!(next_eids, 1);
    }
}
