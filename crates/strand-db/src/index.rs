//! The fact index: the queryable view of everything visible from one head.
//!
//! An [`Index`] holds two structures over the same facts:
//!
//! - `entities`: Gid → attribute → ordered values, for point lookups;
//! - `eav`: a sorted vector of `(attr, value, entity)` entries, for
//!   predicate lookups by binary search.
//!
//! plus the set of tombstoned entities and the attribute schema derived from
//! meta-attribute facts. Indexes are immutable values: [`Index::add_facts`]
//! returns a new index and leaves the receiver untouched, sharing every entity
//! the batch did not touch.
//!
//! Within one batch, facts are grouped per `(entity, attr)`; a group replaces
//! whatever that pair held before, and the values inside a group accumulate
//! (de-duplicated, in order) for list attributes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use strand_core::{meta, Attr, AttrValues, EntityFacts, Fact, Gid, Graph, Node, SchemaLookup, Value};

use crate::error::DbError;
use crate::schema::{attr_from_entity, InstanceState};

/// One secondary-index entry. Derived order: attribute, then value, then entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Eav {
    attr: String,
    value: Value,
    entity: Gid,
}

/// A query predicate over one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Pred {
    /// The entity has any value for the attribute.
    HasAttr(String),
    /// The entity has exactly this value.
    AttrValue(String, Value),
    /// The entity has a value in `[from, to]`.
    AttrRange(String, Value, Value),
}

impl Pred {
    pub fn has(attr: impl Into<String>) -> Self {
        Pred::HasAttr(attr.into())
    }

    pub fn eq(attr: impl Into<String>, value: impl Into<Value>) -> Self {
        Pred::AttrValue(attr.into(), value.into())
    }

    pub fn range(attr: impl Into<String>, from: impl Into<Value>, to: impl Into<Value>) -> Self {
        Pred::AttrRange(attr.into(), from.into(), to.into())
    }

    pub fn attr(&self) -> &str {
        match self {
            Pred::HasAttr(attr) | Pred::AttrValue(attr, _) | Pred::AttrRange(attr, _, _) => attr,
        }
    }
}

/// Immutable fact index.
#[derive(Debug, Clone, Default)]
pub struct Index {
    entities: Arc<BTreeMap<Gid, Arc<EntityFacts>>>,
    eav: Arc<Vec<Eav>>,
    tombstones: Arc<BTreeSet<Gid>>,
    schema: Arc<HashMap<String, Attr>>,
}

/// How one `(entity, attr)` pair changed in a batch.
struct Change {
    entity: Gid,
    attr: String,
    old: AttrValues,
    new: AttrValues,
}

/// Facts of one batch grouped by `(entity, attr)`, in first-seen order.
fn group_batch(facts: &[Fact]) -> (IndexMap<(Gid, &str), AttrValues>, BTreeSet<Gid>) {
    let mut groups: IndexMap<(Gid, &str), AttrValues> = IndexMap::new();
    let mut deleted = BTreeSet::new();
    for fact in facts {
        if fact.attr == meta::TOMBSTONE {
            if fact.value == Value::Bool(true) {
                deleted.insert(fact.entity);
            }
            continue;
        }
        let values = groups.entry((fact.entity, fact.attr.as_str())).or_default();
        if !values.contains(&fact.value) {
            values.push(fact.value.clone());
        }
    }
    (groups, deleted)
}

impl Index {
    /// An index with no facts.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the index of everything visible from `head`, following the
    /// primary lineage (`Leaf` → parent, `Merge` → parent1).
    pub fn build(graph: &Graph, head: &Node) -> Result<Index, DbError> {
        let mut nodes = Vec::new();
        for node in graph.lineage(head) {
            nodes.push(node?);
        }

        let mut entities: BTreeMap<Gid, EntityFacts> = BTreeMap::new();
        let mut tombstones = BTreeSet::new();
        // Oldest first, so later groups replace earlier ones.
        for node in nodes.iter().rev() {
            let (groups, deleted) = group_batch(&node.data);
            for ((entity, attr), values) in groups {
                if tombstones.contains(&entity) || deleted.contains(&entity) {
                    continue;
                }
                entities.entry(entity).or_default().set(attr, values);
            }
            for gid in deleted {
                entities.remove(&gid);
                tombstones.insert(gid);
            }
        }
        entities.retain(|_, facts| !facts.is_empty());

        let mut eav: Vec<Eav> = entities
            .iter()
            .flat_map(|(gid, facts)| {
                facts.iter().flat_map(move |(attr, values)| {
                    values.iter().map(move |value| Eav {
                        attr: attr.to_string(),
                        value: value.clone(),
                        entity: *gid,
                    })
                })
            })
            .collect();
        eav.sort();

        let mut schema = HashMap::new();
        for (gid, facts) in &entities {
            if let Some(Ok(attr)) = attr_from_entity(*gid, facts) {
                schema.insert(attr.name.clone(), attr);
            }
        }

        tracing::debug!(
            nodes = nodes.len(),
            entities = entities.len(),
            facts = eav.len(),
            "built index"
        );

        Ok(Index {
            entities: Arc::new(
                entities
                    .into_iter()
                    .map(|(gid, facts)| (gid, Arc::new(facts)))
                    .collect(),
            ),
            eav: Arc::new(eav),
            tombstones: Arc::new(tombstones),
            schema: Arc::new(schema),
        })
    }

    /// Folds one batch (one node's data) into a new index.
    pub fn add_facts(&self, facts: &[Fact]) -> Index {
        if facts.is_empty() {
            return self.clone();
        }
        let (groups, deleted) = group_batch(facts);

        let mut entities = (*self.entities).clone();
        let mut tombstones = (*self.tombstones).clone();
        let mut changes: Vec<Change> = Vec::new();
        let mut touched: HashSet<Gid> = HashSet::new();

        for ((entity, attr), values) in groups {
            if tombstones.contains(&entity) || deleted.contains(&entity) {
                continue;
            }
            let slot = entities.entry(entity).or_default();
            let old = Arc::make_mut(slot).set(attr, values.clone()).unwrap_or_default();
            if old != values {
                changes.push(Change {
                    entity,
                    attr: attr.to_string(),
                    old,
                    new: values,
                });
            }
            touched.insert(entity);
        }

        for gid in &deleted {
            if let Some(removed) = entities.remove(gid) {
                for (attr, values) in removed.iter() {
                    changes.push(Change {
                        entity: *gid,
                        attr: attr.to_string(),
                        old: values.iter().cloned().collect(),
                        new: AttrValues::new(),
                    });
                }
            }
            tombstones.insert(*gid);
        }
        entities.retain(|_, facts| !facts.is_empty());

        let mut eav = (*self.eav).clone();
        for change in &changes {
            for value in &change.old {
                let entry = Eav {
                    attr: change.attr.clone(),
                    value: value.clone(),
                    entity: change.entity,
                };
                if let Ok(pos) = eav.binary_search(&entry) {
                    eav.remove(pos);
                }
            }
            for value in &change.new {
                let entry = Eav {
                    attr: change.attr.clone(),
                    value: value.clone(),
                    entity: change.entity,
                };
                if let Err(pos) = eav.binary_search(&entry) {
                    eav.insert(pos, entry);
                }
            }
        }

        let schema = if changes.iter().any(|c| meta::is_attr_meta(&c.attr)) {
            let mut schema = (*self.schema).clone();
            schema.retain(|_, attr| !deleted.contains(&attr.id));
            for gid in &touched {
                if let Some(Ok(attr)) = entities.get(gid).and_then(|f| attr_from_entity(*gid, f)) {
                    schema.insert(attr.name.clone(), attr);
                }
            }
            Arc::new(schema)
        } else {
            Arc::clone(&self.schema)
        };

        Index {
            entities: Arc::new(entities),
            eav: Arc::new(eav),
            tombstones: Arc::new(tombstones),
            schema,
        }
    }

    /// Visible facts of `gid`; `None` if absent or tombstoned.
    pub fn entity(&self, gid: Gid) -> Option<&EntityFacts> {
        self.entities.get(&gid).map(Arc::as_ref)
    }

    pub fn contains(&self, gid: Gid) -> bool {
        self.entities.contains_key(&gid)
    }

    pub fn is_tombstoned(&self, gid: Gid) -> bool {
        self.tombstones.contains(&gid)
    }

    /// Visible entity ids, ascending.
    pub fn entity_ids(&self) -> impl Iterator<Item = Gid> + '_ {
        self.entities.keys().copied()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn fact_count(&self) -> usize {
        self.eav.len()
    }

    /// Every known attribute, by name.
    pub fn attrs(&self) -> impl Iterator<Item = &Attr> {
        self.schema.values()
    }

    /// Committed state of `instance`, if its `Instance` entity exists.
    pub fn instance_state(&self, instance: strand_core::InstanceId) -> Option<InstanceState> {
        self.entity(Gid::instance_entity(instance))
            .and_then(InstanceState::from_entity)
    }

    /// Integer predicate values take the attribute's declared integer kind.
    fn normalize(&self, attr: &str, value: &Value) -> Value {
        match self.schema.get(attr) {
            Some(def) if def.value_type().is_integer() => value.clone().coerce_to(def.value_type()),
            _ => value.clone(),
        }
    }

    /// Entity ids matching `pred`, in (attribute, value, entity) order.
    ///
    /// Binary search to the first matching entry, then a forward scan while
    /// entries keep matching.
    pub fn eids_by_pred(&self, pred: &Pred) -> impl Iterator<Item = Gid> + '_ {
        let attr = pred.attr().to_string();
        let (from, to) = match pred {
            Pred::HasAttr(_) => (None, None),
            Pred::AttrValue(a, v) => {
                let v = self.normalize(a, v);
                (Some(v.clone()), Some(v))
            }
            Pred::AttrRange(a, from, to) => (Some(self.normalize(a, from)), Some(self.normalize(a, to))),
        };

        let start = self.eav.partition_point(|e| match &from {
            None => e.attr < attr,
            Some(from) => (e.attr.as_str(), &e.value) < (attr.as_str(), from),
        });

        self.eav[start..]
            .iter()
            .take_while(move |e| {
                e.attr == attr
                    && match &to {
                        None => true,
                        Some(to) => e.value <= *to,
                    }
            })
            .map(|e| e.entity)
    }

    /// Entities matching every predicate.
    ///
    /// The first predicate drives the candidate stream; the others are
    /// advanced lazily and only as far as needed to confirm a candidate. An
    /// entity matching through several values is returned once. No
    /// predicates, no results.
    pub fn query(&self, preds: &[Pred]) -> Query<'_> {
        let mut streams = preds.iter().map(|p| self.eids_by_pred(p));
        let candidates = streams.next().map(|s| Box::new(s) as Box<dyn Iterator<Item = Gid> + '_>);
        let probes = streams
            .map(|s| Probe {
                stream: Box::new(s),
                seen: HashSet::new(),
            })
            .collect();
        Query {
            index: self,
            candidates,
            probes,
            emitted: HashSet::new(),
        }
    }

    /// Nested view of `gid`: ref values are expanded into the referenced
    /// entities up to `depth` levels. A ref back to an entity already being
    /// expanded on the current path stays a plain ref, so cycles terminate.
    pub fn pull(&self, gid: Gid, depth: usize) -> Option<Pulled> {
        let mut path = HashSet::new();
        self.pull_along(gid, depth, &mut path)
    }

    fn pull_along(&self, gid: Gid, depth: usize, path: &mut HashSet<Gid>) -> Option<Pulled> {
        let facts = self.entity(gid)?;
        path.insert(gid);
        let mut attrs = IndexMap::new();
        for (attr, values) in facts.iter() {
            let mut pulled = Vec::with_capacity(values.len());
            for value in values {
                let nested = match value.as_ref_gid() {
                    Some(target) if depth > 0 && !path.contains(&target) => {
                        self.pull_along(target, depth - 1, path)
                    }
                    _ => None,
                };
                pulled.push(match nested {
                    Some(nested) => PulledValue::Entity(Box::new(nested)),
                    None => PulledValue::Value(value.clone()),
                });
            }
            attrs.insert(attr.to_string(), pulled);
        }
        path.remove(&gid);
        Some(Pulled { id: gid, attrs })
    }
}

impl SchemaLookup for Index {
    fn attr(&self, name: &str) -> Option<&Attr> {
        self.schema.get(name)
    }
}

/// One non-driving predicate stream, with everything consumed so far.
struct Probe<'a> {
    stream: Box<dyn Iterator<Item = Gid> + 'a>,
    seen: HashSet<Gid>,
}

impl Probe<'_> {
    fn contains(&mut self, gid: Gid) -> bool {
        if self.seen.contains(&gid) {
            return true;
        }
        for next in self.stream.by_ref() {
            self.seen.insert(next);
            if next == gid {
                return true;
            }
        }
        false
    }
}

/// Lazy intersection of predicate streams; see [`Index::query`].
pub struct Query<'a> {
    index: &'a Index,
    candidates: Option<Box<dyn Iterator<Item = Gid> + 'a>>,
    probes: Vec<Probe<'a>>,
    emitted: HashSet<Gid>,
}

impl<'a> Query<'a> {
    /// Pairs each match with its facts.
    pub fn entities(self) -> impl Iterator<Item = (Gid, &'a EntityFacts)> {
        let index = self.index;
        self.filter_map(move |gid| index.entity(gid).map(|facts| (gid, facts)))
    }
}

impl Iterator for Query<'_> {
    type Item = Gid;

    fn next(&mut self) -> Option<Gid> {
        let candidates = self.candidates.as_mut()?;
        loop {
            let gid = candidates.next()?;
            if self.emitted.contains(&gid) {
                continue;
            }
            if self.probes.iter_mut().all(|probe| probe.contains(gid)) {
                self.emitted.insert(gid);
                return Some(gid);
            }
        }
    }
}

/// An entity with refs expanded, as returned by [`Index::pull`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pulled {
    pub id: Gid,
    pub attrs: IndexMap<String, Vec<PulledValue>>,
}

impl Pulled {
    /// The first value of `attr`.
    pub fn get(&self, attr: &str) -> Option<&PulledValue> {
        self.attrs.get(attr).and_then(|values| values.first())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PulledValue {
    Value(Value),
    Entity(Box<Pulled>),
}

impl PulledValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            PulledValue::Value(v) => Some(v),
            PulledValue::Entity(_) => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Pulled> {
        match self {
            PulledValue::Entity(e) => Some(e),
            PulledValue::Value(_) => None,
        }
    }
}
