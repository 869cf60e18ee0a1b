//! Entity drafts: the explicit builder that turns application data into
//! facts.
//!
//! An [`Entity`] is either an existing entity (known [`Gid`]) or a new one
//! identified by a process-unique [`TempId`]. Clones share the temp id, so
//! the same draft reachable twice in one `persist` call gets one Gid. Fields
//! hold plain values, references to other drafts, or nested drafts that are
//! persisted together with their parent.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use strand_core::{Gid, Value};

static NEXT_TEMP_ID: AtomicU64 = AtomicU64::new(1);

/// Placeholder identity of a not-yet-persisted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TempId(pub u64);

impl TempId {
    pub fn fresh() -> Self {
        TempId(NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityId {
    Existing(Gid),
    Temp(TempId),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Existing(gid) => gid.fmt(f),
            EntityId::Temp(temp) => temp.fmt(f),
        }
    }
}

/// One value slot of a field.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Value(Value),
    /// Reference to another draft by identity.
    Ref(EntityId),
    /// A draft persisted along with its parent, stored as a reference.
    Nested(Box<Entity>),
}

/// The desired state of one entity.
///
/// Only fields that are set are written; fields absent from a draft keep
/// their stored values.
#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    fields: IndexMap<String, Field>,
}

#[derive(Debug, Clone)]
pub(crate) struct Field {
    pub(crate) values: Vec<FieldValue>,
}

impl Entity {
    /// A new entity with a fresh temp id.
    pub fn new() -> Self {
        Entity {
            id: EntityId::Temp(TempId::fresh()),
            fields: IndexMap::new(),
        }
    }

    /// A draft of an entity that already has a Gid.
    pub fn existing(gid: Gid) -> Self {
        Entity {
            id: EntityId::Existing(gid),
            fields: IndexMap::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Sets a scalar attribute.
    pub fn set(mut self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put_scalar(attr.into(), FieldValue::Value(value.into()));
        self
    }

    /// Adds one value to a list attribute.
    pub fn add(mut self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push_list(attr.into(), FieldValue::Value(value.into()));
        self
    }

    /// Declares a list attribute with exactly these values.
    pub fn set_list<V: Into<Value>>(
        mut self,
        attr: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values
            .into_iter()
            .map(|v| FieldValue::Value(v.into()))
            .collect();
        self.fields
            .insert(attr.into(), Field { values });
        self
    }

    /// Points a scalar ref attribute at `target`.
    pub fn set_ref(mut self, attr: impl Into<String>, target: &Entity) -> Self {
        self.put_scalar(attr.into(), FieldValue::Ref(target.id));
        self
    }

    /// Adds a ref to `target` to a list attribute.
    pub fn add_ref(mut self, attr: impl Into<String>, target: &Entity) -> Self {
        self.push_list(attr.into(), FieldValue::Ref(target.id));
        self
    }

    /// Embeds `child`: it is persisted in the same call and referenced from
    /// this entity.
    pub fn set_entity(mut self, attr: impl Into<String>, child: Entity) -> Self {
        self.put_scalar(attr.into(), FieldValue::Nested(Box::new(child)));
        self
    }

    /// Embeds `child` as one element of a list ref attribute.
    pub fn add_entity(mut self, attr: impl Into<String>, child: Entity) -> Self {
        self.push_list(attr.into(), FieldValue::Nested(Box::new(child)));
        self
    }

    /// The values a field was given, if any.
    pub fn field(&self, attr: &str) -> Option<&[FieldValue]> {
        self.fields.get(attr).map(|f| f.values.as_slice())
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.fields.iter()
    }

    fn put_scalar(&mut self, attr: String, value: FieldValue) {
        self.fields.insert(
            attr,
            Field {
                values: vec![value],
            },
        );
    }

    fn push_list(&mut self, attr: String, value: FieldValue) {
        self.fields
            .entry(attr)
            .or_insert(Field { values: Vec::new() })
            .values
            .push(value);
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::new()
    }
}
