//! Schema bootstrap and attribute declarations.
//!
//! The meta attributes describing attributes, instances and tombstones are
//! facts like any other. They are written once into the Root node together
//! with the root `Instance` entity, and every later attribute is declared by
//! persisting an [`AttrDef`] entity.

use strand_core::{meta, Attr, EntityFacts, Fact, Gid, InstanceId, InstanceSpace, TypeCode, Value, ValueType};

use crate::entity::Entity;
use crate::error::DbError;

/// First local id handed out to user entities of the root instance.
pub const FIRST_USER_LOCAL: u32 = 16;

/// The bootstrapped attributes, with their fixed ids in the root instance.
pub fn meta_attrs() -> Vec<Attr> {
    let specs: [(u32, &str, ValueType, bool); 8] = [
        (1, meta::ATTR_NAME, ValueType::Str, true),
        (2, meta::ATTR_TYPE, ValueType::Byte, false),
        (3, meta::ATTR_UNIQUE, ValueType::Bool, false),
        (4, meta::ATTR_LIST, ValueType::Bool, false),
        (5, meta::INSTANCE_ID, ValueType::Long, false),
        (6, meta::INSTANCE_SPAN, ValueType::Long, false),
        (7, meta::INSTANCE_NEXT_EID, ValueType::Long, false),
        (8, meta::TOMBSTONE, ValueType::Bool, false),
    ];
    specs
        .into_iter()
        .map(|(local, name, ty, unique)| Attr {
            id: Gid::new(InstanceId::ROOT.0, local),
            name: name.to_string(),
            type_code: TypeCode::new(ty, false),
            unique,
        })
        .collect()
}

/// Facts describing one attribute.
pub fn attr_facts(attr: &Attr) -> Vec<Fact> {
    vec![
        Fact::new(attr.id, meta::ATTR_NAME, attr.name.as_str()),
        Fact::new(attr.id, meta::ATTR_TYPE, Value::Byte(attr.type_code.0)),
        Fact::new(attr.id, meta::ATTR_UNIQUE, attr.unique),
        Fact::new(attr.id, meta::ATTR_LIST, attr.is_list()),
    ]
}

/// Facts describing an instance and its id range.
pub fn instance_facts(space: InstanceSpace, next_eid: u32) -> Vec<Fact> {
    let gid = Gid::instance_entity(space.id);
    vec![
        Fact::new(gid, meta::INSTANCE_ID, i64::from(space.id.0)),
        Fact::new(gid, meta::INSTANCE_SPAN, space.span as i64),
        Fact::new(gid, meta::INSTANCE_NEXT_EID, i64::from(next_eid)),
    ]
}

/// Payload of a fresh database's Root node.
pub fn bootstrap_facts() -> Vec<Fact> {
    let mut facts: Vec<Fact> = meta_attrs().iter().flat_map(attr_facts).collect();
    facts.extend(instance_facts(InstanceSpace::ROOT, FIRST_USER_LOCAL));
    facts
}

/// Rebuilds an attribute from its entity's facts.
///
/// `None` if the entity is not an attribute (no `Attr/name`).
pub fn attr_from_entity(gid: Gid, facts: &EntityFacts) -> Option<Result<Attr, DbError>> {
    let name = facts.get(meta::ATTR_NAME)?.as_str()?.to_string();
    Some(parse_attr(gid, name, facts))
}

fn parse_attr(gid: Gid, name: String, facts: &EntityFacts) -> Result<Attr, DbError> {
    let code = match facts.get(meta::ATTR_TYPE) {
        Some(Value::Byte(code)) => TypeCode(*code),
        _ => {
            return Err(DbError::InvalidAttribute {
                name,
                reason: "missing type".into(),
            })
        }
    };
    let unique = facts
        .get(meta::ATTR_UNIQUE)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let list = facts
        .get(meta::ATTR_LIST)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if list != code.is_list() {
        return Err(DbError::InvalidAttribute {
            name,
            reason: "list flag disagrees with type code".into(),
        });
    }
    Ok(Attr::from_parts(gid, name, code, unique)?)
}

/// Committed state of one instance, read from its `Instance` entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceState {
    pub space: InstanceSpace,
    pub next_eid: u32,
}

impl InstanceState {
    pub fn from_entity(facts: &EntityFacts) -> Option<Self> {
        let id = facts.get(meta::INSTANCE_ID)?.as_i64()?;
        let span = facts.get(meta::INSTANCE_SPAN)?.as_i64()?;
        let next = facts
            .get(meta::INSTANCE_NEXT_EID)
            .and_then(Value::as_i64)
            .unwrap_or(1);
        Some(InstanceState {
            space: InstanceSpace {
                id: InstanceId(u32::try_from(id).ok()?),
                span: u64::try_from(span).ok()?,
            },
            next_eid: u32::try_from(next).ok()?,
        })
    }
}

/// Declaration of a new attribute, persisted as an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrDef {
    pub name: String,
    pub value_type: ValueType,
    pub unique: bool,
    pub list: bool,
}

impl AttrDef {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        AttrDef {
            name: name.into(),
            value_type,
            unique: false,
            list: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    /// The draft that declares this attribute.
    pub fn to_entity(&self) -> Entity {
        Entity::new()
            .set(meta::ATTR_NAME, self.name.as_str())
            .set(
                meta::ATTR_TYPE,
                Value::Byte(TypeCode::new(self.value_type, self.list).0),
            )
            .set(meta::ATTR_UNIQUE, self.unique)
            .set(meta::ATTR_LIST, self.list)
    }
}
