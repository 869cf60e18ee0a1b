//! Attribute definitions and schema lookup.
//!
//! An [`Attr`] is itself an entity: it is described by facts over the meta
//! attributes in [`meta`], bootstrapped once per database. Attributes never
//! change after they are written; schema evolution adds new ones.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::Gid;
use crate::value::{TypeCode, ValueType};

/// Names of the bootstrapped attributes.
pub mod meta {
    /// Attribute name (string, unique).
    pub const ATTR_NAME: &str = "Attr/name";
    /// Attribute type code (byte).
    pub const ATTR_TYPE: &str = "Attr/type";
    /// Attribute uniqueness flag (bool).
    pub const ATTR_UNIQUE: &str = "Attr/unique";
    /// Attribute list flag (bool).
    pub const ATTR_LIST: &str = "Attr/list";

    /// Instance id (long).
    pub const INSTANCE_ID: &str = "Instance/id";
    /// Size of the instance-id range the instance owns (long).
    pub const INSTANCE_SPAN: &str = "Instance/span";
    /// Next unused local entity id of the instance (long).
    pub const INSTANCE_NEXT_EID: &str = "Instance/nextEid";

    /// Marks an entity as deleted (bool).
    pub const TOMBSTONE: &str = "tombstone";

    /// True for attributes that describe attributes.
    pub fn is_attr_meta(name: &str) -> bool {
        matches!(name, ATTR_NAME | ATTR_TYPE | ATTR_UNIQUE | ATTR_LIST)
    }
}

/// A schema attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attr {
    pub id: Gid,
    pub name: String,
    pub type_code: TypeCode,
    pub unique: bool,
}

impl Attr {
    /// Builds an attribute, rejecting unique list attributes.
    pub fn new(
        id: Gid,
        name: impl Into<String>,
        value_type: ValueType,
        unique: bool,
        is_list: bool,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        if unique && is_list {
            return Err(CoreError::InvalidAttribute {
                name,
                reason: "an attribute cannot be both unique and a list".into(),
            });
        }
        Ok(Attr {
            id,
            name,
            type_code: TypeCode::new(value_type, is_list),
            unique,
        })
    }

    /// Rebuilds an attribute from its stored type byte.
    pub fn from_parts(
        id: Gid,
        name: impl Into<String>,
        type_code: TypeCode,
        unique: bool,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        let Some(value_type) = type_code.value_type() else {
            return Err(CoreError::InvalidAttribute {
                name,
                reason: format!("unknown type code {:#04x}", type_code.0),
            });
        };
        Attr::new(id, name, value_type, unique, type_code.is_list())
    }

    pub fn value_type(&self) -> ValueType {
        // Constructors only accept codes with a known primitive type.
        self.type_code.value_type().unwrap_or(ValueType::Bytes)
    }

    pub fn is_list(&self) -> bool {
        self.type_code.is_list()
    }

    pub fn is_ref(&self) -> bool {
        self.type_code.is_ref()
    }
}

/// Resolves attribute names to definitions.
pub trait SchemaLookup {
    fn attr(&self, name: &str) -> Option<&Attr>;
}

impl SchemaLookup for HashMap<String, Attr> {
    fn attr(&self, name: &str) -> Option<&Attr> {
        self.get(name)
    }
}

/// Two lookups layered: `top` wins over `base`.
pub struct Overlay<'a, A: ?Sized, B: ?Sized> {
    pub top: &'a A,
    pub base: &'a B,
}

impl<A: SchemaLookup + ?Sized, B: SchemaLookup + ?Sized> SchemaLookup for Overlay<'_, A, B> {
    fn attr(&self, name: &str) -> Option<&Attr> {
        self.top.attr(name).or_else(|| self.base.attr(name))
    }
}
