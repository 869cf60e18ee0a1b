//! Facts and per-entity fact views.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::Gid;
use crate::value::Value;

/// An `(entity, attribute, value)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    #[serde(rename = "e")]
    pub entity: Gid,
    #[serde(rename = "a")]
    pub attr: String,
    #[serde(rename = "v")]
    pub value: Value,
}

impl Fact {
    pub fn new(entity: Gid, attr: impl Into<String>, value: impl Into<Value>) -> Self {
        Fact {
            entity,
            attr: attr.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {}]", self.entity, self.attr, self.value)
    }
}

/// The ordered facts authored by one transaction.
pub type NodeData = Vec<Fact>;

/// Values of one attribute on one entity, in insertion order.
pub type AttrValues = SmallVec<[Value; 1]>;

/// The visible facts of one entity: attribute name to ordered values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFacts {
    attrs: IndexMap<String, AttrValues>,
}

impl EntityFacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// All values for `attr`, empty if the entity has none.
    pub fn values(&self, attr: &str) -> &[Value] {
        match self.attrs.get(attr) {
            Some(values) => values.as_slice(),
            None => &[],
        }
    }

    /// The first value for `attr`; the value of a scalar attribute.
    pub fn get(&self, attr: &str) -> Option<&Value> {
        self.values(attr).first()
    }

    pub fn contains(&self, attr: &str) -> bool {
        self.attrs.contains_key(attr)
    }

    /// Replaces every value of `attr`. An empty list removes the attribute.
    pub fn set(&mut self, attr: &str, values: AttrValues) -> Option<AttrValues> {
        if values.is_empty() {
            self.attrs.shift_remove(attr)
        } else {
            self.attrs.insert(attr.to_string(), values)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn attr_names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Flattens back into facts for `entity`.
    pub fn to_facts(&self, entity: Gid) -> Vec<Fact> {
        self.iter()
            .flat_map(|(attr, values)| {
                values
                    .iter()
                    .map(move |v| Fact::new(entity, attr, v.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn set_keeps_insertion_order_and_removes_on_empty() {
        let mut facts = EntityFacts::new();
        facts.set("B/x", smallvec![Value::Int(1)]);
        facts.set("A/y", smallvec![Value::Int(2), Value::Int(3)]);
        assert_eq!(facts.attr_names().collect::<Vec<_>>(), vec!["B/x", "A/y"]);

        facts.set("B/x", SmallVec::new());
        assert!(!facts.contains("B/x"));
        assert_eq!(facts.values("A/y"), &[Value::Int(2), Value::Int(3)]);
        assert_eq!(facts.get("A/y"), Some(&Value::Int(2)));
        assert!(facts.values("nope").is_empty());
    }

    #[test]
    fn to_facts_flattens_lists() {
        let mut facts = EntityFacts::new();
        facts.set("Post/tag", smallvec![Value::from("a"), Value::from("b")]);
        let gid = Gid::new(0, 5);
        let flat = facts.to_facts(gid);
        assert_eq!(
            flat,
            vec![Fact::new(gid, "Post/tag", "a"), Fact::new(gid, "Post/tag", "b")]
        );
    }

    #[test]
    fn fact_display() {
        let fact = Fact::new(Gid::new(1, 2), "User/name", "ann");
        insta::assert_snapshot!(fact.to_string(), @r#"[1:2 User/name "ann"]"#);
    }
}
