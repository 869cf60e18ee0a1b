//! Batch validation: schema, uniqueness and cardinality rules.
//!
//! A candidate batch is checked against the current index plus the
//! attributes the batch itself declares. Validation is pure; a rejected
//! batch has no effect anywhere.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;

use strand_core::{meta, Attr, EntityFacts, Fact, Gid, Overlay, SchemaLookup, Value};

use crate::error::DbError;
use crate::index::{Index, Pred};
use crate::schema::attr_from_entity;

/// Validates batches against one index.
pub struct Validator<'a> {
    index: &'a Index,
}

impl<'a> Validator<'a> {
    pub fn new(index: &'a Index) -> Self {
        Validator { index }
    }

    /// Attributes declared (or completed) by `facts`, by name.
    ///
    /// Existing attributes are immutable; changing one is
    /// [`DbError::InvalidAttribute`].
    pub fn declared_attrs(&self, facts: &[Fact]) -> Result<HashMap<String, Attr>, DbError> {
        let mut drafts: IndexMap<Gid, IndexMap<&str, Vec<Value>>> = IndexMap::new();
        for fact in facts.iter().filter(|f| meta::is_attr_meta(&f.attr)) {
            let values = drafts
                .entry(fact.entity)
                .or_default()
                .entry(fact.attr.as_str())
                .or_default();
            if !values.contains(&fact.value) {
                values.push(fact.value.clone());
            }
        }

        let mut declared = HashMap::new();
        for (gid, changes) in drafts {
            let stored = self.index.entity(gid);
            let mut merged: EntityFacts = stored.cloned().unwrap_or_default();
            if let Some(Ok(existing)) = stored.and_then(|facts| attr_from_entity(gid, facts)) {
                let unchanged = changes
                    .iter()
                    .all(|(attr, values)| merged.values(attr) == values.as_slice());
                if !unchanged {
                    return Err(DbError::InvalidAttribute {
                        name: existing.name,
                        reason: "attributes cannot be changed once declared".into(),
                    });
                }
            }
            for (attr, values) in changes {
                merged.set(attr, values.into_iter().collect());
            }
            let attr = match attr_from_entity(gid, &merged) {
                Some(result) => result?,
                None => {
                    return Err(DbError::InvalidAttribute {
                        name: gid.to_string(),
                        reason: format!("missing {}", meta::ATTR_NAME),
                    })
                }
            };
            if let Some(other) = self.index.attr(&attr.name) {
                if other.id != gid {
                    return Err(DbError::InvalidAttribute {
                        name: attr.name,
                        reason: format!("already declared by {}", other.id),
                    });
                }
            }
            declared.insert(attr.name.clone(), attr);
        }
        Ok(declared)
    }

    /// Checks every rule; the first violation wins.
    pub fn validate(&self, facts: &[Fact]) -> Result<(), DbError> {
        let declared = self.declared_attrs(facts)?;
        let schema = Overlay {
            top: &declared,
            base: self.index,
        };

        // Rule 1: every attribute is known and every value has its type.
        for fact in facts {
            let attr = schema.attr(&fact.attr).ok_or_else(|| DbError::UnknownAttribute {
                attr: fact.attr.clone(),
            })?;
            let found = fact.value.value_type();
            if found != attr.value_type() {
                return Err(DbError::TypeMismatch {
                    attr: fact.attr.clone(),
                    expected: attr.value_type(),
                    found,
                });
            }
        }

        let mut groups: IndexMap<(Gid, &str), Vec<&Value>> = IndexMap::new();
        let mut deleted = BTreeSet::new();
        for fact in facts {
            if fact.attr == meta::TOMBSTONE && fact.value == Value::Bool(true) {
                deleted.insert(fact.entity);
            }
            let values = groups.entry((fact.entity, fact.attr.as_str())).or_default();
            if !values.contains(&&fact.value) {
                values.push(&fact.value);
            }
        }

        // Rule 3: one distinct value per scalar attribute and entity.
        for ((entity, attr), values) in &groups {
            let is_list = schema.attr(attr).is_some_and(Attr::is_list);
            if !is_list && values.len() > 1 {
                return Err(DbError::MultipleValuesForScalarAttribute {
                    entity: *entity,
                    attr: attr.to_string(),
                });
            }
        }

        // Rule 2: unique values belong to one entity.
        let mut claims: HashMap<(&str, &Value), Gid> = HashMap::new();
        for ((entity, attr), values) in &groups {
            if !schema.attr(attr).is_some_and(|a| a.unique) || deleted.contains(entity) {
                continue;
            }
            for value in values {
                if let Some(other) = claims.insert((*attr, *value), *entity) {
                    if other != *entity {
                        return Err(DbError::UniquenessViolation {
                            attr: attr.to_string(),
                            value: (*value).clone(),
                            existing: other,
                        });
                    }
                }
                let pred = Pred::AttrValue(attr.to_string(), (*value).clone());
                for holder in self.index.eids_by_pred(&pred) {
                    if holder == *entity || deleted.contains(&holder) {
                        continue;
                    }
                    // The holder gives the value up in this same batch.
                    let released = groups
                        .get(&(holder, *attr))
                        .is_some_and(|held| !held.contains(value));
                    if !released {
                        return Err(DbError::UniquenessViolation {
                            attr: attr.to_string(),
                            value: (*value).clone(),
                            existing: holder,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{attr_facts, bootstrap_facts};
    use strand_core::{TypeCode, ValueType};

    fn g(local: u32) -> Gid {
        Gid::new(0, local)
    }

    fn index() -> Index {
        let mut facts = bootstrap_facts();
        for attr in [
            Attr::new(g(100), "User/email", ValueType::Str, true, false).unwrap(),
            Attr::new(g(101), "User/age", ValueType::Long, false, false).unwrap(),
            Attr::new(g(102), "User/tags", ValueType::Str, false, true).unwrap(),
        ] {
            facts.extend(attr_facts(&attr));
        }
        facts.push(Fact::new(g(200), "User/email", "a@x"));
        Index::empty().add_facts(&facts)
    }

    #[test]
    fn unknown_attribute() {
        let index = index();
        let err = Validator::new(&index)
            .validate(&[Fact::new(g(201), "User/nope", 1i64)])
            .unwrap_err();
        assert!(matches!(err, DbError::UnknownAttribute { attr } if attr == "User/nope"));
    }

    #[test]
    fn wrong_value_type() {
        let index = index();
        let err = Validator::new(&index)
            .validate(&[Fact::new(g(201), "User/age", "old")])
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::TypeMismatch { expected: ValueType::Long, found: ValueType::Str, .. }
        ));
    }

    #[test]
    fn uniqueness_against_index_and_within_batch() {
        let index = index();
        let v = Validator::new(&index);

        let err = v.validate(&[Fact::new(g(201), "User/email", "a@x")]).unwrap_err();
        assert!(matches!(err, DbError::UniquenessViolation { existing, .. } if existing == g(200)));

        // Same entity re-asserting its own value is fine.
        v.validate(&[Fact::new(g(200), "User/email", "a@x")]).unwrap();

        // The holder gives the value up in the same batch.
        v.validate(&[
            Fact::new(g(200), "User/email", "b@x"),
            Fact::new(g(201), "User/email", "a@x"),
        ])
        .unwrap();

        let err = v
            .validate(&[
                Fact::new(g(201), "User/email", "c@x"),
                Fact::new(g(202), "User/email", "c@x"),
            ])
            .unwrap_err();
        assert!(matches!(err, DbError::UniquenessViolation { existing, .. } if existing == g(201)));
    }

    #[test]
    fn scalar_cardinality() {
        let index = index();
        let v = Validator::new(&index);
        let err = v
            .validate(&[
                Fact::new(g(201), "User/age", 1i64),
                Fact::new(g(201), "User/age", 2i64),
            ])
            .unwrap_err();
        assert!(matches!(err, DbError::MultipleValuesForScalarAttribute { .. }));

        v.validate(&[
            Fact::new(g(201), "User/age", 1i64),
            Fact::new(g(201), "User/age", 1i64),
            Fact::new(g(201), "User/tags", "x"),
            Fact::new(g(201), "User/tags", "y"),
        ])
        .unwrap();
    }

    #[test]
    fn attributes_declared_in_the_batch_are_known() {
        let index = index();
        let attr = Attr::new(g(103), "Post/title", ValueType::Str, false, false).unwrap();
        let mut facts = attr_facts(&attr);
        facts.push(Fact::new(g(300), "Post/title", "hello"));
        Validator::new(&index).validate(&facts).unwrap();
    }

    #[test]
    fn unique_list_declaration_is_invalid() {
        let index = index();
        let gid = g(104);
        let facts = vec![
            Fact::new(gid, meta::ATTR_NAME, "Tag/names"),
            Fact::new(gid, meta::ATTR_TYPE, Value::Byte(TypeCode::new(ValueType::Str, true).0)),
            Fact::new(gid, meta::ATTR_UNIQUE, true),
            Fact::new(gid, meta::ATTR_LIST, true),
        ];
        let err = Validator::new(&index).validate(&facts).unwrap_err();
        assert!(matches!(err, DbError::InvalidAttribute { .. }));
    }

    #[test]
    fn declared_attributes_are_immutable() {
        let index = index();
        let err = Validator::new(&index)
            .validate(&[Fact::new(g(101), meta::ATTR_UNIQUE, true)])
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidAttribute { name, .. } if name == "User/age"));
    }

    #[test]
    fn redeclaring_a_name_is_invalid() {
        let index = index();
        let attr = Attr::new(g(105), "User/age", ValueType::Long, false, false).unwrap();
        let err = Validator::new(&index).validate(&attr_facts(&attr)).unwrap_err();
        assert!(matches!(err, DbError::InvalidAttribute { .. } | DbError::UniquenessViolation { .. }));
    }
}
