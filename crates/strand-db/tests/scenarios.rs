//! End-to-end behaviour of connections and transactions.
//!
//! Each test opens a fresh in-memory database, declares the attributes it
//! needs and drives the public API only.

use std::sync::Arc;

use strand_core::{Value, ValueType};
use strand_db::{AttrDef, CommitOutcome, Conn, DbError, Entity, Pred, TrxState};

fn people() -> Conn {
    let conn = Conn::open_memory().unwrap();
    conn.declare(&[
        AttrDef::new("Person/name", ValueType::Str).unique(),
        AttrDef::new("Person/extId", ValueType::Long).unique(),
        AttrDef::new("Person/age", ValueType::Int),
        AttrDef::new("Person/nicknames", ValueType::Str).list(),
        AttrDef::new("Person/employer", ValueType::Ref),
        AttrDef::new("Company/name", ValueType::Str),
    ])
    .unwrap();
    conn
}

#[test]
fn declaring_and_persisting_in_one_commit_appends_one_node() {
    let conn = Conn::open_memory().unwrap();
    let root = conn.head_hash();

    let person = Entity::new().set("Thing/name", "a");
    let mut trx = conn.trx();
    let result = trx
        .persist(&[
            AttrDef::new("Thing/name", ValueType::Str).unique().to_entity(),
            person.clone(),
        ])
        .unwrap();
    trx.commit().unwrap();

    let gid = result.gid(&person).unwrap();
    let pulled = conn.db().pull(gid, 1).unwrap();
    assert_eq!(pulled.get("Thing/name").and_then(|v| v.as_value()), Some(&Value::from("a")));

    let log = conn.log(usize::MAX).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].hash, root);
}

#[test]
fn duplicate_unique_value_leaves_head_unchanged() {
    let conn = people();
    conn.persist(&[Entity::new().set("Person/extId", 1i64)]).unwrap();
    let head = conn.head_hash();

    let err = conn
        .persist(&[Entity::new().set("Person/extId", 1i64)])
        .unwrap_err();
    assert!(matches!(err, DbError::UniquenessViolation { ref attr, .. } if attr == "Person/extId"));
    assert!(err.is_validation());
    assert_eq!(conn.head_hash(), head);
    assert_eq!(conn.store().head().unwrap(), Some(head));
}

#[test]
fn reasserting_own_unique_value_is_allowed() {
    let conn = people();
    let ann = Entity::new().set("Person/name", "ann");
    let gid = conn.persist(&[ann.clone()]).unwrap().gid(&ann).unwrap();
    conn.persist(&[Entity::existing(gid).set("Person/name", "ann").set("Person/age", 40)])
        .unwrap();
}

#[test]
fn nested_reference_pulls_back_eagerly() {
    let conn = people();
    let before = conn.db().entity_count();

    let acme = Entity::new().set("Company/name", "Acme");
    let ann = Entity::new()
        .set("Person/name", "ann")
        .set_entity("Person/employer", acme.clone());
    let result = conn.persist(&[ann.clone()]).unwrap();

    let ann_gid = result.gid(&ann).unwrap();
    let acme_gid = result.gid(&acme).unwrap();
    let db = conn.db();
    let pulled = db.pull(ann_gid, 2).unwrap();
    let employer = pulled.get("Person/employer").and_then(|v| v.as_entity()).unwrap();
    assert_eq!(employer.id, acme_gid);
    assert_eq!(employer.get("Company/name").and_then(|v| v.as_value()), Some(&Value::from("Acme")));

    // Two user entities, plus the instance entity whose nextEid moved.
    assert_eq!(result.tempids.len(), 2);
    assert_eq!(db.entity_count(), before + 2);
    let touched: std::collections::BTreeSet<_> = result.facts.iter().map(|f| f.entity).collect();
    assert_eq!(touched.len(), 3);
}

#[test]
fn concurrent_transactions_first_commit_wins() {
    let conn = people();
    let mut t1 = conn.trx();
    let mut t2 = conn.trx();

    t2.persist(&[Entity::new().set("Person/name", "x")]).unwrap();
    t2.commit().unwrap();

    t1.persist(&[Entity::new().set("Person/name", "y")]).unwrap();
    let err = t1.commit().unwrap_err();
    assert!(matches!(err, DbError::ConcurrentModification { .. }));
    assert_eq!(t1.state(), TrxState::ConflictFailed);
    assert!(matches!(t1.commit(), Err(DbError::TransactionConflicted)));

    let db = conn.db();
    assert_eq!(db.query(&[Pred::eq("Person/name", "x")]).count(), 1);
    assert_eq!(db.query(&[Pred::eq("Person/name", "y")]).count(), 0);
}

#[test]
fn racing_threads_commit_exactly_once_each_attempt() {
    let conn = Arc::new(people());
    let outcomes: Vec<Result<CommitOutcome, DbError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let conn = Arc::clone(&conn);
                scope.spawn(move || {
                    let mut trx = conn.trx();
                    trx.persist(&[Entity::new().set("Person/name", format!("p{i}"))])?;
                    trx.commit()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let committed = outcomes.iter().filter(|o| o.is_ok()).count();
    assert!(committed >= 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(err.is_conflict(), "unexpected error: {err}");
        }
    }
    assert_eq!(conn.db().query(&[Pred::has("Person/name")]).count(), committed);
}

#[test]
fn persisting_unchanged_entity_is_a_noop() {
    let conn = people();
    let ann = Entity::new().set("Person/name", "ann").set("Person/age", 30);
    let gid = conn.persist(&[ann.clone()]).unwrap().gid(&ann).unwrap();
    let head = conn.head_hash();

    let mut trx = conn.trx();
    let result = trx
        .persist(&[Entity::existing(gid).set("Person/name", "ann").set("Person/age", 30)])
        .unwrap();
    assert!(result.is_noop());
    assert!(matches!(trx.commit().unwrap(), CommitOutcome::NoOp));
    assert_eq!(conn.head_hash(), head);
}

#[test]
fn deleted_entities_disappear_from_reads() {
    let conn = people();
    let ann = Entity::new().set("Person/name", "ann").set("Person/age", 30);
    let gid = conn.persist(&[ann.clone()]).unwrap().gid(&ann).unwrap();

    conn.delete(gid).unwrap();
    let db = conn.db();
    assert!(db.entity(gid).is_none());
    assert!(db.pull(gid, 1).is_none());
    assert_eq!(db.query(&[Pred::has("Person/age")]).count(), 0);

    // The name is free again.
    conn.persist(&[Entity::new().set("Person/name", "ann")]).unwrap();

    // Writes to a tombstoned entity stay invisible.
    conn.persist(&[Entity::existing(gid).set("Person/age", 31)]).unwrap();
    assert!(conn.db().entity(gid).is_none());
}

#[test]
fn list_matches_are_reported_once() {
    let conn = people();
    let ann = Entity::new()
        .set("Person/name", "ann")
        .set_list("Person/nicknames", ["annie", "anna", "annie"]);
    let gid = conn.persist(&[ann.clone()]).unwrap().gid(&ann).unwrap();

    let db = conn.db();
    assert_eq!(
        db.entity(gid).unwrap().values("Person/nicknames"),
        &[Value::from("annie"), Value::from("anna")]
    );
    let hits: Vec<_> = db
        .query(&[Pred::range("Person/nicknames", "a", "b")])
        .collect();
    assert_eq!(hits, vec![gid]);
}

#[test]
fn queries_intersect_predicates() {
    let conn = people();
    conn.persist(&[
        Entity::new().set("Person/name", "ann").set("Person/age", 30),
        Entity::new().set("Person/name", "bob").set("Person/age", 40),
        Entity::new().set("Person/name", "cat").set("Person/age", 30),
    ])
    .unwrap();

    let db = conn.db();
    let names: Vec<String> = db
        .query(&[Pred::eq("Person/age", 30i64), Pred::has("Person/name")])
        .entities()
        .filter_map(|(_, facts)| facts.get("Person/name").and_then(Value::as_str).map(String::from))
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"ann".to_string()));
    assert!(names.contains(&"cat".to_string()));
}

#[test]
fn scalar_attribute_rejects_multiple_values() {
    let conn = people();
    let err = conn
        .persist(&[Entity::new().set_list("Person/age", [1, 2])])
        .unwrap_err();
    assert!(matches!(err, DbError::MultipleValuesForScalarAttribute { .. }));
}

#[test]
fn unknown_attribute_and_type_errors() {
    let conn = people();
    assert!(matches!(
        conn.persist(&[Entity::new().set("Person/shoeSize", 44)]),
        Err(DbError::UnknownAttribute { .. })
    ));
    assert!(matches!(
        conn.persist(&[Entity::new().set("Person/age", "old")]),
        Err(DbError::TypeMismatch { .. })
    ));
}
