mod common;

use std::sync::Arc;

use common::*;
use tenebra::durability::{InMemoryWal, WalOp};
use tenebra::{HlcClock, PropertyValue, ShardError, View};

#[test]
fn committed_writes_visible_to_later_readers() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard(&clock);

    let writer = shard.access(clock.now(), snapshot_isolation());
    let vertex = writer
        .create_vertex(
            &[PRIMARY_LABEL],
            vec![PropertyValue::Int(1)],
            vec![(NAME_PROPERTY, PropertyValue::from("a"))],
        )
        .unwrap();
    assert_eq!(vertex.primary_key(), &pk(1));
    writer.commit(clock.now()).unwrap();

    let reader = shard.access(clock.now(), snapshot_isolation());
    let found = reader.find_vertex(&pk(1), View::Old).expect("vertex visible");
    assert_eq!(found.labels().unwrap(), vec![PRIMARY_LABEL]);
    assert_eq!(
        found.property(NAME_PROPERTY).unwrap(),
        PropertyValue::from("a")
    );
}

#[test]
fn uncommitted_writes_stay_private() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard(&clock);

    let writer = shard.access(clock.now(), snapshot_isolation());
    writer
        .create_vertex(&[], vec![PropertyValue::Int(1)], vec![])
        .unwrap();

    // A concurrent reader sees nothing.
    let reader = shard.access(clock.now(), snapshot_isolation());
    assert!(reader.find_vertex(&pk(1), View::Old).is_none());
    assert!(reader.find_vertex(&pk(1), View::New).is_none());

    // The writer sees its own creation with the NEW view only until the
    // command advances.
    assert!(writer.find_vertex(&pk(1), View::Old).is_none());
    assert!(writer.find_vertex(&pk(1), View::New).is_some());
    writer.advance_command();
    assert!(writer.find_vertex(&pk(1), View::Old).is_some());
}

#[test]
fn snapshot_readers_ignore_later_commits() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard(&clock);
    seed_vertices(&shard, &clock, &[1]);

    let reader = shard.access(clock.now(), snapshot_isolation());

    let writer = shard.access(clock.now(), snapshot_isolation());
    let vertex = writer.find_vertex(&pk(1), View::Old).unwrap();
    vertex
        .set_property(NAME_PROPERTY, PropertyValue::from("new"))
        .unwrap();
    writer.commit(clock.now()).unwrap();

    // The old reader still sees the pre-commit state.
    let seen = reader.find_vertex(&pk(1), View::Old).unwrap();
    assert_eq!(seen.property(NAME_PROPERTY).unwrap(), PropertyValue::Null);

    // A fresh reader sees the update.
    let fresh = shard.access(clock.now(), snapshot_isolation());
    let seen = fresh.find_vertex(&pk(1), View::Old).unwrap();
    assert_eq!(seen.property(NAME_PROPERTY).unwrap(), PropertyValue::from("new"));
}

#[test]
fn conflicting_creates_raise_serialization_error() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard(&clock);

    let t1 = shard.access(clock.now(), snapshot_isolation());
    let t2 = shard.access(clock.now(), snapshot_isolation());

    t1.create_vertex(&[], vec![PropertyValue::Int(1)], vec![])
        .unwrap();
    let err = t2
        .create_vertex(&[], vec![PropertyValue::Int(1)], vec![])
        .unwrap_err();
    assert!(matches!(err, ShardError::Serialization));
}

#[test]
fn conflicting_property_writes_raise_serialization_error() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard(&clock);
    seed_vertices(&shard, &clock, &[1]);

    let t1 = shard.access(clock.now(), snapshot_isolation());
    let t2 = shard.access(clock.now(), snapshot_isolation());

    let v1 = t1.find_vertex(&pk(1), View::Old).unwrap();
    v1.set_property(NAME_PROPERTY, PropertyValue::Int(1)).unwrap();

    let v2 = t2.find_vertex(&pk(1), View::Old).unwrap();
    let err = v2
        .set_property(NAME_PROPERTY, PropertyValue::Int(2))
        .unwrap_err();
    assert!(matches!(err, ShardError::Serialization));

    // Even after t1 commits, t2 held it in its snapshot: first committer
    // wins.
    t1.commit(clock.now()).unwrap();
    let err = v2
        .set_property(NAME_PROPERTY, PropertyValue::Int(2))
        .unwrap_err();
    assert!(matches!(err, ShardError::Serialization));
}

#[test]
fn disjoint_transactions_serialize_cleanly() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard(&clock);

    let t1 = shard.access(clock.now(), snapshot_isolation());
    let t2 = shard.access(clock.now(), snapshot_isolation());
    t1.create_vertex(&[], vec![PropertyValue::Int(1)], vec![])
        .unwrap();
    t2.create_vertex(&[], vec![PropertyValue::Int(2)], vec![])
        .unwrap();
    t2.commit(clock.now()).unwrap();
    t1.commit(clock.now()).unwrap();

    let reader = shard.access(clock.now(), snapshot_isolation());
    assert!(reader.find_vertex(&pk(1), View::Old).is_some());
    assert!(reader.find_vertex(&pk(2), View::Old).is_some());
    assert_eq!(reader.vertices(View::Old).count(), 2);
}

#[test]
fn abort_unwinds_every_mutation() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard(&clock);
    seed_vertices(&shard, &clock, &[1]);

    let tx = shard.access(clock.now(), snapshot_isolation());
    let vertex = tx.find_vertex(&pk(1), View::Old).unwrap();
    vertex.add_label(SECONDARY_LABEL).unwrap();
    vertex
        .set_property(NAME_PROPERTY, PropertyValue::from("x"))
        .unwrap();
    tx.create_vertex(&[], vec![PropertyValue::Int(2)], vec![])
        .unwrap();
    tx.abort().unwrap();

    let reader = shard.access(clock.now(), snapshot_isolation());
    let seen = reader.find_vertex(&pk(1), View::Old).unwrap();
    assert_eq!(seen.labels().unwrap(), vec![PRIMARY_LABEL]);
    assert_eq!(seen.property(NAME_PROPERTY).unwrap(), PropertyValue::Null);
    assert!(reader.find_vertex(&pk(2), View::Old).is_none());
}

#[test]
fn add_then_remove_label_leaves_labels_unchanged() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard(&clock);
    seed_vertices(&shard, &clock, &[1]);

    let tx = shard.access(clock.now(), snapshot_isolation());
    let vertex = tx.find_vertex(&pk(1), View::Old).unwrap();
    let before = vertex.labels().unwrap();
    assert!(vertex.add_label(SECONDARY_LABEL).unwrap());
    assert!(vertex.remove_label(SECONDARY_LABEL).unwrap());
    assert_eq!(vertex.labels().unwrap(), before);
    tx.commit(clock.now()).unwrap();

    let reader = shard.access(clock.now(), snapshot_isolation());
    let seen = reader.find_vertex(&pk(1), View::Old).unwrap();
    assert_eq!(seen.labels().unwrap(), before);
}

#[test]
fn repeated_property_write_is_one_observable_change() {
    let clock = Arc::new(HlcClock::new());
    let wal = Arc::new(InMemoryWal::new());
    let shard = test_shard(&clock).with_wal(wal.clone());
    seed_vertices(&shard, &clock, &[1]);

    let tx = shard.access(clock.now(), snapshot_isolation());
    let vertex = tx.find_vertex(&pk(1), View::Old).unwrap();
    vertex
        .set_property(NAME_PROPERTY, PropertyValue::Int(7))
        .unwrap();
    // Writing the same value again is a no-op.
    let old = vertex
        .set_property(NAME_PROPERTY, PropertyValue::Int(7))
        .unwrap();
    assert_eq!(old, PropertyValue::Int(7));
    tx.commit(clock.now()).unwrap();

    let writes = wal
        .records()
        .iter()
        .filter(|record| matches!(record.op, WalOp::SetVertexProperty { .. }))
        .count();
    assert_eq!(writes, 1);
}

#[test]
fn idempotency_tokens_deduplicate_creates() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard(&clock);

    let tx = shard.access(clock.now(), snapshot_isolation());
    tx.create_vertex_with_token(9, &[], vec![PropertyValue::Int(1)], vec![])
        .unwrap();
    // Replaying the same token returns the existing vertex.
    let replay = tx
        .create_vertex_with_token(9, &[], vec![PropertyValue::Int(1)], vec![])
        .unwrap();
    assert_eq!(replay.primary_key(), &pk(1));
    tx.commit(clock.now()).unwrap();

    let reader = shard.access(clock.now(), snapshot_isolation());
    assert_eq!(reader.vertices(View::Old).count(), 1);
}

#[test]
fn schema_violations_produce_no_deltas() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard(&clock);

    let tx = shard.access(clock.now(), snapshot_isolation());
    let err = tx
        .create_vertex(&[], vec![PropertyValue::from("wrong type")], vec![])
        .unwrap_err();
    assert!(matches!(err, ShardError::SchemaViolation(_)));
    let err = tx
        .create_vertex(
            &[],
            vec![PropertyValue::Int(1)],
            vec![(PK_PROPERTY, PropertyValue::Int(2))],
        )
        .unwrap_err();
    assert!(matches!(err, ShardError::SchemaViolation(_)));
    tx.commit(clock.now()).unwrap();

    let reader = shard.access(clock.now(), snapshot_isolation());
    assert_eq!(reader.vertices(View::Old).count(), 0);
}

#[test]
fn keys_outside_the_range_are_rejected() {
    let clock = Arc::new(HlcClock::new());
    let name_id = tenebra::NameIdMapper::new();
    let shard = tenebra::Shard::new(
        PRIMARY_LABEL,
        pk(0),
        Some(pk(100)),
        int_schema(),
        clock.now(),
        tenebra::Config::default(),
        Arc::clone(&clock),
        name_id,
    );
    let tx = shard.access(clock.now(), snapshot_isolation());
    let err = tx
        .create_vertex(&[], vec![PropertyValue::Int(100)], vec![])
        .unwrap_err();
    assert!(matches!(err, ShardError::OutOfRange));
    assert!(tx
        .create_vertex(&[], vec![PropertyValue::Int(99)], vec![])
        .is_ok());
}
