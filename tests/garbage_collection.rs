mod common;

use std::sync::Arc;

use common::*;
use tenebra::{Config, HlcClock, PropertyValue, View};

#[test]
fn gc_never_frees_state_visible_to_live_snapshots() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard_with_config(&clock, Config::for_testing());
    seed_vertices(&shard, &clock, &[1]);

    let old_reader = shard.access(clock.now(), snapshot_isolation());

    let deleter = shard.access(clock.now(), snapshot_isolation());
    let vertex = deleter.find_vertex(&pk(1), View::Old).unwrap();
    deleter.delete_vertex(&vertex).unwrap();
    deleter.commit(clock.now()).unwrap();

    // The old reader pins the version.
    for _ in 0..3 {
        shard.collect_garbage();
        clock.now();
    }
    assert!(old_reader.find_vertex(&pk(1), View::Old).is_some());
    assert_eq!(shard.info().vertex_count, 1);

    old_reader.abort().unwrap();
    // One pass queues the tombstone, a later pass frees it.
    shard.collect_garbage();
    clock.now();
    shard.collect_garbage();
    assert_eq!(shard.info().vertex_count, 0);
}

#[test]
fn aborted_creations_are_reclaimed() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard_with_config(&clock, Config::for_testing());

    let tx = shard.access(clock.now(), snapshot_isolation());
    tx.create_vertex(&[], vec![PropertyValue::Int(1)], vec![])
        .unwrap();
    tx.abort().unwrap();
    assert_eq!(shard.info().vertex_count, 1);

    shard.collect_garbage();
    clock.now();
    shard.collect_garbage();
    assert_eq!(shard.info().vertex_count, 0);

    // The primary key is usable again.
    let retry = shard.access(clock.now(), snapshot_isolation());
    assert!(retry
        .create_vertex(&[], vec![PropertyValue::Int(1)], vec![])
        .is_ok());
    retry.commit(clock.now()).unwrap();
}

#[test]
fn delta_chains_shrink_once_no_reader_needs_them() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard_with_config(&clock, Config::for_testing());
    seed_vertices(&shard, &clock, &[1]);

    for i in 0..5 {
        let tx = shard.access(clock.now(), snapshot_isolation());
        let vertex = tx.find_vertex(&pk(1), View::Old).unwrap();
        vertex
            .set_property(NAME_PROPERTY, PropertyValue::Int(i))
            .unwrap();
        tx.commit(clock.now()).unwrap();
    }

    let stats = shard.collect_garbage();
    assert!(stats.pruned_deltas >= 5, "pruned {}", stats.pruned_deltas);

    // Current state is intact after pruning.
    let reader = shard.access(clock.now(), snapshot_isolation());
    let vertex = reader.find_vertex(&pk(1), View::Old).unwrap();
    assert_eq!(vertex.property(NAME_PROPERTY).unwrap(), PropertyValue::Int(4));
}

#[test]
fn deleted_edges_are_reclaimed_with_their_objects() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard_with_config(&clock, Config::for_testing());
    seed_vertices(&shard, &clock, &[1, 2]);
    let vid = |i: i64| tenebra::VertexId::new(PRIMARY_LABEL, pk(i));

    {
        let tx = shard.access(clock.now(), snapshot_isolation());
        tx.create_edge(&vid(1), &vid(2), tenebra::EdgeTypeId(3), tenebra::Gid(0))
            .unwrap();
        tx.commit(clock.now()).unwrap();
    }
    {
        let tx = shard.access(clock.now(), snapshot_isolation());
        let vertex = tx.find_vertex(&pk(1), View::Old).unwrap();
        tx.detach_delete_vertex(&vertex).unwrap();
        tx.commit(clock.now()).unwrap();
    }
    assert_eq!(shard.info().edge_count, 1);

    shard.collect_garbage();
    clock.now();
    let stats = shard.collect_garbage();
    assert_eq!(shard.info().edge_count, 0);
    assert_eq!(shard.info().vertex_count, 1);
    assert_eq!(stats.freed_vertices + stats.freed_edges, 2);
}

#[test]
fn expired_index_entries_are_vacuumed() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard_with_config(&clock, Config::for_testing());
    shard.create_index(SECONDARY_LABEL);
    seed_vertices(&shard, &clock, &[1]);

    {
        let tx = shard.access(clock.now(), snapshot_isolation());
        let vertex = tx.find_vertex(&pk(1), View::Old).unwrap();
        vertex.add_label(SECONDARY_LABEL).unwrap();
        tx.commit(clock.now()).unwrap();
    }
    {
        let tx = shard.access(clock.now(), snapshot_isolation());
        let vertex = tx.find_vertex(&pk(1), View::Old).unwrap();
        vertex.remove_label(SECONDARY_LABEL).unwrap();
        tx.commit(clock.now()).unwrap();
    }

    clock.now();
    let stats = shard.collect_garbage();
    assert!(stats.pruned_index_entries >= 1);
    let reader = shard.access(clock.now(), snapshot_isolation());
    assert_eq!(reader.vertices_by_label(SECONDARY_LABEL, View::Old).count(), 0);
}
