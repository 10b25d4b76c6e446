mod common;

use std::sync::Arc;

use common::*;
use tenebra::durability::{recover, InMemoryWal, ShardSnapshot};
use tenebra::{Config, EdgeTypeId, Gid, HlcClock, NameIdMapper, PropertyValue, VertexId, View};

const KNOWS: EdgeTypeId = EdgeTypeId(3);

fn vid(i: i64) -> VertexId {
    VertexId::new(PRIMARY_LABEL, pk(i))
}

#[test]
fn snapshot_plus_wal_reproduces_the_shard() {
    let clock = Arc::new(HlcClock::new());
    let wal = Arc::new(InMemoryWal::new());
    let shard = test_shard(&clock).with_wal(wal.clone());
    shard.create_label_property_index(PRIMARY_LABEL, NAME_PROPERTY);

    // State covered by the snapshot.
    {
        let tx = shard.access(clock.now(), snapshot_isolation());
        for i in 1..=3 {
            tx.create_vertex(
                &[],
                vec![PropertyValue::Int(i)],
                vec![(NAME_PROPERTY, PropertyValue::Int(i * 10))],
            )
            .unwrap();
        }
        tx.create_edge(&vid(1), &vid(2), KNOWS, Gid(0)).unwrap();
        tx.commit(clock.now()).unwrap();
    }
    let snapshot = ShardSnapshot::capture(&shard);

    // State only the WAL knows about.
    {
        let tx = shard.access(clock.now(), snapshot_isolation());
        tx.create_vertex(&[], vec![PropertyValue::Int(4)], vec![])
            .unwrap();
        let v3 = tx.find_vertex(&pk(3), View::New).unwrap();
        v3.set_property(NAME_PROPERTY, PropertyValue::Int(333)).unwrap();
        tx.create_edge(&vid(3), &vid(4), KNOWS, Gid(1)).unwrap();
        tx.commit(clock.now()).unwrap();
    }
    {
        let tx = shard.access(clock.now(), snapshot_isolation());
        let v2 = tx.find_vertex(&pk(2), View::New).unwrap();
        tx.detach_delete_vertex(&v2).unwrap();
        tx.commit(clock.now()).unwrap();
    }

    let recovery_clock = Arc::new(HlcClock::new());
    let recovered = recover(
        snapshot,
        &wal.records(),
        Config::default(),
        Arc::clone(&recovery_clock),
        NameIdMapper::new(),
    )
    .expect("recovery succeeds");

    let reader = recovered.access(recovery_clock.now(), snapshot_isolation());
    let keys: Vec<_> = reader
        .vertices(View::Old)
        .map(|v| v.primary_key().clone())
        .collect();
    assert_eq!(keys, vec![pk(1), pk(3), pk(4)]);

    let v3 = reader.find_vertex(&pk(3), View::Old).unwrap();
    assert_eq!(v3.property(NAME_PROPERTY).unwrap(), PropertyValue::Int(333));
    assert_eq!(v3.out_edges().unwrap().len(), 1);
    let v1 = reader.find_vertex(&pk(1), View::Old).unwrap();
    assert!(v1.out_edges().unwrap().is_empty());

    // The index definition survived and serves reads.
    assert!(recovered.label_property_index_exists(PRIMARY_LABEL, NAME_PROPERTY));
    assert_eq!(
        reader
            .vertices_by_label_property_value(
                PRIMARY_LABEL,
                NAME_PROPERTY,
                PropertyValue::Int(333),
                View::Old,
            )
            .count(),
        1
    );
}

#[test]
fn records_at_or_below_the_snapshot_are_skipped() {
    let clock = Arc::new(HlcClock::new());
    let wal = Arc::new(InMemoryWal::new());
    let shard = test_shard(&clock).with_wal(wal.clone());
    seed_vertices(&shard, &clock, &[1, 2]);

    // The snapshot already covers everything the WAL holds; replaying the
    // records again would collide with the loaded state.
    let snapshot = ShardSnapshot::capture(&shard);
    let recovery_clock = Arc::new(HlcClock::new());
    let recovered = recover(
        snapshot,
        &wal.records(),
        Config::default(),
        Arc::clone(&recovery_clock),
        NameIdMapper::new(),
    )
    .expect("recovery skips covered records");

    let reader = recovered.access(recovery_clock.now(), snapshot_isolation());
    assert_eq!(reader.vertices(View::Old).count(), 2);
}

#[test]
fn snapshots_round_trip_through_files() {
    let clock = Arc::new(HlcClock::new());
    let shard = test_shard(&clock);
    seed_vertices(&shard, &clock, &[1, 2, 3]);
    let snapshot = ShardSnapshot::capture(&shard);

    let file = tempfile::NamedTempFile::new().unwrap();
    serde_json::to_writer(file.as_file(), &snapshot).unwrap();
    let reloaded: ShardSnapshot =
        serde_json::from_reader(std::fs::File::open(file.path()).unwrap()).unwrap();

    assert_eq!(reloaded.vertices.len(), 3);
    assert_eq!(reloaded.upper_ts, snapshot.upper_ts);

    let recovered = recover(
        reloaded,
        &[],
        Config::default(),
        Arc::new(HlcClock::new()),
        NameIdMapper::new(),
    )
    .unwrap();
    assert_eq!(recovered.info().vertex_count, 3);
}
