use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use tenebra::storage::schema::{SchemaProperty, SchemaType};
use tenebra::storage::Shard;
use tenebra::{
    Config, HlcClock, IsolationLevel, LabelId, NameIdMapper, PrimaryKey, PropertyId,
    PropertyValue, View,
};

const PRIMARY: LabelId = LabelId(1);
const PK_PROP: PropertyId = PropertyId(2);
const NAME: PropertyId = PropertyId(3);

fn bench_shard(clock: &Arc<HlcClock>) -> Shard {
    Shard::new(
        PRIMARY,
        PrimaryKey::new(vec![PropertyValue::Int(i64::MIN)]),
        None,
        vec![SchemaProperty {
            property_id: PK_PROP,
            kind: SchemaType::Int,
        }],
        clock.now(),
        Config::default(),
        Arc::clone(clock),
        NameIdMapper::new(),
    )
}

fn seeded_shard(clock: &Arc<HlcClock>, count: i64) -> Shard {
    let shard = bench_shard(clock);
    let accessor = shard.access(clock.now(), IsolationLevel::SnapshotIsolation);
    for i in 0..count {
        accessor
            .create_vertex(
                &[],
                vec![PropertyValue::Int(i)],
                vec![(NAME, PropertyValue::Int(i))],
            )
            .unwrap();
    }
    accessor.commit(clock.now()).unwrap();
    shard
}

fn create_commit(c: &mut Criterion) {
    let clock = Arc::new(HlcClock::new());
    c.bench_function("create_vertex_commit", |b| {
        let shard = bench_shard(&clock);
        let mut next_key = 0i64;
        b.iter(|| {
            let accessor = shard.access(clock.now(), IsolationLevel::SnapshotIsolation);
            accessor
                .create_vertex(&[], vec![PropertyValue::Int(next_key)], vec![])
                .unwrap();
            accessor.commit(clock.now()).unwrap();
            next_key += 1;
        });
    });
}

fn point_reads(c: &mut Criterion) {
    let clock = Arc::new(HlcClock::new());
    let shard = seeded_shard(&clock, 10_000);
    c.bench_function("find_vertex", |b| {
        let accessor = shard.access(clock.now(), IsolationLevel::SnapshotIsolation);
        let mut key = 0i64;
        b.iter(|| {
            let pk = PrimaryKey::new(vec![PropertyValue::Int(key % 10_000)]);
            let vertex = accessor.find_vertex(&pk, View::Old).unwrap();
            criterion::black_box(vertex.primary_key());
            key += 1;
        });
    });
}

fn full_scan(c: &mut Criterion) {
    let clock = Arc::new(HlcClock::new());
    let shard = seeded_shard(&clock, 1_000);
    c.bench_function("scan_1k_vertices", |b| {
        b.iter_batched(
            || shard.access(clock.now(), IsolationLevel::SnapshotIsolation),
            |accessor| {
                criterion::black_box(accessor.vertices(View::Old).count());
            },
            BatchSize::SmallInput,
        );
    });
}

fn property_update(c: &mut Criterion) {
    let clock = Arc::new(HlcClock::new());
    let shard = seeded_shard(&clock, 1_000);
    c.bench_function("set_property_commit", |b| {
        let mut value = 0i64;
        b.iter(|| {
            let accessor = shard.access(clock.now(), IsolationLevel::SnapshotIsolation);
            let pk = PrimaryKey::new(vec![PropertyValue::Int(value % 1_000)]);
            let vertex = accessor.find_vertex(&pk, View::Old).unwrap();
            vertex.set_property(NAME, PropertyValue::Int(value)).unwrap();
            accessor.commit(clock.now()).unwrap();
            value += 1;
        });
    });
}

criterion_group!(benches, create_commit, point_reads, full_scan, property_update);
criterion_main!(benches);
