#![allow(dead_code)]

use std::sync::Arc;

use tenebra::storage::schema::{SchemaProperty, SchemaType};
use tenebra::storage::Shard;
use tenebra::{
    Config, Hlc, HlcClock, IsolationLevel, LabelId, NameIdMapper, PrimaryKey, PropertyId,
    PropertyValue,
};

pub const PRIMARY_LABEL: LabelId = LabelId(1);
pub const PK_PROPERTY: PropertyId = PropertyId(2);
pub const SECONDARY_LABEL: LabelId = LabelId(4);
pub const NAME_PROPERTY: PropertyId = PropertyId(5);

pub fn pk(i: i64) -> PrimaryKey {
    PrimaryKey::new(vec![PropertyValue::Int(i)])
}

pub fn int_schema() -> Vec<SchemaProperty> {
    vec![SchemaProperty {
        property_id: PK_PROPERTY,
        kind: SchemaType::Int,
    }]
}

pub fn test_shard(clock: &Arc<HlcClock>) -> Shard {
    test_shard_with_config(clock, Config::default())
}

pub fn test_shard_with_config(clock: &Arc<HlcClock>, config: Config) -> Shard {
    let name_id = NameIdMapper::new();
    name_id.store_mapping(std::collections::HashMap::from([
        (1, "label".to_owned()),
        (2, "property".to_owned()),
        (3, "edge_type".to_owned()),
        (4, "secondary_label".to_owned()),
        (5, "name".to_owned()),
    ]));
    Shard::new(
        PRIMARY_LABEL,
        pk(i64::MIN),
        None,
        int_schema(),
        clock.now(),
        config,
        Arc::clone(clock),
        name_id,
    )
}

pub fn snapshot_isolation() -> IsolationLevel {
    IsolationLevel::SnapshotIsolation
}

/// Creates and commits one vertex per key.
pub fn seed_vertices(shard: &Shard, clock: &Arc<HlcClock>, keys: &[i64]) {
    let accessor = shard.access(clock.now(), snapshot_isolation());
    for &key in keys {
        accessor
            .create_vertex(&[], vec![PropertyValue::Int(key)], vec![])
            .expect("seed vertex");
    }
    accessor.commit(clock.now()).expect("seed commit");
}

pub fn commit_at(clock: &Arc<HlcClock>) -> Hlc {
    clock.now()
}
