//! tenebra: a sharded, multi-version graph storage engine.
//!
//! Each shard owns a contiguous primary-key range of one label and embeds
//! its own MVCC store: delta-chained vertices and edges under snapshot
//! isolation, secondary indexes filtered by reader snapshots, and a
//! watermark-driven garbage collector. Commits are ordered per shard by a
//! hybrid-logical clock. Shards can split online, carrying in-progress
//! transactions into both successors, and a per-node shard manager
//! multiplexes shards over a worker pool while heartbeating a coordinator.

pub mod config;
pub mod coordinator;
pub mod durability;
pub mod error;
pub mod hlc;
pub mod manager;
pub mod name_id;
pub mod storage;
pub mod types;
pub mod value;

pub use crate::config::{Config, ManagerConfig};
pub use crate::error::{Result, ShardError};
pub use crate::hlc::{Hlc, HlcClock};
pub use crate::name_id::NameIdMapper;
pub use crate::storage::{
    Accessor, EdgeAccessor, EdgeKey, EdgeLink, Shard, SplitData, VertexAccessor, VertexId,
};
pub use crate::types::{
    EdgeTypeId, Gid, IsolationLevel, LabelId, PropertyId, TransactionId, View,
};
pub use crate::value::{PrimaryKey, PropertyValue};
