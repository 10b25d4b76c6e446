//! Coordinator-facing pieces: the versioned shard map used for routing and
//! the message types exchanged with the coordinator. The coordinator's
//! consensus is external; the engine only assumes a leader address that can
//! be asked and may redirect.

pub mod messages;
pub mod shard_map;

pub use messages::{
    HeartbeatRequest, HeartbeatResponse, Message, ShardId, ShardToInitialize, ShardToSplit,
    SplitRequest, SuggestedSplitInfo,
};
pub use shard_map::{AddressAndStatus, ShardMap, ShardStatus};
