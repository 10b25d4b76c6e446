//! Messages exchanged between shard managers and the coordinator, and the
//! shard-directed requests the manager routes to workers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hlc::Hlc;
use crate::manager::transport::Address;
use crate::storage::schema::SchemaProperty;
use crate::types::LabelId;
use crate::value::PrimaryKey;

/// Identity of a shard in the coordinator's eyes: its label and low key.
pub type ShardId = (LabelId, PrimaryKey);

/// A shard's own split proposal, carried in heartbeats until the
/// coordinator decides.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SuggestedSplitInfo {
    pub shard_uuid: Uuid,
    pub label_id: LabelId,
    pub low_key: PrimaryKey,
    pub split_key: PrimaryKey,
    pub shard_version: Hlc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub from: Address,
    /// Shards initialized locally but not yet acknowledged.
    pub initialized_rsms: Vec<(Uuid, ShardId)>,
    pub suggested_splits: Vec<SuggestedSplitInfo>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardToInitialize {
    pub uuid: Uuid,
    pub label_id: LabelId,
    pub min_key: PrimaryKey,
    pub schema: Vec<SchemaProperty>,
    pub shard_version: Hlc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardToSplit {
    /// Source shard uuid to successor uuid.
    pub uuid_mapping: Vec<(Uuid, Uuid)>,
    pub split_key: PrimaryKey,
    pub old_shard_version: Hlc,
    pub new_lhs_shard_version: Hlc,
    pub new_rhs_shard_version: Hlc,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Set when the addressed node is not the leader; retry there.
    pub retry_leader: Option<Address>,
    pub success: bool,
    pub acknowledged_initialized_rsms: Vec<Uuid>,
    pub shards_to_initialize: Vec<ShardToInitialize>,
    pub shards_to_split: Vec<ShardToSplit>,
}

/// Split command addressed to the source shard, forwarded best-effort;
/// re-issue handles a miss, the manager's loop never blocks on it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitRequest {
    pub split_key: PrimaryKey,
    pub old_shard_version: Hlc,
    pub new_lhs_shard_version: Hlc,
    pub new_rhs_shard_version: Hlc,
    pub uuid_mapping: Vec<(Uuid, Uuid)>,
}

/// Everything that can travel over the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    HeartbeatRequest(HeartbeatRequest),
    HeartbeatResponse(HeartbeatResponse),
    SplitRequest(SplitRequest),
    ShutDown,
}
