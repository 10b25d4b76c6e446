use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct LabelId(pub u32);
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct PropertyId(pub u32);
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct EdgeTypeId(pub u32);
/// Globally unique edge identifier, allocated by the layer above the shard.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct Gid(pub u64);
/// Transaction identity within one shard: the logical component of the
/// transaction's start HLC.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct TransactionId(pub u64);
/// Per-transaction command counter.
pub type CommandId = u32;

/// Which side of the transaction's own pending changes a read observes.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum View {
    /// State as of the previous command; the current command's changes are
    /// not visible.
    Old,
    /// State including the current command's changes.
    New,
}

/// Isolation levels accepted by `Shard::access`. Only snapshot isolation is
/// honored by the visibility logic.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum IsolationLevel {
    #[default]
    SnapshotIsolation,
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LabelId {
    fn from(value: u32) -> Self {
        LabelId(value)
    }
}

impl From<LabelId> for u32 {
    fn from(value: LabelId) -> Self {
        value.0
    }
}

impl From<u32> for PropertyId {
    fn from(value: u32) -> Self {
        PropertyId(value)
    }
}

impl From<PropertyId> for u32 {
    fn from(value: PropertyId) -> Self {
        value.0
    }
}

impl From<u32> for EdgeTypeId {
    fn from(value: u32) -> Self {
        EdgeTypeId(value)
    }
}

impl From<EdgeTypeId> for u32 {
    fn from(value: EdgeTypeId) -> Self {
        value.0
    }
}

impl From<u64> for Gid {
    fn from(value: u64) -> Self {
        Gid(value)
    }
}
