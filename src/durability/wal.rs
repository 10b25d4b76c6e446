//! Write-ahead log records.
//!
//! One record per delta-producing operation plus the index/schema
//! operations, stamped with the commit HLC at append time. Transactions
//! buffer their redo ops and the shard appends them inside the commit
//! critical section, so sink order equals commit order.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hlc::Hlc;
use crate::storage::edge::EdgeKey;
use crate::storage::schema::SchemaProperty;
use crate::types::{LabelId, PropertyId};
use crate::value::{PrimaryKey, PropertyValue};

/// Redo operation, as buffered by a transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WalOp {
    CreateVertex {
        pk: PrimaryKey,
        labels: Vec<LabelId>,
        properties: Vec<(PropertyId, PropertyValue)>,
    },
    DeleteVertex {
        pk: PrimaryKey,
    },
    AddLabel {
        pk: PrimaryKey,
        label: LabelId,
    },
    RemoveLabel {
        pk: PrimaryKey,
        label: LabelId,
    },
    /// `Null` clears the property.
    SetVertexProperty {
        pk: PrimaryKey,
        property: PropertyId,
        value: PropertyValue,
    },
    CreateEdge {
        key: EdgeKey,
    },
    DeleteEdge {
        key: EdgeKey,
    },
    SetEdgeProperty {
        key: EdgeKey,
        property: PropertyId,
        value: PropertyValue,
    },
    CreateLabelIndex {
        label: LabelId,
    },
    DropLabelIndex {
        label: LabelId,
    },
    CreateLabelPropertyIndex {
        label: LabelId,
        property: PropertyId,
    },
    DropLabelPropertyIndex {
        label: LabelId,
        property: PropertyId,
    },
    CreateSchema {
        label: LabelId,
        properties: Vec<SchemaProperty>,
    },
    DropSchema {
        label: LabelId,
    },
}

impl WalOp {
    /// Primary key deciding which split successor carries the record.
    /// Edge ops follow the edge's source; admin ops belong to both sides.
    pub(crate) fn owning_key(&self) -> Option<&PrimaryKey> {
        match self {
            WalOp::CreateVertex { pk, .. }
            | WalOp::DeleteVertex { pk }
            | WalOp::AddLabel { pk, .. }
            | WalOp::RemoveLabel { pk, .. }
            | WalOp::SetVertexProperty { pk, .. } => Some(pk),
            WalOp::CreateEdge { key }
            | WalOp::DeleteEdge { key }
            | WalOp::SetEdgeProperty { key, .. } => Some(&key.src.primary_key),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub op: WalOp,
    pub commit_ts: Hlc,
}

/// Destination for WAL records. Implementations decide durability and
/// replication; append failures fail the commit.
pub trait WalSink: Send + Sync + std::fmt::Debug {
    fn append(&self, record: WalRecord) -> Result<()>;
}

/// Sink keeping records in memory, for tests and for shards running
/// without durability.
#[derive(Debug, Default)]
pub struct InMemoryWal {
    records: Mutex<Vec<WalRecord>>,
}

impl InMemoryWal {
    pub fn new() -> Self {
        InMemoryWal::default()
    }

    pub fn records(&self) -> Vec<WalRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WalSink for InMemoryWal {
    fn append(&self, record: WalRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_round_trip_through_serde() {
        let record = WalRecord {
            op: WalOp::SetVertexProperty {
                pk: PrimaryKey::new(vec![PropertyValue::Int(1)]),
                property: PropertyId(4),
                value: PropertyValue::String("a".into()),
            },
            commit_ts: Hlc::new(10, 2),
        };
        let encoded = serde_json::to_string(&record).unwrap();
        let decoded: WalRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn in_memory_sink_preserves_order() {
        let wal = InMemoryWal::new();
        for i in 0..3 {
            wal.append(WalRecord {
                op: WalOp::DeleteVertex {
                    pk: PrimaryKey::new(vec![PropertyValue::Int(i)]),
                },
                commit_ts: Hlc::new(1, i as u64),
            })
            .unwrap();
        }
        let commits: Vec<u64> = wal.records().iter().map(|r| r.commit_ts.logical).collect();
        assert_eq!(commits, vec![0, 1, 2]);
    }
}
