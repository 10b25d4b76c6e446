//! Undo deltas.
//!
//! Every mutation threads a delta onto the head of the touched object's
//! chain. A delta describes how to rewind the object by one step, so
//! walking the chain from the head reconstructs older versions (for
//! snapshot reads) and abort replays a transaction's own deltas newest
//! first. Chains are per-object and ordered newest to oldest.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::edge::{EdgeKey, EdgeLink};
use crate::storage::mvcc::CommitInfo;
use crate::types::{CommandId, LabelId, PropertyId, TransactionId};
use crate::value::{PrimaryKey, PropertyValue};

/// Stable handle of the object a delta rewinds. Handles survive splits
/// unchanged because containers are keyed by them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectHandle {
    Vertex(PrimaryKey),
    Edge(EdgeKey),
}

impl ObjectHandle {
    /// The primary key deciding which split successor owns the object.
    /// Edges follow their source vertex.
    pub fn owning_key(&self) -> &PrimaryKey {
        match self {
            ObjectHandle::Vertex(pk) => pk,
            ObjectHandle::Edge(key) => &key.src.primary_key,
        }
    }
}

/// What applying the delta undoes, with the payload needed to do it.
#[derive(Clone, Debug)]
pub enum DeltaAction {
    /// Undo of a creation: the object did not exist one step earlier.
    DeleteObject,
    /// Undo of a deletion: the object existed one step earlier.
    RecreateObject,
    /// Undo of a label removal.
    AddLabel(LabelId),
    /// Undo of a label addition.
    RemoveLabel(LabelId),
    /// Undo of a property write: restores the previous value. `Null` means
    /// the property was absent.
    SetProperty {
        key: PropertyId,
        value: PropertyValue,
    },
    /// Undo of an in-edge removal.
    AddInEdge(EdgeLink),
    /// Undo of an out-edge removal.
    AddOutEdge(EdgeLink),
    /// Undo of an in-edge addition.
    RemoveInEdge(EdgeLink),
    /// Undo of an out-edge addition.
    RemoveOutEdge(EdgeLink),
}

pub type DeltaRef = Arc<Delta>;

#[derive(Debug)]
pub struct Delta {
    pub action: DeltaAction,
    /// Object this delta rewinds.
    pub object: ObjectHandle,
    pub tx_id: TransactionId,
    pub command_id: CommandId,
    /// Shared with the owning transaction and its other deltas.
    pub commit_info: Arc<CommitInfo>,
    /// Link toward the next-older delta of the same object. Mutated only
    /// under the owning object's lock (GC truncation, abort unlinking).
    next: Mutex<Option<DeltaRef>>,
}

impl Delta {
    pub fn new(
        action: DeltaAction,
        object: ObjectHandle,
        tx_id: TransactionId,
        command_id: CommandId,
        commit_info: Arc<CommitInfo>,
        next: Option<DeltaRef>,
    ) -> DeltaRef {
        Arc::new(Delta {
            action,
            object,
            tx_id,
            command_id,
            commit_info,
            next: Mutex::new(next),
        })
    }

    pub fn next(&self) -> Option<DeltaRef> {
        self.next.lock().clone()
    }

    pub fn set_next(&self, next: Option<DeltaRef>) {
        *self.next.lock() = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chains_link_newest_to_oldest() {
        let info = CommitInfo::new_active();
        let handle = ObjectHandle::Vertex(PrimaryKey::new(vec![PropertyValue::Int(1)]));
        let oldest = Delta::new(
            DeltaAction::DeleteObject,
            handle.clone(),
            TransactionId(1),
            0,
            Arc::clone(&info),
            None,
        );
        let newest = Delta::new(
            DeltaAction::RemoveLabel(LabelId(4)),
            handle,
            TransactionId(1),
            1,
            info,
            Some(Arc::clone(&oldest)),
        );
        let walked: Vec<CommandId> = std::iter::successors(Some(newest), |d| d.next())
            .map(|d| d.command_id)
            .collect();
        assert_eq!(walked, vec![1, 0]);
    }
}
