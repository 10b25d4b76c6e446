//! Transactions.
//!
//! A transaction is created by `Shard::access`, identified by the logical
//! component of its start HLC, and closed by commit or abort. It owns the
//! deltas it produced (via the undo list), the redo records destined for
//! the write-ahead log, and the index entries awaiting a commit stamp.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::durability::wal::WalOp;
use crate::hlc::Hlc;
use crate::storage::delta::DeltaRef;
use crate::storage::indices::IndexOp;
use crate::storage::mvcc::{CommitInfo, Snapshot, TxState};
use crate::types::{CommandId, IsolationLevel, TransactionId};

#[derive(Debug)]
pub struct Transaction {
    pub id: TransactionId,
    pub start_ts: Hlc,
    pub isolation: IsolationLevel,
    /// Transactions active at start, own id included as the largest.
    pub snapshot: Snapshot,
    pub commit_info: Arc<CommitInfo>,
    command_id: AtomicU32,
    /// Deltas in creation order; abort replays them in reverse.
    undo: Mutex<Vec<DeltaRef>>,
    /// Redo records emitted to the WAL at commit.
    redo: Mutex<Vec<WalOp>>,
    /// Index entries this transaction created or expired, for commit
    /// stamping and abort unwinding.
    index_ops: Mutex<Vec<IndexOp>>,
    /// Idempotency tokens already applied inside this transaction.
    applied_tokens: Mutex<HashSet<u64>>,
}

impl Transaction {
    pub fn new(start_ts: Hlc, isolation: IsolationLevel, snapshot: Snapshot) -> Self {
        Transaction {
            id: TransactionId(start_ts.logical),
            start_ts,
            isolation,
            snapshot,
            commit_info: CommitInfo::new_active(),
            command_id: AtomicU32::new(0),
            undo: Mutex::new(Vec::new()),
            redo: Mutex::new(Vec::new()),
            index_ops: Mutex::new(Vec::new()),
            applied_tokens: Mutex::new(HashSet::new()),
        }
    }

    /// Rebuilds a transaction for a split successor: same identity and
    /// position, empty op lists (the splitter refills them with the deltas
    /// that landed on that successor). Live transactions get a fresh commit
    /// info so commit stays per-shard; finished ones share their immutable
    /// info.
    pub fn clone_for_split(&self, commit_info: Arc<CommitInfo>) -> Self {
        Transaction {
            id: self.id,
            start_ts: self.start_ts,
            isolation: self.isolation,
            snapshot: self.snapshot.clone(),
            commit_info,
            command_id: AtomicU32::new(self.command_id()),
            undo: Mutex::new(Vec::new()),
            redo: Mutex::new(Vec::new()),
            index_ops: Mutex::new(Vec::new()),
            applied_tokens: Mutex::new(self.applied_tokens.lock().clone()),
        }
    }

    /// Clones of the op lists, for split partitioning.
    pub(crate) fn index_ops_snapshot(&self) -> Vec<IndexOp> {
        self.index_ops.lock().clone()
    }

    pub(crate) fn redo_snapshot(&self) -> Vec<WalOp> {
        self.redo.lock().clone()
    }

    /// Drops every recorded delta, index op and redo op whose object fails
    /// `keep`; the split leaves each successor with exactly the operations
    /// touching its range.
    pub(crate) fn retain_objects(&self, keep: impl Fn(&crate::value::PrimaryKey) -> bool) {
        self.undo
            .lock()
            .retain(|delta| keep(delta.object.owning_key()));
        self.index_ops.lock().retain(|op| keep(op.pk()));
        self.redo
            .lock()
            .retain(|op| op.owning_key().map_or(true, &keep));
    }

    pub fn state(&self) -> TxState {
        self.commit_info.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == TxState::Active
    }

    pub fn commit_ts(&self) -> Option<Hlc> {
        self.commit_info.commit_ts()
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id.load(Ordering::Acquire)
    }

    pub fn advance_command(&self) -> CommandId {
        self.command_id.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn push_delta(&self, delta: DeltaRef) {
        self.undo.lock().push(delta);
    }

    pub(crate) fn push_deltas(&self, deltas: impl IntoIterator<Item = DeltaRef>) {
        self.undo.lock().extend(deltas);
    }

    /// Deltas in creation order. Clones the refs, not the deltas.
    pub(crate) fn deltas(&self) -> Vec<DeltaRef> {
        self.undo.lock().clone()
    }

    pub(crate) fn delta_count(&self) -> usize {
        self.undo.lock().len()
    }

    pub(crate) fn record_redo(&self, op: WalOp) {
        self.redo.lock().push(op);
    }

    pub(crate) fn take_redo(&self) -> Vec<WalOp> {
        std::mem::take(&mut self.redo.lock())
    }

    pub(crate) fn record_index_op(&self, op: IndexOp) {
        self.index_ops.lock().push(op);
    }

    pub(crate) fn take_index_ops(&self) -> Vec<IndexOp> {
        std::mem::take(&mut self.index_ops.lock())
    }

    /// Marks `token` as applied; returns false when it already was, in
    /// which case the caller skips the operation as a replay.
    pub(crate) fn claim_idempotency_token(&self, token: u64) -> bool {
        self.applied_tokens.lock().insert(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_totally_ordered() {
        let tx = Transaction::new(
            Hlc::new(1, 7),
            IsolationLevel::SnapshotIsolation,
            Snapshot::new(vec![TransactionId(7)]),
        );
        assert_eq!(tx.id, TransactionId(7));
        assert_eq!(tx.command_id(), 0);
        assert_eq!(tx.advance_command(), 1);
        assert_eq!(tx.advance_command(), 2);
        assert_eq!(tx.command_id(), 2);
    }

    #[test]
    fn idempotency_tokens_apply_once() {
        let tx = Transaction::new(
            Hlc::new(1, 1),
            IsolationLevel::SnapshotIsolation,
            Snapshot::new(vec![TransactionId(1)]),
        );
        assert!(tx.claim_idempotency_token(42));
        assert!(!tx.claim_idempotency_token(42));
        assert!(tx.claim_idempotency_token(43));
    }

    #[test]
    fn split_clone_keeps_identity_and_position() {
        let tx = Transaction::new(
            Hlc::new(3, 9),
            IsolationLevel::SnapshotIsolation,
            Snapshot::new(vec![TransactionId(4), TransactionId(9)]),
        );
        tx.advance_command();
        let clone = tx.clone_for_split(CommitInfo::new_active());
        assert_eq!(clone.id, tx.id);
        assert_eq!(clone.start_ts, tx.start_ts);
        assert_eq!(clone.command_id(), tx.command_id());
        assert_eq!(clone.snapshot, tx.snapshot);
        assert!(!Arc::ptr_eq(&clone.commit_info, &tx.commit_info));
    }
}
