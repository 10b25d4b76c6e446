//! MVCC record, commit log and the snapshot-visibility decisions.
//!
//! Every vertex and edge embeds an [`MvccRecord`]: the creating and expiring
//! transaction slots plus hint bits that cache commit-log lookups. The
//! creating slot is set once at insertion; the expiring slot may be set and
//! cleared again (on abort), which is why expiration reads go through a
//! re-read loop and why abort hints are never cached for the expiring slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::hlc::Hlc;
use crate::types::{CommandId, TransactionId};

/// Lifecycle of one transaction.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TxState {
    Active,
    Committed,
    Aborted,
}

/// Shared by a transaction and every delta it produced. Holds the commit
/// timestamp once assigned.
#[derive(Debug)]
pub struct CommitInfo {
    state: AtomicU8,
    commit_ts: RwLock<Option<Hlc>>,
}

impl CommitInfo {
    pub fn new_active() -> Arc<Self> {
        Arc::new(CommitInfo {
            state: AtomicU8::new(TxState::Active as u8),
            commit_ts: RwLock::new(None),
        })
    }

    pub fn state(&self) -> TxState {
        match self.state.load(Ordering::Acquire) {
            0 => TxState::Active,
            1 => TxState::Committed,
            _ => TxState::Aborted,
        }
    }

    pub fn commit_ts(&self) -> Option<Hlc> {
        *self.commit_ts.read()
    }

    /// The timestamp is published before the state flips so that anyone who
    /// observes `Committed` also observes the timestamp.
    pub fn mark_committed(&self, ts: Hlc) {
        *self.commit_ts.write() = Some(ts);
        self.state.store(TxState::Committed as u8, Ordering::Release);
    }

    pub fn mark_aborted(&self) {
        self.state.store(TxState::Aborted as u8, Ordering::Release);
    }
}

/// Final state of a transaction as recorded by the commit log.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TxStatus {
    Active,
    Committed(Hlc),
    Aborted,
    /// Never registered, or already reclaimed by garbage collection. Only
    /// committed transactions older than every live snapshot are reclaimed,
    /// so an unknown id is treated as committed long ago.
    Unknown,
}

/// Maps transaction ids to their final state and keeps the per-shard commit
/// order.
#[derive(Debug, Default)]
pub struct CommitLog {
    infos: RwLock<HashMap<TransactionId, Arc<CommitInfo>>>,
    committed_order: Mutex<Vec<(TransactionId, Hlc)>>,
}

impl CommitLog {
    pub fn new() -> Self {
        CommitLog::default()
    }

    pub fn register(&self, id: TransactionId, info: Arc<CommitInfo>) {
        self.infos.write().insert(id, info);
    }

    pub fn status(&self, id: TransactionId) -> TxStatus {
        let infos = self.infos.read();
        match infos.get(&id) {
            Some(info) => match info.state() {
                TxState::Active => TxStatus::Active,
                TxState::Aborted => TxStatus::Aborted,
                TxState::Committed => match info.commit_ts() {
                    Some(ts) => TxStatus::Committed(ts),
                    None => TxStatus::Active,
                },
            },
            None => TxStatus::Unknown,
        }
    }

    /// Records the commit of `id` at `ts`. Must be called under the shard's
    /// commit latch so the order list stays sorted.
    pub fn record_commit(&self, id: TransactionId, ts: Hlc) {
        self.committed_order.lock().push((id, ts));
    }

    /// Commit timestamps in commit order.
    pub fn committed_timestamps(&self) -> Vec<Hlc> {
        self.committed_order.lock().iter().map(|(_, ts)| *ts).collect()
    }

    /// The `(transaction, timestamp)` commit order, for split partitioning.
    pub(crate) fn committed_order_snapshot(&self) -> Vec<(TransactionId, Hlc)> {
        self.committed_order.lock().clone()
    }

    /// Installs a commit order wholesale, when a shard is rebuilt from
    /// split data or a snapshot.
    pub(crate) fn seed_commits(&self, order: Vec<(TransactionId, Hlc)>) {
        *self.committed_order.lock() = order;
    }

    pub fn latest_commit_ts(&self) -> Option<Hlc> {
        self.committed_order.lock().last().map(|(_, ts)| *ts)
    }

    /// Drops entries of committed or aborted transactions older than the
    /// garbage-collection snapshot. Their commit infos go with them.
    pub fn prune(&self, gc_snapshot: &Snapshot) {
        let mut infos = self.infos.write();
        infos.retain(|id, info| match info.state() {
            TxState::Active => true,
            TxState::Committed | TxState::Aborted => {
                *id >= gc_snapshot.watermark() || gc_snapshot.contains(*id)
            }
        });
        let retained: std::collections::HashSet<TransactionId> = infos.keys().copied().collect();
        drop(infos);
        self.committed_order
            .lock()
            .retain(|(id, _)| retained.contains(id));
    }
}

/// Sorted set of transaction ids active at some instant, the transaction's
/// own id included as the largest element.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    ids: Vec<TransactionId>,
}

impl Snapshot {
    /// `ids` must be sorted ascending; the caller appends its own id last.
    pub fn new(ids: Vec<TransactionId>) -> Self {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        Snapshot { ids }
    }

    pub fn contains(&self, id: TransactionId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// The largest id in the snapshot: the owning transaction's own id.
    pub fn watermark(&self) -> TransactionId {
        self.ids.last().copied().unwrap_or(TransactionId(0))
    }

    pub fn ids(&self) -> &[TransactionId] {
        &self.ids
    }
}

/// Hint-bit masks caching commit-log outcomes on a record.
///
/// Layout follows the creating/expiring x committed/aborted grid: bits 0-1
/// belong to the creating slot, bits 2-3 to the expiring slot. Aborted hints
/// are only ever set for the creating slot; the expiring slot can be cleared
/// and reassigned by a later transaction, so a cached abort there could
/// describe the wrong transaction.
pub mod hint {
    pub const CRE: u8 = 0b0011;
    pub const EXP: u8 = 0b1100;
    pub const COMMITTED: u8 = 0b0101;
    pub const ABORTED: u8 = 0b1010;
}

const NO_TX: u64 = 0;

/// Creating/expiring slots of one object version.
#[derive(Debug, Default)]
pub struct MvccRecord {
    tx_create: AtomicU64,
    cmd_create: AtomicU32,
    tx_expire: AtomicU64,
    cmd_expire: AtomicU32,
    hints: AtomicU8,
}

impl MvccRecord {
    pub fn new() -> Self {
        MvccRecord::default()
    }

    pub fn mark_created(&self, tx: TransactionId, command: CommandId) {
        debug_assert_eq!(self.tx_create.load(Ordering::Relaxed), NO_TX);
        self.cmd_create.store(command, Ordering::Relaxed);
        self.tx_create.store(tx.0, Ordering::Release);
    }

    pub fn mark_expired(&self, tx: TransactionId, command: CommandId) {
        if self.tx_expire.load(Ordering::Relaxed) != NO_TX {
            // Reassigning the slot invalidates any cached expiring hints.
            self.hints.fetch_and(!hint::EXP, Ordering::AcqRel);
        }
        self.cmd_expire.store(command, Ordering::Relaxed);
        self.tx_expire.store(tx.0, Ordering::Release);
    }

    /// Abort path: the expiring transaction withdraws its tombstone.
    pub fn clear_expired(&self) {
        self.hints.fetch_and(!hint::EXP, Ordering::AcqRel);
        self.tx_expire.store(NO_TX, Ordering::Release);
        self.cmd_expire.store(0, Ordering::Relaxed);
    }

    pub fn created_by(&self) -> TransactionId {
        TransactionId(self.tx_create.load(Ordering::Acquire))
    }

    pub fn expired_by(&self) -> Option<TransactionId> {
        match self.tx_expire.load(Ordering::Acquire) {
            NO_TX => None,
            id => Some(TransactionId(id)),
        }
    }

    pub fn is_created_in_command(&self, tx: TransactionId, command: CommandId) -> bool {
        self.tx_create.load(Ordering::Acquire) == tx.0
            && self.cmd_create.load(Ordering::Relaxed) == command
    }

    /// Reads the expiring slot consistently: the command is re-read until
    /// the transaction slot is stable around it.
    fn fetch_expiration(&self) -> (u64, CommandId) {
        loop {
            let tx = self.tx_expire.load(Ordering::Acquire);
            let cmd = self.cmd_expire.load(Ordering::Acquire);
            if self.tx_expire.load(Ordering::Acquire) == tx {
                return (tx, cmd);
            }
        }
    }

    /// Snapshot visibility for reads: the creating command must be strictly
    /// older than the reading command.
    pub fn is_visible(
        &self,
        tx: TransactionId,
        command: CommandId,
        snapshot: &Snapshot,
        clog: &CommitLog,
    ) -> bool {
        self.visible_at(tx, command, snapshot, clog, false)
    }

    /// Visibility for writes: the current command sees its own creations.
    pub fn is_visible_for_write(
        &self,
        tx: TransactionId,
        command: CommandId,
        snapshot: &Snapshot,
        clog: &CommitLog,
    ) -> bool {
        self.visible_at(tx, command, snapshot, clog, true)
    }

    fn visible_at(
        &self,
        tx: TransactionId,
        command: CommandId,
        snapshot: &Snapshot,
        clog: &CommitLog,
        include_current_command: bool,
    ) -> bool {
        let (tx_exp, cmd_exp) = self.fetch_expiration();
        let tx_cre = self.tx_create.load(Ordering::Acquire);
        let cmd_cre = self.cmd_create.load(Ordering::Relaxed);

        let created_by_me = tx_cre == tx.0
            && (cmd_cre < command || (include_current_command && cmd_cre == command));
        let not_expired_for_me =
            tx_exp == NO_TX || (tx_exp == tx.0 && cmd_exp >= command);

        if created_by_me && not_expired_for_me {
            return true;
        }

        self.committed_for_reader(hint::CRE, tx_cre, tx, snapshot, clog)
            && (tx_exp == NO_TX
                || (tx_exp == tx.0 && cmd_exp >= command)
                || (tx_exp != tx.0
                    && !self.committed_for_reader(hint::EXP, tx_exp, tx, snapshot, clog)))
    }

    /// Garbage-collection reachability: true when no transaction in or after
    /// the GC snapshot can still observe this version.
    pub fn is_not_visible_from(&self, gc_snapshot: &Snapshot, clog: &CommitLog) -> bool {
        let tx_exp = self.tx_expire.load(Ordering::Acquire);
        let expired_below_watermark = tx_exp != NO_TX
            && TransactionId(tx_exp) < gc_snapshot.watermark()
            && !gc_snapshot.contains(TransactionId(tx_exp))
            && self.committed_in_log(hint::EXP, tx_exp, clog);
        expired_below_watermark || self.creator_aborted(clog)
    }

    /// Whether `id` committed before the reader started and outside its
    /// snapshot, consulting hint bits first.
    fn committed_for_reader(
        &self,
        mask: u8,
        id: u64,
        reader: TransactionId,
        snapshot: &Snapshot,
        clog: &CommitLog,
    ) -> bool {
        if id == NO_TX {
            return false;
        }
        // A transaction with a newer id started after the reader; even if it
        // committed, it committed after the reader's snapshot was taken.
        if id >= reader.0 {
            return false;
        }
        if snapshot.contains(TransactionId(id)) {
            return false;
        }
        self.committed_in_log(mask, id, clog)
    }

    fn committed_in_log(&self, mask: u8, id: u64, clog: &CommitLog) -> bool {
        let bits = self.hints.load(Ordering::Acquire);
        if bits & mask != 0 {
            return bits & (hint::COMMITTED & mask) != 0;
        }
        match clog.status(TransactionId(id)) {
            TxStatus::Committed(_) | TxStatus::Unknown => {
                self.hints
                    .fetch_or(hint::COMMITTED & mask, Ordering::AcqRel);
                true
            }
            TxStatus::Aborted => {
                if mask == hint::CRE {
                    // The expiring slot can be reassigned concurrently, so
                    // abort hints are only safe for the set-once creating
                    // slot.
                    self.hints.fetch_or(hint::ABORTED & mask, Ordering::AcqRel);
                }
                false
            }
            TxStatus::Active => false,
        }
    }

    /// Latches the creating-slot abort hint directly. Called on the abort
    /// path for objects the aborting transaction created, so the record
    /// stays recognizable as garbage even after the commit log forgets the
    /// transaction.
    pub fn hint_creator_aborted(&self) {
        self.hints
            .fetch_or(hint::ABORTED & hint::CRE, Ordering::AcqRel);
    }

    fn creator_aborted(&self, clog: &CommitLog) -> bool {
        let bits = self.hints.load(Ordering::Acquire);
        if bits & hint::CRE != 0 {
            return bits & (hint::ABORTED & hint::CRE) != 0;
        }
        match clog.status(self.created_by()) {
            TxStatus::Aborted => {
                self.hints
                    .fetch_or(hint::ABORTED & hint::CRE, Ordering::AcqRel);
                true
            }
            TxStatus::Committed(_) | TxStatus::Unknown => {
                self.hints
                    .fetch_or(hint::COMMITTED & hint::CRE, Ordering::AcqRel);
                false
            }
            TxStatus::Active => false,
        }
    }
}

/// Everything a reader needs to decide visibility: its identity, command,
/// snapshot, the shard's commit log and the requested view.
#[derive(Copy, Clone)]
pub struct ReadView<'a> {
    pub tx_id: TransactionId,
    pub command_id: CommandId,
    pub snapshot: &'a Snapshot,
    pub clog: &'a CommitLog,
    pub view: crate::types::View,
}

impl<'a> ReadView<'a> {
    /// Whether a delta must be applied (its change undone) when rewinding an
    /// object's state for this reader. Once a delta's change is visible, so
    /// are all older ones, so the caller stops walking on the first `false`.
    pub fn must_undo(&self, delta: &crate::storage::delta::Delta) -> bool {
        use crate::types::View;
        if delta.tx_id == self.tx_id {
            return match self.view {
                View::New => delta.command_id > self.command_id,
                View::Old => delta.command_id >= self.command_id,
            };
        }
        match delta.commit_info.state() {
            TxState::Committed => {
                !(delta.tx_id < self.tx_id && !self.snapshot.contains(delta.tx_id))
            }
            TxState::Active | TxState::Aborted => true,
        }
    }
}
