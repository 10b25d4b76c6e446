//! Garbage collection.
//!
//! A pass runs against the snapshot of the oldest live transaction. It
//! truncates delta chains owned by committed transactions below that
//! watermark, queues unreachable objects into deferred-delete buffers
//! tagged with the current watermark, and frees entries from earlier
//! passes once the watermark has moved past their tag. Commit-log entries
//! and transaction structs of reclaimed transactions go with them.

use std::sync::atomic::Ordering;

use tracing::debug;

use crate::hlc::Hlc;
use crate::storage::delta::DeltaRef;
use crate::storage::mvcc::{Snapshot, TxState};
use crate::storage::shard::Shard;
use crate::types::TransactionId;

/// Counters describing one garbage-collection pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    pub pruned_deltas: usize,
    pub queued_vertices: usize,
    pub queued_edges: usize,
    pub freed_vertices: usize,
    pub freed_edges: usize,
    pub pruned_index_entries: usize,
}

impl Shard {
    /// Runs one garbage-collection pass. Safe to call concurrently with
    /// readers and writers; object chains are pruned under their latches.
    pub fn collect_garbage(&self) -> GcStats {
        let gc_snapshot = self.gc_snapshot();
        let watermark = gc_snapshot.watermark();
        let watermark_ts = self.oldest_live_start_ts();
        let mut stats = GcStats::default();

        self.sweep_vertices(&gc_snapshot, watermark, &mut stats);
        self.sweep_edges(&gc_snapshot, watermark, &mut stats);
        self.free_deferred(watermark, &mut stats);

        stats.pruned_index_entries = self.indices.vacuum(watermark_ts);
        self.commit_log.prune(&gc_snapshot);
        self.prune_transactions(&gc_snapshot);
        self.aborted_since_gc.store(false, Ordering::Release);

        if stats != GcStats::default() {
            debug!(
                watermark = %watermark,
                pruned_deltas = stats.pruned_deltas,
                freed_vertices = stats.freed_vertices,
                freed_edges = stats.freed_edges,
                "garbage collection pass finished"
            );
        }
        stats
    }

    /// Start timestamp of the oldest live transaction; when none is live,
    /// the clock's current reading (every commit so far is older).
    fn oldest_live_start_ts(&self) -> Hlc {
        let transactions = self.transactions.read();
        transactions
            .values()
            .find(|tx| tx.is_active())
            .map(|tx| tx.start_ts)
            .unwrap_or_else(|| self.clock.peek())
    }

    fn sweep_vertices(
        &self,
        gc_snapshot: &Snapshot,
        watermark: TransactionId,
        stats: &mut GcStats,
    ) {
        let mut cursor = None;
        while let Some((pk, vertex)) = self.vertices.next_from(cursor.as_ref()) {
            {
                let mut inner = vertex.inner.write();
                stats.pruned_deltas +=
                    prune_chain(&mut inner.delta, gc_snapshot, watermark);
            }
            if !vertex.gc_queued.load(Ordering::Acquire)
                && vertex
                    .mvcc
                    .is_not_visible_from(gc_snapshot, &self.commit_log)
            {
                vertex.gc_queued.store(true, Ordering::Release);
                self.deleted_vertices.lock().push((watermark, pk.clone()));
                stats.queued_vertices += 1;
            }
            cursor = Some(pk);
        }
    }

    fn sweep_edges(&self, gc_snapshot: &Snapshot, watermark: TransactionId, stats: &mut GcStats) {
        let mut cursor = None;
        while let Some((key, edge)) = self.edges.next_from(cursor.as_ref()) {
            {
                let mut inner = edge.inner.write();
                stats.pruned_deltas +=
                    prune_chain(&mut inner.delta, gc_snapshot, watermark);
            }
            if !edge.gc_queued.load(Ordering::Acquire)
                && edge.mvcc.is_not_visible_from(gc_snapshot, &self.commit_log)
            {
                edge.gc_queued.store(true, Ordering::Release);
                self.deleted_edges.lock().push((watermark, key.clone()));
                stats.queued_edges += 1;
            }
            cursor = Some(key);
        }
    }

    /// Frees deferred entries whose tag lies strictly below the current
    /// watermark: every transaction that could have reached them has
    /// finished since they were queued.
    fn free_deferred(&self, watermark: TransactionId, stats: &mut GcStats) {
        let ready_vertices: Vec<_> = {
            let mut deferred = self.deleted_vertices.lock();
            let (ready, pending): (Vec<_>, Vec<_>) =
                deferred.drain(..).partition(|(tag, _)| *tag < watermark);
            *deferred = pending;
            ready
        };
        for (_, pk) in ready_vertices {
            if self.vertices.remove(&pk).is_some() {
                self.indices.remove_pk(&pk);
                stats.freed_vertices += 1;
            }
        }
        let ready_edges: Vec<_> = {
            let mut deferred = self.deleted_edges.lock();
            let (ready, pending): (Vec<_>, Vec<_>) =
                deferred.drain(..).partition(|(tag, _)| *tag < watermark);
            *deferred = pending;
            ready
        };
        for (_, key) in ready_edges {
            if self.edges.remove(&key).is_some() {
                stats.freed_edges += 1;
            }
        }
    }
}

/// Cuts the tail of a delta chain at the first delta owned by a committed
/// transaction below the watermark and outside the GC snapshot; no live
/// reader can need anything at or past that point. Returns the number of
/// deltas dropped. Must run under the owning object's latch.
fn prune_chain(
    head: &mut Option<DeltaRef>,
    gc_snapshot: &Snapshot,
    watermark: TransactionId,
) -> usize {
    let prunable = |delta: &DeltaRef| {
        delta.commit_info.state() == TxState::Committed
            && delta.tx_id < watermark
            && !gc_snapshot.contains(delta.tx_id)
    };
    let chain_len = |start: Option<DeltaRef>| {
        std::iter::successors(start, |d| d.next()).count()
    };

    match head {
        Some(first) if prunable(first) => {
            let dropped = chain_len(head.clone());
            *head = None;
            dropped
        }
        Some(first) => {
            let mut cursor = first.clone();
            loop {
                let Some(next) = cursor.next() else {
                    return 0;
                };
                if prunable(&next) {
                    let dropped = chain_len(Some(next));
                    cursor.set_next(None);
                    return dropped;
                }
                cursor = next;
            }
        }
        None => 0,
    }
}
