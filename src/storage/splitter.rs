//! Online shard splitting.
//!
//! A split partitions the shard at a primary key `K`: entries with
//! `pk < K` stay in the parent (the left successor), entries with
//! `pk >= K` move into the returned [`SplitData`]. Every in-progress
//! transaction ends up represented on both sides with exactly the deltas
//! touching that side; commit stays per-shard, so live transactions get a
//! fresh commit info on the right side while finished transactions share
//! their immutable one. Delta chains of moved objects are rebuilt clone by
//! clone so neither successor aliases the other's undo state.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::config::Config;
use crate::error::{Result, ShardError};
use crate::hlc::{Hlc, HlcClock};
use crate::name_id::NameIdMapper;
use crate::storage::delta::{Delta, DeltaRef};
use crate::storage::edge::{EdgeContainer, EdgeKey, EdgeRef};
use crate::storage::indices::{EntryMeta, Indices, LabelKey, PropKey};
use crate::storage::mvcc::{CommitInfo, CommitLog, TxState};
use crate::storage::schema::{SchemaProperty, Schemas};
use crate::storage::shard::Shard;
use crate::storage::transaction::Transaction;
use crate::storage::vertex::{VertexContainer, VertexRef};
use crate::types::{LabelId, TransactionId};
use crate::value::PrimaryKey;

/// Everything the right successor needs to come to life, returned by
/// [`Shard::perform_split`] and consumed by [`Shard::from_split_data`].
pub struct SplitData {
    pub(crate) primary_label: LabelId,
    pub(crate) min_primary_key: PrimaryKey,
    pub(crate) max_primary_key: Option<PrimaryKey>,
    pub(crate) schema: Vec<SchemaProperty>,
    pub(crate) vertices: BTreeMap<PrimaryKey, VertexRef>,
    pub(crate) edges: BTreeMap<EdgeKey, EdgeRef>,
    pub(crate) transactions: BTreeMap<TransactionId, Arc<Transaction>>,
    pub(crate) commit_order: Vec<(TransactionId, Hlc)>,
    pub(crate) label_entries: BTreeMap<LabelKey, EntryMeta>,
    pub(crate) label_indexed: Vec<LabelId>,
    pub(crate) property_entries: BTreeMap<PropKey, EntryMeta>,
    pub(crate) property_indexed: Vec<(LabelId, crate::types::PropertyId)>,
    pub(crate) shard_version: Hlc,
    pub(crate) config: Config,
}

impl SplitData {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn label_index_count(&self) -> usize {
        self.label_entries.len()
    }

    pub fn label_property_index_count(&self) -> usize {
        self.property_entries.len()
    }

    pub fn vertex_keys(&self) -> Vec<PrimaryKey> {
        self.vertices.keys().cloned().collect()
    }

    pub fn shard_version(&self) -> Hlc {
        self.shard_version
    }
}

impl std::fmt::Debug for SplitData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitData")
            .field("min_primary_key", &self.min_primary_key)
            .field("vertices", &self.vertices.len())
            .field("edges", &self.edges.len())
            .field("transactions", &self.transactions.len())
            .finish_non_exhaustive()
    }
}

impl Shard {
    /// Splits the shard at `split_key`, leaving `[min, K)` here and
    /// returning `[K, max)` as [`SplitData`].
    ///
    /// `old_version` must match the shard's current version; the successors
    /// are stamped with the two new versions. Structural writes and commits
    /// are frozen for the duration.
    pub fn perform_split(
        &self,
        split_key: &PrimaryKey,
        old_version: Hlc,
        new_lhs_version: Hlc,
        new_rhs_version: Hlc,
    ) -> Result<SplitData> {
        let _structural = self.structural_latch.lock();
        let _commits = self.commit_latch.lock();

        let current = self.version();
        if current != old_version {
            return Err(ShardError::StaleShardMap {
                observed: old_version.logical,
                current: current.logical,
            });
        }
        if !self.key_in_range(split_key) || *split_key == self.min_primary_key {
            return Err(ShardError::Invalid("split key outside the shard's range"));
        }

        let rhs_vertices = self.vertices.split_off(split_key);
        let rhs_edges = self.edges.split_off_by_src(split_key);
        let label_entries = self.indices.label.split_off(split_key);
        let property_entries = self.indices.label_property.split_off(split_key);

        // Fresh commit infos for live transactions; finished ones are
        // immutable and shared.
        let parent_txs: Vec<Arc<Transaction>> =
            self.transactions.read().values().cloned().collect();
        let mut rhs_infos: HashMap<TransactionId, Arc<CommitInfo>> = HashMap::new();
        for tx in &parent_txs {
            if tx.state() == TxState::Active {
                rhs_infos.insert(tx.id, CommitInfo::new_active());
            }
        }

        // Rebuild the delta chains of every moved object, mapping original
        // delta nodes to their clones so transaction undo lists can be
        // re-threaded in creation order.
        let mut clone_map: HashMap<usize, DeltaRef> = HashMap::new();
        for vertex in rhs_vertices.values() {
            vertex.gc_queued.store(false, Ordering::Release);
            let mut inner = vertex.inner.write();
            inner.delta = rebuild_chain(inner.delta.clone(), &rhs_infos, &mut clone_map);
        }
        for edge in rhs_edges.values() {
            edge.gc_queued.store(false, Ordering::Release);
            let mut inner = edge.inner.write();
            inner.delta = rebuild_chain(inner.delta.clone(), &rhs_infos, &mut clone_map);
        }

        let in_rhs = |pk: &PrimaryKey| pk >= split_key;
        let mut rhs_transactions: BTreeMap<TransactionId, Arc<Transaction>> = BTreeMap::new();
        for tx in &parent_txs {
            let rhs_deltas: Vec<DeltaRef> = tx
                .deltas()
                .iter()
                .filter_map(|delta| clone_map.get(&(Arc::as_ptr(delta) as usize)).cloned())
                .collect();
            let live = tx.state() == TxState::Active;
            if rhs_deltas.is_empty() && !live {
                continue;
            }
            let info = rhs_infos
                .get(&tx.id)
                .cloned()
                .unwrap_or_else(|| Arc::clone(&tx.commit_info));
            let clone = tx.clone_for_split(info);
            clone.push_deltas(rhs_deltas);
            for op in tx.index_ops_snapshot() {
                if in_rhs(op.pk()) {
                    clone.record_index_op(op);
                }
            }
            for op in tx.redo_snapshot() {
                if op.owning_key().map_or(false, in_rhs) {
                    clone.record_redo(op);
                }
            }
            rhs_transactions.insert(clone.id, Arc::new(clone));

            // The parent keeps only the operations touching its own side.
            tx.retain_objects(|pk| !in_rhs(pk));
        }

        let commit_order: Vec<(TransactionId, Hlc)> = self
            .commit_log
            .committed_order_snapshot()
            .into_iter()
            .filter(|(id, _)| rhs_transactions.contains_key(id))
            .collect();

        // Deferred-delete entries follow their objects.
        self.deleted_vertices.lock().retain(|(_, pk)| !in_rhs(pk));
        self.deleted_edges
            .lock()
            .retain(|(_, key)| !in_rhs(&key.src.primary_key));

        let max_primary_key = {
            let mut max = self.max_primary_key.write();
            let old_max = max.take();
            *max = Some(split_key.clone());
            old_max
        };
        *self.shard_version.write() = new_lhs_version;

        info!(
            split_key = %split_key,
            lhs_version = %new_lhs_version,
            rhs_version = %new_rhs_version,
            moved_vertices = rhs_vertices.len(),
            moved_edges = rhs_edges.len(),
            transactions = rhs_transactions.len(),
            "shard split performed"
        );

        Ok(SplitData {
            primary_label: self.primary_label,
            min_primary_key: split_key.clone(),
            max_primary_key,
            schema: self.schemas.get(self.primary_label).unwrap_or_default(),
            vertices: rhs_vertices,
            edges: rhs_edges,
            transactions: rhs_transactions,
            commit_order,
            label_entries,
            label_indexed: self.indices.label.list(),
            property_entries,
            property_indexed: self.indices.label_property.list(),
            shard_version: new_rhs_version,
            config: self.config.clone(),
        })
    }

    /// Builds the right successor from split data. The clock and name-id
    /// mapper are process-wide and arrive from the caller.
    pub fn from_split_data(
        data: SplitData,
        clock: Arc<HlcClock>,
        name_id: Arc<NameIdMapper>,
    ) -> Shard {
        let schemas = Schemas::new();
        schemas.create(data.primary_label, data.schema);
        let indices = Indices::default();
        indices.label.adopt(data.label_entries, data.label_indexed);
        indices
            .label_property
            .adopt(data.property_entries, data.property_indexed);
        let commit_log = CommitLog::new();
        for (id, tx) in &data.transactions {
            commit_log.register(*id, Arc::clone(&tx.commit_info));
        }
        commit_log.seed_commits(data.commit_order);

        Shard {
            name_id,
            clock,
            primary_label: data.primary_label,
            min_primary_key: data.min_primary_key,
            max_primary_key: RwLock::new(data.max_primary_key),
            vertices: VertexContainer::from_entries(data.vertices),
            edges: EdgeContainer::from_entries(data.edges),
            shard_version: RwLock::new(data.shard_version),
            schemas,
            indices,
            commit_log,
            transactions: RwLock::new(data.transactions),
            deleted_vertices: Mutex::new(Vec::new()),
            deleted_edges: Mutex::new(Vec::new()),
            config: data.config,
            commit_latch: Mutex::new(()),
            structural_latch: Mutex::new(()),
            wal: None,
            aborted_since_gc: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

/// Clones a delta chain newest-to-oldest, rebinding deltas of live
/// transactions to that transaction's right-side commit info and recording
/// original-to-clone correspondences.
fn rebuild_chain(
    head: Option<DeltaRef>,
    rhs_infos: &HashMap<TransactionId, Arc<CommitInfo>>,
    clone_map: &mut HashMap<usize, DeltaRef>,
) -> Option<DeltaRef> {
    let nodes: Vec<DeltaRef> = std::iter::successors(head, |delta| delta.next()).collect();
    let mut rebuilt: Option<DeltaRef> = None;
    for node in nodes.iter().rev() {
        let info = rhs_infos
            .get(&node.tx_id)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&node.commit_info));
        let clone = Delta::new(
            node.action.clone(),
            node.object.clone(),
            node.tx_id,
            node.command_id,
            info,
            rebuilt.take(),
        );
        clone_map.insert(Arc::as_ptr(node) as usize, Arc::clone(&clone));
        rebuilt = Some(clone);
    }
    rebuilt
}
