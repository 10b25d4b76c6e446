//! The shard: owner of one contiguous primary-key range of one label,
//! embedding its own MVCC store.
//!
//! All reads and writes flow through [`Accessor`](crate::storage::accessor::Accessor)
//! handles obtained from [`Shard::access`]. Admin operations (schemas,
//! indexes, splits) take the structural latch; the commit path is serialized
//! by the commit latch so commit timestamps are strictly increasing per
//! shard.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::durability::wal::{WalOp, WalRecord, WalSink};
use crate::error::{Result, ShardError};
use crate::hlc::{Hlc, HlcClock};
use crate::name_id::NameIdMapper;
use crate::storage::accessor::Accessor;
use crate::storage::delta::{DeltaRef, ObjectHandle};
use crate::storage::edge::{EdgeContainer, EdgeKey};
use crate::storage::indices::{Indices, IndicesInfo};
use crate::storage::mvcc::{CommitLog, Snapshot, TxState};
use crate::storage::schema::{SchemaProperty, Schemas, SchemasInfo};
use crate::storage::transaction::Transaction;
use crate::storage::vertex::{VertexContainer, VertexId, VertexInner};
use crate::types::{IsolationLevel, LabelId, PropertyId, TransactionId};
use crate::value::{PrimaryKey, PropertyValue};

/// Storage statistics, fed to the split heuristic and heartbeats. Counts
/// are over-estimates: tombstoned objects linger until garbage collection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StorageInfo {
    pub vertex_count: u64,
    pub edge_count: u64,
    pub average_degree: f64,
    pub memory_usage: u64,
}

/// Split candidate produced by [`Shard::should_split`]; the manager wraps
/// it with the shard's uuid before forwarding to the coordinator.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitSuggestion {
    pub label_id: LabelId,
    pub low_key: PrimaryKey,
    pub split_key: PrimaryKey,
    pub shard_version: Hlc,
}

pub struct Shard {
    pub(crate) name_id: Arc<NameIdMapper>,
    pub(crate) clock: Arc<HlcClock>,
    pub(crate) primary_label: LabelId,
    pub(crate) min_primary_key: PrimaryKey,
    pub(crate) max_primary_key: RwLock<Option<PrimaryKey>>,
    pub(crate) vertices: VertexContainer,
    pub(crate) edges: EdgeContainer,
    pub(crate) shard_version: RwLock<Hlc>,
    pub(crate) schemas: Schemas,
    pub(crate) indices: Indices,
    pub(crate) commit_log: CommitLog,
    /// Every transaction that touched this shard and has not been cleaned
    /// up yet, keyed by start id.
    pub(crate) transactions: RwLock<BTreeMap<TransactionId, Arc<Transaction>>>,
    /// Objects garbage collection found unreachable, tagged with the
    /// watermark current at that decision; freed once the watermark passes.
    pub(crate) deleted_vertices: Mutex<Vec<(TransactionId, PrimaryKey)>>,
    pub(crate) deleted_edges: Mutex<Vec<(TransactionId, EdgeKey)>>,
    pub(crate) config: Config,
    /// Serializes commits so the commit HLC is strictly increasing.
    pub(crate) commit_latch: Mutex<()>,
    /// Serializes structural changes: index/schema mutation and splits.
    pub(crate) structural_latch: Mutex<()>,
    pub(crate) wal: Option<Arc<dyn WalSink>>,
    pub(crate) aborted_since_gc: AtomicBool,
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("primary_label", &self.primary_label)
            .field("min_primary_key", &self.min_primary_key)
            .field("max_primary_key", &*self.max_primary_key.read())
            .field("vertices", &self.vertices.len())
            .field("edges", &self.edges.len())
            .finish_non_exhaustive()
    }
}

impl Shard {
    pub fn new(
        primary_label: LabelId,
        min_primary_key: PrimaryKey,
        max_primary_key: Option<PrimaryKey>,
        schema: Vec<SchemaProperty>,
        shard_version: Hlc,
        config: Config,
        clock: Arc<HlcClock>,
        name_id: Arc<NameIdMapper>,
    ) -> Self {
        let schemas = Schemas::new();
        schemas.create(primary_label, schema);
        Shard {
            name_id,
            clock,
            primary_label,
            min_primary_key,
            max_primary_key: RwLock::new(max_primary_key),
            vertices: VertexContainer::new(),
            edges: EdgeContainer::new(),
            shard_version: RwLock::new(shard_version),
            schemas,
            indices: Indices::default(),
            commit_log: CommitLog::new(),
            transactions: RwLock::new(BTreeMap::new()),
            deleted_vertices: Mutex::new(Vec::new()),
            deleted_edges: Mutex::new(Vec::new()),
            config,
            commit_latch: Mutex::new(()),
            structural_latch: Mutex::new(()),
            wal: None,
            aborted_since_gc: AtomicBool::new(false),
        }
    }

    /// Attaches a write-ahead log sink. Commits append their redo records
    /// to it; an append failure aborts the committing transaction.
    pub fn with_wal(mut self, wal: Arc<dyn WalSink>) -> Self {
        self.wal = Some(wal);
        self
    }

    pub fn primary_label(&self) -> LabelId {
        self.primary_label
    }

    pub fn low_key(&self) -> &PrimaryKey {
        &self.min_primary_key
    }

    pub fn high_key(&self) -> Option<PrimaryKey> {
        self.max_primary_key.read().clone()
    }

    pub fn version(&self) -> Hlc {
        *self.shard_version.read()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn name_to_label(&self, name: &str) -> LabelId {
        self.name_id.name_to_label(name)
    }

    pub fn name_to_property(&self, name: &str) -> PropertyId {
        self.name_id.name_to_property(name)
    }

    pub fn name_to_edge_type(&self, name: &str) -> crate::types::EdgeTypeId {
        self.name_id.name_to_edge_type(name)
    }

    pub fn label_to_name(&self, label: LabelId) -> Option<String> {
        self.name_id.id_to_name(label.0)
    }

    /// Seeds the name-id table, typically from a recovered snapshot or a
    /// coordinator-provided mapping.
    pub fn store_mapping(&self, id_to_name: std::collections::HashMap<u32, String>) {
        self.name_id.store_mapping(id_to_name);
    }

    pub fn is_vertex_belong_to_shard(&self, vertex_id: &VertexId) -> bool {
        vertex_id.primary_label == self.primary_label && self.key_in_range(&vertex_id.primary_key)
    }

    pub(crate) fn key_in_range(&self, key: &PrimaryKey) -> bool {
        key >= &self.min_primary_key
            && self
                .max_primary_key
                .read()
                .as_ref()
                .map_or(true, |max| key < max)
    }

    /// Opens (or re-enters) the transaction started at `start_ts` and
    /// returns an accessor bound to it.
    pub fn access(&self, start_ts: Hlc, isolation: IsolationLevel) -> Accessor<'_> {
        let id = TransactionId(start_ts.logical);
        let mut transactions = self.transactions.write();
        if let Some(existing) = transactions.get(&id) {
            return Accessor::new(self, Arc::clone(existing));
        }
        let mut active: Vec<TransactionId> = transactions
            .iter()
            .filter(|(_, tx)| tx.is_active())
            .map(|(id, _)| *id)
            .collect();
        active.push(id);
        active.sort();
        let tx = Arc::new(Transaction::new(start_ts, isolation, Snapshot::new(active)));
        self.commit_log.register(id, Arc::clone(&tx.commit_info));
        transactions.insert(id, Arc::clone(&tx));
        debug!(tx = %id, start = %start_ts, "transaction started");
        Accessor::new(self, tx)
    }

    /// Commit timestamps of this shard in commit order.
    pub fn commit_history(&self) -> Vec<Hlc> {
        self.commit_log.committed_timestamps()
    }

    pub fn info(&self) -> StorageInfo {
        let vertex_count = self.vertices.len() as u64;
        let edge_count = self.edges.len() as u64;
        let average_degree = if vertex_count == 0 {
            0.0
        } else {
            2.0 * edge_count as f64 / vertex_count as f64
        };
        let memory_usage = vertex_count * 256 + edge_count * 128;
        StorageInfo {
            vertex_count,
            edge_count,
            average_degree,
            memory_usage,
        }
    }

    /// Suggests a split once the shard has grown past the configured
    /// threshold. The candidate key is the container's median.
    pub fn should_split(&self) -> Option<SplitSuggestion> {
        if self.vertices.len() < self.config.split_vertex_threshold {
            return None;
        }
        let split_key = self.vertices.median_key()?;
        // A split at the low key would produce an empty successor.
        if !self.key_in_range(&split_key) || split_key == self.min_primary_key {
            return None;
        }
        Some(SplitSuggestion {
            label_id: self.primary_label,
            low_key: self.min_primary_key.clone(),
            split_key,
            shard_version: self.version(),
        })
    }

    pub fn create_schema(&self, label: LabelId, properties: Vec<SchemaProperty>) -> bool {
        let _latch = self.structural_latch.lock();
        let created = self.schemas.create(label, properties.clone());
        if created {
            self.append_admin_record(WalOp::CreateSchema { label, properties });
        }
        created
    }

    pub fn drop_schema(&self, label: LabelId) -> bool {
        let _latch = self.structural_latch.lock();
        let dropped = self.schemas.drop_schema(label);
        if dropped {
            self.append_admin_record(WalOp::DropSchema { label });
        }
        dropped
    }

    pub fn get_schema(&self, label: LabelId) -> Option<Vec<SchemaProperty>> {
        self.schemas.get(label)
    }

    pub fn list_all_schemas(&self) -> SchemasInfo {
        self.schemas.list()
    }

    /// Builds a label index, seeded from the currently visible vertices and
    /// stamped with a fresh commit timestamp.
    pub fn create_index(&self, label: LabelId) -> bool {
        let _latch = self.structural_latch.lock();
        let ts = self.clock.now();
        let existing = self.collect_label_members(label);
        let created = self.indices.label.create(label, existing, ts);
        if created {
            info!(label = %label, "label index created");
            self.append_admin_record(WalOp::CreateLabelIndex { label });
        }
        created
    }

    pub fn drop_label_index(&self, label: LabelId) -> bool {
        let _latch = self.structural_latch.lock();
        let dropped = self.indices.label.drop_index(label);
        if dropped {
            self.append_admin_record(WalOp::DropLabelIndex { label });
        }
        dropped
    }

    /// Builds a label-property index, seeded from the currently visible
    /// vertices that bear the label and the property.
    pub fn create_label_property_index(&self, label: LabelId, property: PropertyId) -> bool {
        let _latch = self.structural_latch.lock();
        let ts = self.clock.now();
        let existing = self.collect_label_property_members(label, property);
        let created = self.indices.label_property.create(label, property, existing, ts);
        if created {
            info!(label = %label, property = %property, "label-property index created");
            self.append_admin_record(WalOp::CreateLabelPropertyIndex { label, property });
        }
        created
    }

    pub fn drop_label_property_index(&self, label: LabelId, property: PropertyId) -> bool {
        let _latch = self.structural_latch.lock();
        let dropped = self.indices.label_property.drop_index(label, property);
        if dropped {
            self.append_admin_record(WalOp::DropLabelPropertyIndex { label, property });
        }
        dropped
    }

    pub fn label_index_exists(&self, label: LabelId) -> bool {
        self.indices.label.is_indexed(label)
    }

    pub fn label_property_index_exists(&self, label: LabelId, property: PropertyId) -> bool {
        self.indices.label_property.is_indexed(label, property)
    }

    pub fn list_all_indices(&self) -> IndicesInfo {
        self.indices.info()
    }

    fn collect_label_members(&self, label: LabelId) -> Vec<PrimaryKey> {
        let mut members = Vec::new();
        let mut cursor: Option<PrimaryKey> = None;
        while let Some((pk, vertex)) = self.vertices.next_from(cursor.as_ref()) {
            let inner = vertex.inner.read();
            if !inner.deleted && (label == self.primary_label || inner.labels.contains(&label)) {
                members.push(pk.clone());
            }
            drop(inner);
            cursor = Some(pk);
        }
        members
    }

    fn collect_label_property_members(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> Vec<(PrimaryKey, PropertyValue)> {
        let mut members = Vec::new();
        let mut cursor: Option<PrimaryKey> = None;
        while let Some((pk, vertex)) = self.vertices.next_from(cursor.as_ref()) {
            let inner = vertex.inner.read();
            if !inner.deleted && (label == self.primary_label || inner.labels.contains(&label)) {
                if let Some(value) = inner.properties.get(&property) {
                    members.push((pk.clone(), value.clone()));
                }
            }
            drop(inner);
            cursor = Some(pk);
        }
        members
    }

    fn append_admin_record(&self, op: WalOp) {
        if let Some(wal) = &self.wal {
            let record = WalRecord {
                op,
                commit_ts: self.clock.now(),
            };
            if let Err(err) = wal.append(record) {
                warn!(error = %err, "failed to append admin record to the wal");
            }
        }
    }

    /// Commits `tx` at (or just after) `commit_ts`.
    ///
    /// Serialized by the commit latch: the installed timestamp is strictly
    /// greater than both the transaction's start and every prior commit on
    /// this shard; when the requested timestamp does not satisfy that, the
    /// clock derives one that does.
    pub(crate) fn commit_transaction(&self, tx: &Arc<Transaction>, commit_ts: Hlc) -> Result<()> {
        if !tx.is_active() {
            return Err(ShardError::Invalid("transaction is no longer active"));
        }
        let _latch = self.commit_latch.lock();
        let floor = self
            .commit_log
            .latest_commit_ts()
            .unwrap_or(Hlc::ZERO)
            .max(tx.start_ts);
        let ts = if commit_ts > floor {
            // Keep the clock aware of coordinator-issued timestamps.
            self.clock.observe(commit_ts);
            commit_ts
        } else {
            self.clock.observe(floor)
        };

        let index_ops = tx.take_index_ops();
        self.indices.stamp(&index_ops, tx.id, ts);

        if let Some(wal) = &self.wal {
            for op in tx.take_redo() {
                if let Err(err) = wal.append(WalRecord { op, commit_ts: ts }) {
                    warn!(tx = %tx.id, error = %err, "wal append failed, aborting transaction");
                    self.indices.unwind(&index_ops, tx.id);
                    drop(_latch);
                    self.abort_transaction(tx)?;
                    return Err(err);
                }
            }
        }

        tx.commit_info.mark_committed(ts);
        self.commit_log.record_commit(tx.id, ts);
        debug!(tx = %tx.id, commit_ts = %ts, deltas = tx.delta_count(), "transaction committed");
        Ok(())
    }

    /// Aborts `tx`: walks its deltas newest first, reversing each, then
    /// unwinds its index entries.
    pub(crate) fn abort_transaction(&self, tx: &Arc<Transaction>) -> Result<()> {
        if !tx.is_active() {
            return Err(ShardError::Invalid("transaction is no longer active"));
        }
        let deltas = tx.deltas();
        for delta in deltas.iter().rev() {
            match &delta.object {
                ObjectHandle::Vertex(pk) => {
                    if let Some(vertex) = self.vertices.get(pk) {
                        let mut inner = vertex.inner.write();
                        self.undo_vertex_delta(&mut inner, delta, &vertex.mvcc);
                    }
                }
                ObjectHandle::Edge(key) => {
                    if let Some(edge) = self.edges.get(key) {
                        let mut inner = edge.inner.write();
                        self.undo_edge_delta(&mut inner, delta, &edge.mvcc);
                    }
                }
            }
        }
        self.indices.unwind(&tx.take_index_ops(), tx.id);
        tx.take_redo();
        tx.commit_info.mark_aborted();
        self.aborted_since_gc.store(true, Ordering::Release);
        warn!(tx = %tx.id, deltas = deltas.len(), "transaction aborted");
        Ok(())
    }

    pub(crate) fn undo_vertex_delta(
        &self,
        inner: &mut VertexInner,
        delta: &DeltaRef,
        mvcc: &crate::storage::mvcc::MvccRecord,
    ) {
        use crate::storage::delta::DeltaAction;
        // The aborting transaction's deltas are contiguous at the head.
        debug_assert!(inner
            .delta
            .as_ref()
            .is_some_and(|head| Arc::ptr_eq(head, delta)));
        match &delta.action {
            DeltaAction::DeleteObject => {
                inner.deleted = true;
                mvcc.hint_creator_aborted();
            }
            DeltaAction::RecreateObject => {
                inner.deleted = false;
                mvcc.clear_expired();
            }
            DeltaAction::AddLabel(label) => {
                if !inner.labels.contains(label) {
                    inner.labels.push(*label);
                }
            }
            DeltaAction::RemoveLabel(label) => inner.labels.retain(|l| l != label),
            DeltaAction::SetProperty { key, value } => {
                if value.is_null() {
                    inner.properties.remove(key);
                } else {
                    inner.properties.insert(*key, value.clone());
                }
            }
            DeltaAction::AddInEdge(link) => inner.in_edges.push(link.clone()),
            DeltaAction::AddOutEdge(link) => inner.out_edges.push(link.clone()),
            DeltaAction::RemoveInEdge(link) => inner.in_edges.retain(|l| l != link),
            DeltaAction::RemoveOutEdge(link) => inner.out_edges.retain(|l| l != link),
        }
        inner.delta = delta.next();
    }

    pub(crate) fn undo_edge_delta(
        &self,
        inner: &mut crate::storage::edge::EdgeInner,
        delta: &DeltaRef,
        mvcc: &crate::storage::mvcc::MvccRecord,
    ) {
        use crate::storage::delta::DeltaAction;
        debug_assert!(inner
            .delta
            .as_ref()
            .is_some_and(|head| Arc::ptr_eq(head, delta)));
        match &delta.action {
            DeltaAction::DeleteObject => {
                inner.deleted = true;
                mvcc.hint_creator_aborted();
            }
            DeltaAction::RecreateObject => {
                inner.deleted = false;
                mvcc.clear_expired();
            }
            DeltaAction::SetProperty { key, value } => {
                if value.is_null() {
                    inner.properties.remove(key);
                } else {
                    inner.properties.insert(*key, value.clone());
                }
            }
            _ => {}
        }
        inner.delta = delta.next();
    }

    /// Write-write conflict check: the head delta of an object decides
    /// whether a writer may touch it. A foreign delta from a live
    /// transaction, or from one that committed after this transaction
    /// started, is a serialization conflict.
    pub(crate) fn prepare_for_write(
        &self,
        head: Option<&DeltaRef>,
        tx: &Transaction,
    ) -> Result<()> {
        let Some(delta) = head else {
            return Ok(());
        };
        if delta.tx_id == tx.id {
            return Ok(());
        }
        match delta.commit_info.state() {
            TxState::Committed
                if delta.tx_id < tx.id && !tx.snapshot.contains(delta.tx_id) =>
            {
                Ok(())
            }
            _ => Err(ShardError::Serialization),
        }
    }

    /// Drops transactions that can no longer influence visibility: committed
    /// or aborted ones older than the GC snapshot.
    pub(crate) fn prune_transactions(&self, gc_snapshot: &Snapshot) {
        let mut transactions = self.transactions.write();
        transactions.retain(|id, tx| match tx.state() {
            TxState::Active => true,
            TxState::Committed | TxState::Aborted => {
                *id >= gc_snapshot.watermark() || gc_snapshot.contains(*id)
            }
        });
    }

    /// The snapshot garbage collection filters against: the snapshot of the
    /// oldest live transaction, or a sentinel one step past every known
    /// transaction when none is live.
    pub(crate) fn gc_snapshot(&self) -> Snapshot {
        let transactions = self.transactions.read();
        for tx in transactions.values() {
            if tx.is_active() {
                return tx.snapshot.clone();
            }
        }
        let next = transactions
            .keys()
            .last()
            .map(|id| id.0 + 1)
            .max(Some(self.clock.peek().logical + 1))
            .unwrap_or(u64::MAX);
        Snapshot::new(vec![TransactionId(next)])
    }
}
