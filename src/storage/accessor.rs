//! Accessors: the handles through which all reads and writes of one
//! transaction flow.
//!
//! Every mutation threads an undo delta onto the touched object and records
//! the matching index maintenance and redo op on the transaction, so commit
//! and abort only ever replay transaction-local lists. Reads materialize an
//! object's state at the reader's snapshot by walking the delta chain.

use std::ops::Bound;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::durability::wal::WalOp;
use crate::error::{Result, ShardError};
use crate::hlc::Hlc;
use crate::storage::delta::{Delta, DeltaAction, DeltaRef, ObjectHandle};
use crate::storage::edge::{EdgeKey, EdgeLink, EdgeRef, EdgeSnapshot};
use crate::storage::indices::IndexOp;
use crate::storage::mvcc::{MvccRecord, ReadView, TxStatus};
use crate::storage::shard::Shard;
use crate::storage::transaction::Transaction;
use crate::storage::vertex::{Vertex, VertexId, VertexRef, VertexSnapshot};
use crate::types::{CommandId, EdgeTypeId, Gid, LabelId, PropertyId, TransactionId, View};
use crate::value::{PrimaryKey, PropertyValue};

/// Transaction-scoped handle onto one shard.
pub struct Accessor<'a> {
    shard: &'a Shard,
    tx: Arc<Transaction>,
}

impl<'a> Accessor<'a> {
    pub(crate) fn new(shard: &'a Shard, tx: Arc<Transaction>) -> Self {
        Accessor { shard, tx }
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.tx.id
    }

    pub fn start_ts(&self) -> Hlc {
        self.tx.start_ts
    }

    pub fn command_id(&self) -> CommandId {
        self.tx.command_id()
    }

    /// Makes the current command's writes visible to subsequent reads of
    /// this transaction.
    pub fn advance_command(&self) {
        self.tx.advance_command();
    }

    pub fn commit(&self, commit_ts: Hlc) -> Result<()> {
        self.shard.commit_transaction(&self.tx, commit_ts)
    }

    pub fn abort(&self) -> Result<()> {
        self.shard.abort_transaction(&self.tx)
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.tx.is_active() {
            return Err(ShardError::Invalid("transaction is no longer active"));
        }
        Ok(())
    }

    fn read_view(&self, view: View) -> ReadView<'_> {
        ReadView {
            tx_id: self.tx.id,
            command_id: self.tx.command_id(),
            snapshot: &self.tx.snapshot,
            clog: &self.shard.commit_log,
            view,
        }
    }

    fn record_visible(&self, record: &MvccRecord, view: View) -> bool {
        record_visible(record, &self.tx, self.shard, view)
    }

    fn self_vertex_id(&self, pk: &PrimaryKey) -> VertexId {
        VertexId::new(self.shard.primary_label(), pk.clone())
    }

    /// Distinguishes "never there for this reader" from "tombstoned by this
    /// very transaction".
    fn missing_object_error(&self, record: &MvccRecord) -> ShardError {
        if record.expired_by() == Some(self.tx.id) {
            ShardError::DeletedObject
        } else {
            ShardError::NonexistentObject
        }
    }

    /// Creates a vertex after validating it against the shard's primary-key
    /// schema. No deltas are produced on failure.
    pub fn create_vertex(
        &self,
        labels: &[LabelId],
        pk_values: Vec<PropertyValue>,
        properties: Vec<(PropertyId, PropertyValue)>,
    ) -> Result<VertexAccessor<'a>> {
        self.create_vertex_inner(labels, pk_values, properties, None)
    }

    /// Variant carrying an idempotency token: replaying the same token in
    /// the same transaction returns the already-created vertex.
    pub fn create_vertex_with_token(
        &self,
        token: u64,
        labels: &[LabelId],
        pk_values: Vec<PropertyValue>,
        properties: Vec<(PropertyId, PropertyValue)>,
    ) -> Result<VertexAccessor<'a>> {
        self.create_vertex_inner(labels, pk_values, properties, Some(token))
    }

    fn create_vertex_inner(
        &self,
        labels: &[LabelId],
        pk_values: Vec<PropertyValue>,
        properties: Vec<(PropertyId, PropertyValue)>,
        token: Option<u64>,
    ) -> Result<VertexAccessor<'a>> {
        self.ensure_active()?;
        self.shard
            .schemas
            .validate_create(self.shard.primary_label(), &pk_values, &properties)?;
        let pk = PrimaryKey::from(pk_values);
        if !self.shard.key_in_range(&pk) {
            return Err(ShardError::OutOfRange);
        }
        if let Some(token) = token {
            if !self.tx.claim_idempotency_token(token) {
                return self
                    .find_vertex(&pk, View::New)
                    .ok_or(ShardError::NonexistentObject);
            }
        }
        let primary = self.shard.primary_label();
        let mut secondary: SmallVec<[LabelId; 4]> = SmallVec::new();
        for label in labels {
            if *label != primary && !secondary.contains(label) {
                secondary.push(*label);
            }
        }
        let properties: Vec<(PropertyId, PropertyValue)> = properties
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .collect();

        let command = self.tx.command_id();
        let vertex = Arc::new(Vertex::default());
        let delta = Delta::new(
            DeltaAction::DeleteObject,
            ObjectHandle::Vertex(pk.clone()),
            self.tx.id,
            command,
            Arc::clone(&self.tx.commit_info),
            None,
        );
        {
            let mut inner = vertex.inner.write();
            inner.labels = secondary.clone();
            inner.properties = properties.iter().cloned().collect();
            inner.delta = Some(Arc::clone(&delta));
        }
        vertex.mvcc.mark_created(self.tx.id, command);

        if let Some(existing) = self.shard.vertices.insert(pk.clone(), Arc::clone(&vertex)) {
            let creator = existing.mvcc.created_by();
            if creator == self.tx.id {
                return Err(ShardError::VertexAlreadyInserted);
            }
            return match self.shard.commit_log.status(creator) {
                TxStatus::Active => Err(ShardError::Serialization),
                TxStatus::Committed(_)
                    if creator >= self.tx.id || self.tx.snapshot.contains(creator) =>
                {
                    Err(ShardError::Serialization)
                }
                _ => Err(ShardError::VertexAlreadyInserted),
            };
        }
        self.tx.push_delta(delta);

        for label in &secondary {
            if self.shard.indices.label.is_indexed(*label) {
                self.shard
                    .indices
                    .label
                    .insert_entry(*label, pk.clone(), self.tx.id);
                self.tx.record_index_op(IndexOp::LabelCreated {
                    label: *label,
                    pk: pk.clone(),
                });
            }
        }
        for label in std::iter::once(primary).chain(secondary.iter().copied()) {
            for (property, value) in &properties {
                if self
                    .shard
                    .indices
                    .label_property
                    .is_indexed(label, *property)
                {
                    self.shard.indices.label_property.insert_entry(
                        label,
                        *property,
                        value.clone(),
                        pk.clone(),
                        self.tx.id,
                    );
                    self.tx.record_index_op(IndexOp::PropertyCreated {
                        label,
                        property: *property,
                        value: value.clone(),
                        pk: pk.clone(),
                    });
                }
            }
        }
        self.tx.record_redo(WalOp::CreateVertex {
            pk: pk.clone(),
            labels: secondary.to_vec(),
            properties,
        });

        Ok(VertexAccessor {
            shard: self.shard,
            tx: Arc::clone(&self.tx),
            vertex,
            pk,
            view: View::New,
        })
    }

    pub fn find_vertex(&self, pk: &PrimaryKey, view: View) -> Option<VertexAccessor<'a>> {
        let vertex = self.shard.vertices.get(pk)?;
        if !self.record_visible(&vertex.mvcc, view) {
            return None;
        }
        Some(VertexAccessor {
            shard: self.shard,
            tx: Arc::clone(&self.tx),
            vertex,
            pk: pk.clone(),
            view,
        })
    }

    /// All vertices of the shard, in primary-key order.
    pub fn vertices(&self, view: View) -> VertexIterator<'a> {
        self.scan_iter(view, None, None)
    }

    /// Vertices bearing `label`. Uses the label index when one exists,
    /// otherwise falls back to a filtered scan. The shard's primary label
    /// matches every vertex.
    pub fn vertices_by_label(&self, label: LabelId, view: View) -> VertexIterator<'a> {
        if label != self.shard.primary_label() && self.shard.indices.label.is_indexed(label) {
            return VertexIterator {
                shard: self.shard,
                tx: Arc::clone(&self.tx),
                view,
                kind: IterKind::ByLabelIndex {
                    label,
                    cursor: None,
                },
            };
        }
        self.scan_iter(view, Some(label), None)
    }

    /// Vertices bearing `label` that have `property` set to any value.
    pub fn vertices_by_label_property(
        &self,
        label: LabelId,
        property: PropertyId,
        view: View,
    ) -> VertexIterator<'a> {
        self.vertices_by_label_property_range(label, property, Bound::Unbounded, Bound::Unbounded, view)
    }

    /// Vertices bearing `label` whose `property` equals `value`.
    pub fn vertices_by_label_property_value(
        &self,
        label: LabelId,
        property: PropertyId,
        value: PropertyValue,
        view: View,
    ) -> VertexIterator<'a> {
        self.vertices_by_label_property_range(
            label,
            property,
            Bound::Included(value.clone()),
            Bound::Included(value),
            view,
        )
    }

    /// Vertices bearing `label` whose `property` lies inside the bounds,
    /// ordered by the fixed cross-type value order.
    pub fn vertices_by_label_property_range(
        &self,
        label: LabelId,
        property: PropertyId,
        lower: Bound<PropertyValue>,
        upper: Bound<PropertyValue>,
        view: View,
    ) -> VertexIterator<'a> {
        if self.shard.indices.label_property.is_indexed(label, property) {
            return VertexIterator {
                shard: self.shard,
                tx: Arc::clone(&self.tx),
                view,
                kind: IterKind::ByLabelPropertyIndex {
                    label,
                    property,
                    lower,
                    upper,
                    cursor: None,
                },
            };
        }
        self.scan_iter(view, Some(label), Some((property, lower, upper)))
    }

    fn scan_iter(
        &self,
        view: View,
        label: Option<LabelId>,
        property: Option<(PropertyId, Bound<PropertyValue>, Bound<PropertyValue>)>,
    ) -> VertexIterator<'a> {
        VertexIterator {
            shard: self.shard,
            tx: Arc::clone(&self.tx),
            view,
            kind: IterKind::Scan {
                cursor: None,
                label,
                property,
            },
        }
    }

    /// Over-estimate of all vertices in the shard.
    pub fn approximate_vertex_count(&self) -> usize {
        self.shard.vertices.len()
    }

    pub fn approximate_vertex_count_by_label(&self, label: LabelId) -> usize {
        if label == self.shard.primary_label() {
            self.shard.vertices.len()
        } else {
            self.shard.indices.label.approximate_count(label)
        }
    }

    pub fn approximate_vertex_count_by_label_property(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> usize {
        self.shard
            .indices
            .label_property
            .approximate_count(label, property)
    }

    pub fn approximate_vertex_count_in_range(
        &self,
        label: LabelId,
        property: PropertyId,
        lower: Bound<&PropertyValue>,
        upper: Bound<&PropertyValue>,
    ) -> usize {
        self.shard
            .indices
            .label_property
            .approximate_count_in_range(label, property, lower, upper)
    }

    /// Creates an edge from `from` to `to`. The source vertex must belong
    /// to this shard; a remote destination is kept as a reference only.
    pub fn create_edge(
        &self,
        from: &VertexId,
        to: &VertexId,
        edge_type: EdgeTypeId,
        gid: Gid,
    ) -> Result<EdgeAccessor<'a>> {
        self.create_edge_inner(from, to, edge_type, gid, None)
    }

    pub fn create_edge_with_token(
        &self,
        token: u64,
        from: &VertexId,
        to: &VertexId,
        edge_type: EdgeTypeId,
        gid: Gid,
    ) -> Result<EdgeAccessor<'a>> {
        self.create_edge_inner(from, to, edge_type, gid, Some(token))
    }

    fn create_edge_inner(
        &self,
        from: &VertexId,
        to: &VertexId,
        edge_type: EdgeTypeId,
        gid: Gid,
        token: Option<u64>,
    ) -> Result<EdgeAccessor<'a>> {
        self.ensure_active()?;
        if !self.shard.is_vertex_belong_to_shard(from) {
            return Err(ShardError::OutOfRange);
        }
        let key = EdgeKey {
            src: from.clone(),
            dst: to.clone(),
            edge_type,
            gid,
        };
        if let Some(token) = token {
            if !self.tx.claim_idempotency_token(token) {
                return self
                    .find_edge(&key, View::New)
                    .ok_or(ShardError::NonexistentObject);
            }
        }
        let src = self
            .shard
            .vertices
            .get(&from.primary_key)
            .ok_or(ShardError::NonexistentObject)?;
        if !self.record_visible(&src.mvcc, View::New) {
            return Err(self.missing_object_error(&src.mvcc));
        }
        let dst = if self.shard.is_vertex_belong_to_shard(to) {
            let dst = self
                .shard
                .vertices
                .get(&to.primary_key)
                .ok_or(ShardError::NonexistentObject)?;
            if !self.record_visible(&dst.mvcc, View::New) {
                return Err(self.missing_object_error(&dst.mvcc));
            }
            Some(dst)
        } else {
            None
        };

        let command = self.tx.command_id();
        let edge = Arc::new(crate::storage::edge::Edge::default());
        let edge_delta = Delta::new(
            DeltaAction::DeleteObject,
            ObjectHandle::Edge(key.clone()),
            self.tx.id,
            command,
            Arc::clone(&self.tx.commit_info),
            None,
        );
        edge.inner.write().delta = Some(Arc::clone(&edge_delta));
        edge.mvcc.mark_created(self.tx.id, command);
        if self.shard.edges.insert(key.clone(), Arc::clone(&edge)).is_some() {
            return Err(ShardError::Invalid("edge gid already in use"));
        }

        let out_link = EdgeLink {
            other: to.clone(),
            edge_type,
            gid,
        };
        let src_delta = self.thread_vertex_delta(
            &src,
            &from.primary_key,
            DeltaAction::RemoveOutEdge(out_link.clone()),
            command,
        );
        let src_delta = match src_delta {
            Ok(delta) => {
                src.inner.write().out_edges.push(out_link.clone());
                delta
            }
            Err(err) => {
                self.shard.edges.remove(&key);
                return Err(err);
            }
        };

        let mut dst_delta = None;
        if let Some(dst) = &dst {
            let in_link = EdgeLink {
                other: from.clone(),
                edge_type,
                gid,
            };
            match self.thread_vertex_delta(
                dst,
                &to.primary_key,
                DeltaAction::RemoveInEdge(in_link.clone()),
                command,
            ) {
                Ok(delta) => {
                    dst.inner.write().in_edges.push(in_link);
                    dst_delta = Some(delta);
                }
                Err(err) => {
                    // Unwind the half-threaded source side.
                    let mut src_inner = src.inner.write();
                    self.shard
                        .undo_vertex_delta(&mut src_inner, &src_delta, &src.mvcc);
                    drop(src_inner);
                    self.shard.edges.remove(&key);
                    return Err(err);
                }
            }
        }

        self.tx.push_delta(edge_delta);
        self.tx.push_delta(src_delta);
        if let Some(delta) = dst_delta {
            self.tx.push_delta(delta);
        }
        self.tx.record_redo(WalOp::CreateEdge { key: key.clone() });

        Ok(EdgeAccessor {
            shard: self.shard,
            tx: Arc::clone(&self.tx),
            edge,
            key,
            view: View::New,
        })
    }

    /// Threads a new undo delta onto a vertex after the write-conflict
    /// check, without applying any state change yet.
    fn thread_vertex_delta(
        &self,
        vertex: &VertexRef,
        pk: &PrimaryKey,
        action: DeltaAction,
        command: CommandId,
    ) -> Result<DeltaRef> {
        let mut inner = vertex.inner.write();
        self.shard.prepare_for_write(inner.delta.as_ref(), &self.tx)?;
        if inner.materialize(&self.read_view(View::New)).deleted {
            return Err(ShardError::DeletedObject);
        }
        let delta = Delta::new(
            action,
            ObjectHandle::Vertex(pk.clone()),
            self.tx.id,
            command,
            Arc::clone(&self.tx.commit_info),
            inner.delta.clone(),
        );
        inner.delta = Some(Arc::clone(&delta));
        Ok(delta)
    }

    pub fn find_edge(&self, key: &EdgeKey, view: View) -> Option<EdgeAccessor<'a>> {
        let edge = self.shard.edges.get(key)?;
        if !self.record_visible(&edge.mvcc, view) {
            return None;
        }
        Some(EdgeAccessor {
            shard: self.shard,
            tx: Arc::clone(&self.tx),
            edge,
            key: key.clone(),
            view,
        })
    }

    pub fn delete_edge(&self, edge: &EdgeAccessor<'_>) -> Result<()> {
        self.ensure_active()?;
        self.delete_edge_by_key(&edge.key)
    }

    fn delete_edge_by_key(&self, key: &EdgeKey) -> Result<()> {
        let edge = self.shard.edges.get(key).ok_or(ShardError::NonexistentObject)?;
        let command = self.tx.command_id();

        // Tombstone the edge object first so a concurrent delete of the
        // same edge conflicts on its chain.
        let edge_delta = {
            let mut inner = edge.inner.write();
            self.shard.prepare_for_write(inner.delta.as_ref(), &self.tx)?;
            if inner.materialize(&self.read_view(View::New)).deleted {
                return Err(ShardError::DeletedObject);
            }
            let delta = Delta::new(
                DeltaAction::RecreateObject,
                ObjectHandle::Edge(key.clone()),
                self.tx.id,
                command,
                Arc::clone(&self.tx.commit_info),
                inner.delta.clone(),
            );
            inner.delta = Some(Arc::clone(&delta));
            inner.deleted = true;
            delta
        };
        edge.mvcc.mark_expired(self.tx.id, command);

        let out_link = EdgeLink {
            other: key.dst.clone(),
            edge_type: key.edge_type,
            gid: key.gid,
        };
        let src = self
            .shard
            .vertices
            .get(&key.src.primary_key)
            .ok_or(ShardError::NonexistentObject)?;
        let src_delta =
            match self.thread_vertex_delta(&src, &key.src.primary_key, DeltaAction::AddOutEdge(out_link.clone()), command)
            {
                Ok(delta) => {
                    src.inner.write().out_edges.retain(|l| l != &out_link);
                    delta
                }
                Err(err) => {
                    let mut inner = edge.inner.write();
                    self.shard.undo_edge_delta(&mut inner, &edge_delta, &edge.mvcc);
                    return Err(err);
                }
            };

        let mut dst_delta = None;
        if self.shard.is_vertex_belong_to_shard(&key.dst) {
            let in_link = EdgeLink {
                other: key.src.clone(),
                edge_type: key.edge_type,
                gid: key.gid,
            };
            let dst = self
                .shard
                .vertices
                .get(&key.dst.primary_key)
                .ok_or(ShardError::NonexistentObject)?;
            match self.thread_vertex_delta(
                &dst,
                &key.dst.primary_key,
                DeltaAction::AddInEdge(in_link.clone()),
                command,
            ) {
                Ok(delta) => {
                    dst.inner.write().in_edges.retain(|l| l != &in_link);
                    dst_delta = Some(delta);
                }
                Err(err) => {
                    let mut src_inner = src.inner.write();
                    self.shard
                        .undo_vertex_delta(&mut src_inner, &src_delta, &src.mvcc);
                    drop(src_inner);
                    let mut inner = edge.inner.write();
                    self.shard.undo_edge_delta(&mut inner, &edge_delta, &edge.mvcc);
                    return Err(err);
                }
            }
        }

        self.tx.push_delta(edge_delta);
        self.tx.push_delta(src_delta);
        if let Some(delta) = dst_delta {
            self.tx.push_delta(delta);
        }
        self.tx.record_redo(WalOp::DeleteEdge { key: key.clone() });
        Ok(())
    }

    /// Deletes a vertex with no visible incident edges. Connected vertices
    /// need [`Accessor::detach_delete_vertex`].
    pub fn delete_vertex(&self, vertex: &VertexAccessor<'_>) -> Result<()> {
        self.ensure_active()?;
        let snapshot = {
            let inner = vertex.vertex.inner.read();
            inner.materialize(&self.read_view(View::New))
        };
        if snapshot.deleted {
            return Err(ShardError::DeletedObject);
        }
        if !snapshot.in_edges.is_empty() || !snapshot.out_edges.is_empty() {
            return Err(ShardError::VertexHasEdges);
        }
        self.tombstone_vertex(vertex, &snapshot)
    }

    /// Deletes a vertex together with its incident edges, returning the
    /// links of the removed edges.
    pub fn detach_delete_vertex(&self, vertex: &VertexAccessor<'_>) -> Result<Vec<EdgeLink>> {
        self.ensure_active()?;
        let self_id = self.self_vertex_id(&vertex.pk);
        let snapshot = {
            let inner = vertex.vertex.inner.read();
            inner.materialize(&self.read_view(View::New))
        };
        if snapshot.deleted {
            return Err(ShardError::DeletedObject);
        }

        let mut removed = Vec::new();
        for link in &snapshot.out_edges {
            let key = EdgeKey {
                src: self_id.clone(),
                dst: link.other.clone(),
                edge_type: link.edge_type,
                gid: link.gid,
            };
            self.delete_edge_by_key(&key)?;
            removed.push(link.clone());
        }
        for link in &snapshot.in_edges {
            if self.shard.is_vertex_belong_to_shard(&link.other) {
                let key = EdgeKey {
                    src: link.other.clone(),
                    dst: self_id.clone(),
                    edge_type: link.edge_type,
                    gid: link.gid,
                };
                self.delete_edge_by_key(&key)?;
            } else {
                // The edge object lives on the remote source shard; only
                // the local reference is removed.
                let command = self.tx.command_id();
                let delta = self.thread_vertex_delta(
                    &vertex.vertex,
                    &vertex.pk,
                    DeltaAction::AddInEdge(link.clone()),
                    command,
                )?;
                vertex.vertex.inner.write().in_edges.retain(|l| l != link);
                self.tx.push_delta(delta);
            }
            removed.push(link.clone());
        }

        let snapshot = {
            let inner = vertex.vertex.inner.read();
            inner.materialize(&self.read_view(View::New))
        };
        self.tombstone_vertex(vertex, &snapshot)?;
        Ok(removed)
    }

    fn tombstone_vertex(
        &self,
        vertex: &VertexAccessor<'_>,
        snapshot: &VertexSnapshot,
    ) -> Result<()> {
        let command = self.tx.command_id();
        let delta = self.thread_vertex_delta(
            &vertex.vertex,
            &vertex.pk,
            DeltaAction::RecreateObject,
            command,
        )?;
        vertex.vertex.inner.write().deleted = true;
        vertex.vertex.mvcc.mark_expired(self.tx.id, command);
        self.tx.push_delta(delta);

        let primary = self.shard.primary_label();
        for label in snapshot.labels.iter().copied() {
            if self.shard.indices.label.is_indexed(label) {
                self.shard
                    .indices
                    .label
                    .expire_entries(label, &vertex.pk, self.tx.id);
                self.tx.record_index_op(IndexOp::LabelExpired {
                    label,
                    pk: vertex.pk.clone(),
                });
            }
        }
        for label in std::iter::once(primary).chain(snapshot.labels.iter().copied()) {
            for (property, value) in &snapshot.properties {
                if self
                    .shard
                    .indices
                    .label_property
                    .is_indexed(label, *property)
                {
                    self.shard.indices.label_property.expire_entry(
                        label,
                        *property,
                        value,
                        &vertex.pk,
                        self.tx.id,
                    );
                    self.tx.record_index_op(IndexOp::PropertyExpired {
                        label,
                        property: *property,
                        value: value.clone(),
                        pk: vertex.pk.clone(),
                    });
                }
            }
        }
        self.tx.record_redo(WalOp::DeleteVertex {
            pk: vertex.pk.clone(),
        });
        Ok(())
    }
}

pub(crate) fn record_visible(
    record: &MvccRecord,
    tx: &Transaction,
    shard: &Shard,
    view: View,
) -> bool {
    match view {
        View::New => record.is_visible_for_write(
            tx.id,
            tx.command_id(),
            &tx.snapshot,
            &shard.commit_log,
        ),
        View::Old => record.is_visible(tx.id, tx.command_id(), &tx.snapshot, &shard.commit_log),
    }
}

/// Handle to one vertex inside one transaction.
#[derive(Debug)]
pub struct VertexAccessor<'a> {
    shard: &'a Shard,
    tx: Arc<Transaction>,
    pub(crate) vertex: VertexRef,
    pub(crate) pk: PrimaryKey,
    view: View,
}

impl<'a> VertexAccessor<'a> {
    pub fn primary_key(&self) -> &PrimaryKey {
        &self.pk
    }

    pub fn id(&self) -> VertexId {
        VertexId::new(self.shard.primary_label(), self.pk.clone())
    }

    fn read_view(&self) -> ReadView<'_> {
        ReadView {
            tx_id: self.tx.id,
            command_id: self.tx.command_id(),
            snapshot: &self.tx.snapshot,
            clog: &self.shard.commit_log,
            view: self.view,
        }
    }

    fn snapshot(&self) -> Result<VertexSnapshot> {
        let inner = self.vertex.inner.read();
        let snapshot = inner.materialize(&self.read_view());
        if snapshot.deleted {
            return Err(ShardError::DeletedObject);
        }
        Ok(snapshot)
    }

    /// All labels, the shard's primary label first.
    pub fn labels(&self) -> Result<Vec<LabelId>> {
        let snapshot = self.snapshot()?;
        let mut labels = vec![self.shard.primary_label()];
        labels.extend(snapshot.labels);
        Ok(labels)
    }

    pub fn has_label(&self, label: LabelId) -> Result<bool> {
        if label == self.shard.primary_label() {
            self.snapshot()?;
            return Ok(true);
        }
        Ok(self.snapshot()?.labels.contains(&label))
    }

    pub fn properties(
        &self,
    ) -> Result<std::collections::BTreeMap<PropertyId, PropertyValue>> {
        Ok(self.snapshot()?.properties)
    }

    pub fn property(&self, property: PropertyId) -> Result<PropertyValue> {
        Ok(self
            .snapshot()?
            .properties
            .get(&property)
            .cloned()
            .unwrap_or(PropertyValue::Null))
    }

    pub fn in_edges(&self) -> Result<Vec<EdgeLink>> {
        Ok(self.snapshot()?.in_edges)
    }

    pub fn out_edges(&self) -> Result<Vec<EdgeLink>> {
        Ok(self.snapshot()?.out_edges)
    }

    /// Sets (or with `Null`, clears) a property, returning the previous
    /// value. Writing an unchanged value produces no delta.
    pub fn set_property(
        &self,
        property: PropertyId,
        value: PropertyValue,
    ) -> Result<PropertyValue> {
        if !self.tx.is_active() {
            return Err(ShardError::Invalid("transaction is no longer active"));
        }
        if let Some(schema) = self.shard.schemas.get(self.shard.primary_label()) {
            if schema.iter().any(|declared| declared.property_id == property) {
                return Err(ShardError::SchemaViolation(format!(
                    "property {property} is part of the primary key"
                )));
            }
        }
        let command = self.tx.command_id();
        let mut inner = self.vertex.inner.write();
        self.shard.prepare_for_write(inner.delta.as_ref(), &self.tx)?;
        let view = ReadView {
            tx_id: self.tx.id,
            command_id: command,
            snapshot: &self.tx.snapshot,
            clog: &self.shard.commit_log,
            view: View::New,
        };
        let materialized = inner.materialize(&view);
        if materialized.deleted {
            return Err(ShardError::DeletedObject);
        }
        let old = inner
            .properties
            .get(&property)
            .cloned()
            .unwrap_or(PropertyValue::Null);
        if old == value {
            return Ok(old);
        }
        let delta = Delta::new(
            DeltaAction::SetProperty {
                key: property,
                value: old.clone(),
            },
            ObjectHandle::Vertex(self.pk.clone()),
            self.tx.id,
            command,
            Arc::clone(&self.tx.commit_info),
            inner.delta.clone(),
        );
        inner.delta = Some(Arc::clone(&delta));
        if value.is_null() {
            inner.properties.remove(&property);
        } else {
            inner.properties.insert(property, value.clone());
        }
        let labels: SmallVec<[LabelId; 4]> = inner.labels.clone();
        drop(inner);
        self.tx.push_delta(delta);

        let primary = self.shard.primary_label();
        for label in std::iter::once(primary).chain(labels.iter().copied()) {
            if !self.shard.indices.label_property.is_indexed(label, property) {
                continue;
            }
            if !old.is_null() {
                self.shard.indices.label_property.expire_entry(
                    label,
                    property,
                    &old,
                    &self.pk,
                    self.tx.id,
                );
                self.tx.record_index_op(IndexOp::PropertyExpired {
                    label,
                    property,
                    value: old.clone(),
                    pk: self.pk.clone(),
                });
            }
            if !value.is_null() {
                self.shard.indices.label_property.insert_entry(
                    label,
                    property,
                    value.clone(),
                    self.pk.clone(),
                    self.tx.id,
                );
                self.tx.record_index_op(IndexOp::PropertyCreated {
                    label,
                    property,
                    value: value.clone(),
                    pk: self.pk.clone(),
                });
            }
        }
        self.tx.record_redo(WalOp::SetVertexProperty {
            pk: self.pk.clone(),
            property,
            value,
        });
        Ok(old)
    }

    /// Adds a secondary label. Returns false when the vertex already bears
    /// it (including the primary label).
    pub fn add_label(&self, label: LabelId) -> Result<bool> {
        if !self.tx.is_active() {
            return Err(ShardError::Invalid("transaction is no longer active"));
        }
        if label == self.shard.primary_label() {
            return Ok(false);
        }
        let command = self.tx.command_id();
        let mut inner = self.vertex.inner.write();
        self.shard.prepare_for_write(inner.delta.as_ref(), &self.tx)?;
        let view = ReadView {
            tx_id: self.tx.id,
            command_id: command,
            snapshot: &self.tx.snapshot,
            clog: &self.shard.commit_log,
            view: View::New,
        };
        let materialized = inner.materialize(&view);
        if materialized.deleted {
            return Err(ShardError::DeletedObject);
        }
        if inner.labels.contains(&label) {
            return Ok(false);
        }
        let delta = Delta::new(
            DeltaAction::RemoveLabel(label),
            ObjectHandle::Vertex(self.pk.clone()),
            self.tx.id,
            command,
            Arc::clone(&self.tx.commit_info),
            inner.delta.clone(),
        );
        inner.delta = Some(Arc::clone(&delta));
        inner.labels.push(label);
        let properties = inner.properties.clone();
        drop(inner);
        self.tx.push_delta(delta);

        if self.shard.indices.label.is_indexed(label) {
            self.shard
                .indices
                .label
                .insert_entry(label, self.pk.clone(), self.tx.id);
            self.tx.record_index_op(IndexOp::LabelCreated {
                label,
                pk: self.pk.clone(),
            });
        }
        for (property, value) in &properties {
            if self.shard.indices.label_property.is_indexed(label, *property) {
                self.shard.indices.label_property.insert_entry(
                    label,
                    *property,
                    value.clone(),
                    self.pk.clone(),
                    self.tx.id,
                );
                self.tx.record_index_op(IndexOp::PropertyCreated {
                    label,
                    property: *property,
                    value: value.clone(),
                    pk: self.pk.clone(),
                });
            }
        }
        self.tx.record_redo(WalOp::AddLabel {
            pk: self.pk.clone(),
            label,
        });
        Ok(true)
    }

    /// Removes a secondary label. Returns false when the vertex does not
    /// bear it.
    pub fn remove_label(&self, label: LabelId) -> Result<bool> {
        if !self.tx.is_active() {
            return Err(ShardError::Invalid("transaction is no longer active"));
        }
        if label == self.shard.primary_label() {
            return Ok(false);
        }
        let command = self.tx.command_id();
        let mut inner = self.vertex.inner.write();
        self.shard.prepare_for_write(inner.delta.as_ref(), &self.tx)?;
        let view = ReadView {
            tx_id: self.tx.id,
            command_id: command,
            snapshot: &self.tx.snapshot,
            clog: &self.shard.commit_log,
            view: View::New,
        };
        let materialized = inner.materialize(&view);
        if materialized.deleted {
            return Err(ShardError::DeletedObject);
        }
        if !inner.labels.contains(&label) {
            return Ok(false);
        }
        let delta = Delta::new(
            DeltaAction::AddLabel(label),
            ObjectHandle::Vertex(self.pk.clone()),
            self.tx.id,
            command,
            Arc::clone(&self.tx.commit_info),
            inner.delta.clone(),
        );
        inner.delta = Some(Arc::clone(&delta));
        inner.labels.retain(|l| l != &label);
        let properties = inner.properties.clone();
        drop(inner);
        self.tx.push_delta(delta);

        if self.shard.indices.label.is_indexed(label) {
            self.shard
                .indices
                .label
                .expire_entries(label, &self.pk, self.tx.id);
            self.tx.record_index_op(IndexOp::LabelExpired {
                label,
                pk: self.pk.clone(),
            });
        }
        for (property, value) in &properties {
            if self.shard.indices.label_property.is_indexed(label, *property) {
                self.shard.indices.label_property.expire_entry(
                    label,
                    *property,
                    value,
                    &self.pk,
                    self.tx.id,
                );
                self.tx.record_index_op(IndexOp::PropertyExpired {
                    label,
                    property: *property,
                    value: value.clone(),
                    pk: self.pk.clone(),
                });
            }
        }
        self.tx.record_redo(WalOp::RemoveLabel {
            pk: self.pk.clone(),
            label,
        });
        Ok(true)
    }
}

/// Handle to one edge inside one transaction.
#[derive(Debug)]
pub struct EdgeAccessor<'a> {
    shard: &'a Shard,
    tx: Arc<Transaction>,
    pub(crate) edge: EdgeRef,
    pub(crate) key: EdgeKey,
    view: View,
}

impl<'a> EdgeAccessor<'a> {
    pub fn key(&self) -> &EdgeKey {
        &self.key
    }

    pub fn from_vertex(&self) -> &VertexId {
        &self.key.src
    }

    pub fn to_vertex(&self) -> &VertexId {
        &self.key.dst
    }

    pub fn edge_type(&self) -> EdgeTypeId {
        self.key.edge_type
    }

    pub fn gid(&self) -> Gid {
        self.key.gid
    }

    fn snapshot(&self) -> Result<EdgeSnapshot> {
        let inner = self.edge.inner.read();
        let view = ReadView {
            tx_id: self.tx.id,
            command_id: self.tx.command_id(),
            snapshot: &self.tx.snapshot,
            clog: &self.shard.commit_log,
            view: self.view,
        };
        let snapshot = inner.materialize(&view);
        if snapshot.deleted {
            return Err(ShardError::DeletedObject);
        }
        Ok(snapshot)
    }

    pub fn properties(
        &self,
    ) -> Result<std::collections::BTreeMap<PropertyId, PropertyValue>> {
        if !self.shard.config().properties_on_edges {
            return Err(ShardError::PropertiesDisabled);
        }
        Ok(self.snapshot()?.properties)
    }

    pub fn property(&self, property: PropertyId) -> Result<PropertyValue> {
        if !self.shard.config().properties_on_edges {
            return Err(ShardError::PropertiesDisabled);
        }
        Ok(self
            .snapshot()?
            .properties
            .get(&property)
            .cloned()
            .unwrap_or(PropertyValue::Null))
    }

    /// Sets (or with `Null`, clears) an edge property, returning the
    /// previous value.
    pub fn set_property(
        &self,
        property: PropertyId,
        value: PropertyValue,
    ) -> Result<PropertyValue> {
        if !self.tx.is_active() {
            return Err(ShardError::Invalid("transaction is no longer active"));
        }
        if !self.shard.config().properties_on_edges {
            return Err(ShardError::PropertiesDisabled);
        }
        let command = self.tx.command_id();
        let mut inner = self.edge.inner.write();
        self.shard.prepare_for_write(inner.delta.as_ref(), &self.tx)?;
        let view = ReadView {
            tx_id: self.tx.id,
            command_id: command,
            snapshot: &self.tx.snapshot,
            clog: &self.shard.commit_log,
            view: View::New,
        };
        if inner.materialize(&view).deleted {
            return Err(ShardError::DeletedObject);
        }
        let old = inner
            .properties
            .get(&property)
            .cloned()
            .unwrap_or(PropertyValue::Null);
        if old == value {
            return Ok(old);
        }
        let delta = Delta::new(
            DeltaAction::SetProperty {
                key: property,
                value: old.clone(),
            },
            ObjectHandle::Edge(self.key.clone()),
            self.tx.id,
            command,
            Arc::clone(&self.tx.commit_info),
            inner.delta.clone(),
        );
        inner.delta = Some(Arc::clone(&delta));
        if value.is_null() {
            inner.properties.remove(&property);
        } else {
            inner.properties.insert(property, value.clone());
        }
        drop(inner);
        self.tx.push_delta(delta);
        self.tx.record_redo(WalOp::SetEdgeProperty {
            key: self.key.clone(),
            property,
            value,
        });
        Ok(old)
    }
}

enum IterKind {
    Scan {
        cursor: Option<PrimaryKey>,
        label: Option<LabelId>,
        property: Option<(PropertyId, Bound<PropertyValue>, Bound<PropertyValue>)>,
    },
    ByLabelIndex {
        label: LabelId,
        cursor: Option<PrimaryKey>,
    },
    ByLabelPropertyIndex {
        label: LabelId,
        property: PropertyId,
        lower: Bound<PropertyValue>,
        upper: Bound<PropertyValue>,
        cursor: Option<(PropertyValue, PrimaryKey)>,
    },
}

/// Streaming iterator over visible vertices. Steps by lower-bound lookups,
/// so the container latch is never held across yields; entries inserted
/// concurrently may or may not be seen.
pub struct VertexIterator<'a> {
    shard: &'a Shard,
    tx: Arc<Transaction>,
    view: View,
    kind: IterKind,
}

/// One key produced by an iterator step, plus the filters it must survive.
struct Candidate {
    pk: PrimaryKey,
    label: Option<LabelId>,
    property: Option<(PropertyId, Bound<PropertyValue>, Bound<PropertyValue>)>,
    /// Value the index entry carried; the vertex must still hold it at the
    /// reader's snapshot, which also collapses duplicate entries for one
    /// vertex.
    expected: Option<PropertyValue>,
}

impl<'a> VertexIterator<'a> {
    fn accessor_for(&self, pk: PrimaryKey, vertex: VertexRef) -> VertexAccessor<'a> {
        VertexAccessor {
            shard: self.shard,
            tx: Arc::clone(&self.tx),
            vertex,
            pk,
            view: self.view,
        }
    }

    /// Fetches, visibility-checks and state-confirms one candidate key.
    fn confirm(&self, candidate: &Candidate) -> Option<(PrimaryKey, VertexRef)> {
        let vertex = self.shard.vertices.get(&candidate.pk)?;
        if !record_visible(&vertex.mvcc, &self.tx, self.shard, self.view) {
            return None;
        }
        let view = ReadView {
            tx_id: self.tx.id,
            command_id: self.tx.command_id(),
            snapshot: &self.tx.snapshot,
            clog: &self.shard.commit_log,
            view: self.view,
        };
        let snapshot = vertex.inner.read().materialize(&view);
        if snapshot.deleted {
            return None;
        }
        if let Some(label) = candidate.label {
            if label != self.shard.primary_label() && !snapshot.labels.contains(&label) {
                return None;
            }
        }
        if let Some((property, lower, upper)) = &candidate.property {
            let Some(value) = snapshot.properties.get(property) else {
                return None;
            };
            if !bound_contains(value, lower, upper) {
                return None;
            }
            if let Some(expected) = &candidate.expected {
                if value.total_cmp(expected) != std::cmp::Ordering::Equal {
                    return None;
                }
            }
        }
        Some((candidate.pk.clone(), vertex))
    }
}

fn bound_contains(
    value: &PropertyValue,
    lower: &Bound<PropertyValue>,
    upper: &Bound<PropertyValue>,
) -> bool {
    use std::cmp::Ordering;
    let lower_ok = match lower {
        Bound::Unbounded => true,
        Bound::Included(b) => value.total_cmp(b) != Ordering::Less,
        Bound::Excluded(b) => value.total_cmp(b) == Ordering::Greater,
    };
    let upper_ok = match upper {
        Bound::Unbounded => true,
        Bound::Included(b) => value.total_cmp(b) != Ordering::Greater,
        Bound::Excluded(b) => value.total_cmp(b) == Ordering::Less,
    };
    lower_ok && upper_ok
}

impl<'a> Iterator for VertexIterator<'a> {
    type Item = VertexAccessor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let candidate = match &mut self.kind {
                IterKind::Scan {
                    cursor,
                    label,
                    property,
                } => {
                    let (pk, _) = self.shard.vertices.next_from(cursor.as_ref())?;
                    *cursor = Some(pk.clone());
                    Candidate {
                        pk,
                        label: *label,
                        property: property.clone(),
                        expected: None,
                    }
                }
                IterKind::ByLabelIndex { label, cursor } => {
                    let pk = self.shard.indices.label.next_visible(
                        *label,
                        cursor.as_ref(),
                        self.tx.id,
                        self.tx.start_ts,
                    )?;
                    *cursor = Some(pk.clone());
                    Candidate {
                        pk,
                        label: Some(*label),
                        property: None,
                        expected: None,
                    }
                }
                IterKind::ByLabelPropertyIndex {
                    label,
                    property,
                    lower,
                    upper,
                    cursor,
                } => {
                    let (value, pk) = self.shard.indices.label_property.next_visible(
                        *label,
                        *property,
                        lower.as_ref(),
                        upper.as_ref(),
                        cursor.as_ref(),
                        self.tx.id,
                        self.tx.start_ts,
                    )?;
                    *cursor = Some((value.clone(), pk.clone()));
                    Candidate {
                        pk,
                        label: Some(*label),
                        property: Some((*property, lower.clone(), upper.clone())),
                        expected: Some(value),
                    }
                }
            };
            if let Some((pk, vertex)) = self.confirm(&candidate) {
                return Some(self.accessor_for(pk, vertex));
            }
        }
    }
}
