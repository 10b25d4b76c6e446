//! Vertices and the ordered vertex container.
//!
//! The container is a B-tree keyed by primary key behind a read-write
//! latch; entries are reference counted so an iterator that has seen an
//! entry can keep walking it while the map accepts concurrent insertions.
//! Iteration steps by lower-bound lookup instead of holding the latch.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::storage::delta::DeltaRef;
use crate::storage::edge::EdgeLink;
use crate::storage::mvcc::{MvccRecord, ReadView};
use crate::types::LabelId;
use crate::value::{PrimaryKey, PropertyValue};

/// Global vertex identity: the owning shard's primary label plus the
/// primary key. Edge endpoints use this form so cross-shard references stay
/// resolvable.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexId {
    pub primary_label: LabelId,
    pub primary_key: PrimaryKey,
}

impl VertexId {
    pub fn new(primary_label: LabelId, primary_key: PrimaryKey) -> Self {
        VertexId {
            primary_label,
            primary_key,
        }
    }
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.primary_label, self.primary_key)
    }
}

/// Mutable part of a vertex, guarded by the vertex latch. The delta head
/// and every field it rewinds live under the same lock.
#[derive(Debug, Default)]
pub struct VertexInner {
    /// Secondary labels; the primary label is implied by the shard.
    pub labels: SmallVec<[LabelId; 4]>,
    pub properties: BTreeMap<crate::types::PropertyId, PropertyValue>,
    pub in_edges: Vec<EdgeLink>,
    pub out_edges: Vec<EdgeLink>,
    pub deleted: bool,
    pub delta: Option<DeltaRef>,
}

impl VertexInner {
    /// Copies the current state and rewinds it for `view` by applying undo
    /// deltas until one is visible to the reader.
    pub fn materialize(&self, view: &ReadView<'_>) -> VertexSnapshot {
        let mut snapshot = VertexSnapshot {
            labels: self.labels.clone(),
            properties: self.properties.clone(),
            in_edges: self.in_edges.clone(),
            out_edges: self.out_edges.clone(),
            deleted: self.deleted,
        };
        let mut delta = self.delta.clone();
        while let Some(current) = delta {
            if !view.must_undo(&current) {
                break;
            }
            snapshot.apply_undo(&current.action);
            delta = current.next();
        }
        snapshot
    }
}

/// A vertex's state as of one reader's snapshot.
#[derive(Clone, Debug, Default)]
pub struct VertexSnapshot {
    pub labels: SmallVec<[LabelId; 4]>,
    pub properties: BTreeMap<crate::types::PropertyId, PropertyValue>,
    pub in_edges: Vec<EdgeLink>,
    pub out_edges: Vec<EdgeLink>,
    pub deleted: bool,
}

impl VertexSnapshot {
    fn apply_undo(&mut self, action: &crate::storage::delta::DeltaAction) {
        use crate::storage::delta::DeltaAction;
        match action {
            DeltaAction::DeleteObject => self.deleted = true,
            DeltaAction::RecreateObject => self.deleted = false,
            DeltaAction::AddLabel(label) => {
                if !self.labels.contains(label) {
                    self.labels.push(*label);
                }
            }
            DeltaAction::RemoveLabel(label) => self.labels.retain(|l| l != label),
            DeltaAction::SetProperty { key, value } => {
                if value.is_null() {
                    self.properties.remove(key);
                } else {
                    self.properties.insert(*key, value.clone());
                }
            }
            DeltaAction::AddInEdge(link) => self.in_edges.push(link.clone()),
            DeltaAction::AddOutEdge(link) => self.out_edges.push(link.clone()),
            DeltaAction::RemoveInEdge(link) => self.in_edges.retain(|l| l != link),
            DeltaAction::RemoveOutEdge(link) => self.out_edges.retain(|l| l != link),
        }
    }
}

#[derive(Debug, Default)]
pub struct Vertex {
    pub mvcc: MvccRecord,
    pub inner: RwLock<VertexInner>,
    /// Set once garbage collection has queued this vertex for deferred
    /// removal, so later passes do not queue it twice.
    pub(crate) gc_queued: std::sync::atomic::AtomicBool,
}

pub type VertexRef = Arc<Vertex>;

#[derive(Debug, Default)]
pub struct VertexContainer {
    map: RwLock<BTreeMap<PrimaryKey, VertexRef>>,
}

impl VertexContainer {
    pub fn new() -> Self {
        VertexContainer::default()
    }

    pub fn from_entries(entries: BTreeMap<PrimaryKey, VertexRef>) -> Self {
        VertexContainer {
            map: RwLock::new(entries),
        }
    }

    pub fn get(&self, key: &PrimaryKey) -> Option<VertexRef> {
        self.map.read().get(key).cloned()
    }

    /// Inserts a fresh vertex, returning the existing entry on collision.
    pub fn insert(&self, key: PrimaryKey, vertex: VertexRef) -> Option<VertexRef> {
        let mut map = self.map.write();
        if let Some(existing) = map.get(&key) {
            return Some(Arc::clone(existing));
        }
        map.insert(key, vertex);
        None
    }

    pub fn remove(&self, key: &PrimaryKey) -> Option<VertexRef> {
        self.map.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().len() == 0
    }

    /// First entry at or after `key`, or the very first entry when `key` is
    /// `None`. Iterators step through the container with this, releasing
    /// the latch between steps.
    pub fn next_from(&self, key: Option<&PrimaryKey>) -> Option<(PrimaryKey, VertexRef)> {
        let map = self.map.read();
        let mut range = match key {
            None => map.range::<PrimaryKey, _>(..),
            Some(k) => map.range((Bound::Excluded(k.clone()), Bound::Unbounded)),
        };
        range.next().map(|(k, v)| (k.clone(), Arc::clone(v)))
    }

    /// The key at or near the container's median, used as a split candidate.
    pub fn median_key(&self) -> Option<PrimaryKey> {
        let map = self.map.read();
        if map.is_empty() {
            return None;
        }
        map.keys().nth(map.len() / 2).cloned()
    }

    /// Splits off every entry with `key >= split_key`, the way a range
    /// partition hands its upper half to a successor.
    pub fn split_off(&self, split_key: &PrimaryKey) -> BTreeMap<PrimaryKey, VertexRef> {
        self.map.write().split_off(split_key)
    }

    /// Snapshot of all entries; used by split assertions and snapshots.
    pub fn entries(&self) -> Vec<(PrimaryKey, VertexRef)> {
        self.map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: i64) -> PrimaryKey {
        PrimaryKey::new(vec![PropertyValue::Int(i)])
    }

    #[test]
    fn next_from_steps_in_key_order() {
        let container = VertexContainer::new();
        for i in [5, 1, 3] {
            container.insert(key(i), Arc::new(Vertex::default()));
        }
        let mut seen = Vec::new();
        let mut cursor: Option<PrimaryKey> = None;
        while let Some((k, _)) = container.next_from(cursor.as_ref()) {
            seen.push(k.clone());
            cursor = Some(k);
        }
        assert_eq!(seen, vec![key(1), key(3), key(5)]);
    }

    #[test]
    fn seen_entries_stay_walkable_across_insertions() {
        let container = VertexContainer::new();
        container.insert(key(1), Arc::new(Vertex::default()));
        let (first, held) = container.next_from(None).unwrap();
        container.insert(key(0), Arc::new(Vertex::default()));
        container.insert(key(2), Arc::new(Vertex::default()));
        // The held entry is still alive and stepping continues past it.
        assert!(held.inner.read().labels.is_empty());
        let (next, _) = container.next_from(Some(&first)).unwrap();
        assert_eq!(next, key(2));
    }

    #[test]
    fn split_off_partitions_at_key() {
        let container = VertexContainer::new();
        for i in 1..=6 {
            container.insert(key(i), Arc::new(Vertex::default()));
        }
        let rhs = container.split_off(&key(4));
        assert_eq!(container.len(), 3);
        assert_eq!(rhs.len(), 3);
        assert!(rhs.contains_key(&key(4)));
        assert!(container.get(&key(3)).is_some());
    }
}
