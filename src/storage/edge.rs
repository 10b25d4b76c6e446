//! Edges and the ordered edge container.
//!
//! Edges are keyed by `(src, dst, type, gid)` so all edges of one source
//! vertex are contiguous, which is what the split partitioning relies on:
//! an edge lives in the shard that owns its source vertex.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::storage::delta::DeltaRef;
use crate::storage::mvcc::{MvccRecord, ReadView};
use crate::storage::vertex::VertexId;
use crate::types::{EdgeTypeId, Gid, PropertyId};
use crate::value::{PrimaryKey, PropertyValue};

/// Container key for edges.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub src: VertexId,
    pub dst: VertexId,
    pub edge_type: EdgeTypeId,
    pub gid: Gid,
}

/// Reference to an incident edge stored on a vertex. `other` is the far
/// endpoint, which may live on a different shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeLink {
    pub other: VertexId,
    pub edge_type: EdgeTypeId,
    pub gid: Gid,
}

#[derive(Debug, Default)]
pub struct EdgeInner {
    pub properties: BTreeMap<PropertyId, PropertyValue>,
    pub deleted: bool,
    pub delta: Option<DeltaRef>,
}

impl EdgeInner {
    pub fn materialize(&self, view: &ReadView<'_>) -> EdgeSnapshot {
        let mut snapshot = EdgeSnapshot {
            properties: self.properties.clone(),
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

/// An edge's state as of one reader's snapshot.
#[derive(Clone, Debug, Default)]
pub struct EdgeSnapshot {
    pub properties: BTreeMap<PropertyId, PropertyValue>,
    pub deleted: bool,
}

impl EdgeSnapshot {
    fn apply_undo(&mut self, action: &crate::storage::delta::DeltaAction) {
        use crate::storage::delta::DeltaAction;
        match action {
            DeltaAction::DeleteObject => self.deleted = true,
            DeltaAction::RecreateObject => self.deleted = false,
            DeltaAction::SetProperty { key, value } => {
                if value.is_null() {
                    self.properties.remove(key);
                } else {
                    self.properties.insert(*key, value.clone());
                }
            }
            // Label and edge-list deltas never land on edge chains.
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
pub struct Edge {
    pub mvcc: MvccRecord,
    pub inner: RwLock<EdgeInner>,
    /// Set once garbage collection has queued this edge for deferred
    /// removal.
    pub(crate) gc_queued: std::sync::atomic::AtomicBool,
}

pub type EdgeRef = Arc<Edge>;

#[derive(Debug, Default)]
pub struct EdgeContainer {
    map: RwLock<BTreeMap<EdgeKey, EdgeRef>>,
}

impl EdgeContainer {
    pub fn new() -> Self {
        EdgeContainer::default()
    }

    pub fn from_entries(entries: BTreeMap<EdgeKey, EdgeRef>) -> Self {
        EdgeContainer {
            map: RwLock::new(entries),
        }
    }

    pub fn get(&self, key: &EdgeKey) -> Option<EdgeRef> {
        self.map.read().get(key).cloned()
    }

    pub fn insert(&self, key: EdgeKey, edge: EdgeRef) -> Option<EdgeRef> {
        let mut map = self.map.write();
        if let Some(existing) = map.get(&key) {
            return Some(Arc::clone(existing));
        }
        map.insert(key, edge);
        None
    }

    pub fn remove(&self, key: &EdgeKey) -> Option<EdgeRef> {
        self.map.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().len() == 0
    }

    pub fn next_from(&self, key: Option<&EdgeKey>) -> Option<(EdgeKey, EdgeRef)> {
        let map = self.map.read();
        let mut range = match key {
            None => map.range::<EdgeKey, _>(..),
            Some(k) => map.range((Bound::Excluded(k.clone()), Bound::Unbounded)),
        };
        range.next().map(|(k, v)| (k.clone(), Arc::clone(v)))
    }

    /// Removes and returns every edge whose source key is `>= split_key`.
    /// Cross-shard edges stay with their source.
    pub fn split_off_by_src(&self, split_key: &PrimaryKey) -> BTreeMap<EdgeKey, EdgeRef> {
        let mut map = self.map.write();
        let moved_keys: Vec<EdgeKey> = map
            .keys()
            .filter(|key| &key.src.primary_key >= split_key)
            .cloned()
            .collect();
        let mut moved = BTreeMap::new();
        for key in moved_keys {
            if let Some(edge) = map.remove(&key) {
                moved.insert(key, edge);
            }
        }
        moved
    }

    pub fn entries(&self) -> Vec<(EdgeKey, EdgeRef)> {
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
    use crate::types::LabelId;

    fn vid(i: i64) -> VertexId {
        VertexId::new(LabelId(1), PrimaryKey::new(vec![PropertyValue::Int(i)]))
    }

    fn edge_key(src: i64, dst: i64, gid: u64) -> EdgeKey {
        EdgeKey {
            src: vid(src),
            dst: vid(dst),
            edge_type: EdgeTypeId(3),
            gid: Gid(gid),
        }
    }

    #[test]
    fn split_follows_source_vertex() {
        let container = EdgeContainer::new();
        container.insert(edge_key(1, 2, 0), Arc::new(Edge::default()));
        container.insert(edge_key(1, 5, 1), Arc::new(Edge::default()));
        container.insert(edge_key(4, 6, 2), Arc::new(Edge::default()));

        let split_key = PrimaryKey::new(vec![PropertyValue::Int(4)]);
        let moved = container.split_off_by_src(&split_key);

        // Edge 1->5 crosses the split but stays with its source.
        assert_eq!(container.len(), 2);
        assert_eq!(moved.len(), 1);
        assert!(moved.contains_key(&edge_key(4, 6, 2)));
    }
}
