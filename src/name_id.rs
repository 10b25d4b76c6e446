//! Interning of label, property and edge-type names to compact ids.
//!
//! Single-writer, many-readers: lookups take the read lock, interning takes
//! the write lock. One mapper is shared by every shard on a node and passed
//! in at shard construction.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{EdgeTypeId, LabelId, PropertyId};

#[derive(Debug, Default)]
struct Inner {
    name_to_id: HashMap<String, u32>,
    id_to_name: HashMap<u32, String>,
    next_id: u32,
}

#[derive(Debug, Default)]
pub struct NameIdMapper {
    inner: RwLock<Inner>,
}

impl NameIdMapper {
    pub fn new() -> Arc<Self> {
        Arc::new(NameIdMapper::default())
    }

    /// Interns `name`, returning its id. Existing names keep their id.
    pub fn name_to_id(&self, name: &str) -> u32 {
        if let Some(&id) = self.inner.read().name_to_id.get(name) {
            return id;
        }
        let mut inner = self.inner.write();
        if let Some(&id) = inner.name_to_id.get(name) {
            return id;
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.name_to_id.insert(name.to_owned(), id);
        inner.id_to_name.insert(id, name.to_owned());
        id
    }

    pub fn id_to_name(&self, id: u32) -> Option<String> {
        self.inner.read().id_to_name.get(&id).cloned()
    }

    /// Seeds the table with recovered or coordinator-provided mappings.
    /// Later interns never reuse a seeded id.
    pub fn store_mapping(&self, id_to_name: HashMap<u32, String>) {
        let mut inner = self.inner.write();
        for (id, name) in id_to_name {
            inner.next_id = inner.next_id.max(id + 1);
            inner.name_to_id.insert(name.clone(), id);
            inner.id_to_name.insert(id, name);
        }
    }

    /// Dumps the current id-to-name table, for snapshots and heartbeats.
    pub fn dump(&self) -> HashMap<u32, String> {
        self.inner.read().id_to_name.clone()
    }

    pub fn name_to_label(&self, name: &str) -> LabelId {
        LabelId(self.name_to_id(name))
    }

    pub fn name_to_property(&self, name: &str) -> PropertyId {
        PropertyId(self.name_to_id(name))
    }

    pub fn name_to_edge_type(&self, name: &str) -> EdgeTypeId {
        EdgeTypeId(self.name_to_id(name))
    }
}
