//! Process-wide mapping from `(label, key)` to the shards responsible for
//! it.
//!
//! Ranges are kept as an ordered map from each shard's low key to its
//! replica addresses; a lookup is a lower-bound scan. Every structural
//! change bumps the version, and splits are compare-and-swap on it, so a
//! router acting on an older map loses the race instead of corrupting the
//! mapping.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::manager::transport::Address;
use crate::types::LabelId;
use crate::value::PrimaryKey;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum ShardStatus {
    ConsensusParticipant,
    Initializing,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddressAndStatus {
    pub address: Address,
    pub status: ShardStatus,
}

#[derive(Debug, Default)]
struct Inner {
    version: u64,
    shards: BTreeMap<LabelId, BTreeMap<PrimaryKey, Vec<AddressAndStatus>>>,
}

#[derive(Debug, Default)]
pub struct ShardMap {
    inner: RwLock<Inner>,
}

impl ShardMap {
    pub fn new() -> Self {
        ShardMap::default()
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Registers a label's keyspace with one initial shard covering
    /// `[min_key, ..)`.
    pub fn initialize_label(
        &self,
        label: LabelId,
        min_key: PrimaryKey,
        replicas: Vec<AddressAndStatus>,
    ) -> bool {
        let mut inner = self.inner.write();
        if inner.shards.contains_key(&label) {
            return false;
        }
        inner
            .shards
            .insert(label, BTreeMap::from([(min_key, replicas)]));
        inner.version += 1;
        true
    }

    /// The replicas responsible for `key`: the range entry with the
    /// greatest low key not exceeding it.
    pub fn get_shard_for_key(
        &self,
        label: LabelId,
        key: &PrimaryKey,
    ) -> Option<Vec<AddressAndStatus>> {
        let inner = self.inner.read();
        let ranges = inner.shards.get(&label)?;
        ranges
            .range(..=key.clone())
            .next_back()
            .map(|(_, replicas)| replicas.clone())
    }

    /// All shards overlapping `[start, end)`, with each range's low key.
    /// An unbounded `end` extends to the top of the keyspace.
    pub fn get_shards_for_range(
        &self,
        label: LabelId,
        start: &PrimaryKey,
        end: Option<&PrimaryKey>,
    ) -> Vec<(PrimaryKey, Vec<AddressAndStatus>)> {
        let inner = self.inner.read();
        let Some(ranges) = inner.shards.get(&label) else {
            return Vec::new();
        };
        let mut result = Vec::new();
        // The range owning `start` begins at or before it.
        if let Some((low, replicas)) = ranges.range(..=start.clone()).next_back() {
            result.push((low.clone(), replicas.clone()));
        }
        for (low, replicas) in ranges.range(start.clone()..).map(|(k, v)| (k.clone(), v.clone())) {
            if result.first().is_some_and(|(first, _)| *first == low) {
                continue;
            }
            if end.is_some_and(|end| &low >= end) {
                break;
            }
            result.push((low, replicas));
        }
        result
    }

    /// Splits the range owning `split_key` into two, iff `prev_version`
    /// still matches. The new right-hand range starts life with the same
    /// replicas, marked initializing.
    pub fn split_shard(&self, prev_version: u64, label: LabelId, split_key: PrimaryKey) -> bool {
        let mut inner = self.inner.write();
        if inner.version != prev_version {
            return false;
        }
        let Some(ranges) = inner.shards.get_mut(&label) else {
            return false;
        };
        if ranges.contains_key(&split_key) {
            return false;
        }
        let Some((_, replicas)) = ranges.range(..=split_key.clone()).next_back() else {
            return false;
        };
        let successors: Vec<AddressAndStatus> = replicas
            .iter()
            .map(|r| AddressAndStatus {
                address: r.address.clone(),
                status: ShardStatus::Initializing,
            })
            .collect();
        ranges.insert(split_key, successors);
        inner.version += 1;
        true
    }
}
