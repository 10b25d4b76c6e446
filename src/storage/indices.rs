//! Label and label-property indexes.
//!
//! Entries are ordered sets keyed by `(label, …, primary key, creating
//! transaction)` carrying creation/expiration stamps. Maintenance is
//! synchronous with the mutating operation: the transaction records every
//! entry it touched so commit can stamp them with the commit HLC and abort
//! can unwind them. Readers filter entries by their snapshot timestamps and
//! then confirm against the vertex itself, so an entry is only ever a hint.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use parking_lot::RwLock;

use crate::hlc::Hlc;
use crate::types::{LabelId, PropertyId, TransactionId};
use crate::value::{OrderedValue, PrimaryKey, PropertyValue};

/// One index entry's visibility stamps.
///
/// `created_ts`/`expired_ts` are set when the owning transaction commits;
/// until then the transaction id alone makes the entry visible to its
/// creator.
#[derive(Clone, Debug, Default)]
pub(crate) struct EntryMeta {
    created_ts: Option<Hlc>,
    expired_tx: Option<TransactionId>,
    expired_ts: Option<Hlc>,
}

impl EntryMeta {
    /// Entry-level snapshot filter. `reader_start` orders against commit
    /// stamps: anything committed before the reader started is visible,
    /// which is exactly the HLC relation because commits are monotonic.
    fn visible_to(&self, created_tx: TransactionId, reader: TransactionId, reader_start: Hlc) -> bool {
        let created_visible = created_tx == reader
            || self.created_ts.is_some_and(|ts| ts < reader_start);
        if !created_visible {
            return false;
        }
        let expired_for_reader = self.expired_tx == Some(reader)
            || self.expired_ts.is_some_and(|ts| ts < reader_start);
        !expired_for_reader
    }
}

/// Index maintenance recorded on the transaction, replayed at commit
/// (stamping) or abort (unwinding).
#[derive(Clone, Debug)]
pub enum IndexOp {
    LabelCreated {
        label: LabelId,
        pk: PrimaryKey,
    },
    LabelExpired {
        label: LabelId,
        pk: PrimaryKey,
    },
    PropertyCreated {
        label: LabelId,
        property: PropertyId,
        value: PropertyValue,
        pk: PrimaryKey,
    },
    PropertyExpired {
        label: LabelId,
        property: PropertyId,
        value: PropertyValue,
        pk: PrimaryKey,
    },
}

impl IndexOp {
    /// Primary key of the vertex the op concerns; splits partition by it.
    pub(crate) fn pk(&self) -> &PrimaryKey {
        match self {
            IndexOp::LabelCreated { pk, .. }
            | IndexOp::LabelExpired { pk, .. }
            | IndexOp::PropertyCreated { pk, .. }
            | IndexOp::PropertyExpired { pk, .. } => pk,
        }
    }
}

pub(crate) type LabelKey = (LabelId, PrimaryKey, TransactionId);
pub(crate) type PropKey = (LabelId, PropertyId, OrderedValue, PrimaryKey, TransactionId);

/// Ordered set of `(label, vertex)` entries.
#[derive(Debug, Default)]
pub struct LabelIndex {
    entries: RwLock<BTreeMap<LabelKey, EntryMeta>>,
    indexed: RwLock<BTreeSet<LabelId>>,
}

impl LabelIndex {
    pub fn is_indexed(&self, label: LabelId) -> bool {
        self.indexed.read().contains(&label)
    }

    /// Registers the index and seeds it with already-visible vertices, each
    /// stamped committed at `ts`.
    pub fn create(&self, label: LabelId, existing: Vec<PrimaryKey>, ts: Hlc) -> bool {
        if !self.indexed.write().insert(label) {
            return false;
        }
        let mut entries = self.entries.write();
        for pk in existing {
            entries.insert(
                (label, pk, TransactionId(0)),
                EntryMeta {
                    created_ts: Some(ts),
                    ..EntryMeta::default()
                },
            );
        }
        true
    }

    pub fn drop_index(&self, label: LabelId) -> bool {
        if !self.indexed.write().remove(&label) {
            return false;
        }
        let mut entries = self.entries.write();
        entries.retain(|(l, _, _), _| *l != label);
        true
    }

    pub fn list(&self) -> Vec<LabelId> {
        self.indexed.read().iter().copied().collect()
    }

    pub fn insert_entry(&self, label: LabelId, pk: PrimaryKey, tx: TransactionId) {
        if !self.is_indexed(label) {
            return;
        }
        self.entries
            .write()
            .insert((label, pk, tx), EntryMeta::default());
    }

    /// Leaves the entry in place and marks its expiration so concurrent
    /// snapshot readers still observe it.
    pub fn expire_entries(&self, label: LabelId, pk: &PrimaryKey, tx: TransactionId) {
        if !self.is_indexed(label) {
            return;
        }
        let mut entries = self.entries.write();
        for (key, meta) in entries.range_mut(label_pk_range(label, pk)) {
            debug_assert_eq!(&key.1, pk);
            if meta.expired_tx.is_none() && meta.expired_ts.is_none() {
                meta.expired_tx = Some(tx);
            }
        }
    }

    pub(crate) fn stamp_created(&self, label: LabelId, pk: &PrimaryKey, tx: TransactionId, ts: Hlc) {
        if let Some(meta) = self.entries.write().get_mut(&(label, pk.clone(), tx)) {
            meta.created_ts = Some(ts);
        }
    }

    pub(crate) fn stamp_expired(&self, label: LabelId, pk: &PrimaryKey, tx: TransactionId, ts: Hlc) {
        let mut entries = self.entries.write();
        for (_, meta) in entries.range_mut(label_pk_range(label, pk)) {
            if meta.expired_tx == Some(tx) {
                meta.expired_ts = Some(ts);
            }
        }
    }

    pub(crate) fn unwind_created(&self, label: LabelId, pk: &PrimaryKey, tx: TransactionId) {
        self.entries.write().remove(&(label, pk.clone(), tx));
    }

    pub(crate) fn unwind_expired(&self, label: LabelId, pk: &PrimaryKey, tx: TransactionId) {
        let mut entries = self.entries.write();
        for (_, meta) in entries.range_mut(label_pk_range(label, pk)) {
            if meta.expired_tx == Some(tx) && meta.expired_ts.is_none() {
                meta.expired_tx = None;
            }
        }
    }

    /// Next primary key after `after` with an entry passing the reader's
    /// snapshot filter. Duplicate generations of one vertex collapse to one
    /// result because iteration is keyed by primary key first.
    pub fn next_visible(
        &self,
        label: LabelId,
        after: Option<&PrimaryKey>,
        reader: TransactionId,
        reader_start: Hlc,
    ) -> Option<PrimaryKey> {
        let entries = self.entries.read();
        let lower = match after {
            None => Bound::Included((label, PrimaryKey::new(vec![]), TransactionId(0))),
            Some(pk) => Bound::Excluded((label, pk.clone(), TransactionId(u64::MAX))),
        };
        let upper = Bound::Excluded((LabelId(label.0 + 1), PrimaryKey::new(vec![]), TransactionId(0)));
        let mut last: Option<&PrimaryKey> = None;
        for ((_, pk, created_tx), meta) in entries.range((lower, upper)) {
            if last == Some(pk) {
                continue;
            }
            last = Some(pk);
            if meta.visible_to(*created_tx, reader, reader_start) {
                return Some(pk.clone());
            }
        }
        None
    }

    /// Over-estimate of vertices carrying `label`.
    pub fn approximate_count(&self, label: LabelId) -> usize {
        self.entries
            .read()
            .range(label_range(label))
            .count()
    }

    /// Drops entries expired below the GC watermark timestamp.
    pub fn vacuum(&self, watermark: Hlc) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, meta| !meta.expired_ts.is_some_and(|ts| ts < watermark));
        before - entries.len()
    }

    /// Removes every entry of a physically deleted vertex.
    pub(crate) fn remove_pk(&self, pk: &PrimaryKey) {
        self.entries.write().retain(|(_, entry_pk, _), _| entry_pk != pk);
    }

    /// Extracts all entries with `pk >= split_key` for the split successor.
    pub(crate) fn split_off(&self, split_key: &PrimaryKey) -> BTreeMap<LabelKey, EntryMeta> {
        let mut entries = self.entries.write();
        let moved_keys: Vec<LabelKey> = entries
            .keys()
            .filter(|(_, pk, _)| pk >= split_key)
            .cloned()
            .collect();
        let mut moved = BTreeMap::new();
        for key in moved_keys {
            if let Some(meta) = entries.remove(&key) {
                moved.insert(key, meta);
            }
        }
        moved
    }

    pub(crate) fn adopt(&self, entries: BTreeMap<LabelKey, EntryMeta>, indexed: Vec<LabelId>) {
        *self.indexed.write() = indexed.into_iter().collect();
        *self.entries.write() = entries;
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn label_range(label: LabelId) -> (Bound<LabelKey>, Bound<LabelKey>) {
    (
        Bound::Included((label, PrimaryKey::new(vec![]), TransactionId(0))),
        Bound::Excluded((LabelId(label.0 + 1), PrimaryKey::new(vec![]), TransactionId(0))),
    )
}

fn label_pk_range(label: LabelId, pk: &PrimaryKey) -> (Bound<LabelKey>, Bound<LabelKey>) {
    (
        Bound::Included((label, pk.clone(), TransactionId(0))),
        Bound::Included((label, pk.clone(), TransactionId(u64::MAX))),
    )
}

/// Ordered set of `(label, property, value, vertex)` entries. Range scans
/// lean on the fixed cross-type value order.
#[derive(Debug, Default)]
pub struct LabelPropertyIndex {
    entries: RwLock<BTreeMap<PropKey, EntryMeta>>,
    indexed: RwLock<BTreeSet<(LabelId, PropertyId)>>,
}

impl LabelPropertyIndex {
    pub fn is_indexed(&self, label: LabelId, property: PropertyId) -> bool {
        self.indexed.read().contains(&(label, property))
    }

    pub fn create(
        &self,
        label: LabelId,
        property: PropertyId,
        existing: Vec<(PrimaryKey, PropertyValue)>,
        ts: Hlc,
    ) -> bool {
        if !self.indexed.write().insert((label, property)) {
            return false;
        }
        let mut entries = self.entries.write();
        for (pk, value) in existing {
            entries.insert(
                (label, property, OrderedValue(value), pk, TransactionId(0)),
                EntryMeta {
                    created_ts: Some(ts),
                    ..EntryMeta::default()
                },
            );
        }
        true
    }

    pub fn drop_index(&self, label: LabelId, property: PropertyId) -> bool {
        if !self.indexed.write().remove(&(label, property)) {
            return false;
        }
        self.entries
            .write()
            .retain(|(l, p, _, _, _), _| !(*l == label && *p == property));
        true
    }

    pub fn list(&self) -> Vec<(LabelId, PropertyId)> {
        self.indexed.read().iter().copied().collect()
    }

    pub fn insert_entry(
        &self,
        label: LabelId,
        property: PropertyId,
        value: PropertyValue,
        pk: PrimaryKey,
        tx: TransactionId,
    ) {
        if !self.is_indexed(label, property) {
            return;
        }
        self.entries.write().insert(
            (label, property, OrderedValue(value), pk, tx),
            EntryMeta::default(),
        );
    }

    pub fn expire_entry(
        &self,
        label: LabelId,
        property: PropertyId,
        value: &PropertyValue,
        pk: &PrimaryKey,
        tx: TransactionId,
    ) {
        if !self.is_indexed(label, property) {
            return;
        }
        let mut entries = self.entries.write();
        for (key, meta) in entries.range_mut(value_pk_range(label, property, value, pk)) {
            debug_assert_eq!(&key.3, pk);
            if meta.expired_tx.is_none() && meta.expired_ts.is_none() {
                meta.expired_tx = Some(tx);
            }
        }
    }

    pub(crate) fn stamp_created(
        &self,
        label: LabelId,
        property: PropertyId,
        value: &PropertyValue,
        pk: &PrimaryKey,
        tx: TransactionId,
        ts: Hlc,
    ) {
        let key = (label, property, OrderedValue(value.clone()), pk.clone(), tx);
        if let Some(meta) = self.entries.write().get_mut(&key) {
            meta.created_ts = Some(ts);
        }
    }

    pub(crate) fn stamp_expired(
        &self,
        label: LabelId,
        property: PropertyId,
        value: &PropertyValue,
        pk: &PrimaryKey,
        tx: TransactionId,
        ts: Hlc,
    ) {
        let mut entries = self.entries.write();
        for (_, meta) in entries.range_mut(value_pk_range(label, property, value, pk)) {
            if meta.expired_tx == Some(tx) {
                meta.expired_ts = Some(ts);
            }
        }
    }

    pub(crate) fn unwind_created(
        &self,
        label: LabelId,
        property: PropertyId,
        value: &PropertyValue,
        pk: &PrimaryKey,
        tx: TransactionId,
    ) {
        let key = (label, property, OrderedValue(value.clone()), pk.clone(), tx);
        self.entries.write().remove(&key);
    }

    pub(crate) fn unwind_expired(
        &self,
        label: LabelId,
        property: PropertyId,
        value: &PropertyValue,
        pk: &PrimaryKey,
        tx: TransactionId,
    ) {
        let mut entries = self.entries.write();
        for (_, meta) in entries.range_mut(value_pk_range(label, property, value, pk)) {
            if meta.expired_tx == Some(tx) && meta.expired_ts.is_none() {
                meta.expired_tx = None;
            }
        }
    }

    /// Next `(value, primary key)` after `after` inside the value bounds
    /// that passes the reader's snapshot filter.
    pub fn next_visible(
        &self,
        label: LabelId,
        property: PropertyId,
        lower: Bound<&PropertyValue>,
        upper: Bound<&PropertyValue>,
        after: Option<&(PropertyValue, PrimaryKey)>,
        reader: TransactionId,
        reader_start: Hlc,
    ) -> Option<(PropertyValue, PrimaryKey)> {
        let entries = self.entries.read();
        let scan_lower = match after {
            Some((value, pk)) => Bound::Excluded((
                label,
                property,
                OrderedValue(value.clone()),
                pk.clone(),
                TransactionId(u64::MAX),
            )),
            None => match &lower {
                Bound::Included(v) | Bound::Excluded(v) => Bound::Included((
                    label,
                    property,
                    OrderedValue((*v).clone()),
                    PrimaryKey::new(vec![]),
                    TransactionId(0),
                )),
                Bound::Unbounded => Bound::Included((
                    label,
                    property,
                    OrderedValue(PropertyValue::Null),
                    PrimaryKey::new(vec![]),
                    TransactionId(0),
                )),
            },
        };
        let mut last: Option<(&OrderedValue, &PrimaryKey)> = None;
        for ((l, p, value, pk, created_tx), meta) in
            entries.range((scan_lower, Bound::Unbounded))
        {
            if *l != label || *p != property {
                return None;
            }
            if !within_lower(&value.0, &lower) {
                continue;
            }
            if !within_upper(&value.0, &upper) {
                return None;
            }
            if last == Some((value, pk)) {
                continue;
            }
            last = Some((value, pk));
            if meta.visible_to(*created_tx, reader, reader_start) {
                return Some((value.0.clone(), pk.clone()));
            }
        }
        None
    }

    pub fn approximate_count(&self, label: LabelId, property: PropertyId) -> usize {
        self.entries
            .read()
            .keys()
            .filter(|(l, p, _, _, _)| *l == label && *p == property)
            .count()
    }

    pub fn approximate_count_in_range(
        &self,
        label: LabelId,
        property: PropertyId,
        lower: Bound<&PropertyValue>,
        upper: Bound<&PropertyValue>,
    ) -> usize {
        self.entries
            .read()
            .keys()
            .filter(|(l, p, value, _, _)| {
                *l == label
                    && *p == property
                    && within_lower(&value.0, &lower)
                    && within_upper(&value.0, &upper)
            })
            .count()
    }

    pub fn vacuum(&self, watermark: Hlc) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, meta| !meta.expired_ts.is_some_and(|ts| ts < watermark));
        before - entries.len()
    }

    pub(crate) fn remove_pk(&self, pk: &PrimaryKey) {
        self.entries
            .write()
            .retain(|(_, _, _, entry_pk, _), _| entry_pk != pk);
    }

    pub(crate) fn split_off(&self, split_key: &PrimaryKey) -> BTreeMap<PropKey, EntryMeta> {
        let mut entries = self.entries.write();
        let moved_keys: Vec<PropKey> = entries
            .keys()
            .filter(|(_, _, _, pk, _)| pk >= split_key)
            .cloned()
            .collect();
        let mut moved = BTreeMap::new();
        for key in moved_keys {
            if let Some(meta) = entries.remove(&key) {
                moved.insert(key, meta);
            }
        }
        moved
    }

    pub(crate) fn adopt(
        &self,
        entries: BTreeMap<PropKey, EntryMeta>,
        indexed: Vec<(LabelId, PropertyId)>,
    ) {
        *self.indexed.write() = indexed.into_iter().collect();
        *self.entries.write() = entries;
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn value_pk_range(
    label: LabelId,
    property: PropertyId,
    value: &PropertyValue,
    pk: &PrimaryKey,
) -> (Bound<PropKey>, Bound<PropKey>) {
    (
        Bound::Included((
            label,
            property,
            OrderedValue(value.clone()),
            pk.clone(),
            TransactionId(0),
        )),
        Bound::Included((
            label,
            property,
            OrderedValue(value.clone()),
            pk.clone(),
            TransactionId(u64::MAX),
        )),
    )
}

fn within_lower(value: &PropertyValue, bound: &Bound<&PropertyValue>) -> bool {
    match bound {
        Bound::Unbounded => true,
        Bound::Included(b) => value.total_cmp(b) != std::cmp::Ordering::Less,
        Bound::Excluded(b) => value.total_cmp(b) == std::cmp::Ordering::Greater,
    }
}

fn within_upper(value: &PropertyValue, bound: &Bound<&PropertyValue>) -> bool {
    match bound {
        Bound::Unbounded => true,
        Bound::Included(b) => value.total_cmp(b) != std::cmp::Ordering::Greater,
        Bound::Excluded(b) => value.total_cmp(b) == std::cmp::Ordering::Less,
    }
}

/// Existing index definitions, returned by the listing interface.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndicesInfo {
    pub label: Vec<LabelId>,
    pub label_property: Vec<(LabelId, PropertyId)>,
}

/// Both secondary indexes plus the commit/abort bookkeeping entry points.
#[derive(Debug, Default)]
pub struct Indices {
    pub label: LabelIndex,
    pub label_property: LabelPropertyIndex,
}

impl Indices {
    pub fn info(&self) -> IndicesInfo {
        IndicesInfo {
            label: self.label.list(),
            label_property: self.label_property.list(),
        }
    }

    /// Installs the commit timestamp on every entry the transaction
    /// touched.
    pub(crate) fn stamp(&self, ops: &[IndexOp], tx: TransactionId, ts: Hlc) {
        for op in ops {
            match op {
                IndexOp::LabelCreated { label, pk } => {
                    self.label.stamp_created(*label, pk, tx, ts)
                }
                IndexOp::LabelExpired { label, pk } => {
                    self.label.stamp_expired(*label, pk, tx, ts)
                }
                IndexOp::PropertyCreated {
                    label,
                    property,
                    value,
                    pk,
                } => self
                    .label_property
                    .stamp_created(*label, *property, value, pk, tx, ts),
                IndexOp::PropertyExpired {
                    label,
                    property,
                    value,
                    pk,
                } => self
                    .label_property
                    .stamp_expired(*label, *property, value, pk, tx, ts),
            }
        }
    }

    /// Reverses the transaction's index maintenance on abort.
    pub(crate) fn unwind(&self, ops: &[IndexOp], tx: TransactionId) {
        for op in ops.iter().rev() {
            match op {
                IndexOp::LabelCreated { label, pk } => {
                    self.label.unwind_created(*label, pk, tx)
                }
                IndexOp::LabelExpired { label, pk } => {
                    self.label.unwind_expired(*label, pk, tx)
                }
                IndexOp::PropertyCreated {
                    label,
                    property,
                    value,
                    pk,
                } => self
                    .label_property
                    .unwind_created(*label, *property, value, pk, tx),
                IndexOp::PropertyExpired {
                    label,
                    property,
                    value,
                    pk,
                } => self
                    .label_property
                    .unwind_expired(*label, *property, value, pk, tx),
            }
        }
    }

    pub(crate) fn vacuum(&self, watermark: Hlc) -> usize {
        self.label.vacuum(watermark) + self.label_property.vacuum(watermark)
    }

    pub(crate) fn remove_pk(&self, pk: &PrimaryKey) {
        self.label.remove_pk(pk);
        self.label_property.remove_pk(pk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(i: i64) -> PrimaryKey {
        PrimaryKey::new(vec![PropertyValue::Int(i)])
    }

    #[test]
    fn uncommitted_entries_visible_only_to_creator() {
        let index = LabelIndex::default();
        index.create(LabelId(1), vec![], Hlc::new(1, 1));
        index.insert_entry(LabelId(1), pk(10), TransactionId(5));

        let creator = index.next_visible(LabelId(1), None, TransactionId(5), Hlc::new(1, 5));
        assert_eq!(creator, Some(pk(10)));
        let stranger = index.next_visible(LabelId(1), None, TransactionId(9), Hlc::new(1, 9));
        assert_eq!(stranger, None);
    }

    #[test]
    fn commit_stamp_opens_entry_to_later_readers() {
        let index = LabelIndex::default();
        index.create(LabelId(1), vec![], Hlc::new(1, 1));
        index.insert_entry(LabelId(1), pk(10), TransactionId(5));
        index.stamp_created(LabelId(1), &pk(10), TransactionId(5), Hlc::new(2, 6));

        // Reader that started before the commit never sees it.
        let early = index.next_visible(LabelId(1), None, TransactionId(4), Hlc::new(1, 4));
        assert_eq!(early, None);
        let late = index.next_visible(LabelId(1), None, TransactionId(9), Hlc::new(3, 9));
        assert_eq!(late, Some(pk(10)));
    }

    #[test]
    fn expired_entries_stay_visible_to_old_snapshots() {
        let index = LabelIndex::default();
        index.create(LabelId(1), vec![pk(10)], Hlc::new(1, 1));
        index.expire_entries(LabelId(1), &pk(10), TransactionId(7));
        index.stamp_expired(LabelId(1), &pk(10), TransactionId(7), Hlc::new(5, 7));

        let old_reader = index.next_visible(LabelId(1), None, TransactionId(3), Hlc::new(2, 3));
        assert_eq!(old_reader, Some(pk(10)));
        let new_reader = index.next_visible(LabelId(1), None, TransactionId(9), Hlc::new(6, 9));
        assert_eq!(new_reader, None);
    }

    #[test]
    fn property_range_scan_respects_bounds() {
        let index = LabelPropertyIndex::default();
        index.create(LabelId(1), PropertyId(2), vec![], Hlc::new(1, 1));
        for (i, age) in [(1, 10), (2, 20), (3, 30)] {
            index.insert_entry(
                LabelId(1),
                PropertyId(2),
                PropertyValue::Int(age),
                pk(i),
                TransactionId(5),
            );
            index.stamp_created(
                LabelId(1),
                PropertyId(2),
                &PropertyValue::Int(age),
                &pk(i),
                TransactionId(5),
                Hlc::new(2, 6),
            );
        }
        let lo = PropertyValue::Int(15);
        let hi = PropertyValue::Int(30);
        let hit = index.next_visible(
            LabelId(1),
            PropertyId(2),
            Bound::Included(&lo),
            Bound::Excluded(&hi),
            None,
            TransactionId(9),
            Hlc::new(3, 9),
        );
        assert_eq!(hit, Some((PropertyValue::Int(20), pk(2))));
        let next = index.next_visible(
            LabelId(1),
            PropertyId(2),
            Bound::Included(&lo),
            Bound::Excluded(&hi),
            hit.as_ref(),
            TransactionId(9),
            Hlc::new(3, 9),
        );
        assert_eq!(next, None);
    }

    #[test]
    fn abort_unwinds_entries() {
        let index = LabelIndex::default();
        index.create(LabelId(1), vec![pk(1)], Hlc::new(1, 1));
        index.insert_entry(LabelId(1), pk(2), TransactionId(5));
        index.expire_entries(LabelId(1), &pk(1), TransactionId(5));

        let indices = Indices::default();
        // Standalone exercise of the unwind paths.
        index.unwind_created(LabelId(1), &pk(2), TransactionId(5));
        index.unwind_expired(LabelId(1), &pk(1), TransactionId(5));
        drop(indices);

        let reader = index.next_visible(LabelId(1), None, TransactionId(9), Hlc::new(9, 9));
        assert_eq!(reader, Some(pk(1)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn vacuum_drops_entries_below_watermark() {
        let index = LabelIndex::default();
        index.create(LabelId(1), vec![pk(1), pk(2)], Hlc::new(1, 1));
        index.expire_entries(LabelId(1), &pk(1), TransactionId(7));
        index.stamp_expired(LabelId(1), &pk(1), TransactionId(7), Hlc::new(5, 7));
        assert_eq!(index.vacuum(Hlc::new(6, 0)), 1);
        assert_eq!(index.len(), 1);
    }
}
