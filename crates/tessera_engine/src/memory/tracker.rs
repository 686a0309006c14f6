//! Change tracking for one write scope.
//!
//! Lists and sets keep a shadow of their elements, each tagged with the
//! position it had when the write began. Replaying every mutation on the
//! shadow yields exact insertion, deletion, modification and move indices
//! at commit without diffing the before/after contents.

use crate::handle::{CollectionPtr, PathElement};
use std::collections::{BTreeSet, HashMap};
use tessera_codec::{
    ranges_from_indices, ClassKey, CodecResult, CollectionChanges, DictionaryChanges, IndexChanges,
    ObjKey, ObjectChanges, PropertyKey, RangeChanges,
};

/// How collection batches are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeEncoding {
    /// Flat index arrays.
    #[default]
    Indices,
    /// Range-compacted pairs.
    Ranges,
}

/// Identifies a collection independently of the generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CollectionAddress {
    pub(crate) class: ClassKey,
    pub(crate) key: ObjKey,
    pub(crate) property: PropertyKey,
    pub(crate) path: Vec<PathElement>,
}

impl From<&CollectionPtr> for CollectionAddress {
    fn from(ptr: &CollectionPtr) -> Self {
        Self {
            class: ptr.class,
            key: ptr.key,
            property: ptr.property,
            path: ptr.path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ListOp {
    Insert(usize),
    Erase(usize),
    Set(usize),
    Move(usize, usize),
    Clear,
}

#[derive(Debug, Clone)]
pub(crate) enum DictionaryOp {
    Set(String),
    Erase(String),
    Clear,
}

#[derive(Debug, Default)]
struct ObjectRecord {
    modified: BTreeSet<PropertyKey>,
    deleted: bool,
}

#[derive(Debug, Clone, Copy)]
struct ShadowEntry {
    origin: Option<usize>,
    modified: bool,
    moved: bool,
}

#[derive(Debug)]
struct ListRecord {
    shadow: Vec<ShadowEntry>,
    deletions: Vec<usize>,
    cleared: bool,
}

impl ListRecord {
    fn new(initial_len: usize) -> Self {
        Self {
            shadow: (0..initial_len)
                .map(|i| ShadowEntry {
                    origin: Some(i),
                    modified: false,
                    moved: false,
                })
                .collect(),
            deletions: Vec::new(),
            cleared: false,
        }
    }

    fn apply(&mut self, op: ListOp) {
        match op {
            ListOp::Insert(index) => {
                let index = index.min(self.shadow.len());
                self.shadow.insert(
                    index,
                    ShadowEntry {
                        origin: None,
                        modified: false,
                        moved: false,
                    },
                );
            }
            ListOp::Erase(index) => {
                if index < self.shadow.len() {
                    let entry = self.shadow.remove(index);
                    self.deletions.extend(entry.origin);
                }
            }
            ListOp::Set(index) => {
                if let Some(entry) = self.shadow.get_mut(index) {
                    entry.modified = true;
                }
            }
            ListOp::Move(from, to) => {
                if from < self.shadow.len() && to < self.shadow.len() && from != to {
                    let mut entry = self.shadow.remove(from);
                    entry.moved = entry.origin.is_some();
                    self.shadow.insert(to, entry);
                }
            }
            ListOp::Clear => {
                self.deletions
                    .extend(self.shadow.drain(..).filter_map(|entry| entry.origin));
                self.cleared = true;
            }
        }
    }

    /// Moved elements are reported as a deletion plus an insertion and
    /// additionally as a move pair, the way engines emit them. A moved
    /// element that was also written is a modification at both positions.
    fn finish(
        &self,
        encoding: ChangeEncoding,
        deleted: bool,
    ) -> CodecResult<Option<CollectionChanges>> {
        let mut changes = IndexChanges::default();
        let mut moves = Vec::new();

        changes.deletions = self.deletions.iter().map(|&i| i as u64).collect();
        for (index, entry) in self.shadow.iter().enumerate() {
            match entry.origin {
                None => changes.insertions.push(index as u64),
                Some(origin) if entry.moved && origin != index => {
                    changes.deletions.push(origin as u64);
                    changes.insertions.push(index as u64);
                    moves.push((origin as u64, index as u64));
                    if entry.modified {
                        changes.modifications.push(origin as u64);
                        changes.modifications_after.push(index as u64);
                    }
                }
                Some(origin) if entry.modified => {
                    changes.modifications.push(origin as u64);
                    changes.modifications_after.push(index as u64);
                }
                Some(_) => {}
            }
        }
        changes.deletions.sort_unstable();

        let empty = changes == IndexChanges::default() && !self.cleared && !deleted;
        if empty {
            return Ok(None);
        }

        let mut batch = match encoding {
            ChangeEncoding::Indices => CollectionChanges::indices(changes),
            ChangeEncoding::Ranges => CollectionChanges::ranges(RangeChanges {
                deletions: ranges_from_indices(&changes.deletions)?,
                insertions: ranges_from_indices(&changes.insertions)?,
                modifications: ranges_from_indices(&changes.modifications)?,
                modifications_after: ranges_from_indices(&changes.modifications_after)?,
            }),
        };
        batch.moves = moves;
        batch.cleared = self.cleared;
        batch.deleted = deleted;
        Ok(Some(batch))
    }
}

#[derive(Debug)]
struct DictionaryRecord {
    original: BTreeSet<String>,
    touched: BTreeSet<String>,
    cleared: bool,
}

/// Records every mutation of one write scope.
#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    objects: HashMap<(ClassKey, ObjKey), ObjectRecord>,
    lists: HashMap<CollectionAddress, ListRecord>,
    dictionaries: HashMap<CollectionAddress, DictionaryRecord>,
}

impl ChangeTracker {
    pub(crate) fn property_modified(&mut self, class: ClassKey, key: ObjKey, property: PropertyKey) {
        self.objects
            .entry((class, key))
            .or_default()
            .modified
            .insert(property);
    }

    pub(crate) fn object_deleted(&mut self, class: ClassKey, key: ObjKey) {
        self.objects.entry((class, key)).or_default().deleted = true;
    }

    pub(crate) fn is_deleted(&self, class: ClassKey, key: ObjKey) -> bool {
        self.objects
            .get(&(class, key))
            .map(|record| record.deleted)
            .unwrap_or(false)
    }

    /// Records a list or set mutation. `len_before` is the length prior to `op`.
    pub(crate) fn list(&mut self, address: CollectionAddress, len_before: usize, op: ListOp) {
        self.property_modified(address.class, address.key, address.property);
        self.lists
            .entry(address)
            .or_insert_with(|| ListRecord::new(len_before))
            .apply(op);
    }

    /// Records a dictionary mutation. `keys_before` is evaluated on first use only.
    pub(crate) fn dictionary(
        &mut self,
        address: CollectionAddress,
        keys_before: impl FnOnce() -> BTreeSet<String>,
        op: DictionaryOp,
    ) {
        self.property_modified(address.class, address.key, address.property);
        let record = self
            .dictionaries
            .entry(address)
            .or_insert_with(|| DictionaryRecord {
                original: keys_before(),
                touched: BTreeSet::new(),
                cleared: false,
            });
        match op {
            DictionaryOp::Set(key) | DictionaryOp::Erase(key) => {
                record.touched.insert(key);
            }
            DictionaryOp::Clear => record.cleared = true,
        }
    }

    pub(crate) fn object_changes(&self, class: ClassKey, key: ObjKey) -> Option<ObjectChanges> {
        let record = self.objects.get(&(class, key))?;
        if record.deleted {
            return Some(ObjectChanges {
                deleted: true,
                modified_properties: Vec::new(),
            });
        }
        if record.modified.is_empty() {
            return None;
        }
        Some(ObjectChanges {
            deleted: false,
            modified_properties: record.modified.iter().copied().collect(),
        })
    }

    pub(crate) fn collection_changes(
        &self,
        address: &CollectionAddress,
        encoding: ChangeEncoding,
    ) -> CodecResult<Option<CollectionChanges>> {
        let deleted = self.is_deleted(address.class, address.key);
        match self.lists.get(address) {
            Some(record) => record.finish(encoding, deleted),
            None if deleted => ListRecord::new(0).finish(encoding, true),
            None => Ok(None),
        }
    }

    /// `keys_now` is `None` when the dictionary no longer exists.
    pub(crate) fn dictionary_changes(
        &self,
        address: &CollectionAddress,
        keys_now: Option<BTreeSet<String>>,
    ) -> Option<DictionaryChanges> {
        let deleted = self.is_deleted(address.class, address.key);
        let Some(record) = self.dictionaries.get(address) else {
            return deleted.then(|| DictionaryChanges {
                deleted: true,
                ..DictionaryChanges::default()
            });
        };
        let now = keys_now.unwrap_or_default();
        let changes = DictionaryChanges {
            deletions: record.original.difference(&now).cloned().collect(),
            insertions: now.difference(&record.original).cloned().collect(),
            modifications: record
                .touched
                .iter()
                .filter(|key| record.original.contains(*key) && now.contains(*key))
                .cloned()
                .collect(),
            cleared: record.cleared,
            deleted,
        };
        let empty = changes.deletions.is_empty()
            && changes.insertions.is_empty()
            && changes.modifications.is_empty()
            && !changes.cleared
            && !changes.deleted;
        (!empty).then_some(changes)
    }
}
