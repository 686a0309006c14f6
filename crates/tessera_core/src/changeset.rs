//! Translating raw engine batches into change sets.
//!
//! Engines report collection changes either as flat index arrays or as
//! range-compacted pairs. [`ChangeSetBuilder`] normalizes both into the
//! same shape. A moved element arrives as a deletion of its old position,
//! an insertion at its new one and a `(from, to)` pair; the builder keeps
//! only the pair.

use crate::error::{CoreError, CoreResult};
use std::collections::BTreeSet;
use std::ops::Range;
use tessera_codec::{
    ranges_from_indices, ChangeBatch, CodecError, CollectionChanges, DictionaryChanges,
    IndexEncoding, IndexRange,
};

/// One element moved from `from` (old position) to `to` (new position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Move {
    /// Position before the change.
    pub from: usize,
    /// Position after the change.
    pub to: usize,
}

/// Changes to a list between two generations.
///
/// Deletions and `modifications` use positions in the old list; insertions,
/// `modifications_after` and the ranges of insertions use positions in the
/// new one. Elements whose only change is a move appear in `moves` alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListChangeSet {
    /// Deleted positions, ascending.
    pub deletions: Vec<usize>,
    /// Inserted positions, ascending.
    pub insertions: Vec<usize>,
    /// Modified positions in the old list, ascending.
    pub modifications: Vec<usize>,
    /// Modified positions in the new list, ascending.
    pub modifications_after: Vec<usize>,
    /// Moved elements.
    pub moves: Vec<Move>,
    /// `deletions` compacted into ranges.
    pub deletion_ranges: Vec<Range<usize>>,
    /// `insertions` compacted into ranges.
    pub insertion_ranges: Vec<Range<usize>>,
    /// `modifications_after` compacted into ranges.
    pub change_ranges: Vec<Range<usize>>,
    /// The list was cleared.
    pub collection_was_cleared: bool,
    /// The list's parent object was deleted.
    pub collection_was_deleted: bool,
}

impl ListChangeSet {
    /// True if nothing was inserted, deleted, modified or moved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
            && self.deletions.is_empty()
            && self.modifications.is_empty()
            && self.moves.is_empty()
    }
}

/// Changes to a set. Sets have no stable positions, so only counts are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetChangeSet {
    /// Number of added elements.
    pub insertions: usize,
    /// Number of removed elements.
    pub deletions: usize,
    /// The set was cleared.
    pub collection_was_cleared: bool,
    /// The set's parent object was deleted.
    pub collection_was_deleted: bool,
}

impl SetChangeSet {
    /// True if nothing was added or removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insertions == 0 && self.deletions == 0
    }
}

/// Changes to a dictionary, by key.
///
/// `insertions`, `deletions` and `changes` are disjoint: a key appears in
/// exactly one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DictionaryChangeSet {
    /// Keys that newly appeared.
    pub insertions: Vec<String>,
    /// Keys that were removed.
    pub deletions: Vec<String>,
    /// Keys whose value changed in place.
    pub changes: Vec<String>,
    /// The dictionary was cleared.
    pub collection_was_cleared: bool,
    /// The dictionary's parent object was deleted.
    pub collection_was_deleted: bool,
}

impl DictionaryChangeSet {
    /// True if no key was inserted, deleted or changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty() && self.changes.is_empty()
    }
}

/// A change set the notification layer can deliver.
pub(crate) trait ChangeSet: Sized + Send + 'static {
    fn from_batch(batch: ChangeBatch) -> CoreResult<Self>;
    fn is_empty(&self) -> bool;
    fn is_deleted(&self) -> bool;
}

fn unexpected(expected: &str, batch: &ChangeBatch) -> CoreError {
    let found = match batch {
        ChangeBatch::Object(_) => "object",
        ChangeBatch::Collection(_) => "collection",
        ChangeBatch::Dictionary(_) => "dictionary",
    };
    CoreError::from(CodecError::decoding_failed(format!(
        "expected a {expected} change batch, got a {found} batch"
    )))
}

impl ChangeSet for ListChangeSet {
    fn from_batch(batch: ChangeBatch) -> CoreResult<Self> {
        match batch {
            ChangeBatch::Collection(changes) => ChangeSetBuilder::list(changes),
            other => Err(unexpected("collection", &other)),
        }
    }

    fn is_empty(&self) -> bool {
        ListChangeSet::is_empty(self)
    }

    fn is_deleted(&self) -> bool {
        self.collection_was_deleted
    }
}

impl ChangeSet for SetChangeSet {
    fn from_batch(batch: ChangeBatch) -> CoreResult<Self> {
        match batch {
            ChangeBatch::Collection(changes) => ChangeSetBuilder::set(changes),
            other => Err(unexpected("collection", &other)),
        }
    }

    fn is_empty(&self) -> bool {
        SetChangeSet::is_empty(self)
    }

    fn is_deleted(&self) -> bool {
        self.collection_was_deleted
    }
}

impl ChangeSet for DictionaryChangeSet {
    fn from_batch(batch: ChangeBatch) -> CoreResult<Self> {
        match batch {
            ChangeBatch::Dictionary(changes) => Ok(ChangeSetBuilder::dictionary(changes)),
            other => Err(unexpected("dictionary", &other)),
        }
    }

    fn is_empty(&self) -> bool {
        DictionaryChangeSet::is_empty(self)
    }

    fn is_deleted(&self) -> bool {
        self.collection_was_deleted
    }
}

/// Builds change sets from decoded engine batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeSetBuilder;

/// Flat index arrays, whichever encoding the engine chose.
#[derive(Default)]
struct Flat {
    deletions: BTreeSet<usize>,
    insertions: BTreeSet<usize>,
    modifications: BTreeSet<usize>,
    modifications_after: BTreeSet<usize>,
}

/// Upper bound on the positions a range-encoded batch may expand to.
const MAX_EXPANDED_POSITIONS: u64 = 1 << 24;

fn malformed(message: String) -> CoreError {
    CoreError::from(CodecError::decoding_failed(message))
}

fn position(value: u64) -> CoreResult<usize> {
    usize::try_from(value)
        .ok()
        .filter(|&position| position < usize::MAX)
        .ok_or_else(|| malformed(format!("position {value} is out of range")))
}

fn collect(indices: &[u64]) -> CoreResult<BTreeSet<usize>> {
    indices.iter().map(|&index| position(index)).collect()
}

fn expand(ranges: &[IndexRange], budget: &mut u64) -> CoreResult<BTreeSet<usize>> {
    let mut out = BTreeSet::new();
    for range in ranges {
        if range.from > range.to {
            return Err(malformed(format!(
                "range [{}, {}) ends before it starts",
                range.from, range.to
            )));
        }
        *budget = budget.checked_sub(range.to - range.from).ok_or_else(|| {
            malformed(format!(
                "ranges cover more than {MAX_EXPANDED_POSITIONS} positions"
            ))
        })?;
        for index in range.indices() {
            out.insert(position(index)?);
        }
    }
    Ok(out)
}

fn compact(indices: &[usize]) -> CoreResult<Vec<Range<usize>>> {
    let raw: Vec<u64> = indices.iter().map(|&i| i as u64).collect();
    Ok(ranges_from_indices(&raw)?
        .into_iter()
        .map(|range| range.from as usize..range.to as usize)
        .collect())
}

impl Flat {
    fn from_encoding(encoding: &IndexEncoding) -> CoreResult<Self> {
        match encoding {
            IndexEncoding::Indices(changes) => Ok(Self {
                deletions: collect(&changes.deletions)?,
                insertions: collect(&changes.insertions)?,
                modifications: collect(&changes.modifications)?,
                modifications_after: collect(&changes.modifications_after)?,
            }),
            IndexEncoding::Ranges(changes) => {
                let mut budget = MAX_EXPANDED_POSITIONS;
                Ok(Self {
                    deletions: expand(&changes.deletions, &mut budget)?,
                    insertions: expand(&changes.insertions, &mut budget)?,
                    modifications: expand(&changes.modifications, &mut budget)?,
                    modifications_after: expand(&changes.modifications_after, &mut budget)?,
                })
            }
        }
    }
}

impl ChangeSetBuilder {
    /// Builds a list change set.
    ///
    /// Positions explained by a move are removed from deletions and
    /// insertions; the move itself is kept once.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] wrapping [`CodecError::DecodingFailed`]
    /// for a position that does not fit the platform, for a range that ends
    /// before it starts, and for ranges that expand to more than 2^24
    /// positions.
    pub fn list(changes: CollectionChanges) -> CoreResult<ListChangeSet> {
        let mut flat = Flat::from_encoding(&changes.changes)?;
        let mut moves = changes
            .moves
            .iter()
            .map(|&(from, to)| {
                Ok(Move {
                    from: position(from)?,
                    to: position(to)?,
                })
            })
            .collect::<CoreResult<Vec<Move>>>()?;
        moves.sort_unstable();
        moves.dedup();
        for Move { from, to } in &moves {
            flat.deletions.remove(from);
            flat.insertions.remove(to);
        }

        let deletions: Vec<usize> = flat.deletions.into_iter().collect();
        let insertions: Vec<usize> = flat.insertions.into_iter().collect();
        let modifications_after: Vec<usize> = flat.modifications_after.into_iter().collect();
        Ok(ListChangeSet {
            deletion_ranges: compact(&deletions)?,
            insertion_ranges: compact(&insertions)?,
            change_ranges: compact(&modifications_after)?,
            deletions,
            insertions,
            modifications: flat.modifications.into_iter().collect(),
            modifications_after,
            moves,
            collection_was_cleared: changes.cleared,
            collection_was_deleted: changes.deleted,
        })
    }

    /// Builds a set change set.
    ///
    /// Sets are unordered, so a move is neither an insertion nor a deletion.
    ///
    /// # Errors
    ///
    /// Fails on the same malformed input as [`ChangeSetBuilder::list`].
    pub fn set(changes: CollectionChanges) -> CoreResult<SetChangeSet> {
        let list = Self::list(changes)?;
        Ok(SetChangeSet {
            insertions: list.insertions.len(),
            deletions: list.deletions.len(),
            collection_was_cleared: list.collection_was_cleared,
            collection_was_deleted: list.collection_was_deleted,
        })
    }

    /// Builds a dictionary change set.
    ///
    /// A key reported in more than one category is kept in the first of
    /// deletions, insertions and changes.
    #[must_use]
    pub fn dictionary(changes: DictionaryChanges) -> DictionaryChangeSet {
        let deletions: BTreeSet<String> = changes.deletions.into_iter().collect();
        let insertions: BTreeSet<String> = changes
            .insertions
            .into_iter()
            .filter(|key| !deletions.contains(key))
            .collect();
        let modified: BTreeSet<String> = changes
            .modifications
            .into_iter()
            .filter(|key| !deletions.contains(key) && !insertions.contains(key))
            .collect();
        DictionaryChangeSet {
            insertions: insertions.into_iter().collect(),
            deletions: deletions.into_iter().collect(),
            changes: modified.into_iter().collect(),
            collection_was_cleared: changes.cleared,
            collection_was_deleted: changes.deleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_codec::{IndexChanges, RangeChanges};

    fn moved_two_to_five_indices() -> CollectionChanges {
        let mut changes = CollectionChanges::indices(IndexChanges {
            deletions: vec![2],
            insertions: vec![5],
            ..IndexChanges::default()
        });
        changes.moves.push((2, 5));
        changes
    }

    fn moved_two_to_five_ranges() -> CollectionChanges {
        let mut changes = CollectionChanges::ranges(RangeChanges {
            deletions: vec![IndexRange::new(2, 3)],
            insertions: vec![IndexRange::new(5, 6)],
            ..RangeChanges::default()
        });
        changes.moves.push((2, 5));
        changes
    }

    #[test]
    fn move_is_not_an_insertion_or_deletion() {
        for changes in [moved_two_to_five_indices(), moved_two_to_five_ranges()] {
            let set = ChangeSetBuilder::list(changes).unwrap();
            assert!(set.insertions.is_empty());
            assert!(set.deletions.is_empty());
            assert_eq!(set.moves, vec![Move { from: 2, to: 5 }]);
            assert!(!set.is_empty());
        }
    }

    #[test]
    fn encodings_normalize_to_the_same_shape() {
        let indices = ChangeSetBuilder::list(CollectionChanges::indices(IndexChanges {
            deletions: vec![0, 1, 4],
            insertions: vec![2, 3],
            modifications: vec![6],
            modifications_after: vec![5],
        })).unwrap();
        let ranges = ChangeSetBuilder::list(CollectionChanges::ranges(RangeChanges {
            deletions: vec![IndexRange::new(0, 2), IndexRange::new(4, 5)],
            insertions: vec![IndexRange::new(2, 4)],
            modifications: vec![IndexRange::new(6, 7)],
            modifications_after: vec![IndexRange::new(5, 6)],
        })).unwrap();
        assert_eq!(indices, ranges);
        assert_eq!(indices.deletion_ranges, vec![0..2, 4..5]);
        assert_eq!(indices.insertion_ranges, vec![2..4]);
        assert_eq!(indices.change_ranges, vec![5..6]);
    }

    #[test]
    fn empty_batch_is_empty() {
        let set = ChangeSetBuilder::list(CollectionChanges::indices(IndexChanges::default())).unwrap();
        assert!(set.is_empty());
        assert!(set.deletion_ranges.is_empty());
    }

    #[test]
    fn modification_only_is_not_empty() {
        let set = ChangeSetBuilder::list(CollectionChanges::indices(IndexChanges {
            modifications: vec![1],
            modifications_after: vec![1],
            ..IndexChanges::default()
        })).unwrap();
        assert!(!set.is_empty());
    }

    #[test]
    fn set_counts_ignore_moves() {
        let set = ChangeSetBuilder::set(moved_two_to_five_ranges()).unwrap();
        assert_eq!(set, SetChangeSet::default());
        assert!(set.is_empty());
    }

    #[test]
    fn dictionary_categories_are_disjoint() {
        let set = ChangeSetBuilder::dictionary(DictionaryChanges {
            deletions: vec!["gone".into()],
            insertions: vec!["new".into(), "gone".into()],
            modifications: vec!["a".into(), "new".into()],
            cleared: false,
            deleted: false,
        });
        assert_eq!(set.deletions, vec!["gone".to_string()]);
        assert_eq!(set.insertions, vec!["new".to_string()]);
        assert_eq!(set.changes, vec!["a".to_string()]);
    }

    #[test]
    fn updated_key_is_a_change() {
        let set = ChangeSetBuilder::dictionary(DictionaryChanges {
            modifications: vec!["a".into()],
            ..DictionaryChanges::default()
        });
        assert_eq!(set.changes, vec!["a".to_string()]);
        assert!(set.insertions.is_empty());
        assert!(set.deletions.is_empty());
    }

    #[test]
    fn unrepresentable_positions_are_rejected() {
        let last = CollectionChanges::indices(IndexChanges {
            insertions: vec![u64::MAX],
            ..IndexChanges::default()
        });
        let mut moved = CollectionChanges::indices(IndexChanges::default());
        moved.moves.push((0, u64::MAX));
        for changes in [last, moved] {
            let err = ChangeSetBuilder::list(changes).unwrap_err();
            assert!(matches!(err, CoreError::Codec(CodecError::DecodingFailed { .. })));
        }
    }

    #[test]
    fn reversed_range_is_rejected() {
        let changes = CollectionChanges::ranges(RangeChanges {
            deletions: vec![IndexRange::new(5, 2)],
            ..RangeChanges::default()
        });
        let err = ChangeSetBuilder::set(changes).unwrap_err();
        assert!(matches!(err, CoreError::Codec(CodecError::DecodingFailed { .. })));
    }

    #[test]
    fn oversized_ranges_are_rejected_before_expansion() {
        let changes = CollectionChanges::ranges(RangeChanges {
            insertions: vec![IndexRange::new(0, u64::MAX)],
            ..RangeChanges::default()
        });
        assert!(ChangeSetBuilder::list(changes).is_err());

        let half = MAX_EXPANDED_POSITIONS / 2;
        let split = CollectionChanges::ranges(RangeChanges {
            deletions: vec![IndexRange::new(0, half)],
            insertions: vec![IndexRange::new(0, half + 1)],
            ..RangeChanges::default()
        });
        assert!(ChangeSetBuilder::list(split).is_err());
    }

    #[test]
    fn wrong_batch_kind_is_a_codec_error() {
        let batch = ChangeBatch::Dictionary(DictionaryChanges::default());
        let err = <ListChangeSet as ChangeSet>::from_batch(batch).unwrap_err();
        assert!(matches!(err, CoreError::Codec(_)));
    }
}
