//! Change set translation from both raw encodings.

use proptest::prelude::*;
use std::collections::BTreeSet;
use tessera_codec::{CodecError, CollectionChanges, IndexChanges, IndexRange, RangeChanges};
use tessera_core::{ChangeSetBuilder, CoreError, Move};
use tessera_testkit::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn encodings_build_the_same_list_change_set(
        (indices, ranges) in change_batch_pair_strategy(64)
    ) {
        let from_indices = ChangeSetBuilder::list(indices).unwrap();
        let from_ranges = ChangeSetBuilder::list(ranges).unwrap();
        prop_assert_eq!(from_indices, from_ranges);
    }

    #[test]
    fn encodings_build_the_same_set_counts(
        (indices, ranges) in change_batch_pair_strategy(64)
    ) {
        prop_assert_eq!(ChangeSetBuilder::set(indices).unwrap(), ChangeSetBuilder::set(ranges).unwrap());
    }

    #[test]
    fn moved_positions_are_not_insertions_or_deletions(
        (mut indices, mut ranges) in change_batch_pair_strategy(32),
        from in 0u64..32,
        to in 0u64..32,
    ) {
        indices.moves = vec![(from, to)];
        ranges.moves = vec![(from, to)];
        for changes in [indices, ranges] {
            let set = ChangeSetBuilder::list(changes).unwrap();
            prop_assert_eq!(
                &set.moves,
                &vec![Move { from: from as usize, to: to as usize }]
            );
            prop_assert!(!set.deletions.contains(&(from as usize)));
            prop_assert!(!set.insertions.contains(&(to as usize)));
            prop_assert!(!set.is_empty());
        }
    }

    #[test]
    fn ranges_cover_exactly_the_indices(
        (indices, _) in change_batch_pair_strategy(64)
    ) {
        let set = ChangeSetBuilder::list(indices).unwrap();
        let covered: BTreeSet<usize> = set.insertion_ranges.iter().flat_map(Clone::clone).collect();
        prop_assert_eq!(covered, set.insertions.iter().copied().collect::<BTreeSet<_>>());
        let covered: BTreeSet<usize> = set.deletion_ranges.iter().flat_map(Clone::clone).collect();
        prop_assert_eq!(covered, set.deletions.iter().copied().collect::<BTreeSet<_>>());
    }
}

#[test]
fn move_two_to_five_reports_only_the_pair() {
    let mut changes = CollectionChanges::indices(IndexChanges {
        deletions: vec![2],
        insertions: vec![5],
        modifications: Vec::new(),
        modifications_after: Vec::new(),
    });
    changes.moves = vec![(2, 5)];

    let set = ChangeSetBuilder::list(changes).unwrap();
    assert_eq!(set.moves, vec![Move { from: 2, to: 5 }]);
    assert!(set.deletions.is_empty());
    assert!(set.insertions.is_empty());
    assert!(!set.is_empty());

    let mut ranged = CollectionChanges::ranges(to_ranges(&IndexChanges {
        deletions: vec![2],
        insertions: vec![5],
        modifications: Vec::new(),
        modifications_after: Vec::new(),
    }));
    ranged.moves = vec![(2, 5)];
    assert_eq!(ChangeSetBuilder::list(ranged).unwrap(), set);
}

#[test]
fn empty_batch_is_empty() {
    let set = ChangeSetBuilder::list(CollectionChanges::indices(IndexChanges::default())).unwrap();
    assert!(set.is_empty());
    assert!(ChangeSetBuilder::set(CollectionChanges::indices(IndexChanges::default())).unwrap().is_empty());
}

#[test]
fn malformed_batches_are_errors_not_panics() {
    let past_the_end = CollectionChanges::indices(IndexChanges {
        deletions: vec![u64::MAX],
        ..IndexChanges::default()
    });
    let reversed = CollectionChanges::ranges(RangeChanges {
        insertions: vec![IndexRange::new(9, 3)],
        ..RangeChanges::default()
    });
    let unbounded = CollectionChanges::ranges(RangeChanges {
        modifications: vec![IndexRange::new(1, u64::MAX)],
        ..RangeChanges::default()
    });
    for changes in [past_the_end, reversed, unbounded] {
        let err = ChangeSetBuilder::list(changes.clone()).unwrap_err();
        assert!(matches!(err, CoreError::Codec(CodecError::DecodingFailed { .. })));
        assert!(ChangeSetBuilder::set(changes).is_err());
    }
}
