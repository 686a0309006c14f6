//! Property-based test generators using proptest.
//!
//! Scalars are generated per storage type so they can be written to the
//! matching `Sample` property. Floats are finite so values compare equal
//! after a round trip.

use bytes::Bytes;
use proptest::prelude::*;
use std::collections::BTreeSet;
use tessera_codec::{
    ranges_from_indices, CollectionChanges, Decimal128, IndexChanges, ObjectId, PropertyType,
    RangeChanges, Timestamp,
};
use tessera_core::Value;

/// Strategy for a value of the given storage type.
///
/// # Panics
///
/// Panics for link, inverse relationship and polymorphic types, which have
/// no scalar representation.
pub fn scalar_strategy(property_type: PropertyType) -> BoxedStrategy<Value> {
    match property_type {
        PropertyType::Int => any::<i64>().prop_map(Value::Int).boxed(),
        PropertyType::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
        PropertyType::String => prop::string::string_regex("[a-zA-Z0-9 ]{0,24}")
            .expect("Invalid regex")
            .prop_map(Value::String)
            .boxed(),
        PropertyType::Binary => prop::collection::vec(any::<u8>(), 0..64)
            .prop_map(|bytes| Value::Binary(Bytes::from(bytes)))
            .boxed(),
        PropertyType::Float => (-1.0e6f32..1.0e6f32).prop_map(Value::Float).boxed(),
        PropertyType::Double => (-1.0e12f64..1.0e12f64).prop_map(Value::Double).boxed(),
        PropertyType::Timestamp => (-4_000_000_000i64..4_000_000_000i64, 0i32..1_000_000_000)
            .prop_map(|(seconds, nanos)| Value::Timestamp(Timestamp::new(seconds, nanos)))
            .boxed(),
        PropertyType::Decimal128 => any::<i64>()
            .prop_map(|v| Value::Decimal128(Decimal128::from_i64(v)))
            .boxed(),
        PropertyType::ObjectId => prop::array::uniform12(any::<u8>())
            .prop_map(|bytes| Value::ObjectId(ObjectId::from_bytes(bytes)))
            .boxed(),
        PropertyType::Uuid => prop::array::uniform16(any::<u8>())
            .prop_map(|bytes| Value::Uuid(uuid::Uuid::from_bytes(bytes)))
            .boxed(),
        other => panic!("no scalar strategy for {other:?}"),
    }
}

/// Strategy for a value a polymorphic property accepts.
pub fn any_scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        scalar_strategy(PropertyType::Int),
        scalar_strategy(PropertyType::Bool),
        scalar_strategy(PropertyType::String),
        scalar_strategy(PropertyType::Double),
        scalar_strategy(PropertyType::Uuid),
    ]
}

/// Strategy for integers that do not fit in an `i32`.
pub fn wide_int_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![
        i64::MIN..i64::from(i32::MIN),
        (i64::from(i32::MAX) + 1)..=i64::MAX,
    ]
}

/// Strategy for up to `max` pairwise distinct strings.
pub fn distinct_strings_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z]{1,8}", 0..=max).prop_map(|set| set.into_iter().collect())
}

/// Strategy for strings that may repeat.
pub fn strings_with_duplicates_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-c]{1,2}", 0..=max)
}

/// Strategy for dictionary entries; later entries may overwrite earlier keys.
pub fn dictionary_entries_strategy(max: usize) -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::vec(("[a-e]{1,2}", any::<i64>()), 0..=max)
}

/// A list mutation with indices taken modulo the current length.
#[derive(Debug, Clone)]
pub enum ListOp {
    /// Insert at an index in `0..=len`.
    Insert(usize, i64),
    /// Remove the element at an index in `0..len`.
    Remove(usize),
    /// Move between two indices in `0..len`.
    Move(usize, usize),
    /// Overwrite the element at an index in `0..len`.
    Set(usize, i64),
}

/// Strategy for a sequence of list operations.
pub fn list_ops_strategy(max: usize) -> impl Strategy<Value = Vec<ListOp>> {
    let op = prop_oneof![
        (any::<usize>(), any::<i64>()).prop_map(|(i, v)| ListOp::Insert(i, v)),
        any::<usize>().prop_map(ListOp::Remove),
        (any::<usize>(), any::<usize>()).prop_map(|(a, b)| ListOp::Move(a, b)),
        (any::<usize>(), any::<i64>()).prop_map(|(i, v)| ListOp::Set(i, v)),
    ];
    prop::collection::vec(op, 0..=max)
}

/// Strategy for an index-encoded change batch over a collection of `len`
/// elements, together with its range-encoded twin.
pub fn change_batch_pair_strategy(
    len: u64,
) -> impl Strategy<Value = (CollectionChanges, CollectionChanges)> {
    let indices = move || prop::collection::btree_set(0..len.max(1), 0..=(len / 2) as usize);
    (indices(), indices(), indices()).prop_map(|(deletions, insertions, modifications)| {
        let changes = IndexChanges {
            deletions: sorted(&deletions),
            insertions: sorted(&insertions),
            modifications: sorted(&modifications),
            modifications_after: Vec::new(),
        };
        let ranged = to_ranges(&changes);
        (
            CollectionChanges::indices(changes),
            CollectionChanges::ranges(ranged),
        )
    })
}

fn sorted(indices: &BTreeSet<u64>) -> Vec<u64> {
    indices.iter().copied().collect()
}

/// Range-compacts an index-encoded batch.
///
/// # Panics
///
/// Panics if any index is `u64::MAX`.
pub fn to_ranges(changes: &IndexChanges) -> RangeChanges {
    let compact = |indices: &[u64]| ranges_from_indices(indices).expect("Index has no range end");
    RangeChanges {
        deletions: compact(&changes.deletions),
        insertions: compact(&changes.insertions),
        modifications: compact(&changes.modifications),
        modifications_after: compact(&changes.modifications_after),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn scalar_values_have_requested_type() {
        let mut runner = TestRunner::default();
        for property_type in [
            PropertyType::Int,
            PropertyType::String,
            PropertyType::Timestamp,
            PropertyType::Uuid,
        ] {
            let value = scalar_strategy(property_type)
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert_eq!(value.storage_type(), Some(property_type));
        }
    }

    proptest! {
        #[test]
        fn wide_ints_overflow_i32(value in wide_int_strategy()) {
            prop_assert!(i32::try_from(value).is_err());
        }

        #[test]
        fn distinct_strings_are_distinct(values in distinct_strings_strategy(16)) {
            let unique: BTreeSet<_> = values.iter().collect();
            prop_assert_eq!(unique.len(), values.len());
        }
    }
}
