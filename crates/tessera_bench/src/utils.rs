//! Benchmark utilities.

use tessera_codec::{ranges_from_indices, CollectionChanges, IndexChanges, RangeChanges};
use tessera_core::{UpdatePolicy, Value};
use tessera_testkit::TestRealm;

/// Every third index below `len`.
pub fn sparse_indices(len: u64) -> Vec<u64> {
    (0..len).step_by(3).collect()
}

/// A contiguous run of `count` indices starting at `start`.
pub fn dense_indices(start: u64, count: u64) -> Vec<u64> {
    (start..start + count).collect()
}

/// An index-encoded batch and its range-encoded twin.
pub fn change_batches(
    deletions: &[u64],
    insertions: &[u64],
    moves: &[(u64, u64)],
) -> (CollectionChanges, CollectionChanges) {
    let mut indices = CollectionChanges::indices(IndexChanges {
        deletions: deletions.to_vec(),
        insertions: insertions.to_vec(),
        modifications: Vec::new(),
        modifications_after: Vec::new(),
    });
    let compact = |indices: &[u64]| ranges_from_indices(indices).expect("Index has no range end");
    let mut ranges = CollectionChanges::ranges(RangeChanges {
        deletions: compact(deletions),
        insertions: compact(insertions),
        modifications: Vec::new(),
        modifications_after: Vec::new(),
    });
    indices.moves = moves.to_vec();
    ranges.moves = moves.to_vec();
    (indices, ranges)
}

/// `count` integers as user values.
pub fn int_values(count: usize) -> Vec<Value> {
    (0..count as i64).map(Value::Int).collect()
}

/// `count` distinct strings as user values.
pub fn string_values(count: usize) -> Vec<Value> {
    (0..count).map(|i| Value::from(format!("value_{i}"))).collect()
}

/// A sample realm holding one `Sample` object with primary key 1.
pub fn realm_with_sample() -> TestRealm {
    let realm = TestRealm::sample();
    realm
        .write(|w| w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error))
        .expect("Failed to create sample object");
    realm
}
