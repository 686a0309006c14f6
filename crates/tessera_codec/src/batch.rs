//! Raw change batches emitted by an engine.
//!
//! An engine hands each notification callback an opaque [`RawChangeBatch`]:
//! a CBOR document describing what changed on the observed object or
//! collection since the previous delivery. Collection batches come in one
//! of two encodings, chosen by the engine:
//!
//! - flat index arrays ([`IndexChanges`])
//! - range-compacted `[from, to)` pairs ([`RangeChanges`])
//!
//! Consumers must accept both.

use crate::error::{CodecError, CodecResult};
use crate::keys::PropertyKey;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A decoded change batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeBatch {
    /// Changes to a single object.
    Object(ObjectChanges),
    /// Changes to a list or set.
    Collection(CollectionChanges),
    /// Changes to a dictionary.
    Dictionary(DictionaryChanges),
}

impl ChangeBatch {
    /// Encodes this batch into its opaque wire form.
    pub fn encode(&self) -> CodecResult<RawChangeBatch> {
        let mut buffer = Vec::new();
        ciborium::into_writer(self, &mut buffer)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Ok(RawChangeBatch(Bytes::from(buffer)))
    }
}

/// The opaque byte form of a [`ChangeBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChangeBatch(Bytes);

impl RawChangeBatch {
    /// Wraps bytes received from an engine.
    #[must_use]
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decodes the batch.
    pub fn decode(&self) -> CodecResult<ChangeBatch> {
        ciborium::from_reader(self.0.as_ref())
            .map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

/// Changes to a single object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectChanges {
    /// The object was deleted.
    pub deleted: bool,
    /// Properties whose value changed.
    pub modified_properties: Vec<PropertyKey>,
}

/// Index changes in one of the two supported encodings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexEncoding {
    /// Flat index arrays.
    Indices(IndexChanges),
    /// Range-compacted pairs.
    Ranges(RangeChanges),
}

/// Changes to a list or set.
///
/// Moves are reported both as a `(from, to)` pair and, depending on the
/// engine, as a deletion of `from` plus an insertion of `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionChanges {
    /// Insertions, deletions and modifications.
    pub changes: IndexEncoding,
    /// Moved elements as `(from, to)` pairs.
    pub moves: Vec<(u64, u64)>,
    /// The collection was cleared at some point in the batch.
    pub cleared: bool,
    /// The collection's parent object was deleted.
    pub deleted: bool,
}

impl CollectionChanges {
    /// Creates an index-encoded batch with no moves or flags.
    #[must_use]
    pub fn indices(changes: IndexChanges) -> Self {
        Self {
            changes: IndexEncoding::Indices(changes),
            moves: Vec::new(),
            cleared: false,
            deleted: false,
        }
    }

    /// Creates a range-encoded batch with no moves or flags.
    #[must_use]
    pub fn ranges(changes: RangeChanges) -> Self {
        Self {
            changes: IndexEncoding::Ranges(changes),
            moves: Vec::new(),
            cleared: false,
            deleted: false,
        }
    }
}

/// Flat index arrays.
///
/// Deletions and `modifications` refer to the old collection,
/// insertions and `modifications_after` to the new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexChanges {
    /// Deleted indices (old positions).
    pub deletions: Vec<u64>,
    /// Inserted indices (new positions).
    pub insertions: Vec<u64>,
    /// Modified indices (old positions).
    pub modifications: Vec<u64>,
    /// Modified indices (new positions).
    pub modifications_after: Vec<u64>,
}

/// Range-compacted changes. Same position conventions as [`IndexChanges`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeChanges {
    /// Deleted ranges.
    pub deletions: Vec<IndexRange>,
    /// Inserted ranges.
    pub insertions: Vec<IndexRange>,
    /// Modified ranges (old positions).
    pub modifications: Vec<IndexRange>,
    /// Modified ranges (new positions).
    pub modifications_after: Vec<IndexRange>,
}

/// A half-open index range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRange {
    /// First index in the range.
    pub from: u64,
    /// One past the last index.
    pub to: u64,
}

impl IndexRange {
    /// Creates a range.
    #[must_use]
    pub const fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Iterates the indices in the range.
    pub fn indices(self) -> impl Iterator<Item = u64> {
        self.from..self.to
    }
}

/// Compacts indices into the fewest half-open ranges.
///
/// Input order does not matter; duplicates are merged.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] for an index of `u64::MAX`,
/// which has no half-open range.
pub fn ranges_from_indices(indices: &[u64]) -> CodecResult<Vec<IndexRange>> {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<IndexRange> = Vec::new();
    for index in sorted {
        let end = index
            .checked_add(1)
            .ok_or_else(|| CodecError::decoding_failed(format!("index {index} has no range end")))?;
        match ranges.last_mut() {
            Some(last) if last.to == index => last.to = end,
            _ => ranges.push(IndexRange::new(index, end)),
        }
    }
    Ok(ranges)
}

/// Changes to a dictionary, by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryChanges {
    /// Keys that were removed.
    pub deletions: Vec<String>,
    /// Keys that newly appeared.
    pub insertions: Vec<String>,
    /// Keys whose value changed in place.
    pub modifications: Vec<String>,
    /// The dictionary was cleared at some point in the batch.
    pub cleared: bool,
    /// The dictionary's parent object was deleted.
    pub deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compacts_adjacent_indices() {
        let ranges = ranges_from_indices(&[5, 1, 2, 3, 7, 6]).unwrap();
        assert_eq!(ranges, vec![IndexRange::new(1, 4), IndexRange::new(5, 8)]);
    }

    #[test]
    fn compacts_empty_input() {
        assert!(ranges_from_indices(&[]).unwrap().is_empty());
    }

    #[test]
    fn compacts_duplicates() {
        assert_eq!(ranges_from_indices(&[2, 2, 3]).unwrap(), vec![IndexRange::new(2, 4)]);
    }

    #[test]
    fn last_index_has_no_range() {
        let err = ranges_from_indices(&[1, u64::MAX]).unwrap_err();
        assert!(matches!(err, CodecError::DecodingFailed { .. }));
        assert_eq!(
            ranges_from_indices(&[u64::MAX - 1]).unwrap(),
            vec![IndexRange::new(u64::MAX - 1, u64::MAX)]
        );
    }

    #[test]
    fn range_indices() {
        let collected: Vec<u64> = IndexRange::new(3, 6).indices().collect();
        assert_eq!(collected, vec![3, 4, 5]);
    }

    #[test]
    fn collection_batch_survives_encoding() {
        let mut changes = CollectionChanges::ranges(RangeChanges {
            insertions: vec![IndexRange::new(0, 2)],
            ..RangeChanges::default()
        });
        changes.moves.push((2, 5));
        let batch = ChangeBatch::Collection(changes);

        let raw = batch.encode().unwrap();
        assert!(!raw.as_bytes().is_empty());
        assert_eq!(raw.decode().unwrap(), batch);
    }

    #[test]
    fn object_batch_survives_encoding() {
        let batch = ChangeBatch::Object(ObjectChanges {
            deleted: false,
            modified_properties: vec![PropertyKey::new(3)],
        });
        assert_eq!(batch.encode().unwrap().decode().unwrap(), batch);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let raw = RawChangeBatch::from_bytes(Bytes::from_static(&[0xff, 0x00, 0x13]));
        assert!(matches!(
            raw.decode(),
            Err(CodecError::DecodingFailed { .. })
        ));
    }
}
