//! # Tessera Codec
//!
//! Storage primitives and the raw change-batch encoding shared by the
//! engine interface and the binding core.
//!
//! This crate provides:
//! - [`StorageValue`]: the closed set of wire-level values an engine stores
//! - Engine keys ([`ClassKey`], [`PropertyKey`], [`ObjKey`])
//! - Schema enums ([`PropertyType`], [`CollectionKind`])
//! - [`ChangeBatch`] and its opaque CBOR form [`RawChangeBatch`]
//!
//! ## Usage
//!
//! ```
//! use tessera_codec::{ChangeBatch, DictionaryChanges};
//!
//! let batch = ChangeBatch::Dictionary(DictionaryChanges {
//!     modifications: vec!["a".to_string()],
//!     ..DictionaryChanges::default()
//! });
//! let raw = batch.encode().unwrap();
//! assert_eq!(raw.decode().unwrap(), batch);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod error;
mod keys;
mod types;
mod value;

pub use batch::{
    ranges_from_indices, ChangeBatch, CollectionChanges, DictionaryChanges, IndexChanges,
    IndexEncoding, IndexRange, ObjectChanges, RangeChanges, RawChangeBatch,
};
pub use error::{CodecError, CodecResult};
pub use keys::{ClassKey, ObjKey, PropertyKey};
pub use types::{CollectionKind, PropertyType};
pub use value::{Decimal128, Link, ObjectId, StorageValue, Timestamp};
