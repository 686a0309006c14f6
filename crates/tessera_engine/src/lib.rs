//! # Tessera Engine
//!
//! The contract between the binding core and an embedded object store.
//!
//! Engines are **handle-based**: every object, collection and generation is
//! addressed by a small value handle that the engine validates on each call.
//! The binding core never holds engine memory and never assumes a handle is
//! still alive.
//!
//! ## Design Principles
//!
//! - One trait, [`Engine`], covers storage, transactions and notifications
//! - Errors carry a numeric [`ErrorCode`] and [`ErrorCategories`] bitmask
//! - Unknown codes survive as [`ErrorCode::Unknown`] instead of panicking
//! - Change notifications are delivered as opaque CBOR batches
//!
//! ## Available Engines
//!
//! - [`InMemoryEngine`] - reference engine used by tests and benchmarks
//!
//! ## Example
//!
//! ```rust
//! use tessera_codec::{PropertyType, StorageValue};
//! use tessera_engine::{ClassDescriptor, Engine, InMemoryEngine, PropertyDescriptor};
//!
//! let engine = InMemoryEngine::new();
//! let live = engine
//!     .open(&[ClassDescriptor::new("Dog")
//!         .property(PropertyDescriptor::new("name", PropertyType::String).primary_key())])
//!     .unwrap();
//! let dog = engine.classes(live.realm).unwrap()[0].key;
//!
//! let write = engine.begin_write(live.realm).unwrap();
//! engine
//!     .create_object_with_primary_key(&write, dog, &StorageValue::from("Rex"))
//!     .unwrap();
//! let live = engine.commit_write(live.realm).unwrap();
//!
//! let found = engine
//!     .find_by_primary_key(&live, dog, &StorageValue::from("Rex"))
//!     .unwrap();
//! assert!(found.is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod handle;
mod memory;
mod schema;

pub use engine::{ChangeCallback, Engine};
pub use error::{EngineError, EngineResult, ErrorCategories, ErrorCode};
pub use handle::{CollectionPtr, GenerationPtr, ListenerId, ObjPtr, PathElement, RealmId};
pub use memory::{ChangeEncoding, InMemoryEngine, InMemoryEngineConfig};
pub use schema::{ClassDescriptor, ClassInfo, PropertyDescriptor, PropertyInfo};
