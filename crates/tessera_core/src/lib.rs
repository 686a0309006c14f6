//! # Tessera Core
//!
//! The schema-aware object layer of the tessera binding.
//!
//! This crate sits between callers and an embedded storage [`Engine`]. It
//! validates values against a schema loaded once at open time, converts
//! between user values and storage primitives, enforces the mutation rules
//! of lists, sets and dictionaries, and turns the engine's raw change
//! batches into typed change events.
//!
//! ## Design Principles
//!
//! - **Check before write**: every value is validated against the schema
//!   before the first engine call, so a rejected assignment changes nothing
//! - **Translate once**: engine errors are mapped onto [`CoreError`] at the
//!   call closest to the engine; nothing retries
//! - **Handles, not memory**: objects and collections hold engine handles
//!   that the engine validates on every call
//! - **Explicit cancellation**: notifications stop only when their
//!   [`NotificationToken`] is disposed; slow consumers get an error, not a
//!   silently dropped channel
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera_core::{Config, Realm, UpdatePolicy, Value};
//! use tessera_core::{ClassDescriptor, InMemoryEngine, PropertyDescriptor};
//! use tessera_codec::{CollectionKind, PropertyType};
//!
//! let schema = [ClassDescriptor::new("Dog")
//!     .property(PropertyDescriptor::new("name", PropertyType::String).primary_key())
//!     .property(PropertyDescriptor::new("tags", PropertyType::String).collection(CollectionKind::List))];
//! let realm = Realm::open(Arc::new(InMemoryEngine::new()), Config::new(), &schema).unwrap();
//!
//! realm
//!     .write(|w| {
//!         let rex = w.create_object_with_primary_key("Dog", "Rex", UpdatePolicy::Error)?;
//!         rex.list("tags")?.add("good")?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let rex = realm.find("Dog", "Rex").unwrap().unwrap();
//! assert_eq!(rex.list("tags").unwrap().values().unwrap(), vec![Value::from("good")]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod accessor;
mod any;
mod assign;
mod changeset;
mod collections;
mod config;
mod converters;
mod error;
mod mediator;
mod mutex;
mod notifications;
mod object;
mod realm;
mod schema;
mod scope;
mod types;
mod value;

pub use any::{AnyType, AnyValue};
pub use assign::{copy_from_realm, ObjectCache};
pub use changeset::{ChangeSetBuilder, DictionaryChangeSet, ListChangeSet, Move, SetChangeSet};
pub use collections::{Dictionary, List, ManagedCollection, RealmSet};
pub use config::Config;
pub use converters::{convert_type_name, scalar_from_storage, scalar_to_storage, to_storage_checked, Convert};
pub use error::{CoreError, CoreResult};
pub use mediator::Mediator;
pub use mutex::{open_lock, ScopedMutex};
#[cfg(feature = "tokio")]
pub use notifications::TokioScheduler;
pub use notifications::{
    ChangeStream, CollectionChange, ImmediateScheduler, NotificationToken, ObjectChange, Scheduler,
    Task, ThreadScheduler,
};
pub use object::{Object, RealmObject};
pub use realm::{FrozenRealm, Realm, WriteTransaction};
pub use schema::{ClassMetadata, PropertyMetadata, SchemaMetadata};
pub use scope::{GetterScope, SetterScope};
pub use types::{user_type_name, TypeDescription, UpdatePolicy};
pub use value::Value;

pub use tessera_engine::{
    ChangeEncoding, ClassDescriptor, Engine, GenerationPtr, InMemoryEngine, InMemoryEngineConfig,
    PropertyDescriptor,
};
