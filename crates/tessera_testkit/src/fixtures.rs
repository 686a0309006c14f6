//! Test fixtures and realm helpers.
//!
//! [`sample_schema`] declares one class per shape the binding handles:
//!
//! - `Sample`: every scalar type, links, embedded links, every collection
//!   kind over primitives, objects, embedded objects and polymorphic values,
//!   and an inverse relationship
//! - `EmbeddedChild`: an embedded class
//! - `Node`: a class without primary key that links to itself
//! - `Holder`: a set of embedded objects, which the binding refuses to open

use crate::logging::init_test_logging;
use std::sync::Arc;
use tessera_codec::{CollectionKind, PropertyType};
use tessera_core::{Config, Realm};
use tessera_engine::{
    ChangeEncoding, ClassDescriptor, Engine, InMemoryEngine, InMemoryEngineConfig,
    PropertyDescriptor,
};

/// Scalar properties of `Sample` and their storage types.
pub const SAMPLE_SCALARS: &[(&str, PropertyType)] = &[
    ("stringField", PropertyType::String),
    ("intField", PropertyType::Int),
    ("boolField", PropertyType::Bool),
    ("floatField", PropertyType::Float),
    ("doubleField", PropertyType::Double),
    ("binaryField", PropertyType::Binary),
    ("timestampField", PropertyType::Timestamp),
    ("decimal128Field", PropertyType::Decimal128),
    ("objectIdField", PropertyType::ObjectId),
    ("uuidField", PropertyType::Uuid),
];

fn list(name: &str, property_type: PropertyType) -> PropertyDescriptor {
    PropertyDescriptor::new(name, property_type).collection(CollectionKind::List)
}

fn set(name: &str, property_type: PropertyType) -> PropertyDescriptor {
    PropertyDescriptor::new(name, property_type).collection(CollectionKind::Set)
}

fn dictionary(name: &str, property_type: PropertyType) -> PropertyDescriptor {
    PropertyDescriptor::new(name, property_type).collection(CollectionKind::Dictionary)
}

/// The `Sample` class.
pub fn sample_class() -> ClassDescriptor {
    let mut class = ClassDescriptor::new("Sample")
        .property(PropertyDescriptor::new("id", PropertyType::Int).primary_key());
    for (name, property_type) in SAMPLE_SCALARS {
        class = class.property(PropertyDescriptor::new(*name, *property_type));
    }
    class
        .property(
            PropertyDescriptor::new("nullableStringField", PropertyType::String).nullable(true),
        )
        .property(PropertyDescriptor::new("nullableIntField", PropertyType::Int).nullable(true))
        .property(PropertyDescriptor::new("mixedField", PropertyType::Mixed).nullable(true))
        .property(PropertyDescriptor::object("objectField", "Sample"))
        .property(PropertyDescriptor::object("embeddedField", "EmbeddedChild"))
        .property(list("intListField", PropertyType::Int))
        .property(list("nullableIntListField", PropertyType::Int).nullable(true))
        .property(list("stringListField", PropertyType::String))
        .property(set("stringSetField", PropertyType::String))
        .property(set("intSetField", PropertyType::Int))
        .property(dictionary("intDictionaryField", PropertyType::Int))
        .property(
            PropertyDescriptor::object("objectListField", "Sample").collection(CollectionKind::List),
        )
        .property(
            PropertyDescriptor::object("objectSetField", "Sample").collection(CollectionKind::Set),
        )
        .property(
            PropertyDescriptor::object("embeddedListField", "EmbeddedChild")
                .collection(CollectionKind::List),
        )
        .property(
            PropertyDescriptor::object("embeddedDictionaryField", "EmbeddedChild")
                .collection(CollectionKind::Dictionary),
        )
        .property(list("mixedListField", PropertyType::Mixed).nullable(true))
        .property(set("mixedSetField", PropertyType::Mixed).nullable(true))
        .property(dictionary("mixedDictionaryField", PropertyType::Mixed).nullable(true))
        .property(PropertyDescriptor::linking_objects(
            "linkedFrom",
            "Sample",
            "objectField",
        ))
}

/// The full test schema.
pub fn sample_schema() -> Vec<ClassDescriptor> {
    vec![
        sample_class(),
        ClassDescriptor::embedded("EmbeddedChild")
            .property(PropertyDescriptor::new("name", PropertyType::String))
            .property(PropertyDescriptor::new("value", PropertyType::Int))
            .property(list("tags", PropertyType::String)),
        ClassDescriptor::new("Node")
            .property(PropertyDescriptor::new("name", PropertyType::String))
            .property(
                PropertyDescriptor::object("children", "Node").collection(CollectionKind::List),
            ),
        ClassDescriptor::new("Holder")
            .property(PropertyDescriptor::new("id", PropertyType::Int).primary_key())
            .property(
                PropertyDescriptor::object("embeddedSet", "EmbeddedChild")
                    .collection(CollectionKind::Set),
            ),
    ]
}

/// A realm opened over its own in-memory engine.
pub struct TestRealm {
    /// The realm.
    pub realm: Realm,
    /// The engine behind it.
    pub engine: Arc<InMemoryEngine>,
}

impl TestRealm {
    /// Opens the sample schema with index-encoded change batches.
    pub fn sample() -> Self {
        Self::with_encoding(ChangeEncoding::Indices)
    }

    /// Opens the sample schema with the given change batch encoding.
    pub fn with_encoding(encoding: ChangeEncoding) -> Self {
        Self::open(sample_schema(), encoding, Config::new())
    }

    /// Opens `schema` with `config`; the realm name is made unique.
    pub fn open(schema: Vec<ClassDescriptor>, encoding: ChangeEncoding, config: Config) -> Self {
        init_test_logging();
        let engine = Arc::new(InMemoryEngine::with_config(
            InMemoryEngineConfig::new().change_encoding(encoding),
        ));
        let config = config.name(format!("test-{}", uuid::Uuid::new_v4()));
        let shared: Arc<dyn Engine> = engine.clone();
        let realm = Realm::open(shared, config, &schema).expect("Failed to open test realm");
        Self { realm, engine }
    }
}

impl std::ops::Deref for TestRealm {
    type Target = Realm;

    fn deref(&self) -> &Self::Target {
        &self.realm
    }
}

/// Runs a test with a freshly opened sample realm.
pub fn with_sample_realm<F, R>(f: F) -> R
where
    F: FnOnce(&Realm) -> R,
{
    let test_realm = TestRealm::sample();
    f(&test_realm.realm)
}

/// Runs a test once per change batch encoding.
pub fn with_each_encoding<F>(mut f: F)
where
    F: FnMut(&Realm, ChangeEncoding),
{
    for encoding in [ChangeEncoding::Indices, ChangeEncoding::Ranges] {
        let test_realm = TestRealm::with_encoding(encoding);
        f(&test_realm.realm, encoding);
    }
}
