//! Schema metadata loaded once per opened realm.
//!
//! Name to key resolution happens here, when the realm is opened. Accessors
//! and operators look properties up by name in these tables and never ask
//! the engine to resolve names again.

use crate::error::{CoreError, CoreResult};
use crate::types::TypeDescription;
use std::collections::HashMap;
use std::sync::Arc;
use tessera_codec::{ClassKey, CollectionKind, PropertyKey, PropertyType};
use tessera_engine::{ClassInfo, PropertyInfo};

/// Metadata of one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMetadata {
    /// Internal name.
    pub name: String,
    /// Public alias, if the property is exposed under another name.
    pub public_name: Option<String>,
    /// Engine key.
    pub key: PropertyKey,
    /// Storage type.
    pub property_type: PropertyType,
    /// Collection kind.
    pub collection: CollectionKind,
    /// Whether null is accepted.
    pub nullable: bool,
    /// Whether this is the primary key.
    pub primary_key: bool,
    /// Whether the property is indexed.
    pub indexed: bool,
    /// Whether the property has a full-text index.
    pub fulltext: bool,
    /// Target class for object and linking-objects properties.
    pub link_target: Option<String>,
    /// Origin property on the target class, for inverse relationships.
    pub link_origin_property: Option<String>,
}

impl PropertyMetadata {
    fn from_info(info: &PropertyInfo) -> Self {
        let d = &info.descriptor;
        Self {
            name: d.name.clone(),
            public_name: (!d.public_name.is_empty()).then(|| d.public_name.clone()),
            key: info.key,
            property_type: d.property_type,
            collection: d.collection,
            nullable: d.nullable,
            primary_key: d.primary_key,
            indexed: d.indexed,
            fulltext: d.fulltext,
            link_target: d.link_target.clone(),
            link_origin_property: d.link_origin_property.clone(),
        }
    }

    /// True for computed properties without storage of their own.
    #[must_use]
    pub fn is_computed(&self) -> bool {
        self.property_type == PropertyType::LinkingObjects
    }

    /// The user-facing type of the property.
    #[must_use]
    pub fn type_description(&self) -> TypeDescription {
        let mut description = TypeDescription::scalar(self.property_type)
            .collection(self.collection)
            .nullable(self.nullable);
        if let Some(target) = &self.link_target {
            description = description.class_name(target.clone());
        }
        description
    }
}

/// Metadata of one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMetadata {
    /// Class name.
    pub name: String,
    /// Engine key.
    pub key: ClassKey,
    /// Name of the primary key property.
    pub primary_key: Option<String>,
    /// Whether instances only exist inside a parent.
    pub embedded: bool,
    /// Properties in declaration order.
    pub properties: Vec<PropertyMetadata>,
}

impl ClassMetadata {
    fn from_info(info: &ClassInfo) -> Self {
        Self {
            name: info.name.clone(),
            key: info.key,
            primary_key: info.primary_key().map(|p| p.descriptor.name.clone()),
            embedded: info.embedded,
            properties: info.properties.iter().map(PropertyMetadata::from_info).collect(),
        }
    }

    /// Looks a property up by internal or public name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyMetadata> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .or_else(|| {
                self.properties
                    .iter()
                    .find(|p| p.public_name.as_deref() == Some(name))
            })
    }

    /// Looks a property up by name, failing with an error naming the class.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if there is no such property.
    pub fn require(&self, name: &str) -> CoreResult<&PropertyMetadata> {
        self.property(name).ok_or_else(|| {
            CoreError::illegal_argument(format!(
                "Schema for type '{}' doesn't contain a property named '{name}'",
                self.name
            ))
        })
    }

    /// Looks a property up by engine key.
    #[must_use]
    pub fn property_by_key(&self, key: PropertyKey) -> Option<&PropertyMetadata> {
        self.properties.iter().find(|p| p.key == key)
    }

    /// The primary key property.
    #[must_use]
    pub fn primary_key_property(&self) -> Option<&PropertyMetadata> {
        self.primary_key.as_deref().and_then(|name| self.property(name))
    }
}

/// All classes of one opened realm.
#[derive(Debug, Clone, Default)]
pub struct SchemaMetadata {
    classes: Vec<Arc<ClassMetadata>>,
    by_name: HashMap<String, usize>,
    by_key: HashMap<ClassKey, usize>,
}

impl SchemaMetadata {
    /// Builds metadata from the classes an engine registered.
    #[must_use]
    pub fn from_classes(classes: &[ClassInfo]) -> Self {
        let classes: Vec<Arc<ClassMetadata>> = classes
            .iter()
            .map(|c| Arc::new(ClassMetadata::from_info(c)))
            .collect();
        let by_name = classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        let by_key = classes.iter().enumerate().map(|(i, c)| (c.key, i)).collect();
        Self {
            classes,
            by_name,
            by_key,
        }
    }

    /// Looks a class up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ClassMetadata>> {
        self.by_name.get(name).map(|&i| &self.classes[i])
    }

    /// Looks a class up by name, failing if it is not part of the schema.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] for an unknown class.
    pub fn require(&self, name: &str) -> CoreResult<&Arc<ClassMetadata>> {
        self.get(name).ok_or_else(|| {
            CoreError::illegal_argument(format!("Schema does not contain a class named '{name}'"))
        })
    }

    /// Looks a class up by engine key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaMismatch`] for an unknown key.
    pub fn by_key(&self, key: ClassKey) -> CoreResult<&Arc<ClassMetadata>> {
        self.by_key
            .get(&key)
            .map(|&i| &self.classes[i])
            .ok_or_else(|| CoreError::schema_mismatch(format!("No class registered for {key}")))
    }

    /// Iterates all classes.
    pub fn classes(&self) -> impl Iterator<Item = &Arc<ClassMetadata>> {
        self.classes.iter()
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if the schema has no classes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
