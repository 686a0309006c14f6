//! Schema descriptors exchanged with an engine.

use tessera_codec::{ClassKey, CollectionKind, PropertyKey, PropertyType};

/// Describes a property when registering a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// Internal name, used by the engine.
    pub name: String,
    /// Public alias, used by the binding API. Empty when not aliased.
    pub public_name: String,
    /// Storage type.
    pub property_type: PropertyType,
    /// Collection kind.
    pub collection: CollectionKind,
    /// Whether null is accepted (for collections: as an element).
    pub nullable: bool,
    /// Whether this is the primary key.
    pub primary_key: bool,
    /// Whether the property is indexed.
    pub indexed: bool,
    /// Whether the property has a full-text index.
    pub fulltext: bool,
    /// Target class name for object links and inverse relationships.
    pub link_target: Option<String>,
    /// For inverse relationships: the forward property on the target class.
    pub link_origin_property: Option<String>,
}

impl PropertyDescriptor {
    /// Creates a required scalar property.
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            public_name: String::new(),
            property_type,
            collection: CollectionKind::None,
            nullable: false,
            primary_key: false,
            indexed: false,
            fulltext: false,
            link_target: None,
            link_origin_property: None,
        }
    }

    /// Creates a single link to `target`. Links are always nullable.
    pub fn object(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Object)
            .nullable(true)
            .link_target(target)
    }

    /// Creates an inverse relationship over `target.origin_property`.
    pub fn linking_objects(
        name: impl Into<String>,
        target: impl Into<String>,
        origin_property: impl Into<String>,
    ) -> Self {
        let mut descriptor = Self::new(name, PropertyType::LinkingObjects)
            .collection(CollectionKind::List)
            .link_target(target);
        descriptor.link_origin_property = Some(origin_property.into());
        descriptor
    }

    /// Sets the collection kind.
    ///
    /// Lists and sets of objects never hold null, so they are made required.
    #[must_use]
    pub fn collection(mut self, collection: CollectionKind) -> Self {
        self.collection = collection;
        if self.property_type == PropertyType::Object
            && matches!(collection, CollectionKind::List | CollectionKind::Set)
        {
            self.nullable = false;
        }
        self
    }

    /// Sets nullability.
    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Marks the property as the primary key (implies indexed).
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.indexed = true;
        self
    }

    /// Marks the property as indexed.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Marks the property as full-text indexed.
    #[must_use]
    pub fn fulltext(mut self) -> Self {
        self.fulltext = true;
        self
    }

    /// Sets the public alias.
    #[must_use]
    pub fn public_name(mut self, public_name: impl Into<String>) -> Self {
        self.public_name = public_name.into();
        self
    }

    /// Sets the link target class.
    #[must_use]
    pub fn link_target(mut self, target: impl Into<String>) -> Self {
        self.link_target = Some(target.into());
        self
    }

    /// Returns true for computed properties, which have no storage slot.
    #[must_use]
    pub fn is_computed(&self) -> bool {
        self.property_type == PropertyType::LinkingObjects
    }
}

/// Describes a class when registering a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescriptor {
    /// Class name.
    pub name: String,
    /// Whether instances are embedded (owned by exactly one parent slot).
    pub embedded: bool,
    /// Properties in declaration order.
    pub properties: Vec<PropertyDescriptor>,
}

impl ClassDescriptor {
    /// Creates a top-level class with no properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            embedded: false,
            properties: Vec::new(),
        }
    }

    /// Creates an embedded class with no properties.
    pub fn embedded(name: impl Into<String>) -> Self {
        Self {
            embedded: true,
            ..Self::new(name)
        }
    }

    /// Appends a property.
    #[must_use]
    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    /// Returns the primary key property, if any.
    #[must_use]
    pub fn primary_key(&self) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.primary_key)
    }
}

/// A property as registered, with its engine key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    /// Engine key.
    pub key: PropertyKey,
    /// The registered descriptor.
    pub descriptor: PropertyDescriptor,
}

/// A class as registered, with its engine key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    /// Engine key.
    pub key: ClassKey,
    /// Class name.
    pub name: String,
    /// Whether instances are embedded.
    pub embedded: bool,
    /// Properties in declaration order.
    pub properties: Vec<PropertyInfo>,
}

impl ClassInfo {
    /// Finds a property by internal name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyInfo> {
        self.properties.iter().find(|p| p.descriptor.name == name)
    }

    /// Finds a property by key.
    #[must_use]
    pub fn property_by_key(&self, key: PropertyKey) -> Option<&PropertyInfo> {
        self.properties.iter().find(|p| p.key == key)
    }

    /// Returns the primary key property, if any.
    #[must_use]
    pub fn primary_key(&self) -> Option<&PropertyInfo> {
        self.properties.iter().find(|p| p.descriptor.primary_key)
    }
}
