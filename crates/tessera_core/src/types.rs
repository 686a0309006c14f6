//! Small shared types: update policies and user-facing type descriptions.

use std::fmt;
use tessera_codec::{CollectionKind, PropertyType};

/// What to do when an imported object collides with an existing primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdatePolicy {
    /// Fail with a constraint violation.
    #[default]
    Error,
    /// Update the existing object with the imported values.
    All,
}

/// The user-facing type a caller expects a property to have.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescription {
    /// Storage type of the values.
    pub property_type: PropertyType,
    /// Collection wrapper, if any.
    pub collection: CollectionKind,
    /// Whether null is accepted.
    pub nullable: bool,
    /// Target class name for object types.
    pub class_name: Option<String>,
}

impl TypeDescription {
    /// A single, non-nullable value of `property_type`.
    #[must_use]
    pub const fn scalar(property_type: PropertyType) -> Self {
        Self {
            property_type,
            collection: CollectionKind::None,
            nullable: false,
            class_name: None,
        }
    }

    /// Sets the collection wrapper.
    #[must_use]
    pub fn collection(mut self, collection: CollectionKind) -> Self {
        self.collection = collection;
        self
    }

    /// Sets nullability.
    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Sets the object class name.
    #[must_use]
    pub fn class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = Some(name.into());
        self
    }

    /// Compares storage type, collection kind and nullability.
    ///
    /// Mixed values are nullable by nature, so nullability is normalized for
    /// them before comparing. Class names are not compared.
    #[must_use]
    pub fn matches(&self, other: &TypeDescription) -> bool {
        let normalize = |t: &TypeDescription| {
            t.nullable || t.property_type == PropertyType::Mixed
        };
        self.property_type == other.property_type
            && self.collection == other.collection
            && normalize(self) == normalize(other)
    }
}

/// The user-facing name of a storage type.
#[must_use]
pub fn user_type_name(property_type: PropertyType) -> &'static str {
    match property_type {
        PropertyType::Int => "Int",
        PropertyType::Bool => "Boolean",
        PropertyType::String => "String",
        PropertyType::Binary => "ByteArray",
        PropertyType::Float => "Float",
        PropertyType::Double => "Double",
        PropertyType::Timestamp => "RealmInstant",
        PropertyType::ObjectId => "ObjectId",
        PropertyType::Uuid => "RealmUUID",
        PropertyType::Decimal128 => "Decimal128",
        PropertyType::Object => "RealmObject",
        PropertyType::LinkingObjects => "RealmResults",
        PropertyType::Mixed => "RealmAny",
    }
}

impl fmt::Display for TypeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let element = match (&self.class_name, self.property_type) {
            (Some(name), PropertyType::Object | PropertyType::LinkingObjects) => name.as_str(),
            (_, property_type) => user_type_name(property_type),
        };
        let nullable = if self.nullable { "?" } else { "" };
        match self.collection {
            CollectionKind::None => write!(f, "{element}{nullable}"),
            CollectionKind::List => write!(f, "RealmList<{element}{nullable}>"),
            CollectionKind::Set => write!(f, "RealmSet<{element}{nullable}>"),
            CollectionKind::Dictionary => write!(f, "RealmDictionary<{element}{nullable}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_scalars_and_collections() {
        let s = TypeDescription::scalar(PropertyType::String);
        assert_eq!(s.to_string(), "String");
        assert_eq!(s.clone().nullable(true).to_string(), "String?");
        assert_eq!(
            s.collection(CollectionKind::List).to_string(),
            "RealmList<String>"
        );
        let dict = TypeDescription::scalar(PropertyType::Object)
            .class_name("Dog")
            .nullable(true)
            .collection(CollectionKind::Dictionary);
        assert_eq!(dict.to_string(), "RealmDictionary<Dog?>");
    }

    #[test]
    fn mixed_nullability_is_normalized() {
        let declared = TypeDescription::scalar(PropertyType::Mixed).nullable(true);
        let requested = TypeDescription::scalar(PropertyType::Mixed);
        assert!(declared.matches(&requested));

        let declared = TypeDescription::scalar(PropertyType::Int);
        let requested = TypeDescription::scalar(PropertyType::Int).nullable(true);
        assert!(!declared.matches(&requested));
    }
}
