//! Schema-level type tags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The storage type of a property.
///
/// Together with [`CollectionKind`] and nullability this fully determines
/// the user-facing type a property accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    /// 64-bit signed integer. Narrower user integers collapse onto it.
    Int,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    String,
    /// Byte buffer.
    Binary,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Point in time.
    Timestamp,
    /// 12-byte object identifier.
    ObjectId,
    /// 16-byte UUID.
    Uuid,
    /// 128-bit decimal.
    Decimal128,
    /// Link to an object (regular or embedded).
    Object,
    /// Computed inverse relationship. Read-only.
    LinkingObjects,
    /// Polymorphic value.
    Mixed,
}

impl PropertyType {
    /// Returns the lower-case name used in engine diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PropertyType::Int => "int",
            PropertyType::Bool => "bool",
            PropertyType::String => "string",
            PropertyType::Binary => "binary",
            PropertyType::Float => "float",
            PropertyType::Double => "double",
            PropertyType::Timestamp => "timestamp",
            PropertyType::ObjectId => "object_id",
            PropertyType::Uuid => "uuid",
            PropertyType::Decimal128 => "decimal128",
            PropertyType::Object => "object",
            PropertyType::LinkingObjects => "linking_objects",
            PropertyType::Mixed => "mixed",
        }
    }

    /// Returns true if values of this type are links to other objects.
    #[must_use]
    pub const fn is_link(self) -> bool {
        matches!(self, PropertyType::Object | PropertyType::LinkingObjects)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many values a property holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CollectionKind {
    /// A single value.
    #[default]
    None,
    /// Ordered, duplicates allowed.
    List,
    /// Unordered, duplicate-free.
    Set,
    /// String-keyed map.
    Dictionary,
}

impl CollectionKind {
    /// Returns true for list, set and dictionary.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        !matches!(self, CollectionKind::None)
    }
}
