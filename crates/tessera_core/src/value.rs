//! User-facing values.
//!
//! [`Value`] is the closed union every property value passes through on the
//! dynamic path: scalars, object references, detached collections and live
//! managed collections. The typed path converts to and from it with
//! [`crate::Convert`].

use crate::collections::ManagedCollection;
use crate::object::Object;
use crate::types::user_type_name;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use tessera_codec::{CollectionKind, Decimal128, ObjectId, PropertyType, Timestamp};
use uuid::Uuid;

/// A property value as seen by callers.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Any integer. Narrower integer types collapse onto this variant.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// String.
    String(String),
    /// Byte buffer.
    Binary(Bytes),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Point in time.
    Timestamp(Timestamp),
    /// 128-bit decimal.
    Decimal128(Decimal128),
    /// 12-byte object identifier.
    ObjectId(ObjectId),
    /// UUID.
    Uuid(Uuid),
    /// A managed or unmanaged object.
    Object(Object),
    /// A detached list.
    List(Vec<Value>),
    /// A detached set. Duplicates are dropped on insertion.
    Set(Vec<Value>),
    /// A detached dictionary.
    Dictionary(BTreeMap<String, Value>),
    /// A live collection owned by a managed object.
    Collection(ManagedCollection),
}

impl Value {
    /// Returns true for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The storage type this value maps to, `None` for null and collections.
    #[must_use]
    pub fn storage_type(&self) -> Option<PropertyType> {
        Some(match self {
            Value::Int(_) => PropertyType::Int,
            Value::Bool(_) => PropertyType::Bool,
            Value::String(_) => PropertyType::String,
            Value::Binary(_) => PropertyType::Binary,
            Value::Float(_) => PropertyType::Float,
            Value::Double(_) => PropertyType::Double,
            Value::Timestamp(_) => PropertyType::Timestamp,
            Value::Decimal128(_) => PropertyType::Decimal128,
            Value::ObjectId(_) => PropertyType::ObjectId,
            Value::Uuid(_) => PropertyType::Uuid,
            Value::Object(_) => PropertyType::Object,
            Value::Null
            | Value::List(_)
            | Value::Set(_)
            | Value::Dictionary(_)
            | Value::Collection(_) => return None,
        })
    }

    /// The collection shape of this value.
    #[must_use]
    pub fn collection_kind(&self) -> CollectionKind {
        match self {
            Value::List(_) => CollectionKind::List,
            Value::Set(_) => CollectionKind::Set,
            Value::Dictionary(_) => CollectionKind::Dictionary,
            Value::Collection(c) => c.kind(),
            _ => CollectionKind::None,
        }
    }

    /// A short description of the value's type for error messages.
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Object(object) => object.class_name().to_string(),
            Value::List(_) => "RealmList".to_string(),
            Value::Set(_) => "RealmSet".to_string(),
            Value::Dictionary(_) => "RealmDictionary".to_string(),
            Value::Collection(c) => match c.kind() {
                CollectionKind::Set => "RealmSet".to_string(),
                CollectionKind::Dictionary => "RealmDictionary".to_string(),
                _ => "RealmList".to_string(),
            },
            other => other
                .storage_type()
                .map(user_type_name)
                .unwrap_or("unknown")
                .to_string(),
        }
    }

    /// Returns the object, if this is an object value.
    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Returns the integer, if this is an integer value.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string, if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Decimal128(a), Value::Decimal128(b)) => a == b,
            (Value::ObjectId(a), Value::ObjectId(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len() && a.iter().all(|v| b.contains(v))
            }
            (Value::Dictionary(a), Value::Dictionary(b)) => a == b,
            (Value::Collection(a), Value::Collection(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Binary(v) => write!(f, "<{} bytes>", v.len()),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "{v}"),
            Value::Decimal128(v) => write!(f, "{v}"),
            Value::ObjectId(v) => write!(f, "{v}"),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Object(object) => write!(f, "{object}"),
            Value::List(items) | Value::Set(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Dictionary(entries) => {
                f.write_str("{")?;
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                f.write_str("}")
            }
            Value::Collection(c) => write!(f, "{c}"),
        }
    }
}

macro_rules! from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Int(i64::from(value))
                }
            }
        )*
    };
}

from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<char> for Value {
    fn from(value: char) -> Self {
        Value::Int(i64::from(u32::from(value)))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Binary(value)
    }
}

impl From<Timestamp> for Value {
    fn from(value: Timestamp) -> Self {
        Value::Timestamp(value)
    }
}

impl From<Decimal128> for Value {
    fn from(value: Decimal128) -> Self {
        Value::Decimal128(value)
    }
}

impl From<ObjectId> for Value {
    fn from(value: ObjectId) -> Self {
        Value::ObjectId(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}

impl From<&Object> for Value {
    fn from(value: &Object) -> Self {
        Value::Object(value.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}
