//! Conversion between storage primitives and user values.
//!
//! Two directions with different strictness:
//!
//! - **to storage**: a value whose runtime type has no converter for the
//!   target property is rejected before any engine call
//! - **to user**: integers narrow exactly; a stored value that does not fit
//!   the requested type is a [`CoreError::ValueOutOfRange`], never a
//!   silent truncation
//!
//! Links need the generation they were read in, so the link converters take
//! the realm and generation alongside the value.

use crate::any::AnyValue;
use crate::error::{CoreError, CoreResult};
use crate::object::Object;
use crate::realm::RealmShared;
use crate::schema::{ClassMetadata, PropertyMetadata};
use crate::types::user_type_name;
use crate::value::Value;
use bytes::Bytes;
use std::sync::Arc;
use tessera_codec::{Decimal128, Link, ObjectId, PropertyType, StorageValue, Timestamp};
use tessera_engine::{GenerationPtr, ObjPtr};
use tracing::trace;
use uuid::Uuid;

/// Converts a scalar user value to its storage primitive.
///
/// Returns `None` for objects and collections, which need realm context.
#[must_use]
pub fn scalar_to_storage(value: &Value) -> Option<StorageValue> {
    Some(match value {
        Value::Null => StorageValue::Null,
        Value::Int(v) => StorageValue::Int(*v),
        Value::Bool(v) => StorageValue::Bool(*v),
        Value::String(v) => StorageValue::String(v.clone()),
        Value::Binary(v) => StorageValue::Binary(v.clone()),
        Value::Float(v) => StorageValue::Float(*v),
        Value::Double(v) => StorageValue::Double(*v),
        Value::Timestamp(v) => StorageValue::Timestamp(*v),
        Value::Decimal128(v) => StorageValue::Decimal128(*v),
        Value::ObjectId(v) => StorageValue::ObjectId(*v),
        Value::Uuid(v) => StorageValue::Uuid(*v),
        Value::Object(_)
        | Value::List(_)
        | Value::Set(_)
        | Value::Dictionary(_)
        | Value::Collection(_) => return None,
    })
}

/// Converts a scalar storage primitive to a user value.
///
/// Returns `None` for links and nested collection markers.
#[must_use]
pub fn scalar_from_storage(value: StorageValue) -> Option<Value> {
    Some(match value {
        StorageValue::Null => Value::Null,
        StorageValue::Int(v) => Value::Int(v),
        StorageValue::Bool(v) => Value::Bool(v),
        StorageValue::String(v) => Value::String(v),
        StorageValue::Binary(v) => Value::Binary(v),
        StorageValue::Float(v) => Value::Float(v),
        StorageValue::Double(v) => Value::Double(v),
        StorageValue::Timestamp(v) => Value::Timestamp(v),
        StorageValue::Decimal128(v) => Value::Decimal128(v),
        StorageValue::ObjectId(v) => Value::ObjectId(v),
        StorageValue::Uuid(v) => Value::Uuid(v),
        StorageValue::Link(_) | StorageValue::List | StorageValue::Dictionary => return None,
    })
}

/// Converts a scalar value for a non-link property, checking its type.
///
/// `property` may be a collection property, in which case the value is one
/// element of it.
///
/// # Errors
///
/// - [`CoreError::ConstraintViolation`] for null on a required property
/// - [`CoreError::SchemaMismatch`] for a value of the wrong type
pub fn to_storage_checked(
    class: &ClassMetadata,
    property: &PropertyMetadata,
    value: &Value,
) -> CoreResult<StorageValue> {
    if value.is_null() {
        if property.nullable || property.property_type == PropertyType::Mixed {
            return Ok(StorageValue::Null);
        }
        return Err(CoreError::constraint(format!(
            "Required property `{}.{}` cannot be null",
            class.name, property.name
        )));
    }
    let converted = scalar_to_storage(value)
        .filter(|_| {
            property.property_type == PropertyType::Mixed
                || value.storage_type() == Some(property.property_type)
        })
        .ok_or_else(|| wrong_type(class, property, value))?;
    trace!(property = %property.name, value = %converted, "converted to storage");
    Ok(converted)
}

/// The error for assigning `value` to a property of another type.
pub(crate) fn wrong_type(class: &ClassMetadata, property: &PropertyMetadata, value: &Value) -> CoreError {
    CoreError::schema_mismatch(format!(
        "Property '{}.{}' of type '{}' cannot be assigned with value '{}' of type '{}'",
        class.name,
        property.name,
        property.type_description(),
        value,
        value.type_name()
    ))
}

/// Converts a stored value read in `generation` to a user value.
///
/// Links become dynamic object references of the same generation. Nested
/// collection markers are not handled here; callers that can meet them
/// resolve them into collection handles first.
pub(crate) fn to_user(
    realm: &Arc<RealmShared>,
    generation: GenerationPtr,
    value: StorageValue,
) -> CoreResult<Value> {
    match value {
        StorageValue::Link(link) => realm
            .object(ObjPtr {
                generation,
                class: link.class,
                key: link.key,
            })
            .map(Value::Object),
        StorageValue::List | StorageValue::Dictionary => Err(CoreError::illegal_argument(
            "Nested collections must be opened through their parent collection",
        )),
        other => scalar_from_storage(other).ok_or_else(|| {
            CoreError::illegal_argument("Unsupported storage value")
        }),
    }
}

/// Converts an object reference to a link usable in `generation`.
///
/// # Errors
///
/// - [`CoreError::IllegalArgument`] for unmanaged objects, which have no
///   native identity to link to, and for objects of another realm
/// - [`CoreError::InvalidatedObject`] for objects of another generation
pub(crate) fn link_to_storage(
    realm: &Arc<RealmShared>,
    generation: GenerationPtr,
    object: &Object,
) -> CoreResult<StorageValue> {
    let managed = object.as_managed().ok_or_else(|| {
        CoreError::illegal_argument(format!(
            "Cannot link to an unmanaged object of type '{}'",
            object.class_name()
        ))
    })?;
    if !Arc::ptr_eq(&managed.realm, realm) {
        return Err(CoreError::illegal_argument(
            "Cannot link to an object that belongs to another realm",
        ));
    }
    if managed.ptr.generation != generation {
        return Err(outdated_object());
    }
    Ok(StorageValue::Link(Link::new(managed.ptr.class, managed.ptr.key)))
}

/// The error for using a managed object from another generation.
pub(crate) fn outdated_object() -> CoreError {
    CoreError::invalidated(
        "Cannot import an outdated object. Use find_latest(object) to find an up-to-date version of the object in the given context before importing it.",
    )
}

/// A user type with a converter to and from [`Value`].
///
/// Implemented for every scalar the storage model supports, including the
/// narrow integer types that share the 64-bit storage integer, and for
/// `Option<T>` to express nullability.
pub trait Convert: Sized {
    /// Storage type values of this type are kept as.
    const PROPERTY_TYPE: PropertyType;

    /// Whether this type accepts null.
    const NULLABLE: bool = false;

    /// Name used in conversion errors.
    const TYPE_NAME: &'static str;

    /// Converts into a user value.
    fn into_value(self) -> Value;

    /// Converts from a user value.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ValueOutOfRange`] when an integer does not fit
    /// - [`CoreError::SchemaMismatch`] when the value has another type
    fn from_value(value: Value) -> CoreResult<Self>;
}

fn mismatch<T: Convert>(value: &Value) -> CoreError {
    CoreError::schema_mismatch(format!(
        "Cannot convert value '{value}' of type '{}' to '{}'",
        value.type_name(),
        T::TYPE_NAME
    ))
}

macro_rules! convert_int {
    ($($ty:ty),*) => {
        $(
            impl Convert for $ty {
                const PROPERTY_TYPE: PropertyType = PropertyType::Int;
                const TYPE_NAME: &'static str = stringify!($ty);

                fn into_value(self) -> Value {
                    Value::Int(i64::from(self))
                }

                fn from_value(value: Value) -> CoreResult<Self> {
                    match value {
                        Value::Int(v) => <$ty>::try_from(v)
                            .map_err(|_| CoreError::out_of_range(stringify!($ty), v)),
                        other => Err(mismatch::<Self>(&other)),
                    }
                }
            }
        )*
    };
}

convert_int!(i8, i16, i32, u8, u16, u32);

impl Convert for i64 {
    const PROPERTY_TYPE: PropertyType = PropertyType::Int;
    const TYPE_NAME: &'static str = "i64";

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Int(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl Convert for char {
    const PROPERTY_TYPE: PropertyType = PropertyType::Int;
    const TYPE_NAME: &'static str = "char";

    fn into_value(self) -> Value {
        Value::from(self)
    }

    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Int(v) => u32::try_from(v)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| CoreError::out_of_range("char", v)),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

macro_rules! convert_scalar {
    ($ty:ty, $variant:ident, $property_type:ident, $name:literal) => {
        impl Convert for $ty {
            const PROPERTY_TYPE: PropertyType = PropertyType::$property_type;
            const TYPE_NAME: &'static str = $name;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> CoreResult<Self> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(mismatch::<Self>(&other)),
                }
            }
        }
    };
}

convert_scalar!(bool, Bool, Bool, "bool");
convert_scalar!(String, String, String, "String");
convert_scalar!(Bytes, Binary, Binary, "Bytes");
convert_scalar!(f32, Float, Float, "f32");
convert_scalar!(f64, Double, Double, "f64");
convert_scalar!(Timestamp, Timestamp, Timestamp, "Timestamp");
convert_scalar!(Decimal128, Decimal128, Decimal128, "Decimal128");
convert_scalar!(ObjectId, ObjectId, ObjectId, "ObjectId");
convert_scalar!(Uuid, Uuid, Uuid, "Uuid");

impl Convert for AnyValue {
    const PROPERTY_TYPE: PropertyType = PropertyType::Mixed;
    const NULLABLE: bool = true;
    const TYPE_NAME: &'static str = "RealmAny";

    fn into_value(self) -> Value {
        AnyValue::into_value(self)
    }

    fn from_value(value: Value) -> CoreResult<Self> {
        AnyValue::new(value)
    }
}

impl<T: Convert> Convert for Option<T> {
    const PROPERTY_TYPE: PropertyType = T::PROPERTY_TYPE;
    const NULLABLE: bool = true;
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    fn into_value(self) -> Value {
        self.map_or(Value::Null, T::into_value)
    }

    fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// The user-facing name of a [`Convert`] type, for type-mismatch messages.
#[must_use]
pub fn convert_type_name<T: Convert>() -> String {
    let base = user_type_name(T::PROPERTY_TYPE);
    if T::NULLABLE {
        format!("{base}?")
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_codec::{ClassKey, CollectionKind, PropertyKey};

    fn class() -> ClassMetadata {
        ClassMetadata {
            name: "Sample".into(),
            key: ClassKey::new(0),
            primary_key: None,
            embedded: false,
            properties: Vec::new(),
        }
    }

    fn property(property_type: PropertyType, nullable: bool) -> PropertyMetadata {
        PropertyMetadata {
            name: "stringField".into(),
            public_name: None,
            key: PropertyKey::new(0),
            property_type,
            collection: CollectionKind::None,
            nullable,
            primary_key: false,
            indexed: false,
            fulltext: false,
            link_target: None,
            link_origin_property: None,
        }
    }

    #[test]
    fn narrowing_fails_instead_of_truncating() {
        assert_eq!(i8::from_value(Value::Int(127)).unwrap(), 127);
        assert_eq!(
            i8::from_value(Value::Int(128)).unwrap_err(),
            CoreError::out_of_range("i8", 128)
        );
        assert!(u8::from_value(Value::Int(-1)).is_err());
        assert!(i32::from_value(Value::Int(i64::from(i32::MIN))).is_ok());
        assert!(char::from_value(Value::Int(0xD800)).is_err());
    }

    #[test]
    fn option_accepts_null() {
        assert_eq!(Option::<i32>::from_value(Value::Null).unwrap(), None);
        assert_eq!(Option::<i32>::from_value(Value::Int(3)).unwrap(), Some(3));
        assert!(i32::from_value(Value::Null).is_err());
    }

    #[test]
    fn wrong_type_names_property_and_value() {
        let err = to_storage_checked(
            &class(),
            &property(PropertyType::String, false),
            &Value::Int(42),
        )
        .unwrap_err();
        let CoreError::SchemaMismatch { message } = err else {
            panic!("expected schema mismatch");
        };
        assert!(message.contains("Sample.stringField"));
        assert!(message.contains("'42'"));
    }

    #[test]
    fn null_on_required_property_is_a_constraint_violation() {
        let err = to_storage_checked(
            &class(),
            &property(PropertyType::String, false),
            &Value::Null,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
        assert!(to_storage_checked(&class(), &property(PropertyType::String, true), &Value::Null).is_ok());
    }

    #[test]
    fn storage_round_trip_for_every_scalar() {
        let values = vec![
            Value::Int(-5),
            Value::Bool(true),
            Value::from("text"),
            Value::Binary(Bytes::from_static(b"\x00\x01")),
            Value::Float(1.5),
            Value::Double(-2.25),
            Value::Timestamp(Timestamp::new(10, 20)),
            Value::Decimal128(Decimal128::from_i64(12)),
            Value::ObjectId(ObjectId::from_bytes([7; 12])),
            Value::Uuid(Uuid::nil()),
        ];
        for value in values {
            let stored = scalar_to_storage(&value).unwrap();
            assert_eq!(scalar_from_storage(stored).unwrap(), value);
        }
    }

    #[test]
    fn type_names_for_messages() {
        assert_eq!(convert_type_name::<i16>(), "Int");
        assert_eq!(convert_type_name::<Option<String>>(), "String?");
    }
}
