//! Polymorphic values.

use crate::converters::Convert;
use crate::error::{CoreError, CoreResult};
use crate::schema::SchemaMetadata;
use crate::value::Value;
use std::fmt;
use tessera_codec::PropertyType;

/// What a polymorphic value currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnyType {
    /// Nothing.
    Null,
    /// A scalar of the given storage type.
    Scalar(PropertyType),
    /// A reference to a top-level object.
    Object,
    /// A nested list.
    List,
    /// A nested dictionary.
    Dictionary,
}

/// A value of a polymorphic property.
///
/// Holds any scalar, a reference to a top-level object, or one level of
/// nested list or dictionary. Sets, embedded objects and collections nested
/// inside nested collections are rejected on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct AnyValue(Value);

impl AnyValue {
    /// Wraps a value after checking it can live in a polymorphic slot.
    ///
    /// # Errors
    ///
    /// - [`CoreError::IllegalArgument`] for sets
    /// - [`CoreError::ConstraintViolation`] for embedded objects and
    ///   collections nested more than one level deep
    pub fn new(value: impl Into<Value>) -> CoreResult<Self> {
        let value = value.into();
        check_any(None, &value, false)?;
        Ok(Self(value))
    }

    /// The null value.
    #[must_use]
    pub const fn null() -> Self {
        Self(Value::Null)
    }

    /// The kind of value held, so callers can narrow it.
    #[must_use]
    pub fn any_type(&self) -> AnyType {
        match &self.0 {
            Value::Null => AnyType::Null,
            Value::Object(_) => AnyType::Object,
            Value::List(_) | Value::Set(_) => AnyType::List,
            Value::Dictionary(_) => AnyType::Dictionary,
            Value::Collection(c) => match c.kind() {
                tessera_codec::CollectionKind::Dictionary => AnyType::Dictionary,
                _ => AnyType::List,
            },
            other => other
                .storage_type()
                .map_or(AnyType::Null, AnyType::Scalar),
        }
    }

    /// Narrows the held value to a concrete type.
    ///
    /// # Errors
    ///
    /// Fails if the held value has another type or does not fit `T`.
    pub fn get<T: Convert>(&self) -> CoreResult<T> {
        T::from_value(self.0.clone())
    }

    /// Borrows the held value.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Unwraps the held value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl Default for AnyValue {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RealmAny({})", self.0)
    }
}

/// Checks that `value` may be stored in a polymorphic slot.
///
/// `nested` is true when the slot itself belongs to a collection stored in
/// another polymorphic slot. With a schema at hand, references to embedded
/// classes are rejected even when the object is unmanaged.
pub(crate) fn check_any(
    schema: Option<&SchemaMetadata>,
    value: &Value,
    nested: bool,
) -> CoreResult<()> {
    match value {
        Value::Set(_) => Err(CoreError::illegal_argument(
            "RealmAny cannot hold a RealmSet",
        )),
        Value::Collection(c) if c.kind() == tessera_codec::CollectionKind::Set => Err(
            CoreError::illegal_argument("RealmAny cannot hold a RealmSet"),
        ),
        Value::List(_) | Value::Dictionary(_) | Value::Collection(_) if nested => {
            Err(CoreError::constraint(
                "RealmAny collections cannot be nested more than one level deep",
            ))
        }
        Value::List(items) => items.iter().try_for_each(|v| check_any(schema, v, true)),
        Value::Dictionary(entries) => entries
            .values()
            .try_for_each(|v| check_any(schema, v, true)),
        Value::Object(object) => {
            let embedded = match object.managed_class() {
                Some(class) => class.embedded,
                None => schema
                    .and_then(|s| s.get(object.class_name()))
                    .is_some_and(|class| class.embedded),
            };
            if embedded {
                return Err(CoreError::constraint(format!(
                    "Cannot add embedded object of type '{}' to RealmAny",
                    object.class_name()
                )));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn scalars_are_tagged_with_their_type() {
        let any = AnyValue::new(5i32).unwrap();
        assert_eq!(any.any_type(), AnyType::Scalar(PropertyType::Int));
        assert_eq!(any.get::<i64>().unwrap(), 5);
        assert!(any.get::<String>().is_err());
        assert_eq!(AnyValue::null().any_type(), AnyType::Null);
    }

    #[test]
    fn one_level_of_nesting_is_allowed() {
        let any = AnyValue::new(vec![1i64, 2, 3]).unwrap();
        assert_eq!(any.any_type(), AnyType::List);

        let mut entries = BTreeMap::new();
        entries.insert("k".to_string(), Value::from("v"));
        let any = AnyValue::new(Value::Dictionary(entries)).unwrap();
        assert_eq!(any.any_type(), AnyType::Dictionary);
    }

    #[test]
    fn deeper_nesting_is_rejected() {
        let nested = Value::List(vec![Value::from(vec![1i64])]);
        let err = AnyValue::new(nested).unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
    }

    #[test]
    fn sets_are_rejected() {
        let err = AnyValue::new(Value::Set(vec![Value::Int(1)])).unwrap_err();
        assert!(matches!(err, CoreError::IllegalArgument { .. }));
    }
}
