//! Reading and writing one property of a managed object.
//!
//! Every entry point resolves the property through the class metadata
//! loaded at open time, checks the caller's value or expected type against
//! it, and only then calls the engine. A value rejected by the check leaves
//! the object untouched.

use crate::any::check_any;
use crate::assign::{self, ObjectCache};
use crate::collections::ManagedCollection;
use crate::converters::{self, to_storage_checked, wrong_type, Convert};
use crate::error::{CoreError, CoreResult};
use crate::object::{ManagedObject, Object};
use crate::schema::{ClassMetadata, PropertyMetadata};
use crate::scope::{GetterScope, SetterScope};
use crate::types::{TypeDescription, UpdatePolicy};
use crate::value::Value;
use std::sync::Arc;
use tessera_codec::{CollectionKind, PropertyType, StorageValue};
use tessera_engine::ErrorCode;
use tracing::trace;

fn resolve<'a>(object: &'a Object, name: &str) -> CoreResult<(&'a ManagedObject, &'a PropertyMetadata)> {
    let managed = object.require_managed()?;
    let property = managed.class.require(name)?;
    Ok((managed, property))
}

fn type_mismatch(class: &ClassMetadata, property: &PropertyMetadata, expected: &TypeDescription) -> CoreError {
    CoreError::schema_mismatch(format!(
        "Trying to access property '{}.{}' as type: '{expected}' but actual schema type is '{}'",
        class.name,
        property.name,
        property.type_description()
    ))
}

/// Reads a property.
///
/// Collections are returned as live [`Value::Collection`] handles, links as
/// dynamic [`Object`]s of the same generation, and inverse relationships as
/// a list of the linking objects.
///
/// # Errors
///
/// Fails if the property does not exist or the object is invalid.
pub fn get(object: &Object, name: &str) -> CoreResult<Value> {
    let (managed, property) = resolve(object, name)?;
    if property.is_computed() {
        return get_backlinks(object, name).map(|objects| {
            Value::List(objects.into_iter().map(Value::Object).collect())
        });
    }
    if property.collection.is_collection() {
        return ManagedCollection::for_property(object, property).map(Value::Collection);
    }
    let engine = &managed.realm.engine;
    let raw = GetterScope::run(|scope| scope.call(|| engine.get_value(&managed.ptr, property.key)))?;
    trace!(class = %managed.class.name, property = %property.name, value = %raw, "read property");
    match raw {
        StorageValue::List | StorageValue::Dictionary => {
            let ptr = GetterScope::run(|scope| scope.call(|| engine.collection(&managed.ptr, property.key)))?;
            ManagedCollection::nested(object, property, ptr).map(Value::Collection)
        }
        raw => converters::to_user(&managed.realm, managed.ptr.generation, raw),
    }
}

/// Reads a property after checking it has the `expected` type.
///
/// Nullability is compared after normalization: polymorphic properties are
/// nullable by nature.
///
/// # Errors
///
/// Returns [`CoreError::SchemaMismatch`] naming `Class.property` with both
/// the expected and the declared type if they differ.
pub fn get_typed(object: &Object, name: &str, expected: &TypeDescription) -> CoreResult<Value> {
    let (managed, property) = resolve(object, name)?;
    if !property.type_description().matches(expected) {
        return Err(type_mismatch(&managed.class, property, expected));
    }
    get(object, name)
}

/// Reads a scalar property as `T`.
///
/// # Errors
///
/// Returns [`CoreError::SchemaMismatch`] if `T` does not match the declared
/// type and [`CoreError::ValueOutOfRange`] if the stored integer does not
/// fit `T`.
pub fn get_checked<T: Convert>(object: &Object, name: &str) -> CoreResult<T> {
    let expected = TypeDescription::scalar(T::PROPERTY_TYPE).nullable(T::NULLABLE);
    T::from_value(get_typed(object, name, &expected)?)
}

/// Objects linking to `object` through the inverse relationship `name`.
///
/// # Errors
///
/// Returns [`CoreError::IllegalArgument`] if `name` is not an inverse
/// relationship.
pub fn get_backlinks(object: &Object, name: &str) -> CoreResult<Vec<Object>> {
    let (managed, property) = resolve(object, name)?;
    if !property.is_computed() {
        return Err(CoreError::illegal_argument(format!(
            "Property '{}.{}' is not an inverse relationship",
            managed.class.name, property.name
        )));
    }
    let engine = &managed.realm.engine;
    GetterScope::run(|scope| scope.call(|| engine.backlinks(&managed.ptr, property.key)))?
        .into_iter()
        .map(|ptr| managed.realm.object(ptr))
        .collect()
}

/// Writes a property.
///
/// - scalars are converted and written inside a [`SetterScope`]
/// - a link to an embedded class creates a new child and fills it; the
///   previous child is deleted with the replacement
/// - a link to a top-level class links managed objects of the same
///   generation and imports unmanaged ones with `policy` and `cache`
/// - a collection is cleared and refilled, unless `value` is the very
///   collection already held
/// - the primary key may only be written with its current value
///
/// # Errors
///
/// - [`CoreError::SchemaMismatch`] for a value of the wrong type, before
///   anything is written
/// - [`CoreError::ConstraintViolation`] for null on a required property,
///   for computed properties and for primary key changes
/// - [`CoreError::TransactionState`] outside a write transaction
pub fn set(
    object: &Object,
    name: &str,
    value: Value,
    policy: UpdatePolicy,
    cache: &mut ObjectCache,
) -> CoreResult<()> {
    let (managed, property) = resolve(object, name)?;
    let class = &managed.class;
    if property.is_computed() {
        return Err(CoreError::constraint(format!(
            "Property '{}.{}' is computed and cannot be set",
            class.name, property.name
        )));
    }
    if property.collection.is_collection() {
        let collection = ManagedCollection::for_property(object, property)?;
        return collection.assign(value, policy, cache);
    }
    match property.property_type {
        PropertyType::Object => set_link(managed, property, value, policy, cache),
        PropertyType::Mixed => set_mixed(object, managed, property, value, policy, cache),
        _ => {
            let converted = to_storage_checked(class, property, &value)?;
            if property.primary_key {
                return check_primary_key(managed, property, &converted);
            }
            let engine = &managed.realm.engine;
            SetterScope::run(|scope| {
                scope.with_staged(converted, |staged| {
                    engine.set_value(&managed.ptr, property.key, staged)
                })
            })
        }
    }
}

/// Adds `delta` to an integer counter property and returns the new value.
///
/// The engine applies the addition to the stored value in place.
///
/// # Errors
///
/// - [`CoreError::SchemaMismatch`] unless the property is a non-nullable
///   `int`
/// - [`CoreError::ValueOutOfRange`] carrying the unchanged value if the sum
///   overflows
/// - [`CoreError::ConstraintViolation`] for the primary key
/// - [`CoreError::TransactionState`] outside a write transaction
pub fn increment(object: &Object, name: &str, delta: i64) -> CoreResult<i64> {
    let (managed, property) = resolve(object, name)?;
    let expected = TypeDescription::scalar(PropertyType::Int);
    if !property.type_description().matches(&expected) {
        return Err(type_mismatch(&managed.class, property, &expected));
    }
    let engine = &managed.realm.engine;
    match engine.add_int(&managed.ptr, property.key, delta) {
        Ok(value) => {
            trace!(class = %managed.class.name, property = %property.name, delta, value, "incremented counter");
            Ok(value)
        }
        Err(error) if error.code == ErrorCode::RangeError => {
            let current = GetterScope::run(|scope| scope.call(|| engine.get_value(&managed.ptr, property.key)))?;
            Err(CoreError::out_of_range("i64", current.as_int().unwrap_or(delta)))
        }
        Err(error) => Err(error.into()),
    }
}

fn check_primary_key(
    managed: &ManagedObject,
    property: &PropertyMetadata,
    value: &StorageValue,
) -> CoreResult<()> {
    let engine = &managed.realm.engine;
    let current = GetterScope::run(|scope| scope.call(|| engine.get_value(&managed.ptr, property.key)))?;
    if &current == value {
        return Ok(());
    }
    Err(CoreError::constraint(format!(
        "Cannot update primary key property '{}.{}'",
        managed.class.name, property.name
    )))
}

fn set_link(
    managed: &ManagedObject,
    property: &PropertyMetadata,
    value: Value,
    policy: UpdatePolicy,
    cache: &mut ObjectCache,
) -> CoreResult<()> {
    let class = &managed.class;
    let realm = &managed.realm;
    let engine = &realm.engine;
    let target = realm
        .schema()
        .require(property.link_target.as_deref().unwrap_or_default())?;
    let source = match value {
        Value::Null => {
            if !property.nullable {
                return Err(CoreError::constraint(format!(
                    "Required property `{}.{}` cannot be null",
                    class.name, property.name
                )));
            }
            return SetterScope::run(|scope| {
                scope.with_staged(StorageValue::Null, |staged| {
                    engine.set_value(&managed.ptr, property.key, staged)
                })
            });
        }
        Value::Object(source) if source.class_name() == target.name => source,
        other => return Err(wrong_type(class, property, &other)),
    };

    if target.embedded {
        if let (Some(current), Some(incoming)) = (current_link(managed, property)?, source.as_managed()) {
            if current == incoming.ptr.key && Arc::ptr_eq(&incoming.realm, realm) {
                return Ok(());
            }
        }
        let snapshot = assign::detach_embedded(&source)?;
        let child = engine.set_embedded(&managed.ptr, property.key)?;
        trace!(class = %class.name, property = %property.name, child = %child.key, "replaced embedded child");
        let child = realm.object(child)?;
        return assign::fill_embedded(&child, &snapshot, policy, cache);
    }

    let imported = assign::copy_to_realm(realm, managed.ptr.generation, &source, policy, cache)?;
    let link = converters::link_to_storage(realm, managed.ptr.generation, &imported)?;
    SetterScope::run(|scope| {
        scope.with_staged(link, |staged| {
            engine.set_value(&managed.ptr, property.key, staged)
        })
    })
}

fn current_link(
    managed: &ManagedObject,
    property: &PropertyMetadata,
) -> CoreResult<Option<tessera_codec::ObjKey>> {
    let engine = &managed.realm.engine;
    let current = GetterScope::run(|scope| scope.call(|| engine.get_value(&managed.ptr, property.key)))?;
    Ok(current.as_link().map(|link| link.key))
}

fn set_mixed(
    object: &Object,
    managed: &ManagedObject,
    property: &PropertyMetadata,
    value: Value,
    policy: UpdatePolicy,
    cache: &mut ObjectCache,
) -> CoreResult<()> {
    let realm = &managed.realm;
    let engine = &realm.engine;
    check_any(Some(realm.schema()), &value, false)?;
    let converted = match value {
        Value::Object(source) => {
            let imported =
                assign::copy_to_realm(realm, managed.ptr.generation, &source, policy, cache)?;
            converters::link_to_storage(realm, managed.ptr.generation, &imported)?
        }
        value @ (Value::List(_) | Value::Dictionary(_) | Value::Collection(_)) => {
            let kind = match value.collection_kind() {
                CollectionKind::Dictionary => CollectionKind::Dictionary,
                _ => CollectionKind::List,
            };
            let contents = match value {
                Value::Collection(collection) => collection.snapshot()?,
                other => other,
            };
            let ptr = engine.set_collection(&managed.ptr, property.key, kind)?;
            let nested = ManagedCollection::nested(object, property, ptr)?;
            return nested.assign(contents, policy, cache);
        }
        other => to_storage_checked(&managed.class, property, &other)?,
    };
    SetterScope::run(|scope| {
        scope.with_staged(converted, |staged| {
            engine.set_value(&managed.ptr, property.key, staged)
        })
    })
}
