//! Element handling shared by the collection operators.
//!
//! Each collection holds one kind of element, fixed by its property:
//! primitives, links to top-level objects, embedded objects owned by the
//! collection, or polymorphic values. Operators check every incoming value
//! with [`ElementKind::check`] before the first engine call, then turn it
//! into a [`Prepared`] write.

use super::CollectionCore;
use crate::any::check_any;
use crate::assign::{self, ObjectCache};
use crate::converters::{self, to_storage_checked, wrong_type};
use crate::error::{CoreError, CoreResult};
use crate::schema::{ClassMetadata, PropertyMetadata, SchemaMetadata};
use crate::types::UpdatePolicy;
use crate::value::Value;
use std::sync::Arc;
use tessera_codec::{CollectionKind, PropertyType, StorageValue};
use tessera_engine::PathElement;

/// What a collection holds.
#[derive(Debug, Clone)]
pub(crate) enum ElementKind {
    Primitive,
    Object(Arc<ClassMetadata>),
    Embedded(Arc<ClassMetadata>),
    Any,
}

/// A checked value ready to be written.
pub(crate) enum Prepared {
    /// A storage value, including links.
    Value(StorageValue),
    /// A new embedded child to be filled from this source.
    Embedded(crate::object::Object),
    /// A nested collection to be created and filled with these contents.
    Nested(CollectionKind, Value),
}

impl ElementKind {
    /// Resolves the element kind of a collection property.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] for sets of embedded objects.
    pub(crate) fn for_property(
        schema: &SchemaMetadata,
        property: &PropertyMetadata,
    ) -> CoreResult<Self> {
        match property.property_type {
            PropertyType::Object => {
                let target = schema.require(property.link_target.as_deref().unwrap_or_default())?;
                if !target.embedded {
                    return Ok(Self::Object(Arc::clone(target)));
                }
                if property.collection == CollectionKind::Set {
                    return Err(CoreError::configuration(
                        "RealmSets do not support Embedded Objects.",
                    ));
                }
                Ok(Self::Embedded(Arc::clone(target)))
            }
            PropertyType::Mixed => Ok(Self::Any),
            _ => Ok(Self::Primitive),
        }
    }

    fn check_null(core: &CollectionCore) -> CoreResult<()> {
        if core.property.nullable {
            return Ok(());
        }
        Err(CoreError::constraint(format!(
            "Required property `{}.{}` cannot hold null elements",
            core.owner.name, core.property.name
        )))
    }

    /// Checks a value without touching the engine.
    pub(crate) fn check(&self, core: &CollectionCore, value: &Value) -> CoreResult<()> {
        match self {
            Self::Primitive => to_storage_checked(&core.owner, &core.property, value).map(drop),
            Self::Object(target) | Self::Embedded(target) => match value {
                Value::Null => Self::check_null(core),
                Value::Object(object) if object.class_name() == target.name => Ok(()),
                other => Err(wrong_type(&core.owner, &core.property, other)),
            },
            Self::Any => {
                if core.kind == CollectionKind::Set && value.collection_kind().is_collection() {
                    return Err(CoreError::illegal_argument(
                        "Sets cannot contain other collections",
                    ));
                }
                check_any(Some(core.realm.schema()), value, core.nested)
            }
        }
    }

    /// Turns a checked value into a write, importing unmanaged objects.
    pub(crate) fn prepare(
        &self,
        core: &CollectionCore,
        value: Value,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<Prepared> {
        let generation = core.generation();
        Ok(match (self, value) {
            (Self::Primitive, value) => {
                Prepared::Value(to_storage_checked(&core.owner, &core.property, &value)?)
            }
            (_, Value::Null) => Prepared::Value(StorageValue::Null),
            (Self::Embedded(_), Value::Object(source)) => {
                Prepared::Embedded(assign::detach_embedded(&source)?)
            }
            (Self::Object(_) | Self::Any, Value::Object(source)) => {
                let imported = assign::copy_to_realm(&core.realm, generation, &source, policy, cache)?;
                Prepared::Value(converters::link_to_storage(&core.realm, generation, &imported)?)
            }
            (Self::Any, value @ (Value::List(_) | Value::Dictionary(_) | Value::Collection(_))) => {
                let kind = match value.collection_kind() {
                    CollectionKind::Dictionary => CollectionKind::Dictionary,
                    _ => CollectionKind::List,
                };
                let contents = match value {
                    Value::Collection(collection) => collection.snapshot()?,
                    other => other,
                };
                Prepared::Nested(kind, contents)
            }
            (Self::Any, other) => {
                Prepared::Value(to_storage_checked(&core.owner, &core.property, &other)?)
            }
            (_, other) => return Err(wrong_type(&core.owner, &core.property, &other)),
        })
    }

    /// The storage form of `value` for lookups, without importing anything.
    ///
    /// Returns `None` for values that cannot be in the collection, such as
    /// unmanaged objects or objects of another generation.
    pub(crate) fn lookup(&self, core: &CollectionCore, value: &Value) -> Option<StorageValue> {
        match value {
            Value::Object(object) => {
                converters::link_to_storage(&core.realm, core.generation(), object).ok()
            }
            Value::List(_) | Value::Set(_) | Value::Dictionary(_) | Value::Collection(_) => None,
            other => match self {
                Self::Primitive | Self::Any => {
                    to_storage_checked(&core.owner, &core.property, other).ok()
                }
                Self::Object(_) | Self::Embedded(_) => other.is_null().then_some(StorageValue::Null),
            },
        }
    }

    /// Converts a stored element to a user value.
    ///
    /// `step` locates the element for nested collection markers.
    pub(crate) fn to_user(
        &self,
        core: &CollectionCore,
        raw: StorageValue,
        step: Option<PathElement>,
    ) -> CoreResult<Value> {
        match raw {
            StorageValue::List | StorageValue::Dictionary => {
                let kind = if raw == StorageValue::List {
                    CollectionKind::List
                } else {
                    CollectionKind::Dictionary
                };
                match (step, core.ptr.as_ref()) {
                    (Some(step), Some(ptr)) => {
                        Ok(Value::Collection(core.child(ptr.child(step, kind)).into_managed()))
                    }
                    _ => Ok(Value::Null),
                }
            }
            raw => converters::to_user(&core.realm, core.generation(), raw),
        }
    }
}
