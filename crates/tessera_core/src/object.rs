//! Object references.
//!
//! An [`Object`] is either *managed*, backed by an engine handle in one
//! generation, or *unmanaged*, a plain property bag that has not been
//! imported yet. Cloning an `Object` clones the reference, not the data.

use crate::accessor;
use crate::assign::ObjectCache;
use crate::collections::{Dictionary, List, RealmSet};
use crate::converters::Convert;
use crate::error::{CoreError, CoreResult};
use crate::notifications::{ChangeStream, ObjectChange};
use crate::realm::RealmShared;
use crate::schema::ClassMetadata;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tessera_engine::ObjPtr;

/// A managed object's handle, class and owning realm.
pub(crate) struct ManagedObject {
    pub(crate) realm: Arc<RealmShared>,
    pub(crate) ptr: ObjPtr,
    pub(crate) class: Arc<ClassMetadata>,
}

enum ObjectState {
    Managed(ManagedObject),
    Unmanaged {
        class_name: String,
        properties: Mutex<BTreeMap<String, Value>>,
    },
}

/// A reference to a managed or unmanaged object.
#[derive(Clone)]
pub struct Object(Arc<ObjectState>);

impl Object {
    /// Creates an unmanaged object of the given class with no properties set.
    #[must_use]
    pub fn new(class_name: impl Into<String>) -> Self {
        Self(Arc::new(ObjectState::Unmanaged {
            class_name: class_name.into(),
            properties: Mutex::new(BTreeMap::new()),
        }))
    }

    /// Sets a property on an unmanaged object and returns it.
    ///
    /// Managed objects are written through [`Object::set`] inside a write
    /// transaction; on them this builder does nothing.
    #[must_use]
    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        if let ObjectState::Unmanaged { properties, .. } = self.0.as_ref() {
            properties.lock().insert(name.into(), value.into());
        }
        self
    }

    pub(crate) fn managed(realm: Arc<RealmShared>, ptr: ObjPtr, class: Arc<ClassMetadata>) -> Self {
        Self(Arc::new(ObjectState::Managed(ManagedObject { realm, ptr, class })))
    }

    pub(crate) fn as_managed(&self) -> Option<&ManagedObject> {
        match self.0.as_ref() {
            ObjectState::Managed(managed) => Some(managed),
            ObjectState::Unmanaged { .. } => None,
        }
    }

    pub(crate) fn require_managed(&self) -> CoreResult<&ManagedObject> {
        self.as_managed().ok_or_else(|| {
            CoreError::illegal_argument(format!(
                "Unmanaged object of type '{}' has no live state; import it with copy_to_realm first",
                self.class_name()
            ))
        })
    }

    /// Class metadata, for managed objects.
    pub(crate) fn managed_class(&self) -> Option<&Arc<ClassMetadata>> {
        self.as_managed().map(|m| &m.class)
    }

    /// Snapshot of an unmanaged object's property bag.
    pub(crate) fn unmanaged_properties(&self) -> Option<BTreeMap<String, Value>> {
        match self.0.as_ref() {
            ObjectState::Unmanaged { properties, .. } => Some(properties.lock().clone()),
            ObjectState::Managed(_) => None,
        }
    }

    /// Identity of this reference, stable for as long as any clone lives.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Name of the object's class.
    #[must_use]
    pub fn class_name(&self) -> &str {
        match self.0.as_ref() {
            ObjectState::Managed(managed) => &managed.class.name,
            ObjectState::Unmanaged { class_name, .. } => class_name,
        }
    }

    /// Returns true if the object is backed by an engine handle.
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.as_managed().is_some()
    }

    /// Returns true if the object can be read.
    ///
    /// Unmanaged objects are always valid. Managed objects stop being valid
    /// when deleted, when their generation advances or is released, and
    /// when the realm closes.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self.as_managed() {
            Some(managed) => managed.realm.engine.is_object_valid(&managed.ptr),
            None => true,
        }
    }

    /// Returns true if the object belongs to a frozen generation.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.as_managed().is_some_and(|m| m.ptr.generation.frozen)
    }

    /// Reads a property.
    ///
    /// Unmanaged objects return [`Value::Null`] for properties never set.
    ///
    /// # Errors
    ///
    /// Fails if the property does not exist or the object is invalid.
    pub fn get(&self, name: &str) -> CoreResult<Value> {
        match self.0.as_ref() {
            ObjectState::Managed(_) => accessor::get(self, name),
            ObjectState::Unmanaged { properties, .. } => {
                Ok(properties.lock().get(name).cloned().unwrap_or(Value::Null))
            }
        }
    }

    /// Reads a property as a concrete type.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::SchemaMismatch`] if the property's declared
    /// type differs from `T`, or with a conversion error if the value does
    /// not fit.
    pub fn get_as<T: Convert>(&self, name: &str) -> CoreResult<T> {
        match self.0.as_ref() {
            ObjectState::Managed(_) => accessor::get_checked::<T>(self, name),
            ObjectState::Unmanaged { .. } => T::from_value(self.get(name)?),
        }
    }

    /// Writes a property with the realm's default update policy.
    ///
    /// # Errors
    ///
    /// See [`accessor::set`].
    pub fn set(&self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        match self.0.as_ref() {
            ObjectState::Managed(managed) => {
                let policy = managed.realm.config.default_update_policy;
                let mut cache = ObjectCache::new();
                accessor::set(self, name, value.into(), policy, &mut cache)
            }
            ObjectState::Unmanaged { properties, .. } => {
                properties.lock().insert(name.to_string(), value.into());
                Ok(())
            }
        }
    }

    /// Adds `delta` to an integer counter property and returns the new value.
    ///
    /// # Errors
    ///
    /// Fails for unmanaged objects, and otherwise as [`accessor::increment`].
    pub fn increment(&self, name: &str, delta: i64) -> CoreResult<i64> {
        accessor::increment(self, name, delta)
    }

    /// Subtracts `delta` from an integer counter property.
    ///
    /// # Errors
    ///
    /// See [`Object::increment`]. Negating `i64::MIN` is out of range.
    pub fn decrement(&self, name: &str, delta: i64) -> CoreResult<i64> {
        let negated = delta
            .checked_neg()
            .ok_or_else(|| CoreError::out_of_range("i64", delta))?;
        accessor::increment(self, name, negated)
    }

    /// Opens a list property.
    ///
    /// # Errors
    ///
    /// Fails for unmanaged objects and for properties that are not lists.
    pub fn list(&self, name: &str) -> CoreResult<List> {
        List::for_property(self, name)
    }

    /// Opens a set property.
    ///
    /// # Errors
    ///
    /// Fails for unmanaged objects, for properties that are not sets, and
    /// with [`CoreError::Configuration`] for sets of embedded objects.
    pub fn realm_set(&self, name: &str) -> CoreResult<RealmSet> {
        RealmSet::for_property(self, name)
    }

    /// Opens a dictionary property.
    ///
    /// # Errors
    ///
    /// Fails for unmanaged objects and for properties that are not dictionaries.
    pub fn dictionary(&self, name: &str) -> CoreResult<Dictionary> {
        Dictionary::for_property(self, name)
    }

    /// Objects linking to this one through an inverse relationship property.
    ///
    /// # Errors
    ///
    /// Fails if `name` is not an inverse relationship.
    pub fn backlinks(&self, name: &str) -> CoreResult<Vec<Object>> {
        accessor::get_backlinks(self, name)
    }

    /// Observes changes to this object.
    ///
    /// # Errors
    ///
    /// Fails for unmanaged or invalid objects.
    pub fn observe(&self) -> CoreResult<ChangeStream<ObjectChange>> {
        crate::notifications::observe_object(self)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self.as_managed(), other.as_managed()) {
            (Some(a), Some(b)) => {
                Arc::ptr_eq(&a.realm, &b.realm)
                    && a.ptr.class == b.ptr.class
                    && a.ptr.key == b.ptr.key
            }
            (None, None) => Arc::ptr_eq(&self.0, &other.0),
            _ => false,
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_ref() {
            ObjectState::Managed(managed) => f
                .debug_struct("Object")
                .field("class", &managed.class.name)
                .field("key", &managed.ptr.key)
                .field("generation", &managed.ptr.generation)
                .finish(),
            ObjectState::Unmanaged { class_name, .. } => f
                .debug_struct("Object")
                .field("class", class_name)
                .field("managed", &false)
                .finish(),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_ref() {
            ObjectState::Managed(managed) => {
                write!(f, "{}[{}]", managed.class.name, managed.ptr.key)
            }
            ObjectState::Unmanaged { class_name, .. } => write!(f, "{class_name}{{unmanaged}}"),
        }
    }
}

/// A typed wrapper around [`Object`] for one class.
///
/// The static API reads links through these wrappers; the dynamic API
/// works with [`Object`] directly.
pub trait RealmObject: Sized {
    /// Name of the wrapped class.
    const CLASS_NAME: &'static str;

    /// Wraps an object already known to be of this class.
    fn from_object(object: Object) -> Self;

    /// Borrows the wrapped object.
    fn as_object(&self) -> &Object;
}

impl Object {
    /// Reads a link property through a typed wrapper.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::SchemaMismatch`] if the linked object is not
    /// of class `T::CLASS_NAME`.
    pub fn get_object<T: RealmObject>(&self, name: &str) -> CoreResult<Option<T>> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Object(object) => crate::mediator::Mediator::typed(object).map(Some),
            other => Err(CoreError::schema_mismatch(format!(
                "Trying to access property '{}.{name}' as type: '{}' but actual value is '{}'",
                self.class_name(),
                T::CLASS_NAME,
                other.type_name()
            ))),
        }
    }
}
