//! Collection operators.
//!
//! [`List`], [`RealmSet`] and [`Dictionary`] wrap an engine collection
//! handle and implement mutation semantics for each element kind:
//!
//! - primitives are converted and checked against the property type
//! - links to top-level objects import unmanaged objects before linking
//! - embedded objects are created inside the collection and filled;
//!   replacing one creates the new child before the old one is deleted
//! - polymorphic values may hold one level of nested list or dictionary
//!
//! Every value is checked before the first engine call, so a rejected
//! `insert_all` or assignment leaves the collection as it was.
//!
//! A handle whose parent object was deleted, or that could not be resolved
//! in a newer generation, reads as empty and fails every mutation with
//! [`CoreError::InvalidatedObject`].

mod dictionary;
mod element;
mod list;
mod set;

pub use dictionary::Dictionary;
pub use list::List;
pub use set::RealmSet;

use crate::assign::ObjectCache;
use crate::error::{CoreError, CoreResult};
use crate::object::Object;
use crate::realm::RealmShared;
use crate::schema::{ClassMetadata, PropertyMetadata};
use crate::types::{TypeDescription, UpdatePolicy};
use crate::value::Value;
use element::{ElementKind, Prepared};
use std::fmt;
use std::sync::Arc;
use tessera_codec::{CollectionKind, PropertyType};
use tessera_engine::{CollectionPtr, GenerationPtr};
use tracing::debug;

/// State shared by the three operators.
#[derive(Clone)]
pub(crate) struct CollectionCore {
    realm: Arc<RealmShared>,
    generation: GenerationPtr,
    ptr: Option<CollectionPtr>,
    kind: CollectionKind,
    owner: Arc<ClassMetadata>,
    property: PropertyMetadata,
    element: ElementKind,
    nested: bool,
}

impl CollectionCore {
    fn for_property(object: &Object, name: &str, kind: CollectionKind) -> CoreResult<Self> {
        let managed = object.require_managed()?;
        let property = managed.class.require(name)?;
        if property.collection != kind {
            let expected = TypeDescription::scalar(property.property_type)
                .collection(kind)
                .nullable(property.nullable);
            return Err(CoreError::schema_mismatch(format!(
                "Trying to access property '{}.{}' as type: '{expected}' but actual schema type is '{}'",
                managed.class.name,
                property.name,
                property.type_description()
            )));
        }
        Self::open(object, property)
    }

    fn open(object: &Object, property: &PropertyMetadata) -> CoreResult<Self> {
        let managed = object.require_managed()?;
        let element = ElementKind::for_property(managed.realm.schema(), property)?;
        let ptr = managed.realm.engine.collection(&managed.ptr, property.key)?;
        Ok(Self {
            realm: Arc::clone(&managed.realm),
            generation: managed.ptr.generation,
            kind: ptr.kind,
            ptr: Some(ptr),
            owner: Arc::clone(&managed.class),
            property: property.clone(),
            element,
            nested: false,
        })
    }

    fn nested(object: &Object, property: &PropertyMetadata, ptr: CollectionPtr) -> CoreResult<Self> {
        let managed = object.require_managed()?;
        Ok(Self {
            realm: Arc::clone(&managed.realm),
            generation: managed.ptr.generation,
            kind: ptr.kind,
            ptr: Some(ptr),
            owner: Arc::clone(&managed.class),
            property: property.clone(),
            element: ElementKind::Any,
            nested: true,
        })
    }

    /// A collection stored in one of this collection's polymorphic slots.
    pub(crate) fn child(&self, ptr: CollectionPtr) -> Self {
        Self {
            realm: Arc::clone(&self.realm),
            generation: self.generation,
            kind: ptr.kind,
            ptr: Some(ptr),
            owner: Arc::clone(&self.owner),
            property: self.property.clone(),
            element: ElementKind::Any,
            nested: true,
        }
    }

    pub(crate) fn generation(&self) -> GenerationPtr {
        self.generation
    }

    /// The live handle, or an error if the collection could not be resolved.
    fn ptr(&self) -> CoreResult<&CollectionPtr> {
        self.ptr.as_ref().ok_or_else(|| {
            CoreError::invalidated(format!(
                "Collection '{}.{}' is no longer valid: its parent object was deleted",
                self.owner.name, self.property.name
            ))
        })
    }

    /// The handle, checked against the engine before a mutation.
    fn live(&self) -> CoreResult<&CollectionPtr> {
        let ptr = self.ptr()?;
        if self.realm.engine.is_collection_valid(ptr) {
            return Ok(ptr);
        }
        Err(CoreError::invalidated(format!(
            "Collection '{}.{}' is no longer valid: its parent object was deleted or its generation has advanced",
            self.owner.name, self.property.name
        )))
    }

    fn check_all<'a>(&self, values: impl IntoIterator<Item = &'a Value>) -> CoreResult<()> {
        values
            .into_iter()
            .try_for_each(|value| self.element.check(self, value))
    }

    fn prepare(&self, value: Value, policy: UpdatePolicy, cache: &mut ObjectCache) -> CoreResult<Prepared> {
        self.element.prepare(self, value, policy, cache)
    }

    fn len(&self) -> CoreResult<usize> {
        match &self.ptr {
            Some(ptr) => Ok(self.realm.engine.collection_size(ptr)?),
            None => Ok(0),
        }
    }

    fn clear(&self) -> CoreResult<()> {
        let ptr = self.live()?;
        self.realm.engine.collection_clear(ptr)?;
        debug!(class = %self.owner.name, property = %self.property.name, "cleared collection");
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.ptr
            .as_ref()
            .is_some_and(|ptr| self.realm.engine.is_collection_valid(ptr))
    }

    fn resolve_in(&self, generation: GenerationPtr) -> CoreResult<Self> {
        let ptr = match &self.ptr {
            Some(ptr) => self.realm.engine.resolve_collection(ptr, &generation)?,
            None => None,
        };
        Ok(Self {
            generation,
            ptr,
            ..self.clone()
        })
    }

    /// Fills a freshly created embedded child.
    fn fill_embedded(
        &self,
        child: tessera_engine::ObjPtr,
        source: &Object,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<Object> {
        let child = self.realm.object(child)?;
        crate::assign::fill_embedded(&child, source, policy, cache)?;
        Ok(child)
    }

    /// Fills a freshly created nested collection.
    fn fill_nested(
        &self,
        ptr: CollectionPtr,
        contents: Value,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<()> {
        self.child(ptr).into_managed().assign(contents, policy, cache)
    }

    pub(crate) fn into_managed(self) -> ManagedCollection {
        match self.kind {
            CollectionKind::Set => ManagedCollection::Set(RealmSet::from_core(self)),
            CollectionKind::Dictionary => ManagedCollection::Dictionary(Dictionary::from_core(self)),
            _ => ManagedCollection::List(List::from_core(self)),
        }
    }

    fn type_description(&self) -> TypeDescription {
        if self.nested {
            return TypeDescription::scalar(PropertyType::Mixed).collection(self.kind);
        }
        self.property.type_description()
    }
}

/// Turns a value about to leave its slot into one that outlives it.
///
/// Embedded objects become unmanaged copies and live collections become
/// snapshots; everything else is returned as it is.
fn detach(value: Value) -> CoreResult<Value> {
    match value {
        Value::Object(object) => crate::assign::detach_embedded(&object).map(Value::Object),
        Value::Collection(collection) => collection.snapshot(),
        other => Ok(other),
    }
}

impl PartialEq for CollectionCore {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.realm, &other.realm) && self.ptr == other.ptr && self.ptr.is_some()
    }
}

impl fmt::Debug for CollectionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("owner", &self.owner.name)
            .field("property", &self.property.name)
            .field("kind", &self.kind)
            .field("ptr", &self.ptr)
            .finish()
    }
}

impl fmt::Display for CollectionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_description())
    }
}

/// A live collection of any kind, as held in a [`Value`].
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedCollection {
    /// A list.
    List(List),
    /// A set.
    Set(RealmSet),
    /// A dictionary.
    Dictionary(Dictionary),
}

impl ManagedCollection {
    pub(crate) fn for_property(object: &Object, property: &PropertyMetadata) -> CoreResult<Self> {
        Ok(CollectionCore::open(object, property)?.into_managed())
    }

    pub(crate) fn nested(
        object: &Object,
        property: &PropertyMetadata,
        ptr: CollectionPtr,
    ) -> CoreResult<Self> {
        Ok(CollectionCore::nested(object, property, ptr)?.into_managed())
    }

    fn core(&self) -> &CollectionCore {
        match self {
            Self::List(list) => &list.core,
            Self::Set(set) => &set.core,
            Self::Dictionary(dictionary) => &dictionary.core,
        }
    }

    /// The kind of collection.
    #[must_use]
    pub fn kind(&self) -> CollectionKind {
        self.core().kind
    }

    /// Number of elements.
    ///
    /// # Errors
    ///
    /// Fails if the parent object is invalid.
    pub fn len(&self) -> CoreResult<usize> {
        self.core().len()
    }

    /// Copies the current elements into a detached value.
    ///
    /// Elements keep their user form: objects stay references.
    ///
    /// # Errors
    ///
    /// Fails if the parent object is invalid.
    pub fn snapshot(&self) -> CoreResult<Value> {
        Ok(match self {
            Self::List(list) => Value::List(list.values()?),
            Self::Set(set) => Value::Set(set.values()?),
            Self::Dictionary(dictionary) => Value::Dictionary(dictionary.entries()?.into_iter().collect()),
        })
    }

    /// Replaces the whole contents with `value`.
    ///
    /// Assigning the collection to itself does nothing. Otherwise every new
    /// element is checked, the collection is cleared and the elements are
    /// inserted in order with `policy` and `cache`.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::SchemaMismatch`] if `value` is not a
    /// collection of the right shape; nothing is changed in that case.
    pub fn assign(&self, value: Value, policy: UpdatePolicy, cache: &mut ObjectCache) -> CoreResult<()> {
        if let Value::Collection(incoming) = &value {
            if incoming == self {
                return Ok(());
            }
        }
        let core = self.core();
        let contents = match value {
            Value::Collection(incoming) => incoming.snapshot()?,
            Value::Null => match core.kind {
                CollectionKind::Dictionary => Value::Dictionary(Default::default()),
                _ => Value::List(Vec::new()),
            },
            other => other,
        };
        match (self, contents) {
            (Self::List(list), Value::List(items) | Value::Set(items)) => list.replace(items, policy, cache),
            (Self::Set(set), Value::List(items) | Value::Set(items)) => set.replace(items, policy, cache),
            (Self::Dictionary(dictionary), Value::Dictionary(entries)) => {
                dictionary.replace(entries.into_iter().collect(), policy, cache)
            }
            (_, other) => Err(crate::converters::wrong_type(&core.owner, &core.property, &other)),
        }
    }

    /// Converts into a list operator.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaMismatch`] for sets and dictionaries.
    pub fn into_list(self) -> CoreResult<List> {
        match self {
            Self::List(list) => Ok(list),
            other => Err(CoreError::schema_mismatch(format!("{other} is not a RealmList"))),
        }
    }

    /// Converts into a dictionary operator.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaMismatch`] for lists and sets.
    pub fn into_dictionary(self) -> CoreResult<Dictionary> {
        match self {
            Self::Dictionary(dictionary) => Ok(dictionary),
            other => Err(CoreError::schema_mismatch(format!("{other} is not a RealmDictionary"))),
        }
    }
}

impl fmt::Display for ManagedCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.core())
    }
}
