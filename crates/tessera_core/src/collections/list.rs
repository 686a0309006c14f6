use super::{detach, CollectionCore, Prepared};
use crate::assign::ObjectCache;
use crate::changeset::ListChangeSet;
use crate::error::{CoreError, CoreResult};
use crate::notifications::{self, ChangeStream, CollectionChange};
use crate::object::Object;
use crate::types::UpdatePolicy;
use crate::value::Value;
use tessera_codec::CollectionKind;
use tessera_engine::{GenerationPtr, PathElement};
use tracing::trace;

/// An ordered collection that allows duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct List {
    pub(super) core: CollectionCore,
}

impl List {
    pub(crate) fn for_property(object: &Object, name: &str) -> CoreResult<Self> {
        CollectionCore::for_property(object, name, CollectionKind::List).map(Self::from_core)
    }

    pub(super) fn from_core(core: CollectionCore) -> Self {
        Self { core }
    }

    fn default_policy(&self) -> UpdatePolicy {
        self.core.realm.config.default_update_policy
    }

    fn check_index(&self, index: usize, len: usize) -> CoreResult<()> {
        if index <= len {
            return Ok(());
        }
        Err(CoreError::illegal_argument(format!(
            "Index {index} is out of bounds for {} of size {len}",
            self.core
        )))
    }

    /// Number of elements. An unresolved list is empty.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn len(&self) -> CoreResult<usize> {
        self.core.len()
    }

    /// Returns true if the list has no elements.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns true while the parent object exists in this generation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    /// Reads the element at `index`.
    ///
    /// # Errors
    ///
    /// Fails if `index` is out of bounds or the list is invalid.
    pub fn get(&self, index: usize) -> CoreResult<Value> {
        let ptr = self.core.live()?;
        let raw = self.core.realm.engine.list_get(ptr, index)?;
        self.core
            .element
            .to_user(&self.core, raw, Some(PathElement::Index(index)))
    }

    /// All elements in order.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn values(&self) -> CoreResult<Vec<Value>> {
        (0..self.len()?).map(|index| self.get(index)).collect()
    }

    /// Appends a value.
    ///
    /// # Errors
    ///
    /// See [`List::insert_with`].
    pub fn add(&self, value: impl Into<Value>) -> CoreResult<()> {
        let len = self.len()?;
        self.insert(len, value)
    }

    /// Inserts a value at `index` with the realm's default update policy.
    ///
    /// # Errors
    ///
    /// See [`List::insert_with`].
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> CoreResult<()> {
        self.insert_with(index, value.into(), self.default_policy(), &mut ObjectCache::new())
    }

    /// Inserts a value at `index`.
    ///
    /// Unmanaged objects are imported with `policy`; embedded objects are
    /// created inside the list and filled from the value.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SchemaMismatch`] if the value does not fit the element type
    /// - [`CoreError::IllegalArgument`] if `index` is past the end
    /// - [`CoreError::InvalidatedObject`] if the parent object was deleted
    pub fn insert_with(
        &self,
        index: usize,
        value: Value,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<()> {
        self.core.live()?;
        self.core.check_all([&value])?;
        self.check_index(index, self.len()?)?;
        self.insert_checked(index, value, policy, cache)
    }

    /// Inserts `values` starting at `index`, preserving their order.
    ///
    /// Every value is checked before the first insertion, so a rejected
    /// value leaves the list unchanged.
    ///
    /// # Errors
    ///
    /// See [`List::insert_with`].
    pub fn insert_all(
        &self,
        index: usize,
        values: Vec<Value>,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<()> {
        self.core.live()?;
        self.core.check_all(&values)?;
        self.check_index(index, self.len()?)?;
        for (offset, value) in values.into_iter().enumerate() {
            self.insert_checked(index + offset, value, policy, cache)?;
        }
        Ok(())
    }

    fn insert_checked(
        &self,
        index: usize,
        value: Value,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<()> {
        let engine = &self.core.realm.engine;
        match self.core.prepare(value, policy, cache)? {
            Prepared::Value(raw) => {
                trace!(list = %self.core, index, value = %raw, "list insert");
                engine.list_insert(self.core.live()?, index, &raw)?;
            }
            Prepared::Embedded(source) => {
                let child = engine.list_insert_embedded(self.core.live()?, index)?;
                self.core.fill_embedded(child, &source, policy, cache)?;
            }
            Prepared::Nested(kind, contents) => {
                let nested = engine.list_insert_collection(self.core.live()?, index, kind)?;
                self.core.fill_nested(nested, contents, policy, cache)?;
            }
        }
        Ok(())
    }

    /// Replaces the element at `index` with the realm's default update policy.
    ///
    /// # Errors
    ///
    /// See [`List::set_with`].
    pub fn set(&self, index: usize, value: impl Into<Value>) -> CoreResult<Value> {
        self.set_with(index, value.into(), self.default_policy(), &mut ObjectCache::new())
    }

    /// Replaces the element at `index`.
    ///
    /// Returns the previous element, except for lists of embedded objects:
    /// there the previous child is deleted by the replacement and the newly
    /// created child is returned instead.
    ///
    /// # Errors
    ///
    /// Fails like [`List::insert_with`], and if `index` is out of bounds.
    pub fn set_with(
        &self,
        index: usize,
        value: Value,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<Value> {
        let ptr = self.core.live()?;
        self.core.check_all([&value])?;
        let engine = &self.core.realm.engine;
        match self.core.prepare(value, policy, cache)? {
            Prepared::Value(raw) => {
                trace!(list = %self.core, index, value = %raw, "list set");
                let previous = engine.list_set(ptr, index, &raw)?;
                self.core.element.to_user(&self.core, previous, None)
            }
            Prepared::Embedded(source) => {
                let child = engine.list_set_embedded(ptr, index)?;
                self.core
                    .fill_embedded(child, &source, policy, cache)
                    .map(Value::Object)
            }
            Prepared::Nested(kind, contents) => {
                let previous = detach(self.get(index)?)?;
                let nested = engine.list_set_collection(ptr, index, kind)?;
                self.core.fill_nested(nested, contents, policy, cache)?;
                Ok(previous)
            }
        }
    }

    /// Removes and returns the element at `index`.
    ///
    /// A removed embedded object is deleted; it is returned as an unmanaged
    /// copy.
    ///
    /// # Errors
    ///
    /// Fails if `index` is out of bounds or the list is invalid.
    pub fn remove_at(&self, index: usize) -> CoreResult<Value> {
        let ptr = self.core.live()?;
        let removed = detach(self.get(index)?)?;
        self.core.realm.engine.list_erase(ptr, index)?;
        Ok(removed)
    }

    /// Removes the first occurrence of `value`. Returns false if absent.
    ///
    /// # Errors
    ///
    /// Fails if the list is invalid.
    pub fn remove(&self, value: &Value) -> CoreResult<bool> {
        self.core.live()?;
        match self.index_of(value)? {
            Some(index) => {
                self.core.realm.engine.list_erase(self.core.live()?, index)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Moves the element at `from` to `to`.
    ///
    /// # Errors
    ///
    /// Fails if either index is out of bounds or the list is invalid.
    pub fn move_to(&self, from: usize, to: usize) -> CoreResult<()> {
        let ptr = self.core.live()?;
        self.core.realm.engine.list_move(ptr, from, to)?;
        Ok(())
    }

    /// Position of the first occurrence of `value`.
    ///
    /// Unmanaged objects and objects of another generation are never found.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn index_of(&self, value: &Value) -> CoreResult<Option<usize>> {
        let Some(ptr) = self.core.ptr.as_ref() else {
            return Ok(None);
        };
        match self.core.element.lookup(&self.core, value) {
            Some(raw) => Ok(self.core.realm.engine.list_find(ptr, &raw)?),
            None => Ok(None),
        }
    }

    /// Returns true if `value` is in the list.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn contains(&self, value: &Value) -> CoreResult<bool> {
        Ok(self.index_of(value)?.is_some())
    }

    /// Removes every element. The parent object is kept.
    ///
    /// # Errors
    ///
    /// Fails outside a write transaction or if the list is invalid.
    pub fn clear(&self) -> CoreResult<()> {
        self.core.clear()
    }

    pub(super) fn replace(
        &self,
        values: Vec<Value>,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<()> {
        self.core.live()?;
        self.core.check_all(&values)?;
        let values = values.into_iter().map(detach).collect::<CoreResult<Vec<_>>>()?;
        self.core.clear()?;
        self.insert_all(0, values, policy, cache)
    }

    /// This list as seen from `generation`.
    ///
    /// The result is unresolved, empty and read-only, if the parent object
    /// does not exist there.
    ///
    /// # Errors
    ///
    /// Fails if `generation` belongs to another realm or is no longer valid.
    pub fn resolve_in(&self, generation: GenerationPtr) -> CoreResult<Self> {
        self.core.resolve_in(generation).map(Self::from_core)
    }

    /// Observes changes to this list.
    ///
    /// # Errors
    ///
    /// Fails if the list is invalid.
    pub fn observe(&self) -> CoreResult<ChangeStream<CollectionChange<ListChangeSet>>> {
        notifications::observe_collection(&self.core.realm, self.core.live()?)
    }
}

impl std::fmt::Display for List {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.core)
    }
}
