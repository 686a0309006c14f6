use super::{CollectionCore, Prepared};
use crate::assign::ObjectCache;
use crate::changeset::SetChangeSet;
use crate::error::{CoreError, CoreResult};
use crate::notifications::{self, ChangeStream, CollectionChange};
use crate::object::Object;
use crate::types::UpdatePolicy;
use crate::value::Value;
use tessera_codec::CollectionKind;
use tessera_engine::GenerationPtr;
use tracing::trace;

/// An unordered collection without duplicates.
///
/// Sets never hold embedded objects or nested collections.
#[derive(Debug, Clone, PartialEq)]
pub struct RealmSet {
    pub(super) core: CollectionCore,
}

impl RealmSet {
    pub(crate) fn for_property(object: &Object, name: &str) -> CoreResult<Self> {
        CollectionCore::for_property(object, name, CollectionKind::Set).map(Self::from_core)
    }

    pub(super) fn from_core(core: CollectionCore) -> Self {
        Self { core }
    }

    /// Number of elements. An unresolved set is empty.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn len(&self) -> CoreResult<usize> {
        self.core.len()
    }

    /// Returns true if the set has no elements.
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

    /// All elements in iteration order.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn values(&self) -> CoreResult<Vec<Value>> {
        let Some(ptr) = self.core.ptr.as_ref() else {
            return Ok(Vec::new());
        };
        let engine = &self.core.realm.engine;
        (0..self.len()?)
            .map(|index| {
                let raw = engine.set_get(ptr, index)?;
                self.core.element.to_user(&self.core, raw, None)
            })
            .collect()
    }

    /// Adds a value with the realm's default update policy.
    ///
    /// # Errors
    ///
    /// See [`RealmSet::add_with`].
    pub fn add(&self, value: impl Into<Value>) -> CoreResult<bool> {
        let policy = self.core.realm.config.default_update_policy;
        self.add_with(value.into(), policy, &mut ObjectCache::new())
    }

    /// Adds a value. Returns false if it was already present.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SchemaMismatch`] if the value does not fit the element type
    /// - [`CoreError::IllegalArgument`] for collections in a polymorphic set
    /// - [`CoreError::InvalidatedObject`] if the parent object was deleted
    pub fn add_with(
        &self,
        value: Value,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<bool> {
        self.core.live()?;
        self.core.check_all([&value])?;
        self.add_checked(value, policy, cache)
    }

    /// Adds every value. Returns true if any was newly inserted.
    ///
    /// Every value is checked before the first insertion.
    ///
    /// # Errors
    ///
    /// See [`RealmSet::add_with`].
    pub fn add_all(
        &self,
        values: Vec<Value>,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<bool> {
        self.core.live()?;
        self.core.check_all(&values)?;
        let mut changed = false;
        for value in values {
            changed |= self.add_checked(value, policy, cache)?;
        }
        Ok(changed)
    }

    fn add_checked(&self, value: Value, policy: UpdatePolicy, cache: &mut ObjectCache) -> CoreResult<bool> {
        match self.core.prepare(value, policy, cache)? {
            Prepared::Value(raw) => {
                trace!(set = %self.core, value = %raw, "set insert");
                Ok(self.core.realm.engine.set_insert(self.core.live()?, &raw)?)
            }
            Prepared::Embedded(_) | Prepared::Nested(..) => Err(CoreError::illegal_argument(
                "Sets cannot contain other collections",
            )),
        }
    }

    /// Removes a value. Returns false if it was absent.
    ///
    /// # Errors
    ///
    /// Fails if the set is invalid.
    pub fn remove(&self, value: &Value) -> CoreResult<bool> {
        let ptr = self.core.live()?;
        match self.core.element.lookup(&self.core, value) {
            Some(raw) => Ok(self.core.realm.engine.set_erase(ptr, &raw)?),
            None => Ok(false),
        }
    }

    /// Returns true if `value` is in the set.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn contains(&self, value: &Value) -> CoreResult<bool> {
        let Some(ptr) = self.core.ptr.as_ref() else {
            return Ok(false);
        };
        match self.core.element.lookup(&self.core, value) {
            Some(raw) => Ok(self.core.realm.engine.set_find(ptr, &raw)?),
            None => Ok(false),
        }
    }

    /// Removes every element. The parent object is kept.
    ///
    /// # Errors
    ///
    /// Fails outside a write transaction or if the set is invalid.
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
        self.core.clear()?;
        self.add_all(values, policy, cache).map(drop)
    }

    /// This set as seen from `generation`.
    ///
    /// # Errors
    ///
    /// Fails if `generation` belongs to another realm or is no longer valid.
    pub fn resolve_in(&self, generation: GenerationPtr) -> CoreResult<Self> {
        self.core.resolve_in(generation).map(Self::from_core)
    }

    /// Observes changes to this set.
    ///
    /// # Errors
    ///
    /// Fails if the set is invalid.
    pub fn observe(&self) -> CoreResult<ChangeStream<CollectionChange<SetChangeSet>>> {
        notifications::observe_collection(&self.core.realm, self.core.live()?)
    }
}

impl std::fmt::Display for RealmSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.core)
    }
}
