use super::{detach, CollectionCore, Prepared};
use crate::assign::ObjectCache;
use crate::changeset::DictionaryChangeSet;
use crate::error::CoreResult;
use crate::notifications::{self, ChangeStream, CollectionChange};
use crate::object::Object;
use crate::types::UpdatePolicy;
use crate::value::Value;
use tessera_codec::CollectionKind;
use tessera_engine::{GenerationPtr, PathElement};
use tracing::trace;

/// A string-keyed collection.
///
/// Polymorphic dictionaries may hold a nested list or dictionary per entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Dictionary {
    pub(super) core: CollectionCore,
}

impl Dictionary {
    pub(crate) fn for_property(object: &Object, name: &str) -> CoreResult<Self> {
        CollectionCore::for_property(object, name, CollectionKind::Dictionary).map(Self::from_core)
    }

    pub(super) fn from_core(core: CollectionCore) -> Self {
        Self { core }
    }

    /// Number of entries. An unresolved dictionary is empty.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn len(&self) -> CoreResult<usize> {
        self.core.len()
    }

    /// Returns true if the dictionary has no entries.
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

    /// The value under `key`, if any.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn get(&self, key: &str) -> CoreResult<Option<Value>> {
        let Some(ptr) = self.core.ptr.as_ref() else {
            return Ok(None);
        };
        self.core
            .realm
            .engine
            .dictionary_get(ptr, key)?
            .map(|raw| {
                self.core
                    .element
                    .to_user(&self.core, raw, Some(PathElement::Key(key.to_string())))
            })
            .transpose()
    }

    /// Keys in iteration order.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn keys(&self) -> CoreResult<Vec<String>> {
        match self.core.ptr.as_ref() {
            Some(ptr) => Ok(self.core.realm.engine.dictionary_keys(ptr)?),
            None => Ok(Vec::new()),
        }
    }

    /// Values in key order.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn values(&self) -> CoreResult<Vec<Value>> {
        Ok(self.entries()?.into_iter().map(|(_, value)| value).collect())
    }

    /// Entries in key order.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn entries(&self) -> CoreResult<Vec<(String, Value)>> {
        self.keys()?
            .into_iter()
            .map(|key| {
                let value = self.get(&key)?.unwrap_or(Value::Null);
                Ok((key, value))
            })
            .collect()
    }

    /// Returns true if `key` is present.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn contains_key(&self, key: &str) -> CoreResult<bool> {
        match self.core.ptr.as_ref() {
            Some(ptr) => Ok(self.core.realm.engine.dictionary_get(ptr, key)?.is_some()),
            None => Ok(false),
        }
    }

    /// Returns true if any entry holds `value`.
    ///
    /// Unmanaged objects and collections are never found.
    ///
    /// # Errors
    ///
    /// Fails if the parent object was deleted.
    pub fn contains_value(&self, value: &Value) -> CoreResult<bool> {
        let Some(ptr) = self.core.ptr.as_ref() else {
            return Ok(false);
        };
        let Some(raw) = self.core.element.lookup(&self.core, value) else {
            return Ok(false);
        };
        let engine = &self.core.realm.engine;
        for key in engine.dictionary_keys(ptr)? {
            if engine.dictionary_get(ptr, &key)?.as_ref() == Some(&raw) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stores `value` under `key` with the realm's default update policy.
    ///
    /// # Errors
    ///
    /// See [`Dictionary::insert_with`].
    pub fn insert(&self, key: &str, value: impl Into<Value>) -> CoreResult<(Option<Value>, bool)> {
        let policy = self.core.realm.config.default_update_policy;
        self.insert_with(key, value.into(), policy, &mut ObjectCache::new())
    }

    /// Stores `value` under `key`.
    ///
    /// Returns the previous value, if any, and whether the key was new.
    /// A replaced embedded object or nested collection is returned as an
    /// unmanaged copy.
    ///
    /// # Errors
    ///
    /// - [`crate::CoreError::SchemaMismatch`] if the value does not fit
    /// - [`crate::CoreError::InvalidatedObject`] if the parent object was deleted
    pub fn insert_with(
        &self,
        key: &str,
        value: Value,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<(Option<Value>, bool)> {
        self.core.live()?;
        self.core.check_all([&value])?;
        self.insert_checked(key, value, policy, cache)
    }

    fn insert_checked(
        &self,
        key: &str,
        value: Value,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<(Option<Value>, bool)> {
        let previous = self.get(key)?.map(detach).transpose()?;
        let engine = &self.core.realm.engine;
        match self.core.prepare(value, policy, cache)? {
            Prepared::Value(raw) => {
                trace!(dictionary = %self.core, key, value = %raw, "dictionary insert");
                engine.dictionary_insert(self.core.live()?, key, &raw)?;
            }
            Prepared::Embedded(source) => {
                let child = engine.dictionary_insert_embedded(self.core.live()?, key)?;
                self.core.fill_embedded(child, &source, policy, cache)?;
            }
            Prepared::Nested(kind, contents) => {
                let nested = engine.dictionary_insert_collection(self.core.live()?, key, kind)?;
                self.core.fill_nested(nested, contents, policy, cache)?;
            }
        }
        let inserted = previous.is_none();
        Ok((previous, inserted))
    }

    /// Stores `value` under `key` and returns the previous value.
    ///
    /// # Errors
    ///
    /// See [`Dictionary::insert_with`].
    pub fn put(&self, key: &str, value: impl Into<Value>) -> CoreResult<Option<Value>> {
        self.insert(key, value).map(|(previous, _)| previous)
    }

    /// Stores every entry, checking all values before the first write.
    ///
    /// # Errors
    ///
    /// See [`Dictionary::insert_with`].
    pub fn put_all(
        &self,
        entries: Vec<(String, Value)>,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<()> {
        self.core.live()?;
        self.core.check_all(entries.iter().map(|(_, value)| value))?;
        for (key, value) in entries {
            self.insert_checked(&key, value, policy, cache)?;
        }
        Ok(())
    }

    /// Removes `key` and returns its previous value.
    ///
    /// # Errors
    ///
    /// Fails if the dictionary is invalid.
    pub fn erase(&self, key: &str) -> CoreResult<Option<Value>> {
        let ptr = self.core.live()?;
        let previous = self.get(key)?.map(detach).transpose()?;
        self.core.realm.engine.dictionary_erase(ptr, key)?;
        Ok(previous)
    }

    /// Removes every entry. The parent object is kept.
    ///
    /// # Errors
    ///
    /// Fails outside a write transaction or if the dictionary is invalid.
    pub fn clear(&self) -> CoreResult<()> {
        self.core.clear()
    }

    pub(super) fn replace(
        &self,
        entries: Vec<(String, Value)>,
        policy: UpdatePolicy,
        cache: &mut ObjectCache,
    ) -> CoreResult<()> {
        self.core.live()?;
        self.core.check_all(entries.iter().map(|(_, value)| value))?;
        let entries = entries
            .into_iter()
            .map(|(key, value)| Ok((key, detach(value)?)))
            .collect::<CoreResult<Vec<_>>>()?;
        self.core.clear()?;
        self.put_all(entries, policy, cache)
    }

    /// This dictionary as seen from `generation`.
    ///
    /// # Errors
    ///
    /// Fails if `generation` belongs to another realm or is no longer valid.
    pub fn resolve_in(&self, generation: GenerationPtr) -> CoreResult<Self> {
        self.core.resolve_in(generation).map(Self::from_core)
    }

    /// Observes changes to this dictionary.
    ///
    /// # Errors
    ///
    /// Fails if the dictionary is invalid.
    pub fn observe(&self) -> CoreResult<ChangeStream<CollectionChange<DictionaryChangeSet>>> {
        notifications::observe_collection(&self.core.realm, self.core.live()?)
    }
}

impl std::fmt::Display for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.core)
    }
}
