//! Opened realms, write transactions and frozen generations.

use crate::assign::{self, ObjectCache};
use crate::config::Config;
use crate::converters::to_storage_checked;
use crate::error::{CoreError, CoreResult};
use crate::mediator::Mediator;
use crate::mutex::open_lock;
use crate::notifications::{ImmediateScheduler, Scheduler};
use crate::object::Object;
use crate::schema::{ClassMetadata, SchemaMetadata};
use crate::types::UpdatePolicy;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use tessera_engine::{ClassDescriptor, Engine, GenerationPtr, ObjPtr, RealmId};
use tracing::{debug, warn};

/// State shared by every handle of one opened realm.
pub(crate) struct RealmShared {
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) id: RealmId,
    pub(crate) config: Config,
    pub(crate) mediator: Mediator,
    pub(crate) scheduler: Arc<dyn Scheduler>,
}

impl RealmShared {
    pub(crate) fn schema(&self) -> &SchemaMetadata {
        self.mediator.schema()
    }

    pub(crate) fn object(self: &Arc<Self>, ptr: ObjPtr) -> CoreResult<Object> {
        self.mediator.object(self, ptr)
    }

    fn objects_in(self: &Arc<Self>, generation: &GenerationPtr, class: &str) -> CoreResult<Vec<Object>> {
        let class = self.schema().require(class)?;
        self.engine
            .objects(generation, class.key)?
            .into_iter()
            .map(|ptr| self.object(ptr))
            .collect()
    }

    fn find_in(
        self: &Arc<Self>,
        generation: &GenerationPtr,
        class: &str,
        primary_key: Value,
    ) -> CoreResult<Option<Object>> {
        let class = self.schema().require(class)?;
        let key = primary_key_value(class, &primary_key)?;
        self.engine
            .find_by_primary_key(generation, class.key, &key)?
            .map(|ptr| self.object(ptr))
            .transpose()
    }
}

impl Drop for RealmShared {
    fn drop(&mut self) {
        self.engine.close(self.id);
    }
}

fn primary_key_value(
    class: &ClassMetadata,
    value: &Value,
) -> CoreResult<tessera_codec::StorageValue> {
    let property = class.primary_key_property().ok_or_else(|| {
        CoreError::illegal_argument(format!(
            "Class '{}' does not have a primary key",
            class.name
        ))
    })?;
    to_storage_checked(class, property, value)
}

/// An opened realm.
///
/// Reads outside a write transaction observe the latest committed version.
/// Handles obtained through a realm belong to its live generation and stop
/// being valid once a write transaction commits or cancels.
pub struct Realm {
    shared: Arc<RealmShared>,
}

impl Realm {
    /// Opens a realm on `engine`, delivering notifications inline on the
    /// committing thread.
    ///
    /// # Errors
    ///
    /// Fails if the configuration or schema is invalid.
    pub fn open(engine: Arc<dyn Engine>, config: Config, schema: &[ClassDescriptor]) -> CoreResult<Self> {
        Self::open_with_scheduler(engine, config, schema, Arc::new(ImmediateScheduler))
    }

    /// Opens a realm whose notifications are delivered through `scheduler`.
    ///
    /// Opens of the same [`Config::name`] are serialized.
    ///
    /// # Errors
    ///
    /// Fails if the configuration or schema is invalid.
    pub fn open_with_scheduler(
        engine: Arc<dyn Engine>,
        config: Config,
        schema: &[ClassDescriptor],
        scheduler: Arc<dyn Scheduler>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let name = config.name.clone();
        open_lock().with_lock(&name, || {
            let generation = engine.open(schema)?;
            let classes = engine.classes(generation.realm)?;
            let metadata = Arc::new(SchemaMetadata::from_classes(&classes));
            debug!(
                realm = %generation.realm,
                name = %config.name,
                classes = metadata.len(),
                schema_version = config.schema_version,
                "opened realm"
            );
            Ok(Self {
                shared: Arc::new(RealmShared {
                    id: generation.realm,
                    engine,
                    config,
                    mediator: Mediator::new(metadata),
                    scheduler,
                }),
            })
        })
    }

    /// The schema loaded when the realm was opened.
    #[must_use]
    pub fn schema(&self) -> &SchemaMetadata {
        self.shared.schema()
    }

    /// The configuration the realm was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The engine identity of this realm.
    #[must_use]
    pub fn id(&self) -> RealmId {
        self.shared.id
    }

    /// The current live generation.
    ///
    /// # Errors
    ///
    /// Fails if the realm is closed.
    pub fn generation(&self) -> CoreResult<GenerationPtr> {
        Ok(self.shared.engine.live_generation(self.shared.id)?)
    }

    /// Every object of a class, in key order.
    ///
    /// # Errors
    ///
    /// Fails for unknown classes or a closed realm.
    pub fn objects(&self, class: &str) -> CoreResult<Vec<Object>> {
        let generation = self.generation()?;
        self.shared.objects_in(&generation, class)
    }

    /// Looks an object up by primary key.
    ///
    /// # Errors
    ///
    /// Fails for unknown classes, classes without a primary key and keys of
    /// the wrong type.
    pub fn find(&self, class: &str, primary_key: impl Into<Value>) -> CoreResult<Option<Object>> {
        let generation = self.generation()?;
        self.shared.find_in(&generation, class, primary_key.into())
    }

    /// Runs `f` in a write transaction.
    ///
    /// The transaction commits if `f` returns `Ok` and is cancelled if it
    /// returns `Err`; the error is passed through.
    ///
    /// # Errors
    ///
    /// Fails if a write transaction is already active, or with the error `f`
    /// returned.
    pub fn write<R>(&self, f: impl FnOnce(&WriteTransaction) -> CoreResult<R>) -> CoreResult<R> {
        let engine = &self.shared.engine;
        let generation = engine.begin_write(self.shared.id)?;
        debug!(realm = %self.shared.id, %generation, "write transaction started");
        let transaction = WriteTransaction {
            shared: Arc::clone(&self.shared),
            generation,
        };
        match f(&transaction) {
            Ok(value) => {
                let committed = engine.commit_write(self.shared.id)?;
                debug!(realm = %self.shared.id, generation = %committed, "write transaction committed");
                Ok(value)
            }
            Err(err) => {
                match engine.cancel_write(self.shared.id) {
                    Ok(generation) => {
                        debug!(realm = %self.shared.id, %generation, error = %err, "write transaction cancelled");
                    }
                    Err(cancel) => {
                        warn!(realm = %self.shared.id, error = %cancel, "failed to cancel write transaction");
                    }
                }
                Err(err)
            }
        }
    }

    /// Returns true while a write transaction is active.
    #[must_use]
    pub fn is_in_write(&self) -> bool {
        self.shared.engine.is_in_write(self.shared.id)
    }

    /// Pins the latest committed version as a frozen generation.
    ///
    /// # Errors
    ///
    /// Fails if the realm is closed.
    pub fn freeze(&self) -> CoreResult<FrozenRealm> {
        let generation = self.shared.engine.freeze(self.shared.id)?;
        Ok(FrozenRealm {
            shared: Arc::clone(&self.shared),
            generation,
        })
    }

    /// Closes the realm. Every outstanding handle becomes invalid.
    pub fn close(&self) {
        self.shared.engine.close(self.shared.id);
    }

    /// Returns true once the realm has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.engine.is_closed(self.shared.id)
    }
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("id", &self.shared.id)
            .field("name", &self.shared.config.name)
            .finish()
    }
}

/// The mutable view of a realm inside [`Realm::write`].
pub struct WriteTransaction {
    shared: Arc<RealmShared>,
    generation: GenerationPtr,
}

impl WriteTransaction {
    /// The generation this transaction mutates.
    #[must_use]
    pub fn generation(&self) -> GenerationPtr {
        self.generation
    }

    /// Creates an object of a class without a primary key.
    ///
    /// # Errors
    ///
    /// Fails for embedded classes, which need a parent, and for classes
    /// with a primary key.
    pub fn create_object(&self, class: &str) -> CoreResult<Object> {
        let class = self.shared.schema().require(class)?;
        if class.embedded {
            return Err(CoreError::illegal_argument(
                "Cannot create embedded object without a parent",
            ));
        }
        if let Some(primary_key) = &class.primary_key {
            return Err(CoreError::illegal_argument(format!(
                "Cannot create object of type '{}' without primary key property '{primary_key}'",
                class.name
            )));
        }
        let ptr = self.shared.engine.create_object(&self.generation, class.key)?;
        debug!(class = %class.name, key = %ptr.key, "created object");
        self.shared.object(ptr)
    }

    /// Creates an object with a primary key.
    ///
    /// With [`UpdatePolicy::All`] an existing object with the same key is
    /// returned instead.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::ConstraintViolation`] if the key is taken and
    /// the policy is [`UpdatePolicy::Error`].
    pub fn create_object_with_primary_key(
        &self,
        class: &str,
        primary_key: impl Into<Value>,
        policy: UpdatePolicy,
    ) -> CoreResult<Object> {
        let class = self.shared.schema().require(class)?;
        let key = primary_key_value(class, &primary_key.into())?;
        let engine = &self.shared.engine;
        let ptr = match policy {
            UpdatePolicy::Error => {
                engine.create_object_with_primary_key(&self.generation, class.key, &key)?
            }
            UpdatePolicy::All => {
                engine.get_or_create_with_primary_key(&self.generation, class.key, &key)?
            }
        };
        debug!(class = %class.name, primary_key = %key, ?policy, "created object");
        self.shared.object(ptr)
    }

    /// Imports an object graph.
    ///
    /// Unmanaged objects reachable from `source` are imported once each,
    /// also when the graph has cycles. Managed objects of this generation
    /// are linked as they are.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid value; the transaction should then be
    /// cancelled by returning the error.
    pub fn copy_to_realm(&self, source: &Object, policy: UpdatePolicy) -> CoreResult<Object> {
        let mut cache = ObjectCache::new();
        assign::copy_to_realm(&self.shared, self.generation, source, policy, &mut cache)
    }

    /// Looks an object up by primary key.
    ///
    /// # Errors
    ///
    /// See [`Realm::find`].
    pub fn find(&self, class: &str, primary_key: impl Into<Value>) -> CoreResult<Option<Object>> {
        self.shared.find_in(&self.generation, class, primary_key.into())
    }

    /// Every object of a class, in key order.
    ///
    /// # Errors
    ///
    /// Fails for unknown classes.
    pub fn objects(&self, class: &str) -> CoreResult<Vec<Object>> {
        self.shared.objects_in(&self.generation, class)
    }

    /// Deletes an object and every embedded object it owns.
    ///
    /// # Errors
    ///
    /// Fails for unmanaged objects and for objects of another generation.
    pub fn delete(&self, object: &Object) -> CoreResult<()> {
        let managed = object.require_managed()?;
        if managed.ptr.generation != self.generation {
            return Err(CoreError::invalidated(
                "Cannot delete an outdated object. Use find_latest(object) to find an up-to-date version of the object first.",
            ));
        }
        self.shared.engine.delete_object(&managed.ptr)?;
        debug!(class = %managed.class.name, key = %managed.ptr.key, "deleted object");
        Ok(())
    }

    /// Finds the version of `object` in this transaction's generation.
    ///
    /// Returns `None` if the object has been deleted since.
    ///
    /// # Errors
    ///
    /// Fails for unmanaged objects.
    pub fn find_latest(&self, object: &Object) -> CoreResult<Option<Object>> {
        let managed = object.require_managed()?;
        if !Arc::ptr_eq(&managed.realm, &self.shared) {
            return Err(CoreError::illegal_argument(
                "Cannot resolve an object that belongs to another realm",
            ));
        }
        self.shared
            .engine
            .resolve_object(&managed.ptr, &self.generation)?
            .map(|ptr| self.shared.object(ptr))
            .transpose()
    }
}

/// An immutable generation pinned by [`Realm::freeze`].
///
/// Handles read through it stay valid regardless of later writes, until the
/// frozen realm is released or the realm closes.
pub struct FrozenRealm {
    shared: Arc<RealmShared>,
    generation: GenerationPtr,
}

impl FrozenRealm {
    /// The pinned generation.
    #[must_use]
    pub fn generation(&self) -> GenerationPtr {
        self.generation
    }

    /// Every object of a class at the pinned version.
    ///
    /// # Errors
    ///
    /// Fails once released.
    pub fn objects(&self, class: &str) -> CoreResult<Vec<Object>> {
        self.shared.objects_in(&self.generation, class)
    }

    /// Looks an object up by primary key at the pinned version.
    ///
    /// # Errors
    ///
    /// See [`Realm::find`].
    pub fn find(&self, class: &str, primary_key: impl Into<Value>) -> CoreResult<Option<Object>> {
        self.shared.find_in(&self.generation, class, primary_key.into())
    }

    /// Finds the frozen version of a live object.
    ///
    /// # Errors
    ///
    /// Fails for unmanaged objects.
    pub fn resolve(&self, object: &Object) -> CoreResult<Option<Object>> {
        let managed = object.require_managed()?;
        self.shared
            .engine
            .resolve_object(&managed.ptr, &self.generation)?
            .map(|ptr| self.shared.object(ptr))
            .transpose()
    }

    /// Releases the generation. Handles read through it become invalid.
    pub fn release(self) {}
}

impl Drop for FrozenRealm {
    fn drop(&mut self) {
        self.shared.engine.release(&self.generation);
        debug!(generation = %self.generation, "released frozen realm");
    }
}
