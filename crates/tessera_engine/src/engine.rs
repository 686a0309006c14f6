//! The engine handle interface.

use crate::error::EngineResult;
use crate::handle::{CollectionPtr, GenerationPtr, ListenerId, ObjPtr, RealmId};
use crate::schema::{ClassDescriptor, ClassInfo};
use tessera_codec::{ClassKey, CollectionKind, PropertyKey, RawChangeBatch, StorageValue};

/// Callback invoked with each raw change batch for a registration.
///
/// Engines invoke callbacks on the thread that committed the change, after
/// releasing their internal locks. Callbacks must not block for long.
pub type ChangeCallback = Box<dyn Fn(RawChangeBatch) + Send + Sync>;

/// The embedded storage engine as seen by the binding core.
///
/// The engine owns storage, transactions and durability. The binding core
/// only speaks to it through this contract; a platform-specific engine is
/// an adapter implementing it.
///
/// # Invariants
///
/// - Every call validates its handles and fails instead of trusting them
/// - Mutations require an active write scope on a live generation
/// - A failing call has not mutated anything
/// - `remove_listener` releases a registration exactly once
/// - Engines must be `Send + Sync`; the core shares them across threads
///
/// # Implementors
///
/// - [`crate::InMemoryEngine`] - reference engine for tests and benchmarks
pub trait Engine: Send + Sync {
    // ------------------------------------------------------------------
    // Schema and realm lifecycle
    // ------------------------------------------------------------------

    /// Opens a new realm with the given schema and returns its live generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is invalid: duplicate names, unknown
    /// link targets, a primary key on an embedded class, or more than one
    /// primary key.
    fn open(&self, schema: &[ClassDescriptor]) -> EngineResult<GenerationPtr>;

    /// Returns every registered class with resolved keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the realm is closed.
    fn classes(&self, realm: RealmId) -> EngineResult<Vec<ClassInfo>>;

    /// Returns the current live generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the realm is closed.
    fn live_generation(&self, realm: RealmId) -> EngineResult<GenerationPtr>;

    /// Starts a write scope. Returns the live generation to mutate.
    ///
    /// # Errors
    ///
    /// Returns an error if a write scope is already active or the realm is closed.
    fn begin_write(&self, realm: RealmId) -> EngineResult<GenerationPtr>;

    /// Commits the write scope, delivers change batches to listeners, and
    /// returns the new live generation.
    ///
    /// # Errors
    ///
    /// Returns an error if no write scope is active.
    fn commit_write(&self, realm: RealmId) -> EngineResult<GenerationPtr>;

    /// Rolls back the write scope and returns the new live generation.
    ///
    /// # Errors
    ///
    /// Returns an error if no write scope is active.
    fn cancel_write(&self, realm: RealmId) -> EngineResult<GenerationPtr>;

    /// Returns true while a write scope is active.
    fn is_in_write(&self, realm: RealmId) -> bool;

    /// Pins the current committed version as an immutable generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the realm is closed.
    fn freeze(&self, realm: RealmId) -> EngineResult<GenerationPtr>;

    /// Releases a frozen generation. Releasing twice is a no-op.
    fn release(&self, generation: &GenerationPtr);

    /// Closes the realm. All handles become invalid. Closing twice is a no-op.
    fn close(&self, realm: RealmId);

    /// Returns true if the realm was closed.
    fn is_closed(&self, realm: RealmId) -> bool;

    /// Returns true if handles of this generation may still be used.
    fn is_generation_valid(&self, generation: &GenerationPtr) -> bool;

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Creates an object in a class without a primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if the class has a primary key or is embedded.
    fn create_object(&self, generation: &GenerationPtr, class: ClassKey) -> EngineResult<ObjPtr>;

    /// Creates an object with a primary key.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::ObjectAlreadyExists`](crate::ErrorCode::ObjectAlreadyExists)
    /// if the key is taken.
    fn create_object_with_primary_key(
        &self,
        generation: &GenerationPtr,
        class: ClassKey,
        primary_key: &StorageValue,
    ) -> EngineResult<ObjPtr>;

    /// Returns the object with this primary key, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the key has the wrong type.
    fn get_or_create_with_primary_key(
        &self,
        generation: &GenerationPtr,
        class: ClassKey,
        primary_key: &StorageValue,
    ) -> EngineResult<ObjPtr>;

    /// Looks up an object by primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if the generation is invalid.
    fn find_by_primary_key(
        &self,
        generation: &GenerationPtr,
        class: ClassKey,
        primary_key: &StorageValue,
    ) -> EngineResult<Option<ObjPtr>>;

    /// Returns every object of a class, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the generation is invalid.
    fn objects(&self, generation: &GenerationPtr, class: ClassKey) -> EngineResult<Vec<ObjPtr>>;

    /// Deletes an object and every embedded object it owns.
    ///
    /// Links to the deleted object are nullified or removed from collections.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is invalid or no write scope is active.
    fn delete_object(&self, object: &ObjPtr) -> EngineResult<()>;

    /// Returns true if the handle is usable.
    fn is_object_valid(&self, object: &ObjPtr) -> bool;

    /// Finds the same row in another generation. `None` if it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the target generation is invalid.
    fn resolve_object(
        &self,
        object: &ObjPtr,
        generation: &GenerationPtr,
    ) -> EngineResult<Option<ObjPtr>>;

    /// Reads a scalar or link property.
    ///
    /// A polymorphic property holding a nested collection reads as
    /// [`StorageValue::List`] or [`StorageValue::Dictionary`].
    ///
    /// # Errors
    ///
    /// Returns an error if the object is invalid or the property is a collection.
    fn get_value(&self, object: &ObjPtr, property: PropertyKey) -> EngineResult<StorageValue>;

    /// Writes a scalar or link property.
    ///
    /// Writing null to a link to an embedded object deletes the child.
    ///
    /// # Errors
    ///
    /// Returns an error on nullability or type violations, primary key
    /// modification, or when no write scope is active.
    fn set_value(
        &self,
        object: &ObjPtr,
        property: PropertyKey,
        value: &StorageValue,
    ) -> EngineResult<()>;

    /// Adds `delta` to an integer property in place and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::RangeError`] if the sum overflows, a type error
    /// for anything but a non-null integer property, and an error when no
    /// write scope is active.
    ///
    /// [`ErrorCode::RangeError`]: crate::ErrorCode::RangeError
    fn add_int(&self, object: &ObjPtr, property: PropertyKey, delta: i64) -> EngineResult<i64>;

    /// Creates a new embedded child in a link property, deleting the previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the property does not link to an embedded class.
    fn set_embedded(&self, object: &ObjPtr, property: PropertyKey) -> EngineResult<ObjPtr>;

    /// Stores an empty nested collection in a polymorphic property.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not polymorphic.
    fn set_collection(
        &self,
        object: &ObjPtr,
        property: PropertyKey,
        kind: CollectionKind,
    ) -> EngineResult<CollectionPtr>;

    /// Returns the collection held by a property.
    ///
    /// # Errors
    ///
    /// Returns an error if the property holds no collection.
    fn collection(&self, object: &ObjPtr, property: PropertyKey) -> EngineResult<CollectionPtr>;

    /// Returns the objects linking to `object` through an inverse relationship property.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not an inverse relationship.
    fn backlinks(&self, object: &ObjPtr, property: PropertyKey) -> EngineResult<Vec<ObjPtr>>;

    // ------------------------------------------------------------------
    // Collections (shared)
    // ------------------------------------------------------------------

    /// Returns the number of elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection or its parent is invalid.
    fn collection_size(&self, collection: &CollectionPtr) -> EngineResult<usize>;

    /// Removes all elements, deleting embedded elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection is invalid or no write scope is active.
    fn collection_clear(&self, collection: &CollectionPtr) -> EngineResult<()>;

    /// Returns true if the handle is usable.
    fn is_collection_valid(&self, collection: &CollectionPtr) -> bool;

    /// Finds the same collection in another generation. `None` if its parent is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the target generation is invalid.
    fn resolve_collection(
        &self,
        collection: &CollectionPtr,
        generation: &GenerationPtr,
    ) -> EngineResult<Option<CollectionPtr>>;

    // ------------------------------------------------------------------
    // Lists
    // ------------------------------------------------------------------

    /// Reads the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds.
    fn list_get(&self, list: &CollectionPtr, index: usize) -> EngineResult<StorageValue>;

    /// Inserts a value at `index` (`index == len` appends).
    ///
    /// # Errors
    ///
    /// Returns an error on type violations or an out-of-bounds index.
    fn list_insert(
        &self,
        list: &CollectionPtr,
        index: usize,
        value: &StorageValue,
    ) -> EngineResult<()>;

    /// Replaces the value at `index` and returns the previous one.
    ///
    /// # Errors
    ///
    /// Returns an error on type violations or an out-of-bounds index.
    fn list_set(
        &self,
        list: &CollectionPtr,
        index: usize,
        value: &StorageValue,
    ) -> EngineResult<StorageValue>;

    /// Removes the element at `index`, deleting it if embedded.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds.
    fn list_erase(&self, list: &CollectionPtr, index: usize) -> EngineResult<()>;

    /// Moves the element at `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns an error if either index is out of bounds.
    fn list_move(&self, list: &CollectionPtr, from: usize, to: usize) -> EngineResult<()>;

    /// Returns the first position holding `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is invalid.
    fn list_find(&self, list: &CollectionPtr, value: &StorageValue) -> EngineResult<Option<usize>>;

    /// Inserts a new embedded object at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the list does not hold embedded objects.
    fn list_insert_embedded(&self, list: &CollectionPtr, index: usize) -> EngineResult<ObjPtr>;

    /// Replaces the element at `index` with a new embedded object.
    ///
    /// The new child is created before the old one is deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the list does not hold embedded objects.
    fn list_set_embedded(&self, list: &CollectionPtr, index: usize) -> EngineResult<ObjPtr>;

    /// Inserts an empty nested collection at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is not polymorphic.
    fn list_insert_collection(
        &self,
        list: &CollectionPtr,
        index: usize,
        kind: CollectionKind,
    ) -> EngineResult<CollectionPtr>;

    /// Replaces the element at `index` with an empty nested collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is not polymorphic.
    fn list_set_collection(
        &self,
        list: &CollectionPtr,
        index: usize,
        kind: CollectionKind,
    ) -> EngineResult<CollectionPtr>;

    /// Returns the nested collection at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not a collection.
    fn list_get_collection(&self, list: &CollectionPtr, index: usize)
        -> EngineResult<CollectionPtr>;

    // ------------------------------------------------------------------
    // Sets
    // ------------------------------------------------------------------

    /// Reads the element at `index` in iteration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds.
    fn set_get(&self, set: &CollectionPtr, index: usize) -> EngineResult<StorageValue>;

    /// Adds a value. Returns false if it was already present.
    ///
    /// # Errors
    ///
    /// Returns an error on type violations.
    fn set_insert(&self, set: &CollectionPtr, value: &StorageValue) -> EngineResult<bool>;

    /// Removes a value. Returns false if it was absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the set is invalid.
    fn set_erase(&self, set: &CollectionPtr, value: &StorageValue) -> EngineResult<bool>;

    /// Returns true if the value is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the set is invalid.
    fn set_find(&self, set: &CollectionPtr, value: &StorageValue) -> EngineResult<bool>;

    // ------------------------------------------------------------------
    // Dictionaries
    // ------------------------------------------------------------------

    /// Reads the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dictionary is invalid.
    fn dictionary_get(
        &self,
        dictionary: &CollectionPtr,
        key: &str,
    ) -> EngineResult<Option<StorageValue>>;

    /// Stores a value under `key`. Returns true if the key was new.
    ///
    /// # Errors
    ///
    /// Returns an error on type violations.
    fn dictionary_insert(
        &self,
        dictionary: &CollectionPtr,
        key: &str,
        value: &StorageValue,
    ) -> EngineResult<bool>;

    /// Removes `key`. Returns false if it was absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the dictionary is invalid.
    fn dictionary_erase(&self, dictionary: &CollectionPtr, key: &str) -> EngineResult<bool>;

    /// Returns the keys in iteration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the dictionary is invalid.
    fn dictionary_keys(&self, dictionary: &CollectionPtr) -> EngineResult<Vec<String>>;

    /// Stores a new embedded object under `key`, deleting any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the dictionary does not hold embedded objects.
    fn dictionary_insert_embedded(
        &self,
        dictionary: &CollectionPtr,
        key: &str,
    ) -> EngineResult<ObjPtr>;

    /// Stores an empty nested collection under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dictionary is not polymorphic.
    fn dictionary_insert_collection(
        &self,
        dictionary: &CollectionPtr,
        key: &str,
        kind: CollectionKind,
    ) -> EngineResult<CollectionPtr>;

    /// Returns the nested collection under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a collection.
    fn dictionary_get_collection(
        &self,
        dictionary: &CollectionPtr,
        key: &str,
    ) -> EngineResult<CollectionPtr>;

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Registers a callback for changes to an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is invalid.
    fn add_object_listener(
        &self,
        object: &ObjPtr,
        callback: ChangeCallback,
    ) -> EngineResult<ListenerId>;

    /// Registers a callback for changes to a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection is invalid.
    fn add_collection_listener(
        &self,
        collection: &CollectionPtr,
        callback: ChangeCallback,
    ) -> EngineResult<ListenerId>;

    /// Unregisters a callback. Returns true only on the call that removed it.
    fn remove_listener(&self, listener: ListenerId) -> bool;
}
