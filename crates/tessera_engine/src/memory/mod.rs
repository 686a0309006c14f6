//! In-memory reference engine.

mod store;
mod tracker;

pub use tracker::ChangeEncoding;

use crate::engine::{ChangeCallback, Engine};
use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::handle::{CollectionPtr, GenerationPtr, ListenerId, ObjPtr, PathElement, RealmId};
use crate::schema::{ClassDescriptor, ClassInfo, PropertyInfo};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use store::{index_out_of_bounds, invalidated_object, Schema, Slot, Store};
use tessera_codec::{
    ChangeBatch, ClassKey, CollectionKind, Link, ObjKey, PropertyKey, PropertyType,
    RawChangeBatch, StorageValue,
};
use tracing::{debug, trace, warn};
use tracker::{ChangeTracker, CollectionAddress, DictionaryOp, ListOp};

/// Configuration for [`InMemoryEngine`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryEngineConfig {
    /// Encoding used for list and set change batches.
    pub change_encoding: ChangeEncoding,
}

impl InMemoryEngineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the change batch encoding.
    #[must_use]
    pub const fn change_encoding(mut self, encoding: ChangeEncoding) -> Self {
        self.change_encoding = encoding;
        self
    }
}

/// An engine that keeps every realm in memory.
///
/// This engine is suitable for:
/// - Unit and integration tests of the binding core
/// - Benchmarks that should not measure I/O
///
/// Frozen generations are full snapshots. Change batches are computed from
/// a per-write [`ChangeTracker`] and delivered synchronously on commit.
///
/// # Thread Safety
///
/// This engine is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use tessera_codec::PropertyType;
/// use tessera_engine::{ClassDescriptor, Engine, InMemoryEngine, PropertyDescriptor};
///
/// let engine = InMemoryEngine::new();
/// let live = engine
///     .open(&[ClassDescriptor::new("Item")
///         .property(PropertyDescriptor::new("name", PropertyType::String))])
///     .unwrap();
/// let class = engine.classes(live.realm).unwrap()[0].key;
///
/// let write = engine.begin_write(live.realm).unwrap();
/// engine.create_object(&write, class).unwrap();
/// let live = engine.commit_write(live.realm).unwrap();
/// assert_eq!(engine.objects(&live, class).unwrap().len(), 1);
/// ```
pub struct InMemoryEngine {
    config: InMemoryEngineConfig,
    realms: RwLock<HashMap<RealmId, RealmState>>,
    next_realm: AtomicU64,
    next_listener: AtomicU64,
}

struct WriteState {
    rollback: Store,
    tracker: ChangeTracker,
}

enum ListenerTarget {
    Object(ClassKey, ObjKey),
    Collection(CollectionAddress, CollectionKind),
}

struct Listener {
    target: ListenerTarget,
    callback: Arc<ChangeCallback>,
}

struct RealmState {
    schema: Schema,
    live: Store,
    version: u64,
    write: Option<WriteState>,
    frozen: HashMap<u64, (Arc<Store>, usize)>,
    listeners: BTreeMap<ListenerId, Listener>,
    closed: bool,
}

impl RealmState {
    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed {
            return Err(closed_realm());
        }
        Ok(())
    }

    fn live_ptr(&self, realm: RealmId) -> GenerationPtr {
        GenerationPtr {
            realm,
            version: self.version,
            frozen: false,
        }
    }

    /// The store a generation reads from.
    fn store(&self, generation: &GenerationPtr) -> EngineResult<&Store> {
        self.ensure_open()?;
        if generation.frozen {
            return self
                .frozen
                .get(&generation.version)
                .map(|(store, _)| store.as_ref())
                .ok_or_else(|| stale("Frozen generation has been released"));
        }
        if generation.version != self.version {
            return Err(stale(
                "Accessor belongs to a generation that is no longer current",
            ));
        }
        Ok(&self.live)
    }

    fn committed(&self) -> &Store {
        match &self.write {
            Some(write) => &write.rollback,
            None => &self.live,
        }
    }

    fn deliveries(
        &self,
        tracker: &ChangeTracker,
        encoding: ChangeEncoding,
    ) -> Vec<(Arc<ChangeCallback>, ChangeBatch)> {
        let mut out = Vec::new();
        for listener in self.listeners.values() {
            let batch = match &listener.target {
                ListenerTarget::Object(class, key) => tracker
                    .object_changes(*class, *key)
                    .map(ChangeBatch::Object),
                ListenerTarget::Collection(address, CollectionKind::Dictionary) => {
                    let keys_now = dictionary_keys_at(&self.live, address);
                    tracker
                        .dictionary_changes(address, keys_now)
                        .map(ChangeBatch::Dictionary)
                }
                ListenerTarget::Collection(address, _) => {
                    match tracker.collection_changes(address, encoding) {
                        Ok(changes) => changes.map(ChangeBatch::Collection),
                        Err(error) => {
                            warn!(%error, "skipping collection listener");
                            None
                        }
                    }
                }
            };
            if let Some(batch) = batch {
                out.push((Arc::clone(&listener.callback), batch));
            }
        }
        out
    }
}

/// Hands each listener its encoded batch and returns how many were
/// delivered. A batch that fails to encode is logged and skipped.
fn deliver(deliveries: Vec<(Arc<ChangeCallback>, ChangeBatch)>) -> usize {
    let mut delivered = 0;
    for (callback, batch) in deliveries {
        let raw: RawChangeBatch = match batch.encode() {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%error, "dropping undeliverable change batch");
                continue;
            }
        };
        trace!(bytes = raw.as_bytes().len(), "delivering change batch");
        callback(raw);
        delivered += 1;
    }
    delivered
}

fn dictionary_keys_at(store: &Store, address: &CollectionAddress) -> Option<BTreeSet<String>> {
    let row = store.row(address.class, address.key)?;
    let mut slot = row.slots.get(&address.property)?;
    for step in &address.path {
        slot = match (slot, step) {
            (Slot::List(items), PathElement::Index(i)) => items.get(*i)?,
            (Slot::Dictionary(entries), PathElement::Key(k)) => entries.get(k)?,
            _ => return None,
        };
    }
    match slot {
        Slot::Dictionary(entries) => Some(entries.keys().cloned().collect()),
        _ => None,
    }
}

fn closed_realm() -> EngineError {
    EngineError::new(
        ErrorCode::ClosedRealm,
        "Realm has been closed and is no longer accessible",
    )
}

fn stale(message: &str) -> EngineError {
    EngineError::new(ErrorCode::StaleAccessor, message)
}

fn schema_error(message: impl Into<String>) -> EngineError {
    EngineError::new(ErrorCode::SchemaValidationFailed, message)
}

/// Borrowed pieces of a realm inside an active write scope.
struct WriteCtx<'a> {
    schema: &'a Schema,
    store: &'a mut Store,
    tracker: &'a mut ChangeTracker,
}

impl WriteCtx<'_> {
    fn require_row(&self, object: &ObjPtr) -> EngineResult<()> {
        self.store
            .row(object.class, object.key)
            .map(|_| ())
            .ok_or_else(invalidated_object)
    }

    /// The property info behind a collection handle, cloned out of the schema.
    fn collection_property(&self, ptr: &CollectionPtr) -> EngineResult<PropertyInfo> {
        self.schema.property(ptr.class, ptr.property).cloned()
    }

    fn create_embedded(&mut self, class: &ClassInfo) -> Link {
        let key = self.store.insert_row(class);
        Link::new(class.key, key)
    }

    /// Removes a row and every embedded row it owns.
    fn delete_cascade(&mut self, link: Link) {
        let Some(row) = self.store.remove_row(&link) else {
            return;
        };
        self.tracker.object_deleted(link.class, link.key);
        let mut owned = Vec::new();
        for slot in row.slots.values() {
            slot.collect_links(&mut owned);
        }
        for child in owned {
            if self.schema.is_embedded(child.class) {
                self.delete_cascade(child);
            }
        }
    }

    fn delete_if_embedded(&mut self, value: &StorageValue) {
        if let StorageValue::Link(link) = value {
            if self.schema.is_embedded(link.class) {
                self.delete_cascade(*link);
            }
        }
    }

    fn delete_embedded_in(&mut self, slot: &Slot) {
        let mut links = Vec::new();
        slot.collect_links(&mut links);
        for link in links {
            if self.schema.is_embedded(link.class) {
                self.delete_cascade(link);
            }
        }
    }

    /// Nullifies single links to `target` and removes it from collections.
    fn unlink_everywhere(&mut self, target: Link) {
        let mut edits: Vec<(ClassKey, ObjKey, PropertyKey)> = Vec::new();
        for (class, table) in &self.store.tables {
            for (key, row) in &table.rows {
                for (property, slot) in &row.slots {
                    if slot.references(&target) {
                        edits.push((*class, *key, *property));
                    }
                }
            }
        }
        for (class, key, property) in edits {
            let Some(slot) = self
                .store
                .row_mut(class, key)
                .and_then(|row| row.slots.get_mut(&property))
            else {
                continue;
            };
            let owner = CollectionAddress {
                class,
                key,
                property,
                path: Vec::new(),
            };
            unlink_slot(slot, &target, &owner, self.tracker);
        }
    }
}

fn unlink_slot(
    slot: &mut Slot,
    target: &Link,
    owner: &CollectionAddress,
    tracker: &mut ChangeTracker,
) {
    let is_target = |value: &StorageValue| value.as_link().as_ref() == Some(target);
    match slot {
        Slot::Value(value) => {
            if is_target(value) {
                *value = StorageValue::Null;
                tracker.property_modified(owner.class, owner.key, owner.property);
            }
        }
        Slot::List(items) => {
            for index in (0..items.len()).rev() {
                let hit = matches!(&items[index], Slot::Value(value) if is_target(value));
                if hit {
                    tracker.list(owner.clone(), items.len(), ListOp::Erase(index));
                    items.remove(index);
                } else if items[index].kind().is_collection() {
                    let mut nested = owner.clone();
                    nested.path.push(PathElement::Index(index));
                    unlink_slot(&mut items[index], target, &nested, tracker);
                }
            }
        }
        Slot::Set(items) => {
            if let Some(index) = items.iter().position(is_target) {
                tracker.list(owner.clone(), items.len(), ListOp::Erase(index));
                items.remove(index);
            }
        }
        Slot::Dictionary(entries) => {
            let keys_before: BTreeSet<String> = entries.keys().cloned().collect();
            for (entry_key, entry) in entries.iter_mut() {
                match entry {
                    Slot::Value(value) if is_target(value) => {
                        *value = StorageValue::Null;
                        let before = keys_before.clone();
                        tracker.dictionary(
                            owner.clone(),
                            move || before,
                            DictionaryOp::Set(entry_key.clone()),
                        );
                    }
                    Slot::Value(_) => {}
                    nested_slot => {
                        let mut nested = owner.clone();
                        nested.path.push(PathElement::Key(entry_key.clone()));
                        unlink_slot(nested_slot, target, &nested, tracker);
                    }
                }
            }
        }
    }
}

fn check_dictionary_key(key: &str) -> EngineResult<()> {
    if key.is_empty() || key.starts_with('$') || key.contains('.') {
        return Err(EngineError::new(
            ErrorCode::InvalidDictionaryKey,
            format!("Invalid dictionary key '{key}': keys must be non-empty, must not start with '$' and must not contain '.'"),
        ));
    }
    Ok(())
}

fn require_mixed(property: &PropertyInfo) -> EngineResult<()> {
    if property.descriptor.property_type != PropertyType::Mixed {
        return Err(EngineError::illegal(format!(
            "Property '{}' cannot hold nested collections",
            property.descriptor.name
        )));
    }
    Ok(())
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::with_config(InMemoryEngineConfig::default())
    }
}

impl InMemoryEngine {
    /// Creates an engine with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine with the given configuration.
    #[must_use]
    pub fn with_config(config: InMemoryEngineConfig) -> Self {
        Self {
            config,
            realms: RwLock::new(HashMap::new()),
            next_realm: AtomicU64::new(0),
            next_listener: AtomicU64::new(0),
        }
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &InMemoryEngineConfig {
        &self.config
    }

    fn read<R>(
        &self,
        generation: &GenerationPtr,
        f: impl FnOnce(&Schema, &Store) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let realms = self.realms.read();
        let state = realms.get(&generation.realm).ok_or_else(closed_realm)?;
        let store = state.store(generation)?;
        f(&state.schema, store)
    }

    fn write<R>(
        &self,
        generation: &GenerationPtr,
        f: impl FnOnce(&mut WriteCtx<'_>) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut realms = self.realms.write();
        let state = realms.get_mut(&generation.realm).ok_or_else(closed_realm)?;
        state.ensure_open()?;
        if generation.frozen {
            return Err(EngineError::not_in_write());
        }
        if generation.version != state.version {
            return Err(stale(
                "Accessor belongs to a generation that is no longer current",
            ));
        }
        let RealmState {
            schema,
            live,
            write,
            ..
        } = state;
        let write = write.as_mut().ok_or_else(EngineError::not_in_write)?;
        let mut ctx = WriteCtx {
            schema,
            store: live,
            tracker: &mut write.tracker,
        };
        f(&mut ctx)
    }

    fn with_state<R>(
        &self,
        realm: RealmId,
        f: impl FnOnce(&mut RealmState) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut realms = self.realms.write();
        let state = realms.get_mut(&realm).ok_or_else(closed_realm)?;
        state.ensure_open()?;
        f(state)
    }

    fn validate_schema(schema: &[ClassDescriptor]) -> EngineResult<()> {
        let mut names = BTreeSet::new();
        for class in schema {
            if !names.insert(class.name.as_str()) {
                return Err(schema_error(format!("Duplicate class '{}'", class.name)));
            }
        }
        for class in schema {
            let primary_keys = class.properties.iter().filter(|p| p.primary_key).count();
            if primary_keys > 1 {
                return Err(schema_error(format!(
                    "Class '{}' declares more than one primary key",
                    class.name
                )));
            }
            if class.embedded && primary_keys > 0 {
                return Err(schema_error(format!(
                    "Embedded class '{}' cannot have a primary key",
                    class.name
                )));
            }
            for property in &class.properties {
                if !property.property_type.is_link() {
                    continue;
                }
                let target = property
                    .link_target
                    .as_deref()
                    .and_then(|name| schema.iter().find(|c| c.name == name))
                    .ok_or_else(|| {
                        schema_error(format!(
                            "Property '{}.{}' links to an unknown class",
                            class.name, property.name
                        ))
                    })?;
                if let Some(origin) = &property.link_origin_property {
                    let forward = target.properties.iter().find(|p| &p.name == origin);
                    let valid = forward.is_some_and(|p| {
                        p.property_type == PropertyType::Object
                            && p.link_target.as_deref() == Some(class.name.as_str())
                    });
                    if !valid {
                        return Err(schema_error(format!(
                            "Property '{}.{}' is not a link back to '{}'",
                            target.name, origin, class.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn create_with_key(
        &self,
        generation: &GenerationPtr,
        class: ClassKey,
        primary_key: &StorageValue,
        upsert: bool,
    ) -> EngineResult<ObjPtr> {
        self.write(generation, |ctx| {
            let info = ctx.schema.class(class)?.clone();
            let pk = info.primary_key().cloned().ok_or_else(|| {
                EngineError::new(
                    ErrorCode::UnexpectedPrimaryKey,
                    format!("Class '{}' has no primary key", info.name),
                )
            })?;
            ctx.schema.check_value(ctx.store, &pk, primary_key, false)?;
            if let Some(existing) = find_by_pk(ctx.store, &info, &pk, primary_key) {
                if upsert {
                    return Ok(ObjPtr {
                        generation: *generation,
                        class,
                        key: existing,
                    });
                }
                return Err(EngineError::new(
                    ErrorCode::ObjectAlreadyExists,
                    format!(
                        "Attempting to create an object of type '{}' with an existing primary key value '{primary_key}'",
                        info.name
                    ),
                ));
            }
            let key = ctx.store.insert_row(&info);
            if let Some(row) = ctx.store.row_mut(class, key) {
                row.slots.insert(pk.key, Slot::Value(primary_key.clone()));
            }
            Ok(ObjPtr {
                generation: *generation,
                class,
                key,
            })
        })
    }
}

fn find_by_pk(
    store: &Store,
    class: &ClassInfo,
    pk: &PropertyInfo,
    value: &StorageValue,
) -> Option<ObjKey> {
    let table = store.tables.get(&class.key)?;
    table
        .rows
        .iter()
        .find(|(_, row)| row.slots.get(&pk.key) == Some(&Slot::Value(value.clone())))
        .map(|(key, _)| *key)
}

impl Engine for InMemoryEngine {
    fn open(&self, schema: &[ClassDescriptor]) -> EngineResult<GenerationPtr> {
        Self::validate_schema(schema)?;
        let realm = RealmId::new(self.next_realm.fetch_add(1, Ordering::SeqCst));
        let classes: Vec<ClassInfo> = schema
            .iter()
            .enumerate()
            .map(|(class_index, class)| ClassInfo {
                key: ClassKey::new(class_index as u32),
                name: class.name.clone(),
                embedded: class.embedded,
                properties: class
                    .properties
                    .iter()
                    .enumerate()
                    .map(|(index, descriptor)| PropertyInfo {
                        key: PropertyKey::new(((class_index as u64) << 32) | index as u64),
                        descriptor: descriptor.clone(),
                    })
                    .collect(),
            })
            .collect();

        let state = RealmState {
            schema: Schema { classes },
            live: Store::default(),
            version: 0,
            write: None,
            frozen: HashMap::new(),
            listeners: BTreeMap::new(),
            closed: false,
        };
        let live = state.live_ptr(realm);
        self.realms.write().insert(realm, state);
        debug!(%realm, classes = schema.len(), "opened realm");
        Ok(live)
    }

    fn classes(&self, realm: RealmId) -> EngineResult<Vec<ClassInfo>> {
        let realms = self.realms.read();
        let state = realms.get(&realm).ok_or_else(closed_realm)?;
        state.ensure_open()?;
        Ok(state.schema.classes.clone())
    }

    fn live_generation(&self, realm: RealmId) -> EngineResult<GenerationPtr> {
        let realms = self.realms.read();
        let state = realms.get(&realm).ok_or_else(closed_realm)?;
        state.ensure_open()?;
        Ok(state.live_ptr(realm))
    }

    fn begin_write(&self, realm: RealmId) -> EngineResult<GenerationPtr> {
        self.with_state(realm, |state| {
            if state.write.is_some() {
                return Err(EngineError::new(
                    ErrorCode::WrongTransactionState,
                    "The Realm is already in a write transaction",
                ));
            }
            state.write = Some(WriteState {
                rollback: state.live.clone(),
                tracker: ChangeTracker::default(),
            });
            debug!(%realm, version = state.version, "began write");
            Ok(state.live_ptr(realm))
        })
    }

    fn commit_write(&self, realm: RealmId) -> EngineResult<GenerationPtr> {
        let encoding = self.config.change_encoding;
        let (live, deliveries) = self.with_state(realm, |state| {
            let write = state.write.take().ok_or_else(|| {
                EngineError::new(
                    ErrorCode::WrongTransactionState,
                    "Cannot commit when not in a write transaction",
                )
            })?;
            state.version += 1;
            let deliveries = state.deliveries(&write.tracker, encoding);
            debug!(%realm, version = state.version, listeners = deliveries.len(), "committed write");
            Ok((state.live_ptr(realm), deliveries))
        })?;

        deliver(deliveries);
        Ok(live)
    }

    fn cancel_write(&self, realm: RealmId) -> EngineResult<GenerationPtr> {
        self.with_state(realm, |state| {
            let write = state.write.take().ok_or_else(|| {
                EngineError::new(
                    ErrorCode::WrongTransactionState,
                    "Cannot cancel when not in a write transaction",
                )
            })?;
            state.live = write.rollback;
            state.version += 1;
            debug!(%realm, version = state.version, "cancelled write");
            Ok(state.live_ptr(realm))
        })
    }

    fn is_in_write(&self, realm: RealmId) -> bool {
        self.realms
            .read()
            .get(&realm)
            .is_some_and(|state| !state.closed && state.write.is_some())
    }

    fn freeze(&self, realm: RealmId) -> EngineResult<GenerationPtr> {
        self.with_state(realm, |state| {
            let version = state.version;
            let snapshot = Arc::new(state.committed().clone());
            state
                .frozen
                .entry(version)
                .or_insert_with(|| (snapshot, 0))
                .1 += 1;
            debug!(%realm, version, "froze generation");
            Ok(GenerationPtr {
                realm,
                version,
                frozen: true,
            })
        })
    }

    fn release(&self, generation: &GenerationPtr) {
        if !generation.frozen {
            return;
        }
        let mut realms = self.realms.write();
        let Some(state) = realms.get_mut(&generation.realm) else {
            return;
        };
        if let Some(entry) = state.frozen.get_mut(&generation.version) {
            entry.1 = entry.1.saturating_sub(1);
            if entry.1 == 0 {
                state.frozen.remove(&generation.version);
                debug!(realm = %generation.realm, version = generation.version, "released frozen generation");
            }
        }
    }

    fn close(&self, realm: RealmId) {
        let mut realms = self.realms.write();
        if let Some(state) = realms.get_mut(&realm) {
            if !state.closed {
                state.closed = true;
                state.write = None;
                state.frozen.clear();
                state.listeners.clear();
                debug!(%realm, "closed realm");
            }
        }
    }

    fn is_closed(&self, realm: RealmId) -> bool {
        self.realms
            .read()
            .get(&realm)
            .map_or(true, |state| state.closed)
    }

    fn is_generation_valid(&self, generation: &GenerationPtr) -> bool {
        self.realms
            .read()
            .get(&generation.realm)
            .is_some_and(|state| state.store(generation).is_ok())
    }

    fn create_object(&self, generation: &GenerationPtr, class: ClassKey) -> EngineResult<ObjPtr> {
        self.write(generation, |ctx| {
            let info = ctx.schema.class(class)?;
            if info.embedded {
                return Err(EngineError::new(
                    ErrorCode::TopLevelObject,
                    format!("Embedded object '{}' cannot be created without a parent", info.name),
                ));
            }
            if info.primary_key().is_some() {
                return Err(EngineError::new(
                    ErrorCode::MissingPrimaryKey,
                    format!("Class '{}' requires a primary key", info.name),
                ));
            }
            let info = info.clone();
            let key = ctx.store.insert_row(&info);
            Ok(ObjPtr {
                generation: *generation,
                class,
                key,
            })
        })
    }

    fn create_object_with_primary_key(
        &self,
        generation: &GenerationPtr,
        class: ClassKey,
        primary_key: &StorageValue,
    ) -> EngineResult<ObjPtr> {
        self.create_with_key(generation, class, primary_key, false)
    }

    fn get_or_create_with_primary_key(
        &self,
        generation: &GenerationPtr,
        class: ClassKey,
        primary_key: &StorageValue,
    ) -> EngineResult<ObjPtr> {
        self.create_with_key(generation, class, primary_key, true)
    }

    fn find_by_primary_key(
        &self,
        generation: &GenerationPtr,
        class: ClassKey,
        primary_key: &StorageValue,
    ) -> EngineResult<Option<ObjPtr>> {
        self.read(generation, |schema, store| {
            let info = schema.class(class)?;
            let Some(pk) = info.primary_key() else {
                return Ok(None);
            };
            Ok(find_by_pk(store, info, pk, primary_key).map(|key| ObjPtr {
                generation: *generation,
                class,
                key,
            }))
        })
    }

    fn objects(&self, generation: &GenerationPtr, class: ClassKey) -> EngineResult<Vec<ObjPtr>> {
        self.read(generation, |schema, store| {
            schema.class(class)?;
            Ok(store
                .tables
                .get(&class)
                .map(|table| {
                    table
                        .rows
                        .keys()
                        .map(|key| ObjPtr {
                            generation: *generation,
                            class,
                            key: *key,
                        })
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn delete_object(&self, object: &ObjPtr) -> EngineResult<()> {
        self.write(&object.generation, |ctx| {
            ctx.require_row(object)?;
            let link = Link::new(object.class, object.key);
            ctx.delete_cascade(link);
            ctx.unlink_everywhere(link);
            Ok(())
        })
    }

    fn is_object_valid(&self, object: &ObjPtr) -> bool {
        self.read(&object.generation, |_, store| {
            Ok(store.row(object.class, object.key).is_some())
        })
        .unwrap_or(false)
    }

    fn resolve_object(
        &self,
        object: &ObjPtr,
        generation: &GenerationPtr,
    ) -> EngineResult<Option<ObjPtr>> {
        self.read(generation, |_, store| {
            Ok(store.row(object.class, object.key).map(|_| ObjPtr {
                generation: *generation,
                class: object.class,
                key: object.key,
            }))
        })
    }

    fn get_value(&self, object: &ObjPtr, property: PropertyKey) -> EngineResult<StorageValue> {
        self.read(&object.generation, |schema, store| {
            let info = schema.property(object.class, property)?;
            let row = store
                .row(object.class, object.key)
                .ok_or_else(invalidated_object)?;
            match row.slots.get(&property) {
                Some(slot @ Slot::Value(_)) => Ok(slot.to_value()),
                Some(slot) if info.descriptor.property_type == PropertyType::Mixed => {
                    Ok(slot.to_value())
                }
                _ => Err(EngineError::illegal(format!(
                    "Property '{}' is not a single value",
                    info.descriptor.name
                ))),
            }
        })
    }

    fn set_value(
        &self,
        object: &ObjPtr,
        property: PropertyKey,
        value: &StorageValue,
    ) -> EngineResult<()> {
        self.write(&object.generation, |ctx| {
            ctx.require_row(object)?;
            let info = ctx.schema.property(object.class, property)?.clone();
            if info.descriptor.is_computed() {
                return Err(EngineError::new(
                    ErrorCode::ReadOnlyProperty,
                    format!("Property '{}' is read-only", info.descriptor.name),
                ));
            }
            if info.descriptor.collection.is_collection() {
                return Err(EngineError::illegal(format!(
                    "Property '{}' is a collection",
                    info.descriptor.name
                )));
            }
            if info.descriptor.primary_key {
                return Err(EngineError::new(
                    ErrorCode::ModifyPrimaryKey,
                    format!("Cannot modify primary key '{}'", info.descriptor.name),
                ));
            }
            let embedded_link = info.descriptor.property_type == PropertyType::Object
                && ctx.schema.link_target(&info)?.embedded;
            if embedded_link && !value.is_null() {
                return Err(EngineError::illegal(
                    "Cannot link directly to an embedded object",
                ));
            }
            ctx.schema.check_value(ctx.store, &info, value, false)?;

            let row = ctx
                .store
                .row_mut(object.class, object.key)
                .ok_or_else(invalidated_object)?;
            let previous = row
                .slots
                .insert(property, Slot::Value(value.clone()))
                .unwrap_or(Slot::Value(StorageValue::Null));
            ctx.tracker
                .property_modified(object.class, object.key, property);
            if embedded_link {
                ctx.delete_embedded_in(&previous);
            }
            Ok(())
        })
    }

    fn add_int(&self, object: &ObjPtr, property: PropertyKey, delta: i64) -> EngineResult<i64> {
        self.write(&object.generation, |ctx| {
            ctx.require_row(object)?;
            let info = ctx.schema.property(object.class, property)?.clone();
            let descriptor = &info.descriptor;
            if descriptor.property_type != PropertyType::Int || descriptor.collection.is_collection() {
                return Err(EngineError::new(
                    ErrorCode::PropertyTypeMismatch,
                    format!("Property '{}' is not an integer", descriptor.name),
                ));
            }
            if descriptor.primary_key {
                return Err(EngineError::new(
                    ErrorCode::ModifyPrimaryKey,
                    format!("Cannot modify primary key '{}'", descriptor.name),
                ));
            }
            let row = ctx
                .store
                .row_mut(object.class, object.key)
                .ok_or_else(invalidated_object)?;
            let current = match row.slots.get(&property) {
                Some(Slot::Value(StorageValue::Int(current))) => *current,
                _ => {
                    return Err(EngineError::illegal(format!(
                        "Cannot add to null property '{}'",
                        descriptor.name
                    )))
                }
            };
            let sum = current.checked_add(delta).ok_or_else(|| {
                EngineError::new(
                    ErrorCode::RangeError,
                    format!("{current} + {delta} overflows property '{}'", descriptor.name),
                )
            })?;
            row.slots.insert(property, Slot::Value(StorageValue::Int(sum)));
            ctx.tracker
                .property_modified(object.class, object.key, property);
            trace!(property = %descriptor.name, current, delta, "added to integer");
            Ok(sum)
        })
    }

    fn set_embedded(&self, object: &ObjPtr, property: PropertyKey) -> EngineResult<ObjPtr> {
        self.write(&object.generation, |ctx| {
            ctx.require_row(object)?;
            let info = ctx.schema.property(object.class, property)?.clone();
            let target = ctx.schema.link_target(&info)?.clone();
            if !target.embedded || info.descriptor.collection.is_collection() {
                return Err(EngineError::illegal(format!(
                    "Property '{}' does not hold a single embedded object",
                    info.descriptor.name
                )));
            }
            let child = ctx.create_embedded(&target);
            let row = ctx
                .store
                .row_mut(object.class, object.key)
                .ok_or_else(invalidated_object)?;
            let previous = row
                .slots
                .insert(property, Slot::Value(StorageValue::Link(child)))
                .unwrap_or(Slot::Value(StorageValue::Null));
            ctx.tracker
                .property_modified(object.class, object.key, property);
            ctx.delete_embedded_in(&previous);
            Ok(ObjPtr {
                generation: object.generation,
                class: child.class,
                key: child.key,
            })
        })
    }

    fn set_collection(
        &self,
        object: &ObjPtr,
        property: PropertyKey,
        kind: CollectionKind,
    ) -> EngineResult<CollectionPtr> {
        self.write(&object.generation, |ctx| {
            ctx.require_row(object)?;
            let info = ctx.schema.property(object.class, property)?.clone();
            require_mixed(&info)?;
            if info.descriptor.collection.is_collection() || kind == CollectionKind::Set {
                return Err(EngineError::illegal(
                    "Only single mixed properties can hold a nested list or dictionary",
                ));
            }
            let row = ctx
                .store
                .row_mut(object.class, object.key)
                .ok_or_else(invalidated_object)?;
            row.slots.insert(property, Slot::empty(kind));
            ctx.tracker
                .property_modified(object.class, object.key, property);
            Ok(CollectionPtr {
                generation: object.generation,
                class: object.class,
                key: object.key,
                property,
                path: Vec::new(),
                kind,
            })
        })
    }

    fn collection(&self, object: &ObjPtr, property: PropertyKey) -> EngineResult<CollectionPtr> {
        self.read(&object.generation, |schema, store| {
            let info = schema.property(object.class, property)?;
            let row = store
                .row(object.class, object.key)
                .ok_or_else(invalidated_object)?;
            let kind = row
                .slots
                .get(&property)
                .map(Slot::kind)
                .filter(|kind| kind.is_collection())
                .ok_or_else(|| {
                    EngineError::illegal(format!(
                        "Property '{}' does not hold a collection",
                        info.descriptor.name
                    ))
                })?;
            Ok(CollectionPtr {
                generation: object.generation,
                class: object.class,
                key: object.key,
                property,
                path: Vec::new(),
                kind,
            })
        })
    }

    fn backlinks(&self, object: &ObjPtr, property: PropertyKey) -> EngineResult<Vec<ObjPtr>> {
        self.read(&object.generation, |schema, store| {
            let info = schema.property(object.class, property)?;
            if !info.descriptor.is_computed() {
                return Err(EngineError::illegal(format!(
                    "Property '{}' is not an inverse relationship",
                    info.descriptor.name
                )));
            }
            store
                .row(object.class, object.key)
                .ok_or_else(invalidated_object)?;
            let origin_class = schema.link_target(info)?;
            let origin_name = info.descriptor.link_origin_property.as_deref().unwrap_or("");
            let origin = origin_class.property(origin_name).ok_or_else(|| {
                EngineError::new(
                    ErrorCode::InvalidProperty,
                    format!("No property '{origin_name}' on '{}'", origin_class.name),
                )
            })?;
            let target = Link::new(object.class, object.key);
            let Some(table) = store.tables.get(&origin_class.key) else {
                return Ok(Vec::new());
            };
            Ok(table
                .rows
                .iter()
                .filter(|(_, row)| {
                    row.slots
                        .get(&origin.key)
                        .is_some_and(|slot| slot.references(&target))
                })
                .map(|(key, _)| ObjPtr {
                    generation: object.generation,
                    class: origin_class.key,
                    key: *key,
                })
                .collect())
        })
    }

    fn collection_size(&self, collection: &CollectionPtr) -> EngineResult<usize> {
        self.read(&collection.generation, |_, store| {
            Ok(match store.collection_slot(collection)? {
                Slot::Value(_) => 0,
                Slot::List(items) => items.len(),
                Slot::Set(items) => items.len(),
                Slot::Dictionary(entries) => entries.len(),
            })
        })
    }

    fn collection_clear(&self, collection: &CollectionPtr) -> EngineResult<()> {
        self.write(&collection.generation, |ctx| {
            let address = CollectionAddress::from(collection);
            let slot = ctx.store.collection_slot_mut(collection)?;
            let previous = std::mem::replace(slot, Slot::empty(collection.kind));
            match &previous {
                Slot::List(items) => {
                    ctx.tracker.list(address, items.len(), ListOp::Clear);
                }
                Slot::Set(items) => {
                    ctx.tracker.list(address, items.len(), ListOp::Clear);
                }
                Slot::Dictionary(entries) => {
                    let keys: BTreeSet<String> = entries.keys().cloned().collect();
                    ctx.tracker
                        .dictionary(address, move || keys, DictionaryOp::Clear);
                }
                Slot::Value(_) => {}
            }
            ctx.delete_embedded_in(&previous);
            Ok(())
        })
    }

    fn is_collection_valid(&self, collection: &CollectionPtr) -> bool {
        self.read(&collection.generation, |_, store| {
            store.collection_slot(collection).map(|_| ())
        })
        .is_ok()
    }

    fn resolve_collection(
        &self,
        collection: &CollectionPtr,
        generation: &GenerationPtr,
    ) -> EngineResult<Option<CollectionPtr>> {
        self.read(generation, |_, store| {
            let mut resolved = collection.clone();
            resolved.generation = *generation;
            Ok(store.collection_slot(&resolved).ok().map(|_| resolved))
        })
    }

    fn list_get(&self, list: &CollectionPtr, index: usize) -> EngineResult<StorageValue> {
        self.read(&list.generation, |_, store| match store.collection_slot(list)? {
            Slot::List(items) => items
                .get(index)
                .map(Slot::to_value)
                .ok_or_else(|| index_out_of_bounds(index, items.len())),
            _ => Err(EngineError::illegal("Not a list")),
        })
    }

    fn list_insert(
        &self,
        list: &CollectionPtr,
        index: usize,
        value: &StorageValue,
    ) -> EngineResult<()> {
        self.write(&list.generation, |ctx| {
            let info = ctx.collection_property(list)?;
            ctx.schema.check_value(ctx.store, &info, value, true)?;
            let Slot::List(items) = ctx.store.collection_slot_mut(list)? else {
                return Err(EngineError::illegal("Not a list"));
            };
            if index > items.len() {
                return Err(index_out_of_bounds(index, items.len()));
            }
            let len = items.len();
            items.insert(index, Slot::Value(value.clone()));
            ctx.tracker.list(list.into(), len, ListOp::Insert(index));
            Ok(())
        })
    }

    fn list_set(
        &self,
        list: &CollectionPtr,
        index: usize,
        value: &StorageValue,
    ) -> EngineResult<StorageValue> {
        self.write(&list.generation, |ctx| {
            let info = ctx.collection_property(list)?;
            ctx.schema.check_value(ctx.store, &info, value, true)?;
            let Slot::List(items) = ctx.store.collection_slot_mut(list)? else {
                return Err(EngineError::illegal("Not a list"));
            };
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or_else(|| index_out_of_bounds(index, len))?;
            let previous = std::mem::replace(slot, Slot::Value(value.clone()));
            ctx.tracker.list(list.into(), len, ListOp::Set(index));
            ctx.delete_embedded_in(&previous);
            Ok(previous.to_value())
        })
    }

    fn list_erase(&self, list: &CollectionPtr, index: usize) -> EngineResult<()> {
        self.write(&list.generation, |ctx| {
            let Slot::List(items) = ctx.store.collection_slot_mut(list)? else {
                return Err(EngineError::illegal("Not a list"));
            };
            if index >= items.len() {
                return Err(index_out_of_bounds(index, items.len()));
            }
            let len = items.len();
            let previous = items.remove(index);
            ctx.tracker.list(list.into(), len, ListOp::Erase(index));
            ctx.delete_embedded_in(&previous);
            Ok(())
        })
    }

    fn list_move(&self, list: &CollectionPtr, from: usize, to: usize) -> EngineResult<()> {
        self.write(&list.generation, |ctx| {
            let Slot::List(items) = ctx.store.collection_slot_mut(list)? else {
                return Err(EngineError::illegal("Not a list"));
            };
            let len = items.len();
            if from >= len || to >= len {
                return Err(index_out_of_bounds(from.max(to), len));
            }
            let item = items.remove(from);
            items.insert(to, item);
            ctx.tracker.list(list.into(), len, ListOp::Move(from, to));
            Ok(())
        })
    }

    fn list_find(&self, list: &CollectionPtr, value: &StorageValue) -> EngineResult<Option<usize>> {
        self.read(&list.generation, |_, store| match store.collection_slot(list)? {
            Slot::List(items) => Ok(items
                .iter()
                .position(|item| matches!(item, Slot::Value(v) if v == value))),
            _ => Err(EngineError::illegal("Not a list")),
        })
    }

    fn list_insert_embedded(&self, list: &CollectionPtr, index: usize) -> EngineResult<ObjPtr> {
        self.write(&list.generation, |ctx| {
            let info = ctx.collection_property(list)?;
            let target = ctx.schema.link_target(&info)?.clone();
            if !target.embedded {
                return Err(EngineError::illegal("List does not hold embedded objects"));
            }
            let len = match ctx.store.collection_slot(list)? {
                Slot::List(items) => items.len(),
                _ => return Err(EngineError::illegal("Not a list")),
            };
            if index > len {
                return Err(index_out_of_bounds(index, len));
            }
            let child = ctx.create_embedded(&target);
            if let Slot::List(items) = ctx.store.collection_slot_mut(list)? {
                items.insert(index, Slot::Value(StorageValue::Link(child)));
            }
            ctx.tracker.list(list.into(), len, ListOp::Insert(index));
            Ok(ObjPtr {
                generation: list.generation,
                class: child.class,
                key: child.key,
            })
        })
    }

    fn list_set_embedded(&self, list: &CollectionPtr, index: usize) -> EngineResult<ObjPtr> {
        self.write(&list.generation, |ctx| {
            let info = ctx.collection_property(list)?;
            let target = ctx.schema.link_target(&info)?.clone();
            if !target.embedded {
                return Err(EngineError::illegal("List does not hold embedded objects"));
            }
            let len = match ctx.store.collection_slot(list)? {
                Slot::List(items) => items.len(),
                _ => return Err(EngineError::illegal("Not a list")),
            };
            if index >= len {
                return Err(index_out_of_bounds(index, len));
            }
            // Create the replacement first so the slot is never empty.
            let child = ctx.create_embedded(&target);
            let previous = match ctx.store.collection_slot_mut(list)? {
                Slot::List(items) => {
                    std::mem::replace(&mut items[index], Slot::Value(StorageValue::Link(child)))
                }
                _ => return Err(EngineError::illegal("Not a list")),
            };
            ctx.tracker.list(list.into(), len, ListOp::Set(index));
            ctx.delete_embedded_in(&previous);
            Ok(ObjPtr {
                generation: list.generation,
                class: child.class,
                key: child.key,
            })
        })
    }

    fn list_insert_collection(
        &self,
        list: &CollectionPtr,
        index: usize,
        kind: CollectionKind,
    ) -> EngineResult<CollectionPtr> {
        self.write(&list.generation, |ctx| {
            let info = ctx.collection_property(list)?;
            require_mixed(&info)?;
            let Slot::List(items) = ctx.store.collection_slot_mut(list)? else {
                return Err(EngineError::illegal("Not a list"));
            };
            if index > items.len() {
                return Err(index_out_of_bounds(index, items.len()));
            }
            let len = items.len();
            items.insert(index, Slot::empty(kind));
            ctx.tracker.list(list.into(), len, ListOp::Insert(index));
            Ok(list.child(PathElement::Index(index), kind))
        })
    }

    fn list_set_collection(
        &self,
        list: &CollectionPtr,
        index: usize,
        kind: CollectionKind,
    ) -> EngineResult<CollectionPtr> {
        self.write(&list.generation, |ctx| {
            let info = ctx.collection_property(list)?;
            require_mixed(&info)?;
            let Slot::List(items) = ctx.store.collection_slot_mut(list)? else {
                return Err(EngineError::illegal("Not a list"));
            };
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or_else(|| index_out_of_bounds(index, len))?;
            *slot = Slot::empty(kind);
            ctx.tracker.list(list.into(), len, ListOp::Set(index));
            Ok(list.child(PathElement::Index(index), kind))
        })
    }

    fn list_get_collection(
        &self,
        list: &CollectionPtr,
        index: usize,
    ) -> EngineResult<CollectionPtr> {
        self.read(&list.generation, |_, store| match store.collection_slot(list)? {
            Slot::List(items) => {
                let item = items
                    .get(index)
                    .ok_or_else(|| index_out_of_bounds(index, items.len()))?;
                match item.kind() {
                    CollectionKind::None => {
                        Err(EngineError::illegal("Element is not a collection"))
                    }
                    kind => Ok(list.child(PathElement::Index(index), kind)),
                }
            }
            _ => Err(EngineError::illegal("Not a list")),
        })
    }

    fn set_get(&self, set: &CollectionPtr, index: usize) -> EngineResult<StorageValue> {
        self.read(&set.generation, |_, store| match store.collection_slot(set)? {
            Slot::Set(items) => items
                .get(index)
                .cloned()
                .ok_or_else(|| index_out_of_bounds(index, items.len())),
            _ => Err(EngineError::illegal("Not a set")),
        })
    }

    fn set_insert(&self, set: &CollectionPtr, value: &StorageValue) -> EngineResult<bool> {
        self.write(&set.generation, |ctx| {
            let info = ctx.collection_property(set)?;
            ctx.schema.check_value(ctx.store, &info, value, true)?;
            let Slot::Set(items) = ctx.store.collection_slot_mut(set)? else {
                return Err(EngineError::illegal("Not a set"));
            };
            if items.contains(value) {
                return Ok(false);
            }
            let len = items.len();
            items.push(value.clone());
            ctx.tracker.list(set.into(), len, ListOp::Insert(len));
            Ok(true)
        })
    }

    fn set_erase(&self, set: &CollectionPtr, value: &StorageValue) -> EngineResult<bool> {
        self.write(&set.generation, |ctx| {
            let Slot::Set(items) = ctx.store.collection_slot_mut(set)? else {
                return Err(EngineError::illegal("Not a set"));
            };
            let Some(index) = items.iter().position(|item| item == value) else {
                return Ok(false);
            };
            let len = items.len();
            items.remove(index);
            ctx.tracker.list(set.into(), len, ListOp::Erase(index));
            Ok(true)
        })
    }

    fn set_find(&self, set: &CollectionPtr, value: &StorageValue) -> EngineResult<bool> {
        self.read(&set.generation, |_, store| match store.collection_slot(set)? {
            Slot::Set(items) => Ok(items.contains(value)),
            _ => Err(EngineError::illegal("Not a set")),
        })
    }

    fn dictionary_get(
        &self,
        dictionary: &CollectionPtr,
        key: &str,
    ) -> EngineResult<Option<StorageValue>> {
        self.read(&dictionary.generation, |_, store| {
            match store.collection_slot(dictionary)? {
                Slot::Dictionary(entries) => Ok(entries.get(key).map(Slot::to_value)),
                _ => Err(EngineError::illegal("Not a dictionary")),
            }
        })
    }

    fn dictionary_insert(
        &self,
        dictionary: &CollectionPtr,
        key: &str,
        value: &StorageValue,
    ) -> EngineResult<bool> {
        check_dictionary_key(key)?;
        self.write(&dictionary.generation, |ctx| {
            let info = ctx.collection_property(dictionary)?;
            ctx.schema.check_value(ctx.store, &info, value, true)?;
            let Slot::Dictionary(entries) = ctx.store.collection_slot_mut(dictionary)? else {
                return Err(EngineError::illegal("Not a dictionary"));
            };
            let keys: BTreeSet<String> = entries.keys().cloned().collect();
            let previous = entries.insert(key.to_string(), Slot::Value(value.clone()));
            ctx.tracker.dictionary(
                dictionary.into(),
                move || keys,
                DictionaryOp::Set(key.to_string()),
            );
            let inserted = previous.is_none();
            if let Some(previous) = previous {
                ctx.delete_embedded_in(&previous);
            }
            Ok(inserted)
        })
    }

    fn dictionary_erase(&self, dictionary: &CollectionPtr, key: &str) -> EngineResult<bool> {
        self.write(&dictionary.generation, |ctx| {
            let Slot::Dictionary(entries) = ctx.store.collection_slot_mut(dictionary)? else {
                return Err(EngineError::illegal("Not a dictionary"));
            };
            let keys: BTreeSet<String> = entries.keys().cloned().collect();
            let Some(previous) = entries.remove(key) else {
                return Ok(false);
            };
            ctx.tracker.dictionary(
                dictionary.into(),
                move || keys,
                DictionaryOp::Erase(key.to_string()),
            );
            ctx.delete_embedded_in(&previous);
            Ok(true)
        })
    }

    fn dictionary_keys(&self, dictionary: &CollectionPtr) -> EngineResult<Vec<String>> {
        self.read(&dictionary.generation, |_, store| {
            match store.collection_slot(dictionary)? {
                Slot::Dictionary(entries) => Ok(entries.keys().cloned().collect()),
                _ => Err(EngineError::illegal("Not a dictionary")),
            }
        })
    }

    fn dictionary_insert_embedded(
        &self,
        dictionary: &CollectionPtr,
        key: &str,
    ) -> EngineResult<ObjPtr> {
        check_dictionary_key(key)?;
        self.write(&dictionary.generation, |ctx| {
            let info = ctx.collection_property(dictionary)?;
            let target = ctx.schema.link_target(&info)?.clone();
            if !target.embedded {
                return Err(EngineError::illegal(
                    "Dictionary does not hold embedded objects",
                ));
            }
            ctx.store.collection_slot(dictionary)?;
            let child = ctx.create_embedded(&target);
            let Slot::Dictionary(entries) = ctx.store.collection_slot_mut(dictionary)? else {
                return Err(EngineError::illegal("Not a dictionary"));
            };
            let keys: BTreeSet<String> = entries.keys().cloned().collect();
            let previous = entries.insert(key.to_string(), Slot::Value(StorageValue::Link(child)));
            ctx.tracker.dictionary(
                dictionary.into(),
                move || keys,
                DictionaryOp::Set(key.to_string()),
            );
            if let Some(previous) = previous {
                ctx.delete_embedded_in(&previous);
            }
            Ok(ObjPtr {
                generation: dictionary.generation,
                class: child.class,
                key: child.key,
            })
        })
    }

    fn dictionary_insert_collection(
        &self,
        dictionary: &CollectionPtr,
        key: &str,
        kind: CollectionKind,
    ) -> EngineResult<CollectionPtr> {
        check_dictionary_key(key)?;
        self.write(&dictionary.generation, |ctx| {
            let info = ctx.collection_property(dictionary)?;
            require_mixed(&info)?;
            let Slot::Dictionary(entries) = ctx.store.collection_slot_mut(dictionary)? else {
                return Err(EngineError::illegal("Not a dictionary"));
            };
            let keys: BTreeSet<String> = entries.keys().cloned().collect();
            entries.insert(key.to_string(), Slot::empty(kind));
            ctx.tracker.dictionary(
                dictionary.into(),
                move || keys,
                DictionaryOp::Set(key.to_string()),
            );
            Ok(dictionary.child(PathElement::Key(key.to_string()), kind))
        })
    }

    fn dictionary_get_collection(
        &self,
        dictionary: &CollectionPtr,
        key: &str,
    ) -> EngineResult<CollectionPtr> {
        self.read(&dictionary.generation, |_, store| {
            match store.collection_slot(dictionary)? {
                Slot::Dictionary(entries) => match entries.get(key).map(Slot::kind) {
                    Some(CollectionKind::None) | None => {
                        Err(EngineError::illegal(format!("Value at '{key}' is not a collection")))
                    }
                    Some(kind) => Ok(dictionary.child(PathElement::Key(key.to_string()), kind)),
                },
                _ => Err(EngineError::illegal("Not a dictionary")),
            }
        })
    }

    fn add_object_listener(
        &self,
        object: &ObjPtr,
        callback: ChangeCallback,
    ) -> EngineResult<ListenerId> {
        let id = ListenerId::new(self.next_listener.fetch_add(1, Ordering::SeqCst));
        let mut realms = self.realms.write();
        let state = realms
            .get_mut(&object.generation.realm)
            .ok_or_else(closed_realm)?;
        state
            .store(&object.generation)?
            .row(object.class, object.key)
            .ok_or_else(invalidated_object)?;
        state.listeners.insert(
            id,
            Listener {
                target: ListenerTarget::Object(object.class, object.key),
                callback: Arc::new(callback),
            },
        );
        debug!(listener = id.as_u64(), "registered object listener");
        Ok(id)
    }

    fn add_collection_listener(
        &self,
        collection: &CollectionPtr,
        callback: ChangeCallback,
    ) -> EngineResult<ListenerId> {
        let id = ListenerId::new(self.next_listener.fetch_add(1, Ordering::SeqCst));
        let mut realms = self.realms.write();
        let state = realms
            .get_mut(&collection.generation.realm)
            .ok_or_else(closed_realm)?;
        state
            .store(&collection.generation)?
            .collection_slot(collection)?;
        state.listeners.insert(
            id,
            Listener {
                target: ListenerTarget::Collection(collection.into(), collection.kind),
                callback: Arc::new(callback),
            },
        );
        debug!(listener = id.as_u64(), "registered collection listener");
        Ok(id)
    }

    fn remove_listener(&self, listener: ListenerId) -> bool {
        let mut realms = self.realms.write();
        let removed = realms
            .values_mut()
            .any(|state| state.listeners.remove(&listener).is_some());
        if removed {
            debug!(listener = listener.as_u64(), "removed listener");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertyDescriptor;
    use std::sync::Mutex;
    use tessera_codec::IndexEncoding;

    fn schema() -> Vec<ClassDescriptor> {
        vec![
            ClassDescriptor::new("Parent")
                .property(PropertyDescriptor::new("id", PropertyType::Int).primary_key())
                .property(PropertyDescriptor::object("child", "Child"))
                .property(PropertyDescriptor::new("visits", PropertyType::Int))
                .property(
                    PropertyDescriptor::new("children", PropertyType::Object)
                        .collection(CollectionKind::List)
                        .link_target("Child"),
                )
                .property(
                    PropertyDescriptor::new("numbers", PropertyType::Int)
                        .collection(CollectionKind::List),
                )
                .property(
                    PropertyDescriptor::new("scores", PropertyType::Int)
                        .collection(CollectionKind::Dictionary),
                ),
            ClassDescriptor::embedded("Child")
                .property(PropertyDescriptor::new("name", PropertyType::String)),
        ]
    }

    struct Fixture {
        engine: InMemoryEngine,
        realm: RealmId,
        parent: ClassKey,
        child: ClassKey,
    }

    fn fixture(encoding: ChangeEncoding) -> Fixture {
        let engine =
            InMemoryEngine::with_config(InMemoryEngineConfig::new().change_encoding(encoding));
        let live = engine.open(&schema()).unwrap();
        let classes = engine.classes(live.realm).unwrap();
        Fixture {
            parent: classes[0].key,
            child: classes[1].key,
            realm: live.realm,
            engine,
        }
    }

    fn prop(f: &Fixture, class: ClassKey, name: &str) -> PropertyKey {
        let classes = f.engine.classes(f.realm).unwrap();
        let info = classes.iter().find(|c| c.key == class).unwrap();
        info.property(name).unwrap().key
    }

    #[test]
    fn mutation_outside_write_fails() {
        let f = fixture(ChangeEncoding::Indices);
        let live = f.engine.live_generation(f.realm).unwrap();
        let err = f
            .engine
            .create_object_with_primary_key(&live, f.parent, &StorageValue::Int(1))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::WrongTransactionState);
    }

    #[test]
    fn add_int_updates_in_place_and_rejects_overflow() {
        let f = fixture(ChangeEncoding::Indices);
        let write = f.engine.begin_write(f.realm).unwrap();
        let obj = f
            .engine
            .create_object_with_primary_key(&write, f.parent, &StorageValue::Int(1))
            .unwrap();
        let visits = prop(&f, f.parent, "visits");
        assert_eq!(f.engine.add_int(&obj, visits, 5).unwrap(), 5);
        assert_eq!(f.engine.add_int(&obj, visits, -7).unwrap(), -2);
        assert_eq!(f.engine.get_value(&obj, visits).unwrap(), StorageValue::Int(-2));

        f.engine
            .set_value(&obj, visits, &StorageValue::Int(i64::MAX))
            .unwrap();
        let err = f.engine.add_int(&obj, visits, 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::RangeError);
        assert_eq!(
            f.engine.get_value(&obj, visits).unwrap(),
            StorageValue::Int(i64::MAX)
        );

        let id = prop(&f, f.parent, "id");
        let err = f.engine.add_int(&obj, id, 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::ModifyPrimaryKey);
        let numbers = prop(&f, f.parent, "numbers");
        let err = f.engine.add_int(&obj, numbers, 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::PropertyTypeMismatch);

        let live = f.engine.commit_write(f.realm).unwrap();
        let obj = f.engine.resolve_object(&obj, &live).unwrap().unwrap();
        let err = f.engine.add_int(&obj, visits, 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::WrongTransactionState);
    }

    #[test]
    fn duplicate_primary_key_fails_unless_upsert() {
        let f = fixture(ChangeEncoding::Indices);
        let write = f.engine.begin_write(f.realm).unwrap();
        let pk = StorageValue::Int(1);
        let first = f
            .engine
            .create_object_with_primary_key(&write, f.parent, &pk)
            .unwrap();
        let err = f
            .engine
            .create_object_with_primary_key(&write, f.parent, &pk)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ObjectAlreadyExists);
        let same = f
            .engine
            .get_or_create_with_primary_key(&write, f.parent, &pk)
            .unwrap();
        assert_eq!(first, same);
    }

    #[test]
    fn handles_go_stale_after_commit() {
        let f = fixture(ChangeEncoding::Indices);
        let write = f.engine.begin_write(f.realm).unwrap();
        let obj = f
            .engine
            .create_object_with_primary_key(&write, f.parent, &StorageValue::Int(1))
            .unwrap();
        let live = f.engine.commit_write(f.realm).unwrap();
        assert!(!f.engine.is_object_valid(&obj));
        let resolved = f.engine.resolve_object(&obj, &live).unwrap().unwrap();
        assert!(f.engine.is_object_valid(&resolved));
    }

    #[test]
    fn frozen_generation_survives_writes() {
        let f = fixture(ChangeEncoding::Indices);
        let write = f.engine.begin_write(f.realm).unwrap();
        f.engine
            .create_object_with_primary_key(&write, f.parent, &StorageValue::Int(1))
            .unwrap();
        f.engine.commit_write(f.realm).unwrap();

        let frozen = f.engine.freeze(f.realm).unwrap();
        let objects = f.engine.objects(&frozen, f.parent).unwrap();
        assert_eq!(objects.len(), 1);

        let write = f.engine.begin_write(f.realm).unwrap();
        let live_obj = f.engine.resolve_object(&objects[0], &write).unwrap().unwrap();
        f.engine.delete_object(&live_obj).unwrap();
        f.engine.commit_write(f.realm).unwrap();

        assert!(f.engine.is_object_valid(&objects[0]));
        f.engine.release(&frozen);
        assert!(!f.engine.is_object_valid(&objects[0]));
    }

    #[test]
    fn replacing_embedded_child_deletes_previous() {
        let f = fixture(ChangeEncoding::Indices);
        let write = f.engine.begin_write(f.realm).unwrap();
        let parent = f
            .engine
            .create_object_with_primary_key(&write, f.parent, &StorageValue::Int(1))
            .unwrap();
        let child = prop(&f, f.parent, "child");
        for _ in 0..5 {
            f.engine.set_embedded(&parent, child).unwrap();
        }
        assert_eq!(f.engine.objects(&write, f.child).unwrap().len(), 1);

        f.engine
            .set_value(&parent, child, &StorageValue::Null)
            .unwrap();
        assert!(f.engine.objects(&write, f.child).unwrap().is_empty());
    }

    #[test]
    fn deleting_parent_cascades_and_invalidates_collections() {
        let f = fixture(ChangeEncoding::Indices);
        let write = f.engine.begin_write(f.realm).unwrap();
        let parent = f
            .engine
            .create_object_with_primary_key(&write, f.parent, &StorageValue::Int(1))
            .unwrap();
        let list = f
            .engine
            .collection(&parent, prop(&f, f.parent, "children"))
            .unwrap();
        f.engine.list_insert_embedded(&list, 0).unwrap();
        f.engine.list_insert_embedded(&list, 1).unwrap();
        assert_eq!(f.engine.objects(&write, f.child).unwrap().len(), 2);

        f.engine.delete_object(&parent).unwrap();
        assert!(f.engine.objects(&write, f.child).unwrap().is_empty());
        let err = f.engine.list_insert_embedded(&list, 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidatedObject);
    }

    #[test]
    fn cancel_restores_previous_state() {
        let f = fixture(ChangeEncoding::Indices);
        let write = f.engine.begin_write(f.realm).unwrap();
        f.engine
            .create_object_with_primary_key(&write, f.parent, &StorageValue::Int(1))
            .unwrap();
        let live = f.engine.cancel_write(f.realm).unwrap();
        assert!(f.engine.objects(&live, f.parent).unwrap().is_empty());
    }

    #[test]
    fn invalid_dictionary_keys_are_rejected() {
        let f = fixture(ChangeEncoding::Indices);
        let write = f.engine.begin_write(f.realm).unwrap();
        let parent = f
            .engine
            .create_object_with_primary_key(&write, f.parent, &StorageValue::Int(1))
            .unwrap();
        let scores = f
            .engine
            .collection(&parent, prop(&f, f.parent, "scores"))
            .unwrap();
        for key in ["", "$a", "a.b"] {
            let err = f
                .engine
                .dictionary_insert(&scores, key, &StorageValue::Int(1))
                .unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidDictionaryKey);
        }
    }

    fn capture() -> (Arc<Mutex<Vec<ChangeBatch>>>, ChangeCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ChangeCallback = Box::new(move |raw: RawChangeBatch| {
            sink.lock().unwrap().push(raw.decode().unwrap());
        });
        (seen, callback)
    }

    #[test]
    fn commit_delivers_list_changes_in_both_encodings() {
        for encoding in [ChangeEncoding::Indices, ChangeEncoding::Ranges] {
            let f = fixture(encoding);
            let write = f.engine.begin_write(f.realm).unwrap();
            let parent = f
                .engine
                .create_object_with_primary_key(&write, f.parent, &StorageValue::Int(1))
                .unwrap();
            let numbers = prop(&f, f.parent, "numbers");
            let list = f.engine.collection(&parent, numbers).unwrap();
            for i in 0..3 {
                f.engine.list_insert(&list, i, &StorageValue::Int(i as i64)).unwrap();
            }
            let live = f.engine.commit_write(f.realm).unwrap();

            let list = f.engine.resolve_collection(&list, &live).unwrap().unwrap();
            let (seen, callback) = capture();
            let id = f.engine.add_collection_listener(&list, callback).unwrap();

            let write = f.engine.begin_write(f.realm).unwrap();
            let list = f.engine.resolve_collection(&list, &write).unwrap().unwrap();
            f.engine.list_insert(&list, 3, &StorageValue::Int(9)).unwrap();
            f.engine.list_erase(&list, 0).unwrap();
            f.engine.commit_write(f.realm).unwrap();

            let batches = seen.lock().unwrap();
            assert_eq!(batches.len(), 1);
            let ChangeBatch::Collection(changes) = &batches[0] else {
                panic!("expected collection batch");
            };
            match (&changes.changes, encoding) {
                (IndexEncoding::Indices(c), ChangeEncoding::Indices) => {
                    assert_eq!(c.deletions, vec![0]);
                    assert_eq!(c.insertions, vec![2]);
                }
                (IndexEncoding::Ranges(c), ChangeEncoding::Ranges) => {
                    assert_eq!(c.deletions, vec![tessera_codec::IndexRange::new(0, 1)]);
                    assert_eq!(c.insertions, vec![tessera_codec::IndexRange::new(2, 3)]);
                }
                _ => panic!("engine used the wrong encoding"),
            }
            assert!(f.engine.remove_listener(id));
            assert!(!f.engine.remove_listener(id));
        }
    }

    #[test]
    fn object_listener_sees_modified_properties() {
        let f = fixture(ChangeEncoding::Indices);
        let write = f.engine.begin_write(f.realm).unwrap();
        f.engine
            .create_object_with_primary_key(&write, f.parent, &StorageValue::Int(1))
            .unwrap();
        let live = f.engine.commit_write(f.realm).unwrap();
        let obj = f.engine.objects(&live, f.parent).unwrap()[0];

        let (seen, callback) = capture();
        f.engine.add_object_listener(&obj, callback).unwrap();

        let write = f.engine.begin_write(f.realm).unwrap();
        let obj = f.engine.resolve_object(&obj, &write).unwrap().unwrap();
        let child = prop(&f, f.parent, "child");
        f.engine.set_embedded(&obj, child).unwrap();
        f.engine.commit_write(f.realm).unwrap();

        let batches = seen.lock().unwrap();
        assert_eq!(
            batches[0],
            ChangeBatch::Object(tessera_codec::ObjectChanges {
                deleted: false,
                modified_properties: vec![child],
            })
        );
    }

    #[test]
    fn deliver_hands_every_listener_its_own_batch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener = |tag: u64| -> Arc<ChangeCallback> {
            let seen = Arc::clone(&seen);
            let callback: ChangeCallback = Box::new(move |raw: RawChangeBatch| {
                seen.lock().unwrap().push((tag, raw.decode().unwrap()));
            });
            Arc::new(callback)
        };
        let batch = |key: u64| {
            ChangeBatch::Object(tessera_codec::ObjectChanges {
                deleted: false,
                modified_properties: vec![PropertyKey::new(key)],
            })
        };

        let delivered = deliver(vec![(listener(1), batch(7)), (listener(2), batch(8))]);
        assert_eq!(delivered, 2);
        assert_eq!(*seen.lock().unwrap(), vec![(1, batch(7)), (2, batch(8))]);
        assert_eq!(deliver(Vec::new()), 0);
    }

    #[test]
    fn closed_realm_rejects_everything() {
        let f = fixture(ChangeEncoding::Indices);
        let live = f.engine.live_generation(f.realm).unwrap();
        f.engine.close(f.realm);
        f.engine.close(f.realm);
        assert!(f.engine.is_closed(f.realm));
        assert!(!f.engine.is_generation_valid(&live));
        let err = f.engine.objects(&live, f.parent).unwrap_err();
        assert_eq!(err.code, ErrorCode::ClosedRealm);
    }

    #[test]
    fn schema_validation() {
        let engine = InMemoryEngine::new();
        let bad = vec![ClassDescriptor::new("A").property(PropertyDescriptor::object("b", "Missing"))];
        let err = engine.open(&bad).unwrap_err();
        assert_eq!(err.code, ErrorCode::SchemaValidationFailed);

        let bad = vec![ClassDescriptor::embedded("E")
            .property(PropertyDescriptor::new("id", PropertyType::Int).primary_key())];
        assert!(engine.open(&bad).is_err());
    }
}
