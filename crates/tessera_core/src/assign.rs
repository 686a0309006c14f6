//! Importing object graphs into a realm and detaching them out of it.

use crate::accessor;
use crate::converters::{outdated_object, to_storage_checked};
use crate::error::{CoreError, CoreResult};
use crate::object::Object;
use crate::realm::RealmShared;
use crate::schema::ClassMetadata;
use crate::types::UpdatePolicy;
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tessera_codec::{ClassKey, ObjKey};
use tessera_engine::GenerationPtr;
use tracing::{debug, trace};

/// Unmanaged objects already imported by one assignment call.
///
/// Maps each source object's identity to the managed object it became, so
/// diamond-shaped and cyclic graphs import every object exactly once.
/// Sources are kept alive while cached so identities cannot be reused.
#[derive(Debug, Default)]
pub struct ObjectCache {
    imported: HashMap<usize, (Object, Object)>,
}

impl ObjectCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The managed object `source` was imported as, if any.
    #[must_use]
    pub fn get(&self, source: &Object) -> Option<Object> {
        self.imported
            .get(&source.identity())
            .map(|(_, managed)| managed.clone())
    }

    fn insert(&mut self, source: &Object, managed: &Object) {
        self.imported
            .insert(source.identity(), (source.clone(), managed.clone()));
    }

    /// Number of imported objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.imported.len()
    }

    /// Returns true if nothing was imported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.imported.is_empty()
    }
}

/// Imports `source` into `generation`.
///
/// - a source already in `cache` returns its import
/// - a managed source of this generation is returned as it is
/// - an unmanaged source is created, cached, then has its properties
///   assigned with `policy`; nested imports use the same policy
pub(crate) fn copy_to_realm(
    realm: &Arc<RealmShared>,
    generation: GenerationPtr,
    source: &Object,
    policy: UpdatePolicy,
    cache: &mut ObjectCache,
) -> CoreResult<Object> {
    if let Some(imported) = cache.get(source) {
        return Ok(imported);
    }
    if let Some(managed) = source.as_managed() {
        if !source.is_valid() {
            return Err(CoreError::invalidated(
                "Cannot copy an invalid managed object to Realm.",
            ));
        }
        if Arc::ptr_eq(&managed.realm, realm) && managed.ptr.generation == generation {
            return Ok(source.clone());
        }
        return Err(outdated_object());
    }

    let class = Arc::clone(realm.schema().require(source.class_name())?);
    if class.embedded {
        return Err(CoreError::illegal_argument(
            "Cannot create embedded object without a parent",
        ));
    }
    let properties = source.unmanaged_properties().unwrap_or_default();
    let engine = &realm.engine;
    let ptr = match class.primary_key_property() {
        Some(primary_key) => {
            let value = bag_value(&properties, primary_key.name.as_str(), primary_key.public_name.as_deref())
                .ok_or_else(|| {
                    CoreError::illegal_argument(format!(
                        "Cannot create object of type '{}' without primary key property '{}'",
                        class.name, primary_key.name
                    ))
                })?;
            let key = to_storage_checked(&class, primary_key, value)?;
            match policy {
                UpdatePolicy::Error => {
                    engine.create_object_with_primary_key(&generation, class.key, &key)?
                }
                UpdatePolicy::All => {
                    engine.get_or_create_with_primary_key(&generation, class.key, &key)?
                }
            }
        }
        None => engine.create_object(&generation, class.key)?,
    };
    let target = realm.object(ptr)?;
    cache.insert(source, &target);
    debug!(class = %class.name, key = %ptr.key, ?policy, "imported object");

    assign_properties(&target, &class, &properties, policy, cache)?;
    Ok(target)
}

/// Assigns a property bag to a managed object.
///
/// Properties are looked up by name because a bag carries no shape of its
/// own. Computed properties and the primary key are skipped; properties
/// missing from the bag keep their current value.
pub(crate) fn assign_properties(
    target: &Object,
    class: &ClassMetadata,
    properties: &BTreeMap<String, Value>,
    policy: UpdatePolicy,
    cache: &mut ObjectCache,
) -> CoreResult<()> {
    for name in properties.keys() {
        class.require(name)?;
    }
    for property in &class.properties {
        if property.is_computed() || property.primary_key {
            continue;
        }
        let Some(value) = bag_value(properties, &property.name, property.public_name.as_deref())
        else {
            continue;
        };
        trace!(class = %class.name, property = %property.name, "assigning property");
        accessor::set(target, &property.name, value.clone(), policy, cache)?;
    }
    Ok(())
}

/// Fills a freshly created embedded child from `source`.
pub(crate) fn fill_embedded(
    child: &Object,
    source: &Object,
    policy: UpdatePolicy,
    cache: &mut ObjectCache,
) -> CoreResult<()> {
    let class = Arc::clone(&child.require_managed()?.class);
    if source.class_name() != class.name {
        return Err(CoreError::schema_mismatch(format!(
            "Cannot use an object of type '{}' as embedded object of type '{}'",
            source.class_name(),
            class.name
        )));
    }
    let properties = source.unmanaged_properties().unwrap_or_default();
    assign_properties(child, &class, &properties, policy, cache)
}

fn bag_value<'a>(
    properties: &'a BTreeMap<String, Value>,
    name: &str,
    public_name: Option<&str>,
) -> Option<&'a Value> {
    properties
        .get(name)
        .or_else(|| public_name.and_then(|alias| properties.get(alias)))
}

/// Snapshots a managed embedded object into an unmanaged one.
///
/// Embedded children are copied because the slot they are assigned to may
/// be the one currently holding them. Links to top-level objects and
/// everything unmanaged are kept as they are.
pub(crate) fn detach_embedded(object: &Object) -> CoreResult<Object> {
    let Some(managed) = object.as_managed() else {
        return Ok(object.clone());
    };
    if !managed.class.embedded {
        return Ok(object.clone());
    }
    let copy = Object::new(managed.class.name.clone());
    for property in &managed.class.properties {
        if property.is_computed() {
            continue;
        }
        let value = detach_embedded_value(accessor::get(object, &property.name)?)?;
        copy.set(&property.name, value)?;
    }
    Ok(copy)
}

fn detach_embedded_value(value: Value) -> CoreResult<Value> {
    Ok(match value {
        Value::Object(object) => Value::Object(detach_embedded(&object)?),
        Value::Collection(collection) => detach_embedded_value(collection.snapshot()?)?,
        Value::List(items) => Value::List(
            items
                .into_iter()
                .map(detach_embedded_value)
                .collect::<CoreResult<_>>()?,
        ),
        Value::Set(items) => Value::Set(
            items
                .into_iter()
                .map(detach_embedded_value)
                .collect::<CoreResult<_>>()?,
        ),
        Value::Dictionary(entries) => Value::Dictionary(
            entries
                .into_iter()
                .map(|(k, v)| Ok((k, detach_embedded_value(v)?)))
                .collect::<CoreResult<_>>()?,
        ),
        other => other,
    })
}

type DetachKey = (ClassKey, ObjKey, u64);

/// Deep-copies a managed object into an unmanaged graph.
///
/// Links are followed up to `depth` levels, capped by the realm's
/// [`crate::Config::max_copy_depth`]; beyond that they become stubs,
/// unmanaged objects carrying only their class name. A depth of 0 copies
/// the object's own scalars and collections of scalars only. Each managed
/// object is copied once per call, so cycles in the realm become cycles in
/// the copy.
///
/// # Errors
///
/// Fails for unmanaged or invalid objects.
pub fn copy_from_realm(object: &Object, depth: u32) -> CoreResult<Object> {
    let depth = object
        .as_managed()
        .map_or(depth, |managed| depth.min(managed.realm.config.max_copy_depth));
    let mut cache = HashMap::new();
    detach(object, depth, &mut cache)
}

fn detach(object: &Object, depth: u32, cache: &mut HashMap<DetachKey, Object>) -> CoreResult<Object> {
    let managed = object.as_managed().ok_or_else(|| {
        CoreError::illegal_argument("Only managed objects can be copied out of a realm")
    })?;
    if !object.is_valid() {
        return Err(CoreError::invalid_object());
    }
    let key = (managed.ptr.class, managed.ptr.key, managed.ptr.generation.version);
    if let Some(copy) = cache.get(&key) {
        return Ok(copy.clone());
    }
    let copy = Object::new(managed.class.name.clone());
    cache.insert(key, copy.clone());
    for property in &managed.class.properties {
        if property.is_computed() {
            continue;
        }
        let value = detach_value(accessor::get(object, &property.name)?, depth, cache)?;
        copy.set(&property.name, value)?;
    }
    trace!(class = %managed.class.name, depth, "copied object out of realm");
    Ok(copy)
}

fn detach_value(value: Value, depth: u32, cache: &mut HashMap<DetachKey, Object>) -> CoreResult<Value> {
    Ok(match value {
        Value::Object(object) if depth == 0 => Value::Object(Object::new(object.class_name())),
        Value::Object(object) if object.is_managed() => {
            Value::Object(detach(&object, depth - 1, cache)?)
        }
        Value::Collection(collection) => detach_value(collection.snapshot()?, depth, cache)?,
        Value::List(items) => Value::List(
            items
                .into_iter()
                .map(|v| detach_value(v, depth, cache))
                .collect::<CoreResult<_>>()?,
        ),
        Value::Set(items) => Value::Set(
            items
                .into_iter()
                .map(|v| detach_value(v, depth, cache))
                .collect::<CoreResult<_>>()?,
        ),
        Value::Dictionary(entries) => Value::Dictionary(
            entries
                .into_iter()
                .map(|(k, v)| Ok((k, detach_value(v, depth, cache)?)))
                .collect::<CoreResult<_>>()?,
        ),
        other => other,
    })
}
