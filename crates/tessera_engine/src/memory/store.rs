//! Row storage for the in-memory engine.

use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::handle::{CollectionPtr, PathElement};
use crate::schema::{ClassInfo, PropertyDescriptor, PropertyInfo};
use std::collections::BTreeMap;
use tessera_codec::{
    ClassKey, CollectionKind, Decimal128, Link, ObjKey, ObjectId, PropertyKey, PropertyType,
    StorageValue, Timestamp,
};
use tessera_codec::StorageValue as V;

/// One property slot of a row, or one element of a polymorphic collection.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Value(StorageValue),
    List(Vec<Slot>),
    Set(Vec<StorageValue>),
    Dictionary(BTreeMap<String, Slot>),
}

impl Slot {
    pub(crate) fn empty(kind: CollectionKind) -> Self {
        match kind {
            CollectionKind::None => Slot::Value(StorageValue::Null),
            CollectionKind::List => Slot::List(Vec::new()),
            CollectionKind::Set => Slot::Set(Vec::new()),
            CollectionKind::Dictionary => Slot::Dictionary(BTreeMap::new()),
        }
    }

    /// Reads the slot as a value; nested collections read as markers.
    pub(crate) fn to_value(&self) -> StorageValue {
        match self {
            Slot::Value(value) => value.clone(),
            Slot::List(_) | Slot::Set(_) => StorageValue::List,
            Slot::Dictionary(_) => StorageValue::Dictionary,
        }
    }

    pub(crate) fn kind(&self) -> CollectionKind {
        match self {
            Slot::Value(_) => CollectionKind::None,
            Slot::List(_) => CollectionKind::List,
            Slot::Set(_) => CollectionKind::Set,
            Slot::Dictionary(_) => CollectionKind::Dictionary,
        }
    }

    /// Collects every link reachable from this slot.
    pub(crate) fn collect_links(&self, out: &mut Vec<Link>) {
        match self {
            Slot::Value(StorageValue::Link(link)) => out.push(*link),
            Slot::Value(_) => {}
            Slot::List(items) => items.iter().for_each(|item| item.collect_links(out)),
            Slot::Set(items) => out.extend(items.iter().filter_map(StorageValue::as_link)),
            Slot::Dictionary(entries) => entries.values().for_each(|v| v.collect_links(out)),
        }
    }

    pub(crate) fn references(&self, target: &Link) -> bool {
        let mut links = Vec::new();
        self.collect_links(&mut links);
        links.contains(target)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Row {
    pub(crate) slots: BTreeMap<PropertyKey, Slot>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub(crate) rows: BTreeMap<ObjKey, Row>,
}

/// All rows of one realm at one version.
#[derive(Debug, Clone, Default)]
pub(crate) struct Store {
    pub(crate) tables: BTreeMap<ClassKey, Table>,
    next_key: u64,
}

impl Store {
    pub(crate) fn row(&self, class: ClassKey, key: ObjKey) -> Option<&Row> {
        self.tables.get(&class).and_then(|t| t.rows.get(&key))
    }

    pub(crate) fn row_mut(&mut self, class: ClassKey, key: ObjKey) -> Option<&mut Row> {
        self.tables.get_mut(&class).and_then(|t| t.rows.get_mut(&key))
    }

    pub(crate) fn contains(&self, link: &Link) -> bool {
        self.row(link.class, link.key).is_some()
    }

    /// Inserts a row with default slots for every stored property.
    pub(crate) fn insert_row(&mut self, class: &ClassInfo) -> ObjKey {
        let key = ObjKey::new(self.next_key);
        self.next_key += 1;
        let slots = class
            .properties
            .iter()
            .filter_map(|p| default_slot(&p.descriptor).map(|slot| (p.key, slot)))
            .collect();
        self.tables
            .entry(class.key)
            .or_default()
            .rows
            .insert(key, Row { slots });
        key
    }

    pub(crate) fn remove_row(&mut self, link: &Link) -> Option<Row> {
        self.tables
            .get_mut(&link.class)
            .and_then(|t| t.rows.remove(&link.key))
    }

    /// Walks a collection handle down to its slot.
    pub(crate) fn collection_slot(&self, ptr: &CollectionPtr) -> EngineResult<&Slot> {
        let row = self
            .row(ptr.class, ptr.key)
            .ok_or_else(invalidated_collection)?;
        let mut slot = row.slots.get(&ptr.property).ok_or_else(invalidated_collection)?;
        for step in &ptr.path {
            slot = match (slot, step) {
                (Slot::List(items), PathElement::Index(i)) => items.get(*i),
                (Slot::Dictionary(entries), PathElement::Key(k)) => entries.get(k),
                _ => None,
            }
            .ok_or_else(invalidated_collection)?;
        }
        if slot.kind() != ptr.kind {
            return Err(invalidated_collection());
        }
        Ok(slot)
    }

    /// Mutable counterpart of [`Store::collection_slot`].
    pub(crate) fn collection_slot_mut(&mut self, ptr: &CollectionPtr) -> EngineResult<&mut Slot> {
        let row = self
            .row_mut(ptr.class, ptr.key)
            .ok_or_else(invalidated_collection)?;
        let mut slot = row
            .slots
            .get_mut(&ptr.property)
            .ok_or_else(invalidated_collection)?;
        for step in &ptr.path {
            slot = match (slot, step) {
                (Slot::List(items), PathElement::Index(i)) => items.get_mut(*i),
                (Slot::Dictionary(entries), PathElement::Key(k)) => entries.get_mut(k),
                _ => None,
            }
            .ok_or_else(invalidated_collection)?;
        }
        if slot.kind() != ptr.kind {
            return Err(invalidated_collection());
        }
        Ok(slot)
    }
}

pub(crate) fn invalidated_collection() -> EngineError {
    EngineError::invalidated("Access to invalidated Collection object")
}

pub(crate) fn invalidated_object() -> EngineError {
    EngineError::invalidated("Accessing object of type that has been deleted or invalidated")
}

pub(crate) fn index_out_of_bounds(index: usize, len: usize) -> EngineError {
    EngineError::new(
        ErrorCode::IndexOutOfBounds,
        format!("Requested index {index} is out of bounds (size {len})"),
    )
}

/// The initial slot for a property, `None` for computed properties.
pub(crate) fn default_slot(descriptor: &PropertyDescriptor) -> Option<Slot> {
    if descriptor.is_computed() {
        return None;
    }
    if descriptor.collection.is_collection() {
        return Some(Slot::empty(descriptor.collection));
    }
    if descriptor.nullable || descriptor.property_type.is_link() {
        return Some(Slot::Value(V::Null));
    }
    let value = match descriptor.property_type {
        PropertyType::Int => V::Int(0),
        PropertyType::Bool => V::Bool(false),
        PropertyType::String => V::String(String::new()),
        PropertyType::Binary => V::Binary(Default::default()),
        PropertyType::Float => V::Float(0.0),
        PropertyType::Double => V::Double(0.0),
        PropertyType::Timestamp => V::Timestamp(Timestamp::new(0, 0)),
        PropertyType::ObjectId => V::ObjectId(ObjectId::from_bytes([0; 12])),
        PropertyType::Uuid => V::Uuid(Default::default()),
        PropertyType::Decimal128 => V::Decimal128(Decimal128::from_i64(0)),
        PropertyType::Object | PropertyType::LinkingObjects | PropertyType::Mixed => V::Null,
    };
    Some(Slot::Value(value))
}

/// The registered schema of one realm.
#[derive(Debug, Clone, Default)]
pub(crate) struct Schema {
    pub(crate) classes: Vec<ClassInfo>,
}

impl Schema {
    pub(crate) fn class(&self, key: ClassKey) -> EngineResult<&ClassInfo> {
        self.classes
            .iter()
            .find(|c| c.key == key)
            .ok_or_else(|| EngineError::new(ErrorCode::NoSuchTable, format!("No such class {key}")))
    }

    pub(crate) fn class_by_name(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub(crate) fn property(&self, class: ClassKey, key: PropertyKey) -> EngineResult<&PropertyInfo> {
        let info = self.class(class)?;
        info.property_by_key(key).ok_or_else(|| {
            EngineError::new(
                ErrorCode::InvalidProperty,
                format!("No property {key} on class '{}'", info.name),
            )
        })
    }

    pub(crate) fn is_embedded(&self, class: ClassKey) -> bool {
        self.class(class).map(|c| c.embedded).unwrap_or(false)
    }

    /// Class key of a link property's target.
    pub(crate) fn link_target(&self, property: &PropertyInfo) -> EngineResult<&ClassInfo> {
        property
            .descriptor
            .link_target
            .as_deref()
            .and_then(|name| self.class_by_name(name))
            .ok_or_else(|| {
                EngineError::new(
                    ErrorCode::InvalidProperty,
                    format!("Property '{}' has no link target", property.descriptor.name),
                )
            })
    }

    /// Validates a value before it is written into `property`.
    ///
    /// `element` is true when the value goes into a collection slot.
    pub(crate) fn check_value(
        &self,
        store: &Store,
        property: &PropertyInfo,
        value: &StorageValue,
        element: bool,
    ) -> EngineResult<()> {
        let descriptor = &property.descriptor;
        match value {
            V::List | V::Dictionary => Err(EngineError::illegal(
                "Nested collections must be created through the collection API",
            )),
            V::Null => {
                let link_slot = descriptor.property_type == PropertyType::Object
                    && (!element || descriptor.collection == CollectionKind::Dictionary);
                if descriptor.nullable
                    || link_slot
                    || descriptor.property_type == PropertyType::Mixed
                {
                    Ok(())
                } else {
                    Err(EngineError::new(
                        ErrorCode::PropertyNotNullable,
                        format!("Property '{}' cannot be null", descriptor.name),
                    ))
                }
            }
            V::Link(link) if descriptor.property_type == PropertyType::Mixed => {
                if !store.contains(link) {
                    return Err(no_such_object(link));
                }
                if self.is_embedded(link.class) {
                    return Err(EngineError::illegal(
                        "Embedded objects cannot be stored in a mixed value",
                    ));
                }
                Ok(())
            }
            V::Link(link) if descriptor.property_type == PropertyType::Object => {
                let target = self.link_target(property)?;
                if target.key != link.class {
                    return Err(EngineError::new(
                        ErrorCode::ObjectTypeMismatch,
                        format!(
                            "Property '{}' links to '{}', not {}",
                            descriptor.name, target.name, link.class
                        ),
                    ));
                }
                if !store.contains(link) {
                    return Err(no_such_object(link));
                }
                if target.embedded {
                    return Err(EngineError::illegal(
                        "Cannot link directly to an embedded object",
                    ));
                }
                Ok(())
            }
            _ if descriptor.property_type == PropertyType::Mixed => Ok(()),
            other => {
                if other.property_type() == Some(descriptor.property_type) {
                    Ok(())
                } else {
                    Err(EngineError::new(
                        ErrorCode::PropertyTypeMismatch,
                        format!(
                            "Property '{}' of type '{}' cannot hold '{other}'",
                            descriptor.name, descriptor.property_type
                        ),
                    ))
                }
            }
        }
    }
}

fn no_such_object(link: &Link) -> EngineError {
    EngineError::new(ErrorCode::NoSuchObject, format!("No object {link}"))
}
