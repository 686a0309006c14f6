//! Handles into engine state.
//!
//! Handles are plain values. The engine validates them on every call:
//! a handle whose generation was advanced, released or closed, or whose
//! row no longer exists, is rejected with an error rather than trusted.

use std::fmt;
use tessera_codec::{ClassKey, CollectionKind, ObjKey, PropertyKey};

/// Identifies one opened realm inside an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RealmId(u64);

impl RealmId {
    /// Creates a realm id from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "realm:{}", self.0)
    }
}

/// A versioned view of one realm's data.
///
/// A live generation is mutable inside a write scope and stops being valid
/// once the realm advances to a newer version. A frozen generation is an
/// immutable snapshot that stays valid until released or the realm closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationPtr {
    /// Owning realm.
    pub realm: RealmId,
    /// Data version this generation observes.
    pub version: u64,
    /// Whether this is an immutable snapshot.
    pub frozen: bool,
}

impl fmt::Display for GenerationPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.frozen { "frozen" } else { "live" };
        write!(f, "{}@{}({kind})", self.realm, self.version)
    }
}

/// A handle to one object row in a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjPtr {
    /// Generation the handle was obtained in.
    pub generation: GenerationPtr,
    /// Class of the object.
    pub class: ClassKey,
    /// Row key.
    pub key: ObjKey,
}

/// One step from a collection into a nested collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathElement {
    /// Position in a list.
    Index(usize),
    /// Key in a dictionary.
    Key(String),
}

/// A handle to a list, set or dictionary owned by an object property.
///
/// `path` is empty for the property's own collection and walks into nested
/// collections stored in polymorphic slots otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPtr {
    /// Generation the handle was obtained in.
    pub generation: GenerationPtr,
    /// Class of the owning object.
    pub class: ClassKey,
    /// Key of the owning object.
    pub key: ObjKey,
    /// Property holding the collection.
    pub property: PropertyKey,
    /// Route into nested collections.
    pub path: Vec<PathElement>,
    /// Kind of the addressed collection.
    pub kind: CollectionKind,
}

impl CollectionPtr {
    /// Returns the handle of the owning object.
    #[must_use]
    pub fn owner(&self) -> ObjPtr {
        ObjPtr {
            generation: self.generation,
            class: self.class,
            key: self.key,
        }
    }

    /// Returns a handle to a collection nested under this one.
    #[must_use]
    pub fn child(&self, step: PathElement, kind: CollectionKind) -> Self {
        let mut path = self.path.clone();
        path.push(step);
        Self {
            generation: self.generation,
            class: self.class,
            key: self.key,
            property: self.property,
            path,
            kind,
        }
    }
}

/// Identifies a registered notification callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Creates a listener id from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generation() -> GenerationPtr {
        GenerationPtr {
            realm: RealmId::new(1),
            version: 4,
            frozen: false,
        }
    }

    #[test]
    fn generation_display() {
        assert_eq!(generation().to_string(), "realm:1@4(live)");
    }

    #[test]
    fn child_extends_path() {
        let list = CollectionPtr {
            generation: generation(),
            class: ClassKey::new(0),
            key: ObjKey::new(2),
            property: PropertyKey::new(3),
            path: Vec::new(),
            kind: CollectionKind::Dictionary,
        };
        let nested = list.child(PathElement::Key("a".into()), CollectionKind::List);
        assert_eq!(nested.path, vec![PathElement::Key("a".into())]);
        assert_eq!(nested.kind, CollectionKind::List);
        assert_eq!(nested.owner(), list.owner());
    }
}
