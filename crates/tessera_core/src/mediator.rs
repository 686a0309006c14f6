//! Instantiation of object wrappers.

use crate::error::{CoreError, CoreResult};
use crate::object::{Object, RealmObject};
use crate::realm::RealmShared;
use crate::schema::SchemaMetadata;
use std::sync::Arc;
use tessera_engine::ObjPtr;

/// Creates object references for one opened realm.
///
/// Holds the schema loaded at open time, so class lookups by key never go
/// back to the engine.
#[derive(Debug)]
pub struct Mediator {
    schema: Arc<SchemaMetadata>,
}

impl Mediator {
    /// Creates a mediator over a loaded schema.
    #[must_use]
    pub fn new(schema: Arc<SchemaMetadata>) -> Self {
        Self { schema }
    }

    /// The schema of the realm.
    #[must_use]
    pub fn schema(&self) -> &Arc<SchemaMetadata> {
        &self.schema
    }

    /// Wraps an engine handle in a dynamic object reference.
    pub(crate) fn object(&self, realm: &Arc<RealmShared>, ptr: ObjPtr) -> CoreResult<Object> {
        let class = Arc::clone(self.schema.by_key(ptr.class)?);
        Ok(Object::managed(Arc::clone(realm), ptr, class))
    }

    /// Wraps an object in its typed wrapper after checking its class.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaMismatch`] if the object is of another class.
    pub fn typed<T: RealmObject>(object: Object) -> CoreResult<T> {
        if object.class_name() != T::CLASS_NAME {
            return Err(CoreError::schema_mismatch(format!(
                "Object of type '{}' cannot be read as '{}'",
                object.class_name(),
                T::CLASS_NAME
            )));
        }
        Ok(T::from_object(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dog(Object);

    impl RealmObject for Dog {
        const CLASS_NAME: &'static str = "Dog";

        fn from_object(object: Object) -> Self {
            Self(object)
        }

        fn as_object(&self) -> &Object {
            &self.0
        }
    }

    #[test]
    fn typed_checks_class_name() {
        let dog = Mediator::typed::<Dog>(Object::new("Dog")).unwrap();
        assert_eq!(dog.as_object().class_name(), "Dog");
        assert!(Mediator::typed::<Dog>(Object::new("Cat")).is_err());
    }
}
