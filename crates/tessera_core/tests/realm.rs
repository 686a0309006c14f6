//! Object graph import, detached copies and realm generations.

use tessera_core::{
    copy_from_realm, ChangeEncoding, Config, CoreError, Object, Realm, UpdatePolicy, Value,
};
use tessera_testkit::prelude::*;

fn create_sample(realm: &Realm, id: i64) {
    realm
        .write(|w| w.create_object_with_primary_key("Sample", id, UpdatePolicy::Error))
        .unwrap();
}

#[test]
fn self_referencing_graph_imports_once() {
    let realm = TestRealm::sample();
    let root = Object::new("Node").with("name", "root");
    root.set("children", Value::List(vec![Value::Object(root.clone())]))
        .unwrap();

    let imported = realm
        .write(|w| {
            let managed = w.copy_to_realm(&root, UpdatePolicy::Error)?;
            let children = managed.list("children")?.values()?;
            assert_eq!(children, vec![Value::Object(managed.clone())]);
            Ok(managed)
        })
        .unwrap();

    assert_eq!(imported.class_name(), "Node");
    let nodes = realm.objects("Node").unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].get("name").unwrap(), Value::from("root"));
}

#[test]
fn shared_objects_import_once() {
    let realm = TestRealm::sample();
    let shared = Object::new("Sample").with("id", 3);
    let root = Object::new("Sample")
        .with("id", 1)
        .with("objectField", &shared)
        .with(
            "objectListField",
            Value::List(vec![Value::Object(shared.clone()), Value::Object(shared.clone())]),
        );

    realm
        .write(|w| w.copy_to_realm(&root, UpdatePolicy::Error).map(drop))
        .unwrap();

    assert_eq!(realm.objects("Sample").unwrap().len(), 2);
    let root = realm.find("Sample", 1).unwrap().unwrap();
    let shared = realm.find("Sample", 3).unwrap().unwrap();
    assert_eq!(root.get("objectField").unwrap(), Value::Object(shared.clone()));
    assert_eq!(
        root.list("objectListField").unwrap().values().unwrap(),
        vec![Value::Object(shared.clone()), Value::Object(shared)]
    );
}

#[test]
fn update_policy_governs_existing_primary_keys() {
    let realm = TestRealm::sample();
    realm
        .write(|w| {
            let sample = w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error)?;
            sample.set("stringField", "old")
        })
        .unwrap();

    let update = Object::new("Sample").with("id", 1).with("stringField", "new");
    let err = realm
        .write(|w| w.copy_to_realm(&update, UpdatePolicy::Error))
        .unwrap_err();
    assert!(matches!(err, CoreError::ConstraintViolation { .. }), "{err:?}");

    realm
        .write(|w| w.copy_to_realm(&update, UpdatePolicy::All).map(drop))
        .unwrap();
    let sample = realm.find("Sample", 1).unwrap().unwrap();
    assert_eq!(sample.get("stringField").unwrap(), Value::from("new"));
    assert_eq!(realm.objects("Sample").unwrap().len(), 1);
}

#[test]
fn nested_imports_use_the_callers_policy() {
    let realm = TestRealm::sample();
    create_sample(&realm, 2);

    let nested = Object::new("Sample").with("id", 2).with("stringField", "nested");
    let root = Object::new("Sample").with("id", 1).with("objectField", &nested);

    let err = realm
        .write(|w| w.copy_to_realm(&root, UpdatePolicy::Error))
        .unwrap_err();
    assert!(matches!(err, CoreError::ConstraintViolation { .. }), "{err:?}");
    assert!(realm.find("Sample", 1).unwrap().is_none());

    realm
        .write(|w| w.copy_to_realm(&root, UpdatePolicy::All).map(drop))
        .unwrap();
    let updated = realm.find("Sample", 2).unwrap().unwrap();
    assert_eq!(updated.get("stringField").unwrap(), Value::from("nested"));
}

#[test]
fn embedded_objects_cannot_be_imported_alone() {
    let realm = TestRealm::sample();
    let err = realm
        .write(|w| w.copy_to_realm(&Object::new("EmbeddedChild"), UpdatePolicy::Error))
        .unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err:?}");
}

#[test]
fn imports_without_primary_key_are_rejected() {
    let realm = TestRealm::sample();
    let err = realm
        .write(|w| w.copy_to_realm(&Object::new("Sample"), UpdatePolicy::Error))
        .unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err:?}");
}

#[test]
fn detached_copies_respect_depth() {
    let realm = TestRealm::sample();
    realm
        .write(|w| {
            let a = w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error)?;
            let b = w.create_object_with_primary_key("Sample", 2, UpdatePolicy::Error)?;
            let c = w.create_object_with_primary_key("Sample", 3, UpdatePolicy::Error)?;
            a.set("objectField", &b)?;
            b.set("objectField", &c)?;
            a.list("intListField")?.add(5)?;
            a.set(
                "embeddedField",
                Object::new("EmbeddedChild").with("name", "inner").with("value", 1),
            )
        })
        .unwrap();
    let a = realm.find("Sample", 1).unwrap().unwrap();

    let shallow = copy_from_realm(&a, 0).unwrap();
    assert!(!shallow.is_managed());
    assert_eq!(shallow.get("id").unwrap(), Value::Int(1));
    assert_eq!(shallow.get("intListField").unwrap(), Value::List(vec![Value::Int(5)]));
    let stub = shallow.get("objectField").unwrap();
    let stub = stub.as_object().unwrap();
    assert_eq!(stub.class_name(), "Sample");
    assert_eq!(stub.get("id").unwrap(), Value::Null);

    let deep = copy_from_realm(&a, 1).unwrap();
    let b = deep.get("objectField").unwrap();
    let b = b.as_object().unwrap();
    assert_eq!(b.get("id").unwrap(), Value::Int(2));
    let c = b.get("objectField").unwrap();
    assert_eq!(c.as_object().unwrap().get("id").unwrap(), Value::Null);

    let embedded = deep.get("embeddedField").unwrap();
    let embedded = embedded.as_object().unwrap();
    assert!(!embedded.is_managed());
    assert_eq!(embedded.get("name").unwrap(), Value::from("inner"));

    let err = copy_from_realm(&Object::new("Sample"), 1).unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err:?}");
}

#[test]
fn configured_depth_caps_detached_copies() {
    let realm = TestRealm::open(
        sample_schema(),
        ChangeEncoding::Indices,
        Config::new().max_copy_depth(0),
    );
    realm
        .write(|w| {
            let a = w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error)?;
            let b = w.create_object_with_primary_key("Sample", 2, UpdatePolicy::Error)?;
            a.set("objectField", &b)
        })
        .unwrap();

    let a = realm.find("Sample", 1).unwrap().unwrap();
    let copy = copy_from_realm(&a, 5).unwrap();
    let stub = copy.get("objectField").unwrap();
    assert_eq!(stub.as_object().unwrap().get("id").unwrap(), Value::Null);
}

#[test]
fn detached_copies_keep_cycles() {
    let realm = TestRealm::sample();
    realm
        .write(|w| {
            let a = w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error)?;
            a.set("objectField", &a)
        })
        .unwrap();

    let a = realm.find("Sample", 1).unwrap().unwrap();
    let copy = copy_from_realm(&a, 8).unwrap();
    assert_eq!(copy.get("objectField").unwrap(), Value::Object(copy.clone()));
}

#[test]
fn handles_go_stale_after_a_write() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);
    let stale = realm.find("Sample", 1).unwrap().unwrap();
    assert!(stale.is_valid());

    realm
        .write(|w| {
            let latest = w.find_latest(&stale)?.unwrap();
            latest.set("intField", 2)
        })
        .unwrap();

    assert!(!stale.is_valid());
    let err = stale.get("intField").unwrap_err();
    assert!(matches!(err, CoreError::InvalidatedObject { .. }), "{err:?}");
}

#[test]
fn frozen_realms_pin_a_version() {
    let realm = TestRealm::sample();
    realm
        .write(|w| {
            let sample = w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error)?;
            sample.set("intField", 1)
        })
        .unwrap();

    let frozen = realm.freeze().unwrap();
    let pinned = frozen.find("Sample", 1).unwrap().unwrap();
    assert!(pinned.is_frozen());

    realm
        .write(|w| {
            w.find("Sample", 1)?.unwrap().set("intField", 2)?;
            w.create_object_with_primary_key("Sample", 2, UpdatePolicy::Error)
                .map(drop)
        })
        .unwrap();

    assert_eq!(pinned.get("intField").unwrap(), Value::Int(1));
    assert_eq!(frozen.objects("Sample").unwrap().len(), 1);
    assert_eq!(realm.objects("Sample").unwrap().len(), 2);

    let live = realm.find("Sample", 1).unwrap().unwrap();
    assert_eq!(
        frozen.resolve(&live).unwrap().unwrap().get("intField").unwrap(),
        Value::Int(1)
    );

    frozen.release();
    assert!(!pinned.is_valid());
}

#[test]
fn failed_writes_roll_back() {
    let realm = TestRealm::sample();
    let err = realm
        .write(|w| {
            w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error)?;
            Err::<(), _>(CoreError::illegal_argument("abort"))
        })
        .unwrap_err();
    assert_eq!(err, CoreError::illegal_argument("abort"));
    assert!(!realm.is_in_write());
    assert!(realm.find("Sample", 1).unwrap().is_none());
}

#[test]
fn nested_write_is_a_transaction_state_error() {
    let realm = TestRealm::sample();
    let err = realm
        .write(|_| realm.write(|_| Ok(())))
        .unwrap_err();
    assert!(matches!(err, CoreError::TransactionState { .. }), "{err:?}");
}

#[test]
fn closed_realm_invalidates_everything() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);
    let sample = realm.find("Sample", 1).unwrap().unwrap();

    realm.close();
    assert!(realm.is_closed());
    assert!(!sample.is_valid());
    let err = realm.objects("Sample").unwrap_err();
    assert!(matches!(err, CoreError::InvalidatedObject { .. }), "{err:?}");
}

#[test]
fn unknown_names_are_illegal_arguments() {
    let realm = TestRealm::sample();
    let err = realm.objects("Missing").unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err:?}");

    create_sample(&realm, 1);
    let sample = realm.find("Sample", 1).unwrap().unwrap();
    let err = sample.get("missingField").unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err:?}");
}
