//! Property access through managed objects.

use proptest::prelude::*;
use tessera_codec::PropertyType;
use tessera_core::{AnyType, AnyValue, CoreError, Object, Realm, UpdatePolicy, Value};
use tessera_testkit::prelude::*;

fn create_sample(realm: &Realm, id: i64) -> Object {
    realm
        .write(|w| w.create_object_with_primary_key("Sample", id, UpdatePolicy::Error))
        .unwrap();
    realm.find("Sample", id).unwrap().unwrap()
}

fn assert_schema_mismatch(err: CoreError, needles: &[&str]) {
    match err {
        CoreError::SchemaMismatch { message } => {
            for needle in needles {
                assert!(message.contains(needle), "{message:?} does not name {needle:?}");
            }
        }
        other => panic!("expected a schema mismatch, got {other:?}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn scalars_read_back_what_was_written(
        (name, value) in prop::sample::select(SAMPLE_SCALARS.to_vec())
            .prop_flat_map(|(name, property_type)| (Just(name), scalar_strategy(property_type)))
    ) {
        let realm = TestRealm::sample();
        let written = value.clone();
        realm
            .write(|w| {
                let sample = w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error)?;
                sample.set(name, written)
            })
            .unwrap();

        let sample = realm.find("Sample", 1).unwrap().unwrap();
        prop_assert_eq!(sample.get(name).unwrap(), value);
    }

    #[test]
    fn wide_ints_do_not_narrow(value in wide_int_strategy()) {
        let realm = TestRealm::sample();
        realm
            .write(|w| {
                let sample = w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error)?;
                sample.set("intField", value)
            })
            .unwrap();

        let sample = realm.find("Sample", 1).unwrap().unwrap();
        prop_assert_eq!(sample.get_as::<i64>("intField").unwrap(), value);
        let narrowed = sample.get_as::<i32>("intField");
        prop_assert!(
            matches!(narrowed, Err(CoreError::ValueOutOfRange { type_name: "i32", .. })),
            "narrowing {} gave {:?}",
            value,
            narrowed
        );
    }

    #[test]
    fn mixed_holds_any_scalar(value in any_scalar_strategy()) {
        let realm = TestRealm::sample();
        let written = value.clone();
        realm
            .write(|w| {
                let sample = w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error)?;
                sample.set("mixedField", written)
            })
            .unwrap();

        let sample = realm.find("Sample", 1).unwrap().unwrap();
        prop_assert_eq!(sample.get("mixedField").unwrap(), value);
    }
}

#[test]
fn wrong_scalar_type_names_property_and_value() {
    let realm = TestRealm::sample();
    let sample = create_sample(&realm, 1);

    let err = realm
        .write(|w| {
            let sample = w.find_latest(&sample)?.unwrap();
            sample.set("stringField", 42)
        })
        .unwrap_err();

    assert_schema_mismatch(err, &["Sample.stringField", "42"]);
}

#[test]
fn rejected_assignment_leaves_value_unchanged() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);
    realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            sample.set("stringField", "before")
        })
        .unwrap();

    realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            assert!(sample.set("stringField", 3.5).is_err());
            assert!(sample.set("intField", "seven").is_err());
            Ok(())
        })
        .unwrap();

    let sample = realm.find("Sample", 1).unwrap().unwrap();
    assert_eq!(sample.get("stringField").unwrap(), Value::from("before"));
    assert_eq!(sample.get("intField").unwrap(), Value::Int(0));
}

#[test]
fn typed_read_of_wrong_type_is_schema_mismatch() {
    let realm = TestRealm::sample();
    let sample = create_sample(&realm, 1);

    let err = sample.get_as::<String>("intField").unwrap_err();
    assert_schema_mismatch(err, &["Sample.intField"]);

    let err = sample.get_as::<Option<String>>("stringField").unwrap_err();
    assert_schema_mismatch(err, &["Sample.stringField"]);
    assert_eq!(
        sample.get_as::<Option<String>>("nullableStringField").unwrap(),
        None
    );
}

#[test]
fn null_is_only_accepted_by_nullable_properties() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            let err = sample.set("stringField", Value::Null).unwrap_err();
            assert!(matches!(err, CoreError::ConstraintViolation { .. }), "{err:?}");

            sample.set("nullableStringField", "set")?;
            sample.set("nullableStringField", Value::Null)?;
            sample.set("mixedField", Value::Null)
        })
        .unwrap();

    let sample = realm.find("Sample", 1).unwrap().unwrap();
    assert_eq!(sample.get("nullableStringField").unwrap(), Value::Null);
}

#[test]
fn writes_outside_a_transaction_are_rejected() {
    let realm = TestRealm::sample();
    let sample = create_sample(&realm, 1);

    let err = sample.set("intField", 5).unwrap_err();
    assert!(matches!(err, CoreError::TransactionState { .. }), "{err:?}");
}

#[test]
fn counter_increments_and_decrements_in_place() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    let value = realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            sample.set("intField", 10)?;
            assert_eq!(sample.increment("intField", 5)?, 15);
            assert_eq!(sample.decrement("intField", 20)?, -5);
            sample.increment("intField", 0)
        })
        .unwrap();
    assert_eq!(value, -5);

    let sample = realm.find("Sample", 1).unwrap().unwrap();
    assert_eq!(sample.get_as::<i64>("intField").unwrap(), -5);
}

#[test]
fn counter_overflow_leaves_value_unchanged() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            sample.set("intField", i64::MAX)?;
            let err = sample.increment("intField", 1).unwrap_err();
            assert!(
                matches!(err, CoreError::ValueOutOfRange { value: i64::MAX, .. }),
                "{err:?}"
            );
            sample.set("intField", i64::MIN)?;
            let err = sample.decrement("intField", 1).unwrap_err();
            assert!(matches!(err, CoreError::ValueOutOfRange { .. }), "{err:?}");
            let err = sample.decrement("intField", i64::MIN).unwrap_err();
            assert!(matches!(err, CoreError::ValueOutOfRange { .. }), "{err:?}");
            Ok(())
        })
        .unwrap();

    let sample = realm.find("Sample", 1).unwrap().unwrap();
    assert_eq!(sample.get_as::<i64>("intField").unwrap(), i64::MIN);
}

#[test]
fn counter_requires_a_required_int_property() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            let err = sample.increment("doubleField", 1).unwrap_err();
            assert_schema_mismatch(err, &["Sample.doubleField", "Int"]);
            let err = sample.increment("nullableIntField", 1).unwrap_err();
            assert_schema_mismatch(err, &["Sample.nullableIntField"]);
            let err = sample.increment("intListField", 1).unwrap_err();
            assert_schema_mismatch(err, &["Sample.intListField"]);
            let err = sample.increment("id", 1).unwrap_err();
            assert!(matches!(err, CoreError::ConstraintViolation { .. }), "{err:?}");
            Ok(())
        })
        .unwrap();

    let sample = realm.find("Sample", 1).unwrap().unwrap();
    let err = sample.increment("intField", 1).unwrap_err();
    assert!(matches!(err, CoreError::TransactionState { .. }), "{err:?}");
    let err = Object::new("Sample").increment("intField", 1).unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err:?}");
}

#[test]
fn primary_key_can_only_be_rewritten_with_its_value() {
    let realm = TestRealm::sample();
    create_sample(&realm, 7);

    realm
        .write(|w| {
            let sample = w.find("Sample", 7)?.unwrap();
            sample.set("id", 7)?;
            let err = sample.set("id", 8).unwrap_err();
            assert!(matches!(err, CoreError::ConstraintViolation { .. }), "{err:?}");
            Ok(())
        })
        .unwrap();

    let err = realm
        .write(|w| w.create_object_with_primary_key("Sample", 7, UpdatePolicy::Error))
        .unwrap_err();
    assert!(matches!(err, CoreError::ConstraintViolation { .. }), "{err:?}");

    let existing = realm
        .write(|w| {
            let object = w.create_object_with_primary_key("Sample", 7, UpdatePolicy::All)?;
            object.get_as::<i64>("id")
        })
        .unwrap();
    assert_eq!(existing, 7);
    assert_eq!(realm.objects("Sample").unwrap().len(), 1);
}

#[test]
fn objects_without_primary_key_need_plain_creation() {
    let realm = TestRealm::sample();

    let err = realm.write(|w| w.create_object("Sample")).unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err:?}");

    let err = realm.write(|w| w.create_object("EmbeddedChild")).unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err:?}");

    realm.write(|w| w.create_object("Node")).unwrap();
    assert_eq!(realm.objects("Node").unwrap().len(), 1);
}

#[test]
fn links_and_backlinks() {
    let realm = TestRealm::sample();
    realm
        .write(|w| {
            let a = w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error)?;
            let b = w.create_object_with_primary_key("Sample", 2, UpdatePolicy::Error)?;
            a.set("objectField", &b)
        })
        .unwrap();

    let a = realm.find("Sample", 1).unwrap().unwrap();
    let b = realm.find("Sample", 2).unwrap().unwrap();
    assert_eq!(a.get("objectField").unwrap(), Value::Object(b.clone()));
    assert_eq!(b.backlinks("linkedFrom").unwrap(), vec![a.clone()]);
    assert!(a.backlinks("linkedFrom").unwrap().is_empty());

    let err = realm
        .write(|w| {
            let b = w.find("Sample", 2)?.unwrap();
            b.set("linkedFrom", Value::List(Vec::new()))
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::ConstraintViolation { .. }), "{err:?}");

    let err = a.backlinks("objectField").unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err:?}");
}

#[test]
fn link_to_wrong_class_is_rejected() {
    let realm = TestRealm::sample();
    let err = realm
        .write(|w| {
            let sample = w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error)?;
            let node = w.create_object("Node")?;
            sample.set("objectField", node)
        })
        .unwrap_err();
    assert_schema_mismatch(err, &["Sample.objectField"]);
}

#[test]
fn embedded_replacement_keeps_one_child() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    for round in 0..5 {
        realm
            .write(|w| {
                let sample = w.find("Sample", 1)?.unwrap();
                sample.set(
                    "embeddedField",
                    Object::new("EmbeddedChild")
                        .with("name", format!("child {round}"))
                        .with("value", round),
                )
            })
            .unwrap();
    }

    assert_eq!(realm.objects("EmbeddedChild").unwrap().len(), 1);
    let sample = realm.find("Sample", 1).unwrap().unwrap();
    let child = sample.get("embeddedField").unwrap();
    let child = child.as_object().unwrap();
    assert_eq!(child.get("name").unwrap(), Value::from("child 4"));
    assert_eq!(child.get("value").unwrap(), Value::Int(4));

    realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            sample.set("embeddedField", Value::Null)
        })
        .unwrap();
    assert!(realm.objects("EmbeddedChild").unwrap().is_empty());
}

#[test]
fn any_values_report_their_type() {
    let value = AnyValue::new(12).unwrap();
    assert_eq!(value.any_type(), AnyType::Scalar(PropertyType::Int));
    assert_eq!(value.get::<i64>().unwrap(), 12);
    assert!(value.get::<String>().is_err());
    assert_eq!(AnyValue::default().any_type(), AnyType::Null);

    let err = AnyValue::new(Value::Set(vec![Value::Int(1)])).unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err:?}");

    let nested = Value::List(vec![Value::List(vec![Value::Int(1)])]);
    let err = AnyValue::new(nested).unwrap_err();
    assert!(matches!(err, CoreError::ConstraintViolation { .. }), "{err:?}");

    let list = AnyValue::new(Value::List(vec![Value::Int(1)])).unwrap();
    assert_eq!(list.any_type(), AnyType::List);
}

#[test]
fn mixed_property_holds_nested_collections() {
    let realm = TestRealm::sample();
    realm
        .write(|w| {
            let sample = w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error)?;
            sample.set(
                "mixedField",
                Value::List(vec![Value::Int(1), Value::from("two"), Value::Null]),
            )
        })
        .unwrap();

    let sample = realm.find("Sample", 1).unwrap().unwrap();
    let Value::Collection(collection) = sample.get("mixedField").unwrap() else {
        panic!("expected a live collection");
    };
    let list = collection.into_list().unwrap();
    assert_eq!(
        list.values().unwrap(),
        vec![Value::Int(1), Value::from("two"), Value::Null]
    );
}
