//! List, set and dictionary operators over managed objects.

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tessera_core::{CoreError, ManagedCollection, Object, ObjectCache, Realm, UpdatePolicy, Value};
use tessera_testkit::prelude::*;

fn create_sample(realm: &Realm, id: i64) -> Object {
    realm
        .write(|w| w.create_object_with_primary_key("Sample", id, UpdatePolicy::Error))
        .unwrap();
    realm.find("Sample", id).unwrap().unwrap()
}

fn child(name: &str, value: i64) -> Object {
    Object::new("EmbeddedChild")
        .with("name", name)
        .with("value", value)
}

fn strings(values: &[String]) -> Vec<Value> {
    values.iter().map(|s| Value::from(s.as_str())).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn insert_all_keeps_order(values in prop::collection::vec(any::<i64>(), 0..16)) {
        let realm = TestRealm::sample();
        create_sample(&realm, 1);
        let inserted: Vec<Value> = values.iter().copied().map(Value::Int).collect();
        let expected = inserted.clone();
        realm
            .write(|w| {
                let list = w.find("Sample", 1)?.unwrap().list("intListField")?;
                list.insert_all(0, inserted, UpdatePolicy::Error, &mut ObjectCache::new())
            })
            .unwrap();

        let list = realm.find("Sample", 1).unwrap().unwrap().list("intListField").unwrap();
        prop_assert_eq!(list.values().unwrap(), expected);
    }

    #[test]
    fn sets_keep_distinct_elements(values in strings_with_duplicates_strategy(24)) {
        let realm = TestRealm::sample();
        create_sample(&realm, 1);
        let added = strings(&values);
        realm
            .write(|w| {
                let set = w.find("Sample", 1)?.unwrap().realm_set("stringSetField")?;
                set.add_all(added, UpdatePolicy::Error, &mut ObjectCache::new())
            })
            .unwrap();

        let set = realm.find("Sample", 1).unwrap().unwrap().realm_set("stringSetField").unwrap();
        let stored: BTreeSet<String> = set
            .values()
            .unwrap()
            .into_iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        let expected: BTreeSet<String> = values.into_iter().collect();
        prop_assert_eq!(set.len().unwrap(), expected.len());
        prop_assert_eq!(stored, expected);
    }

    #[test]
    fn dictionary_keys_are_the_last_writes(entries in dictionary_entries_strategy(24)) {
        let realm = TestRealm::sample();
        create_sample(&realm, 1);
        let put: Vec<(String, Value)> = entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::Int(*v)))
            .collect();
        realm
            .write(|w| {
                let dictionary = w.find("Sample", 1)?.unwrap().dictionary("intDictionaryField")?;
                dictionary.put_all(put, UpdatePolicy::Error, &mut ObjectCache::new())
            })
            .unwrap();

        let expected: BTreeMap<String, Value> = entries
            .into_iter()
            .map(|(k, v)| (k, Value::Int(v)))
            .collect();
        let dictionary = realm
            .find("Sample", 1)
            .unwrap()
            .unwrap()
            .dictionary("intDictionaryField")
            .unwrap();
        let stored: BTreeMap<String, Value> = dictionary.entries().unwrap().into_iter().collect();
        prop_assert_eq!(stored, expected);
    }

    #[test]
    fn list_operations_match_a_vec(ops in list_ops_strategy(24)) {
        let realm = TestRealm::sample();
        create_sample(&realm, 1);
        let mut model: Vec<i64> = Vec::new();
        realm
            .write(|w| {
                let list = w.find("Sample", 1)?.unwrap().list("intListField")?;
                for op in &ops {
                    match *op {
                        ListOp::Insert(index, value) => {
                            let index = index % (model.len() + 1);
                            list.insert(index, value)?;
                            model.insert(index, value);
                        }
                        ListOp::Remove(index) if !model.is_empty() => {
                            let index = index % model.len();
                            let removed = list.remove_at(index)?;
                            assert_eq!(removed, Value::Int(model.remove(index)));
                        }
                        ListOp::Move(from, to) if !model.is_empty() => {
                            let (from, to) = (from % model.len(), to % model.len());
                            list.move_to(from, to)?;
                            let value = model.remove(from);
                            model.insert(to, value);
                        }
                        ListOp::Set(index, value) if !model.is_empty() => {
                            let index = index % model.len();
                            let previous = list.set(index, value)?;
                            assert_eq!(previous, Value::Int(model[index]));
                            model[index] = value;
                        }
                        _ => {}
                    }
                }
                Ok(())
            })
            .unwrap();

        let list = realm.find("Sample", 1).unwrap().unwrap().list("intListField").unwrap();
        let expected: Vec<Value> = model.into_iter().map(Value::Int).collect();
        prop_assert_eq!(list.values().unwrap(), expected);
    }
}

#[test]
fn mismatched_batch_writes_nothing() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            let list = sample.list("intListField")?;
            list.add(1)?;
            let batch = vec![Value::Int(2), Value::from("three"), Value::Int(4)];
            let err = list
                .insert_all(1, batch, UpdatePolicy::Error, &mut ObjectCache::new())
                .unwrap_err();
            assert!(matches!(err, CoreError::SchemaMismatch { .. }), "{err:?}");
            assert_eq!(list.values()?, vec![Value::Int(1)]);

            let set = sample.realm_set("stringSetField")?;
            let err = set
                .add_all(
                    vec![Value::from("a"), Value::Int(1)],
                    UpdatePolicy::Error,
                    &mut ObjectCache::new(),
                )
                .unwrap_err();
            assert!(matches!(err, CoreError::SchemaMismatch { .. }), "{err:?}");
            assert!(set.is_empty()?);

            let dictionary = sample.dictionary("intDictionaryField")?;
            let err = dictionary
                .put_all(
                    vec![("a".into(), Value::Int(1)), ("b".into(), Value::Bool(true))],
                    UpdatePolicy::Error,
                    &mut ObjectCache::new(),
                )
                .unwrap_err();
            assert!(matches!(err, CoreError::SchemaMismatch { .. }), "{err:?}");
            assert!(dictionary.is_empty()?);

            let err = sample
                .set(
                    "stringListField",
                    Value::List(vec![Value::from("x"), Value::Null]),
                )
                .unwrap_err();
            assert!(matches!(err, CoreError::ConstraintViolation { .. }), "{err:?}");
            assert!(sample.list("stringListField")?.is_empty()?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn list_index_rules() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let list = w.find("Sample", 1)?.unwrap().list("stringListField")?;
            list.add("a")?;
            list.insert(0, "b")?;
            list.insert(2, "c")?;
            assert_eq!(list.values()?, vec!["b".into(), "a".into(), "c".into()]);

            let err = list.insert(5, "z").unwrap_err();
            assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err:?}");
            assert!(list.get(3).is_err());

            assert_eq!(list.index_of(&Value::from("a"))?, Some(1));
            assert_eq!(list.index_of(&Value::Int(3))?, None);
            assert!(list.remove(&Value::from("b"))?);
            assert!(!list.remove(&Value::from("b"))?);
            assert_eq!(list.len()?, 2);
            Ok(())
        })
        .unwrap();
}

#[test]
fn nullable_list_accepts_null() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            sample.list("nullableIntListField")?.add(Value::Null)?;
            let err = sample.list("intListField")?.add(Value::Null).unwrap_err();
            assert!(matches!(err, CoreError::ConstraintViolation { .. }), "{err:?}");
            Ok(())
        })
        .unwrap();

    let sample = realm.find("Sample", 1).unwrap().unwrap();
    assert_eq!(
        sample.list("nullableIntListField").unwrap().values().unwrap(),
        vec![Value::Null]
    );
}

#[test]
fn opening_with_the_wrong_kind_is_schema_mismatch() {
    let realm = TestRealm::sample();
    let sample = create_sample(&realm, 1);

    let err = sample.list("stringSetField").unwrap_err();
    assert!(matches!(err, CoreError::SchemaMismatch { .. }), "{err:?}");
    let err = sample.dictionary("intListField").unwrap_err();
    assert!(matches!(err, CoreError::SchemaMismatch { .. }), "{err:?}");
    let err = sample.realm_set("intField").unwrap_err();
    assert!(matches!(err, CoreError::SchemaMismatch { .. }), "{err:?}");

    let err = Object::new("Sample").list("intListField").unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err:?}");
}

#[test]
fn set_of_embedded_objects_is_a_configuration_error() {
    let realm = TestRealm::sample();
    realm
        .write(|w| w.create_object_with_primary_key("Holder", 1, UpdatePolicy::Error))
        .unwrap();

    let holder = realm.find("Holder", 1).unwrap().unwrap();
    let err = holder.realm_set("embeddedSet").unwrap_err();
    assert!(matches!(err, CoreError::Configuration { .. }), "{err:?}");
}

#[test]
fn object_collections_import_unmanaged_objects() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            let list = sample.list("objectListField")?;
            list.add(Object::new("Sample").with("id", 2))?;
            list.add(sample.clone())?;

            let set = sample.realm_set("objectSetField")?;
            assert!(set.add(sample.clone())?);
            assert!(!set.add(sample.clone())?);

            let err = set.add(Object::new("Node")).unwrap_err();
            assert!(matches!(err, CoreError::SchemaMismatch { .. }), "{err:?}");
            Ok(())
        })
        .unwrap();

    assert_eq!(realm.objects("Sample").unwrap().len(), 2);
    let sample = realm.find("Sample", 1).unwrap().unwrap();
    let linked = sample.list("objectListField").unwrap().values().unwrap();
    assert_eq!(linked[0].as_object().unwrap().get("id").unwrap(), Value::Int(2));
    assert_eq!(linked[1], Value::Object(sample.clone()));
    assert!(sample
        .realm_set("objectSetField")
        .unwrap()
        .contains(&Value::Object(sample.clone()))
        .unwrap());
}

#[test]
fn embedded_list_elements_are_owned() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let list = w.find("Sample", 1)?.unwrap().list("embeddedListField")?;
            list.add(child("a", 1))?;
            list.add(child("b", 2))?;
            let replacement = list.set(0, child("c", 3))?;
            assert_eq!(replacement.as_object().unwrap().get("name")?, Value::from("c"));

            let removed = list.remove_at(1)?;
            let removed = removed.as_object().unwrap();
            assert!(!removed.is_managed());
            assert_eq!(removed.get("name")?, Value::from("b"));
            Ok(())
        })
        .unwrap();

    assert_eq!(realm.objects("EmbeddedChild").unwrap().len(), 1);
}

#[test]
fn replacing_a_list_with_its_own_contents_keeps_them() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            let list = sample.list("embeddedListField")?;
            list.add(child("a", 1))?;
            list.add(child("b", 2))?;

            let snapshot = Value::List(list.values()?);
            sample.set("embeddedListField", snapshot)?;

            let names: Vec<Value> = list
                .values()?
                .iter()
                .map(|v| v.as_object().unwrap().get("name"))
                .collect::<Result<_, _>>()?;
            assert_eq!(names, vec![Value::from("a"), Value::from("b")]);
            Ok(())
        })
        .unwrap();

    assert_eq!(realm.objects("EmbeddedChild").unwrap().len(), 2);
}

#[test]
fn dictionary_operations() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let dictionary = w.find("Sample", 1)?.unwrap().dictionary("intDictionaryField")?;
            assert_eq!(dictionary.insert("a", 1)?, (None, true));
            assert_eq!(dictionary.insert("a", 2)?, (Some(Value::Int(1)), false));
            assert_eq!(dictionary.put("b", 3)?, None);

            assert!(dictionary.contains_key("a")?);
            assert!(dictionary.contains_value(&Value::Int(3))?);
            assert!(!dictionary.contains_value(&Value::Int(1))?);
            assert_eq!(dictionary.get("missing")?, None);

            assert_eq!(dictionary.erase("b")?, Some(Value::Int(3)));
            assert_eq!(dictionary.erase("b")?, None);
            assert_eq!(dictionary.keys()?, vec!["a".to_string()]);
            Ok(())
        })
        .unwrap();
}

#[test]
fn embedded_dictionary_values_are_detached_when_replaced() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let dictionary = w
                .find("Sample", 1)?
                .unwrap()
                .dictionary("embeddedDictionaryField")?;
            dictionary.insert("x", child("first", 1))?;
            let (previous, inserted) = dictionary.insert("x", child("second", 2))?;
            assert!(!inserted);
            let previous = previous.unwrap();
            let previous = previous.as_object().unwrap();
            assert!(!previous.is_managed());
            assert_eq!(previous.get("name")?, Value::from("first"));
            Ok(())
        })
        .unwrap();

    assert_eq!(realm.objects("EmbeddedChild").unwrap().len(), 1);
}

#[test]
fn mixed_collections_nest_one_level() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            let list = sample.list("mixedListField")?;
            list.add(Value::List(vec![Value::Int(1), Value::Int(2)]))?;
            list.add("plain")?;

            let Value::Collection(nested) = list.get(0)? else {
                panic!("expected a nested collection");
            };
            let nested = nested.into_list()?;
            nested.add(3)?;
            assert_eq!(nested.len()?, 3);

            let err = nested.add(Value::List(vec![Value::Int(4)])).unwrap_err();
            assert!(matches!(err, CoreError::ConstraintViolation { .. }), "{err:?}");

            let set = sample.realm_set("mixedSetField")?;
            let err = set.add(Value::List(Vec::new())).unwrap_err();
            assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err:?}");

            let dictionary = sample.dictionary("mixedDictionaryField")?;
            let mut inner = BTreeMap::new();
            inner.insert("k".to_string(), Value::from("v"));
            dictionary.insert("d", Value::Dictionary(inner))?;
            Ok(())
        })
        .unwrap();

    let sample = realm.find("Sample", 1).unwrap().unwrap();
    let Value::Collection(nested) = sample.dictionary("mixedDictionaryField").unwrap().get("d").unwrap().unwrap() else {
        panic!("expected a nested dictionary");
    };
    let nested = nested.into_dictionary().unwrap();
    assert_eq!(nested.get("k").unwrap(), Some(Value::from("v")));
}

#[test]
fn assigning_a_collection_to_itself_is_a_no_op() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            let list = sample.list("intListField")?;
            list.add(1)?;
            list.add(2)?;
            sample.set("intListField", sample.get("intListField")?)?;
            assert_eq!(list.values()?, vec![Value::Int(1), Value::Int(2)]);

            let Value::Collection(ManagedCollection::List(same)) = sample.get("intListField")? else {
                panic!("expected a live list");
            };
            assert_eq!(same, list);
            Ok(())
        })
        .unwrap();
}

#[test]
fn deleted_parent_invalidates_collections() {
    let realm = TestRealm::sample();
    create_sample(&realm, 1);

    realm
        .write(|w| {
            let sample = w.find("Sample", 1)?.unwrap();
            let list = sample.list("intListField")?;
            let set = sample.realm_set("stringSetField")?;
            let dictionary = sample.dictionary("intDictionaryField")?;
            list.add(1)?;
            w.delete(&sample)?;

            assert!(!list.is_valid());
            assert!(!set.is_valid());
            assert!(!dictionary.is_valid());

            let invalidated = |result: Result<_, CoreError>| {
                matches!(result, Err(CoreError::InvalidatedObject { .. }))
            };
            assert!(invalidated(list.add(2).map(|_| ())));
            assert!(invalidated(list.add("wrong type").map(|_| ())));
            assert!(invalidated(list.clear()));
            assert!(invalidated(list.move_to(0, 0)));
            assert!(invalidated(set.add("a").map(|_| ())));
            assert!(invalidated(set.remove(&Value::from("a")).map(|_| ())));
            assert!(invalidated(dictionary.insert("a", 1).map(|_| ())));
            assert!(invalidated(dictionary.erase("a").map(|_| ())));
            Ok(())
        })
        .unwrap();
}
