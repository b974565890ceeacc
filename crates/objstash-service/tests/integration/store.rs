use objstash_service::caching::CacheError;
use objstash_service::codec::{EncodeOptions, encode};
use objstash_service::types::Value;

use crate::{point, ring, setup_store};

#[test]
fn test_immutable_point() {
    let (store, registry) = setup_store(|_| {});

    store.store("c", &point(&registry, 1, 2)).unwrap();
    let stored = store.raw_bytes("c").unwrap().unwrap();

    let first = store.fetch("c").unwrap().unwrap();
    let second = store.fetch("c").unwrap().unwrap();
    for reference in [&first, &second] {
        assert_eq!(reference.get("x"), Some(Value::Int(1)));
        assert_eq!(reference.get("y"), Some(Value::Int(2)));
    }

    for reference in [&first, &second] {
        let err = reference.set("x", Value::Int(5)).unwrap_err();
        assert_eq!(
            err,
            CacheError::ImmutableWrite {
                field: "x".into(),
                type_name: "Point".into(),
            }
        );
        insta::allow_duplicates! {
            insta::assert_snapshot!(err, @"cannot modify field `x` of immutable type `Point`");
        }
    }

    // neither the other reference nor the stored bytes are affected
    assert_eq!(first.get("x"), Some(Value::Int(1)));
    assert_eq!(second.get("x"), Some(Value::Int(1)));
    assert_eq!(store.raw_bytes("c").unwrap().unwrap(), stored);
    assert_eq!(
        stored,
        encode(&point(&registry, 1, 2), &EncodeOptions::default()).unwrap()
    );
    insta::assert_snapshot!(format!("{:?}", first.value()), @"Point { x: 1, y: 2 }");
}

#[test]
fn test_generation_replacement() {
    let (store, registry) = setup_store(|_| {});

    assert_eq!(store.store("k", &point(&registry, 1, 1)).unwrap(), 1);
    let old = store.fetch("k").unwrap().unwrap();

    assert_eq!(store.store("k", &point(&registry, 2, 2)).unwrap(), 2);
    let new = store.fetch("k").unwrap().unwrap();

    assert!(!old.shares_handle(&new));
    assert_eq!(old.generation(), 1);
    assert_eq!(new.generation(), 2);
    assert_eq!(old.get("x"), Some(Value::Int(1)));
    assert_eq!(new.get("x"), Some(Value::Int(2)));

    // the new generation is materialized once, like the old one
    let again = store.fetch("k").unwrap().unwrap();
    assert!(again.shares_handle(&new));
    assert_eq!(store.info().unwrap().materializations, 2);
}

#[test]
fn test_absence() {
    let (store, registry) = setup_store(|_| {});

    assert!(store.fetch("never").unwrap().is_none());

    store.store("k", &point(&registry, 1, 2)).unwrap();
    let reference = store.fetch("k").unwrap().unwrap();
    assert!(store.remove("k").unwrap());
    assert!(!store.remove("k").unwrap());
    assert!(store.fetch("k").unwrap().is_none());
    assert_eq!(store.raw_bytes("k").unwrap(), None);

    // the handle lives on with the reference
    assert_eq!(reference.get("y"), Some(Value::Int(2)));
    assert_eq!(reference.key().as_str(), Some("k"));

    insta::assert_snapshot!(
        format!("{:?}", store.info().unwrap()),
        @"StoreInfo { entries: 0, hits: 1, misses: 2, stores: 1, materializations: 1, evictions: 0 }"
    );
}

#[test]
fn test_binary_keys() {
    let (store, _) = setup_store(|_| {});

    store.store(vec![0u8, 1, 2], &Value::Int(1)).unwrap();
    store.store(&b"\x00\x01"[..], &Value::Int(2)).unwrap();

    let reference = store.fetch(vec![0u8, 1, 2]).unwrap().unwrap();
    assert_eq!(reference.value(), &Value::Int(1));
    assert_eq!(reference.key().to_string(), r"\x00\x01\x02");
    assert_eq!(store.info().unwrap().entries, 2);
}

#[test]
fn test_round_trips() {
    let (store, registry) = setup_store(|_| {});

    let values = [
        Value::Null,
        Value::Bool(true),
        Value::Int(i64::MIN),
        Value::Float(f64::NAN),
        Value::string("héllo"),
        Value::Bytes(vec![0, 255].into()),
        Value::List(vec![point(&registry, 1, 2), Value::List(vec![])]),
        Value::map([("p", point(&registry, 3, 4)), ("n", Value::Null)]),
        ring(&registry, 3),
    ];

    for (i, value) in values.iter().enumerate() {
        let key = format!("value:{i}");
        store.store(key.as_str(), value).unwrap();
        let reference = store.fetch(key).unwrap().unwrap();
        assert_eq!(reference.value(), value);
    }
}

#[test]
fn test_cyclic_values() {
    let (store, registry) = setup_store(|config| config.back_references = false);

    let err = store.store("ring", &ring(&registry, 2)).unwrap_err();
    assert_eq!(
        err,
        CacheError::CyclicValue {
            type_name: "Node".into()
        }
    );
    assert!(!store.exists("ring").unwrap());

    // shared but acyclic objects are duplicated instead
    let shared = point(&registry, 1, 2);
    store
        .store("pair", &Value::List(vec![shared.clone(), shared]))
        .unwrap();
    let reference = store.fetch("pair").unwrap().unwrap();
    assert_eq!(reference.handle().objects(), 2);
}

#[test]
fn test_size_limit() {
    let (store, _) = setup_store(|config| config.max_value_size = Some(16));

    store.store("small", &Value::Int(1)).unwrap();
    let err = store
        .store("large", &Value::Bytes(vec![0; 64].into()))
        .unwrap_err();
    assert!(matches!(err, CacheError::ValueTooLarge { limit: 16, .. }));
    assert!(err.is_serialization_error());
}
