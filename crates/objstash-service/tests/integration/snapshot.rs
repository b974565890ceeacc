use std::time::Duration;

use objstash_service::caching::snapshot;
use objstash_service::caching::{CacheError, ObjectStore};
use objstash_service::types::{AnyTypeResolver, Value};

use crate::{point, ring, setup_store};

#[test]
fn test_dump_and_load() {
    let dir = objstash_test::tempdir();
    let path = dir.path().join("dump.snapshot");

    let (store, registry) = setup_store(|_| {});
    store.store("b", &point(&registry, 1, 2)).unwrap();
    store.store("a", &ring(&registry, 2)).unwrap();
    store
        .store_with_ttl("ttl", &Value::Int(1), Some(Duration::from_secs(3600)))
        .unwrap();
    assert_eq!(store.dump_snapshot(&path).unwrap(), 3);

    let entries = snapshot::read(&path).unwrap();
    let keys: Vec<_> = entries.iter().filter_map(|e| e.key.as_str()).collect();
    assert_eq!(keys, ["a", "b", "ttl"]);
    let ttl = entries[2].ttl.unwrap();
    assert!(ttl > Duration::from_secs(3500) && ttl <= Duration::from_secs(3600));
    assert_eq!(Some(entries[1].bytes.clone()), store.raw_bytes("b").unwrap());

    let (other, _) = setup_store(|_| {});
    other.store("b", &Value::Null).unwrap();
    other.store("b", &Value::Null).unwrap();
    assert_eq!(other.load_snapshot(&path).unwrap(), 3);

    // loading overwrites live entries, and starts new ones at the first generation
    assert_eq!(other.generation("b").unwrap(), Some(3));
    assert_eq!(other.generation("a").unwrap(), Some(1));
    let b = other.fetch("b").unwrap().unwrap();
    assert_eq!(b.value(), &point(&registry, 1, 2));
    assert!(b.is_read_only());
    let a = other.fetch("a").unwrap().unwrap();
    assert_eq!(a.value(), &ring(&registry, 2));
}

#[test]
fn test_inspect_without_types() {
    let dir = objstash_test::tempdir();
    let path = dir.path().join("dump.snapshot");

    let (store, registry) = setup_store(|_| {});
    store.store("p", &point(&registry, 1, 2)).unwrap();
    store.dump_snapshot(&path).unwrap();

    // a store without the type system can look at the values, but not at their immutability
    let untyped = ObjectStore::new(Default::default(), std::sync::Arc::new(AnyTypeResolver));
    untyped.initialize().unwrap();
    untyped.load_snapshot(&path).unwrap();
    let p = untyped.fetch("p").unwrap().unwrap();
    assert!(!p.is_read_only());
    insta::assert_snapshot!(format!("{:?}", p.value()), @"Point { x: 1, y: 2 }");
}

#[test]
fn test_missing_snapshot() {
    let dir = objstash_test::tempdir();
    let path = dir.path().join("missing.snapshot");

    let (store, _) = setup_store(|config| config.snapshot.path = Some(path.clone()));
    assert_eq!(store.info().unwrap().entries, 0);
    assert_eq!(store.load_snapshot(&path), Err(CacheError::InternalError));
}
