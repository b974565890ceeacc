use std::sync::Barrier;
use std::thread;

use objstash_service::caching::CacheError;
use objstash_service::types::Value;

use crate::{point, ring, setup_store};

const THREADS: usize = 16;

#[test]
fn test_materialize_at_most_once() {
    let (store, registry) = setup_store(|_| {});
    store.store("c", &point(&registry, 1, 2)).unwrap();

    let barrier = Barrier::new(THREADS);
    let references: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    store.fetch("c").unwrap().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let info = store.info().unwrap();
    assert_eq!(info.materializations, 1);
    assert_eq!(info.hits, THREADS as u64);

    let first = &references[0];
    for reference in &references {
        assert!(reference.shares_handle(first));
        assert_eq!(reference.get("x"), Some(Value::Int(1)));
        assert!(matches!(
            reference.set("x", Value::Int(5)),
            Err(CacheError::ImmutableWrite { .. })
        ));
    }
}

#[test]
fn test_concurrent_cyclic_fetches() {
    let (store, registry) = setup_store(|_| {});
    store.store("ring", &ring(&registry, 4)).unwrap();

    let barrier = Barrier::new(THREADS);
    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                barrier.wait();
                let reference = store.fetch("ring").unwrap().unwrap();
                let mut node = reference.value().clone();
                for _ in 0..4 {
                    node = node.as_object().unwrap().get("next").unwrap();
                }
                assert!(node.as_object().unwrap().ptr_eq(reference.value().as_object().unwrap()));
            });
        }
    });

    assert_eq!(store.info().unwrap().materializations, 1);
}

#[test]
fn test_concurrent_writers() {
    let (store, registry) = setup_store(|_| {});
    const WRITES: i64 = 50;

    let barrier = Barrier::new(THREADS);
    thread::scope(|s| {
        for t in 0..THREADS {
            let (store, registry, barrier) = (&store, &registry, &barrier);
            s.spawn(move || {
                let own_key = format!("own:{t}");
                barrier.wait();
                let mut last_seen = 0;
                for i in 1..=WRITES {
                    let generation = store.store(own_key.as_str(), &point(registry, i, i)).unwrap();
                    assert_eq!(generation, i as u64);

                    store.store("shared", &point(registry, i, i)).unwrap();
                    let reference = store.fetch("shared").unwrap().unwrap();
                    // a reader never goes back in time, and never sees a torn value
                    assert!(reference.generation() > last_seen);
                    last_seen = reference.generation();
                    assert_eq!(reference.get("x"), reference.get("y"));
                }
            });
        }
    });

    assert_eq!(
        store.generation("shared").unwrap(),
        Some(THREADS as u64 * WRITES as u64)
    );
    for t in 0..THREADS {
        let reference = store.fetch(format!("own:{t}")).unwrap().unwrap();
        assert_eq!(reference.get("x"), Some(Value::Int(WRITES)));
    }
}
