use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use objstash_service::caching::ObjectStore;
use objstash_service::types::Value;

use crate::{point, setup_store};

/// Waits for the sweeper to evict `count` entries.
///
/// Expiration timers have a resolution of about a second, so this polls for a while.
async fn wait_for_evictions(store: &ObjectStore, count: u64) {
    for _ in 0..100 {
        if store.info().unwrap().evictions >= count {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(store.info().unwrap().evictions, count);
}

#[tokio::test]
async fn test_sweeper() {
    let (store, registry) = setup_store(|config| config.sweep_interval = None);

    store
        .store_with_ttl("short", &point(&registry, 1, 2), Some(Duration::from_millis(50)))
        .unwrap();
    store.store("forever", &Value::Int(1)).unwrap();
    let reference = store.fetch("short").unwrap().unwrap();

    let sweeper = store.spawn_sweeper(Duration::from_millis(10));
    wait_for_evictions(&store, 1).await;

    assert_eq!(store.info().unwrap().entries, 1);
    assert!(store.fetch("short").unwrap().is_none());
    // eviction does not invalidate references
    assert_eq!(reference.get("x"), Some(Value::Int(1)));

    // the sweeper stops once the store is gone
    drop(store);
    tokio::time::timeout(Duration::from_secs(5), sweeper)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_lazy_expiration() {
    let (store, _) = setup_store(|config| config.default_ttl = Some(Duration::from_millis(50)));

    assert_eq!(store.store("k", &Value::Int(1)).unwrap(), 1);
    assert!(store.exists("k").unwrap());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!store.exists("k").unwrap());
    assert!(store.fetch("k").unwrap().is_none());

    // an expired entry counts as absent, the next store starts a fresh entry
    assert_eq!(store.store("k", &Value::Int(2)).unwrap(), 1);
}

#[tokio::test]
async fn test_sweeper_survives_teardown() {
    let (store, _) = setup_store(|_| {});
    let sweeper = store.spawn_sweeper(Duration::from_millis(10));

    store.teardown().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!sweeper.is_finished());

    store.initialize().unwrap();
    store
        .store_with_ttl("k", &Value::Int(1), Some(Duration::from_millis(20)))
        .unwrap();
    wait_for_evictions(&store, 1).await;

    let weak = Arc::downgrade(&store);
    drop(store);
    tokio::time::timeout(Duration::from_secs(5), sweeper)
        .await
        .unwrap()
        .unwrap();
    assert!(weak.upgrade().is_none());
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test(flavor = "current_thread")]
async fn test_sweeper_runs_on_blocking_pool() {
    let (store, registry) = setup_store(|config| config.sweep_interval = None);

    // only captures what is logged on the runtime thread
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    store
        .store_with_ttl("short", &point(&registry, 1, 2), Some(Duration::from_millis(20)))
        .unwrap();
    let sweeper = store.spawn_sweeper(Duration::from_millis(10));
    wait_for_evictions(&store, 1).await;
    sweeper.abort();

    let logs = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("stored entry"));
    assert!(!logs.contains("swept expired entries"));
}
