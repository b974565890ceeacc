use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use bytes::Bytes;
use moka::Entry;
use moka::notification::RemovalCause;
use moka::ops::compute::{CompResult, Op};
use once_cell::sync::OnceCell;

use super::CacheKey;
use super::materializer::MaterializedHandle;
use super::store::StoreCounters;

/// One generation of an entry: the encoded bytes installed by a single `store`.
///
/// The bytes never change once installed. The handle is filled in by the first fetch of this
/// generation.
pub(crate) struct Generation {
    pub number: u64,
    pub bytes: Bytes,
    pub handle: OnceCell<Arc<MaterializedHandle>>,
}

impl Generation {
    fn new(number: u64, bytes: Bytes) -> Self {
        Self {
            number,
            bytes,
            handle: OnceCell::new(),
        }
    }
}

/// The value of the in-memory moka cache.
///
/// Changing the expiration of an entry re-inserts the same [`Generation`] with a new deadline.
#[derive(Clone)]
pub(crate) struct Slot {
    pub generation: Arc<Generation>,
    /// When to evict this slot, if ever.
    pub deadline: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }

    /// The time left until the deadline, as of `now`.
    pub fn remaining_ttl(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(now))
    }
}

/// A struct implementing [`moka::Expiry`] that uses the [`Slot`] deadline as the explicit
/// expiration time.
struct SlotExpiration;

/// Returns the duration between the `current_time` and the `deadline`, saturating at zero
/// for deadlines that have already passed.
fn saturating_duration_since(current_time: Instant, deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|deadline| {
        deadline
            .checked_duration_since(current_time)
            .unwrap_or_default()
    })
}

impl moka::Expiry<CacheKey, Slot> for SlotExpiration {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &Slot,
        current_time: Instant,
    ) -> Option<Duration> {
        saturating_duration_since(current_time, value.deadline)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &Slot,
        current_time: Instant,
        _current_duration: Option<Duration>,
    ) -> Option<Duration> {
        saturating_duration_since(current_time, value.deadline)
    }
}

type SlotCache = moka::sync::Cache<CacheKey, Slot>;

/// Treats a slot that has expired, but was not evicted yet, as absent.
fn live(entry: Option<Entry<CacheKey, Slot>>) -> Option<Entry<CacheKey, Slot>> {
    let now = Instant::now();
    entry.filter(|entry| !entry.value().is_expired(now))
}

/// The key to slot mapping of an [`ObjectStore`](super::ObjectStore).
///
/// All operations on a single key go through moka's per-key entry API, so they are atomic with
/// respect to each other, and a reader never observes a partially installed slot.
#[derive(Clone)]
pub(crate) struct EntryTable {
    cache: SlotCache,
}

impl EntryTable {
    pub fn new(name: &str, counters: Arc<StoreCounters>) -> Self {
        let store_name = name.to_owned();
        let cache = SlotCache::builder()
            .name(name)
            .expire_after(SlotExpiration)
            .eviction_listener(move |key, _slot, cause| {
                if cause == RemovalCause::Expired {
                    counters.evictions.fetch_add(1, Ordering::Relaxed);
                    metric!(counter("store.evict") += 1, "store" => &store_name);
                    tracing::trace!(store = store_name.as_str(), %key, "evicted expired entry");
                }
            })
            .build();

        Self { cache }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Slot> {
        let now = Instant::now();
        self.cache.get(key).filter(|slot| !slot.is_expired(now))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.get(key).is_some()
    }

    /// Installs a new generation under `key`, replacing the current one.
    ///
    /// Returns the new generation number.
    pub fn install(&self, key: CacheKey, bytes: Bytes, ttl: Option<Duration>) -> u64 {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        let entry = self.cache.entry(key).and_upsert_with(|current| {
            let number = live(current).map_or(1, |entry| entry.value().generation.number + 1);
            Slot {
                generation: Arc::new(Generation::new(number, bytes)),
                deadline,
            }
        });
        entry.value().generation.number
    }

    /// Installs the first generation under `key`, unless there already is an entry.
    pub fn install_if_absent(&self, key: CacheKey, bytes: Bytes, ttl: Option<Duration>) -> bool {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        let result = self.cache.entry(key).and_compute_with(|current| match live(current) {
            Some(_) => Op::Nop,
            None => Op::Put(Slot {
                generation: Arc::new(Generation::new(1, bytes)),
                deadline,
            }),
        });
        matches!(result, CompResult::Inserted(_))
    }

    /// Changes the deadline of the current generation of `key`.
    ///
    /// Returns whether there was an entry.
    pub fn set_expiration(&self, key: CacheKey, ttl: Option<Duration>) -> bool {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        let result = self.cache.entry(key).and_compute_with(|current| match live(current) {
            Some(entry) => Op::Put(Slot {
                generation: Arc::clone(&entry.value().generation),
                deadline,
            }),
            None => Op::Nop,
        });
        matches!(result, CompResult::ReplacedWith(_))
    }

    /// Removes the entry under `key`, returning whether there was one.
    pub fn remove(&self, key: CacheKey) -> bool {
        let result = self.cache.entry(key).and_compute_with(|current| match live(current) {
            Some(_) => Op::Remove,
            None => Op::Nop,
        });
        matches!(result, CompResult::Removed(_))
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    /// Runs moka's pending maintenance, which evicts expired entries.
    pub fn sweep(&self) {
        self.cache.run_pending_tasks();
    }

    /// The number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.cache.iter().filter(|(_, slot)| !slot.is_expired(now)).count()
    }

    /// A point-in-time list of all live entries.
    pub fn entries(&self) -> Vec<(CacheKey, Slot)> {
        let now = Instant::now();
        self.cache
            .iter()
            .filter(|(_, slot)| !slot.is_expired(now))
            .map(|(key, slot)| (CacheKey::clone(&key), slot))
            .collect()
    }
}
