use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::codec::{self, DecodeOptions, EncodeOptions};
use crate::config::StoreConfig;
use crate::types::{TypeResolver, Value};

use super::materializer::Materializer;
use super::snapshot::{self, SnapshotEntry};
use super::table::EntryTable;
use super::{CacheError, CacheKey, LiveReference};

/// Counters shared between the store and its entry table.
#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub stores: AtomicU64,
    pub materializations: AtomicU64,
    pub evictions: AtomicU64,
}

/// A point-in-time summary of an [`ObjectStore`].
///
/// The counters are cumulative over the lifetime of the store, across re-initialization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    /// The number of live entries.
    pub entries: usize,
    /// Fetches that found an entry.
    pub hits: u64,
    /// Fetches that did not find an entry.
    pub misses: u64,
    /// Successful writes, by `store`, `add` and snapshot loading.
    pub stores: u64,
    /// Decodes of stored bytes into a [`MaterializedHandle`](super::MaterializedHandle).
    pub materializations: u64,
    /// Entries evicted because their time-to-live ran out.
    pub evictions: u64,
}

/// A shared object store.
///
/// The store has to be [initialized](Self::initialize) before use; every operation fails with
/// [`CacheError::NotInitialized`] before that, and again after [`teardown`](Self::teardown).
/// Stores are independent of each other, and are meant to be shared between threads behind an
/// [`Arc`].
pub struct ObjectStore {
    config: StoreConfig,
    encode_options: EncodeOptions,
    decode_options: DecodeOptions,
    resolver: Arc<dyn TypeResolver>,
    table: RwLock<Option<EntryTable>>,
    counters: Arc<StoreCounters>,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .field("counters", &self.counters)
            .finish()
    }
}

impl ObjectStore {
    /// Creates a new, uninitialized store.
    ///
    /// `resolver` maps the type names of stored objects back to their descriptors on fetch.
    pub fn new(config: StoreConfig, resolver: Arc<dyn TypeResolver>) -> Self {
        Self {
            encode_options: EncodeOptions::from(&config),
            decode_options: DecodeOptions::from(&config),
            config,
            resolver,
            table: RwLock::new(None),
            counters: Default::default(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_initialized(&self) -> bool {
        self.table.read().unwrap().is_some()
    }

    /// Allocates the entry table, and primes it from the configured snapshot.
    ///
    /// Initializing an initialized store does nothing. A snapshot that can not be loaded is
    /// logged and skipped, the store starts out empty in that case.
    pub fn initialize(&self) -> Result<(), CacheError> {
        let mut table = self.table.write().unwrap();
        if table.is_some() {
            tracing::debug!(store = self.name(), "store is already initialized");
            return Ok(());
        }
        let new_table = EntryTable::new(self.name(), Arc::clone(&self.counters));

        let snapshot = &self.config.snapshot;
        if let Some(path) = snapshot.path.as_deref().filter(|_| snapshot.load_on_initialize) {
            if path.is_file() {
                match self.load_into(&new_table, path) {
                    Ok(loaded) => {
                        tracing::info!(store = self.name(), loaded, path = %path.display(), "loaded snapshot")
                    }
                    Err(err) => {
                        let dynerr: &dyn std::error::Error = &err;
                        tracing::error!(
                            store = self.name(),
                            path = %path.display(),
                            error = dynerr,
                            "failed to load snapshot"
                        );
                        new_table.clear();
                    }
                }
            } else {
                tracing::debug!(store = self.name(), path = %path.display(), "no snapshot to load");
            }
        }

        *table = Some(new_table);
        tracing::debug!(store = self.name(), "initialized store");
        Ok(())
    }

    /// Releases all entries, and dumps them to the configured snapshot first.
    ///
    /// Failing to write the snapshot is logged, the store is torn down regardless. Handles that
    /// are still referenced by a [`LiveReference`] stay alive until those are dropped.
    pub fn teardown(&self) -> Result<(), CacheError> {
        let table = self
            .table
            .write()
            .unwrap()
            .take()
            .ok_or(CacheError::NotInitialized)?;

        let snapshot = &self.config.snapshot;
        if let Some(path) = snapshot.path.as_deref().filter(|_| snapshot.dump_on_teardown) {
            match self.dump_from(&table, path) {
                Ok(dumped) => {
                    tracing::info!(store = self.name(), dumped, path = %path.display(), "dumped snapshot")
                }
                Err(err) => {
                    let dynerr: &dyn std::error::Error = &err;
                    tracing::error!(
                        store = self.name(),
                        path = %path.display(),
                        error = dynerr,
                        "failed to dump snapshot"
                    );
                }
            }
        }

        table.clear();
        tracing::debug!(store = self.name(), "tore down store");
        Ok(())
    }

    fn with_table<R>(
        &self,
        f: impl FnOnce(&EntryTable) -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        let table = self.table.read().unwrap();
        let table = table.as_ref().ok_or(CacheError::NotInitialized)?;
        f(table)
    }

    fn encode(&self, value: &Value) -> Result<bytes::Bytes, CacheError> {
        let bytes = codec::encode(value, &self.encode_options).inspect_err(|err| {
            metric!(counter("store.write.failed") += 1, "store" => self.name());
            tracing::debug!(store = self.name(), %err, "failed to encode value");
        })?;
        metric!(time_raw("store.entry.size") = bytes.len() as u64, "store" => self.name());
        Ok(bytes)
    }

    fn record_store(&self) {
        self.counters.stores.fetch_add(1, Ordering::Relaxed);
        metric!(counter("store.write") += 1, "store" => self.name());
    }

    /// Stores `value` under `key`, replacing the current entry.
    ///
    /// The entry expires after the configured default TTL, if any. Returns the new generation
    /// number. If the value can not be encoded, the current entry is left untouched.
    pub fn store(&self, key: impl Into<CacheKey>, value: &Value) -> Result<u64, CacheError> {
        self.store_with_ttl(key, value, self.config.default_ttl)
    }

    /// Stores `value` under `key` with an explicit time-to-live.
    ///
    /// `None` means the entry never expires.
    pub fn store_with_ttl(
        &self,
        key: impl Into<CacheKey>,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<u64, CacheError> {
        let key = key.into();
        self.with_table(|table| {
            let bytes = self.encode(value)?;
            let generation = table.install(key.clone(), bytes, ttl);
            self.record_store();
            tracing::trace!(store = self.name(), %key, generation, "stored entry");
            Ok(generation)
        })
    }

    /// Stores `value` under `key`, unless there already is an entry.
    ///
    /// Returns whether the value was stored. The value is encoded in any case, so an
    /// unsupported value fails even if the key exists.
    pub fn add(
        &self,
        key: impl Into<CacheKey>,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let key = key.into();
        self.with_table(|table| {
            let bytes = self.encode(value)?;
            let added = table.install_if_absent(key.clone(), bytes, ttl);
            if added {
                self.record_store();
                tracing::trace!(store = self.name(), %key, "added entry");
            }
            Ok(added)
        })
    }

    /// Fetches the current generation of `key`.
    ///
    /// Returns `None` if there is no entry, or it has expired. The stored bytes are decoded on
    /// the first fetch of each generation only.
    pub fn fetch(&self, key: impl Into<CacheKey>) -> Result<Option<LiveReference>, CacheError> {
        let key = key.into();
        self.with_table(|table| {
            metric!(counter("store.access") += 1, "store" => self.name());
            let Some(slot) = table.get(&key) else {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                metric!(counter("store.miss") += 1, "store" => self.name());
                return Ok(None);
            };
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            metric!(counter("store.hit") += 1, "store" => self.name());

            let materializer = Materializer {
                name: self.name(),
                resolver: &*self.resolver,
                options: &self.decode_options,
                counters: &self.counters,
            };
            let handle = materializer.ensure_materialized(&key, &slot.generation)?;
            Ok(Some(LiveReference::new(handle, self.config.mutable_objects)))
        })
    }

    /// Whether there is a live entry under `key`, without materializing it.
    pub fn exists(&self, key: impl Into<CacheKey>) -> Result<bool, CacheError> {
        let key = key.into();
        self.with_table(|table| Ok(table.contains(&key)))
    }

    /// Removes the entry under `key`, returning whether there was one.
    ///
    /// Existing references to the entry stay valid.
    pub fn remove(&self, key: impl Into<CacheKey>) -> Result<bool, CacheError> {
        let key = key.into();
        self.with_table(|table| {
            let removed = table.remove(key.clone());
            tracing::trace!(store = self.name(), %key, removed, "removed entry");
            Ok(removed)
        })
    }

    /// The encoded bytes of the current generation of `key`.
    pub fn raw_bytes(&self, key: impl Into<CacheKey>) -> Result<Option<bytes::Bytes>, CacheError> {
        let key = key.into();
        self.with_table(|table| Ok(table.get(&key).map(|slot| slot.generation.bytes.clone())))
    }

    /// The current generation number of `key`.
    pub fn generation(&self, key: impl Into<CacheKey>) -> Result<Option<u64>, CacheError> {
        let key = key.into();
        self.with_table(|table| Ok(table.get(&key).map(|slot| slot.generation.number)))
    }

    /// Changes the time-to-live of `key`, counted from now.
    ///
    /// `None` removes the expiration. This does not create a new generation. Returns whether
    /// there was an entry.
    pub fn set_expiration(
        &self,
        key: impl Into<CacheKey>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let key = key.into();
        self.with_table(|table| Ok(table.set_expiration(key, ttl)))
    }

    /// Removes all entries.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.with_table(|table| {
            table.clear();
            tracing::debug!(store = self.name(), "cleared store");
            Ok(())
        })
    }

    /// Evicts expired entries.
    ///
    /// Expired entries are never returned by a fetch, sweeping only releases them early.
    /// Eviction may lag behind the deadline of an entry by about a second, the resolution of
    /// moka's expiration timers.
    pub fn sweep(&self) -> Result<(), CacheError> {
        self.with_table(|table| {
            let before = self.counters.evictions.load(Ordering::Relaxed);
            table.sweep();
            let evicted = self.counters.evictions.load(Ordering::Relaxed) - before;
            if evicted > 0 {
                tracing::debug!(store = self.name(), evicted, "swept expired entries");
            }
            metric!(gauge("store.entries") = table.len() as u64, "store" => self.name());
            Ok(())
        })
    }

    pub fn info(&self) -> Result<StoreInfo, CacheError> {
        self.with_table(|table| {
            Ok(StoreInfo {
                entries: table.len(),
                hits: self.counters.hits.load(Ordering::Relaxed),
                misses: self.counters.misses.load(Ordering::Relaxed),
                stores: self.counters.stores.load(Ordering::Relaxed),
                materializations: self.counters.materializations.load(Ordering::Relaxed),
                evictions: self.counters.evictions.load(Ordering::Relaxed),
            })
        })
    }

    /// Spawns a task that [sweeps](Self::sweep) the store every `interval`.
    ///
    /// Each sweep runs on tokio's blocking thread pool.
    ///
    /// The task ends once the store is dropped. It keeps running while the store is torn
    /// down, and resumes sweeping when it is initialized again.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(sweep_periodically(store, interval))
    }

    /// Writes all live entries to a snapshot file at `path`.
    ///
    /// Returns the number of entries written.
    pub fn dump_snapshot(&self, path: &Path) -> Result<usize, CacheError> {
        self.with_table(|table| self.dump_from(table, path))
    }

    /// Installs all entries of the snapshot at `path`, replacing entries with the same key.
    ///
    /// Loading an entry is a write like [`store`](Self::store): a new key starts out at
    /// generation 1, a live key moves on to its next generation. Loaded entries keep the
    /// time-to-live they had left when they were dumped. Returns the number of entries loaded.
    pub fn load_snapshot(&self, path: &Path) -> Result<usize, CacheError> {
        self.with_table(|table| self.load_into(table, path))
    }

    fn dump_from(&self, table: &EntryTable, path: &Path) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut entries: Vec<_> = table
            .entries()
            .into_iter()
            .map(|(key, slot)| SnapshotEntry {
                ttl: slot.remaining_ttl(now),
                bytes: slot.generation.bytes.clone(),
                key,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        snapshot::write(path, &entries)?;
        Ok(entries.len())
    }

    fn load_into(&self, table: &EntryTable, path: &Path) -> Result<usize, CacheError> {
        let entries = snapshot::read(path)?;
        let loaded = entries.len();
        for SnapshotEntry { key, ttl, bytes } in entries {
            table.install(key, bytes, ttl);
            self.record_store();
        }
        Ok(loaded)
    }
}

async fn sweep_periodically(store: Weak<ObjectStore>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(store) = store.upgrade() else {
            break;
        };
        // eviction drops entries and may take table locks, which must not stall the runtime
        let sweep = tokio::task::spawn_blocking({
            let store = Arc::clone(&store);
            move || store.sweep()
        });
        match sweep.await {
            Ok(Ok(())) => {}
            Ok(Err(CacheError::NotInitialized)) => {
                tracing::trace!(store = store.name(), "skipping sweep of uninitialized store");
            }
            Ok(Err(err)) => {
                let dynerr: &dyn std::error::Error = &err;
                tracing::error!(store = store.name(), error = dynerr, "failed to sweep store");
            }
            Err(err) => {
                let dynerr: &dyn std::error::Error = &err;
                tracing::error!(store = store.name(), error = dynerr, "sweep panicked");
            }
        }
    }
}
