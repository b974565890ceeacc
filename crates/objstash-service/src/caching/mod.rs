//! # objstash Caching infrastructure
//!
//! The [`ObjectStore`] keeps application values alive beyond the execution that created them,
//! and hands them out again to later, possibly concurrent, consumers. This module contains the
//! store itself, the central [`CacheError`] type, and an explanation of how the pieces work
//! together.
//!
//! ## Two phases: bytes and handles
//!
//! A value goes through two representations:
//!
//! - On `store`, the value is encoded by the [`codec`](crate::codec) into its canonical bytes.
//!   The bytes form a new *generation* of the entry, and are never modified afterwards.
//! - On the first `fetch` of a generation, the bytes are decoded into a [`MaterializedHandle`].
//!   The handle is cached next to the bytes, and every later fetch of the same generation is
//!   served from it without decoding again.
//!
//! Storing the same key again installs a new generation with an incremented generation number.
//! The entry table drops its reference to the old generation and its handle, but every
//! [`LiveReference`] that was handed out before keeps that handle alive, and keeps observing the
//! old value.
//!
//! A decoded value that contains a cycle would keep itself alive forever. Its handle owns all of
//! its objects instead, and clears their fields once the last reference to the handle is gone.
//! Values taken out of such a graph are only complete for as long as a [`LiveReference`] to it
//! is held. The same holds for the private copies handed out under
//! [`MutablePolicy::CopyOnFetch`](crate::config::MutablePolicy::CopyOnFetch).
//!
//! ## Concurrency
//!
//! The key to entry mapping is an in-memory [moka] cache. Everything that reads and then
//! writes a single key (`store`, `add`, `remove`, `set_expiration`) goes through moka's per-key
//! entry API, so these operations are atomic with respect to each other, and nobody ever sees a
//! partially installed entry.
//!
//! Materialization is guarded per generation: concurrent first-time fetches of the same
//! generation wait for a single decode, and all of them end up with the same handle. Fetches of
//! other keys are never blocked by it. A failing decode is not cached.
//!
//! ## Immutability
//!
//! Reconstructed objects capture the [`TypeDescriptor`](crate::types::TypeDescriptor) that the
//! store's [`TypeResolver`](crate::types::TypeResolver) returned at decode time. The only write
//! entry point of an object, [`Object::set`](crate::types::Object::set), rejects every write to
//! an object of an immutable type with [`CacheError::ImmutableWrite`]. This applies to all
//! references, since they all go through the same objects.
//!
//! Graphs containing mutable objects are handed out according to the configured
//! [`MutablePolicy`](crate::config::MutablePolicy): either all references alias the handle's
//! graph, or every fetch receives a private deep copy. Writes are never reflected in the stored
//! bytes under either policy.
//!
//! ## Expiration
//!
//! Entries can have a time-to-live, either from the `default_ttl` configuration, per `store`,
//! or changed later via `set_expiration`. An expired entry is treated as absent by every
//! operation right away. Its memory is released either by moka's own housekeeping, or by
//! [`ObjectStore::sweep`], which can run periodically on the blocking thread pool via
//! [`ObjectStore::spawn_sweeper`].
//!
//! ## Snapshots
//!
//! A store can be dumped to a [`snapshot`] file and primed from one. Snapshots contain the
//! encoded bytes and remaining time-to-live of every live entry. The configured snapshot is
//! loaded on [`ObjectStore::initialize`] and written on [`ObjectStore::teardown`].
//!
//! ### Metrics
//!
//! Each metric is tagged with a `store` field that corresponds to the configured store name:
//!
//! - `store.access`: All fetches.
//! - `store.hit` / `store.miss`: Fetches that did / did not find an entry.
//! - `store.write`: Successful writes.
//! - `store.write.failed`: Writes that failed to encode their value.
//! - `store.entry.size`: The encoded size of written values.
//! - `store.materialize`: Actual decodes, and `store.materialize.duration` how long they took.
//! - `store.evict`: Entries evicted because they expired.
//! - `store.entries`: The number of live entries, reported after every sweep.

mod cache_error;
mod cache_key;
mod materializer;
mod reference;
pub mod snapshot;
mod store;
mod table;


pub use cache_error::CacheError;
pub use cache_key::CacheKey;
pub use materializer::MaterializedHandle;
pub use reference::LiveReference;
pub use store::{ObjectStore, StoreInfo};
