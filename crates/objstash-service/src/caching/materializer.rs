use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::codec::{self, DecodeOptions};
use crate::types::{Object, TypeResolver, Value};

use super::store::StoreCounters;
use super::table::Generation;
use super::{CacheError, CacheKey};

/// The reconstructed value of one generation of an entry.
///
/// A handle is created at most once per generation, by the first fetch of it, and is shared by
/// the entry table and every [`LiveReference`](super::LiveReference) derived from it. It lives
/// for as long as any of those holders.
pub struct MaterializedHandle {
    key: CacheKey,
    generation: u64,
    graph: ObjectGraph,
    objects: usize,
    deeply_immutable: bool,
}

impl MaterializedHandle {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The root of the reconstructed value graph.
    pub fn root(&self) -> &Value {
        self.graph.root()
    }

    /// The number of distinct objects in the graph.
    pub fn objects(&self) -> usize {
        self.objects
    }

    /// Whether every object in the graph is of an immutable type.
    pub fn is_deeply_immutable(&self) -> bool {
        self.deeply_immutable
    }

    /// Whether the graph contains a reference cycle.
    ///
    /// The objects of a cyclic graph are emptied when the handle is dropped, see
    /// [`LiveReference`](super::LiveReference).
    pub fn is_cyclic(&self) -> bool {
        self.graph.is_cyclic()
    }

    pub(crate) fn graph(&self) -> &ObjectGraph {
        &self.graph
    }
}

impl fmt::Debug for MaterializedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializedHandle")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .field("objects", &self.objects)
            .field("deeply_immutable", &self.deeply_immutable)
            .field("cyclic", &self.is_cyclic())
            .finish_non_exhaustive()
    }
}

/// The root of a reconstructed value graph, owning the cycles within it.
///
/// A decoded cycle is a cycle of [`Arc`]s and would never be freed on its own. Dropping the
/// graph clears the fields of every object of a cyclic graph, which breaks those cycles.
pub(crate) struct ObjectGraph {
    root: Value,
    /// The objects to clear on drop, empty for acyclic graphs.
    objects: Vec<Object>,
}

impl ObjectGraph {
    pub fn new(root: Value, objects: Vec<Object>, cyclic: bool) -> Self {
        let objects = if cyclic { objects } else { Vec::new() };
        Self { root, objects }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn is_cyclic(&self) -> bool {
        !self.objects.is_empty()
    }

    /// A private copy of this graph, sharing no objects with it.
    pub fn deep_copy(&self) -> Self {
        let (root, objects) = self.root.deep_copy_graph();
        Self::new(root, objects, self.is_cyclic())
    }
}

impl Drop for ObjectGraph {
    fn drop(&mut self) {
        for object in &self.objects {
            object.clear_fields();
        }
    }
}

impl fmt::Debug for ObjectGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectGraph")
            .field("root", &self.root)
            .field("cyclic", &self.is_cyclic())
            .finish()
    }
}

/// Everything needed to decode an entry.
pub(crate) struct Materializer<'a> {
    pub name: &'a str,
    pub resolver: &'a dyn TypeResolver,
    pub options: &'a DecodeOptions,
    pub counters: &'a StoreCounters,
}

impl Materializer<'_> {
    /// Returns the handle of `generation`, decoding its bytes if this is the first request.
    ///
    /// Concurrent callers for the same generation wait for the one that decodes, so the bytes
    /// are decoded at most once per generation. Callers for other keys are never blocked.
    /// A failed decode is not cached, the next fetch tries again.
    pub fn ensure_materialized(
        &self,
        key: &CacheKey,
        generation: &Generation,
    ) -> Result<Arc<MaterializedHandle>, CacheError> {
        generation
            .handle
            .get_or_try_init(|| self.materialize(key, generation))
            .cloned()
    }

    fn materialize(
        &self,
        key: &CacheKey,
        generation: &Generation,
    ) -> Result<Arc<MaterializedHandle>, CacheError> {
        let started = Instant::now();
        let decoded = codec::decode(&generation.bytes, self.resolver, self.options)
            .inspect_err(|err| {
                let dynerr: &dyn std::error::Error = err;
                tracing::warn!(
                    %key,
                    generation = generation.number,
                    error = dynerr,
                    "failed to materialize entry"
                );
            })?;

        self.counters.materializations.fetch_add(1, Ordering::Relaxed);
        metric!(counter("store.materialize") += 1, "store" => self.name);
        metric!(timer("store.materialize.duration") = started.elapsed(), "store" => self.name);
        tracing::trace!(
            %key,
            generation = generation.number,
            objects = decoded.objects,
            "materialized entry"
        );

        let deeply_immutable = decoded.value.is_deeply_immutable();
        Ok(Arc::new(MaterializedHandle {
            key: key.clone(),
            generation: generation.number,
            graph: ObjectGraph::new(decoded.value, decoded.graph, decoded.cyclic),
            objects: decoded.objects,
            deeply_immutable,
        }))
    }
}
