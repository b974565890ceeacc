use std::sync::Arc;

use crate::config::MutablePolicy;
use crate::types::Value;

use super::materializer::{MaterializedHandle, ObjectGraph};
use super::{CacheError, CacheKey};

/// The result of a single [`fetch`](super::ObjectStore::fetch).
///
/// Every reference is backed by the [`MaterializedHandle`] of the generation that was current
/// when it was fetched, and keeps that handle alive. Replacing or removing the entry afterwards
/// does not affect existing references.
///
/// Writes through a reference go through [`Object::set`](crate::types::Object::set), so the
/// immutability of the stored types can not be bypassed.
///
/// Values taken out of a cyclic graph are tied to the lifetime of the graph: once the last
/// reference to it (and the entry itself) is gone, the objects of the graph are emptied to free
/// the cycles. Keep the reference around for as long as its values are used.
#[derive(Clone, Debug)]
pub struct LiveReference {
    handle: Arc<MaterializedHandle>,
    /// The private copy of the graph, under [`MutablePolicy::CopyOnFetch`].
    copy: Option<Arc<ObjectGraph>>,
}

impl LiveReference {
    /// Derives a reference from `handle`.
    ///
    /// Graphs containing mutable objects are aliased or copied according to `policy`. Deeply
    /// immutable graphs are always aliased.
    pub(crate) fn new(handle: Arc<MaterializedHandle>, policy: MutablePolicy) -> Self {
        let copy = match policy {
            MutablePolicy::CopyOnFetch if !handle.is_deeply_immutable() => {
                Some(Arc::new(handle.graph().deep_copy()))
            }
            _ => None,
        };
        Self { handle, copy }
    }

    /// The fetched value.
    pub fn value(&self) -> &Value {
        match &self.copy {
            Some(copy) => copy.root(),
            None => self.handle.root(),
        }
    }

    /// Returns the value of a field of the root object.
    ///
    /// Returns `None` if the root is not an object, or has no such field.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.value().as_object()?.get(field)
    }

    /// Writes a field of the root object.
    ///
    /// Fails with [`CacheError::ImmutableWrite`] if the root object is of an immutable type, and
    /// with [`CacheError::NotAnObject`] if the root is not an object at all. The stored bytes are
    /// never affected.
    pub fn set(&self, field: &str, value: Value) -> Result<(), CacheError> {
        match self.value() {
            Value::Object(object) => object.set(field, value),
            other => Err(CacheError::NotAnObject(other.kind())),
        }
    }

    /// Whether writes to the root object are rejected.
    pub fn is_read_only(&self) -> bool {
        match self.value() {
            Value::Object(object) => object.is_immutable(),
            _ => true,
        }
    }

    pub fn key(&self) -> &CacheKey {
        self.handle.key()
    }

    /// The generation of the entry this reference was fetched from.
    pub fn generation(&self) -> u64 {
        self.handle.generation()
    }

    pub fn handle(&self) -> &Arc<MaterializedHandle> {
        &self.handle
    }

    /// Whether both references are backed by the same [`MaterializedHandle`].
    pub fn shares_handle(&self, other: &LiveReference) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}
