//! The values that can be stored in the cache.
//!
//! A [`Value`] is a tagged union of primitive kinds, ordered collections, [`Object`]s and
//! [`Resource`]s. Objects are shared records: cloning a `Value::Object` aliases the same record,
//! which also makes it possible to build shared and cyclic object graphs.
//!
//! The only way to modify an object after construction is [`Object::set`], which enforces the
//! immutability and field schema declared by the object's [`TypeDescriptor`].

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use bytes::Bytes;

use crate::caching::CacheError;

mod descriptor;

pub use descriptor::{AnyTypeResolver, TypeDescriptor, TypeRegistry, TypeResolver};

/// An opaque handle to a host resource, such as an open file or socket.
///
/// Resources only make sense within the execution that owns them and can not be stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub kind: Arc<str>,
    pub id: u64,
}

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    Bytes(Bytes),
    List(Vec<Value>),
    /// String-keyed entries, in insertion order.
    Map(Vec<(Arc<str>, Value)>),
    Object(Object),
    Resource(Resource),
}

impl Value {
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Self::String(s.into())
    }

    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Arc<str>>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// A short, static name of the kind of this value.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Resource(_) => "resource",
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether every object reachable from this value is of an immutable type.
    ///
    /// Values without any objects are trivially immutable.
    pub fn is_deeply_immutable(&self) -> bool {
        fn visit(value: &Value, seen: &mut HashSet<usize>) -> bool {
            match value {
                Value::List(items) => items.iter().all(|v| visit(v, seen)),
                Value::Map(entries) => entries.iter().all(|(_, v)| visit(v, seen)),
                Value::Object(object) => {
                    if !seen.insert(object.id()) {
                        return true;
                    }
                    object.is_immutable() && object.fields().iter().all(|(_, v)| visit(v, seen))
                }
                _ => true,
            }
        }
        visit(self, &mut HashSet::new())
    }

    /// Creates a copy of this value that shares no objects with the original.
    ///
    /// Aliasing between objects within the value (including cycles) is reproduced in the copy.
    pub fn deep_copy(&self) -> Value {
        self.deep_copy_with(&mut HashMap::new())
    }

    /// Like [`deep_copy`](Self::deep_copy), also returning every object of the copy.
    pub(crate) fn deep_copy_graph(&self) -> (Value, Vec<Object>) {
        let mut copies = HashMap::new();
        let value = self.deep_copy_with(&mut copies);
        (value, copies.into_values().collect())
    }

    fn deep_copy_with(&self, copies: &mut HashMap<usize, Object>) -> Value {
        match self {
            Value::List(items) => {
                Value::List(items.iter().map(|v| v.deep_copy_with(copies)).collect())
            }
            Value::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (Arc::clone(k), v.deep_copy_with(copies)))
                    .collect(),
            ),
            Value::Object(object) => {
                if let Some(copy) = copies.get(&object.id()) {
                    return Value::Object(copy.clone());
                }
                let copy = Object::empty(Arc::clone(object.descriptor()));
                copies.insert(object.id(), copy.clone());
                for (name, value) in object.fields() {
                    let value = value.deep_copy_with(copies);
                    copy.push_field(name, value);
                }
                Value::Object(copy)
            }
            other => other.clone(),
        }
    }

    /// Structural equality.
    ///
    /// Objects are equal if they have the same type name, immutability and ordered fields.
    /// Floats compare by their bit pattern. Cyclic graphs are compared co-inductively, two
    /// objects that are already being compared are assumed to be equal.
    pub fn structurally_eq(&self, other: &Value) -> bool {
        eq_with(self, other, &mut HashSet::new())
    }
}

fn eq_with(a: &Value, b: &Value, seen: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        (Value::Resource(a), Value::Resource(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| eq_with(a, b, seen))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|((ka, va), (kb, vb))| ka == kb && eq_with(va, vb, seen))
        }
        (Value::Object(a), Value::Object(b)) => {
            if a.ptr_eq(b) || !seen.insert((a.id(), b.id())) {
                return true;
            }
            if a.type_name() != b.type_name() || a.is_immutable() != b.is_immutable() {
                return false;
            }
            let (fa, fb) = (a.fields(), b.fields());
            fa.len() == fb.len()
                && fa
                    .iter()
                    .zip(&fb)
                    .all(|((na, va), (nb, vb))| na == nb && eq_with(va, vb, seen))
        }
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_eq(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stack = RefCell::new(Vec::new());
        DebugValue {
            value: self,
            stack: &stack,
        }
        .fmt(f)
    }
}

/// Cycle-safe debug formatting: an object that is already being printed further up is
/// abbreviated as `Type { .. }`.
struct DebugValue<'a> {
    value: &'a Value,
    stack: &'a RefCell<Vec<usize>>,
}

impl<'a> DebugValue<'a> {
    fn nested(&self, value: &'a Value) -> DebugValue<'a> {
        DebugValue {
            value,
            stack: self.stack,
        }
    }
}

impl fmt::Debug for DebugValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "{b:?}"),
            Value::List(items) => f
                .debug_list()
                .entries(items.iter().map(|v| self.nested(v)))
                .finish(),
            Value::Map(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(k, v)| (k, self.nested(v))))
                .finish(),
            Value::Object(object) => {
                let id = object.id();
                if self.stack.borrow().contains(&id) {
                    return write!(f, "{} {{ .. }}", object.type_name());
                }
                self.stack.borrow_mut().push(id);
                let fields = object.fields();
                let mut s = f.debug_struct(object.type_name());
                for (name, value) in &fields {
                    s.field(name, &self.nested(value));
                }
                let result = s.finish();
                self.stack.borrow_mut().pop();
                result
            }
            Value::Resource(r) => write!(f, "resource({}#{})", r.kind, r.id),
        }
    }
}

struct ObjectInner {
    descriptor: Arc<TypeDescriptor>,
    fields: RwLock<Vec<(Arc<str>, Value)>>,
}

/// A shared record of a named type with ordered fields.
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

impl Object {
    /// Constructs a new object.
    ///
    /// Construction is not a write: objects of immutable types are created with their final
    /// fields here. The field schema is checked when the object is stored.
    pub fn new<I, K>(descriptor: Arc<TypeDescriptor>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Arc<str>>,
    {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self(Arc::new(ObjectInner {
            descriptor,
            fields: RwLock::new(fields),
        }))
    }

    /// An object without fields, to be filled by the decoder or [`Value::deep_copy`].
    pub(crate) fn empty(descriptor: Arc<TypeDescriptor>) -> Self {
        Self::new(descriptor, Vec::<(Arc<str>, Value)>::new())
    }

    /// Appends a field, bypassing the immutability guard.
    ///
    /// Must only be used on objects that are still under construction.
    pub(crate) fn push_field(&self, name: Arc<str>, value: Value) {
        self.0.fields.write().unwrap().push((name, value));
    }

    /// Removes all fields, bypassing the immutability guard.
    ///
    /// Releases the references this object holds, which breaks the cycles it is part of.
    pub(crate) fn clear_fields(&self) {
        let fields = std::mem::take(&mut *self.0.fields.write().unwrap());
        // dropped outside of the lock, this may drop other objects
        drop(fields);
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.0.descriptor
    }

    pub fn type_name(&self) -> &str {
        self.0.descriptor.name()
    }

    pub fn is_immutable(&self) -> bool {
        self.0.descriptor.is_immutable()
    }

    /// Returns the value of a field.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.0
            .fields
            .read()
            .unwrap()
            .iter()
            .find(|(name, _)| &**name == field)
            .map(|(_, value)| value.clone())
    }

    /// Returns a snapshot of all fields, in order.
    pub fn fields(&self) -> Vec<(Arc<str>, Value)> {
        self.0.fields.read().unwrap().clone()
    }

    /// Writes a field.
    ///
    /// An existing field is replaced in place, a new one is appended. Fails with
    /// [`CacheError::ImmutableWrite`] if the object's type is immutable, and with
    /// [`CacheError::UndeclaredField`] if the type has a closed schema that does not declare
    /// `field`.
    pub fn set(&self, field: &str, value: Value) -> Result<(), CacheError> {
        let descriptor = &self.0.descriptor;
        if descriptor.is_immutable() {
            return Err(CacheError::ImmutableWrite {
                field: field.into(),
                type_name: descriptor.shared_name(),
            });
        }
        if !descriptor.declares(field) {
            return Err(CacheError::UndeclaredField {
                field: field.into(),
                type_name: descriptor.shared_name(),
            });
        }

        let mut fields = self.0.fields.write().unwrap();
        match fields.iter_mut().find(|(name, _)| &**name == field) {
            Some((_, slot)) => *slot = value,
            None => fields.push((field.into(), value)),
        }
        Ok(())
    }

    /// Whether both handles refer to the same record.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the underlying record, stable for as long as the record is alive.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// A weak handle to the record, to check whether it was freed.
    #[cfg(test)]
    pub(crate) fn downgrade(&self) -> std::sync::Weak<dyn std::any::Any + Send + Sync> {
        let weak: std::sync::Weak<dyn std::any::Any + Send + Sync> = Arc::<ObjectInner>::downgrade(&self.0);
        weak
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Object(self.clone()), f)
    }
}
