use std::sync::Arc;

use bytes::{Buf, Bytes};

use crate::caching::CacheError;
use crate::config::StoreConfig;
use crate::types::{Object, TypeResolver, Value};

use super::{FORMAT_VERSION, tag};

/// Options for [`decode`].
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Maximum nesting depth of lists, maps and objects.
    pub max_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for DecodeOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            max_depth: config.max_depth,
        }
    }
}

/// The result of [`decode`].
#[derive(Debug)]
pub struct Decoded {
    /// The reconstructed root value.
    pub value: Value,
    /// The number of distinct objects that were constructed.
    pub objects: usize,
    /// Whether the value contains a reference cycle.
    pub cyclic: bool,
    /// All constructed objects, in first-seen order.
    pub(crate) graph: Vec<Object>,
}

/// Reconstructs a value from its canonical byte representation.
///
/// Type names are mapped back to descriptors via `resolver`; the reconstructed objects capture
/// those descriptors, including their immutability.
pub fn decode(
    bytes: &[u8],
    resolver: &dyn TypeResolver,
    options: &DecodeOptions,
) -> Result<Decoded, CacheError> {
    let mut decoder = Decoder {
        buf: bytes,
        resolver,
        max_depth: options.max_depth,
        objects: Vec::new(),
        complete: Vec::new(),
        cyclic: false,
    };

    let version = decoder.u8("format version")?;
    if version != FORMAT_VERSION {
        return Err(CacheError::corrupt(format!(
            "unsupported format version {version}"
        )));
    }
    let value = decoder.value(0)?;
    if decoder.buf.has_remaining() {
        return Err(CacheError::corrupt(format!(
            "{} trailing bytes",
            decoder.buf.remaining()
        )));
    }

    Ok(Decoded {
        value,
        objects: decoder.objects.len(),
        cyclic: decoder.cyclic,
        graph: decoder.objects,
    })
}

struct Decoder<'a> {
    buf: &'a [u8],
    resolver: &'a dyn TypeResolver,
    max_depth: usize,
    /// All objects constructed so far, in first-seen order.
    objects: Vec<Object>,
    /// Whether all fields of the object with the same index have been decoded.
    complete: Vec<bool>,
    /// Set once a back reference points at an object that is still being decoded.
    cyclic: bool,
}

impl<'a> Decoder<'a> {
    fn value(&mut self, depth: usize) -> Result<Value, CacheError> {
        let value = match self.u8("tag")? {
            tag::NULL => Value::Null,
            tag::FALSE => Value::Bool(false),
            tag::TRUE => Value::Bool(true),
            tag::INT => {
                self.need(8, "int")?;
                Value::Int(self.buf.get_i64_le())
            }
            tag::FLOAT => {
                self.need(8, "float")?;
                Value::Float(f64::from_bits(self.buf.get_u64_le()))
            }
            tag::STRING => Value::String(self.str("string")?.into()),
            tag::BYTES => {
                let len = self.len("bytes length")?;
                Value::Bytes(Bytes::copy_from_slice(self.slice(len, "bytes")?))
            }
            tag::LIST => {
                self.enter(depth)?;
                let count = self.len("list length")?;
                let mut items = Vec::with_capacity(count.min(self.buf.remaining()));
                for _ in 0..count {
                    items.push(self.value(depth + 1)?);
                }
                Value::List(items)
            }
            tag::MAP => {
                self.enter(depth)?;
                let count = self.len("map length")?;
                let mut entries = Vec::with_capacity(count.min(self.buf.remaining()));
                for _ in 0..count {
                    let key: Arc<str> = self.str("map key")?.into();
                    entries.push((key, self.value(depth + 1)?));
                }
                Value::Map(entries)
            }
            tag::OBJECT => {
                self.enter(depth)?;
                Value::Object(self.object(depth)?)
            }
            tag::BACK_REF => {
                self.need(4, "back reference")?;
                let index = self.buf.get_u32_le() as usize;
                let object = self.objects.get(index).ok_or_else(|| {
                    CacheError::corrupt(format!("back reference to unknown object {index}"))
                })?;
                if !self.complete[index] {
                    self.cyclic = true;
                }
                Value::Object(object.clone())
            }
            other => return Err(CacheError::corrupt(format!("unknown tag {other:#04x}"))),
        };
        Ok(value)
    }

    fn object(&mut self, depth: usize) -> Result<Object, CacheError> {
        let type_name = self.str("type name")?;
        let descriptor = self
            .resolver
            .resolve(type_name)
            .ok_or_else(|| CacheError::UnknownType(type_name.to_owned()))?;

        // registered before its fields are decoded, so that cycles can refer back to it
        let object = Object::empty(descriptor);
        let index = self.objects.len();
        self.objects.push(object.clone());
        self.complete.push(false);

        let count = self.len("field count")?;
        for _ in 0..count {
            let name = self.str("field name")?;
            if !object.descriptor().declares(name) {
                return Err(CacheError::corrupt(format!(
                    "type `{type_name}` does not declare field `{name}`"
                )));
            }
            let name: Arc<str> = name.into();
            let value = self.value(depth + 1)?;
            object.push_field(name, value);
        }
        self.complete[index] = true;
        Ok(object)
    }

    fn enter(&self, depth: usize) -> Result<(), CacheError> {
        if depth >= self.max_depth {
            return Err(CacheError::corrupt(format!(
                "nested deeper than {} levels",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn need(&self, len: usize, what: &str) -> Result<(), CacheError> {
        if self.buf.remaining() < len {
            return Err(CacheError::corrupt(format!("truncated {what}")));
        }
        Ok(())
    }

    fn u8(&mut self, what: &str) -> Result<u8, CacheError> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    fn len(&mut self, what: &str) -> Result<usize, CacheError> {
        self.need(4, what)?;
        Ok(self.buf.get_u32_le() as usize)
    }

    fn slice(&mut self, len: usize, what: &str) -> Result<&'a [u8], CacheError> {
        self.need(len, what)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn str(&mut self, what: &str) -> Result<&'a str, CacheError> {
        let len = self.len(what)?;
        let bytes = self.slice(len, what)?;
        std::str::from_utf8(bytes).map_err(|_| CacheError::corrupt(format!("invalid UTF-8 in {what}")))
    }
}
