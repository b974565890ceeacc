use std::collections::{HashMap, HashSet};

use bytes::{BufMut, Bytes, BytesMut};

use crate::caching::CacheError;
use crate::config::StoreConfig;
use crate::types::{Object, Value};

use super::{FORMAT_VERSION, tag};

/// Options for [`encode`].
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Encode repeated objects as back references. When disabled, a cycle is an error.
    pub back_references: bool,
    /// Maximum size of the encoded value in bytes.
    pub max_size: Option<usize>,
    /// Maximum nesting depth of lists, maps and objects.
    pub max_depth: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        let config = StoreConfig::default();
        Self::from(&config)
    }
}

impl From<&StoreConfig> for EncodeOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            back_references: config.back_references,
            max_size: config.max_value_size,
            max_depth: config.max_depth,
        }
    }
}

/// Encodes a value into its canonical byte representation.
///
/// See the [module docs](super) for the layout.
pub fn encode(value: &Value, options: &EncodeOptions) -> Result<Bytes, CacheError> {
    let mut encoder = Encoder {
        buf: BytesMut::with_capacity(64),
        options,
        indices: HashMap::new(),
        in_progress: HashSet::new(),
    };
    encoder.buf.put_u8(FORMAT_VERSION);
    encoder.value(value, 0)?;

    let size = encoder.buf.len();
    if let Some(limit) = options.max_size {
        if size > limit {
            return Err(CacheError::ValueTooLarge { size, limit });
        }
    }
    Ok(encoder.buf.freeze())
}

struct Encoder<'a> {
    buf: BytesMut,
    options: &'a EncodeOptions,
    /// First-seen index of every object visited so far, when back references are enabled.
    indices: HashMap<usize, u32>,
    /// Objects currently being encoded, when back references are disabled.
    in_progress: HashSet<usize>,
}

impl Encoder<'_> {
    fn value(&mut self, value: &Value, depth: usize) -> Result<(), CacheError> {
        match value {
            Value::Null => self.buf.put_u8(tag::NULL),
            Value::Bool(false) => self.buf.put_u8(tag::FALSE),
            Value::Bool(true) => self.buf.put_u8(tag::TRUE),
            Value::Int(i) => {
                self.buf.put_u8(tag::INT);
                self.buf.put_i64_le(*i);
            }
            Value::Float(f) => {
                self.buf.put_u8(tag::FLOAT);
                self.buf.put_u64_le(f.to_bits());
            }
            Value::String(s) => {
                self.buf.put_u8(tag::STRING);
                self.str(s)?;
            }
            Value::Bytes(b) => {
                self.buf.put_u8(tag::BYTES);
                self.len(b.len())?;
                self.buf.put_slice(b);
            }
            Value::List(items) => {
                self.enter(depth)?;
                self.buf.put_u8(tag::LIST);
                self.len(items.len())?;
                for item in items {
                    self.value(item, depth + 1)?;
                }
            }
            Value::Map(entries) => {
                self.enter(depth)?;
                self.buf.put_u8(tag::MAP);
                self.len(entries.len())?;
                for (key, item) in entries {
                    self.str(key)?;
                    self.value(item, depth + 1)?;
                }
            }
            Value::Object(object) => self.object(object, depth)?,
            Value::Resource(_) => return Err(CacheError::UnsupportedKind(value.kind())),
        }
        Ok(())
    }

    fn object(&mut self, object: &Object, depth: usize) -> Result<(), CacheError> {
        let id = object.id();
        if self.options.back_references {
            if let Some(index) = self.indices.get(&id) {
                self.buf.put_u8(tag::BACK_REF);
                self.buf.put_u32_le(*index);
                return Ok(());
            }
        }
        // back references do not nest, only newly written objects count towards the limit
        self.enter(depth)?;
        if self.options.back_references {
            let index = u32::try_from(self.indices.len())
                .map_err(|_| CacheError::UnsupportedKind("object graph"))?;
            self.indices.insert(id, index);
        } else if !self.in_progress.insert(id) {
            return Err(CacheError::CyclicValue {
                type_name: object.descriptor().shared_name(),
            });
        }

        let descriptor = object.descriptor();
        let fields = object.fields();

        self.buf.put_u8(tag::OBJECT);
        self.str(descriptor.name())?;
        self.len(fields.len())?;
        for (name, value) in &fields {
            if !descriptor.declares(name) {
                return Err(CacheError::UndeclaredField {
                    field: name.clone(),
                    type_name: descriptor.shared_name(),
                });
            }
            self.str(name)?;
            self.value(value, depth + 1)?;
        }

        if !self.options.back_references {
            self.in_progress.remove(&id);
        }
        Ok(())
    }

    fn enter(&self, depth: usize) -> Result<(), CacheError> {
        if depth >= self.options.max_depth {
            return Err(CacheError::NestingTooDeep(self.options.max_depth));
        }
        Ok(())
    }

    fn len(&mut self, len: usize) -> Result<(), CacheError> {
        let len = u32::try_from(len).map_err(|_| CacheError::ValueTooLarge {
            size: len,
            limit: u32::MAX as usize,
        })?;
        self.buf.put_u32_le(len);
        Ok(())
    }

    fn str(&mut self, s: &str) -> Result<(), CacheError> {
        self.len(s.len())?;
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }
}
