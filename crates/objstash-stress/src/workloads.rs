use std::sync::Arc;

use objstash_service::caching::ObjectStore;
use objstash_service::types::{Object, TypeDescriptor, TypeRegistry, TypeResolver, Value};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    /// Number of distinct keys the workload operates on.
    #[serde(default = "default_keys")]
    pub keys: usize,
    /// Fraction of operations that store a new value instead of fetching.
    #[serde(default = "default_write_ratio")]
    pub write_ratio: f64,
    #[serde(flatten)]
    pub payload: Payload,
}

fn default_keys() -> usize {
    100
}

fn default_write_ratio() -> f64 {
    0.1
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    /// A single immutable two-field object.
    Point {},
    /// A tree of mutable nodes.
    Tree { depth: usize, fanout: usize },
    /// A ring of mutable nodes, encoded with back references.
    ///
    /// Materialized rings are freed once they are superseded and no reference holds them.
    Cycle { length: usize },
}

/// A workload ready to be run against a store.
pub struct ParsedPayload {
    prefix: String,
    keys: usize,
    write_ratio: f64,
    shape: Shape,
}

enum Shape {
    Point(Arc<TypeDescriptor>),
    Tree {
        node: Arc<TypeDescriptor>,
        depth: usize,
        fanout: usize,
    },
    Cycle {
        node: Arc<TypeDescriptor>,
        length: usize,
    },
}

/// Registers the types used by all payloads.
pub fn registry() -> Arc<TypeRegistry> {
    let registry = TypeRegistry::new();
    registry.register(TypeDescriptor::new("Point").with_fields(["x", "y"]).immutable());
    registry.register(TypeDescriptor::new("Node"));
    Arc::new(registry)
}

pub fn prepare_payload(index: usize, registry: &TypeRegistry, workload: Workload) -> ParsedPayload {
    let resolve = |name: &str| {
        registry
            .resolve(name)
            .unwrap_or_else(|| Arc::new(TypeDescriptor::new(name)))
    };
    let shape = match workload.payload {
        Payload::Point {} => Shape::Point(resolve("Point")),
        Payload::Tree { depth, fanout } => Shape::Tree {
            node: resolve("Node"),
            depth,
            fanout,
        },
        Payload::Cycle { length } => Shape::Cycle {
            node: resolve("Node"),
            length: length.max(1),
        },
    };

    ParsedPayload {
        prefix: format!("workload:{index}"),
        keys: workload.keys.max(1),
        write_ratio: workload.write_ratio.clamp(0.0, 1.0),
        shape,
    }
}

impl ParsedPayload {
    fn key(&self, n: usize) -> String {
        format!("{}:{n}", self.prefix)
    }

    fn build(&self, seed: i64) -> Value {
        match &self.shape {
            Shape::Point(point) => Object::new(
                point.clone(),
                [("x", Value::Int(seed)), ("y", Value::Int(-seed))],
            )
            .into(),
            Shape::Tree {
                node,
                depth,
                fanout,
            } => build_tree(node, *depth, *fanout, seed),
            Shape::Cycle { node, length } => {
                let nodes: Vec<_> = (0..*length)
                    .map(|i| Object::new(node.clone(), [("index", Value::Int(i as i64))]))
                    .collect();
                for (i, current) in nodes.iter().enumerate() {
                    let next = nodes[(i + 1) % nodes.len()].clone();
                    // nodes are of an open, mutable type
                    let _ = current.set("next", next.into());
                }
                nodes[0].clone().into()
            }
        }
    }
}

fn build_tree(node: &Arc<TypeDescriptor>, depth: usize, fanout: usize, seed: i64) -> Value {
    let children = if depth == 0 {
        Vec::new()
    } else {
        (0..fanout)
            .map(|_| build_tree(node, depth - 1, fanout, seed))
            .collect()
    };
    Object::new(
        node.clone(),
        [
            ("seed", Value::Int(seed)),
            ("label", Value::string(format!("depth {depth}"))),
            ("children", Value::List(children)),
        ],
    )
    .into()
}

/// Breaks the reference cycle of a ring built by [`ParsedPayload::build`].
fn release(value: &Value) {
    if let Some(object) = value.as_object() {
        if let Some(next) = object.get("next") {
            if next.as_object().is_some() {
                let _ = object.set("next", Value::Null);
            }
        }
    }
}

/// Stores the initial value of every key of the workload.
pub fn warmup(store: &ObjectStore, payload: &ParsedPayload) -> usize {
    let mut stored = 0;
    for n in 0..payload.keys {
        let value = payload.build(n as i64);
        if store.store(payload.key(n), &value).is_ok() {
            stored += 1;
        }
        release(&value);
    }
    stored
}

/// Runs a single operation on a random key.
pub fn process_payload(store: &ObjectStore, payload: &ParsedPayload) {
    let mut rng = rand::rng();
    let n = rng.random_range(0..payload.keys);
    let key = payload.key(n);

    if rng.random_bool(payload.write_ratio) {
        let value = payload.build(rng.random());
        if let Err(err) = store.store(key, &value) {
            tracing::error!(error = %err, "store failed");
        }
        release(&value);
        return;
    }

    match store.fetch(key) {
        Ok(Some(reference)) => {
            std::hint::black_box(reference.value().kind());
        }
        Ok(None) => {}
        Err(err) => tracing::error!(error = %err, "fetch failed"),
    }
}
