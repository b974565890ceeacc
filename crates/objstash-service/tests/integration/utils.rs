use std::sync::Arc;

use objstash_service::caching::ObjectStore;
use objstash_service::config::StoreConfig;
use objstash_service::types::{Object, TypeDescriptor, TypeRegistry, TypeResolver, Value};
use objstash_test as test;

/// Creates a registry with an immutable `Point { x, y }` and an open, mutable `Node` type.
pub fn registry() -> Arc<TypeRegistry> {
    let registry = TypeRegistry::new();
    registry.register(
        TypeDescriptor::new("Point")
            .with_fields(["x", "y"])
            .immutable(),
    );
    registry.register(TypeDescriptor::new("Node"));
    Arc::new(registry)
}

/// Setup tests and create an initialized store.
///
/// The `update_config` closure can modify the default configuration before the store is
/// initialized.
pub fn setup_store(
    update_config: impl FnOnce(&mut StoreConfig),
) -> (Arc<ObjectStore>, Arc<TypeRegistry>) {
    test::setup();

    let mut config = StoreConfig::default();
    update_config(&mut config);

    let registry = registry();
    let store = ObjectStore::new(config, registry.clone());
    store.initialize().unwrap();
    (Arc::new(store), registry)
}

pub fn point(registry: &TypeRegistry, x: i64, y: i64) -> Value {
    let ty = registry.resolve("Point").unwrap();
    Object::new(ty, [("x", Value::Int(x)), ("y", Value::Int(y))]).into()
}

/// Creates a ring of `length` mutable nodes, each pointing to the next.
pub fn ring(registry: &TypeRegistry, length: usize) -> Value {
    let ty = registry.resolve("Node").unwrap();
    let nodes: Vec<_> = (0..length)
        .map(|i| Object::new(ty.clone(), [("i", Value::Int(i as i64))]))
        .collect();
    for (i, node) in nodes.iter().enumerate() {
        let next = nodes[(i + 1) % length].clone();
        node.set("next", next.into()).unwrap();
    }
    nodes[0].clone().into()
}
