use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Type metadata supplied by the host type system.
///
/// The cache never infers immutability itself: the `is_immutable` flag is taken as given, and
/// is captured on every object that is constructed or reconstructed with this descriptor.
#[derive(Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    name: Arc<str>,
    fields: Vec<Arc<str>>,
    is_immutable: bool,
}

impl TypeDescriptor {
    /// Creates an open, mutable type without a declared field schema.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            is_immutable: false,
        }
    }

    /// Declares the field schema of this type.
    ///
    /// A type with a non-empty schema is "closed": objects of it may only carry declared fields.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Marks this type as immutable.
    pub fn immutable(mut self) -> Self {
        self.is_immutable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn fields(&self) -> &[Arc<str>] {
        &self.fields
    }

    pub fn is_immutable(&self) -> bool {
        self.is_immutable
    }

    /// Whether objects of this type may carry a field with the given name.
    pub fn declares(&self, field: &str) -> bool {
        self.fields.is_empty() || self.fields.iter().any(|f| &**f == field)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("is_immutable", &self.is_immutable)
            .finish()
    }
}

/// Resolves encoded type names back to [`TypeDescriptor`]s when decoding.
pub trait TypeResolver: Send + Sync {
    /// Returns the descriptor for `name`, or `None` if the type is unknown.
    fn resolve(&self, name: &str) -> Option<Arc<TypeDescriptor>>;
}

impl<F> TypeResolver for F
where
    F: Fn(&str) -> Option<Arc<TypeDescriptor>> + Send + Sync,
{
    fn resolve(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self(name)
    }
}

/// A thread-safe table of registered types.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<Arc<str>, Arc<TypeDescriptor>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type, replacing any previous descriptor of the same name.
    ///
    /// Objects that were already constructed or materialized keep the descriptor they were
    /// created with.
    pub fn register(&self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.types
            .write()
            .unwrap()
            .insert(descriptor.shared_name(), Arc::clone(&descriptor));
        descriptor
    }

    /// Removes a type, returning whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.types.write().unwrap().remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.types.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TypeResolver for TypeRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.read().unwrap().get(name).cloned()
    }
}

/// Resolves every type name to an open, mutable type.
///
/// This is meant for tooling that needs to look at stored values without having access to the
/// type system that produced them.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnyTypeResolver;

impl TypeResolver for AnyTypeResolver {
    fn resolve(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        Some(Arc::new(TypeDescriptor::new(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        let registry = TypeRegistry::new();
        assert!(registry.resolve("Point").is_none());

        registry.register(TypeDescriptor::new("Point").with_fields(["x", "y"]).immutable());
        let point = registry.resolve("Point").unwrap();
        assert_eq!(point.name(), "Point");
        assert!(point.is_immutable());
        assert!(point.declares("x"));
        assert!(!point.declares("z"));

        // re-registering replaces the descriptor, but not the ones already handed out
        registry.register(TypeDescriptor::new("Point"));
        assert!(!registry.resolve("Point").unwrap().is_immutable());
        assert!(point.is_immutable());

        assert!(registry.unregister("Point"));
        assert!(!registry.unregister("Point"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_open_types() {
        let open = TypeDescriptor::new("Bag");
        assert!(open.declares("anything"));

        let resolver = |name: &str| (name == "Bag").then(|| Arc::new(TypeDescriptor::new("Bag")));
        assert!(resolver.resolve("Bag").is_some());
        assert!(resolver.resolve("Box").is_none());

        let any = AnyTypeResolver.resolve("Whatever").unwrap();
        assert!(!any.is_immutable());
        assert!(any.fields().is_empty());
    }
}
