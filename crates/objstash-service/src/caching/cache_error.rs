use std::sync::Arc;

use thiserror::Error;

/// An error raised by the object store, its codec, or a write to a stored object.
///
/// All errors are reported synchronously to the caller and none of them are retried.
/// Absence of a key is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The store was used before [`initialize`](super::ObjectStore::initialize) or after
    /// [`teardown`](super::ObjectStore::teardown).
    #[error("object store is not initialized")]
    NotInitialized,
    /// The value contains a kind that can not be encoded.
    #[error("can not serialize a value of kind `{0}`")]
    UnsupportedKind(&'static str),
    /// The value contains a cycle, and back references are disabled.
    #[error("cyclic reference to an object of type `{type_name}`")]
    CyclicValue { type_name: Arc<str> },
    /// The encoded value exceeds the configured size limit.
    #[error("encoded value of {size} bytes exceeds the limit of {limit} bytes")]
    ValueTooLarge { size: usize, limit: usize },
    /// The value is nested deeper than the configured limit.
    #[error("value is nested deeper than {0} levels")]
    NestingTooDeep(usize),
    /// An object carries a field that its type does not declare.
    #[error("type `{type_name}` does not declare field `{field}`")]
    UndeclaredField { field: Arc<str>, type_name: Arc<str> },
    /// The encoded bytes are structurally invalid.
    ///
    /// The attached string describes the first problem that was encountered.
    #[error("corrupt data: {0}")]
    Corrupt(String),
    /// The encoded bytes refer to a type that the resolver does not know.
    #[error("unknown type `{0}`")]
    UnknownType(String),
    /// A field of an object of an immutable type was written.
    #[error("cannot modify field `{field}` of immutable type `{type_name}`")]
    ImmutableWrite { field: Arc<str>, type_name: Arc<str> },
    /// A field write was attempted on a value that is not an object.
    #[error("cannot write fields of a value of kind `{0}`")]
    NotAnObject(&'static str),
    /// An unexpected error in objstash itself, such as a failing file system operation.
    ///
    /// The underlying error is logged where it happens.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    /// Whether this error happened while encoding a value.
    ///
    /// A failed `store` reports one of these, and leaves the previous entry untouched.
    pub fn is_serialization_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedKind(_)
                | Self::CyclicValue { .. }
                | Self::ValueTooLarge { .. }
                | Self::NestingTooDeep(_)
                | Self::UndeclaredField { .. }
        )
    }

    /// Whether this error happened while decoding stored bytes.
    pub fn is_deserialization_error(&self) -> bool {
        matches!(self, Self::Corrupt(_) | Self::UnknownType(_))
    }

    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt(reason.into())
    }

    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}
