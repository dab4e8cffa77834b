//! Error types for Cordon
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Two layers:
//! - [`StoreError`]: faults raised by the store collaborator itself
//! - [`Error`]: everything an operation on a result set can fail with,
//!   store faults included verbatim

use thiserror::Error;

/// Result type alias for Cordon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for store collaborator calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Faults raised at the storage boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Underlying data is corrupted
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A schema or uniqueness constraint would be violated
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A value or object had a different type than the operation required
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Type name actually found
        found: String,
    },

    /// A predicate or sort descriptor named an unknown property
    #[error("Invalid key path '{path}' for type {type_name}")]
    InvalidKeyPath {
        /// Object type the path was resolved against
        type_name: &'static str,
        /// The offending key path
        path: String,
    },

    /// The object was deleted or its context was torn down
    #[error("Object has been deleted or invalidated")]
    InvalidatedObject,

    /// A mutation was attempted outside a write transaction
    #[error("Cannot modify the store outside of a write transaction")]
    NotInWrite,

    /// A write transaction was opened while one is already in progress
    #[error("A write transaction is already in progress")]
    AlreadyInWrite,

    /// The store context was closed
    #[error("Store context has been torn down")]
    ContextTornDown,
}

/// Error types for result-set operations
#[derive(Debug, Error)]
pub enum Error {
    /// Home context was torn down before or while the body executed
    #[error("Home context is unavailable")]
    ContextUnavailable,

    /// An explicit emptiness check failed
    #[error("Result set is empty")]
    EmptyResult,

    /// A frozen snapshot was thawed after its originating context closed
    #[error("Snapshot origin no longer exists")]
    InvalidatedSnapshot,

    /// Fault raised by the store, propagated verbatim
    #[error("Store fault: {0}")]
    StoreFault(#[from] StoreError),

    /// Home-context queue is at capacity
    #[error("Home context queue is full (capacity: {capacity})")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A caller-supplied closure failed and aborted the operation
    #[error("Callback failed: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an InvalidOperation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }

    /// Wrap an error raised by a caller-supplied closure
    pub fn callback<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Callback(err.into())
    }

    /// Whether the caller can reasonably continue after this error.
    ///
    /// `EmptyResult` and `InvalidatedSnapshot` are expected outcomes the
    /// caller handles (re-query, show an empty state). Everything else is
    /// fatal to the operation that raised it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::EmptyResult | Error::InvalidatedSnapshot | Error::QueueFull { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_context_unavailable() {
        let msg = Error::ContextUnavailable.to_string();
        assert!(msg.contains("unavailable"));
    }

    #[test]
    fn test_error_display_store_fault() {
        let err = Error::from(StoreError::Corruption("bad page".to_string()));
        let msg = err.to_string();
        assert!(msg.contains("Store fault"));
        assert!(msg.contains("bad page"));
    }

    #[test]
    fn test_error_display_invalid_key_path() {
        let err = StoreError::InvalidKeyPath {
            type_name: "Company",
            path: "nmae".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("nmae"));
        assert!(msg.contains("Company"));
    }

    #[test]
    fn test_error_from_store_error() {
        let err: Error = StoreError::NotInWrite.into();
        assert!(matches!(err, Error::StoreFault(StoreError::NotInWrite)));
    }

    #[test]
    fn test_callback_wraps_message() {
        let err = Error::callback("boom");
        assert!(matches!(err, Error::Callback(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_recoverable_taxonomy() {
        assert!(Error::EmptyResult.is_recoverable());
        assert!(Error::InvalidatedSnapshot.is_recoverable());
        assert!(!Error::ContextUnavailable.is_recoverable());
        assert!(!Error::StoreFault(StoreError::Corruption("x".into())).is_recoverable());
    }
}
