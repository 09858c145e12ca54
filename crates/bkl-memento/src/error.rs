//! Error types for memento generation and serialization

use bkl_core::BrooklynObjectType;

/// Memento error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum MementoError {
    /// Caller broke a contract (e.g. passed a proxy)
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Memento could not be written
    #[error("failed to serialize {kind} {id}: {message}")]
    Serialization {
        /// Object type
        kind: BrooklynObjectType,
        /// Object id
        id: String,
        /// Underlying error
        message: String,
    },

    /// Persisted text could not be read
    #[error("failed to deserialize {kind} memento: {message}")]
    Deserialization {
        /// Object type
        kind: BrooklynObjectType,
        /// Underlying error
        message: String,
    },

    /// Persisted adjunct kind does not match its category
    #[error("memento {id} is a {actual}, stored as {expected}")]
    KindMismatch {
        /// Memento id
        id: String,
        /// Category it was stored under
        expected: BrooklynObjectType,
        /// Kind recorded in the memento
        actual: BrooklynObjectType,
    },
}

/// Result alias for memento operations
pub type MementoResult<T> = Result<T, MementoError>;
