//! Error types for persistence and rebind

use std::fmt;

use bkl_config::ConfigError;
use bkl_core::{BrooklynObjectType, ModelError};
use bkl_memento::MementoError;

use crate::exception::FailureCategory;
use crate::ha::ManagementNodeState;
use crate::phase::RebindPhase;

/// Object store error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying I/O failed
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// Store path
        path: String,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// Path escapes the store or is malformed
    #[error("invalid store path '{0}'")]
    InvalidPath(String),
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// One failure reported to a rebind exception handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebindFailure {
    /// Failure category, selecting the failure mode
    pub category: FailureCategory,
    /// Type of the object concerned
    pub kind: BrooklynObjectType,
    /// Id of the object concerned
    pub id: String,
    /// What went wrong
    pub message: String,
}

impl RebindFailure {
    /// Create failure
    #[must_use]
    pub fn new(
        category: FailureCategory,
        kind: BrooklynObjectType,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            kind,
            id: id.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RebindFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} ({})",
            self.kind, self.id, self.message, self.category
        )
    }
}

/// Rebind error type
#[derive(Debug, thiserror::Error)]
pub enum RebindError {
    /// Object store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Memento could not be written or read
    #[error(transparent)]
    Memento(#[from] MementoError),

    /// Object model refused an operation
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Config resolution failed
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Single failure under fail-fast
    #[error("rebind failed: {0}")]
    Failure(RebindFailure),

    /// Failures accumulated under fail-at-end
    #[error("rebind failed with {} error(s): {}", .0.len(), join_failures(.0))]
    Aggregate(Vec<RebindFailure>),

    /// Phase machine misuse
    #[error("illegal rebind phase transition {from} -> {to}")]
    IllegalPhase {
        /// Current phase
        from: RebindPhase,
        /// Requested phase
        to: RebindPhase,
    },

    /// HA node state machine misuse
    #[error("illegal node state transition {from} -> {to}")]
    IllegalNodeState {
        /// Current state
        from: ManagementNodeState,
        /// Requested state
        to: ManagementNodeState,
    },

    /// Management plane record could not be read or written
    #[error("invalid management plane record: {0}")]
    PlaneRecord(String),

    /// Configuration could not be parsed
    #[error("invalid rebind configuration: {0}")]
    InvalidConfig(String),

    /// Caller broke a contract
    #[error("illegal state: {0}")]
    IllegalState(String),
}

impl RebindError {
    /// Failures carried by this error, if it came from the exception handler
    #[must_use]
    pub fn failures(&self) -> &[RebindFailure] {
        match self {
            Self::Failure(failure) => std::slice::from_ref(failure),
            Self::Aggregate(failures) => failures,
            _ => &[],
        }
    }
}

fn join_failures(failures: &[RebindFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias for rebind operations
pub type RebindResult<T> = Result<T, RebindError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_lists_every_failure() {
        let err = RebindError::Aggregate(vec![
            RebindFailure::new(FailureCategory::DanglingRef, BrooklynObjectType::Location, "l1", "missing"),
            RebindFailure::new(FailureCategory::DanglingRef, BrooklynObjectType::Location, "l2", "missing"),
        ]);
        let text = err.to_string();
        assert!(text.contains("2 error(s)"));
        assert!(text.contains("l1"));
        assert!(text.contains("l2"));
        assert_eq!(err.failures().len(), 2);
    }
}
