//! Error types for config resolution
//!
//! Covers:
//! - Programming-contract violations (wrong inheritance invoked, unknown strategy)
//! - Non-fatal merge failures reported on a resolution's error channel
//! - Parsing of config maps and inheritance modes

/// Config error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Caller broke a contract of the resolution API
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Unparseable config-inheritance mode
    #[error("Invalid config-inheritance '{0}' (legal values are none, always or deep_merge)")]
    InvalidInheritance(String),

    /// A value is reachable from itself
    #[error("recursive self-reference detected while walking {0}")]
    RecursiveSelfReference(String),

    /// Two values cannot be combined; the first is kept
    #[error("Cannot merge '{first}' and '{second}'")]
    Unmergeable {
        /// Value that was kept
        first: String,
        /// Value that was dropped
        second: String,
    },

    /// Merge depth must be positive
    #[error("invalid merge depth {0}: must be at least 1")]
    InvalidMergeDepth(usize),

    /// Value does not match the key's declared type
    #[error("config key '{key}' expects {expected}, got {actual}")]
    TypeMismatch {
        /// Key name
        key: String,
        /// Declared value type
        expected: String,
        /// Offending value
        actual: String,
    },

    /// JSON input could not be parsed
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// YAML input could not be parsed
    #[error("invalid YAML: {0}")]
    InvalidYaml(String),

    /// Value could not be serialized or converted
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl ConfigError {
    /// Create illegal state error
    #[inline]
    #[must_use]
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Check if this error is a contract violation that must never be swallowed
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IllegalState(_) | Self::RecursiveSelfReference(_) | Self::InvalidMergeDepth(_)
        )
    }
}

/// Result alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_inheritance_message() {
        let err = ConfigError::InvalidInheritance("sideways".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid config-inheritance 'sideways' (legal values are none, always or deep_merge)"
        );
    }

    #[test]
    fn fatal_classification() {
        assert!(ConfigError::illegal_state("x").is_fatal());
        assert!(!ConfigError::Unmergeable {
            first: "1".into(),
            second: "{}".into()
        }
        .is_fatal());
    }
}
