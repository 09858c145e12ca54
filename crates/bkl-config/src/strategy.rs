//! Conflict resolution strategies
//!
//! A [`ConflictResolver`] combines a local value with an ancestor's value
//! once the inheritance has decided that both participate.

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::CollectionMerger;
use crate::value::ConfigValue;

/// Strategy name for "local replaces ancestor"
pub const CONFLICT_RESOLUTION_STRATEGY_OVERWRITE: &str = "overwrite";

/// Strategy name for structural merge of local into ancestor
pub const CONFLICT_RESOLUTION_STRATEGY_DEEP_MERGE: &str = "deep_merge";

/// A value paired with an optional non-fatal error
///
/// Fatal problems are returned as `Err`; the error carried here describes a
/// degraded but usable result.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<T> {
    value: T,
    error: Option<ConfigError>,
}

impl<T> Resolution<T> {
    /// Result without error
    #[inline]
    #[must_use]
    pub fn ok(value: T) -> Self {
        Self { value, error: None }
    }

    /// Result with a non-fatal error attached
    #[inline]
    #[must_use]
    pub fn with_error(value: T, error: ConfigError) -> Self {
        Self {
            value,
            error: Some(error),
        }
    }

    /// The value, ignoring any error
    #[inline]
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Attached error
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&ConfigError> {
        self.error.as_ref()
    }

    /// Check for attached error
    #[inline]
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split into value and error
    #[inline]
    pub fn into_parts(self) -> (T, Option<ConfigError>) {
        (self.value, self.error)
    }

    /// Take the value, discarding any error
    #[inline]
    pub fn into_value(self) -> T {
        self.value
    }

    /// Take the value, turning an attached error into `Err`
    ///
    /// # Errors
    /// Returns the attached error if present
    pub fn into_result(self) -> ConfigResult<T> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.value),
        }
    }

    /// Transform the value, keeping the error
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolution<U> {
        Resolution {
            value: f(self.value),
            error: self.error,
        }
    }
}

/// Combines local and ancestor values
pub trait ConflictResolver: Send + Sync + std::fmt::Debug {
    /// Strategy name as stored in inheritance records
    fn name(&self) -> &str;

    /// Combine values
    ///
    /// `None` means the side has no value. Unmergeable inputs should produce a
    /// result with an attached error rather than `Err`.
    ///
    /// # Errors
    /// Returns `Err` only for fatal problems such as cyclic input
    fn resolve(
        &self,
        local: Option<&ConfigValue>,
        parent: Option<&ConfigValue>,
    ) -> ConfigResult<Resolution<Option<ConfigValue>>>;
}

/// Local value replaces ancestor value
#[derive(Debug, Clone, Copy, Default)]
pub struct OverwriteResolver;

impl ConflictResolver for OverwriteResolver {
    fn name(&self) -> &str {
        CONFLICT_RESOLUTION_STRATEGY_OVERWRITE
    }

    fn resolve(
        &self,
        local: Option<&ConfigValue>,
        _parent: Option<&ConfigValue>,
    ) -> ConfigResult<Resolution<Option<ConfigValue>>> {
        Ok(Resolution::ok(local.cloned()))
    }
}

/// Local map merged over ancestor map
#[derive(Debug, Clone, Copy, Default)]
pub struct DeepMergeResolver {
    merger: CollectionMerger,
}

impl DeepMergeResolver {
    /// Create with custom merge settings
    #[inline]
    #[must_use]
    pub fn new(merger: CollectionMerger) -> Self {
        Self { merger }
    }
}

impl ConflictResolver for DeepMergeResolver {
    fn name(&self) -> &str {
        CONFLICT_RESOLUTION_STRATEGY_DEEP_MERGE
    }

    fn resolve(
        &self,
        local: Option<&ConfigValue>,
        parent: Option<&ConfigValue>,
    ) -> ConfigResult<Resolution<Option<ConfigValue>>> {
        let parent = match parent {
            None | Some(ConfigValue::Null) => return Ok(Resolution::ok(local.cloned())),
            Some(parent) => parent,
        };
        let local = match local {
            None => return Ok(Resolution::ok(Some(parent.clone()))),
            Some(ConfigValue::Null) => return Ok(Resolution::ok(Some(ConfigValue::Null))),
            Some(local) => local,
        };
        match self.merger.merge_if_mappings(local, parent)? {
            Some(merged) => Ok(Resolution::ok(Some(merged))),
            None => {
                debug!(
                    local = local.type_label(),
                    parent = parent.type_label(),
                    "unmergeable values, keeping local"
                );
                Ok(Resolution::with_error(
                    Some(local.clone()),
                    ConfigError::Unmergeable {
                        first: local.to_string(),
                        second: parent.to_string(),
                    },
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_keeps_local() {
        let local = ConfigValue::from("mine");
        let parent = ConfigValue::from("theirs");
        let result = OverwriteResolver
            .resolve(Some(&local), Some(&parent))
            .unwrap();
        assert_eq!(result.into_value(), Some(local));
    }

    #[test]
    fn deep_merge_unions_maps() {
        let local = ConfigValue::map([("a", 1), ("b", 2)]);
        let parent = ConfigValue::map([("b", 3), ("c", 4)]);
        let result = DeepMergeResolver::default()
            .resolve(Some(&local), Some(&parent))
            .unwrap();
        assert!(!result.has_error());
        assert_eq!(
            result.into_value(),
            Some(ConfigValue::map([("a", 1), ("b", 2), ("c", 4)]))
        );
    }

    #[test]
    fn deep_merge_local_null_blocks() {
        let parent = ConfigValue::map([("a", 1)]);
        let result = DeepMergeResolver::default()
            .resolve(Some(&ConfigValue::Null), Some(&parent))
            .unwrap();
        assert_eq!(result.into_value(), Some(ConfigValue::Null));
    }

    #[test]
    fn deep_merge_absent_sides() {
        let v = ConfigValue::map([("a", 1)]);
        let resolver = DeepMergeResolver::default();
        assert_eq!(
            resolver.resolve(None, Some(&v)).unwrap().into_value(),
            Some(v.clone())
        );
        assert_eq!(
            resolver
                .resolve(Some(&v), Some(&ConfigValue::Null))
                .unwrap()
                .into_value(),
            Some(v)
        );
    }

    #[test]
    fn deep_merge_scalar_vs_map_is_soft_error() {
        let local = ConfigValue::from(1);
        let parent = ConfigValue::map([("a", 1)]);
        let result = DeepMergeResolver::default()
            .resolve(Some(&local), Some(&parent))
            .unwrap();
        assert_eq!(result.value(), &Some(local));
        assert!(matches!(
            result.error(),
            Some(ConfigError::Unmergeable { .. })
        ));
    }
}
