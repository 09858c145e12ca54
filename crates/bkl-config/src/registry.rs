//! Registry of conflict resolution strategies
//!
//! Provides [`StrategyRegistry`] mapping strategy names to resolvers.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::strategy::{ConflictResolver, DeepMergeResolver, OverwriteResolver};

/// Registry of named conflict resolvers
#[derive(Debug, Default, Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn ConflictResolver>>,
}

impl StrategyRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Create registry with `overwrite` and `deep_merge`
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OverwriteResolver));
        registry.register(Arc::new(DeepMergeResolver::default()));
        registry
    }

    /// Shared registry holding only the built-in strategies
    #[must_use]
    pub fn builtin() -> &'static Self {
        static BUILTIN: OnceLock<StrategyRegistry> = OnceLock::new();
        BUILTIN.get_or_init(Self::with_defaults)
    }

    /// Register a resolver under its name, replacing any previous one
    pub fn register(&mut self, resolver: Arc<dyn ConflictResolver>) {
        self.strategies.insert(resolver.name().to_string(), resolver);
    }

    /// Look up resolver by name
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ConflictResolver>> {
        self.strategies.get(name)
    }

    /// Check if strategy exists
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Remove strategy
    #[inline]
    pub fn remove(&mut self, name: &str) -> bool {
        self.strategies.remove(name).is_some()
    }

    /// List all registered strategy names
    #[inline]
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }

    /// Get number of registered strategies
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigResult;
    use crate::strategy::Resolution;
    use crate::value::ConfigValue;

    #[derive(Debug)]
    struct KeepParent;

    impl ConflictResolver for KeepParent {
        fn name(&self) -> &str {
            "keep_parent"
        }

        fn resolve(
            &self,
            _local: Option<&ConfigValue>,
            parent: Option<&ConfigValue>,
        ) -> ConfigResult<Resolution<Option<ConfigValue>>> {
            Ok(Resolution::ok(parent.cloned()))
        }
    }

    #[test]
    fn registry_new_empty() {
        let registry = StrategyRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn registry_with_defaults() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("overwrite"));
        assert!(registry.contains("deep_merge"));
    }

    #[test]
    fn registry_register_custom() {
        let mut registry = StrategyRegistry::with_defaults();
        registry.register(Arc::new(KeepParent));
        assert!(registry.contains("keep_parent"));
        assert!(registry.names().contains(&"keep_parent"));
    }

    #[test]
    fn registry_remove() {
        let mut registry = StrategyRegistry::with_defaults();
        assert!(registry.remove("deep_merge"));
        assert!(!registry.contains("deep_merge"));
        assert!(!registry.remove("deep_merge"));
    }

    #[test]
    fn builtin_is_shared() {
        assert!(std::ptr::eq(
            StrategyRegistry::builtin(),
            StrategyRegistry::builtin()
        ));
    }
}
