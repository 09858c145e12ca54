//! Config resolution over a container hierarchy
//!
//! [`ConfigResolver`] walks from a container up its ancestor chain, applying
//! the governing [`ConfigInheritance`] at each boundary.

use std::sync::{Arc, OnceLock};

use crate::error::ConfigResult;
use crate::inheritance::ConfigInheritance;
use crate::key::{ConfigInheritanceContext, ConfigKey};
use crate::registry::StrategyRegistry;
use crate::strategy::Resolution;
use crate::value::ConfigValue;

/// A key's value as seen at one container
///
/// `key` is the key as declared at that container (it may declare a different
/// inheritance than the query key). `value` is only the explicitly set value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValueAtContainer<C> {
    container: C,
    key: Option<ConfigKey>,
    value: Option<ConfigValue>,
    default_value: Option<ConfigValue>,
}

impl<C> ConfigValueAtContainer<C> {
    /// Create, taking the default from the declared key
    #[must_use]
    pub fn new(container: C, key: Option<ConfigKey>, value: Option<ConfigValue>) -> Self {
        let default_value = key.as_ref().and_then(|k| k.default_value.clone());
        Self {
            container,
            key,
            value,
            default_value,
        }
    }

    /// Replace the explicit value
    #[inline]
    #[must_use]
    pub fn with_value(mut self, value: Option<ConfigValue>) -> Self {
        self.value = value;
        self
    }

    /// Replace the default value
    #[inline]
    #[must_use]
    pub fn with_default_value(mut self, default_value: Option<ConfigValue>) -> Self {
        self.default_value = default_value;
        self
    }

    /// Container holding the value
    #[inline]
    #[must_use]
    pub fn container(&self) -> &C {
        &self.container
    }

    /// Key as declared at the container
    #[inline]
    #[must_use]
    pub fn key(&self) -> Option<&ConfigKey> {
        self.key.as_ref()
    }

    /// Whether a value was explicitly set
    #[inline]
    #[must_use]
    pub fn is_value_explicitly_set(&self) -> bool {
        self.value.is_some()
    }

    /// Explicit value only
    #[inline]
    #[must_use]
    pub fn as_maybe(&self) -> Option<&ConfigValue> {
        self.value.as_ref()
    }

    /// Default value only
    #[inline]
    #[must_use]
    pub fn default_value(&self) -> Option<&ConfigValue> {
        self.default_value.as_ref()
    }

    /// Explicit value, else default
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&ConfigValue> {
        self.value.as_ref().or(self.default_value.as_ref())
    }

    /// Take explicit value, else default
    #[inline]
    pub fn into_value(self) -> Option<ConfigValue> {
        self.value.or(self.default_value)
    }
}

/// Resolves config values through ancestor chains
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    registry: Arc<StrategyRegistry>,
    default_inheritance: ConfigInheritance,
    context: ConfigInheritanceContext,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new(ConfigInheritance::Overwrite)
    }
}

impl ConfigResolver {
    /// Create resolver for runtime containers with the given container-type
    /// default inheritance
    #[must_use]
    pub fn new(default_inheritance: ConfigInheritance) -> Self {
        Self {
            registry: Arc::new(StrategyRegistry::with_defaults()),
            default_inheritance,
            context: ConfigInheritanceContext::RuntimeManagement,
        }
    }

    /// Shared resolver: `OVERWRITE` default, runtime context, built-in
    /// strategies
    #[must_use]
    pub fn shared_default() -> &'static Self {
        static DEFAULT: OnceLock<ConfigResolver> = OnceLock::new();
        DEFAULT.get_or_init(Self::default)
    }

    /// Use a custom strategy registry
    #[inline]
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<StrategyRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Use a different inheritance context
    #[inline]
    #[must_use]
    pub fn with_context(mut self, context: ConfigInheritanceContext) -> Self {
        self.context = context;
        self
    }

    /// Strategy registry in use
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Resolve `query_key` at `local` given its ancestors, nearest first
    ///
    /// The returned container holds the resolved value as its explicit value;
    /// a non-fatal merge problem anywhere on the chain is attached as the
    /// resolution's error.
    ///
    /// # Errors
    /// Returns fatal errors: contract violations, unknown strategies and
    /// cyclic values
    pub fn resolve<C: Clone>(
        &self,
        local: &ConfigValueAtContainer<C>,
        ancestors: impl IntoIterator<Item = ConfigValueAtContainer<C>>,
        query_key: &ConfigKey,
    ) -> ConfigResult<Resolution<ConfigValueAtContainer<C>>> {
        let ancestors: Vec<_> = ancestors.into_iter().collect();
        self.resolve_inheriting(local, &ancestors, query_key, &self.default_inheritance)
    }

    /// As [`Self::resolve`], returning only the value
    ///
    /// # Errors
    /// See [`Self::resolve`]
    pub fn resolve_value<C: Clone>(
        &self,
        local: &ConfigValueAtContainer<C>,
        ancestors: impl IntoIterator<Item = ConfigValueAtContainer<C>>,
        query_key: &ConfigKey,
    ) -> ConfigResult<Resolution<Option<ConfigValue>>> {
        Ok(self
            .resolve(local, ancestors, query_key)?
            .map(ConfigValueAtContainer::into_value))
    }

    fn resolve_inheriting<C: Clone>(
        &self,
        local: &ConfigValueAtContainer<C>,
        ancestors: &[ConfigValueAtContainer<C>],
        query_key: &ConfigKey,
        default_inheritance: &ConfigInheritance,
    ) -> ConfigResult<Resolution<ConfigValueAtContainer<C>>> {
        if let Some((parent, rest)) = ancestors.split_first() {
            let parent_inheritance = declared_inheritance(parent, self.context);
            let passes_through = parent_inheritance
                .map_or(true, |inheritance| inheritance.is_reinheritable(parent, self.context));
            if passes_through {
                let current = declared_inheritance(local, self.context)
                    .or_else(|| query_key.inheritance_by_context(self.context))
                    .unwrap_or(default_inheritance);
                if current.consider_parent(local, Some(parent), self.context) {
                    let (parent_result, parent_error) = self
                        .resolve_inheriting(parent, rest, query_key, current)?
                        .into_parts();
                    let combined = current.resolve_with_parent_using(
                        &self.registry,
                        local,
                        &parent_result,
                        self.context,
                    )?;
                    if combined.value().is_value_explicitly_set() {
                        return Ok(match parent_error {
                            Some(error) if !combined.has_error() => {
                                Resolution::with_error(combined.into_value(), error)
                            }
                            _ => combined,
                        });
                    }
                }
            }
        }

        let mut result = local.clone();
        if !result.is_value_explicitly_set() {
            let default_value = result.default_value().cloned();
            result = result.with_value(default_value);
        }
        Ok(Resolution::ok(result))
    }
}

fn declared_inheritance<C>(
    at: &ConfigValueAtContainer<C>,
    context: ConfigInheritanceContext,
) -> Option<&ConfigInheritance> {
    at.key().and_then(|key| key.inheritance_by_context(context))
}
