//! BKL Config
//!
//! Config keys, values and hierarchical config-inheritance resolution.
//!
//! # Core Concepts
//!
//! - [`ConfigValue`]: Dynamically-typed value, possibly shared or deferred
//! - [`ConfigKey`]: Named slot with type, default and inheritance per context
//! - [`ConfigInheritance`]: Whether and how an ancestor's value reaches a descendant
//! - [`ConfigResolver`]: Walks an ancestor chain applying inheritance at each boundary
//! - [`CollectionMerger`]: Structural map merge used by `deep_merge`
//! - [`StrategyRegistry`]: Named conflict resolvers, extensible with custom ones
//!
//! # Example
//!
//! ```rust,ignore
//! use bkl_config::{ConfigInheritance, ConfigKey, ConfigResolver, ConfigValue, ConfigValueAtContainer};
//!
//! let key = ConfigKey::new("env").with_runtime_inheritance(ConfigInheritance::DeepMerge);
//! let local = ConfigValueAtContainer::new("child", Some(key.clone()), Some(ConfigValue::map([("a", 1)])));
//! let parent = ConfigValueAtContainer::new("parent", Some(key.clone()), Some(ConfigValue::map([("b", 2)])));
//!
//! let resolved = ConfigResolver::shared_default().resolve_value(&local, [parent], &key)?;
//! assert_eq!(resolved.into_value(), Some(ConfigValue::map([("a", 1), ("b", 2)])));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod error;
mod inheritance;
mod key;
mod map;
mod merge;
mod registry;
mod resolve;
mod strategy;
mod value;

// Re-exports
pub use error::{ConfigError, ConfigResult};
pub use inheritance::{ConfigInheritance, ConflictStrategy, InheritanceRecord, InheritanceSpec};
pub use key::{ConfigInheritanceContext, ConfigKey, ValueType};
pub use map::ConfigMap;
pub use merge::CollectionMerger;
pub use registry::StrategyRegistry;
pub use resolve::{ConfigResolver, ConfigValueAtContainer};
pub use strategy::{
    ConflictResolver, DeepMergeResolver, OverwriteResolver, Resolution,
    CONFLICT_RESOLUTION_STRATEGY_DEEP_MERGE, CONFLICT_RESOLUTION_STRATEGY_OVERWRITE,
};
pub use value::{ConfigValue, ConfigValueMap, SharedValue, TaskHandle, TaskState};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
