//! Config inheritance modes
//!
//! A [`ConfigInheritance`] decides, at one descendant/ancestor boundary,
//! whether an ancestor's value is visible to the descendant and how the two
//! combine. The five named modes are immutable static data; anything else is
//! carried as [`ConfigInheritance::Custom`].
//!
//! # Persisted form
//!
//! Named modes serialize as their lowercase name. Custom modes serialize as an
//! [`InheritanceRecord`], which also accepts the legacy `useLocalDefaultValue`
//! field.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::key::ConfigInheritanceContext;
use crate::registry::StrategyRegistry;
use crate::resolve::ConfigValueAtContainer;
use crate::strategy::{
    Resolution, CONFLICT_RESOLUTION_STRATEGY_DEEP_MERGE, CONFLICT_RESOLUTION_STRATEGY_OVERWRITE,
};

/// How local and ancestor values combine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConflictStrategy {
    /// Local replaces ancestor
    Overwrite,
    /// Local maps merged over ancestor maps
    DeepMerge,
    /// Strategy looked up by name in a [`StrategyRegistry`]
    Custom(String),
}

impl ConflictStrategy {
    /// Parse a strategy name
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            CONFLICT_RESOLUTION_STRATEGY_OVERWRITE => Self::Overwrite,
            CONFLICT_RESOLUTION_STRATEGY_DEEP_MERGE => Self::DeepMerge,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Strategy name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Overwrite => CONFLICT_RESOLUTION_STRATEGY_OVERWRITE,
            Self::DeepMerge => CONFLICT_RESOLUTION_STRATEGY_DEEP_MERGE,
            Self::Custom(name) => name,
        }
    }
}

/// The four parameters fully describing an inheritance mode
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InheritanceSpec {
    /// Whether a value passed through an intermediate container continues
    /// further down
    pub reinherited: bool,
    /// How local and ancestor values combine
    pub strategy: ConflictStrategy,
    /// Whether a local default participates in combination like an explicit
    /// value
    pub local_default_resolves_with_ancestor_value: bool,
    /// Whether ancestor defaults are visible to descendants
    pub ancestor_default_inheritable: bool,
}

static NOT_REINHERITED_SPEC: InheritanceSpec = InheritanceSpec {
    reinherited: false,
    strategy: ConflictStrategy::Overwrite,
    local_default_resolves_with_ancestor_value: false,
    ancestor_default_inheritable: true,
};

static NOT_REINHERITED_ELSE_DEEP_MERGE_SPEC: InheritanceSpec = InheritanceSpec {
    reinherited: false,
    strategy: ConflictStrategy::DeepMerge,
    local_default_resolves_with_ancestor_value: false,
    ancestor_default_inheritable: true,
};

static NEVER_INHERITED_SPEC: InheritanceSpec = InheritanceSpec {
    reinherited: false,
    strategy: ConflictStrategy::Overwrite,
    local_default_resolves_with_ancestor_value: true,
    ancestor_default_inheritable: false,
};

static OVERWRITE_SPEC: InheritanceSpec = InheritanceSpec {
    reinherited: true,
    strategy: ConflictStrategy::Overwrite,
    local_default_resolves_with_ancestor_value: false,
    ancestor_default_inheritable: true,
};

static DEEP_MERGE_SPEC: InheritanceSpec = InheritanceSpec {
    reinherited: true,
    strategy: ConflictStrategy::DeepMerge,
    local_default_resolves_with_ancestor_value: false,
    ancestor_default_inheritable: true,
};

/// Inheritance mode of a config key
///
/// Equality and hashing are structural: a `Custom` whose spec matches a named
/// mode equals that mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "PersistedInheritance", into = "PersistedInheritance")]
pub enum ConfigInheritance {
    /// Inherited from the direct parent only; not passed further down
    NotReinherited,
    /// As [`Self::NotReinherited`] but merging maps
    NotReinheritedElseDeepMerge,
    /// Never inherited; local default applies instead
    NeverInherited,
    /// Inherited at any depth; local value replaces
    Overwrite,
    /// Inherited at any depth; maps merged
    DeepMerge,
    /// Any other combination
    Custom(InheritanceSpec),
}

impl ConfigInheritance {
    /// Named modes, in declaration order
    pub const CANONICAL: [Self; 5] = [
        Self::NotReinherited,
        Self::NotReinheritedElseDeepMerge,
        Self::NeverInherited,
        Self::Overwrite,
        Self::DeepMerge,
    ];

    /// Parameters of this mode
    #[must_use]
    pub fn spec(&self) -> &InheritanceSpec {
        match self {
            Self::NotReinherited => &NOT_REINHERITED_SPEC,
            Self::NotReinheritedElseDeepMerge => &NOT_REINHERITED_ELSE_DEEP_MERGE_SPEC,
            Self::NeverInherited => &NEVER_INHERITED_SPEC,
            Self::Overwrite => &OVERWRITE_SPEC,
            Self::DeepMerge => &DEEP_MERGE_SPEC,
            Self::Custom(spec) => spec,
        }
    }

    /// Build from parameters, normalizing to a named mode where one matches
    #[must_use]
    pub fn from_spec(spec: InheritanceSpec) -> Self {
        Self::CANONICAL
            .into_iter()
            .find(|named| *named.spec() == spec)
            .unwrap_or(Self::Custom(spec))
    }

    /// Normalize to a named mode where possible
    #[must_use]
    pub fn canonicalize(&self) -> Self {
        match self {
            Self::Custom(spec) => Self::from_spec(spec.clone()),
            named => named.clone(),
        }
    }

    /// Persisted name of the equivalent named mode, if any
    #[must_use]
    pub fn canonical_name(&self) -> Option<&'static str> {
        match self.canonicalize() {
            Self::NotReinherited => Some("not_reinherited"),
            Self::NotReinheritedElseDeepMerge => Some("not_reinherited_else_deep_merge"),
            Self::NeverInherited => Some("never_inherited"),
            Self::Overwrite => Some("overwrite"),
            Self::DeepMerge => Some("deep_merge"),
            Self::Custom(_) => None,
        }
    }

    /// Parse a user-supplied mode
    ///
    /// Blank or absent input means "no override".
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidInheritance`] for unrecognized input
    pub fn from_string(value: Option<&str>) -> ConfigResult<Option<Self>> {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        match raw.to_ascii_lowercase().as_str() {
            "not_reinherited" | "notreinherited" | "none" => Ok(Some(Self::NotReinherited)),
            "never" => Ok(Some(Self::NeverInherited)),
            "overwrite" | "always" => Ok(Some(Self::Overwrite)),
            "deep_merge" | "merge" | "deepmerge" => Ok(Some(Self::DeepMerge)),
            _ => Err(ConfigError::InvalidInheritance(raw.to_string())),
        }
    }

    /// Whether a value passed through an intermediate container continues
    /// further down
    #[inline]
    #[must_use]
    pub fn is_reinheritable<C>(
        &self,
        _parent: &ConfigValueAtContainer<C>,
        _context: ConfigInheritanceContext,
    ) -> bool {
        self.spec().reinherited
    }

    /// Whether the parent's value needs to be resolved at all
    #[must_use]
    pub fn consider_parent<C>(
        &self,
        local: &ConfigValueAtContainer<C>,
        parent: Option<&ConfigValueAtContainer<C>>,
        _context: ConfigInheritanceContext,
    ) -> bool {
        if parent.is_none() {
            return false;
        }
        let spec = self.spec();
        if spec.strategy == ConflictStrategy::Overwrite {
            return !local.is_value_explicitly_set()
                && !spec.local_default_resolves_with_ancestor_value;
        }
        true
    }

    /// Combine a local value with an already resolved parent value using the
    /// built-in strategies
    ///
    /// # Errors
    /// Returns [`ConfigError::IllegalState`] if this is not the inheritance the
    /// local key declares, or the strategy is unknown
    pub fn resolve_with_parent<C: Clone>(
        &self,
        local: &ConfigValueAtContainer<C>,
        parent: &ConfigValueAtContainer<C>,
        context: ConfigInheritanceContext,
    ) -> ConfigResult<Resolution<ConfigValueAtContainer<C>>> {
        self.resolve_with_parent_using(StrategyRegistry::builtin(), local, parent, context)
    }

    /// As [`Self::resolve_with_parent`], looking strategies up in `registry`
    ///
    /// # Errors
    /// Returns [`ConfigError::IllegalState`] if this is not the inheritance the
    /// local key declares, or the strategy is not registered
    pub fn resolve_with_parent_using<C: Clone>(
        &self,
        registry: &StrategyRegistry,
        local: &ConfigValueAtContainer<C>,
        parent: &ConfigValueAtContainer<C>,
        context: ConfigInheritanceContext,
    ) -> ConfigResult<Resolution<ConfigValueAtContainer<C>>> {
        self.check_inheritance_context(local, context)?;
        let spec = self.spec();

        if !parent.is_value_explicitly_set() && !spec.local_default_resolves_with_ancestor_value {
            if spec.ancestor_default_inheritable
                && !local.is_value_explicitly_set()
                && local.default_value().is_none()
            {
                if let Some(parent_default) = parent.default_value() {
                    let adopted = parent.clone().with_value(Some(parent_default.clone()));
                    return Ok(Resolution::ok(adopted));
                }
            }
            return Ok(Resolution::ok(local.clone()));
        }

        if !local.is_value_explicitly_set() && !spec.local_default_resolves_with_ancestor_value {
            return Ok(Resolution::ok(parent.clone()));
        }

        let local_value = local.get();
        let parent_value = parent.as_maybe().or_else(|| {
            if spec.ancestor_default_inheritable {
                parent.default_value()
            } else {
                None
            }
        });
        let name = spec.strategy.as_str();
        let resolver = registry.get(name).ok_or_else(|| {
            ConfigError::illegal_state(format!(
                "unknown config conflict resolution strategy '{name}'"
            ))
        })?;
        let (combined, error) = resolver.resolve(local_value, parent_value)?.into_parts();
        let result = local.clone().with_value(combined);
        Ok(match error {
            Some(error) => Resolution::with_error(result, error),
            None => Resolution::ok(result),
        })
    }

    fn check_inheritance_context<C>(
        &self,
        local: &ConfigValueAtContainer<C>,
        context: ConfigInheritanceContext,
    ) -> ConfigResult<()> {
        let declared = local
            .key()
            .and_then(|key| key.inheritance_by_context(context).map(|i| (key, i)));
        match declared {
            Some((key, inheritance)) if inheritance != self => {
                Err(ConfigError::illegal_state(format!(
                    "resolution of '{}' invoked with inheritance {self} but key declares {inheritance} for {context:?}",
                    key.name
                )))
            }
            _ => Ok(()),
        }
    }
}

impl PartialEq for ConfigInheritance {
    fn eq(&self, other: &Self) -> bool {
        self.spec() == other.spec()
    }
}

impl Eq for ConfigInheritance {}

impl Hash for ConfigInheritance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.spec().hash(state);
    }
}

impl fmt::Display for ConfigInheritance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_name() {
            Some(name) => f.write_str(name),
            None => {
                let spec = self.spec();
                write!(
                    f,
                    "custom(reinherited={}, strategy={}, local_default_resolves={}, ancestor_default_inheritable={})",
                    spec.reinherited,
                    spec.strategy.as_str(),
                    spec.local_default_resolves_with_ancestor_value,
                    spec.ancestor_default_inheritable
                )
            }
        }
    }
}

/// Field-level persisted form of an inheritance mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritanceRecord {
    /// Reinherited flag
    #[serde(default)]
    pub is_reinherited: bool,

    /// Strategy name
    #[serde(default = "default_strategy_name")]
    pub conflict_resolution_strategy: String,

    /// Local default participation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_default_resolves_with_ancestor_value: Option<bool>,

    /// Legacy name of `localDefaultResolvesWithAncestorValue`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_local_default_value: Option<bool>,

    /// Ancestor default visibility; absent means visible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ancestor_default_inheritable: Option<bool>,
}

fn default_strategy_name() -> String {
    CONFLICT_RESOLUTION_STRATEGY_OVERWRITE.to_string()
}

impl InheritanceRecord {
    /// Migrate legacy fields and build the canonical mode
    ///
    /// # Errors
    /// Returns [`ConfigError::IllegalState`] if the legacy and current local
    /// default fields are both present and disagree
    pub fn into_inheritance(self) -> ConfigResult<ConfigInheritance> {
        let local_default_resolves = match (
            self.local_default_resolves_with_ancestor_value,
            self.use_local_default_value,
        ) {
            (Some(current), Some(legacy)) if current != legacy => {
                return Err(ConfigError::illegal_state(format!(
                    "inconsistent inheritance record: localDefaultResolvesWithAncestorValue={current} but useLocalDefaultValue={legacy}"
                )));
            }
            (Some(value), _) | (None, Some(value)) => value,
            (None, None) => false,
        };
        Ok(ConfigInheritance::from_spec(InheritanceSpec {
            reinherited: self.is_reinherited,
            strategy: ConflictStrategy::from_name(&self.conflict_resolution_strategy),
            local_default_resolves_with_ancestor_value: local_default_resolves,
            ancestor_default_inheritable: self.ancestor_default_inheritable.unwrap_or(true),
        }))
    }
}

impl From<&ConfigInheritance> for InheritanceRecord {
    fn from(inheritance: &ConfigInheritance) -> Self {
        let spec = inheritance.spec();
        Self {
            is_reinherited: spec.reinherited,
            conflict_resolution_strategy: spec.strategy.as_str().to_string(),
            local_default_resolves_with_ancestor_value: Some(
                spec.local_default_resolves_with_ancestor_value,
            ),
            use_local_default_value: None,
            ancestor_default_inheritable: Some(spec.ancestor_default_inheritable),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PersistedInheritance {
    Named(String),
    Fields(InheritanceRecord),
}

impl TryFrom<PersistedInheritance> for ConfigInheritance {
    type Error = ConfigError;

    fn try_from(persisted: PersistedInheritance) -> Result<Self, Self::Error> {
        match persisted {
            PersistedInheritance::Named(name) => {
                let named = Self::CANONICAL
                    .into_iter()
                    .find(|mode| mode.canonical_name() == Some(name.as_str()));
                match named {
                    Some(mode) => Ok(mode),
                    None => Self::from_string(Some(&name))?
                        .ok_or(ConfigError::InvalidInheritance(name)),
                }
            }
            PersistedInheritance::Fields(record) => record.into_inheritance(),
        }
    }
}

impl From<ConfigInheritance> for PersistedInheritance {
    fn from(inheritance: ConfigInheritance) -> Self {
        match inheritance.canonical_name() {
            Some(name) => Self::Named(name.to_string()),
            None => Self::Fields(InheritanceRecord::from(&inheritance)),
        }
    }
}
