//! Policies, enrichers and feeds
//!
//! An [`Adjunct`] attaches to at most one entity. Its config is read locally
//! with key defaults; implementation state lives in named fields.

use std::fmt;
use std::sync::Arc;

use bkl_config::{ConfigKey, ConfigMap, ConfigValue};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::object::{BrooklynObject, BrooklynObjectType, ObjectCore};
use crate::types::AdjunctType;

/// Kind of adjunct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjunctKind {
    /// Policy
    Policy,
    /// Enricher
    Enricher,
    /// Feed
    Feed,
}

impl AdjunctKind {
    /// Corresponding object type
    #[must_use]
    pub fn object_type(self) -> BrooklynObjectType {
        match self {
            Self::Policy => BrooklynObjectType::Policy,
            Self::Enricher => BrooklynObjectType::Enricher,
            Self::Feed => BrooklynObjectType::Feed,
        }
    }
}

#[derive(Debug, Default)]
struct AdjunctState {
    core: ObjectCore,
    unique_tag: Option<String>,
    entity_id: Option<String>,
    config: ConfigMap,
    fields: IndexMap<String, ConfigValue>,
    read_only: bool,
}

#[derive(Debug)]
struct AdjunctInner {
    id: String,
    adjunct_type: Arc<AdjunctType>,
    state: RwLock<AdjunctState>,
}

/// Live policy, enricher or feed
#[derive(Clone)]
pub struct Adjunct(Arc<AdjunctInner>);

impl Adjunct {
    /// Create detached adjunct
    #[must_use]
    pub fn new(id: impl Into<String>, adjunct_type: Arc<AdjunctType>) -> Self {
        Self(Arc::new(AdjunctInner {
            id: id.into(),
            adjunct_type,
            state: RwLock::new(AdjunctState::default()),
        }))
    }

    /// Adjunct kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> AdjunctKind {
        self.0.adjunct_type.kind
    }

    /// Adjunct type
    #[inline]
    #[must_use]
    pub fn adjunct_type(&self) -> &Arc<AdjunctType> {
        &self.0.adjunct_type
    }

    /// Tag identifying this adjunct among its entity's adjuncts
    #[must_use]
    pub fn unique_tag(&self) -> Option<String> {
        self.0.state.read().unique_tag.clone()
    }

    /// Set unique tag
    pub fn set_unique_tag(&self, tag: Option<String>) {
        self.0.state.write().unique_tag = tag;
    }

    /// Owning entity id
    #[must_use]
    pub fn entity_id(&self) -> Option<String> {
        self.0.state.read().entity_id.clone()
    }

    pub(crate) fn attach_to(&self, entity_id: &str) -> ModelResult<()> {
        let mut state = self.0.state.write();
        match &state.entity_id {
            Some(owner) if owner != entity_id => Err(ModelError::AdjunctAlreadyAttached {
                adjunct: self.0.id.clone(),
                entity: owner.clone(),
            }),
            _ => {
                state.entity_id = Some(entity_id.to_string());
                Ok(())
            }
        }
    }

    /// Config value: explicit, else the declared key's default
    #[must_use]
    pub fn config(&self, name: &str) -> Option<ConfigValue> {
        if let Some(value) = self.0.state.read().config.get_local(name) {
            return Some(value.clone());
        }
        self.0
            .adjunct_type
            .config_key(name)
            .and_then(|key| key.default_value.clone())
    }

    /// Snapshot of explicitly set config
    #[must_use]
    pub fn config_map(&self) -> ConfigMap {
        self.0.state.read().config.clone()
    }

    /// Set config, validating against the declared key if any
    ///
    /// # Errors
    /// Returns error if read-only or the value has the wrong type
    pub fn set_config(&self, name: &str, value: ConfigValue) -> ModelResult<()> {
        let mut state = self.0.state.write();
        if state.read_only {
            return Err(ModelError::ReadOnly(self.0.id.clone()));
        }
        match self.0.adjunct_type.config_key(name) {
            Some(key) => {
                state.config.set(key, value)?;
            }
            None => {
                state.config.set_raw(name, value);
            }
        }
        Ok(())
    }

    /// Declared config key
    #[must_use]
    pub fn config_key(&self, name: &str) -> Option<ConfigKey> {
        self.0.adjunct_type.config_key(name).cloned()
    }

    /// Implementation field value
    #[must_use]
    pub fn field(&self, name: &str) -> Option<ConfigValue> {
        self.0.state.read().fields.get(name).cloned()
    }

    /// Set implementation field
    pub fn set_field(&self, name: impl Into<String>, value: ConfigValue) {
        self.0.state.write().fields.insert(name.into(), value);
    }

    /// Snapshot of implementation fields
    #[must_use]
    pub fn fields(&self) -> IndexMap<String, ConfigValue> {
        self.0.state.read().fields.clone()
    }

    /// Check if both handles are the same adjunct
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl BrooklynObject for Adjunct {
    fn id(&self) -> &str {
        &self.0.id
    }

    fn object_type(&self) -> BrooklynObjectType {
        self.kind().object_type()
    }

    fn with_core<R>(&self, f: impl FnOnce(&ObjectCore) -> R) -> R {
        f(&self.0.state.read().core)
    }

    fn with_core_mut<R>(&self, f: impl FnOnce(&mut ObjectCore) -> R) -> R {
        f(&mut self.0.state.write().core)
    }

    fn is_read_only(&self) -> bool {
        self.0.state.read().read_only
    }

    fn set_read_only(&self, read_only: bool) {
        self.0.state.write().read_only = read_only;
    }
}

impl fmt::Debug for Adjunct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adjunct")
            .field("id", &self.0.id)
            .field("kind", &self.kind())
            .field("type", &self.0.adjunct_type.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bkl_config::ValueType;

    fn policy_type() -> Arc<AdjunctType> {
        Arc::new(
            AdjunctType::new("Scaler", AdjunctKind::Policy).with_config_key(
                ConfigKey::new("max")
                    .with_type(ValueType::Integer)
                    .with_default(5),
            ),
        )
    }

    #[test]
    fn config_falls_back_to_key_default() {
        let policy = Adjunct::new("p1", policy_type());
        assert_eq!(policy.config("max"), Some(ConfigValue::from(5)));
        policy.set_config("max", ConfigValue::from(9)).unwrap();
        assert_eq!(policy.config("max"), Some(ConfigValue::from(9)));
    }

    #[test]
    fn config_type_checked() {
        let policy = Adjunct::new("p1", policy_type());
        assert!(matches!(
            policy.set_config("max", ConfigValue::from("lots")),
            Err(ModelError::Config(_))
        ));
    }

    #[test]
    fn attaches_to_one_entity() {
        let policy = Adjunct::new("p1", policy_type());
        policy.attach_to("e1").unwrap();
        policy.attach_to("e1").unwrap();
        assert!(matches!(
            policy.attach_to("e2"),
            Err(ModelError::AdjunctAlreadyAttached { .. })
        ));
    }
}
