//! Locations
//!
//! Locations form their own parent/child tree. Config resolves over the
//! location's parent chain.

use std::fmt;
use std::sync::{Arc, Weak};

use bkl_config::{ConfigKey, ConfigMap, ConfigResolver, ConfigValue, ConfigValueAtContainer};
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::warn;

use crate::error::{ModelError, ModelResult};
use crate::object::{BrooklynObject, BrooklynObjectType, ObjectCore};
use crate::types::LocationType;

#[derive(Debug, Default)]
struct LocationState {
    core: ObjectCore,
    parent: Option<Weak<LocationInner>>,
    children: Vec<Location>,
    config: ConfigMap,
    flags: IndexMap<String, ConfigValue>,
    read_only: bool,
}

#[derive(Debug)]
struct LocationInner {
    id: String,
    location_type: Arc<LocationType>,
    state: RwLock<LocationState>,
}

/// Live location
#[derive(Clone)]
pub struct Location(Arc<LocationInner>);

impl Location {
    /// Create unparented location
    #[must_use]
    pub fn new(id: impl Into<String>, location_type: Arc<LocationType>) -> Self {
        Self(Arc::new(LocationInner {
            id: id.into(),
            location_type,
            state: RwLock::new(LocationState::default()),
        }))
    }

    /// Location type
    #[inline]
    #[must_use]
    pub fn location_type(&self) -> &Arc<LocationType> {
        &self.0.location_type
    }

    /// Parent location
    #[must_use]
    pub fn parent(&self) -> Option<Location> {
        self.0
            .state
            .read()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Location)
    }

    /// Parent location id
    #[must_use]
    pub fn parent_id(&self) -> Option<String> {
        self.parent().map(|p| p.0.id.clone())
    }

    /// Child locations
    #[must_use]
    pub fn children(&self) -> Vec<Location> {
        self.0.state.read().children.clone()
    }

    /// Add child, setting its parent
    ///
    /// # Errors
    /// Returns [`ModelError::CyclicHierarchy`] if `child` is this location or
    /// one of its ancestors
    pub fn add_child(&self, child: &Location) -> ModelResult<()> {
        if self.0.id == child.0.id || self.ancestors().iter().any(|a| a.0.id == child.0.id) {
            return Err(ModelError::CyclicHierarchy {
                kind: BrooklynObjectType::Location,
                parent: self.0.id.clone(),
                child: child.0.id.clone(),
            });
        }
        child.0.state.write().parent = Some(Arc::downgrade(&self.0));
        let mut state = self.0.state.write();
        if !state.children.iter().any(|c| c.ptr_eq(child)) {
            state.children.push(child.clone());
        }
        Ok(())
    }

    /// Ancestors, nearest first
    #[must_use]
    pub fn ancestors(&self) -> Vec<Location> {
        let mut out = Vec::new();
        let mut next = self.parent();
        while let Some(location) = next {
            next = location.parent();
            out.push(location);
        }
        out
    }

    /// Declared config key
    #[must_use]
    pub fn config_key(&self, name: &str) -> Option<ConfigKey> {
        self.0.location_type.config_key(name).cloned()
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
        match self.0.location_type.config_key(name) {
            Some(key) => {
                state.config.set(key, value)?;
            }
            None => {
                state.config.set_raw(name, value);
            }
        }
        Ok(())
    }

    /// Explicitly set config
    #[must_use]
    pub fn config_local(&self, name: &str) -> Option<ConfigValue> {
        self.0.state.read().config.get_local(name).cloned()
    }

    /// Snapshot of explicitly set config
    #[must_use]
    pub fn config_map(&self) -> ConfigMap {
        self.0.state.read().config.clone()
    }

    /// Config value resolved over the parent chain
    ///
    /// # Errors
    /// Returns fatal resolution errors
    pub fn config(&self, key: &ConfigKey) -> ModelResult<Option<ConfigValue>> {
        let local = self.value_at(key, true);
        let ancestors = self
            .ancestors()
            .iter()
            .map(|ancestor| ancestor.value_at(key, false))
            .collect::<Vec<_>>();
        let (value, error) = ConfigResolver::shared_default()
            .resolve_value(&local, ancestors, key)?
            .into_parts();
        if let Some(error) = error {
            warn!(location = %self.0.id, key = %key.name, %error, "config resolved with error");
        }
        Ok(value)
    }

    fn value_at(&self, query: &ConfigKey, is_local: bool) -> ConfigValueAtContainer<String> {
        let declared = self
            .config_key(&query.name)
            .or_else(|| is_local.then(|| query.clone()));
        ConfigValueAtContainer::new(self.0.id.clone(), declared, self.config_local(&query.name))
    }

    /// Legacy field-derived state
    #[must_use]
    pub fn flags(&self) -> IndexMap<String, ConfigValue> {
        self.0.state.read().flags.clone()
    }

    /// Set a flag
    pub fn set_flag(&self, name: impl Into<String>, value: ConfigValue) {
        self.0.state.write().flags.insert(name.into(), value);
    }

    /// Check if both handles are the same location
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl BrooklynObject for Location {
    fn id(&self) -> &str {
        &self.0.id
    }

    fn object_type(&self) -> BrooklynObjectType {
        BrooklynObjectType::Location
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

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Location")
            .field("id", &self.0.id)
            .field("type", &self.0.location_type.name)
            .finish_non_exhaustive()
    }
}
