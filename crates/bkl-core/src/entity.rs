//! Entities
//!
//! An [`Entity`] is a node in an application tree. Parents hold children
//! strongly; children refer back to their parent weakly. Config resolves over
//! the live parent chain with `OVERWRITE` as the container default.

use std::fmt;
use std::sync::{Arc, Weak};

use bkl_config::{
    ConfigKey, ConfigMap, ConfigResolver, ConfigValue, ConfigValueAtContainer, Resolution,
};
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::warn;

use crate::adjunct::{Adjunct, AdjunctKind};
use crate::error::{ModelError, ModelResult};
use crate::location::Location;
use crate::object::{BrooklynObject, BrooklynObjectType, ObjectCore};
use crate::types::{Effector, EntityType, Sensor, SensorPersistenceMode};

#[derive(Debug, Default)]
struct EntityState {
    core: ObjectCore,
    parent: Option<Weak<EntityInner>>,
    children: Vec<Entity>,
    locations: Vec<Location>,
    policies: Vec<Adjunct>,
    enrichers: Vec<Adjunct>,
    feeds: Vec<Adjunct>,
    members: Vec<Entity>,
    config: ConfigMap,
    dynamic_config_keys: IndexMap<String, ConfigKey>,
    attributes: IndexMap<String, ConfigValue>,
    dynamic_sensors: IndexMap<String, Sensor>,
    dynamic_effectors: IndexMap<String, Effector>,
    application: bool,
    read_only: bool,
}

#[derive(Debug)]
struct EntityInner {
    id: String,
    entity_type: Arc<EntityType>,
    state: RwLock<EntityState>,
}

/// Live entity
#[derive(Clone)]
pub struct Entity(Arc<EntityInner>);

impl Entity {
    /// Create unparented entity
    #[must_use]
    pub fn new(id: impl Into<String>, entity_type: Arc<EntityType>) -> Self {
        let state = EntityState {
            application: entity_type.application,
            ..EntityState::default()
        };
        Self(Arc::new(EntityInner {
            id: id.into(),
            entity_type,
            state: RwLock::new(state),
        }))
    }

    /// Entity type
    #[inline]
    #[must_use]
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.0.entity_type
    }

    /// Check if both handles are the same entity
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // Hierarchy

    /// Parent entity
    #[must_use]
    pub fn parent(&self) -> Option<Entity> {
        self.0
            .state
            .read()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Entity)
    }

    /// Parent entity id
    #[must_use]
    pub fn parent_id(&self) -> Option<String> {
        self.parent().map(|p| p.0.id.clone())
    }

    /// Ancestors, nearest first
    #[must_use]
    pub fn ancestors(&self) -> Vec<Entity> {
        let mut out = Vec::new();
        let mut next = self.parent();
        while let Some(entity) = next {
            next = entity.parent();
            out.push(entity);
        }
        out
    }

    /// Child entities
    #[must_use]
    pub fn children(&self) -> Vec<Entity> {
        self.0.state.read().children.clone()
    }

    /// Add child, setting its parent
    ///
    /// # Errors
    /// Returns [`ModelError::CyclicHierarchy`] if `child` is this entity or
    /// one of its ancestors
    pub fn add_child(&self, child: &Entity) -> ModelResult<()> {
        if self.0.id == child.0.id || self.ancestors().iter().any(|a| a.0.id == child.0.id) {
            return Err(ModelError::CyclicHierarchy {
                kind: BrooklynObjectType::Entity,
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

    /// Whether this is an application
    #[must_use]
    pub fn is_application(&self) -> bool {
        self.0.state.read().application
    }

    /// Mark as application
    pub fn set_application(&self, application: bool) {
        self.0.state.write().application = application;
    }

    /// Application without a parent
    #[must_use]
    pub fn is_top_level_app(&self) -> bool {
        self.is_application() && self.parent().is_none()
    }

    /// Group members
    #[must_use]
    pub fn members(&self) -> Vec<Entity> {
        self.0.state.read().members.clone()
    }

    /// Add a group member
    ///
    /// # Errors
    /// Returns [`ModelError::NotAGroup`] if this entity's type is not a group
    pub fn add_member(&self, member: &Entity) -> ModelResult<()> {
        if !self.0.entity_type.group {
            return Err(ModelError::NotAGroup(self.0.id.clone()));
        }
        let mut state = self.0.state.write();
        if !state.members.iter().any(|m| m.ptr_eq(member)) {
            state.members.push(member.clone());
        }
        Ok(())
    }

    // Locations and adjuncts

    /// Locations
    #[must_use]
    pub fn locations(&self) -> Vec<Location> {
        self.0.state.read().locations.clone()
    }

    /// Add a location
    pub fn add_location(&self, location: &Location) {
        let mut state = self.0.state.write();
        if !state.locations.iter().any(|l| l.ptr_eq(location)) {
            state.locations.push(location.clone());
        }
    }

    /// Policies
    #[must_use]
    pub fn policies(&self) -> Vec<Adjunct> {
        self.0.state.read().policies.clone()
    }

    /// Enrichers
    #[must_use]
    pub fn enrichers(&self) -> Vec<Adjunct> {
        self.0.state.read().enrichers.clone()
    }

    /// Feeds
    #[must_use]
    pub fn feeds(&self) -> Vec<Adjunct> {
        self.0.state.read().feeds.clone()
    }

    /// All adjuncts
    #[must_use]
    pub fn adjuncts(&self) -> Vec<Adjunct> {
        let state = self.0.state.read();
        state
            .policies
            .iter()
            .chain(&state.enrichers)
            .chain(&state.feeds)
            .cloned()
            .collect()
    }

    /// Attach a policy
    ///
    /// # Errors
    /// Returns error if the adjunct is not a policy or belongs elsewhere
    pub fn add_policy(&self, policy: &Adjunct) -> ModelResult<()> {
        self.attach(AdjunctKind::Policy, policy)
    }

    /// Attach an enricher
    ///
    /// # Errors
    /// Returns error if the adjunct is not an enricher or belongs elsewhere
    pub fn add_enricher(&self, enricher: &Adjunct) -> ModelResult<()> {
        self.attach(AdjunctKind::Enricher, enricher)
    }

    /// Attach a feed
    ///
    /// # Errors
    /// Returns error if the adjunct is not a feed or belongs elsewhere
    pub fn add_feed(&self, feed: &Adjunct) -> ModelResult<()> {
        self.attach(AdjunctKind::Feed, feed)
    }

    /// Attach an adjunct in the slot for its kind
    ///
    /// # Errors
    /// Returns error if the adjunct belongs to another entity
    pub fn add_adjunct(&self, adjunct: &Adjunct) -> ModelResult<()> {
        self.attach(adjunct.kind(), adjunct)
    }

    fn attach(&self, slot: AdjunctKind, adjunct: &Adjunct) -> ModelResult<()> {
        if adjunct.kind() != slot {
            return Err(ModelError::WrongAdjunctKind {
                id: adjunct.id().to_string(),
                expected: slot,
                actual: adjunct.kind(),
            });
        }
        adjunct.attach_to(&self.0.id)?;
        let mut state = self.0.state.write();
        let list = match slot {
            AdjunctKind::Policy => &mut state.policies,
            AdjunctKind::Enricher => &mut state.enrichers,
            AdjunctKind::Feed => &mut state.feeds,
        };
        if !list.iter().any(|a| a.ptr_eq(adjunct)) {
            list.push(adjunct.clone());
        }
        Ok(())
    }

    // Config

    /// Declared config key, from the type or added dynamically
    #[must_use]
    pub fn config_key(&self, name: &str) -> Option<ConfigKey> {
        if let Some(key) = self.0.entity_type.config_key(name) {
            return Some(key.clone());
        }
        self.0.state.read().dynamic_config_keys.get(name).cloned()
    }

    /// Config keys added at runtime
    #[must_use]
    pub fn dynamic_config_keys(&self) -> Vec<ConfigKey> {
        self.0
            .state
            .read()
            .dynamic_config_keys
            .values()
            .cloned()
            .collect()
    }

    /// Add a config key at runtime
    pub fn add_dynamic_config_key(&self, key: ConfigKey) {
        self.0
            .state
            .write()
            .dynamic_config_keys
            .insert(key.name.clone(), key);
    }

    /// Set config, validating against the declared key if any
    ///
    /// # Errors
    /// Returns error if read-only or the value has the wrong type
    pub fn set_config(&self, name: &str, value: ConfigValue) -> ModelResult<()> {
        let declared = self.config_key(name);
        let mut state = self.0.state.write();
        if state.read_only {
            return Err(ModelError::ReadOnly(self.0.id.clone()));
        }
        match declared {
            Some(key) => {
                state.config.set(&key, value)?;
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

    /// Config value resolved over the parent chain, with any non-fatal error
    ///
    /// # Errors
    /// Returns fatal resolution errors
    pub fn resolve_config(&self, key: &ConfigKey) -> ModelResult<Resolution<Option<ConfigValue>>> {
        let local = self.value_at(key, true);
        let ancestors = self
            .ancestors()
            .iter()
            .map(|ancestor| ancestor.value_at(key, false))
            .collect::<Vec<_>>();
        Ok(ConfigResolver::shared_default().resolve_value(&local, ancestors, key)?)
    }

    /// Config value resolved over the parent chain
    ///
    /// Non-fatal resolution errors are logged.
    ///
    /// # Errors
    /// Returns fatal resolution errors
    pub fn config(&self, key: &ConfigKey) -> ModelResult<Option<ConfigValue>> {
        let (value, error) = self.resolve_config(key)?.into_parts();
        if let Some(error) = error {
            warn!(entity = %self.0.id, key = %key.name, %error, "config resolved with error");
        }
        Ok(value)
    }

    /// Config by name, using the declared key if any
    ///
    /// # Errors
    /// Returns fatal resolution errors
    pub fn config_by_name(&self, name: &str) -> ModelResult<Option<ConfigValue>> {
        let key = self.config_key(name).unwrap_or_else(|| ConfigKey::new(name));
        self.config(&key)
    }

    fn value_at(&self, query: &ConfigKey, is_local: bool) -> ConfigValueAtContainer<String> {
        let declared = self
            .config_key(&query.name)
            .or_else(|| is_local.then(|| query.clone()));
        ConfigValueAtContainer::new(self.0.id.clone(), declared, self.config_local(&query.name))
    }

    // Sensors and effectors

    /// Declared sensor, from the type or added dynamically
    #[must_use]
    pub fn sensor(&self, name: &str) -> Option<Sensor> {
        if let Some(sensor) = self.0.entity_type.sensors.get(name) {
            return Some(sensor.clone());
        }
        self.0.state.read().dynamic_sensors.get(name).cloned()
    }

    /// Add a sensor at runtime
    pub fn add_dynamic_sensor(&self, sensor: Sensor) {
        self.0
            .state
            .write()
            .dynamic_sensors
            .insert(sensor.name.clone(), sensor);
    }

    /// Attribute value
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<ConfigValue> {
        self.0.state.read().attributes.get(name).cloned()
    }

    /// Publish an attribute value
    ///
    /// # Errors
    /// Returns [`ModelError::ReadOnly`] on a read-only entity
    pub fn set_attribute(&self, name: impl Into<String>, value: ConfigValue) -> ModelResult<()> {
        let mut state = self.0.state.write();
        if state.read_only {
            return Err(ModelError::ReadOnly(self.0.id.clone()));
        }
        state.attributes.insert(name.into(), value);
        Ok(())
    }

    /// Snapshot of all attributes
    #[must_use]
    pub fn attributes(&self) -> IndexMap<String, ConfigValue> {
        self.0.state.read().attributes.clone()
    }

    /// Attributes whose sensor is persisted; undeclared sensors are persisted
    #[must_use]
    pub fn persistable_attributes(&self) -> IndexMap<String, ConfigValue> {
        self.attributes()
            .into_iter()
            .filter(|(name, _)| {
                self.sensor(name)
                    .map_or(true, |s| s.persistence != SensorPersistenceMode::None)
            })
            .collect()
    }

    /// Effectors added at runtime
    #[must_use]
    pub fn dynamic_effectors(&self) -> Vec<Effector> {
        self.0
            .state
            .read()
            .dynamic_effectors
            .values()
            .cloned()
            .collect()
    }

    /// Add an effector at runtime
    pub fn add_dynamic_effector(&self, effector: Effector) {
        self.0
            .state
            .write()
            .dynamic_effectors
            .insert(effector.name.clone(), effector);
    }

    /// Declared or dynamic effector
    #[must_use]
    pub fn effector(&self, name: &str) -> Option<Effector> {
        if let Some(effector) = self.0.entity_type.effectors.get(name) {
            return Some(effector.clone());
        }
        self.0.state.read().dynamic_effectors.get(name).cloned()
    }
}

impl BrooklynObject for Entity {
    fn id(&self) -> &str {
        &self.0.id
    }

    fn object_type(&self) -> BrooklynObjectType {
        BrooklynObjectType::Entity
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

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.0.id)
            .field("type", &self.0.entity_type.name)
            .finish_non_exhaustive()
    }
}

/// Management-layer handle on an entity
///
/// Handed out by lookups so callers never hold the implementation directly.
/// Proxies are never persisted.
#[derive(Debug, Clone)]
pub struct EntityProxy {
    target: Entity,
}

impl EntityProxy {
    /// Wrap an entity
    #[must_use]
    pub fn new(target: Entity) -> Self {
        Self { target }
    }

    /// Entity id
    #[must_use]
    pub fn id(&self) -> &str {
        self.target.id()
    }

    /// Underlying entity
    #[must_use]
    pub fn deproxy(&self) -> &Entity {
        &self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AdjunctType;
    use bkl_config::{ConfigInheritance, ValueType};
    use pretty_assertions::assert_eq;

    fn entity_type() -> Arc<EntityType> {
        Arc::new(
            EntityType::new("TestEntity")
                .with_config_key(ConfigKey::new("port").with_type(ValueType::Integer))
                .with_config_key(
                    ConfigKey::new("env")
                        .with_runtime_inheritance(ConfigInheritance::DeepMerge),
                )
                .with_sensor(Sensor::transient("cpu")),
        )
    }

    #[test]
    fn child_inherits_parent_config() {
        let parent = Entity::new("p", entity_type());
        let child = Entity::new("c", entity_type());
        parent.add_child(&child).unwrap();
        parent.set_config("port", ConfigValue::from(8080)).unwrap();

        let key = child.config_key("port").unwrap();
        assert_eq!(child.config(&key).unwrap(), Some(ConfigValue::from(8080)));
        assert_eq!(child.parent_id().as_deref(), Some("p"));
    }

    #[test]
    fn hierarchy_cycles_refused() {
        let a = Entity::new("a", entity_type());
        let b = Entity::new("b", entity_type());
        let c = Entity::new("c", entity_type());
        assert!(matches!(a.add_child(&a), Err(ModelError::CyclicHierarchy { .. })));
        a.add_child(&b).unwrap();
        b.add_child(&c).unwrap();
        assert!(matches!(c.add_child(&a), Err(ModelError::CyclicHierarchy { .. })));
        assert!(b.add_child(&a).is_err());

        assert_eq!(a.parent_id(), None);
        assert_eq!(c.ancestors().len(), 2);
        assert!(c.children().is_empty());
    }

    #[test]
    fn deep_merge_key_merges_with_parent() {
        let parent = Entity::new("p", entity_type());
        let child = Entity::new("c", entity_type());
        parent.add_child(&child).unwrap();
        parent
            .set_config("env", ConfigValue::map([("A", "1")]))
            .unwrap();
        child
            .set_config("env", ConfigValue::map([("B", "2")]))
            .unwrap();

        assert_eq!(
            child.config_by_name("env").unwrap(),
            Some(ConfigValue::map([("B", "2"), ("A", "1")]))
        );
    }

    #[test]
    fn set_config_validates_declared_type() {
        let entity = Entity::new("e", entity_type());
        assert!(entity.set_config("port", ConfigValue::from("http")).is_err());
        assert!(entity.set_config("undeclared", ConfigValue::from("x")).is_ok());
    }

    #[test]
    fn transient_sensor_not_persistable() {
        let entity = Entity::new("e", entity_type());
        entity.set_attribute("cpu", ConfigValue::from(0.5)).unwrap();
        entity.set_attribute("up", ConfigValue::from(true)).unwrap();
        let persisted = entity.persistable_attributes();
        assert!(persisted.contains_key("up"));
        assert!(!persisted.contains_key("cpu"));
    }

    #[test]
    fn adjunct_slot_must_match_kind() {
        let entity = Entity::new("e", entity_type());
        let enricher = Adjunct::new(
            "en1",
            Arc::new(AdjunctType::new("Summer", AdjunctKind::Enricher)),
        );
        assert!(matches!(
            entity.add_policy(&enricher),
            Err(ModelError::WrongAdjunctKind { .. })
        ));
        entity.add_adjunct(&enricher).unwrap();
        assert_eq!(entity.enrichers().len(), 1);
        assert_eq!(enricher.entity_id().as_deref(), Some("e"));
    }

    #[test]
    fn members_require_group() {
        let plain = Entity::new("e", entity_type());
        let other = Entity::new("o", entity_type());
        assert!(matches!(
            plain.add_member(&other),
            Err(ModelError::NotAGroup(_))
        ));
        let group = Entity::new("g", Arc::new(EntityType::new("Cluster").group()));
        group.add_member(&other).unwrap();
        assert_eq!(group.members().len(), 1);
    }

    #[test]
    fn read_only_entity_rejects_writes() {
        let entity = Entity::new("e", entity_type());
        entity.set_read_only(true);
        assert!(entity.set_attribute("x", ConfigValue::from(1)).is_err());
        assert!(entity.set_config("port", ConfigValue::from(1)).is_err());
    }

    #[test]
    fn proxy_deproxies() {
        let entity = Entity::new("e", entity_type());
        let proxy = EntityProxy::new(entity.clone());
        assert_eq!(proxy.id(), "e");
        assert!(proxy.deproxy().ptr_eq(&entity));
    }
}
