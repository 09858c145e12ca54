//! Type definitions and the type registry
//!
//! Types describe what an object declares: config keys, sensors, effectors,
//! and for adjuncts and locations, their field layout. Persisted objects name
//! their type; [`TypeRegistry`] turns that name back into a type on rebind.

use std::sync::Arc;

use bkl_config::ConfigKey;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::adjunct::AdjunctKind;

/// Bundle a type was loaded from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRef {
    /// Bundle symbolic name
    pub symbolic_name: String,
    /// Bundle version
    pub version: String,
}

impl BundleRef {
    /// Create bundle reference
    #[must_use]
    pub fn new(symbolic_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version: version.into(),
        }
    }
}

/// Whether a sensor's value survives rebind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorPersistenceMode {
    /// Persisted
    #[default]
    Required,
    /// Never persisted
    None,
}

/// Named attribute an entity publishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    /// Sensor name
    pub name: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Persistence mode
    #[serde(default)]
    pub persistence: SensorPersistenceMode,
}

impl Sensor {
    /// Persisted sensor
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            persistence: SensorPersistenceMode::Required,
        }
    }

    /// Sensor whose value is never persisted
    #[must_use]
    pub fn transient(name: impl Into<String>) -> Self {
        Self {
            persistence: SensorPersistenceMode::None,
            ..Self::new(name)
        }
    }
}

/// Named operation on an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Effector {
    /// Effector name
    pub name: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parameter names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

impl Effector {
    /// Effector without parameters
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: Vec::new(),
        }
    }
}

/// Declared field of a location or adjunct implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Excluded from persistence
    pub transient: bool,
    /// Class-level rather than per-instance
    pub is_static: bool,
    /// Backs a config key (always persisted)
    pub config_key: bool,
}

impl FieldDescriptor {
    /// Plain persisted field
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transient: false,
            is_static: false,
            config_key: false,
        }
    }

    /// Mark transient
    #[inline]
    #[must_use]
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Mark static
    #[inline]
    #[must_use]
    pub fn static_field(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Mark as backing a config key
    #[inline]
    #[must_use]
    pub fn config_key(mut self) -> Self {
        self.config_key = true;
        self
    }

    /// Whether the field value is persisted
    ///
    /// `id`, `name` and `tags` are always persisted.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        matches!(self.name.as_str(), "id" | "name" | "tags")
            || self.config_key
            || !(self.transient || self.is_static)
    }
}

/// Names shared by every registered type
trait NamedType {
    fn name(&self) -> &str;
    fn bundle(&self) -> Option<&BundleRef>;

    fn qualified_name(&self) -> String {
        match self.bundle() {
            Some(bundle) => format!("{}:{}", bundle.symbolic_name, self.name()),
            None => self.name().to_string(),
        }
    }
}

macro_rules! named_type {
    ($ty:ty) => {
        impl NamedType for $ty {
            fn name(&self) -> &str {
                &self.name
            }

            fn bundle(&self) -> Option<&BundleRef> {
                self.bundle.as_ref()
            }
        }

        impl $ty {
            /// Name prefixed with the bundle symbolic name, if from a bundle
            #[must_use]
            pub fn qualified_name(&self) -> String {
                NamedType::qualified_name(self)
            }

            /// Declared config key
            #[must_use]
            pub fn config_key(&self, name: &str) -> Option<&ConfigKey> {
                self.config_keys.get(name)
            }

            /// Mark as loaded from a bundle
            #[inline]
            #[must_use]
            pub fn from_bundle(mut self, bundle: BundleRef) -> Self {
                self.bundle = Some(bundle);
                self
            }

            /// Declare a config key
            #[inline]
            #[must_use]
            pub fn with_config_key(mut self, key: ConfigKey) -> Self {
                self.config_keys.insert(key.name.clone(), key);
                self
            }
        }
    };
}

/// Entity type
#[derive(Debug, Clone)]
pub struct EntityType {
    /// Type name
    pub name: String,
    /// Bundle the type comes from
    pub bundle: Option<BundleRef>,
    /// Declared config keys
    pub config_keys: IndexMap<String, ConfigKey>,
    /// Declared sensors
    pub sensors: IndexMap<String, Sensor>,
    /// Declared effectors
    pub effectors: IndexMap<String, Effector>,
    /// Instances are applications
    pub application: bool,
    /// Instances have members
    pub group: bool,
}

named_type!(EntityType);

impl EntityType {
    /// Create entity type
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bundle: None,
            config_keys: IndexMap::new(),
            sensors: IndexMap::new(),
            effectors: IndexMap::new(),
            application: false,
            group: false,
        }
    }

    /// Declare a sensor
    #[inline]
    #[must_use]
    pub fn with_sensor(mut self, sensor: Sensor) -> Self {
        self.sensors.insert(sensor.name.clone(), sensor);
        self
    }

    /// Declare an effector
    #[inline]
    #[must_use]
    pub fn with_effector(mut self, effector: Effector) -> Self {
        self.effectors.insert(effector.name.clone(), effector);
        self
    }

    /// Instances are applications
    #[inline]
    #[must_use]
    pub fn application(mut self) -> Self {
        self.application = true;
        self
    }

    /// Instances are groups
    #[inline]
    #[must_use]
    pub fn group(mut self) -> Self {
        self.group = true;
        self
    }
}

/// Location type
#[derive(Debug, Clone)]
pub struct LocationType {
    /// Type name
    pub name: String,
    /// Bundle the type comes from
    pub bundle: Option<BundleRef>,
    /// Declared config keys
    pub config_keys: IndexMap<String, ConfigKey>,
    /// Implementation fields persisted as flags
    pub fields: Vec<FieldDescriptor>,
}

named_type!(LocationType);

impl LocationType {
    /// Create location type
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bundle: None,
            config_keys: IndexMap::new(),
            fields: Vec::new(),
        }
    }

    /// Declare a field
    #[inline]
    #[must_use]
    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }
}

/// Policy, enricher or feed type
#[derive(Debug, Clone)]
pub struct AdjunctType {
    /// Type name
    pub name: String,
    /// Adjunct kind
    pub kind: AdjunctKind,
    /// Bundle the type comes from
    pub bundle: Option<BundleRef>,
    /// Declared config keys
    pub config_keys: IndexMap<String, ConfigKey>,
    /// Implementation fields persisted as flags
    pub fields: Vec<FieldDescriptor>,
}

named_type!(AdjunctType);

impl AdjunctType {
    /// Create adjunct type
    #[must_use]
    pub fn new(name: impl Into<String>, kind: AdjunctKind) -> Self {
        Self {
            name: name.into(),
            kind,
            bundle: None,
            config_keys: IndexMap::new(),
            fields: Vec::new(),
        }
    }

    /// Declare a field
    #[inline]
    #[must_use]
    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }
}

/// One name-indexed table of types
#[derive(Debug)]
struct TypeTable<T> {
    types: DashMap<String, Arc<T>>,
}

impl<T: NamedType> TypeTable<T> {
    fn new() -> Self {
        Self {
            types: DashMap::new(),
        }
    }

    fn register(&self, ty: T) -> Arc<T> {
        let ty = Arc::new(ty);
        self.types.insert(ty.qualified_name(), Arc::clone(&ty));
        ty
    }

    fn get(&self, name: &str) -> Option<Arc<T>> {
        self.types.get(name).map(|entry| Arc::clone(entry.value()))
    }

    fn resolve(&self, name: &str, search_path: &[String]) -> Option<Arc<T>> {
        if let Some(found) = self.get(name) {
            return Some(found);
        }
        let bare = name.rsplit(':').next().unwrap_or(name);
        if bare != name {
            if let Some(found) = self.get(bare) {
                return Some(found);
            }
        }
        search_path.iter().find_map(|entry| {
            let bundle = entry.split(':').next().unwrap_or(entry);
            self.get(&format!("{bundle}:{bare}"))
        })
    }

    fn len(&self) -> usize {
        self.types.len()
    }
}

/// Registry of known types, shared between management contexts
#[derive(Debug)]
pub struct TypeRegistry {
    entities: TypeTable<EntityType>,
    locations: TypeTable<LocationType>,
    adjuncts: TypeTable<AdjunctType>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Create empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: TypeTable::new(),
            locations: TypeTable::new(),
            adjuncts: TypeTable::new(),
        }
    }

    /// Register entity type under its qualified name
    pub fn register_entity(&self, ty: EntityType) -> Arc<EntityType> {
        self.entities.register(ty)
    }

    /// Register location type under its qualified name
    pub fn register_location(&self, ty: LocationType) -> Arc<LocationType> {
        self.locations.register(ty)
    }

    /// Register adjunct type under its qualified name
    pub fn register_adjunct(&self, ty: AdjunctType) -> Arc<AdjunctType> {
        self.adjuncts.register(ty)
    }

    /// Resolve entity type: exact name, bare name, then each search-path
    /// entry's bundle as prefix
    #[must_use]
    pub fn resolve_entity(&self, name: &str, search_path: &[String]) -> Option<Arc<EntityType>> {
        self.entities.resolve(name, search_path)
    }

    /// Resolve location type
    #[must_use]
    pub fn resolve_location(
        &self,
        name: &str,
        search_path: &[String],
    ) -> Option<Arc<LocationType>> {
        self.locations.resolve(name, search_path)
    }

    /// Resolve adjunct type
    #[must_use]
    pub fn resolve_adjunct(&self, name: &str, search_path: &[String]) -> Option<Arc<AdjunctType>> {
        self.adjuncts.resolve(name, search_path)
    }

    /// Number of registered types of all kinds
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len() + self.locations.len() + self.adjuncts.len()
    }

    /// Check if no types are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_includes_bundle() {
        let ty = EntityType::new("Server").from_bundle(BundleRef::new("acme", "1.0"));
        assert_eq!(ty.qualified_name(), "acme:Server");
        assert_eq!(EntityType::new("Server").qualified_name(), "Server");
    }

    #[test]
    fn resolve_exact_then_bare() {
        let registry = TypeRegistry::new();
        registry.register_entity(EntityType::new("Server"));
        assert!(registry.resolve_entity("Server", &[]).is_some());
        assert!(registry.resolve_entity("old-bundle:Server", &[]).is_some());
        assert!(registry.resolve_entity("Missing", &[]).is_none());
    }

    #[test]
    fn resolve_through_search_path() {
        let registry = TypeRegistry::new();
        registry.register_entity(
            EntityType::new("Server").from_bundle(BundleRef::new("acme", "1.0")),
        );
        assert!(registry.resolve_entity("Server", &[]).is_none());
        let found = registry
            .resolve_entity("Server", &["acme:1.0".to_string()])
            .unwrap();
        assert_eq!(found.qualified_name(), "acme:Server");
    }

    #[test]
    fn field_persistence_rules() {
        assert!(FieldDescriptor::new("count").is_persisted());
        assert!(!FieldDescriptor::new("cache").transient().is_persisted());
        assert!(!FieldDescriptor::new("COUNTER").static_field().is_persisted());
        assert!(FieldDescriptor::new("limit").transient().config_key().is_persisted());
        assert!(FieldDescriptor::new("name").transient().is_persisted());
    }
}
