//! Memento generation
//!
//! [`MementoGenerator`] takes point-in-time snapshots of live objects managed
//! by a [`ManagementContext`].

use bkl_config::{ConfigMap, ConfigValue, TaskState};
use bkl_core::{
    Adjunct, BrooklynObject, BundleRef, CatalogItem, Entity, FieldDescriptor, Location,
    ManagedBundle, ManagedObject, ManagementContext,
};
use indexmap::IndexMap;
use tracing::debug;

use crate::error::{MementoError, MementoResult};
use crate::memento::{
    AdjunctMemento, AnyMemento, BrooklynMemento, CatalogItemMemento, EntityMemento,
    LocationMemento, ManagedBundleMemento, MementoCommon,
};

/// Builds mementos from live objects
#[derive(Debug, Clone, Copy)]
pub struct MementoGenerator<'a> {
    mgmt: &'a ManagementContext,
}

impl<'a> MementoGenerator<'a> {
    /// Create generator over a management context
    #[must_use]
    pub fn new(mgmt: &'a ManagementContext) -> Self {
        Self { mgmt }
    }

    /// Memento of any managed object
    ///
    /// # Errors
    /// Returns [`MementoError::IllegalState`] for an entity proxy
    pub fn new_memento(&self, object: &ManagedObject) -> MementoResult<AnyMemento> {
        Ok(match object {
            ManagedObject::Entity(entity) => AnyMemento::Entity(self.entity_memento(entity)),
            ManagedObject::EntityProxy(proxy) => {
                return Err(MementoError::IllegalState(format!(
                    "Attempt to create memento from proxy of entity {}; use the deproxied entity",
                    proxy.id()
                )))
            }
            ManagedObject::Location(location) => {
                AnyMemento::Location(self.location_memento(location))
            }
            ManagedObject::Adjunct(adjunct) => AnyMemento::Adjunct(self.adjunct_memento(adjunct)),
            ManagedObject::CatalogItem(item) => {
                AnyMemento::CatalogItem(self.catalog_item_memento(item))
            }
            ManagedObject::ManagedBundle(bundle) => {
                AnyMemento::ManagedBundle(self.bundle_memento(bundle))
            }
        })
    }

    /// Mementos of everything managed
    #[must_use]
    pub fn brooklyn_memento(&self) -> BrooklynMemento {
        let mut all = BrooklynMemento::default();
        for bundle in self.mgmt.bundles() {
            all.add(AnyMemento::ManagedBundle(self.bundle_memento(&bundle)));
        }
        for location in self.mgmt.locations() {
            all.add(AnyMemento::Location(self.location_memento(&location)));
        }
        for adjunct in self.mgmt.adjuncts() {
            all.add(AnyMemento::Adjunct(self.adjunct_memento(&adjunct)));
        }
        for entity in self.mgmt.entities() {
            all.add(AnyMemento::Entity(self.entity_memento(&entity)));
        }
        for item in self.mgmt.catalog_items() {
            all.add(AnyMemento::CatalogItem(self.catalog_item_memento(&item)));
        }
        debug!(count = all.len(), "generated mementos");
        all
    }

    /// Entity memento
    #[must_use]
    pub fn entity_memento(&self, entity: &Entity) -> EntityMemento {
        let ty = entity.entity_type();
        let context_prefix = task_context(entity);

        let mut config = IndexMap::new();
        let mut config_unmatched = IndexMap::new();
        for (name, value) in &entity.config_map() {
            let value = self.persistable(&format!("{context_prefix}:{name}"), value);
            if entity.config_key(name).is_some() {
                config.insert(name.clone(), value);
            } else {
                config_unmatched.insert(name.clone(), value);
            }
        }

        let attributes = entity
            .persistable_attributes()
            .into_iter()
            .map(|(name, value)| {
                let value = self.persistable(&format!("{context_prefix}:{name}"), &value);
                (name, value)
            })
            .collect();

        EntityMemento {
            common: self.common(entity, &ty.name, ty.bundle.as_ref()),
            parent: entity.parent_id(),
            children: ids(&entity.children()),
            locations: ids(&entity.locations()),
            policies: ids(&entity.policies()),
            enrichers: ids(&entity.enrichers()),
            feeds: ids(&entity.feeds()),
            members: if ty.group {
                ids(&entity.members())
            } else {
                Vec::new()
            },
            config,
            config_unmatched,
            config_keys: entity.dynamic_config_keys(),
            attributes,
            effectors: entity.dynamic_effectors(),
            is_top_level_app: entity.is_top_level_app(),
        }
    }

    /// Location memento
    #[must_use]
    pub fn location_memento(&self, location: &Location) -> LocationMemento {
        let ty = location.location_type();
        let context_prefix = task_context(location);
        let config = location.config_map();
        let location_config_unused = config
            .names()
            .into_iter()
            .filter(|name| ty.config_key(name).is_none())
            .map(str::to_string)
            .collect();
        LocationMemento {
            common: self.common(location, &ty.name, ty.bundle.as_ref()),
            parent: location.parent_id(),
            children: ids(&location.children()),
            location_config: self.persistable_map(&context_prefix, &config),
            location_config_unused,
            flags: self.persistable_fields(&context_prefix, &ty.fields, location.flags()),
        }
    }

    /// Policy, enricher or feed memento
    #[must_use]
    pub fn adjunct_memento(&self, adjunct: &Adjunct) -> AdjunctMemento {
        let ty = adjunct.adjunct_type();
        let context_prefix = task_context(adjunct);
        AdjunctMemento {
            common: self.common(adjunct, &ty.name, ty.bundle.as_ref()),
            kind: adjunct.kind(),
            entity: adjunct.entity_id(),
            unique_tag: adjunct.unique_tag(),
            config: self.persistable_map(&context_prefix, &adjunct.config_map()),
            flags: self.persistable_fields(&context_prefix, &ty.fields, adjunct.fields()),
        }
    }

    /// Catalog item memento
    #[must_use]
    pub fn catalog_item_memento(&self, item: &CatalogItem) -> CatalogItemMemento {
        let details = item.details();
        CatalogItemMemento {
            common: self.common(item, &details.symbolic_name, None),
            symbolic_name: details.symbolic_name.clone(),
            version: details.version.clone(),
            description: details.description.clone(),
            icon_url: details.icon_url.clone(),
            item_type: details.item_type,
            plan_yaml: details.plan_yaml.clone(),
            libraries: ids(&item.libraries()),
            deprecated: item.is_deprecated(),
            disabled: item.is_disabled(),
        }
    }

    /// Managed bundle memento
    #[must_use]
    pub fn bundle_memento(&self, bundle: &ManagedBundle) -> ManagedBundleMemento {
        ManagedBundleMemento {
            common: self.common(bundle, bundle.symbolic_name(), None),
            symbolic_name: bundle.symbolic_name().to_string(),
            version: bundle.version().to_string(),
            url: bundle.url().map(str::to_string),
            checksum: bundle.checksum().map(str::to_string),
        }
    }

    fn common(
        &self,
        object: &impl BrooklynObject,
        type_name: &str,
        bundle: Option<&BundleRef>,
    ) -> MementoCommon {
        let core = object.core();
        MementoCommon {
            id: object.id().to_string(),
            type_name: self.persisted_type_name(type_name, bundle),
            display_name: core.display_name,
            catalog_item_id: core.catalog_item_id,
            catalog_item_id_search_path: core.catalog_item_id_search_path,
            tags: core.tags,
            relations: core.relations.as_map().clone(),
        }
    }

    /// Prefix the bundle symbolic name when the bundle is managed here
    fn persisted_type_name(&self, type_name: &str, bundle: Option<&BundleRef>) -> String {
        match bundle {
            Some(bundle) if self.mgmt.bundle_by_symbolic_name(&bundle.symbolic_name).is_some() => {
                format!("{}:{type_name}", bundle.symbolic_name)
            }
            _ => type_name.to_string(),
        }
    }

    fn persistable_map(&self, context_prefix: &str, map: &ConfigMap) -> IndexMap<String, ConfigValue> {
        map.iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    self.persistable(&format!("{context_prefix}:{name}"), value),
                )
            })
            .collect()
    }

    fn persistable_fields(
        &self,
        context_prefix: &str,
        fields: &[FieldDescriptor],
        values: IndexMap<String, ConfigValue>,
    ) -> IndexMap<String, ConfigValue> {
        values
            .into_iter()
            .filter(|(name, _)| {
                fields
                    .iter()
                    .find(|field| field.name == *name)
                    .map_or(true, FieldDescriptor::is_persisted)
            })
            .map(|(name, value)| {
                let value = self.persistable(&format!("{context_prefix}:{name}"), &value);
                (name, value)
            })
            .collect()
    }

    /// Replace task values by their result; unfinished or failed tasks become
    /// null with a once-per-context warning
    fn persistable(&self, context: &str, value: &ConfigValue) -> ConfigValue {
        self.persistable_within(context, value, &mut Vec::new())
    }

    /// `shared_path` holds the shared values being inlined, outermost first
    fn persistable_within(
        &self,
        context: &str,
        value: &ConfigValue,
        shared_path: &mut Vec<usize>,
    ) -> ConfigValue {
        match value {
            ConfigValue::Task(task) => match task.state() {
                TaskState::Succeeded(result) => self.persistable_within(context, &result, shared_path),
                TaskState::Pending => {
                    self.mgmt.diagnostics().warn_once(
                        context,
                        &format!("Persisting null for config '{context}': task '{}' not yet complete", task.name()),
                    );
                    ConfigValue::Null
                }
                TaskState::Failed(message) => {
                    self.mgmt.diagnostics().warn_once(
                        context,
                        &format!("Persisting null for config '{context}': task '{}' failed: {message}", task.name()),
                    );
                    ConfigValue::Null
                }
            },
            // inlined as it will be stored; a cycle is left for the serializer to reject
            ConfigValue::Shared(shared) => {
                let identity = shared.identity();
                if shared_path.contains(&identity) {
                    return value.clone();
                }
                shared_path.push(identity);
                let inlined = self.persistable_within(context, &shared.get(), shared_path);
                shared_path.pop();
                inlined
            }
            ConfigValue::List(items) => ConfigValue::List(
                items
                    .iter()
                    .map(|v| self.persistable_within(context, v, shared_path))
                    .collect(),
            ),
            ConfigValue::Set(items) => ConfigValue::Set(
                items
                    .iter()
                    .map(|v| self.persistable_within(context, v, shared_path))
                    .collect(),
            ),
            ConfigValue::Map(map) => ConfigValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.persistable_within(context, v, shared_path)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Task warnings are keyed by catalog item id, else display name, else id
fn task_context(object: &impl BrooklynObject) -> String {
    object
        .catalog_item_id()
        .or_else(|| object.display_name())
        .unwrap_or_else(|| object.id().to_string())
}

fn ids<T: BrooklynObject>(objects: &[T]) -> Vec<String> {
    objects.iter().map(|o| o.id().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bkl_config::{ConfigKey, TaskHandle};
    use bkl_core::{
        AdjunctKind, AdjunctType, EntityProxy, EntityType, LocationType, Sensor, TypeRegistry,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn context() -> ManagementContext {
        let types = TypeRegistry::new();
        types.register_entity(
            EntityType::new("Server")
                .with_config_key(ConfigKey::new("port"))
                .with_sensor(Sensor::transient("load")),
        );
        types.register_entity(
            EntityType::new("Bundled").from_bundle(BundleRef::new("acme", "1.0")),
        );
        types.register_location(
            LocationType::new("Simulated")
                .with_field(FieldDescriptor::new("cache").transient())
                .with_field(FieldDescriptor::new("name").transient()),
        );
        types.register_adjunct(
            AdjunctType::new("Restarter", AdjunctKind::Policy)
                .with_field(FieldDescriptor::new("COUNTER").static_field())
                .with_field(FieldDescriptor::new("limit").static_field().config_key()),
        );
        ManagementContext::new(Arc::new(types))
    }

    #[test]
    fn proxy_is_refused() {
        let mgmt = context();
        let entity = mgmt.create_entity("Server").unwrap();
        let err = MementoGenerator::new(&mgmt)
            .new_memento(&ManagedObject::EntityProxy(EntityProxy::new(entity)))
            .unwrap_err();
        assert!(matches!(err, MementoError::IllegalState(_)));
    }

    #[test]
    fn config_split_by_declared_keys() {
        let mgmt = context();
        let entity = mgmt.create_entity("Server").unwrap();
        entity.set_config("port", ConfigValue::from(80)).unwrap();
        entity.set_config("extra", ConfigValue::from("x")).unwrap();
        entity.add_dynamic_config_key(ConfigKey::new("dyn"));
        entity.set_config("dyn", ConfigValue::from(true)).unwrap();

        let memento = MementoGenerator::new(&mgmt).entity_memento(&entity);
        assert_eq!(memento.config.get("port"), Some(&ConfigValue::from(80)));
        assert_eq!(memento.config.get("dyn"), Some(&ConfigValue::from(true)));
        assert_eq!(
            memento.config_unmatched.get("extra"),
            Some(&ConfigValue::from("x"))
        );
        assert_eq!(memento.config_keys.len(), 1);
    }

    #[test]
    fn transient_attributes_skipped() {
        let mgmt = context();
        let entity = mgmt.create_entity("Server").unwrap();
        entity.set_attribute("load", ConfigValue::from(3)).unwrap();
        entity.set_attribute("host", ConfigValue::from("h1")).unwrap();
        let memento = MementoGenerator::new(&mgmt).entity_memento(&entity);
        assert!(memento.attributes.contains_key("host"));
        assert!(!memento.attributes.contains_key("load"));
    }

    #[test]
    fn task_config_persisted_as_result_or_null() {
        let mgmt = context();
        let entity = mgmt.create_entity("Server").unwrap();
        entity.set_display_name("web");
        entity
            .set_config(
                "done",
                ConfigValue::Task(TaskHandle::succeeded("t1", ConfigValue::from("v"))),
            )
            .unwrap();
        entity
            .set_config("later", ConfigValue::Task(TaskHandle::pending("t2")))
            .unwrap();

        let generator = MementoGenerator::new(&mgmt);
        let memento = generator.entity_memento(&entity);
        assert_eq!(
            memento.config_unmatched.get("done"),
            Some(&ConfigValue::from("v"))
        );
        assert_eq!(memento.config_unmatched.get("later"), Some(&ConfigValue::Null));
        assert!(mgmt.diagnostics().has_warned("web:later"));

        // second pass only logs at debug
        generator.entity_memento(&entity);
        assert!(!mgmt.diagnostics().warn_once("web:later", "again"));
    }

    #[test]
    fn tasks_inside_shared_and_nested_values_are_checked() {
        use bkl_config::SharedValue;

        let mgmt = context();
        let entity = mgmt.create_entity("Server").unwrap();
        entity.set_display_name("db");
        let cell = SharedValue::new(ConfigValue::map([(
            "password",
            ConfigValue::Task(TaskHandle::pending("secret")),
        )]));
        entity
            .set_config("creds", ConfigValue::Shared(cell))
            .unwrap();
        entity
            .set_config(
                "nested",
                ConfigValue::map([(
                    "inner",
                    ConfigValue::list([ConfigValue::Task(TaskHandle::succeeded(
                        "t",
                        ConfigValue::from(5),
                    ))]),
                )]),
            )
            .unwrap();

        let memento = MementoGenerator::new(&mgmt).entity_memento(&entity);
        assert_eq!(
            memento.config_unmatched.get("creds"),
            Some(&ConfigValue::map([("password", ConfigValue::Null)]))
        );
        assert_eq!(
            memento.config_unmatched.get("nested"),
            Some(&ConfigValue::map([("inner", ConfigValue::list([5]))]))
        );
        assert!(mgmt.diagnostics().has_warned("db:creds"));
    }

    #[test]
    fn cyclic_shared_value_stays_shared() {
        use bkl_config::SharedValue;

        let mgmt = context();
        let entity = mgmt.create_entity("Server").unwrap();
        let cell = SharedValue::new(ConfigValue::Null);
        cell.set(ConfigValue::map([("self", ConfigValue::Shared(cell.clone()))]));
        entity
            .set_config("loop", ConfigValue::Shared(cell))
            .unwrap();

        let memento = MementoGenerator::new(&mgmt).entity_memento(&entity);
        let inlined = memento.config_unmatched.get("loop").unwrap();
        assert!(matches!(
            inlined.as_map().and_then(|m| m.get("self")),
            Some(ConfigValue::Shared(_))
        ));
    }

    #[test]
    fn flags_filter_transient_and_static() {
        let mgmt = context();
        let location = mgmt.create_location("Simulated").unwrap();
        location.set_flag("cache", ConfigValue::from("big"));
        location.set_flag("name", ConfigValue::from("loc"));
        location.set_flag("region", ConfigValue::from("eu"));
        let memento = MementoGenerator::new(&mgmt).location_memento(&location);
        assert!(!memento.flags.contains_key("cache"));
        assert!(memento.flags.contains_key("name"));
        assert!(memento.flags.contains_key("region"));

        let policy = mgmt.create_adjunct("Restarter").unwrap();
        policy.set_field("COUNTER", ConfigValue::from(1));
        policy.set_field("limit", ConfigValue::from(3));
        let memento = MementoGenerator::new(&mgmt).adjunct_memento(&policy);
        assert!(!memento.flags.contains_key("COUNTER"));
        assert!(memento.flags.contains_key("limit"));
    }

    #[test]
    fn bundle_prefix_only_when_bundle_managed() {
        let mgmt = context();
        let entity = mgmt.create_entity("acme:Bundled").unwrap();
        let generator = MementoGenerator::new(&mgmt);
        assert_eq!(generator.entity_memento(&entity).common.type_name, "Bundled");

        mgmt.manage(&ManagedObject::ManagedBundle(ManagedBundle::new(
            "b1", "acme", "1.0",
        )))
        .unwrap();
        assert_eq!(
            generator.entity_memento(&entity).common.type_name,
            "acme:Bundled"
        );
    }
}
