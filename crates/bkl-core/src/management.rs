//! Management context
//!
//! Provides [`ManagementContext`], the registry of every managed object on
//! this node. Each object id may be managed at most once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::adjunct::Adjunct;
use crate::catalog::{CatalogItem, ManagedBundle};
use crate::diagnostics::Diagnostics;
use crate::entity::{Entity, EntityProxy};
use crate::error::{ModelError, ModelResult};
use crate::location::Location;
use crate::object::{new_id, BrooklynObject, BrooklynObjectType, ManagedObject};
use crate::types::TypeRegistry;

/// Registry of managed objects on one management node
///
/// Registries are concurrent maps; each object is inserted once and removed
/// on unmanage.
#[derive(Debug)]
pub struct ManagementContext {
    node_id: String,
    types: Arc<TypeRegistry>,
    entities: DashMap<String, Entity>,
    locations: DashMap<String, Location>,
    adjuncts: DashMap<String, Adjunct>,
    catalog: DashMap<String, CatalogItem>,
    bundles: DashMap<String, ManagedBundle>,
    diagnostics: Diagnostics,
    read_only: AtomicBool,
}

impl ManagementContext {
    /// Create empty context over a type registry
    #[must_use]
    pub fn new(types: Arc<TypeRegistry>) -> Self {
        Self::with_node_id(new_id(), types)
    }

    /// Create empty context with an explicit node id
    #[must_use]
    pub fn with_node_id(node_id: impl Into<String>, types: Arc<TypeRegistry>) -> Self {
        Self {
            node_id: node_id.into(),
            types,
            entities: DashMap::new(),
            locations: DashMap::new(),
            adjuncts: DashMap::new(),
            catalog: DashMap::new(),
            bundles: DashMap::new(),
            diagnostics: Diagnostics::new(),
            read_only: AtomicBool::new(false),
        }
    }

    /// Management node id
    #[inline]
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Type registry
    #[inline]
    #[must_use]
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// Scoped diagnostics
    #[inline]
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Whether this node only mirrors state (hot standby)
    #[inline]
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Mark node read-only or writable
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    // Creation

    /// Create an unmanaged entity of a registered type
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownType`] if the type is not registered
    pub fn create_entity(&self, type_name: &str) -> ModelResult<Entity> {
        let ty = self
            .types
            .resolve_entity(type_name, &[])
            .ok_or_else(|| unknown(BrooklynObjectType::Entity, type_name))?;
        Ok(Entity::new(new_id(), ty))
    }

    /// Create an unmanaged location of a registered type
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownType`] if the type is not registered
    pub fn create_location(&self, type_name: &str) -> ModelResult<Location> {
        let ty = self
            .types
            .resolve_location(type_name, &[])
            .ok_or_else(|| unknown(BrooklynObjectType::Location, type_name))?;
        Ok(Location::new(new_id(), ty))
    }

    /// Create an unattached adjunct of a registered type
    ///
    /// # Errors
    /// Returns [`ModelError::UnknownType`] if the type is not registered
    pub fn create_adjunct(&self, type_name: &str) -> ModelResult<Adjunct> {
        let ty = self
            .types
            .resolve_adjunct(type_name, &[])
            .ok_or_else(|| unknown(BrooklynObjectType::Policy, type_name))?;
        Ok(Adjunct::new(new_id(), ty))
    }

    // Managing

    /// Manage a single object
    ///
    /// # Errors
    /// Returns [`ModelError::AlreadyManaged`] if the id is already managed, or
    /// [`ModelError::IllegalState`] for an entity proxy
    pub fn manage(&self, object: &ManagedObject) -> ModelResult<()> {
        match object {
            ManagedObject::Entity(entity) => insert_unique(&self.entities, entity),
            ManagedObject::EntityProxy(proxy) => Err(ModelError::IllegalState(format!(
                "cannot manage proxy of entity {}; manage the entity itself",
                proxy.id()
            ))),
            ManagedObject::Location(location) => insert_unique(&self.locations, location),
            ManagedObject::Adjunct(adjunct) => insert_unique(&self.adjuncts, adjunct),
            ManagedObject::CatalogItem(item) => insert_unique(&self.catalog, item),
            ManagedObject::ManagedBundle(bundle) => insert_unique(&self.bundles, bundle),
        }
    }

    /// Manage an entity, its adjuncts and all descendants
    ///
    /// # Errors
    /// Returns the first manage failure
    pub fn manage_entity_tree(&self, root: &Entity) -> ModelResult<()> {
        insert_unique(&self.entities, root)?;
        for adjunct in root.adjuncts() {
            insert_unique(&self.adjuncts, &adjunct)?;
        }
        for child in root.children() {
            self.manage_entity_tree(&child)?;
        }
        Ok(())
    }

    /// Manage a location and all descendants
    ///
    /// # Errors
    /// Returns the first manage failure
    pub fn manage_location_tree(&self, root: &Location) -> ModelResult<()> {
        insert_unique(&self.locations, root)?;
        for child in root.children() {
            self.manage_location_tree(&child)?;
        }
        Ok(())
    }

    /// Stop managing an object
    pub fn unmanage(&self, kind: BrooklynObjectType, id: &str) -> bool {
        let removed = match kind {
            BrooklynObjectType::Entity => self.entities.remove(id).is_some(),
            BrooklynObjectType::Location => self.locations.remove(id).is_some(),
            BrooklynObjectType::Policy
            | BrooklynObjectType::Enricher
            | BrooklynObjectType::Feed => self.adjuncts.remove(id).is_some(),
            BrooklynObjectType::CatalogItem => self.catalog.remove(id).is_some(),
            BrooklynObjectType::ManagedBundle => self.bundles.remove(id).is_some(),
        };
        if removed {
            debug!(%kind, id, "unmanaged");
        }
        removed
    }

    /// Stop managing everything
    pub fn unmanage_all(&self) {
        let count = self.total_count();
        self.entities.clear();
        self.locations.clear();
        self.adjuncts.clear();
        self.catalog.clear();
        self.bundles.clear();
        info!(node = %self.node_id, count, "unmanaged all objects");
    }

    // Lookup

    /// Managed entity implementation
    #[must_use]
    pub fn entity(&self, id: &str) -> Option<Entity> {
        self.entities.get(id).map(|e| e.value().clone())
    }

    /// Managed entity, as a management-layer proxy
    #[must_use]
    pub fn lookup_entity(&self, id: &str) -> Option<EntityProxy> {
        self.entity(id).map(EntityProxy::new)
    }

    /// Managed location
    #[must_use]
    pub fn location(&self, id: &str) -> Option<Location> {
        self.locations.get(id).map(|l| l.value().clone())
    }

    /// Managed policy, enricher or feed
    #[must_use]
    pub fn adjunct(&self, id: &str) -> Option<Adjunct> {
        self.adjuncts.get(id).map(|a| a.value().clone())
    }

    /// Managed catalog item
    #[must_use]
    pub fn catalog_item(&self, id: &str) -> Option<CatalogItem> {
        self.catalog.get(id).map(|c| c.value().clone())
    }

    /// Managed bundle
    #[must_use]
    pub fn bundle(&self, id: &str) -> Option<ManagedBundle> {
        self.bundles.get(id).map(|b| b.value().clone())
    }

    /// Managed bundle by symbolic name
    #[must_use]
    pub fn bundle_by_symbolic_name(&self, symbolic_name: &str) -> Option<ManagedBundle> {
        self.bundles
            .iter()
            .find(|b| b.value().symbolic_name() == symbolic_name)
            .map(|b| b.value().clone())
    }

    /// All managed entities
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.entities.iter().map(|e| e.value().clone()).collect()
    }

    /// All managed locations
    #[must_use]
    pub fn locations(&self) -> Vec<Location> {
        self.locations.iter().map(|l| l.value().clone()).collect()
    }

    /// All managed adjuncts
    #[must_use]
    pub fn adjuncts(&self) -> Vec<Adjunct> {
        self.adjuncts.iter().map(|a| a.value().clone()).collect()
    }

    /// All managed catalog items
    #[must_use]
    pub fn catalog_items(&self) -> Vec<CatalogItem> {
        self.catalog.iter().map(|c| c.value().clone()).collect()
    }

    /// All managed bundles
    #[must_use]
    pub fn bundles(&self) -> Vec<ManagedBundle> {
        self.bundles.iter().map(|b| b.value().clone()).collect()
    }

    /// Top-level applications
    #[must_use]
    pub fn applications(&self) -> Vec<Entity> {
        self.entities
            .iter()
            .filter(|e| e.value().is_top_level_app())
            .map(|e| e.value().clone())
            .collect()
    }

    /// Number of managed objects of a type
    #[must_use]
    pub fn count(&self, kind: BrooklynObjectType) -> usize {
        match kind {
            BrooklynObjectType::Entity => self.entities.len(),
            BrooklynObjectType::Location => self.locations.len(),
            BrooklynObjectType::Policy
            | BrooklynObjectType::Enricher
            | BrooklynObjectType::Feed => self
                .adjuncts
                .iter()
                .filter(|a| a.value().kind().object_type() == kind)
                .count(),
            BrooklynObjectType::CatalogItem => self.catalog.len(),
            BrooklynObjectType::ManagedBundle => self.bundles.len(),
        }
    }

    /// Number of managed objects of all types
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.entities.len()
            + self.locations.len()
            + self.adjuncts.len()
            + self.catalog.len()
            + self.bundles.len()
    }
}

fn unknown(kind: BrooklynObjectType, name: &str) -> ModelError {
    ModelError::UnknownType {
        kind,
        name: name.to_string(),
    }
}

fn insert_unique<T>(registry: &DashMap<String, T>, object: &T) -> ModelResult<()>
where
    T: BrooklynObject + Clone,
{
    match registry.entry(object.id().to_string()) {
        Entry::Occupied(_) => Err(ModelError::AlreadyManaged {
            kind: object.object_type(),
            id: object.id().to_string(),
        }),
        Entry::Vacant(slot) => {
            slot.insert(object.clone());
            debug!(kind = %object.object_type(), id = object.id(), "managed");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjunct::AdjunctKind;
    use crate::types::{AdjunctType, EntityType, LocationType};

    fn context() -> ManagementContext {
        let types = TypeRegistry::new();
        types.register_entity(EntityType::new("App").application());
        types.register_entity(EntityType::new("Node"));
        types.register_location(LocationType::new("Simulated"));
        types.register_adjunct(AdjunctType::new("Restarter", AdjunctKind::Policy));
        ManagementContext::new(Arc::new(types))
    }

    #[test]
    fn manage_tree_registers_descendants_and_adjuncts() {
        let mgmt = context();
        let app = mgmt.create_entity("App").unwrap();
        let node = mgmt.create_entity("Node").unwrap();
        let policy = mgmt.create_adjunct("Restarter").unwrap();
        app.add_child(&node).unwrap();
        node.add_policy(&policy).unwrap();

        mgmt.manage_entity_tree(&app).unwrap();
        assert_eq!(mgmt.count(BrooklynObjectType::Entity), 2);
        assert_eq!(mgmt.count(BrooklynObjectType::Policy), 1);
        assert_eq!(mgmt.applications().len(), 1);
        assert!(mgmt.lookup_entity(node.id()).is_some());
    }

    #[test]
    fn duplicate_manage_is_refused() {
        let mgmt = context();
        let node = mgmt.create_entity("Node").unwrap();
        mgmt.manage(&ManagedObject::Entity(node.clone())).unwrap();
        let err = mgmt.manage(&ManagedObject::Entity(node)).unwrap_err();
        assert!(matches!(err, ModelError::AlreadyManaged { .. }));
    }

    #[test]
    fn proxy_cannot_be_managed() {
        let mgmt = context();
        let node = mgmt.create_entity("Node").unwrap();
        let proxy = ManagedObject::EntityProxy(EntityProxy::new(node));
        assert!(matches!(
            mgmt.manage(&proxy),
            Err(ModelError::IllegalState(_))
        ));
    }

    #[test]
    fn unknown_type_is_reported() {
        let mgmt = context();
        assert!(matches!(
            mgmt.create_entity("Nope"),
            Err(ModelError::UnknownType { .. })
        ));
    }

    #[test]
    fn unmanage_all_empties_registries() {
        let mgmt = context();
        let location = mgmt.create_location("Simulated").unwrap();
        mgmt.manage_location_tree(&location).unwrap();
        assert!(mgmt.unmanage(BrooklynObjectType::Location, location.id()));
        mgmt.manage_location_tree(&location).unwrap();
        mgmt.unmanage_all();
        assert_eq!(mgmt.total_count(), 0);
    }
}
