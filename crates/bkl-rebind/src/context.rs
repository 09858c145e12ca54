//! Per-rebind registries and id lookup

use bkl_core::{
    Adjunct, AdjunctKind, BrooklynObject, BrooklynObjectType, CatalogItem, Entity, Location,
    ManagedBundle, ManagementContext,
};
use indexmap::IndexMap;
use tracing::debug;

use crate::error::{RebindError, RebindResult};
use crate::exception::RebindExceptionHandler;
use crate::phase::RebindPhase;

/// Objects reconstructed by one rebind pass, before they are managed
#[derive(Debug, Default)]
pub struct RebindContext {
    entities: IndexMap<String, Entity>,
    locations: IndexMap<String, Location>,
    adjuncts: IndexMap<String, Adjunct>,
    catalog_items: IndexMap<String, CatalogItem>,
    bundles: IndexMap<String, ManagedBundle>,
    phase: RebindPhase,
}

impl RebindContext {
    /// Create empty context in [`RebindPhase::Started`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase
    #[inline]
    #[must_use]
    pub fn phase(&self) -> RebindPhase {
        self.phase
    }

    /// Move to the next phase
    ///
    /// # Errors
    /// Returns [`RebindError::IllegalPhase`] unless `to` follows the current phase
    pub fn transition(&mut self, to: RebindPhase) -> RebindResult<()> {
        if !self.phase.can_transition_to(to) {
            return Err(RebindError::IllegalPhase {
                from: self.phase,
                to,
            });
        }
        debug!(from = %self.phase, %to, "rebind phase");
        self.phase = to;
        Ok(())
    }

    /// Move to [`RebindPhase::Failed`] unless already terminal
    pub fn mark_failed(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = RebindPhase::Failed;
        }
    }

    /// Register a reconstructed entity
    pub fn register_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.id().to_string(), entity);
    }

    /// Register a reconstructed location
    pub fn register_location(&mut self, location: Location) {
        self.locations.insert(location.id().to_string(), location);
    }

    /// Register a reconstructed policy, enricher or feed
    pub fn register_adjunct(&mut self, adjunct: Adjunct) {
        self.adjuncts.insert(adjunct.id().to_string(), adjunct);
    }

    /// Register a reconstructed catalog item
    pub fn register_catalog_item(&mut self, item: CatalogItem) {
        self.catalog_items.insert(item.id().to_string(), item);
    }

    /// Register a reconstructed bundle
    pub fn register_bundle(&mut self, bundle: ManagedBundle) {
        self.bundles.insert(bundle.id().to_string(), bundle);
    }

    /// Remove an entity
    pub fn unregister_entity(&mut self, id: &str) -> Option<Entity> {
        self.entities.shift_remove(id)
    }

    /// Remove a location
    pub fn unregister_location(&mut self, id: &str) -> Option<Location> {
        self.locations.shift_remove(id)
    }

    /// Remove an adjunct
    pub fn unregister_adjunct(&mut self, id: &str) -> Option<Adjunct> {
        self.adjuncts.shift_remove(id)
    }

    /// Remove a catalog item
    pub fn unregister_catalog_item(&mut self, id: &str) -> Option<CatalogItem> {
        self.catalog_items.shift_remove(id)
    }

    /// Remove a bundle
    pub fn unregister_bundle(&mut self, id: &str) -> Option<ManagedBundle> {
        self.bundles.shift_remove(id)
    }

    /// Entity by id
    #[must_use]
    pub fn entity(&self, id: &str) -> Option<Entity> {
        self.entities.get(id).cloned()
    }

    /// Location by id
    #[must_use]
    pub fn location(&self, id: &str) -> Option<Location> {
        self.locations.get(id).cloned()
    }

    /// Adjunct by id
    #[must_use]
    pub fn adjunct(&self, id: &str) -> Option<Adjunct> {
        self.adjuncts.get(id).cloned()
    }

    /// Catalog item by id
    #[must_use]
    pub fn catalog_item(&self, id: &str) -> Option<CatalogItem> {
        self.catalog_items.get(id).cloned()
    }

    /// Bundle by id
    #[must_use]
    pub fn bundle(&self, id: &str) -> Option<ManagedBundle> {
        self.bundles.get(id).cloned()
    }

    /// Entities, in registration order
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.entities.values().cloned().collect()
    }

    /// Locations, in registration order
    #[must_use]
    pub fn locations(&self) -> Vec<Location> {
        self.locations.values().cloned().collect()
    }

    /// Adjuncts, in registration order
    #[must_use]
    pub fn adjuncts(&self) -> Vec<Adjunct> {
        self.adjuncts.values().cloned().collect()
    }

    /// Catalog items, in registration order
    #[must_use]
    pub fn catalog_items(&self) -> Vec<CatalogItem> {
        self.catalog_items.values().cloned().collect()
    }

    /// Bundles, in registration order
    #[must_use]
    pub fn bundles(&self) -> Vec<ManagedBundle> {
        self.bundles.values().cloned().collect()
    }

    /// Number of registered objects of one type
    #[must_use]
    pub fn count(&self, kind: BrooklynObjectType) -> usize {
        match kind {
            BrooklynObjectType::Entity => self.entities.len(),
            BrooklynObjectType::Location => self.locations.len(),
            BrooklynObjectType::Policy | BrooklynObjectType::Enricher | BrooklynObjectType::Feed => {
                let wanted = kind.adjunct_kind();
                self.adjuncts
                    .values()
                    .filter(|a| Some(a.kind()) == wanted)
                    .count()
            }
            BrooklynObjectType::CatalogItem => self.catalog_items.len(),
            BrooklynObjectType::ManagedBundle => self.bundles.len(),
        }
    }

    /// Mark every registered object read-only or writable
    pub fn set_all_read_only(&self, read_only: bool) {
        for entity in self.entities.values() {
            entity.set_read_only(read_only);
        }
        for location in self.locations.values() {
            location.set_read_only(read_only);
        }
        for adjunct in self.adjuncts.values() {
            adjunct.set_read_only(read_only);
        }
        for item in self.catalog_items.values() {
            item.set_read_only(read_only);
        }
        for bundle in self.bundles.values() {
            bundle.set_read_only(read_only);
        }
    }

    /// Drop every registered object
    pub fn clear(&mut self) {
        self.entities.clear();
        self.locations.clear();
        self.adjuncts.clear();
        self.catalog_items.clear();
        self.bundles.clear();
    }

    /// Id resolver over this context, falling back to already managed objects
    #[must_use]
    pub fn lookup<'a>(
        &'a self,
        mgmt: &'a ManagementContext,
        handler: &'a dyn RebindExceptionHandler,
    ) -> LookupContext<'a> {
        LookupContext {
            context: self,
            mgmt,
            handler,
        }
    }
}

/// Resolves ids met while wiring objects
///
/// Ids are looked up among reconstructed objects first, then among managed
/// ones. Ids found in neither are reported to the exception handler as
/// dangling references and resolve to `None`.
#[derive(Clone, Copy)]
pub struct LookupContext<'a> {
    context: &'a RebindContext,
    mgmt: &'a ManagementContext,
    handler: &'a dyn RebindExceptionHandler,
}

impl std::fmt::Debug for LookupContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupContext")
            .field("phase", &self.context.phase())
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

impl LookupContext<'_> {
    fn found_or_dangling<T>(
        &self,
        kind: BrooklynObjectType,
        id: &str,
        found: Option<T>,
    ) -> RebindResult<Option<T>> {
        if found.is_none() {
            self.handler.on_dangling(kind, id)?;
        }
        Ok(found)
    }

    /// Resolve an entity id
    ///
    /// # Errors
    /// Returns the handler's error for a dangling id
    pub fn entity(&self, id: &str) -> RebindResult<Option<Entity>> {
        let found = self.context.entity(id).or_else(|| self.mgmt.entity(id));
        self.found_or_dangling(BrooklynObjectType::Entity, id, found)
    }

    /// Resolve a location id
    ///
    /// # Errors
    /// Returns the handler's error for a dangling id
    pub fn location(&self, id: &str) -> RebindResult<Option<Location>> {
        let found = self.context.location(id).or_else(|| self.mgmt.location(id));
        self.found_or_dangling(BrooklynObjectType::Location, id, found)
    }

    /// Resolve a policy, enricher or feed id; an adjunct of another kind
    /// counts as dangling
    ///
    /// # Errors
    /// Returns the handler's error for a dangling id
    pub fn adjunct(&self, kind: AdjunctKind, id: &str) -> RebindResult<Option<Adjunct>> {
        let found = self
            .context
            .adjunct(id)
            .or_else(|| self.mgmt.adjunct(id))
            .filter(|adjunct| adjunct.kind() == kind);
        self.found_or_dangling(kind.object_type(), id, found)
    }

    /// Resolve a catalog item id
    ///
    /// # Errors
    /// Returns the handler's error for a dangling id
    pub fn catalog_item(&self, id: &str) -> RebindResult<Option<CatalogItem>> {
        let found = self
            .context
            .catalog_item(id)
            .or_else(|| self.mgmt.catalog_item(id));
        self.found_or_dangling(BrooklynObjectType::CatalogItem, id, found)
    }

    /// Resolve a bundle id
    ///
    /// # Errors
    /// Returns the handler's error for a dangling id
    pub fn bundle(&self, id: &str) -> RebindResult<Option<ManagedBundle>> {
        let found = self.context.bundle(id).or_else(|| self.mgmt.bundle(id));
        self.found_or_dangling(BrooklynObjectType::ManagedBundle, id, found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{DefaultRebindExceptionHandler, FailureMode, FailureModes};
    use bkl_core::{LocationType, TypeRegistry};
    use std::sync::Arc;

    #[test]
    fn phase_transitions_are_checked() {
        let mut context = RebindContext::new();
        assert!(context.transition(RebindPhase::LocationsReconstructed).is_err());
        context.transition(RebindPhase::BundlesInstalled).unwrap();
        context.mark_failed();
        assert_eq!(context.phase(), RebindPhase::Failed);
        assert!(context.transition(RebindPhase::LocationsReconstructed).is_err());
    }

    #[test]
    fn lookup_prefers_context_then_management() {
        let mgmt = ManagementContext::new(Arc::new(TypeRegistry::new()));
        let ty = Arc::new(LocationType::new("Simulated"));
        let managed = Location::new("managed", Arc::clone(&ty));
        mgmt.manage(&bkl_core::ManagedObject::Location(managed)).unwrap();

        let mut context = RebindContext::new();
        context.register_location(Location::new("fresh", ty));
        let handler = DefaultRebindExceptionHandler::new(FailureModes::all(FailureMode::Continue));
        let lookup = context.lookup(&mgmt, &handler);

        assert!(lookup.location("fresh").unwrap().is_some());
        assert!(lookup.location("managed").unwrap().is_some());
        assert!(lookup.location("gone").unwrap().is_none());
        assert_eq!(handler.warnings().len(), 1);
    }

    #[test]
    fn dangling_lookup_fails_fast_when_asked() {
        let mgmt = ManagementContext::new(Arc::new(TypeRegistry::new()));
        let context = RebindContext::new();
        let handler = DefaultRebindExceptionHandler::new(FailureModes::all(FailureMode::FailFast));
        let err = context
            .lookup(&mgmt, &handler)
            .entity("missing")
            .unwrap_err();
        assert_eq!(err.failures()[0].kind, BrooklynObjectType::Entity);
    }

    #[test]
    fn read_only_applies_to_everything() {
        let mut context = RebindContext::new();
        context.register_location(Location::new("l1", Arc::new(LocationType::new("Simulated"))));
        context.set_all_read_only(true);
        assert!(context.location("l1").unwrap().is_read_only());
        assert!(context.unregister_location("l1").is_some());
        assert_eq!(context.count(BrooklynObjectType::Location), 0);
    }
}
