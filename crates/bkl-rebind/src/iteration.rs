//! One rebind pass
//!
//! Objects are reconstructed by type in dependency order: bundles, locations,
//! policies/enrichers/feeds, entities, then catalog items. Within a type every
//! object is created and registered before any of them is wired, so
//! references between objects of the same type always resolve. Nothing is
//! managed until every object has been reconstructed; a failed pass unmanages
//! whatever it managed.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bkl_core::{
    Adjunct, AdjunctKind, BrooklynObject, BrooklynObjectType, CatalogItem, CatalogItemDetails,
    Entity, Location, ManagedBundle, ManagedObject, ManagementContext, Relations,
};
use bkl_memento::{BrooklynMemento, MementoCommon};
use tracing::{debug, info};

use crate::context::{LookupContext, RebindContext};
use crate::error::RebindResult;
use crate::exception::RebindExceptionHandler;
use crate::phase::RebindPhase;

/// Outcome of a successful rebind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebindSummary {
    /// Managed objects per type
    pub counts: BTreeMap<BrooklynObjectType, usize>,
    /// Top-level application ids
    pub application_ids: Vec<String>,
    /// Failures tolerated along the way
    pub warnings: Vec<String>,
    /// Whether objects were rebound read-only
    pub read_only: bool,
    /// Time taken
    pub duration: Duration,
}

impl RebindSummary {
    /// Managed objects of one type
    #[must_use]
    pub fn count(&self, kind: BrooklynObjectType) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Managed objects of all types
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Reconstructs live objects from a [`BrooklynMemento`] and manages them
pub struct RebindIteration<'a> {
    mgmt: &'a ManagementContext,
    memento: &'a BrooklynMemento,
    handler: &'a dyn RebindExceptionHandler,
    read_only: bool,
    context: RebindContext,
    managed: Vec<(BrooklynObjectType, String)>,
}

impl std::fmt::Debug for RebindIteration<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebindIteration")
            .field("node", &self.mgmt.node_id())
            .field("phase", &self.context.phase())
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl<'a> RebindIteration<'a> {
    /// Prepare a pass
    #[must_use]
    pub fn new(
        mgmt: &'a ManagementContext,
        memento: &'a BrooklynMemento,
        handler: &'a dyn RebindExceptionHandler,
    ) -> Self {
        Self {
            mgmt,
            memento,
            handler,
            read_only: false,
            context: RebindContext::new(),
            managed: Vec::new(),
        }
    }

    /// Rebind without taking ownership (hot standby)
    #[inline]
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Run the pass
    ///
    /// # Errors
    /// Returns the exception handler's error; on error nothing from this
    /// pass remains managed
    pub fn run(mut self) -> RebindResult<RebindSummary> {
        let started = Instant::now();
        info!(
            node = self.mgmt.node_id(),
            objects = self.memento.len(),
            read_only = self.read_only,
            "rebind starting"
        );
        match self.rebind_all() {
            Ok(()) => {
                let summary = self.summary(started.elapsed());
                info!(
                    objects = summary.total(),
                    applications = summary.application_ids.len(),
                    warnings = summary.warnings.len(),
                    "rebind complete"
                );
                Ok(summary)
            }
            Err(error) => {
                self.context.mark_failed();
                self.rollback();
                self.handler.on_failed(&error);
                Err(error)
            }
        }
    }

    fn rebind_all(&mut self) -> RebindResult<()> {
        self.install_bundles()?;
        self.context.transition(RebindPhase::BundlesInstalled)?;
        self.reconstruct_locations()?;
        self.context.transition(RebindPhase::LocationsReconstructed)?;
        self.reconstruct_adjuncts()?;
        self.context.transition(RebindPhase::AdjunctsReconstructed)?;
        self.reconstruct_entities()?;
        self.context.transition(RebindPhase::EntitiesReconstructed)?;
        self.reconstruct_catalog()?;
        self.context.transition(RebindPhase::CatalogReconstructed)?;

        if self.read_only {
            self.context.set_all_read_only(true);
        }
        self.manage_all()?;
        self.handler.on_done()?;
        self.context.transition(RebindPhase::Complete)
    }

    fn lookup(&self) -> LookupContext<'_> {
        self.context.lookup(self.mgmt, self.handler)
    }

    fn install_bundles(&mut self) -> RebindResult<()> {
        for m in self.memento.bundles.values() {
            let bundle = ManagedBundle::with_source(
                m.common.id.clone(),
                m.symbolic_name.clone(),
                m.version.clone(),
                m.url.clone(),
                m.checksum.clone(),
            );
            restore_core(&bundle, &m.common);
            self.context.register_bundle(bundle);
        }
        Ok(())
    }

    fn reconstruct_locations(&mut self) -> RebindResult<()> {
        let memento = self.memento;
        for m in memento.locations.values() {
            let types = self.mgmt.types();
            match types.resolve_location(&m.common.type_name, &m.common.catalog_item_id_search_path) {
                Some(ty) => self
                    .context
                    .register_location(Location::new(m.common.id.clone(), ty)),
                None => self.handler.on_create_failed(
                    BrooklynObjectType::Location,
                    &m.common.id,
                    &format!("no location type '{}'", m.common.type_name),
                )?,
            }
        }

        for m in memento.locations.values() {
            let Some(location) = self.context.location(&m.common.id) else {
                continue;
            };
            debug!(id = %m.common.id, "wiring location");
            restore_core(&location, &m.common);
            for (name, value) in &m.location_config {
                if let Err(e) = location.set_config(name, value.clone()) {
                    self.handler.on_add_config_failed(
                        BrooklynObjectType::Location,
                        &m.common.id,
                        name,
                        &e.to_string(),
                    )?;
                }
            }
            for (name, value) in &m.flags {
                location.set_flag(name.clone(), value.clone());
            }

            for child_id in &m.children {
                if let Some(child) = self.lookup().location(child_id)? {
                    if let Err(e) = location.add_child(&child) {
                        self.handler.on_rebind_failed(
                            BrooklynObjectType::Location,
                            child_id,
                            &e.to_string(),
                        )?;
                    }
                }
            }
        }

        // parents not listing the child still adopt it
        for m in memento.locations.values() {
            let (Some(location), Some(parent_id)) = (self.context.location(&m.common.id), &m.parent)
            else {
                continue;
            };
            if location.parent_id().as_ref() != Some(parent_id) {
                if let Some(parent) = self.lookup().location(parent_id)? {
                    if let Err(e) = parent.add_child(&location) {
                        self.handler.on_rebind_failed(
                            BrooklynObjectType::Location,
                            &m.common.id,
                            &e.to_string(),
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn reconstruct_adjuncts(&mut self) -> RebindResult<()> {
        let memento = self.memento;
        let all = memento
            .policies
            .values()
            .chain(memento.enrichers.values())
            .chain(memento.feeds.values());

        for m in all.clone() {
            let kind = m.kind.object_type();
            let types = self.mgmt.types();
            match types.resolve_adjunct(&m.common.type_name, &m.common.catalog_item_id_search_path) {
                Some(ty) if ty.kind == m.kind => self
                    .context
                    .register_adjunct(Adjunct::new(m.common.id.clone(), ty)),
                Some(ty) => self.handler.on_create_failed(
                    kind,
                    &m.common.id,
                    &format!("type '{}' is a {:?}, not a {:?}", ty.name, ty.kind, m.kind),
                )?,
                None => self.handler.on_create_failed(
                    kind,
                    &m.common.id,
                    &format!("no {kind} type '{}'", m.common.type_name),
                )?,
            }
        }

        for m in all {
            let Some(adjunct) = self.context.adjunct(&m.common.id) else {
                continue;
            };
            restore_core(&adjunct, &m.common);
            adjunct.set_unique_tag(m.unique_tag.clone());
            for (name, value) in &m.config {
                if let Err(e) = adjunct.set_config(name, value.clone()) {
                    self.handler.on_add_config_failed(
                        m.kind.object_type(),
                        &m.common.id,
                        name,
                        &e.to_string(),
                    )?;
                }
            }
            for (name, value) in &m.flags {
                adjunct.set_field(name.clone(), value.clone());
            }
        }
        Ok(())
    }

    fn reconstruct_entities(&mut self) -> RebindResult<()> {
        let memento = self.memento;
        for m in memento.entities.values() {
            let types = self.mgmt.types();
            match types.resolve_entity(&m.common.type_name, &m.common.catalog_item_id_search_path) {
                Some(ty) => self
                    .context
                    .register_entity(Entity::new(m.common.id.clone(), ty)),
                None => self.handler.on_create_failed(
                    BrooklynObjectType::Entity,
                    &m.common.id,
                    &format!("no entity type '{}'", m.common.type_name),
                )?,
            }
        }

        for m in memento.entities.values() {
            let Some(entity) = self.context.entity(&m.common.id) else {
                continue;
            };
            let id = m.common.id.as_str();
            debug!(id, "wiring entity");
            restore_core(&entity, &m.common);
            if m.is_top_level_app {
                entity.set_application(true);
            }

            for key in &m.config_keys {
                entity.add_dynamic_config_key(key.clone());
            }
            for (name, value) in m.config.iter().chain(&m.config_unmatched) {
                if let Err(e) = entity.set_config(name, value.clone()) {
                    self.handler.on_add_config_failed(
                        BrooklynObjectType::Entity,
                        id,
                        name,
                        &e.to_string(),
                    )?;
                }
            }
            for (name, value) in &m.attributes {
                if let Err(e) = entity.set_attribute(name.clone(), value.clone()) {
                    self.handler
                        .on_rebind_failed(BrooklynObjectType::Entity, id, &e.to_string())?;
                }
            }
            for effector in &m.effectors {
                entity.add_dynamic_effector(effector.clone());
            }

            let lookup = self.lookup();
            for child_id in &m.children {
                if let Some(child) = lookup.entity(child_id)? {
                    if let Err(e) = entity.add_child(&child) {
                        self.handler.on_rebind_failed(
                            BrooklynObjectType::Entity,
                            child_id,
                            &e.to_string(),
                        )?;
                    }
                }
            }
            for location_id in &m.locations {
                if let Some(location) = lookup.location(location_id)? {
                    entity.add_location(&location);
                }
            }
            for member_id in &m.members {
                if let Some(member) = lookup.entity(member_id)? {
                    if let Err(e) = entity.add_member(&member) {
                        self.handler
                            .on_rebind_failed(BrooklynObjectType::Entity, id, &e.to_string())?;
                    }
                }
            }

            let slots = [
                (AdjunctKind::Policy, &m.policies),
                (AdjunctKind::Enricher, &m.enrichers),
                (AdjunctKind::Feed, &m.feeds),
            ];
            for (kind, ids) in slots {
                for adjunct_id in ids {
                    if let Some(adjunct) = lookup.adjunct(kind, adjunct_id)? {
                        if let Err(e) = entity.add_adjunct(&adjunct) {
                            self.handler.on_add_adjunct_failed(
                                kind.object_type(),
                                adjunct_id,
                                id,
                                &e.to_string(),
                            )?;
                        }
                    }
                }
            }
        }

        for m in memento.entities.values() {
            let (Some(entity), Some(parent_id)) = (self.context.entity(&m.common.id), &m.parent) else {
                continue;
            };
            if entity.parent_id().as_ref() != Some(parent_id) {
                if let Some(parent) = self.lookup().entity(parent_id)? {
                    if let Err(e) = parent.add_child(&entity) {
                        self.handler.on_rebind_failed(
                            BrooklynObjectType::Entity,
                            &m.common.id,
                            &e.to_string(),
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn reconstruct_catalog(&mut self) -> RebindResult<()> {
        for m in self.memento.catalog_items.values() {
            let details = CatalogItemDetails {
                symbolic_name: m.symbolic_name.clone(),
                version: m.version.clone(),
                description: m.description.clone(),
                icon_url: m.icon_url.clone(),
                item_type: m.item_type,
                plan_yaml: m.plan_yaml.clone(),
            };
            let item = CatalogItem::new(m.common.id.clone(), details);
            restore_core(&item, &m.common);
            item.set_deprecated(m.deprecated);
            item.set_disabled(m.disabled);
            for bundle_id in &m.libraries {
                if let Some(bundle) = self.lookup().bundle(bundle_id)? {
                    item.add_library(bundle);
                }
            }
            self.context.register_catalog_item(item);
        }
        Ok(())
    }

    fn manage_all(&mut self) -> RebindResult<()> {
        let objects = self
            .context
            .bundles()
            .into_iter()
            .map(ManagedObject::ManagedBundle)
            .chain(self.context.locations().into_iter().map(ManagedObject::Location))
            .chain(self.context.adjuncts().into_iter().map(ManagedObject::Adjunct))
            .chain(self.context.entities().into_iter().map(ManagedObject::Entity))
            .chain(
                self.context
                    .catalog_items()
                    .into_iter()
                    .map(ManagedObject::CatalogItem),
            )
            .collect::<Vec<_>>();

        for object in objects {
            let kind = object.object_type();
            match self.mgmt.manage(&object) {
                Ok(()) => self.managed.push((kind, object.id().to_string())),
                Err(e) => self
                    .handler
                    .on_manage_failed(kind, object.id(), &e.to_string())?,
            }
        }
        Ok(())
    }

    fn rollback(&mut self) {
        let count = self.managed.len();
        for (kind, id) in self.managed.drain(..).rev() {
            self.mgmt.unmanage(kind, &id);
        }
        self.context.clear();
        debug!(unmanaged = count, "rebind rolled back");
    }

    fn summary(&self, duration: Duration) -> RebindSummary {
        let mut counts = BTreeMap::new();
        for (kind, _) in &self.managed {
            *counts.entry(*kind).or_insert(0) += 1;
        }
        let application_ids = self
            .context
            .entities()
            .iter()
            .filter(|e| e.is_top_level_app())
            .map(|e| e.id().to_string())
            .collect();
        RebindSummary {
            counts,
            application_ids,
            warnings: self.handler.warnings(),
            read_only: self.read_only,
            duration,
        }
    }
}

fn restore_core(object: &impl BrooklynObject, common: &MementoCommon) {
    object.with_core_mut(|core| {
        core.display_name.clone_from(&common.display_name);
        core.catalog_item_id.clone_from(&common.catalog_item_id);
        core.catalog_item_id_search_path
            .clone_from(&common.catalog_item_id_search_path);
        core.tags.clone_from(&common.tags);
        core.relations = Relations::from(common.relations.clone());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{DefaultRebindExceptionHandler, FailureMode, FailureModes};
    use bkl_core::{EntityType, LocationType, TypeRegistry};
    use bkl_memento::{AnyMemento, EntityMemento, LocationMemento};
    use std::sync::Arc;

    fn common(id: &str, type_name: &str) -> MementoCommon {
        MementoCommon {
            id: id.into(),
            type_name: type_name.into(),
            ..MementoCommon::default()
        }
    }

    fn management() -> ManagementContext {
        let types = TypeRegistry::new();
        types.register_entity(EntityType::new("App").application());
        types.register_location(LocationType::new("Simulated"));
        ManagementContext::new(Arc::new(types))
    }

    fn memento_with_dangling_location() -> BrooklynMemento {
        let mut memento = BrooklynMemento::default();
        memento.add(AnyMemento::Location(LocationMemento {
            common: common("l1", "Simulated"),
            ..LocationMemento::default()
        }));
        memento.add(AnyMemento::Entity(EntityMemento {
            common: common("app", "App"),
            locations: vec!["l1".into(), "gone".into()],
            is_top_level_app: true,
            ..EntityMemento::default()
        }));
        memento
    }

    #[test]
    fn rebind_wires_and_manages() {
        let mgmt = management();
        let memento = memento_with_dangling_location();
        let handler = DefaultRebindExceptionHandler::new(FailureModes::default());
        let summary = RebindIteration::new(&mgmt, &memento, &handler).run().unwrap();

        assert_eq!(summary.count(BrooklynObjectType::Entity), 1);
        assert_eq!(summary.application_ids, vec!["app".to_string()]);
        assert_eq!(summary.warnings.len(), 1);
        let app = mgmt.entity("app").unwrap();
        assert_eq!(app.locations().len(), 1);
    }

    #[test]
    fn failed_rebind_manages_nothing() {
        let mgmt = management();
        let memento = memento_with_dangling_location();
        let handler = DefaultRebindExceptionHandler::new(
            FailureModes::default().with_dangling_ref(FailureMode::FailAtEnd),
        );
        assert!(RebindIteration::new(&mgmt, &memento, &handler).run().is_err());
        assert_eq!(mgmt.total_count(), 0);
    }

    #[test]
    fn unknown_type_is_a_create_failure() {
        let mgmt = management();
        let mut memento = BrooklynMemento::default();
        memento.add(AnyMemento::Entity(EntityMemento {
            common: common("e1", "Nope"),
            ..EntityMemento::default()
        }));
        let handler = DefaultRebindExceptionHandler::new(FailureModes::all(FailureMode::FailFast));
        let err = RebindIteration::new(&mgmt, &memento, &handler)
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("Nope"));
    }

    #[test]
    fn read_only_pass_marks_objects() {
        let mgmt = management();
        let memento = memento_with_dangling_location();
        let handler = DefaultRebindExceptionHandler::new(FailureModes::default());
        let summary = RebindIteration::new(&mgmt, &memento, &handler)
            .read_only(true)
            .run()
            .unwrap();
        assert!(summary.read_only);
        assert!(mgmt.entity("app").unwrap().is_read_only());
    }
}
