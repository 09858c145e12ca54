//! Memento generation and serialization over a small live application

use std::sync::Arc;

use bkl_config::{ConfigKey, ConfigValue};
use bkl_core::{
    AdjunctKind, AdjunctType, BrooklynObject, BrooklynObjectType, CatalogItem, CatalogItemDetails,
    EntityType, LocationType, ManagedBundle, ManagedObject, ManagementContext, TypeRegistry,
};
use bkl_memento::{AnyMemento, Memento, MementoGenerator, MementoSerializer};
use pretty_assertions::assert_eq;

fn management() -> ManagementContext {
    let types = TypeRegistry::new();
    types.register_entity(EntityType::new("App").application());
    types.register_entity(EntityType::new("Web").with_config_key(ConfigKey::new("port")));
    types.register_entity(EntityType::new("Cluster").group());
    types.register_location(LocationType::new("Cloud"));
    types.register_adjunct(AdjunctType::new("Scaler", AdjunctKind::Policy));
    types.register_adjunct(AdjunctType::new("Summer", AdjunctKind::Enricher));
    ManagementContext::new(Arc::new(types))
}

fn populate(mgmt: &ManagementContext) {
    let app = mgmt.create_entity("App").unwrap();
    app.set_display_name("shop");
    let cluster = mgmt.create_entity("Cluster").unwrap();
    let web = mgmt.create_entity("Web").unwrap();
    app.add_child(&cluster).unwrap();
    cluster.add_child(&web).unwrap();
    cluster.add_member(&web).unwrap();
    web.set_config("port", ConfigValue::from(8080)).unwrap();
    web.set_attribute("host", ConfigValue::from("10.0.0.1")).unwrap();
    web.add_tag("frontend");
    web.add_relation("depends_on", cluster.id());

    let region = mgmt.create_location("Cloud").unwrap();
    let zone = mgmt.create_location("Cloud").unwrap();
    region.add_child(&zone).unwrap();
    zone.set_config("zone", ConfigValue::from("a")).unwrap();
    web.add_location(&zone);

    web.add_policy(&mgmt.create_adjunct("Scaler").unwrap()).unwrap();
    web.add_enricher(&mgmt.create_adjunct("Summer").unwrap()).unwrap();

    mgmt.manage_entity_tree(&app).unwrap();
    mgmt.manage_location_tree(&region).unwrap();

    let bundle = ManagedBundle::new("bundle-1", "shop-bundle", "1.0");
    let item = CatalogItem::new("item-1", CatalogItemDetails::new("shop", "1.0"));
    item.add_library(bundle.clone());
    mgmt.manage(&ManagedObject::ManagedBundle(bundle)).unwrap();
    mgmt.manage(&ManagedObject::CatalogItem(item)).unwrap();
}

#[test]
fn snapshot_covers_every_category() {
    let mgmt = management();
    populate(&mgmt);
    let all = MementoGenerator::new(&mgmt).brooklyn_memento();

    assert_eq!(all.entities.len(), 3);
    assert_eq!(all.locations.len(), 2);
    assert_eq!(all.policies.len(), 1);
    assert_eq!(all.enrichers.len(), 1);
    assert_eq!(all.catalog_items.len(), 1);
    assert_eq!(all.bundles.len(), 1);
    assert_eq!(all.application_ids.len(), 1);
    assert_eq!(all.top_level_location_ids.len(), 1);
    assert_eq!(all.len(), mgmt.total_count());
}

#[test]
fn snapshot_references_are_ids() {
    let mgmt = management();
    populate(&mgmt);
    let all = MementoGenerator::new(&mgmt).brooklyn_memento();

    let web = all
        .entities
        .values()
        .find(|m| m.common.type_name == "Web")
        .unwrap();
    let cluster = &all.entities[web.parent.as_ref().unwrap()];
    assert_eq!(cluster.members, vec![web.common.id.clone()]);
    assert_eq!(cluster.children, vec![web.common.id.clone()]);
    assert!(all.locations.contains_key(&web.locations[0]));
    assert!(all.policies.contains_key(&web.policies[0]));
    assert_eq!(
        web.common.relations["depends_on"].iter().next(),
        Some(&cluster.common.id)
    );
    assert_eq!(web.attributes["host"], ConfigValue::from("10.0.0.1"));
}

#[test]
fn every_memento_survives_text_round_trip() {
    let mgmt = management();
    populate(&mgmt);
    let all = MementoGenerator::new(&mgmt).brooklyn_memento();
    let serializer = MementoSerializer::new();

    for memento in all.all() {
        let text = serializer.to_string(&memento).unwrap();
        let back = serializer.from_str(memento.object_type(), &text).unwrap();
        assert_eq!(back, memento);
    }
}

#[test]
fn live_proxy_is_not_snapshotted() {
    let mgmt = management();
    populate(&mgmt);
    let app = mgmt.applications().pop().unwrap();
    let proxy = mgmt.lookup_entity(app.id()).unwrap();
    assert!(MementoGenerator::new(&mgmt)
        .new_memento(&ManagedObject::EntityProxy(proxy))
        .is_err());
    let memento = MementoGenerator::new(&mgmt)
        .new_memento(&ManagedObject::Entity(app))
        .unwrap();
    assert!(matches!(memento, AnyMemento::Entity(_)));
    assert_eq!(memento.object_type(), BrooklynObjectType::Entity);
}
