//! Testing utilities for BKL workspace
//!
//! Shared type registry, sample application and on-disk rebind fixtures.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::{Arc, Once};

use bkl_config::{ConfigInheritance, ConfigKey, ConfigValue, ValueType};
use bkl_core::{
    AdjunctKind, AdjunctType, BrooklynObject, BundleRef, CatalogItem, CatalogItemDetails,
    EntityType, FieldDescriptor, LocationType, ManagedBundle, ManagedObject, ManagementContext,
    Sensor, TypeRegistry,
};
use bkl_rebind::{FailureModes, FileBasedObjectStore, RebindConfig, RebindManager};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub const TEST_APPLICATION: &str = "TestApplication";
pub const TEST_ENTITY: &str = "TestEntity";
pub const BASIC_GROUP: &str = "BasicGroup";
pub const TEST_POLICY: &str = "TestPolicy";
pub const TEST_ENRICHER: &str = "TestEnricher";
pub const TEST_FEED: &str = "TestFeed";
pub const SIMULATED_LOCATION: &str = "SimulatedLocation";
pub const TEST_BUNDLE: &str = "test-bundle";
pub const BUNDLED_ENTITY: &str = "BundledEntity";

static LOGGING: Once = Once::new();

/// Install a test-writer subscriber honouring `RUST_LOG` (default `warn`)
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

pub fn overwrite_key() -> ConfigKey {
    ConfigKey::new("test.overwrite").with_type(ValueType::String)
}

pub fn merge_key() -> ConfigKey {
    ConfigKey::new("test.merge")
        .with_type(ValueType::Map)
        .with_runtime_inheritance(ConfigInheritance::DeepMerge)
}

pub fn not_reinherited_key() -> ConfigKey {
    ConfigKey::new("test.not-reinherited").with_runtime_inheritance(ConfigInheritance::NotReinherited)
}

pub fn port_key() -> ConfigKey {
    ConfigKey::new("test.port").with_type(ValueType::Integer).with_default(8080)
}

/// Types used across the workspace's tests
pub fn test_type_registry() -> Arc<TypeRegistry> {
    let types = TypeRegistry::new();
    types.register_entity(
        EntityType::new(TEST_APPLICATION)
            .application()
            .with_config_key(overwrite_key())
            .with_config_key(merge_key())
            .with_config_key(not_reinherited_key()),
    );
    types.register_entity(
        EntityType::new(TEST_ENTITY)
            .with_config_key(overwrite_key())
            .with_config_key(merge_key())
            .with_config_key(not_reinherited_key())
            .with_config_key(port_key())
            .with_sensor(Sensor::new("test.sequence"))
            .with_sensor(Sensor::transient("test.load")),
    );
    types.register_entity(EntityType::new(BASIC_GROUP).group());
    types.register_entity(EntityType::new(BUNDLED_ENTITY).from_bundle(BundleRef::new(TEST_BUNDLE, "1.0")));
    types.register_adjunct(
        AdjunctType::new(TEST_POLICY, AdjunctKind::Policy)
            .with_config_key(ConfigKey::new("policy.threshold").with_type(ValueType::Number))
            .with_field(FieldDescriptor::new("runs"))
            .with_field(FieldDescriptor::new("scratch").transient()),
    );
    types.register_adjunct(AdjunctType::new(TEST_ENRICHER, AdjunctKind::Enricher));
    types.register_adjunct(AdjunctType::new(TEST_FEED, AdjunctKind::Feed));
    types.register_location(
        LocationType::new(SIMULATED_LOCATION)
            .with_config_key(ConfigKey::new("region").with_type(ValueType::String))
            .with_field(FieldDescriptor::new("cache").transient()),
    );
    Arc::new(types)
}

/// Ids of the objects created by [`populate_sample_app`]
#[derive(Debug, Clone)]
pub struct SampleApp {
    pub app: String,
    pub child: String,
    pub group: String,
    pub policy: String,
    pub enricher: String,
    pub region: String,
    pub zone: String,
    pub bundle: String,
    pub catalog_item: String,
}

/// Build and manage an application touching every persisted feature
pub fn populate_sample_app(mgmt: &ManagementContext) -> anyhow::Result<SampleApp> {
    let app = mgmt.create_entity(TEST_APPLICATION)?;
    app.set_display_name("sample");
    app.set_config("test.overwrite", ConfigValue::from("app-value"))?;
    app.set_config("test.merge", ConfigValue::from_json_str(r#"{"a": 1, "b": 2}"#)?)?;

    let child = mgmt.create_entity(TEST_ENTITY)?;
    app.add_child(&child)?;
    child.set_config("test.merge", ConfigValue::from_json_str(r#"{"b": 3, "c": 4}"#)?)?;
    child.set_config("test.port", ConfigValue::from(9090))?;
    child.set_config("free.form", ConfigValue::from(true))?;
    child.set_attribute("test.sequence", ConfigValue::from(7))?;
    child.set_attribute("test.load", ConfigValue::from(0.5))?;
    child.add_tag("tier:web");

    let group = mgmt.create_entity(BASIC_GROUP)?;
    app.add_child(&group)?;
    group.add_member(&child)?;
    child.add_relation("member_of", group.id());

    let policy = mgmt.create_adjunct(TEST_POLICY)?;
    policy.set_config("policy.threshold", ConfigValue::from(0.75))?;
    policy.set_field("runs", ConfigValue::from(3));
    policy.set_field("scratch", ConfigValue::from("discard"));
    child.add_policy(&policy)?;
    let enricher = mgmt.create_adjunct(TEST_ENRICHER)?;
    child.add_enricher(&enricher)?;

    let region = mgmt.create_location(SIMULATED_LOCATION)?;
    region.set_config("region", ConfigValue::from("eu-west"))?;
    let zone = mgmt.create_location(SIMULATED_LOCATION)?;
    region.add_child(&zone)?;
    zone.set_flag("cache", ConfigValue::from("warm"));
    child.add_location(&zone);

    mgmt.manage_entity_tree(&app)?;
    mgmt.manage_location_tree(&region)?;

    let bundle = ManagedBundle::new(bkl_core::new_id(), TEST_BUNDLE, "1.0");
    let item = CatalogItem::new(bkl_core::new_id(), CatalogItemDetails::new("sample", "1.0"));
    item.add_library(bundle.clone());
    let sample = SampleApp {
        app: app.id().to_string(),
        child: child.id().to_string(),
        group: group.id().to_string(),
        policy: policy.id().to_string(),
        enricher: enricher.id().to_string(),
        region: region.id().to_string(),
        zone: zone.id().to_string(),
        bundle: bundle.id().to_string(),
        catalog_item: item.id().to_string(),
    };
    mgmt.manage(&ManagedObject::ManagedBundle(bundle))?;
    mgmt.manage(&ManagedObject::CatalogItem(item))?;
    Ok(sample)
}

/// Temporary on-disk state shared by any number of simulated nodes
#[derive(Debug)]
pub struct RebindTestFixture {
    dir: TempDir,
    types: Arc<TypeRegistry>,
    config: RebindConfig,
}

impl RebindTestFixture {
    pub fn new() -> anyhow::Result<Self> {
        init_test_logging();
        let dir = tempfile::tempdir()?;
        let config = RebindConfig::new().with_persistence_dir(dir.path().join("state"));
        Ok(Self {
            dir,
            types: test_type_registry(),
            config,
        })
    }

    #[must_use]
    pub fn with_failure_modes(mut self, modes: FailureModes) -> Self {
        self.config = self.config.with_failure_modes(modes);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: RebindConfig) -> Self {
        self.config = config.with_persistence_dir(self.state_dir());
        self
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    pub fn config(&self) -> &RebindConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<FileBasedObjectStore> {
        Arc::new(FileBasedObjectStore::new(self.state_dir()))
    }

    /// A fresh management node over the shared state
    pub fn new_node(&self, node_id: &str) -> ManagementHandle {
        let mgmt = Arc::new(ManagementContext::with_node_id(node_id, Arc::clone(&self.types)));
        let rebind = Arc::new(RebindManager::new(
            Arc::clone(&mgmt),
            self.store(),
            self.config.clone(),
        ));
        ManagementHandle { mgmt, rebind }
    }
}

/// One simulated management node
#[derive(Debug, Clone)]
pub struct ManagementHandle {
    pub mgmt: Arc<ManagementContext>,
    pub rebind: Arc<RebindManager>,
}
