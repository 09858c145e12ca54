//! Catalog items and managed bundles

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::object::{BrooklynObject, BrooklynObjectType, ObjectCore};

/// What a catalog item produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogItemType {
    /// Entity blueprint
    #[default]
    Entity,
    /// Application template
    Template,
    /// Policy
    Policy,
    /// Enricher
    Enricher,
    /// Location
    Location,
}

/// Immutable description of a catalog item
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CatalogItemDetails {
    /// Symbolic name
    pub symbolic_name: String,
    /// Version
    pub version: String,
    /// Description
    pub description: Option<String>,
    /// Icon URL
    pub icon_url: Option<String>,
    /// Item type
    pub item_type: CatalogItemType,
    /// Blueprint YAML
    pub plan_yaml: Option<String>,
}

impl CatalogItemDetails {
    /// Create details for an entity item
    #[must_use]
    pub fn new(symbolic_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Catalog id: `<symbolic name>:<version>`
    #[must_use]
    pub fn catalog_id(&self) -> String {
        format!("{}:{}", self.symbolic_name, self.version)
    }
}

#[derive(Debug, Default)]
struct CatalogItemState {
    core: ObjectCore,
    libraries: Vec<ManagedBundle>,
    deprecated: bool,
    disabled: bool,
    read_only: bool,
}

#[derive(Debug)]
struct CatalogItemInner {
    id: String,
    details: CatalogItemDetails,
    state: RwLock<CatalogItemState>,
}

/// Live catalog item
#[derive(Clone)]
pub struct CatalogItem(Arc<CatalogItemInner>);

impl CatalogItem {
    /// Create catalog item
    #[must_use]
    pub fn new(id: impl Into<String>, details: CatalogItemDetails) -> Self {
        Self(Arc::new(CatalogItemInner {
            id: id.into(),
            details,
            state: RwLock::new(CatalogItemState::default()),
        }))
    }

    /// Item details
    #[inline]
    #[must_use]
    pub fn details(&self) -> &CatalogItemDetails {
        &self.0.details
    }

    /// Bundles the item's types come from
    #[must_use]
    pub fn libraries(&self) -> Vec<ManagedBundle> {
        self.0.state.read().libraries.clone()
    }

    /// Add a library bundle
    pub fn add_library(&self, bundle: ManagedBundle) {
        self.0.state.write().libraries.push(bundle);
    }

    /// Deprecated flag
    #[must_use]
    pub fn is_deprecated(&self) -> bool {
        self.0.state.read().deprecated
    }

    /// Set deprecated flag
    pub fn set_deprecated(&self, deprecated: bool) {
        self.0.state.write().deprecated = deprecated;
    }

    /// Disabled flag
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.0.state.read().disabled
    }

    /// Set disabled flag
    pub fn set_disabled(&self, disabled: bool) {
        self.0.state.write().disabled = disabled;
    }
}

impl BrooklynObject for CatalogItem {
    fn id(&self) -> &str {
        &self.0.id
    }

    fn object_type(&self) -> BrooklynObjectType {
        BrooklynObjectType::CatalogItem
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

impl fmt::Debug for CatalogItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogItem")
            .field("id", &self.0.id)
            .field("symbolic_name", &self.0.details.symbolic_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct BundleState {
    core: ObjectCore,
    read_only: bool,
}

#[derive(Debug)]
struct BundleInner {
    id: String,
    symbolic_name: String,
    version: String,
    url: Option<String>,
    checksum: Option<String>,
    state: RwLock<BundleState>,
}

/// Installed bundle of types
#[derive(Clone)]
pub struct ManagedBundle(Arc<BundleInner>);

impl ManagedBundle {
    /// Create bundle record
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        symbolic_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self::with_source(id, symbolic_name, version, None, None)
    }

    /// Create bundle record with its source URL and checksum
    #[must_use]
    pub fn with_source(
        id: impl Into<String>,
        symbolic_name: impl Into<String>,
        version: impl Into<String>,
        url: Option<String>,
        checksum: Option<String>,
    ) -> Self {
        Self(Arc::new(BundleInner {
            id: id.into(),
            symbolic_name: symbolic_name.into(),
            version: version.into(),
            url,
            checksum,
            state: RwLock::new(BundleState::default()),
        }))
    }

    /// Symbolic name
    #[inline]
    #[must_use]
    pub fn symbolic_name(&self) -> &str {
        &self.0.symbolic_name
    }

    /// Version
    #[inline]
    #[must_use]
    pub fn version(&self) -> &str {
        &self.0.version
    }

    /// Source URL
    #[inline]
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.0.url.as_deref()
    }

    /// Content checksum
    #[inline]
    #[must_use]
    pub fn checksum(&self) -> Option<&str> {
        self.0.checksum.as_deref()
    }
}

impl BrooklynObject for ManagedBundle {
    fn id(&self) -> &str {
        &self.0.id
    }

    fn object_type(&self) -> BrooklynObjectType {
        BrooklynObjectType::ManagedBundle
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

impl fmt::Debug for ManagedBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedBundle")
            .field("id", &self.0.id)
            .field("symbolic_name", &self.0.symbolic_name)
            .field("version", &self.0.version)
            .finish_non_exhaustive()
    }
}
