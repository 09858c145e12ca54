//! Common object identity and metadata
//!
//! Every managed object carries an [`ObjectCore`]: display name, catalog
//! provenance, tags and named relations to other objects.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use bkl_config::ConfigValue;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adjunct::{Adjunct, AdjunctKind};
use crate::catalog::{CatalogItem, ManagedBundle};
use crate::entity::{Entity, EntityProxy};
use crate::location::Location;

/// Generate a new object id
#[must_use]
pub fn new_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(10);
    id
}

/// Kinds of persisted object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrooklynObjectType {
    /// Entity
    Entity,
    /// Location
    Location,
    /// Policy
    Policy,
    /// Enricher
    Enricher,
    /// Feed
    Feed,
    /// Catalog item
    CatalogItem,
    /// Managed bundle
    ManagedBundle,
}

impl BrooklynObjectType {
    /// All types, in rebind dependency order
    pub const REBIND_ORDER: [Self; 7] = [
        Self::ManagedBundle,
        Self::Location,
        Self::Policy,
        Self::Enricher,
        Self::Feed,
        Self::Entity,
        Self::CatalogItem,
    ];

    /// Persistence category (store subdirectory)
    #[must_use]
    pub fn category(self) -> &'static str {
        match self {
            Self::Entity => "entities",
            Self::Location => "locations",
            Self::Policy => "policies",
            Self::Enricher => "enrichers",
            Self::Feed => "feeds",
            Self::CatalogItem => "catalog",
            Self::ManagedBundle => "bundles",
        }
    }

    /// Parse a persistence category
    #[must_use]
    pub fn from_category(category: &str) -> Option<Self> {
        Self::REBIND_ORDER
            .into_iter()
            .find(|kind| kind.category() == category)
    }

    /// Adjunct kind, for policies, enrichers and feeds
    #[must_use]
    pub fn adjunct_kind(self) -> Option<AdjunctKind> {
        match self {
            Self::Policy => Some(AdjunctKind::Policy),
            Self::Enricher => Some(AdjunctKind::Enricher),
            Self::Feed => Some(AdjunctKind::Feed),
            _ => None,
        }
    }
}

impl fmt::Display for BrooklynObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Entity => "entity",
            Self::Location => "location",
            Self::Policy => "policy",
            Self::Enricher => "enricher",
            Self::Feed => "feed",
            Self::CatalogItem => "catalog item",
            Self::ManagedBundle => "managed bundle",
        };
        f.write_str(label)
    }
}

/// Named relations to other objects, by id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Relations(BTreeMap<String, BTreeSet<String>>);

impl Relations {
    /// Add a relation; returns false if already present
    pub fn add(&mut self, relationship: impl Into<String>, target_id: impl Into<String>) -> bool {
        self.0
            .entry(relationship.into())
            .or_default()
            .insert(target_id.into())
    }

    /// Remove a relation
    pub fn remove(&mut self, relationship: &str, target_id: &str) -> bool {
        let Some(targets) = self.0.get_mut(relationship) else {
            return false;
        };
        let removed = targets.remove(target_id);
        if targets.is_empty() {
            self.0.remove(relationship);
        }
        removed
    }

    /// Targets of a relationship
    #[must_use]
    pub fn targets(&self, relationship: &str) -> Option<&BTreeSet<String>> {
        self.0.get(relationship)
    }

    /// Relationship names to target ids
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.0
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, BTreeSet<String>>> for Relations {
    fn from(map: BTreeMap<String, BTreeSet<String>>) -> Self {
        Self(map)
    }
}

/// Identity and metadata shared by all object types
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectCore {
    /// Display name
    pub display_name: Option<String>,
    /// Catalog item this object was created from
    pub catalog_item_id: Option<String>,
    /// Catalog items consulted when resolving types
    pub catalog_item_id_search_path: Vec<String>,
    /// Free-form tags
    pub tags: Vec<ConfigValue>,
    /// Relations to other objects
    pub relations: Relations,
}

/// Behaviour common to every live managed object
pub trait BrooklynObject {
    /// Object id
    fn id(&self) -> &str;

    /// Object type
    fn object_type(&self) -> BrooklynObjectType;

    /// Read the common metadata
    fn with_core<R>(&self, f: impl FnOnce(&ObjectCore) -> R) -> R;

    /// Update the common metadata
    fn with_core_mut<R>(&self, f: impl FnOnce(&mut ObjectCore) -> R) -> R;

    /// Whether mutation is refused
    fn is_read_only(&self) -> bool;

    /// Mark read-only (hot standby) or writable
    fn set_read_only(&self, read_only: bool);

    /// Snapshot of the common metadata
    fn core(&self) -> ObjectCore {
        self.with_core(Clone::clone)
    }

    /// Display name
    fn display_name(&self) -> Option<String> {
        self.with_core(|core| core.display_name.clone())
    }

    /// Set display name
    fn set_display_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.with_core_mut(|core| core.display_name = Some(name));
    }

    /// Catalog item id
    fn catalog_item_id(&self) -> Option<String> {
        self.with_core(|core| core.catalog_item_id.clone())
    }

    /// Set catalog provenance
    fn set_catalog_item(&self, id: Option<String>, search_path: Vec<String>) {
        self.with_core_mut(|core| {
            core.catalog_item_id = id;
            core.catalog_item_id_search_path = search_path;
        });
    }

    /// Add a tag
    fn add_tag(&self, tag: impl Into<ConfigValue>) {
        let tag = tag.into();
        self.with_core_mut(|core| {
            if !core.tags.contains(&tag) {
                core.tags.push(tag);
            }
        });
    }

    /// Add a relation to another object
    fn add_relation(&self, relationship: &str, target_id: &str) -> bool {
        self.with_core_mut(|core| core.relations.add(relationship, target_id))
    }
}

/// Any live object the management plane persists
#[derive(Debug, Clone)]
pub enum ManagedObject {
    /// Entity
    Entity(Entity),
    /// Management-layer proxy of an entity
    EntityProxy(EntityProxy),
    /// Location
    Location(Location),
    /// Policy, enricher or feed
    Adjunct(Adjunct),
    /// Catalog item
    CatalogItem(CatalogItem),
    /// Managed bundle
    ManagedBundle(ManagedBundle),
}

impl ManagedObject {
    /// Object id
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Entity(e) => e.id(),
            Self::EntityProxy(p) => p.id(),
            Self::Location(l) => l.id(),
            Self::Adjunct(a) => a.id(),
            Self::CatalogItem(c) => c.id(),
            Self::ManagedBundle(b) => b.id(),
        }
    }

    /// Object type
    #[must_use]
    pub fn object_type(&self) -> BrooklynObjectType {
        match self {
            Self::Entity(_) | Self::EntityProxy(_) => BrooklynObjectType::Entity,
            Self::Location(_) => BrooklynObjectType::Location,
            Self::Adjunct(a) => a.kind().object_type(),
            Self::CatalogItem(_) => BrooklynObjectType::CatalogItem,
            Self::ManagedBundle(_) => BrooklynObjectType::ManagedBundle,
        }
    }
}
