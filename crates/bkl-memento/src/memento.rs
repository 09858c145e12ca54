//! Memento data model
//!
//! Mementos are immutable snapshots of live objects. All cross references are
//! string ids so each memento can be stored and loaded on its own.

use std::collections::{BTreeMap, BTreeSet};

use bkl_config::{ConfigKey, ConfigValue};
use bkl_core::{AdjunctKind, BrooklynObjectType, CatalogItemType, Effector};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Fields shared by every memento
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MementoCommon {
    /// Object id
    pub id: String,

    /// Type name, bundle-qualified when the type comes from a managed bundle
    #[serde(rename = "type")]
    pub type_name: String,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Catalog item the object was created from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_item_id: Option<String>,

    /// Catalog items consulted for type lookup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catalog_item_id_search_path: Vec<String>,

    /// Tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<ConfigValue>,

    /// Relationship name to related object ids
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relations: BTreeMap<String, BTreeSet<String>>,
}

/// Access to the shared memento fields
pub trait Memento {
    /// Shared fields
    fn common(&self) -> &MementoCommon;

    /// Persisted object type
    fn object_type(&self) -> BrooklynObjectType;

    /// Object id
    fn id(&self) -> &str {
        &self.common().id
    }

    /// Type name
    fn type_name(&self) -> &str {
        &self.common().type_name
    }
}

/// Entity snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMemento {
    /// Shared fields
    #[serde(flatten)]
    pub common: MementoCommon,

    /// Parent entity id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Child entity ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,

    /// Location ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<String>,

    /// Policy ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<String>,

    /// Enricher ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enrichers: Vec<String>,

    /// Feed ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feeds: Vec<String>,

    /// Member entity ids (groups only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,

    /// Config under declared keys
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub config: IndexMap<String, ConfigValue>,

    /// Config under names no key declares
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub config_unmatched: IndexMap<String, ConfigValue>,

    /// Config keys added at runtime
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_keys: Vec<ConfigKey>,

    /// Persisted attributes
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, ConfigValue>,

    /// Effectors added at runtime
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effectors: Vec<Effector>,

    /// Application without parent
    #[serde(default)]
    pub is_top_level_app: bool,
}

impl Memento for EntityMemento {
    fn common(&self) -> &MementoCommon {
        &self.common
    }

    fn object_type(&self) -> BrooklynObjectType {
        BrooklynObjectType::Entity
    }
}

/// Location snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationMemento {
    /// Shared fields
    #[serde(flatten)]
    pub common: MementoCommon,

    /// Parent location id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Child location ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,

    /// Explicit config
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub location_config: IndexMap<String, ConfigValue>,

    /// Config names the location type does not declare
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub location_config_unused: Vec<String>,

    /// Legacy field-derived state
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub flags: IndexMap<String, ConfigValue>,
}

impl Memento for LocationMemento {
    fn common(&self) -> &MementoCommon {
        &self.common
    }

    fn object_type(&self) -> BrooklynObjectType {
        BrooklynObjectType::Location
    }
}

/// Policy, enricher or feed snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjunctMemento {
    /// Shared fields
    #[serde(flatten)]
    pub common: MementoCommon,

    /// Adjunct kind
    pub kind: AdjunctKind,

    /// Owning entity id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,

    /// Tag unique among the entity's adjuncts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_tag: Option<String>,

    /// Explicit config
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub config: IndexMap<String, ConfigValue>,

    /// Persisted implementation fields
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub flags: IndexMap<String, ConfigValue>,
}

impl Memento for AdjunctMemento {
    fn common(&self) -> &MementoCommon {
        &self.common
    }

    fn object_type(&self) -> BrooklynObjectType {
        self.kind.object_type()
    }
}

/// Catalog item snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItemMemento {
    /// Shared fields
    #[serde(flatten)]
    pub common: MementoCommon,

    /// Symbolic name
    pub symbolic_name: String,

    /// Version
    pub version: String,

    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Icon URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,

    /// Item type
    #[serde(default)]
    pub item_type: CatalogItemType,

    /// Blueprint YAML
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_yaml: Option<String>,

    /// Library bundle ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<String>,

    /// Deprecated flag
    #[serde(default)]
    pub deprecated: bool,

    /// Disabled flag
    #[serde(default)]
    pub disabled: bool,
}

impl Memento for CatalogItemMemento {
    fn common(&self) -> &MementoCommon {
        &self.common
    }

    fn object_type(&self) -> BrooklynObjectType {
        BrooklynObjectType::CatalogItem
    }
}

/// Managed bundle snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedBundleMemento {
    /// Shared fields
    #[serde(flatten)]
    pub common: MementoCommon,

    /// Symbolic name
    pub symbolic_name: String,

    /// Version
    pub version: String,

    /// Source URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Content checksum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Memento for ManagedBundleMemento {
    fn common(&self) -> &MementoCommon {
        &self.common
    }

    fn object_type(&self) -> BrooklynObjectType {
        BrooklynObjectType::ManagedBundle
    }
}

/// A memento of any type
#[derive(Debug, Clone, PartialEq)]
pub enum AnyMemento {
    /// Entity
    Entity(EntityMemento),
    /// Location
    Location(LocationMemento),
    /// Policy, enricher or feed
    Adjunct(AdjunctMemento),
    /// Catalog item
    CatalogItem(CatalogItemMemento),
    /// Managed bundle
    ManagedBundle(ManagedBundleMemento),
}

impl AnyMemento {
    fn inner(&self) -> &dyn Memento {
        match self {
            Self::Entity(m) => m,
            Self::Location(m) => m,
            Self::Adjunct(m) => m,
            Self::CatalogItem(m) => m,
            Self::ManagedBundle(m) => m,
        }
    }
}

impl Memento for AnyMemento {
    fn common(&self) -> &MementoCommon {
        self.inner().common()
    }

    fn object_type(&self) -> BrooklynObjectType {
        self.inner().object_type()
    }
}

/// Mementos of a whole management plane, keyed by id per type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrooklynMemento {
    /// Entities
    pub entities: BTreeMap<String, EntityMemento>,
    /// Locations
    pub locations: BTreeMap<String, LocationMemento>,
    /// Policies
    pub policies: BTreeMap<String, AdjunctMemento>,
    /// Enrichers
    pub enrichers: BTreeMap<String, AdjunctMemento>,
    /// Feeds
    pub feeds: BTreeMap<String, AdjunctMemento>,
    /// Catalog items
    pub catalog_items: BTreeMap<String, CatalogItemMemento>,
    /// Managed bundles
    pub bundles: BTreeMap<String, ManagedBundleMemento>,
    /// Top-level application ids
    pub application_ids: Vec<String>,
    /// Parentless location ids
    pub top_level_location_ids: Vec<String>,
}

impl BrooklynMemento {
    /// Add a memento under its id, replacing any previous one
    pub fn add(&mut self, memento: AnyMemento) {
        match memento {
            AnyMemento::Entity(m) => {
                if m.is_top_level_app && !self.application_ids.contains(&m.common.id) {
                    self.application_ids.push(m.common.id.clone());
                }
                self.entities.insert(m.common.id.clone(), m);
            }
            AnyMemento::Location(m) => {
                if m.parent.is_none() && !self.top_level_location_ids.contains(&m.common.id) {
                    self.top_level_location_ids.push(m.common.id.clone());
                }
                self.locations.insert(m.common.id.clone(), m);
            }
            AnyMemento::Adjunct(m) => {
                let table = match m.kind {
                    AdjunctKind::Policy => &mut self.policies,
                    AdjunctKind::Enricher => &mut self.enrichers,
                    AdjunctKind::Feed => &mut self.feeds,
                };
                table.insert(m.common.id.clone(), m);
            }
            AnyMemento::CatalogItem(m) => {
                self.catalog_items.insert(m.common.id.clone(), m);
            }
            AnyMemento::ManagedBundle(m) => {
                self.bundles.insert(m.common.id.clone(), m);
            }
        }
    }

    /// Ids of one type
    #[must_use]
    pub fn ids(&self, kind: BrooklynObjectType) -> Vec<String> {
        match kind {
            BrooklynObjectType::Entity => self.entities.keys().cloned().collect(),
            BrooklynObjectType::Location => self.locations.keys().cloned().collect(),
            BrooklynObjectType::Policy => self.policies.keys().cloned().collect(),
            BrooklynObjectType::Enricher => self.enrichers.keys().cloned().collect(),
            BrooklynObjectType::Feed => self.feeds.keys().cloned().collect(),
            BrooklynObjectType::CatalogItem => self.catalog_items.keys().cloned().collect(),
            BrooklynObjectType::ManagedBundle => self.bundles.keys().cloned().collect(),
        }
    }

    /// All mementos, in rebind dependency order
    #[must_use]
    pub fn all(&self) -> Vec<AnyMemento> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.bundles.values().cloned().map(AnyMemento::ManagedBundle));
        out.extend(self.locations.values().cloned().map(AnyMemento::Location));
        out.extend(self.policies.values().cloned().map(AnyMemento::Adjunct));
        out.extend(self.enrichers.values().cloned().map(AnyMemento::Adjunct));
        out.extend(self.feeds.values().cloned().map(AnyMemento::Adjunct));
        out.extend(self.entities.values().cloned().map(AnyMemento::Entity));
        out.extend(self.catalog_items.values().cloned().map(AnyMemento::CatalogItem));
        out
    }

    /// Total number of mementos
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
            + self.locations.len()
            + self.policies.len()
            + self.enrichers.len()
            + self.feeds.len()
            + self.catalog_items.len()
            + self.bundles.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_memento_field_names() {
        let memento = EntityMemento {
            common: MementoCommon {
                id: "e1".into(),
                type_name: "TestEntity".into(),
                ..MementoCommon::default()
            },
            parent: Some("app".into()),
            config_unmatched: [("free".to_string(), ConfigValue::from(1))]
                .into_iter()
                .collect(),
            is_top_level_app: false,
            ..EntityMemento::default()
        };
        let json = serde_json::to_value(&memento).unwrap();
        assert_eq!(json["type"], json!("TestEntity"));
        assert_eq!(json["configUnmatched"], json!({"free": 1}));
        assert_eq!(json["isTopLevelApp"], json!(false));
        assert!(json.get("children").is_none());

        let back: EntityMemento = serde_json::from_value(json).unwrap();
        assert_eq!(back, memento);
    }

    #[test]
    fn aggregate_tracks_apps_and_top_level_locations() {
        let mut all = BrooklynMemento::default();
        all.add(AnyMemento::Entity(EntityMemento {
            common: MementoCommon {
                id: "app".into(),
                ..MementoCommon::default()
            },
            is_top_level_app: true,
            ..EntityMemento::default()
        }));
        all.add(AnyMemento::Location(LocationMemento {
            common: MementoCommon {
                id: "loc".into(),
                ..MementoCommon::default()
            },
            ..LocationMemento::default()
        }));
        assert_eq!(all.application_ids, vec!["app"]);
        assert_eq!(all.top_level_location_ids, vec!["loc"]);
        assert_eq!(all.len(), 2);
        assert_eq!(all.ids(BrooklynObjectType::Entity), vec!["app"]);
    }
}
