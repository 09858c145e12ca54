//! Memento persistence over an object store
//!
//! Each memento is stored as JSON at `<category>/<id>`. A checkpoint writes
//! every memento and removes ids that are no longer present; a delta writes
//! and removes only what changed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bkl_core::BrooklynObjectType;
use bkl_memento::{AnyMemento, BrooklynMemento, Memento, MementoSerializer};
use tracing::{debug, info, warn};

use crate::error::{RebindError, RebindFailure, RebindResult};
use crate::exception::{FailureCategory, RebindExceptionHandler};
use crate::ha::{ManagementPlaneRecord, NodeRecord};
use crate::store::PersistenceObjectStore;

/// Store directory holding one heartbeat record per management node
pub const PLANE_NODES_DIR: &str = "plane/nodes";

/// Store path holding the id of the current master
pub const PLANE_MASTER_PATH: &str = "plane/master";

fn memento_path(kind: BrooklynObjectType, id: &str) -> String {
    format!("{}/{id}", kind.category())
}

/// Changes since the last write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistenceDelta {
    /// Mementos to write
    pub updated: Vec<AnyMemento>,
    /// Objects to remove
    pub removed: Vec<(BrooklynObjectType, String)>,
}

impl PersistenceDelta {
    /// Create empty delta
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a memento to write
    #[inline]
    #[must_use]
    pub fn with_update(mut self, memento: AnyMemento) -> Self {
        self.updated.push(memento);
        self
    }

    /// With an object to remove
    #[inline]
    #[must_use]
    pub fn with_removal(mut self, kind: BrooklynObjectType, id: impl Into<String>) -> Self {
        self.removed.push((kind, id.into()));
        self
    }

    /// Number of changes
    #[must_use]
    pub fn len(&self) -> usize {
        self.updated.len() + self.removed.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Persisted text per type and id, before deserialization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMementoData {
    entries: BTreeMap<BrooklynObjectType, BTreeMap<String, String>>,
}

impl RawMementoData {
    /// Add persisted text
    pub fn insert(&mut self, kind: BrooklynObjectType, id: impl Into<String>, text: impl Into<String>) {
        self.entries
            .entry(kind)
            .or_default()
            .insert(id.into(), text.into());
    }

    /// Persisted text of one object
    #[must_use]
    pub fn get(&self, kind: BrooklynObjectType, id: &str) -> Option<&str> {
        self.entries.get(&kind)?.get(id).map(String::as_str)
    }

    /// Ids of one type
    #[must_use]
    pub fn ids(&self, kind: BrooklynObjectType) -> Vec<&str> {
        self.entries
            .get(&kind)
            .map(|by_id| by_id.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Number of objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads and writes mementos through a [`PersistenceObjectStore`]
#[derive(Debug)]
pub struct BrooklynMementoPersister {
    store: Arc<dyn PersistenceObjectStore>,
    serializer: MementoSerializer,
    write_lock: tokio::sync::Mutex<()>,
}

impl BrooklynMementoPersister {
    /// Create persister over a store
    #[must_use]
    pub fn new(store: Arc<dyn PersistenceObjectStore>) -> Self {
        Self {
            store,
            serializer: MementoSerializer::new(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Underlying store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn PersistenceObjectStore> {
        &self.store
    }

    /// Write every memento and delete stale ones
    ///
    /// Everything is serialized before anything is written. A memento that
    /// cannot be encoded is reported by id and its last persisted copy is
    /// kept; every other memento is still written.
    ///
    /// # Errors
    /// Returns store errors, or [`RebindError::Aggregate`] naming each object
    /// that could not be encoded
    pub async fn checkpoint(&self, memento: &BrooklynMemento) -> RebindResult<usize> {
        let mut encoded = Vec::new();
        let mut failures = Vec::new();
        for m in memento.all() {
            match self.serializer.to_string(&m) {
                Ok(text) => encoded.push((m.object_type(), m.id().to_string(), text)),
                Err(e) => {
                    warn!(kind = %m.object_type(), id = m.id(), error = %e, "memento not persisted");
                    failures.push(RebindFailure::new(
                        FailureCategory::Rebind,
                        m.object_type(),
                        m.id(),
                        e.to_string(),
                    ));
                }
            }
        }

        let _guard = self.write_lock.lock().await;
        let mut live: BTreeMap<BrooklynObjectType, BTreeSet<String>> = BTreeMap::new();
        for (kind, id, text) in &encoded {
            self.store.put(&memento_path(*kind, id), text).await?;
            live.entry(*kind).or_default().insert(id.clone());
        }
        for failure in &failures {
            live.entry(failure.kind).or_default().insert(failure.id.clone());
        }

        let mut removed = 0usize;
        for kind in BrooklynObjectType::REBIND_ORDER {
            let keep = live.get(&kind);
            for id in self.store.list(kind.category()).await? {
                if keep.map_or(true, |ids| !ids.contains(&id)) {
                    self.store.delete(&memento_path(kind, &id)).await?;
                    removed += 1;
                }
            }
        }
        info!(written = encoded.len(), removed, failed = failures.len(), "checkpoint complete");
        if failures.is_empty() {
            Ok(encoded.len())
        } else {
            Err(RebindError::Aggregate(failures))
        }
    }

    /// Apply incremental changes
    ///
    /// # Errors
    /// Returns serialization or store errors
    pub async fn apply_delta(&self, delta: &PersistenceDelta) -> RebindResult<()> {
        if delta.is_empty() {
            return Ok(());
        }
        let encoded = delta
            .updated
            .iter()
            .map(|m| -> RebindResult<_> {
                Ok((memento_path(m.object_type(), m.id()), self.serializer.to_string(m)?))
            })
            .collect::<RebindResult<Vec<_>>>()?;

        let _guard = self.write_lock.lock().await;
        for (path, text) in &encoded {
            self.store.put(path, text).await?;
        }
        for (kind, id) in &delta.removed {
            self.store.delete(&memento_path(*kind, id)).await?;
        }
        debug!(changes = delta.len(), "delta persisted");
        Ok(())
    }

    /// Read all persisted text without interpreting it
    ///
    /// # Errors
    /// Returns store errors
    pub async fn load_raw(&self) -> RebindResult<RawMementoData> {
        let mut raw = RawMementoData::default();
        for kind in BrooklynObjectType::REBIND_ORDER {
            for id in self.store.list(kind.category()).await? {
                if let Some(text) = self.store.get(&memento_path(kind, &id)).await? {
                    raw.insert(kind, id, text);
                }
            }
        }
        debug!(objects = raw.len(), "loaded persisted state");
        Ok(raw)
    }

    /// Deserialize raw state, reporting unreadable mementos to the handler
    ///
    /// # Errors
    /// Returns the handler's error when a load failure must abort
    pub fn load_memento(
        &self,
        raw: &RawMementoData,
        handler: &dyn RebindExceptionHandler,
    ) -> RebindResult<BrooklynMemento> {
        let mut memento = BrooklynMemento::default();
        for kind in BrooklynObjectType::REBIND_ORDER {
            for id in raw.ids(kind) {
                let Some(text) = raw.get(kind, id) else {
                    continue;
                };
                match self.serializer.from_str(kind, text) {
                    Ok(loaded) if loaded.id() == id => memento.add(loaded),
                    Ok(loaded) => handler.on_load_memento_failed(
                        kind,
                        id,
                        &format!("stored under {id} but has id {}", loaded.id()),
                    )?,
                    Err(e) => handler.on_load_memento_failed(kind, id, &e.to_string())?,
                }
            }
        }
        Ok(memento)
    }

    /// Read and deserialize everything
    ///
    /// # Errors
    /// Returns store errors or the handler's error
    pub async fn load(&self, handler: &dyn RebindExceptionHandler) -> RebindResult<BrooklynMemento> {
        let raw = self.load_raw().await?;
        self.load_memento(&raw, handler)
    }

    /// Assemble the management plane view from the per-node records
    ///
    /// Returns `None` when no node has ever written a heartbeat.
    ///
    /// # Errors
    /// Returns store errors or [`RebindError::PlaneRecord`] if unreadable
    pub async fn read_plane_record(&self) -> RebindResult<Option<ManagementPlaneRecord>> {
        let mut record = ManagementPlaneRecord {
            master_node_id: self.read_master().await?,
            ..ManagementPlaneRecord::default()
        };
        for id in self.store.list(PLANE_NODES_DIR).await? {
            let Some(text) = self.store.get(&format!("{PLANE_NODES_DIR}/{id}")).await? else {
                continue;
            };
            let node: NodeRecord = serde_json::from_str(&text)
                .map_err(|e| RebindError::PlaneRecord(format!("node {id}: {e}")))?;
            record.upsert(node);
        }
        if record.nodes.is_empty() && record.master_node_id.is_none() {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Write one node's heartbeat record
    ///
    /// Only the node itself writes its record, so heartbeats from other nodes
    /// are never overwritten.
    ///
    /// # Errors
    /// Returns store errors or [`RebindError::PlaneRecord`] if unencodable
    pub async fn write_node_record(&self, node: &NodeRecord) -> RebindResult<()> {
        let path = format!("{PLANE_NODES_DIR}/{}", node.node_id);
        let text = serde_json::to_string_pretty(node)
            .map_err(|e| RebindError::PlaneRecord(e.to_string()))?;
        let _guard = self.write_lock.lock().await;
        self.store.put(&path, &text).await?;
        Ok(())
    }

    async fn read_master(&self) -> RebindResult<Option<String>> {
        Ok(self
            .store
            .get(PLANE_MASTER_PATH)
            .await?
            .map(|text| text.trim().to_string())
            .filter(|id| !id.is_empty()))
    }

    /// Record `node_id` as master
    ///
    /// # Errors
    /// Returns store errors
    pub async fn claim_master(&self, node_id: &str) -> RebindResult<()> {
        if self.read_master().await?.as_deref() == Some(node_id) {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        self.store.put(PLANE_MASTER_PATH, node_id).await?;
        debug!(node = node_id, "master claimed");
        Ok(())
    }

    /// Clear the master entry if it still names `node_id`
    ///
    /// Returns whether the entry was cleared.
    ///
    /// # Errors
    /// Returns store errors
    pub async fn release_master(&self, node_id: &str) -> RebindResult<bool> {
        if self.read_master().await?.as_deref() != Some(node_id) {
            return Ok(false);
        }
        let _guard = self.write_lock.lock().await;
        self.store.delete(PLANE_MASTER_PATH).await?;
        debug!(node = node_id, "master released");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{DefaultRebindExceptionHandler, FailureMode, FailureModes};
    use crate::store::InMemoryObjectStore;
    use bkl_memento::{LocationMemento, ManagedBundleMemento, MementoCommon};

    fn location(id: &str) -> AnyMemento {
        AnyMemento::Location(LocationMemento {
            common: MementoCommon {
                id: id.into(),
                type_name: "Simulated".into(),
                ..MementoCommon::default()
            },
            ..LocationMemento::default()
        })
    }

    fn persister() -> (Arc<InMemoryObjectStore>, BrooklynMementoPersister) {
        let store = Arc::new(InMemoryObjectStore::new());
        let persister = BrooklynMementoPersister::new(store.clone());
        (store, persister)
    }

    #[tokio::test]
    async fn checkpoint_removes_stale_ids() {
        let (store, persister) = persister();
        let mut memento = BrooklynMemento::default();
        memento.add(location("l1"));
        memento.add(location("l2"));
        assert_eq!(persister.checkpoint(&memento).await.unwrap(), 2);

        let mut memento = BrooklynMemento::default();
        memento.add(location("l2"));
        persister.checkpoint(&memento).await.unwrap();
        assert_eq!(store.list("locations").await.unwrap(), vec!["l2"]);
    }

    #[tokio::test]
    async fn unencodable_memento_does_not_block_checkpoint() {
        use bkl_config::{ConfigValue, SharedValue};

        let (store, persister) = persister();
        let mut memento = BrooklynMemento::default();
        memento.add(location("l1"));
        memento.add(location("l2"));
        persister.checkpoint(&memento).await.unwrap();
        let good_l2 = store.get("locations/l2").await.unwrap();

        let cell = SharedValue::new(ConfigValue::Null);
        cell.set(ConfigValue::map([("self", ConfigValue::Shared(cell.clone()))]));
        let mut broken = location("l2");
        if let AnyMemento::Location(l) = &mut broken {
            l.location_config.insert("loop".into(), ConfigValue::Shared(cell));
        }
        let mut memento = BrooklynMemento::default();
        memento.add(location("l1"));
        memento.add(broken);
        memento.add(location("l3"));

        let err = persister.checkpoint(&memento).await.unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "l2");
        assert_eq!(failures[0].kind, BrooklynObjectType::Location);
        assert_eq!(store.list("locations").await.unwrap(), vec!["l1", "l2", "l3"]);
        assert_eq!(store.get("locations/l2").await.unwrap(), good_l2);
    }

    #[tokio::test]
    async fn delta_writes_and_removes() {
        let (store, persister) = persister();
        let delta = PersistenceDelta::new()
            .with_update(location("l1"))
            .with_update(AnyMemento::ManagedBundle(ManagedBundleMemento {
                common: MementoCommon {
                    id: "b1".into(),
                    type_name: "acme".into(),
                    ..MementoCommon::default()
                },
                symbolic_name: "acme".into(),
                version: "1.0".into(),
                ..ManagedBundleMemento::default()
            }));
        persister.apply_delta(&delta).await.unwrap();
        assert!(store.exists("bundles/b1").await.unwrap());

        persister
            .apply_delta(&PersistenceDelta::new().with_removal(BrooklynObjectType::Location, "l1"))
            .await
            .unwrap();
        assert!(!store.exists("locations/l1").await.unwrap());
    }

    #[tokio::test]
    async fn plane_view_combines_node_records() {
        use crate::ha::ManagementNodeState;
        use chrono::Utc;

        let (store, persister) = persister();
        assert_eq!(persister.read_plane_record().await.unwrap(), None);

        for (id, state) in [("n1", ManagementNodeState::Master), ("n2", ManagementNodeState::Standby)] {
            persister
                .write_node_record(&NodeRecord {
                    node_id: id.into(),
                    state,
                    last_heartbeat: Utc::now(),
                })
                .await
                .unwrap();
        }
        persister.claim_master("n1").await.unwrap();
        assert!(!persister.release_master("n2").await.unwrap());

        let record = persister.read_plane_record().await.unwrap().unwrap();
        assert_eq!(record.master_node_id.as_deref(), Some("n1"));
        assert_eq!(record.nodes.len(), 2);
        assert_eq!(store.list(PLANE_NODES_DIR).await.unwrap(), vec!["n1", "n2"]);

        assert!(persister.release_master("n1").await.unwrap());
        assert_eq!(persister.read_plane_record().await.unwrap().unwrap().master_node_id, None);
    }

    #[tokio::test]
    async fn unreadable_memento_goes_to_handler() {
        let (store, persister) = persister();
        store.put("locations/l1", "{broken").await.unwrap();
        store.put("policies/p1", "{broken").await.unwrap();

        let lenient = DefaultRebindExceptionHandler::new(
            FailureModes::all(FailureMode::Continue),
        );
        let memento = persister.load(&lenient).await.unwrap();
        assert!(memento.is_empty());
        assert_eq!(lenient.warnings().len(), 2);

        let strict = DefaultRebindExceptionHandler::new(FailureModes::all(FailureMode::FailFast));
        assert!(persister.load(&strict).await.is_err());
    }
}
