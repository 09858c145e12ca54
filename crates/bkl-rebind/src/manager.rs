//! Rebind manager
//!
//! Ties a management context to a persister: rebinds from persisted state,
//! writes checkpoints and deltas, and optionally checkpoints periodically.

use std::sync::Arc;

use bkl_core::ManagementContext;
use bkl_memento::MementoGenerator;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RebindConfig;
use crate::error::{RebindError, RebindResult};
use crate::exception::{DefaultRebindExceptionHandler, RebindExceptionHandler};
use crate::iteration::{RebindIteration, RebindSummary};
use crate::persister::{BrooklynMementoPersister, PersistenceDelta};
use crate::store::{FileBasedObjectStore, InMemoryObjectStore, PersistenceObjectStore};

#[derive(Debug)]
struct PeriodicPersistence {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Rebinds and persists one management context
#[derive(Debug)]
pub struct RebindManager {
    mgmt: Arc<ManagementContext>,
    persister: Arc<BrooklynMementoPersister>,
    config: RebindConfig,
    persistence: Mutex<Option<PeriodicPersistence>>,
    last_summary: RwLock<Option<RebindSummary>>,
}

impl RebindManager {
    /// Create manager over an explicit store
    #[must_use]
    pub fn new(
        mgmt: Arc<ManagementContext>,
        store: Arc<dyn PersistenceObjectStore>,
        config: RebindConfig,
    ) -> Self {
        Self {
            mgmt,
            persister: Arc::new(BrooklynMementoPersister::new(store)),
            config,
            persistence: Mutex::new(None),
            last_summary: RwLock::new(None),
        }
    }

    /// Create manager whose store follows the configuration: a file store
    /// when a persistence directory is set, otherwise in memory
    #[must_use]
    pub fn from_config(mgmt: Arc<ManagementContext>, config: RebindConfig) -> Self {
        let store: Arc<dyn PersistenceObjectStore> = match &config.persistence_dir {
            Some(dir) => Arc::new(FileBasedObjectStore::new(dir.clone())),
            None => Arc::new(InMemoryObjectStore::new()),
        };
        Self::new(mgmt, store, config)
    }

    /// Management context
    #[inline]
    #[must_use]
    pub fn management(&self) -> &Arc<ManagementContext> {
        &self.mgmt
    }

    /// Persister
    #[inline]
    #[must_use]
    pub fn persister(&self) -> &Arc<BrooklynMementoPersister> {
        &self.persister
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RebindConfig {
        &self.config
    }

    /// Summary of the last successful rebind
    #[must_use]
    pub fn last_summary(&self) -> Option<RebindSummary> {
        self.last_summary.read().clone()
    }

    /// Rebind with the configured failure modes and read-only flag
    ///
    /// # Errors
    /// Returns store errors or the exception handler's error
    pub async fn rebind(&self) -> RebindResult<RebindSummary> {
        let handler = DefaultRebindExceptionHandler::new(self.config.failure_modes);
        self.rebind_with(&handler, self.config.read_only).await
    }

    /// Rebind with an explicit exception handler
    ///
    /// # Errors
    /// Returns store errors or the exception handler's error
    pub async fn rebind_with(
        &self,
        handler: &dyn RebindExceptionHandler,
        read_only: bool,
    ) -> RebindResult<RebindSummary> {
        self.persister.store().prepare_for_use().await?;
        let memento = match self.persister.load(handler).await {
            Ok(memento) => memento,
            Err(error) => {
                handler.on_failed(&error);
                return Err(error);
            }
        };
        let summary = RebindIteration::new(&self.mgmt, &memento, handler)
            .read_only(read_only)
            .run()?;
        self.mgmt.set_read_only(read_only);
        *self.last_summary.write() = Some(summary.clone());
        Ok(summary)
    }

    fn ensure_writable(&self) -> RebindResult<()> {
        if self.config.read_only || self.mgmt.is_read_only() {
            return Err(RebindError::IllegalState(format!(
                "node {} is read-only and must not persist",
                self.mgmt.node_id()
            )));
        }
        Ok(())
    }

    /// Persist everything managed now, removing stale entries
    ///
    /// # Errors
    /// Returns [`RebindError::IllegalState`] when read-only, or store errors
    pub async fn checkpoint(&self) -> RebindResult<usize> {
        self.ensure_writable()?;
        let memento = MementoGenerator::new(&self.mgmt).brooklyn_memento();
        self.persister.checkpoint(&memento).await
    }

    /// Persist incremental changes
    ///
    /// # Errors
    /// Returns [`RebindError::IllegalState`] when read-only, or store errors
    pub async fn persist_delta(&self, delta: &PersistenceDelta) -> RebindResult<()> {
        self.ensure_writable()?;
        self.persister.apply_delta(delta).await
    }

    /// Start checkpointing every persist period
    ///
    /// Returns `false` if already running or read-only.
    pub fn start_persistence(self: &Arc<Self>) -> bool {
        let mut slot = self.persistence.lock();
        if slot.is_some() {
            return false;
        }
        if self.ensure_writable().is_err() {
            debug!("not starting periodic persistence on read-only node");
            return false;
        }

        let (shutdown, mut stopped) = watch::channel(false);
        let manager = Arc::clone(self);
        let period = self.config.persist_period();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(error) = manager.checkpoint().await {
                            warn!(%error, "periodic checkpoint failed");
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        info!(period_ms = self.config.persist_period_ms, "periodic persistence started");
        *slot = Some(PeriodicPersistence { shutdown, handle });
        true
    }

    /// Whether periodic persistence is running
    #[must_use]
    pub fn is_persisting(&self) -> bool {
        self.persistence.lock().is_some()
    }

    /// Stop periodic persistence and wait for the task to finish
    pub async fn stop_persistence(&self) {
        let running = self.persistence.lock().take();
        if let Some(PeriodicPersistence { shutdown, handle }) = running {
            let _ = shutdown.send(true);
            if let Err(error) = handle.await {
                warn!(%error, "persistence task ended abnormally");
            }
            info!("periodic persistence stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bkl_core::{EntityType, TypeRegistry};
    use std::time::Duration;

    fn manager(config: RebindConfig) -> (Arc<InMemoryObjectStore>, Arc<RebindManager>) {
        let types = TypeRegistry::new();
        types.register_entity(EntityType::new("App").application());
        let mgmt = Arc::new(ManagementContext::new(Arc::new(types)));
        let store = Arc::new(InMemoryObjectStore::new());
        let manager = Arc::new(RebindManager::new(mgmt, store.clone(), config));
        (store, manager)
    }

    #[tokio::test]
    async fn read_only_refuses_checkpoint() {
        let (_, manager) = manager(RebindConfig::new().with_read_only(true));
        assert!(matches!(
            manager.checkpoint().await,
            Err(RebindError::IllegalState(_))
        ));
        assert!(!manager.start_persistence());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_persistence_writes_checkpoints() {
        let (store, manager) =
            manager(RebindConfig::new().with_persist_period(Duration::from_millis(100)));
        let app = manager.management().create_entity("App").unwrap();
        manager.management().manage_entity_tree(&app).unwrap();

        assert!(manager.start_persistence());
        assert!(!manager.start_persistence());
        tokio::time::sleep(Duration::from_millis(250)).await;
        manager.stop_persistence().await;

        assert!(!manager.is_persisting());
        assert_eq!(store.list("entities").await.unwrap().len(), 1);
    }
}
