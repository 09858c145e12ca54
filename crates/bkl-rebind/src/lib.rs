//! BKL Rebind
//!
//! Persistence and restoration of management-plane state.
//!
//! # Core Concepts
//!
//! - [`PersistenceObjectStore`]: Where persisted mementos live (files or memory)
//! - [`BrooklynMementoPersister`]: Checkpoints, deltas and loading over a store
//! - [`RebindIteration`]: One pass rebuilding live objects from mementos
//! - [`RebindExceptionHandler`]: Decides which failures abort a rebind
//! - [`RebindManager`]: Rebind plus periodic persistence for one node
//! - [`HighAvailabilityManager`]: Master election and standby takeover
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bkl_core::{ManagementContext, TypeRegistry};
//! use bkl_rebind::{RebindConfig, RebindManager};
//!
//! # async fn run() -> bkl_rebind::RebindResult<()> {
//! let mgmt = Arc::new(ManagementContext::new(Arc::new(TypeRegistry::new())));
//! let config = RebindConfig::new().with_persistence_dir("/var/lib/bkl/state");
//! let manager = Arc::new(RebindManager::from_config(mgmt, config));
//! let summary = manager.rebind().await?;
//! println!("rebound {} objects", summary.total());
//! manager.start_persistence();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod config;
mod context;
mod error;
mod exception;
mod ha;
mod iteration;
mod manager;
mod persister;
mod phase;
mod store;

// Re-exports
pub use config::RebindConfig;
pub use context::{LookupContext, RebindContext};
pub use error::{RebindError, RebindFailure, RebindResult, StoreError, StoreResult};
pub use exception::{
    DefaultRebindExceptionHandler, FailureCategory, FailureMode, FailureModes,
    RebindExceptionHandler,
};
pub use ha::{
    HighAvailabilityManager, HighAvailabilityMode, ManagementNodeState, ManagementPlaneRecord,
    NodeRecord,
};
pub use iteration::{RebindIteration, RebindSummary};
pub use manager::RebindManager;
pub use persister::{
    BrooklynMementoPersister, PersistenceDelta, RawMementoData, PLANE_MASTER_PATH, PLANE_NODES_DIR,
};
pub use phase::RebindPhase;
pub use store::{FileBasedObjectStore, InMemoryObjectStore, PersistenceObjectStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
