//! BKL Core
//!
//! Live management-plane object model.
//!
//! # Core Concepts
//!
//! - [`Entity`]: Node of an application tree, with config, attributes and adjuncts
//! - [`Location`]: Where entities run; forms its own tree
//! - [`Adjunct`]: Policy, enricher or feed attached to one entity
//! - [`CatalogItem`] / [`ManagedBundle`]: Catalog provenance of types
//! - [`TypeRegistry`]: Resolves persisted type names back to types
//! - [`ManagementContext`]: Per-node registry of managed objects

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod adjunct;
mod catalog;
mod diagnostics;
mod entity;
mod error;
mod location;
mod management;
mod object;
mod types;

// Re-exports
pub use adjunct::{Adjunct, AdjunctKind};
pub use catalog::{CatalogItem, CatalogItemDetails, CatalogItemType, ManagedBundle};
pub use diagnostics::Diagnostics;
pub use entity::{Entity, EntityProxy};
pub use error::{ModelError, ModelResult};
pub use location::Location;
pub use management::ManagementContext;
pub use object::{new_id, BrooklynObject, BrooklynObjectType, ManagedObject, ObjectCore, Relations};
pub use types::{
    AdjunctType, BundleRef, Effector, EntityType, FieldDescriptor, LocationType, Sensor,
    SensorPersistenceMode, TypeRegistry,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
