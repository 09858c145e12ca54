//! BKL Memento
//!
//! Serializable snapshots of management-plane objects.
//!
//! # Core Concepts
//!
//! - [`Memento`]: Immutable, id-referencing snapshot of one live object
//! - [`BrooklynMemento`]: Every memento of a management plane, by category
//! - [`MementoGenerator`]: Builds mementos from a [`bkl_core::ManagementContext`]
//! - [`MementoSerializer`]: JSON encoding of mementos

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod error;
mod generator;
mod memento;
mod serializer;

// Re-exports
pub use error::{MementoError, MementoResult};
pub use generator::MementoGenerator;
pub use memento::{
    AdjunctMemento, AnyMemento, BrooklynMemento, CatalogItemMemento, EntityMemento,
    LocationMemento, ManagedBundleMemento, Memento, MementoCommon,
};
pub use serializer::MementoSerializer;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
