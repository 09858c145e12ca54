//! Error types for the management-plane object model

use bkl_config::ConfigError;

use crate::adjunct::AdjunctKind;
use crate::object::BrooklynObjectType;

/// Object model error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    /// An object with this id is already managed
    #[error("{kind} {id} is already managed")]
    AlreadyManaged {
        /// Object type
        kind: BrooklynObjectType,
        /// Object id
        id: String,
    },

    /// No type registered under the name
    #[error("no {kind} type found for '{name}'")]
    UnknownType {
        /// Object type
        kind: BrooklynObjectType,
        /// Requested type name
        name: String,
    },

    /// Object is read-only (hot standby)
    #[error("{0} is read-only")]
    ReadOnly(String),

    /// Adjunct attached through the wrong slot
    #[error("adjunct {id} is a {actual:?}, expected {expected:?}")]
    WrongAdjunctKind {
        /// Adjunct id
        id: String,
        /// Slot kind
        expected: AdjunctKind,
        /// Adjunct kind
        actual: AdjunctKind,
    },

    /// Adjunct already belongs to another entity
    #[error("adjunct {adjunct} is already attached to entity {entity}")]
    AdjunctAlreadyAttached {
        /// Adjunct id
        adjunct: String,
        /// Owning entity id
        entity: String,
    },

    /// Parent/child link would make an object its own ancestor
    #[error("{kind} {child} cannot be a child of {parent}: it is {parent} or one of its ancestors")]
    CyclicHierarchy {
        /// Object type
        kind: BrooklynObjectType,
        /// Intended parent id
        parent: String,
        /// Intended child id
        child: String,
    },

    /// Members added to a non-group entity
    #[error("entity {0} is not a group")]
    NotAGroup(String),

    /// Config rejected or unresolvable
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Caller broke a contract
    #[error("illegal state: {0}")]
    IllegalState(String),
}

/// Result alias for object model operations
pub type ModelResult<T> = Result<T, ModelError>;
