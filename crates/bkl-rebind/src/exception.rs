//! Rebind exception handling
//!
//! Every problem met during rebind is reported to a [`RebindExceptionHandler`]
//! as a [`RebindFailure`]. The handler decides, per [`FailureCategory`],
//! whether the rebind aborts now, aborts once all objects were tried, or
//! carries on with a warning.

use std::fmt;

use bkl_core::BrooklynObjectType;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RebindError, RebindFailure, RebindResult};

/// What to do when a failure of some category occurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Abort the rebind immediately
    FailFast,
    /// Keep going, then abort with every failure listed
    FailAtEnd,
    /// Log a warning and keep going
    Continue,
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FailFast => "fail_fast",
            Self::FailAtEnd => "fail_at_end",
            Self::Continue => "continue",
        })
    }
}

/// Failure categories, each governed by its own [`FailureMode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// A referenced id has no memento
    DanglingRef,
    /// Loading, creating, managing or wiring an object failed
    Rebind,
    /// A config value was rejected
    AddConfig,
    /// An adjunct could not be attached to its entity
    AddPolicy,
    /// A policy, enricher or feed memento could not be loaded
    LoadPolicy,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DanglingRef => "dangling reference",
            Self::Rebind => "rebind",
            Self::AddConfig => "add config",
            Self::AddPolicy => "add policy",
            Self::LoadPolicy => "load policy",
        })
    }
}

/// Failure mode per category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureModes {
    /// Missing referenced ids
    pub dangling_ref: FailureMode,
    /// Load, create, manage and generic reconstruction failures
    pub rebind: FailureMode,
    /// Config validation failures
    pub add_config: FailureMode,
    /// Adjunct attachment failures
    pub add_policy: FailureMode,
    /// Adjunct memento load failures
    pub load_policy: FailureMode,
}

impl Default for FailureModes {
    fn default() -> Self {
        Self {
            dangling_ref: FailureMode::Continue,
            rebind: FailureMode::FailAtEnd,
            add_config: FailureMode::FailAtEnd,
            add_policy: FailureMode::Continue,
            load_policy: FailureMode::Continue,
        }
    }
}

impl FailureModes {
    /// Same mode for every category
    #[must_use]
    pub fn all(mode: FailureMode) -> Self {
        Self {
            dangling_ref: mode,
            rebind: mode,
            add_config: mode,
            add_policy: mode,
            load_policy: mode,
        }
    }

    /// Set dangling reference mode
    #[inline]
    #[must_use]
    pub fn with_dangling_ref(mut self, mode: FailureMode) -> Self {
        self.dangling_ref = mode;
        self
    }

    /// Set generic rebind mode
    #[inline]
    #[must_use]
    pub fn with_rebind(mut self, mode: FailureMode) -> Self {
        self.rebind = mode;
        self
    }

    /// Set add-config mode
    #[inline]
    #[must_use]
    pub fn with_add_config(mut self, mode: FailureMode) -> Self {
        self.add_config = mode;
        self
    }

    /// Set add-policy mode
    #[inline]
    #[must_use]
    pub fn with_add_policy(mut self, mode: FailureMode) -> Self {
        self.add_policy = mode;
        self
    }

    /// Set load-policy mode
    #[inline]
    #[must_use]
    pub fn with_load_policy(mut self, mode: FailureMode) -> Self {
        self.load_policy = mode;
        self
    }

    /// Mode governing a category
    #[must_use]
    pub fn mode_for(&self, category: FailureCategory) -> FailureMode {
        match category {
            FailureCategory::DanglingRef => self.dangling_ref,
            FailureCategory::Rebind => self.rebind,
            FailureCategory::AddConfig => self.add_config,
            FailureCategory::AddPolicy => self.add_policy,
            FailureCategory::LoadPolicy => self.load_policy,
        }
    }
}

/// Receives failures during one rebind pass
///
/// Implementations are used by a single rebind and then discarded.
pub trait RebindExceptionHandler: Send + Sync + fmt::Debug {
    /// Report a failure
    ///
    /// # Errors
    /// Returns an error when the rebind must abort now
    fn handle(&self, failure: RebindFailure) -> RebindResult<()>;

    /// Called once every object has been tried
    ///
    /// # Errors
    /// Returns the accumulated failures, if any must fail the rebind
    fn on_done(&self) -> RebindResult<()>;

    /// Called when the rebind aborted
    fn on_failed(&self, error: &RebindError) {
        warn!(%error, "rebind failed");
    }

    /// Failures that were tolerated
    fn warnings(&self) -> Vec<String>;

    /// A memento could not be loaded
    ///
    /// # Errors
    /// Per the handler's policy
    fn on_load_memento_failed(
        &self,
        kind: BrooklynObjectType,
        id: &str,
        message: &str,
    ) -> RebindResult<()> {
        let category = if kind.adjunct_kind().is_some() {
            FailureCategory::LoadPolicy
        } else {
            FailureCategory::Rebind
        };
        self.handle(RebindFailure::new(
            category,
            kind,
            id,
            format!("problem loading memento: {message}"),
        ))
    }

    /// A live object could not be created from its memento
    ///
    /// # Errors
    /// Per the handler's policy
    fn on_create_failed(&self, kind: BrooklynObjectType, id: &str, message: &str) -> RebindResult<()> {
        self.handle(RebindFailure::new(
            FailureCategory::Rebind,
            kind,
            id,
            format!("problem creating: {message}"),
        ))
    }

    /// A referenced id could not be found
    ///
    /// # Errors
    /// Per the handler's policy
    fn on_dangling(&self, kind: BrooklynObjectType, id: &str) -> RebindResult<()> {
        self.handle(RebindFailure::new(
            FailureCategory::DanglingRef,
            kind,
            id,
            "no such object",
        ))
    }

    /// A config value was rejected
    ///
    /// # Errors
    /// Per the handler's policy
    fn on_add_config_failed(
        &self,
        kind: BrooklynObjectType,
        id: &str,
        key: &str,
        message: &str,
    ) -> RebindResult<()> {
        self.handle(RebindFailure::new(
            FailureCategory::AddConfig,
            kind,
            id,
            format!("problem setting config '{key}': {message}"),
        ))
    }

    /// An adjunct could not be attached to its entity
    ///
    /// # Errors
    /// Per the handler's policy
    fn on_add_adjunct_failed(
        &self,
        kind: BrooklynObjectType,
        adjunct_id: &str,
        entity_id: &str,
        message: &str,
    ) -> RebindResult<()> {
        self.handle(RebindFailure::new(
            FailureCategory::AddPolicy,
            kind,
            adjunct_id,
            format!("problem adding to entity {entity_id}: {message}"),
        ))
    }

    /// A reconstructed object could not be managed
    ///
    /// # Errors
    /// Per the handler's policy
    fn on_manage_failed(&self, kind: BrooklynObjectType, id: &str, message: &str) -> RebindResult<()> {
        self.handle(RebindFailure::new(
            FailureCategory::Rebind,
            kind,
            id,
            format!("problem managing: {message}"),
        ))
    }

    /// Any other reconstruction problem
    ///
    /// # Errors
    /// Per the handler's policy
    fn on_rebind_failed(&self, kind: BrooklynObjectType, id: &str, message: &str) -> RebindResult<()> {
        self.handle(RebindFailure::new(FailureCategory::Rebind, kind, id, message))
    }
}

#[derive(Debug, Default)]
struct HandlerState {
    pending: Vec<RebindFailure>,
    warnings: Vec<String>,
}

/// Handler applying one [`FailureMode`] per category
#[derive(Debug, Default)]
pub struct DefaultRebindExceptionHandler {
    modes: FailureModes,
    state: Mutex<HandlerState>,
}

impl DefaultRebindExceptionHandler {
    /// Create handler
    #[must_use]
    pub fn new(modes: FailureModes) -> Self {
        Self {
            modes,
            state: Mutex::new(HandlerState::default()),
        }
    }

    /// Configured modes
    #[inline]
    #[must_use]
    pub fn modes(&self) -> &FailureModes {
        &self.modes
    }

    /// Failures held back until [`RebindExceptionHandler::on_done`]
    #[must_use]
    pub fn pending(&self) -> Vec<RebindFailure> {
        self.state.lock().pending.clone()
    }
}

impl RebindExceptionHandler for DefaultRebindExceptionHandler {
    fn handle(&self, failure: RebindFailure) -> RebindResult<()> {
        match self.modes.mode_for(failure.category) {
            FailureMode::FailFast => Err(RebindError::Failure(failure)),
            FailureMode::FailAtEnd => {
                debug!(%failure, "rebind failure deferred");
                self.state.lock().pending.push(failure);
                Ok(())
            }
            FailureMode::Continue => {
                warn!(%failure, "rebind continuing despite failure");
                self.state.lock().warnings.push(failure.to_string());
                Ok(())
            }
        }
    }

    fn on_done(&self) -> RebindResult<()> {
        let pending = std::mem::take(&mut self.state.lock().pending);
        if pending.is_empty() {
            Ok(())
        } else {
            Err(RebindError::Aggregate(pending))
        }
    }

    fn warnings(&self) -> Vec<String> {
        self.state.lock().warnings.clone()
    }
}
