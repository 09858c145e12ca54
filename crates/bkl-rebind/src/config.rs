//! Rebind and persistence configuration
//!
//! ```toml
//! persistence_dir = "/var/lib/bkl/state"
//! persist_period_ms = 1000
//! read_only = false
//! heartbeat_timeout_ms = 30000
//!
//! [failure_modes]
//! dangling_ref = "continue"
//! rebind = "fail_at_end"
//! add_config = "fail_at_end"
//! add_policy = "continue"
//! load_policy = "continue"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RebindError, RebindResult};
use crate::exception::FailureModes;

/// Persistence, rebind and HA settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebindConfig {
    /// Directory of the file-based object store
    pub persistence_dir: Option<PathBuf>,
    /// Delay between periodic checkpoints, in milliseconds
    pub persist_period_ms: u64,
    /// Rebind without taking ownership; nothing is written
    pub read_only: bool,
    /// Master heartbeat age after which it is considered dead, in milliseconds
    pub heartbeat_timeout_ms: u64,
    /// Failure mode per category
    pub failure_modes: FailureModes,
}

impl Default for RebindConfig {
    fn default() -> Self {
        Self {
            persistence_dir: None,
            persist_period_ms: 1_000,
            read_only: false,
            heartbeat_timeout_ms: 30_000,
            failure_modes: FailureModes::default(),
        }
    }
}

impl RebindConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// Returns [`RebindError::InvalidConfig`] for malformed TOML
    pub fn from_toml_str(text: &str) -> RebindResult<Self> {
        toml::from_str(text).map_err(|e| RebindError::InvalidConfig(e.to_string()))
    }

    /// Read a TOML file
    ///
    /// # Errors
    /// Returns [`RebindError::InvalidConfig`] if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> RebindResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading rebind configuration");
        let text = std::fs::read_to_string(path)
            .map_err(|e| RebindError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns [`RebindError::InvalidConfig`] if a value has no TOML form
    pub fn to_toml_string(&self) -> RebindResult<String> {
        toml::to_string(self).map_err(|e| RebindError::InvalidConfig(e.to_string()))
    }

    /// With store directory
    #[inline]
    #[must_use]
    pub fn with_persistence_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persistence_dir = Some(dir.into());
        self
    }

    /// With checkpoint period
    #[inline]
    #[must_use]
    pub fn with_persist_period(mut self, period: Duration) -> Self {
        self.persist_period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With read-only flag
    #[inline]
    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// With heartbeat timeout
    #[inline]
    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With failure modes
    #[inline]
    #[must_use]
    pub fn with_failure_modes(mut self, modes: FailureModes) -> Self {
        self.failure_modes = modes;
        self
    }

    /// Checkpoint period
    #[must_use]
    pub fn persist_period(&self) -> Duration {
        Duration::from_millis(self.persist_period_ms.max(1))
    }

    /// Heartbeat timeout
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::FailureMode;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RebindConfig::from_toml_str(
            r#"
            persist_period_ms = 250

            [failure_modes]
            dangling_ref = "fail_fast"
            "#,
        )
        .unwrap();
        assert_eq!(config.persist_period(), Duration::from_millis(250));
        assert_eq!(config.failure_modes.dangling_ref, FailureMode::FailFast);
        assert_eq!(config.failure_modes.rebind, FailureMode::FailAtEnd);
        assert!(!config.read_only);
    }

    #[test]
    fn toml_round_trip() {
        let config = RebindConfig::new()
            .with_persistence_dir("/tmp/state")
            .with_read_only(true)
            .with_heartbeat_timeout(Duration::from_secs(5));
        let text = config.to_toml_string().unwrap();
        assert_eq!(RebindConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn unknown_mode_rejected() {
        let err = RebindConfig::from_toml_str("[failure_modes]\nrebind = \"sometimes\"").unwrap_err();
        assert!(matches!(err, RebindError::InvalidConfig(_)));
    }
}
