//! High availability
//!
//! Nodes sharing one object store coordinate through the management plane:
//! each node writes only its own heartbeat record under `plane/nodes/`, and
//! the master's id is kept at `plane/master`. A node whose master's heartbeat
//! is older than the timeout promotes itself, which triggers a fresh writable
//! rebind. Hot standby nodes keep a read-only copy of the persisted state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RebindError, RebindResult};
use crate::exception::DefaultRebindExceptionHandler;
use crate::manager::RebindManager;

/// How a node joins the management plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighAvailabilityMode {
    /// Master if no live master exists, otherwise standby
    #[default]
    Auto,
    /// Master; fails if another live master exists
    Master,
    /// Standby, taking over when the master dies
    Standby,
    /// Standby holding a read-only rebind of the persisted state
    HotStandby,
    /// No coordination; rebind and run as master
    Disabled,
}

/// Lifecycle state of one management node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagementNodeState {
    /// Starting up
    #[default]
    Initializing,
    /// Waiting to take over
    Standby,
    /// Waiting to take over, with a read-only copy of state
    HotStandby,
    /// Owns and persists the state
    Master,
    /// Could not take over
    Failed,
    /// Shut down
    Terminated,
}

impl ManagementNodeState {
    /// Whether `to` may follow this state
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        use ManagementNodeState::{Failed, HotStandby, Initializing, Master, Standby, Terminated};
        match self {
            Initializing => matches!(to, Standby | HotStandby | Master | Failed | Terminated),
            Standby => matches!(to, HotStandby | Master | Failed | Terminated),
            HotStandby => matches!(to, Standby | Master | Failed | Terminated),
            Master | Failed => matches!(to, Failed | Terminated) && to != self,
            Terminated => false,
        }
    }

    /// Standby of either flavour
    #[must_use]
    pub fn is_standby(self) -> bool {
        matches!(self, Self::Standby | Self::HotStandby)
    }
}

impl fmt::Display for ManagementNodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initializing => "initializing",
            Self::Standby => "standby",
            Self::HotStandby => "hot-standby",
            Self::Master => "master",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        })
    }
}

/// One node's entry in the plane record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    /// Node id
    pub node_id: String,
    /// Last reported state
    pub state: ManagementNodeState,
    /// Last heartbeat
    pub last_heartbeat: DateTime<Utc>,
}

/// View of the management plane assembled from the per-node records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementPlaneRecord {
    /// Current master, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_node_id: Option<String>,
    /// Nodes by id
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeRecord>,
}

impl ManagementPlaneRecord {
    /// Master whose heartbeat is recent enough at `now`
    #[must_use]
    pub fn live_master(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> Option<&NodeRecord> {
        let master = self.nodes.get(self.master_node_id.as_deref()?)?;
        let alive = master.state == ManagementNodeState::Master
            && now.signed_duration_since(master.last_heartbeat) <= timeout;
        alive.then_some(master)
    }

    /// Insert or replace a node entry
    pub fn upsert(&mut self, node: NodeRecord) {
        self.nodes.insert(node.node_id.clone(), node);
    }
}

/// Drives one node through the HA lifecycle
#[derive(Debug)]
pub struct HighAvailabilityManager {
    rebind: Arc<RebindManager>,
    state: RwLock<ManagementNodeState>,
}

impl HighAvailabilityManager {
    /// Create manager for the node owning `rebind`'s management context
    #[must_use]
    pub fn new(rebind: Arc<RebindManager>) -> Self {
        Self {
            rebind,
            state: RwLock::new(ManagementNodeState::Initializing),
        }
    }

    /// Rebind manager
    #[inline]
    #[must_use]
    pub fn rebind_manager(&self) -> &Arc<RebindManager> {
        &self.rebind
    }

    /// This node's id
    #[must_use]
    pub fn node_id(&self) -> &str {
        self.rebind.management().node_id()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ManagementNodeState {
        *self.state.read()
    }

    fn transition(&self, to: ManagementNodeState) -> RebindResult<()> {
        let mut state = self.state.write();
        if !state.can_transition_to(to) {
            return Err(RebindError::IllegalNodeState { from: *state, to });
        }
        info!(node = self.node_id(), from = %*state, %to, "node state");
        *state = to;
        Ok(())
    }

    fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.rebind.config().heartbeat_timeout())
            .unwrap_or(chrono::Duration::MAX)
    }

    async fn plane_record(&self) -> RebindResult<ManagementPlaneRecord> {
        Ok(self
            .rebind
            .persister()
            .read_plane_record()
            .await?
            .unwrap_or_default())
    }

    /// Live master other than this node
    async fn other_live_master(&self) -> RebindResult<Option<String>> {
        let record = self.plane_record().await?;
        Ok(record
            .live_master(Utc::now(), self.heartbeat_timeout())
            .filter(|master| master.node_id != self.node_id())
            .map(|master| master.node_id.clone()))
    }

    /// Join the management plane
    ///
    /// # Errors
    /// Returns store or rebind errors, or [`RebindError::IllegalState`] when
    /// `Master` is requested while another master is alive
    pub async fn start(&self, mode: HighAvailabilityMode) -> RebindResult<ManagementNodeState> {
        info!(node = self.node_id(), ?mode, "starting high availability");
        match mode {
            HighAvailabilityMode::Disabled => {
                self.rebind.rebind().await?;
                self.transition(ManagementNodeState::Master)?;
                self.rebind.start_persistence();
                return Ok(self.state());
            }
            HighAvailabilityMode::Auto => match self.other_live_master().await? {
                Some(master) => {
                    info!(node = self.node_id(), %master, "master alive, becoming standby");
                    self.transition(ManagementNodeState::Standby)?;
                }
                None => self.promote_to_master().await?,
            },
            HighAvailabilityMode::Master => {
                if let Some(master) = self.other_live_master().await? {
                    return Err(RebindError::IllegalState(format!(
                        "cannot start {} as master: {master} is master",
                        self.node_id()
                    )));
                }
                self.promote_to_master().await?;
            }
            HighAvailabilityMode::Standby => self.transition(ManagementNodeState::Standby)?,
            HighAvailabilityMode::HotStandby => self.refresh_hot_standby().await?,
        }
        self.heartbeat().await?;
        Ok(self.state())
    }

    /// Replace local state by a read-only rebind of the persisted state
    ///
    /// # Errors
    /// Returns store or rebind errors
    pub async fn refresh_hot_standby(&self) -> RebindResult<()> {
        let mgmt = self.rebind.management();
        mgmt.unmanage_all();
        let handler = DefaultRebindExceptionHandler::new(self.rebind.config().failure_modes);
        self.rebind.rebind_with(&handler, true).await?;
        if self.state() != ManagementNodeState::HotStandby {
            self.transition(ManagementNodeState::HotStandby)?;
        }
        Ok(())
    }

    /// Take ownership: fresh writable rebind, then persist as master
    ///
    /// # Errors
    /// Returns store or rebind errors; a failed rebind leaves the node
    /// [`ManagementNodeState::Failed`]
    pub async fn promote_to_master(&self) -> RebindResult<()> {
        let from = self.state();
        if !from.can_transition_to(ManagementNodeState::Master) {
            return Err(RebindError::IllegalNodeState {
                from,
                to: ManagementNodeState::Master,
            });
        }
        info!(node = self.node_id(), %from, "promoting to master");

        let mgmt = self.rebind.management();
        mgmt.unmanage_all();
        mgmt.set_read_only(false);
        let handler = DefaultRebindExceptionHandler::new(self.rebind.config().failure_modes);
        if let Err(error) = self.rebind.rebind_with(&handler, false).await {
            warn!(node = self.node_id(), %error, "promotion failed");
            self.transition(ManagementNodeState::Failed)?;
            self.heartbeat().await?;
            return Err(error);
        }

        self.transition(ManagementNodeState::Master)?;
        self.heartbeat().await?;
        self.rebind.start_persistence();
        Ok(())
    }

    /// Publish this node's heartbeat, claiming mastership when master
    ///
    /// # Errors
    /// Returns store errors
    pub async fn heartbeat(&self) -> RebindResult<()> {
        let state = self.state();
        let persister = self.rebind.persister();
        persister
            .write_node_record(&NodeRecord {
                node_id: self.node_id().to_string(),
                state,
                last_heartbeat: Utc::now(),
            })
            .await?;
        if state == ManagementNodeState::Master {
            persister.claim_master(self.node_id()).await
        } else {
            persister.release_master(self.node_id()).await.map(|_| ())
        }
    }

    /// Standby poll: promote when the master has died, refresh otherwise
    ///
    /// # Errors
    /// Returns store or rebind errors
    pub async fn check_master(&self) -> RebindResult<ManagementNodeState> {
        let state = self.state();
        if state.is_standby() {
            if self.other_live_master().await?.is_none() {
                self.promote_to_master().await?;
            } else if state == ManagementNodeState::HotStandby {
                self.refresh_hot_standby().await?;
            }
        }
        if !matches!(self.state(), ManagementNodeState::Terminated) {
            self.heartbeat().await?;
        }
        Ok(self.state())
    }

    /// Leave the management plane
    ///
    /// A master writes a final checkpoint first.
    ///
    /// # Errors
    /// Returns store errors
    pub async fn stop(&self) -> RebindResult<()> {
        self.rebind.stop_persistence().await;
        if self.state() == ManagementNodeState::Master {
            self.rebind.checkpoint().await?;
        }
        self.transition(ManagementNodeState::Terminated)?;
        self.heartbeat().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_transitions() {
        use ManagementNodeState::*;
        assert!(Initializing.can_transition_to(HotStandby));
        assert!(Standby.can_transition_to(Master));
        assert!(HotStandby.can_transition_to(Master));
        assert!(!Master.can_transition_to(Standby));
        assert!(!Master.can_transition_to(Master));
        assert!(Failed.can_transition_to(Terminated));
        assert!(!Terminated.can_transition_to(Initializing));
    }

    #[test]
    fn stale_master_is_not_live() {
        let now = Utc::now();
        let mut record = ManagementPlaneRecord {
            master_node_id: Some("n1".into()),
            ..ManagementPlaneRecord::default()
        };
        record.upsert(NodeRecord {
            node_id: "n1".into(),
            state: ManagementNodeState::Master,
            last_heartbeat: now - chrono::Duration::seconds(60),
        });
        assert!(record
            .live_master(now, chrono::Duration::seconds(30))
            .is_none());
        assert!(record
            .live_master(now, chrono::Duration::seconds(120))
            .is_some());
    }

    #[test]
    fn plane_record_json_shape() {
        let mut record = ManagementPlaneRecord::default();
        record.upsert(NodeRecord {
            node_id: "n1".into(),
            state: ManagementNodeState::HotStandby,
            last_heartbeat: Utc::now(),
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["nodes"]["n1"]["state"], "hot_standby");
        assert!(json.get("masterNodeId").is_none());
    }
}
