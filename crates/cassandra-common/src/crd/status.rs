//! Cluster and rack status, and the rack action state machine

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle phase of a rack, and of the cluster as a whole
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ClusterPhase {
    /// Resources are being created for the first time
    #[default]
    #[serde(rename = "Initializing")]
    Initial,
    /// The StatefulSet is not fully ready
    Pending,
    /// Every requested node is ready
    Running,
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "Initializing"),
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
        }
    }
}

/// Kind of operation a rack (or the cluster) is carrying out
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ActionName {
    /// First creation of the rack
    #[default]
    Initializing,
    /// Adding nodes to a rack
    ScaleUp,
    /// Decommissioning nodes from a rack
    ScaleDown,
    /// Tearing down a removed datacenter
    #[serde(rename = "DeleteDC")]
    DeleteDc,
    /// Rolling out new pod resources
    UpdateResources,
    /// Rolling out a new seed list
    UpdateSeedList,
    /// Rolling out any other pod template change
    UpdateStatefulSet,
    /// A forbidden spec edit was reverted
    #[serde(rename = "CorrectCRDConfig")]
    CorrectCrdConfig,
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "Initializing",
            Self::ScaleUp => "ScaleUp",
            Self::ScaleDown => "ScaleDown",
            Self::DeleteDc => "DeleteDC",
            Self::UpdateResources => "UpdateResources",
            Self::UpdateSeedList => "UpdateSeedList",
            Self::UpdateStatefulSet => "UpdateStatefulSet",
            Self::CorrectCrdConfig => "CorrectCRDConfig",
        };
        f.write_str(s)
    }
}

/// Progress of an action
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ActionStatus {
    /// Waiting for every rack to be ready for a cluster-wide change
    Configuring,
    /// Scheduled, nothing applied yet
    #[default]
    ToDo,
    /// Applied, waiting for the rollout to converge
    Ongoing,
    /// Multi-step action between two steps
    Continue,
    /// Last step applied, waiting for cleanup
    Finalizing,
    /// Completed
    Done,
}

impl ActionStatus {
    /// Position in the forward lifecycle; `Ongoing` and `Continue` share a rank
    fn rank(self) -> u8 {
        match self {
            Self::Configuring => 0,
            Self::ToDo => 1,
            Self::Ongoing | Self::Continue => 2,
            Self::Finalizing => 3,
            Self::Done => 4,
        }
    }

    /// Whether an action in this status may move to `next` without restarting
    pub fn can_advance_to(self, next: ActionStatus) -> bool {
        if self == Self::Done {
            return next == Self::Done;
        }
        next.rank() >= self.rank()
    }

    /// Applied and not yet converged
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Ongoing | Self::Continue | Self::Finalizing)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuring => "Configuring",
            Self::ToDo => "ToDo",
            Self::Ongoing => "Ongoing",
            Self::Continue => "Continue",
            Self::Finalizing => "Finalizing",
            Self::Done => "Done",
        };
        f.write_str(s)
    }
}

/// The action a rack is carrying out, or carried out last
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastAction {
    /// Action kind
    pub name: ActionName,
    /// Action progress
    pub status: ActionStatus,
    /// When the action was started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the action reached Done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl LastAction {
    /// Begin a new action
    pub fn start(name: ActionName, status: ActionStatus, now: DateTime<Utc>) -> Self {
        let mut action = Self {
            name,
            status,
            start_time: Some(now),
            end_time: None,
        };
        if status == ActionStatus::Done {
            action.end_time = Some(now);
        }
        action
    }

    /// Move the current action forward.
    ///
    /// Fails on a backwards move or on any move out of `Done`. Reaching `Done`
    /// stamps `end_time` once; repeating `Done` is a no-op.
    pub fn advance(&mut self, next: ActionStatus, now: DateTime<Utc>) -> crate::Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(Error::Transition {
                action: self.name.to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        if next == ActionStatus::Done && self.end_time.is_none() {
            self.end_time = Some(now);
        }
        self.status = next;
        Ok(())
    }
}

/// Status of a single rack
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RackStatus {
    /// Rack lifecycle phase
    pub phase: ClusterPhase,
    /// Current or last action
    pub last_action: LastAction,
}

/// Tagged view of a rack's (phase, action) pair
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RackState {
    /// First creation still in progress
    Initializing,
    /// Running with nothing pending
    Quiescent,
    /// Running with an action pending or in flight
    Busy {
        /// Action kind
        action: ActionName,
        /// Action progress
        status: ActionStatus,
    },
    /// Created, but the StatefulSet is not ready
    NotReady,
}

impl RackStatus {
    /// Status of a rack seen for the first time
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            phase: ClusterPhase::Initial,
            last_action: LastAction::start(ActionName::Initializing, ActionStatus::Ongoing, now),
        }
    }

    /// Classify the rack's state
    pub fn state(&self) -> RackState {
        match (self.phase, self.last_action.status) {
            (ClusterPhase::Initial, _) => RackState::Initializing,
            (ClusterPhase::Running, ActionStatus::Done) => RackState::Quiescent,
            (ClusterPhase::Running, status) => RackState::Busy {
                action: self.last_action.name,
                status,
            },
            (ClusterPhase::Pending, _) => RackState::NotReady,
        }
    }

    /// Running with nothing pending
    pub fn is_quiescent(&self) -> bool {
        self.state() == RackState::Quiescent
    }

    /// Whether the rack holds `action` in `status`
    pub fn is_at(&self, action: ActionName, status: ActionStatus) -> bool {
        self.last_action.name == action && self.last_action.status == status
    }
}

/// Status of a CassandraCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CassandraClusterStatus {
    /// Cluster-wide phase
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Action of the first rack with pending work, or the last cluster-wide action
    #[serde(default)]
    pub last_cluster_action: ActionName,

    /// Progress of `last_cluster_action`
    #[serde(default)]
    pub last_cluster_action_status: ActionStatus,

    /// Per-rack status, keyed by dc-rack key
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cassandra_rack_status: BTreeMap<String, RackStatus>,
}
