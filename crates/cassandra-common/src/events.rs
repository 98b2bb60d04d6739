//! Kubernetes Events about a CassandraCluster
//!
//! Events are fire-and-forget: a failure to publish is logged and never
//! fails a reconcile pass.

use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

use crate::crd::CassandraCluster;

/// Something the operator did to a cluster that its users should see
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClusterEvent {
    /// A forbidden spec edit was reverted
    ChangeRejected {
        /// What was refused and restored
        note: String,
    },
    /// The objects of removed racks were deleted
    DatacenterRemoved {
        /// dc-rack keys whose objects were deleted
        racks: Vec<String>,
        /// Objects whose deletion failed and that are no longer tracked
        leaked: Vec<String>,
    },
    /// A datacenter scale down to zero was vetoed
    ScaleDownBlocked {
        /// Why the datacenter cannot be emptied
        reason: String,
    },
    /// A pod resource change was scheduled on every rack
    ResourcesChanged,
    /// The seed list was replaced
    SeedListUpdated {
        /// The new seeds
        seeds: Vec<String>,
    },
    /// A node decommission was started before shrinking a rack
    DecommissionStarted {
        /// Pod being decommissioned
        pod: String,
    },
}

impl ClusterEvent {
    /// Normal, or Warning for refusals and leaks
    pub fn type_(&self) -> EventType {
        match self {
            Self::ChangeRejected { .. } | Self::ScaleDownBlocked { .. } => EventType::Warning,
            Self::DatacenterRemoved { leaked, .. } if !leaked.is_empty() => EventType::Warning,
            _ => EventType::Normal,
        }
    }

    /// Machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ChangeRejected { .. } => "ChangeRejected",
            Self::DatacenterRemoved { .. } => "DatacenterRemoved",
            Self::ScaleDownBlocked { .. } => "ScaleDownBlocked",
            Self::ResourcesChanged => "ResourcesChanged",
            Self::SeedListUpdated { .. } => "SeedListUpdated",
            Self::DecommissionStarted { .. } => "DecommissionStarted",
        }
    }

    /// What the operator was doing
    pub fn action(&self) -> &'static str {
        match self {
            Self::ChangeRejected { .. } => "Guard",
            Self::DatacenterRemoved { .. } => "Delete",
            Self::ScaleDownBlocked { .. } | Self::DecommissionStarted { .. } => "Scale",
            Self::ResourcesChanged | Self::SeedListUpdated { .. } => "Reconcile",
        }
    }

    /// Human-readable message
    pub fn note(&self) -> String {
        match self {
            Self::ChangeRejected { note } => note.clone(),
            Self::DatacenterRemoved { racks, leaked } if leaked.is_empty() => {
                format!("deleted racks {}", racks.join(", "))
            }
            Self::DatacenterRemoved { racks, leaked } => format!(
                "deleted racks {}; could not delete {}",
                racks.join(", "),
                leaked.join(", ")
            ),
            Self::ScaleDownBlocked { reason } => reason.clone(),
            Self::ResourcesChanged => {
                "pod resources changed, racks will be updated one at a time".to_string()
            }
            Self::SeedListUpdated { seeds } => format!("seed list is now {}", seeds.join(",")),
            Self::DecommissionStarted { pod } => format!("decommissioning {pod}"),
        }
    }
}

/// Publishes [`ClusterEvent`]s on a cluster.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Record `event` on `cluster`
    async fn publish(&self, cluster: &CassandraCluster, event: ClusterEvent);
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, cluster: &CassandraCluster, event: ClusterEvent) {
        let reason = event.reason();
        let recorded = Event {
            type_: event.type_(),
            reason: reason.to_string(),
            note: Some(event.note()),
            action: event.action().to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&recorded, &cluster.object_ref(&())).await {
            warn!(reason, error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _cluster: &CassandraCluster, _event: ClusterEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusals_are_warnings() {
        let rejected = ClusterEvent::ChangeRejected {
            note: "dataCapacity 10Gi restored to 3Gi".to_string(),
        };
        assert_eq!(rejected.type_(), EventType::Warning);
        assert_eq!(rejected.reason(), "ChangeRejected");
        assert_eq!(rejected.action(), "Guard");
        assert_eq!(ClusterEvent::ResourcesChanged.type_(), EventType::Normal);
    }

    #[test]
    fn leaked_objects_turn_a_removal_into_a_warning() {
        let clean = ClusterEvent::DatacenterRemoved {
            racks: vec!["east-r1".to_string()],
            leaked: vec![],
        };
        assert_eq!(clean.type_(), EventType::Normal);
        assert_eq!(clean.note(), "deleted racks east-r1");

        let leaky = ClusterEvent::DatacenterRemoved {
            racks: vec!["east-r1".to_string()],
            leaked: vec!["StatefulSet ring-east-r1".to_string()],
        };
        assert_eq!(leaky.type_(), EventType::Warning);
        assert!(leaky.note().ends_with("could not delete StatefulSet ring-east-r1"));
    }
}
