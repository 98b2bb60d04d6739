//! Pod-level steps that must finish before a rack's StatefulSet changes
//!
//! Shrinking a StatefulSet kills the highest ordinal pod. Cassandra must
//! first stream that node's data away, so each removed node is
//! decommissioned through Jolokia and the StatefulSet only shrinks once the
//! node reports `DECOMMISSIONED`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::ResourceExt;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use cassandra_common::crd::{ActionName, ActionStatus, CassandraCluster, DcRack, RackStatus};
use cassandra_common::events::{ClusterEvent, EventPublisher};
use cassandra_common::kube_utils::{desired_replicas, is_pod_running, label_selector, labels_for_dc_rack};
use cassandra_common::Error;

use crate::controller::KubeClient;
use crate::jolokia::{credentials_for, pod_host, LiveQueryClient, Member, OperationMode};

/// Bounded pod-level work for one rack.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodOperations: Send + Sync {
    /// Run the pending step of the rack's action, if any.
    ///
    /// Returns true ("break resync") while the rack's StatefulSet must not
    /// be touched this pass.
    async fn execute(
        &self,
        cc: &CassandraCluster,
        rack: &DcRack,
        stored: &StatefulSet,
        rack_status: &mut RackStatus,
    ) -> Result<bool, Error>;
}

/// Pod operations that never run anything
pub struct NoopPodOperations;

#[async_trait]
impl PodOperations for NoopPodOperations {
    async fn execute(
        &self,
        _cc: &CassandraCluster,
        _rack: &DcRack,
        _stored: &StatefulSet,
        _rack_status: &mut RackStatus,
    ) -> Result<bool, Error> {
        Ok(false)
    }
}

/// Decommissions the node a scale down is about to remove
pub struct DecommissionOperations {
    kube: Arc<dyn KubeClient>,
    live: Arc<dyn LiveQueryClient>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl DecommissionOperations {
    /// Create operations backed by the given clients
    pub fn new(kube: Arc<dyn KubeClient>, live: Arc<dyn LiveQueryClient>) -> Self {
        Self {
            kube,
            live,
            events: None,
        }
    }

    /// Publish an event whenever a decommission starts
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }
}

#[async_trait]
impl PodOperations for DecommissionOperations {
    async fn execute(
        &self,
        cc: &CassandraCluster,
        rack: &DcRack,
        stored: &StatefulSet,
        rack_status: &mut RackStatus,
    ) -> Result<bool, Error> {
        let action = &rack_status.last_action;
        let scaling_down = action.name == ActionName::ScaleDown
            && matches!(
                action.status,
                ActionStatus::ToDo | ActionStatus::Ongoing | ActionStatus::Continue
            );
        if !scaling_down {
            return Ok(false);
        }
        let replicas = desired_replicas(stored);
        if replicas <= rack.nodes {
            return Ok(false);
        }

        let name = cc.name_any();
        let namespace = cc.namespace().unwrap_or_default();
        let pod_name = format!("{}-{}", stored.name_any(), replicas - 1);
        let selector = label_selector(&labels_for_dc_rack(&name, &rack.dc, &rack.rack));
        let pods = self.kube.list_pods(&namespace, &selector).await?;
        let Some(pod) = pods.iter().find(|p| p.name_any() == pod_name) else {
            debug!(cluster = %name, pod = %pod_name, "last pod already gone");
            return Ok(false);
        };
        if !is_pod_running(pod) {
            return Ok(true);
        }
        let Some(host) = pod_host(pod, &namespace) else {
            return Ok(true);
        };
        let member = Member {
            host,
            credentials: credentials_for(self.kube.as_ref(), cc, &namespace).await?,
        };

        match self.live.operation_mode(&member).await {
            Ok(OperationMode::Normal) => {
                info!(cluster = %name, pod = %pod_name, "decommissioning node");
                if let Err(e) = self.live.decommission(&member).await {
                    warn!(cluster = %name, pod = %pod_name, error = %e, "decommission request failed");
                    return Ok(true);
                }
                if rack_status.last_action.status == ActionStatus::ToDo {
                    rack_status
                        .last_action
                        .advance(ActionStatus::Ongoing, Utc::now())?;
                }
                if let Some(events) = &self.events {
                    let event = ClusterEvent::DecommissionStarted { pod: pod_name };
                    events.publish(cc, event).await;
                }
                Ok(true)
            }
            Ok(OperationMode::Decommissioned) => {
                info!(cluster = %name, pod = %pod_name, "node decommissioned, shrinking rack");
                Ok(false)
            }
            Ok(mode) => {
                debug!(cluster = %name, pod = %pod_name, ?mode, "waiting for decommission");
                Ok(true)
            }
            Err(e) => {
                warn!(cluster = %name, pod = %pod_name, error = %e, "cannot read operation mode");
                Ok(true)
            }
        }
    }
}
