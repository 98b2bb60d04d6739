//! Shared builders for unit tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use chrono::Utc;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetStatus};
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodSpec, PodStatus};
use kube::api::ObjectMeta;
use serde_json::json;

use cassandra_common::crd::{
    ActionName, ActionStatus, CassandraCluster, CassandraClusterSpec, CassandraClusterStatus,
    ClusterPhase, Datacenter, LastAction, Rack, RackStatus,
};
use cassandra_common::events::{ClusterEvent, EventPublisher};
use cassandra_common::Error;

/// Cluster `ring` in namespace `db`; each entry is (dc, nodes per rack, racks)
pub fn cluster(dcs: &[(&str, i32, &[&str])]) -> CassandraCluster {
    let mut spec: CassandraClusterSpec =
        serde_json::from_value(json!({})).expect("empty spec deserializes");
    spec.topology.dc = dcs
        .iter()
        .map(|(name, nodes, racks)| Datacenter {
            name: name.to_string(),
            nodes_per_racks: Some(*nodes),
            rack: racks
                .iter()
                .map(|r| Rack {
                    name: r.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
        .collect();
    let mut cc = CassandraCluster::new("ring", spec);
    cc.metadata.namespace = Some("db".to_string());
    cc.metadata.uid = Some("6f1d2c3b-0000-4000-8000-000000000001".to_string());
    cc.metadata.resource_version = Some("1".to_string());
    cc
}

/// Record the current spec as the accepted one
pub fn snapshot_of(mut cc: CassandraCluster) -> CassandraCluster {
    cc.annotate_last_applied()
        .expect("snapshot serializes");
    cc
}

/// Every rack Running and Done, cluster Running and Done
pub fn running_status(cc: &CassandraCluster) -> CassandraClusterStatus {
    let now = Utc::now();
    let mut status = CassandraClusterStatus {
        phase: ClusterPhase::Running,
        last_cluster_action: ActionName::Initializing,
        last_cluster_action_status: ActionStatus::Done,
        ..Default::default()
    };
    for dc_rack in cc.spec.dc_racks() {
        status.cassandra_rack_status.insert(
            dc_rack.key(),
            RackStatus {
                phase: ClusterPhase::Running,
                last_action: LastAction::start(ActionName::Initializing, ActionStatus::Done, now),
            },
        );
    }
    status
}

/// Bare StatefulSet with `replicas` requested and `ready` ready
pub fn statefulset(name: &str, replicas: i32, ready: i32) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("db".to_string()),
            resource_version: Some("7".to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        status: Some(StatefulSetStatus {
            replicas,
            ready_replicas: Some(ready),
            updated_replicas: Some(ready),
            observed_generation: Some(1),
            current_revision: Some("rev-1".to_string()),
            update_revision: Some("rev-1".to_string()),
            ..Default::default()
        }),
    }
}

/// Give a built StatefulSet the status of a fully rolled out one
pub fn ready(mut sts: StatefulSet) -> StatefulSet {
    let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    sts.metadata.resource_version = Some("7".to_string());
    sts.metadata.generation = Some(1);
    sts.status = statefulset("unused", replicas, replicas).status;
    sts
}

/// Running and ready pod with a stable DNS identity
pub fn running_pod(name: &str, subdomain: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("db".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            hostname: Some(name.to_string()),
            subdomain: Some(subdomain.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            pod_ip: Some("10.0.0.1".to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// A 404 as returned by the client layer
pub fn not_found(kind: &str, name: &str) -> Error {
    Error::not_found(kind, name)
}

/// A 409 from the API server
pub fn conflict() -> Error {
    Error::Kube {
        source: kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }),
    }
}

/// Collects every status handed to `patch_status`
#[derive(Clone, Default)]
pub struct StatusCapture {
    inner: Arc<Mutex<Vec<CassandraClusterStatus>>>,
}

impl StatusCapture {
    pub fn record(&self, status: CassandraClusterStatus) {
        self.inner
            .lock()
            .expect("mutex should not be poisoned")
            .push(status);
    }

    pub fn last(&self) -> Option<CassandraClusterStatus> {
        self.inner
            .lock()
            .expect("mutex should not be poisoned")
            .last()
            .cloned()
    }
}

/// Collects every published event
#[derive(Clone, Default)]
pub struct EventCapture {
    inner: Arc<Mutex<Vec<ClusterEvent>>>,
}

impl EventCapture {
    pub fn last(&self) -> Option<ClusterEvent> {
        self.inner
            .lock()
            .expect("mutex should not be poisoned")
            .last()
            .cloned()
    }
}

#[async_trait]
impl EventPublisher for EventCapture {
    async fn publish(&self, _cluster: &CassandraCluster, event: ClusterEvent) {
        self.inner
            .lock()
            .expect("mutex should not be poisoned")
            .push(event);
    }
}
