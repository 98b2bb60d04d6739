//! Naming, labelling and readiness helpers shared by the controller and its
//! collaborators.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use sha2::{Digest, Sha256};

use crate::{CLUSTER_LABEL, DC_LABEL, RACK_LABEL};

/// Value of `app.kubernetes.io/name` on everything the operator creates
pub const APP_NAME: &str = "cassandra";

/// Value of `app.kubernetes.io/managed-by` on everything the operator creates
pub const MANAGED_BY: &str = "cassandra-operator";

/// Compose the dc-rack key used to index rack status and name resources.
pub fn dc_rack_key(dc: &str, rack: &str) -> String {
    format!("{dc}-{rack}").to_lowercase()
}

/// Name of the StatefulSet backing one rack
pub fn statefulset_name(cluster: &str, dc_rack: &str) -> String {
    format!("{cluster}-{dc_rack}")
}

/// Name of the headless Service governing one rack's pods
pub fn rack_service_name(cluster: &str, dc_rack: &str) -> String {
    format!("{cluster}-{dc_rack}")
}

/// Name of the per-datacenter client Service
pub fn dc_service_name(cluster: &str, dc: &str) -> String {
    format!("{cluster}-{}", dc.to_lowercase())
}

/// Name of the per-datacenter JMX exporter Service
pub fn exporter_service_name(cluster: &str, dc: &str) -> String {
    format!("{cluster}-{}-exporter-jmx", dc.to_lowercase())
}

/// Labels selecting every pod of a cluster
pub fn labels_for_cluster(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), APP_NAME.to_string()),
        ("app.kubernetes.io/managed-by".to_string(), MANAGED_BY.to_string()),
        (CLUSTER_LABEL.to_string(), cluster.to_string()),
    ])
}

/// Labels selecting every pod of one datacenter
pub fn labels_for_dc(cluster: &str, dc: &str) -> BTreeMap<String, String> {
    let mut labels = labels_for_cluster(cluster);
    labels.insert(DC_LABEL.to_string(), dc.to_string());
    labels
}

/// Labels selecting the pods of one rack
pub fn labels_for_dc_rack(cluster: &str, dc: &str, rack: &str) -> BTreeMap<String, String> {
    let mut labels = labels_for_dc(cluster, dc);
    labels.insert(RACK_LABEL.to_string(), rack.to_string());
    labels
}

/// Render labels as an equality-based label selector (`k=v,k2=v2`).
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// A pod that is running and not being deleted
pub fn is_pod_running(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_none()
        && pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|phase| phase == "Running")
}

/// A running pod whose `Ready` condition is true
pub fn is_pod_ready(pod: &Pod) -> bool {
    is_pod_running(pod)
        && pod
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
}

/// Replica count requested by a StatefulSet's spec
pub fn desired_replicas(sts: &StatefulSet) -> i32 {
    sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
}

/// Replicas the StatefulSet controller reports ready
pub fn ready_replicas(sts: &StatefulSet) -> i32 {
    sts.status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

/// True when every requested replica of the StatefulSet reports ready.
pub fn statefulset_ready(sts: &StatefulSet) -> bool {
    let desired = desired_replicas(sts);
    let Some(status) = sts.status.as_ref() else {
        return desired == 0;
    };
    status.replicas == desired && status.ready_replicas.unwrap_or(0) == desired
}

/// True when the last spec change of the StatefulSet has fully rolled out.
///
/// Requires the controller to have observed the current generation, every
/// replica to run the update revision, and every replica to be ready.
pub fn statefulset_rolled_out(sts: &StatefulSet) -> bool {
    let Some(status) = sts.status.as_ref() else {
        return false;
    };
    let generation = sts.metadata.generation.unwrap_or(0);
    let desired = desired_replicas(sts);
    let revisions_match = match (&status.current_revision, &status.update_revision) {
        (Some(current), Some(update)) => current == update,
        (None, None) => true,
        _ => false,
    };
    status.observed_generation.unwrap_or(0) >= generation
        && statefulset_ready(sts)
        && status.updated_replicas.unwrap_or(0) == desired
        && revisions_match
}

/// Short, stable hash of a string for use in annotations.
pub fn deterministic_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    // first 8 bytes are enough for change detection
    digest[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Patch the status sub-resource of a namespaced Kubernetes resource.
///
/// Serializes `status` into `{ "status": <status> }` and applies it via
/// merge-patch.
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
    field_manager: &str,
) -> std::result::Result<(), kube::Error>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
