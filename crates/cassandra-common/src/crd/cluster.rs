//! CassandraCluster Custom Resource Definition
//!
//! A CassandraCluster describes a multi-datacenter, multi-rack Cassandra ring.
//! Each (datacenter, rack) pair is backed by one StatefulSet.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::CassandraClusterStatus;
use super::topology::{DcRack, Topology};
use crate::{Error, LAST_APPLIED_ANNOTATION};

/// Specification for a CassandraCluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "db.cassandra.dev",
    version = "v1alpha1",
    kind = "CassandraCluster",
    plural = "cassandraclusters",
    shortname = "cassc",
    status = "CassandraClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Action","type":"string","jsonPath":".status.lastClusterAction"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.lastClusterActionStatus"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CassandraClusterSpec {
    /// Default node count of every rack
    #[serde(default = "default_nodes_per_racks")]
    pub nodes_per_racks: i32,

    /// Datacenters and racks of the ring
    #[serde(default)]
    pub topology: Topology,

    /// Delete volume claims when the cluster is deleted
    #[serde(default, rename = "deletePVC")]
    pub delete_pvc: bool,

    /// Let the operator maintain `seed_list` from the topology
    #[serde(default)]
    pub auto_update_seed_list: bool,

    /// One-shot flag allowing the next blocked operation to proceed
    #[serde(default)]
    pub unlock_next_operation: bool,

    /// Compute resources of each Cassandra container
    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Size of each node's data volume; immutable
    #[serde(default = "default_data_capacity")]
    pub data_capacity: String,

    /// Storage class of each node's data volume; immutable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_storage_class: Option<String>,

    /// Cassandra container image
    #[serde(default = "default_image")]
    pub image: String,

    /// Seed node addresses handed to every node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seed_list: Vec<String>,

    /// Secret with `username`/`password` keys for the Jolokia agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jolokia_secret: Option<SecretRef>,
}

fn default_nodes_per_racks() -> i32 {
    1
}

fn default_data_capacity() -> String {
    "3Gi".to_string()
}

fn default_image() -> String {
    "cassandra:4.1".to_string()
}

/// Requests and limits as Kubernetes quantity strings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Minimum resources (e.g. `cpu: 500m`, `memory: 2Gi`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    /// Maximum resources
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

/// Reference to a Secret in the cluster's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretRef {
    /// Secret name
    pub name: String,
}

impl CassandraClusterSpec {
    /// Every (dc, rack) pair in processing order
    pub fn dc_racks(&self) -> Vec<DcRack> {
        self.topology.dc_racks(self.nodes_per_racks)
    }

    /// Validate the structure of the spec.
    ///
    /// Datacenter and rack names must be non-empty, dc-rack keys unique,
    /// the global node count positive and per-dc or per-rack counts
    /// non-negative.
    pub fn validate(&self, cluster: &str) -> Result<(), Error> {
        if self.nodes_per_racks <= 0 {
            return Err(Error::validation_for_field(
                cluster,
                "spec.nodesPerRacks",
                "must be at least 1",
            ));
        }
        let mut seen = BTreeMap::new();
        for dc_rack in self.dc_racks() {
            let field = format!(
                "spec.topology.dc[{}].rack[{}]",
                dc_rack.dc_index, dc_rack.rack_index
            );
            if dc_rack.dc.is_empty() || dc_rack.rack.is_empty() {
                return Err(Error::validation_for_field(
                    cluster,
                    field,
                    "datacenter and rack names must not be empty",
                ));
            }
            if dc_rack.nodes < 0 {
                return Err(Error::validation_for_field(
                    cluster,
                    field,
                    "node count must not be negative",
                ));
            }
            if let Some(previous) = seen.insert(dc_rack.key(), field.clone()) {
                return Err(Error::validation_for_field(
                    cluster,
                    field,
                    format!("dc-rack key {} already used by {previous}", dc_rack.key()),
                ));
            }
        }
        Ok(())
    }
}

/// The document stored in the last-applied annotation
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastAppliedSnapshot {
    /// API version of the cluster object
    pub api_version: String,
    /// Kind of the cluster object
    pub kind: String,
    /// Identity of the cluster object
    pub metadata: SnapshotMetadata,
    /// Spec that was accepted
    pub spec: CassandraClusterSpec,
}

/// Name and namespace recorded in a snapshot
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SnapshotMetadata {
    /// Object name
    pub name: String,
    /// Object namespace
    #[serde(default)]
    pub namespace: String,
}

impl CassandraCluster {
    /// Serialize the current spec the way the last-applied annotation stores it
    pub fn compute_last_applied(&self) -> Result<String, Error> {
        let snapshot = LastAppliedSnapshot {
            api_version: "db.cassandra.dev/v1alpha1".to_string(),
            kind: "CassandraCluster".to_string(),
            metadata: SnapshotMetadata {
                name: self.name_any(),
                namespace: self.namespace().unwrap_or_default(),
            },
            spec: self.spec.clone(),
        };
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Raw last-applied annotation, if present
    pub fn last_applied_raw(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(LAST_APPLIED_ANNOTATION))
            .map(String::as_str)
    }

    /// Parsed last-applied snapshot, if present
    pub fn last_applied(&self) -> Option<Result<LastAppliedSnapshot, Error>> {
        self.last_applied_raw().map(|raw| {
            serde_json::from_str(raw).map_err(|e| {
                Error::serialization_for_kind("CassandraCluster", format!("last-applied: {e}"))
            })
        })
    }

    /// Record the current spec as the last applied one
    pub fn annotate_last_applied(&mut self) -> Result<(), Error> {
        let value = self.compute_last_applied()?;
        self.annotations_mut()
            .insert(LAST_APPLIED_ANNOTATION.to_string(), value);
        Ok(())
    }

    /// Whether the finalizer list holds `finalizer`
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }
}
