//! Custom Resource Definitions for the Cassandra operator

mod cluster;
mod status;
mod topology;

pub use cluster::{
    CassandraCluster, CassandraClusterSpec, LastAppliedSnapshot, ResourceRequirements, SecretRef,
    SnapshotMetadata,
};
pub use status::{
    ActionName, ActionStatus, CassandraClusterStatus, ClusterPhase, LastAction, RackState,
    RackStatus,
};
pub use topology::{DcRack, Datacenter, Rack, Topology, DEFAULT_DC_NAME, DEFAULT_RACK_NAME};
