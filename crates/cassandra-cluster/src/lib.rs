//! Reconciliation core for CassandraCluster resources
//!
//! This crate provides the Kubernetes controller for CassandraCluster CRDs:
//! the change guard run against the last applied spec, the per-rack loop
//! that changes one rack at a time, and the status roll-up.
//!
//! Related crates:
//! - `cassandra-common`: CRD types, errors, telemetry
//! - `cassandra-operator`: the operator binary

pub mod actions;
pub mod changelog;
pub mod controller;
pub mod guard;
pub mod jolokia;
pub mod pod_operations;
pub mod racks;
pub mod resources;
pub mod scale_down;
pub mod seeds;
pub mod status;
pub mod teardown;
pub mod topology;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export controller types
pub use controller::{
    error_policy, reconcile, Context, ContextBuilder, KubeClient, KubeClientImpl,
};

pub use actions::{RackActions, StatefulSetActions};
pub use guard::Verdict;
pub use jolokia::{JolokiaClient, LiveQueryClient};
pub use pod_operations::{DecommissionOperations, NoopPodOperations, PodOperations};
pub use racks::RackPass;

// Re-export common error types
pub use cassandra_common::{Error, Result};
