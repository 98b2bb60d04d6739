//! Common types for the Cassandra operator: CRDs, errors and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "cassandra-operator";

/// Annotation holding the last spec accepted by the reconciler
pub const LAST_APPLIED_ANNOTATION: &str = "db.cassandra.dev/last-applied-configuration";

/// Annotation holding the hash of a StatefulSet's desired pod template
pub const SPEC_HASH_ANNOTATION: &str = "db.cassandra.dev/spec-hash";

/// Finalizer that keeps a cluster around until its volume claims are deleted
pub const PVC_FINALIZER: &str = "db.cassandra.dev/pvc-to-delete";

/// Label carrying the owning cluster name
pub const CLUSTER_LABEL: &str = "app.kubernetes.io/instance";

/// Label carrying the datacenter name
pub const DC_LABEL: &str = "db.cassandra.dev/dc";

/// Label carrying the rack name
pub const RACK_LABEL: &str = "db.cassandra.dev/rack";

/// Port the Jolokia agent listens on inside Cassandra pods
pub const DEFAULT_JOLOKIA_PORT: u16 = 8778;
