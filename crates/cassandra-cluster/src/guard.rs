//! Enforcement of the changes a running cluster may accept
//!
//! The guard compares the candidate spec with the last applied snapshot.
//! Forbidden edits are reverted in place on the candidate so the next
//! persisted update carries the old values back.

use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use cassandra_common::crd::{
    ActionName, ActionStatus, CassandraCluster, CassandraClusterStatus, LastAction,
};
use cassandra_common::events::ClusterEvent;
use cassandra_common::{Error, PVC_FINALIZER};

use crate::controller::Context;
use crate::{scale_down, topology};

/// Outcome of the guard for one pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing forbidden; the pass goes on
    Allowed,
    /// A forbidden edit was reverted; the pass stops
    Rejected,
    /// A datacenter was torn down; the pass stops
    DatacenterRemoved,
}

impl Verdict {
    /// Whether the rest of the pass must be skipped
    pub fn halts(self) -> bool {
        self != Self::Allowed
    }
}

/// Reject or stage changes made since the last applied snapshot.
///
/// Runs only when a snapshot exists and differs from the candidate. Returns
/// [`Verdict::Rejected`] after reverting a forbidden field, the verdict of the
/// topology validator or scale-down check when they fire, and
/// [`Verdict::Allowed`] otherwise. An accepted resource change leaves every
/// existing rack with a pending `UpdateResources` action.
pub async fn check_non_allowed_changes(
    cc: &mut CassandraCluster,
    status: &mut CassandraClusterStatus,
    ctx: &Context,
) -> Result<Verdict, Error> {
    let name = cc.name_any();
    let old = match cc.last_applied() {
        None => return Ok(Verdict::Allowed),
        Some(Err(e)) => {
            warn!(cluster = %name, error = %e, "cannot read last applied configuration");
            return Ok(Verdict::Allowed);
        }
        Some(Ok(snapshot)) => snapshot.spec,
    };
    if old == cc.spec {
        return Ok(Verdict::Allowed);
    }

    let mut refused = Vec::new();
    if cc.spec.nodes_per_racks == 0 {
        refused.push(format!(
            "nodesPerRacks=0 restored to {}",
            old.nodes_per_racks
        ));
        cc.spec.nodes_per_racks = old.nodes_per_racks;
    }
    if cc.spec.data_capacity != old.data_capacity {
        refused.push(format!(
            "dataCapacity {} restored to {}",
            cc.spec.data_capacity, old.data_capacity
        ));
        cc.spec.data_capacity = old.data_capacity.clone();
    }
    if cc.spec.data_storage_class != old.data_storage_class {
        refused.push(format!(
            "dataStorageClass {:?} restored to {:?}",
            cc.spec.data_storage_class, old.data_storage_class
        ));
        cc.spec.data_storage_class = old.data_storage_class.clone();
    }
    if !refused.is_empty() {
        let note = refused.join("; ");
        warn!(cluster = %name, changes = %note, "refused change on immutable fields");
        return Ok(reject(cc, status, ctx, note).await);
    }

    let verdict = topology::check_topology_changes(cc, status, &old, ctx).await?;
    if verdict.halts() {
        return Ok(verdict);
    }

    let verdict = scale_down::check_scale_down(cc, status, &old, ctx).await?;
    if verdict.halts() {
        return Ok(verdict);
    }

    if cc.spec.resources != old.resources {
        info!(cluster = %name, "pod resources changed, scheduling rack updates");
        let now = Utc::now();
        for dc_rack in cc.spec.dc_racks() {
            let key = dc_rack.key();
            if let Some(rack) = status.cassandra_rack_status.get_mut(&key) {
                debug!(cluster = %name, dc_rack = %key, "UpdateResources=ToDo");
                rack.last_action = LastAction::start(ActionName::UpdateResources, ActionStatus::ToDo, now);
            }
        }
        ctx.publish(cc, ClusterEvent::ResourcesChanged).await;
    }

    Ok(Verdict::Allowed)
}

/// Record a correction and tell the user why their change was undone.
///
/// The caller has already restored the offending fields on `cc`.
pub(crate) async fn reject(
    cc: &CassandraCluster,
    status: &mut CassandraClusterStatus,
    ctx: &Context,
    note: String,
) -> Verdict {
    status.last_cluster_action = ActionName::CorrectCrdConfig;
    ctx.publish(cc, ClusterEvent::ChangeRejected { note }).await;
    Verdict::Rejected
}

/// Align the PVC finalizer with `spec.deletePVC`.
///
/// Only acts on a first reconcile or when the flag changed since the last
/// snapshot. Returns true when the finalizer list was modified; the caller
/// persists it.
pub fn sync_delete_pvc(cc: &mut CassandraCluster) -> bool {
    let flag_changed = match cc.last_applied() {
        None => true,
        Some(Ok(snapshot)) => snapshot.spec.delete_pvc != cc.spec.delete_pvc,
        Some(Err(e)) => {
            warn!(cluster = %cc.name_any(), error = %e, "cannot read last applied configuration");
            false
        }
    };
    if !flag_changed || cc.metadata.deletion_timestamp.is_some() {
        return false;
    }

    let present = cc.has_finalizer(PVC_FINALIZER);
    match (cc.spec.delete_pvc, present) {
        (true, false) => {
            info!(cluster = %cc.name_any(), "volume claims will be deleted with the cluster");
            cc.finalizers_mut().push(PVC_FINALIZER.to_string());
            true
        }
        (false, true) => {
            info!(cluster = %cc.name_any(), "volume claims will be kept");
            cc.finalizers_mut().retain(|f| f != PVC_FINALIZER);
            true
        }
        _ => false,
    }
}
