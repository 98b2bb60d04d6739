//! Cluster-wide status roll-up and the seed-list barrier

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::{debug, info};

use cassandra_common::crd::{
    ActionName, ActionStatus, CassandraCluster, CassandraClusterStatus, ClusterPhase, LastAction,
};

/// Roll rack statuses up into the cluster phase and action.
///
/// Racks are walked in processing order. The first rack with an unfinished
/// action gives the cluster its action; the first rack that is not Running
/// gives the cluster its phase and ends the walk.
pub fn aggregate_cluster_status(cc: &CassandraCluster, status: &mut CassandraClusterStatus) {
    let mut pending = false;
    for dc_rack in cc.spec.dc_racks() {
        let key = dc_rack.key();
        let Some(rack) = status.cassandra_rack_status.get(&key) else {
            status.phase = ClusterPhase::Initial;
            return;
        };
        let (phase, action) = (rack.phase, rack.last_action.clone());

        if !pending && action.status != ActionStatus::Done {
            status.last_cluster_action = action.name;
            status.last_cluster_action_status = action.status;
            pending = true;
        }
        if phase != ClusterPhase::Running {
            if status.phase != phase {
                info!(cluster = %cc.name_any(), dc_rack = %key, %phase, "cluster phase follows rack");
            }
            status.phase = phase;
            return;
        }
    }

    status.phase = ClusterPhase::Running;
    if !pending && status.last_cluster_action_status != ActionStatus::Done {
        info!(cluster = %cc.name_any(), action = %status.last_cluster_action, "action is done");
        status.last_cluster_action_status = ActionStatus::Done;
    }
}

/// Release every rack into the seed-list update at once.
///
/// Only acts while the cluster holds `{UpdateSeedList, Configuring}`. Racks
/// still in their Initial phase do not hold the barrier. Returns whether the
/// racks were flipped.
pub fn flip_seed_list_barrier(
    cc: &CassandraCluster,
    status: &mut CassandraClusterStatus,
    now: DateTime<Utc>,
) -> bool {
    if !cc.spec.auto_update_seed_list
        || status.last_cluster_action != ActionName::UpdateSeedList
        || status.last_cluster_action_status != ActionStatus::Configuring
    {
        return false;
    }

    let keys: Vec<String> = cc.spec.dc_racks().iter().map(|r| r.key()).collect();
    for key in &keys {
        let ready = status.cassandra_rack_status.get(key).is_some_and(|rack| {
            rack.is_at(ActionName::UpdateSeedList, ActionStatus::Configuring)
                || rack.phase == ClusterPhase::Initial
        });
        if !ready {
            debug!(cluster = %cc.name_any(), dc_rack = %key, "seed-list barrier still closed");
            return false;
        }
    }

    for key in &keys {
        if let Some(rack) = status.cassandra_rack_status.get_mut(key) {
            rack.last_action = LastAction::start(ActionName::UpdateSeedList, ActionStatus::ToDo, now);
        }
    }
    status.last_cluster_action_status = ActionStatus::ToDo;
    info!(cluster = %cc.name_any(), racks = keys.len(), "seed-list barrier released");
    true
}
