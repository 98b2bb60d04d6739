//! Seed-list planning
//!
//! Seeds are the stable pod addresses every node contacts on startup. A new
//! list is rolled out through the seed-list barrier so that no rack restarts
//! with it before all racks agree.

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::info;

use cassandra_common::crd::{
    ActionName, ActionStatus, CassandraCluster, CassandraClusterStatus, LastAction,
};
use cassandra_common::kube_utils::{dc_rack_key, rack_service_name, statefulset_name};

/// Seeds taken from each datacenter
pub const SEEDS_PER_DC: usize = 3;

/// Seed addresses for the current topology.
///
/// Per datacenter, ordinal 0 of each rack is taken first, then ordinal 1,
/// and so on, until [`SEEDS_PER_DC`] pods are picked or the racks run out.
pub fn compute_seed_list(cc: &CassandraCluster) -> Vec<String> {
    let name = cc.name_any();
    let namespace = cc.namespace().unwrap_or_default();
    let default_nodes = cc.spec.nodes_per_racks;

    let mut seeds = Vec::new();
    for dc in cc.spec.topology.datacenters() {
        let racks: Vec<(String, i32)> = dc
            .racks()
            .iter()
            .zip(dc.rack_nodes(default_nodes))
            .map(|(rack, nodes)| (dc_rack_key(&dc.name, &rack.name), nodes))
            .collect();
        let deepest = racks.iter().map(|(_, nodes)| *nodes).max().unwrap_or(0);

        let mut picked = 0;
        'dc: for ordinal in 0..deepest {
            for (key, nodes) in &racks {
                if picked == SEEDS_PER_DC {
                    break 'dc;
                }
                if ordinal < *nodes {
                    seeds.push(format!(
                        "{}-{}.{}.{}",
                        statefulset_name(&name, key),
                        ordinal,
                        rack_service_name(&name, key),
                        namespace
                    ));
                    picked += 1;
                }
            }
        }
    }
    seeds
}

/// Bring `spec.seedList` in line with the topology.
///
/// An empty list is filled in directly. A stale list is only replaced with
/// `autoUpdateSeedList` and while nothing else is going on; every rack then
/// waits at the barrier with `{UpdateSeedList, Configuring}`. Returns whether
/// the spec changed.
pub fn check_seed_list(
    cc: &mut CassandraCluster,
    status: &mut CassandraClusterStatus,
    now: DateTime<Utc>,
) -> bool {
    let seeds = compute_seed_list(cc);
    if seeds == cc.spec.seed_list {
        return false;
    }
    if cc.spec.seed_list.is_empty() {
        info!(cluster = %cc.name_any(), seeds = %seeds.join(","), "initializing seed list");
        cc.spec.seed_list = seeds;
        return true;
    }
    if !cc.spec.auto_update_seed_list || status.last_cluster_action_status != ActionStatus::Done {
        return false;
    }
    let keys: Vec<String> = cc.spec.dc_racks().iter().map(|r| r.key()).collect();
    let quiescent = keys.iter().all(|key| {
        status
            .cassandra_rack_status
            .get(key)
            .is_some_and(|rack| rack.is_quiescent())
    });
    if !quiescent {
        return false;
    }

    info!(
        cluster = %cc.name_any(),
        from = %cc.spec.seed_list.join(","),
        to = %seeds.join(","),
        "seed list changed, holding racks at the barrier"
    );
    cc.spec.seed_list = seeds;
    for key in &keys {
        if let Some(rack) = status.cassandra_rack_status.get_mut(key) {
            rack.last_action =
                LastAction::start(ActionName::UpdateSeedList, ActionStatus::Configuring, now);
        }
    }
    status.last_cluster_action = ActionName::UpdateSeedList;
    status.last_cluster_action_status = ActionStatus::Configuring;
    true
}
