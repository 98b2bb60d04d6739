//! Validation of topology edits against the last applied topology
//!
//! The only structural edit a running cluster accepts is adding or removing
//! one whole datacenter. Removing one is only accepted after it was drained
//! to zero nodes.

use tracing::warn;
use kube::ResourceExt;

use cassandra_common::crd::{
    ActionName, ActionStatus, CassandraCluster, CassandraClusterSpec, CassandraClusterStatus,
};
use cassandra_common::Error;

use crate::changelog::{diff_topology, has_change, ChangeKind};
use crate::controller::Context;
use crate::guard::{self, Verdict};
use crate::teardown;

/// Check the candidate topology against `old`.
///
/// On rejection the old topology is restored on `cc`. An approved
/// datacenter removal is handed to the teardown, whose verdict is returned.
pub async fn check_topology_changes(
    cc: &mut CassandraCluster,
    status: &mut CassandraClusterStatus,
    old: &CassandraClusterSpec,
    ctx: &Context,
) -> Result<Verdict, Error> {
    let name = cc.name_any();
    let changelog = diff_topology(&old.topology, &cc.spec.topology);

    if has_change(&changelog, ChangeKind::Update, &[])
        || has_change(&changelog, ChangeKind::Delete, &["DC.Rack", "-DC"])
        || has_change(&changelog, ChangeKind::Create, &["DC.Rack", "-DC"])
    {
        return Ok(refuse(
            cc,
            status,
            old,
            ctx,
            "only whole datacenters can be added or removed".to_string(),
        )
        .await);
    }

    let old_dcs = old.topology.datacenters().len();
    if cc.spec.topology.datacenters().len() + 1 < old_dcs {
        return Ok(refuse(
            cc,
            status,
            old,
            ctx,
            "only one datacenter can be removed at a time".to_string(),
        )
        .await);
    }

    if cc.spec.topology.dc_rack_count() < old.topology.dc_rack_count() {
        // the persisted status, not this pass's copy
        let persisted = cc.status.clone().unwrap_or_default();
        if persisted.last_cluster_action == ActionName::ScaleDown
            && persisted.last_cluster_action_status != ActionStatus::Done
        {
            return Ok(refuse(
                cc,
                status,
                old,
                ctx,
                "wait for the running scale down to finish before removing a datacenter"
                    .to_string(),
            )
            .await);
        }

        let Some(dc_name) = cc.spec.topology.removed_dc_name(&old.topology) else {
            return Ok(Verdict::Allowed);
        };
        let still_running = old
            .topology
            .find_dc(&dc_name)
            .is_some_and(|dc| dc.has_nodes(old.nodes_per_racks));
        if still_running {
            return Ok(refuse(
                cc,
                status,
                old,
                ctx,
                format!("scale datacenter {dc_name} down to 0 before removing it"),
            )
            .await);
        }

        warn!(cluster = %name, dc = %dc_name, "removing datacenter");
        return teardown::delete_dc_objects(cc, status, old, ctx).await;
    }

    Ok(Verdict::Allowed)
}

async fn refuse(
    cc: &mut CassandraCluster,
    status: &mut CassandraClusterStatus,
    old: &CassandraClusterSpec,
    ctx: &Context,
    reason: String,
) -> Verdict {
    warn!(
        cluster = %cc.name_any(),
        reason = %reason,
        "refused topology change, restoring previous topology"
    );
    cc.spec.topology = old.topology.clone();
    guard::reject(cc, status, ctx, format!("topology change refused: {reason}")).await
}
