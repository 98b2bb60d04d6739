//! Safety check for scaling a datacenter down to zero nodes
//!
//! A datacenter may only go to zero once no keyspace replicates data into
//! it. Any doubt (no answer, no address, no credentials) counts as "still
//! holds data".

use kube::ResourceExt;
use tracing::{debug, info, warn};

use cassandra_common::crd::{CassandraCluster, CassandraClusterSpec, CassandraClusterStatus};
use cassandra_common::events::ClusterEvent;
use cassandra_common::kube_utils::{is_pod_ready, label_selector, labels_for_dc_rack};
use cassandra_common::Error;

use crate::controller::Context;
use crate::guard::{self, Verdict};
use crate::jolokia::{credentials_for, pod_host, Member};

/// Veto a scale down to zero of a datacenter that still holds data.
///
/// Only the first rack of the datacenter is sampled and only its first
/// ready pod is asked: any member reports the replication of the whole
/// ring. On veto the old topology is restored on `cc`.
pub async fn check_scale_down(
    cc: &mut CassandraCluster,
    status: &mut CassandraClusterStatus,
    old: &CassandraClusterSpec,
    ctx: &Context,
) -> Result<Verdict, Error> {
    let Some(dc) = cc.spec.topology.dc_scaled_to_zero(
        cc.spec.nodes_per_racks,
        &old.topology,
        old.nodes_per_racks,
    ) else {
        return Ok(Verdict::Allowed);
    };
    let name = cc.name_any();
    let namespace = cc.namespace().unwrap_or_default();
    info!(cluster = %name, dc = %dc.name, "scale down to 0 requested");

    let Some(rack) = dc.racks().into_iter().next() else {
        return Ok(Verdict::Allowed);
    };
    let selector = label_selector(&labels_for_dc_rack(&name, &dc.name, &rack.name));
    let pods = match ctx.kube.list_pods(&namespace, &selector).await {
        Ok(pods) => pods,
        Err(e) => {
            return Ok(veto(cc, status, old, ctx, format!("cannot list pods: {e}")).await);
        }
    };
    let Some(pod) = pods.iter().find(|p| is_pod_ready(p)) else {
        debug!(cluster = %name, dc = %dc.name, "no ready pod left, nothing to check");
        return Ok(Verdict::Allowed);
    };

    let Some(host) = pod_host(pod, &namespace) else {
        return Ok(veto(
            cc,
            status,
            old,
            ctx,
            format!("pod {} has no address yet", pod.name_any()),
        )
        .await);
    };
    let credentials = match credentials_for(ctx.kube.as_ref(), cc, &namespace).await {
        Ok(credentials) => credentials,
        Err(e) => {
            return Ok(veto(cc, status, old, ctx, format!("cannot read jolokia credentials: {e}")).await);
        }
    };
    let member = Member { host, credentials };

    match ctx.live_query.keyspaces_with_data_in_dc(&member, &dc.name).await {
        Ok(keyspaces) if keyspaces.is_empty() => {
            info!(cluster = %name, dc = %dc.name, "no data replicated into datacenter, scale down to 0 allowed");
            Ok(Verdict::Allowed)
        }
        Ok(keyspaces) => {
            let note = format!(
                "keyspaces {} still replicate data into {}",
                keyspaces.join(", "),
                dc.name
            );
            Ok(veto(cc, status, old, ctx, note).await)
        }
        Err(e) => Ok(veto(cc, status, old, ctx, format!("live query failed: {e}")).await),
    }
}

async fn veto(
    cc: &mut CassandraCluster,
    status: &mut CassandraClusterStatus,
    old: &CassandraClusterSpec,
    ctx: &Context,
    reason: String,
) -> Verdict {
    warn!(cluster = %cc.name_any(), reason = %reason, "refused scale down to 0");
    cc.spec.topology = old.topology.clone();
    ctx.publish(
        cc,
        ClusterEvent::ScaleDownBlocked {
            reason: reason.clone(),
        },
    )
    .await;
    guard::reject(cc, status, ctx, format!("scale down to 0 refused: {reason}")).await
}
