//! Removal of the workloads and services of a deleted datacenter

use kube::ResourceExt;
use tracing::{info, warn};

use cassandra_common::crd::{ActionName, CassandraCluster, CassandraClusterSpec, CassandraClusterStatus};
use cassandra_common::events::ClusterEvent;
use cassandra_common::kube_utils::{
    dc_service_name, exporter_service_name, rack_service_name, statefulset_name,
};
use cassandra_common::Error;

use crate::controller::Context;
use crate::guard::Verdict;

/// Delete the objects of every rack that is in `status` but not in the spec.
///
/// Deletions are best effort: an absent object is skipped silently and any
/// other failure is logged before moving on. The status entries of the
/// deleted racks are dropped either way, so an object whose deletion failed
/// is no longer tracked and is reported as leaked. Returns
/// [`Verdict::Allowed`] when there was nothing to delete.
pub async fn delete_dc_objects(
    cc: &CassandraCluster,
    status: &mut CassandraClusterStatus,
    old: &CassandraClusterSpec,
    ctx: &Context,
) -> Result<Verdict, Error> {
    let name = cc.name_any();
    let namespace = cc.namespace().unwrap_or_default();

    let wanted: Vec<String> = cc.spec.dc_racks().iter().map(|r| r.key()).collect();
    let orphans: Vec<String> = status
        .cassandra_rack_status
        .keys()
        .filter(|key| !wanted.contains(key))
        .cloned()
        .collect();
    if orphans.is_empty() {
        return Ok(Verdict::Allowed);
    }

    let old_racks = old.dc_racks();
    let mut leaked = Vec::new();
    for key in &orphans {
        let dc = old_racks
            .iter()
            .find(|r| &r.key() == key)
            .map(|r| r.dc.clone())
            .unwrap_or_else(|| key.split('-').next().unwrap_or_default().to_string());
        info!(cluster = %name, dc_rack = %key, "deleting rack objects");

        let sts = statefulset_name(&name, key);
        if let Err(e) = ctx.kube.delete_statefulset(&namespace, &sts).await {
            if !e.is_not_found() {
                warn!(cluster = %name, dc_rack = %key, error = %e, "cannot delete statefulset");
                leaked.push(format!("StatefulSet {sts}"));
            }
        }
        for service in [
            dc_service_name(&name, &dc),
            rack_service_name(&name, key),
            exporter_service_name(&name, &dc),
        ] {
            if let Err(e) = ctx.kube.delete_service(&namespace, &service).await {
                if !e.is_not_found() {
                    warn!(cluster = %name, dc_rack = %key, service = %service, error = %e, "cannot delete service");
                    leaked.push(format!("Service {service}"));
                }
            }
        }
        status.cassandra_rack_status.remove(key);
    }

    if !leaked.is_empty() {
        warn!(
            cluster = %name,
            objects = %leaked.join(", "),
            "rack status dropped, these objects are left behind and must be deleted by hand"
        );
    }
    status.last_cluster_action = ActionName::DeleteDc;
    ctx.publish(
        cc,
        ClusterEvent::DatacenterRemoved {
            racks: orphans,
            leaked,
        },
    )
    .await;
    Ok(Verdict::DatacenterRemoved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mockall::predicate::eq;

    use crate::controller::MockKubeClient;
    use crate::fixtures::{cluster, conflict, not_found, running_status, EventCapture};
    use crate::jolokia::MockLiveQueryClient;

    fn context(kube: MockKubeClient) -> Context {
        Context::for_testing(Arc::new(kube), Arc::new(MockLiveQueryClient::new()))
    }

    fn setup() -> (CassandraCluster, CassandraClusterStatus, CassandraClusterSpec) {
        let before = cluster(&[("west", 3, &["r1"]), ("East", 0, &["r1", "r2"])]);
        let status = running_status(&before);
        let after = cluster(&[("west", 3, &["r1"])]);
        (after, status, before.spec)
    }

    #[tokio::test]
    async fn deletes_statefulsets_and_services_of_removed_racks() {
        let (cc, mut status, old) = setup();
        let mut kube = MockKubeClient::new();
        kube.expect_delete_statefulset()
            .with(eq("db"), eq("ring-east-r1"))
            .times(1)
            .returning(|_, _| Ok(()));
        kube.expect_delete_statefulset()
            .with(eq("db"), eq("ring-east-r2"))
            .times(1)
            .returning(|_, _| Ok(()));
        for service in ["ring-east", "ring-east-exporter-jmx"] {
            kube.expect_delete_service()
                .with(eq("db"), eq(service))
                .times(2)
                .returning(|_, _| Ok(()));
        }
        for service in ["ring-east-r1", "ring-east-r2"] {
            kube.expect_delete_service()
                .with(eq("db"), eq(service))
                .times(1)
                .returning(|_, _| Ok(()));
        }

        let verdict = delete_dc_objects(&cc, &mut status, &old, &context(kube))
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::DatacenterRemoved);
        assert_eq!(status.last_cluster_action, ActionName::DeleteDc);
        assert_eq!(
            status.cassandra_rack_status.keys().collect::<Vec<_>>(),
            vec!["west-r1"]
        );
    }

    #[tokio::test]
    async fn second_teardown_is_a_no_op() {
        let (cc, mut status, old) = setup();
        let mut kube = MockKubeClient::new();
        kube.expect_delete_statefulset()
            .times(2)
            .returning(|_, name| Err(not_found("StatefulSet", name)));
        kube.expect_delete_service()
            .times(6)
            .returning(|_, name| Err(not_found("Service", name)));
        let ctx = context(kube);

        let first = delete_dc_objects(&cc, &mut status, &old, &ctx).await.unwrap();
        assert_eq!(first, Verdict::DatacenterRemoved);
        let second = delete_dc_objects(&cc, &mut status, &old, &ctx).await.unwrap();
        assert_eq!(second, Verdict::Allowed);
    }

    #[tokio::test]
    async fn failed_deletion_does_not_stop_the_teardown() {
        let (cc, mut status, old) = setup();
        let mut kube = MockKubeClient::new();
        kube.expect_delete_statefulset()
            .with(eq("db"), eq("ring-east-r1"))
            .times(1)
            .returning(|_, _| Err(conflict()));
        kube.expect_delete_statefulset()
            .with(eq("db"), eq("ring-east-r2"))
            .times(1)
            .returning(|_, _| Ok(()));
        kube.expect_delete_service()
            .times(6)
            .returning(|_, _| Err(Error::internal("api unavailable")));

        let events = EventCapture::default();
        let mut ctx = context(kube);
        ctx.events = Arc::new(events.clone());

        let verdict = delete_dc_objects(&cc, &mut status, &old, &ctx)
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::DatacenterRemoved);
        assert!(!status.cassandra_rack_status.contains_key("east-r2"));

        let Some(ClusterEvent::DatacenterRemoved { racks, leaked }) = events.last() else {
            panic!("expected a DatacenterRemoved event");
        };
        assert_eq!(racks, vec!["east-r1", "east-r2"]);
        assert!(leaked.contains(&"StatefulSet ring-east-r1".to_string()));
        assert!(!leaked.contains(&"StatefulSet ring-east-r2".to_string()));
        assert!(leaked.contains(&"Service ring-east-exporter-jmx".to_string()));
    }

    #[tokio::test]
    async fn clean_teardown_leaks_nothing() {
        let (cc, mut status, old) = setup();
        let mut kube = MockKubeClient::new();
        kube.expect_delete_statefulset().returning(|_, _| Ok(()));
        kube.expect_delete_service()
            .returning(|_, name| Err(not_found("Service", name)));
        let events = EventCapture::default();
        let mut ctx = context(kube);
        ctx.events = Arc::new(events.clone());

        delete_dc_objects(&cc, &mut status, &old, &ctx).await.unwrap();
        assert_eq!(
            events.last(),
            Some(ClusterEvent::DatacenterRemoved {
                racks: vec!["east-r1".to_string(), "east-r2".to_string()],
                leaked: vec![],
            })
        );
    }

    #[tokio::test]
    async fn nothing_to_delete_when_status_matches_spec() {
        let cc = cluster(&[("west", 3, &["r1"])]);
        let mut status = running_status(&cc);
        let kube = MockKubeClient::new();
        let verdict = delete_dc_objects(&cc, &mut status, &cc.spec.clone(), &context(kube))
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Allowed);
        assert_eq!(status.last_cluster_action, ActionName::Initializing);
    }
}
