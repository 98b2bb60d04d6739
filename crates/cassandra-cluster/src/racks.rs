//! Per-rack reconciliation loop
//!
//! Racks are visited datacenter by datacenter, in declared order, one at a
//! time. The pass stops at the first rack that is not done with its current
//! action, so at most one rack is ever mid-change.

use std::collections::btree_map::Entry;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use cassandra_common::crd::{
    ActionName, ActionStatus, CassandraCluster, CassandraClusterStatus, ClusterPhase, DcRack,
    RackStatus,
};
use cassandra_common::kube_utils::{
    desired_replicas, label_selector, labels_for_dc_rack, ready_replicas, statefulset_name,
    statefulset_ready,
};
use cassandra_common::{Error, PVC_FINALIZER};

use crate::controller::Context;
use crate::resources::{
    build_statefulset, cluster_service, dc_service, exporter_service, needs_update, rack_service,
};

/// How a pass over the racks ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RackPass {
    /// Every rack was visited
    Completed,
    /// The pass stopped at this rack
    Stopped {
        /// dc-rack key of the rack that stopped the pass
        rack: String,
    },
}

/// Drive every rack one step towards the spec.
///
/// A rack seen for the first time only gets a status entry; the pass then
/// stops so the entry is persisted before anything is created. While the
/// cluster is being deleted with `deletePVC`, each rack's volume claims are
/// deleted instead and the finalizer is released once all racks are done.
pub async fn reconcile_racks(
    cc: &mut CassandraCluster,
    status: &mut CassandraClusterStatus,
    ctx: &Context,
) -> Result<RackPass, Error> {
    let name = cc.name_any();
    let namespace = cc.namespace().unwrap_or_default();
    let deleting = cc.metadata.deletion_timestamp.is_some() && cc.spec.delete_pvc;
    let now = Utc::now();

    for rack in cc.spec.dc_racks() {
        let key = rack.key();
        let rack_status = match status.cassandra_rack_status.entry(key.clone()) {
            Entry::Vacant(entry) => {
                info!(cluster = %name, dc_rack = %key, "new rack, initializing its status");
                entry.insert(RackStatus::initial(now));
                return Ok(RackPass::Stopped { rack: key });
            }
            Entry::Occupied(entry) => entry.into_mut(),
        };

        if deleting {
            let selector = label_selector(&labels_for_dc_rack(&name, &rack.dc, &rack.rack));
            let deleted = ctx.kube.delete_pvcs(&namespace, &selector).await?;
            info!(cluster = %name, dc_rack = %key, deleted, "deleted volume claims");
            continue;
        }

        let sts_name = statefulset_name(&name, &key);
        let stored = match ctx.kube.get_statefulset(&namespace, &sts_name).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(cluster = %name, dc_rack = %key, error = %e, "cannot get statefulset");
                None
            }
        };

        match stored.as_ref() {
            None => debug!(cluster = %name, dc_rack = %key, "statefulset not created yet"),
            Some(sts) => {
                update_phase(rack_status, &rack, sts, now)?;
                ctx.rack_actions
                    .next_action(cc, &rack, sts, rack_status, now)?;

                if rack_status.phase != ClusterPhase::Initial {
                    let break_resync = match ctx
                        .pod_operations
                        .execute(cc, &rack, sts, rack_status)
                        .await
                    {
                        Ok(brk) => brk,
                        Err(e) => {
                            error!(cluster = %name, dc_rack = %key, error = %e, "pod operation failed");
                            false
                        }
                    };
                    if break_resync {
                        if !rack_status.is_quiescent() {
                            debug!(cluster = %name, dc_rack = %key, "rack busy, statefulset left untouched");
                            return Ok(RackPass::Stopped { rack: key });
                        }
                        warn!(
                            cluster = %name,
                            dc_rack = %key,
                            action = %rack_status.last_action.name,
                            "pod operation blocked a quiescent rack, moving on"
                        );
                        continue;
                    }
                }
            }
        }

        ensure_service(ctx, &namespace, cluster_service(cc)).await;
        ensure_service(ctx, &namespace, dc_service(cc, &rack.dc)).await;
        ensure_service(ctx, &namespace, exporter_service(cc, &rack.dc)).await;

        if let Err(e) =
            reconcile_statefulset(cc, &rack, stored.as_ref(), rack_status, ctx, &namespace, now)
                .await
        {
            error!(cluster = %name, dc_rack = %key, error = %e, "cannot reconcile statefulset");
        }

        if cc.spec.unlock_next_operation {
            debug!(cluster = %name, "consuming unlockNextOperation");
            cc.spec.unlock_next_operation = false;
        }

        if rack_status.phase != ClusterPhase::Running
            || matches!(
                rack_status.last_action.status,
                ActionStatus::Ongoing | ActionStatus::Finalizing
            )
        {
            debug!(
                cluster = %name,
                dc_rack = %key,
                phase = %rack_status.phase,
                status = %rack_status.last_action.status,
                "waiting for rack before touching the next one"
            );
            return Ok(RackPass::Stopped { rack: key });
        }
    }

    if deleting {
        info!(cluster = %name, "every volume claim deleted, releasing cluster");
        cc.finalizers_mut().retain(|f| f != PVC_FINALIZER);
        let updated = ctx.kube.update_cluster(cc).await?;
        cc.metadata.resource_version = updated.metadata.resource_version;
    }
    Ok(RackPass::Completed)
}

/// Follow the StatefulSet's readiness.
///
/// A rack leaves Initial once ready (or when it targets no node at all),
/// closing its Initializing action.
fn update_phase(
    rack_status: &mut RackStatus,
    rack: &DcRack,
    sts: &StatefulSet,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let ready = statefulset_ready(sts);
    match rack_status.phase {
        ClusterPhase::Initial => {
            if ready || rack.nodes == 0 {
                info!(dc_rack = %rack.key(), "rack is running");
                rack_status.phase = ClusterPhase::Running;
                if rack_status.last_action.name == ActionName::Initializing {
                    rack_status.last_action.advance(ActionStatus::Done, now)?;
                }
            }
        }
        _ => {
            rack_status.phase = if ready {
                ClusterPhase::Running
            } else {
                ClusterPhase::Pending
            };
        }
    }
    Ok(())
}

async fn ensure_service(ctx: &Context, namespace: &str, service: Service) {
    if let Err(e) = ctx.kube.ensure_service(namespace, &service).await {
        error!(service = %service.name_any(), error = %e, "cannot ensure service");
    }
}

/// Replica count to request this pass: the rack's node count, except while
/// scaling down where the StatefulSet loses one replica at a time.
///
/// Pod operations already held the rack until its last node decommissioned,
/// and a decommissioned node drops out of readiness. The last ordinal is
/// therefore allowed to be unready; any other unready pod postpones the step.
fn target_replicas(rack: &DcRack, stored: Option<&StatefulSet>, rack_status: &RackStatus) -> i32 {
    let Some(stored) = stored else {
        return rack.nodes;
    };
    let current = desired_replicas(stored);
    let action = &rack_status.last_action;
    if action.name == ActionName::ScaleDown
        && action.status != ActionStatus::Done
        && current > rack.nodes
    {
        return if ready_replicas(stored) >= current - 1 {
            current - 1
        } else {
            current
        };
    }
    rack.nodes
}

async fn reconcile_statefulset(
    cc: &CassandraCluster,
    rack: &DcRack,
    stored: Option<&StatefulSet>,
    rack_status: &mut RackStatus,
    ctx: &Context,
    namespace: &str,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    if rack_status.last_action.status == ActionStatus::Configuring {
        debug!(dc_rack = %rack.key(), "rack waits for the other racks");
        return Ok(());
    }

    ctx.kube
        .ensure_service(namespace, &rack_service(cc, rack))
        .await?;

    let mut desired = build_statefulset(cc, rack, target_replicas(rack, stored, rack_status))?;
    match stored {
        None => {
            info!(dc_rack = %rack.key(), "creating statefulset");
            ctx.kube.create_statefulset(namespace, &desired).await?;
        }
        Some(stored) if needs_update(stored, &desired) => {
            info!(
                dc_rack = %rack.key(),
                action = %rack_status.last_action.name,
                "updating statefulset"
            );
            desired.metadata.resource_version = stored.metadata.resource_version.clone();
            ctx.kube.replace_statefulset(namespace, &desired).await?;
        }
        Some(_) => {}
    }

    if rack_status.last_action.status == ActionStatus::ToDo {
        rack_status.last_action.advance(ActionStatus::Ongoing, now)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use mockall::predicate::eq;

    use cassandra_common::crd::LastAction;

    use crate::controller::MockKubeClient;
    use crate::fixtures::{cluster, ready, running_status, statefulset};
    use crate::jolokia::MockLiveQueryClient;
    use crate::pod_operations::MockPodOperations;

    fn context(kube: MockKubeClient) -> Context {
        Context::for_testing(Arc::new(kube), Arc::new(MockLiveQueryClient::new()))
    }

    /// StatefulSet already matching the spec of `rack`
    fn converged(cc: &CassandraCluster, rack: usize) -> StatefulSet {
        let dc_rack = cc.spec.dc_racks().remove(rack);
        let nodes = dc_rack.nodes;
        ready(build_statefulset(cc, &dc_rack, nodes).unwrap())
    }

    #[derive(Clone, Default)]
    struct Replaced(Arc<Mutex<Vec<StatefulSet>>>);

    impl Replaced {
        fn names(&self) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.name_any())
                .collect()
        }

        fn replicas(&self) -> Vec<i32> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(desired_replicas)
                .collect()
        }
    }

    fn capture_replace(kube: &mut MockKubeClient) -> Replaced {
        let replaced = Replaced::default();
        let r = replaced.clone();
        kube.expect_replace_statefulset().returning(move |_, sts| {
            r.0.lock().unwrap().push(sts.clone());
            Ok(())
        });
        replaced
    }

    #[tokio::test]
    async fn new_rack_only_gets_a_status_entry() {
        let mut cc = cluster(&[("west", 3, &["r1", "r2"])]);
        let mut status = CassandraClusterStatus::default();
        let mut kube = MockKubeClient::new();
        kube.expect_get_statefulset().never();
        kube.expect_create_statefulset().never();

        let pass = reconcile_racks(&mut cc, &mut status, &context(kube))
            .await
            .unwrap();
        assert_eq!(
            pass,
            RackPass::Stopped {
                rack: "west-r1".to_string()
            }
        );
        assert_eq!(status.cassandra_rack_status.len(), 1);
        let rack = &status.cassandra_rack_status["west-r1"];
        assert_eq!(rack.phase, ClusterPhase::Initial);
        assert!(rack.is_at(ActionName::Initializing, ActionStatus::Ongoing));
    }

    #[tokio::test]
    async fn initial_rack_is_created_and_blocks_the_next_one() {
        let mut cc = cluster(&[("west", 3, &["r1", "r2"])]);
        let mut status = running_status(&cc);
        status
            .cassandra_rack_status
            .insert("west-r1".to_string(), RackStatus::initial(Utc::now()));

        let mut kube = MockKubeClient::new();
        kube.expect_get_statefulset()
            .with(eq("db"), eq("ring-west-r1"))
            .times(1)
            .returning(|_, _| Ok(None));
        kube.expect_ensure_service().returning(|_, _| Ok(()));
        kube.expect_create_statefulset()
            .withf(|_, sts| sts.name_any() == "ring-west-r1")
            .times(1)
            .returning(|_, _| Ok(()));
        kube.expect_replace_statefulset().never();

        let pass = reconcile_racks(&mut cc, &mut status, &context(kube))
            .await
            .unwrap();
        assert_eq!(
            pass,
            RackPass::Stopped {
                rack: "west-r1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn running_rack_behind_a_pending_one_is_not_mutated() {
        let mut cc = cluster(&[("west", 3, &["r1", "r2"])]);
        let mut status = running_status(&cc);
        status
            .cassandra_rack_status
            .insert("west-r1".to_string(), RackStatus::initial(Utc::now()));

        let mut kube = MockKubeClient::new();
        kube.expect_get_statefulset()
            .with(eq("db"), eq("ring-west-r1"))
            .times(1)
            .returning(|_, name| Ok(Some(statefulset(name, 3, 1))));
        kube.expect_get_statefulset()
            .with(eq("db"), eq("ring-west-r2"))
            .never();
        kube.expect_ensure_service().returning(|_, _| Ok(()));
        let replaced = capture_replace(&mut kube);

        reconcile_racks(&mut cc, &mut status, &context(kube))
            .await
            .unwrap();
        assert_eq!(replaced.names(), vec!["ring-west-r1".to_string()]);
        assert_eq!(status.cassandra_rack_status["west-r1"].phase, ClusterPhase::Initial);
    }

    #[tokio::test]
    async fn ready_rack_leaves_initial_and_closes_initializing() {
        let mut cc = cluster(&[("west", 3, &["r1"])]);
        let sts = converged(&cc, 0);
        let mut status = CassandraClusterStatus::default();
        status
            .cassandra_rack_status
            .insert("west-r1".to_string(), RackStatus::initial(Utc::now()));

        let mut kube = MockKubeClient::new();
        kube.expect_get_statefulset()
            .returning(move |_, _| Ok(Some(sts.clone())));
        kube.expect_ensure_service().returning(|_, _| Ok(()));
        kube.expect_replace_statefulset().never();

        let pass = reconcile_racks(&mut cc, &mut status, &context(kube))
            .await
            .unwrap();
        assert_eq!(pass, RackPass::Completed);
        let rack = &status.cassandra_rack_status["west-r1"];
        assert!(rack.is_quiescent());
        assert!(rack.last_action.end_time.is_some());
    }

    mod break_resync {
        use super::*;

        fn with_pod_operations(kube: MockKubeClient, ops: MockPodOperations) -> Context {
            let mut ctx = context(kube);
            ctx.pod_operations = Arc::new(ops);
            ctx
        }

        #[tokio::test]
        async fn busy_rack_stops_the_pass_untouched() {
            let mut cc = cluster(&[("west", 2, &["r1", "r2"])]);
            let mut status = running_status(&cc);
            status.cassandra_rack_status.get_mut("west-r1").unwrap().last_action =
                LastAction::start(ActionName::ScaleDown, ActionStatus::Ongoing, Utc::now());
            let sts = ready(build_statefulset(&cc, &cc.spec.dc_racks()[0], 3).unwrap());

            let mut kube = MockKubeClient::new();
            kube.expect_get_statefulset()
                .times(1)
                .returning(move |_, _| Ok(Some(sts.clone())));
            kube.expect_ensure_service().never();
            kube.expect_replace_statefulset().never();
            let mut ops = MockPodOperations::new();
            ops.expect_execute().times(1).returning(|_, _, _, _| Ok(true));

            let pass = reconcile_racks(&mut cc, &mut status, &with_pod_operations(kube, ops))
                .await
                .unwrap();
            assert_eq!(
                pass,
                RackPass::Stopped {
                    rack: "west-r1".to_string()
                }
            );
        }

        #[tokio::test]
        async fn quiescent_rack_skips_to_the_next_one() {
            let mut cc = cluster(&[("west", 3, &["r1", "r2"])]);
            let mut status = running_status(&cc);
            let first = converged(&cc, 0);
            let second = converged(&cc, 1);

            let mut kube = MockKubeClient::new();
            kube.expect_get_statefulset()
                .with(eq("db"), eq("ring-west-r1"))
                .returning(move |_, _| Ok(Some(first.clone())));
            kube.expect_get_statefulset()
                .with(eq("db"), eq("ring-west-r2"))
                .returning(move |_, _| Ok(Some(second.clone())));
            kube.expect_ensure_service().returning(|_, _| Ok(()));
            let mut ops = MockPodOperations::new();
            let mut calls = 0;
            ops.expect_execute().times(2).returning(move |_, _, _, _| {
                calls += 1;
                Ok(calls == 1)
            });

            let pass = reconcile_racks(&mut cc, &mut status, &with_pod_operations(kube, ops))
                .await
                .unwrap();
            assert_eq!(pass, RackPass::Completed);
        }

        #[tokio::test]
        async fn failing_pod_operation_does_not_block() {
            let mut cc = cluster(&[("west", 3, &["r1"])]);
            let mut status = running_status(&cc);
            let sts = converged(&cc, 0);
            let mut kube = MockKubeClient::new();
            kube.expect_get_statefulset()
                .returning(move |_, _| Ok(Some(sts.clone())));
            kube.expect_ensure_service().returning(|_, _| Ok(()));
            let mut ops = MockPodOperations::new();
            ops.expect_execute()
                .returning(|_, _, _, _| Err(Error::internal("jolokia down")));

            let pass = reconcile_racks(&mut cc, &mut status, &with_pod_operations(kube, ops))
                .await
                .unwrap();
            assert_eq!(pass, RackPass::Completed);
        }
    }

    mod resource_change {
        use super::*;

        #[tokio::test]
        async fn only_one_rack_is_updated_per_pass() {
            let mut cc = cluster(&[("west", 3, &["r1", "r2"]), ("east", 3, &["r1"])]);
            let stored: BTreeMap<String, StatefulSet> = (0..3)
                .map(|i| {
                    let sts = converged(&cc, i);
                    (sts.name_any(), sts)
                })
                .collect();
            let mut status = running_status(&cc);
            for rack in status.cassandra_rack_status.values_mut() {
                rack.last_action =
                    LastAction::start(ActionName::UpdateResources, ActionStatus::ToDo, Utc::now());
            }
            cc.spec
                .resources
                .requests
                .insert("cpu".to_string(), "2".to_string());

            let mut kube = MockKubeClient::new();
            kube.expect_get_statefulset()
                .returning(move |_, name| Ok(stored.get(name).cloned()));
            kube.expect_ensure_service().returning(|_, _| Ok(()));
            let replaced = capture_replace(&mut kube);

            let pass = reconcile_racks(&mut cc, &mut status, &context(kube))
                .await
                .unwrap();
            assert_eq!(
                pass,
                RackPass::Stopped {
                    rack: "west-r1".to_string()
                }
            );
            assert_eq!(replaced.names(), vec!["ring-west-r1".to_string()]);
            assert!(status.cassandra_rack_status["west-r1"]
                .is_at(ActionName::UpdateResources, ActionStatus::Ongoing));
            assert!(status.cassandra_rack_status["west-r2"]
                .is_at(ActionName::UpdateResources, ActionStatus::ToDo));
            assert!(status.cassandra_rack_status["east-r1"]
                .is_at(ActionName::UpdateResources, ActionStatus::ToDo));
        }
    }

    #[tokio::test]
    async fn scale_down_removes_one_replica_per_step() {
        let mut cc = cluster(&[("west", 1, &["r1"])]);
        let mut status = running_status(&cc);
        let sts = ready(build_statefulset(&cc, &cc.spec.dc_racks()[0], 3).unwrap());

        let mut kube = MockKubeClient::new();
        kube.expect_get_statefulset()
            .returning(move |_, _| Ok(Some(sts.clone())));
        kube.expect_ensure_service().returning(|_, _| Ok(()));
        let replaced = capture_replace(&mut kube);

        reconcile_racks(&mut cc, &mut status, &context(kube))
            .await
            .unwrap();
        assert_eq!(replaced.replicas(), vec![2]);
        assert!(status.cassandra_rack_status["west-r1"]
            .is_at(ActionName::ScaleDown, ActionStatus::Ongoing));
    }

    #[tokio::test]
    async fn decommissioned_last_pod_is_dropped_although_unready() {
        let mut cc = cluster(&[("west", 2, &["r1"])]);
        let mut status = running_status(&cc);
        status.cassandra_rack_status.get_mut("west-r1").unwrap().last_action =
            LastAction::start(ActionName::ScaleDown, ActionStatus::Ongoing, Utc::now());
        let mut sts = ready(build_statefulset(&cc, &cc.spec.dc_racks()[0], 3).unwrap());
        if let Some(st) = sts.status.as_mut() {
            st.ready_replicas = Some(2);
        }

        let mut kube = MockKubeClient::new();
        kube.expect_get_statefulset()
            .returning(move |_, _| Ok(Some(sts.clone())));
        kube.expect_ensure_service().returning(|_, _| Ok(()));
        let replaced = capture_replace(&mut kube);
        let mut ops = MockPodOperations::new();
        ops.expect_execute().times(1).returning(|_, _, _, _| Ok(false));
        let mut ctx = context(kube);
        ctx.pod_operations = Arc::new(ops);

        let pass = reconcile_racks(&mut cc, &mut status, &ctx).await.unwrap();
        assert_eq!(replaced.replicas(), vec![2]);
        assert_eq!(status.cassandra_rack_status["west-r1"].phase, ClusterPhase::Pending);
        assert_eq!(
            pass,
            RackPass::Stopped {
                rack: "west-r1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn rack_waiting_at_the_barrier_is_not_touched() {
        let mut cc = cluster(&[("west", 3, &["r1", "r2"])]);
        cc.spec.seed_list = vec!["new-seed".to_string()];
        let mut status = running_status(&cc);
        for rack in status.cassandra_rack_status.values_mut() {
            rack.last_action =
                LastAction::start(ActionName::UpdateSeedList, ActionStatus::Configuring, Utc::now());
        }
        let mut kube = MockKubeClient::new();
        kube.expect_get_statefulset()
            .times(2)
            .returning(|_, name| Ok(Some(statefulset(name, 3, 3))));
        kube.expect_ensure_service().times(6).returning(|_, _| Ok(()));
        kube.expect_replace_statefulset().never();

        let pass = reconcile_racks(&mut cc, &mut status, &context(kube))
            .await
            .unwrap();
        assert_eq!(pass, RackPass::Completed);
    }

    #[tokio::test]
    async fn unlock_flag_is_consumed() {
        let mut cc = cluster(&[("west", 3, &["r1"])]);
        cc.spec.unlock_next_operation = true;
        let mut status = running_status(&cc);
        let sts = converged(&cc, 0);
        let mut kube = MockKubeClient::new();
        kube.expect_get_statefulset()
            .returning(move |_, _| Ok(Some(sts.clone())));
        kube.expect_ensure_service().returning(|_, _| Ok(()));

        reconcile_racks(&mut cc, &mut status, &context(kube))
            .await
            .unwrap();
        assert!(!cc.spec.unlock_next_operation);
    }

    #[tokio::test]
    async fn deletion_removes_claims_then_releases_the_finalizer() {
        let mut cc = cluster(&[("west", 3, &["r1", "r2"])]);
        cc.spec.delete_pvc = true;
        cc.metadata.finalizers = Some(vec![PVC_FINALIZER.to_string()]);
        cc.metadata.deletion_timestamp = Some(Time(Utc::now()));
        let mut status = running_status(&cc);

        let mut kube = MockKubeClient::new();
        kube.expect_delete_pvcs()
            .withf(|ns, selector| ns == "db" && selector.contains("db.cassandra.dev/rack=r1"))
            .times(1)
            .returning(|_, _| Ok(1));
        kube.expect_delete_pvcs()
            .withf(|ns, selector| ns == "db" && selector.contains("db.cassandra.dev/rack=r2"))
            .times(1)
            .returning(|_, _| Ok(1));
        kube.expect_get_statefulset().never();
        kube.expect_update_cluster()
            .withf(|cc| !cc.has_finalizer(PVC_FINALIZER))
            .times(1)
            .returning(|cc| {
                let mut updated = cc.clone();
                updated.metadata.resource_version = Some("2".to_string());
                Ok(updated)
            });

        let pass = reconcile_racks(&mut cc, &mut status, &context(kube))
            .await
            .unwrap();
        assert_eq!(pass, RackPass::Completed);
        assert_eq!(cc.metadata.resource_version.as_deref(), Some("2"));
    }

    #[test]
    fn target_follows_scale_down_steps() {
        let cc = cluster(&[("west", 1, &["r1"])]);
        let rack = cc.spec.dc_racks().remove(0);
        let scaling = RackStatus {
            phase: ClusterPhase::Running,
            last_action: LastAction::start(ActionName::ScaleDown, ActionStatus::Ongoing, Utc::now()),
        };
        assert_eq!(target_replicas(&rack, None, &scaling), 1);
        assert_eq!(target_replicas(&rack, Some(&statefulset("s", 3, 3)), &scaling), 2);
        assert_eq!(target_replicas(&rack, Some(&statefulset("s", 3, 2)), &scaling), 2);
        assert_eq!(target_replicas(&rack, Some(&statefulset("s", 3, 1)), &scaling), 3);

        let mut idle = scaling.clone();
        idle.last_action.advance(ActionStatus::Done, Utc::now()).unwrap();
        assert_eq!(target_replicas(&rack, Some(&statefulset("s", 3, 3)), &idle), 1);
    }
}
