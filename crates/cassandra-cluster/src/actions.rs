//! Creation and completion of per-rack actions

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::StatefulSet;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use cassandra_common::crd::{
    ActionName, ActionStatus, CassandraCluster, DcRack, LastAction, RackStatus,
};
use cassandra_common::kube_utils::{desired_replicas, statefulset_rolled_out};
use cassandra_common::Error;

use crate::resources::{pod_template_hash, stored_hash};

/// Decides which action a rack should be carrying out.
///
/// Called once per rack and pass with the rack's stored StatefulSet; may
/// start a new action on a quiescent rack or close a converged one.
#[cfg_attr(test, automock)]
pub trait RackActions: Send + Sync {
    /// Update `rack_status` with the action the rack needs next
    fn next_action(
        &self,
        cc: &CassandraCluster,
        rack: &DcRack,
        stored: &StatefulSet,
        rack_status: &mut RackStatus,
        now: DateTime<Utc>,
    ) -> Result<(), Error>;
}

/// Actions derived from the difference between spec and StatefulSet
pub struct StatefulSetActions;

impl RackActions for StatefulSetActions {
    fn next_action(
        &self,
        cc: &CassandraCluster,
        rack: &DcRack,
        stored: &StatefulSet,
        rack_status: &mut RackStatus,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let replicas = desired_replicas(stored);
        let action = &mut rack_status.last_action;

        if action.status.is_in_flight() {
            if statefulset_rolled_out(stored) && replicas == rack.nodes {
                info!(dc_rack = %rack.key(), action = %action.name, "action done");
                action.advance(ActionStatus::Done, now)?;
            }
            return Ok(());
        }
        if !rack_status.is_quiescent() {
            return Ok(());
        }

        let next = if rack.nodes > replicas {
            Some(ActionName::ScaleUp)
        } else if rack.nodes < replicas {
            Some(ActionName::ScaleDown)
        } else if stored_hash(stored) != Some(pod_template_hash(cc, rack)?.as_str()) {
            Some(ActionName::UpdateStatefulSet)
        } else {
            None
        };
        if let Some(name) = next {
            info!(dc_rack = %rack.key(), action = %name, from = replicas, to = rack.nodes, "starting action");
            rack_status.last_action = LastAction::start(name, ActionStatus::ToDo, now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cassandra_common::crd::ClusterPhase;

    use crate::fixtures::{cluster, ready};
    use crate::resources::build_statefulset;

    fn quiescent() -> RackStatus {
        RackStatus {
            phase: ClusterPhase::Running,
            last_action: LastAction::start(ActionName::Initializing, ActionStatus::Done, Utc::now()),
        }
    }

    fn rack(cc: &CassandraCluster) -> DcRack {
        cc.spec.dc_racks().remove(0)
    }

    #[test]
    fn matching_statefulset_needs_nothing() {
        let cc = cluster(&[("west", 3, &["r1"])]);
        let stored = ready(build_statefulset(&cc, &rack(&cc), 3).unwrap());
        let mut status = quiescent();
        StatefulSetActions
            .next_action(&cc, &rack(&cc), &stored, &mut status, Utc::now())
            .unwrap();
        assert!(status.is_quiescent());
    }

    #[test]
    fn replica_difference_starts_a_scale_action() {
        let cc = cluster(&[("west", 3, &["r1"])]);
        let up = ready(build_statefulset(&cc, &rack(&cc), 2).unwrap());
        let mut status = quiescent();
        StatefulSetActions
            .next_action(&cc, &rack(&cc), &up, &mut status, Utc::now())
            .unwrap();
        assert!(status.is_at(ActionName::ScaleUp, ActionStatus::ToDo));

        let down = ready(build_statefulset(&cc, &rack(&cc), 5).unwrap());
        let mut status = quiescent();
        StatefulSetActions
            .next_action(&cc, &rack(&cc), &down, &mut status, Utc::now())
            .unwrap();
        assert!(status.is_at(ActionName::ScaleDown, ActionStatus::ToDo));
    }

    #[test]
    fn template_drift_starts_an_update() {
        let mut cc = cluster(&[("west", 3, &["r1"])]);
        let stored = ready(build_statefulset(&cc, &rack(&cc), 3).unwrap());
        cc.spec.image = "cassandra:5.0".to_string();
        let mut status = quiescent();
        StatefulSetActions
            .next_action(&cc, &rack(&cc), &stored, &mut status, Utc::now())
            .unwrap();
        assert!(status.is_at(ActionName::UpdateStatefulSet, ActionStatus::ToDo));
        assert!(status.last_action.end_time.is_none());
    }

    #[test]
    fn pending_action_is_left_alone() {
        let cc = cluster(&[("west", 3, &["r1"])]);
        let stored = ready(build_statefulset(&cc, &rack(&cc), 2).unwrap());
        let mut status = quiescent();
        status.last_action = LastAction::start(ActionName::UpdateResources, ActionStatus::ToDo, Utc::now());
        StatefulSetActions
            .next_action(&cc, &rack(&cc), &stored, &mut status, Utc::now())
            .unwrap();
        assert!(status.is_at(ActionName::UpdateResources, ActionStatus::ToDo));
    }

    mod completion {
        use super::*;

        #[test]
        fn converged_rollout_completes_the_action() {
            let cc = cluster(&[("west", 3, &["r1"])]);
            let stored = ready(build_statefulset(&cc, &rack(&cc), 3).unwrap());
            let mut status = quiescent();
            status.last_action = LastAction::start(ActionName::ScaleUp, ActionStatus::Ongoing, Utc::now());
            StatefulSetActions
                .next_action(&cc, &rack(&cc), &stored, &mut status, Utc::now())
                .unwrap();
            assert!(status.is_at(ActionName::ScaleUp, ActionStatus::Done));
            assert!(status.last_action.end_time.is_some());
        }

        #[test]
        fn scale_down_waits_for_the_target_count() {
            let cc = cluster(&[("west", 1, &["r1"])]);
            let stored = ready(build_statefulset(&cc, &rack(&cc), 2).unwrap());
            let mut status = quiescent();
            status.last_action = LastAction::start(ActionName::ScaleDown, ActionStatus::Ongoing, Utc::now());
            StatefulSetActions
                .next_action(&cc, &rack(&cc), &stored, &mut status, Utc::now())
                .unwrap();
            assert!(status.is_at(ActionName::ScaleDown, ActionStatus::Ongoing));
        }

        #[test]
        fn unconverged_rollout_keeps_the_action_open() {
            let cc = cluster(&[("west", 3, &["r1"])]);
            let mut stored = ready(build_statefulset(&cc, &rack(&cc), 3).unwrap());
            stored.metadata.generation = Some(2);
            let mut status = quiescent();
            status.last_action =
                LastAction::start(ActionName::UpdateResources, ActionStatus::Ongoing, Utc::now());
            StatefulSetActions
                .next_action(&cc, &rack(&cc), &stored, &mut status, Utc::now())
                .unwrap();
            assert_eq!(status.last_action.status, ActionStatus::Ongoing);
        }
    }
}
