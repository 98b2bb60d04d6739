//! CassandraCluster controller implementation
//!
//! One reconcile pass runs, in order: PVC finalizer sync, the change guard,
//! the rack loop, status aggregation, the seed-list barrier and seed-list
//! planning. Status and spec are persisted at the end of the pass.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Secret, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use cassandra_common::crd::{
    ActionStatus, CassandraCluster, CassandraClusterStatus, ClusterPhase,
};
use cassandra_common::events::{ClusterEvent, EventPublisher, KubeEventPublisher};
use cassandra_common::kube_utils::patch_resource_status;
use cassandra_common::{Error, DEFAULT_JOLOKIA_PORT, FIELD_MANAGER, PVC_FINALIZER};

use crate::actions::{RackActions, StatefulSetActions};
use crate::guard::{self, Verdict};
use crate::jolokia::{JolokiaClient, LiveQueryClient};
use crate::pod_operations::{DecommissionOperations, PodOperations};
use crate::racks::{self, RackPass};
use crate::{seeds, status};

/// Requeue delay while a rack is busy
pub const BUSY_REQUEUE: Duration = Duration::from_secs(5);

/// Requeue delay once every rack is quiescent
pub const IDLE_REQUEUE: Duration = Duration::from_secs(60);

/// Requeue delay after a failed pass
pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Kubernetes operations the reconciler needs.
///
/// Mocked in tests; [`KubeClientImpl`] in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a StatefulSet, `None` when absent
    async fn get_statefulset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error>;

    /// Create a StatefulSet
    async fn create_statefulset(&self, namespace: &str, sts: &StatefulSet) -> Result<(), Error>;

    /// Replace a StatefulSet; `sts` must carry the stored resourceVersion
    async fn replace_statefulset(&self, namespace: &str, sts: &StatefulSet) -> Result<(), Error>;

    /// Delete a StatefulSet; `Error::NotFound` when absent
    async fn delete_statefulset(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Create or update a Service with server-side apply
    async fn ensure_service(&self, namespace: &str, service: &Service) -> Result<(), Error>;

    /// Delete a Service; `Error::NotFound` when absent
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// List pods matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error>;

    /// Delete every volume claim matching a label selector, returning how many
    async fn delete_pvcs(&self, namespace: &str, selector: &str) -> Result<usize, Error>;

    /// Get a Secret, `None` when absent
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Replace the cluster object (spec, metadata) honouring its resourceVersion
    async fn update_cluster(&self, cluster: &CassandraCluster) -> Result<CassandraCluster, Error>;

    /// Merge-patch the status sub-resource of a cluster
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CassandraClusterStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn map_not_found(err: kube::Error, kind: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(kind, name),
        other => other.into(),
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_statefulset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_statefulset(&self, namespace: &str, sts: &StatefulSet) -> Result<(), Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), sts).await?;
        Ok(())
    }

    async fn replace_statefulset(&self, namespace: &str, sts: &StatefulSet) -> Result<(), Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let name = sts.name_any();
        api.replace(&name, &PostParams::default(), sts).await?;
        Ok(())
    }

    async fn delete_statefulset(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_not_found(e, "StatefulSet", name))?;
        Ok(())
    }

    async fn ensure_service(&self, namespace: &str, service: &Service) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let name = service.name_any();
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(service),
        )
        .await?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_not_found(e, "Service", name))?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(selector)).await?;
        Ok(pods.items)
    }

    async fn delete_pvcs(&self, namespace: &str, selector: &str) -> Result<usize, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let claims = api.list(&ListParams::default().labels(selector)).await?;
        let mut deleted = 0;
        for claim in claims.items {
            let name = claim.name_any();
            match api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => deleted += 1,
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(deleted)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_cluster(&self, cluster: &CassandraCluster) -> Result<CassandraCluster, Error> {
        let namespace = cluster.namespace().unwrap_or_default();
        let api: Api<CassandraCluster> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api
            .replace(&cluster.name_any(), &PostParams::default(), cluster)
            .await?)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CassandraClusterStatus,
    ) -> Result<(), Error> {
        patch_resource_status::<CassandraCluster>(
            &self.client,
            name,
            namespace,
            status,
            FIELD_MANAGER,
        )
        .await?;
        Ok(())
    }
}

/// Controller context shared by every reconcile pass
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Client used to question live Cassandra members
    pub live_query: Arc<dyn LiveQueryClient>,
    /// Creates and completes per-rack actions
    pub rack_actions: Arc<dyn RackActions>,
    /// Runs bounded pod-level steps (decommission) before StatefulSet changes
    pub pod_operations: Arc<dyn PodOperations>,
    /// Event publisher for emitting Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Resync period once the cluster has converged
    pub idle_requeue: Duration,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with mock clients
    ///
    /// Pod operations are a no-op and events are dropped; override them on
    /// the returned value when a test needs them.
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, live_query: Arc<dyn LiveQueryClient>) -> Self {
        use crate::pod_operations::NoopPodOperations;
        use cassandra_common::events::NoopEventPublisher;

        Self {
            kube,
            live_query,
            rack_actions: Arc::new(StatefulSetActions),
            pod_operations: Arc::new(NoopPodOperations),
            events: Arc::new(NoopEventPublisher),
            idle_requeue: IDLE_REQUEUE,
        }
    }

    /// Publish an event about `cluster`
    pub(crate) async fn publish(&self, cluster: &CassandraCluster, event: ClusterEvent) {
        self.events.publish(cluster, event).await;
    }
}

/// Builder for constructing [`Context`] instances
///
/// ```text
/// let ctx = Context::builder(client)
///     .jolokia_port(8778)
///     .build()?;
/// ```
pub struct ContextBuilder {
    client: Client,
    jolokia_port: u16,
    jolokia_timeout: Duration,
    idle_requeue: Duration,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            jolokia_port: DEFAULT_JOLOKIA_PORT,
            jolokia_timeout: Duration::from_secs(10),
            idle_requeue: IDLE_REQUEUE,
        }
    }

    /// Port of the Jolokia agent in Cassandra pods
    pub fn jolokia_port(mut self, port: u16) -> Self {
        self.jolokia_port = port;
        self
    }

    /// Timeout of a single Jolokia request
    pub fn jolokia_timeout(mut self, timeout: Duration) -> Self {
        self.jolokia_timeout = timeout;
        self
    }

    /// Resync period of a converged cluster
    pub fn idle_requeue(mut self, period: Duration) -> Self {
        self.idle_requeue = period;
        self
    }

    /// Build the Context
    pub fn build(self) -> Result<Context, Error> {
        let kube: Arc<dyn KubeClient> = Arc::new(KubeClientImpl::new(self.client.clone()));
        let live_query: Arc<dyn LiveQueryClient> =
            Arc::new(JolokiaClient::new(self.jolokia_port, self.jolokia_timeout)?);
        let events: Arc<dyn EventPublisher> = Arc::new(KubeEventPublisher::new(
            self.client,
            "cassandra-cluster-controller",
        ));
        let pod_operations = Arc::new(
            DecommissionOperations::new(kube.clone(), live_query.clone())
                .with_events(events.clone()),
        );
        Ok(Context {
            kube,
            live_query,
            rack_actions: Arc::new(StatefulSetActions),
            pod_operations,
            events,
            idle_requeue: self.idle_requeue,
        })
    }
}

/// Reconcile a CassandraCluster resource
///
/// Works on an owned copy of the cluster and of its status; neither
/// survives the pass. Everything needed by the next pass is persisted.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<CassandraCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = cluster.name_any();
    let namespace = cluster
        .namespace()
        .ok_or_else(|| Error::validation_for(&name, "CassandraCluster must be namespaced"))?;
    info!("reconciling cluster");

    cluster.spec.validate(&name)?;

    let deleting = cluster.metadata.deletion_timestamp.is_some();
    if deleting && !cluster.has_finalizer(PVC_FINALIZER) {
        debug!("cluster is being deleted and nothing holds it");
        return Ok(Action::await_change());
    }

    let mut cc = (*cluster).clone();
    let mut status = cluster.status.clone().unwrap_or_default();

    if deleting && !cc.spec.delete_pvc {
        info!("volume claims are kept, releasing cluster");
        cc.finalizers_mut().retain(|f| f != PVC_FINALIZER);
        ctx.kube.update_cluster(&cc).await?;
        return Ok(Action::await_change());
    }
    guard::sync_delete_pvc(&mut cc);

    let verdict = guard::check_non_allowed_changes(&mut cc, &mut status, &ctx).await?;
    match verdict {
        Verdict::Allowed => {}
        Verdict::Rejected => {
            persist(&cluster, &mut cc, &status, &namespace, &ctx).await?;
            return Ok(Action::requeue(BUSY_REQUEUE));
        }
        Verdict::DatacenterRemoved => {
            cc.annotate_last_applied()?;
            persist(&cluster, &mut cc, &status, &namespace, &ctx).await?;
            return Ok(Action::requeue(BUSY_REQUEUE));
        }
    }

    let pass = racks::reconcile_racks(&mut cc, &mut status, &ctx).await?;

    if deleting {
        if !cc.has_finalizer(PVC_FINALIZER) {
            info!("volume claims deleted, releasing cluster");
            return Ok(Action::await_change());
        }
        persist_status(&cluster, &status, &namespace, &ctx).await?;
        return Ok(Action::requeue(BUSY_REQUEUE));
    }

    status::aggregate_cluster_status(&cc, &mut status);
    // racks put at the barrier this pass are released on a later one
    status::flip_seed_list_barrier(&cc, &mut status, Utc::now());
    if seeds::check_seed_list(&mut cc, &mut status, Utc::now()) {
        let seeds = cc.spec.seed_list.clone();
        ctx.publish(&cc, ClusterEvent::SeedListUpdated { seeds }).await;
    }

    cc.annotate_last_applied()?;
    persist(&cluster, &mut cc, &status, &namespace, &ctx).await?;

    let idle = matches!(pass, RackPass::Completed)
        && status.phase == ClusterPhase::Running
        && status.last_cluster_action_status == ActionStatus::Done;
    Ok(Action::requeue(if idle { ctx.idle_requeue } else { BUSY_REQUEUE }))
}

/// Write back the spec/metadata and the status when they changed.
///
/// The object is replaced first: the status patch bumps the
/// resourceVersion the replace depends on.
async fn persist(
    original: &CassandraCluster,
    cc: &mut CassandraCluster,
    status: &CassandraClusterStatus,
    namespace: &str,
    ctx: &Context,
) -> Result<(), Error> {
    let object_changed = cc.spec != original.spec
        || cc.metadata.annotations != original.metadata.annotations
        || cc.metadata.finalizers != original.metadata.finalizers;
    if object_changed {
        debug!("updating cluster object");
        let updated = ctx.kube.update_cluster(cc).await?;
        cc.metadata.resource_version = updated.metadata.resource_version;
    }
    persist_status(original, status, namespace, ctx).await
}

async fn persist_status(
    original: &CassandraCluster,
    status: &CassandraClusterStatus,
    namespace: &str,
    ctx: &Context,
) -> Result<(), Error> {
    if original.status.as_ref() == Some(status) {
        return Ok(());
    }
    ctx.kube
        .patch_status(namespace, &original.name_any(), status)
        .await
}

/// Error policy for the controller
pub fn error_policy(cluster: Arc<CassandraCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(?error, cluster = %cluster.name_any(), "reconciliation failed, retrying");
    } else {
        error!(?error, cluster = %cluster.name_any(), "reconciliation failed");
    }
    Action::requeue(ERROR_REQUEUE)
}
