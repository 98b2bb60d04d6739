//! Cassandra Operator - multi-datacenter Cassandra clusters on Kubernetes

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use cassandra_cluster::{error_policy, reconcile, Context};
use cassandra_common::crd::CassandraCluster;
use cassandra_common::telemetry::{init_telemetry, TelemetryConfig};
use cassandra_common::DEFAULT_JOLOKIA_PORT;

/// Keeps CassandraCluster resources converged, one rack at a time
#[derive(Parser, Debug)]
#[command(name = "cassandra-operator", version, about, long_about = None)]
struct Cli {
    /// Print the CassandraCluster CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Only watch clusters in this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Port of the Jolokia agent inside Cassandra pods
    #[arg(long, default_value_t = DEFAULT_JOLOKIA_PORT)]
    jolokia_port: u16,

    /// Timeout of a single Jolokia request, in seconds
    #[arg(long, default_value_t = 10)]
    jolokia_timeout_secs: u64,

    /// Resync period of a converged cluster, in seconds
    #[arg(long, default_value_t = 60)]
    requeue_secs: u64,

    /// Human-readable logs instead of JSON
    #[arg(long)]
    text_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&CassandraCluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json: !cli.text_logs,
        ..Default::default()
    })?;

    run_controller(cli).await
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let (clusters, statefulsets): (Api<CassandraCluster>, Api<StatefulSet>) = match &cli.namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    let ctx = Arc::new(
        Context::builder(client)
            .jolokia_port(cli.jolokia_port)
            .jolokia_timeout(Duration::from_secs(cli.jolokia_timeout_secs))
            .idle_requeue(Duration::from_secs(cli.requeue_secs))
            .build()?,
    );

    tracing::info!(
        namespace = cli.namespace.as_deref().unwrap_or("*"),
        jolokia_port = cli.jolokia_port,
        "starting CassandraCluster controller"
    );

    Controller::new(clusters, WatcherConfig::default())
        .owns(statefulsets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Cluster reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Cluster reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("controller stopped");
    Ok(())
}
