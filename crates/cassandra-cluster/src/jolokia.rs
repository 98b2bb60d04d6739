//! Live queries against Cassandra members through their Jolokia agent
//!
//! The reconciler only sees [`LiveQueryClient`]; [`JolokiaClient`] talks to the
//! agent's HTTP/JSON endpoint on each pod.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use cassandra_common::crd::CassandraCluster;
use cassandra_common::Error;

use crate::controller::KubeClient;

const STORAGE_SERVICE_MBEAN: &str = "org.apache.cassandra.db:type=StorageService";

/// Basic-auth credentials for the Jolokia agent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

/// A cluster member to query
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    /// DNS name or IP of the pod
    pub host: String,
    /// Agent credentials, when the agent requires them
    pub credentials: Option<Credentials>,
}

/// StorageService operation mode of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationMode {
    /// Bootstrapping into the ring
    Joining,
    /// Serving requests
    Normal,
    /// Streaming its data away
    Leaving,
    /// Left the ring
    Decommissioned,
    /// Any other mode (STARTING, MOVING, DRAINING, ...)
    Other,
}

impl OperationMode {
    fn parse(value: &str) -> Self {
        match value {
            "JOINING" => Self::Joining,
            "NORMAL" => Self::Normal,
            "LEAVING" => Self::Leaving,
            "DECOMMISSIONED" => Self::Decommissioned,
            _ => Self::Other,
        }
    }
}

/// Questions the reconciler asks a running member
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LiveQueryClient: Send + Sync {
    /// Non-system keyspaces that still replicate data into datacenter `dc`
    async fn keyspaces_with_data_in_dc(&self, member: &Member, dc: &str)
        -> Result<Vec<String>, Error>;

    /// Current operation mode of the member
    async fn operation_mode(&self, member: &Member) -> Result<OperationMode, Error>;

    /// Start decommissioning the member
    async fn decommission(&self, member: &Member) -> Result<(), Error>;
}

#[derive(Debug, Deserialize)]
struct JolokiaResponse {
    status: u16,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

/// [`LiveQueryClient`] speaking the Jolokia JSON protocol over HTTP
pub struct JolokiaClient {
    http: reqwest::Client,
    port: u16,
    decommission_timeout: Duration,
}

impl JolokiaClient {
    /// Create a client for agents listening on `port`
    pub fn new(port: u16, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal_with_context("jolokia", e.to_string()))?;
        Ok(Self {
            http,
            port,
            decommission_timeout: Duration::from_secs(5),
        })
    }

    fn url(&self, host: &str) -> String {
        format!("http://{}:{}/jolokia/", host, self.port)
    }

    async fn request(
        &self,
        member: &Member,
        body: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, reqwest::Error> {
        let mut req = self.http.post(self.url(&member.host)).json(&body);
        if let Some(creds) = &member.credentials {
            req = req.basic_auth(&creds.username, Some(&creds.password));
        }
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        req.send().await?.error_for_status()?.json::<Value>().await
    }

    async fn call(&self, member: &Member, body: Value) -> Result<Value, Error> {
        let raw = self
            .request(member, body, None)
            .await
            .map_err(|e| Error::live_query(&member.host, e.to_string()))?;
        unwrap_response(&member.host, raw)
    }

    async fn keyspaces(&self, member: &Member) -> Result<Vec<String>, Error> {
        let value = self
            .call(
                member,
                json!({"type": "read", "mbean": STORAGE_SERVICE_MBEAN, "attribute": "Keyspaces"}),
            )
            .await?;
        string_list(&member.host, value)
    }

    async fn describe_ring(&self, member: &Member, keyspace: &str) -> Result<Vec<String>, Error> {
        let value = self
            .call(
                member,
                json!({
                    "type": "exec",
                    "mbean": STORAGE_SERVICE_MBEAN,
                    "operation": "describeRingJMX",
                    "arguments": [keyspace],
                }),
            )
            .await?;
        string_list(&member.host, value)
    }
}

#[async_trait]
impl LiveQueryClient for JolokiaClient {
    async fn keyspaces_with_data_in_dc(
        &self,
        member: &Member,
        dc: &str,
    ) -> Result<Vec<String>, Error> {
        let mut with_data = Vec::new();
        for keyspace in self.keyspaces(member).await? {
            if is_system_keyspace(&keyspace) {
                continue;
            }
            let ring = self.describe_ring(member, &keyspace).await?;
            if ring_replicates_into(&ring, dc) {
                with_data.push(keyspace);
            }
        }
        debug!(host = %member.host, dc, keyspaces = ?with_data, "keyspaces replicated into dc");
        Ok(with_data)
    }

    async fn operation_mode(&self, member: &Member) -> Result<OperationMode, Error> {
        let value = self
            .call(
                member,
                json!({"type": "read", "mbean": STORAGE_SERVICE_MBEAN, "attribute": "OperationMode"}),
            )
            .await?;
        value
            .as_str()
            .map(OperationMode::parse)
            .ok_or_else(|| Error::live_query(&member.host, "OperationMode is not a string"))
    }

    async fn decommission(&self, member: &Member) -> Result<(), Error> {
        let body = json!({
            "type": "exec",
            "mbean": STORAGE_SERVICE_MBEAN,
            "operation": "decommission(boolean)",
            "arguments": [false],
        });
        // the operation only returns once streaming is over
        match self
            .request(member, body, Some(self.decommission_timeout))
            .await
        {
            Ok(raw) => unwrap_response(&member.host, raw).map(|_| ()),
            Err(e) if e.is_timeout() => {
                debug!(host = %member.host, "decommission still running");
                Ok(())
            }
            Err(e) => Err(Error::live_query(&member.host, e.to_string())),
        }
    }
}

fn unwrap_response(host: &str, raw: Value) -> Result<Value, Error> {
    let response: JolokiaResponse = serde_json::from_value(raw)
        .map_err(|e| Error::live_query(host, format!("malformed response: {e}")))?;
    if response.status != 200 {
        return Err(Error::live_query(
            host,
            response
                .error
                .unwrap_or_else(|| format!("status {}", response.status)),
        ));
    }
    Ok(response.value)
}

fn string_list(host: &str, value: Value) -> Result<Vec<String>, Error> {
    serde_json::from_value(value)
        .map_err(|e| Error::live_query(host, format!("expected a list of strings: {e}")))
}

fn is_system_keyspace(name: &str) -> bool {
    name.starts_with("system")
}

/// Whether any token range of a `describeRingJMX` answer has an endpoint in `dc`.
///
/// Each entry renders like
/// `TokenRange(..., endpoint_details:[EndpointDetails(host:10.0.0.1, datacenter:dc1, rack:r1)])`.
pub fn ring_replicates_into(ranges: &[String], dc: &str) -> bool {
    ranges.iter().any(|range| {
        range.split("datacenter:").skip(1).any(|rest| {
            let name = rest
                .split(|c: char| c == ',' || c == ')' || c.is_whitespace())
                .next()
                .unwrap_or_default();
            name == dc
        })
    })
}

/// Address a pod the way it resolves through its governing Service.
pub fn pod_host(pod: &Pod, namespace: &str) -> Option<String> {
    let spec = pod.spec.as_ref();
    match (
        spec.and_then(|s| s.hostname.as_deref()),
        spec.and_then(|s| s.subdomain.as_deref()),
    ) {
        (Some(hostname), Some(subdomain)) => Some(format!("{hostname}.{subdomain}.{namespace}")),
        _ => pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
    }
}

/// Credentials from the cluster's Jolokia secret, if one is configured
pub async fn credentials_for(
    kube: &dyn KubeClient,
    cluster: &CassandraCluster,
    namespace: &str,
) -> Result<Option<Credentials>, Error> {
    let Some(secret_ref) = cluster.spec.jolokia_secret.as_ref() else {
        return Ok(None);
    };
    let secret = kube
        .get_secret(namespace, &secret_ref.name)
        .await?
        .ok_or_else(|| Error::not_found("Secret", &secret_ref.name))?;
    Ok(Some(Credentials {
        username: secret_value(&secret, "username")?,
        password: secret_value(&secret, "password")?,
    }))
}

fn secret_value(secret: &Secret, key: &str) -> Result<String, Error> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(|| {
            Error::validation(format!(
                "secret {} has no key {key}",
                secret.metadata.name.as_deref().unwrap_or_default()
            ))
        })?;
    String::from_utf8(bytes.0.clone())
        .map_err(|e| Error::serialization_for_kind("Secret", e.to_string()))
}
