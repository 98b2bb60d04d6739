//! Desired workload objects of a cluster
//!
//! One StatefulSet and one headless Service per rack, one client Service
//! and one JMX exporter Service per datacenter, one client Service for the
//! whole cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements, Service, ServicePort, ServiceSpec,
    TCPSocketAction, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use cassandra_common::crd::{CassandraCluster, DcRack};
use cassandra_common::kube_utils::{
    dc_service_name, deterministic_hash, exporter_service_name, labels_for_cluster,
    labels_for_dc, labels_for_dc_rack, rack_service_name, statefulset_name,
};
use cassandra_common::{Error, DEFAULT_JOLOKIA_PORT, SPEC_HASH_ANNOTATION};

/// CQL native transport port
pub const CQL_PORT: i32 = 9042;
/// Inter-node gossip port
pub const GOSSIP_PORT: i32 = 7000;
/// Port of the JMX exporter sidecar
pub const EXPORTER_PORT: i32 = 9500;

const DATA_VOLUME: &str = "data";
const DATA_PATH: &str = "/var/lib/cassandra";
const SNITCH: &str = "GossipingPropertyFileSnitch";

fn metadata(cc: &CassandraCluster, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: cc.namespace(),
        labels: Some(labels),
        owner_references: cc.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

fn quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect(),
    )
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        ..Default::default()
    }
}

fn pod_template(cc: &CassandraCluster, rack: &DcRack) -> PodTemplateSpec {
    let spec = &cc.spec;
    let mut env_vars = vec![
        env("CASSANDRA_CLUSTER_NAME", cc.name_any()),
        env("CASSANDRA_DC", rack.dc.clone()),
        env("CASSANDRA_RACK", rack.rack.clone()),
        env("CASSANDRA_SEEDS", spec.seed_list.join(",")),
        env("CASSANDRA_ENDPOINT_SNITCH", SNITCH),
    ];
    if let Some(tokens) = rack.num_tokens {
        env_vars.push(env("CASSANDRA_NUM_TOKENS", tokens.to_string()));
    }

    let container = Container {
        name: "cassandra".to_string(),
        image: Some(spec.image.clone()),
        env: Some(env_vars),
        ports: Some(vec![
            port("intra-node", GOSSIP_PORT),
            port("cql", CQL_PORT),
            port("jolokia", i32::from(DEFAULT_JOLOKIA_PORT)),
        ]),
        resources: Some(ResourceRequirements {
            requests: quantities(&spec.resources.requests),
            limits: quantities(&spec.resources.limits),
            ..Default::default()
        }),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(CQL_PORT),
                host: None,
            }),
            initial_delay_seconds: Some(30),
            period_seconds: Some(10),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: DATA_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels_for_dc_rack(&cc.name_any(), &rack.dc, &rack.rack)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            node_selector: (!rack.labels.is_empty()).then(|| rack.labels.clone()),
            ..Default::default()
        }),
    }
}

fn volume_claim(cc: &CassandraCluster, rack: &DcRack) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME.to_string()),
            labels: Some(labels_for_dc_rack(&cc.name_any(), &rack.dc, &rack.rack)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: cc.spec.data_storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(cc.spec.data_capacity.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Hash of everything a rack's pods are built from, replica count excluded
pub fn pod_template_hash(cc: &CassandraCluster, rack: &DcRack) -> Result<String, Error> {
    let template = serde_json::to_string(&pod_template(cc, rack))?;
    let claim = serde_json::to_string(&volume_claim(cc, rack))?;
    Ok(deterministic_hash(&format!("{template}{claim}")))
}

/// Desired StatefulSet of one rack running `replicas` nodes
pub fn build_statefulset(
    cc: &CassandraCluster,
    rack: &DcRack,
    replicas: i32,
) -> Result<StatefulSet, Error> {
    let name = cc.name_any();
    let key = rack.key();
    let labels = labels_for_dc_rack(&name, &rack.dc, &rack.rack);
    let mut meta = metadata(cc, statefulset_name(&name, &key), labels.clone());
    meta.annotations = Some(BTreeMap::from([(
        SPEC_HASH_ANNOTATION.to_string(),
        pod_template_hash(cc, rack)?,
    )]));

    Ok(StatefulSet {
        metadata: meta,
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: Some(rack_service_name(&name, &key)),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            pod_management_policy: Some("OrderedReady".to_string()),
            template: pod_template(cc, rack),
            volume_claim_templates: Some(vec![volume_claim(cc, rack)]),
            ..Default::default()
        }),
        status: None,
    })
}

/// Spec hash recorded on a StatefulSet, if any
pub fn stored_hash(sts: &StatefulSet) -> Option<&str> {
    sts.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(SPEC_HASH_ANNOTATION))
        .map(String::as_str)
}

/// Whether `stored` must be replaced to match `desired`
pub fn needs_update(stored: &StatefulSet, desired: &StatefulSet) -> bool {
    stored_hash(stored) != stored_hash(desired)
        || stored.spec.as_ref().and_then(|s| s.replicas)
            != desired.spec.as_ref().and_then(|s| s.replicas)
}

fn service(
    cc: &CassandraCluster,
    name: String,
    labels: BTreeMap<String, String>,
    ports: Vec<(&str, i32)>,
    headless: bool,
) -> Service {
    Service {
        metadata: metadata(cc, name, labels.clone()),
        spec: Some(ServiceSpec {
            selector: Some(labels),
            cluster_ip: headless.then(|| "None".to_string()),
            publish_not_ready_addresses: headless.then_some(true),
            ports: Some(
                ports
                    .into_iter()
                    .map(|(name, port)| ServicePort {
                        name: Some(name.to_string()),
                        port,
                        target_port: Some(IntOrString::Int(port)),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

/// Client Service spanning every node of the cluster
pub fn cluster_service(cc: &CassandraCluster) -> Service {
    let name = cc.name_any();
    service(cc, name.clone(), labels_for_cluster(&name), vec![("cql", CQL_PORT)], false)
}

/// Client Service of one datacenter
pub fn dc_service(cc: &CassandraCluster, dc: &str) -> Service {
    let name = cc.name_any();
    service(
        cc,
        dc_service_name(&name, dc),
        labels_for_dc(&name, dc),
        vec![("cql", CQL_PORT)],
        false,
    )
}

/// Headless Service giving the pods of one rack stable DNS names
pub fn rack_service(cc: &CassandraCluster, rack: &DcRack) -> Service {
    let name = cc.name_any();
    service(
        cc,
        rack_service_name(&name, &rack.key()),
        labels_for_dc_rack(&name, &rack.dc, &rack.rack),
        vec![("intra-node", GOSSIP_PORT), ("cql", CQL_PORT)],
        true,
    )
}

/// Headless Service scraped for the JMX metrics of one datacenter
pub fn exporter_service(cc: &CassandraCluster, dc: &str) -> Service {
    let name = cc.name_any();
    service(
        cc,
        exporter_service_name(&name, dc),
        labels_for_dc(&name, dc),
        vec![("metrics", EXPORTER_PORT)],
        true,
    )
}
