//! Datacenter and rack layout of a cluster

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::kube_utils::dc_rack_key;

/// Datacenter used when the topology declares none
pub const DEFAULT_DC_NAME: &str = "dc1";

/// Rack used when a datacenter declares none
pub const DEFAULT_RACK_NAME: &str = "rack1";

/// Ordered list of datacenters
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    /// Datacenters in processing order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dc: Vec<Datacenter>,
}

/// A named group of racks
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Datacenter {
    /// Datacenter name as announced by the snitch
    pub name: String,

    /// Per-rack node count for this datacenter, overriding the cluster default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes_per_racks: Option<i32>,

    /// Token count for nodes of this datacenter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_tokens: Option<i32>,

    /// Labels used to schedule this datacenter's pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Racks in processing order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rack: Vec<Rack>,
}

/// A rack inside a datacenter; one StatefulSet per rack
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Rack {
    /// Rack name as announced by the snitch
    pub name: String,

    /// Node count for this rack only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes_per_racks: Option<i32>,

    /// Labels used to schedule this rack's pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A resolved (datacenter, rack) pair with its position in the topology
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DcRack {
    /// Datacenter name
    pub dc: String,
    /// Rack name
    pub rack: String,
    /// Index of the datacenter in the topology
    pub dc_index: usize,
    /// Index of the rack in its datacenter
    pub rack_index: usize,
    /// Resolved node count for this rack
    pub nodes: i32,
    /// Token count of the datacenter, if set
    pub num_tokens: Option<i32>,
    /// Datacenter labels overlaid with rack labels
    pub labels: BTreeMap<String, String>,
}

impl DcRack {
    /// Key used for status entries and resource names
    pub fn key(&self) -> String {
        dc_rack_key(&self.dc, &self.rack)
    }
}

impl Datacenter {
    /// Node count every rack of this datacenter inherits
    pub fn nodes_per_racks(&self, default: i32) -> i32 {
        self.nodes_per_racks.unwrap_or(default)
    }

    /// Racks of the datacenter, with the implicit default rack when none is set
    pub fn racks(&self) -> Vec<Rack> {
        if self.rack.is_empty() {
            vec![Rack {
                name: DEFAULT_RACK_NAME.to_string(),
                ..Default::default()
            }]
        } else {
            self.rack.clone()
        }
    }

    /// Resolved node count of every rack, in declared order
    pub fn rack_nodes(&self, default: i32) -> Vec<i32> {
        let dc_nodes = self.nodes_per_racks(default);
        self.racks()
            .iter()
            .map(|r| r.nodes_per_racks.unwrap_or(dc_nodes))
            .collect()
    }

    /// True when at least one rack of the datacenter should run nodes
    pub fn has_nodes(&self, default: i32) -> bool {
        self.rack_nodes(default).iter().any(|n| *n > 0)
    }
}

impl Topology {
    /// Datacenters, with the implicit default datacenter when none is set
    pub fn datacenters(&self) -> Vec<Datacenter> {
        if self.dc.is_empty() {
            vec![Datacenter {
                name: DEFAULT_DC_NAME.to_string(),
                ..Default::default()
            }]
        } else {
            self.dc.clone()
        }
    }

    /// Look up a datacenter by name
    pub fn find_dc(&self, name: &str) -> Option<Datacenter> {
        self.datacenters().into_iter().find(|dc| dc.name == name)
    }

    /// Every (dc, rack) pair in processing order
    pub fn dc_racks(&self, default_nodes: i32) -> Vec<DcRack> {
        self.datacenters()
            .iter()
            .enumerate()
            .flat_map(|(dc_index, dc)| {
                let dc_nodes = dc.nodes_per_racks(default_nodes);
                dc.racks()
                    .into_iter()
                    .enumerate()
                    .map(move |(rack_index, rack)| {
                        let mut labels = dc.labels.clone();
                        labels.extend(rack.labels.clone());
                        DcRack {
                            dc: dc.name.clone(),
                            rack: rack.name.clone(),
                            dc_index,
                            rack_index,
                            nodes: rack.nodes_per_racks.unwrap_or(dc_nodes),
                            num_tokens: dc.num_tokens,
                            labels,
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Number of (dc, rack) pairs
    pub fn dc_rack_count(&self) -> usize {
        self.datacenters().iter().map(|dc| dc.racks().len()).sum()
    }

    /// Name of the first datacenter of `old` that no longer exists here
    pub fn removed_dc_name(&self, old: &Topology) -> Option<String> {
        old.datacenters()
            .into_iter()
            .find(|dc| self.find_dc(&dc.name).is_none())
            .map(|dc| dc.name)
    }

    /// First datacenter asked to go to zero nodes while `old` still ran nodes there
    pub fn dc_scaled_to_zero(
        &self,
        default_nodes: i32,
        old: &Topology,
        old_default_nodes: i32,
    ) -> Option<Datacenter> {
        self.datacenters().into_iter().find(|dc| {
            !dc.has_nodes(default_nodes)
                && old
                    .find_dc(&dc.name)
                    .is_some_and(|old_dc| old_dc.has_nodes(old_default_nodes))
        })
    }
}
