//! Topology configuration document.
//!
//! The control plane accepts a nested JSON document describing the
//! datacenter → rack → host tree plus default node states at each level.
//! Defaulting is hierarchical: a datacenter may override the rack/host
//! defaults for its subtree, and a rack may override the host default for
//! its hosts. Durations are integer nanoseconds.

use super::node::NodeState;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopologyConfig {
    /// Default state for datacenters without an explicit one.
    #[serde(default)]
    pub dc_default: Option<NodeState>,

    /// Default state for racks without an explicit one.
    #[serde(default)]
    pub rack_default: Option<NodeState>,

    /// Default state for hosts without an explicit one.
    #[serde(default)]
    pub host_default: Option<NodeState>,

    /// The datacenters of the simulated network.
    #[serde(default)]
    pub data_centers: Vec<DataCenterConfig>,
}

/// One datacenter in the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataCenterConfig {
    /// Datacenter name, unique within the topology.
    pub name: String,

    /// Overrides the top-level rack default for this subtree.
    #[serde(default)]
    pub rack_default: Option<NodeState>,

    /// Overrides the top-level host default for this subtree.
    #[serde(default)]
    pub host_default: Option<NodeState>,

    /// Explicit state for this datacenter.
    #[serde(default)]
    pub node_state: Option<NodeState>,

    /// The racks of this datacenter.
    #[serde(default)]
    pub racks: Vec<RackConfig>,
}

/// One rack in the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RackConfig {
    /// Rack name, unique within its datacenter.
    pub name: String,

    /// Overrides the host default for this rack's hosts.
    #[serde(default)]
    pub host_default: Option<NodeState>,

    /// Explicit state for this rack.
    #[serde(default)]
    pub node_state: Option<NodeState>,

    /// The hosts of this rack.
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

/// One host in the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    /// Host name, unique within its rack.
    pub name: String,

    /// Explicit state for this host.
    #[serde(default)]
    pub node_state: Option<NodeState>,

    /// Ports pre-registered as server ports at construction.
    #[serde(default)]
    pub ports: Vec<u16>,
}

fn latency(d: Duration) -> Option<NodeState> {
    Some(NodeState {
        latency: d,
        ..Default::default()
    })
}

fn hosts(names: &[&str]) -> Vec<HostConfig> {
    names
        .iter()
        .map(|n| HostConfig {
            name: (*n).to_string(),
            node_state: None,
            ports: Vec::new(),
        })
        .collect()
}

fn rack(name: &str, host_names: &[&str]) -> RackConfig {
    RackConfig {
        name: name.to_string(),
        host_default: None,
        node_state: None,
        hosts: hosts(host_names),
    }
}

fn dc(name: &str, racks: Vec<RackConfig>) -> DataCenterConfig {
    DataCenterConfig {
        name: name.to_string(),
        rack_default: None,
        host_default: None,
        node_state: None,
        racks,
    }
}

impl Default for TopologyConfig {
    /// The built-in topology: three datacenters, nine racks, twenty-seven
    /// hosts, with latencies of 100 ms per datacenter, 10 ms per rack and
    /// 1 ms per host.
    fn default() -> Self {
        TopologyConfig {
            dc_default: latency(Duration::from_millis(100)),
            rack_default: latency(Duration::from_millis(10)),
            host_default: latency(Duration::from_millis(1)),
            data_centers: vec![
                dc(
                    "animal",
                    vec![
                        rack("land", &["tiger", "lion", "wolf"]),
                        rack("sea", &["shark", "whale", "cod"]),
                        rack("air", &["eagle", "crow", "owl"]),
                    ],
                ),
                dc(
                    "plant",
                    vec![
                        rack("fruit", &["apple", "pear", "grape"]),
                        rack("crop", &["corn", "rice", "wheat"]),
                        rack("flower", &["rose", "lily", "lotus"]),
                    ],
                ),
                dc(
                    "matter",
                    vec![
                        rack("metal", &["gold", "silver", "iron"]),
                        rack("gem", &["ruby", "ivory", "pearl"]),
                        rack("liquid", &["water", "oil", "wine"]),
                    ],
                ),
            ],
        }
    }
}
