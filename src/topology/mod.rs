//! The topology engine: a three-level tree (datacenter → rack → host) with
//! mutable per-node latency and down flags, a port registry, and derivation
//! of connection verdicts from endpoint pairs.
//!
//! Verdict changes propagate through an update epoch: every mutation that
//! can change an existing verdict bumps a watch channel, waking all
//! subscribers so they re-fetch their verdicts. This is the only
//! propagation mechanism; nothing polls on an interval.

mod config;
mod error;
mod node;
mod tree;

pub use config::{DataCenterConfig, HostConfig, RackConfig, TopologyConfig};
pub use error::{TopologyError, TopologyResult};
pub use node::{ConnState, NodeState, PortRole};
pub use tree::{Topology, DIAL_TIMEOUT, TCP_TIMEOUT};
