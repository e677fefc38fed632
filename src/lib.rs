//! netfault: a distributed-network fault-injection harness for
//! integration tests.
//!
//! Processes on a single host behave as if deployed across a
//! datacenter/rack/host topology with configurable per-node latency and
//! up/down state. Application code obtains connections through the
//! harness; the harness delays and fails traffic according to the
//! topology between the simulated endpoints, and re-evaluates every live
//! connection the moment an operator mutates the topology.
//!
//! # Architecture
//!
//! - **Topology**: the three-level tree, port registry, and verdict
//!   computation, with a broadcast update epoch
//! - **Control**: HTTP control service plus the thin client façade used by
//!   wrappers and tests
//! - **Conn**: the packet-buffered latency/failure wrapper and the
//!   dial/listen helpers
//! - **Proxy**: embedded TCP proxies for unmodified clients

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod conn;
pub mod control;
pub mod proxy;
pub mod topology;

pub use conn::{Dialer, FaultConn, Listener};
pub use control::{ControlClient, ControlServer};
pub use topology::{ConnState, NodeState, Topology, TopologyConfig};
