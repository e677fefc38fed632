//! Fault-injected connections: the packet-buffered wrapper over a real
//! socket, and the dial/listen helpers that register endpoints with the
//! control plane.
//!
//! Data flows application → wrapper → real socket; the wrapper delays each
//! direction by the current verdict latency and fails writes once the
//! verdict goes not-OK. Verdict changes arrive through a long-polling
//! updater, so in-flight delays are recomputed the moment the topology
//! changes.

mod dial;
mod error;
mod packet;
mod wrapper;

pub use dial::{Dialer, Listener};
pub use error::{ConnError, ConnResult};
pub use packet::{NUM_PACKETS, PACKET_SIZE};
pub use wrapper::FaultConn;
