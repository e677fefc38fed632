//! Embedded TCP proxies managed by the control service.
//!
//! A proxy lets an unmodified client participate in the simulation: the
//! client connects to the proxy port, and the proxy splices it onto a
//! fault-wrapped connection to the real origin.

mod error;
mod server;

pub use error::{ProxyError, ProxyResult};
pub use server::ProxyServer;
