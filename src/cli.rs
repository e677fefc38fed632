//! Command-line interface for the `netfaultd` binary.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::Parser;

/// Distributed-network fault-injection harness.
///
/// Runs the control service on localhost, seeded with the built-in default
/// topology. Test processes point their dialers, listeners, and proxies at
/// this service and mutate the topology through its HTTP API.
#[derive(Parser, Debug)]
#[command(name = "netfaultd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Port for the control service on localhost.
    #[arg(short, long, default_value_t = 8989)]
    pub port: u16,
}
