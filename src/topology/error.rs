//! Error types for topology operations.

use thiserror::Error;

/// Unified error type for topology lookups and mutations.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// A dotted node name did not resolve.
    #[error("unknown node '{0}'")]
    NotFound(String),

    /// A node name with more than three segments (or otherwise malformed).
    #[error("invalid node name '{0}'")]
    InvalidName(String),

    /// The named node exists but is not a host.
    #[error("'{0}' does not name a host")]
    NotAHost(String),

    /// No host owns the given port.
    #[error("no host registered for port {0}")]
    UnknownPort(u16),

    /// The port is already registered on the target host.
    #[error("port {0} is already registered")]
    PortTaken(u16),

    /// The port exists but under the other role.
    #[error("port {port} is not registered as a {expected} port")]
    RoleMismatch {
        /// The offending port.
        port: u16,
        /// The role the caller expected ("server" or "client").
        expected: &'static str,
    },
}

/// Result type for topology operations.
pub type TopologyResult<T> = Result<T, TopologyError>;
