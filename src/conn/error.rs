//! Error types for fault-injected connections.

use thiserror::Error;

/// Unified error type for dialing and wrapped-connection I/O.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The connection (or its close signal) was closed.
    #[error("connection closed")]
    Closed,

    /// The read deadline elapsed.
    #[error("read timeout")]
    ReadTimeout,

    /// The write deadline elapsed.
    #[error("write timeout")]
    WriteTimeout,

    /// The dial did not complete within the dialer's timeout.
    #[error("dial timeout")]
    DialTimeout,

    /// The simulated network refused the traffic.
    #[error("connection fault injected")]
    Fault,

    /// The control plane failed while the connection depended on it.
    #[error("control plane failure: {0}")]
    Control(String),

    /// A target address could not be parsed.
    #[error("invalid address '{0}'")]
    InvalidAddr(String),

    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for connection operations.
pub type ConnResult<T> = Result<T, ConnError>;
