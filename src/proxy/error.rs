//! Error types for the embedded proxy server.

use thiserror::Error;

/// Unified error type for proxy lifecycle operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Failed to bind the proxy listener.
    #[error("failed to bind proxy port {port}: {source}")]
    Bind {
        /// The port we tried to listen on.
        port: u16,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The control plane rejected a proxy registration.
    #[error("control plane failure: {0}")]
    Control(String),
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
