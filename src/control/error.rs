//! Error types for control-plane operations.

use thiserror::Error;

/// Unified error type for the control service and client.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The control service rejected the request.
    #[error("control API error ({status}): {message}")]
    Api {
        /// HTTP status code returned by the service.
        status: u16,
        /// Plain-text error body.
        message: String,
    },

    /// Failure reaching the control service.
    #[error("control transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A request or response body failed to decode.
    #[error("invalid body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    /// I/O error binding or serving the control listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for control-plane operations.
pub type ControlResult<T> = Result<T, ControlError>;
