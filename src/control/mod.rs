//! The control plane: an HTTP service exposing topology and proxy
//! mutations plus verdict queries, and the thin client façade used by
//! connection wrappers and user code.
//!
//! The HTTP binding is a detail; the operations and their semantics live in
//! [`crate::topology`]. Swapping the transport must not change core
//! behavior.

mod client;
mod error;
mod server;

pub use client::ControlClient;
pub use error::{ControlError, ControlResult};
pub use server::{ControlServer, LONG_POLL_WAIT};
