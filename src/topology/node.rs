//! Wire-level state types shared by the topology engine, the control plane,
//! and the connection wrapper.
//!
//! Durations cross the wire as integer nanoseconds; field names are
//! PascalCase to match the control-plane JSON format.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serde helpers mapping `Duration` to integer nanoseconds on the wire.
pub(crate) mod nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ns = u64::deserialize(d)?;
        Ok(Duration::from_nanos(ns))
    }
}

/// Mutable state carried by every node of the topology tree.
///
/// `latency` is the node's contribution to the one-way path latency; zero
/// means "no contribution" as a stored value, and "keep the previous
/// latency" when supplied to an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeState {
    /// One-way latency contribution, nanoseconds on the wire.
    #[serde(default, with = "nanos")]
    pub latency: Duration,

    /// The node's own fabric is unreachable; affects every connection
    /// touching the node.
    #[serde(default)]
    pub internal_down: bool,

    /// The node's uplink to its enclosing aggregation is cut; affects only
    /// connections crossing that boundary.
    #[serde(default)]
    pub external_down: bool,
}

impl NodeState {
    /// Replace this state with `new`, keeping the current latency when the
    /// update's latency is zero.
    pub(crate) fn apply(&mut self, mut new: NodeState) {
        if new.latency.is_zero() {
            new.latency = self.latency;
        }
        *self = new;
    }
}

/// The verdict governing a simulated connection at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnState {
    /// Sleep time before bytes move in either direction.
    #[serde(default, with = "nanos")]
    pub latency: Duration,

    /// Whether the simulated network allows traffic at all.
    #[serde(default, rename = "OK")]
    pub ok: bool,
}

/// Role of a registered port on a host.
///
/// Only server ports affect other hosts' verdicts; client ports exist so
/// that an established connection can be looked up by its local port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    /// A listening port other hosts dial.
    Server,
    /// The local port of an outbound connection.
    Client,
}

impl PortRole {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            PortRole::Server => "server",
            PortRole::Client => "client",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_state_wire_format() {
        let state = NodeState {
            latency: Duration::from_millis(100),
            internal_down: false,
            external_down: true,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"Latency\":100000000"));
        assert!(json.contains("\"ExternalDown\":true"));

        let back: NodeState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_node_state_partial_document() {
        // Down flags may be omitted entirely.
        let state: NodeState = serde_json::from_str(r#"{"Latency":1000000}"#).unwrap();
        assert_eq!(state.latency, Duration::from_millis(1));
        assert!(!state.internal_down);
        assert!(!state.external_down);
    }

    #[test]
    fn test_conn_state_wire_format() {
        let state = ConnState {
            latency: Duration::from_millis(444),
            ok: true,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"OK\":true"));

        let back: ConnState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_apply_keeps_latency_on_zero() {
        let mut state = NodeState {
            latency: Duration::from_millis(10),
            ..Default::default()
        };
        state.apply(NodeState {
            internal_down: true,
            ..Default::default()
        });
        assert_eq!(state.latency, Duration::from_millis(10));
        assert!(state.internal_down);

        state.apply(NodeState {
            latency: Duration::from_millis(30),
            ..Default::default()
        });
        assert_eq!(state.latency, Duration::from_millis(30));
        assert!(!state.internal_down);
    }
}
