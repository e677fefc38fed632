//! The topology tree: datacenters, racks, hosts, the port registry, and
//! verdict computation.
//!
//! All operations go through a single read-write lock over the tree and the
//! port maps, so every verdict is computed against a consistent snapshot.
//! Mutations that can change an existing verdict bump the update epoch,
//! waking every subscriber that snapshotted the epoch before the mutation;
//! subscribers that snapshot afterwards wait for the next bump.

use super::config::TopologyConfig;
use super::error::{TopologyError, TopologyResult};
use super::node::{ConnState, NodeState, PortRole};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Latency reported for an established connection once the network between
/// its endpoints is modeled down.
pub const TCP_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Latency reported for a prospective dial once the network between the
/// endpoints is modeled down, so simulated dials block realistically
/// before failing.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Location of a host, resolvable downward from the topology root.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HostPath {
    dc: String,
    rack: String,
    host: String,
}

struct Host {
    state: NodeState,
    ports: HashMap<u16, PortRole>,
}

struct Rack {
    state: NodeState,
    hosts: HashMap<String, Host>,
}

struct DataCenter {
    state: NodeState,
    racks: HashMap<String, Rack>,
}

struct Tree {
    dcs: HashMap<String, DataCenter>,
    /// Global port registry. Entries persist after a server port is
    /// unregistered from its host so that dial verdicts against the stale
    /// port keep resolving (and report not-OK).
    ports: HashMap<u16, HostPath>,
}

/// The topology engine.
///
/// Constructed from a [`TopologyConfig`] document and alive until the next
/// full configuration replacement.
pub struct Topology {
    tree: RwLock<Tree>,
    epoch: watch::Sender<()>,
}

impl Topology {
    /// Build a topology from a configuration document, applying the
    /// hierarchical defaults and pre-registering the listed host ports as
    /// server ports.
    pub fn from_config(config: &TopologyConfig) -> Self {
        let mut dcs = HashMap::new();
        let mut ports = HashMap::new();

        for dc_conf in &config.data_centers {
            let rack_default = dc_conf.rack_default.or(config.rack_default);
            let host_default = dc_conf.host_default.or(config.host_default);
            let dc_state = dc_conf.node_state.or(config.dc_default).unwrap_or_default();

            let mut racks = HashMap::new();
            for rack_conf in &dc_conf.racks {
                let host_default = rack_conf.host_default.or(host_default);
                let rack_state = rack_conf.node_state.or(rack_default).unwrap_or_default();

                let mut hosts = HashMap::new();
                for host_conf in &rack_conf.hosts {
                    let host_state = host_conf.node_state.or(host_default).unwrap_or_default();
                    let mut host_ports = HashMap::new();
                    for &port in &host_conf.ports {
                        host_ports.insert(port, PortRole::Server);
                        ports.insert(
                            port,
                            HostPath {
                                dc: dc_conf.name.clone(),
                                rack: rack_conf.name.clone(),
                                host: host_conf.name.clone(),
                            },
                        );
                    }
                    hosts.insert(
                        host_conf.name.clone(),
                        Host {
                            state: host_state,
                            ports: host_ports,
                        },
                    );
                }
                racks.insert(
                    rack_conf.name.clone(),
                    Rack {
                        state: rack_state,
                        hosts,
                    },
                );
            }
            dcs.insert(
                dc_conf.name.clone(),
                DataCenter {
                    state: dc_state,
                    racks,
                },
            );
        }

        let (epoch, _) = watch::channel(());
        Topology {
            tree: RwLock::new(Tree { dcs, ports }),
            epoch,
        }
    }

    /// Snapshot the current update epoch.
    ///
    /// The receiver wakes once for any rotating mutation applied after this
    /// call.
    pub fn update_rx(&self) -> watch::Receiver<()> {
        self.epoch.subscribe()
    }

    /// Bump the update epoch, waking every subscriber that snapshotted it
    /// before the bump. Called with the write lock held by mutations, and
    /// once more by the control service when this topology is replaced.
    pub(crate) fn rotate(&self) {
        self.epoch.send_replace(());
    }

    /// Register `port` on the named host as a server port.
    ///
    /// Rotates the update epoch: a new server port can flip any pending
    /// dial verdict against it.
    pub fn add_server_port(&self, name: &str, port: u16) -> TopologyResult<()> {
        self.add_port(name, port, PortRole::Server)
    }

    /// Register `port` on the named host as a client port. Does not rotate
    /// the update epoch: no other connection's verdict depends on a client
    /// port.
    pub fn add_client_port(&self, name: &str, port: u16) -> TopologyResult<()> {
        self.add_port(name, port, PortRole::Client)
    }

    fn add_port(&self, name: &str, port: u16, role: PortRole) -> TopologyResult<()> {
        let mut tree = self.tree.write().unwrap();
        let path = resolve_host_path(&tree, name)?;
        let host = host_mut(&mut tree, &path);
        if host.ports.contains_key(&port) {
            return Err(TopologyError::PortTaken(port));
        }
        host.ports.insert(port, role);
        tree.ports.insert(port, path);
        debug!(name, port, role = role.as_str(), "port registered");
        if role == PortRole::Server {
            self.rotate();
        }
        Ok(())
    }

    /// Unregister a server port from the named host.
    ///
    /// The global registry entry is left in place so that later dial
    /// verdicts against the port still resolve the host and report not-OK.
    pub fn remove_server_port(&self, name: &str, port: u16) -> TopologyResult<()> {
        let mut tree = self.tree.write().unwrap();
        let path = resolve_host_path(&tree, name)?;
        let host = host_mut(&mut tree, &path);
        match host.ports.get(&port) {
            None => return Err(TopologyError::UnknownPort(port)),
            Some(PortRole::Client) => {
                return Err(TopologyError::RoleMismatch {
                    port,
                    expected: "server",
                })
            }
            Some(PortRole::Server) => {}
        }
        host.ports.remove(&port);
        debug!(name, port, "server port removed");
        self.rotate();
        Ok(())
    }

    /// Unregister a client port, resolving its host through the global
    /// registry. Does not rotate the update epoch.
    pub fn remove_client_port(&self, port: u16) -> TopologyResult<()> {
        let mut tree = self.tree.write().unwrap();
        let path = tree
            .ports
            .get(&port)
            .cloned()
            .ok_or(TopologyError::UnknownPort(port))?;
        let host = host_mut(&mut tree, &path);
        match host.ports.get(&port) {
            None => return Err(TopologyError::UnknownPort(port)),
            Some(PortRole::Server) => {
                return Err(TopologyError::RoleMismatch {
                    port,
                    expected: "client",
                })
            }
            Some(PortRole::Client) => {}
        }
        host.ports.remove(&port);
        tree.ports.remove(&port);
        debug!(port, "client port removed");
        Ok(())
    }

    /// Read the state of the node at the dotted name (any level).
    pub fn node_state(&self, name: &str) -> TopologyResult<NodeState> {
        let tree = self.tree.read().unwrap();
        node_ref(&tree, name).copied()
    }

    /// Replace the state of the node at the dotted name (any level). A zero
    /// latency in `new` keeps the node's current latency. Rotates the
    /// update epoch.
    pub fn set_node_state(&self, name: &str, new: NodeState) -> TopologyResult<()> {
        let mut tree = self.tree.write().unwrap();
        node_mut(&mut tree, name)?.apply(new);
        debug!(name, ?new, "node state updated");
        self.rotate();
        Ok(())
    }

    /// Verdict for a prospective dial from the named client host to
    /// whichever host owns `server_port`.
    ///
    /// The latency is doubled (round trip of the handshake). When the
    /// network is down the latency is replaced by [`DIAL_TIMEOUT`].
    pub fn dial_state(&self, client_name: &str, server_port: u16) -> TopologyResult<ConnState> {
        let tree = self.tree.read().unwrap();
        let client_path = resolve_host_path(&tree, client_name)?;
        let server_path = tree
            .ports
            .get(&server_port)
            .cloned()
            .ok_or(TopologyError::UnknownPort(server_port))?;

        let (network_ok, latency) = compute_network_state(&tree, &client_path, &server_path);
        if network_ok {
            let listening = host_ref(&tree, &server_path)
                .map(|h| h.ports.get(&server_port) == Some(&PortRole::Server))
                .unwrap_or(false);
            Ok(ConnState {
                ok: listening,
                latency: latency * 2,
            })
        } else {
            Ok(ConnState {
                ok: false,
                latency: DIAL_TIMEOUT,
            })
        }
    }

    /// Verdict for an established connection between `client_port` and
    /// `server_port`.
    ///
    /// A client port that has disappeared from its host (the client
    /// disconnected per the registry) yields the zero verdict without
    /// error. When the network is down the latency is replaced by
    /// [`TCP_TIMEOUT`].
    pub fn conn_state(&self, client_port: u16, server_port: u16) -> TopologyResult<ConnState> {
        let tree = self.tree.read().unwrap();
        let client_path = tree
            .ports
            .get(&client_port)
            .cloned()
            .ok_or(TopologyError::UnknownPort(client_port))?;
        let server_path = tree
            .ports
            .get(&server_port)
            .cloned()
            .ok_or(TopologyError::UnknownPort(server_port))?;

        let client_registered = host_ref(&tree, &client_path)
            .map(|h| h.ports.contains_key(&client_port))
            .unwrap_or(false);
        if !client_registered {
            return Ok(ConnState::default());
        }

        let (network_ok, latency) = compute_network_state(&tree, &client_path, &server_path);
        if network_ok {
            let listening = host_ref(&tree, &server_path)
                .map(|h| h.ports.contains_key(&server_port))
                .unwrap_or(false);
            Ok(ConnState {
                ok: listening,
                latency,
            })
        } else {
            Ok(ConnState {
                ok: false,
                latency: TCP_TIMEOUT,
            })
        }
    }

    /// Resolve a dotted name, failing if any segment is absent. Used by the
    /// control service to validate names without reading state.
    pub fn lookup(&self, name: &str) -> TopologyResult<()> {
        let tree = self.tree.read().unwrap();
        node_ref(&tree, name).map(|_| ())
    }
}

/// Compute the network verdict between two hosts, no ports involved.
///
/// Internal-down at the host level always counts. Each boundary the
/// connection crosses adds both sides' external-down flags, the enclosing
/// level's internal-down flags, and both sides' latency contributions.
fn compute_network_state(tree: &Tree, client: &HostPath, server: &HostPath) -> (bool, Duration) {
    let (Some((client_host, client_rack, client_dc)), Some((server_host, server_rack, server_dc))) =
        (chain_ref(tree, client), chain_ref(tree, server))
    else {
        return (false, Duration::ZERO);
    };

    let mut client_side_down = client_host.state.internal_down;
    let mut server_side_down = server_host.state.internal_down;
    let mut latency = Duration::ZERO;

    if client != server {
        client_side_down = client_side_down
            || client_host.state.external_down
            || client_rack.state.internal_down;
        server_side_down = server_side_down
            || server_host.state.external_down
            || server_rack.state.internal_down;
        latency += client_host.state.latency + server_host.state.latency;

        let same_rack = client.dc == server.dc && client.rack == server.rack;
        if !same_rack {
            client_side_down = client_side_down
                || client_rack.state.external_down
                || client_dc.state.internal_down;
            server_side_down = server_side_down
                || server_rack.state.external_down
                || server_dc.state.internal_down;
            latency += client_rack.state.latency + server_rack.state.latency;

            if client.dc != server.dc {
                client_side_down = client_side_down || client_dc.state.external_down;
                server_side_down = server_side_down || server_dc.state.external_down;
                latency += client_dc.state.latency + server_dc.state.latency;
            }
        }
    }

    (!(client_side_down || server_side_down), latency)
}

fn chain_ref<'a>(tree: &'a Tree, path: &HostPath) -> Option<(&'a Host, &'a Rack, &'a DataCenter)> {
    let dc = tree.dcs.get(&path.dc)?;
    let rack = dc.racks.get(&path.rack)?;
    let host = rack.hosts.get(&path.host)?;
    Some((host, rack, dc))
}

fn host_ref<'a>(tree: &'a Tree, path: &HostPath) -> Option<&'a Host> {
    chain_ref(tree, path).map(|(h, _, _)| h)
}

fn host_mut<'a>(tree: &'a mut Tree, path: &HostPath) -> &'a mut Host {
    // Paths handed out by resolve_host_path or the registry always name
    // nodes of this tree; nodes are never removed individually.
    tree.dcs
        .get_mut(&path.dc)
        .and_then(|dc| dc.racks.get_mut(&path.rack))
        .and_then(|r| r.hosts.get_mut(&path.host))
        .expect("registry path names a live host")
}

fn split_name(name: &str) -> TopologyResult<Vec<&str>> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(TopologyError::InvalidName(name.to_string()));
    }
    Ok(parts)
}

fn resolve_host_path(tree: &Tree, name: &str) -> TopologyResult<HostPath> {
    let parts = split_name(name)?;
    if parts.len() != 3 {
        return Err(TopologyError::NotAHost(name.to_string()));
    }
    node_ref_parts(tree, &parts)?;
    Ok(HostPath {
        dc: parts[0].to_string(),
        rack: parts[1].to_string(),
        host: parts[2].to_string(),
    })
}

fn node_ref<'a>(tree: &'a Tree, name: &str) -> TopologyResult<&'a NodeState> {
    let parts = split_name(name)?;
    node_ref_parts(tree, &parts)
}

fn node_ref_parts<'a>(tree: &'a Tree, parts: &[&str]) -> TopologyResult<&'a NodeState> {
    let dc = tree
        .dcs
        .get(parts[0])
        .ok_or_else(|| TopologyError::NotFound(parts[0].to_string()))?;
    if parts.len() == 1 {
        return Ok(&dc.state);
    }
    let rack = dc
        .racks
        .get(parts[1])
        .ok_or_else(|| TopologyError::NotFound(parts[1].to_string()))?;
    if parts.len() == 2 {
        return Ok(&rack.state);
    }
    let host = rack
        .hosts
        .get(parts[2])
        .ok_or_else(|| TopologyError::NotFound(parts[2].to_string()))?;
    Ok(&host.state)
}

fn node_mut<'a>(tree: &'a mut Tree, name: &str) -> TopologyResult<&'a mut NodeState> {
    let parts = split_name(name)?;
    let dc = tree
        .dcs
        .get_mut(parts[0])
        .ok_or_else(|| TopologyError::NotFound(parts[0].to_string()))?;
    if parts.len() == 1 {
        return Ok(&mut dc.state);
    }
    let rack = dc
        .racks
        .get_mut(parts[1])
        .ok_or_else(|| TopologyError::NotFound(parts[1].to_string()))?;
    if parts.len() == 2 {
        return Ok(&mut rack.state);
    }
    let host = rack
        .hosts
        .get_mut(parts[2])
        .ok_or_else(|| TopologyError::NotFound(parts[2].to_string()))?;
    Ok(&mut host.state)
}

impl fmt::Display for Topology {
    /// Human-readable dump of the whole tree, sorted for stable output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tree = self.tree.read().unwrap();
        let mut dc_names: Vec<_> = tree.dcs.keys().collect();
        dc_names.sort();
        for dc_name in dc_names {
            let dc = &tree.dcs[dc_name];
            writeln!(f, "{} {}", dc_name, fmt_state(&dc.state))?;
            let mut rack_names: Vec<_> = dc.racks.keys().collect();
            rack_names.sort();
            for rack_name in rack_names {
                let rack = &dc.racks[rack_name];
                writeln!(f, "  {} {}", rack_name, fmt_state(&rack.state))?;
                let mut host_names: Vec<_> = rack.hosts.keys().collect();
                host_names.sort();
                for host_name in host_names {
                    let host = &rack.hosts[host_name];
                    let mut ports: Vec<_> = host.ports.keys().collect();
                    ports.sort();
                    writeln!(
                        f,
                        "    {} {} ports:{:?}",
                        host_name,
                        fmt_state(&host.state),
                        ports
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn fmt_state(state: &NodeState) -> String {
    format!(
        "latency:{:?} internalDown:{} externalDown:{}",
        state.latency, state.internal_down, state.external_down
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const APPLE: &str = "plant.fruit.apple";
    const PEAR: &str = "plant.fruit.pear";
    const CORN: &str = "plant.crop.corn";
    const TIGER: &str = "animal.land.tiger";

    fn default_topology() -> Topology {
        Topology::from_config(&TopologyConfig::default())
    }

    #[test]
    fn test_node_state_round_trip() {
        let topo = default_topology();
        let set = NodeState {
            latency: Duration::from_millis(30),
            internal_down: true,
            external_down: false,
        };
        topo.set_node_state(APPLE, set).unwrap();
        assert_eq!(topo.node_state(APPLE).unwrap(), set);

        // Zero latency keeps the stored latency.
        topo.set_node_state(
            APPLE,
            NodeState {
                external_down: true,
                ..Default::default()
            },
        )
        .unwrap();
        let got = topo.node_state(APPLE).unwrap();
        assert_eq!(got.latency, Duration::from_millis(30));
        assert!(got.external_down);
        assert!(!got.internal_down);
    }

    #[test]
    fn test_lookup_levels_and_failures() {
        let topo = default_topology();
        topo.lookup("plant").unwrap();
        topo.lookup("plant.fruit").unwrap();
        topo.lookup(APPLE).unwrap();
        assert!(matches!(
            topo.lookup("mineral"),
            Err(TopologyError::NotFound(_))
        ));
        assert!(matches!(
            topo.lookup("plant.stone"),
            Err(TopologyError::NotFound(_))
        ));
        assert!(matches!(
            topo.lookup("plant.fruit.mango"),
            Err(TopologyError::NotFound(_))
        ));
        assert!(matches!(
            topo.lookup("a.b.c.d"),
            Err(TopologyError::InvalidName(_))
        ));
    }

    #[test]
    fn test_dial_same_host_is_free() {
        let topo = default_topology();
        topo.add_server_port(APPLE, 30003).unwrap();
        let state = topo.dial_state(APPLE, 30003).unwrap();
        assert!(state.ok);
        assert_eq!(state.latency, Duration::ZERO);
    }

    #[test]
    fn test_dial_cross_dc_latency() {
        let topo = default_topology();
        topo.add_server_port(TIGER, 30011).unwrap();
        let state = topo.dial_state(APPLE, 30011).unwrap();
        assert!(state.ok);
        // host + rack + dc on both sides, doubled for the dial round trip.
        assert_eq!(state.latency, Duration::from_millis(2 * (1 + 10 + 100 + 100 + 10 + 1)));
    }

    #[test]
    fn test_dial_same_rack_and_same_dc() {
        let topo = default_topology();
        topo.add_server_port(PEAR, 30004).unwrap();
        let state = topo.dial_state(APPLE, 30004).unwrap();
        assert_eq!(state.latency, Duration::from_millis(2 * (1 + 1)));

        topo.add_server_port(CORN, 30005).unwrap();
        let state = topo.dial_state(APPLE, 30005).unwrap();
        assert_eq!(state.latency, Duration::from_millis(2 * (1 + 10 + 10 + 1)));
    }

    #[test]
    fn test_down_flags_affect_crossing_connections() {
        let topo = default_topology();
        topo.add_server_port(TIGER, 30011).unwrap();

        for name in ["plant", "plant.fruit", APPLE, "animal", "animal.land", TIGER] {
            for down in [
                NodeState {
                    internal_down: true,
                    ..Default::default()
                },
                NodeState {
                    external_down: true,
                    ..Default::default()
                },
            ] {
                topo.set_node_state(name, down).unwrap();
                let state = topo.dial_state(APPLE, 30011).unwrap();
                assert!(!state.ok, "dial should fail with {name} down");
                assert_eq!(state.latency, DIAL_TIMEOUT);
                topo.set_node_state(name, NodeState::default()).unwrap();
            }
        }

        let state = topo.dial_state(APPLE, 30011).unwrap();
        assert!(state.ok);
    }

    #[test]
    fn test_external_down_ignored_within_boundary() {
        let topo = default_topology();
        topo.add_server_port(PEAR, 30004).unwrap();

        // Rack external-down does not affect an intra-rack connection.
        topo.set_node_state(
            "plant.fruit",
            NodeState {
                external_down: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(topo.dial_state(APPLE, 30004).unwrap().ok);

        // Rack internal-down does.
        topo.set_node_state(
            "plant.fruit",
            NodeState {
                internal_down: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!topo.dial_state(APPLE, 30004).unwrap().ok);
    }

    #[test]
    fn test_host_internal_down_affects_same_host() {
        let topo = default_topology();
        topo.add_server_port(APPLE, 30003).unwrap();
        topo.set_node_state(
            APPLE,
            NodeState {
                internal_down: true,
                ..Default::default()
            },
        )
        .unwrap();
        let state = topo.dial_state(APPLE, 30003).unwrap();
        assert!(!state.ok);
        assert_eq!(state.latency, DIAL_TIMEOUT);

        // External-down on the host is ignored for a co-located pair.
        topo.set_node_state(
            APPLE,
            NodeState {
                external_down: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(topo.dial_state(APPLE, 30003).unwrap().ok);
    }

    #[test]
    fn test_verdict_symmetry() {
        let topo = default_topology();
        topo.add_server_port(APPLE, 30003).unwrap();
        topo.add_server_port(TIGER, 30011).unwrap();
        let a = topo.dial_state(APPLE, 30011).unwrap();
        let b = topo.dial_state(TIGER, 30003).unwrap();
        assert_eq!(a.latency, b.latency);
        assert_eq!(a.ok, b.ok);
    }

    #[test]
    fn test_remove_server_port_keeps_latency() {
        let topo = default_topology();
        topo.add_server_port(TIGER, 30011).unwrap();
        topo.set_node_state(
            APPLE,
            NodeState {
                latency: Duration::from_millis(30),
                ..Default::default()
            },
        )
        .unwrap();
        let before = topo.dial_state(APPLE, 30011).unwrap();
        assert_eq!(before.latency, Duration::from_millis(2 * (30 + 10 + 100 + 100 + 10 + 1)));

        topo.remove_server_port(TIGER, 30011).unwrap();
        let after = topo.dial_state(APPLE, 30011).unwrap();
        assert!(!after.ok);
        // The network itself is up, so the path latency is preserved.
        assert_eq!(after.latency, before.latency);

        topo.add_server_port(TIGER, 30011).unwrap();
        assert!(topo.dial_state(APPLE, 30011).unwrap().ok);
    }

    #[test]
    fn test_port_conflicts_and_roles() {
        let topo = default_topology();
        topo.add_server_port(APPLE, 30003).unwrap();
        assert!(matches!(
            topo.add_server_port(APPLE, 30003),
            Err(TopologyError::PortTaken(30003))
        ));
        assert!(matches!(
            topo.add_client_port(APPLE, 30003),
            Err(TopologyError::PortTaken(30003))
        ));
        assert!(matches!(
            topo.remove_client_port(30003),
            Err(TopologyError::RoleMismatch { .. })
        ));

        topo.add_client_port(TIGER, 40001).unwrap();
        assert!(matches!(
            topo.remove_server_port(TIGER, 40001),
            Err(TopologyError::RoleMismatch { .. })
        ));
        topo.remove_client_port(40001).unwrap();
        assert!(matches!(
            topo.remove_client_port(40001),
            Err(TopologyError::UnknownPort(40001))
        ));
    }

    #[test]
    fn test_conn_state_tracks_registry() {
        let topo = default_topology();
        topo.add_server_port(APPLE, 30003).unwrap();
        topo.add_client_port(TIGER, 40001).unwrap();

        let state = topo.conn_state(40001, 30003).unwrap();
        assert!(state.ok);
        assert_eq!(state.latency, Duration::from_millis(1 + 10 + 100 + 100 + 10 + 1));

        topo.set_node_state(
            "plant",
            NodeState {
                internal_down: true,
                ..Default::default()
            },
        )
        .unwrap();
        let state = topo.conn_state(40001, 30003).unwrap();
        assert!(!state.ok);
        assert_eq!(state.latency, TCP_TIMEOUT);

        assert!(matches!(
            topo.conn_state(40002, 30003),
            Err(TopologyError::UnknownPort(40002))
        ));
    }

    #[test]
    fn test_update_epoch_rotation() {
        let topo = default_topology();
        let mut before = topo.update_rx();
        assert!(!before.has_changed().unwrap());

        topo.add_client_port(APPLE, 40001).unwrap();
        assert!(!before.has_changed().unwrap(), "client port must not rotate");

        topo.add_server_port(APPLE, 30003).unwrap();
        assert!(before.has_changed().unwrap(), "server port must rotate");

        let mut after = topo.update_rx();
        assert!(!after.has_changed().unwrap());
        topo.set_node_state(APPLE, NodeState::default()).unwrap();
        assert!(after.has_changed().unwrap(), "state change must rotate");
    }

    #[test]
    fn test_preregistered_config_ports() {
        let mut config = TopologyConfig::default();
        config.data_centers[0].racks[0].hosts[0].ports = vec![5000];
        let topo = Topology::from_config(&config);
        let host = format!(
            "{}.{}.{}",
            config.data_centers[0].name,
            config.data_centers[0].racks[0].name,
            config.data_centers[0].racks[0].hosts[0].name
        );
        // Pre-registered ports are server ports.
        let state = topo.dial_state(&host, 5000).unwrap();
        assert!(state.ok);
    }

    #[test]
    fn test_config_default_inheritance() {
        let doc = r#"
        {
            "DcDefault": {"Latency": 100000000},
            "RackDefault": {"Latency": 10000000},
            "HostDefault": {"Latency": 1000000},
            "DataCenters": [
                {
                    "Name": "alpha",
                    "HostDefault": {"Latency": 5000000},
                    "Racks": [
                        {"Name": "one", "Hosts": [{"Name": "a"}]},
                        {
                            "Name": "two",
                            "HostDefault": {"Latency": 7000000},
                            "Hosts": [{"Name": "b"}]
                        }
                    ]
                }
            ]
        }"#;
        let config: TopologyConfig = serde_json::from_str(doc).unwrap();
        let topo = Topology::from_config(&config);

        assert_eq!(
            topo.node_state("alpha").unwrap().latency,
            Duration::from_millis(100)
        );
        assert_eq!(
            topo.node_state("alpha.one").unwrap().latency,
            Duration::from_millis(10)
        );
        // Datacenter-level host default overrides the top-level one.
        assert_eq!(
            topo.node_state("alpha.one.a").unwrap().latency,
            Duration::from_millis(5)
        );
        // Rack-level host default overrides the datacenter-level one.
        assert_eq!(
            topo.node_state("alpha.two.b").unwrap().latency,
            Duration::from_millis(7)
        );
    }
}
