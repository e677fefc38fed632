//! User-facing dial and listen helpers.
//!
//! A [`Dialer`] simulates the network between its configured client
//! location and the target's server port: the dial itself is delayed by
//! the (round-trip) dial verdict and fails when the verdict says the path
//! is down. A [`Listener`] registers its bound port as a server port so
//! that dial verdicts against it come back OK.

use super::error::{ConnError, ConnResult};
use super::wrapper::FaultConn;
use crate::control::ControlClient;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Default dial timeout when none is configured.
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Dials through the simulated network from a fixed client location.
#[derive(Debug, Clone)]
pub struct Dialer {
    client_name: String,
    control: ControlClient,
    timeout: Duration,
}

impl Dialer {
    /// Create a dialer for the host at dotted name `client_name`.
    ///
    /// A zero `timeout` selects the default of three minutes.
    pub fn new(client_name: impl Into<String>, control: ControlClient, timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() {
            DEFAULT_DIAL_TIMEOUT
        } else {
            timeout
        };
        Dialer {
            client_name: client_name.into(),
            control,
            timeout,
        }
    }

    /// Dial `addr` (host:port) through the simulated network.
    ///
    /// Blocks for the dial verdict's latency before connecting; fails with
    /// [`ConnError::Fault`] when the verdict is not OK, and with
    /// [`ConnError::DialTimeout`] when the delay outlives the timeout.
    /// The connection's local port is registered as a client port under
    /// this dialer's name; deregistering it on close is left to the
    /// caller.
    pub async fn dial(&self, addr: &str) -> ConnResult<FaultConn> {
        let server_port = port_of(addr)?;
        let verdict = self
            .control
            .dial_state(&self.client_name, server_port)
            .await
            .map_err(|e| ConnError::Control(e.to_string()))?;

        tokio::select! {
            _ = tokio::time::sleep(verdict.latency) => {}
            _ = tokio::time::sleep(self.timeout) => return Err(ConnError::DialTimeout),
        }
        if !verdict.ok {
            return Err(ConnError::Fault);
        }

        let stream = TcpStream::connect(addr).await?;
        let client_port = stream.local_addr()?.port();
        self.control
            .client_connected(&self.client_name, client_port)
            .await
            .map_err(|e| ConnError::Control(e.to_string()))?;
        debug!(
            client = %self.client_name,
            client_port, server_port, "dial complete"
        );
        FaultConn::new(stream, client_port, server_port, self.control.clone()).await
    }
}

/// A TCP listener whose bound port is registered as a server port.
pub struct Listener {
    inner: TcpListener,
    name: String,
    port: u16,
    control: ControlClient,
}

impl Listener {
    /// Bind `addr` and register the bound port as a server port on the
    /// host at dotted name `name`.
    pub async fn bind(addr: &str, name: &str, control: ControlClient) -> ConnResult<Listener> {
        let inner = TcpListener::bind(addr).await?;
        let port = inner.local_addr()?.port();
        control
            .server_started(name, port)
            .await
            .map_err(|e| ConnError::Control(e.to_string()))?;
        Ok(Listener {
            inner,
            name: name.to_string(),
            port,
            control,
        })
    }

    /// Accept a downstream connection.
    ///
    /// The accepted stream is returned as-is: latency and failure are
    /// injected on the dialing side.
    pub async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept().await
    }

    /// The bound local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// The registered server port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Close the listener and deregister its server port.
    pub async fn close(self) -> ConnResult<()> {
        drop(self.inner);
        self.control
            .server_stopped(&self.name, self.port)
            .await
            .map_err(|e| ConnError::Control(e.to_string()))
    }
}

fn port_of(addr: &str) -> ConnResult<u16> {
    addr.rsplit(':')
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .filter(|p| *p != 0)
        .ok_or_else(|| ConnError::InvalidAddr(addr.to_string()))
}
