//! The embedded proxy server.
//!
//! A proxy listens on a local TCP port registered as a server port under
//! `proxy_name`. Each accepted downstream is spliced onto a fault-wrapped
//! connection to the origin; the downstream's remote port is registered as
//! a client port under the proxy's current `client_name`, so the verdict
//! between `client_name` and `proxy_name` governs the spliced traffic.
//!
//! `client_name` is mutable at runtime: new connections pick up the new
//! name, already-registered connections are unaffected.

use super::error::{ProxyError, ProxyResult};
use crate::conn::FaultConn;
use crate::control::ControlClient;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Timeout for dialing the origin behind the proxy.
const ORIGIN_DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Copy-buffer size for the splice loops.
const SPLICE_BUF: usize = 4 * 1024;

/// A running embedded proxy.
pub struct ProxyServer {
    client_name: Arc<RwLock<String>>,
    proxy_name: String,
    proxy_port: u16,
    control: ControlClient,
    shutdown_tx: watch::Sender<bool>,
}

impl ProxyServer {
    /// Bind `localhost:proxy_port`, register it as a server port under
    /// `proxy_name`, and start accepting.
    pub async fn start(
        client_name: &str,
        proxy_name: &str,
        proxy_port: u16,
        origin_addr: &str,
        control: ControlClient,
    ) -> ProxyResult<ProxyServer> {
        let listener = TcpListener::bind(("127.0.0.1", proxy_port))
            .await
            .map_err(|source| ProxyError::Bind {
                port: proxy_port,
                source,
            })?;
        control
            .server_started(proxy_name, proxy_port)
            .await
            .map_err(|e| ProxyError::Control(e.to_string()))?;

        let client_name = Arc::new(RwLock::new(client_name.to_string()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(accept_loop(
            listener,
            client_name.clone(),
            proxy_port,
            origin_addr.to_string(),
            control.clone(),
            shutdown_rx,
        ));

        info!(proxy_name, proxy_port, origin_addr, "proxy started");
        Ok(ProxyServer {
            client_name,
            proxy_name: proxy_name.to_string(),
            proxy_port,
            control,
            shutdown_tx,
        })
    }

    /// The simulated location assigned to future downstreams.
    pub fn client_name(&self) -> String {
        self.client_name.read().unwrap().clone()
    }

    /// Change the simulated location assigned to future downstreams.
    /// Connections already registered keep their old name.
    pub fn set_client_name(&self, name: &str) {
        *self.client_name.write().unwrap() = name.to_string();
        info!(proxy_port = self.proxy_port, name, "proxy client name updated");
    }

    /// The port this proxy listens on.
    pub fn port(&self) -> u16 {
        self.proxy_port
    }

    /// Stop accepting and deregister the proxy's server port.
    pub async fn stop(&self) -> ProxyResult<()> {
        self.shutdown_tx.send_replace(true);
        self.control
            .server_stopped(&self.proxy_name, self.proxy_port)
            .await
            .map_err(|e| ProxyError::Control(e.to_string()))?;
        info!(proxy_port = self.proxy_port, "proxy stopped");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    client_name: Arc<RwLock<String>>,
    proxy_port: u16,
    origin_addr: String,
    control: ControlClient,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((downstream, peer)) => {
                        let name = client_name.read().unwrap().clone();
                        tokio::spawn(handle_downstream(
                            downstream,
                            peer,
                            name,
                            proxy_port,
                            origin_addr.clone(),
                            control.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(proxy_port, "proxy accept failed: {e}");
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!(proxy_port, "proxy accept loop stopping");
                    return;
                }
            }
        }
    }
}

async fn handle_downstream(
    downstream: TcpStream,
    peer: SocketAddr,
    client_name: String,
    proxy_port: u16,
    origin_addr: String,
    control: ControlClient,
) {
    let origin = match tokio::time::timeout(ORIGIN_DIAL_TIMEOUT, TcpStream::connect(&origin_addr))
        .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(%origin_addr, "origin dial failed: {e}");
            return;
        }
        Err(_) => {
            warn!(%origin_addr, "origin dial timed out");
            return;
        }
    };

    let client_port = peer.port();
    if let Err(e) = control.client_connected(&client_name, client_port).await {
        warn!(%client_name, client_port, "client registration failed: {e}");
        return;
    }

    // Delay and failure are injected on the origin side; the downstream
    // stays a plain socket.
    let upstream = match FaultConn::new(origin, client_port, proxy_port, control.clone()).await {
        Ok(conn) => Arc::new(conn),
        Err(e) => {
            warn!(client_port, proxy_port, "failed to wrap origin: {e}");
            let _ = control.client_disconnected(client_port).await;
            return;
        }
    };
    debug!(%client_name, client_port, proxy_port, "proxying connection");

    let (down_read, down_write) = downstream.into_split();
    let mut to_origin = tokio::spawn(copy_to_upstream(down_read, upstream.clone()));
    let mut to_downstream = tokio::spawn(copy_to_downstream(upstream.clone(), down_write));

    // Either direction finishing tears the whole splice down.
    tokio::select! {
        _ = &mut to_origin => {}
        _ = &mut to_downstream => {}
    }
    upstream.close();
    to_origin.abort();
    to_downstream.abort();

    if let Err(e) = control.client_disconnected(client_port).await {
        warn!(client_port, "client deregistration failed: {e}");
    }
    debug!(client_port, proxy_port, "proxy connection finished");
}

async fn copy_to_upstream(mut down: OwnedReadHalf, up: Arc<FaultConn>) {
    let mut buf = [0u8; SPLICE_BUF];
    loop {
        match down.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if up.write(&buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn copy_to_downstream(up: Arc<FaultConn>, mut down: OwnedWriteHalf) {
    let mut buf = [0u8; SPLICE_BUF];
    loop {
        match up.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if down.write_all(&buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_name_mutation_takes_lock() {
        let name = Arc::new(RwLock::new("animal.air.eagle".to_string()));
        let (shutdown_tx, _) = watch::channel(false);
        let proxy = ProxyServer {
            client_name: name,
            proxy_name: "matter.metal.gold".to_string(),
            proxy_port: 6577,
            control: ControlClient::new("127.0.0.1:8989"),
            shutdown_tx,
        };

        assert_eq!(proxy.client_name(), "animal.air.eagle");
        proxy.set_client_name("matter.metal.gold");
        assert_eq!(proxy.client_name(), "matter.metal.gold");
    }
}
