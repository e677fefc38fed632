//! The control service: an HTTP dispatcher over the topology and the
//! embedded-proxy registry.
//!
//! The service holds the current topology behind a read-write lock so a
//! configuration replacement can swap it atomically; handlers snapshot the
//! `Arc` and never hold the lock across a wait. Conditional `connState`
//! requests long-poll against the topology's update epoch for up to
//! [`LONG_POLL_WAIT`] before answering "unchanged".

use super::client::ControlClient;
use super::error::ControlResult;
use crate::proxy::ProxyServer;
use crate::topology::{ConnState, NodeState, Topology, TopologyConfig, TopologyError};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::IF_NONE_MATCH;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// How long a conditional `connState` request is held waiting for a
/// topology change before answering "unchanged".
pub const LONG_POLL_WAIT: Duration = Duration::from_secs(3);

struct ServerState {
    topo: RwLock<Arc<Topology>>,
    proxies: Mutex<HashMap<u16, ProxyServer>>,
    /// Client pointing back at this service; handed to embedded proxies so
    /// their registrations and verdict polls go through the same interface
    /// as everyone else's.
    control: ControlClient,
}

impl ServerState {
    fn topology(&self) -> Arc<Topology> {
        self.topo.read().unwrap().clone()
    }
}

/// The control service, bound to a local TCP address.
pub struct ControlServer {
    state: Arc<ServerState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ControlServer {
    /// Bind the service with the built-in default topology.
    pub async fn bind(addr: &str) -> ControlResult<Self> {
        Self::bind_with_config(addr, &TopologyConfig::default()).await
    }

    /// Bind the service with an explicit initial topology document.
    pub async fn bind_with_config(addr: &str, config: &TopologyConfig) -> ControlResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let state = Arc::new(ServerState {
            topo: RwLock::new(Arc::new(Topology::from_config(config))),
            proxies: Mutex::new(HashMap::new()),
            control: ControlClient::from_addr(local_addr),
        });
        Ok(ControlServer {
            state,
            listener,
            local_addr,
        })
    }

    /// The address the service is bound to (useful after binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A control client targeting this service.
    pub fn client(&self) -> ControlClient {
        self.state.control.clone()
    }

    /// Serve requests until the shutdown signal flips.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> ControlResult<()> {
        info!("control service listening on {}", self.local_addr);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _peer)) => {
                            let state = self.state.clone();
                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let state = state.clone();
                                    async move {
                                        Ok::<_, Infallible>(handle_request(state, req).await)
                                    }
                                });
                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service)
                                    .await
                                {
                                    debug!("control connection ended: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            warn!("failed to accept control connection: {e}");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("control service shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

async fn handle_request(state: Arc<ServerState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    match (path.as_str(), method.as_str()) {
        ("/config", "POST") => replace_config(&state, req).await,
        ("/connState", "GET") => conn_state_route(&state, req).await,
        ("/dialState", "GET") => dial_state_route(&state, req).await,
        ("/nodeState", "GET") => node_state_get(&state, req),
        ("/nodeState", "POST") => node_state_set(&state, req).await,
        ("/serverPort", "POST") | ("/serverPort", "DELETE") => {
            server_port_route(&state, req, &method)
        }
        ("/clientPort", "POST") | ("/clientPort", "DELETE") => {
            client_port_route(&state, req, &method)
        }
        ("/proxy", "POST") | ("/proxy", "PUT") | ("/proxy", "DELETE") => {
            proxy_route(&state, req, &method).await
        }
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    }
}

fn server_port_route(
    state: &Arc<ServerState>,
    req: Request<Incoming>,
    method: &str,
) -> Response<Full<Bytes>> {
    let q = query_params(req.uri());
    let port = match required_port(&q, "port") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let name = match required_str(&q, "name") {
        Ok(n) => n,
        Err(resp) => return resp,
    };
    let topo = state.topology();
    let result = if method == "POST" {
        topo.add_server_port(&name, port)
    } else {
        topo.remove_server_port(&name, port)
    };
    match result {
        Ok(()) => empty_ok(),
        Err(e) => topo_fail(&e),
    }
}

fn client_port_route(
    state: &Arc<ServerState>,
    req: Request<Incoming>,
    method: &str,
) -> Response<Full<Bytes>> {
    let q = query_params(req.uri());
    let port = match required_port(&q, "port") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let topo = state.topology();
    let result = if method == "POST" {
        let name = match required_str(&q, "name") {
            Ok(n) => n,
            Err(resp) => return resp,
        };
        topo.add_client_port(&name, port)
    } else {
        topo.remove_client_port(port)
    };
    match result {
        Ok(()) => empty_ok(),
        Err(e) => topo_fail(&e),
    }
}

async fn dial_state_route(
    state: &Arc<ServerState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let q = query_params(req.uri());
    let client_name = match required_str(&q, "clientName") {
        Ok(n) => n,
        Err(resp) => return resp,
    };
    let server_port = match required_port(&q, "serverPort") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.topology().dial_state(&client_name, server_port) {
        Ok(verdict) => json_response(&verdict),
        Err(e) => topo_fail(&e),
    }
}

async fn conn_state_route(
    state: &Arc<ServerState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let q = query_params(req.uri());
    let client_port = match required_port(&q, "clientPort") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let server_port = match required_port(&q, "serverPort") {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    // Snapshot the topology and subscribe to its epoch before computing,
    // so a mutation between the computation and the wait still wakes us.
    let topo = state.topology();
    let mut update_rx = topo.update_rx();
    let mut current = match topo.conn_state(client_port, server_port) {
        Ok(verdict) => verdict,
        Err(e) => return topo_fail(&e),
    };

    let old_header = req
        .headers()
        .get(IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let Some(old_raw) = old_header else {
        return json_response(&current);
    };
    let old: ConnState = match serde_json::from_str(&old_raw) {
        Ok(s) => s,
        Err(_) => return fail(StatusCode::BAD_REQUEST, "invalid If-None-Match header"),
    };

    if old == current {
        tokio::select! {
            _ = tokio::time::sleep(LONG_POLL_WAIT) => {}
            _ = update_rx.changed() => {
                // A port may have vanished meanwhile; degrade to the zero
                // verdict so the caller can short-circuit.
                current = topo
                    .conn_state(client_port, server_port)
                    .unwrap_or_default();
            }
        }
    }

    if old == current {
        Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .body(Full::new(Bytes::new()))
            .unwrap()
    } else {
        json_response(&current)
    }
}

fn node_state_get(state: &Arc<ServerState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let q = query_params(req.uri());
    let name = match required_str(&q, "name") {
        Ok(n) => n,
        Err(resp) => return resp,
    };
    match state.topology().node_state(&name) {
        Ok(node) => json_response(&node),
        Err(e) => topo_fail(&e),
    }
}

async fn node_state_set(state: &Arc<ServerState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let q = query_params(req.uri());
    let name = match required_str(&q, "name") {
        Ok(n) => n,
        Err(resp) => return resp,
    };
    let body = match req.into_body().collect().await {
        Ok(body) => body.to_bytes(),
        Err(e) => return fail(StatusCode::BAD_REQUEST, &format!("failed to read body: {e}")),
    };
    let new: NodeState = match serde_json::from_slice(&body) {
        Ok(s) => s,
        Err(e) => return fail(StatusCode::BAD_REQUEST, &format!("invalid node state: {e}")),
    };
    match state.topology().set_node_state(&name, new) {
        Ok(()) => empty_ok(),
        Err(e) => topo_fail(&e),
    }
}

async fn replace_config(state: &Arc<ServerState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(body) => body.to_bytes(),
        Err(e) => return fail(StatusCode::BAD_REQUEST, &format!("failed to read body: {e}")),
    };
    let config: TopologyConfig = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(e) => return fail(StatusCode::BAD_REQUEST, &format!("invalid config: {e}")),
    };

    // Build the replacement fully before touching the lock: a bad document
    // must not leave a partially-applied topology behind.
    let new = Arc::new(Topology::from_config(&config));
    let old = {
        let mut guard = state.topo.write().unwrap();
        std::mem::replace(&mut *guard, new)
    };
    // Wake every long-poll still parked on the outgoing topology; their
    // callers retry against the new one.
    old.rotate();
    info!("topology configuration replaced");
    empty_ok()
}

async fn proxy_route(
    state: &Arc<ServerState>,
    req: Request<Incoming>,
    method: &str,
) -> Response<Full<Bytes>> {
    let q = query_params(req.uri());
    let proxy_port = match required_port(&q, "proxyPort") {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match method {
        "POST" => {
            let client_name = match required_str(&q, "clientName") {
                Ok(n) => n,
                Err(resp) => return resp,
            };
            let proxy_name = match required_str(&q, "proxyName") {
                Ok(n) => n,
                Err(resp) => return resp,
            };
            let origin_addr = match required_str(&q, "originAddr") {
                Ok(n) => n,
                Err(resp) => return resp,
            };
            let mut proxies = state.proxies.lock().await;
            if proxies.contains_key(&proxy_port) {
                return fail(StatusCode::CONFLICT, "proxy port is taken");
            }
            match ProxyServer::start(
                &client_name,
                &proxy_name,
                proxy_port,
                &origin_addr,
                state.control.clone(),
            )
            .await
            {
                Ok(proxy) => {
                    proxies.insert(proxy_port, proxy);
                    empty_ok()
                }
                Err(e) => fail(StatusCode::BAD_REQUEST, &e.to_string()),
            }
        }
        "PUT" => {
            let client_name = match required_str(&q, "clientName") {
                Ok(n) => n,
                Err(resp) => return resp,
            };
            let proxies = state.proxies.lock().await;
            match proxies.get(&proxy_port) {
                Some(proxy) => {
                    proxy.set_client_name(&client_name);
                    empty_ok()
                }
                None => fail(StatusCode::NOT_FOUND, "proxy server not found"),
            }
        }
        "DELETE" => {
            let mut proxies = state.proxies.lock().await;
            match proxies.remove(&proxy_port) {
                Some(proxy) => {
                    if let Err(e) = proxy.stop().await {
                        warn!("error stopping proxy on {proxy_port}: {e}");
                    }
                    empty_ok()
                }
                None => fail(StatusCode::NOT_FOUND, "proxy server not found"),
            }
        }
        _ => unreachable!("routed methods only"),
    }
}

fn query_params(uri: &hyper::Uri) -> HashMap<String, String> {
    uri.query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

fn required_str(q: &HashMap<String, String>, key: &str) -> Result<String, Response<Full<Bytes>>> {
    match q.get(key) {
        Some(v) if !v.is_empty() => Ok(v.clone()),
        _ => Err(fail(StatusCode::BAD_REQUEST, &format!("'{key}' required"))),
    }
}

fn required_port(q: &HashMap<String, String>, key: &str) -> Result<u16, Response<Full<Bytes>>> {
    match q.get(key).and_then(|v| v.parse::<u16>().ok()) {
        Some(p) if p != 0 => Ok(p),
        _ => Err(fail(StatusCode::BAD_REQUEST, &format!("'{key}' required"))),
    }
}

fn status_for(err: &TopologyError) -> StatusCode {
    match err {
        TopologyError::NotFound(_) | TopologyError::NotAHost(_) | TopologyError::UnknownPort(_) => {
            StatusCode::NOT_FOUND
        }
        TopologyError::InvalidName(_) => StatusCode::BAD_REQUEST,
        TopologyError::PortTaken(_) | TopologyError::RoleMismatch { .. } => StatusCode::CONFLICT,
    }
}

fn topo_fail(err: &TopologyError) -> Response<Full<Bytes>> {
    fail(status_for(err), &err.to_string())
}

fn fail(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    warn!("control request rejected ({status}): {message}");
    text_response(status, message)
}

fn text_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(message.to_string())))
        .unwrap()
}

fn json_response<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).expect("wire types serialize");
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn empty_ok() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .body(Full::new(Bytes::new()))
        .unwrap()
}
