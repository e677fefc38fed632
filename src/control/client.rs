//! Caller-side façade over the control service.
//!
//! The client is a plain value: it carries the control address explicitly,
//! so several control services can coexist in one process and a test can
//! retarget at will. Connection wrappers use it to read verdicts, register
//! ports, and long-poll for updates; user code uses it to drive the
//! topology.

use super::error::{ControlError, ControlResult};
use crate::topology::{ConnState, NodeState, TopologyConfig};
use reqwest::header::IF_NONE_MATCH;
use reqwest::{Method, StatusCode};
use std::net::SocketAddr;

/// HTTP client for the control service.
#[derive(Debug, Clone)]
pub struct ControlClient {
    addr: String,
    http: reqwest::Client,
}

impl ControlClient {
    /// Create a client for the control service at `addr`
    /// (e.g. `127.0.0.1:8989`).
    pub fn new(addr: impl Into<String>) -> Self {
        ControlClient {
            addr: addr.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Create a client from a bound socket address.
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self::new(addr.to_string())
    }

    /// The control service address this client targets.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn expect_ok(resp: reqwest::Response) -> ControlResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let message = resp.text().await.unwrap_or_default();
            Err(ControlError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn port_request(
        &self,
        method: Method,
        path: &str,
        name: Option<&str>,
        port: u16,
    ) -> ControlResult<()> {
        let mut query = vec![("port", port.to_string())];
        if let Some(name) = name {
            query.push(("name", name.to_string()));
        }
        let resp = self
            .http
            .request(method, self.url(path))
            .query(&query)
            .send()
            .await?;
        Self::expect_ok(resp).await?;
        Ok(())
    }

    /// Register a server port; call after opening a listener.
    pub async fn server_started(&self, name: &str, port: u16) -> ControlResult<()> {
        self.port_request(Method::POST, "/serverPort", Some(name), port)
            .await
    }

    /// Unregister a server port; call after closing a listener.
    pub async fn server_stopped(&self, name: &str, port: u16) -> ControlResult<()> {
        self.port_request(Method::DELETE, "/serverPort", Some(name), port)
            .await
    }

    /// Register a client port; call after establishing a connection.
    pub async fn client_connected(&self, name: &str, port: u16) -> ControlResult<()> {
        self.port_request(Method::POST, "/clientPort", Some(name), port)
            .await
    }

    /// Unregister a client port; call after closing a connection.
    pub async fn client_disconnected(&self, port: u16) -> ControlResult<()> {
        self.port_request(Method::DELETE, "/clientPort", None, port)
            .await
    }

    /// Fetch the dial verdict used to delay or fail a prospective dial.
    pub async fn dial_state(&self, client_name: &str, server_port: u16) -> ControlResult<ConnState> {
        let resp = self
            .http
            .get(self.url("/dialState"))
            .query(&[
                ("clientName", client_name.to_string()),
                ("serverPort", server_port.to_string()),
            ])
            .send()
            .await?;
        let resp = Self::expect_ok(resp).await?;
        Ok(resp.json().await?)
    }

    /// Fetch the verdict for an established connection.
    ///
    /// With `old` supplied the request long-polls: the service holds it for
    /// up to a few seconds waiting for a topology change, and an
    /// "unchanged" response maps back to `old`.
    pub async fn conn_state(
        &self,
        client_port: u16,
        server_port: u16,
        old: Option<&ConnState>,
    ) -> ControlResult<ConnState> {
        let mut req = self.http.get(self.url("/connState")).query(&[
            ("clientPort", client_port.to_string()),
            ("serverPort", server_port.to_string()),
        ]);
        if let Some(old) = old {
            req = req.header(IF_NONE_MATCH, serde_json::to_string(old)?);
        }
        let resp = req.send().await?;
        if resp.status() == StatusCode::NOT_MODIFIED {
            return match old {
                Some(old) => Ok(*old),
                None => Err(ControlError::Api {
                    status: StatusCode::NOT_MODIFIED.as_u16(),
                    message: "unconditional request answered 304".to_string(),
                }),
            };
        }
        let resp = Self::expect_ok(resp).await?;
        Ok(resp.json().await?)
    }

    /// Read the state of a node addressed by dotted name.
    pub async fn node_state(&self, name: &str) -> ControlResult<NodeState> {
        let resp = self
            .http
            .get(self.url("/nodeState"))
            .query(&[("name", name)])
            .send()
            .await?;
        let resp = Self::expect_ok(resp).await?;
        Ok(resp.json().await?)
    }

    /// Replace the state of a node addressed by dotted name. A zero latency
    /// leaves the node's latency unchanged.
    pub async fn set_node_state(&self, name: &str, state: NodeState) -> ControlResult<()> {
        let resp = self
            .http
            .post(self.url("/nodeState"))
            .query(&[("name", name)])
            .json(&state)
            .send()
            .await?;
        Self::expect_ok(resp).await?;
        Ok(())
    }

    /// Replace the whole topology with a new configuration document.
    pub async fn set_config(&self, config: &TopologyConfig) -> ControlResult<()> {
        let resp = self
            .http
            .post(self.url("/config"))
            .json(config)
            .send()
            .await?;
        Self::expect_ok(resp).await?;
        Ok(())
    }

    /// Start an embedded proxy in the control-service process.
    ///
    /// `client_name` is the simulated location assigned to every downstream
    /// that connects to the proxy; `proxy_name` is the simulated location
    /// of the proxy port itself.
    pub async fn start_proxy(
        &self,
        client_name: &str,
        proxy_name: &str,
        proxy_port: u16,
        origin_addr: &str,
    ) -> ControlResult<()> {
        let resp = self
            .http
            .post(self.url("/proxy"))
            .query(&[
                ("clientName", client_name.to_string()),
                ("proxyName", proxy_name.to_string()),
                ("proxyPort", proxy_port.to_string()),
                ("originAddr", origin_addr.to_string()),
            ])
            .send()
            .await?;
        Self::expect_ok(resp).await?;
        Ok(())
    }

    /// Change the simulated location assigned to future downstreams of a
    /// running proxy. Existing connections keep their registration.
    pub async fn update_proxy(&self, client_name: &str, proxy_port: u16) -> ControlResult<()> {
        let resp = self
            .http
            .request(Method::PUT, self.url("/proxy"))
            .query(&[
                ("clientName", client_name.to_string()),
                ("proxyPort", proxy_port.to_string()),
            ])
            .send()
            .await?;
        Self::expect_ok(resp).await?;
        Ok(())
    }

    /// Stop a running proxy.
    pub async fn stop_proxy(&self, proxy_port: u16) -> ControlResult<()> {
        let resp = self
            .http
            .request(Method::DELETE, self.url("/proxy"))
            .query(&[("proxyPort", proxy_port.to_string())])
            .send()
            .await?;
        Self::expect_ok(resp).await?;
        Ok(())
    }
}
