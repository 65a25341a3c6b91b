//! Reverse proxy in front of the frontend and backend dev servers.
//!
//! One routing rule: `/api` and everything under `/api/` goes to the
//! backend, all other paths go to the frontend. Bodies stream through
//! unbuffered. HTTP/1.1 upgrades (the dev server's HMR WebSocket) are
//! tunnelled by splicing the two upgraded connections together.
//!
//! Stopping is two-phase: first stop accepting and let requests drain, then
//! at the deadline close everything still open (tunnels, streaming bodies
//! such as SSE, requests still waiting on an upstream).

use crate::error::{Error, Result};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, Uri},
    Router,
};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

pub const API_PREFIX: &str = "/api";

/// Deadline for in-flight requests when the proxy stops.
pub const PROXY_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// How long connections get to wind down after being force-closed.
const FORCE_CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Hop-by-hop headers, never forwarded as-is.
const HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Frontend,
    Backend,
}

/// Pick the upstream for a request path.
pub fn route_for(path: &str) -> Upstream {
    match path.strip_prefix(API_PREFIX) {
        Some("") => Upstream::Backend,
        Some(rest) if rest.starts_with('/') => Upstream::Backend,
        _ => Upstream::Frontend,
    }
}

#[derive(Clone)]
struct ProxyState {
    client: Client<HttpConnector, Body>,
    frontend_port: u16,
    backend_port: u16,
    /// Cancelled when the drain deadline passes.
    closing: CancellationToken,
}

impl ProxyState {
    fn port_for(&self, upstream: Upstream) -> u16 {
        match upstream {
            Upstream::Frontend => self.frontend_port,
            Upstream::Backend => self.backend_port,
        }
    }
}

/// Proxy configuration. Call [`bind`](Self::bind) to start serving.
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    listen: SocketAddr,
    frontend_port: u16,
    backend_port: u16,
}

impl ReverseProxy {
    /// Proxy listening on all interfaces at `port`.
    pub fn new(port: u16, frontend_port: u16, backend_port: u16) -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            frontend_port,
            backend_port,
        }
    }

    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen = addr;
        self
    }

    /// Bind the listener and serve in a background task.
    ///
    /// Bind failures are returned here; errors after that are logged.
    pub async fn bind(self) -> Result<ProxyHandle> {
        let listener = TcpListener::bind(self.listen)
            .await
            .map_err(|e| Error::ProxyBind {
                port: self.listen.port(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        let closing = CancellationToken::new();
        let state = ProxyState {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            frontend_port: self.frontend_port,
            backend_port: self.backend_port,
            closing: closing.clone(),
        };
        let app = Router::new().fallback(forward).with_state(state);

        let graceful = CancellationToken::new();
        let stop = graceful.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await;
            if let Err(e) = &result {
                tracing::error!("Proxy server error: {}", e);
            }
            result
        });

        tracing::debug!(
            "Proxy listening on {} (frontend :{}, backend :{})",
            local_addr,
            self.frontend_port,
            self.backend_port
        );

        Ok(ProxyHandle {
            local_addr,
            graceful,
            closing,
            task: Some(task),
        })
    }
}

/// A running proxy.
pub struct ProxyHandle {
    local_addr: SocketAddr,
    graceful: CancellationToken,
    closing: CancellationToken,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl ProxyHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting, let in-flight requests finish within `timeout`, then
    /// force-close whatever remains. Idempotent.
    pub async fn shutdown(&mut self, timeout: Duration) {
        self.graceful.cancel();
        let Some(mut task) = self.task.take() else {
            self.closing.cancel();
            return;
        };

        let drained = tokio::time::timeout(timeout, &mut task).await;
        let finished = match drained {
            Ok(finished) => finished,
            Err(_) => {
                tracing::warn!(
                    "Proxy did not drain within {:?}, closing connections",
                    timeout
                );
                self.closing.cancel();
                match tokio::time::timeout(FORCE_CLOSE_GRACE, &mut task).await {
                    Ok(finished) => finished,
                    Err(_) => {
                        task.abort();
                        tracing::warn!("Proxy connections still open, aborted");
                        return;
                    }
                }
            }
        };
        self.closing.cancel();

        match finished {
            Ok(Ok(())) => tracing::debug!("Proxy stopped"),
            Ok(Err(e)) => tracing::warn!("Proxy stopped with error: {}", e),
            Err(e) => tracing::warn!("Proxy task failed: {}", e),
        }
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.graceful.cancel();
        self.closing.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn forward(
    State(state): State<ProxyState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut req: Request<Body>,
) -> Response<Body> {
    let upstream = route_for(req.uri().path());
    let port = state.port_for(upstream);

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri: Uri = match format!("http://localhost:{}{}", port, path_and_query).parse() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::debug!("Rejecting request with unusable URI {}: {}", req.uri(), e);
            return error_response(StatusCode::BAD_REQUEST);
        }
    };

    let upgrade = upgrade_protocol(req.headers());
    let client_upgrade = upgrade.is_some().then(|| hyper::upgrade::on(&mut req));

    *req.uri_mut() = uri;
    strip_hop_headers(req.headers_mut());
    if let Some(protocol) = &upgrade {
        req.headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
        req.headers_mut().insert(header::UPGRADE, protocol.clone());
    }
    append_forwarded_for(req.headers_mut(), peer);

    let sent = tokio::select! {
        sent = state.client.request(req) => sent,
        _ = state.closing.cancelled() => return error_response(StatusCode::SERVICE_UNAVAILABLE),
    };
    let mut resp = match sent {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!("Proxy error forwarding to {:?} on port {}: {}", upstream, port, e);
            return error_response(StatusCode::BAD_GATEWAY);
        }
    };

    if resp.status() == StatusCode::SWITCHING_PROTOCOLS {
        if let Some(client_upgrade) = client_upgrade {
            let upstream_upgrade = hyper::upgrade::on(&mut resp);
            tokio::spawn(tunnel(client_upgrade, upstream_upgrade, state.closing.clone()));
        }
        return resp.map(Body::new);
    }

    strip_hop_headers(resp.headers_mut());
    let closing = state.closing.clone();
    resp.map(|body| {
        // Long-lived streams (SSE) end when the proxy is force-closed
        let stream = Body::new(body)
            .into_data_stream()
            .take_until(closing.cancelled_owned());
        Body::from_stream(stream)
    })
}

async fn tunnel(
    client: hyper::upgrade::OnUpgrade,
    upstream: hyper::upgrade::OnUpgrade,
    closed: CancellationToken,
) {
    let (client, upstream) = match tokio::try_join!(client, upstream) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::debug!("Upgrade failed: {}", e);
            return;
        }
    };
    let mut client = TokioIo::new(client);
    let mut upstream = TokioIo::new(upstream);

    tokio::select! {
        result = tokio::io::copy_bidirectional(&mut client, &mut upstream) => {
            if let Err(e) = result {
                tracing::trace!("Tunnel closed: {}", e);
            }
        }
        _ = closed.cancelled() => tracing::trace!("Tunnel closed by shutdown"),
    }
}

fn upgrade_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    let wants_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if wants_upgrade {
        headers.get(header::UPGRADE).cloned()
    } else {
        None
    }
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    // Headers named in Connection are hop-by-hop too
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, ip),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

fn error_response(status: StatusCode) -> Response<Body> {
    let mut resp = Response::new(Body::from(
        status.canonical_reason().unwrap_or("Error").to_string(),
    ));
    *resp.status_mut() = status;
    resp
}
