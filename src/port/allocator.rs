//! TCP port discovery and readiness polling.
//!
//! Probing is done by connecting, not binding: a port counts as taken when
//! something accepts a connection on `localhost:<port>`. This matches how the
//! dev servers are reached later (through the proxy, over localhost), and it
//! works no matter which address family the child process chose to listen on.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Deadline for a single connect probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Interval between probes in [`wait_ready`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Number of consecutive ports [`find_free`] inspects.
pub const SCAN_WIDTH: u16 = 100;

/// Offset returned by [`find_free`] when the whole scan range is taken.
pub const FALLBACK_OFFSET: u16 = 1000;

/// Whether something accepts TCP connections on `localhost:port`.
pub async fn is_bound(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(("localhost", port))).await,
        Ok(Ok(_))
    )
}

/// First unbound port in `start..start+100`.
///
/// When every port in the range is taken this returns `start + 1000` without
/// probing it. The result is advisory: another process can still grab the
/// port before the child binds it.
pub async fn find_free(start: u16) -> u16 {
    let end = start.saturating_add(SCAN_WIDTH - 1);
    for port in start..=end {
        if port == 0 {
            continue;
        }
        if !is_bound(port).await {
            return port;
        }
        tracing::debug!("Port {} is in use, trying next", port);
    }

    let fallback = start.saturating_add(FALLBACK_OFFSET);
    tracing::warn!(
        "No free port in {}..={}, falling back to {}",
        start,
        end,
        fallback
    );
    fallback
}

/// Poll [`is_bound`] every 500ms until the port is bound or `max_wait` elapses.
pub async fn wait_ready(port: u16, max_wait: Duration) -> bool {
    let deadline = Instant::now() + max_wait;
    loop {
        if is_bound(port).await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

/// Ports used for one orchestrator run. Fixed once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortAssignment {
    pub proxy: u16,
    pub frontend: u16,
    pub backend: u16,
}

impl PortAssignment {
    /// Build an assignment, rejecting zero or duplicate ports.
    pub fn new(proxy: u16, frontend: u16, backend: u16) -> Result<Self> {
        let ports = [proxy, frontend, backend];
        if ports.contains(&0) {
            return Err(Error::PortAllocation(format!(
                "port 0 is not assignable (proxy={}, frontend={}, backend={})",
                proxy, frontend, backend
            )));
        }
        let distinct: HashSet<u16> = ports.iter().copied().collect();
        if distinct.len() != ports.len() {
            return Err(Error::PortAllocation(format!(
                "ports must be distinct (proxy={}, frontend={}, backend={})",
                proxy, frontend, backend
            )));
        }
        Ok(Self {
            proxy,
            frontend,
            backend,
        })
    }

    /// Assign frontend from `proxy + 1` upward, then backend from `frontend + 1` upward.
    pub async fn allocate(proxy: u16) -> Result<Self> {
        if proxy == u16::MAX {
            return Err(Error::PortAllocation(format!(
                "proxy port {} leaves no room for the frontend and backend",
                proxy
            )));
        }
        let frontend = find_free(proxy + 1).await;
        let backend = find_free(frontend.saturating_add(1)).await;
        Self::new(proxy, frontend, backend)
    }

    pub fn all(&self) -> [u16; 3] {
        [self.proxy, self.frontend, self.backend]
    }
}

impl std::fmt::Display for PortAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "proxy={} frontend={} backend={}",
            self.proxy, self.frontend, self.backend
        )
    }
}
