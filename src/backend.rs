//! Backend server lifecycle.
//!
//! The backend is restarted from two places at once: the file watcher's
//! reload pipeline and the shutdown path. All lifecycle changes go through
//! one async mutex, so a stop always completes before the next start and at
//! most one backend process is alive at any moment.

use crate::error::{Error, Result};
use crate::logfmt;
use crate::process::{LaunchSpec, LineSink, Spawner, Supervised};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Grace period between SIGTERM and SIGKILL for the backend.
pub const BACKEND_STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Command that builds and runs the backend server.
pub const BACKEND_COMMAND: &[&str] = &["go", "run", "./cmd/server"];

pub struct BackendSupervisor {
    spawner: Arc<dyn Spawner>,
    project_root: PathBuf,
    port: u16,
    stop_timeout: Duration,
    command: Vec<String>,
    sink: Option<LineSink>,
    current: Mutex<Option<Box<dyn Supervised>>>,
    closed: AtomicBool,
}

impl BackendSupervisor {
    pub fn new(spawner: Arc<dyn Spawner>, project_root: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            spawner,
            project_root: project_root.into(),
            port,
            stop_timeout: BACKEND_STOP_TIMEOUT,
            command: BACKEND_COMMAND.iter().map(|s| s.to_string()).collect(),
            sink: None,
            current: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Replace the backend command line.
    pub fn with_command(mut self, argv: Vec<String>) -> Self {
        self.command = argv;
        self
    }

    /// Send backend output somewhere other than the log formatter.
    pub fn with_sink(mut self, sink: LineSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Start the backend, stopping any running instance first.
    ///
    /// Returns the PID of the new process. If the spawn fails after the old
    /// process was stopped, no backend is running.
    pub async fn start(&self) -> Result<u32> {
        let mut current = self.current.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        self.stop_unsafe(&mut current).await;

        let mut spec = LaunchSpec::new(
            logfmt::BACKEND_NAME,
            logfmt::MAGENTA,
            self.command.clone(),
            &self.project_root,
        )
        .env("PORT", self.port.to_string())
        .pty();
        if let Some(sink) = &self.sink {
            spec = spec.with_sink(Arc::clone(sink));
        }

        let child = self.spawner.spawn(spec).await?;
        let pid = child.pid();
        tracing::info!("Backend started (PID {}) on port {}", pid, self.port);
        *current = Some(child);
        Ok(pid)
    }

    /// Restart the backend. Same as [`start`](Self::start).
    pub async fn restart(&self) -> Result<u32> {
        tracing::debug!("Restarting backend");
        self.start().await
    }

    /// Stop the running backend, if any.
    pub async fn stop(&self) {
        let mut current = self.current.lock().await;
        self.stop_unsafe(&mut current).await;
    }

    /// Stop the backend and refuse every later start.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// PID of the running backend.
    pub async fn pid(&self) -> Option<u32> {
        self.current.lock().await.as_ref().map(|c| c.pid())
    }

    /// Caller must hold the `current` lock.
    async fn stop_unsafe(&self, current: &mut Option<Box<dyn Supervised>>) {
        let Some(mut child) = current.take() else {
            return;
        };
        let pid = child.pid();
        tracing::debug!("Stopping backend (PID {})", pid);
        if let Err(e) = child.stop_graceful(self.stop_timeout).await {
            tracing::warn!("Failed to stop backend (PID {}): {}", pid, e);
        }
    }
}
