//! Signal-driven teardown of everything the orchestrator started.
//!
//! The coordinator holds exactly the pieces it must tear down (watcher,
//! backend supervisor, proxy, frontend children, port assignment), each
//! registered as startup creates it. The teardown sequence runs at most once
//! no matter how many signals or callers request it:
//!
//! 1. close the file watcher so no new reload can start
//! 2. stop the backend under the supervisor's lock
//! 3. stop the proxy with a deadline
//! 4. stop remaining children concurrently, SIGKILL on timeout, with an overall cap
//! 5. SIGKILL anything still listening on the three ports
//! 6. notify the waiter

use crate::backend::BackendSupervisor;
use crate::error::{Error, Result};
use crate::output::UserOutput;
use crate::port::{self, PortAssignment};
use crate::process::Supervised;
use crate::proxy::{ProxyHandle, PROXY_SHUTDOWN_TIMEOUT};
use crate::watch::FileWatcher;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Grace period between SIGTERM and SIGKILL for the frontend.
pub const FRONTEND_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on waiting for all children to stop.
pub const CHILDREN_STOP_CAP: Duration = Duration::from_secs(10);

/// Tunables for the teardown sequence.
#[derive(Debug, Clone)]
pub struct ShutdownTimeouts {
    pub child_stop: Duration,
    pub children_cap: Duration,
    pub proxy: Duration,
    /// Kill whatever still listens on the assigned ports.
    pub sweep_ports: bool,
}

impl Default for ShutdownTimeouts {
    fn default() -> Self {
        Self {
            child_stop: FRONTEND_STOP_TIMEOUT,
            children_cap: CHILDREN_STOP_CAP,
            proxy: PROXY_SHUTDOWN_TIMEOUT,
            sweep_ports: true,
        }
    }
}

pub struct ShutdownCoordinator {
    shutting_down: AtomicBool,
    sequences: AtomicUsize,
    done_tx: mpsc::Sender<()>,
    done_rx: Mutex<Option<mpsc::Receiver<()>>>,
    cancel: CancellationToken,
    timeouts: ShutdownTimeouts,
    output: Arc<dyn UserOutput>,

    watcher: parking_lot::Mutex<Option<FileWatcher>>,
    backend: Mutex<Option<Arc<BackendSupervisor>>>,
    proxy: Mutex<Option<ProxyHandle>>,
    children: Mutex<Vec<Box<dyn Supervised>>>,
    ports: OnceLock<PortAssignment>,
}

impl ShutdownCoordinator {
    pub fn new(output: Arc<dyn UserOutput>, timeouts: ShutdownTimeouts) -> Self {
        let (done_tx, done_rx) = mpsc::channel(1);
        Self {
            shutting_down: AtomicBool::new(false),
            sequences: AtomicUsize::new(0),
            done_tx,
            done_rx: Mutex::new(Some(done_rx)),
            cancel: CancellationToken::new(),
            timeouts,
            output,
            watcher: parking_lot::Mutex::new(None),
            backend: Mutex::new(None),
            proxy: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            ports: OnceLock::new(),
        }
    }

    /// Install handlers for SIGINT, SIGTERM, SIGQUIT and SIGHUP.
    ///
    /// Each signal requests shutdown; repeats are logged and ignored.
    pub fn arm(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigquit = signal(SignalKind::quit())?;
        let mut sighup = signal(SignalKind::hangup())?;

        let coordinator = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    Some(()) = sigint.recv() => "SIGINT",
                    Some(()) = sigterm.recv() => "SIGTERM",
                    Some(()) = sigquit.recv() => "SIGQUIT",
                    Some(()) = sighup.recv() => "SIGHUP",
                    else => break,
                };

                if coordinator.is_shutting_down() {
                    tracing::debug!("Received {} while already shutting down", name);
                    continue;
                }

                coordinator.output.blank();
                coordinator
                    .output
                    .status(&format!("Received {}, shutting down...", name));
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    coordinator.shutdown(name).await;
                });
            }
        }))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Cancelled as soon as shutdown begins. Startup races against it.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// How many times the teardown sequence has run. Never more than one.
    pub fn sequences_run(&self) -> usize {
        self.sequences.load(Ordering::SeqCst)
    }

    pub fn set_ports(&self, ports: PortAssignment) {
        if self.ports.set(ports).is_err() {
            tracing::warn!("Port assignment already registered, keeping the first");
        }
    }

    /// Hand over the backend supervisor. Closed immediately if shutdown has
    /// begun, so a start that follows returns [`Error::ShuttingDown`].
    pub async fn set_backend(&self, backend: Arc<BackendSupervisor>) {
        let mut slot = self.backend.lock().await;
        if self.is_shutting_down() {
            backend.shutdown().await;
            return;
        }
        if slot.replace(backend).is_some() {
            tracing::warn!("Backend supervisor replaced");
        }
    }

    /// Hand over the file watcher. Closed immediately if shutdown has begun.
    pub fn set_watcher(&self, mut watcher: FileWatcher) {
        let mut slot = self.watcher.lock();
        if self.is_shutting_down() {
            watcher.close();
            return;
        }
        *slot = Some(watcher);
    }

    /// Hand over the proxy. Stopped immediately if shutdown has begun.
    pub async fn set_proxy(&self, mut proxy: ProxyHandle) {
        let mut slot = self.proxy.lock().await;
        if self.is_shutting_down() {
            proxy.shutdown(self.timeouts.proxy).await;
            return;
        }
        *slot = Some(proxy);
    }

    /// Track a child for teardown. Stopped immediately if shutdown has begun.
    pub async fn add_child(&self, mut child: Box<dyn Supervised>) {
        let mut children = self.children.lock().await;
        if self.is_shutting_down() {
            if let Err(e) = child.stop_graceful(self.timeouts.child_stop).await {
                tracing::warn!("Failed to stop {}: {}", child.name(), e);
            }
            return;
        }
        children.push(child);
    }

    /// Teardown requested because startup failed or panicked.
    pub async fn emergency_shutdown(&self, reason: &str) -> bool {
        self.output
            .emergency(&format!("Emergency shutdown: {}", reason));
        self.shutdown(reason).await
    }

    /// Run the teardown sequence unless it already ran or is running.
    ///
    /// Returns whether this call performed it.
    pub async fn shutdown(&self, reason: &str) -> bool {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Shutdown already in progress (requested by {})", reason);
            return false;
        }
        self.sequences.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        tracing::info!("Shutting down ({})", reason);

        self.close_watcher();
        self.stop_backend().await;
        self.stop_proxy().await;
        self.stop_children().await;
        self.sweep().await;

        self.output.success("Shutdown complete");
        // Capacity one: a second send can never block
        if self.done_tx.try_send(()).is_err() {
            tracing::debug!("Shutdown already signalled");
        }
        true
    }

    /// Block until the teardown sequence has finished.
    pub async fn wait(&self) -> Result<()> {
        let mut slot = self.done_rx.lock().await;
        let Some(rx) = slot.as_mut() else {
            return Ok(());
        };
        match rx.recv().await {
            Some(()) => {
                *slot = None;
                Ok(())
            }
            None => Err(Error::Process("shutdown channel closed".to_string())),
        }
    }

    fn close_watcher(&self) {
        if let Some(mut watcher) = self.watcher.lock().take() {
            tracing::debug!("Closing file watcher");
            watcher.close();
        }
    }

    async fn stop_backend(&self) {
        let backend = self.backend.lock().await.take();
        if let Some(backend) = backend {
            tracing::debug!("Stopping backend");
            backend.shutdown().await;
        }
    }

    async fn stop_proxy(&self) {
        let proxy = self.proxy.lock().await.take();
        if let Some(mut proxy) = proxy {
            tracing::debug!("Stopping proxy");
            proxy.shutdown(self.timeouts.proxy).await;
        }
    }

    async fn stop_children(&self) {
        let children: Vec<_> = self.children.lock().await.drain(..).collect();
        if children.is_empty() {
            return;
        }

        let mut tasks = JoinSet::new();
        for mut child in children {
            let timeout = self.timeouts.child_stop;
            tasks.spawn(async move {
                let name = child.name().to_string();
                let pid = child.pid();
                tracing::debug!("Stopping {} (PID {})", name, pid);
                if let Err(e) = child.stop_graceful(timeout).await {
                    tracing::warn!("Failed to stop {} (PID {}): {}", name, pid, e);
                }
            });
        }

        let all_done = async { while tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(self.timeouts.children_cap, all_done)
            .await
            .is_err()
        {
            tracing::warn!(
                "Children still stopping after {:?}, abandoning",
                self.timeouts.children_cap
            );
            // Dropping the set aborts the tasks; kill_on_drop reaps what is left
            tasks.abort_all();
        }
    }

    async fn sweep(&self) {
        if !self.timeouts.sweep_ports {
            return;
        }
        if let Some(ports) = self.ports.get() {
            let killed = port::sweep_ports(&ports.all()).await;
            if killed > 0 {
                tracing::info!("Port sweep killed {} leftover process(es)", killed);
            }
        }
    }
}
