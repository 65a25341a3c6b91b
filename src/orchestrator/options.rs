use crate::backend::{BACKEND_COMMAND, BACKEND_STOP_TIMEOUT};
use crate::openapi::SETTLE_DELAY;
use crate::shutdown::ShutdownTimeouts;
use crate::watch::{DEBOUNCE_WINDOW, WATCH_PATHS};
use std::time::Duration;

/// Frontend dev server directory relative to the project root.
pub const FRONTEND_DIR: &str = "frontend";

pub const FRONTEND_READY_TIMEOUT: Duration = Duration::from_secs(15);
pub const BACKEND_READY_TIMEOUT: Duration = Duration::from_secs(15);
pub const PROXY_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for a dev session. Defaults match normal interactive use.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub frontend_dir: String,
    pub frontend_ready_timeout: Duration,
    pub backend_ready_timeout: Duration,
    pub proxy_ready_timeout: Duration,
    pub backend_stop_timeout: Duration,
    pub backend_command: Vec<String>,
    pub shutdown: ShutdownTimeouts,
    pub debounce_window: Duration,
    pub watch_paths: Vec<String>,
    /// Pause before each OpenAPI fetch, and again after a reload restart.
    pub settle_delay: Duration,
    /// Run the install command / package manager when the frontend is not set up.
    pub bootstrap_frontend: bool,
    /// Run `go mod tidy` before the first backend start.
    pub sync_go_modules: bool,
    /// Kill stale listeners on the assigned ports before starting.
    pub pre_sweep: bool,
    /// Install signal handlers. Disabled when the caller drives shutdown.
    pub handle_signals: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            frontend_dir: FRONTEND_DIR.to_string(),
            frontend_ready_timeout: FRONTEND_READY_TIMEOUT,
            backend_ready_timeout: BACKEND_READY_TIMEOUT,
            proxy_ready_timeout: PROXY_READY_TIMEOUT,
            backend_stop_timeout: BACKEND_STOP_TIMEOUT,
            backend_command: BACKEND_COMMAND.iter().map(|s| s.to_string()).collect(),
            shutdown: ShutdownTimeouts::default(),
            debounce_window: DEBOUNCE_WINDOW,
            watch_paths: WATCH_PATHS.iter().map(|s| s.to_string()).collect(),
            settle_delay: SETTLE_DELAY,
            bootstrap_frontend: true,
            sync_go_modules: true,
            pre_sweep: true,
            handle_signals: true,
        }
    }
}
