use super::bootstrap::{prepare_frontend, sync_go_modules};
use super::reload::{regenerate, HotReload};
use super::{OrchestratorBuilder, OrchestratorOptions};
use crate::backend::BackendSupervisor;
use crate::config::ProjectConfig;
use crate::error::{panic_message, Error, Result};
use crate::logfmt;
use crate::openapi::SpecFetcher;
use crate::output::UserOutput;
use crate::port::{self, PortAssignment};
use crate::process::{LaunchSpec, Spawner};
use crate::proxy::ReverseProxy;
use crate::shutdown::ShutdownCoordinator;
use crate::typegen::{SourceAnalyzer, TypePipeline};
use crate::watch::FileWatcher;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Runs one development session: frontend, backend, proxy, watcher.
pub struct Orchestrator {
    config: ProjectConfig,
    project_root: PathBuf,
    options: OrchestratorOptions,
    output: Arc<dyn UserOutput>,
    spawner: Arc<dyn Spawner>,
    analyzer: Arc<dyn SourceAnalyzer>,
    coordinator: Arc<ShutdownCoordinator>,
    ports: OnceLock<PortAssignment>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub(super) fn new(
        config: ProjectConfig,
        project_root: PathBuf,
        options: OrchestratorOptions,
        output: Arc<dyn UserOutput>,
        spawner: Arc<dyn Spawner>,
        analyzer: Arc<dyn SourceAnalyzer>,
    ) -> Self {
        let coordinator = Arc::new(ShutdownCoordinator::new(
            Arc::clone(&output),
            options.shutdown.clone(),
        ));
        Self {
            config,
            project_root,
            options,
            output,
            spawner,
            analyzer,
            coordinator,
            ports: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Ports in use, once assigned.
    pub fn ports(&self) -> Option<PortAssignment> {
        self.ports.get().copied()
    }

    /// Handle for requesting or awaiting shutdown from outside.
    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Start everything and block until shutdown completes.
    ///
    /// Returns an error if startup fails, panics or is interrupted by a
    /// signal; everything started so far is torn down first. Returns `Ok`
    /// after a shutdown requested once the session was up.
    pub async fn start(&self) -> Result<()> {
        let signals = if self.options.handle_signals {
            Some(self.coordinator.arm()?)
        } else {
            None
        };
        let result = self.run().await;
        if let Some(signals) = signals {
            signals.abort();
        }
        result
    }

    async fn run(&self) -> Result<()> {
        let cancelled = self.coordinator.cancellation();
        let startup = AssertUnwindSafe(self.startup()).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = cancelled.cancelled() => Err(Error::Interrupted),
            result = startup => result.unwrap_or_else(|panic| Err(Error::Panic(panic_message(panic)))),
        };

        match outcome {
            Ok(()) => {
                self.coordinator.wait().await?;
                Ok(())
            }
            Err(e) if self.coordinator.is_shutting_down() => {
                // A signal or caller began the teardown; let it finish
                self.coordinator.wait().await?;
                tracing::debug!("Startup ended by shutdown: {}", e);
                Err(Error::Interrupted)
            }
            Err(e) => {
                self.output.error(&format!("Startup failed: {}", e));
                self.coordinator.emergency_shutdown(&e.to_string()).await;
                self.coordinator.wait().await?;
                Err(e)
            }
        }
    }

    async fn startup(&self) -> Result<()> {
        let ports = PortAssignment::allocate(self.config.port).await?;
        self.ports.set(ports).ok();
        self.coordinator.set_ports(ports);
        self.output.status(&format!(
            "Ports: proxy {}, frontend {}, backend {}",
            ports.proxy, ports.frontend, ports.backend
        ));

        if self.options.pre_sweep {
            let killed = port::sweep_ports(&ports.all()).await;
            if killed > 0 {
                self.output
                    .warning(&format!("Killed {} stale process(es) holding our ports", killed));
            }
        }

        let frontend_dir = self.project_root.join(&self.options.frontend_dir);
        if self.options.bootstrap_frontend {
            prepare_frontend(&self.config, &frontend_dir, ports.frontend, self.output.as_ref())
                .await?;
        }
        if self.options.sync_go_modules {
            sync_go_modules(&self.project_root, self.output.as_ref()).await;
        }

        self.start_frontend(&frontend_dir, ports.frontend).await?;
        let backend = self.start_backend(ports.backend).await?;

        let fetcher = Arc::new(
            SpecFetcher::new(ports.backend, &self.project_root)
                .with_settle_delay(self.options.settle_delay),
        );
        let pipeline = Arc::new(
            TypePipeline::new(&self.project_root, &self.config)
                .with_analyzer(Arc::clone(&self.analyzer)),
        );
        self.start_watcher(&backend, &fetcher, &pipeline);

        regenerate(&fetcher, &pipeline, self.output.as_ref()).await;

        self.start_proxy(ports).await?;
        self.print_banner(ports);
        Ok(())
    }

    async fn start_frontend(&self, frontend_dir: &Path, port: u16) -> Result<()> {
        let command = self.config.dev_command_for(port);
        self.output
            .status(&format!("Starting frontend on port {}: {}", port, command));
        let spec =
            LaunchSpec::from_command_line(logfmt::FRONTEND_NAME, logfmt::CYAN, &command, frontend_dir)?;
        let child = self.spawner.spawn(spec).await?;
        self.coordinator.add_child(child).await;

        self.await_port(logfmt::FRONTEND_NAME, port, self.options.frontend_ready_timeout)
            .await?;
        self.output.success(&format!("Frontend ready on port {}", port));
        Ok(())
    }

    async fn start_backend(&self, port: u16) -> Result<Arc<BackendSupervisor>> {
        let backend = Arc::new(
            BackendSupervisor::new(Arc::clone(&self.spawner), &self.project_root, port)
                .with_stop_timeout(self.options.backend_stop_timeout)
                .with_command(self.options.backend_command.clone()),
        );
        // Registered before starting so a failed start is still torn down
        self.coordinator.set_backend(Arc::clone(&backend)).await;

        self.output.status(&format!("Starting backend on port {}", port));
        backend.start().await?;
        self.await_port(logfmt::BACKEND_NAME, port, self.options.backend_ready_timeout)
            .await?;
        self.output.success(&format!("Backend ready on port {}", port));
        Ok(backend)
    }

    fn start_watcher(
        &self,
        backend: &Arc<BackendSupervisor>,
        fetcher: &Arc<SpecFetcher>,
        pipeline: &Arc<TypePipeline>,
    ) {
        let handler = Arc::new(HotReload {
            backend: Arc::clone(backend),
            fetcher: Arc::clone(fetcher),
            pipeline: Arc::clone(pipeline),
            output: Arc::clone(&self.output),
            coordinator: Arc::clone(&self.coordinator),
            ready_timeout: self.options.backend_ready_timeout,
            settle_delay: self.options.settle_delay,
        });

        match FileWatcher::start(
            &self.project_root,
            self.options.watch_paths.as_slice(),
            self.options.debounce_window,
            handler,
        ) {
            Ok(watcher) => {
                for path in watcher.skipped() {
                    self.output
                        .warning(&format!("Not watching {} (missing or unwatchable)", path.display()));
                }
                if !watcher.watched().is_empty() {
                    self.output.status(&format!(
                        "Watching {} director{} for Go changes",
                        watcher.watched().len(),
                        if watcher.watched().len() == 1 { "y" } else { "ies" }
                    ));
                }
                self.coordinator.set_watcher(watcher);
            }
            Err(e) => self
                .output
                .warning(&format!("Hot reload disabled: {}", e)),
        }
    }

    async fn start_proxy(&self, ports: PortAssignment) -> Result<()> {
        let proxy = ReverseProxy::new(ports.proxy, ports.frontend, ports.backend)
            .bind()
            .await?;
        self.coordinator.set_proxy(proxy).await;
        self.await_port("Proxy", ports.proxy, self.options.proxy_ready_timeout)
            .await
    }

    async fn await_port(&self, name: &str, port: u16, timeout: Duration) -> Result<()> {
        if port::wait_ready(port, timeout).await {
            Ok(())
        } else {
            Err(Error::PortTimeout {
                name: name.to_string(),
                port,
                timeout,
            })
        }
    }

    fn print_banner(&self, ports: PortAssignment) {
        let out = &self.output;
        out.blank();
        out.success(&format!(
            "{} is running at {}http://localhost:{}{}",
            self.config.name,
            logfmt::BOLD,
            ports.proxy,
            logfmt::RESET
        ));
        out.status(&format!(
            "Frontend ({}) on port {}, backend ({}) on port {}",
            self.config.frontend.framework, ports.frontend, self.config.backend.router, ports.backend
        ));
        out.status("Press Ctrl+C to stop");
        out.blank();
    }
}
