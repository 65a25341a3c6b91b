//! Hot reload: restart the backend and regenerate client types.

use crate::backend::BackendSupervisor;
use crate::error::Error;
use crate::openapi::SpecFetcher;
use crate::output::UserOutput;
use crate::port;
use crate::shutdown::ShutdownCoordinator;
use crate::typegen::TypePipeline;
use crate::watch::{ChangeHandler, WatchEvent};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Fetch the OpenAPI document and, if that worked, run the type pipeline.
///
/// Both steps are advisory: failures are reported and previous artifacts stay.
pub async fn regenerate(fetcher: &SpecFetcher, pipeline: &TypePipeline, output: &dyn UserOutput) {
    match fetcher.fetch().await {
        Ok(summary) => output.success(&format!(
            "OpenAPI spec updated: {} v{} ({} operations)",
            summary.title, summary.version, summary.operations
        )),
        Err(e) => {
            output.warning(&format!("Could not fetch OpenAPI spec, skipping type generation: {}", e));
            return;
        }
    }

    match pipeline.run().await {
        Ok(report) => output.success(&format!(
            "Generated TypeScript for {} routes and {} types",
            report.routes, report.types
        )),
        Err(e) => output.warning(&format!("Type generation failed, keeping previous output: {}", e)),
    }
}

/// Reacts to debounced source changes.
pub struct HotReload {
    pub backend: Arc<BackendSupervisor>,
    pub fetcher: Arc<SpecFetcher>,
    pub pipeline: Arc<TypePipeline>,
    pub output: Arc<dyn UserOutput>,
    /// A panicking reload tears the session down.
    pub coordinator: Arc<ShutdownCoordinator>,
    pub ready_timeout: Duration,
    pub settle_delay: Duration,
}

#[async_trait]
impl ChangeHandler for HotReload {
    async fn on_change(&self, event: WatchEvent) {
        let name = event
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| event.path.display().to_string());
        self.output
            .status(&format!("🔄 {} changed, restarting backend...", name));

        match self.backend.restart().await {
            Ok(_) => {}
            Err(Error::ShuttingDown) => return,
            Err(e) => {
                self.output.warning(&format!("Backend restart failed: {}", e));
                return;
            }
        }

        let port = self.backend.port();
        if !port::wait_ready(port, self.ready_timeout).await {
            self.output.warning(&format!(
                "Backend did not come back on port {} within {:?}",
                port, self.ready_timeout
            ));
            return;
        }
        self.output.success("Backend restarted");

        tokio::time::sleep(self.settle_delay).await;
        if self.backend.is_closed() {
            return;
        }
        regenerate(&self.fetcher, &self.pipeline, self.output.as_ref()).await;
    }

    async fn on_panic(&self, message: String) {
        self.coordinator
            .emergency_shutdown(&format!("hot reload panicked: {}", message))
            .await;
    }
}
