use super::{Orchestrator, OrchestratorOptions};
use crate::config::ProjectConfig;
use crate::error::{Error, Result};
use crate::output::{CliOutput, UserOutput};
use crate::process::{ProcessSpawner, Spawner};
use crate::typegen::{GoSourceAnalyzer, SourceAnalyzer};
use std::path::PathBuf;
use std::sync::Arc;

/// Builder for constructing an `Orchestrator` with a fluent API.
///
/// # Example
///
/// ```no_run
/// use flux::{Orchestrator, ProjectConfig};
///
/// # async fn example() -> Result<(), flux::Error> {
/// let orchestrator = Orchestrator::builder()
///     .config(ProjectConfig::default())
///     .project_root(".")
///     .build()?;
/// orchestrator.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct OrchestratorBuilder {
    config: Option<ProjectConfig>,
    project_root: Option<PathBuf>,
    options: OrchestratorOptions,
    output: Arc<dyn UserOutput>,
    spawner: Arc<dyn Spawner>,
    analyzer: Arc<dyn SourceAnalyzer>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            project_root: None,
            options: OrchestratorOptions::default(),
            output: Arc::new(CliOutput),
            spawner: Arc::new(ProcessSpawner),
            analyzer: Arc::new(GoSourceAnalyzer::new()),
        }
    }

    /// Set the configuration.
    ///
    /// This is required to build the orchestrator.
    pub fn config(mut self, config: ProjectConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the project root.
    ///
    /// If not set, defaults to the current directory.
    pub fn project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    pub fn options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn output(mut self, output: Arc<dyn UserOutput>) -> Self {
        self.output = output;
        self
    }

    /// Replace how child processes are started.
    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn analyzer(mut self, analyzer: Arc<dyn SourceAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Validate the configuration and build the orchestrator.
    pub fn build(self) -> Result<Orchestrator> {
        let config = self
            .config
            .ok_or_else(|| Error::Config("Configuration is required".to_string()))?;
        config.validate()?;

        let project_root = match self.project_root {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        if !project_root.is_dir() {
            return Err(Error::Config(format!(
                "Project root {} is not a directory",
                project_root.display()
            )));
        }

        Ok(Orchestrator::new(
            config,
            project_root,
            self.options,
            self.output,
            self.spawner,
            self.analyzer,
        ))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
