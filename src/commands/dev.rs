use flux::output::CliOutput;
use flux::{Orchestrator, ProjectConfig};
use std::path::PathBuf;
use std::sync::Arc;

pub async fn run_dev(config: ProjectConfig, project_root: PathBuf) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::builder()
        .config(config)
        .project_root(project_root)
        .output(Arc::new(CliOutput))
        .build()?;

    orchestrator.start().await?;
    Ok(())
}
