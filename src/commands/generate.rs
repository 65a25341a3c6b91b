use flux::output::UserOutput;
use flux::typegen::TypePipeline;
use flux::ProjectConfig;
use std::path::Path;

/// Run the type pipeline once against the sources on disk. No servers are started.
pub async fn run_generate(
    config: &ProjectConfig,
    project_root: &Path,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let pipeline = TypePipeline::new(project_root, config);
    let report = pipeline.run().await?;

    out.success(&format!(
        "Generated TypeScript for {} routes and {} types",
        report.routes, report.types
    ));
    for file in &report.files {
        let shown = file.strip_prefix(project_root).unwrap_or(file);
        out.status(&format!("  {}", shown.display()));
    }
    Ok(())
}
