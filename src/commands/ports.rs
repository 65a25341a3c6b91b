use flux::output::UserOutput;
use flux::{PortAssignment, ProjectConfig};

/// Print the ports a `dev` session would be given right now.
pub async fn run_ports(config: &ProjectConfig, json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let ports = PortAssignment::allocate(config.port).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    println!("\nPort Assignment");
    println!("===============\n");
    println!("  {:<10} {}", "proxy", ports.proxy);
    println!("  {:<10} {}", "frontend", ports.frontend);
    println!("  {:<10} {}", "backend", ports.backend);
    println!();
    if ports.frontend != ports.proxy + 1 || ports.backend != ports.frontend + 1 {
        out.warning("Some preferred ports are taken; `dev` will skip past them");
    }
    Ok(())
}
