mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use flux::config::{apply_work_dir_env, Parser as ConfigParser};
use flux::output::CliOutput;
use flux::Error as FluxError;
use std::path::{Path, PathBuf};

const DEBUG_ENV: &str = "FLUX_DEBUG";

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(flux_error) = e.downcast_ref::<FluxError>() {
            eprintln!("Error: {}", flux_error);
            if let Some(suggestion) = flux_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug || debug_from_env())?;

    // Must happen before the config lookup, which is relative to the cwd
    apply_work_dir_env()?;

    let parser = ConfigParser::new();
    let config_path = match cli.config {
        Some(path) => path,
        None => parser.find_config_file()?,
    };
    let config = parser.load_config(&config_path)?;
    let project_root = project_root_for(&config_path)?;
    tracing::debug!(
        "Loaded {} (project root {})",
        config_path.display(),
        project_root.display()
    );

    let output = CliOutput;
    match cli.command.unwrap_or(Commands::Dev) {
        Commands::Dev => commands::run_dev(config, project_root).await,
        Commands::Generate => commands::run_generate(&config, &project_root, &output).await,
        Commands::Ports { json } => commands::run_ports(&config, json, &output).await,
    }
}

fn project_root_for(config_path: &Path) -> anyhow::Result<PathBuf> {
    let root = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    Ok(root.canonicalize().unwrap_or(root))
}

fn debug_from_env() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn init_tracing(debug: bool) -> anyhow::Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(debug)
        .init();

    Ok(())
}
