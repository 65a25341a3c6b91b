use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "flux")]
#[command(about = "Flux - run a Go backend and a JavaScript frontend behind one dev proxy")]
#[command(version)]
pub struct Cli {
    /// Config file path (defaults to flux.yaml in the current directory or a parent)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (also enabled by FLUX_DEBUG=1)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the development environment until interrupted (default)
    Dev,
    /// Regenerate TypeScript types, API client and route manifest once
    Generate,
    /// Show the ports `dev` would use
    Ports {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_parses() {
        let cli = Cli::try_parse_from(["flux"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.debug);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["flux", "ports", "--json", "--debug", "-c", "x.yaml"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Ports { json: true })));
        assert!(cli.debug);
        assert_eq!(cli.config, Some(PathBuf::from("x.yaml")));
    }
}
