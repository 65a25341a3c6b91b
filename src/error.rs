// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(flux::config::error),
        help("Run flux from the project root or set FLUX_WORK_DIR to it")
    )]
    Config(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(code(flux::config::validation), help("Fix the value in flux.yaml"))]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Port allocation failed: {0}")]
    #[diagnostic(
        code(flux::port::allocation_failed),
        help("Change `port` in flux.yaml or stop the processes holding the ports")
    )]
    PortAllocation(String),

    #[error("Timed out after {timeout:?} waiting for {name} on port {port}")]
    #[diagnostic(
        code(flux::port::timeout),
        help("Check the {name} output above for startup errors")
    )]
    PortTimeout {
        name: String,
        port: u16,
        timeout: Duration,
    },

    #[error("Failed to spawn {name}: {reason}")]
    #[diagnostic(
        code(flux::process::spawn_failed),
        help("Check that the command exists and is executable")
    )]
    Spawn { name: String, reason: String },

    #[error("Command '{command}' exited with code {exit_code}")]
    #[diagnostic(code(flux::process::command_failed))]
    CommandFailed { command: String, exit_code: i32 },

    #[error("Process error: {0}")]
    Process(String),

    #[error("File watcher error: {0}")]
    Watch(String),

    #[error("Failed to fetch OpenAPI spec: {0}")]
    #[diagnostic(
        code(flux::openapi::network),
        help("Make sure the backend serves /api/openapi.json")
    )]
    SpecFetch(#[from] reqwest::Error),

    #[error("OpenAPI endpoint returned HTTP {0}")]
    #[diagnostic(code(flux::openapi::status))]
    SpecStatus(u16),

    #[error("OpenAPI document is not valid JSON: {0}")]
    #[diagnostic(code(flux::openapi::invalid))]
    SpecInvalid(serde_json::Error),

    #[error("Type generation failed: {0}")]
    #[diagnostic(code(flux::typegen::failed))]
    TypeGen(String),

    #[error("Source analysis failed: {0}")]
    Analysis(String),

    #[error("Proxy failed to listen on port {port}: {reason}")]
    #[diagnostic(
        code(flux::proxy::bind),
        help("Another process owns the proxy port; stop it or change `port` in flux.yaml")
    )]
    ProxyBind { port: u16, reason: String },

    #[error("Shutdown in progress")]
    ShuttingDown,

    #[error("Startup interrupted by signal")]
    Interrupted,

    #[error("Startup panicked: {0}")]
    Panic(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::Config(_) => Some(
                "Create a flux.yaml in the project root, or point FLUX_WORK_DIR at the project"
                    .to_string(),
            ),
            Error::PortTimeout { name, port, .. } => Some(format!(
                "{} never bound port {}. Look for a crash in its output, or run it by hand to see why",
                name, port
            )),
            Error::ProxyBind { port, .. } => Some(format!(
                "Find what's using the port with: lsof -i :{}",
                port
            )),
            Error::Spawn { .. } => {
                Some("Make sure node, your package manager and go are on PATH".to_string())
            }
            Error::CommandFailed { command, .. } => {
                Some(format!("Run '{}' manually to see the full error", command))
            }
            _ => None,
        }
    }

    /// Whether the error is a user-initiated stop rather than a failure.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Error::Interrupted | Error::ShuttingDown)
    }
}

/// Readable text from a caught panic payload.
pub fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
