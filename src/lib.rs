//! # Flux
//!
//! Development orchestrator for full-stack projects with a Go backend and a
//! JavaScript frontend.
//!
//! ## Features
//!
//! - **One URL**: a reverse proxy routes `/api/**` to the backend and
//!   everything else (including HMR WebSockets) to the frontend dev server
//! - **Port discovery**: frontend and backend ports are found next to the proxy port
//! - **Hot reload**: Go source changes restart the backend, refetch its
//!   OpenAPI document and regenerate the TypeScript client
//! - **Clean teardown**: process groups, escalation to SIGKILL and a final
//!   sweep of the ports guarantee nothing outlives a session
//!
//! ## Quick Start
//!
//! ```no_run
//! use flux::{Orchestrator, Parser};
//!
//! # async fn example() -> Result<(), flux::Error> {
//! let parser = Parser::new();
//! let config = parser.load_config("flux.yaml")?;
//!
//! let orchestrator = Orchestrator::builder()
//!     .config(config)
//!     .project_root(".")
//!     .build()?;
//!
//! // Blocks until SIGINT/SIGTERM/SIGQUIT/SIGHUP, then tears everything down
//! orchestrator.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod logfmt;
pub mod openapi;
pub mod orchestrator;
pub mod output;
pub mod port;
pub mod process;
pub mod proxy;
pub mod shutdown;
pub mod typegen;
pub mod watch;

// Re-export commonly used types
pub use config::{Parser, ProjectConfig};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorOptions};
pub use port::PortAssignment;
pub use shutdown::ShutdownCoordinator;
