//! Top-level composition of a development session.
//!
//! - `core` - the `Orchestrator` and its start sequence
//! - `builder` - fluent construction with validation
//! - `options` - timeouts and feature switches
//! - `bootstrap` - frontend setup and Go module sync before first start
//! - `reload` - the hot reload pipeline run on source changes

mod bootstrap;
mod builder;
mod core;
mod options;
mod reload;

pub use bootstrap::{prepare_frontend, sync_go_modules, PackageManager};
pub use builder::OrchestratorBuilder;
pub use core::Orchestrator;
pub use options::*;
pub use reload::{regenerate, HotReload};
