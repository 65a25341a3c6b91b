//! Configuration parsing and types.
//!
//! - `types` - `ProjectConfig` and its sections, `{{port}}` substitution
//! - `parser` - flux.yaml discovery and YAML parsing, `FLUX_WORK_DIR`
//! - `validation` - config validation

mod parser;
mod types;
mod validation;

pub use parser::*;
pub use types::*;
