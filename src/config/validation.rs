use super::{ProjectConfig, PORT_PLACEHOLDER};
use crate::error::{Error, Result};
use std::path::Path;

impl ProjectConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::Validation(
                "port must be between 1 and 65535".to_string(),
            ));
        }

        if self.frontend.dev_cmd.trim().is_empty() {
            return Err(Error::Validation(
                "frontend.dev_cmd must not be empty".to_string(),
            ));
        }

        if !self.frontend.dev_cmd.contains(PORT_PLACEHOLDER) {
            // The dev server would pick its own port and the proxy would never find it.
            tracing::warn!(
                "frontend.dev_cmd has no {} placeholder; the dev server must honour the assigned port some other way",
                PORT_PLACEHOLDER
            );
        }

        if let Err(reason) = shell_words::split(&self.frontend.dev_cmd) {
            return Err(Error::Validation(format!(
                "frontend.dev_cmd is not a valid command line: {}",
                reason
            )));
        }

        for (field, value) in [
            ("frontend.types_dir", &self.frontend.types_dir),
            ("frontend.lib_dir", &self.frontend.lib_dir),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{} must not be empty", field)));
            }
            if Path::new(value).is_absolute() {
                return Err(Error::Validation(format!(
                    "{} must be relative to the project root, got '{}'",
                    field, value
                )));
            }
        }

        Ok(())
    }
}
