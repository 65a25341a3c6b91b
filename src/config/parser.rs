use super::ProjectConfig;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "flux.yaml";
const ALT_CONFIG_FILE_NAME: &str = "flux.yml";

/// Environment variable naming the project root. Matched case-insensitively.
pub const WORK_DIR_ENV: &str = "FLUX_WORK_DIR";

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find config file starting from current directory
    pub fn find_config_file(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Self::find_config_in_dir(&current_dir)
    }

    pub fn find_config_in_dir(dir: &Path) -> Result<PathBuf> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Ok(config_path);
        }

        let alt_path = dir.join(ALT_CONFIG_FILE_NAME);
        if alt_path.exists() {
            return Ok(alt_path);
        }

        if let Some(parent) = dir.parent() {
            return Self::find_config_in_dir(parent);
        }

        Err(Error::Config(format!(
            "Could not find {} in current directory or any parent",
            CONFIG_FILE_NAME
        )))
    }

    /// Load and validate config from file path
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<ProjectConfig> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config = self.parse_config(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse config from YAML string. An empty document yields all defaults.
    pub fn parse_config(&self, content: &str) -> Result<ProjectConfig> {
        if content.trim().is_empty() {
            return Ok(ProjectConfig::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| Error::Parse(format!("Failed to parse flux.yaml: {}", e)))
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Look up `FLUX_WORK_DIR` in any letter case.
pub fn work_dir_from_env() -> Option<PathBuf> {
    work_dir_from_vars(std::env::vars())
}

fn work_dir_from_vars<I>(vars: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut case_insensitive = None;
    for (key, value) in vars {
        if value.trim().is_empty() {
            continue;
        }
        if key == WORK_DIR_ENV {
            return Some(PathBuf::from(value));
        }
        if case_insensitive.is_none() && key.eq_ignore_ascii_case(WORK_DIR_ENV) {
            case_insensitive = Some(PathBuf::from(value));
        }
    }
    case_insensitive
}

/// Change into `FLUX_WORK_DIR` when it is set. Returns the directory switched to.
pub fn apply_work_dir_env() -> Result<Option<PathBuf>> {
    let Some(dir) = work_dir_from_env() else {
        return Ok(None);
    };
    std::env::set_current_dir(&dir).map_err(|e| {
        Error::Config(format!(
            "{} points at '{}' which is not usable: {}",
            WORK_DIR_ENV,
            dir.display(),
            e
        ))
    })?;
    tracing::debug!("Changed working directory to {}", dir.display());
    Ok(Some(dir))
}
