//! Core configuration types.
//!
//! This module contains the root [`ProjectConfig`] struct for `flux.yaml`
//! and its nested sections.

use serde::{Deserialize, Serialize};

/// Placeholder replaced with the assigned frontend port in `frontend.dev_cmd`
/// and `frontend.install_cmd`.
pub const PORT_PLACEHOLDER: &str = "{{port}}";

pub const DEFAULT_PROXY_PORT: u16 = 3000;

/// Root configuration structure for flux.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (informational).
    #[serde(default = "default_name")]
    pub name: String,

    /// Outward-facing proxy port.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub frontend: FrontendConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    /// Production build options. Not read by the dev orchestrator.
    #[serde(default)]
    pub build: BuildConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendConfig {
    /// Framework label shown in the startup banner.
    #[serde(default = "default_framework")]
    pub framework: String,

    /// Dev server command. `{{port}}` is replaced with the assigned port.
    #[serde(default = "default_dev_cmd")]
    pub dev_cmd: String,

    /// First-run setup command, run only when `frontend/package.json` is missing.
    #[serde(default)]
    pub install_cmd: Option<String>,

    /// Output directory for generated TypeScript types (relative to project root).
    #[serde(default = "default_types_dir")]
    pub types_dir: String,

    /// Output directory for the generated API client (relative to project root).
    #[serde(default = "default_lib_dir")]
    pub lib_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Router label shown in the startup banner.
    #[serde(default = "default_router")]
    pub router: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_frontend: Option<bool>,
}

impl ProjectConfig {
    /// Frontend dev command with `{{port}}` replaced by `port`.
    pub fn dev_command_for(&self, port: u16) -> String {
        substitute_port(&self.frontend.dev_cmd, port)
    }

    /// Install command with `{{port}}` replaced by `port`, if one is configured.
    pub fn install_command_for(&self, port: u16) -> Option<String> {
        self.frontend
            .install_cmd
            .as_deref()
            .filter(|cmd| !cmd.trim().is_empty())
            .map(|cmd| substitute_port(cmd, port))
    }
}

/// Replace every `{{port}}` token in `template`.
pub fn substitute_port(template: &str, port: u16) -> String {
    template.replace(PORT_PLACEHOLDER, &port.to_string())
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            port: default_port(),
            frontend: FrontendConfig::default(),
            backend: BackendConfig::default(),
            build: BuildConfig::default(),
        }
    }
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            framework: default_framework(),
            dev_cmd: default_dev_cmd(),
            install_cmd: None,
            types_dir: default_types_dir(),
            lib_dir: default_lib_dir(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            router: default_router(),
        }
    }
}

fn default_name() -> String {
    "flux-app".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PROXY_PORT
}

fn default_framework() -> String {
    "react".to_string()
}

fn default_dev_cmd() -> String {
    "npm run dev -- --port {{port}}".to_string()
}

fn default_types_dir() -> String {
    "frontend/src/types".to_string()
}

fn default_lib_dir() -> String {
    "frontend/src/lib".to_string()
}

fn default_router() -> String {
    "huma".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_command_substitution() {
        let mut config = ProjectConfig::default();
        config.frontend.dev_cmd = "pnpm dev --port {{port}}".to_string();
        assert_eq!(config.dev_command_for(4173), "pnpm dev --port 4173");
    }

    #[test]
    fn test_substitute_replaces_every_token() {
        assert_eq!(
            substitute_port("a {{port}} b {{port}}", 81),
            "a 81 b 81"
        );
        assert_eq!(substitute_port("no token", 81), "no token");
    }

    #[test]
    fn test_blank_install_command_is_none() {
        let mut config = ProjectConfig::default();
        config.frontend.install_cmd = Some("   ".to_string());
        assert_eq!(config.install_command_for(3001), None);
        config.frontend.install_cmd = Some("npm create vite@latest . -- --port {{port}}".to_string());
        assert_eq!(
            config.install_command_for(3001).as_deref(),
            Some("npm create vite@latest . -- --port 3001")
        );
    }
}
