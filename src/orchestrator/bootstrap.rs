//! First-run preparation of the project before any server starts.

use crate::config::ProjectConfig;
use crate::error::Result;
use crate::logfmt;
use crate::output::UserOutput;
use crate::process::{run_to_completion, LaunchSpec};
use std::path::Path;

/// JavaScript package managers recognised for the dependency install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Pnpm,
    Yarn,
    Bun,
}

impl PackageManager {
    /// Lockfiles in priority order.
    const LOCKFILES: &'static [(&'static str, PackageManager)] = &[
        ("pnpm-lock.yaml", PackageManager::Pnpm),
        ("yarn.lock", PackageManager::Yarn),
        ("bun.lockb", PackageManager::Bun),
        ("bun.lock", PackageManager::Bun),
        ("package-lock.json", PackageManager::Npm),
    ];

    pub fn command(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Yarn => "yarn",
            PackageManager::Bun => "bun",
        }
    }

    pub fn install_argv(&self) -> Vec<String> {
        vec![self.command().to_string(), "install".to_string()]
    }

    fn from_lockfile(dir: &Path) -> Option<Self> {
        Self::LOCKFILES
            .iter()
            .find(|(file, _)| dir.join(file).exists())
            .map(|(_, pm)| *pm)
    }

    fn from_command(command: &str) -> Option<Self> {
        match command.split_whitespace().next()? {
            "npm" | "npx" => Some(PackageManager::Npm),
            "pnpm" | "pnpx" => Some(PackageManager::Pnpm),
            "yarn" => Some(PackageManager::Yarn),
            "bun" | "bunx" => Some(PackageManager::Bun),
            _ => None,
        }
    }

    /// Pick a package manager from the lockfile in `frontend_dir`, then the
    /// dev command's program, else npm.
    pub fn detect(frontend_dir: &Path, dev_cmd: &str) -> Self {
        Self::from_lockfile(frontend_dir)
            .or_else(|| Self::from_command(dev_cmd))
            .unwrap_or(PackageManager::Npm)
    }
}

/// Make sure `frontend_dir` has a `package.json` and installed dependencies.
///
/// The configured install command runs only when `package.json` is missing;
/// the package manager install runs only when `node_modules` is missing.
pub async fn prepare_frontend(
    config: &ProjectConfig,
    frontend_dir: &Path,
    frontend_port: u16,
    output: &dyn UserOutput,
) -> Result<()> {
    if !frontend_dir.join("package.json").exists() {
        match config.install_command_for(frontend_port) {
            Some(command) => {
                std::fs::create_dir_all(frontend_dir)?;
                output.status(&format!("Setting up frontend: {}", command));
                let spec =
                    LaunchSpec::from_command_line("Setup", logfmt::WHITE, &command, frontend_dir)?;
                run_to_completion(spec).await?;
            }
            None => {
                output.warning(&format!(
                    "{} has no package.json and no frontend.install_cmd is configured",
                    frontend_dir.display()
                ));
                return Ok(());
            }
        }
    }

    if !frontend_dir.join("node_modules").exists() && frontend_dir.join("package.json").exists() {
        let pm = PackageManager::detect(frontend_dir, &config.frontend.dev_cmd);
        output.status(&format!("Installing frontend dependencies with {}", pm.command()));
        let spec = LaunchSpec::new("Install", logfmt::WHITE, pm.install_argv(), frontend_dir);
        run_to_completion(spec).await?;
        output.success("Frontend dependencies installed");
    }

    Ok(())
}

/// Run `go mod tidy` when the project has a `go.mod`. Failure is a warning.
pub async fn sync_go_modules(project_root: &Path, output: &dyn UserOutput) {
    if !project_root.join("go.mod").exists() {
        return;
    }
    let spec = LaunchSpec::new(
        "go mod tidy",
        logfmt::WHITE,
        vec!["go".to_string(), "mod".to_string(), "tidy".to_string()],
        project_root,
    );
    match run_to_completion(spec).await {
        Ok(()) => tracing::debug!("go mod tidy finished"),
        Err(e) => output.warning(&format!("Go dependency sync failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::QuietOutput;

    #[test]
    fn test_detect_prefers_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yarn.lock"), "").unwrap();
        assert_eq!(
            PackageManager::detect(dir.path(), "pnpm dev --port {{port}}"),
            PackageManager::Yarn
        );
    }

    #[test]
    fn test_detect_falls_back_to_command_then_npm() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            PackageManager::detect(dir.path(), "pnpm dev --port {{port}}"),
            PackageManager::Pnpm
        );
        assert_eq!(PackageManager::detect(dir.path(), "bunx vite"), PackageManager::Bun);
        assert_eq!(PackageManager::detect(dir.path(), "vite --port 1"), PackageManager::Npm);
    }

    #[tokio::test]
    async fn test_install_cmd_runs_only_without_package_json() {
        let root = tempfile::tempdir().unwrap();
        let frontend = root.path().join("frontend");
        let mut config = ProjectConfig::default();
        config.frontend.install_cmd =
            Some("sh -c 'echo {{port}} > marker && mkdir node_modules && echo {} > package.json'".to_string());

        prepare_frontend(&config, &frontend, 3001, &QuietOutput).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(frontend.join("marker")).unwrap().trim(),
            "3001"
        );

        std::fs::remove_file(frontend.join("marker")).unwrap();
        prepare_frontend(&config, &frontend, 3001, &QuietOutput).await.unwrap();
        assert!(!frontend.join("marker").exists());
    }

    #[tokio::test]
    async fn test_failed_install_cmd_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let mut config = ProjectConfig::default();
        config.frontend.install_cmd = Some("sh -c 'exit 7'".to_string());

        let err = prepare_frontend(&config, &root.path().join("frontend"), 3001, &QuietOutput)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::CommandFailed { exit_code: 7, .. }));
    }

    #[tokio::test]
    async fn test_without_install_cmd_nothing_runs() {
        let root = tempfile::tempdir().unwrap();
        let frontend = root.path().join("frontend");
        prepare_frontend(&ProjectConfig::default(), &frontend, 3001, &QuietOutput)
            .await
            .unwrap();
        assert!(!frontend.exists());
    }
}
