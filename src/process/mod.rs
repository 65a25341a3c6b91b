//! Child process launching and supervision.

pub mod child;

pub use child::{run_to_completion, ChildProcess};

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Callback receiving each non-blank line a child writes.
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// How a child's standard streams are attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaunchMode {
    /// stdout and stderr captured through pipes.
    #[default]
    Pipe,
    /// stdin, stdout and stderr attached to a pseudo-terminal.
    Pty,
}

/// Everything needed to start one child.
#[derive(Clone)]
pub struct LaunchSpec {
    /// Display name, also used to pick output formatting rules.
    pub name: String,
    pub color: &'static str,
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub mode: LaunchMode,
    /// Replaces the default log formatter when set.
    pub sink: Option<LineSink>,
}

impl LaunchSpec {
    pub fn new(
        name: impl Into<String>,
        color: &'static str,
        argv: Vec<String>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            color,
            argv,
            cwd: cwd.into(),
            env: Vec::new(),
            mode: LaunchMode::Pipe,
            sink: None,
        }
    }

    /// Build a spec from a shell-style command line.
    ///
    /// Quoting follows POSIX shell rules; no shell is involved at runtime.
    pub fn from_command_line(
        name: impl Into<String>,
        color: &'static str,
        command_line: &str,
        cwd: impl Into<PathBuf>,
    ) -> Result<Self> {
        let name = name.into();
        let argv = shell_words::split(command_line).map_err(|e| Error::Spawn {
            name: name.clone(),
            reason: format!("cannot parse command '{}': {}", command_line, e),
        })?;
        if argv.is_empty() {
            return Err(Error::Spawn {
                name,
                reason: "empty command".to_string(),
            });
        }
        Ok(Self::new(name, color, argv, cwd))
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn pty(mut self) -> Self {
        self.mode = LaunchMode::Pty;
        self
    }

    pub fn with_sink(mut self, sink: LineSink) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl std::fmt::Debug for LaunchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchSpec")
            .field("name", &self.name)
            .field("argv", &self.argv)
            .field("cwd", &self.cwd)
            .field("env", &self.env)
            .field("mode", &self.mode)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// A running child the orchestrator can stop.
#[async_trait]
pub trait Supervised: Send {
    fn name(&self) -> &str;

    fn pid(&self) -> u32;

    /// Terminate gracefully, escalating to a forced kill after `timeout`.
    async fn stop_graceful(&mut self, timeout: Duration) -> Result<()>;
}

/// Starts children. Abstracted so supervisors can be tested without real processes.
#[async_trait]
pub trait Spawner: Send + Sync {
    async fn spawn(&self, spec: LaunchSpec) -> Result<Box<dyn Supervised>>;
}

/// Spawns real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSpawner;

#[async_trait]
impl Spawner for ProcessSpawner {
    async fn spawn(&self, spec: LaunchSpec) -> Result<Box<dyn Supervised>> {
        let child = ChildProcess::start(spec)?;
        tracing::debug!("Started {} (PID {})", child.name(), child.pid());
        Ok(Box::new(child))
    }
}
