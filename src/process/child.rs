//! Long-lived child processes with captured output.
//!
//! Two launch modes:
//!
//! - **Pipe**: stdout and stderr are captured through pipes and the child is
//!   put in its own process group, so signalling the group reaches every
//!   descendant (npm → node → esbuild).
//! - **PTY**: the child gets a pseudo-terminal as its controlling terminal
//!   and a fresh session. Tools that only colourise when attached to a TTY
//!   keep their colours. Both streams arrive merged on the PTY master.
//!
//! Every non-blank captured line goes through [`crate::logfmt`] unless the
//! [`LaunchSpec`] carries its own sink.

use super::{LaunchMode, LaunchSpec, LineSink, Supervised};
use crate::error::{Error, Result};
use crate::logfmt;
use async_trait::async_trait;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::{self, killpg, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader as AsyncBufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Time allowed for the kernel to reap a child after SIGKILL.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// A running child and everything needed to tear it down.
pub struct ChildProcess {
    name: String,
    color: &'static str,
    pid: u32,
    /// Process group led by the child. Both launch modes create one.
    pgid: Option<Pid>,
    /// PTY master, owned by the reader thread. Informational.
    pty_master: Option<RawFd>,
    child: Child,
    readers: Vec<JoinHandle<()>>,
}

impl ChildProcess {
    /// Spawn the process described by `spec` and start capturing its output.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(spec: LaunchSpec) -> Result<Self> {
        if spec.argv.is_empty() {
            return Err(Error::Spawn {
                name: spec.name,
                reason: "empty command".to_string(),
            });
        }

        tracing::debug!(
            "Spawning {} in {:?} ({:?}): {:?}",
            spec.name,
            spec.cwd,
            spec.mode,
            spec.argv
        );

        match spec.mode {
            LaunchMode::Pipe => Self::start_piped(spec),
            LaunchMode::Pty => Self::start_pty(spec),
        }
    }

    fn base_command(spec: &LaunchSpec) -> Command {
        let mut cmd = Command::new(&spec.argv[0]);
        cmd.args(&spec.argv[1..])
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);
        cmd
    }

    fn start_piped(spec: LaunchSpec) -> Result<Self> {
        let mut cmd = Self::base_command(&spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = cmd.spawn().map_err(|e| spawn_error(&spec, e))?;
        let pid = child_pid(&spec, &child)?;

        let sink = line_sink(&spec);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_lines(stdout, Arc::clone(&sink))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_lines(stderr, Arc::clone(&sink))));
        }

        Ok(Self {
            name: spec.name,
            color: spec.color,
            pid,
            pgid: Some(Pid::from_raw(pid as i32)),
            pty_master: None,
            child,
            readers,
        })
    }

    fn start_pty(spec: LaunchSpec) -> Result<Self> {
        let winsize = nix::pty::Winsize {
            ws_row: 40,
            ws_col: 160,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let pty = nix::pty::openpty(&winsize, None).map_err(|e| Error::Spawn {
            name: spec.name.clone(),
            reason: format!("openpty failed: {}", e),
        })?;

        // Only the child's stdio may carry the slave across exec, and no other
        // child may inherit either side
        for fd in [&pty.master, &pty.slave] {
            set_cloexec(fd).map_err(|e| Error::Spawn {
                name: spec.name.clone(),
                reason: format!("failed to set FD_CLOEXEC on PTY: {}", e),
            })?;
        }
        let master_fd = pty.master.as_raw_fd();

        let stdio = |fd: &OwnedFd| -> Result<Stdio> {
            fd.try_clone()
                .map(Stdio::from)
                .map_err(|e| spawn_error(&spec, e))
        };

        let mut cmd = Self::base_command(&spec);
        if std::env::var_os("TERM").is_none() {
            cmd.env("TERM", "xterm-256color");
        }
        cmd.stdin(stdio(&pty.slave)?)
            .stdout(stdio(&pty.slave)?)
            .stderr(stdio(&pty.slave)?);

        // SAFETY: the closure runs in the child between fork() and exec().
        // It only calls setsid and ioctl, which are async-signal-safe, and
        // captures nothing.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let spawned = cmd.spawn();
        // Drop our copies of the slave so the master reports EOF once the child is gone
        drop(cmd);
        drop(pty.slave);
        let child = spawned.map_err(|e| spawn_error(&spec, e))?;
        let pid = child_pid(&spec, &child)?;

        let sink = line_sink(&spec);
        let master = std::fs::File::from(pty.master);
        let thread_name = format!("{}-pty", spec.name.to_lowercase());
        std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || read_pty(master, sink))
            .map_err(|e| Error::Spawn {
                name: spec.name.clone(),
                reason: format!("failed to start PTY reader: {}", e),
            })?;

        Ok(Self {
            name: spec.name,
            color: spec.color,
            pid,
            pgid: Some(Pid::from_raw(pid as i32)),
            pty_master: Some(master_fd),
            child,
            readers: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> &'static str {
        self.color
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pgid(&self) -> Option<u32> {
        self.pgid.map(|p| p.as_raw() as u32)
    }

    pub fn pty_master(&self) -> Option<RawFd> {
        self.pty_master
    }

    /// Exit status if the child has already exited. Reaps it.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Wait for the child to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.finish_readers().await;
        Ok(status)
    }

    /// SIGTERM the process group, wait up to `timeout`, then SIGKILL.
    pub async fn stop_graceful(&mut self, timeout: Duration) -> Result<()> {
        if self.try_exit_status().is_some() {
            self.kill_group_leftovers();
            self.abort_readers();
            return Ok(());
        }

        let pid = Pid::from_raw(self.pid as i32);
        let sent = match self.pgid {
            Some(pgid) => killpg(pgid, Signal::SIGTERM).or_else(|_| signal::kill(pid, Signal::SIGTERM)),
            None => signal::kill(pid, Signal::SIGTERM),
        };
        if let Err(e) = sent {
            tracing::debug!("SIGTERM to {} (PID {}) failed: {}", self.name, self.pid, e);
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("{} exited after SIGTERM: {}", self.name, status);
                // Descendants that ignored SIGTERM still belong to the group
                self.kill_group_leftovers();
            }
            Ok(Err(e)) => {
                tracing::warn!("Error waiting for {}: {}", self.name, e);
                self.force_kill().await;
            }
            Err(_) => {
                tracing::warn!(
                    "{} did not exit within {:?} of SIGTERM, sending SIGKILL",
                    self.name,
                    timeout
                );
                self.force_kill().await;
            }
        }

        self.abort_readers();
        Ok(())
    }

    /// SIGKILL the process group, then the PID directly, and reap.
    pub async fn force_kill(&mut self) {
        let pid = Pid::from_raw(self.pid as i32);
        if let Some(pgid) = self.pgid {
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                tracing::debug!("SIGKILL to group {} failed: {}", pgid, e);
            }
        }
        let _ = signal::kill(pid, Signal::SIGKILL);

        if tokio::time::timeout(REAP_TIMEOUT, self.child.wait())
            .await
            .is_err()
        {
            tracing::warn!("{} (PID {}) was not reaped after SIGKILL", self.name, self.pid);
        }
    }

    fn kill_group_leftovers(&self) {
        if let Some(pgid) = self.pgid {
            if killpg(pgid, None).is_ok() {
                tracing::debug!("Process group {} of {} still has members, killing", pgid, self.name);
                let _ = killpg(pgid, Signal::SIGKILL);
            }
        }
    }

    async fn finish_readers(&mut self) {
        for reader in self.readers.drain(..) {
            // Grandchildren can keep the pipes open after the child exits
            let abort = reader.abort_handle();
            if tokio::time::timeout(Duration::from_millis(500), reader)
                .await
                .is_err()
            {
                abort.abort();
            }
        }
    }

    fn abort_readers(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

#[async_trait]
impl Supervised for ChildProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    async fn stop_graceful(&mut self, timeout: Duration) -> Result<()> {
        ChildProcess::stop_graceful(self, timeout).await
    }
}

/// Run a command in pipe mode to completion, streaming its output.
pub async fn run_to_completion(spec: LaunchSpec) -> Result<()> {
    let command = spec.argv.join(" ");
    let mut child = ChildProcess::start(LaunchSpec {
        mode: LaunchMode::Pipe,
        ..spec
    })?;
    let status = child.wait().await?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::CommandFailed {
            command,
            exit_code: status.code().unwrap_or(-1),
        })
    }
}

fn set_cloexec(fd: &OwnedFd) -> nix::Result<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map(|_| ())
}

fn spawn_error(spec: &LaunchSpec, e: std::io::Error) -> Error {
    tracing::error!(
        "Failed to spawn {}: {} (cwd: {:?}, argv: {:?})",
        spec.name,
        e,
        spec.cwd,
        spec.argv
    );
    Error::Spawn {
        name: spec.name.clone(),
        reason: format!("{}: {}", spec.argv[0], e),
    }
}

fn child_pid(spec: &LaunchSpec, child: &Child) -> Result<u32> {
    match child.id() {
        Some(pid) if pid > 1 && pid <= i32::MAX as u32 => Ok(pid),
        other => Err(Error::Spawn {
            name: spec.name.clone(),
            reason: format!("child has no usable PID ({:?})", other),
        }),
    }
}

fn line_sink(spec: &LaunchSpec) -> LineSink {
    match &spec.sink {
        Some(sink) => Arc::clone(sink),
        None => {
            let name = spec.name.clone();
            let color = spec.color;
            Arc::new(move |line: &str| logfmt::emit_line(&name, line, color))
        }
    }
}

async fn pump_lines<R>(stream: R, sink: LineSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = AsyncBufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => deliver(&buf, &sink),
        }
    }
}

fn read_pty(master: std::fs::File, sink: LineSink) {
    let mut reader = BufReader::new(master);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        // EIO once the last slave descriptor closes
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => deliver(&buf, &sink),
        }
    }
}

fn deliver(buf: &[u8], sink: &LineSink) {
    let text = String::from_utf8_lossy(buf);
    let line = text.trim_end_matches(['\n', '\r']);
    if !line.trim().is_empty() {
        sink(line);
    }
}
