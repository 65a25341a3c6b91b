//! Last-resort port reclamation.
//!
//! Finds every process listening on a port and SIGKILLs it. Used before
//! startup to clear listeners left by a crashed run, and at the very end of
//! shutdown so nothing outlives the orchestrator.

use std::time::Duration;
use tokio::process::Command;

/// Upper bound on a single `lsof` invocation.
const LSOF_TIMEOUT: Duration = Duration::from_secs(5);

/// PIDs of processes listening on `port`, excluding this process.
///
/// Only listening sockets are considered: a browser holding a connection to
/// the proxy port is not a stale server. Returns an empty list when `lsof`
/// is unavailable.
pub async fn listening_pids(port: u16) -> Vec<u32> {
    let output = tokio::time::timeout(
        LSOF_TIMEOUT,
        Command::new("lsof")
            .args(["-t", "-i", &format!("tcp:{}", port), "-sTCP:LISTEN"])
            .kill_on_drop(true)
            .output(),
    )
    .await;

    let output = match output {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::debug!("lsof unavailable, skipping port {}: {}", port, e);
            return Vec::new();
        }
        Err(_) => {
            tracing::warn!("lsof timed out listing listeners on port {}", port);
            return Vec::new();
        }
    };

    // lsof exits 1 when nothing matches
    parse_pid_lines(&String::from_utf8_lossy(&output.stdout), std::process::id())
}

fn parse_pid_lines(stdout: &str, own_pid: u32) -> Vec<u32> {
    let mut pids = Vec::new();
    for line in stdout.lines() {
        let Ok(pid) = line.trim().parse::<u32>() else {
            continue;
        };
        // Never kill ourselves, or init
        if pid == own_pid || pid <= 1 {
            continue;
        }
        if !pids.contains(&pid) {
            pids.push(pid);
        }
    }
    pids
}

/// SIGKILL every process listening on any of `ports`. Returns how many were signalled.
pub async fn sweep_ports(ports: &[u16]) -> usize {
    let mut killed = 0;
    for &port in ports {
        for pid in listening_pids(port).await {
            if force_kill(pid) {
                tracing::info!("Killed PID {} holding port {}", pid, port);
                killed += 1;
            }
        }
    }
    if killed > 0 {
        // Give the kernel a moment to release the sockets
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    killed
}

#[cfg(unix)]
fn force_kill(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("kill -9 {} failed: {}", pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn force_kill(pid: u32) -> bool {
    tracing::warn!("Cannot kill PID {} on this platform", pid);
    false
}
