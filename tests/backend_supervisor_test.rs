use async_trait::async_trait;
use flux::backend::BackendSupervisor;
use flux::process::{LaunchMode, LaunchSpec, ProcessSpawner, Spawner, Supervised};
use flux::{Error, Result};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tracks how many fake backends are alive at once.
#[derive(Default)]
struct Census {
    live: AtomicUsize,
    peak: AtomicUsize,
    spawned: AtomicUsize,
    next_pid: AtomicU32,
}

struct CountedChild {
    pid: u32,
    census: Arc<Census>,
    stopped: bool,
}

#[async_trait]
impl Supervised for CountedChild {
    fn name(&self) -> &str {
        "Backend"
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    async fn stop_graceful(&mut self, _timeout: Duration) -> Result<()> {
        // Stopping takes a moment, widening the window for overlapping restarts
        tokio::time::sleep(Duration::from_millis(5)).await;
        if !self.stopped {
            self.stopped = true;
            self.census.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct CountingSpawner {
    census: Arc<Census>,
}

#[async_trait]
impl Spawner for CountingSpawner {
    async fn spawn(&self, spec: LaunchSpec) -> Result<Box<dyn Supervised>> {
        assert_eq!(spec.mode, LaunchMode::Pty);
        assert!(spec.env.iter().any(|(k, v)| k == "PORT" && v == "4100"));

        let live = self.census.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.census.peak.fetch_max(live, Ordering::SeqCst);
        self.census.spawned.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(Box::new(CountedChild {
            pid: 1000 + self.census.next_pid.fetch_add(1, Ordering::SeqCst),
            census: Arc::clone(&self.census),
            stopped: false,
        }))
    }
}

fn counting_supervisor() -> (Arc<BackendSupervisor>, Arc<Census>) {
    let census = Arc::new(Census::default());
    let spawner = Arc::new(CountingSpawner {
        census: Arc::clone(&census),
    });
    let supervisor = Arc::new(BackendSupervisor::new(spawner, std::env::temp_dir(), 4100));
    (supervisor, census)
}

fn is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_restarts_keep_one_backend() {
    let (supervisor, census) = counting_supervisor();
    supervisor.start().await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..25 {
        let supervisor = Arc::clone(&supervisor);
        tasks.push(tokio::spawn(async move { supervisor.restart().await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(census.spawned.load(Ordering::SeqCst), 26);
    assert_eq!(census.peak.load(Ordering::SeqCst), 1);
    assert_eq!(census.live.load(Ordering::SeqCst), 1);

    supervisor.shutdown().await;
    assert_eq!(census.live.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_racing_shutdown_leaves_nothing_running() {
    let (supervisor, census) = counting_supervisor();
    supervisor.start().await.unwrap();

    let restarts: Vec<_> = (0..10)
        .map(|_| {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.restart().await })
        })
        .collect();
    supervisor.shutdown().await;

    for task in restarts {
        match task.await.unwrap() {
            Ok(_) | Err(Error::ShuttingDown) => {}
            Err(e) => panic!("unexpected restart error: {}", e),
        }
    }

    // Restarts queued behind the shutdown must not resurrect the backend
    assert!(supervisor.pid().await.is_none());
    assert_eq!(census.live.load(Ordering::SeqCst), 0);
    assert!(matches!(supervisor.start().await, Err(Error::ShuttingDown)));
}

#[tokio::test]
async fn test_real_backend_restart_replaces_process() {
    let root = tempfile::tempdir().unwrap();
    let supervisor = BackendSupervisor::new(Arc::new(ProcessSpawner), root.path(), 4101)
        .with_stop_timeout(Duration::from_secs(2))
        .with_command(vec![
            "sh".to_string(),
            "-c".to_string(),
            "exec sleep 30".to_string(),
        ])
        .with_sink(Arc::new(|_line: &str| {}));

    let first = supervisor.start().await.unwrap();
    assert!(is_alive(first));

    let second = supervisor.restart().await.unwrap();
    assert_ne!(first, second);
    assert!(!is_alive(first), "old backend {} survived a restart", first);
    assert!(is_alive(second));

    supervisor.shutdown().await;
    assert!(!is_alive(second));
}

#[tokio::test]
async fn test_failed_spawn_leaves_no_backend() {
    let root = tempfile::tempdir().unwrap();
    let supervisor = BackendSupervisor::new(Arc::new(ProcessSpawner), root.path(), 4102)
        .with_command(vec!["/definitely/not/a/go/toolchain".to_string()]);

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, Error::Spawn { .. }), "{:?}", err);
    assert!(supervisor.pid().await.is_none());
}
