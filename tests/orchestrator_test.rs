/// End-to-end dev sessions with in-process stand-ins for the dev servers.
///
/// `FakeSpawner` never forks: for the frontend it serves a tiny axum app on
/// the `--port` from the dev command, for the backend it serves one on
/// `$PORT` that also publishes an OpenAPI document. Everything else (port
/// discovery, readiness, proxy, watcher, type pipeline, teardown) is real.
use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use flux::output::{QuietOutput, UserOutput};
use flux::port::is_bound;
use flux::process::{LaunchSpec, Spawner, Supervised};
use flux::shutdown::{ShutdownCoordinator, ShutdownTimeouts};
use flux::typegen::ROUTE_MANIFEST;
use flux::{Error, Orchestrator, OrchestratorOptions, ProjectConfig, Result};
use std::fs;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const OPENAPI: &str = r#"{"openapi":"3.1.0","info":{"title":"Demo","version":"0.1.0"},"paths":{"/api/hello":{"get":{}}}}"#;

const HANDLERS: &str = r#"package api

type HelloInput struct {
	Name string `query:"name"`
}

type HelloOutput struct {
	Body Greeting
}

type Greeting struct {
	Message string `json:"message"`
}

func Register(api huma.API) {
	huma.Get(api, "/api/hello", Hello)
}

func Hello(ctx context.Context, input *HelloInput) (*HelloOutput, error) {
	return nil, nil
}
"#;

#[derive(Default)]
struct Stats {
    frontend_spawns: AtomicUsize,
    backend_spawns: AtomicUsize,
    live: AtomicUsize,
    next_pid: AtomicU32,
}

struct FakeSpawner {
    stats: Arc<Stats>,
    frontend_binds: bool,
    backend_binds: bool,
}

impl FakeSpawner {
    fn new(frontend_binds: bool, backend_binds: bool) -> (Arc<Self>, Arc<Stats>) {
        let stats = Arc::new(Stats::default());
        let spawner = Arc::new(Self {
            stats: Arc::clone(&stats),
            frontend_binds,
            backend_binds,
        });
        (spawner, stats)
    }
}

struct FakeServer {
    name: String,
    pid: u32,
    server: Option<JoinHandle<()>>,
    stats: Arc<Stats>,
}

#[async_trait]
impl Supervised for FakeServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    async fn stop_graceful(&mut self, _timeout: Duration) -> Result<()> {
        if let Some(server) = self.server.take() {
            server.abort();
            // Wait for the task to drop its listener
            let _ = server.await;
        }
        if self.pid != 0 {
            self.pid = 0;
            self.stats.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn port_from_argv(argv: &[String]) -> Option<u16> {
    argv.windows(2)
        .find(|w| w[0] == "--port")
        .and_then(|w| w[1].parse().ok())
}

fn port_from_env(env: &[(String, String)]) -> Option<u16> {
    env.iter()
        .find(|(k, _)| k == "PORT")
        .and_then(|(_, v)| v.parse().ok())
}

async fn bind_with_retry(port: u16) -> TcpListener {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => return listener,
            Err(_) if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Err(e) => panic!("fake server could not bind {}: {}", port, e),
        }
    }
}

#[async_trait]
impl Spawner for FakeSpawner {
    async fn spawn(&self, spec: LaunchSpec) -> Result<Box<dyn Supervised>> {
        let (port, app, binds) = if spec.name == flux::logfmt::BACKEND_NAME {
            self.stats.backend_spawns.fetch_add(1, Ordering::SeqCst);
            let app = Router::new()
                .route("/api/openapi.json", get(|| async { OPENAPI }))
                .route("/api/hello", get(|| async { "backend hello" }));
            (port_from_env(&spec.env), app, self.backend_binds)
        } else {
            self.stats.frontend_spawns.fetch_add(1, Ordering::SeqCst);
            let app = Router::new().fallback(|| async { "frontend page" });
            (port_from_argv(&spec.argv), app, self.frontend_binds)
        };
        let port = port.expect("launch spec carries a port");

        let server = if binds {
            let listener = bind_with_retry(port).await;
            Some(tokio::spawn(async move {
                axum::serve(listener, app).await.ok();
            }))
        } else {
            None
        };

        self.stats.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeServer {
            name: spec.name,
            pid: 50_000 + self.stats.next_pid.fetch_add(1, Ordering::SeqCst),
            server,
            stats: Arc::clone(&self.stats),
        }))
    }
}

/// Temp project with Go sources under the watched directories.
fn create_project() -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    for rel in ["internal/api", "internal/types", "cmd/server", "frontend"] {
        fs::create_dir_all(dir.path().join(rel)).unwrap();
    }
    fs::write(dir.path().join("internal/api/hello.go"), HANDLERS).unwrap();
    dir
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn test_options() -> OrchestratorOptions {
    OrchestratorOptions {
        frontend_ready_timeout: Duration::from_secs(5),
        backend_ready_timeout: Duration::from_secs(5),
        proxy_ready_timeout: Duration::from_secs(5),
        shutdown: ShutdownTimeouts {
            child_stop: Duration::from_secs(1),
            children_cap: Duration::from_secs(3),
            proxy: Duration::from_secs(1),
            sweep_ports: false,
        },
        debounce_window: Duration::from_millis(1500),
        settle_delay: Duration::from_millis(50),
        bootstrap_frontend: false,
        sync_go_modules: false,
        pre_sweep: false,
        handle_signals: false,
        ..OrchestratorOptions::default()
    }
}

fn build(project: &TempDir, spawner: Arc<FakeSpawner>, options: OrchestratorOptions) -> Arc<Orchestrator> {
    build_with_output(project, spawner, options, Arc::new(QuietOutput))
}

fn build_with_output(
    project: &TempDir,
    spawner: Arc<FakeSpawner>,
    options: OrchestratorOptions,
    output: Arc<dyn UserOutput>,
) -> Arc<Orchestrator> {
    let mut config = ProjectConfig {
        name: "demo".to_string(),
        port: free_port(),
        ..ProjectConfig::default()
    };
    config.frontend.dev_cmd = "vite --port {{port}}".to_string();

    Arc::new(
        Orchestrator::builder()
            .config(config)
            .project_root(project.path())
            .options(options)
            .output(output)
            .spawner(spawner)
            .build()
            .expect("orchestrator should build"),
    )
}

async fn eventually<F: Fn() -> bool>(max: Duration, check: F) -> bool {
    let deadline = Instant::now() + max;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

async fn http_get(port: u16, path: &str) -> (u16, String) {
    let resp = reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap()
        .get(format!("http://127.0.0.1:{}{}", port, path))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.text().await.unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_session_routes_reloads_and_tears_down() {
    let project = create_project();
    let (spawner, stats) = FakeSpawner::new(true, true);
    let orchestrator = build(&project, spawner, test_options());

    let session = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.start().await })
    };

    // Startup is done once the proxy answers
    assert!(eventually(Duration::from_secs(15), || orchestrator.ports().is_some()).await);
    let ports = orchestrator.ports().unwrap();
    assert!(flux::port::wait_ready(ports.proxy, Duration::from_secs(15)).await);
    assert!(ports.frontend > ports.proxy);
    assert!(ports.backend > ports.frontend);

    let (status, body) = http_get(ports.proxy, "/api/hello").await;
    assert_eq!(status, 200);
    assert_eq!(body, "backend hello");
    let (status, body) = http_get(ports.proxy, "/dashboard").await;
    assert_eq!(status, 200);
    assert_eq!(body, "frontend page");

    // Initial generation ran before the proxy came up
    let spec = project.path().join("build/openapi.json");
    assert_eq!(fs::read_to_string(&spec).unwrap(), OPENAPI);
    let client = project.path().join("frontend/src/lib/api.ts");
    assert!(fs::read_to_string(&client).unwrap().contains("function getApiHello("));
    assert!(project.path().join(ROUTE_MANIFEST).exists());

    // A Go change restarts the backend and regenerates the client
    fs::remove_file(&client).unwrap();
    fs::write(
        project.path().join("internal/api/hello.go"),
        HANDLERS.replace("\"/api/hello\"", "\"/api/hello/{name}\""),
    )
    .unwrap();
    assert!(
        eventually(Duration::from_secs(10), || {
            stats.backend_spawns.load(Ordering::SeqCst) >= 2
        })
        .await,
        "backend was not restarted after a Go change"
    );
    assert!(eventually(Duration::from_secs(10), || client.exists()).await);
    assert!(fs::read_to_string(&client).unwrap().contains("function getApiHelloByName("));

    // Frontend plus exactly one backend, still reachable through the proxy
    assert!(eventually(Duration::from_secs(5), || stats.live.load(Ordering::SeqCst) == 2).await);
    assert!(flux::port::wait_ready(ports.backend, Duration::from_secs(5)).await);
    let (status, _) = http_get(ports.proxy, "/api/hello").await;
    assert_eq!(status, 200);

    let coordinator = orchestrator.coordinator();
    assert!(coordinator.shutdown("test finished").await);
    let result = tokio::time::timeout(Duration::from_secs(10), session)
        .await
        .expect("session did not end after shutdown")
        .unwrap();
    assert!(result.is_ok(), "{:?}", result);

    assert_eq!(stats.live.load(Ordering::SeqCst), 0);
    assert_eq!(stats.frontend_spawns.load(Ordering::SeqCst), 1);
    assert!(!is_bound(ports.proxy).await);
    assert!(!is_bound(ports.backend).await);
    assert_eq!(coordinator.sequences_run(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backend_that_never_binds_fails_startup() {
    let project = create_project();
    let (spawner, stats) = FakeSpawner::new(true, false);
    let options = OrchestratorOptions {
        backend_ready_timeout: Duration::from_secs(1),
        ..test_options()
    };
    let orchestrator = build(&project, spawner, options);

    let err = tokio::time::timeout(Duration::from_secs(15), orchestrator.start())
        .await
        .expect("startup should fail within the ready timeout")
        .unwrap_err();

    match err {
        Error::PortTimeout { name, .. } => assert_eq!(name, "Backend"),
        other => panic!("expected PortTimeout, got {:?}", other),
    }
    // Frontend and backend were both torn down by the emergency shutdown
    assert_eq!(stats.live.load(Ordering::SeqCst), 0);
    assert_eq!(orchestrator.coordinator().sequences_run(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_during_startup_interrupts() {
    let project = create_project();
    let (spawner, stats) = FakeSpawner::new(false, true);
    let options = OrchestratorOptions {
        frontend_ready_timeout: Duration::from_secs(60),
        ..test_options()
    };
    let orchestrator = build(&project, spawner, options);

    let session = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.start().await })
    };
    assert!(
        eventually(Duration::from_secs(5), || {
            stats.frontend_spawns.load(Ordering::SeqCst) == 1
        })
        .await
    );

    orchestrator.coordinator().shutdown("interrupted").await;
    let result = tokio::time::timeout(Duration::from_secs(10), session)
        .await
        .expect("startup was not interrupted")
        .unwrap();

    assert!(matches!(result, Err(Error::Interrupted)), "{:?}", result);
    assert_eq!(stats.backend_spawns.load(Ordering::SeqCst), 0);
    assert_eq!(stats.live.load(Ordering::SeqCst), 0);
}

/// Begins teardown from another worker the moment the frontend reports ready,
/// and holds startup until the teardown is under way.
#[derive(Default)]
struct ShutdownOnFrontendReady {
    coordinator: OnceLock<Arc<ShutdownCoordinator>>,
}

impl UserOutput for ShutdownOnFrontendReady {
    fn status(&self, _message: &str) {}

    fn success(&self, message: &str) {
        if !message.starts_with("Frontend ready") {
            return;
        }
        let Some(coordinator) = self.coordinator.get() else {
            return;
        };
        let shutdown = Arc::clone(coordinator);
        tokio::spawn(async move {
            shutdown.shutdown("signal during startup").await;
        });
        let deadline = Instant::now() + Duration::from_secs(5);
        while !coordinator.is_shutting_down() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
    fn emergency(&self, _message: &str) {}
    fn blank(&self) {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backend_registered_during_teardown_never_survives() {
    let project = create_project();
    let (spawner, stats) = FakeSpawner::new(true, true);
    let output = Arc::new(ShutdownOnFrontendReady::default());
    let orchestrator = build_with_output(&project, spawner, test_options(), output.clone());
    output.coordinator.set(orchestrator.coordinator()).ok();

    let result = tokio::time::timeout(Duration::from_secs(15), orchestrator.start())
        .await
        .expect("startup was not interrupted");

    assert!(matches!(result, Err(Error::Interrupted)), "{:?}", result);
    assert!(orchestrator.coordinator().is_shutting_down());
    assert_eq!(stats.live.load(Ordering::SeqCst), 0, "a child outlived start()");
}

#[tokio::test]
async fn test_backend_handed_over_after_shutdown_refuses_to_start() {
    let (spawner, stats) = FakeSpawner::new(true, true);
    let coordinator = ShutdownCoordinator::new(Arc::new(QuietOutput), test_options().shutdown);
    assert!(coordinator.shutdown("test").await);

    let backend = Arc::new(flux::backend::BackendSupervisor::new(spawner, ".", free_port()));
    coordinator.set_backend(Arc::clone(&backend)).await;

    assert!(backend.is_closed());
    assert!(matches!(backend.start().await, Err(Error::ShuttingDown)));
    assert_eq!(stats.backend_spawns.load(Ordering::SeqCst), 0);
}
