/// Debounce properties and live watcher behaviour.
///
/// The proptest half drives `Debouncer` with random arrival times and checks
/// the acceptance rule; the tokio half writes real files under a temp tree.
use async_trait::async_trait;
use flux::watch::{ChangeHandler, Debouncer, FileWatcher, WatchEvent, WATCH_PATHS};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Gaps between consecutive events, in milliseconds.
fn gaps_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..3_000, 1..60)
}

proptest! {
    #[test]
    fn accepted_events_are_at_least_a_window_apart(
        window_ms in 1u64..2_500,
        gaps in gaps_strategy(),
    ) {
        let window = Duration::from_millis(window_ms);
        let debouncer = Debouncer::new(window);
        let t0 = Instant::now();

        let mut at = t0;
        let mut accepted: Vec<Instant> = Vec::new();
        for gap in gaps {
            at += Duration::from_millis(gap);
            let expected = match accepted.last() {
                None => true,
                Some(prev) => at.duration_since(*prev) >= window,
            };
            let got = debouncer.try_accept(at);
            prop_assert_eq!(got, expected);
            if got {
                accepted.push(at);
            }
        }

        prop_assert!(!accepted.is_empty());
        for pair in accepted.windows(2) {
            prop_assert!(pair[1].duration_since(pair[0]) >= window);
        }
    }

    #[test]
    fn burst_inside_window_accepts_once(
        offsets in prop::collection::vec(0u64..1_999, 1..40),
    ) {
        let debouncer = Debouncer::new(Duration::from_secs(2));
        let t0 = Instant::now();
        let mut sorted = offsets;
        sorted.sort_unstable();

        let accepted = sorted
            .iter()
            .filter(|ms| debouncer.try_accept(t0 + Duration::from_millis(**ms)))
            .count();
        prop_assert_eq!(accepted, 1);
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<WatchEvent>>,
}

#[async_trait]
impl ChangeHandler for Recorder {
    async fn on_change(&self, event: WatchEvent) {
        self.events.lock().push(event);
    }
}

impl Recorder {
    fn count(&self) -> usize {
        self.events.lock().len()
    }
}

/// Temp project with every default watch directory present.
fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    for rel in WATCH_PATHS {
        fs::create_dir_all(dir.path().join(rel)).unwrap();
    }
    dir
}

async fn wait_for(recorder: &Recorder, count: usize, max: Duration) -> bool {
    let deadline = Instant::now() + max;
    while Instant::now() < deadline {
        if recorder.count() >= count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    recorder.count() >= count
}

#[tokio::test]
async fn test_go_change_reaches_handler() {
    let dir = project();
    let recorder = Arc::new(Recorder::default());
    let mut watcher = FileWatcher::start(
        dir.path(),
        WATCH_PATHS,
        Duration::from_millis(300),
        recorder.clone(),
    )
    .unwrap();
    assert_eq!(watcher.watched().len(), WATCH_PATHS.len());
    assert!(watcher.skipped().is_empty());

    fs::write(
        dir.path().join("internal/api/users.go"),
        "package api\n",
    )
    .unwrap();

    assert!(wait_for(&recorder, 1, Duration::from_secs(5)).await);
    let event = recorder.events.lock()[0].clone();
    assert_eq!(event.path.extension().unwrap(), "go");

    watcher.close();
}

#[tokio::test]
async fn test_non_go_files_are_ignored() {
    let dir = project();
    let recorder = Arc::new(Recorder::default());
    let mut watcher = FileWatcher::start(
        dir.path(),
        WATCH_PATHS,
        Duration::from_millis(100),
        recorder.clone(),
    )
    .unwrap();

    fs::write(dir.path().join("internal/types/notes.md"), "# notes\n").unwrap();
    fs::write(dir.path().join("cmd/server/config.yaml"), "a: 1\n").unwrap();

    assert!(!wait_for(&recorder, 1, Duration::from_millis(800)).await);
    watcher.close();
}

#[tokio::test]
async fn test_burst_of_saves_dispatches_once() {
    let dir = project();
    let recorder = Arc::new(Recorder::default());
    let mut watcher = FileWatcher::start(
        dir.path(),
        WATCH_PATHS,
        Duration::from_secs(10),
        recorder.clone(),
    )
    .unwrap();

    for i in 0..5 {
        fs::write(
            dir.path().join(format!("internal/api/handler{}.go", i)),
            "package api\n",
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    assert!(wait_for(&recorder, 1, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(recorder.count(), 1);

    watcher.close();
}

#[tokio::test]
async fn test_closed_watcher_dispatches_nothing() {
    let dir = project();
    let recorder = Arc::new(Recorder::default());
    let mut watcher = FileWatcher::start(
        dir.path(),
        WATCH_PATHS,
        Duration::from_millis(100),
        recorder.clone(),
    )
    .unwrap();
    watcher.close();

    fs::write(dir.path().join("internal/api/late.go"), "package api\n").unwrap();

    assert!(!wait_for(&recorder, 1, Duration::from_millis(800)).await);
}

#[derive(Default)]
struct Panicking {
    panics: Mutex<Vec<String>>,
}

#[async_trait]
impl ChangeHandler for Panicking {
    async fn on_change(&self, _event: WatchEvent) {
        panic!("reload exploded");
    }

    async fn on_panic(&self, message: String) {
        self.panics.lock().push(message);
    }
}

#[tokio::test]
async fn test_handler_panic_is_reported() {
    let dir = project();
    let handler = Arc::new(Panicking::default());
    let mut watcher = FileWatcher::start(
        dir.path(),
        WATCH_PATHS,
        Duration::from_millis(100),
        handler.clone(),
    )
    .unwrap();

    fs::write(dir.path().join("internal/api/boom.go"), "package api\n").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while handler.panics.lock().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(handler.panics.lock().first().map(String::as_str), Some("reload exploded"));

    watcher.close();
}
