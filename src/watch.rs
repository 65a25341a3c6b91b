//! Source file watching for backend hot reload.
//!
//! `notify` reports raw filesystem events on its own thread; they are
//! filtered down to Go source creates and modifies and forwarded over a
//! channel to an async loop. That loop applies the reload debounce: an event
//! is accepted only if at least one window has passed since the last
//! accepted event. Accepted events are handed to a [`ChangeHandler`] on a
//! fresh task so a slow reload never stalls the watcher.

use crate::error::{panic_message, Error, Result};
use async_trait::async_trait;
use futures::FutureExt;
use notify_debouncer_full::{
    new_debouncer,
    notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher},
    DebounceEventResult, Debouncer as NotifyDebouncer, FileIdMap,
};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Minimum spacing between accepted reload events.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

/// Directories watched relative to the project root.
pub const WATCH_PATHS: &[&str] = &["internal/api", "internal/types", "cmd/server"];

/// Coalescing applied by notify before events reach the debounce.
const NOTIFY_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Create,
    Modify,
}

/// A change to a watched Go source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchKind,
}

impl WatchEvent {
    /// Build an event from a raw notify event kind, if it is one we react to.
    pub fn from_notify(path: &Path, kind: &EventKind) -> Option<Self> {
        let kind = match kind {
            EventKind::Create(_) => WatchKind::Create,
            EventKind::Modify(_) => WatchKind::Modify,
            _ => return None,
        };
        if !is_go_source(path) {
            return None;
        }
        Some(Self {
            path: path.to_path_buf(),
            kind,
        })
    }
}

pub fn is_go_source(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "go")
}

/// Accepts at most one event per window.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_accept: Mutex<Option<Instant>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accept: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Accept an event arriving at `now` if the window since the last
    /// accepted event has elapsed. Accepting advances the window.
    pub fn try_accept(&self, now: Instant) -> bool {
        let mut last = self.last_accept.lock();
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < self.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_WINDOW)
    }
}

/// Receives debounced change events.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn on_change(&self, event: WatchEvent);

    /// Called when `on_change` panicked.
    async fn on_panic(&self, message: String) {
        tracing::error!("Change handler panicked: {}", message);
    }
}

/// Recursive watches on the backend source directories.
pub struct FileWatcher {
    notify: Option<NotifyDebouncer<RecommendedWatcher, FileIdMap>>,
    dispatch: Option<JoinHandle<()>>,
    watched: Vec<PathBuf>,
    skipped: Vec<PathBuf>,
}

impl FileWatcher {
    /// Watch `paths` (relative to `root`) and dispatch debounced events to `handler`.
    ///
    /// Paths that do not exist or cannot be watched are skipped and reported
    /// through [`skipped`](Self::skipped). Must be called within a tokio runtime.
    pub fn start<S: AsRef<str>>(
        root: &Path,
        paths: &[S],
        window: Duration,
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<WatchEvent>();

        let mut notify = new_debouncer(NOTIFY_TIMEOUT, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        for path in &event.paths {
                            if let Some(change) = WatchEvent::from_notify(path, &event.kind) {
                                let _ = tx.send(change);
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::debug!("File watcher error: {}", error);
                    }
                }
            }
        })
        .map_err(|e| Error::Watch(format!("Failed to create file watcher: {}", e)))?;

        let mut watched = Vec::new();
        let mut skipped = Vec::new();
        for rel in paths {
            let path = root.join(rel.as_ref());
            if !path.exists() {
                skipped.push(path);
                continue;
            }
            match notify.watcher().watch(&path, RecursiveMode::Recursive) {
                Ok(()) => {
                    tracing::debug!("Watching {}", path.display());
                    watched.push(path);
                }
                Err(e) => {
                    tracing::warn!("Failed to watch {}: {}", path.display(), e);
                    skipped.push(path);
                }
            }
        }

        let debouncer = Debouncer::new(window);
        let dispatch = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !debouncer.try_accept(Instant::now()) {
                    tracing::trace!("Debounced change to {}", event.path.display());
                    continue;
                }
                tracing::debug!("Change detected: {} ({:?})", event.path.display(), event.kind);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let outcome = AssertUnwindSafe(handler.on_change(event)).catch_unwind().await;
                    if let Err(panic) = outcome {
                        handler.on_panic(panic_message(panic)).await;
                    }
                });
            }
        });

        Ok(Self {
            notify: Some(notify),
            dispatch: Some(dispatch),
            watched,
            skipped,
        })
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Requested paths that are not being watched.
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }

    /// Stop watching. No further events are dispatched. Idempotent.
    pub fn close(&mut self) {
        if let Some(notify) = self.notify.take() {
            notify.stop();
            tracing::debug!("File watcher closed");
        }
        if let Some(dispatch) = self.dispatch.take() {
            dispatch.abort();
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.close();
    }
}
