//! Log tailing and error detection
//!
//! A [`LogWatcher`] tails one file from a [`LogCursor`], feeds complete lines
//! in order to a [`BlockAssembler`], debounces the resulting [`ErrorEvent`]s
//! and hands them to a consumer over a bounded channel. The loop wakes on a
//! [`Ticker`] and, when the platform supports it, on filesystem events for
//! the file's directory.

pub mod classifier;
pub mod cursor;
mod debounce;

pub use classifier::{BlockAssembler, ErrorEvent, ErrorKind, Severity, SourceLocation, classify};
pub use cursor::{Chunk, LineSplitter, LogCursor};
pub use debounce::Debouncer;

use crate::clock::{SharedClock, Ticker, system_clock};
use crate::config::WatcherConfig;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bytes consumed per poll before yielding
const READ_CHUNK_BYTES: u64 = 1024 * 1024;

/// Upper bound of the pause after repeated read errors
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Log watcher errors
#[derive(Debug, Clone, Error)]
pub enum WatchError {
    #[error("'{0}' is already being watched")]
    AlreadyWatched(PathBuf),

    #[error("invalid watcher configuration: {0}")]
    InvalidConfig(String),

    #[error("log watcher IO error: {0}")]
    Io(String),
}

impl WatchError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyWatched(_) => "WATCH_ALREADY_ACTIVE",
            Self::InvalidConfig(_) => "WATCH_INVALID_CONFIG",
            Self::Io(_) => "WATCH_IO",
        }
    }
}

/// Set of files currently owned by a watcher
///
/// Paths are compared in canonical form, so `logs/../logs/app.log` and
/// `logs/app.log` count as the same file.
#[derive(Debug, Clone, Default)]
pub struct LogWatcherRegistry {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl LogWatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path`; the claim is released when the guard drops
    pub fn register(&self, path: &Path) -> Result<Registration, WatchError> {
        let canonical = canonical_path(path);
        if !self.active.lock().insert(canonical.clone()) {
            return Err(WatchError::AlreadyWatched(canonical));
        }
        Ok(Registration {
            path: canonical,
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.active.lock().contains(&canonical_path(path))
    }
}

/// Claim on a watched path
#[derive(Debug)]
pub struct Registration {
    path: PathBuf,
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Registration {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.active.lock().remove(&self.path);
    }
}

/// Canonical form of a path that may not exist yet
fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            parent
                .canonicalize()
                .map(|p| p.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

#[derive(Debug, Default)]
struct Counters {
    lines: AtomicU64,
    emitted: AtomicU64,
    suppressed: AtomicU64,
    dropped: AtomicU64,
    rotations: AtomicU64,
    read_errors: AtomicU64,
}

/// Counters of a running watcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatchStats {
    pub lines: u64,
    pub emitted: u64,
    /// Repeats suppressed by the debounce window
    pub suppressed: u64,
    /// Events lost because the consumer fell behind
    pub dropped: u64,
    pub rotations: u64,
    pub read_errors: u64,
}

impl Counters {
    fn snapshot(&self) -> WatchStats {
        WatchStats {
            lines: self.lines.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }
}

/// A running watcher
#[derive(Debug)]
pub struct WatchHandle {
    /// Classified, debounced events in file order
    pub events: mpsc::Receiver<ErrorEvent>,
    path: PathBuf,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> WatchStats {
        self.counters.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Split into the event receiver and a handle to await the task
    pub fn into_parts(self) -> (mpsc::Receiver<ErrorEvent>, WatchTask) {
        (
            self.events,
            WatchTask {
                counters: self.counters,
                task: self.task,
            },
        )
    }
}

/// The watcher task, detached from its event receiver
pub struct WatchTask {
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl WatchTask {
    pub fn stats(&self) -> WatchStats {
        self.counters.snapshot()
    }

    /// Wait for the watcher to finish and return its final counters
    pub async fn join(self) -> WatchStats {
        if let Err(e) = self.task.await {
            warn!("Log watcher task failed: {}", e);
        }
        self.counters.snapshot()
    }
}

/// Builder and entry point for tailing one file
pub struct LogWatcher {
    config: WatcherConfig,
    clock: SharedClock,
    registry: LogWatcherRegistry,
}

impl LogWatcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self {
            config,
            clock: system_clock(),
            registry: LogWatcherRegistry::default(),
        }
    }

    /// Share path ownership with other watchers
    pub fn with_registry(mut self, registry: LogWatcherRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Start tailing until `token` is cancelled
    ///
    /// Fails when another watcher registered on the same registry already
    /// owns the file.
    pub async fn spawn(self, token: CancellationToken) -> Result<WatchHandle, WatchError> {
        if self.config.path.as_os_str().is_empty() {
            return Err(WatchError::InvalidConfig("path is empty".into()));
        }
        if self.config.channel_capacity == 0 {
            return Err(WatchError::InvalidConfig("channel capacity must be positive".into()));
        }

        let registration = self.registry.register(&self.config.path)?;
        let cursor = if self.config.start_at_end {
            LogCursor::at_end(&self.config.path)
                .await
                .map_err(|e| WatchError::Io(e.to_string()))?
        } else {
            LogCursor::default()
        };

        let (tx, events) = mpsc::channel(self.config.channel_capacity);
        let counters = Arc::new(Counters::default());
        let path = self.config.path.clone();
        info!(
            "Watching '{}' from offset {}",
            path.display(),
            cursor.offset()
        );

        let state = TailState {
            debouncer: Debouncer::new(self.config.debounce_window(), self.clock),
            assembler: BlockAssembler::new(self.config.max_block_lines),
            splitter: LineSplitter::new(),
            cursor,
            tx,
            counters: Arc::clone(&counters),
        };
        let task = tokio::spawn(tail_loop(self.config, state, registration, token));

        Ok(WatchHandle {
            events,
            path,
            counters,
            task,
        })
    }
}

struct TailState {
    cursor: LogCursor,
    splitter: LineSplitter,
    assembler: BlockAssembler,
    debouncer: Debouncer,
    tx: mpsc::Sender<ErrorEvent>,
    counters: Arc<Counters>,
}

impl TailState {
    fn process_lines(&mut self, lines: Vec<String>) {
        for line in lines {
            self.counters.lines.fetch_add(1, Ordering::Relaxed);
            if let Some(event) = self.assembler.push(&line) {
                self.emit(event);
            }
        }
    }

    fn flush(&mut self) {
        if let Some(event) = self.assembler.flush() {
            self.emit(event);
        }
    }

    fn emit(&mut self, event: ErrorEvent) {
        if !self.debouncer.admit(&event.fingerprint) {
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!("Suppressed repeated {} ({})", event.kind, event.fingerprint);
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Event channel full, dropped {} event ({} dropped so far)",
                    event.kind, dropped
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event receiver gone, discarding event");
            }
        }
    }

    /// Read and process one chunk; returns whether more data is waiting
    async fn poll(&mut self, path: &Path) -> std::io::Result<bool> {
        let Some(chunk) = self.cursor.read_new(path, READ_CHUNK_BYTES).await? else {
            self.flush();
            return Ok(false);
        };

        if chunk.rotated {
            self.counters.rotations.fetch_add(1, Ordering::Relaxed);
            info!("'{}' was rotated or truncated, reading from start", path.display());
            if let Some(line) = self.splitter.take_partial() {
                self.process_lines(vec![line]);
            }
            self.flush();
        }

        if chunk.bytes.is_empty() {
            self.flush();
            return Ok(false);
        }
        let lines = self.splitter.push(&chunk.bytes);
        self.process_lines(lines);
        Ok(chunk.more)
    }

    fn finish(&mut self) {
        if let Some(line) = self.splitter.take_partial() {
            self.process_lines(vec![line]);
        }
        self.flush();
    }
}

/// Filesystem wake-ups for the directory holding `path`; best effort
fn fs_wakeups(path: &Path, wake: Arc<Notify>) -> Option<RecommendedWatcher> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            wake.notify_one();
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            debug!("Filesystem notifications unavailable: {}", e);
            return None;
        }
    };
    match watcher.watch(&dir, RecursiveMode::NonRecursive) {
        Ok(()) => Some(watcher),
        Err(e) => {
            debug!("Cannot watch '{}': {}", dir.display(), e);
            None
        }
    }
}

async fn tail_loop(
    config: WatcherConfig,
    mut state: TailState,
    _registration: Registration,
    token: CancellationToken,
) {
    let path = config.path.clone();
    let wake = Arc::new(Notify::new());
    let _fs_watcher = fs_wakeups(&path, Arc::clone(&wake));
    let mut ticker = Ticker::new(config.poll_interval());
    let mut error_streak: u32 = 0;
    let mut more = false;

    loop {
        if !more {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
                _ = wake.notified() => {}
            }
        } else if token.is_cancelled() {
            break;
        }

        match state.poll(&path).await {
            Ok(has_more) => {
                more = has_more;
                error_streak = 0;
            }
            Err(e) => {
                more = false;
                error_streak = error_streak.saturating_add(1);
                state.counters.read_errors.fetch_add(1, Ordering::Relaxed);
                let backoff = config
                    .poll_interval()
                    .saturating_mul(2u32.saturating_pow(error_streak.min(16)))
                    .min(MAX_ERROR_BACKOFF);
                warn!(
                    "Failed to read '{}': {} (retrying in {:?})",
                    path.display(),
                    e,
                    backoff
                );
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    state.finish();
    info!("Stopped watching '{}'", path.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_registry_rejects_same_canonical_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();
        let registry = LogWatcherRegistry::new();

        let first = registry.register(&path).unwrap();
        let alias = dir.path().join(".").join("app.log");
        let err = registry.register(&alias).unwrap_err();
        assert_eq!(err.error_code(), "WATCH_ALREADY_ACTIVE");

        drop(first);
        assert!(!registry.is_watched(&path));
        assert!(registry.register(&alias).is_ok());
    }

    #[test]
    fn test_registry_handles_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("later.log");
        let registry = LogWatcherRegistry::new();
        let _claim = registry.register(&path).unwrap();
        assert!(registry.is_watched(&path));
    }

    #[tokio::test]
    async fn test_spawn_rejects_empty_path() {
        let watcher = LogWatcher::new(WatcherConfig::default());
        let result = watcher.spawn(CancellationToken::new()).await;
        assert!(matches!(result, Err(WatchError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_partial_line_flushed_on_stop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "local.ERROR: half written").unwrap();

        let token = CancellationToken::new();
        let config = WatcherConfig {
            poll_interval_ms: 10,
            start_at_end: false,
            ..WatcherConfig::new(&path)
        };
        let handle = LogWatcher::new(config).spawn(token.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.stats().emitted, 0);

        token.cancel();
        let (mut events, task) = handle.into_parts();
        let stats = task.join().await;
        assert_eq!(stats.emitted, 1);

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, ErrorKind::GenericError);
        assert_eq!(event.message, "local.ERROR: half written");
    }
}
