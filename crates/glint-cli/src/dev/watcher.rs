//! Local file watcher with per-path debouncing.
//!
//! Raw `notify` events are collapsed per path within the debounce window and
//! turned into [`WatchEvent`]s keyed by asset key. The final kind is decided
//! when the window closes, by looking at whether the file still exists.

use chrono::{DateTime, Utc};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::dev::filter::{asset_key, ChangeFilter};
use crate::error::{CliError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    pub kind: WatchKind,
    pub observed_at: DateTime<Utc>,
}

impl WatchEvent {
    pub fn new(key: impl Into<String>, kind: WatchKind) -> Self {
        Self {
            key: key.into(),
            kind,
            observed_at: Utc::now(),
        }
    }
}

/// Collapses bursts of raw events per path.
///
/// Every new event for a path pushes its deadline out by the full window, so
/// an editor's write-rename-chmod sequence yields one event.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, PendingChange>,
}

#[derive(Debug, Clone, Copy)]
struct PendingChange {
    first: WatchKind,
    deadline: Instant,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn record(&mut self, path: PathBuf, kind: WatchKind, now: Instant) {
        let deadline = now + self.window;
        self.pending
            .entry(path)
            .and_modify(|p| p.deadline = deadline)
            .or_insert(PendingChange {
                first: kind,
                deadline,
            });
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every path whose window has closed, with the kind
    /// of the first event seen for it.
    pub fn flush_due(&mut self, now: Instant) -> Vec<(PathBuf, WatchKind)> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();

        let mut flushed: Vec<_> = due
            .into_iter()
            .filter_map(|path| self.pending.remove(&path).map(|p| (path, p.first)))
            .collect();
        flushed.sort_by(|a, b| a.0.cmp(&b.0));
        flushed
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Kind reported for a flushed path.
pub fn final_kind(first: WatchKind, exists: bool) -> WatchKind {
    match (exists, first) {
        (false, _) => WatchKind::Deleted,
        (true, WatchKind::Created) => WatchKind::Created,
        (true, _) => WatchKind::Modified,
    }
}

fn raw_kind(kind: &EventKind) -> Option<WatchKind> {
    match kind {
        EventKind::Create(_) => Some(WatchKind::Created),
        EventKind::Modify(_) => Some(WatchKind::Modified),
        EventKind::Remove(_) => Some(WatchKind::Deleted),
        _ => None,
    }
}

/// Watches the theme root and emits debounced [`WatchEvent`]s.
///
/// Uses native notifications unless `poll` is set, in which case a
/// [`PollWatcher`] scans the tree on an interval. Both sit behind the same
/// `notify::Watcher` trait object.
pub struct LocalWatcher {
    root: PathBuf,
    filter: Arc<dyn ChangeFilter>,
    debounce: Duration,
    poll_interval: Option<Duration>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalWatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        filter: Arc<dyn ChangeFilter>,
        debounce: Duration,
        poll_interval: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            root: root.into(),
            filter,
            debounce,
            poll_interval,
            cancel,
            task: Mutex::new(None),
        }
    }

    /// Begin observation. Fails if the root is missing or cannot be watched.
    pub fn start(&self) -> Result<mpsc::Receiver<WatchEvent>> {
        let root = self
            .root
            .canonicalize()
            .map_err(|_| CliError::FileNotFound(self.root.clone()))?;

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let handler = move |res: notify::Result<Event>| {
            let _ = raw_tx.send(res);
        };

        let mut watcher: Box<dyn Watcher + Send> = match self.poll_interval {
            Some(interval) => Box::new(PollWatcher::new(
                handler,
                notify::Config::default().with_poll_interval(interval),
            )?),
            None => Box::new(RecommendedWatcher::new(handler, notify::Config::default())?),
        };
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let (tx, rx) = mpsc::channel(256);
        let filter = Arc::clone(&self.filter);
        let cancel = self.cancel.clone();
        let mut debouncer = Debouncer::new(self.debounce);

        tracing::debug!(
            root = %root.display(),
            polling = self.poll_interval.is_some(),
            "local watcher started"
        );

        let handle = tokio::spawn(async move {
            // Dropping the watcher at the end of the task stops notifications.
            let _watcher = watcher;

            loop {
                let deadline = debouncer.next_deadline();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    raw = raw_rx.recv() => match raw {
                        Some(Ok(event)) => {
                            let Some(kind) = raw_kind(&event.kind) else { continue };
                            let now = Instant::now();
                            for path in event.paths {
                                debouncer.record(path, kind, now);
                            }
                        }
                        Some(Err(err)) => tracing::warn!("file watcher error: {}", err),
                        None => break,
                    },
                    _ = sleep_until(deadline), if deadline.is_some() => {
                        for (path, first) in debouncer.flush_due(Instant::now()) {
                            let Some(event) = to_event(&root, &path, first, filter.as_ref()) else {
                                continue;
                            };
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            tracing::debug!("local watcher stopped");
        });

        *self.task.lock() = Some(handle);
        Ok(rx)
    }

    /// Halt observation and release the underlying watcher.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn to_event(
    root: &Path,
    path: &Path,
    first: WatchKind,
    filter: &dyn ChangeFilter,
) -> Option<WatchEvent> {
    let key = asset_key(root, path)?;
    if !filter.accepts(&key) {
        return None;
    }

    let kind = match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => return None,
        Ok(_) => final_kind(first, true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => final_kind(first, false),
        Err(err) => {
            tracing::warn!(%key, "skipping unreadable path: {}", err);
            return None;
        }
    };

    Some(WatchEvent::new(key, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::filter::IgnoreFilter;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_debouncer_collapses_burst() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(300));
        let path = PathBuf::from("/theme/assets/theme.css");

        debouncer.record(path.clone(), WatchKind::Created, start);
        debouncer.record(path.clone(), WatchKind::Modified, start + Duration::from_millis(100));
        debouncer.record(path.clone(), WatchKind::Modified, start + Duration::from_millis(200));

        assert!(debouncer.flush_due(start + Duration::from_millis(350)).is_empty());

        let flushed = debouncer.flush_due(start + Duration::from_millis(500));
        assert_eq!(flushed, vec![(path, WatchKind::Created)]);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_debouncer_keeps_paths_apart() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(300));
        debouncer.record("/t/a".into(), WatchKind::Modified, start);
        debouncer.record("/t/b".into(), WatchKind::Modified, start + Duration::from_millis(200));

        assert_eq!(
            debouncer.next_deadline(),
            Some(start + Duration::from_millis(300))
        );
        let flushed = debouncer.flush_due(start + Duration::from_millis(300));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, PathBuf::from("/t/a"));
    }

    #[test]
    fn test_final_kind() {
        assert_eq!(final_kind(WatchKind::Created, true), WatchKind::Created);
        assert_eq!(final_kind(WatchKind::Modified, true), WatchKind::Modified);
        assert_eq!(final_kind(WatchKind::Deleted, true), WatchKind::Modified);
        assert_eq!(final_kind(WatchKind::Created, false), WatchKind::Deleted);
    }

    #[test]
    fn test_to_event_filters_and_classifies() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("assets")).unwrap();
        fs::write(root.join("assets/theme.css"), "body{}").unwrap();
        fs::write(root.join("notes.txt"), "x").unwrap();
        let filter = IgnoreFilter::from_root(root, &[]).unwrap();

        let event = to_event(root, &root.join("assets/theme.css"), WatchKind::Modified, &filter)
            .unwrap();
        assert_eq!(event.key, "assets/theme.css");
        assert_eq!(event.kind, WatchKind::Modified);

        let gone = to_event(root, &root.join("assets/old.css"), WatchKind::Modified, &filter)
            .unwrap();
        assert_eq!(gone.kind, WatchKind::Deleted);

        assert!(to_event(root, &root.join("notes.txt"), WatchKind::Modified, &filter).is_none());
        assert!(to_event(root, &root.join("assets"), WatchKind::Created, &filter).is_none());
    }

    #[tokio::test]
    async fn test_polling_watcher_reports_edit() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sections")).unwrap();
        let filter: Arc<dyn ChangeFilter> =
            Arc::new(IgnoreFilter::from_root(dir.path(), &[]).unwrap());

        let watcher = LocalWatcher::new(
            dir.path(),
            filter,
            Duration::from_millis(50),
            Some(Duration::from_millis(50)),
            CancellationToken::new(),
        );
        let mut rx = watcher.start().unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        fs::write(dir.path().join("sections/header.liquid"), "<header></header>").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("channel closed");
        assert_eq!(event.key, "sections/header.liquid");
        assert_ne!(event.kind, WatchKind::Deleted);

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_start_on_missing_root_fails() {
        let filter: Arc<dyn ChangeFilter> = Arc::new(
            IgnoreFilter::from_root(Path::new("/nonexistent/theme"), &[]).unwrap(),
        );
        let watcher = LocalWatcher::new(
            "/nonexistent/theme",
            filter,
            Duration::from_millis(50),
            None,
            CancellationToken::new(),
        );
        assert!(matches!(watcher.start(), Err(CliError::FileNotFound(_))));
    }
}
