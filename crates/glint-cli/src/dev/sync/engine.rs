use glint_config::SyncSettings;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::pull::pull_asset;
use super::queue::TaskQueue;
use super::state::{checksum, SyncState};
use super::{Priority, SyncEvent, SyncOp, SyncOutcome, SyncTask};
use crate::dev::filter::{asset_key, ChangeFilter};
use crate::dev::remote::RemoteApi;
use crate::dev::theme::Theme;
use crate::dev::watcher::{WatchEvent, WatchKind};
use crate::error::{RemoteError, SyncError};

/// What [`SyncEngine::enqueue`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A task was created or merged into a pending one
    Queued,
    /// Content matches the last synced checksum
    Unchanged,
    /// The key is excluded by the change filter
    Ignored,
    /// The engine is shutting down
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkSyncOptions {
    pub priority: Priority,
    /// Put liquid and JSON files in the high lane regardless of `priority`
    pub prioritize_templates: bool,
    /// Upload local JSON over differing remote JSON. When off, the remote
    /// copy is pulled instead.
    pub overwrite_json: bool,
    /// Delete remote assets that have no local file
    pub delete_missing: bool,
}

impl Default for BulkSyncOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Low,
            prioritize_templates: false,
            overwrite_json: true,
            delete_missing: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct BulkSyncReport {
    pub uploads: usize,
    /// Uploads placed in the high lane
    pub high_priority: usize,
    pub deletes: usize,
    pub pulled: usize,
    pub unchanged: usize,
    pub failures: Vec<SyncError>,
}

/// Uploads local changes to the remote theme with a bounded worker pool.
pub struct SyncEngine {
    inner: Arc<EngineInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

struct EngineInner {
    api: Arc<dyn RemoteApi>,
    theme_id: u64,
    root: PathBuf,
    filter: Arc<dyn ChangeFilter>,
    state: SyncState,
    queue: TaskQueue,
    settings: SyncSettings,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        theme: &Theme,
        filter: Arc<dyn ChangeFilter>,
        state: SyncState,
        settings: SyncSettings,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = EngineInner {
            api,
            theme_id: theme.id,
            root: theme.root.clone(),
            filter,
            state,
            queue: TaskQueue::new(),
            settings,
            events,
        };

        (
            Self {
                inner: Arc::new(inner),
                workers: Mutex::new(Vec::new()),
                cancel,
            },
            rx,
        )
    }

    /// Spawn `worker_count` workers. Calling it again adds more.
    pub fn start(&self, worker_count: usize) {
        let mut workers = self.workers.lock();
        for id in 0..worker_count.max(1) {
            let inner = Arc::clone(&self.inner);
            let cancel = self.cancel.clone();
            workers.push(tokio::spawn(async move {
                inner.work(id, cancel).await;
            }));
        }
        tracing::debug!(workers = workers.len(), "sync engine started");
    }

    /// Queue the change described by `event` unless its content is already
    /// synced. Safe to call repeatedly for the same event.
    pub async fn enqueue(
        &self,
        event: &WatchEvent,
        priority: Priority,
    ) -> Result<EnqueueOutcome, SyncError> {
        let inner = &self.inner;
        let key = event.key.as_str();
        if !inner.filter.accepts(key) {
            return Ok(EnqueueOutcome::Ignored);
        }

        let content = match event.kind {
            WatchKind::Deleted => None,
            WatchKind::Created | WatchKind::Modified => {
                match tokio::fs::read(inner.root.join(key)).await {
                    Ok(content) => Some(content),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
                    Err(source) => {
                        return Err(SyncError::Io {
                            key: key.to_string(),
                            source,
                        })
                    }
                }
            }
        };

        // A queued or running task may be about to change the recorded
        // checksum, so only an idle key can be short-circuited.
        let busy = inner.queue.contains(key);
        let op = match content {
            Some(content) => {
                if !busy && inner.state.checksum(key).as_deref() == Some(&*checksum(&content)) {
                    return Ok(EnqueueOutcome::Unchanged);
                }
                SyncOp::Upload
            }
            None => {
                if !busy && inner.state.get(key).is_none() {
                    return Ok(EnqueueOutcome::Unchanged);
                }
                SyncOp::Delete
            }
        };

        if inner.queue.push(key, op, priority) {
            tracing::debug!(%key, ?op, ?priority, "queued sync task");
            Ok(EnqueueOutcome::Queued)
        } else {
            Ok(EnqueueOutcome::Closed)
        }
    }

    /// Compare every local asset against the recorded remote checksums and
    /// queue what differs.
    pub async fn bulk_sync(&self, options: BulkSyncOptions) -> Result<BulkSyncReport, SyncError> {
        let inner = &self.inner;
        let root = inner.root.clone();
        let filter = Arc::clone(&inner.filter);
        let local = tokio::task::spawn_blocking(move || scan_local(&root, filter.as_ref()))
            .await
            .map_err(|e| SyncError::Io {
                key: String::new(),
                source: std::io::Error::other(e),
            })?;

        let mut report = BulkSyncReport::default();
        let mut seen = HashSet::with_capacity(local.len());

        for (key, sum) in local {
            seen.insert(key.clone());
            let record = inner.state.get(&key);

            match record {
                Some(record) if record.checksum == sum => report.unchanged += 1,
                Some(record) if is_json(&key) && !options.overwrite_json => {
                    match pull_asset(
                        inner.api.as_ref(),
                        inner.theme_id,
                        &inner.root,
                        &inner.state,
                        &key,
                        record.remote_updated_at,
                    )
                    .await
                    {
                        Ok(_) => report.pulled += 1,
                        Err(err) => {
                            tracing::warn!("could not pull {}: {}", key, err);
                            report.failures.push(err);
                        }
                    }
                }
                _ => {
                    let priority = if options.prioritize_templates && is_template(&key) {
                        Priority::High
                    } else {
                        options.priority
                    };
                    if inner.queue.push(&key, SyncOp::Upload, priority) {
                        report.uploads += 1;
                        if priority == Priority::High {
                            report.high_priority += 1;
                        }
                    }
                }
            }
        }

        if options.delete_missing {
            for key in inner.state.keys() {
                if !seen.contains(&key)
                    && inner.filter.accepts(&key)
                    && inner.queue.push(&key, SyncOp::Delete, options.priority)
                {
                    report.deletes += 1;
                }
            }
        }

        tracing::debug!(
            uploads = report.uploads,
            deletes = report.deletes,
            pulled = report.pulled,
            unchanged = report.unchanged,
            "bulk sync queued"
        );
        Ok(report)
    }

    /// Wait until the high lane (and the low lane with `include_low`) drains.
    pub async fn wait_idle(&self, include_low: bool) {
        self.inner.queue.wait_idle(include_low).await;
    }

    /// Stop the pool. Queued tasks are abandoned and counted, running ones
    /// get `shutdown_grace_secs` to finish before they are cancelled.
    ///
    /// Returns the number of abandoned tasks. Idempotent.
    pub async fn shutdown(&self) -> usize {
        let abandoned = self.inner.queue.close();
        if abandoned > 0 {
            tracing::warn!(abandoned, "abandoned queued sync tasks");
        }

        let handles = std::mem::take(&mut *self.workers.lock());
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.inner.settings.shutdown_grace_secs);

        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                self.cancel.cancel();
                handle.abort();
                tracing::warn!("sync worker did not finish in time");
            }
        }

        tracing::debug!("sync engine stopped");
        abandoned
    }

    pub fn state(&self) -> &SyncState {
        &self.inner.state
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.inner.queue
    }
}

impl EngineInner {
    async fn work(&self, id: usize, cancel: CancellationToken) {
        while let Some(task) = self.queue.pop().await {
            let outcome = match task.op {
                SyncOp::Upload => self.upload(&task.key, &cancel).await,
                SyncOp::Delete => self.delete(&task.key, &cancel).await,
            }
            .unwrap_or_else(SyncOutcome::Failed);

            self.queue.complete(&task.key);
            log_outcome(id, &task, &outcome);

            let _ = self.events.send(SyncEvent {
                key: task.key,
                priority: task.priority,
                outcome,
            });
        }
    }

    async fn upload(&self, key: &str, cancel: &CancellationToken) -> Result<SyncOutcome, SyncError> {
        let content = match tokio::fs::read(self.root.join(key)).await {
            Ok(content) => content,
            // The delete event for it is on its way.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SyncOutcome::Skipped)
            }
            Err(source) => {
                return Err(SyncError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        };

        let sum = checksum(&content);
        if self.state.checksum(key).as_deref() == Some(sum.as_str()) {
            return Ok(SyncOutcome::Skipped);
        }

        let asset = self
            .with_retry(key, cancel, || {
                self.api.put_asset(self.theme_id, key, &content)
            })
            .await?;

        self.state.record(key, sum.clone(), asset.updated_at);
        Ok(SyncOutcome::Uploaded { checksum: sum })
    }

    async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<SyncOutcome, SyncError> {
        if tokio::fs::try_exists(self.root.join(key)).await.unwrap_or(false) {
            return Ok(SyncOutcome::Skipped);
        }

        match self
            .with_retry(key, cancel, || self.api.delete_asset(self.theme_id, key))
            .await
        {
            Ok(())
            | Err(SyncError::Remote {
                source: RemoteError::NotFound { .. },
                ..
            }) => {}
            Err(err) => return Err(err),
        }

        self.state.remove(key);
        Ok(SyncOutcome::Deleted)
    }

    async fn with_retry<T, F, Fut>(
        &self,
        key: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut delay = Duration::from_millis(self.settings.backoff_ms);
        let mut attempts = 1;

        loop {
            let source = match attempt().await {
                Ok(value) => return Ok(value),
                Err(source) => source,
            };

            if !source.is_retryable() {
                return Err(SyncError::Remote {
                    key: key.to_string(),
                    source,
                });
            }
            if attempts >= max_attempts {
                return Err(SyncError::Exhausted {
                    key: key.to_string(),
                    attempts,
                    source,
                });
            }

            tracing::debug!(%key, attempts, "retrying in {:?}: {}", delay, source);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(SyncError::Abandoned { key: key.to_string() });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = delay.saturating_mul(2);
            attempts += 1;
        }
    }
}

fn log_outcome(worker: usize, task: &SyncTask, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Uploaded { .. } => tracing::debug!(worker, key = %task.key, "uploaded"),
        SyncOutcome::Deleted => tracing::debug!(worker, key = %task.key, "deleted"),
        SyncOutcome::Skipped => tracing::debug!(worker, key = %task.key, "already in sync"),
        SyncOutcome::Failed(err) => tracing::warn!(worker, "sync failed: {}", err),
    }
}

/// Checksums of every accepted local asset.
fn scan_local(root: &Path, filter: &dyn ChangeFilter) -> Vec<(String, String)> {
    let mut assets = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("skipping unreadable entry: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(key) = asset_key(root, entry.path()) else {
            continue;
        };
        if !filter.accepts(&key) {
            continue;
        }
        match std::fs::read(entry.path()) {
            Ok(content) => assets.push((key, checksum(&content))),
            Err(err) => tracing::warn!(%key, "skipping unreadable file: {}", err),
        }
    }
    assets.sort();
    assets
}

fn is_json(key: &str) -> bool {
    key.ends_with(".json")
}

/// Liquid and JSON outside `assets/`: what the storefront renders from.
fn is_template(key: &str) -> bool {
    !key.starts_with("assets/") && (key.ends_with(".liquid") || key.ends_with(".json"))
}
