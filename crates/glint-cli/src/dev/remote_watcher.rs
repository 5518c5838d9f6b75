//! Pulls online-editor edits back into the working copy.
//!
//! Only runs with `editor_sync`. Each poll lists the remote assets and pulls
//! every key whose remote `updated_at` moved past the recorded one with
//! different content. Keys held by the sync engine, and files edited on disk
//! but not yet queued, are handled per [`remote_wins`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dev::filter::ChangeFilter;
use crate::dev::remote::{RemoteApi, RemoteAsset};
use crate::dev::sync::{checksum, pull_asset, SyncEngine, SyncRecord};
use crate::dev::theme::Theme;
use crate::dev::watcher::{WatchEvent, WatchKind};
use crate::error::{RemoteError, SyncError};
use crate::ui;

/// What one poll did.
#[derive(Debug, Default)]
pub struct PollReport {
    pub pulled: Vec<String>,
    /// Left for the next poll: in flight, or a newer local edit is pending
    pub deferred: Vec<String>,
    pub conflicts: usize,
    pub failures: Vec<SyncError>,
}

/// Conflict tie-break between a remote edit and a pending local upload.
///
/// The remote copy wins only when it is strictly newer than the local edit.
/// Equal timestamps go to the local edit unless `ties_favor_local` is off.
pub fn remote_wins(
    remote_updated_at: DateTime<Utc>,
    queued_at: DateTime<Utc>,
    ties_favor_local: bool,
) -> bool {
    remote_updated_at > queued_at || (remote_updated_at == queued_at && !ties_favor_local)
}

fn has_changed(asset: &RemoteAsset, record: Option<&SyncRecord>) -> bool {
    match record {
        None => true,
        Some(record) => {
            asset.updated_at > record.remote_updated_at
                && asset.checksum.as_deref() != Some(record.checksum.as_str())
        }
    }
}

/// The working copy of a key as the watcher found it before pulling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalCopy {
    /// Matches the last sync, the remote copy, or does not exist
    Clean,
    /// Saved since the last sync, not yet seen by the sync engine
    Edited(DateTime<Utc>),
    /// Removed since the last sync
    Deleted,
}

pub struct RemoteWatcher {
    inner: Arc<WatcherInner>,
    poll_interval: Duration,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct WatcherInner {
    api: Arc<dyn RemoteApi>,
    theme_id: u64,
    root: PathBuf,
    engine: Arc<SyncEngine>,
    filter: Arc<dyn ChangeFilter>,
    ties_favor_local: bool,
    events: mpsc::Sender<WatchEvent>,
}

impl RemoteWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<dyn RemoteApi>,
        theme: &Theme,
        engine: Arc<SyncEngine>,
        filter: Arc<dyn ChangeFilter>,
        poll_interval: Duration,
        ties_favor_local: bool,
        events: mpsc::Sender<WatchEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                api,
                theme_id: theme.id,
                root: theme.root.clone(),
                engine,
                filter,
                ties_favor_local,
                events,
            }),
            poll_interval,
            cancel,
            task: Mutex::new(None),
        }
    }

    /// Poll on the configured interval until stopped. A failed poll is
    /// logged and retried on the next tick.
    pub fn start(&self) {
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let handle = tokio::spawn(async move {
            // The first tick fires immediately; the initial sync just ran.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = inner.poll() => {
                        if let Err(err) = result {
                            tracing::warn!("remote poll failed: {}", err);
                        }
                    }
                }
            }
            tracing::debug!("remote watcher stopped");
        });

        tracing::debug!(interval = ?self.poll_interval, "remote watcher started");
        *self.task.lock() = Some(handle);
    }

    /// Run a single poll now.
    pub async fn poll_once(&self) -> Result<PollReport, RemoteError> {
        self.inner.poll().await
    }

    /// Halt polling. A pull that is already writing finishes first.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl WatcherInner {
    async fn poll(&self) -> Result<PollReport, RemoteError> {
        let listing = self.api.list_assets(self.theme_id).await?;
        let queue = self.engine.queue();
        let state = self.engine.state();
        let mut report = PollReport::default();

        for asset in listing {
            let key = asset.key.as_str();
            if !self.filter.accepts(key) || !has_changed(&asset, state.get(key).as_ref()) {
                continue;
            }

            if queue.is_in_flight(key) {
                report.deferred.push(asset.key);
                continue;
            }

            if let Some(pending) = queue.pending(key) {
                report.conflicts += 1;
                if !remote_wins(asset.updated_at, pending.queued_at, self.ties_favor_local) {
                    ui::conflict(key, "keeping the local edit");
                    report.deferred.push(asset.key);
                    continue;
                }
                ui::conflict(key, "the online editor change is newer and replaces it");
            } else {
                match self.local_copy(&asset, state.get(key).as_ref()).await {
                    LocalCopy::Clean => {}
                    LocalCopy::Edited(modified_at) => {
                        report.conflicts += 1;
                        if !remote_wins(asset.updated_at, modified_at, self.ties_favor_local) {
                            ui::conflict(key, "keeping the unsynced local edit");
                            report.deferred.push(asset.key);
                            continue;
                        }
                        ui::conflict(key, "the online editor change is newer and replaces it");
                    }
                    LocalCopy::Deleted => {
                        report.conflicts += 1;
                        ui::conflict(key, "keeping the local deletion");
                        report.deferred.push(asset.key);
                        continue;
                    }
                }
            }

            // A worker may have taken the key since the checks above.
            if !queue.claim(key) {
                report.deferred.push(asset.key);
                continue;
            }
            let pulled = pull_asset(
                self.api.as_ref(),
                self.theme_id,
                &self.root,
                state,
                key,
                asset.updated_at,
            )
            .await;
            queue.complete(key);

            match pulled {
                Ok(_) => {
                    ui::info(&format!("Pulled {} from the online editor", key));
                    let _ = self
                        .events
                        .send(WatchEvent::new(key, WatchKind::Modified))
                        .await;
                    report.pulled.push(asset.key);
                }
                Err(err) => {
                    tracing::warn!("could not pull {}: {}", key, err);
                    report.failures.push(err);
                }
            }
        }

        if !report.pulled.is_empty() || !report.deferred.is_empty() {
            tracing::debug!(
                pulled = report.pulled.len(),
                deferred = report.deferred.len(),
                "remote poll"
            );
        }
        Ok(report)
    }

    /// Compare the file on disk with the last sync. Edits the local watcher
    /// has not delivered yet would otherwise be overwritten by the pull.
    async fn local_copy(&self, asset: &RemoteAsset, record: Option<&SyncRecord>) -> LocalCopy {
        let path = self.root.join(&asset.key);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return if record.is_some() {
                    LocalCopy::Deleted
                } else {
                    LocalCopy::Clean
                };
            }
            Err(err) => {
                tracing::warn!(key = %asset.key, "could not read local copy: {}", err);
                return LocalCopy::Edited(Utc::now());
            }
        };

        let local = checksum(&content);
        let synced = record.is_some_and(|r| r.checksum == local);
        let same_as_remote = asset.checksum.as_deref() == Some(local.as_str());
        if synced || same_as_remote {
            return LocalCopy::Clean;
        }

        let modified_at = tokio::fs::metadata(&path)
            .await
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        LocalCopy::Edited(modified_at)
    }
}
