//! Dev server lifecycle.
//!
//! [`DevServerController`] owns every running component of `glint serve` and
//! is handed the collaborators it needs at construction; nothing lives in
//! process-wide state. Startup order:
//!
//! 1. Bind the listening socket
//! 2. Resolve the theme and seed [`SyncState`] from the remote listing
//! 3. Initial sync: templates first, static assets continue in the background
//! 4. Serve the request pipeline
//! 5. Watch the working copy (and the online editor with `editor_sync`)
//!
//! Shutdown runs the other way round and is idempotent.

use glint_config::ServeConfig;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dev::broadcast::ReloadBroadcaster;
use crate::dev::cert::{self, CertificateProvider};
use crate::dev::filter::{ChangeFilter, IgnoreFilter};
use crate::dev::pipeline::{
    CdnFontHandler, HotReloadHandler, LocalAssetHandler, Pipeline, ProxyHandler,
};
use crate::dev::reload::{AssetCategory, ReloadDirective, ReloadPolicy};
use crate::dev::remote::RemoteApi;
use crate::dev::remote_watcher::RemoteWatcher;
use crate::dev::server;
use crate::dev::sync::{
    BulkSyncOptions, EnqueueOutcome, Priority, SyncEngine, SyncEvent, SyncOutcome, SyncState,
};
use crate::dev::theme::{self, Theme};
use crate::dev::upstream::Upstream;
use crate::dev::watcher::{LocalWatcher, WatchEvent};
use crate::error::{CliError, Result, ResultExt, SyncError};
use crate::ui;

/// Everything the controller needs from the outside.
pub struct DevServerOptions {
    pub config: ServeConfig,
    pub root: PathBuf,
    pub api: Arc<dyn RemoteApi>,
    pub upstream: Arc<dyn Upstream>,
    pub certificates: Option<Box<dyn CertificateProvider>>,
}

pub struct DevServerController {
    theme: Theme,
    address: String,
    local_addr: SocketAddr,
    broadcaster: ReloadBroadcaster,
    engine: Arc<SyncEngine>,
    local_watcher: LocalWatcher,
    remote_watcher: Option<RemoteWatcher>,
    grace: Duration,
    /// Parent of every component token
    cancel: CancellationToken,
    /// Fired once the controller has fully stopped, or when a stop is requested
    shutdown: CancellationToken,
    /// Fired when the server task ends without being cancelled
    server_exited: CancellationToken,
    server: Mutex<Option<JoinHandle<Result<()>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl DevServerController {
    pub async fn start(options: DevServerOptions) -> Result<Self> {
        let DevServerOptions {
            config,
            root,
            api,
            upstream,
            certificates,
        } = options;

        let listener = server::bind(&config.host, config.port).await?;
        let local_addr = listener.local_addr()?;

        let store = config.store.clone().unwrap_or_default();
        let theme = theme::resolve(api.as_ref(), &store, &root, config.theme.as_deref()).await?;
        ui::info(&format!("Using theme \"{}\" (#{})", theme.name, theme.id));

        let filter: Arc<dyn ChangeFilter> = Arc::new(IgnoreFilter::from_root(&root, &config.ignore)?);
        let local_assets = LocalAssetHandler::new(root.clone(), Arc::clone(&filter), &store, theme.id)?;
        let listing = api
            .list_assets(theme.id)
            .await
            .map_err(|e| e.into_startup(&store))?;
        let state = SyncState::from_listing(&listing);

        let cancel = CancellationToken::new();
        let (engine, mut sync_events) = SyncEngine::new(
            Arc::clone(&api),
            &theme,
            Arc::clone(&filter),
            state,
            config.sync.clone(),
            cancel.child_token(),
        );
        let engine = Arc::new(engine);
        engine.start(config.sync.workers);

        let options = BulkSyncOptions {
            priority: Priority::Low,
            prioritize_templates: true,
            overwrite_json: !config.editor_sync,
            delete_missing: !config.editor_sync,
        };
        if let Err(err) = initial_sync(&engine, &mut sync_events, options).await {
            engine.shutdown().await;
            return Err(err.into());
        }

        let broadcaster = ReloadBroadcaster::new(config.reload.client_buffer);
        let (reloads, coalescer) = broadcaster.spawn_coalescer(
            Duration::from_millis(config.reload.coalesce_ms),
            cancel.child_token(),
        );

        let pipeline = Pipeline::new(
            HotReloadHandler::new(broadcaster.clone(), config.live_reload),
            local_assets,
            CdnFontHandler::new(Arc::clone(&upstream)),
            ProxyHandler::new(upstream, store.as_str(), theme.id),
        );
        tracing::debug!(handlers = ?pipeline.names(), "request pipeline ready");

        let tls = cert::acceptor(certificates.as_deref());
        let scheme = if tls.is_some() { "https" } else { "http" };
        let address = format!("{}://{}:{}", scheme, config.host, local_addr.port());
        let server_token = cancel.child_token();
        let server_exited = CancellationToken::new();
        let server = spawn_server(
            server::serve(
                listener,
                tls,
                server::router(Arc::new(pipeline)),
                server_token.clone(),
            ),
            server_token,
            server_exited.clone(),
        );

        let poll_interval = config
            .poll
            .then(|| Duration::from_millis(config.watch.poll_interval_ms));
        let local_watcher = LocalWatcher::new(
            root.clone(),
            Arc::clone(&filter),
            Duration::from_millis(config.watch.debounce_ms),
            poll_interval,
            cancel.child_token(),
        );

        let (remote_tx, remote_rx) = mpsc::channel(64);
        let remote_watcher = config.editor_sync.then(|| {
            RemoteWatcher::new(
                Arc::clone(&api),
                &theme,
                Arc::clone(&engine),
                Arc::clone(&filter),
                Duration::from_secs(config.remote.poll_interval_secs),
                config.conflict.ties_favor_local,
                remote_tx,
                cancel.child_token(),
            )
        });

        let controller = Self {
            theme,
            address,
            local_addr,
            broadcaster,
            engine: Arc::clone(&engine),
            local_watcher,
            remote_watcher,
            grace: Duration::from_secs(config.sync.shutdown_grace_secs),
            cancel: cancel.clone(),
            shutdown: CancellationToken::new(),
            server_exited,
            server: Mutex::new(Some(server)),
            tasks: Mutex::new(vec![coalescer]),
            stopped: AtomicBool::new(false),
        };

        let local_rx = match controller.local_watcher.start() {
            Ok(rx) => rx,
            Err(err) => {
                controller.stop().await;
                return Err::<Self, _>(err).context("Failed to watch the theme directory");
            }
        };
        if let Some(remote) = &controller.remote_watcher {
            remote.start();
        }

        let event_loop = EventLoop {
            engine,
            policy: ReloadPolicy::new(config.live_reload, config.reload.section_hot_reload),
            reloads,
            awaiting: HashSet::new(),
        };
        controller.tasks.lock().push(tokio::spawn(event_loop.run(
            local_rx,
            remote_rx,
            sync_events,
            cancel.child_token(),
        )));

        ui::success(&format!("Serving {} at {}", controller.theme.root.display(), controller.address));
        ui::info(&format!("Preview: {}", controller.theme.preview_url()));
        ui::info(&format!("Customize: {}", controller.theme.editor_url()));
        if config.editor_sync {
            ui::info("Editor sync is on: online editor changes are pulled into the working copy");
        }

        Ok(controller)
    }

    /// Serve until Ctrl+C or [`request_stop`](Self::request_stop), then stop.
    ///
    /// # Errors
    ///
    /// Returns the server's error if it stops on its own; the rest of the
    /// session is still shut down first.
    pub async fn run(&self) -> Result<()> {
        let mut failure = None;
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                ui::info("Shutting down development server...");
            }
            _ = self.shutdown.cancelled() => {}
            _ = self.server_exited.cancelled() => {
                failure = Some(self.server_failure().await);
            }
        }
        self.stop().await;
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn server_failure(&self) -> CliError {
        let handle = self.server.lock().take();
        let err = match handle {
            Some(handle) => match handle.await {
                Ok(Ok(())) => CliError::Server("the server stopped unexpectedly".to_string()),
                Ok(Err(err)) => err,
                Err(err) => CliError::Server(format!("server task failed: {}", err)),
            },
            None => CliError::Server("the server stopped unexpectedly".to_string()),
        };
        ui::error(&format!("Development server stopped: {}", err));
        err
    }

    /// Ask a running [`run`](Self::run) to stop. Does not wait.
    pub fn request_stop(&self) {
        self.shutdown.cancel();
    }

    /// Stop every component and release the port.
    ///
    /// Watchers stop first so no new work arrives, then the sync engine
    /// drains, then browser streams close and the server goes down. Calls
    /// after the first return immediately.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("stopping dev server");

        self.local_watcher.stop().await;
        if let Some(remote) = &self.remote_watcher {
            remote.stop().await;
        }

        let abandoned = self.engine.shutdown().await;
        if abandoned > 0 {
            ui::warning(&format!("{} pending uploads were abandoned", abandoned));
        }

        self.broadcaster.close_all();
        self.cancel.cancel();

        let server = self.server.lock().take();
        if let Some(mut handle) = server {
            match tokio::time::timeout(self.grace, &mut handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => tracing::warn!("server stopped with error: {}", err),
                Ok(Err(err)) => tracing::warn!("server task failed: {}", err),
                Err(_) => {
                    tracing::warn!("server did not stop in time");
                    handle.abort();
                }
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for handle in tasks {
            let _ = handle.await;
        }

        self.shutdown.cancel();
        ui::success("Development server stopped");
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    /// Public address, e.g. `http://127.0.0.1:9292`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn broadcaster(&self) -> &ReloadBroadcaster {
        &self.broadcaster
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }
}

/// Run the server, firing `exited` if it ends before `token` is cancelled.
fn spawn_server<F>(serve: F, token: CancellationToken, exited: CancellationToken) -> JoinHandle<Result<()>>
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = serve.await;
        if !token.is_cancelled() {
            exited.cancel();
        }
        result
    })
}

/// Queue the initial sync and wait for the high-priority lane. Static assets
/// keep uploading after this returns.
async fn initial_sync(
    engine: &SyncEngine,
    events: &mut mpsc::UnboundedReceiver<SyncEvent>,
    options: BulkSyncOptions,
) -> std::result::Result<(), SyncError> {
    let started = Instant::now();
    let progress = ui::SyncProgress::new("Syncing theme");
    let report = engine.bulk_sync(options).await?;
    progress.set_total(report.high_priority as u64);

    let mut failures = report.failures;
    {
        let idle = engine.wait_idle(false);
        tokio::pin!(idle);
        loop {
            tokio::select! {
                _ = &mut idle => break,
                Some(event) = events.recv() => record_progress(&progress, event, &mut failures),
            }
        }
    }
    while let Ok(event) = events.try_recv() {
        record_progress(&progress, event, &mut failures);
    }

    let summary = format!(
        "Synced theme in {} ({} unchanged, {} pulled)",
        ui::format_duration(started.elapsed()),
        report.unchanged,
        report.pulled
    );
    if failures.is_empty() {
        progress.finish(&summary);
    } else {
        progress.fail(&summary);
    }
    for failure in &failures {
        ui::sync_failure(failure.key(), &failure.to_string());
    }

    let background = report.uploads - report.high_priority + report.deletes;
    if background > 0 {
        ui::info(&format!("{} more files are syncing in the background", background));
    }
    Ok(())
}

fn record_progress(progress: &ui::SyncProgress, event: SyncEvent, failures: &mut Vec<SyncError>) {
    if event.priority == Priority::High {
        progress.inc(&event.key);
    }
    if let SyncOutcome::Failed(err) = event.outcome {
        failures.push(err);
    }
}

/// Routes file changes to the sync engine and finished syncs to browsers.
struct EventLoop {
    engine: Arc<SyncEngine>,
    policy: ReloadPolicy,
    reloads: mpsc::UnboundedSender<ReloadDirective>,
    /// Keys whose reload waits for their upload, since the storefront
    /// renders them
    awaiting: HashSet<String>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut local: mpsc::Receiver<WatchEvent>,
        mut remote: mpsc::Receiver<WatchEvent>,
        mut sync: mpsc::UnboundedReceiver<SyncEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(event) = local.recv() => self.on_local_change(event).await,
                Some(event) = remote.recv() => self.notify(&event.key),
                Some(event) = sync.recv() => self.on_synced(event),
                else => break,
            }
        }
        tracing::debug!("event loop stopped");
    }

    async fn on_local_change(&mut self, event: WatchEvent) {
        match self.engine.enqueue(&event, Priority::High).await {
            Ok(EnqueueOutcome::Queued) => {
                // Served from disk, so the browser can have it right away.
                if AssetCategory::is_served_locally(&event.key) {
                    self.notify(&event.key);
                } else {
                    self.awaiting.insert(event.key);
                }
            }
            Ok(outcome) => tracing::debug!(key = %event.key, ?outcome, "change not queued"),
            Err(err) => tracing::warn!("skipping change: {}", err),
        }
    }

    fn on_synced(&mut self, event: SyncEvent) {
        let awaited = self.awaiting.remove(&event.key);
        match event.outcome {
            SyncOutcome::Uploaded { .. } | SyncOutcome::Deleted | SyncOutcome::Skipped => {
                if event.priority == Priority::High {
                    ui::success(&format!("Synced {}", event.key));
                }
                if awaited {
                    self.notify(&event.key);
                }
            }
            SyncOutcome::Failed(err) => ui::sync_failure(&event.key, &err.to_string()),
        }
    }

    fn notify(&self, key: &str) {
        if let Some(directive) = self.policy.directive_for(key) {
            let _ = self.reloads.send(directive);
        }
    }
}
