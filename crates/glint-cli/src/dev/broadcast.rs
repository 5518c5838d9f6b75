//! Fan-out of reload directives to connected browsers.
//!
//! Every browser tab holds one [`BroadcastStream`] with its own bounded
//! buffer. Publishing never waits: a full buffer drops its oldest message.
//! Streams unregister themselves when dropped (client disconnect) and end
//! when [`ReloadBroadcaster::close_all`] runs at shutdown.

use parking_lot::Mutex;
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::dev::reload::{coalesce, ReloadDirective};

/// Pages remembered for asset-reference lookups.
const MAX_PAGES: usize = 256;

static ASSET_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"/assets/([A-Za-z0-9_\-.%]+)"#).expect("asset reference pattern")
});

#[derive(Debug)]
struct StreamBuffer {
    messages: Mutex<VecDeque<String>>,
    capacity: usize,
    ready: Notify,
    closed: AtomicBool,
}

impl StreamBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            ready: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns `true` if an older message was dropped to make room.
    fn push(&self, message: String) -> bool {
        let dropped = {
            let mut messages = self.messages.lock();
            let dropped = messages.len() >= self.capacity;
            if dropped {
                messages.pop_front();
            }
            messages.push_back(message);
            dropped
        };
        self.ready.notify_one();
        dropped
    }

    fn pop(&self) -> Option<String> {
        self.messages.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ready.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct Subscriber {
    buffer: Arc<StreamBuffer>,
    page: Option<String>,
}

struct Registry {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    pages: Mutex<Pages>,
    next_id: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
}

#[derive(Default)]
struct Pages {
    references: HashMap<String, HashSet<String>>,
    order: VecDeque<String>,
}

/// Registry of open browser notification streams.
#[derive(Clone)]
pub struct ReloadBroadcaster {
    registry: Arc<Registry>,
}

impl ReloadBroadcaster {
    /// `capacity` bounds each client's buffer.
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(HashMap::new()),
                pages: Mutex::new(Pages::default()),
                next_id: AtomicU64::new(1),
                capacity,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a client, optionally tied to a page token from
    /// [`register_page`](Self::register_page).
    pub fn subscribe(&self, page: Option<&str>) -> BroadcastStream {
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
        let buffer = Arc::new(StreamBuffer::new(self.registry.capacity));

        if self.registry.closed.load(Ordering::SeqCst) {
            buffer.close();
        } else {
            self.registry.subscribers.lock().insert(
                id,
                Subscriber {
                    buffer: Arc::clone(&buffer),
                    page: page.map(str::to_string),
                },
            );
            tracing::debug!(client = id, "browser connected");
        }

        BroadcastStream::new(id, buffer, Arc::downgrade(&self.registry))
    }

    pub fn unsubscribe(&self, stream: &BroadcastStream) {
        self.registry.remove(stream.id);
    }

    /// Send `directive` to every open stream. Returns the number of
    /// recipients.
    pub fn publish(&self, directive: &ReloadDirective) -> usize {
        let targets: Vec<(Arc<StreamBuffer>, Option<String>)> = self
            .registry
            .subscribers
            .lock()
            .values()
            .map(|s| (Arc::clone(&s.buffer), s.page.clone()))
            .collect();

        let pages = self.registry.pages.lock();
        for (buffer, page) in &targets {
            let refs = page.as_ref().and_then(|p| pages.references.get(p));
            let message = match serde_json::to_string(&directive.for_page(refs)) {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!("could not encode reload directive: {}", err);
                    continue;
                }
            };
            if buffer.push(message) {
                tracing::debug!("slow browser, dropped oldest reload message");
            }
        }

        tracing::debug!(
            mode = ?directive.mode,
            keys = ?directive.keys,
            clients = targets.len(),
            "published reload"
        );
        targets.len()
    }

    /// Remember which `/assets/...` files an HTML page references and return
    /// the token its client should connect with.
    pub fn register_page(&self, html: &str) -> String {
        let references: HashSet<String> = ASSET_REF
            .captures_iter(html)
            .map(|c| format!("assets/{}", &c[1]))
            .collect();

        let token = format!("{:x}", self.registry.next_id.fetch_add(1, Ordering::SeqCst));
        let mut pages = self.registry.pages.lock();
        pages.references.insert(token.clone(), references);
        pages.order.push_back(token.clone());
        while pages.order.len() > MAX_PAGES {
            if let Some(oldest) = pages.order.pop_front() {
                pages.references.remove(&oldest);
            }
        }
        token
    }

    pub fn page_references(&self, token: &str) -> Option<HashSet<String>> {
        self.registry.pages.lock().references.get(token).cloned()
    }

    /// End every stream and refuse new ones.
    pub fn close_all(&self) {
        self.registry.closed.store(true, Ordering::SeqCst);
        let subscribers: Vec<Subscriber> = self
            .registry
            .subscribers
            .lock()
            .drain()
            .map(|(_, s)| s)
            .collect();
        for subscriber in &subscribers {
            subscriber.buffer.close();
        }
        tracing::debug!(clients = subscribers.len(), "closed reload streams");
    }

    pub fn client_count(&self) -> usize {
        self.registry.subscribers.lock().len()
    }

    /// Spawn a task that batches directives arriving within `window` into
    /// one [`publish`](Self::publish).
    pub fn spawn_coalescer(
        &self,
        window: Duration,
        cancel: CancellationToken,
    ) -> (mpsc::UnboundedSender<ReloadDirective>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ReloadDirective>();
        let broadcaster = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                let first = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(directive) => directive,
                        None => break,
                    },
                };

                let mut batch = vec![first];
                let deadline = tokio::time::sleep(window);
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        _ = &mut deadline => break,
                        next = rx.recv() => match next {
                            Some(directive) => batch.push(directive),
                            None => break,
                        },
                    }
                }

                if let Some(directive) = coalesce(batch) {
                    broadcaster.publish(&directive);
                }
            }
        });

        (tx, handle)
    }
}

impl Registry {
    fn remove(&self, id: u64) {
        if self.subscribers.lock().remove(&id).is_some() {
            tracing::debug!(client = id, "browser disconnected");
        }
    }
}

/// One browser's stream of JSON-encoded directives.
pub struct BroadcastStream {
    id: u64,
    registry: Weak<Registry>,
    inner: Pin<Box<dyn Stream<Item = String> + Send>>,
}

impl BroadcastStream {
    fn new(id: u64, buffer: Arc<StreamBuffer>, registry: Weak<Registry>) -> Self {
        let inner = async_stream::stream! {
            loop {
                let ready = buffer.ready.notified();
                tokio::pin!(ready);
                ready.as_mut().enable();

                if let Some(message) = buffer.pop() {
                    yield message;
                    continue;
                }
                if buffer.is_closed() {
                    break;
                }
                ready.await;
            }
        };

        Self {
            id,
            registry,
            inner: Box::pin(inner),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Stream for BroadcastStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for BroadcastStream {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for BroadcastStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastStream").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::reload::ReloadMode;
    use tokio_stream::StreamExt;

    fn css(key: &str) -> ReloadDirective {
        ReloadDirective::new(ReloadMode::CssReplace, vec![key.to_string()])
    }

    async fn next_json(stream: &mut BroadcastStream) -> serde_json::Value {
        let message = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("no message")
            .expect("stream ended");
        serde_json::from_str(&message).unwrap()
    }

    #[tokio::test]
    async fn test_publish_reaches_every_stream() {
        let broadcaster = ReloadBroadcaster::new(8);
        let mut a = broadcaster.subscribe(None);
        let mut b = broadcaster.subscribe(None);

        assert_eq!(broadcaster.publish(&css("assets/theme.css")), 2);
        assert_eq!(next_json(&mut a).await["mode"], "css-replace");
        assert_eq!(next_json(&mut b).await["keys"][0], "assets/theme.css");
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let broadcaster = ReloadBroadcaster::new(8);
        let stream = broadcaster.subscribe(None);
        assert_eq!(broadcaster.client_count(), 1);
        drop(stream);
        assert_eq!(broadcaster.client_count(), 0);

        let stream = broadcaster.subscribe(None);
        broadcaster.unsubscribe(&stream);
        assert_eq!(broadcaster.client_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_client_drops_oldest() {
        let broadcaster = ReloadBroadcaster::new(2);
        let mut slow = broadcaster.subscribe(None);

        for key in ["assets/1.css", "assets/2.css", "assets/3.css"] {
            broadcaster.publish(&css(key));
        }

        assert_eq!(next_json(&mut slow).await["keys"][0], "assets/2.css");
        assert_eq!(next_json(&mut slow).await["keys"][0], "assets/3.css");
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let broadcaster = ReloadBroadcaster::new(4);
        let mut stream = broadcaster.subscribe(None);
        broadcaster.close_all();

        let end = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(end.is_none());
        assert_eq!(broadcaster.client_count(), 0);

        let mut late = broadcaster.subscribe(None);
        assert!(late.next().await.is_none());
    }

    #[tokio::test]
    async fn test_page_references_decide_static_assets() {
        let broadcaster = ReloadBroadcaster::new(4);
        let token = broadcaster.register_page(
            r#"<html><img src="/assets/hero.png?v=2"><link href="/assets/theme.css"></html>"#,
        );
        let refs = broadcaster.page_references(&token).unwrap();
        assert!(refs.contains("assets/hero.png"));
        assert!(refs.contains("assets/theme.css"));

        let mut on_page = broadcaster.subscribe(Some(&token));
        let mut elsewhere = broadcaster.subscribe(None);
        broadcaster.publish(&css("assets/hero.png"));

        assert_eq!(next_json(&mut on_page).await["mode"], "css-replace");
        assert_eq!(next_json(&mut elsewhere).await["mode"], "full-page");
    }

    #[tokio::test]
    async fn test_coalescer_merges_window() {
        let broadcaster = ReloadBroadcaster::new(8);
        let mut stream = broadcaster.subscribe(None);
        let cancel = CancellationToken::new();
        let (tx, handle) = broadcaster.spawn_coalescer(Duration::from_millis(50), cancel.clone());

        tx.send(css("assets/theme.css")).unwrap();
        tx.send(ReloadDirective::new(
            ReloadMode::FullPage,
            vec!["templates/index.liquid".into()],
        ))
        .unwrap();

        let json = next_json(&mut stream).await;
        assert_eq!(json["mode"], "full-page");
        assert_eq!(json["keys"].as_array().unwrap().len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
