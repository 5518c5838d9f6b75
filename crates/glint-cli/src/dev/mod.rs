//! Theme development server.
//!
//! - Local edits are watched, uploaded to the remote theme and pushed to
//!   open browsers as reload directives
//! - Storefront requests are proxied, with theme assets answered from the
//!   working copy
//! - With editor sync, online-editor edits are pulled back into the
//!   working copy
//!
//! [`DevServerController`] wires the pieces together.

pub mod broadcast;
pub mod cert;
pub mod controller;
pub mod filter;
pub mod pipeline;
pub mod reload;
pub mod remote;
pub mod remote_watcher;
pub mod server;
pub mod sync;
pub mod theme;
pub mod upstream;
pub mod watcher;

#[cfg(test)]
pub mod testing;

// Re-exports
pub use broadcast::{BroadcastStream, ReloadBroadcaster};
pub use cert::{CertificateProvider, PemFileProvider};
pub use controller::{DevServerController, DevServerOptions};
pub use filter::{ChangeFilter, IgnoreFilter};
pub use pipeline::{Handler, Next, Pipeline, ThemeRequest, ThemeResponse};
pub use reload::{AssetCategory, ReloadDirective, ReloadMode, ReloadPolicy};
pub use remote::{AdminApiClient, RemoteApi, RemoteAsset, RemoteTheme};
pub use remote_watcher::{PollReport, RemoteWatcher};
pub use sync::{Priority, SyncEngine, SyncEvent, SyncOp, SyncOutcome, SyncState};
pub use theme::Theme;
pub use upstream::{HttpUpstream, Upstream, UpstreamResponse};
pub use watcher::{LocalWatcher, WatchEvent, WatchKind};
