//! Upload side of the dev server.
//!
//! - [`SyncState`]: last-synced checksum per asset, shared with the remote watcher
//! - [`TaskQueue`]: two priority lanes with per-key serialization
//! - [`SyncEngine`]: worker pool draining the queue against the remote API

mod engine;
mod pull;
mod queue;
mod state;

pub use engine::{BulkSyncOptions, BulkSyncReport, EnqueueOutcome, SyncEngine};
pub use pull::{pull_asset, write_atomic};
pub use queue::{PendingTask, QueueStats, TaskQueue};
pub use state::{checksum, SyncRecord, SyncState};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOp {
    Upload,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Initial bulk sync
    Low,
    /// Files edited while the server runs
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
    pub key: String,
    pub op: SyncOp,
    pub priority: Priority,
}

/// Result of processing one task, reported on the engine's event channel.
#[derive(Debug)]
pub struct SyncEvent {
    pub key: String,
    pub priority: Priority,
    pub outcome: SyncOutcome,
}

#[derive(Debug)]
pub enum SyncOutcome {
    Uploaded { checksum: String },
    Deleted,
    /// Content already matched the remote copy when the task ran
    Skipped,
    Failed(SyncError),
}
