//! Record of what the remote theme holds for each asset key.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::dev::remote::RemoteAsset;

/// Hex MD5 of `content`, the checksum format the remote API reports.
pub fn checksum(content: &[u8]) -> String {
    format!("{:x}", Md5::digest(content))
}

/// Last content known to match the remote copy of one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    /// Hex MD5 of the synced content
    pub checksum: String,
    /// Local time the record was written
    pub synced_at: DateTime<Utc>,
    /// `updated_at` the remote reported for this content
    pub remote_updated_at: DateTime<Utc>,
}

/// Last-synced content per asset key.
///
/// Cloning shares the map. Written by upload workers and the remote watcher,
/// always under the one lock.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    records: Arc<Mutex<HashMap<String, SyncRecord>>>,
}

impl SyncState {
    /// Create an empty state; every local file counts as unsynced.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a remote listing. Entries without a checksum are left out so
    /// the first sync always uploads them.
    pub fn from_listing(assets: &[RemoteAsset]) -> Self {
        let now = Utc::now();
        let records = assets
            .iter()
            .filter_map(|asset| {
                let checksum = asset.checksum.clone()?;
                Some((
                    asset.key.clone(),
                    SyncRecord {
                        checksum,
                        synced_at: now,
                        remote_updated_at: asset.updated_at,
                    },
                ))
            })
            .collect();

        Self {
            records: Arc::new(Mutex::new(records)),
        }
    }

    /// Get a copy of the record for `key`.
    pub fn get(&self, key: &str) -> Option<SyncRecord> {
        self.records.lock().get(key).cloned()
    }

    /// Get the last synced checksum for `key`.
    ///
    /// # Returns
    ///
    /// `None` if the key was never synced or has been removed
    pub fn checksum(&self, key: &str) -> Option<String> {
        self.records.lock().get(key).map(|r| r.checksum.clone())
    }

    /// Record a completed upload or pull.
    ///
    /// # Arguments
    ///
    /// * `key` - Asset key
    /// * `checksum` - Hex MD5 of the content now on both sides
    /// * `remote_updated_at` - `updated_at` the remote reported for it
    pub fn record(&self, key: &str, checksum: String, remote_updated_at: DateTime<Utc>) {
        self.records.lock().insert(
            key.to_string(),
            SyncRecord {
                checksum,
                synced_at: Utc::now(),
                remote_updated_at,
            },
        );
    }

    /// Forget `key` after a remote delete.
    pub fn remove(&self, key: &str) -> Option<SyncRecord> {
        self.records.lock().remove(key)
    }

    /// Get every recorded key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.records.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Get number of recorded keys.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
