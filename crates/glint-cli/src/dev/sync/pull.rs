use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::Path;

use super::state::{checksum, SyncState};
use crate::dev::remote::RemoteApi;
use crate::error::SyncError;

/// Write `content` to `path` through a temp file in the same directory and
/// a rename, so readers see either the old or the new file.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Fetch `key` from the remote theme into the working copy and record it as
/// synced. Returns the checksum of the written content.
pub async fn pull_asset(
    api: &dyn RemoteApi,
    theme_id: u64,
    root: &Path,
    state: &SyncState,
    key: &str,
    remote_updated_at: DateTime<Utc>,
) -> Result<String, SyncError> {
    let content = api
        .get_asset(theme_id, key)
        .await
        .map_err(|source| SyncError::Remote {
            key: key.to_string(),
            source,
        })?;

    let sum = checksum(&content);
    let path = root.join(key);
    tokio::task::spawn_blocking(move || write_atomic(&path, &content))
        .await
        .map_err(std::io::Error::other)
        .and_then(|r| r)
        .map_err(|source| SyncError::Io {
            key: key.to_string(),
            source,
        })?;

    state.record(key, sum.clone(), remote_updated_at);
    tracing::debug!(%key, "pulled remote asset");
    Ok(sum)
}
