//! On-disk cache of formatted search output.
//!
//! One file per fingerprint under the cache directory. The fingerprint is a
//! SHA-256 over the query and the options that change result content; options
//! that only change presentation are left out so entries do not fragment.
//! Entries expire 24 hours after their file modification time; expiry is
//! checked lazily on read.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::classify::Generation;
use crate::clock::Clock;

pub const ENTRY_TTL_HOURS: i64 = 24;
const ENTRY_EXTENSION: &str = "txt";

/// The content-affecting subset of a search request.
#[derive(Debug, Clone, Serialize)]
pub struct CacheKey<'a> {
    pub query: &'a str,
    pub root: &'a Path,
    pub generation: Generation,
    pub max_tokens: usize,
    pub skip_tokens: usize,
    pub files_only: bool,
    pub max_results: Option<usize>,
    pub json: bool,
}

impl CacheKey<'_> {
    pub fn fingerprint(&self) -> String {
        // Field order is fixed by the struct, which makes the JSON canonical.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}

pub struct ResultCache {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    pub fn new(dir: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self { dir, clock }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey<'_>) -> PathBuf {
        self.dir
            .join(format!("{}.{}", key.fingerprint(), ENTRY_EXTENSION))
    }

    /// Returns the stored value if present and younger than the TTL.
    pub async fn get(&self, key: &CacheKey<'_>) -> Option<String> {
        let path = self.entry_path(key);
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        let stored_at: DateTime<Utc> = metadata.modified().ok()?.into();
        if self.clock.now() - stored_at >= Duration::hours(ENTRY_TTL_HOURS) {
            debug!(path = %path.display(), "cache entry expired");
            return None;
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache entry unreadable");
                None
            }
        }
    }

    /// Best-effort write; failures are logged and swallowed.
    pub async fn set(&self, key: &CacheKey<'_>, value: &str) {
        if let Err(e) = self.try_set(key, value).await {
            warn!(error = %e, "cache write failed");
        }
    }

    async fn try_set(&self, key: &CacheKey<'_>, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cache dir: {}", self.dir.display()))?;
        let path = self.entry_path(key);
        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, value)
            .await
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        tokio::fs::rename(&staging, &path)
            .await
            .with_context(|| format!("Failed to move cache entry into {}", path.display()))?;
        Ok(())
    }

    /// Removes every entry. A missing directory counts as already clear.
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read cache dir: {}", self.dir.display()))
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(&path)
                    .await
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
