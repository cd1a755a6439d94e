//! Delivered-media cache
//!
//! Maps a [`MediaId`] to the platform handle of an audio message that was
//! already delivered, so the same media can be resent without a new upload.
//! The in-memory map is the source of truth; the JSON file next to it is a
//! mirror rewritten as a whole snapshot on every insert.

use crate::extractor::MediaId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Errors that can occur during cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Standard I/O error
    #[error("IO error on {}: {source}", path.display())]
    Io {
        /// File being read or written
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// The persisted document could not be parsed
    #[error("Cache file {} is corrupt: {source}", path.display())]
    Corrupt {
        /// File being read
        path: PathBuf,
        /// Parse error
        source: serde_json::Error,
    },
    /// Error during JSON serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Delivery metadata stored for a media item
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Source text the link was taken from (informational)
    pub url: String,
    /// Platform handle usable to resend the audio without re-uploading
    pub file_id: String,
    /// Track title
    pub title: String,
    /// Track author
    pub author: String,
}

/// Persisted identifier -> [`CacheEntry`] mapping.
///
/// All reads and writes go through one async mutex; an insert keeps the lock
/// until the snapshot has replaced the file on disk.
#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<MediaId, CacheEntry>>,
}

impl CacheStore {
    /// Load the cache from `path`.
    ///
    /// A missing or empty file yields an empty cache and an empty document is
    /// written so the file exists afterwards. Parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Corrupt`] if the file exists but is not a valid
    /// cache document, or [`CacheError::Io`] on filesystem failures.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        let store = if raw.trim().is_empty() {
            let store = Self::empty(path);
            store.persist(&BTreeMap::new()).await?;
            info!(path = %store.path.display(), "Initialized empty media cache");
            store
        } else {
            let entries: BTreeMap<MediaId, CacheEntry> = serde_json::from_str(&raw)
                .map_err(|source| CacheError::Corrupt {
                    path: path.clone(),
                    source,
                })?;
            info!(
                path = %path.display(),
                entries = entries.len(),
                "Loaded media cache"
            );
            Self {
                path,
                entries: Mutex::new(entries),
            }
        };

        Ok(store)
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Look up a previously delivered media item.
    pub async fn lookup(&self, id: &MediaId) -> Option<CacheEntry> {
        self.entries.lock().await.get(id).cloned()
    }

    /// Add or overwrite an entry and rewrite the whole file.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized or written. The
    /// in-memory entry is kept in that case.
    pub async fn insert(&self, id: MediaId, entry: CacheEntry) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        entries.insert(id, entry);
        self.persist(&entries).await
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns `true` if nothing has been cached yet.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Write the snapshot to a sibling temp file, then rename it over the
    /// target so readers never observe a partially written document.
    async fn persist(&self, entries: &BTreeMap<MediaId, CacheEntry>) -> Result<(), CacheError> {
        let body = serde_json::to_string_pretty(entries)?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| CacheError::Io {
                path: dir.clone(),
                source,
            })?;

        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "cache".into(), |n| n.to_string_lossy().to_string());
        let tmp_path = dir.join(format!(
            ".{file_name}.{}.tmp",
            uuid::Uuid::new_v4().as_simple()
        ));

        let io_err = |source| CacheError::Io {
            path: tmp_path.clone(),
            source,
        };
        let mut file = tokio::fs::File::create(&tmp_path).await.map_err(io_err)?;
        file.write_all(body.as_bytes()).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        if let Err(source) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(CacheError::Io {
                path: self.path.clone(),
                source,
            });
        }

        debug!(path = %self.path.display(), entries = entries.len(), "Persisted media cache");
        Ok(())
    }
}
