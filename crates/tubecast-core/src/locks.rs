//! Per-identifier mutual exclusion.
//!
//! Two requests for the same media id would otherwise race on the same local
//! file path and on the cache insert. Holding the guard from cache lookup to
//! cache insert makes the second request wait and then hit the cache.

use crate::extractor::MediaId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// Guard held while a media id is being processed.
pub type FetchGuard = OwnedMutexGuard<()>;

/// Lock table keyed by [`MediaId`].
#[derive(Debug, Default)]
pub struct FetchLocks {
    inner: Mutex<HashMap<MediaId, Arc<tokio::sync::Mutex<()>>>>,
}

impl FetchLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other request holds `id`, then take it.
    pub async fn acquire(&self, id: &MediaId) -> FetchGuard {
        let lock = {
            let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // An entry only the table references is neither held nor awaited
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            table.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of identifiers currently held or awaited.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}
