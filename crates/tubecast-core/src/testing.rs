//! Testing helpers and mock utilities.
//!
//! Provides a recording chat transport and constructors for mocked fetchers.

use crate::cache::CacheEntry;
use crate::fetcher::{FetchError, FetchedAudio, MockMediaFetcher};
use crate::pipeline::{ChatTransport, StatusHandle};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};

/// One recorded chat operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// Text reply
    Reply(String),
    /// Status posted
    PostStatus(StatusHandle),
    /// Status deleted
    DeleteStatus(StatusHandle),
    /// Cached audio resent by handle
    SendCached(String),
    /// Local file uploaded
    Upload {
        /// Uploaded path
        path: PathBuf,
        /// Track title
        title: String,
        /// Track author
        author: String,
    },
}

/// [`ChatTransport`] that records every call instead of talking to a chat.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    next_id: AtomicI32,
    fail_uploads: bool,
    fail_status: bool,
}

impl RecordingTransport {
    /// Transport where every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upload fail.
    #[must_use]
    pub fn failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    /// Make posting a status fail.
    #[must_use]
    pub fn failing_status(mut self) -> Self {
        self.fail_status = true;
        self
    }

    /// Snapshot of the recorded calls in order.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    /// Handles of every posted status, in order.
    pub fn posted_statuses(&self) -> Vec<StatusHandle> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                TransportCall::PostStatus(h) => Some(h),
                _ => None,
            })
            .collect()
    }

    /// Handles of every deleted status, in order.
    pub fn deleted_statuses(&self) -> Vec<StatusHandle> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                TransportCall::DeleteStatus(h) => Some(h),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TransportCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn next(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn reply_text(&self, text: &str) -> Result<()> {
        self.record(TransportCall::Reply(text.to_string()));
        Ok(())
    }

    async fn post_status(&self, _text: &str) -> Result<StatusHandle> {
        if self.fail_status {
            return Err(anyhow!("status rejected"));
        }
        let handle = StatusHandle(self.next());
        self.record(TransportCall::PostStatus(handle));
        Ok(handle)
    }

    async fn delete_status(&self, status: StatusHandle) -> Result<()> {
        self.record(TransportCall::DeleteStatus(status));
        Ok(())
    }

    async fn send_cached_audio(&self, entry: &CacheEntry) -> Result<()> {
        self.record(TransportCall::SendCached(entry.file_id.clone()));
        Ok(())
    }

    async fn send_audio_file(&self, audio: &FetchedAudio) -> Result<String> {
        if self.fail_uploads {
            return Err(anyhow!("upload rejected"));
        }
        let uploads = self.count(|c| matches!(c, TransportCall::Upload { .. }));
        self.record(TransportCall::Upload {
            path: audio.path.clone(),
            title: audio.title.clone(),
            author: audio.author.clone(),
        });
        Ok(format!("remote-{}", uploads + 1))
    }
}

/// Create a file of `len` bytes at `path`. The file is sparse where the
/// filesystem supports it, so ceiling-sized files are cheap.
pub fn write_audio(path: &Path, len: u64) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    file.set_len(len)
}

/// Create a mock fetcher whose size query reports `declared` and whose download
/// writes `len` bytes to `path`. Both calls are expected exactly `times` times.
#[must_use]
pub fn mock_fetcher_writing(
    path: PathBuf,
    len: u64,
    declared: Option<u64>,
    times: usize,
) -> MockMediaFetcher {
    let mut mock = MockMediaFetcher::new();
    mock.expect_probe_size()
        .times(times)
        .returning(move |_| Ok(declared));
    mock.expect_fetch().times(times).returning(move |_| {
        write_audio(&path, len).map_err(FetchError::Spawn)?;
        Ok(FetchedAudio {
            path: path.clone(),
            title: "Song".to_string(),
            author: "Band".to_string(),
        })
    });
    mock
}
