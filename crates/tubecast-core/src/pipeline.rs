//! Delivery pipeline
//!
//! Turns one inbound link message into one audio message:
//!
//! 1. extract the media id (failure ends the request with a hint)
//! 2. post a transient status message
//! 3. resend from the cache on a hit, otherwise size-check, fetch and upload
//! 4. reject anything above [`MAX_AUDIO_SIZE_BYTES`], before or after download
//! 5. delete the status message
//!
//! Errors after step 2 are caught once here: the status message is removed
//! and the user gets a generic error reply.

use crate::cache::{CacheEntry, CacheError, CacheStore};
use crate::config::MAX_AUDIO_SIZE_BYTES;
use crate::extractor::{extract_media_id, source_text, MediaId};
use crate::fetcher::{FailureKind, FetchError, FetchedAudio, MediaFetcher};
use crate::locks::FetchLocks;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Reply when no media id could be found in the message.
pub const EXTRACT_FAILED_TEXT: &str =
    "Could not extract the video ID. Make sure the link is correct.";
/// Transient status shown while the request is processed.
pub const STATUS_TEXT: &str = "📦 Downloading the audio. Please wait...";
/// Reply when the audio exceeds the size ceiling.
pub const SIZE_LIMIT_TEXT: &str = "📦 Error. The audio is larger than the size limit.";
/// Reply for every other failure.
pub const GENERIC_ERROR_TEXT: &str =
    "⚠️ Something went wrong while processing your link. Please try again.";

/// Platform reference to a posted status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusHandle(pub i32);

/// Chat-side operations the pipeline needs, bound to one conversation.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Reply to the inbound message with plain text.
    async fn reply_text(&self, text: &str) -> Result<()>;

    /// Post a status message that will be deleted later.
    async fn post_status(&self, text: &str) -> Result<StatusHandle>;

    /// Delete a previously posted status message.
    async fn delete_status(&self, status: StatusHandle) -> Result<()>;

    /// Resend already uploaded audio by its stored handle.
    async fn send_cached_audio(&self, entry: &CacheEntry) -> Result<()>;

    /// Upload a local audio file and return the platform handle for reuse.
    async fn send_audio_file(&self, audio: &FetchedAudio) -> Result<String>;
}

/// Why a request was refused on size grounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Remote metadata declared a size above the ceiling
    DeclaredSize(u64),
    /// The downloaded file is above the ceiling
    ActualSize(u64),
}

/// Terminal state of one delivery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// No media id in the message
    NoIdentifier,
    /// Resent from the cache
    Cached,
    /// Downloaded, uploaded and cached
    Fresh,
    /// Refused by the size ceiling
    Rejected(RejectReason),
    /// Failed with a generic error reply
    Failed,
}

/// Errors caught at the top of a delivery request
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Size query or download failed
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    /// Persisting the cache failed
    #[error("cache update failed: {0}")]
    Cache(#[from] CacheError),
    /// A chat operation failed
    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),
    /// The downloaded file could not be inspected
    #[error("local file error on {}: {source}", path.display())]
    LocalFile {
        /// Local audio path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

impl PipelineError {
    /// yt-dlp failure classification, for fetch errors only.
    #[must_use]
    pub fn fetch_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Fetch(e) => Some(e.kind()),
            _ => None,
        }
    }
}

/// Orchestrates extract -> cache -> fetch -> deliver for each request.
pub struct DeliveryPipeline {
    cache: Arc<CacheStore>,
    fetcher: Arc<dyn MediaFetcher>,
    locks: FetchLocks,
    max_size: u64,
}

impl DeliveryPipeline {
    /// Create a pipeline over a loaded cache and a fetcher.
    #[must_use]
    pub fn new(cache: Arc<CacheStore>, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self {
            cache,
            fetcher,
            locks: FetchLocks::new(),
            max_size: MAX_AUDIO_SIZE_BYTES,
        }
    }

    /// The cache backing this pipeline.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Handle one inbound message end to end.
    ///
    /// Never returns an error: every failure is reported to the chat and
    /// folded into [`DeliveryOutcome::Failed`].
    pub async fn deliver(&self, transport: &dyn ChatTransport, text: &str) -> DeliveryOutcome {
        let Some(id) = extract_media_id(text) else {
            info!("No media identifier found in message");
            if let Err(e) = transport.reply_text(EXTRACT_FAILED_TEXT).await {
                warn!(error = %e, "Failed to send extraction failure reply");
            }
            return DeliveryOutcome::NoIdentifier;
        };

        info!(id = %id, "Delivery requested");

        let mut status = None;
        let result = self
            .process(transport, &id, source_text(text), &mut status)
            .await;

        match result {
            Ok(outcome) => {
                Self::finalize(transport, status).await;
                info!(id = %id, ?outcome, "Delivery finished");
                outcome
            }
            Err(e) => {
                error!(id = %id, kind = ?e.fetch_kind(), error = %e, "Delivery failed");
                Self::finalize(transport, status).await;
                if let Err(e) = transport.reply_text(GENERIC_ERROR_TEXT).await {
                    warn!(error = %e, "Failed to send error reply");
                }
                DeliveryOutcome::Failed
            }
        }
    }

    async fn process(
        &self,
        transport: &dyn ChatTransport,
        id: &MediaId,
        source: &str,
        status: &mut Option<StatusHandle>,
    ) -> Result<DeliveryOutcome, PipelineError> {
        *status = Some(
            transport
                .post_status(STATUS_TEXT)
                .await
                .map_err(PipelineError::Transport)?,
        );

        let _guard = self.locks.acquire(id).await;
        debug!(id = %id, in_flight = self.locks.active(), "Acquired fetch lock");

        if let Some(entry) = self.cache.lookup(id).await {
            info!(id = %id, "Cache hit, resending stored audio");
            transport
                .send_cached_audio(&entry)
                .await
                .map_err(PipelineError::Transport)?;
            return Ok(DeliveryOutcome::Cached);
        }

        debug!(id = %id, "Cache miss, probing remote size");
        if let Some(declared) = self.fetcher.probe_size(id).await? {
            if declared > self.max_size {
                info!(id = %id, declared, "Declared size above limit");
                return Self::reject(transport, RejectReason::DeclaredSize(declared)).await;
            }
        }

        let audio = self.fetcher.fetch(id).await?;
        self.deliver_fresh(transport, id, source, audio).await
    }

    async fn deliver_fresh(
        &self,
        transport: &dyn ChatTransport,
        id: &MediaId,
        source: &str,
        audio: FetchedAudio,
    ) -> Result<DeliveryOutcome, PipelineError> {
        let actual = match tokio::fs::metadata(&audio.path).await {
            Ok(meta) => meta.len(),
            Err(source) => {
                remove_local(&audio.path).await;
                return Err(PipelineError::LocalFile {
                    path: audio.path,
                    source,
                });
            }
        };

        if actual > self.max_size {
            info!(id = %id, actual, "Downloaded size above limit");
            remove_local(&audio.path).await;
            return Self::reject(transport, RejectReason::ActualSize(actual)).await;
        }

        let sent = transport.send_audio_file(&audio).await;
        remove_local(&audio.path).await;
        let file_id = sent.map_err(PipelineError::Transport)?;

        self.cache
            .insert(
                id.clone(),
                CacheEntry {
                    url: source.to_string(),
                    file_id,
                    title: audio.title,
                    author: audio.author,
                },
            )
            .await?;
        info!(id = %id, "Uploaded audio and cached its handle");

        Ok(DeliveryOutcome::Fresh)
    }

    async fn reject(
        transport: &dyn ChatTransport,
        reason: RejectReason,
    ) -> Result<DeliveryOutcome, PipelineError> {
        transport
            .reply_text(SIZE_LIMIT_TEXT)
            .await
            .map_err(PipelineError::Transport)?;
        Ok(DeliveryOutcome::Rejected(reason))
    }

    async fn finalize(transport: &dyn ChatTransport, status: Option<StatusHandle>) {
        if let Some(status) = status {
            if let Err(e) = transport.delete_status(status).await {
                warn!(error = %e, "Failed to delete status message");
            }
        }
    }
}

/// Best-effort removal of a transient audio file
async fn remove_local(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed local audio file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove local audio file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::MockMediaFetcher;
    use crate::testing::{mock_fetcher_writing, RecordingTransport, TransportCall};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        cache: Arc<CacheStore>,
    }

    impl Fixture {
        async fn new() -> Result<Self, Box<dyn std::error::Error>> {
            let dir = TempDir::new()?;
            let cache = Arc::new(CacheStore::load(dir.path().join("downloads.json")).await?);
            Ok(Self { dir, cache })
        }

        fn audio_path(&self, id: &str) -> PathBuf {
            self.dir.path().join(format!("{id}.mp3"))
        }

        fn pipeline(&self, fetcher: MockMediaFetcher) -> DeliveryPipeline {
            DeliveryPipeline::new(self.cache.clone(), Arc::new(fetcher))
        }
    }

    #[tokio::test]
    async fn test_no_identifier_skips_notify() -> Result<(), Box<dyn std::error::Error>> {
        let fx = Fixture::new().await?;
        let pipeline = fx.pipeline(MockMediaFetcher::new());
        let transport = RecordingTransport::new();

        let outcome = pipeline.deliver(&transport, "https://example.com/nothing").await;

        assert_eq!(outcome, DeliveryOutcome::NoIdentifier);
        assert_eq!(
            transport.calls(),
            vec![TransportCall::Reply(EXTRACT_FAILED_TEXT.to_string())]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_second_delivery_hits_cache() -> Result<(), Box<dyn std::error::Error>> {
        let fx = Fixture::new().await?;
        let path = fx.audio_path("abc123");
        let pipeline = fx.pipeline(mock_fetcher_writing(path.clone(), 1024, Some(1024), 1));
        let transport = RecordingTransport::new();
        let text = "check this https://youtu.be/abc123?si=xyz out";

        assert_eq!(pipeline.deliver(&transport, text).await, DeliveryOutcome::Fresh);
        assert!(!path.exists());

        let entry = fx.cache.lookup(&MediaId::new("abc123")).await;
        assert_eq!(
            entry,
            Some(CacheEntry {
                url: "check this https://youtu.be/abc123".to_string(),
                file_id: "remote-1".to_string(),
                title: "Song".to_string(),
                author: "Band".to_string(),
            })
        );

        assert_eq!(pipeline.deliver(&transport, text).await, DeliveryOutcome::Cached);
        assert!(transport
            .calls()
            .contains(&TransportCall::SendCached("remote-1".to_string())));
        assert_eq!(transport.count(|c| matches!(c, TransportCall::Upload { .. })), 1);
        assert_eq!(transport.deleted_statuses(), transport.posted_statuses());
        Ok(())
    }

    #[tokio::test]
    async fn test_declared_size_above_ceiling_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let fx = Fixture::new().await?;
        let mut fetcher = MockMediaFetcher::new();
        fetcher
            .expect_probe_size()
            .times(1)
            .returning(|_| Ok(Some(MAX_AUDIO_SIZE_BYTES + 1)));
        fetcher.expect_fetch().times(0);
        let pipeline = fx.pipeline(fetcher);
        let transport = RecordingTransport::new();

        let outcome = pipeline.deliver(&transport, "https://youtu.be/big").await;

        assert_eq!(
            outcome,
            DeliveryOutcome::Rejected(RejectReason::DeclaredSize(MAX_AUDIO_SIZE_BYTES + 1))
        );
        assert!(transport
            .calls()
            .contains(&TransportCall::Reply(SIZE_LIMIT_TEXT.to_string())));
        assert_eq!(transport.deleted_statuses().len(), 1);
        assert!(fx.cache.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_declared_size_at_ceiling_is_accepted() -> Result<(), Box<dyn std::error::Error>> {
        let fx = Fixture::new().await?;
        let path = fx.audio_path("edge");
        let pipeline = fx.pipeline(mock_fetcher_writing(path, 10, Some(MAX_AUDIO_SIZE_BYTES), 1));
        let transport = RecordingTransport::new();

        let outcome = pipeline.deliver(&transport, "https://youtu.be/edge").await;

        assert_eq!(outcome, DeliveryOutcome::Fresh);
        Ok(())
    }

    #[tokio::test]
    async fn test_actual_size_decides_without_declared_size() -> Result<(), Box<dyn std::error::Error>> {
        let fx = Fixture::new().await?;
        let path = fx.audio_path("huge");
        let pipeline = fx.pipeline(mock_fetcher_writing(path.clone(), MAX_AUDIO_SIZE_BYTES + 1, None, 1));
        let transport = RecordingTransport::new();

        let outcome = pipeline.deliver(&transport, "https://youtu.be/huge").await;

        assert_eq!(
            outcome,
            DeliveryOutcome::Rejected(RejectReason::ActualSize(MAX_AUDIO_SIZE_BYTES + 1))
        );
        assert!(!path.exists());
        assert_eq!(transport.count(|c| matches!(c, TransportCall::Upload { .. })), 0);
        assert_eq!(transport.deleted_statuses().len(), 1);
        assert!(fx.cache.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_actual_size_at_ceiling_is_accepted() -> Result<(), Box<dyn std::error::Error>> {
        let fx = Fixture::new().await?;
        let path = fx.audio_path("exact");
        let pipeline = fx.pipeline(mock_fetcher_writing(path.clone(), MAX_AUDIO_SIZE_BYTES, None, 1));
        let transport = RecordingTransport::new();

        let outcome = pipeline.deliver(&transport, "https://youtu.be/exact").await;

        assert_eq!(outcome, DeliveryOutcome::Fresh);
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_failure_replies_generic_error() -> Result<(), Box<dyn std::error::Error>> {
        let fx = Fixture::new().await?;
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_probe_size().returning(|_| {
            Err(FetchError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "yt-dlp missing",
            )))
        });
        fetcher.expect_fetch().times(0);
        let pipeline = fx.pipeline(fetcher);
        let transport = RecordingTransport::new();

        let outcome = pipeline.deliver(&transport, "https://youtu.be/abc").await;

        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert_eq!(transport.deleted_statuses().len(), 1);
        assert_eq!(
            transport.calls().last(),
            Some(&TransportCall::Reply(GENERIC_ERROR_TEXT.to_string()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_failure_cleans_up() -> Result<(), Box<dyn std::error::Error>> {
        let fx = Fixture::new().await?;
        let path = fx.audio_path("abc");
        let pipeline = fx.pipeline(mock_fetcher_writing(path.clone(), 100, Some(100), 1));
        let transport = RecordingTransport::new().failing_uploads();

        let outcome = pipeline.deliver(&transport, "https://youtu.be/abc").await;

        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert!(!path.exists());
        assert!(fx.cache.is_empty().await);
        assert_eq!(transport.deleted_statuses().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_status_post_failure_deletes_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let fx = Fixture::new().await?;
        let pipeline = fx.pipeline(MockMediaFetcher::new());
        let transport = RecordingTransport::new().failing_status();

        let outcome = pipeline.deliver(&transport, "https://youtu.be/abc").await;

        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert!(transport.deleted_statuses().is_empty());
        assert_eq!(
            transport.calls(),
            vec![TransportCall::Reply(GENERIC_ERROR_TEXT.to_string())]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_requests_for_same_id_fetch_once() -> Result<(), Box<dyn std::error::Error>> {
        let fx = Fixture::new().await?;
        let path = fx.audio_path("same");
        let pipeline = fx.pipeline(mock_fetcher_writing(path, 100, Some(100), 1));
        let transport = RecordingTransport::new();

        let (a, b) = tokio::join!(
            pipeline.deliver(&transport, "https://youtu.be/same"),
            pipeline.deliver(&transport, "https://youtube.com/shorts/same"),
        );

        let mut outcomes = vec![a, b];
        outcomes.sort_by_key(|o| matches!(o, DeliveryOutcome::Cached));
        assert_eq!(outcomes, vec![DeliveryOutcome::Fresh, DeliveryOutcome::Cached]);
        assert_eq!(transport.deleted_statuses().len(), 2);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_fetch_kind_classifies_only_fetch_errors() {
        use std::os::unix::process::ExitStatusExt;

        let err = PipelineError::from(FetchError::Exited {
            status: std::process::ExitStatus::from_raw(256),
            stderr: "ERROR: [youtube] abc: Private video".to_string(),
        });
        assert_eq!(err.fetch_kind(), Some(FailureKind::Unavailable));

        let err = PipelineError::Transport(anyhow::anyhow!("chat unreachable"));
        assert_eq!(err.fetch_kind(), None);
    }
}
