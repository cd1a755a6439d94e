//! Audio fetcher backed by yt-dlp
//!
//! Runs yt-dlp as a subprocess: once without downloading to read the declared
//! size of the selected audio format, and once to download that format into
//! the audio working directory.

use crate::config::{AUDIO_FILE_EXTENSION, YTDLP_AUDIO_FORMAT};
use crate::extractor::MediaId;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Patterns indicating the item itself cannot be fetched
/// (unavailable, private, restricted, unsupported)
const FATAL_ERROR_PATTERNS: &[&str] = &[
    "Video unavailable",
    "Private video",
    "This video is not available",
    "Sign in to confirm your age",
    "age-restricted",
    "members-only",
    "This video is private",
    "removed by the uploader",
    "no longer available",
    "blocked it in your country",
    "geo-restricted",
    "who has blocked it on copyright grounds",
    "copyright claim",
    "terminated account",
    "This video has been removed",
    "ERROR: Unsupported URL",
    "is not a valid URL",
    "Unable to extract video data",
    "Premieres in",
    "This live event will begin",
    "Join this channel to get access",
    "Requested format is not available",
    "HTTP Error 403",
    "HTTP Error 404",
    "Sign in to view this video",
];

/// Patterns indicating transient network trouble
const TRANSIENT_ERROR_PATTERNS: &[&str] = &[
    "Connection reset",
    "Connection timed out",
    "Unable to download webpage",
    "HTTP Error 429",
    "HTTP Error 503",
    "Read timed out",
    "network is unreachable",
    "Temporary failure in name resolution",
];

/// Rough classification of a yt-dlp failure, used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The item is unavailable, restricted, or its format cannot be negotiated
    Unavailable,
    /// Network-level trouble
    Transient,
    /// Anything else
    Unknown,
}

/// Classify yt-dlp stderr output.
#[must_use]
pub fn classify_ytdlp_error(stderr: &str) -> FailureKind {
    if FATAL_ERROR_PATTERNS.iter().any(|p| stderr.contains(p)) {
        FailureKind::Unavailable
    } else if TRANSIENT_ERROR_PATTERNS.iter().any(|p| stderr.contains(p)) {
        FailureKind::Transient
    } else {
        FailureKind::Unknown
    }
}

/// Errors that can occur while probing or fetching media
#[derive(Error, Debug)]
pub enum FetchError {
    /// yt-dlp could not be started
    #[error("failed to run yt-dlp: {0}")]
    Spawn(#[source] std::io::Error),
    /// yt-dlp exited with a failure status
    #[error("yt-dlp exited with {status}: {stderr}")]
    Exited {
        /// Exit status
        status: ExitStatus,
        /// Captured stderr
        stderr: String,
    },
    /// yt-dlp printed something that is not the expected metadata
    #[error("unreadable yt-dlp metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    /// yt-dlp reported success but the output file is absent
    #[error("downloaded file not found at {}", .0.display())]
    MissingOutput(PathBuf),
}

impl FetchError {
    /// Failure classification for logs.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Exited { stderr, .. } => classify_ytdlp_error(stderr),
            _ => FailureKind::Unknown,
        }
    }
}

/// A downloaded audio file together with its track metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAudio {
    /// Local file, owned by the request that fetched it
    pub path: PathBuf,
    /// Track title
    pub title: String,
    /// Track author
    pub author: String,
}

/// Source of audio renditions for media identifiers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Query the declared size of the audio rendition without downloading.
    ///
    /// Returns `None` when the remote metadata carries no size.
    async fn probe_size(&self, id: &MediaId) -> Result<Option<u64>, FetchError>;

    /// Download the audio rendition to local storage.
    async fn fetch(&self, id: &MediaId) -> Result<FetchedAudio, FetchError>;
}

/// Subset of the yt-dlp info JSON that the relay reads
#[derive(Debug, Deserialize)]
struct YtdlpInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    filesize: Option<u64>,
}

/// [`MediaFetcher`] that shells out to yt-dlp
#[derive(Debug, Clone)]
pub struct YtdlpFetcher {
    binary: String,
    audio_dir: PathBuf,
}

impl YtdlpFetcher {
    /// Create a fetcher writing into `audio_dir`.
    #[must_use]
    pub fn new(binary: impl Into<String>, audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            audio_dir: audio_dir.into(),
        }
    }

    /// Deterministic local path for an identifier.
    #[must_use]
    pub fn output_path(&self, id: &MediaId) -> PathBuf {
        self.audio_dir
            .join(format!("{}.{AUDIO_FILE_EXTENSION}", id.as_str()))
    }

    /// Execute yt-dlp and return stdout
    async fn exec_ytdlp(&self, args: &[&str]) -> Result<String, FetchError> {
        debug!(binary = %self.binary, ?args, "Executing yt-dlp command");

        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(FetchError::Spawn)?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let kind = classify_ytdlp_error(&stderr);
        warn!(status = %output.status, ?kind, error = %stderr, "yt-dlp failed");
        Err(FetchError::Exited {
            status: output.status,
            stderr,
        })
    }
}

/// Parse the last JSON line printed by yt-dlp.
fn parse_info(stdout: &str) -> Result<YtdlpInfo, FetchError> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_default();
    Ok(serde_json::from_str(line)?)
}

#[async_trait]
impl MediaFetcher for YtdlpFetcher {
    async fn probe_size(&self, id: &MediaId) -> Result<Option<u64>, FetchError> {
        let url = id.watch_url();
        let stdout = self
            .exec_ytdlp(&[
                "-f",
                YTDLP_AUDIO_FORMAT,
                "--no-playlist",
                "--no-warnings",
                "--no-download",
                "-j",
                &url,
            ])
            .await?;

        let info = parse_info(&stdout)?;
        debug!(id = %id, filesize = ?info.filesize, "Queried declared audio size");
        Ok(info.filesize)
    }

    async fn fetch(&self, id: &MediaId) -> Result<FetchedAudio, FetchError> {
        let url = id.watch_url();
        let path = self.output_path(id);
        let template = path.to_string_lossy().to_string();

        // -j alone implies simulation; --no-simulate downloads and still prints the info
        let stdout = self
            .exec_ytdlp(&[
                "-f",
                YTDLP_AUDIO_FORMAT,
                "--no-playlist",
                "--no-warnings",
                "--no-progress",
                "--no-simulate",
                "-j",
                "-o",
                &template,
                &url,
            ])
            .await?;

        let info = parse_info(&stdout)?;

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(FetchError::MissingOutput(path));
        }

        Ok(FetchedAudio {
            path,
            title: info.title.unwrap_or_else(|| id.to_string()),
            author: info.uploader.unwrap_or_else(|| "Unknown".to_string()),
        })
    }
}
