//! Configuration and settings management
//!
//! Loads relay settings from config files and environment variables and
//! defines the hardcoded delivery constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum audio payload accepted for delivery (50 MiB).
pub const MAX_AUDIO_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// yt-dlp format selector: compact pre-encoded audio first, low bitrate last.
pub const YTDLP_AUDIO_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio[ext=mp3]/bestaudio[abr<=32]";

/// Extension used for the transient local audio file.
pub const AUDIO_FILE_EXTENSION: &str = "mp3";

// Supervisor configuration
/// Maximum number of bot session attempts before giving up
pub const SUPERVISOR_MAX_ATTEMPTS: usize = 6;
/// Initial backoff between bot session attempts
pub const SUPERVISOR_INITIAL_BACKOFF_MS: u64 = 1000;
/// Upper bound for the backoff between bot session attempts
pub const SUPERVISOR_MAX_BACKOFF_MS: u64 = 60_000;
/// A session that ran this long before failing restores the full restart budget
pub const SUPERVISOR_HEALTHY_SESSION_SECS: u64 = 600;

/// Relay settings loaded from environment variables and config files
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelaySettings {
    /// Working directory for transient audio files
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,

    /// Path of the JSON document mirroring the delivery cache
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,

    /// yt-dlp executable name or path
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,
}

fn default_audio_dir() -> PathBuf {
    PathBuf::from("audio")
}

fn default_cache_file() -> PathBuf {
    PathBuf::from("data/downloads.json")
}

fn default_ytdlp_path() -> String {
    "yt-dlp".to_string()
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            audio_dir: default_audio_dir(),
            cache_file: default_cache_file(),
            ytdlp_path: default_ytdlp_path(),
        }
    }
}

impl RelaySettings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }
}

/// Build the layered configuration shared by all settings structs.
///
/// Sources, lowest priority first: `config/default`, `config/{RUN_MODE}`,
/// `config/local`, `APP__*` variables, then plain environment variables.
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Environment::default() maps UPPER_SNAKE_CASE to snake_case keys
        .add_source(Environment::default().ignore_empty(true))
        .build()
}
