#![deny(missing_docs)]
//! Tubecast core library.
//!
//! Transport-agnostic logic for turning a shared video link into an audio
//! message: identifier extraction, the delivered-media cache, the yt-dlp
//! fetcher and the delivery pipeline that ties them together.

/// Persisted identifier -> delivery metadata cache.
pub mod cache;
/// Configuration management.
pub mod config;
/// Media identifier extraction from chat text.
pub mod extractor;
/// Audio download via yt-dlp.
pub mod fetcher;
/// Per-identifier fetch serialization.
pub mod locks;
/// Delivery pipeline and the chat transport seam.
pub mod pipeline;
/// Utility functions.
pub mod utils;

/// Test doubles.
#[cfg(test)]
pub mod testing;

pub use cache::{CacheEntry, CacheError, CacheStore};
pub use extractor::{contains_link, extract_media_id, source_text, MediaId};
pub use fetcher::{FetchError, FetchedAudio, MediaFetcher, YtdlpFetcher};
pub use pipeline::{ChatTransport, DeliveryOutcome, DeliveryPipeline, RejectReason, StatusHandle};
