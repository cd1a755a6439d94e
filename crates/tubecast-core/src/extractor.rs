//! Media identifier extraction.
//!
//! A purely syntactic scan of chat text: query parameters are cut off at the
//! first `?` and the rest is searched for one of the known link shapes
//! (`v=<id>`, `/shorts/<id>`, `youtu.be/<id>`). No URL parsing and no check
//! that the item exists.

// lazy_regex! validates patterns at compile time and initializes on first use
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Match a video id after `v=`, `/shorts/` or `youtu.be/`
static RE_MEDIA_ID: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(?:v=|/shorts/|youtu\.be/)([\w-]+)");

/// Opaque token naming a remote media item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(String);

impl MediaId {
    /// Wrap an already extracted identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical watch URL handed to yt-dlp.
    #[must_use]
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the part of the message before the first query delimiter.
///
/// A `?` directly followed by `v=` carries the identifier itself and is not
/// treated as a delimiter. The result is stored as the informational source
/// of a cache entry.
///
/// # Examples
///
/// ```
/// use tubecast_core::extractor::source_text;
/// assert_eq!(source_text("https://youtu.be/abc?si=1"), "https://youtu.be/abc");
/// assert_eq!(
///     source_text("https://youtube.com/watch?v=abc?si=1"),
///     "https://youtube.com/watch?v=abc"
/// );
/// ```
#[must_use]
pub fn source_text(text: &str) -> &str {
    let cut = text
        .match_indices('?')
        .map(|(pos, _)| pos)
        .find(|&pos| !text[pos + 1..].starts_with("v="));
    cut.map_or(text, |pos| &text[..pos])
}

/// Extracts a media identifier from free-form chat text.
///
/// The whole message is truncated with [`source_text`] before matching, and
/// the first matching link shape wins.
///
/// # Examples
///
/// ```
/// use tubecast_core::extractor::extract_media_id;
/// let id = extract_media_id("check this https://youtu.be/abc123?si=xyz out");
/// assert_eq!(id.map(|id| id.to_string()), Some("abc123".to_string()));
/// ```
#[must_use]
pub fn extract_media_id(text: &str) -> Option<MediaId> {
    RE_MEDIA_ID
        .captures(source_text(text))
        .and_then(|caps| caps.get(1))
        .map(|m| MediaId::new(m.as_str()))
}

/// Gate applied to inbound text before extraction is attempted.
#[must_use]
pub fn contains_link(text: &str) -> bool {
    text.contains("http")
}
