//! Centralized error types for the Ariyo core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Exposes machine-readable codes through [`ErrorCode`]
//! - Maps proxy failures to HTTP responses (see [`crate::api`])

use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Errors surfaced by the playback engine.
///
/// Most playback failures are reported through status events rather than
/// returned; these values travel inside
/// [`StatusEvent::error`](crate::events::StatusEvent) as their display string.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum PlaybackError {
    /// The engine was disposed and no longer accepts commands.
    #[error("Playback engine has been disposed")]
    EngineClosed,

    /// No catalog station matches the requested key.
    #[error("Station with id \"{0}\" not found.")]
    StationNotFound(String),

    /// The descriptor has no usable stream URL.
    #[error("Missing stream URL for station")]
    MissingStreamUrl,

    /// Automatic recovery gave up.
    #[error("Failed to recover stream after {attempts} attempts ({reason}).")]
    RecoveryExhausted {
        /// Retries attempted before giving up.
        attempts: u32,
        /// What triggered the final failure.
        reason: String,
    },

    /// The media element reported a failure.
    #[error("{0}")]
    Media(MediaError),

    /// The engine could not be constructed.
    #[error("Engine setup failed: {0}")]
    Setup(String),
}

impl ErrorCode for PlaybackError {
    fn code(&self) -> &'static str {
        match self {
            Self::EngineClosed => "engine_closed",
            Self::StationNotFound(_) => "station_not_found",
            Self::MissingStreamUrl => "missing_stream_url",
            Self::RecoveryExhausted { .. } => "recovery_exhausted",
            Self::Media(e) => e.code(),
            Self::Setup(_) => "engine_setup_failed",
        }
    }
}

/// Convenient Result alias for engine operations.
pub type PlaybackResult<T> = Result<T, PlaybackError>;

/// Failure categories reported by a media element.
///
/// Mirrors the standard media error codes exposed by playback hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaErrorKind {
    /// Fetching was aborted at the host's request.
    Aborted,
    /// A network error interrupted the download.
    Network,
    /// The media could not be decoded.
    Decode,
    /// The source format or URL is not supported.
    SourceNotSupported,
    /// Play was refused or failed for an unspecified reason.
    Unknown,
}

impl MediaErrorKind {
    /// Whether this failure may be caused by cross-origin loading rather than
    /// the stream itself.
    #[must_use]
    pub fn is_decode_class(self) -> bool {
        matches!(self, Self::Decode | Self::SourceNotSupported)
    }

    fn default_message(self) -> &'static str {
        match self {
            Self::Aborted => "Playback aborted.",
            Self::Network => "Network error.",
            Self::Decode => "Error decoding media.",
            Self::SourceNotSupported => "Media source not supported.",
            Self::Unknown => "An unknown error occurred.",
        }
    }
}

/// A failure reported by a media element or by a rejected play request.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[error("{message}")]
pub struct MediaError {
    /// Category of the failure.
    pub kind: MediaErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl MediaError {
    /// Creates an error with an explicit message.
    pub fn new(kind: MediaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<MediaErrorKind> for MediaError {
    fn from(kind: MediaErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }
}

impl ErrorCode for MediaError {
    fn code(&self) -> &'static str {
        match self.kind {
            MediaErrorKind::Aborted => "media_aborted",
            MediaErrorKind::Network => "media_network",
            MediaErrorKind::Decode => "media_decode",
            MediaErrorKind::SourceNotSupported => "media_source_not_supported",
            MediaErrorKind::Unknown => "media_unknown",
        }
    }
}

/// Errors raised while resolving a source URL.
///
/// Resolution itself never fails: these are recorded as the fallback reason
/// on [`ResolvedSource`](crate::resolver::ResolvedSource) and logged.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Fetching the playlist body failed.
    #[error("Playlist fetch failed: {0}")]
    Fetch(String),

    /// The playlist server answered with a non-success status.
    #[error("Playlist HTTP {0}")]
    HttpStatus(u16),

    /// The playlist contained no stream entry.
    #[error("No stream URL found in {0} playlist")]
    EmptyPlaylist(&'static str),

    /// Playlist chains exceeded the nesting limit.
    #[error("Playlist nesting too deep")]
    TooDeep,
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        Self::Fetch(friendly_network_error(&err))
    }
}

impl ErrorCode for ResolveError {
    fn code(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "playlist_fetch_failed",
            Self::HttpStatus(_) => "playlist_http_error",
            Self::EmptyPlaylist(_) => "playlist_empty",
            Self::TooDeep => "playlist_too_deep",
        }
    }
}

/// Turns a reqwest error into a short message suitable for logs and events.
pub(crate) fn friendly_network_error(e: &reqwest::Error) -> String {
    if e.is_builder() {
        if let Some(url) = e.url() {
            return format!("Invalid URL: {url}");
        }
        return "Invalid URL".to_string();
    }
    if e.is_connect() {
        if let Some(url) = e.url() {
            return format!("Could not connect to {}", url.host_str().unwrap_or("server"));
        }
        return "Could not connect to server".to_string();
    }
    if e.is_timeout() {
        return "Connection timed out".to_string();
    }
    if e.is_decode() {
        return "Invalid response from server".to_string();
    }
    format!("Network error: {e}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_error_message_includes_attempts_and_reason() {
        let err = PlaybackError::RecoveryExhausted {
            attempts: 6,
            reason: "stall-timeout".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to recover stream after 6 attempts (stall-timeout)."
        );
        assert_eq!(err.code(), "recovery_exhausted");
    }

    #[test]
    fn media_error_from_kind_uses_default_message() {
        let err = MediaError::from(MediaErrorKind::Network);
        assert_eq!(err.to_string(), "Network error.");
        assert_eq!(err.code(), "media_network");
        assert_eq!(PlaybackError::Media(err).code(), "media_network");
    }

    #[test]
    fn decode_class_covers_decode_and_unsupported_source() {
        assert!(MediaErrorKind::Decode.is_decode_class());
        assert!(MediaErrorKind::SourceNotSupported.is_decode_class());
        assert!(!MediaErrorKind::Network.is_decode_class());
        assert!(!MediaErrorKind::Aborted.is_decode_class());
    }

    #[test]
    fn station_not_found_quotes_the_key() {
        let err = PlaybackError::StationNotFound("joy-fm".into());
        assert_eq!(err.to_string(), "Station with id \"joy-fm\" not found.");
    }
}
