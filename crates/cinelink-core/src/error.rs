//! Error types for Cinelink Core
//!
//! Two error channels exist side by side:
//!
//! - [`Error`] is returned synchronously from [`dispatch`](crate::VideoUnit::dispatch)
//!   for programmer-error faults only (operating on a destroyed unit, dispatching an
//!   action nothing in the chain recognizes, constructing a unit with missing
//!   collaborators).
//! - [`PlayerError`] is a value delivered over the event channel for every runtime
//!   failure of a recognized operation. Its `critical` flag decides whether the
//!   reporting unit implicitly unloads itself.

use crate::types::{Stream, Track};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Synchronous protocol faults
#[derive(Error, Debug)]
pub enum Error {
    #[error("video unit is destroyed")]
    UnitDestroyed,

    #[error("invalid action dispatched: {0}")]
    InvalidAction(String),

    #[error("invalid video options: {0}")]
    InvalidOptions(String),
}

/// Stable error codes for the event channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Stream descriptor is missing or cannot be handled by the unit it reached
    UnsupportedStream,
    /// Fetch/convert/parse failure for a single subtitle track
    SubtitlesLoadFailed,
    /// Backend rejected a playback parameter
    InvalidParameter,
    /// Backend cannot decode the media format
    FormatUnsupported,
    /// Content does not exist
    NotFound,
    /// Content exists but refuses embedded playback
    NotEmbeddable,
    /// Third-party player host failed to boot
    HostApiFailed,
    /// Anything without a more specific code
    Unknown,
}

impl ErrorCode {
    /// Returns the wire/analytics string for this code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnsupportedStream => "UNSUPPORTED_STREAM",
            ErrorCode::SubtitlesLoadFailed => "SUBTITLES_LOAD_FAILED",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::FormatUnsupported => "FORMAT_UNSUPPORTED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::NotEmbeddable => "NOT_EMBEDDABLE",
            ErrorCode::HostApiFailed => "HOST_API_FAILED",
            ErrorCode::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime failure record delivered through the `error` event
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct PlayerError {
    /// Stable error code
    pub code: ErrorCode,
    /// Human-readable description
    pub message: String,
    /// Critical errors force an implicit unload of the unit that observed them
    pub critical: bool,
    /// Subtitle track the error is scoped to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<Track>,
    /// Stream descriptor the error is scoped to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<Stream>,
}

impl PlayerError {
    pub fn new(code: ErrorCode, message: impl Into<String>, critical: bool) -> Self {
        Self {
            code,
            message: message.into(),
            critical,
            track: None,
            stream: None,
        }
    }

    /// Malformed or unhandleable stream/command arguments, always critical
    pub fn unsupported_stream(stream: Option<Stream>) -> Self {
        Self {
            stream,
            ..Self::new(
                ErrorCode::UnsupportedStream,
                "stream cannot be played by this unit",
                true,
            )
        }
    }

    /// Single-track subtitle failure, scoped to its slot, never critical
    pub fn subtitles_load_failed(track: Track, cause: impl Into<String>) -> Self {
        Self {
            track: Some(track),
            ..Self::new(ErrorCode::SubtitlesLoadFailed, cause, false)
        }
    }

    /// Critical failure without a more specific code
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message, true)
    }

    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_stream(mut self, stream: Option<Stream>) -> Self {
        self.stream = stream;
        self
    }

    /// Returns the error code for analytics
    pub fn error_code(&self) -> &'static str {
        self.code.as_str()
    }
}

/// Fixed vocabulary a backend translates native playback failures into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    InvalidParameter,
    FormatUnsupported,
    NotFound,
    NotEmbeddable,
    Unknown,
}

impl FailureKind {
    /// Translate into the error record reported upward; backend failures are
    /// always critical.
    pub fn into_error(self) -> PlayerError {
        let (code, message) = match self {
            FailureKind::InvalidParameter => {
                (ErrorCode::InvalidParameter, "invalid playback parameter")
            }
            FailureKind::FormatUnsupported => {
                (ErrorCode::FormatUnsupported, "media format is not supported")
            }
            FailureKind::NotFound => (ErrorCode::NotFound, "content not found"),
            FailureKind::NotEmbeddable => {
                (ErrorCode::NotEmbeddable, "content cannot be embedded")
            }
            FailureKind::Unknown => (ErrorCode::Unknown, "unknown playback failure"),
        };

        PlayerError::new(code, message, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::UnsupportedStream.as_str(), "UNSUPPORTED_STREAM");
        assert_eq!(ErrorCode::SubtitlesLoadFailed.as_str(), "SUBTITLES_LOAD_FAILED");
        assert_eq!(ErrorCode::Unknown.as_str(), "UNKNOWN_ERROR");
    }

    #[test]
    fn test_unsupported_stream_is_critical() {
        let error = PlayerError::unsupported_stream(None);
        assert!(error.critical);
        assert_eq!(error.error_code(), "UNSUPPORTED_STREAM");
    }

    #[test]
    fn test_subtitles_failure_is_not_critical() {
        let track = Track {
            id: "1".to_string(),
            url: "https://example.com/1.srt".to_string(),
            lang: "en".to_string(),
            label: "English".to_string(),
            origin: "EXCLUSIVE".to_string(),
            embedded: false,
        };
        let error = PlayerError::subtitles_load_failed(track, "404 (Not Found)");
        assert!(!error.critical);
        assert_eq!(error.track.as_ref().unwrap().id, "1");
    }

    #[test]
    fn test_failure_kind_translation() {
        let error = FailureKind::NotEmbeddable.into_error();
        assert_eq!(error.code, ErrorCode::NotEmbeddable);
        assert!(error.critical);
    }
}
