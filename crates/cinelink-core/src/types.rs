//! Core types for Cinelink

use crate::backend::{CastTransport, EmbeddedPlayerHost, PlaybackSurface};
use crate::server::StreamConverter;
use crate::subtitles::{SubtitleFetcher, SubtitleRenderer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Abstract stream descriptor
///
/// An open record identifying playable content. The fields this layer
/// recognizes are typed; everything else is preserved untouched in `extra`
/// so descriptors can round-trip through the protocol without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Stream {
    /// Direct media URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Third-party embeddable player video id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yt_id: Option<String>,
    /// In-page frame URL (not supported by any backend in this layer)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_frame_url: Option<String>,
    /// Content handled entirely outside this layer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    /// Torrent info hash, interpreted only by the stream-to-URL converter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
    /// File index inside the torrent, interpreted only by the converter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_idx: Option<u32>,
    /// Subtitle tracks embedded in the descriptor
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subtitles: Vec<Track>,
    /// Hints the resolver attaches for the consuming backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior_hints: Option<BehaviorHints>,
    /// Unrecognized descriptor fields, preserved as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Stream {
    /// Descriptor carrying only a direct media URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// Hints attached to a resolved stream for the consuming backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BehaviorHints {
    /// Request/response headers the backend should honor
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// Subtitle track descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Unique id within the current track set
    pub id: String,
    /// Where the subtitle text is fetched from
    pub url: String,
    /// Language code
    pub lang: String,
    /// Human-readable name
    pub label: String,
    /// Who supplied the track
    pub origin: String,
    /// Tracks muxed into the media container cannot be overlaid and are
    /// rejected at ingestion
    #[serde(default)]
    pub embedded: bool,
}

/// Series metadata forwarded to the stream-to-URL converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SeriesInfo {
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

/// Arguments of the `load` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<Stream>,
    /// Base URL of the streaming server, required by the stream resolver
    #[serde(rename = "streamingServerURL", skip_serializing_if = "Option::is_none")]
    pub streaming_server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_info: Option<SeriesInfo>,
    /// Skip the direct-playability probe and always transcode
    pub force_transcoding: bool,
    /// Channel-count hint for the transcoder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_channels: Option<u32>,
    /// Start playing immediately; defaults to true when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoplay: Option<bool>,
    /// Start position in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
}

impl LoadArgs {
    pub fn autoplay(&self) -> bool {
        self.autoplay.unwrap_or(true)
    }
}

/// The stream resolver's output, consumed by the wrapped unit's own `load`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStream {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior_hints: Option<BehaviorHints>,
}

/// Remote-cast connection state, supplied by environment introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastState {
    Disconnected,
    Connecting,
    Connected,
}

/// Collaborator handles a unit is constructed with
///
/// Each backend requires its own rendering primitive; the decorators take
/// their collaborators from here as well, falling back to the crate
/// defaults where one exists.
#[derive(Clone, Default)]
pub struct VideoOptions {
    /// Native playback surface, required by the native backend
    pub surface: Option<Arc<dyn PlaybackSurface>>,
    /// Third-party embedded player host, required by the embedded backend
    pub embedded_host: Option<Arc<dyn EmbeddedPlayerHost>>,
    /// Remote-cast transport, required by the cast backend
    pub cast_transport: Option<Arc<dyn CastTransport>>,
    /// Subtitle presentation sink; cue sets are not rendered when absent
    pub subtitle_renderer: Option<Arc<dyn SubtitleRenderer>>,
    /// Subtitle text fetch; defaults to the HTTP implementation
    pub subtitle_fetcher: Option<Arc<dyn SubtitleFetcher>>,
    /// Stream-to-URL conversion; defaults to the crate implementation
    pub stream_converter: Option<Arc<dyn StreamConverter>>,
}

impl std::fmt::Debug for VideoOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoOptions")
            .field("surface", &self.surface.is_some())
            .field("embedded_host", &self.embedded_host.is_some())
            .field("cast_transport", &self.cast_transport.is_some())
            .field("subtitle_renderer", &self.subtitle_renderer.is_some())
            .field("subtitle_fetcher", &self.subtitle_fetcher.is_some())
            .field("stream_converter", &self.stream_converter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_preserves_unrecognized_fields() {
        let json = serde_json::json!({
            "url": "https://example.com/movie.mp4",
            "name": "Some Movie",
            "behaviorHints": { "headers": { "referer": "https://example.com" } }
        });

        let stream: Stream = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(stream.url.as_deref(), Some("https://example.com/movie.mp4"));
        assert_eq!(stream.extra.get("name").unwrap(), "Some Movie");

        let roundtrip = serde_json::to_value(&stream).unwrap();
        assert_eq!(roundtrip, json);
    }

    #[test]
    fn test_load_args_autoplay_default() {
        let args = LoadArgs::default();
        assert!(args.autoplay());

        let args: LoadArgs = serde_json::from_value(serde_json::json!({
            "autoplay": false
        }))
        .unwrap();
        assert!(!args.autoplay());
    }

    #[test]
    fn test_track_embedded_defaults_to_false() {
        let track: Track = serde_json::from_value(serde_json::json!({
            "id": "1",
            "url": "https://example.com/1.srt",
            "lang": "en",
            "label": "English",
            "origin": "OPENSUBTITLES"
        }))
        .unwrap();
        assert!(!track.embedded);
    }
}
