//! Backend selection
//!
//! A pure decision over the stream descriptor and environment flags: which
//! backend plus decorator stack should play this stream, if any. Several
//! conditions can hold at once, so evaluation order is fixed and the first
//! match wins.

use crate::backend::{CastVideo, EmbeddedVideo, NativeVideo};
use crate::error::Result;
use crate::manifest::Manifest;
use crate::protocol::{EventSink, VideoBackend, VideoUnit};
use crate::server::WithStreamingServer;
use crate::subtitles::WithSubtitles;
use crate::types::{CastState, Stream, VideoOptions};

/// Inputs of the selection decision
#[derive(Debug, Clone, Copy)]
pub struct SelectorArgs<'a> {
    pub stream: Option<&'a Stream>,
    pub streaming_server_url: Option<&'a str>,
    /// Current remote-cast connection state, from environment introspection
    pub cast_state: CastState,
}

/// A backend plus decorator stack the selector can pick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoImplementation {
    /// Remote cast receiver; subtitles render on the receiver itself
    Cast,
    /// Embedded third-party player with subtitle overlay
    EmbeddedWithSubtitles,
    /// Stream resolver layered over subtitle overlay over the native backend
    StreamingServerWithSubtitles,
    /// Native backend with subtitle overlay
    NativeWithSubtitles,
}

impl VideoImplementation {
    /// Capability manifest of the stack, available before instantiation
    pub fn manifest(&self) -> Manifest {
        match self {
            VideoImplementation::Cast => CastVideo::manifest(),
            VideoImplementation::EmbeddedWithSubtitles => {
                WithSubtitles::<EmbeddedVideo>::manifest()
            }
            VideoImplementation::StreamingServerWithSubtitles => {
                WithStreamingServer::<WithSubtitles<NativeVideo>>::manifest()
            }
            VideoImplementation::NativeWithSubtitles => WithSubtitles::<NativeVideo>::manifest(),
        }
    }

    /// Instantiate the stack behind the uniform protocol interface
    pub fn create(&self, options: VideoOptions, sink: EventSink) -> Result<Box<dyn VideoUnit>> {
        Ok(match self {
            VideoImplementation::Cast => Box::new(CastVideo::new(options, sink)?),
            VideoImplementation::EmbeddedWithSubtitles => {
                Box::new(WithSubtitles::<EmbeddedVideo>::new(options, sink)?)
            }
            VideoImplementation::StreamingServerWithSubtitles => Box::new(
                WithStreamingServer::<WithSubtitles<NativeVideo>>::new(options, sink)?,
            ),
            VideoImplementation::NativeWithSubtitles => {
                Box::new(WithSubtitles::<NativeVideo>::new(options, sink)?)
            }
        })
    }
}

/// Pick the backend + decorator stack for a stream, or `None` when nothing
/// applies. First match wins:
///
/// 1. external-URL-only streams are not handled by this layer
/// 2. an active cast session takes precedence over everything
/// 3. embeddable third-party streams use that backend with subtitle overlay
/// 4. in-page frame streams are not supported
/// 5. a configured streaming server routes through the stream resolver
/// 6. a direct URL falls back to the native backend with subtitle overlay
pub fn select_video_implementation(args: &SelectorArgs<'_>) -> Option<VideoImplementation> {
    let stream = args.stream?;

    if stream.external_url.is_some() {
        return None;
    }

    if args.cast_state == CastState::Connected {
        return Some(VideoImplementation::Cast);
    }

    if stream.yt_id.is_some() {
        return Some(VideoImplementation::EmbeddedWithSubtitles);
    }

    if stream.player_frame_url.is_some() {
        return None;
    }

    if args.streaming_server_url.is_some() {
        return Some(VideoImplementation::StreamingServerWithSubtitles);
    }

    if stream.url.is_some() {
        return Some(VideoImplementation::NativeWithSubtitles);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(
        stream: Option<&Stream>,
        server: Option<&str>,
        cast_state: CastState,
    ) -> Option<VideoImplementation> {
        select_video_implementation(&SelectorArgs {
            stream,
            streaming_server_url: server,
            cast_state,
        })
    }

    #[test]
    fn test_no_stream_selects_nothing() {
        assert_eq!(select(None, None, CastState::Disconnected), None);
    }

    #[test]
    fn test_external_url_streams_are_not_handled() {
        let stream = Stream {
            external_url: Some("https://example.com/watch".to_string()),
            url: Some("https://example.com/movie.mp4".to_string()),
            ..Default::default()
        };
        assert_eq!(select(Some(&stream), None, CastState::Connected), None);
    }

    #[test]
    fn test_connected_cast_session_takes_precedence() {
        let stream = Stream {
            yt_id: Some("abc".to_string()),
            url: Some("https://example.com/movie.mp4".to_string()),
            ..Default::default()
        };
        assert_eq!(
            select(Some(&stream), Some("http://127.0.0.1:11470"), CastState::Connected),
            Some(VideoImplementation::Cast)
        );
    }

    #[test]
    fn test_connecting_cast_session_does_not_count() {
        let stream = Stream::with_url("https://example.com/movie.mp4");
        assert_eq!(
            select(Some(&stream), None, CastState::Connecting),
            Some(VideoImplementation::NativeWithSubtitles)
        );
    }

    #[test]
    fn test_embeddable_stream_beats_the_streaming_server() {
        let stream = Stream {
            yt_id: Some("abc".to_string()),
            ..Default::default()
        };
        assert_eq!(
            select(Some(&stream), Some("http://127.0.0.1:11470"), CastState::Disconnected),
            Some(VideoImplementation::EmbeddedWithSubtitles)
        );
    }

    #[test]
    fn test_player_frame_streams_are_rejected() {
        let stream = Stream {
            player_frame_url: Some("https://example.com/frame".to_string()),
            url: Some("https://example.com/movie.mp4".to_string()),
            ..Default::default()
        };
        assert_eq!(select(Some(&stream), None, CastState::Disconnected), None);
    }

    #[test]
    fn test_streaming_server_routes_through_the_resolver() {
        let stream = Stream::with_url("https://example.com/movie.mkv");
        assert_eq!(
            select(Some(&stream), Some("http://127.0.0.1:11470"), CastState::Disconnected),
            Some(VideoImplementation::StreamingServerWithSubtitles)
        );
    }

    #[test]
    fn test_direct_url_falls_back_to_the_native_backend() {
        let stream = Stream::with_url("https://example.com/movie.mp4");
        assert_eq!(
            select(Some(&stream), None, CastState::Disconnected),
            Some(VideoImplementation::NativeWithSubtitles)
        );
    }

    #[test]
    fn test_unplayable_descriptor_selects_nothing() {
        let stream = Stream {
            info_hash: Some("aabb".to_string()),
            ..Default::default()
        };
        // Torrent descriptors need the streaming server
        assert_eq!(select(Some(&stream), None, CastState::Disconnected), None);
    }

    #[test]
    fn test_stack_manifests() {
        assert_eq!(VideoImplementation::Cast.manifest().name, "CastVideo");
        assert!(VideoImplementation::Cast.manifest().external);
        assert_eq!(
            VideoImplementation::StreamingServerWithSubtitles.manifest().name,
            "NativeVideoWithSubtitlesWithStreamingServer"
        );
        assert!(VideoImplementation::EmbeddedWithSubtitles
            .manifest()
            .has_prop("extraSubtitlesTracks"));
    }
}
