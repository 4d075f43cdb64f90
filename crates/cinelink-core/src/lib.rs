//! Cinelink Core - Pluggable Media-Playback Control Layer
//!
//! This crate provides a uniform prop/command/event protocol over
//! interchangeable video backends, plus stackable decorators that add
//! cross-cutting capabilities without modifying the backends:
//! - Protocol core: observe/set/command over a small event vocabulary
//! - Capability manifests composed by union at decoration time
//! - Subtitle engine: dual slots, per-slot delay, overlay style state
//! - Streaming-server stream resolution with transcode fallback
//! - Backend selection from stream descriptor and environment flags
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Cinelink Core                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │                    ┌───────────────┐                        │
//! │                    │   Selector    │                        │
//! │                    └───────┬───────┘                        │
//! │                            │ picks                          │
//! │            ┌───────────────┴───────────────┐                │
//! │            │   WithStreamingServer (opt)   │                │
//! │            ├───────────────────────────────┤                │
//! │            │     WithSubtitles (opt)       │                │
//! │            ├───────────────────────────────┤                │
//! │            │  NativeVideo │ EmbeddedVideo  │                │
//! │            │          │ CastVideo          │                │
//! │            └───────────────┬───────────────┘                │
//! │                            │ narrow contracts               │
//! │             surface / host / transport / renderer           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rendering primitives, subtitle painting, and the streaming server's
//! transcoder live outside this crate and are reached through the
//! collaborator traits on [`VideoOptions`].

pub mod backend;
pub mod error;
pub mod manifest;
pub mod protocol;
pub mod selector;
pub mod server;
pub mod subtitles;
pub mod types;

pub use backend::{
    CastMessage, CastTransport, CastVideo, EmbeddedHostCommand, EmbeddedHostEvent,
    EmbeddedPlayerHost, EmbeddedVideo, NativeVideo, PlaybackSurface, SurfaceCommand, SurfaceEvent,
};
pub use error::{Error, ErrorCode, FailureKind, PlayerError, Result};
pub use manifest::Manifest;
pub use protocol::{
    event_channel, Action, EventSink, ObservedProps, PlayerEvent, VideoBackend, VideoUnit,
};
pub use selector::{select_video_implementation, SelectorArgs, VideoImplementation};
pub use server::{DefaultStreamConverter, StreamConverter, WithStreamingServer, HLS_CONTENT_TYPE};
pub use subtitles::{
    Color, ColorParseError, Cue, CueIndex, HttpSubtitleFetcher, SubtitleFetcher, SubtitleRenderer,
    SubtitleStyle, SubtitleView, WithSubtitles,
};
pub use types::{
    BehaviorHints, CastState, LoadArgs, ResolvedStream, SeriesInfo, Stream, Track, VideoOptions,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Cinelink Core initialized");
}
