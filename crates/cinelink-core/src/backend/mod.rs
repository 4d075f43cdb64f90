//! Video backends - thin protocol adapters over narrow rendering contracts
//!
//! The actual drawing of video frames is out of scope for this layer. Each
//! backend translates the Protocol Core into commands for a host-provided
//! collaborator (a playback surface, an embedded third-party player host, a
//! remote-cast transport) and translates the collaborator's state feed back
//! into prop changes and events.

mod cast;
mod embedded;
mod native;

pub use cast::{CastMessage, CastTransport, CastVideo};
pub use embedded::{EmbeddedHostCommand, EmbeddedHostEvent, EmbeddedPlayerHost, EmbeddedVideo};
pub use native::{NativeVideo, PlaybackSurface, SurfaceCommand};

use crate::error::FailureKind;
use crate::protocol::{props, EventSink, ObservedProps, PlayerEvent};
use crate::types::Stream;
use serde_json::Value;

/// Playback-state feed coming back from a rendering collaborator
///
/// Shared by the native surface and the cast transport; both report the
/// same observable playback state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceEvent {
    /// Current position in milliseconds
    TimeChanged(u64),
    /// Content duration in milliseconds
    DurationChanged(u64),
    PausedChanged(bool),
    BufferingChanged(bool),
    /// Volume in percent, 0-100
    VolumeChanged(u32),
    MutedChanged(bool),
    /// Playback reached the end of the content
    Ended,
    /// Native playback failure, already reduced to the fixed vocabulary
    Failed(FailureKind),
}

/// Shared prop state of the playback backends
///
/// All props answer `null` while no stream is loaded, matching the
/// protocol's "no content" representation.
#[derive(Debug, Default)]
pub(crate) struct BackendCore {
    pub stream: Option<Stream>,
    pub paused: bool,
    pub time: Option<u64>,
    pub duration: Option<u64>,
    pub buffering: bool,
    pub volume: u32,
    pub muted: bool,
    pub observed: ObservedProps,
    pub destroyed: bool,
}

pub(crate) const BACKEND_PROPS: &[&str] = &[
    props::STREAM,
    props::PAUSED,
    props::TIME,
    props::DURATION,
    props::BUFFERING,
    props::VOLUME,
    props::MUTED,
];

impl BackendCore {
    pub fn new() -> Self {
        Self {
            volume: 100,
            ..Self::default()
        }
    }

    /// Current value of a shared prop; `None` means the prop is not one of
    /// the shared vocabulary and the caller should answer it itself.
    pub fn prop_value(&self, name: &str) -> Option<Value> {
        if self.destroyed || self.stream.is_none() {
            return if BACKEND_PROPS.contains(&name) {
                Some(Value::Null)
            } else {
                None
            };
        }

        match name {
            props::STREAM => Some(
                self.stream
                    .as_ref()
                    .and_then(|stream| serde_json::to_value(stream).ok())
                    .unwrap_or(Value::Null),
            ),
            props::PAUSED => Some(Value::from(self.paused)),
            props::TIME => Some(self.time.map(Value::from).unwrap_or(Value::Null)),
            props::DURATION => Some(self.duration.map(Value::from).unwrap_or(Value::Null)),
            props::BUFFERING => Some(Value::from(self.buffering)),
            props::VOLUME => Some(Value::from(self.volume)),
            props::MUTED => Some(Value::from(self.muted)),
            _ => None,
        }
    }

    /// Emit `propChanged` if the prop is currently observed
    pub fn changed(&self, sink: &EventSink, name: &str) {
        if self.observed.is_observed(name) {
            let value = self.prop_value(name).unwrap_or(Value::Null);
            let _ = sink.send(PlayerEvent::PropChanged {
                name: name.to_string(),
                value,
            });
        }
    }

    /// Announce every shared prop; backends do this after load and unload
    pub fn changed_all(&self, sink: &EventSink) {
        for name in BACKEND_PROPS {
            self.changed(sink, name);
        }
    }

    /// Apply one collaborator state event and announce what moved.
    /// A reported failure is handed back for the backend to translate.
    pub fn apply_surface_event(&mut self, event: SurfaceEvent, sink: &EventSink) -> Option<FailureKind> {
        match event {
            SurfaceEvent::TimeChanged(time) => {
                self.time = Some(time);
                self.changed(sink, props::TIME);
            }
            SurfaceEvent::DurationChanged(duration) => {
                self.duration = Some(duration);
                self.changed(sink, props::DURATION);
            }
            SurfaceEvent::PausedChanged(paused) => {
                self.paused = paused;
                self.changed(sink, props::PAUSED);
            }
            SurfaceEvent::BufferingChanged(buffering) => {
                self.buffering = buffering;
                self.changed(sink, props::BUFFERING);
            }
            SurfaceEvent::VolumeChanged(volume) => {
                self.volume = volume.min(100);
                self.changed(sink, props::VOLUME);
            }
            SurfaceEvent::MutedChanged(muted) => {
                self.muted = muted;
                self.changed(sink, props::MUTED);
            }
            SurfaceEvent::Ended => {
                let _ = sink.send(PlayerEvent::Ended);
            }
            SurfaceEvent::Failed(failure) => return Some(failure),
        }

        None
    }

    /// Drop all per-stream state; volume and muted persist across loads
    pub fn clear_stream(&mut self) {
        self.stream = None;
        self.paused = false;
        self.time = None;
        self.duration = None;
        self.buffering = false;
    }
}
