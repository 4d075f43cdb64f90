//! Protocol Core - the uniform contract every unit honors
//!
//! Every unit (backend or decorator-wrapped unit) is driven through exactly
//! three operations - observe a property, set a property, run a command -
//! and reports back through a small event vocabulary. Decorators handle the
//! operations in their own vocabulary and forward everything else to the
//! unit they wrap, so a composed stack looks exactly like a single unit.

use crate::error::{PlayerError, Result};
use crate::manifest::Manifest;
use crate::types::{Stream, Track, VideoOptions};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::mpsc;

/// State property names used across the crate
pub mod props {
    pub const STREAM: &str = "stream";
    pub const PAUSED: &str = "paused";
    pub const TIME: &str = "time";
    pub const DURATION: &str = "duration";
    pub const BUFFERING: &str = "buffering";
    pub const VOLUME: &str = "volume";
    pub const MUTED: &str = "muted";
    pub const SUBTITLES_TRACKS: &str = "subtitlesTracks";
    pub const SELECTED_SUBTITLES_TRACK_ID: &str = "selectedSubtitlesTrackId";
    pub const EXTRA_SUBTITLES_TRACKS: &str = "extraSubtitlesTracks";
    pub const SELECTED_EXTRA_SUBTITLES_TRACK_ID: &str = "selectedExtraSubtitlesTrackId";
    pub const SELECTED_EXTRA_SUBTITLES_2_TRACK_ID: &str = "selectedExtraSubtitles2TrackId";
    pub const EXTRA_SUBTITLES_DELAY: &str = "extraSubtitlesDelay";
    pub const EXTRA_SUBTITLES_2_DELAY: &str = "extraSubtitles2Delay";
    pub const EXTRA_SUBTITLES_SIZE: &str = "extraSubtitlesSize";
    pub const EXTRA_SUBTITLES_2_SIZE: &str = "extraSubtitles2Size";
    pub const EXTRA_SUBTITLES_OFFSET: &str = "extraSubtitlesOffset";
    pub const EXTRA_SUBTITLES_TEXT_COLOR: &str = "extraSubtitlesTextColor";
    pub const EXTRA_SUBTITLES_BACKGROUND_COLOR: &str = "extraSubtitlesBackgroundColor";
    pub const EXTRA_SUBTITLES_OUTLINE_COLOR: &str = "extraSubtitlesOutlineColor";
}

/// Command names used across the crate
pub mod commands {
    pub const LOAD: &str = "load";
    pub const UNLOAD: &str = "unload";
    pub const DESTROY: &str = "destroy";
    pub const ADD_EXTRA_SUBTITLES_TRACKS: &str = "addExtraSubtitlesTracks";
}

/// Event names, for manifest declarations
pub mod events {
    pub const PROP_VALUE: &str = "propValue";
    pub const PROP_CHANGED: &str = "propChanged";
    pub const ERROR: &str = "error";
    pub const ENDED: &str = "ended";
    pub const SUBTITLES_TRACK_LOADED: &str = "subtitlesTrackLoaded";
    pub const EXTRA_SUBTITLES_TRACK_LOADED: &str = "extraSubtitlesTrackLoaded";
}

/// One dispatched protocol operation
///
/// Actions are owned values; a caller keeps no handle into a submitted
/// action and cannot mutate it after dispatch.
#[derive(Debug, Clone)]
pub enum Action {
    ObserveProp { name: String },
    SetProp { name: String, value: Value },
    Command { name: String, args: Value },
}

impl Action {
    pub fn observe(name: impl Into<String>) -> Self {
        Action::ObserveProp { name: name.into() }
    }

    pub fn set(name: impl Into<String>, value: Value) -> Self {
        Action::SetProp {
            name: name.into(),
            value,
        }
    }

    pub fn command(name: impl Into<String>, args: Value) -> Self {
        Action::Command {
            name: name.into(),
            args,
        }
    }

    /// `load` carrying the given arguments
    pub fn load(args: &crate::types::LoadArgs) -> Self {
        Action::command(
            commands::LOAD,
            serde_json::to_value(args).unwrap_or(Value::Null),
        )
    }

    pub fn unload() -> Self {
        Action::command(commands::UNLOAD, Value::Null)
    }

    pub fn destroy() -> Self {
        Action::command(commands::DESTROY, Value::Null)
    }
}

/// Event emitted by a unit
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// One-shot announcement of a property's current value, emitted when the
    /// property becomes observed
    PropValue { name: String, value: Value },
    /// Change notification for an observed property
    PropChanged { name: String, value: Value },
    /// Runtime failure; critical errors imply the reporting unit unloaded
    Error(PlayerError),
    /// Playback reached the end of the content
    Ended,
    /// The embedded backend activated one of its host subtitle tracks
    SubtitlesTrackLoaded { id: String, lang: String },
    /// A subtitle decorator slot finished loading its selected track
    ExtraSubtitlesTrackLoaded(Track),
}

/// Where a unit emits its events
pub type EventSink = mpsc::UnboundedSender<PlayerEvent>;

/// Create the channel a composed unit reports through
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<PlayerEvent>) {
    mpsc::unbounded_channel()
}

/// Per-unit record of which properties have been observed
///
/// A property becomes observed through `observeProp` and stays observed for
/// the unit's lifetime; only observed properties emit `propChanged`.
#[derive(Debug, Default)]
pub struct ObservedProps {
    observed: HashSet<&'static str>,
}

impl ObservedProps {
    pub fn observe(&mut self, name: &'static str) {
        self.observed.insert(name);
    }

    pub fn is_observed(&self, name: &str) -> bool {
        self.observed.contains(name)
    }
}

/// A live unit: anything the Protocol Core can drive
///
/// `dispatch` applies synchronous state changes in call order and kicks off
/// asynchronous continuations for I/O-bound effects. It returns an error
/// only for programmer faults - a destroyed unit, or a command nothing in
/// the chain recognizes; runtime failures travel the event channel.
pub trait VideoUnit: Send + Sync + 'static {
    fn dispatch(&self, action: Action) -> Result<()>;
}

/// Static surface of a backend or decorator stack
///
/// Mirrors what a hosting application needs before instantiation: the
/// capability manifest, a constructor, and the playability probe the stream
/// resolver uses to decide between direct playback and transcoding.
#[async_trait]
pub trait VideoBackend: VideoUnit + Sized {
    /// Capability manifest of this unit type
    fn manifest() -> Manifest;

    /// Construct the unit; decorators construct their inner unit here as well
    fn new(options: VideoOptions, sink: EventSink) -> Result<Self>;

    /// Whether this unit type can directly play the given stream
    async fn can_play_stream(stream: &Stream) -> std::result::Result<bool, PlayerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observed_props_starts_empty() {
        let observed = ObservedProps::default();
        assert!(!observed.is_observed(props::TIME));
    }

    #[test]
    fn test_observe_is_sticky() {
        let mut observed = ObservedProps::default();
        observed.observe(props::TIME);
        observed.observe(props::TIME);
        assert!(observed.is_observed(props::TIME));
        assert!(!observed.is_observed(props::PAUSED));
    }

    #[test]
    fn test_load_action_carries_args() {
        let args = crate::types::LoadArgs {
            stream: Some(crate::types::Stream::with_url("https://example.com/a.mp4")),
            ..Default::default()
        };

        match Action::load(&args) {
            Action::Command { name, args } => {
                assert_eq!(name, commands::LOAD);
                assert_eq!(args["stream"]["url"], "https://example.com/a.mp4");
            }
            _ => panic!("expected a command"),
        }
    }
}
