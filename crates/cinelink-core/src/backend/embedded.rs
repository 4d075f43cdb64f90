//! Embedded third-party player backend
//!
//! Adapts the Protocol Core onto a third-party embeddable player hosted by
//! the application (an iframe player SDK or similar). The host boots
//! asynchronously: a `load` arriving before [`EmbeddedHostEvent::Ready`] is
//! parked and replayed once the host comes up. Host failure codes are
//! reduced to the crate's fixed error vocabulary.

use super::{BackendCore, SurfaceEvent};
use crate::error::{Error, FailureKind, PlayerError, Result};
use crate::manifest::Manifest;
use crate::protocol::{commands, events, props, Action, EventSink, PlayerEvent, VideoBackend, VideoUnit};
use crate::types::{LoadArgs, Stream, VideoOptions};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const EMBEDDED_PROPS: &[&str] = &[
    props::STREAM,
    props::PAUSED,
    props::TIME,
    props::DURATION,
    props::BUFFERING,
    props::VOLUME,
    props::MUTED,
    props::SUBTITLES_TRACKS,
    props::SELECTED_SUBTITLES_TRACK_ID,
];

/// Imperative command for the embedded player host
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddedHostCommand {
    Load {
        video_id: String,
        /// Start position in milliseconds
        time: u64,
        autoplay: bool,
    },
    Stop,
    SetPaused(bool),
    SeekTo(u64),
    SetVolume(u32),
    SetMuted(bool),
    /// Activate the host's own caption track for a language, or none
    SelectCaptions { lang: Option<String> },
}

/// State feed coming back from the embedded player host
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddedHostEvent {
    /// The host finished booting and accepts commands
    Ready,
    /// Regular playback-state update
    Playback(SurfaceEvent),
    /// The host's caption track list changed; entries are language codes
    TracksChanged(Vec<String>),
    /// Raw host playback error code (third-party vocabulary)
    Failed(u32),
    /// The host itself failed to boot
    BootFailed,
}

/// Host-provided embedded player the backend drives
pub trait EmbeddedPlayerHost: Send + Sync + 'static {
    fn apply(&self, command: EmbeddedHostCommand);

    /// Hand over the host's event feed; yields `None` once taken
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EmbeddedHostEvent>>;
}

/// Translate a raw host error code into the fixed vocabulary
fn map_host_error(code: u32) -> FailureKind {
    match code {
        2 => FailureKind::InvalidParameter,
        5 => FailureKind::FormatUnsupported,
        100 => FailureKind::NotFound,
        101 | 150 => FailureKind::NotEmbeddable,
        _ => FailureKind::Unknown,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HostTrack {
    id: String,
    lang: String,
}

struct EmbeddedState {
    core: BackendCore,
    ready: bool,
    pending_load: Option<Value>,
    tracks: Vec<HostTrack>,
    selected_track_id: Option<String>,
}

impl Default for EmbeddedState {
    fn default() -> Self {
        Self {
            core: BackendCore::new(),
            ready: false,
            pending_load: None,
            tracks: Vec::new(),
            selected_track_id: None,
        }
    }
}

impl EmbeddedState {
    fn prop_value(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.core.prop_value(name) {
            return Some(value);
        }

        if self.core.destroyed || self.core.stream.is_none() {
            return if EMBEDDED_PROPS.contains(&name) {
                Some(Value::Null)
            } else {
                None
            };
        }

        match name {
            props::SUBTITLES_TRACKS => Some(Value::Array(
                self.tracks
                    .iter()
                    .map(|track| serde_json::json!({ "id": track.id, "lang": track.lang }))
                    .collect(),
            )),
            props::SELECTED_SUBTITLES_TRACK_ID => Some(
                self.selected_track_id
                    .clone()
                    .map(Value::from)
                    .unwrap_or(Value::Null),
            ),
            _ => None,
        }
    }

    fn changed(&self, sink: &EventSink, name: &str) {
        if self.core.observed.is_observed(name) {
            let value = self.prop_value(name).unwrap_or(Value::Null);
            let _ = sink.send(PlayerEvent::PropChanged {
                name: name.to_string(),
                value,
            });
        }
    }

    fn changed_all(&self, sink: &EventSink) {
        for name in EMBEDDED_PROPS {
            self.changed(sink, name);
        }
    }
}

struct Shared {
    host: Arc<dyn EmbeddedPlayerHost>,
    state: Mutex<EmbeddedState>,
    sink: EventSink,
}

impl Shared {
    fn load(&self, args: Value) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.ready {
                state.pending_load = Some(args);
                return;
            }
        }

        self.unload();

        let args: LoadArgs = serde_json::from_value(args).unwrap_or_default();
        let video_id = args.stream.as_ref().and_then(|stream| stream.yt_id.clone());

        let video_id = match video_id {
            Some(video_id) => video_id,
            None => {
                self.report(PlayerError::unsupported_stream(args.stream));
                return;
            }
        };

        info!(video_id = %video_id, "loading stream on embedded host");

        let mut state = self.state.lock().unwrap();
        state.core.stream = args.stream.clone();
        state.core.time = Some(args.time.unwrap_or(0));
        state.core.buffering = true;
        state.core.paused = !args.autoplay();
        self.host.apply(EmbeddedHostCommand::Load {
            video_id,
            time: args.time.unwrap_or(0),
            autoplay: args.autoplay(),
        });
        state.changed_all(&self.sink);
    }

    fn unload(&self) {
        let mut state = self.state.lock().unwrap();
        state.pending_load = None;
        state.tracks.clear();
        state.selected_track_id = None;
        state.core.clear_stream();
        if state.ready {
            self.host.apply(EmbeddedHostCommand::Stop);
        }
        state.changed_all(&self.sink);
    }

    fn report(&self, error: PlayerError) {
        let critical = error.critical;
        let _ = self.sink.send(PlayerEvent::Error(error));
        if critical {
            self.unload();
        }
    }
}

/// Protocol adapter over an [`EmbeddedPlayerHost`]
pub struct EmbeddedVideo {
    shared: Arc<Shared>,
    reactor: Mutex<Option<JoinHandle<()>>>,
}

impl EmbeddedVideo {
    fn observe_prop(&self, name: &str) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(static_name) = EMBEDDED_PROPS.iter().copied().find(|prop| *prop == name) {
            let value = state.prop_value(name).unwrap_or(Value::Null);
            let _ = self.shared.sink.send(PlayerEvent::PropValue {
                name: name.to_string(),
                value,
            });
            state.core.observed.observe(static_name);
        }

        Ok(())
    }

    fn set_prop(&self, name: &str, value: Value) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        if state.core.stream.is_none() {
            return Ok(());
        }

        match name {
            props::PAUSED => {
                if let Some(paused) = value.as_bool() {
                    state.core.paused = paused;
                    self.shared.host.apply(EmbeddedHostCommand::SetPaused(paused));
                    state.changed(&self.shared.sink, props::PAUSED);
                }
            }
            props::TIME => {
                if let Some(time) = value.as_u64() {
                    state.core.time = Some(time);
                    self.shared.host.apply(EmbeddedHostCommand::SeekTo(time));
                    state.changed(&self.shared.sink, props::TIME);
                }
            }
            props::VOLUME => {
                if let Some(volume) = value.as_u64() {
                    state.core.volume = (volume as u32).min(100);
                    state.core.muted = false;
                    self.shared.host.apply(EmbeddedHostCommand::SetMuted(false));
                    self.shared
                        .host
                        .apply(EmbeddedHostCommand::SetVolume(state.core.volume));
                    state.changed(&self.shared.sink, props::MUTED);
                    state.changed(&self.shared.sink, props::VOLUME);
                }
            }
            props::MUTED => {
                if let Some(muted) = value.as_bool() {
                    state.core.muted = muted;
                    self.shared.host.apply(EmbeddedHostCommand::SetMuted(muted));
                    state.changed(&self.shared.sink, props::MUTED);
                }
            }
            props::SELECTED_SUBTITLES_TRACK_ID => {
                state.selected_track_id = None;
                let selected = value
                    .as_str()
                    .and_then(|id| state.tracks.iter().find(|track| track.id == id))
                    .cloned();
                if let Some(track) = selected {
                    state.selected_track_id = Some(track.id.clone());
                    self.shared.host.apply(EmbeddedHostCommand::SelectCaptions {
                        lang: Some(track.lang.clone()),
                    });
                    let _ = self.shared.sink.send(PlayerEvent::SubtitlesTrackLoaded {
                        id: track.id,
                        lang: track.lang,
                    });
                } else {
                    self.shared
                        .host
                        .apply(EmbeddedHostCommand::SelectCaptions { lang: None });
                }
                state.changed(&self.shared.sink, props::SELECTED_SUBTITLES_TRACK_ID);
            }
            _ => {}
        }

        Ok(())
    }
}

impl VideoUnit for EmbeddedVideo {
    fn dispatch(&self, action: Action) -> Result<()> {
        if self.shared.state.lock().unwrap().core.destroyed {
            return Err(Error::UnitDestroyed);
        }

        match action {
            Action::ObserveProp { name } => self.observe_prop(&name),
            Action::SetProp { name, value } => self.set_prop(&name, value),
            Action::Command { name, args } => match name.as_str() {
                commands::LOAD => {
                    self.shared.load(args);
                    Ok(())
                }
                commands::UNLOAD => {
                    self.shared.unload();
                    Ok(())
                }
                commands::DESTROY => {
                    self.shared.unload();
                    self.shared.state.lock().unwrap().core.destroyed = true;
                    if let Some(reactor) = self.reactor.lock().unwrap().take() {
                        reactor.abort();
                    }
                    Ok(())
                }
                _ => Err(Error::InvalidAction(name)),
            },
        }
    }
}

#[async_trait]
impl VideoBackend for EmbeddedVideo {
    fn manifest() -> Manifest {
        Manifest::new(
            "EmbeddedVideo",
            false,
            EMBEDDED_PROPS,
            &[commands::LOAD, commands::UNLOAD, commands::DESTROY],
            &[
                events::PROP_VALUE,
                events::PROP_CHANGED,
                events::ENDED,
                events::ERROR,
                events::SUBTITLES_TRACK_LOADED,
            ],
        )
    }

    fn new(options: VideoOptions, sink: EventSink) -> Result<Self> {
        let host = options
            .embedded_host
            .ok_or_else(|| Error::InvalidOptions("embedded player host required".to_string()))?;
        let mut host_events = host
            .take_events()
            .ok_or_else(|| Error::InvalidOptions("host events already taken".to_string()))?;

        let shared = Arc::new(Shared {
            host,
            state: Mutex::new(EmbeddedState::default()),
            sink,
        });

        let reactor = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                while let Some(event) = host_events.recv().await {
                    if shared.state.lock().unwrap().core.destroyed {
                        break;
                    }

                    match event {
                        EmbeddedHostEvent::Ready => {
                            let pending = {
                                let mut state = shared.state.lock().unwrap();
                                state.ready = true;
                                state.pending_load.take()
                            };
                            if let Some(args) = pending {
                                shared.load(args);
                            }
                        }
                        EmbeddedHostEvent::Playback(playback) => {
                            let failure = shared
                                .state
                                .lock()
                                .unwrap()
                                .core
                                .apply_surface_event(playback, &shared.sink);
                            if let Some(failure) = failure {
                                shared.report(failure.into_error());
                            }
                        }
                        EmbeddedHostEvent::TracksChanged(langs) => {
                            let mut state = shared.state.lock().unwrap();
                            state.tracks = langs
                                .into_iter()
                                .enumerate()
                                .map(|(index, lang)| HostTrack {
                                    id: index.to_string(),
                                    lang,
                                })
                                .collect();
                            state.changed(&shared.sink, props::SUBTITLES_TRACKS);
                        }
                        EmbeddedHostEvent::Failed(code) => {
                            debug!(code, "embedded host reported a playback error");
                            shared.report(map_host_error(code).into_error());
                        }
                        EmbeddedHostEvent::BootFailed => {
                            shared.report(PlayerError::new(
                                crate::error::ErrorCode::HostApiFailed,
                                "embedded player host failed to boot",
                                true,
                            ));
                        }
                    }
                }
            })
        };

        Ok(Self {
            shared,
            reactor: Mutex::new(Some(reactor)),
        })
    }

    async fn can_play_stream(stream: &Stream) -> std::result::Result<bool, PlayerError> {
        Ok(stream.yt_id.is_some())
    }
}

impl Drop for EmbeddedVideo {
    fn drop(&mut self) {
        if let Some(reactor) = self.reactor.lock().unwrap().take() {
            reactor.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::event_channel;

    struct MockHost {
        commands: Mutex<Vec<EmbeddedHostCommand>>,
        tx: mpsc::UnboundedSender<EmbeddedHostEvent>,
        rx: Mutex<Option<mpsc::UnboundedReceiver<EmbeddedHostEvent>>>,
    }

    impl MockHost {
        fn new() -> Arc<Self> {
            let (tx, rx) = mpsc::unbounded_channel();
            Arc::new(Self {
                commands: Mutex::new(Vec::new()),
                tx,
                rx: Mutex::new(Some(rx)),
            })
        }

        fn push(&self, event: EmbeddedHostEvent) {
            let _ = self.tx.send(event);
        }

        fn commands(&self) -> Vec<EmbeddedHostCommand> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl EmbeddedPlayerHost for MockHost {
        fn apply(&self, command: EmbeddedHostCommand) {
            self.commands.lock().unwrap().push(command);
        }

        fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EmbeddedHostEvent>> {
            self.rx.lock().unwrap().take()
        }
    }

    fn options(host: &Arc<MockHost>) -> VideoOptions {
        VideoOptions {
            embedded_host: Some(Arc::clone(host) as Arc<dyn EmbeddedPlayerHost>),
            ..Default::default()
        }
    }

    fn embeddable_args() -> LoadArgs {
        LoadArgs {
            stream: Some(Stream {
                yt_id: Some("dQw4w9WgXcQ".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_load_is_parked_until_ready() {
        let host = MockHost::new();
        let (sink, _rx) = event_channel();
        let video = EmbeddedVideo::new(options(&host), sink).unwrap();

        video.dispatch(Action::load(&embeddable_args())).unwrap();
        assert!(host.commands().is_empty());

        host.push(EmbeddedHostEvent::Ready);
        settle().await;

        assert!(host.commands().iter().any(|command| matches!(
            command,
            EmbeddedHostCommand::Load { video_id, .. } if video_id == "dQw4w9WgXcQ"
        )));
    }

    #[tokio::test]
    async fn test_host_error_codes_map_to_fixed_vocabulary() {
        let host = MockHost::new();
        let (sink, mut rx) = event_channel();
        let _video = EmbeddedVideo::new(options(&host), sink).unwrap();

        host.push(EmbeddedHostEvent::Failed(150));

        loop {
            match rx.recv().await.unwrap() {
                PlayerEvent::Error(error) => {
                    assert_eq!(error.error_code(), "NOT_EMBEDDABLE");
                    assert!(error.critical);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_selecting_host_track_emits_loaded_event() {
        let host = MockHost::new();
        let (sink, mut rx) = event_channel();
        let video = EmbeddedVideo::new(options(&host), sink).unwrap();

        host.push(EmbeddedHostEvent::Ready);
        settle().await;
        video.dispatch(Action::load(&embeddable_args())).unwrap();
        host.push(EmbeddedHostEvent::TracksChanged(vec!["en".to_string(), "de".to_string()]));
        settle().await;

        video
            .dispatch(Action::set(props::SELECTED_SUBTITLES_TRACK_ID, Value::from("1")))
            .unwrap();

        loop {
            match rx.recv().await.unwrap() {
                PlayerEvent::SubtitlesTrackLoaded { id, lang } => {
                    assert_eq!(id, "1");
                    assert_eq!(lang, "de");
                    break;
                }
                _ => continue,
            }
        }

        assert!(host.commands().iter().any(|command| matches!(
            command,
            EmbeddedHostCommand::SelectCaptions { lang: Some(lang) } if lang == "de"
        )));
    }

    #[tokio::test]
    async fn test_cannot_play_stream_without_video_id() {
        assert!(!EmbeddedVideo::can_play_stream(&Stream::with_url("https://example.com/a.mp4"))
            .await
            .unwrap());
    }
}
