//! Native video backend
//!
//! Adapts the Protocol Core onto a host-provided playback surface (the
//! thing that actually decodes and draws frames). The surface receives
//! imperative commands and feeds playback state back as [`SurfaceEvent`]s.

use super::{BackendCore, SurfaceEvent, BACKEND_PROPS};
use crate::error::{Error, PlayerError, Result};
use crate::manifest::Manifest;
use crate::protocol::{commands, events, props, Action, EventSink, PlayerEvent, VideoBackend, VideoUnit};
use crate::types::{LoadArgs, Stream, VideoOptions};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

/// Container formats the native surface is expected to play without help
const DIRECT_PLAYBACK_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "webm", "mov", "m3u8", "mp3", "m4a", "aac", "ogg", "wav",
];

/// Imperative command for the playback surface
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCommand {
    /// Attach a media source and begin buffering
    Load {
        url: Url,
        headers: HashMap<String, String>,
    },
    /// Detach the current source
    Stop,
    SetPaused(bool),
    /// Position in milliseconds
    SeekTo(u64),
    /// Volume in percent, 0-100
    SetVolume(u32),
    SetMuted(bool),
}

/// Host-provided rendering primitive the native backend drives
///
/// Constructed by the hosting application with its mounting target; this
/// layer only ever sees the command/event contract.
pub trait PlaybackSurface: Send + Sync + 'static {
    fn apply(&self, command: SurfaceCommand);

    /// Hand over the surface's state feed; yields `None` once taken
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SurfaceEvent>>;
}

/// Protocol adapter over a [`PlaybackSurface`]
pub struct NativeVideo {
    surface: Arc<dyn PlaybackSurface>,
    state: Arc<Mutex<BackendCore>>,
    sink: EventSink,
    reactor: Mutex<Option<JoinHandle<()>>>,
}

impl NativeVideo {
    fn observe_prop(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(static_name) = BACKEND_PROPS.iter().copied().find(|prop| *prop == name) {
            let value = state.prop_value(name).unwrap_or(Value::Null);
            let _ = self.sink.send(PlayerEvent::PropValue {
                name: name.to_string(),
                value,
            });
            state.observed.observe(static_name);
        }

        Ok(())
    }

    fn set_prop(&self, name: &str, value: Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.stream.is_none() {
            return Ok(());
        }

        match name {
            props::PAUSED => {
                if let Some(paused) = value.as_bool() {
                    state.paused = paused;
                    self.surface.apply(SurfaceCommand::SetPaused(paused));
                    state.changed(&self.sink, props::PAUSED);
                }
            }
            props::TIME => {
                if let Some(time) = value.as_u64() {
                    state.time = Some(time);
                    self.surface.apply(SurfaceCommand::SeekTo(time));
                    state.changed(&self.sink, props::TIME);
                }
            }
            props::VOLUME => {
                if let Some(volume) = value.as_u64() {
                    state.volume = (volume as u32).min(100);
                    state.muted = false;
                    self.surface.apply(SurfaceCommand::SetMuted(false));
                    self.surface.apply(SurfaceCommand::SetVolume(state.volume));
                    state.changed(&self.sink, props::MUTED);
                    state.changed(&self.sink, props::VOLUME);
                }
            }
            props::MUTED => {
                if let Some(muted) = value.as_bool() {
                    state.muted = muted;
                    self.surface.apply(SurfaceCommand::SetMuted(muted));
                    state.changed(&self.sink, props::MUTED);
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn load(&self, args: Value) -> Result<()> {
        let args: LoadArgs = serde_json::from_value(args).unwrap_or_default();
        let source = args
            .stream
            .as_ref()
            .and_then(|stream| stream.url.as_deref())
            .and_then(|raw| Url::parse(raw).ok());

        let mut state = self.state.lock().unwrap();
        unload(&mut state, &self.surface, &self.sink);

        let (stream, url) = match (args.stream.clone(), source) {
            (Some(stream), Some(url)) => (stream, url),
            (stream, _) => {
                drop(state);
                self.report(PlayerError::unsupported_stream(stream));
                return Ok(());
            }
        };

        info!(url = %url, "loading stream on native surface");

        let headers = stream
            .behavior_hints
            .as_ref()
            .map(|hints| hints.headers.clone())
            .unwrap_or_default();

        state.stream = Some(stream);
        state.time = Some(args.time.unwrap_or(0));
        state.duration = None;
        state.buffering = true;
        state.paused = !args.autoplay();

        self.surface.apply(SurfaceCommand::Load { url, headers });
        if let Some(time) = args.time.filter(|time| *time > 0) {
            self.surface.apply(SurfaceCommand::SeekTo(time));
        }
        self.surface.apply(SurfaceCommand::SetPaused(state.paused));
        state.changed_all(&self.sink);

        Ok(())
    }

    /// Emit an error; critical errors imply an unload of this unit
    fn report(&self, error: PlayerError) {
        let critical = error.critical;
        let _ = self.sink.send(PlayerEvent::Error(error));
        if critical {
            let mut state = self.state.lock().unwrap();
            unload(&mut state, &self.surface, &self.sink);
        }
    }
}

fn unload(state: &mut BackendCore, surface: &Arc<dyn PlaybackSurface>, sink: &EventSink) {
    surface.apply(SurfaceCommand::Stop);
    state.clear_stream();
    state.changed_all(sink);
}

impl VideoUnit for NativeVideo {
    fn dispatch(&self, action: Action) -> Result<()> {
        if self.state.lock().unwrap().destroyed {
            return Err(Error::UnitDestroyed);
        }

        match action {
            Action::ObserveProp { name } => self.observe_prop(&name),
            Action::SetProp { name, value } => self.set_prop(&name, value),
            Action::Command { name, args } => match name.as_str() {
                commands::LOAD => self.load(args),
                commands::UNLOAD => {
                    let mut state = self.state.lock().unwrap();
                    unload(&mut state, &self.surface, &self.sink);
                    Ok(())
                }
                commands::DESTROY => {
                    let mut state = self.state.lock().unwrap();
                    unload(&mut state, &self.surface, &self.sink);
                    state.destroyed = true;
                    drop(state);
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
impl VideoBackend for NativeVideo {
    fn manifest() -> Manifest {
        Manifest::new(
            "NativeVideo",
            false,
            BACKEND_PROPS,
            &[commands::LOAD, commands::UNLOAD, commands::DESTROY],
            &[events::PROP_VALUE, events::PROP_CHANGED, events::ENDED, events::ERROR],
        )
    }

    fn new(options: VideoOptions, sink: EventSink) -> Result<Self> {
        let surface = options
            .surface
            .ok_or_else(|| Error::InvalidOptions("playback surface required".to_string()))?;
        let mut surface_events = surface
            .take_events()
            .ok_or_else(|| Error::InvalidOptions("surface events already taken".to_string()))?;

        let state = Arc::new(Mutex::new(BackendCore::new()));

        let reactor = {
            let state = Arc::clone(&state);
            let surface = Arc::clone(&surface);
            let sink = sink.clone();
            tokio::spawn(async move {
                while let Some(event) = surface_events.recv().await {
                    let mut state = state.lock().unwrap();
                    if state.destroyed {
                        break;
                    }

                    if let Some(failure) = state.apply_surface_event(event, &sink) {
                        debug!(?failure, "native surface reported a failure");
                        let _ = sink.send(PlayerEvent::Error(failure.into_error()));
                        unload(&mut state, &surface, &sink);
                    }
                }
            })
        };

        Ok(Self {
            surface,
            state,
            sink,
            reactor: Mutex::new(Some(reactor)),
        })
    }

    async fn can_play_stream(stream: &Stream) -> std::result::Result<bool, PlayerError> {
        let url = match stream.url.as_deref().and_then(|raw| Url::parse(raw).ok()) {
            Some(url) => url,
            None => return Ok(false),
        };

        if !matches!(url.scheme(), "http" | "https") {
            return Ok(false);
        }

        let extension = url
            .path()
            .rsplit('/')
            .next()
            .and_then(|segment| segment.rsplit_once('.'))
            .map(|(_, extension)| extension.to_ascii_lowercase());

        Ok(extension
            .map(|extension| DIRECT_PLAYBACK_EXTENSIONS.contains(&extension.as_str()))
            .unwrap_or(false))
    }
}

impl Drop for NativeVideo {
    fn drop(&mut self) {
        if let Some(reactor) = self.reactor.lock().unwrap().take() {
            reactor.abort();
        }
    }
}
