//! Remote-cast backend
//!
//! Playback happens on a cast receiver; this adapter turns protocol
//! operations into transport messages and applies the receiver's status
//! feed to its props. The manifest is flagged `external` so hosting
//! applications know no frames are rendered locally.

use super::{BackendCore, SurfaceEvent, BACKEND_PROPS};
use crate::error::{Error, PlayerError, Result};
use crate::manifest::Manifest;
use crate::protocol::{commands, events, props, Action, EventSink, PlayerEvent, VideoBackend, VideoUnit};
use crate::types::{LoadArgs, Stream, VideoOptions};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use url::Url;

/// Message sent to the cast receiver
#[derive(Debug, Clone, PartialEq)]
pub enum CastMessage {
    Load {
        stream: Stream,
        /// Start position in milliseconds
        time: u64,
        autoplay: bool,
    },
    Stop,
    SetPaused(bool),
    SeekTo(u64),
    SetVolume(u32),
    SetMuted(bool),
}

/// Host-provided session transport to a connected cast receiver
///
/// The receiver reports its playback state back through the same feed the
/// native surface uses.
pub trait CastTransport: Send + Sync + 'static {
    fn send(&self, message: CastMessage);

    /// Hand over the receiver's status feed; yields `None` once taken
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SurfaceEvent>>;
}

/// Protocol adapter over a [`CastTransport`]
pub struct CastVideo {
    transport: Arc<dyn CastTransport>,
    state: Arc<Mutex<BackendCore>>,
    sink: EventSink,
    reactor: Mutex<Option<JoinHandle<()>>>,
}

fn unload(state: &mut BackendCore, transport: &Arc<dyn CastTransport>, sink: &EventSink) {
    transport.send(CastMessage::Stop);
    state.clear_stream();
    state.changed_all(sink);
}

impl CastVideo {
    fn load(&self, args: Value) -> Result<()> {
        let args: LoadArgs = serde_json::from_value(args).unwrap_or_default();

        let mut state = self.state.lock().unwrap();
        unload(&mut state, &self.transport, &self.sink);

        let stream = match args.stream.clone().filter(|stream| stream.url.is_some()) {
            Some(stream) => stream,
            None => {
                drop(state);
                let error = PlayerError::unsupported_stream(args.stream);
                let _ = self.sink.send(PlayerEvent::Error(error));
                let mut state = self.state.lock().unwrap();
                unload(&mut state, &self.transport, &self.sink);
                return Ok(());
            }
        };

        info!(url = ?stream.url, "loading stream on cast receiver");

        state.stream = Some(stream.clone());
        state.time = Some(args.time.unwrap_or(0));
        state.buffering = true;
        state.paused = !args.autoplay();
        self.transport.send(CastMessage::Load {
            stream,
            time: args.time.unwrap_or(0),
            autoplay: args.autoplay(),
        });
        state.changed_all(&self.sink);

        Ok(())
    }
}

impl VideoUnit for CastVideo {
    fn dispatch(&self, action: Action) -> Result<()> {
        if self.state.lock().unwrap().destroyed {
            return Err(Error::UnitDestroyed);
        }

        match action {
            Action::ObserveProp { name } => {
                let mut state = self.state.lock().unwrap();
                if let Some(static_name) = BACKEND_PROPS.iter().copied().find(|prop| *prop == name) {
                    let value = state.prop_value(&name).unwrap_or(Value::Null);
                    let _ = self.sink.send(PlayerEvent::PropValue { name, value });
                    state.observed.observe(static_name);
                }
                Ok(())
            }
            Action::SetProp { name, value } => {
                let mut state = self.state.lock().unwrap();
                if state.stream.is_none() {
                    return Ok(());
                }

                match name.as_str() {
                    props::PAUSED => {
                        if let Some(paused) = value.as_bool() {
                            state.paused = paused;
                            self.transport.send(CastMessage::SetPaused(paused));
                            state.changed(&self.sink, props::PAUSED);
                        }
                    }
                    props::TIME => {
                        if let Some(time) = value.as_u64() {
                            state.time = Some(time);
                            self.transport.send(CastMessage::SeekTo(time));
                            state.changed(&self.sink, props::TIME);
                        }
                    }
                    props::VOLUME => {
                        if let Some(volume) = value.as_u64() {
                            state.volume = (volume as u32).min(100);
                            state.muted = false;
                            self.transport.send(CastMessage::SetMuted(false));
                            self.transport.send(CastMessage::SetVolume(state.volume));
                            state.changed(&self.sink, props::MUTED);
                            state.changed(&self.sink, props::VOLUME);
                        }
                    }
                    props::MUTED => {
                        if let Some(muted) = value.as_bool() {
                            state.muted = muted;
                            self.transport.send(CastMessage::SetMuted(muted));
                            state.changed(&self.sink, props::MUTED);
                        }
                    }
                    _ => {}
                }

                Ok(())
            }
            Action::Command { name, args } => match name.as_str() {
                commands::LOAD => self.load(args),
                commands::UNLOAD => {
                    let mut state = self.state.lock().unwrap();
                    unload(&mut state, &self.transport, &self.sink);
                    Ok(())
                }
                commands::DESTROY => {
                    let mut state = self.state.lock().unwrap();
                    unload(&mut state, &self.transport, &self.sink);
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
impl VideoBackend for CastVideo {
    fn manifest() -> Manifest {
        Manifest::new(
            "CastVideo",
            true,
            BACKEND_PROPS,
            &[commands::LOAD, commands::UNLOAD, commands::DESTROY],
            &[events::PROP_VALUE, events::PROP_CHANGED, events::ENDED, events::ERROR],
        )
    }

    fn new(options: VideoOptions, sink: EventSink) -> Result<Self> {
        let transport = options
            .cast_transport
            .ok_or_else(|| Error::InvalidOptions("cast transport required".to_string()))?;
        let mut status_events = transport
            .take_events()
            .ok_or_else(|| Error::InvalidOptions("transport events already taken".to_string()))?;

        let state = Arc::new(Mutex::new(BackendCore::new()));

        let reactor = {
            let state = Arc::clone(&state);
            let transport = Arc::clone(&transport);
            let sink = sink.clone();
            tokio::spawn(async move {
                while let Some(event) = status_events.recv().await {
                    let mut state = state.lock().unwrap();
                    if state.destroyed {
                        break;
                    }

                    if let Some(failure) = state.apply_surface_event(event, &sink) {
                        let _ = sink.send(PlayerEvent::Error(failure.into_error()));
                        unload(&mut state, &transport, &sink);
                    }
                }
            })
        };

        Ok(Self {
            transport,
            state,
            sink,
            reactor: Mutex::new(Some(reactor)),
        })
    }

    async fn can_play_stream(stream: &Stream) -> std::result::Result<bool, PlayerError> {
        // The receiver resolves formats on its own end; any http(s) URL goes.
        Ok(stream
            .url
            .as_deref()
            .and_then(|raw| Url::parse(raw).ok())
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false))
    }
}

impl Drop for CastVideo {
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

    struct MockTransport {
        messages: Mutex<Vec<CastMessage>>,
        tx: mpsc::UnboundedSender<SurfaceEvent>,
        rx: Mutex<Option<mpsc::UnboundedReceiver<SurfaceEvent>>>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            let (tx, rx) = mpsc::unbounded_channel();
            Arc::new(Self {
                messages: Mutex::new(Vec::new()),
                tx,
                rx: Mutex::new(Some(rx)),
            })
        }

        fn push(&self, event: SurfaceEvent) {
            let _ = self.tx.send(event);
        }

        fn messages(&self) -> Vec<CastMessage> {
            self.messages.lock().unwrap().clone()
        }
    }

    impl CastTransport for MockTransport {
        fn send(&self, message: CastMessage) {
            self.messages.lock().unwrap().push(message);
        }

        fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SurfaceEvent>> {
            self.rx.lock().unwrap().take()
        }
    }

    fn options(transport: &Arc<MockTransport>) -> VideoOptions {
        VideoOptions {
            cast_transport: Some(Arc::clone(transport) as Arc<dyn CastTransport>),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_load_sends_the_stream_to_the_receiver() {
        let transport = MockTransport::new();
        let (sink, _rx) = event_channel();
        let video = CastVideo::new(options(&transport), sink).unwrap();

        let args = LoadArgs {
            stream: Some(Stream::with_url("https://example.com/movie.mp4")),
            time: Some(30_000),
            ..Default::default()
        };
        video.dispatch(Action::load(&args)).unwrap();

        assert!(transport.messages().iter().any(|message| matches!(
            message,
            CastMessage::Load { time: 30_000, autoplay: true, .. }
        )));
    }

    #[tokio::test]
    async fn test_receiver_ended_is_forwarded() {
        let transport = MockTransport::new();
        let (sink, mut rx) = event_channel();
        let _video = CastVideo::new(options(&transport), sink).unwrap();

        transport.push(SurfaceEvent::Ended);

        loop {
            if matches!(rx.recv().await.unwrap(), PlayerEvent::Ended) {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_manifest_is_external() {
        assert!(CastVideo::manifest().external);
    }
}
