//! Streaming-server decorator
//!
//! Intercepts `load` and turns the abstract stream descriptor into a
//! concrete playable URL before delegating downstream: the descriptor is
//! converted to an absolute media URL, the wrapped backend is probed for
//! direct playability, and when direct playback is not possible a
//! server-side transcode URL is forwarded instead. A superseding `load`,
//! `unload` or `destroy` invalidates any resolution still in flight.

mod convert;

pub use convert::{DefaultStreamConverter, StreamConverter};

use crate::error::{Error, PlayerError, Result};
use crate::manifest::Manifest;
use crate::protocol::{commands, events, props, Action, EventSink, ObservedProps, PlayerEvent, VideoBackend, VideoUnit};
use crate::types::{BehaviorHints, LoadArgs, ResolvedStream, Stream, VideoOptions};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Content type the transcoder answers with
pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Path template of the server's transcoding endpoint
const TRANSCODE_PATH: &str = "hlsv2";

#[derive(Default)]
struct ServerState {
    /// The stream currently being (or already) resolved; also the value of
    /// the decorator's `stream` prop
    current: Option<Stream>,
    /// Bumped on every load/unload/destroy; resolutions carry the value
    /// they started with and discard themselves when it moved on
    generation: u64,
    observed: ObservedProps,
    destroyed: bool,
}

impl ServerState {
    fn stream_value(&self) -> Value {
        if self.destroyed {
            return Value::Null;
        }

        self.current
            .as_ref()
            .and_then(|stream| serde_json::to_value(stream).ok())
            .unwrap_or(Value::Null)
    }

    fn changed_stream(&self, sink: &EventSink) {
        if self.observed.is_observed(props::STREAM) {
            let _ = sink.send(PlayerEvent::PropChanged {
                name: props::STREAM.to_string(),
                value: self.stream_value(),
            });
        }
    }
}

/// Build the transcode-fallback stream for a media URL the backend cannot
/// play directly
fn transcode_stream(
    server_url: &Url,
    media_url: &Url,
    args: &LoadArgs,
) -> std::result::Result<ResolvedStream, PlayerError> {
    let session_id = Uuid::new_v4().simple().to_string();
    let mut url = server_url
        .join(&format!("/{}/{}/master.m3u8", TRANSCODE_PATH, session_id))
        .map_err(|error| PlayerError::unknown(error.to_string()))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("mediaURL", media_url.as_str());
        if args.force_transcoding {
            query.append_pair("forceTranscoding", "1");
        }
        if let Some(audio_channels) = args.audio_channels {
            query.append_pair("audioChannels", &audio_channels.to_string());
        }
    }

    Ok(ResolvedStream {
        url: url.to_string(),
        behavior_hints: Some(BehaviorHints {
            headers: HashMap::from([("content-type".to_string(), HLS_CONTENT_TYPE.to_string())]),
        }),
    })
}

/// Decorator resolving abstract streams through a streaming server
pub struct WithStreamingServer<V> {
    inner: Arc<V>,
    state: Arc<Mutex<ServerState>>,
    sink: EventSink,
    converter: Arc<dyn StreamConverter>,
    forward: Mutex<Option<JoinHandle<()>>>,
}

impl<V: VideoBackend> WithStreamingServer<V> {
    /// Emit an error; critical errors unload this layer and the inner unit
    fn report(&self, error: PlayerError) {
        let critical = error.critical;
        let _ = self.sink.send(PlayerEvent::Error(error));
        if critical {
            let mut state = self.state.lock().unwrap();
            state.generation += 1;
            state.current = None;
            state.changed_stream(&self.sink);
            drop(state);
            let _ = self.inner.dispatch(Action::unload());
        }
    }

    fn load(&self, args: Value) {
        let parsed: LoadArgs = serde_json::from_value(args.clone()).unwrap_or_default();

        let stream = parsed.stream.clone();
        let server_url = parsed
            .streaming_server_url
            .as_deref()
            .and_then(|raw| Url::parse(raw).ok())
            .filter(|url| matches!(url.scheme(), "http" | "https"));

        let (stream, server_url) = match (stream, server_url) {
            (Some(stream), Some(server_url)) => (stream, server_url),
            (stream, _) => {
                // No attempt to play is made for malformed load arguments
                self.report(PlayerError::unsupported_stream(stream));
                return;
            }
        };

        {
            let mut state = self.state.lock().unwrap();
            state.generation += 1;
            state.current = None;
            state.changed_stream(&self.sink);
        }
        let _ = self.inner.dispatch(Action::unload());

        let generation = {
            let mut state = self.state.lock().unwrap();
            state.generation += 1;
            state.current = Some(stream.clone());
            state.changed_stream(&self.sink);
            state.generation
        };

        info!(server = %server_url, "resolving stream through streaming server");

        let shared = Arc::clone(&self.state);
        let sink = self.sink.clone();
        let inner = Arc::clone(&self.inner);
        let converter = Arc::clone(&self.converter);
        tokio::spawn(async move {
            let resolved = resolve::<V>(&converter, &server_url, &stream, &parsed).await;

            let stale = {
                let state = shared.lock().unwrap();
                state.destroyed || state.generation != generation
            };
            if stale {
                // A newer load or an unload/destroy superseded this resolution
                debug!("discarding stale stream resolution");
                return;
            }

            match resolved {
                Ok(resolved) => {
                    let mut forwarded = args;
                    forwarded["stream"] =
                        serde_json::to_value(&resolved).unwrap_or(Value::Null);
                    let _ = inner.dispatch(Action::command(commands::LOAD, forwarded));
                }
                Err(error) => {
                    let error = error.with_critical(true);
                    let _ = sink.send(PlayerEvent::Error(error));
                    let mut state = shared.lock().unwrap();
                    state.generation += 1;
                    state.current = None;
                    state.changed_stream(&sink);
                    drop(state);
                    let _ = inner.dispatch(Action::unload());
                }
            }
        });
    }
}

/// Convert, probe, and pick between direct playback and the transcode URL
async fn resolve<V: VideoBackend>(
    converter: &Arc<dyn StreamConverter>,
    server_url: &Url,
    stream: &Stream,
    args: &LoadArgs,
) -> std::result::Result<ResolvedStream, PlayerError> {
    let media_url = converter
        .convert(server_url, stream, args.series_info.as_ref())
        .await?;

    let can_play_directly = if args.force_transcoding {
        false
    } else {
        V::can_play_stream(&Stream::with_url(media_url.as_str()))
            .await
            .map_err(|error| PlayerError::unknown(error.message))?
    };

    if can_play_directly {
        return Ok(ResolvedStream {
            url: media_url.to_string(),
            behavior_hints: None,
        });
    }

    transcode_stream(server_url, &media_url, args)
}

impl<V: VideoBackend> VideoUnit for WithStreamingServer<V> {
    fn dispatch(&self, action: Action) -> Result<()> {
        if self.state.lock().unwrap().destroyed {
            return Err(Error::UnitDestroyed);
        }

        match action {
            Action::ObserveProp { ref name } if name == props::STREAM => {
                let mut state = self.state.lock().unwrap();
                let _ = self.sink.send(PlayerEvent::PropValue {
                    name: props::STREAM.to_string(),
                    value: state.stream_value(),
                });
                state.observed.observe(props::STREAM);
                Ok(())
            }
            Action::Command { ref name, ref args } => match name.as_str() {
                commands::LOAD => {
                    self.load(args.clone());
                    Ok(())
                }
                commands::UNLOAD => {
                    {
                        let mut state = self.state.lock().unwrap();
                        state.generation += 1;
                        state.current = None;
                        state.changed_stream(&self.sink);
                    }
                    self.inner.dispatch(action.clone())
                }
                commands::DESTROY => {
                    {
                        let mut state = self.state.lock().unwrap();
                        state.generation += 1;
                        state.current = None;
                        state.changed_stream(&self.sink);
                        state.destroyed = true;
                    }
                    if let Some(forward) = self.forward.lock().unwrap().take() {
                        forward.abort();
                    }
                    self.inner.dispatch(Action::destroy())
                }
                _ => self.inner.dispatch(action.clone()),
            },
            other => self.inner.dispatch(other),
        }
    }
}

#[async_trait]
impl<V: VideoBackend> VideoBackend for WithStreamingServer<V> {
    fn manifest() -> Manifest {
        V::manifest().extended(
            "WithStreamingServer",
            &[props::STREAM],
            &[commands::LOAD, commands::UNLOAD, commands::DESTROY],
            &[events::ERROR],
        )
    }

    fn new(options: VideoOptions, sink: EventSink) -> Result<Self> {
        let converter = options
            .stream_converter
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultStreamConverter));

        let (inner_sink, mut inner_events) = crate::protocol::event_channel();
        let inner = Arc::new(V::new(options, inner_sink)?);

        let state = Arc::new(Mutex::new(ServerState::default()));

        let forward = {
            let state = Arc::clone(&state);
            let sink = sink.clone();
            tokio::spawn(async move {
                while let Some(event) = inner_events.recv().await {
                    match event {
                        // The decorator owns the `stream` prop: what the
                        // caller sees is the abstract descriptor, not the
                        // resolved URL the inner unit plays
                        PlayerEvent::PropValue { ref name, .. } if name == props::STREAM => {
                            let value = state.lock().unwrap().stream_value();
                            let _ = sink.send(PlayerEvent::PropValue {
                                name: props::STREAM.to_string(),
                                value,
                            });
                        }
                        PlayerEvent::PropChanged { ref name, .. } if name == props::STREAM => {
                            let value = state.lock().unwrap().stream_value();
                            let _ = sink.send(PlayerEvent::PropChanged {
                                name: props::STREAM.to_string(),
                                value,
                            });
                        }
                        PlayerEvent::Error(ref error) if error.critical => {
                            let _ = sink.send(event.clone());
                            let mut state = state.lock().unwrap();
                            state.generation += 1;
                            state.current = None;
                            state.changed_stream(&sink);
                        }
                        other => {
                            let _ = sink.send(other);
                        }
                    }
                }
            })
        };

        Ok(Self {
            inner,
            state,
            sink,
            converter,
            forward: Mutex::new(Some(forward)),
        })
    }

    async fn can_play_stream(stream: &Stream) -> std::result::Result<bool, PlayerError> {
        V::can_play_stream(stream).await
    }
}

impl<V> Drop for WithStreamingServer<V> {
    fn drop(&mut self) {
        if let Some(forward) = self.forward.lock().unwrap().take() {
            forward.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{NativeVideo, PlaybackSurface, SurfaceCommand, SurfaceEvent};
    use crate::protocol::event_channel;
    use crate::types::SeriesInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::sync::Notify;

    struct MockSurface {
        rx: Mutex<Option<mpsc::UnboundedReceiver<SurfaceEvent>>>,
        commands: Mutex<Vec<SurfaceCommand>>,
    }

    impl MockSurface {
        fn new() -> Arc<Self> {
            let (_tx, rx) = mpsc::unbounded_channel();
            Arc::new(Self {
                rx: Mutex::new(Some(rx)),
                commands: Mutex::new(Vec::new()),
            })
        }

        fn loaded_urls(&self) -> Vec<Url> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .filter_map(|command| match command {
                    SurfaceCommand::Load { url, .. } => Some(url.clone()),
                    _ => None,
                })
                .collect()
        }

        fn loaded_headers(&self) -> Vec<HashMap<String, String>> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .filter_map(|command| match command {
                    SurfaceCommand::Load { headers, .. } => Some(headers.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl PlaybackSurface for MockSurface {
        fn apply(&self, command: SurfaceCommand) {
            self.commands.lock().unwrap().push(command);
        }

        fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SurfaceEvent>> {
            self.rx.lock().unwrap().take()
        }
    }

    /// Converter that parks its first call on a gate, for supersession tests
    struct GatedConverter {
        gate: Arc<Notify>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StreamConverter for GatedConverter {
        async fn convert(
            &self,
            _server_url: &Url,
            stream: &Stream,
            _series_info: Option<&SeriesInfo>,
        ) -> std::result::Result<Url, PlayerError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.gate.notified().await;
            }
            Url::parse(stream.url.as_deref().unwrap())
                .map_err(|_| PlayerError::unsupported_stream(Some(stream.clone())))
        }
    }

    fn stack(
        converter: Option<Arc<dyn StreamConverter>>,
    ) -> (
        WithStreamingServer<NativeVideo>,
        Arc<MockSurface>,
        mpsc::UnboundedReceiver<PlayerEvent>,
    ) {
        let surface = MockSurface::new();
        let options = VideoOptions {
            surface: Some(Arc::clone(&surface) as Arc<dyn PlaybackSurface>),
            stream_converter: converter,
            ..Default::default()
        };
        let (sink, rx) = event_channel();
        let video = WithStreamingServer::<NativeVideo>::new(options, sink).unwrap();
        (video, surface, rx)
    }

    fn load_args(url: &str) -> LoadArgs {
        LoadArgs {
            stream: Some(Stream::with_url(url)),
            streaming_server_url: Some("http://127.0.0.1:11470/".to_string()),
            ..Default::default()
        }
    }

    async fn settle() {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_directly_playable_stream_is_not_transcoded() {
        let (video, surface, _rx) = stack(None);
        video
            .dispatch(Action::load(&load_args("https://example.com/movie.mp4")))
            .unwrap();
        settle().await;

        let urls = surface.loaded_urls();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].as_str(), "https://example.com/movie.mp4");
        assert!(surface.loaded_headers()[0].is_empty());
    }

    #[tokio::test]
    async fn test_unplayable_stream_falls_back_to_transcoding() {
        let (video, surface, _rx) = stack(None);
        video
            .dispatch(Action::load(&load_args("https://example.com/movie.mkv")))
            .unwrap();
        settle().await;

        let urls = surface.loaded_urls();
        assert_eq!(urls.len(), 1);
        let url = &urls[0];
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        assert_eq!(segments[0], "hlsv2");
        assert_eq!(segments[2], "master.m3u8");
        // The generated session id sits between the fixed path segments
        assert!(!segments[1].is_empty());

        let query: HashMap<String, String> = url
            .query_pairs()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        assert_eq!(
            query.get("mediaURL").map(String::as_str),
            Some("https://example.com/movie.mkv")
        );
        assert!(!query.contains_key("forceTranscoding"));

        assert_eq!(
            surface.loaded_headers()[0].get("content-type").map(String::as_str),
            Some(HLS_CONTENT_TYPE)
        );
    }

    #[tokio::test]
    async fn test_force_transcoding_skips_the_probe() {
        let (video, surface, _rx) = stack(None);
        let args = LoadArgs {
            force_transcoding: true,
            audio_channels: Some(2),
            ..load_args("https://example.com/movie.mp4")
        };
        video.dispatch(Action::load(&args)).unwrap();
        settle().await;

        let urls = surface.loaded_urls();
        assert_eq!(urls.len(), 1);
        let query: HashMap<String, String> = urls[0]
            .query_pairs()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        assert_eq!(query.get("forceTranscoding").map(String::as_str), Some("1"));
        assert_eq!(query.get("audioChannels").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_missing_server_url_is_a_critical_error() {
        let (video, surface, mut rx) = stack(None);
        let args = LoadArgs {
            stream: Some(Stream::with_url("https://example.com/movie.mp4")),
            ..Default::default()
        };
        video.dispatch(Action::load(&args)).unwrap();

        loop {
            match rx.recv().await.unwrap() {
                PlayerEvent::Error(error) => {
                    assert_eq!(error.error_code(), "UNSUPPORTED_STREAM");
                    assert!(error.critical);
                    break;
                }
                _ => continue,
            }
        }
        assert!(surface.loaded_urls().is_empty());
    }

    #[tokio::test]
    async fn test_superseded_load_is_discarded() {
        let gate = Arc::new(Notify::new());
        let converter = Arc::new(GatedConverter {
            gate: Arc::clone(&gate),
            calls: AtomicUsize::new(0),
        });
        let (video, surface, _rx) = stack(Some(converter as Arc<dyn StreamConverter>));

        video
            .dispatch(Action::load(&load_args("https://example.com/first.mp4")))
            .unwrap();
        settle().await;
        video
            .dispatch(Action::load(&load_args("https://example.com/second.mp4")))
            .unwrap();
        settle().await;

        // Release the first resolution only after the second one finished
        gate.notify_waiters();
        settle().await;

        let urls = surface.loaded_urls();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].as_str(), "https://example.com/second.mp4");
    }

    #[tokio::test]
    async fn test_stream_prop_reflects_the_abstract_descriptor() {
        let (video, _surface, mut rx) = stack(None);
        video.dispatch(Action::observe(props::STREAM)).unwrap();
        match rx.recv().await.unwrap() {
            PlayerEvent::PropValue { name, value } => {
                assert_eq!(name, props::STREAM);
                assert_eq!(value, Value::Null);
            }
            _ => panic!("expected the observation announcement"),
        }

        video
            .dispatch(Action::load(&load_args("https://example.com/movie.mkv")))
            .unwrap();
        settle().await;

        let mut last_stream = Value::Null;
        while let Ok(event) = rx.try_recv() {
            if let PlayerEvent::PropChanged { name, value } = event {
                if name == props::STREAM {
                    last_stream = value;
                }
            }
        }
        // The caller sees the descriptor it loaded, not the transcode URL
        assert_eq!(last_stream["url"], "https://example.com/movie.mkv");
    }

    #[tokio::test]
    async fn test_manifest_adds_the_stream_prop() {
        let manifest = WithStreamingServer::<NativeVideo>::manifest();
        assert_eq!(manifest.name, "NativeVideoWithStreamingServer");
        assert!(manifest.has_prop(props::STREAM));
    }
}
