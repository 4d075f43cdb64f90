//! Subtitle engine decorator
//!
//! Wraps any unit with two independent subtitle slots, a track catalog and
//! overlay style props. The decorator observes the wrapped unit's time
//! updates and recomputes both slots' visible cue sets on every tick; cue
//! text is handed to a host-provided renderer, never painted here.
//!
//! Subtitle synchronization runs off the inner unit's `time` prop, so the
//! hosting application has to observe `time` through the stack for cues to
//! advance - the same contract the prop protocol gives every other
//! consumer.

pub mod color;
pub mod converter;
pub mod parser;

pub use color::{Color, ColorParseError};
pub use parser::{Cue, CueIndex};

use crate::error::{Error, PlayerError, Result};
use crate::manifest::Manifest;
use crate::protocol::{commands, events, props, Action, EventSink, ObservedProps, PlayerEvent, VideoBackend, VideoUnit};
use crate::types::{Stream, Track, VideoOptions};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Origin marker for tracks ingested from the loaded stream descriptor
pub const ORIGIN_EXCLUSIVE: &str = "EXCLUSIVE";

const OWN_PROPS: &[&str] = &[
    props::EXTRA_SUBTITLES_TRACKS,
    props::SELECTED_EXTRA_SUBTITLES_TRACK_ID,
    props::SELECTED_EXTRA_SUBTITLES_2_TRACK_ID,
    props::EXTRA_SUBTITLES_DELAY,
    props::EXTRA_SUBTITLES_2_DELAY,
    props::EXTRA_SUBTITLES_SIZE,
    props::EXTRA_SUBTITLES_2_SIZE,
    props::EXTRA_SUBTITLES_OFFSET,
    props::EXTRA_SUBTITLES_TEXT_COLOR,
    props::EXTRA_SUBTITLES_BACKGROUND_COLOR,
    props::EXTRA_SUBTITLES_OUTLINE_COLOR,
];

const SELECTED_PROP: [&str; 2] = [
    props::SELECTED_EXTRA_SUBTITLES_TRACK_ID,
    props::SELECTED_EXTRA_SUBTITLES_2_TRACK_ID,
];
const DELAY_PROP: [&str; 2] = [props::EXTRA_SUBTITLES_DELAY, props::EXTRA_SUBTITLES_2_DELAY];
const SIZE_PROP: [&str; 2] = [props::EXTRA_SUBTITLES_SIZE, props::EXTRA_SUBTITLES_2_SIZE];

/// Fetches raw subtitle text
#[async_trait]
pub trait SubtitleFetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> std::result::Result<String, PlayerError>;
}

/// Default fetcher over HTTP
pub struct HttpSubtitleFetcher {
    client: reqwest::Client,
}

impl HttpSubtitleFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpSubtitleFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubtitleFetcher for HttpSubtitleFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<String, PlayerError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| PlayerError::unknown(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlayerError::unknown(format!(
                "{} ({})",
                status.as_u16(),
                status.canonical_reason().unwrap_or("request failed"),
            )));
        }

        response
            .text()
            .await
            .map_err(|error| PlayerError::unknown(error.to_string()))
    }
}

/// Style state applied to rendered cues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleStyle {
    /// Text size percentage of the primary slot
    pub size: u32,
    /// Text size percentage of the secondary slot
    pub size2: u32,
    /// Vertical offset from the bottom, percent, 0-100
    pub offset: u32,
    pub text_color: String,
    pub background_color: String,
    pub outline_color: String,
}

/// Everything the host needs to paint one frame of subtitles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleView {
    /// Visible cue lines of the primary slot, markup stripped
    pub primary: Vec<String>,
    /// Visible cue lines of the secondary slot
    pub secondary: Vec<String>,
    pub style: SubtitleStyle,
}

/// Host-provided presentation sink; pure output, nothing feeds back
pub trait SubtitleRenderer: Send + Sync + 'static {
    fn render(&self, view: &SubtitleView);
}

#[derive(Debug, Default)]
struct Slot {
    selected: Option<Track>,
    cues: Option<Arc<CueIndex>>,
    /// Signed shift in milliseconds applied to cue lookup; present only
    /// while a track is selected
    delay: Option<i64>,
    size: u32,
    /// Bumped on every selection change, unload and destroy; in-flight
    /// fetches compare their captured value against this before applying
    generation: u64,
}

struct SubtitlesState {
    tracks: Vec<Track>,
    slots: [Slot; 2],
    offset: u32,
    text_color: String,
    background_color: String,
    outline_color: String,
    /// Playback time as last announced by the inner unit, milliseconds
    time: Option<i64>,
    observed: ObservedProps,
    destroyed: bool,
}

impl Default for SubtitlesState {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            slots: [
                Slot {
                    size: 100,
                    ..Slot::default()
                },
                Slot {
                    size: 100,
                    ..Slot::default()
                },
            ],
            offset: 0,
            text_color: "rgb(255, 255, 255)".to_string(),
            background_color: "rgba(0, 0, 0, 0)".to_string(),
            outline_color: "rgb(34, 34, 34)".to_string(),
            time: None,
            observed: ObservedProps::default(),
            destroyed: false,
        }
    }
}

impl SubtitlesState {
    fn prop_value(&self, name: &str) -> Value {
        if self.destroyed {
            return match name {
                props::EXTRA_SUBTITLES_TRACKS => Value::Array(Vec::new()),
                _ => Value::Null,
            };
        }

        match name {
            props::EXTRA_SUBTITLES_TRACKS => {
                serde_json::to_value(&self.tracks).unwrap_or(Value::Null)
            }
            props::SELECTED_EXTRA_SUBTITLES_TRACK_ID => self.slots[0]
                .selected
                .as_ref()
                .map(|track| Value::from(track.id.clone()))
                .unwrap_or(Value::Null),
            props::SELECTED_EXTRA_SUBTITLES_2_TRACK_ID => self.slots[1]
                .selected
                .as_ref()
                .map(|track| Value::from(track.id.clone()))
                .unwrap_or(Value::Null),
            props::EXTRA_SUBTITLES_DELAY => {
                self.slots[0].delay.map(Value::from).unwrap_or(Value::Null)
            }
            props::EXTRA_SUBTITLES_2_DELAY => {
                self.slots[1].delay.map(Value::from).unwrap_or(Value::Null)
            }
            props::EXTRA_SUBTITLES_SIZE => Value::from(self.slots[0].size),
            props::EXTRA_SUBTITLES_2_SIZE => Value::from(self.slots[1].size),
            props::EXTRA_SUBTITLES_OFFSET => Value::from(self.offset),
            props::EXTRA_SUBTITLES_TEXT_COLOR => Value::from(self.text_color.clone()),
            props::EXTRA_SUBTITLES_BACKGROUND_COLOR => {
                Value::from(self.background_color.clone())
            }
            props::EXTRA_SUBTITLES_OUTLINE_COLOR => Value::from(self.outline_color.clone()),
            _ => Value::Null,
        }
    }

    fn changed(&self, sink: &EventSink, name: &str) {
        if self.observed.is_observed(name) {
            let _ = sink.send(PlayerEvent::PropChanged {
                name: name.to_string(),
                value: self.prop_value(name),
            });
        }
    }
}

type SharedRenderer = Option<Arc<dyn SubtitleRenderer>>;

/// Recompute both slots' visible cue sets and hand them to the renderer
fn render(state: &SubtitlesState, renderer: &SharedRenderer) {
    let Some(renderer) = renderer else {
        return;
    };

    let cues_for = |slot: &Slot| -> Vec<String> {
        let (Some(cues), Some(time)) = (slot.cues.as_ref(), state.time) else {
            return Vec::new();
        };

        cues.cues_at(time + slot.delay.unwrap_or(0))
            .into_iter()
            .map(|cue| parser::strip_tags(&cue.text))
            .collect()
    };

    renderer.render(&SubtitleView {
        primary: cues_for(&state.slots[0]),
        secondary: cues_for(&state.slots[1]),
        style: SubtitleStyle {
            size: state.slots[0].size,
            size2: state.slots[1].size,
            offset: state.offset,
            text_color: state.text_color.clone(),
            background_color: state.background_color.clone(),
            outline_color: state.outline_color.clone(),
        },
    });
}

/// Clear the catalog and both slots, invalidating in-flight fetches
fn unload_state(state: &mut SubtitlesState, sink: &EventSink, renderer: &SharedRenderer) {
    for slot in &mut state.slots {
        slot.generation += 1;
        slot.selected = None;
        slot.cues = None;
        slot.delay = None;
    }
    state.tracks.clear();
    render(state, renderer);
    state.changed(sink, props::EXTRA_SUBTITLES_TRACKS);
    state.changed(sink, props::SELECTED_EXTRA_SUBTITLES_TRACK_ID);
    state.changed(sink, props::SELECTED_EXTRA_SUBTITLES_2_TRACK_ID);
    state.changed(sink, props::EXTRA_SUBTITLES_DELAY);
    state.changed(sink, props::EXTRA_SUBTITLES_2_DELAY);
}

/// Merge incoming track descriptors into the catalog.
/// Malformed or embedded tracks are dropped; an id that already exists
/// keeps its first occurrence.
fn merge_tracks(catalog: &mut Vec<Track>, incoming: &[Value]) -> bool {
    let before = catalog.len();
    for value in incoming {
        let Ok(track) = serde_json::from_value::<Track>(value.clone()) else {
            continue;
        };
        if track.embedded {
            continue;
        }
        if catalog.iter().any(|existing| existing.id == track.id) {
            continue;
        }
        catalog.push(track);
    }
    catalog.len() != before
}

async fn fetch_cue_index(
    fetcher: &Arc<dyn SubtitleFetcher>,
    track: &Track,
) -> std::result::Result<CueIndex, PlayerError> {
    let raw = fetcher.fetch(&track.url).await?;
    let normalized = converter::convert(&raw)?;
    parser::parse(&normalized)
}

/// Decorator adding overlay subtitle capability to any unit
pub struct WithSubtitles<V> {
    inner: Arc<V>,
    state: Arc<Mutex<SubtitlesState>>,
    sink: EventSink,
    fetcher: Arc<dyn SubtitleFetcher>,
    renderer: SharedRenderer,
    forward: Mutex<Option<JoinHandle<()>>>,
}

impl<V: VideoBackend> WithSubtitles<V> {
    fn observe_prop(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(static_name) = OWN_PROPS.iter().copied().find(|prop| *prop == name) {
            let _ = self.sink.send(PlayerEvent::PropValue {
                name: name.to_string(),
                value: state.prop_value(name),
            });
            state.observed.observe(static_name);
        }
    }

    fn select_track(&self, slot_index: usize, value: Value) {
        let mut state = self.state.lock().unwrap();
        let slot = &mut state.slots[slot_index];
        slot.generation += 1;
        slot.selected = None;
        slot.cues = None;
        slot.delay = None;

        let wanted = value.as_str().unwrap_or("");
        let selected = state.tracks.iter().find(|track| track.id == wanted).cloned();

        if let Some(track) = selected {
            let slot = &mut state.slots[slot_index];
            slot.selected = Some(track.clone());
            slot.delay = Some(0);
            let generation = slot.generation;

            let shared = Arc::clone(&self.state);
            let sink = self.sink.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let renderer = self.renderer.clone();
            tokio::spawn(async move {
                let outcome = fetch_cue_index(&fetcher, &track).await;

                let mut state = shared.lock().unwrap();
                if state.destroyed || state.slots[slot_index].generation != generation {
                    // A newer selection, unload or destroy superseded this fetch
                    debug!(track = %track.id, "discarding stale subtitle fetch");
                    return;
                }

                match outcome {
                    Ok(index) => {
                        state.slots[slot_index].cues = Some(Arc::new(index));
                        render(&state, &renderer);
                        let _ = sink.send(PlayerEvent::ExtraSubtitlesTrackLoaded(track));
                    }
                    Err(error) => {
                        let _ = sink.send(PlayerEvent::Error(
                            PlayerError::subtitles_load_failed(track, error.message),
                        ));
                    }
                }
            });
        }

        render(&state, &self.renderer);
        state.changed(&self.sink, SELECTED_PROP[slot_index]);
        state.changed(&self.sink, DELAY_PROP[slot_index]);
    }

    fn set_prop(&self, name: &str, value: Value) {
        match name {
            props::SELECTED_EXTRA_SUBTITLES_TRACK_ID => self.select_track(0, value),
            props::SELECTED_EXTRA_SUBTITLES_2_TRACK_ID => self.select_track(1, value),
            props::EXTRA_SUBTITLES_DELAY | props::EXTRA_SUBTITLES_2_DELAY => {
                let slot_index = usize::from(name == props::EXTRA_SUBTITLES_2_DELAY);
                let mut state = self.state.lock().unwrap();
                if state.slots[slot_index].selected.is_none() {
                    return;
                }
                if let Some(delay) = value.as_i64() {
                    state.slots[slot_index].delay = Some(delay);
                    render(&state, &self.renderer);
                    state.changed(&self.sink, DELAY_PROP[slot_index]);
                }
            }
            props::EXTRA_SUBTITLES_SIZE | props::EXTRA_SUBTITLES_2_SIZE => {
                let slot_index = usize::from(name == props::EXTRA_SUBTITLES_2_SIZE);
                if let Some(size) = value.as_u64() {
                    let mut state = self.state.lock().unwrap();
                    state.slots[slot_index].size = size as u32;
                    render(&state, &self.renderer);
                    state.changed(&self.sink, SIZE_PROP[slot_index]);
                }
            }
            props::EXTRA_SUBTITLES_OFFSET => {
                if let Some(offset) = value.as_u64() {
                    let mut state = self.state.lock().unwrap();
                    state.offset = (offset as u32).min(100);
                    render(&state, &self.renderer);
                    state.changed(&self.sink, props::EXTRA_SUBTITLES_OFFSET);
                }
            }
            props::EXTRA_SUBTITLES_TEXT_COLOR
            | props::EXTRA_SUBTITLES_BACKGROUND_COLOR
            | props::EXTRA_SUBTITLES_OUTLINE_COLOR => {
                let Some(raw) = value.as_str() else { return };
                match Color::parse(raw) {
                    Ok(color) => {
                        let mut state = self.state.lock().unwrap();
                        let css = color.to_css();
                        match name {
                            props::EXTRA_SUBTITLES_TEXT_COLOR => state.text_color = css,
                            props::EXTRA_SUBTITLES_BACKGROUND_COLOR => {
                                state.background_color = css
                            }
                            _ => state.outline_color = css,
                        }
                        render(&state, &self.renderer);
                        state.changed(&self.sink, name);
                    }
                    Err(error) => {
                        // Previous value stays in effect, nothing is announced
                        warn!(prop = name, %error, "ignoring unparsable subtitle color");
                    }
                }
            }
            _ => {}
        }
    }

    fn add_tracks(&self, args: &Value) {
        let Some(incoming) = args.get("tracks").and_then(Value::as_array) else {
            return;
        };

        let mut state = self.state.lock().unwrap();
        if merge_tracks(&mut state.tracks, incoming) {
            state.changed(&self.sink, props::EXTRA_SUBTITLES_TRACKS);
        }
    }

    /// Ingest subtitle tracks embedded in the stream descriptor being loaded
    fn ingest_stream_tracks(&self, args: &Value) {
        let embedded: Vec<Value> = args
            .get("stream")
            .and_then(|stream| stream.get("subtitles"))
            .and_then(Value::as_array)
            .map(|tracks| {
                tracks
                    .iter()
                    .cloned()
                    .map(|mut track| {
                        if let Some(object) = track.as_object_mut() {
                            object.insert("origin".to_string(), Value::from(ORIGIN_EXCLUSIVE));
                            object.insert("embedded".to_string(), Value::from(false));
                        }
                        track
                    })
                    .collect()
            })
            .unwrap_or_default();

        if embedded.is_empty() {
            return;
        }

        let mut state = self.state.lock().unwrap();
        merge_tracks(&mut state.tracks, &embedded);
        state.changed(&self.sink, props::EXTRA_SUBTITLES_TRACKS);
    }

    fn destroy_own(&self) {
        {
            let mut state = self.state.lock().unwrap();
            unload_state(&mut state, &self.sink, &self.renderer);
            state.destroyed = true;
            state.changed(&self.sink, props::EXTRA_SUBTITLES_SIZE);
            state.changed(&self.sink, props::EXTRA_SUBTITLES_2_SIZE);
            state.changed(&self.sink, props::EXTRA_SUBTITLES_OFFSET);
            state.changed(&self.sink, props::EXTRA_SUBTITLES_TEXT_COLOR);
            state.changed(&self.sink, props::EXTRA_SUBTITLES_BACKGROUND_COLOR);
            state.changed(&self.sink, props::EXTRA_SUBTITLES_OUTLINE_COLOR);
        }
        if let Some(forward) = self.forward.lock().unwrap().take() {
            forward.abort();
        }
    }
}

impl<V: VideoBackend> VideoUnit for WithSubtitles<V> {
    fn dispatch(&self, action: Action) -> Result<()> {
        if self.state.lock().unwrap().destroyed {
            return Err(Error::UnitDestroyed);
        }

        match action {
            Action::ObserveProp { ref name } if OWN_PROPS.contains(&name.as_str()) => {
                self.observe_prop(name);
                Ok(())
            }
            Action::SetProp { ref name, ref value } if OWN_PROPS.contains(&name.as_str()) => {
                self.set_prop(name, value.clone());
                Ok(())
            }
            Action::Command { ref name, ref args } => match name.as_str() {
                commands::ADD_EXTRA_SUBTITLES_TRACKS => {
                    self.add_tracks(args);
                    Ok(())
                }
                commands::LOAD => {
                    {
                        let mut state = self.state.lock().unwrap();
                        unload_state(&mut state, &self.sink, &self.renderer);
                    }
                    self.ingest_stream_tracks(args);
                    // The inner load is never blocked or replaced here
                    self.inner.dispatch(action.clone())
                }
                commands::UNLOAD => {
                    {
                        let mut state = self.state.lock().unwrap();
                        unload_state(&mut state, &self.sink, &self.renderer);
                    }
                    self.inner.dispatch(action.clone())
                }
                commands::DESTROY => {
                    self.destroy_own();
                    self.inner.dispatch(Action::destroy())
                }
                _ => self.inner.dispatch(action.clone()),
            },
            other => self.inner.dispatch(other),
        }
    }
}

#[async_trait]
impl<V: VideoBackend> VideoBackend for WithSubtitles<V> {
    fn manifest() -> Manifest {
        V::manifest().extended(
            "WithSubtitles",
            OWN_PROPS,
            &[
                commands::LOAD,
                commands::UNLOAD,
                commands::DESTROY,
                commands::ADD_EXTRA_SUBTITLES_TRACKS,
            ],
            &[
                events::PROP_VALUE,
                events::PROP_CHANGED,
                events::ERROR,
                events::EXTRA_SUBTITLES_TRACK_LOADED,
            ],
        )
    }

    fn new(options: VideoOptions, sink: EventSink) -> Result<Self> {
        let fetcher = options
            .subtitle_fetcher
            .clone()
            .unwrap_or_else(|| Arc::new(HttpSubtitleFetcher::new()));
        let renderer = options.subtitle_renderer.clone();

        let (inner_sink, mut inner_events) = crate::protocol::event_channel();
        let inner = Arc::new(V::new(options, inner_sink)?);

        let state = Arc::new(Mutex::new(SubtitlesState::default()));

        let forward = {
            let state = Arc::clone(&state);
            let sink = sink.clone();
            let renderer = renderer.clone();
            tokio::spawn(async move {
                while let Some(event) = inner_events.recv().await {
                    match &event {
                        PlayerEvent::PropValue { name, value }
                        | PlayerEvent::PropChanged { name, value }
                            if name == props::TIME =>
                        {
                            let mut state = state.lock().unwrap();
                            state.time = value.as_i64();
                            render(&state, &renderer);
                        }
                        PlayerEvent::Error(error) if error.critical => {
                            let _ = sink.send(event.clone());
                            let mut state = state.lock().unwrap();
                            unload_state(&mut state, &sink, &renderer);
                            continue;
                        }
                        _ => {}
                    }

                    let _ = sink.send(event);
                }
            })
        };

        Ok(Self {
            inner,
            state,
            sink,
            fetcher,
            renderer,
            forward: Mutex::new(Some(forward)),
        })
    }

    async fn can_play_stream(stream: &Stream) -> std::result::Result<bool, PlayerError> {
        V::can_play_stream(stream).await
    }
}

impl<V> Drop for WithSubtitles<V> {
    fn drop(&mut self) {
        if let Some(forward) = self.forward.lock().unwrap().take() {
            forward.abort();
        }
    }
}
