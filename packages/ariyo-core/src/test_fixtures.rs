//! Shared test doubles for the media element and playlist fetcher.
//!
//! Used by the resolver and engine test modules.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{MediaError, ResolveError};
use crate::media::{
    MediaElement, MediaEvent, MediaEventSink, MediaSource, ReadyState, TimeRange,
};
use crate::resolver::PlaylistFetcher;

// ─────────────────────────────────────────────────────────────────────────────
// Playlist Fetcher
// ─────────────────────────────────────────────────────────────────────────────

/// Serves canned playlist bodies; unknown URLs answer HTTP 404.
///
/// A gated URL blocks until its [`Notify`] is triggered, to simulate slow fetches.
#[derive(Default)]
pub struct StaticPlaylistFetcher {
    bodies: HashMap<String, String>,
    gates: HashMap<String, Arc<Notify>>,
    fetches: AtomicUsize,
}

impl StaticPlaylistFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_string(), body.to_string());
        self
    }

    pub fn with_gate(mut self, url: &str, gate: Arc<Notify>) -> Self {
        self.gates.insert(url.to_string(), gate);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaylistFetcher for StaticPlaylistFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ResolveError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = self.gates.get(url) {
            gate.notified().await;
        }
        self.bodies
            .get(url)
            .cloned()
            .ok_or(ResolveError::HttpStatus(404))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Media Element
// ─────────────────────────────────────────────────────────────────────────────

/// Scriptable in-memory media element.
///
/// Mirrors host behaviour where it matters to the engine: loading a source
/// leaves the element paused, and pausing a playing element reports `Pause`.
/// Everything else (playing, progress, errors) is driven by the test through
/// [`emit`](Self::emit).
pub struct MockMediaElement {
    sink: Mutex<Option<MediaEventSink>>,
    loads: Mutex<Vec<MediaSource>>,
    seeks: Mutex<Vec<f64>>,
    play_results: Mutex<VecDeque<Result<(), MediaError>>>,
    position: Mutex<f64>,
    buffered: Mutex<Vec<TimeRange>>,
    ready: Mutex<ReadyState>,
    paused: AtomicBool,
    has_source: AtomicBool,
    pub attach_count: AtomicUsize,
    pub detach_count: AtomicUsize,
    pub clear_count: AtomicUsize,
    pub play_count: AtomicUsize,
    pub pause_count: AtomicUsize,
}

impl MockMediaElement {
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            loads: Mutex::new(Vec::new()),
            seeks: Mutex::new(Vec::new()),
            play_results: Mutex::new(VecDeque::new()),
            position: Mutex::new(0.0),
            buffered: Mutex::new(Vec::new()),
            ready: Mutex::new(ReadyState::HaveNothing),
            paused: AtomicBool::new(true),
            has_source: AtomicBool::new(false),
            attach_count: AtomicUsize::new(0),
            detach_count: AtomicUsize::new(0),
            clear_count: AtomicUsize::new(0),
            play_count: AtomicUsize::new(0),
            pause_count: AtomicUsize::new(0),
        }
    }

    /// Pushes an event into the attached sink, as the host would.
    pub fn emit(&self, event: MediaEvent) -> bool {
        let sink = self.sink.lock().clone();
        sink.is_some_and(|s| s.emit(event))
    }

    /// Queues the result of the next `play()` call (default: Ok).
    pub fn push_play_result(&self, result: Result<(), MediaError>) {
        self.play_results.lock().push_back(result);
    }

    pub fn set_position(&self, position: f64) {
        *self.position.lock() = position;
    }

    pub fn set_buffered(&self, ranges: Vec<TimeRange>) {
        *self.buffered.lock() = ranges;
    }

    pub fn set_ready_state(&self, state: ReadyState) {
        *self.ready.lock() = state;
    }

    /// Simulates the user pausing through host controls.
    pub fn host_pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            self.emit(MediaEvent::Pause);
        }
    }

    pub fn loads(&self) -> Vec<MediaSource> {
        self.loads.lock().clone()
    }

    pub fn load_count(&self) -> usize {
        self.loads.lock().len()
    }

    pub fn last_load(&self) -> Option<MediaSource> {
        self.loads.lock().last().cloned()
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.seeks.lock().clone()
    }
}

#[async_trait]
impl MediaElement for MockMediaElement {
    fn attach(&self, sink: MediaEventSink) {
        self.attach_count.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock() = Some(sink);
    }

    fn detach(&self) {
        self.detach_count.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock() = None;
    }

    fn load(&self, source: &MediaSource) {
        self.loads.lock().push(source.clone());
        self.has_source.store(true, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
        *self.ready.lock() = ReadyState::HaveNothing;
        *self.position.lock() = source.start_position.unwrap_or(0.0);
    }

    fn clear_source(&self) {
        self.clear_count.fetch_add(1, Ordering::SeqCst);
        self.has_source.store(false, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
        *self.ready.lock() = ReadyState::HaveNothing;
    }

    async fn play(&self) -> Result<(), MediaError> {
        self.play_count.fetch_add(1, Ordering::SeqCst);
        let result = self.play_results.lock().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.paused.store(false, Ordering::SeqCst);
        }
        result
    }

    fn pause(&self) {
        self.pause_count.fetch_add(1, Ordering::SeqCst);
        if !self.paused.swap(true, Ordering::SeqCst) {
            self.emit(MediaEvent::Pause);
        }
    }

    fn seek(&self, position: f64) {
        self.seeks.lock().push(position);
        *self.position.lock() = position;
    }

    fn position(&self) -> f64 {
        *self.position.lock()
    }

    fn buffered(&self) -> Vec<TimeRange> {
        self.buffered.lock().clone()
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn has_source(&self) -> bool {
        self.has_source.load(Ordering::SeqCst)
    }

    fn ready_state(&self) -> ReadyState {
        *self.ready.lock()
    }
}
