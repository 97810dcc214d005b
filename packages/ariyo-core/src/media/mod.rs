//! Host media element abstraction.
//!
//! The decoder is an opaque capability supplied by the host. The engine only
//! drives it through [`MediaElement`] and observes it through the
//! [`MediaEvent`]s the host pushes into a [`MediaEventSink`].

pub mod http;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

pub use crate::error::{MediaError, MediaErrorKind};
pub use http::{stream_http_client, HttpStreamElement};

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// A contiguous buffered span, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    #[must_use]
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Whether `position` lies strictly inside the range.
    #[must_use]
    pub fn strictly_contains(&self, position: f64) -> bool {
        self.start < position && position < self.end
    }
}

/// Cross-origin loading mode for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorsMode {
    /// Anonymous CORS request (the default).
    #[default]
    Anonymous,
    /// No cross-origin attribute; used once after decode-class failures.
    Disabled,
}

/// Source assignment handed to [`MediaElement::load`].
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSource {
    pub url: String,
    pub cors: CorsMode,
    /// Position (seconds) to seek to once the source is ready.
    pub start_position: Option<f64>,
}

impl MediaSource {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cors: CorsMode::Anonymous,
            start_position: None,
        }
    }
}

/// Readiness of the element, mirroring the host media ready states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ReadyState {
    #[default]
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// Who owns the element's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaOwnership {
    /// The engine may clear and release the element on dispose.
    #[default]
    Managed,
    /// Supplied by the host; the engine only pauses and detaches it.
    External,
}

/// Signals a media element reports to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    Playing,
    Pause,
    Waiting,
    Stalled,
    TimeUpdate { position: f64 },
    Ended,
    Error(MediaError),
}

impl From<MediaErrorKind> for MediaEvent {
    fn from(kind: MediaErrorKind) -> Self {
        Self::Error(kind.into())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Receiver end the host pushes [`MediaEvent`]s into.
///
/// Cloneable; delivery after the engine is gone is silently dropped.
#[derive(Clone)]
pub struct MediaEventSink {
    deliver: Arc<dyn Fn(MediaEvent) -> bool + Send + Sync>,
}

impl MediaEventSink {
    /// Creates a sink from a delivery function returning whether the event was accepted.
    pub fn new(deliver: impl Fn(MediaEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Delivers an event. Returns false once the receiver is gone.
    pub fn emit(&self, event: MediaEvent) -> bool {
        (self.deliver)(event)
    }
}

impl fmt::Debug for MediaEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaEventSink").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Element Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A single streaming media element.
///
/// Synchronous methods must not block; `play` may take as long as the host
/// needs and may reject (autoplay policy, decode failure).
#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Routes this element's events into `sink`. Called once per engine.
    fn attach(&self, sink: MediaEventSink);

    /// Stops routing events.
    fn detach(&self);

    /// Assigns a new source, replacing the current one.
    fn load(&self, source: &MediaSource);

    /// Removes the current source and releases its connection.
    fn clear_source(&self);

    /// Starts or resumes playback.
    async fn play(&self) -> Result<(), MediaError>;

    fn pause(&self);

    /// Moves the playback position (seconds).
    fn seek(&self, position: f64);

    /// Current playback position (seconds).
    fn position(&self) -> f64;

    fn buffered(&self) -> Vec<TimeRange>;

    fn is_paused(&self) -> bool;

    fn has_source(&self) -> bool;

    fn ready_state(&self) -> ReadyState;

    /// Playing with enough data to continue.
    fn is_healthy(&self) -> bool {
        !self.is_paused() && self.ready_state() >= ReadyState::HaveFutureData
    }
}
