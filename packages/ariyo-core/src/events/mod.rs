//! Status events emitted by the playback engine.
//!
//! This module defines the lifecycle states reported to collaborators (UI,
//! media-session integrations, analytics) and the pub/sub plumbing that
//! delivers them.
//!
//! # Architecture
//!
//! The engine emits through a [`StatusEmitter`]; listeners implement
//! [`StatusListener`] (closures do automatically). [`BroadcastStatusBridge`]
//! adapts the synchronous listener interface to a `tokio::sync::broadcast`
//! channel for async consumers.

mod bridge;
mod emitter;

pub use bridge::BroadcastStatusBridge;
pub use emitter::{LoggingStatusListener, StatusEmitter, StatusListener, Subscription};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::session::StationDescriptor;
use crate::utils::now_millis;

/// Playback lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackStatus {
    /// No session.
    Idle,
    /// Source assigned, waiting for audio.
    Buffering,
    /// Audio is advancing.
    Playing,
    /// Playback stopped advancing without pause or error.
    Stalled,
    /// A hard retry has been scheduled.
    Retrying,
    /// The host reported loss of connectivity.
    Offline,
    /// Terminal or immediate failure.
    Error,
    /// Playback stopped by the user or by the element.
    Stopped,
    /// Session metadata changed. Informational, never the current status.
    MetadataUpdated,
}

impl PlaybackStatus {
    /// Whether emitting this status changes the engine's current status.
    #[must_use]
    pub fn is_lifecycle(self) -> bool {
        self != Self::MetadataUpdated
    }
}

/// A single status notification.
///
/// Serializes to the collaborator callback shape:
/// `{ type, station, metadata, error?, attempt?, retryDelayMs?, offline? }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub status: PlaybackStatus,

    /// Descriptor of the current session, if any.
    pub station: Option<StationDescriptor>,

    /// Metadata snapshot of the current session (empty without one).
    pub metadata: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Retry attempt number (1-based).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline: Option<bool>,

    /// Unix timestamp (milliseconds).
    pub timestamp: u64,
}

impl StatusEvent {
    /// Creates an event with no optional payload.
    #[must_use]
    pub fn new(
        status: PlaybackStatus,
        station: Option<StationDescriptor>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            status,
            station,
            metadata,
            error: None,
            attempt: None,
            retry_delay_ms: None,
            offline: None,
            timestamp: now_millis(),
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, attempt: u32, delay_ms: u64) -> Self {
        self.attempt = Some(attempt);
        self.retry_delay_ms = Some(delay_ms);
        self
    }

    #[must_use]
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = Some(offline);
        self
    }
}
