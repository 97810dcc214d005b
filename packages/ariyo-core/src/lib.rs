//! Ariyo Core - playback resilience engine for Ariyo.
//!
//! Keeps a single live radio stream or on-demand track playing through
//! network hiccups, decoder stalls, CORS failures and connectivity loss,
//! and reports a clean lifecycle to whoever is listening.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`engine`]: The [`RadioEngine`] handle and its driver task
//! - [`session`]: Station descriptors, the catalog and per-selection state
//! - [`recovery`]: Soft recovery, backoff and the retry budget
//! - [`watchdog`]: Stall detection from playback progress
//! - [`resolver`]: Scheme normalization, playlist unwrapping, proxy rewrite
//! - [`events`]: Status events and listener plumbing
//! - [`media`]: The host media element seam and a headless HTTP element
//! - [`api`]: Same-origin audio proxy endpoint
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The host supplies capabilities through traits:
//!
//! - [`MediaElement`](media::MediaElement): The decoder/player being driven
//! - [`PlaylistFetcher`](resolver::PlaylistFetcher): Playlist body retrieval
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`StatusListener`](events::StatusListener): Receiving status events
//!
//! Each has a default implementation suitable for the standalone server.

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod media;
pub mod protocol_constants;
pub mod recovery;
pub mod resolver;
pub mod runtime;
pub mod session;
pub mod utils;
pub mod watchdog;

#[cfg(test)]
mod test_fixtures;

// Re-export commonly used types at the crate root
pub use config::{EngineConfig, HostPattern, ProxyConfig, ResolverPolicy};
pub use engine::{RadioEngine, RadioEngineBuilder};
pub use error::{
    ErrorCode, MediaError, MediaErrorKind, PlaybackError, PlaybackResult, ResolveError,
};
pub use events::{
    BroadcastStatusBridge, LoggingStatusListener, PlaybackStatus, StatusEmitter, StatusEvent,
    StatusListener, Subscription,
};
pub use media::{
    CorsMode, HttpStreamElement, MediaElement, MediaEvent, MediaEventSink, MediaOwnership,
    MediaSource, ReadyState, TimeRange,
};
pub use resolver::{HttpPlaylistFetcher, PlaylistFetcher, ResolvedSource, SourceResolver};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{StationCatalog, StationDescriptor, StationId, StreamKind};

// Re-export API types
pub use api::{create_router, start_server, ProxyError, ProxyState, ServerError};
