//! Playback resilience engine.
//!
//! [`RadioEngine`] is a cheap, cloneable handle to a driver task that owns one
//! media element and all session, recovery and watchdog state. Build engines
//! with [`RadioEngine::builder`]; any number can coexist.
//!
//! # Example
//!
//! ```ignore
//! let engine = RadioEngine::builder(element)
//!     .stations(stations)
//!     .config(EngineConfig::default())
//!     .build()?;
//!
//! let sub = engine.on_status_change(|event: &StatusEvent| {
//!     println!("{:?}", event.status);
//! });
//! engine.play_station("joy-fm")?;
//! ```

mod driver;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::EngineConfig;
use crate::error::{PlaybackError, PlaybackResult};
use crate::events::{StatusEmitter, StatusListener, Subscription};
use crate::media::{MediaElement, MediaEventSink, MediaOwnership};
use crate::resolver::{playlist_http_client, HttpPlaylistFetcher, PlaylistFetcher, SourceResolver};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::session::{StationCatalog, StationDescriptor, StationId};

use driver::{Command, Driver, DriverParts};

/// Handle to a running playback engine.
///
/// All operations are fire-and-forget: outcomes are reported through status
/// events. They fail only with [`PlaybackError::EngineClosed`] once the engine
/// has been disposed.
#[derive(Clone)]
pub struct RadioEngine {
    tx: mpsc::UnboundedSender<Command>,
    emitter: StatusEmitter,
    closed: Arc<AtomicBool>,
}

impl RadioEngine {
    /// Starts building an engine around `element`.
    #[must_use]
    pub fn builder(element: Arc<dyn MediaElement>) -> RadioEngineBuilder {
        RadioEngineBuilder::new(element)
    }

    fn send(&self, cmd: Command) -> PlaybackResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PlaybackError::EngineClosed);
        }
        self.tx.send(cmd).map_err(|_| PlaybackError::EngineClosed)
    }

    /// Plays the catalog station whose id, else name, equals `key`.
    pub fn play_station(&self, key: impl Into<StationId>) -> PlaybackResult<()> {
        self.send(Command::PlayStation(key.into()))
    }

    /// Plays an arbitrary station or track descriptor.
    pub fn play_track(&self, descriptor: StationDescriptor) -> PlaybackResult<()> {
        self.send(Command::PlayTrack(descriptor))
    }

    /// Tears down the current source and clears the session.
    pub fn stop(&self) -> PlaybackResult<()> {
        self.send(Command::Stop)
    }

    /// Resumes a paused session, otherwise stops.
    pub fn toggle_play(&self) -> PlaybackResult<()> {
        self.send(Command::TogglePlay)
    }

    /// Re-enters recovery with a fresh retry budget and an immediate reload.
    pub fn retry(&self) -> PlaybackResult<()> {
        self.send(Command::Retry)
    }

    /// Reports host connectivity changes.
    pub fn set_online(&self, online: bool) -> PlaybackResult<()> {
        self.send(Command::SetOnline(online))
    }

    /// Registers a status listener. Late subscribers only see future events.
    pub fn on_status_change(&self, listener: impl StatusListener + 'static) -> Subscription {
        self.emitter.subscribe(Arc::new(listener))
    }

    /// Registers an already shared listener (e.g. a [`BroadcastStatusBridge`](crate::events::BroadcastStatusBridge)).
    pub fn subscribe(&self, listener: Arc<dyn StatusListener>) -> Subscription {
        self.emitter.subscribe(listener)
    }

    /// Stops the engine for good.
    ///
    /// Listeners are released immediately so no event is delivered after
    /// this call starts. The returned future resolves once the driver has
    /// cleared its timers and detached from the element. Idempotent.
    pub async fn dispose(&self) {
        self.emitter.clear();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Dispose(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Builder for [`RadioEngine`].
pub struct RadioEngineBuilder {
    element: Arc<dyn MediaElement>,
    ownership: MediaOwnership,
    config: EngineConfig,
    stations: Vec<StationDescriptor>,
    fetcher: Option<Arc<dyn PlaylistFetcher>>,
    spawner: Option<Arc<dyn TaskSpawner>>,
}

impl RadioEngineBuilder {
    fn new(element: Arc<dyn MediaElement>) -> Self {
        Self {
            element,
            ownership: MediaOwnership::Managed,
            config: EngineConfig::default(),
            stations: Vec::new(),
            fetcher: None,
            spawner: None,
        }
    }

    /// Station catalog used by [`RadioEngine::play_station`].
    #[must_use]
    pub fn stations(mut self, stations: Vec<StationDescriptor>) -> Self {
        self.stations = stations;
        self
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Marks the element as host-owned (never cleared on dispose).
    #[must_use]
    pub fn ownership(mut self, ownership: MediaOwnership) -> Self {
        self.ownership = ownership;
        self
    }

    /// Overrides the playlist fetcher (defaults to [`HttpPlaylistFetcher`]).
    #[must_use]
    pub fn playlist_fetcher(mut self, fetcher: Arc<dyn PlaylistFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Overrides the task spawner (defaults to the current Tokio runtime).
    #[must_use]
    pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Validates the configuration, attaches the element and starts the driver.
    ///
    /// # Panics
    ///
    /// Panics if no spawner was set and this is called outside a Tokio runtime.
    pub fn build(self) -> PlaybackResult<RadioEngine> {
        self.config.validate().map_err(PlaybackError::Setup)?;

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => {
                let client = playlist_http_client()
                    .map_err(|e| PlaybackError::Setup(format!("HTTP client: {e}")))?;
                Arc::new(HttpPlaylistFetcher::new(client))
            }
        };
        let spawner = self
            .spawner
            .unwrap_or_else(|| Arc::new(TokioSpawner::current()));
        let resolver = Arc::new(SourceResolver::new(self.config.resolver.clone(), fetcher));

        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = StatusEmitter::new();

        let sink_tx = tx.downgrade();
        self.element.attach(MediaEventSink::new(move |event| {
            sink_tx
                .upgrade()
                .is_some_and(|tx| tx.send(Command::Media(event)).is_ok())
        }));

        let driver = Driver::new(DriverParts {
            rx,
            tx: tx.downgrade(),
            element: self.element,
            ownership: self.ownership,
            emitter: emitter.clone(),
            resolver,
            spawner: Arc::clone(&spawner),
            catalog: StationCatalog::new(self.stations),
            config: self.config,
        });
        spawner.spawn(Box::pin(driver.run()));

        Ok(RadioEngine {
            tx,
            emitter,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}
