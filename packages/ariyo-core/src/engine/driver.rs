//! The engine's single-owner driver task.
//!
//! Every mutation of session, recovery and watchdog state happens here, in
//! one `select!` loop over the command channel and the two deadlines (retry
//! timer, stall watchdog). Host futures (play requests, source resolution)
//! run on spawned tasks and re-enter as commands tagged with the
//! [`SelectionToken`] they were started under.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::error::{MediaError, MediaErrorKind, PlaybackError};
use crate::events::{PlaybackStatus, StatusEmitter, StatusEvent};
use crate::media::{CorsMode, MediaElement, MediaEvent, MediaOwnership, MediaSource};
use crate::recovery::{RecoveryController, RetryReason, ScheduleOutcome, StallPlan};
use crate::resolver::{ResolvedSource, SourceResolver};
use crate::runtime::TaskSpawner;
use crate::session::{
    SelectionToken, Session, StationCatalog, StationDescriptor, StationId, TokenMint,
};
use crate::watchdog::{StallWatchdog, WatchdogVerdict};

/// Messages processed by the driver loop.
pub(crate) enum Command {
    PlayStation(StationId),
    PlayTrack(StationDescriptor),
    Stop,
    TogglePlay,
    Retry,
    SetOnline(bool),
    Media(MediaEvent),
    Resolved {
        token: SelectionToken,
        resolved: ResolvedSource,
        resume_at: Option<f64>,
    },
    PlayOutcome {
        token: SelectionToken,
        result: Result<(), MediaError>,
    },
    Dispose(oneshot::Sender<()>),
}

/// Everything the driver needs, assembled by the builder.
pub(crate) struct DriverParts {
    pub rx: mpsc::UnboundedReceiver<Command>,
    pub tx: mpsc::WeakUnboundedSender<Command>,
    pub element: Arc<dyn MediaElement>,
    pub ownership: MediaOwnership,
    pub emitter: StatusEmitter,
    pub resolver: Arc<SourceResolver>,
    pub spawner: Arc<dyn TaskSpawner>,
    pub catalog: StationCatalog,
    pub config: EngineConfig,
}

pub(crate) struct Driver {
    rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::WeakUnboundedSender<Command>,
    element: Arc<dyn MediaElement>,
    ownership: MediaOwnership,
    emitter: StatusEmitter,
    resolver: Arc<SourceResolver>,
    spawner: Arc<dyn TaskSpawner>,
    catalog: StationCatalog,
    resume_rewind_secs: f64,
    session: Option<Session>,
    mint: TokenMint,
    recovery: RecoveryController,
    watchdog: StallWatchdog,
    status: PlaybackStatus,
    online: bool,
    buffering: bool,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Driver {
    pub(crate) fn new(parts: DriverParts) -> Self {
        Self {
            rx: parts.rx,
            tx: parts.tx,
            element: parts.element,
            ownership: parts.ownership,
            emitter: parts.emitter,
            resolver: parts.resolver,
            spawner: parts.spawner,
            catalog: parts.catalog,
            resume_rewind_secs: parts.config.resume_rewind_secs(),
            session: None,
            mint: TokenMint::default(),
            recovery: RecoveryController::new(&parts.config),
            watchdog: StallWatchdog::new(parts.config.stall_timeout()),
            status: PlaybackStatus::Idle,
            online: true,
            buffering: false,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let retry_at = self.recovery.retry_deadline();
            let stall_at = self.watchdog.deadline();

            tokio::select! {
                biased;

                cmd = self.rx.recv() => match cmd {
                    Some(Command::Dispose(ack)) => {
                        self.teardown();
                        let _ = ack.send(());
                        break;
                    }
                    Some(cmd) => self.handle(cmd),
                    None => {
                        log::debug!("[Session] All engine handles dropped");
                        self.teardown();
                        break;
                    }
                },
                () = sleep_until_opt(retry_at) => self.on_retry_due(),
                () = sleep_until_opt(stall_at) => self.on_watchdog_due(),
            }
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::PlayStation(key) => self.play_station(&key),
            Command::PlayTrack(descriptor) => self.select(descriptor),
            Command::Stop => self.stop(),
            Command::TogglePlay => self.toggle_play(),
            Command::Retry => self.manual_retry(),
            Command::SetOnline(online) => self.set_online(online),
            Command::Media(event) => self.on_media_event(event),
            Command::Resolved {
                token,
                resolved,
                resume_at,
            } => self.apply_resolved(token, resolved, resume_at),
            Command::PlayOutcome { token, result } => self.on_play_outcome(token, result),
            Command::Dispose(_) => {}
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Emission
    // ─────────────────────────────────────────────────────────────────────────

    fn event(&self, status: PlaybackStatus) -> StatusEvent {
        match &self.session {
            Some(s) => StatusEvent::new(status, Some(s.current.clone()), s.metadata.clone()),
            None => StatusEvent::new(status, None, Default::default()),
        }
    }

    fn emit(&mut self, event: StatusEvent) {
        if event.status.is_lifecycle() && event.status != self.status {
            log::debug!("[Session] Status {:?} -> {:?}", self.status, event.status);
            self.status = event.status;
        }
        self.emitter.emit(&event);
    }

    fn emit_status(&mut self, status: PlaybackStatus) {
        let event = self.event(status);
        self.emit(event);
    }

    fn current_token(&self) -> Option<SelectionToken> {
        self.session.as_ref().map(|s| s.token)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Selection
    // ─────────────────────────────────────────────────────────────────────────

    fn play_station(&mut self, key: &StationId) {
        match self.catalog.find(key.as_str()).cloned() {
            Some(descriptor) => self.select(descriptor),
            None => {
                let err = PlaybackError::StationNotFound(key.to_string());
                log::warn!("[Session] {}", err);
                let event = self.event(PlaybackStatus::Error).with_error(err.to_string());
                self.emit(event);
            }
        }
    }

    fn select(&mut self, descriptor: StationDescriptor) {
        let Some(url) = descriptor.playable_url().map(str::to_string) else {
            log::warn!("[Session] {} has no stream URL", descriptor.label());
            let metadata = descriptor.metadata_snapshot();
            let event = StatusEvent::new(PlaybackStatus::Error, Some(descriptor), metadata)
                .with_error(PlaybackError::MissingStreamUrl.to_string());
            self.emit(event);
            return;
        };

        // A same-source session still resolving counts as assigned.
        let same_source = self.session.as_ref().is_some_and(|s| {
            s.current.same_source(&descriptor)
                && (s.resolved_url.is_none() || self.element.has_source())
        });
        if same_source {
            self.reselect(descriptor);
            return;
        }

        log::info!("[Session] Selecting {} ({})", descriptor.label(), url);
        let was_playing = !self.element.is_paused();
        if self.session.is_some() || self.element.has_source() {
            self.element.pause();
            self.element.clear_source();
        }
        self.recovery.reset();
        self.watchdog.disarm();

        let token = self.mint.next();
        let mut session = Session::new(descriptor, url, token);
        session.suppress_next_pause = was_playing;
        self.session = Some(session);
        self.buffering = true;

        self.emit_status(PlaybackStatus::MetadataUpdated);
        self.emit_status(PlaybackStatus::Buffering);
        self.spawn_resolve(token, false, None);
    }

    /// Same source selected again: refresh metadata, resume if paused, never reload.
    fn reselect(&mut self, descriptor: StationDescriptor) {
        if self.recovery.is_terminal() {
            if let Some(session) = self.session.as_mut() {
                session.refresh_descriptor(descriptor);
            }
            self.emit_status(PlaybackStatus::MetadataUpdated);
            self.manual_retry();
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.refresh_descriptor(descriptor);
        let token = session.token;
        log::debug!("[Session] Same source reselected; metadata refresh only");
        self.emit_status(PlaybackStatus::MetadataUpdated);

        if self.element.has_source() && self.element.is_paused() {
            self.spawn_play(token);
            self.watchdog.arm();
        }
    }

    fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            log::info!("[Session] Stopping {}", session.current.label());
        }
        self.recovery.reset();
        self.watchdog.disarm();
        self.buffering = false;
        self.element.pause();
        self.element.clear_source();
        self.emit_status(PlaybackStatus::Stopped);
    }

    fn toggle_play(&mut self) {
        let Some(token) = self.current_token() else {
            self.emit_status(PlaybackStatus::Idle);
            return;
        };
        if self.element.is_paused() {
            self.spawn_play(token);
            self.watchdog.arm();
            let status = if self.buffering {
                PlaybackStatus::Buffering
            } else {
                PlaybackStatus::Playing
            };
            self.emit_status(status);
        } else {
            self.stop();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Source Loading
    // ─────────────────────────────────────────────────────────────────────────

    fn spawn_resolve(&self, token: SelectionToken, reload: bool, resume_at: Option<f64>) {
        let Some(session) = &self.session else {
            return;
        };
        let resolver = Arc::clone(&self.resolver);
        let raw = session.base_url.clone();
        let tx = self.tx.clone();
        self.spawner.spawn(Box::pin(async move {
            let resolved = resolver.resolve(&raw, reload).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::Resolved {
                    token,
                    resolved,
                    resume_at,
                });
            }
        }));
    }

    fn spawn_play(&self, token: SelectionToken) {
        let element = Arc::clone(&self.element);
        let tx = self.tx.clone();
        self.spawner.spawn(Box::pin(async move {
            let result = element.play().await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::PlayOutcome { token, result });
            }
        }));
    }

    fn apply_resolved(
        &mut self,
        token: SelectionToken,
        resolved: ResolvedSource,
        resume_at: Option<f64>,
    ) {
        let element_playing = !self.element.is_paused();
        let Some(session) = self.session.as_mut().filter(|s| s.token == token) else {
            log::debug!(
                "[Session] Dropping stale resolution for token {}",
                token.value()
            );
            return;
        };
        if let Some(reason) = &resolved.fallback_reason {
            log::warn!("[Resolver] Falling back to {}: {}", resolved.url, reason);
        }

        if element_playing {
            session.suppress_next_pause = true;
            self.element.pause();
        }
        let source = MediaSource {
            url: resolved.url.clone(),
            cors: if session.cors_disabled {
                CorsMode::Disabled
            } else {
                CorsMode::Anonymous
            },
            start_position: resume_at,
        };
        session.resolved_url = Some(resolved.url);
        session.record_progress(None);

        log::info!("[Session] Loading {}", source.url);
        self.element.load(&source);
        self.watchdog.arm();
        self.spawn_play(token);
    }

    /// Re-resolves the session's source with a fresh token and cache-busting.
    fn reload(&mut self) {
        let rewind = self.resume_rewind_secs;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let resume_at = (!session.is_live && session.last_position > 0.0)
            .then(|| (session.last_position - rewind).max(0.0));
        let token = self.mint.next();
        session.token = token;
        self.buffering = true;
        self.emit_status(PlaybackStatus::Buffering);
        self.spawn_resolve(token, true, resume_at);
    }

    fn on_play_outcome(&mut self, token: SelectionToken, result: Result<(), MediaError>) {
        if self.current_token() != Some(token) {
            log::debug!("[Session] Ignoring play outcome for stale token {}", token.value());
            return;
        }
        if let Err(err) = result {
            log::warn!("[Session] Play request rejected: {}", err);
            self.on_media_failure(err, RetryReason::PlayRejected);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Media Events
    // ─────────────────────────────────────────────────────────────────────────

    fn on_media_event(&mut self, event: MediaEvent) {
        if self.session.is_none() {
            log::debug!("[Session] Ignoring {:?} without a session", event);
            return;
        }
        match event {
            MediaEvent::Playing => self.on_playing(),
            MediaEvent::Pause => self.on_pause(),
            MediaEvent::Waiting => {
                self.buffering = true;
                self.emit_status(PlaybackStatus::Buffering);
                self.watchdog.arm();
            }
            MediaEvent::Stalled => {
                if self.element.is_healthy() {
                    log::debug!("[Watchdog] Ignoring stalled signal while playback is healthy");
                    self.watchdog.arm();
                } else {
                    self.on_stall(RetryReason::StalledEvent);
                }
            }
            MediaEvent::TimeUpdate { position } => self.on_progress(position),
            MediaEvent::Ended => self.on_ended(),
            MediaEvent::Error(err) => {
                if !self.element.has_source() {
                    log::debug!("[Session] Ignoring error from cleared element: {}", err);
                    return;
                }
                let reason = RetryReason::MediaError(err.kind);
                self.on_media_failure(err, reason);
            }
        }
    }

    fn on_playing(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.suppress_next_pause = false;
            session.record_progress(None);
        }
        self.buffering = false;
        self.recovery.on_playing();
        self.emit_status(PlaybackStatus::Playing);
        self.watchdog.arm();
    }

    fn on_pause(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.suppress_next_pause {
            session.suppress_next_pause = false;
            log::debug!("[Session] Suppressed pause signal during handover");
            return;
        }
        self.watchdog.disarm();
        self.recovery.cancel_pending();
        self.emit_status(PlaybackStatus::Stopped);
    }

    fn on_progress(&mut self, position: f64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if (position - session.last_position).abs() <= f64::EPSILON {
            return;
        }
        if !self.recovery.on_progress(position) {
            log::debug!("[Recovery] Seek landed at {:.2}s; awaiting playback", position);
            session.last_position = position;
            return;
        }
        session.record_progress(Some(position));
        if self.watchdog.is_armed() {
            self.watchdog.arm();
        }
    }

    fn on_ended(&mut self) {
        let is_live = self.session.as_ref().is_some_and(|s| s.is_live);
        if is_live {
            log::warn!("[Recovery] Live stream ended unexpectedly");
            self.emit_status(PlaybackStatus::Stalled);
            self.watchdog.disarm();
            self.request_hard_retry(RetryReason::EndedUnexpectedly, None, false);
        } else {
            self.watchdog.disarm();
            self.recovery.reset();
            self.buffering = false;
            self.emit_status(PlaybackStatus::Stopped);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recovery
    // ─────────────────────────────────────────────────────────────────────────

    fn on_media_failure(&mut self, err: MediaError, reason: RetryReason) {
        if self.recovery.is_terminal() {
            log::debug!("[Recovery] Terminal; ignoring {}", err);
            return;
        }
        if err.kind == MediaErrorKind::Aborted {
            log::debug!("[Recovery] Load aborted by host: {}", err);
            return;
        }

        let cors_fallback = err.kind.is_decode_class()
            && self
                .session
                .as_ref()
                .is_some_and(|s| !s.cors_fallback_used);
        if cors_fallback {
            if let Some(session) = self.session.as_mut() {
                session.cors_fallback_used = true;
                session.cors_disabled = true;
            }
            log::warn!("[Recovery] {}; retrying once without CORS", err);
            self.watchdog.disarm();
            let event = self
                .event(PlaybackStatus::Retrying)
                .with_error(err.to_string());
            self.emit(event);
            self.reload();
            return;
        }

        log::warn!("[Recovery] Media failure ({}): {}", reason, err);
        self.watchdog.disarm();
        self.request_hard_retry(reason, Some(err.to_string()), false);
    }

    fn on_stall(&mut self, reason: RetryReason) {
        let Some(token) = self.current_token() else {
            return;
        };
        if self.recovery.is_terminal() || self.recovery.pending().is_some() {
            return;
        }
        self.emit_status(PlaybackStatus::Stalled);

        let position = self.element.position();
        let buffered = self.element.buffered();
        match self.recovery.evaluate_stall(position, &buffered) {
            StallPlan::Nudge(target) => {
                log::info!(
                    "[Recovery] Soft recovery ({}): seeking {:.2}s -> {:.2}s",
                    reason,
                    position,
                    target
                );
                self.element.seek(target);
                self.watchdog.arm();
                self.spawn_play(token);
            }
            StallPlan::Escalate => {
                self.watchdog.disarm();
                self.request_hard_retry(reason, None, false);
            }
        }
    }

    fn request_hard_retry(&mut self, reason: RetryReason, error: Option<String>, immediate: bool) {
        if self.session.is_none() {
            return;
        }
        if !self.online {
            log::info!("[Recovery] Offline; deferring retry ({})", reason);
            let mut event = self.event(PlaybackStatus::Offline).with_offline(true);
            event.error = error;
            self.emit(event);
            return;
        }
        if self.recovery.is_terminal() {
            return;
        }

        let position = self.element.position();
        match self.recovery.schedule(reason, immediate, position) {
            ScheduleOutcome::Scheduled { attempt, delay_ms } => {
                log::info!(
                    "[Recovery] Retry {}/{} in {}ms ({})",
                    attempt,
                    self.recovery.max_retries(),
                    delay_ms,
                    reason
                );
                self.watchdog.disarm();
                let mut event = self
                    .event(PlaybackStatus::Retrying)
                    .with_retry(attempt, delay_ms);
                event.error = error;
                if reason == RetryReason::NetworkRestored {
                    event.offline = Some(false);
                }
                self.emit(event);
            }
            ScheduleOutcome::AlreadyPending => {
                log::debug!("[Recovery] Retry already pending; ignoring ({})", reason);
            }
            ScheduleOutcome::Exhausted { attempts } => {
                self.watchdog.disarm();
                self.buffering = false;
                let err = PlaybackError::RecoveryExhausted {
                    attempts,
                    reason: reason.to_string(),
                };
                log::error!("[Recovery] {}", err);
                let event = self.event(PlaybackStatus::Error).with_error(err.to_string());
                self.emit(event);
            }
        }
    }

    fn on_retry_due(&mut self) {
        let Some(pending) = self.recovery.take_due() else {
            return;
        };
        if self.session.is_none() {
            self.recovery.reset();
            return;
        }

        let position = self.element.position();
        if self.element.has_source() && pending.self_healed(position, self.element.is_healthy()) {
            log::info!(
                "[Recovery] Playback recovered on its own; skipping retry {}",
                pending.attempt
            );
            self.recovery.mark_self_healed();
            self.watchdog.arm();
            return;
        }

        log::info!(
            "[Recovery] Reloading source (attempt {}, {})",
            pending.attempt,
            pending.reason
        );
        self.recovery.mark_reloaded();
        self.reload();
    }

    fn on_watchdog_due(&mut self) {
        let Some(last_progress) = self.session.as_ref().map(|s| s.last_progress_at) else {
            self.watchdog.disarm();
            return;
        };
        match self.watchdog.check(last_progress) {
            WatchdogVerdict::Stalled => {
                log::warn!(
                    "[Watchdog] No progress for {}ms",
                    self.watchdog.timeout().as_millis()
                );
                self.on_stall(RetryReason::StallTimeout);
            }
            WatchdogVerdict::Rearmed => {
                log::debug!("[Watchdog] Progress inside guard window; re-armed");
            }
            WatchdogVerdict::Idle => {}
        }
    }

    fn manual_retry(&mut self) {
        if self.session.is_none() {
            self.emit_status(PlaybackStatus::Idle);
            return;
        }
        log::info!("[Recovery] Manual retry requested");
        self.recovery.rearm_budget();
        self.watchdog.disarm();
        self.request_hard_retry(RetryReason::Manual, None, true);
    }

    fn set_online(&mut self, online: bool) {
        if online == self.online {
            return;
        }
        self.online = online;
        if !online {
            log::info!("[Recovery] Network offline; suspending retries");
            self.recovery.cancel_pending();
            self.watchdog.disarm();
            let event = self.event(PlaybackStatus::Offline).with_offline(true);
            self.emit(event);
            return;
        }

        log::info!("[Recovery] Network restored");
        if self.session.is_some() && !self.recovery.is_terminal() {
            self.request_hard_retry(RetryReason::NetworkRestored, None, true);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────

    fn teardown(&mut self) {
        self.recovery.reset();
        self.watchdog.disarm();
        self.session = None;
        self.element.detach();
        self.element.pause();
        if self.ownership == MediaOwnership::Managed {
            self.element.clear_source();
        }
        log::info!("[Session] Engine disposed");
    }
}
