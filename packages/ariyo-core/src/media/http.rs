//! Headless [`MediaElement`] backed by a reqwest byte stream.
//!
//! Nothing is decoded. The element consumes the response body and derives a
//! playback position from the byte count at a nominal bitrate, which is
//! enough for the engine to observe progress, stalls and failures without a
//! real decoder (monitoring, smoke tests).
//!
//! Pausing drops the connection; resuming opens a new one. There is no
//! seekable buffer, so [`buffered`](MediaElement::buffered) is always empty.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{friendly_network_error, MediaError, MediaErrorKind};
use crate::protocol_constants::{
    HTTP_ELEMENT_NOMINAL_BITRATE_BPS, HTTP_ELEMENT_TIMEUPDATE_INTERVAL_MS,
    PLAYLIST_FETCH_TIMEOUT_SECS, USER_AGENT,
};

use super::{MediaElement, MediaEvent, MediaEventSink, MediaSource, ReadyState, TimeRange};

/// Builds a client suited to stream consumption.
///
/// Only the connect phase is bounded.
pub fn stream_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(PLAYLIST_FETCH_TIMEOUT_SECS))
        .build()
}

struct ElementState {
    sink: Option<MediaEventSink>,
    source: Option<MediaSource>,
    /// Bumped on every source change; stale pump tasks compare against it.
    generation: u64,
    cancel: Option<CancellationToken>,
    base_position: f64,
    bytes: u64,
    paused: bool,
    ready: ReadyState,
}

impl ElementState {
    fn stop_pump(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }

    fn position(&self, bitrate_bps: u64) -> f64 {
        self.base_position + (self.bytes as f64 * 8.0) / bitrate_bps as f64
    }
}

/// Streams a source over HTTP and reports progress as a media element would.
#[derive(Clone)]
pub struct HttpStreamElement {
    client: reqwest::Client,
    bitrate_bps: u64,
    state: Arc<Mutex<ElementState>>,
}

impl HttpStreamElement {
    /// Creates an element using `client` for stream requests.
    ///
    /// See [`stream_http_client`].
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            bitrate_bps: HTTP_ELEMENT_NOMINAL_BITRATE_BPS,
            state: Arc::new(Mutex::new(ElementState {
                sink: None,
                source: None,
                generation: 0,
                cancel: None,
                base_position: 0.0,
                bytes: 0,
                paused: true,
                ready: ReadyState::HaveNothing,
            })),
        }
    }

    /// Overrides the bitrate used to convert bytes into seconds.
    #[must_use]
    pub fn with_bitrate(mut self, bitrate_bps: u64) -> Self {
        self.bitrate_bps = bitrate_bps.max(1);
        self
    }

    fn emit(&self, event: MediaEvent) {
        let sink = self.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }
}

#[async_trait]
impl MediaElement for HttpStreamElement {
    fn attach(&self, sink: MediaEventSink) {
        self.state.lock().sink = Some(sink);
    }

    fn detach(&self) {
        self.state.lock().sink = None;
    }

    fn load(&self, source: &MediaSource) {
        let mut state = self.state.lock();
        state.stop_pump();
        state.generation += 1;
        state.source = Some(source.clone());
        state.base_position = source.start_position.unwrap_or(0.0);
        state.bytes = 0;
        state.paused = true;
        state.ready = ReadyState::HaveNothing;
        log::debug!("[HttpElement] Source set to {}", source.url);
    }

    fn clear_source(&self) {
        let mut state = self.state.lock();
        state.stop_pump();
        state.generation += 1;
        state.source = None;
        state.base_position = 0.0;
        state.bytes = 0;
        state.paused = true;
        state.ready = ReadyState::HaveNothing;
    }

    async fn play(&self) -> Result<(), MediaError> {
        let (url, generation, cancel) = {
            let mut state = self.state.lock();
            let Some(url) = state.source.as_ref().map(|s| s.url.clone()) else {
                return Err(MediaError::new(
                    MediaErrorKind::SourceNotSupported,
                    "No source assigned",
                ));
            };
            if state.cancel.is_some() {
                state.paused = false;
                return Ok(());
            }
            let cancel = CancellationToken::new();
            state.cancel = Some(cancel.clone());
            state.paused = false;
            (url, state.generation, cancel)
        };

        let pump = StreamPump {
            client: self.client.clone(),
            state: Arc::clone(&self.state),
            bitrate_bps: self.bitrate_bps,
            generation,
            cancel,
        };
        tokio::spawn(pump.run(url));
        Ok(())
    }

    fn pause(&self) {
        let was_playing = {
            let mut state = self.state.lock();
            state.stop_pump();
            let was_playing = !state.paused;
            state.paused = true;
            if state.ready > ReadyState::HaveMetadata {
                state.ready = ReadyState::HaveMetadata;
            }
            was_playing
        };
        if was_playing {
            self.emit(MediaEvent::Pause);
        }
    }

    fn seek(&self, position: f64) {
        let mut state = self.state.lock();
        state.base_position = position;
        state.bytes = 0;
    }

    fn position(&self) -> f64 {
        self.state.lock().position(self.bitrate_bps)
    }

    fn buffered(&self) -> Vec<TimeRange> {
        Vec::new()
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn has_source(&self) -> bool {
        self.state.lock().source.is_some()
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().ready
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream Pump
// ─────────────────────────────────────────────────────────────────────────────

/// One connection's worth of body consumption.
struct StreamPump {
    client: reqwest::Client,
    state: Arc<Mutex<ElementState>>,
    bitrate_bps: u64,
    generation: u64,
    cancel: CancellationToken,
}

impl StreamPump {
    async fn run(self, url: String) {
        let response = tokio::select! {
            () = self.cancel.cancelled() => return,
            response = self.client.get(&url).send() => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                log::warn!("[HttpElement] Request failed for {}: {}", url, e);
                self.fail(friendly_network_error(&e));
                return;
            }
        };
        let status = response.status();
        if !status.is_success() {
            log::warn!("[HttpElement] Upstream returned HTTP {} for {}", status, url);
            self.fail(format!("HTTP {}", status.as_u16()));
            return;
        }

        let interval = Duration::from_millis(HTTP_ELEMENT_TIMEUPDATE_INTERVAL_MS);
        let mut last_update: Option<Instant> = None;
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                () = self.cancel.cancelled() => return,
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    let Some((first, position)) = self.record(bytes.len()) else {
                        return;
                    };
                    if first {
                        self.report(MediaEvent::Playing);
                    }
                    let now = Instant::now();
                    if last_update.map_or(true, |at| now.duration_since(at) >= interval) {
                        last_update = Some(now);
                        self.report(MediaEvent::TimeUpdate { position });
                    }
                }
                Some(Err(e)) => {
                    log::warn!("[HttpElement] Stream interrupted: {}", e);
                    self.fail(friendly_network_error(&e));
                    return;
                }
                None => {
                    log::info!("[HttpElement] Upstream closed {}", url);
                    self.finish();
                    self.report(MediaEvent::Ended);
                    return;
                }
            }
        }
    }

    fn is_current(&self, state: &ElementState) -> bool {
        state.generation == self.generation && !self.cancel.is_cancelled()
    }

    /// Adds received bytes. Returns whether this was the first chunk and the new position.
    fn record(&self, len: usize) -> Option<(bool, f64)> {
        let mut state = self.state.lock();
        if !self.is_current(&state) {
            return None;
        }
        let first = state.ready < ReadyState::HaveEnoughData;
        state.bytes += len as u64;
        state.ready = ReadyState::HaveEnoughData;
        Some((first, state.position(self.bitrate_bps)))
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        if self.is_current(&state) {
            state.cancel = None;
            state.paused = true;
            state.ready = ReadyState::HaveCurrentData;
        }
    }

    fn fail(&self, message: String) {
        {
            let mut state = self.state.lock();
            if !self.is_current(&state) {
                return;
            }
            state.cancel = None;
            state.ready = ReadyState::HaveNothing;
        }
        self.report(MediaEvent::Error(MediaError::new(
            MediaErrorKind::Network,
            message,
        )));
    }

    fn report(&self, event: MediaEvent) {
        let sink = {
            let state = self.state.lock();
            if state.generation != self.generation {
                return;
            }
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tokio::sync::mpsc;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn attached() -> (HttpStreamElement, mpsc::UnboundedReceiver<MediaEvent>) {
        let element = HttpStreamElement::new(reqwest::Client::new());
        let (tx, rx) = mpsc::unbounded_channel();
        element.attach(MediaEventSink::new(move |e| tx.send(e).is_ok()));
        (element, rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<MediaEvent>) -> MediaEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn play_without_source_rejects() {
        let (element, _rx) = attached();
        let err = element.play().await.unwrap_err();
        assert_eq!(err.kind, MediaErrorKind::SourceNotSupported);
        assert!(element.is_paused());
    }

    #[tokio::test]
    async fn body_drives_playing_progress_and_end() {
        let base = serve(Router::new().route("/s.mp3", get(|| async { vec![0u8; 16_000] }))).await;
        let (element, mut rx) = attached();
        element.load(&MediaSource::new(format!("{base}/s.mp3")));
        element.play().await.unwrap();
        assert!(!element.is_paused());

        assert_eq!(next_event(&mut rx).await, MediaEvent::Playing);
        loop {
            match next_event(&mut rx).await {
                MediaEvent::TimeUpdate { .. } => continue,
                MediaEvent::Ended => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!((element.position() - 1.0).abs() < 1e-9);
        assert!(element.is_paused());
        assert!(element.buffered().is_empty());
    }

    #[tokio::test]
    async fn start_position_offsets_progress() {
        let base = serve(Router::new().route("/s.mp3", get(|| async { vec![0u8; 16_000] }))).await;
        let (element, mut rx) = attached();
        let mut source = MediaSource::new(format!("{base}/s.mp3"));
        source.start_position = Some(10.0);
        element.load(&source);
        assert_eq!(element.position(), 10.0);

        element.play().await.unwrap();
        while next_event(&mut rx).await != MediaEvent::Ended {}
        assert!((element.position() - 11.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn http_error_status_reports_network_error() {
        let base = serve(Router::new().route("/gone", get(|| async { StatusCode::NOT_FOUND }))).await;
        let (element, mut rx) = attached();
        element.load(&MediaSource::new(format!("{base}/gone")));
        element.play().await.unwrap();

        match next_event(&mut rx).await {
            MediaEvent::Error(err) => {
                assert_eq!(err.kind, MediaErrorKind::Network);
                assert_eq!(err.message, "HTTP 404");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn pause_reports_once_and_clear_drops_source() {
        let (element, mut rx) = attached();
        element.load(&MediaSource::new("http://127.0.0.1:9/never"));
        element.pause();
        assert!(rx.try_recv().is_err());

        element.state.lock().paused = false;
        element.pause();
        assert_eq!(rx.try_recv().unwrap(), MediaEvent::Pause);

        element.clear_source();
        assert!(!element.has_source());
        assert_eq!(element.ready_state(), ReadyState::HaveNothing);
    }
}
