//! Bridge from the synchronous status emitter to a broadcast channel.

use tokio::sync::broadcast;

use super::emitter::StatusListener;
use super::StatusEvent;

/// Forwards status events into a `tokio::sync::broadcast` channel.
///
/// Register it with [`RadioEngine::on_status_change`](crate::engine::RadioEngine::on_status_change)
/// and hand out receivers to async consumers (log monitors, push transports).
/// Events sent while no receiver exists are dropped.
#[derive(Clone)]
pub struct BroadcastStatusBridge {
    tx: broadcast::Sender<StatusEvent>,
}

impl BroadcastStatusBridge {
    /// Creates a new bridge with the given channel capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Returns a reference to the broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<StatusEvent> {
        &self.tx
    }
}

impl StatusListener for BroadcastStatusBridge {
    fn on_status(&self, event: &StatusEvent) {
        // Err only means no receivers are listening
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PlaybackStatus;
    use serde_json::Map;

    #[tokio::test]
    async fn bridge_forwards_events_to_receivers() {
        let bridge = BroadcastStatusBridge::new(8);
        let mut rx = bridge.subscribe();

        bridge.on_status(&StatusEvent::new(PlaybackStatus::Offline, None, Map::new()));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.status, PlaybackStatus::Offline);
    }

    #[test]
    fn bridge_without_receivers_does_not_panic() {
        let bridge = BroadcastStatusBridge::new(1);
        bridge.on_status(&StatusEvent::new(PlaybackStatus::Idle, None, Map::new()));
        assert_eq!(bridge.sender().receiver_count(), 0);
    }
}
