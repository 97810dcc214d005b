//! Synchronous status pub/sub.
//!
//! Listeners are invoked inline, in subscription order, on the task that
//! emits. The listener list is snapshotted before delivery so a listener may
//! subscribe, unsubscribe or call back into the engine while being notified.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::StatusEvent;

/// Receives status events.
///
/// Implemented for any `Fn(&StatusEvent) + Send + Sync` closure.
pub trait StatusListener: Send + Sync {
    /// Called once per emitted event.
    fn on_status(&self, event: &StatusEvent);
}

impl<F> StatusListener for F
where
    F: Fn(&StatusEvent) + Send + Sync,
{
    fn on_status(&self, event: &StatusEvent) {
        self(event);
    }
}

/// Logs every event at debug level.
pub struct LoggingStatusListener;

impl StatusListener for LoggingStatusListener {
    fn on_status(&self, event: &StatusEvent) {
        tracing::debug!(?event, "playback_status");
    }
}

type ListenerEntry = (u64, Arc<dyn StatusListener>);

#[derive(Default)]
struct EmitterInner {
    next_id: AtomicU64,
    listeners: RwLock<Vec<ListenerEntry>>,
}

/// Fan-out point for status events.
///
/// Cheap to clone; clones share the listener list. No buffering or replay:
/// late subscribers only see future events.
#[derive(Clone, Default)]
pub struct StatusEmitter {
    inner: Arc<EmitterInner>,
}

impl StatusEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Keep the returned [`Subscription`] to remove it later.
    pub fn subscribe(&self, listener: Arc<dyn StatusListener>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push((id, listener));
        Subscription {
            id,
            emitter: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `event` to every listener registered at the time of the call.
    pub fn emit(&self, event: &StatusEvent) {
        let snapshot: Vec<Arc<dyn StatusListener>> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener.on_status(event);
        }
    }

    /// Removes every listener.
    pub fn clear(&self) {
        self.inner.listeners.write().clear();
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}

/// Handle returned by [`StatusEmitter::subscribe`].
///
/// Dropping it leaves the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[must_use = "dropping a Subscription does not unsubscribe; keep it to call unsubscribe()"]
pub struct Subscription {
    id: u64,
    emitter: Weak<EmitterInner>,
}

impl Subscription {
    /// Removes the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.emitter.upgrade() else {
            return false;
        };
        let mut listeners = inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        listeners.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PlaybackStatus;
    use parking_lot::Mutex;
    use serde_json::Map;
    use std::sync::atomic::AtomicUsize;

    fn event(status: PlaybackStatus) -> StatusEvent {
        StatusEvent::new(status, None, Map::new())
    }

    #[test]
    fn emits_to_all_listeners_in_order() {
        let emitter = StatusEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = seen.clone();
            let _sub = emitter.subscribe(Arc::new(move |e: &StatusEvent| {
                seen.lock().push((tag, e.status));
            }));
        }

        emitter.emit(&event(PlaybackStatus::Buffering));
        assert_eq!(
            *seen.lock(),
            vec![
                ("a", PlaybackStatus::Buffering),
                ("b", PlaybackStatus::Buffering)
            ]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let emitter = StatusEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = emitter.subscribe(Arc::new(move |_: &StatusEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        emitter.emit(&event(PlaybackStatus::Playing));
        assert!(sub.unsubscribe());
        emitter.emit(&event(PlaybackStatus::Stopped));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn listener_may_subscribe_during_emission() {
        let emitter = StatusEmitter::new();
        let reentrant = emitter.clone();
        let _sub = emitter.subscribe(Arc::new(move |_: &StatusEvent| {
            let _late = reentrant.subscribe(Arc::new(|_: &StatusEvent| {}));
        }));

        emitter.emit(&event(PlaybackStatus::Idle));
        assert_eq!(emitter.listener_count(), 2);
    }

    #[test]
    fn unsubscribe_after_clear_reports_false() {
        let emitter = StatusEmitter::new();
        let sub = emitter.subscribe(Arc::new(LoggingStatusListener));
        emitter.clear();
        assert!(!sub.unsubscribe());
    }
}
