//! Task spawning abstraction for runtime independence.
//!
//! The engine hands play requests and source resolutions to a [`TaskSpawner`]
//! so that slow host futures never block the command loop. Their results
//! re-enter the engine as commands tagged with the selection token captured at
//! spawn time.

use futures::future::BoxFuture;

/// Abstraction for spawning background tasks.
///
/// Object safe so engines can hold an `Arc<dyn TaskSpawner>` chosen by the
/// host. Implementations should ensure tasks can complete even if the spawner
/// is dropped.
///
/// # Example
///
/// ```ignore
/// let spawner: Arc<dyn TaskSpawner> = Arc::new(TokioSpawner::current());
/// spawner.spawn(Box::pin(async move {
///     // Background work here
/// }));
/// ```
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a background task.
    ///
    /// The task runs independently of the caller. The spawner does not
    /// provide a way to cancel or join it.
    fn spawn(&self, future: BoxFuture<'static, ()>);
}

/// Tokio-based spawner for the server and general use.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        self.handle.spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn tokio_spawner_executes_task() {
        let spawner: Arc<dyn TaskSpawner> = Arc::new(TokioSpawner::current());
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        spawner.spawn(Box::pin(async move {
            executed_clone.store(true, Ordering::SeqCst);
        }));

        // Give the task time to execute
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(executed.load(Ordering::SeqCst));
    }
}
