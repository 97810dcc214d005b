//! Stall watchdog.
//!
//! A single restartable deadline. The engine's driver loop sleeps until
//! [`StallWatchdog::deadline`] and then asks [`StallWatchdog::check`] whether
//! the stall is genuine. Progress signals re-arm it (debounce, not
//! accumulation).

use std::time::Duration;

use tokio::time::Instant;

/// Outcome of a watchdog deadline being reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// No progress for a full timeout window.
    Stalled,
    /// Progress arrived inside the guard window; the watchdog was re-armed.
    Rearmed,
    /// The watchdog was not armed.
    Idle,
}

/// Restartable stall timer.
#[derive(Debug)]
pub struct StallWatchdog {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl StallWatchdog {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Starts or restarts the timer.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    /// Cancels the timer.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Evaluates a reached deadline against the last observed progress.
    ///
    /// If progress happened less than one timeout ago (a late or coalesced
    /// wake-up), the deadline moves to one timeout after that progress instead
    /// of firing.
    pub fn check(&mut self, last_progress_at: Instant) -> WatchdogVerdict {
        if self.deadline.is_none() {
            return WatchdogVerdict::Idle;
        }
        let now = Instant::now();
        let since_progress = now.saturating_duration_since(last_progress_at);
        if since_progress < self.timeout {
            self.deadline = Some(last_progress_at + self.timeout);
            return WatchdogVerdict::Rearmed;
        }
        self.deadline = None;
        WatchdogVerdict::Stalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_timeout_without_progress() {
        let mut wd = StallWatchdog::new(Duration::from_secs(12));
        let progress = Instant::now();
        wd.arm();

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(wd.check(progress), WatchdogVerdict::Stalled);
        assert!(!wd.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn recent_progress_rearms_instead_of_firing() {
        let mut wd = StallWatchdog::new(Duration::from_secs(12));
        wd.arm();

        tokio::time::sleep(Duration::from_secs(8)).await;
        let progress = Instant::now();
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(wd.check(progress), WatchdogVerdict::Rearmed);
        assert_eq!(wd.deadline(), Some(progress + Duration::from_secs(12)));
    }

    #[tokio::test(start_paused = true)]
    async fn arm_restarts_the_single_deadline() {
        let mut wd = StallWatchdog::new(Duration::from_secs(5));
        wd.arm();
        let first = wd.deadline();
        tokio::time::sleep(Duration::from_secs(2)).await;
        wd.arm();
        assert!(wd.deadline() > first);

        wd.disarm();
        assert_eq!(wd.check(Instant::now()), WatchdogVerdict::Idle);
    }
}
