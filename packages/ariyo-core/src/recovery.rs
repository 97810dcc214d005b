//! Recovery controller policy: soft nudges, backoff and the retry budget.
//!
//! The engine driver owns one [`RecoveryController`] and consults it for every
//! stall, error or connectivity change. All timing is expressed as deadlines
//! the driver loop sleeps on; nothing here spawns tasks.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::error::MediaErrorKind;
use crate::media::TimeRange;

// ─────────────────────────────────────────────────────────────────────────────
// Backoff
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff without jitter: `min(max, base * 2^(attempt-1))`.
///
/// Attempt 0 is treated like attempt 1.
#[must_use]
pub fn backoff_delay_ms(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exp = attempt.saturating_sub(1).min(32);
    base_delay_ms
        .saturating_mul(1u64 << exp)
        .min(max_delay_ms)
}

/// Adds up to `ratio * delay` of random jitter.
#[must_use]
pub fn with_jitter(delay_ms: u64, ratio: f64) -> u64 {
    if ratio <= 0.0 || delay_ms == 0 {
        return delay_ms;
    }
    let extra = (delay_ms as f64 * ratio * rand::random::<f64>()).round() as u64;
    delay_ms.saturating_add(extra)
}

// ─────────────────────────────────────────────────────────────────────────────
// Soft Recovery
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the seek target for a soft recovery, if one applies.
///
/// Applies when `position` lies strictly inside a buffered range with at
/// least `nudge` seconds of headroom; the target is `position + nudge`,
/// clamped to the range end.
#[must_use]
pub fn soft_seek_target(position: f64, buffered: &[TimeRange], nudge: f64) -> Option<f64> {
    buffered
        .iter()
        .find(|r| r.strictly_contains(position) && r.end - position >= nudge)
        .map(|r| (position + nudge).min(r.end))
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Recovery controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryState {
    #[default]
    Idle,
    Evaluating,
    SoftRecovering,
    HardRetryScheduled,
    Terminal,
}

/// What triggered a recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    StallTimeout,
    StalledEvent,
    MediaError(MediaErrorKind),
    EndedUnexpectedly,
    PlayRejected,
    NetworkRestored,
    Manual,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StallTimeout => f.write_str("stall-timeout"),
            Self::StalledEvent => f.write_str("stalled event"),
            Self::MediaError(kind) => write!(f, "media error: {kind:?}"),
            Self::EndedUnexpectedly => f.write_str("ended unexpectedly"),
            Self::PlayRejected => f.write_str("play-rejection"),
            Self::NetworkRestored => f.write_str("network-restored"),
            Self::Manual => f.write_str("manual retry"),
        }
    }
}

/// The single outstanding hard-retry timer.
#[derive(Debug, Clone, Copy)]
pub struct PendingRetry {
    pub deadline: Instant,
    pub reason: RetryReason,
    pub attempt: u32,
    /// Element position when the retry was scheduled.
    pub position_at_schedule: f64,
}

impl PendingRetry {
    /// Whether playback recovered by itself while the timer was pending.
    #[must_use]
    pub fn self_healed(&self, position_now: f64, element_healthy: bool) -> bool {
        element_healthy && position_now > self.position_at_schedule
    }
}

/// Retry budget bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempt_count: u32,
    pub pending: Option<PendingRetry>,
}

/// Result of asking for a hard retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled { attempt: u32, delay_ms: u64 },
    /// A retry is already pending; the request was ignored.
    AlreadyPending,
    /// Budget exceeded; the controller is now terminal.
    Exhausted { attempts: u32 },
}

/// Result of evaluating a stall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StallPlan {
    /// Seek to the given position and resume.
    Nudge(f64),
    /// Soft recovery does not apply or was tried too often.
    Escalate,
}

/// Policy half of the recovery state machine.
#[derive(Debug)]
pub struct RecoveryController {
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_ratio: f64,
    soft_nudge_secs: f64,
    max_soft_attempts: u32,
    state: RecoveryState,
    retry: RetryState,
    soft_attempts: u32,
    /// Position of the last soft nudge; progress counts only past it.
    nudge_target: Option<f64>,
}

impl RecoveryController {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter_ratio: config.jitter_ratio,
            soft_nudge_secs: config.soft_nudge_secs,
            max_soft_attempts: config.max_soft_attempts,
            state: RecoveryState::Idle,
            retry: RetryState::default(),
            soft_attempts: 0,
            nudge_target: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> RecoveryState {
        self.state
    }

    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.retry.attempt_count
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn pending(&self) -> Option<&PendingRetry> {
        self.retry.pending.as_ref()
    }

    #[must_use]
    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry.pending.map(|p| p.deadline)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state == RecoveryState::Terminal
    }

    /// Clears the budget, the pending timer and soft attempts (new selection, stop).
    pub fn reset(&mut self) {
        self.retry = RetryState::default();
        self.soft_attempts = 0;
        self.nudge_target = None;
        self.state = RecoveryState::Idle;
    }

    /// Playback reached "playing": the budget starts over.
    ///
    /// Soft attempts are kept while a nudge is unconfirmed.
    pub fn on_playing(&mut self) {
        self.retry = RetryState::default();
        self.state = RecoveryState::Idle;
        if self.nudge_target.is_none() {
            self.soft_attempts = 0;
        }
    }

    /// Position report from the element. Returns whether it is real progress.
    ///
    /// Reports at or before the last nudge target are the seek landing, not
    /// playback, and leave soft attempts untouched.
    pub fn on_progress(&mut self, position: f64) -> bool {
        if self.nudge_target.is_some_and(|target| position <= target) {
            return false;
        }
        self.nudge_target = None;
        self.soft_attempts = 0;
        if self.state == RecoveryState::SoftRecovering {
            self.state = RecoveryState::Idle;
        }
        true
    }

    /// Cancels the pending retry without touching the budget (offline).
    pub fn cancel_pending(&mut self) -> bool {
        let had = self.retry.pending.take().is_some();
        if self.state == RecoveryState::HardRetryScheduled {
            self.state = RecoveryState::Idle;
        }
        had
    }

    /// Decides between a soft nudge and escalation for a stall.
    pub fn evaluate_stall(&mut self, position: f64, buffered: &[TimeRange]) -> StallPlan {
        if self.is_terminal() || self.retry.pending.is_some() {
            return StallPlan::Escalate;
        }
        self.state = RecoveryState::Evaluating;
        if self.soft_attempts >= self.max_soft_attempts {
            return StallPlan::Escalate;
        }
        match soft_seek_target(position, buffered, self.soft_nudge_secs) {
            Some(target) => {
                self.soft_attempts += 1;
                self.nudge_target = Some(target);
                self.state = RecoveryState::SoftRecovering;
                StallPlan::Nudge(target)
            }
            None => StallPlan::Escalate,
        }
    }

    /// Requests a hard retry. At most one timer is ever pending.
    ///
    /// `immediate` skips the backoff clock (network restored, manual retry).
    pub fn schedule(
        &mut self,
        reason: RetryReason,
        immediate: bool,
        position: f64,
    ) -> ScheduleOutcome {
        if self.retry.pending.is_some() {
            return ScheduleOutcome::AlreadyPending;
        }
        if self.is_terminal() {
            return ScheduleOutcome::Exhausted {
                attempts: self.max_retries,
            };
        }
        self.state = RecoveryState::Evaluating;

        let attempt = self.retry.attempt_count + 1;
        if attempt > self.max_retries {
            self.retry.attempt_count = attempt;
            self.state = RecoveryState::Terminal;
            return ScheduleOutcome::Exhausted {
                attempts: self.max_retries,
            };
        }
        self.retry.attempt_count = attempt;

        let delay_ms = if immediate {
            0
        } else {
            with_jitter(
                backoff_delay_ms(attempt, self.base_delay_ms, self.max_delay_ms),
                self.jitter_ratio,
            )
        };
        self.retry.pending = Some(PendingRetry {
            deadline: Instant::now() + Duration::from_millis(delay_ms),
            reason,
            attempt,
            position_at_schedule: position,
        });
        self.state = RecoveryState::HardRetryScheduled;
        ScheduleOutcome::Scheduled { attempt, delay_ms }
    }

    /// Takes the pending retry when its timer fires.
    pub fn take_due(&mut self) -> Option<PendingRetry> {
        let pending = self.retry.pending.take()?;
        self.state = RecoveryState::Evaluating;
        Some(pending)
    }

    /// The fired retry was skipped because playback healed itself.
    pub fn mark_self_healed(&mut self) {
        self.state = RecoveryState::Idle;
    }

    /// The fired retry reloaded the source.
    pub fn mark_reloaded(&mut self) {
        self.state = RecoveryState::Idle;
    }

    /// Leaves Terminal with a fresh budget (manual retry, connectivity restored).
    pub fn rearm_budget(&mut self) {
        self.reset();
        self.state = RecoveryState::Evaluating;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_retries: u32) -> EngineConfig {
        EngineConfig {
            max_retries,
            jitter_ratio: 0.0,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let delays: Vec<u64> = (1..=7).map(|n| backoff_delay_ms(n, 1000, 16_000)).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16_000, 16_000, 16_000]);
    }

    #[test]
    fn backoff_is_monotonic_and_bounded() {
        let mut previous = 0;
        for attempt in 1..=64 {
            let d = backoff_delay_ms(attempt, 750, 15_000);
            assert!(d >= previous);
            assert!(d <= 15_000);
            previous = d;
        }
    }

    #[test]
    fn jitter_stays_within_ratio() {
        for _ in 0..200 {
            let d = with_jitter(1000, 0.2);
            assert!((1000..=1200).contains(&d));
        }
        assert_eq!(with_jitter(1000, 0.0), 1000);
    }

    #[test]
    fn soft_target_requires_headroom_inside_a_range() {
        let ranges = [TimeRange::new(0.0, 10.0), TimeRange::new(20.0, 30.0)];
        assert_eq!(soft_seek_target(5.0, &ranges, 0.25), Some(5.25));
        assert_eq!(soft_seek_target(9.9, &ranges, 0.25), None);
        assert_eq!(soft_seek_target(15.0, &ranges, 0.25), None);
        assert_eq!(soft_seek_target(0.0, &ranges, 0.25), None);
        assert_eq!(soft_seek_target(29.75, &ranges, 0.25), Some(30.0));
    }

    #[tokio::test(start_paused = true)]
    async fn second_schedule_while_pending_is_ignored() {
        let mut rc = RecoveryController::new(&config(6));
        assert_eq!(
            rc.schedule(RetryReason::StallTimeout, false, 0.0),
            ScheduleOutcome::Scheduled {
                attempt: 1,
                delay_ms: 1000
            }
        );
        assert_eq!(
            rc.schedule(RetryReason::StalledEvent, false, 0.0),
            ScheduleOutcome::AlreadyPending
        );
        assert_eq!(rc.attempt_count(), 1);
        assert_eq!(rc.state(), RecoveryState::HardRetryScheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhausts_after_max_retries() {
        let mut rc = RecoveryController::new(&config(2));
        for expected in 1..=2 {
            match rc.schedule(RetryReason::MediaError(MediaErrorKind::Network), false, 0.0) {
                ScheduleOutcome::Scheduled { attempt, .. } => assert_eq!(attempt, expected),
                other => panic!("unexpected {other:?}"),
            }
            assert!(rc.take_due().is_some());
            rc.mark_reloaded();
        }
        assert_eq!(
            rc.schedule(RetryReason::MediaError(MediaErrorKind::Network), false, 0.0),
            ScheduleOutcome::Exhausted { attempts: 2 }
        );
        assert!(rc.is_terminal());
        assert!(rc.retry_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn playing_resets_the_budget() {
        let mut rc = RecoveryController::new(&config(6));
        rc.schedule(RetryReason::StallTimeout, false, 0.0);
        rc.take_due();
        rc.schedule(RetryReason::StallTimeout, false, 0.0);
        assert_eq!(rc.attempt_count(), 2);

        rc.on_playing();
        assert_eq!(rc.attempt_count(), 0);
        assert!(rc.pending().is_none());
        assert_eq!(
            rc.schedule(RetryReason::StallTimeout, false, 0.0),
            ScheduleOutcome::Scheduled {
                attempt: 1,
                delay_ms: 1000
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_schedule_has_zero_delay() {
        let mut rc = RecoveryController::new(&config(6));
        assert_eq!(
            rc.schedule(RetryReason::NetworkRestored, true, 0.0),
            ScheduleOutcome::Scheduled {
                attempt: 1,
                delay_ms: 0
            }
        );
        assert_eq!(rc.retry_deadline(), Some(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn soft_attempts_are_bounded_per_stall() {
        let mut rc = RecoveryController::new(&config(6));
        let buffered = [TimeRange::new(0.0, 60.0)];

        assert_eq!(rc.evaluate_stall(10.0, &buffered), StallPlan::Nudge(10.25));
        assert_eq!(rc.evaluate_stall(10.25, &buffered), StallPlan::Nudge(10.5));
        assert_eq!(rc.evaluate_stall(10.5, &buffered), StallPlan::Escalate);

        assert!(rc.on_progress(11.0));
        assert_eq!(rc.evaluate_stall(11.0, &buffered), StallPlan::Nudge(11.25));
    }

    #[tokio::test(start_paused = true)]
    async fn seek_landing_is_not_progress() {
        let mut rc = RecoveryController::new(&config(6));
        let buffered = [TimeRange::new(0.0, 60.0)];

        assert_eq!(rc.evaluate_stall(10.0, &buffered), StallPlan::Nudge(10.25));
        assert!(!rc.on_progress(10.25));
        rc.on_playing();
        assert_eq!(rc.evaluate_stall(10.25, &buffered), StallPlan::Nudge(10.5));
        assert!(!rc.on_progress(10.5));
        assert_eq!(rc.evaluate_stall(10.5, &buffered), StallPlan::Escalate);
    }

    #[test]
    fn pending_retry_detects_self_healing() {
        let pending = PendingRetry {
            deadline: Instant::now(),
            reason: RetryReason::StallTimeout,
            attempt: 1,
            position_at_schedule: 12.0,
        };
        assert!(pending.self_healed(12.5, true));
        assert!(!pending.self_healed(12.5, false));
        assert!(!pending.self_healed(12.0, true));
    }
}
