//! Cancellable deadlines and the authority's round resolver.
//!
//! Nothing in this module sleeps. Deadlines are plain values owned by their
//! component and polled with the current [`Instant`] by the engine, which
//! runs on a single event loop. The loop asks for the earliest pending
//! instant and wakes up then.

use std::time::{Duration, Instant};

use tracing::debug;

// ── Deadline ────────────────────────────────────────────────────────

/// Longest offset a deadline is armed with; longer delays saturate here.
pub const MAX_DEADLINE_OFFSET: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeadlineState {
    Armed,
    Fired,
    Cancelled,
}

/// A one-shot deadline that can be cancelled.
///
/// [`poll_expired`](Deadline::poll_expired) reports expiry exactly once.
/// Cancelling a fired or already-cancelled deadline is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    state: DeadlineState,
}

impl Deadline {
    /// Arm a deadline `delay` after `now`, saturating at
    /// [`MAX_DEADLINE_OFFSET`].
    pub fn after(now: Instant, delay: Duration) -> Self {
        let at = now
            .checked_add(delay.min(MAX_DEADLINE_OFFSET))
            .or_else(|| now.checked_add(Duration::from_secs(u64::from(u32::MAX))))
            .unwrap_or(now);
        Self {
            at,
            state: DeadlineState::Armed,
        }
    }

    /// The instant this deadline fires at.
    pub fn at(&self) -> Instant {
        self.at
    }

    /// `true` until the deadline fires or is cancelled.
    pub fn is_armed(&self) -> bool {
        self.state == DeadlineState::Armed
    }

    pub fn cancel(&mut self) {
        if self.state == DeadlineState::Armed {
            self.state = DeadlineState::Cancelled;
        }
    }

    /// Time left before firing, zero once passed.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.at.saturating_duration_since(now)
    }

    /// Returns `true` the first time this is polled at or after the deadline
    /// while still armed, and `false` on every other call.
    pub fn poll_expired(&mut self, now: Instant) -> bool {
        if self.state == DeadlineState::Armed && now >= self.at {
            self.state = DeadlineState::Fired;
            true
        } else {
            false
        }
    }

    /// The instant to wake up for, if still armed.
    pub fn pending_at(&self) -> Option<Instant> {
        self.is_armed().then_some(self.at)
    }
}

// ── Countdown (display) ─────────────────────────────────────────────

/// Whole-second countdown feeding the presentation timer.
///
/// Reports the ceiling of the remaining seconds each time it changes,
/// ending with `0`.
#[derive(Debug, Clone)]
pub struct Countdown {
    deadline: Deadline,
    last_reported: Option<u64>,
}

impl Countdown {
    pub fn start(now: Instant, duration: Duration) -> Self {
        Self {
            deadline: Deadline::after(now, duration),
            last_reported: None,
        }
    }

    /// New whole-seconds value if it changed since the last report.
    pub fn tick(&mut self, now: Instant) -> Option<u64> {
        if !self.deadline.is_armed() {
            return None;
        }
        let secs = ceil_secs(self.deadline.remaining(now));
        if self.last_reported == Some(secs) {
            return None;
        }
        self.last_reported = Some(secs);
        if secs == 0 {
            self.deadline.cancel();
        }
        Some(secs)
    }

    /// Instant at which the reported value next changes.
    pub fn next_wakeup(&self, now: Instant) -> Option<Instant> {
        if !self.deadline.is_armed() {
            return None;
        }
        let secs = ceil_secs(self.deadline.remaining(now));
        if self.last_reported != Some(secs) {
            return Some(now);
        }
        let at = self.deadline.at();
        Some(
            at.checked_sub(Duration::from_secs(secs.saturating_sub(1)))
                .unwrap_or(at),
        )
    }

    pub fn stop(&mut self) {
        self.deadline.cancel();
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

// ── VoteTimer ───────────────────────────────────────────────────────

/// Which source decided a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Vote,
    Timeout,
}

/// The single outcome of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub outcome: String,
    pub source: ResolutionSource,
}

/// Authority-side race between the participant's vote and the countdown.
///
/// Each round resolves at most once. After resolution (or
/// [`abort`](VoteTimer::abort)) every further vote or expiry is ignored.
#[derive(Debug, Default)]
pub struct VoteTimer {
    countdown: Option<Deadline>,
    recorded_vote: Option<String>,
    round_open: bool,
    resolved: bool,
}

impl VoteTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a round: clear the recorded vote and arm a single countdown,
    /// replacing any previous one.
    pub fn start_round(&mut self, now: Instant, duration: Duration) {
        if let Some(previous) = self.countdown.as_mut() {
            previous.cancel();
        }
        self.countdown = Some(Deadline::after(now, duration));
        self.recorded_vote = None;
        self.round_open = true;
        self.resolved = false;
        debug!(?duration, "vote timer: round started");
    }

    /// Record the participant's vote. The first vote of an open round wins,
    /// cancels the countdown and resolves the round.
    pub fn submit_vote(&mut self, item: &str) -> Option<Resolution> {
        if !self.round_open || self.resolved {
            debug!(item, "vote timer: vote ignored, round not open");
            return None;
        }
        if let Some(countdown) = self.countdown.as_mut() {
            countdown.cancel();
        }
        self.recorded_vote = Some(item.to_string());
        self.resolved = true;
        debug!(item, "vote timer: resolved by vote");
        Some(Resolution {
            outcome: item.to_string(),
            source: ResolutionSource::Vote,
        })
    }

    /// Resolve on countdown expiry. Falls back to `no_selection` when no
    /// vote was recorded.
    pub fn poll_expiry(&mut self, now: Instant, no_selection: &str) -> Option<Resolution> {
        let expired = self
            .countdown
            .as_mut()
            .is_some_and(|countdown| countdown.poll_expired(now));
        if !expired || !self.round_open || self.resolved {
            return None;
        }
        self.resolved = true;
        let outcome = self
            .recorded_vote
            .clone()
            .unwrap_or_else(|| no_selection.to_string());
        debug!(%outcome, "vote timer: resolved by timeout");
        Some(Resolution {
            outcome,
            source: ResolutionSource::Timeout,
        })
    }

    /// End the round without an outcome.
    pub fn abort(&mut self) {
        if let Some(countdown) = self.countdown.as_mut() {
            countdown.cancel();
        }
        if self.round_open && !self.resolved {
            debug!("vote timer: round aborted");
        }
        self.resolved = true;
    }

    /// Forget everything, ready for a new room.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn recorded_vote(&self) -> Option<&str> {
        self.recorded_vote.as_deref()
    }

    /// Instant of the pending countdown, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.countdown.as_ref().and_then(Deadline::pending_at)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    const SENTINEL: &str = "no selection";

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn deadline_fires_once() {
        let t0 = Instant::now();
        let mut d = Deadline::after(t0, secs(3));
        assert!(!d.poll_expired(t0 + secs(2)));
        assert!(d.poll_expired(t0 + secs(3)));
        assert!(!d.poll_expired(t0 + secs(4)));
        assert!(d.pending_at().is_none());
    }

    #[test]
    fn oversized_delay_saturates_instead_of_overflowing() {
        let t0 = Instant::now();
        let mut d = Deadline::after(t0, Duration::MAX);
        assert!(d.is_armed());
        assert!(d.at() > t0 + secs(3600));
        assert!(!d.poll_expired(t0 + secs(3600)));

        let mut countdown = Countdown::start(t0, Duration::MAX);
        assert!(countdown.tick(t0).is_some());
        assert!(countdown.next_wakeup(t0).is_some());
    }

    #[test]
    fn cancel_is_idempotent() {
        let t0 = Instant::now();
        let mut d = Deadline::after(t0, secs(1));
        d.cancel();
        d.cancel();
        assert!(!d.poll_expired(t0 + secs(5)));

        let mut fired = Deadline::after(t0, secs(1));
        assert!(fired.poll_expired(t0 + secs(1)));
        fired.cancel();
        assert!(!fired.is_armed());
    }

    #[test]
    fn vote_before_expiry_wins_and_timer_never_fires() {
        let t0 = Instant::now();
        for vote_at in [0u64, 1, 5, 29] {
            let mut timer = VoteTimer::new();
            timer.start_round(t0, secs(30));
            let _ = timer.poll_expiry(t0 + secs(vote_at), SENTINEL);
            let resolution = timer.submit_vote("Pizza").unwrap();
            assert_eq!(resolution.outcome, "Pizza");
            assert_eq!(resolution.source, ResolutionSource::Vote);
            assert!(timer.next_deadline().is_none());
            assert!(timer.poll_expiry(t0 + secs(30), SENTINEL).is_none());
            assert!(timer.poll_expiry(t0 + secs(60), SENTINEL).is_none());
        }
    }

    #[test]
    fn expiry_without_vote_yields_sentinel() {
        let t0 = Instant::now();
        let mut timer = VoteTimer::new();
        timer.start_round(t0, secs(30));
        assert!(timer.poll_expiry(t0 + secs(29), SENTINEL).is_none());
        let resolution = timer.poll_expiry(t0 + secs(30), SENTINEL).unwrap();
        assert_eq!(resolution.outcome, SENTINEL);
        assert_eq!(resolution.source, ResolutionSource::Timeout);
    }

    #[test]
    fn resolution_is_idempotent() {
        let t0 = Instant::now();
        let mut timer = VoteTimer::new();
        timer.start_round(t0, secs(10));
        assert!(!timer.is_resolved());
        assert!(timer.submit_vote("Sushi").is_some());
        assert!(timer.is_resolved());
        assert!(timer.submit_vote("Pizza").is_none());
        assert_eq!(timer.recorded_vote(), Some("Sushi"));
        assert!(timer.poll_expiry(t0 + secs(10), SENTINEL).is_none());
    }

    #[test]
    fn vote_without_open_round_is_ignored() {
        let mut timer = VoteTimer::new();
        assert!(timer.submit_vote("Pizza").is_none());
        assert!(timer.recorded_vote().is_none());
    }

    #[test]
    fn aborted_round_never_resolves() {
        let t0 = Instant::now();
        let mut timer = VoteTimer::new();
        timer.start_round(t0, secs(10));
        timer.abort();
        assert!(timer.submit_vote("Pizza").is_none());
        assert!(timer.poll_expiry(t0 + secs(10), SENTINEL).is_none());
    }

    #[test]
    fn restart_replaces_previous_countdown() {
        let t0 = Instant::now();
        let mut timer = VoteTimer::new();
        timer.start_round(t0, secs(5));
        timer.start_round(t0 + secs(1), secs(30));
        assert!(timer.poll_expiry(t0 + secs(5), SENTINEL).is_none());
        assert_eq!(timer.next_deadline(), Some(t0 + secs(31)));
    }

    #[test]
    fn countdown_reports_each_second_then_zero() {
        let t0 = Instant::now();
        let mut countdown = Countdown::start(t0, secs(3));
        assert_eq!(countdown.tick(t0), Some(3));
        assert_eq!(countdown.tick(t0), None);
        assert_eq!(countdown.next_wakeup(t0), Some(t0 + secs(1)));
        assert_eq!(countdown.tick(t0 + Duration::from_millis(999)), None);
        assert_eq!(countdown.tick(t0 + secs(1)), Some(2));
        assert_eq!(countdown.tick(t0 + secs(2)), Some(1));
        assert_eq!(countdown.next_wakeup(t0 + secs(2)), Some(t0 + secs(3)));
        assert_eq!(countdown.tick(t0 + secs(3)), Some(0));
        assert_eq!(countdown.tick(t0 + secs(4)), None);
        assert!(countdown.next_wakeup(t0 + secs(4)).is_none());
    }

    #[test]
    fn fractional_duration_rounds_up() {
        let t0 = Instant::now();
        let mut countdown = Countdown::start(t0, Duration::from_millis(2500));
        assert_eq!(countdown.tick(t0), Some(3));
        assert_eq!(countdown.next_wakeup(t0), Some(t0 + Duration::from_millis(500)));
    }
}
