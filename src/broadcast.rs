//! Result broadcaster and room teardown.
//!
//! The authority announces the round's outcome (or an opponent departure)
//! to every member. Each member, on receipt, schedules its own departure
//! from the room after a grace delay. When two teardowns are requested the
//! earlier deadline wins.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::protocol::{RpcCall, RpcTarget};
use crate::session::SessionCoordinator;
use crate::timer::{Deadline, Resolution};

#[derive(Debug, Default)]
pub struct ResultBroadcaster {
    teardown: Option<Deadline>,
}

impl ResultBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send the round's outcome to every member, the sender included.
    pub fn announce_result(&self, session: &mut SessionCoordinator, resolution: &Resolution) {
        info!(
            outcome = %resolution.outcome,
            source = ?resolution.source,
            "announcing result"
        );
        session.rpc(
            RpcTarget::All,
            RpcCall::AnnounceResult {
                outcome: resolution.outcome.clone(),
            },
        );
    }

    /// Tell every member the other one is gone.
    pub fn announce_opponent_left(&self, session: &mut SessionCoordinator) {
        info!("announcing opponent departure");
        session.rpc(RpcTarget::All, RpcCall::OpponentLeft);
    }

    /// Leave the room `grace` after `now`, unless an earlier teardown is
    /// already pending.
    pub fn schedule_teardown(&mut self, now: Instant, grace: Duration) {
        let candidate = Deadline::after(now, grace);
        match self.teardown.as_ref().and_then(Deadline::pending_at) {
            Some(existing) if existing <= candidate.at() => {
                debug!(?grace, "teardown already scheduled earlier");
            }
            _ => {
                debug!(?grace, "teardown scheduled");
                self.teardown = Some(candidate);
            }
        }
    }

    /// `true` once when the pending teardown is due.
    pub fn poll_teardown(&mut self, now: Instant) -> bool {
        self.teardown
            .as_mut()
            .is_some_and(|deadline| deadline.poll_expired(now))
    }

    pub fn cancel_teardown(&mut self) {
        if let Some(deadline) = self.teardown.as_mut() {
            deadline.cancel();
        }
    }

    pub fn teardown_at(&self) -> Option<Instant> {
        self.teardown.as_ref().and_then(Deadline::pending_at)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::ClientMessage;
    use crate::timer::ResolutionSource;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn earlier_teardown_wins() {
        let t0 = Instant::now();
        let mut b = ResultBroadcaster::new();
        b.schedule_teardown(t0, secs(5));
        b.schedule_teardown(t0 + secs(1), secs(3));
        assert_eq!(b.teardown_at(), Some(t0 + secs(4)));

        b.schedule_teardown(t0 + secs(2), secs(5));
        assert_eq!(b.teardown_at(), Some(t0 + secs(4)));
    }

    #[test]
    fn teardown_fires_once() {
        let t0 = Instant::now();
        let mut b = ResultBroadcaster::new();
        b.schedule_teardown(t0, secs(3));
        assert!(!b.poll_teardown(t0 + secs(2)));
        assert!(b.poll_teardown(t0 + secs(3)));
        assert!(!b.poll_teardown(t0 + secs(4)));
        assert!(b.teardown_at().is_none());
    }

    #[test]
    fn cancelled_teardown_never_fires() {
        let t0 = Instant::now();
        let mut b = ResultBroadcaster::new();
        b.schedule_teardown(t0, secs(3));
        b.cancel_teardown();
        assert!(!b.poll_teardown(t0 + secs(10)));

        b.schedule_teardown(t0 + secs(10), secs(5));
        assert_eq!(b.teardown_at(), Some(t0 + secs(15)));
    }

    #[test]
    fn announcements_go_to_everyone() {
        let mut session = SessionCoordinator::new();
        let b = ResultBroadcaster::new();
        b.announce_result(
            &mut session,
            &Resolution {
                outcome: "Pizza".into(),
                source: ResolutionSource::Vote,
            },
        );
        b.announce_opponent_left(&mut session);
        let out: Vec<_> = session.drain_outgoing().collect();
        assert!(matches!(
            out.as_slice(),
            [
                ClientMessage::Rpc {
                    target: RpcTarget::All,
                    call: RpcCall::AnnounceResult { .. }
                },
                ClientMessage::Rpc {
                    target: RpcTarget::All,
                    call: RpcCall::OpponentLeft
                }
            ]
        ));
    }
}
