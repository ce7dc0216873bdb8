//! Voting state machine.
//!
//! Tracks the local [`Phase`], the display countdown and the participant's
//! own selection. The round itself is started by the room authority: once
//! the room is full it flips the room status to `playing` and broadcasts
//! `StartVoting`, and every member (authority included) enters
//! [`Phase::Voting`] when that broadcast arrives.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{MAX_VOTE_DURATION, MIN_VOTE_DURATION};
use crate::event::{PollEvent, Presenter};
use crate::phase::Phase;
use crate::protocol::{PollItems, RoomStatus, RpcCall, RpcTarget, SignIndex};
use crate::session::SessionCoordinator;
use crate::timer::{Countdown, Deadline};

/// Parameters of a round accepted from `StartVoting`.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundStart {
    pub duration: Duration,
    pub items: PollItems,
}

/// Local phase plus per-round presentation state.
#[derive(Debug, Default)]
pub struct VotingStateMachine {
    phase: Phase,
    countdown: Option<Countdown>,
    selection: Option<SignIndex>,
    vote_sent: bool,
    auto_submit: Option<Deadline>,
}

impl VotingStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The participant's highlighted sign in the current round.
    pub fn selection(&self) -> Option<SignIndex> {
        self.selection
    }

    pub fn vote_sent(&self) -> bool {
        self.vote_sent
    }

    /// Move to `next` if the poll cycle allows it, publishing the change.
    pub fn transition<P: Presenter>(
        &mut self,
        next: Phase,
        items: Option<&PollItems>,
        presenter: &mut P,
    ) -> bool {
        if !self.phase.can_transition_to(next) {
            debug!(from = ?self.phase, to = ?next, "phase transition refused");
            return false;
        }
        debug!(from = ?self.phase, to = ?next, "phase transition");
        if next != Phase::Voting && next != Phase::Results {
            self.end_round();
        }
        self.phase = next;
        presenter.publish(PollEvent::phase_changed(next, items));
        true
    }

    /// Fall back to [`Phase::MainMenu`]. No-op when already there.
    pub fn return_to_menu<P: Presenter>(&mut self, presenter: &mut P) -> bool {
        self.end_round();
        self.transition(Phase::MainMenu, None, presenter)
    }

    /// Re-publish the current phase with newly known items.
    pub fn republish<P: Presenter>(&self, items: Option<&PollItems>, presenter: &mut P) {
        presenter.publish(PollEvent::phase_changed(self.phase, items));
    }

    // ── Authority ───────────────────────────────────────────────────

    /// Start the room's round: `status=playing` then `StartVoting` to all,
    /// in that order. Only the authority of a full room waiting for its
    /// round does anything here, and only once per room.
    pub fn broadcast_start(&self, session: &mut SessionCoordinator, duration: Duration) -> bool {
        if self.phase != Phase::WaitingForPlayer || !session.voting_can_start() {
            return false;
        }
        let Some(items) = session.poll_items().cloned() else {
            warn!("room is full but has no poll items, round not started");
            return false;
        };
        if !session.mark_voting_started() {
            return false;
        }
        session.set_room_status(RoomStatus::Playing);
        session.rpc(
            RpcTarget::All,
            RpcCall::StartVoting {
                duration: duration.as_secs_f64(),
                item_a: items.item_a,
                item_b: items.item_b,
            },
        );
        info!(?duration, "room full, voting started");
        true
    }

    // ── All members ─────────────────────────────────────────────────

    /// Handle a `StartVoting` broadcast.
    ///
    /// Ignored unless it comes from the room authority while this member is
    /// waiting for the round; a replay during `Voting` or `Results` is
    /// therefore dropped.
    pub fn on_start_voting<P: Presenter>(
        &mut self,
        now: Instant,
        from_authority: bool,
        duration_secs: f64,
        item_a: &str,
        item_b: &str,
        presenter: &mut P,
    ) -> Option<RoundStart> {
        if !from_authority {
            warn!("StartVoting from a non-authority member ignored");
            return None;
        }
        if self.phase != Phase::WaitingForPlayer {
            debug!(phase = ?self.phase, "StartVoting ignored outside WaitingForPlayer");
            return None;
        }
        let duration = match Duration::try_from_secs_f64(duration_secs) {
            Ok(d) if !d.is_zero() && d <= MAX_VOTE_DURATION => d.max(MIN_VOTE_DURATION),
            _ => {
                warn!(duration_secs, "StartVoting with invalid duration ignored");
                return None;
            }
        };
        let items = match PollItems::new(item_a, item_b) {
            Ok(items) => items,
            Err(e) => {
                warn!("StartVoting with invalid items ignored: {e}");
                return None;
            }
        };

        self.transition(Phase::Voting, Some(&items), presenter);
        self.selection = None;
        self.vote_sent = false;
        self.auto_submit = None;
        self.countdown = Some(Countdown::start(now, duration));
        self.tick(now, presenter);
        Some(RoundStart { duration, items })
    }

    /// Handle `AnnounceResult`. Only the first announcement of a round while
    /// [`Phase::Voting`] counts.
    pub fn on_result<P: Presenter>(
        &mut self,
        outcome: &str,
        items: Option<&PollItems>,
        presenter: &mut P,
    ) -> bool {
        if self.phase != Phase::Voting {
            debug!(phase = ?self.phase, outcome, "AnnounceResult ignored outside Voting");
            return false;
        }
        self.stop_clocks();
        self.transition(Phase::Results, items, presenter);
        presenter.publish(PollEvent::ResultAnnounced {
            outcome: outcome.to_string(),
        });
        true
    }

    /// Stop the display countdown and any pending auto-submit.
    pub fn interrupt(&mut self) {
        self.stop_clocks();
    }

    // ── Participant ─────────────────────────────────────────────────

    pub fn select(&mut self, index: SignIndex) {
        self.selection = Some(index);
    }

    /// Record that this member's single vote of the round went out. Returns
    /// `false` if it already had.
    pub fn mark_vote_sent(&mut self) -> bool {
        if self.vote_sent {
            return false;
        }
        self.vote_sent = true;
        if let Some(deadline) = self.auto_submit.as_mut() {
            deadline.cancel();
        }
        true
    }

    /// Arm the auto-submit `lead` before a round of `duration` ends.
    pub fn arm_auto_submit(&mut self, now: Instant, duration: Duration, lead: Duration) {
        self.auto_submit = Some(Deadline::after(now, duration.saturating_sub(lead)));
    }

    /// `true` once when the auto-submit deadline passes without a vote.
    pub fn poll_auto_submit(&mut self, now: Instant) -> bool {
        let due = self
            .auto_submit
            .as_mut()
            .is_some_and(|deadline| deadline.poll_expired(now));
        due && self.phase == Phase::Voting && !self.vote_sent
    }

    // ── Clock ───────────────────────────────────────────────────────

    /// Publish a [`PollEvent::TimerTick`] if the displayed seconds changed.
    pub fn tick<P: Presenter>(&mut self, now: Instant, presenter: &mut P) {
        if let Some(remaining_secs) = self.countdown.as_mut().and_then(|c| c.tick(now)) {
            presenter.publish(PollEvent::TimerTick { remaining_secs });
        }
    }

    /// Earliest instant at which [`tick`](Self::tick) or
    /// [`poll_auto_submit`](Self::poll_auto_submit) has work.
    pub fn next_wakeup(&self, now: Instant) -> Option<Instant> {
        let tick = self.countdown.as_ref().and_then(|c| c.next_wakeup(now));
        let submit = self.auto_submit.as_ref().and_then(Deadline::pending_at);
        match (tick, submit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn stop_clocks(&mut self) {
        if let Some(countdown) = self.countdown.as_mut() {
            countdown.stop();
        }
        if let Some(deadline) = self.auto_submit.as_mut() {
            deadline.cancel();
        }
    }

    fn end_round(&mut self) {
        self.stop_clocks();
        self.countdown = None;
        self.auto_submit = None;
        self.selection = None;
        self.vote_sent = false;
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::{ClientMessage, ParticipantInfo, RoomJoinedPayload, RoomProperties, ServerMessage};
    use uuid::Uuid;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn waiting() -> VotingStateMachine {
        let mut vsm = VotingStateMachine::new();
        let mut feed = Vec::new();
        assert!(vsm.transition(Phase::WaitingForPlayer, None, &mut feed));
        vsm
    }

    fn full_room_as_authority() -> SessionCoordinator {
        let items = PollItems::new("Pizza", "Sushi").unwrap();
        let mut s = SessionCoordinator::new();
        s.handle(&ServerMessage::ConnectedToMaster {
            player_id: Uuid::from_u128(1),
        });
        s.create_session(items.clone()).unwrap();
        s.handle(&ServerMessage::RoomCreated(Box::new(RoomJoinedPayload {
            room_id: Uuid::from_u128(9),
            room_name: "r".into(),
            player_id: Uuid::from_u128(1),
            max_players: 2,
            properties: RoomProperties::for_poll(&items),
            members: vec![ParticipantInfo {
                id: Uuid::from_u128(1),
                name: "a".into(),
                actor_number: 1,
            }],
        })));
        s.handle(&ServerMessage::PlayerEntered {
            player: ParticipantInfo {
                id: Uuid::from_u128(2),
                name: "b".into(),
                actor_number: 2,
            },
        });
        s.drain_outgoing().for_each(drop);
        s
    }

    #[test]
    fn broadcast_start_orders_status_before_rpc_and_runs_once() {
        let vsm = waiting();
        let mut session = full_room_as_authority();
        assert!(vsm.broadcast_start(&mut session, secs(30)));
        assert!(!vsm.broadcast_start(&mut session, secs(30)));

        let out: Vec<_> = session.drain_outgoing().collect();
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], ClientMessage::SetRoomProperties { .. }));
        let ClientMessage::Rpc { target, call } = &out[1] else {
            panic!("expected Rpc, got {:?}", out[1]);
        };
        assert_eq!(*target, RpcTarget::All);
        assert_eq!(
            *call,
            RpcCall::StartVoting {
                duration: 30.0,
                item_a: "Pizza".into(),
                item_b: "Sushi".into(),
            }
        );
    }

    #[test]
    fn start_voting_enters_voting_once() {
        let t0 = Instant::now();
        let mut vsm = waiting();
        let mut feed = Vec::new();
        let round = vsm
            .on_start_voting(t0, true, 30.0, "Pizza", "Sushi", &mut feed)
            .unwrap();
        assert_eq!(round.duration, secs(30));
        assert_eq!(vsm.phase(), Phase::Voting);
        assert!(feed.contains(&PollEvent::TimerTick { remaining_secs: 30 }));

        feed.clear();
        assert!(vsm
            .on_start_voting(t0 + secs(1), true, 30.0, "Pizza", "Sushi", &mut feed)
            .is_none());
        assert!(feed.is_empty());
    }

    #[test]
    fn start_voting_from_non_authority_is_ignored() {
        let mut vsm = waiting();
        let mut feed = Vec::new();
        assert!(vsm
            .on_start_voting(Instant::now(), false, 30.0, "Pizza", "Sushi", &mut feed)
            .is_none());
        assert_eq!(vsm.phase(), Phase::WaitingForPlayer);
    }

    #[test]
    fn start_voting_with_bad_duration_is_ignored() {
        let mut vsm = waiting();
        let mut feed = Vec::new();
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e19, f64::MAX] {
            assert!(vsm
                .on_start_voting(Instant::now(), true, bad, "Pizza", "Sushi", &mut feed)
                .is_none());
        }
        assert_eq!(vsm.phase(), Phase::WaitingForPlayer);
    }

    #[test]
    fn result_moves_to_results_and_stops_ticks() {
        let t0 = Instant::now();
        let mut vsm = waiting();
        let mut feed = Vec::new();
        vsm.on_start_voting(t0, true, 30.0, "Pizza", "Sushi", &mut feed);
        assert!(vsm.on_result("Pizza", None, &mut feed));
        assert!(!vsm.on_result("Sushi", None, &mut feed));
        assert_eq!(vsm.phase(), Phase::Results);
        assert!(feed.contains(&PollEvent::ResultAnnounced {
            outcome: "Pizza".into()
        }));
        assert!(vsm.next_wakeup(t0 + secs(1)).is_none());
    }

    #[test]
    fn auto_submit_fires_once_before_round_end() {
        let t0 = Instant::now();
        let mut vsm = waiting();
        let mut feed = Vec::new();
        vsm.on_start_voting(t0, true, 10.0, "Pizza", "Sushi", &mut feed);
        vsm.arm_auto_submit(t0, secs(10), secs(1));
        assert!(!vsm.poll_auto_submit(t0 + secs(8)));
        assert!(vsm.poll_auto_submit(t0 + secs(9)));
        assert!(!vsm.poll_auto_submit(t0 + secs(9)));
    }

    #[test]
    fn manual_vote_disarms_auto_submit() {
        let t0 = Instant::now();
        let mut vsm = waiting();
        let mut feed = Vec::new();
        vsm.on_start_voting(t0, true, 10.0, "Pizza", "Sushi", &mut feed);
        vsm.arm_auto_submit(t0, secs(10), secs(1));
        assert!(vsm.mark_vote_sent());
        assert!(!vsm.mark_vote_sent());
        assert!(!vsm.poll_auto_submit(t0 + secs(9)));
    }

    #[test]
    fn return_to_menu_clears_round() {
        let t0 = Instant::now();
        let mut vsm = waiting();
        let mut feed = Vec::new();
        vsm.on_start_voting(t0, true, 10.0, "Pizza", "Sushi", &mut feed);
        vsm.select(SignIndex::B);
        assert!(vsm.return_to_menu(&mut feed));
        assert_eq!(vsm.phase(), Phase::MainMenu);
        assert!(vsm.selection().is_none());
        assert!(vsm.next_wakeup(t0).is_none());
        assert!(!vsm.return_to_menu(&mut feed));
    }
}
