//! The poll engine.
//!
//! [`PollEngine`] composes the session coordinator, the voting state
//! machine, the vote timer and the result broadcaster. It is synchronous and
//! performs no I/O: every call receives the current [`Instant`], inbound
//! messages are passed in, outbound messages are drained with
//! [`drain_outgoing`](PollEngine::drain_outgoing), and presentation goes to
//! an injected [`Presenter`]. The async client drives one engine from a
//! single loop, so calls never overlap.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::broadcast::ResultBroadcaster;
use crate::config::PollConfig;
use crate::error::{FailureKind, PollError, Result};
use crate::event::{PollEvent, Presenter};
use crate::phase::{Phase, Role};
use crate::protocol::{
    ClientMessage, PlayerId, PollItems, RpcCall, RpcTarget, ServerMessage, SignIndex,
    POLL_ROOM_CAPACITY,
};
use crate::session::{CancelOutcome, LeaveOutcome, SessionCoordinator, SessionUpdate};
use crate::timer::{ResolutionSource, VoteTimer};
use crate::voting::VotingStateMachine;

// ── Intents ─────────────────────────────────────────────────────────

/// A local user intent.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    BeginPollCreation,
    BackToMenu,
    /// Raw item labels; validated when applied.
    CreateSession { item_a: String, item_b: String },
    FindSession,
    CancelPendingCreation,
    LeaveSession,
    SubmitVote(String),
    SelectSign(SignIndex),
}

impl Intent {
    /// Operation name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeginPollCreation => "begin_poll_creation",
            Self::BackToMenu => "back_to_menu",
            Self::CreateSession { .. } => "create_session",
            Self::FindSession => "find_session",
            Self::CancelPendingCreation => "cancel_pending_creation",
            Self::LeaveSession => "leave_session",
            Self::SubmitVote(_) => "submit_vote",
            Self::SelectSign(_) => "select_sign",
        }
    }

    /// Preconditions that depend only on published state.
    ///
    /// # Errors
    ///
    /// [`PollError::InvalidPhase`] when `phase` does not accept the intent,
    /// [`PollError::NotReady`] for network intents while not connected, and
    /// [`PollError::NotPermitted`] when the authority tries to vote.
    pub fn check(&self, phase: Phase, ready: bool, role: Option<Role>) -> Result<()> {
        let phase_ok = match self {
            Self::BeginPollCreation | Self::FindSession => phase == Phase::MainMenu,
            Self::BackToMenu => phase == Phase::CreatingPoll,
            Self::CreateSession { .. } => {
                matches!(phase, Phase::MainMenu | Phase::CreatingPoll)
            }
            Self::CancelPendingCreation => phase == Phase::WaitingForPlayer,
            Self::LeaveSession => true,
            Self::SubmitVote(_) | Self::SelectSign(_) => phase == Phase::Voting,
        };
        if !phase_ok {
            return Err(PollError::InvalidPhase {
                operation: self.name(),
                phase,
            });
        }
        if matches!(self, Self::CreateSession { .. } | Self::FindSession) && !ready {
            return Err(PollError::NotReady);
        }
        if matches!(self, Self::SubmitVote(_)) && role == Some(Role::Authority) {
            return Err(PollError::NotPermitted {
                operation: self.name(),
                role: Role::Authority,
            });
        }
        Ok(())
    }
}

/// Popup shown when a local intent is refused, if the refusal warrants one.
pub fn rejection_popup(err: &PollError) -> Option<&'static str> {
    match err {
        PollError::NotReady => {
            Some("Not connected to the server yet. Please try again in a moment.")
        }
        PollError::Validation(_) => Some("Please fill in both poll items."),
        _ => None,
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// One participant's protocol engine.
#[derive(Debug)]
pub struct PollEngine<P: Presenter> {
    config: PollConfig,
    session: SessionCoordinator,
    voting: VotingStateMachine,
    timer: VoteTimer,
    broadcaster: ResultBroadcaster,
    presenter: P,
    peer_departed: bool,
}

impl<P: Presenter> PollEngine<P> {
    pub fn new(config: PollConfig, presenter: P) -> Self {
        Self {
            config,
            session: SessionCoordinator::new(),
            voting: VotingStateMachine::new(),
            timer: VoteTimer::new(),
            broadcaster: ResultBroadcaster::new(),
            presenter,
            peer_departed: false,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.voting.phase()
    }

    pub fn session(&self) -> &SessionCoordinator {
        &self.session
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Messages produced since the last drain, in send order.
    pub fn drain_outgoing(&mut self) -> Vec<ClientMessage> {
        self.session.drain_outgoing().collect()
    }

    /// Earliest instant at which [`on_tick`](Self::on_tick) has work.
    pub fn next_wakeup(&self, now: Instant) -> Option<Instant> {
        [
            self.timer.next_deadline(),
            self.voting.next_wakeup(now),
            self.broadcaster.teardown_at(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // ── Local intents ───────────────────────────────────────────────

    /// Queue the opening handshake.
    pub fn connect(&mut self) {
        self.session
            .connect(&self.config.player_name, self.config.sdk_version.clone());
        self.status("Connecting...");
    }

    pub fn begin_poll_creation(&mut self) -> Result<()> {
        self.apply(Intent::BeginPollCreation)
    }

    pub fn back_to_menu(&mut self) -> Result<()> {
        self.apply(Intent::BackToMenu)
    }

    pub fn create_session(
        &mut self,
        item_a: impl Into<String>,
        item_b: impl Into<String>,
    ) -> Result<()> {
        self.apply(Intent::CreateSession {
            item_a: item_a.into(),
            item_b: item_b.into(),
        })
    }

    pub fn find_session(&mut self) -> Result<()> {
        self.apply(Intent::FindSession)
    }

    pub fn cancel_pending_creation(&mut self) -> Result<()> {
        self.apply(Intent::CancelPendingCreation)
    }

    /// Leave the room or pending request. Accepted in every phase.
    pub fn leave_session(&mut self) {
        self.leave();
    }

    pub fn submit_vote(&mut self, item: impl Into<String>) -> Result<()> {
        self.apply(Intent::SubmitVote(item.into()))
    }

    pub fn select_sign(&mut self, index: SignIndex) -> Result<()> {
        self.apply(Intent::SelectSign(index))
    }

    /// Run a local intent.
    ///
    /// # Errors
    ///
    /// [`PollError::Validation`] for blank poll items, then everything
    /// [`Intent::check`] returns. [`PollError::InvalidPhase`] is also
    /// returned when there is no pending creation to cancel.
    pub fn apply(&mut self, intent: Intent) -> Result<()> {
        if let Intent::CreateSession { item_a, item_b } = &intent {
            if let Err(err) = PollItems::new(item_a.as_str(), item_b.as_str()) {
                self.reject(&err);
                return Err(err);
            }
        }
        if let Err(err) = intent.check(
            self.phase(),
            self.session.is_ready(),
            self.session.local_role(),
        ) {
            self.reject(&err);
            return Err(err);
        }
        match intent {
            Intent::BeginPollCreation => {
                self.voting
                    .transition(Phase::CreatingPoll, None, &mut self.presenter);
                self.status("Enter two poll items.");
            }
            Intent::BackToMenu => {
                self.voting.return_to_menu(&mut self.presenter);
            }
            Intent::CreateSession { item_a, item_b } => {
                let items = PollItems::new(item_a, item_b)?;
                if let Err(err) = self.session.create_session(items.clone()) {
                    self.reject(&err);
                    return Err(err);
                }
                self.voting
                    .transition(Phase::WaitingForPlayer, Some(&items), &mut self.presenter);
                self.status("Creating poll room...");
            }
            Intent::FindSession => {
                if let Err(err) = self.session.find_session() {
                    self.reject(&err);
                    return Err(err);
                }
                self.voting
                    .transition(Phase::WaitingForPlayer, None, &mut self.presenter);
                self.status("Searching for an open poll...");
            }
            Intent::CancelPendingCreation => match self.session.cancel_pending_creation() {
                Some(outcome) => {
                    self.voting.return_to_menu(&mut self.presenter);
                    self.status(match outcome {
                        CancelOutcome::AwaitingAck => "Cancelling poll creation...",
                        CancelOutcome::LeavingRoom => "Poll cancelled. Leaving room...",
                    });
                }
                None => {
                    let err = PollError::InvalidPhase {
                        operation: "cancel_pending_creation",
                        phase: self.phase(),
                    };
                    self.reject(&err);
                    return Err(err);
                }
            },
            Intent::LeaveSession => self.leave(),
            Intent::SubmitVote(item) => self.send_vote(item),
            Intent::SelectSign(index) => self.send_selection(index),
        }
        Ok(())
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Feed one message from the session provider.
    pub fn handle_server_message(&mut self, now: Instant, msg: &ServerMessage) {
        match self.session.handle(msg) {
            SessionUpdate::Connected { .. } => self.status("Connected. Joining lobby..."),
            SessionUpdate::LobbyJoined => {
                let idle = !self.session.in_room() && !self.session.request_pending();
                if idle && self.phase() != Phase::CreatingPoll {
                    self.voting.return_to_menu(&mut self.presenter);
                }
                self.status("Ready. Create a poll or join one.");
            }
            SessionUpdate::RoomCreated { room_name } => {
                self.peer_departed = false;
                self.status(format!(
                    "Poll room '{room_name}' created. Waiting for an opponent (1/{POLL_ROOM_CAPACITY})..."
                ));
                self.try_start_round();
            }
            SessionUpdate::CreationCancelled => self.status("Poll creation cancelled."),
            SessionUpdate::CreateFailed(err) => self.fail(&err),
            SessionUpdate::RoomJoined {
                room_name,
                items,
                member_count,
            } => {
                self.peer_departed = false;
                self.voting.republish(Some(&items), &mut self.presenter);
                self.status(format!(
                    "Joined '{room_name}' ({member_count}/{POLL_ROOM_CAPACITY}). Waiting for the vote to start..."
                ));
                self.try_start_round();
            }
            SessionUpdate::JoinCancelled => debug!("cancelled join answered"),
            SessionUpdate::JoinFailed(err) => {
                if matches!(err, PollError::NoMatch { .. }) {
                    self.presenter
                        .publish(PollEvent::popup("No open poll found. Create one!"));
                }
                self.fail(&err);
            }
            SessionUpdate::MemberJoined { member_count } => {
                self.status(format!(
                    "Opponent joined ({member_count}/{POLL_ROOM_CAPACITY})."
                ));
                self.try_start_round();
            }
            SessionUpdate::PeerLeft { .. } => {
                self.status("Your opponent left the room.");
                if self.phase().interrupted_by_peer_departure() {
                    self.broadcaster.announce_opponent_left(&mut self.session);
                }
            }
            SessionUpdate::LeftRoom => {
                self.broadcaster.cancel_teardown();
                self.timer.reset();
                self.peer_departed = false;
                self.voting.return_to_menu(&mut self.presenter);
                self.status("Left the room.");
            }
            SessionUpdate::PropertiesChanged => debug!("room properties updated"),
            SessionUpdate::Rpc {
                from,
                from_authority,
                target,
                call,
            } => self.on_rpc(now, from, from_authority, target, call),
            SessionUpdate::ProviderError { message, .. } => {
                self.status(format!("Server error: {message}"));
            }
            SessionUpdate::Ignored => {}
        }
    }

    /// The transport dropped: forget the session and fall back to the menu.
    pub fn on_disconnected(&mut self, reason: Option<&str>) {
        self.session.on_disconnected();
        self.timer.reset();
        self.broadcaster.cancel_teardown();
        self.peer_departed = false;
        self.voting.return_to_menu(&mut self.presenter);
        let reason = reason.unwrap_or("connection closed").to_string();
        self.status(format!("Disconnected: {reason}"));
        self.presenter.publish(PollEvent::SessionFailed {
            kind: FailureKind::Disconnected,
            reason,
        });
    }

    /// Fire whatever deadlines are due at `now`.
    pub fn on_tick(&mut self, now: Instant) {
        if let Some(resolution) = self.timer.poll_expiry(now, &self.config.no_selection_label) {
            if self.phase() == Phase::Voting && self.session.is_authority() {
                if resolution.source == ResolutionSource::Timeout
                    && self.timer.recorded_vote().is_none()
                {
                    self.status("Time is up. No vote was received.");
                }
                self.broadcaster
                    .announce_result(&mut self.session, &resolution);
            } else {
                debug!(phase = ?self.phase(), "round expired outside voting");
            }
        }

        if self.voting.poll_auto_submit(now) {
            let item = self
                .voting
                .selection()
                .and_then(|sign| self.session.poll_items().map(|i| i.label(sign).to_string()))
                .unwrap_or_else(|| self.config.no_selection_label.clone());
            info!(%item, "round ending, submitting current selection");
            self.send_vote(item);
        }

        self.voting.tick(now, &mut self.presenter);

        if self.broadcaster.poll_teardown(now) {
            debug!("teardown due, leaving room");
            self.leave();
        }
    }

    // ── RPC handling ────────────────────────────────────────────────

    fn on_rpc(
        &mut self,
        now: Instant,
        from: PlayerId,
        from_authority: bool,
        target: RpcTarget,
        call: RpcCall,
    ) {
        match call {
            RpcCall::StartVoting {
                duration,
                item_a,
                item_b,
            } => {
                let Some(round) = self.voting.on_start_voting(
                    now,
                    from_authority,
                    duration,
                    &item_a,
                    &item_b,
                    &mut self.presenter,
                ) else {
                    return;
                };
                self.status(format!(
                    "Voting started! Choose '{}' or '{}'. Time: {}s",
                    round.items.item_a,
                    round.items.item_b,
                    round.duration.as_secs()
                ));
                if self.session.is_authority() {
                    self.timer.start_round(now, round.duration);
                } else if let Some(lead) = self.config.auto_submit_lead {
                    self.voting.arm_auto_submit(now, round.duration, lead);
                }
            }
            RpcCall::SubmitVote { item } => {
                if !self.session.is_authority() || self.phase() != Phase::Voting {
                    debug!(%item, phase = ?self.phase(), "vote ignored");
                    return;
                }
                if let Some(resolution) = self.timer.submit_vote(&item) {
                    self.status(format!("Opponent voted for '{item}'."));
                    self.broadcaster
                        .announce_result(&mut self.session, &resolution);
                }
            }
            RpcCall::AnnounceResult { outcome } => {
                if !from_authority {
                    warn!(%outcome, "result from a non-authority member ignored");
                    return;
                }
                let items = self.session.poll_items().cloned();
                if self
                    .voting
                    .on_result(&outcome, items.as_ref(), &mut self.presenter)
                {
                    self.timer.abort();
                    self.status(format!("Result: {outcome}"));
                    self.broadcaster
                        .schedule_teardown(now, self.config.result_grace);
                }
            }
            RpcCall::OpponentLeft => self.on_opponent_left(now),
            RpcCall::UpdateSignSelection { index } => match target {
                RpcTarget::Authority => {
                    let relay =
                        self.session.is_authority() && self.session.local_id() != Some(from);
                    if relay && self.phase() == Phase::Voting {
                        self.session
                            .rpc(RpcTarget::All, RpcCall::UpdateSignSelection { index });
                    }
                }
                RpcTarget::All => {
                    if from_authority && self.phase() == Phase::Voting {
                        self.presenter.publish(PollEvent::SignSelected { index });
                    }
                }
            },
        }
    }

    fn on_opponent_left(&mut self, now: Instant) {
        let phase = self.phase();
        if self.peer_departed || !phase.interrupted_by_peer_departure() {
            debug!(?phase, "opponent-left notice ignored");
            return;
        }
        self.peer_departed = true;
        self.timer.abort();
        self.voting.interrupt();
        if matches!(phase, Phase::Voting | Phase::Results) {
            self.presenter.publish(PollEvent::popup(
                "Your opponent left. Returning to the main menu.",
            ));
        }
        self.status("Opponent left. The session is over.");
        self.presenter.publish(PollEvent::SessionFailed {
            kind: FailureKind::PeerDeparture,
            reason: PollError::PeerDeparture.to_string(),
        });
        self.broadcaster
            .schedule_teardown(now, self.config.opponent_left_grace);
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn try_start_round(&mut self) {
        let duration = self.config.effective_vote_duration();
        if self.voting.broadcast_start(&mut self.session, duration) {
            self.status("Room full. Starting the vote...");
        }
    }

    fn send_vote(&mut self, item: String) {
        if !self.voting.mark_vote_sent() {
            debug!(%item, "already voted this round");
            return;
        }
        self.status(format!("You voted for '{item}'."));
        self.session
            .rpc(RpcTarget::Authority, RpcCall::SubmitVote { item });
    }

    fn send_selection(&mut self, index: SignIndex) {
        match self.session.local_role() {
            Some(Role::Participant) => {
                self.voting.select(index);
                self.session
                    .rpc(RpcTarget::Authority, RpcCall::UpdateSignSelection { index });
            }
            Some(Role::Authority) => {
                self.session
                    .rpc(RpcTarget::All, RpcCall::UpdateSignSelection { index });
            }
            None => debug!("sign selection outside a room ignored"),
        }
    }

    fn leave(&mut self) {
        self.broadcaster.cancel_teardown();
        self.timer.abort();
        self.voting.interrupt();
        match self.session.leave_session() {
            LeaveOutcome::Leaving => self.status("Leaving room..."),
            LeaveOutcome::NotInRoom => {
                self.voting.return_to_menu(&mut self.presenter);
            }
        }
    }

    fn fail(&mut self, err: &PollError) {
        self.voting.return_to_menu(&mut self.presenter);
        self.status(err.to_string());
        if let Some(kind) = err.failure_kind() {
            self.presenter.publish(PollEvent::SessionFailed {
                kind,
                reason: err.to_string(),
            });
        }
    }

    fn reject(&mut self, err: &PollError) {
        debug!("intent rejected: {err}");
        if let Some(message) = rejection_popup(err) {
            self.presenter.publish(PollEvent::popup(message));
            self.status(message);
        }
    }

    fn status(&mut self, message: impl Into<String>) {
        self.presenter.publish(PollEvent::status(message));
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::{ParticipantInfo, RoomJoinedPayload, RoomProperties, RoomStatus};
    use std::time::Duration;
    use uuid::Uuid;

    type Engine = PollEngine<Vec<PollEvent>>;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn alice() -> PlayerId {
        Uuid::from_u128(1)
    }

    fn bob() -> PlayerId {
        Uuid::from_u128(2)
    }

    fn room() -> Uuid {
        Uuid::from_u128(77)
    }

    fn member(id: PlayerId, actor_number: u32) -> ParticipantInfo {
        ParticipantInfo {
            id,
            name: format!("p{actor_number}"),
            actor_number,
        }
    }

    fn items() -> PollItems {
        PollItems::new("Pizza", "Sushi").unwrap()
    }

    fn payload(local: PlayerId, members: Vec<ParticipantInfo>) -> Box<RoomJoinedPayload> {
        Box::new(RoomJoinedPayload {
            room_id: room(),
            room_name: "poll-77".into(),
            player_id: local,
            max_players: 2,
            properties: RoomProperties::for_poll(&items()),
            members,
        })
    }

    fn rpc(from: PlayerId, target: RpcTarget, call: RpcCall) -> ServerMessage {
        ServerMessage::Rpc {
            room_id: room(),
            from,
            target,
            call,
        }
    }

    fn start_voting(duration: f64) -> RpcCall {
        RpcCall::StartVoting {
            duration,
            item_a: "Pizza".into(),
            item_b: "Sushi".into(),
        }
    }

    fn ready(local: PlayerId) -> Engine {
        let mut e = Engine::new(PollConfig::new("tester"), Vec::new());
        e.connect();
        e.handle_server_message(
            Instant::now(),
            &ServerMessage::ConnectedToMaster { player_id: local },
        );
        e.handle_server_message(Instant::now(), &ServerMessage::JoinedLobby);
        e.drain_outgoing();
        e.presenter_mut().clear();
        e
    }

    /// Alice created the room and Bob joined; returns the messages Alice sent.
    fn authority_with_full_room(t0: Instant) -> (Engine, Vec<ClientMessage>) {
        let mut e = ready(alice());
        e.create_session("Pizza", "Sushi").unwrap();
        e.handle_server_message(
            t0,
            &ServerMessage::RoomCreated(payload(alice(), vec![member(alice(), 1)])),
        );
        e.drain_outgoing();
        e.handle_server_message(
            t0,
            &ServerMessage::PlayerEntered {
                player: member(bob(), 2),
            },
        );
        let sent = e.drain_outgoing();
        (e, sent)
    }

    fn authority_voting(t0: Instant) -> Engine {
        let (mut e, _) = authority_with_full_room(t0);
        e.handle_server_message(t0, &rpc(alice(), RpcTarget::All, start_voting(30.0)));
        assert_eq!(e.phase(), Phase::Voting);
        e.presenter_mut().clear();
        e
    }

    fn participant_voting(t0: Instant, config: PollConfig) -> Engine {
        let mut e = Engine::new(config, Vec::new());
        e.handle_server_message(t0, &ServerMessage::ConnectedToMaster { player_id: bob() });
        e.find_session().unwrap();
        e.handle_server_message(
            t0,
            &ServerMessage::RoomJoined(payload(bob(), vec![member(alice(), 1), member(bob(), 2)])),
        );
        e.handle_server_message(t0, &rpc(alice(), RpcTarget::All, start_voting(30.0)));
        assert_eq!(e.phase(), Phase::Voting);
        e.drain_outgoing();
        e.presenter_mut().clear();
        e
    }

    fn announced(sent: &[ClientMessage]) -> Vec<String> {
        sent.iter()
            .filter_map(|m| match m {
                ClientMessage::Rpc {
                    call: RpcCall::AnnounceResult { outcome },
                    ..
                } => Some(outcome.clone()),
                _ => None,
            })
            .collect()
    }

    // ── Intents ─────────────────────────────────────────────────────

    #[test]
    fn create_before_connect_is_not_ready_with_popup() {
        let mut e = Engine::new(PollConfig::new("tester"), Vec::new());
        let err = e.create_session("Pizza", "Sushi").unwrap_err();
        assert!(matches!(err, PollError::NotReady));
        assert_eq!(e.phase(), Phase::MainMenu);
        assert!(e.drain_outgoing().is_empty());
        assert!(e
            .presenter()
            .iter()
            .any(|ev| matches!(ev, PollEvent::Popup { .. })));
    }

    #[test]
    fn blank_item_is_validation_error_without_network() {
        let mut e = ready(alice());
        let err = e.create_session("Pizza", "  ").unwrap_err();
        assert!(matches!(err, PollError::Validation(_)));
        assert!(e.drain_outgoing().is_empty());
        assert_eq!(
            e.presenter().first(),
            Some(&PollEvent::popup("Please fill in both poll items."))
        );
    }

    #[test]
    fn creation_menu_round_trip() {
        let mut e = ready(alice());
        e.begin_poll_creation().unwrap();
        assert_eq!(e.phase(), Phase::CreatingPoll);
        assert!(matches!(
            e.begin_poll_creation(),
            Err(PollError::InvalidPhase { .. })
        ));
        e.back_to_menu().unwrap();
        assert_eq!(e.phase(), Phase::MainMenu);
        assert!(matches!(e.back_to_menu(), Err(PollError::InvalidPhase { .. })));
    }

    #[test]
    fn create_from_creating_poll_waits_for_player() {
        let mut e = ready(alice());
        e.begin_poll_creation().unwrap();
        e.create_session("Pizza", "Sushi").unwrap();
        assert_eq!(e.phase(), Phase::WaitingForPlayer);
        assert!(e.presenter().contains(&PollEvent::phase_changed(
            Phase::WaitingForPlayer,
            Some(&items())
        )));
        assert!(matches!(
            e.drain_outgoing().as_slice(),
            [ClientMessage::CreateRoom { .. }]
        ));
    }

    #[test]
    fn authority_may_not_vote() {
        let mut e = authority_voting(Instant::now());
        assert!(matches!(
            e.submit_vote("Pizza"),
            Err(PollError::NotPermitted {
                role: Role::Authority,
                ..
            })
        ));
    }

    #[test]
    fn vote_outside_voting_is_invalid_phase() {
        let mut e = ready(bob());
        assert!(matches!(
            e.submit_vote("Pizza"),
            Err(PollError::InvalidPhase {
                phase: Phase::MainMenu,
                ..
            })
        ));
    }

    #[test]
    fn cancel_without_pending_creation_is_invalid_phase() {
        let mut e = ready(alice());
        assert!(matches!(
            e.cancel_pending_creation(),
            Err(PollError::InvalidPhase { .. })
        ));
        let t0 = Instant::now();
        let (mut full, _) = authority_with_full_room(t0);
        assert!(matches!(
            full.cancel_pending_creation(),
            Err(PollError::InvalidPhase { .. })
        ));
    }

    // ── Round start ─────────────────────────────────────────────────

    #[test]
    fn full_room_starts_voting_exactly_once() {
        let t0 = Instant::now();
        let (mut e, sent) = authority_with_full_room(t0);
        assert!(matches!(
            sent.as_slice(),
            [
                ClientMessage::SetRoomProperties { properties },
                ClientMessage::Rpc {
                    target: RpcTarget::All,
                    call: RpcCall::StartVoting { .. }
                }
            ] if properties.status == Some(RoomStatus::Playing)
        ));

        // Membership churn and duplicate notices never rebroadcast.
        e.handle_server_message(
            t0,
            &ServerMessage::PlayerEntered {
                player: member(bob(), 2),
            },
        );
        e.handle_server_message(t0, &rpc(alice(), RpcTarget::All, start_voting(30.0)));
        e.handle_server_message(t0, &rpc(alice(), RpcTarget::All, start_voting(30.0)));
        assert!(e.drain_outgoing().is_empty());
        assert_eq!(e.phase(), Phase::Voting);
        let entered_voting = e
            .presenter()
            .iter()
            .filter(|ev| matches!(ev, PollEvent::PhaseChanged { phase: Phase::Voting, .. }))
            .count();
        assert_eq!(entered_voting, 1);
    }

    #[test]
    fn start_voting_from_participant_is_ignored() {
        let t0 = Instant::now();
        let (mut e, _) = authority_with_full_room(t0);
        e.handle_server_message(t0, &rpc(bob(), RpcTarget::All, start_voting(30.0)));
        assert_eq!(e.phase(), Phase::WaitingForPlayer);
    }

    #[test]
    fn start_voting_with_huge_duration_keeps_participant_waiting() {
        let t0 = Instant::now();
        let mut e = Engine::new(PollConfig::new("bob"), Vec::new());
        e.handle_server_message(t0, &ServerMessage::ConnectedToMaster { player_id: bob() });
        e.find_session().unwrap();
        e.handle_server_message(
            t0,
            &ServerMessage::RoomJoined(payload(bob(), vec![member(alice(), 1), member(bob(), 2)])),
        );
        e.handle_server_message(t0, &rpc(alice(), RpcTarget::All, start_voting(1e19)));
        assert_eq!(e.phase(), Phase::WaitingForPlayer);
        e.on_tick(t0 + secs(1));

        e.handle_server_message(t0, &rpc(alice(), RpcTarget::All, start_voting(30.0)));
        assert_eq!(e.phase(), Phase::Voting);
    }

    #[test]
    fn oversized_graces_do_not_overflow_teardown() {
        let t0 = Instant::now();
        let config = PollConfig::new("bob")
            .with_result_grace(Duration::MAX)
            .with_opponent_left_grace(Duration::MAX);
        let mut e = participant_voting(t0, config);
        e.handle_server_message(
            t0 + secs(5),
            &rpc(
                alice(),
                RpcTarget::All,
                RpcCall::AnnounceResult {
                    outcome: "Pizza".into(),
                },
            ),
        );
        assert_eq!(e.phase(), Phase::Results);
        e.handle_server_message(t0 + secs(6), &rpc(alice(), RpcTarget::All, RpcCall::OpponentLeft));
        e.on_tick(t0 + secs(3600));
        assert_eq!(e.phase(), Phase::Results);
        assert!(e.next_wakeup(t0 + secs(3600)).is_some());
    }

    #[test]
    fn start_voting_for_another_room_is_ignored() {
        let t0 = Instant::now();
        let (mut e, _) = authority_with_full_room(t0);
        e.handle_server_message(
            t0,
            &ServerMessage::Rpc {
                room_id: Uuid::from_u128(5),
                from: alice(),
                target: RpcTarget::All,
                call: start_voting(30.0),
            },
        );
        assert_eq!(e.phase(), Phase::WaitingForPlayer);
    }

    // ── Race resolution ─────────────────────────────────────────────

    #[test]
    fn vote_before_expiry_resolves_with_vote() {
        let t0 = Instant::now();
        let mut e = authority_voting(t0);
        e.on_tick(t0 + secs(5));
        e.handle_server_message(
            t0 + secs(5),
            &rpc(
                bob(),
                RpcTarget::Authority,
                RpcCall::SubmitVote {
                    item: "Pizza".into(),
                },
            ),
        );
        assert_eq!(announced(&e.drain_outgoing()), vec!["Pizza"]);

        e.on_tick(t0 + secs(30));
        e.on_tick(t0 + secs(31));
        assert!(announced(&e.drain_outgoing()).is_empty());
    }

    #[test]
    fn expiry_without_vote_announces_sentinel() {
        let t0 = Instant::now();
        let mut e = authority_voting(t0);
        e.on_tick(t0 + secs(29));
        assert!(e.drain_outgoing().is_empty());
        assert_eq!(e.next_wakeup(t0 + secs(29)), Some(t0 + secs(30)));
        e.on_tick(t0 + secs(30));
        assert_eq!(announced(&e.drain_outgoing()), vec!["no selection"]);
    }

    #[test]
    fn late_vote_after_resolution_is_ignored() {
        let t0 = Instant::now();
        let mut e = authority_voting(t0);
        e.on_tick(t0 + secs(30));
        e.drain_outgoing();
        e.handle_server_message(
            t0 + secs(30),
            &rpc(
                bob(),
                RpcTarget::Authority,
                RpcCall::SubmitVote {
                    item: "Sushi".into(),
                },
            ),
        );
        assert!(e.drain_outgoing().is_empty());
    }

    #[test]
    fn result_moves_everyone_to_results_and_tears_down() {
        let t0 = Instant::now();
        let mut e = participant_voting(t0, PollConfig::new("bob"));
        e.handle_server_message(
            t0 + secs(5),
            &rpc(
                alice(),
                RpcTarget::All,
                RpcCall::AnnounceResult {
                    outcome: "Pizza".into(),
                },
            ),
        );
        assert_eq!(e.phase(), Phase::Results);
        assert!(e.presenter().contains(&PollEvent::ResultAnnounced {
            outcome: "Pizza".into()
        }));
        assert_eq!(e.next_wakeup(t0 + secs(5)), Some(t0 + secs(10)));

        e.on_tick(t0 + secs(10));
        assert!(matches!(
            e.drain_outgoing().as_slice(),
            [ClientMessage::LeaveRoom]
        ));
        e.handle_server_message(t0 + secs(10), &ServerMessage::LeftRoom);
        assert_eq!(e.phase(), Phase::MainMenu);
    }

    #[test]
    fn participant_counts_down_each_second() {
        let t0 = Instant::now();
        let mut e = participant_voting(t0, PollConfig::new("bob"));
        e.on_tick(t0 + secs(1));
        e.on_tick(t0 + Duration::from_millis(1500));
        e.on_tick(t0 + secs(2));
        let ticks: Vec<u64> = e
            .presenter()
            .iter()
            .filter_map(|ev| match ev {
                PollEvent::TimerTick { remaining_secs } => Some(*remaining_secs),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![29, 28]);
    }

    #[test]
    fn participant_votes_once() {
        let t0 = Instant::now();
        let mut e = participant_voting(t0, PollConfig::new("bob"));
        e.submit_vote("Sushi").unwrap();
        e.submit_vote("Pizza").unwrap();
        let sent = e.drain_outgoing();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0],
            ClientMessage::Rpc {
                target: RpcTarget::Authority,
                call: RpcCall::SubmitVote { item }
            } if item == "Sushi"
        ));
    }

    #[test]
    fn auto_submit_sends_highlighted_sign() {
        let t0 = Instant::now();
        let config = PollConfig::new("bob").with_auto_submit_lead(secs(1));
        let mut e = participant_voting(t0, config);
        e.select_sign(SignIndex::B).unwrap();
        e.drain_outgoing();
        let almost = t0 + Duration::from_millis(28_500);
        e.on_tick(almost);
        assert!(e.drain_outgoing().is_empty());
        assert_eq!(e.next_wakeup(almost), Some(t0 + secs(29)));
        e.on_tick(t0 + secs(29));
        assert!(matches!(
            e.drain_outgoing().as_slice(),
            [ClientMessage::Rpc {
                call: RpcCall::SubmitVote { item },
                ..
            }] if item == "Sushi"
        ));
    }

    // ── Sign selection ──────────────────────────────────────────────

    #[test]
    fn authority_relays_participant_selection() {
        let t0 = Instant::now();
        let mut e = authority_voting(t0);
        e.handle_server_message(
            t0,
            &rpc(
                bob(),
                RpcTarget::Authority,
                RpcCall::UpdateSignSelection { index: SignIndex::A },
            ),
        );
        assert!(matches!(
            e.drain_outgoing().as_slice(),
            [ClientMessage::Rpc {
                target: RpcTarget::All,
                call: RpcCall::UpdateSignSelection { index: SignIndex::A }
            }]
        ));
    }

    #[test]
    fn participant_shows_authority_selection() {
        let t0 = Instant::now();
        let mut e = participant_voting(t0, PollConfig::new("bob"));
        e.handle_server_message(
            t0,
            &rpc(
                alice(),
                RpcTarget::All,
                RpcCall::UpdateSignSelection { index: SignIndex::B },
            ),
        );
        assert!(e
            .presenter()
            .contains(&PollEvent::SignSelected { index: SignIndex::B }));
    }

    // ── Cancellation ────────────────────────────────────────────────

    #[test]
    fn cancel_before_ack_leaves_no_live_room() {
        let t0 = Instant::now();
        let mut e = ready(alice());
        e.create_session("Pizza", "Sushi").unwrap();
        e.drain_outgoing();
        e.cancel_pending_creation().unwrap();
        assert_eq!(e.phase(), Phase::MainMenu);

        e.handle_server_message(
            t0,
            &ServerMessage::RoomCreated(payload(alice(), vec![member(alice(), 1)])),
        );
        assert!(matches!(
            e.drain_outgoing().as_slice(),
            [ClientMessage::LeaveRoom]
        ));
        // A peer matched before LeftRoom never triggers a round.
        e.handle_server_message(
            t0,
            &ServerMessage::PlayerEntered {
                player: member(bob(), 2),
            },
        );
        assert!(e.drain_outgoing().is_empty());
        e.handle_server_message(t0, &ServerMessage::LeftRoom);
        assert!(!e.session().in_room());
        assert_eq!(e.phase(), Phase::MainMenu);
    }

    #[test]
    fn cancel_after_ack_leaves_room() {
        let t0 = Instant::now();
        let mut e = ready(alice());
        e.create_session("Pizza", "Sushi").unwrap();
        e.handle_server_message(
            t0,
            &ServerMessage::RoomCreated(payload(alice(), vec![member(alice(), 1)])),
        );
        e.drain_outgoing();
        e.cancel_pending_creation().unwrap();
        assert!(matches!(
            e.drain_outgoing().as_slice(),
            [ClientMessage::LeaveRoom]
        ));
        assert_eq!(e.phase(), Phase::MainMenu);
    }

    // ── Failures and departures ─────────────────────────────────────

    #[test]
    fn no_match_returns_to_menu_with_failure() {
        let mut e = ready(bob());
        e.find_session().unwrap();
        assert_eq!(e.phase(), Phase::WaitingForPlayer);
        e.handle_server_message(
            Instant::now(),
            &ServerMessage::JoinRandomFailed {
                reason: "no rooms".into(),
                error_code: None,
            },
        );
        assert_eq!(e.phase(), Phase::MainMenu);
        assert!(e.presenter().iter().any(|ev| matches!(
            ev,
            PollEvent::SessionFailed {
                kind: FailureKind::NoMatch,
                ..
            }
        )));
    }

    #[test]
    fn peer_departure_in_voting_broadcasts_and_tears_down() {
        let t0 = Instant::now();
        let mut e = authority_voting(t0);
        e.handle_server_message(t0 + secs(10), &ServerMessage::PlayerLeft { player_id: bob() });
        assert!(matches!(
            e.drain_outgoing().as_slice(),
            [ClientMessage::Rpc {
                target: RpcTarget::All,
                call: RpcCall::OpponentLeft
            }]
        ));

        e.handle_server_message(t0 + secs(10), &rpc(alice(), RpcTarget::All, RpcCall::OpponentLeft));
        assert!(e.presenter().iter().any(|ev| matches!(
            ev,
            PollEvent::SessionFailed {
                kind: FailureKind::PeerDeparture,
                ..
            }
        )));
        assert!(e
            .presenter()
            .iter()
            .any(|ev| matches!(ev, PollEvent::Popup { .. })));

        // The aborted round never announces, even at expiry.
        e.on_tick(t0 + secs(13));
        let sent = e.drain_outgoing();
        assert!(announced(&sent).is_empty());
        assert!(matches!(sent.as_slice(), [ClientMessage::LeaveRoom]));
        e.handle_server_message(t0 + secs(13), &ServerMessage::LeftRoom);
        assert_eq!(e.phase(), Phase::MainMenu);
        e.on_tick(t0 + secs(30));
        assert!(announced(&e.drain_outgoing()).is_empty());
    }

    #[test]
    fn peer_departure_in_results_keeps_earlier_teardown() {
        let t0 = Instant::now();
        let mut e = participant_voting(t0, PollConfig::new("bob"));
        e.handle_server_message(
            t0 + secs(5),
            &rpc(
                alice(),
                RpcTarget::All,
                RpcCall::AnnounceResult {
                    outcome: "Pizza".into(),
                },
            ),
        );
        // Alice leaves right away; Bob is promoted and tells the room.
        e.handle_server_message(t0 + secs(6), &ServerMessage::PlayerLeft { player_id: alice() });
        assert!(e.session().is_authority());
        e.drain_outgoing();
        e.handle_server_message(t0 + secs(6), &rpc(bob(), RpcTarget::All, RpcCall::OpponentLeft));
        assert_eq!(e.next_wakeup(t0 + secs(6)), Some(t0 + secs(9)));
    }

    #[test]
    fn leaving_mid_round_sends_leave_room_and_stops_the_round() {
        let t0 = Instant::now();
        let mut e = participant_voting(t0, PollConfig::new("bob"));
        e.leave_session();
        assert!(e
            .drain_outgoing()
            .iter()
            .any(|m| matches!(m, ClientMessage::LeaveRoom)));
        e.handle_server_message(t0 + secs(1), &ServerMessage::LeftRoom);
        assert_eq!(e.phase(), Phase::MainMenu);
        e.presenter_mut().clear();
        e.on_tick(t0 + secs(30));
        assert!(!e
            .presenter()
            .iter()
            .any(|ev| matches!(ev, PollEvent::TimerTick { .. })));
    }

    #[test]
    fn disconnect_resets_to_menu() {
        let t0 = Instant::now();
        let mut e = authority_voting(t0);
        e.on_disconnected(Some("socket reset"));
        assert_eq!(e.phase(), Phase::MainMenu);
        assert!(!e.session().in_room());
        assert!(e.next_wakeup(t0).is_none());
        assert!(e.presenter().iter().any(|ev| matches!(
            ev,
            PollEvent::SessionFailed {
                kind: FailureKind::Disconnected,
                ..
            }
        )));
        assert!(matches!(e.find_session(), Err(PollError::NotReady)));
    }
}
