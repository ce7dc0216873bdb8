//! Session coordinator: connection, lobby, rooms and membership.
//!
//! [`SessionCoordinator`] owns everything the session provider knows about
//! the local participant. It never touches the poll phase; instead each
//! inbound [`ServerMessage`] is folded into local state and summarized as a
//! [`SessionUpdate`] for the engine to act on. Outgoing messages are queued
//! in order and drained by the client loop after every step.
//!
//! Authority is derived from membership: the member with the lowest
//! `actor_number` is the room authority. Both members compute it from the
//! same replicated list, so promotion after the creator leaves needs no
//! extra message.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::error::{PollError, Result};
use crate::error_codes::ErrorCode;
use crate::phase::Role;
use crate::protocol::{
    ClientMessage, ParticipantInfo, PlayerId, PollItems, RoomId, RoomJoinedPayload, RoomOptions,
    RoomProperties, RoomStatus, RpcCall, RpcTarget, ServerMessage, POLL_ROOM_CAPACITY,
};

/// Connection to the session provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// `Connect` sent, waiting for the handshake.
    Connecting,
    /// Handshake done; room operations are allowed.
    Connected,
    /// Transport gone.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Create,
    RandomJoin,
}

/// A create or random-join request awaiting the provider's answer.
#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    kind: RequestKind,
    cancel_requested: bool,
}

/// Local replica of the current room.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: RoomId,
    pub name: String,
    pub properties: RoomProperties,
    /// Members ordered by `actor_number`.
    pub members: Vec<ParticipantInfo>,
    voting_started: bool,
    leaving: bool,
}

impl RoomState {
    fn from_payload(payload: &RoomJoinedPayload) -> Self {
        let mut members = payload.members.clone();
        members.sort_by_key(|m| m.actor_number);
        Self {
            id: payload.room_id,
            name: payload.room_name.clone(),
            properties: payload.properties.clone(),
            members,
            voting_started: false,
            leaving: false,
        }
    }

    /// The member holding authority: lowest `actor_number`.
    pub fn authority(&self) -> Option<&ParticipantInfo> {
        self.members.iter().min_by_key(|m| m.actor_number)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= usize::from(POLL_ROOM_CAPACITY)
    }
}

/// Result of [`SessionCoordinator::cancel_pending_creation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The create request is unanswered; the room will be left on arrival.
    AwaitingAck,
    /// The half-empty room is being left.
    LeavingRoom,
}

/// Result of [`SessionCoordinator::leave_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// `LeaveRoom` is on its way; `LeftRoom` will follow.
    Leaving,
    /// There was no room to leave.
    NotInRoom,
}

/// What an inbound message meant for the session.
#[derive(Debug)]
pub enum SessionUpdate {
    Connected {
        player_id: PlayerId,
    },
    LobbyJoined,
    RoomCreated {
        room_name: String,
    },
    /// A cancelled create was acknowledged (or refused); nothing is live.
    CreationCancelled,
    CreateFailed(PollError),
    RoomJoined {
        room_name: String,
        items: PollItems,
        member_count: usize,
    },
    /// A cancelled random join was answered; nothing is live.
    JoinCancelled,
    /// Join failed, matched nothing, or landed in an unusable room.
    JoinFailed(PollError),
    MemberJoined {
        member_count: usize,
    },
    PeerLeft {
        member_count: usize,
    },
    LeftRoom,
    PropertiesChanged,
    /// An RPC for the current room.
    Rpc {
        from: PlayerId,
        from_authority: bool,
        target: RpcTarget,
        call: RpcCall,
    },
    ProviderError {
        message: String,
        error_code: Option<ErrorCode>,
    },
    Ignored,
}

/// Owns the room lifecycle for one participant.
#[derive(Debug)]
pub struct SessionCoordinator {
    connection: ConnectionState,
    in_lobby: bool,
    local_id: Option<PlayerId>,
    room: Option<RoomState>,
    pending: Option<PendingRequest>,
    poll_items: Option<PollItems>,
    outbox: VecDeque<ClientMessage>,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCoordinator {
    pub fn new() -> Self {
        Self {
            connection: ConnectionState::Connecting,
            in_lobby: false,
            local_id: None,
            room: None,
            pending: None,
            poll_items: None,
            outbox: VecDeque::new(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Connected and handshaken with the provider.
    pub fn is_ready(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    pub fn local_id(&self) -> Option<PlayerId> {
        self.local_id
    }

    pub fn room(&self) -> Option<&RoomState> {
        self.room.as_ref()
    }

    pub fn in_room(&self) -> bool {
        self.room.is_some()
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.room.as_ref().map(|r| r.id)
    }

    pub fn poll_items(&self) -> Option<&PollItems> {
        self.poll_items.as_ref()
    }

    pub fn member_count(&self) -> usize {
        self.room.as_ref().map_or(0, |r| r.members.len())
    }

    /// Local role, if in a room.
    pub fn local_role(&self) -> Option<Role> {
        let room = self.room.as_ref()?;
        let local = self.local_id?;
        let authority = room.authority()?;
        Some(if authority.id == local {
            Role::Authority
        } else {
            Role::Participant
        })
    }

    pub fn is_authority(&self) -> bool {
        self.local_role() == Some(Role::Authority)
    }

    /// Whether a create request is waiting for its acknowledgment.
    pub fn creation_pending(&self) -> bool {
        self.pending.is_some_and(|p| p.kind == RequestKind::Create)
    }

    /// Whether any create or join request is unanswered.
    pub fn request_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Queued outgoing messages, oldest first.
    pub fn drain_outgoing(&mut self) -> impl Iterator<Item = ClientMessage> + '_ {
        self.outbox.drain(..)
    }

    // ── Requests ────────────────────────────────────────────────────

    /// Send the opening handshake.
    pub fn connect(&mut self, player_name: &str, sdk_version: Option<String>) {
        self.connection = ConnectionState::Connecting;
        self.outbox.push_back(ClientMessage::Connect {
            player_name: player_name.to_string(),
            sdk_version,
        });
    }

    /// Ask the provider for a fresh two-member poll room. The caller becomes
    /// its authority once created.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::NotReady`] if the provider is not connected or
    /// a previous room is still being created or left.
    pub fn create_session(&mut self, items: PollItems) -> Result<()> {
        self.ensure_idle()?;
        self.outbox.push_back(ClientMessage::CreateRoom {
            room_name: None,
            options: RoomOptions::for_poll(&items),
        });
        self.poll_items = Some(items);
        self.pending = Some(PendingRequest {
            kind: RequestKind::Create,
            cancel_requested: false,
        });
        info!("requested poll room creation");
        Ok(())
    }

    /// Ask the provider to match into any waiting poll room.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::NotReady`] under the same conditions as
    /// [`create_session`](Self::create_session).
    pub fn find_session(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.outbox.push_back(ClientMessage::JoinRandomRoom {
            expected_properties: RoomProperties::with_status(RoomStatus::Waiting),
            max_players: POLL_ROOM_CAPACITY,
        });
        self.pending = Some(PendingRequest {
            kind: RequestKind::RandomJoin,
            cancel_requested: false,
        });
        info!("requested random join");
        Ok(())
    }

    /// Abandon a room that is being created or still waits for its second
    /// member. Returns `None` when there is nothing to cancel.
    pub fn cancel_pending_creation(&mut self) -> Option<CancelOutcome> {
        if let Some(pending) = self.pending.as_mut() {
            if pending.kind == RequestKind::Create {
                pending.cancel_requested = true;
                debug!("creation cancel requested before acknowledgment");
                return Some(CancelOutcome::AwaitingAck);
            }
        }
        let cancellable = self.is_authority()
            && self
                .room
                .as_ref()
                .is_some_and(|room| !room.leaving && !room.is_full());
        if cancellable {
            self.leave_room();
            return Some(CancelOutcome::LeavingRoom);
        }
        None
    }

    /// Leave the current room if any. An unanswered create or join request
    /// is marked cancelled so its room is left as soon as it arrives.
    pub fn leave_session(&mut self) -> LeaveOutcome {
        if self.room.is_some() {
            self.leave_room();
            return LeaveOutcome::Leaving;
        }
        if let Some(pending) = self.pending.as_mut() {
            pending.cancel_requested = true;
        }
        LeaveOutcome::NotInRoom
    }

    /// Queue an RPC for the current room.
    pub fn rpc(&mut self, target: RpcTarget, call: RpcCall) {
        self.outbox.push_back(ClientMessage::Rpc { target, call });
    }

    /// Update the replicated `status` property, locally and remotely.
    pub fn set_room_status(&mut self, status: RoomStatus) {
        let update = RoomProperties::with_status(status);
        if let Some(room) = self.room.as_mut() {
            room.properties.merge(&update);
        }
        self.outbox
            .push_back(ClientMessage::SetRoomProperties { properties: update });
    }

    /// Whether the round may be started from this member: authority of a
    /// full room that has not started voting yet.
    pub fn voting_can_start(&self) -> bool {
        self.is_authority()
            && self
                .room
                .as_ref()
                .is_some_and(|room| room.is_full() && !room.voting_started && !room.leaving)
    }

    /// Record that this room's round has been started. Returns `false` if it
    /// already was.
    pub fn mark_voting_started(&mut self) -> bool {
        match self.room.as_mut() {
            Some(room) if !room.voting_started => {
                room.voting_started = true;
                true
            }
            _ => false,
        }
    }

    /// Forget everything after the transport dropped.
    pub fn on_disconnected(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.in_lobby = false;
        self.room = None;
        self.pending = None;
        self.poll_items = None;
        self.outbox.clear();
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Fold one provider message into local state.
    pub fn handle(&mut self, msg: &ServerMessage) -> SessionUpdate {
        match msg {
            ServerMessage::ConnectedToMaster { player_id } => {
                self.connection = ConnectionState::Connected;
                self.local_id = Some(*player_id);
                self.outbox.push_back(ClientMessage::JoinLobby);
                info!(%player_id, "connected to session provider");
                SessionUpdate::Connected {
                    player_id: *player_id,
                }
            }
            ServerMessage::JoinedLobby => {
                self.in_lobby = true;
                SessionUpdate::LobbyJoined
            }
            ServerMessage::RoomCreated(payload) => self.on_room_created(payload),
            ServerMessage::CreateRoomFailed { reason, error_code } => {
                let pending = self.pending.take();
                self.poll_items = None;
                if pending.is_some_and(|p| p.cancel_requested) {
                    debug!(%reason, "cancelled creation was refused anyway");
                    return SessionUpdate::CreationCancelled;
                }
                warn!(%reason, "room creation failed");
                SessionUpdate::CreateFailed(PollError::CreateFailed {
                    reason: reason.clone(),
                    error_code: *error_code,
                })
            }
            ServerMessage::RoomJoined(payload) => self.on_room_joined(payload),
            ServerMessage::JoinRoomFailed { reason, error_code } => {
                if self.pending.take().is_some_and(|p| p.cancel_requested) {
                    return SessionUpdate::JoinCancelled;
                }
                warn!(%reason, "room join failed");
                SessionUpdate::JoinFailed(PollError::JoinFailed {
                    reason: reason.clone(),
                    error_code: *error_code,
                })
            }
            ServerMessage::JoinRandomFailed { reason, .. } => {
                if self.pending.take().is_some_and(|p| p.cancel_requested) {
                    return SessionUpdate::JoinCancelled;
                }
                info!(%reason, "no open poll room");
                SessionUpdate::JoinFailed(PollError::NoMatch {
                    reason: reason.clone(),
                })
            }
            ServerMessage::PlayerEntered { player } => {
                let Some(room) = self.active_room_mut() else {
                    return SessionUpdate::Ignored;
                };
                if !room.members.iter().any(|m| m.id == player.id) {
                    room.members.push(player.clone());
                    room.members.sort_by_key(|m| m.actor_number);
                }
                let member_count = room.members.len();
                debug!(player = %player.name, member_count, "member entered");
                SessionUpdate::MemberJoined { member_count }
            }
            ServerMessage::PlayerLeft { player_id } => {
                let local = self.local_id;
                let Some(room) = self.active_room_mut() else {
                    return SessionUpdate::Ignored;
                };
                let before = room.members.len();
                room.members.retain(|m| m.id != *player_id);
                if room.members.len() == before {
                    return SessionUpdate::Ignored;
                }
                let member_count = room.members.len();
                let promoted = room.authority().map(|a| a.id) == local;
                debug!(%player_id, member_count, promoted, "member left");
                SessionUpdate::PeerLeft { member_count }
            }
            ServerMessage::LeftRoom => {
                self.room = None;
                self.poll_items = None;
                if self.is_ready() && !self.in_lobby {
                    self.outbox.push_back(ClientMessage::JoinLobby);
                }
                info!("left room");
                SessionUpdate::LeftRoom
            }
            ServerMessage::RoomPropertiesChanged { properties } => match self.room.as_mut() {
                Some(room) => {
                    room.properties = properties.clone();
                    SessionUpdate::PropertiesChanged
                }
                None => SessionUpdate::Ignored,
            },
            ServerMessage::Rpc {
                room_id,
                from,
                target,
                call,
            } => {
                let Some(room) = self.room.as_ref().filter(|r| !r.leaving) else {
                    debug!("rpc outside a room ignored");
                    return SessionUpdate::Ignored;
                };
                if room.id != *room_id {
                    debug!(%room_id, "rpc for a stale room ignored");
                    return SessionUpdate::Ignored;
                }
                let from_authority = room.authority().is_some_and(|a| a.id == *from);
                SessionUpdate::Rpc {
                    from: *from,
                    from_authority,
                    target: *target,
                    call: call.clone(),
                }
            }
            ServerMessage::Pong => SessionUpdate::Ignored,
            ServerMessage::Error {
                message,
                error_code,
            } => {
                warn!(%message, ?error_code, "provider error");
                SessionUpdate::ProviderError {
                    message: message.clone(),
                    error_code: *error_code,
                }
            }
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn ensure_idle(&self) -> Result<()> {
        if !self.is_ready() || self.room.is_some() || self.pending.is_some() {
            return Err(PollError::NotReady);
        }
        Ok(())
    }

    fn active_room_mut(&mut self) -> Option<&mut RoomState> {
        self.room.as_mut().filter(|r| !r.leaving)
    }

    fn leave_room(&mut self) {
        if let Some(room) = self.room.as_mut() {
            if !room.leaving {
                room.leaving = true;
                self.outbox.push_back(ClientMessage::LeaveRoom);
                debug!(room = %room.name, "leaving room");
            }
        }
    }

    fn enter_room(&mut self, payload: &RoomJoinedPayload) {
        self.in_lobby = false;
        self.local_id = Some(payload.player_id);
        self.room = Some(RoomState::from_payload(payload));
    }

    fn on_room_created(&mut self, payload: &RoomJoinedPayload) -> SessionUpdate {
        let pending = self.pending.take();
        self.enter_room(payload);
        if pending.is_some_and(|p| p.cancel_requested) {
            info!(room = %payload.room_name, "room created after cancel, leaving");
            self.poll_items = None;
            self.leave_room();
            return SessionUpdate::CreationCancelled;
        }
        if !pending.is_some_and(|p| p.kind == RequestKind::Create) {
            warn!(room = %payload.room_name, "unexpected room creation acknowledgment");
        }
        if self.poll_items.is_none() {
            self.poll_items = payload.properties.poll_items();
        }
        info!(room = %payload.room_name, "poll room created");
        SessionUpdate::RoomCreated {
            room_name: payload.room_name.clone(),
        }
    }

    fn on_room_joined(&mut self, payload: &RoomJoinedPayload) -> SessionUpdate {
        let pending = self.pending.take();
        self.enter_room(payload);
        if pending.is_some_and(|p| p.cancel_requested) {
            info!(room = %payload.room_name, "room joined after cancel, leaving");
            self.leave_room();
            return SessionUpdate::JoinCancelled;
        }
        let Some(items) = payload.properties.poll_items() else {
            warn!(room = %payload.room_name, "joined room carries no poll items, leaving");
            self.leave_room();
            return SessionUpdate::JoinFailed(PollError::JoinFailed {
                reason: "room has no poll items".into(),
                error_code: None,
            });
        };
        self.poll_items = Some(items.clone());
        info!(room = %payload.room_name, "joined poll room");
        SessionUpdate::RoomJoined {
            room_name: payload.room_name.clone(),
            items,
            member_count: self.member_count(),
        }
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
    use uuid::Uuid;

    fn local() -> PlayerId {
        Uuid::from_u128(1)
    }

    fn peer() -> PlayerId {
        Uuid::from_u128(2)
    }

    fn member(id: PlayerId, actor_number: u32) -> ParticipantInfo {
        ParticipantInfo {
            id,
            name: format!("p{actor_number}"),
            actor_number,
        }
    }

    fn payload(members: Vec<ParticipantInfo>, props: RoomProperties) -> Box<RoomJoinedPayload> {
        Box::new(RoomJoinedPayload {
            room_id: Uuid::from_u128(99),
            room_name: "room-99".into(),
            player_id: local(),
            max_players: 2,
            properties: props,
            members,
        })
    }

    fn items() -> PollItems {
        PollItems::new("Pizza", "Sushi").unwrap()
    }

    fn connected() -> SessionCoordinator {
        let mut s = SessionCoordinator::new();
        s.handle(&ServerMessage::ConnectedToMaster { player_id: local() });
        s.handle(&ServerMessage::JoinedLobby);
        s.drain_outgoing().for_each(drop);
        s
    }

    fn sent(s: &mut SessionCoordinator) -> Vec<ClientMessage> {
        s.drain_outgoing().collect()
    }

    #[test]
    fn create_requires_connection() {
        let mut s = SessionCoordinator::new();
        assert!(matches!(s.create_session(items()), Err(PollError::NotReady)));
        assert!(matches!(s.find_session(), Err(PollError::NotReady)));
        assert!(sent(&mut s).is_empty());
    }

    #[test]
    fn connect_handshake_joins_lobby() {
        let mut s = SessionCoordinator::new();
        s.connect("alice", None);
        assert_eq!(s.connection(), ConnectionState::Connecting);
        s.handle(&ServerMessage::ConnectedToMaster { player_id: local() });
        let out = sent(&mut s);
        assert!(matches!(out[0], ClientMessage::Connect { .. }));
        assert!(matches!(out[1], ClientMessage::JoinLobby));
        assert_eq!(s.connection(), ConnectionState::Connected);
        assert!(s.is_ready());

        s.on_disconnected();
        assert_eq!(s.connection(), ConnectionState::Disconnected);
        assert!(!s.is_ready());
    }

    #[test]
    fn create_sends_discoverable_two_member_room() {
        let mut s = connected();
        s.create_session(items()).unwrap();
        let out = sent(&mut s);
        let ClientMessage::CreateRoom { options, .. } = &out[0] else {
            panic!("expected CreateRoom, got {out:?}");
        };
        assert_eq!(options.max_players, 2);
        assert!(options.is_open && options.is_visible);
        assert_eq!(options.properties.status, Some(RoomStatus::Waiting));
        assert_eq!(options.lobby_properties, vec!["itemA", "itemB", "status"]);
        assert!(s.creation_pending());
    }

    #[test]
    fn creator_becomes_authority() {
        let mut s = connected();
        s.create_session(items()).unwrap();
        let update = s.handle(&ServerMessage::RoomCreated(payload(
            vec![member(local(), 1)],
            RoomProperties::for_poll(&items()),
        )));
        assert!(matches!(update, SessionUpdate::RoomCreated { .. }));
        assert_eq!(s.local_role(), Some(Role::Authority));
        assert!(!s.voting_can_start());

        s.handle(&ServerMessage::PlayerEntered {
            player: member(peer(), 2),
        });
        assert!(s.voting_can_start());
        assert!(s.mark_voting_started());
        assert!(!s.mark_voting_started());
        assert!(!s.voting_can_start());
    }

    #[test]
    fn cancel_before_ack_leaves_room_on_arrival() {
        let mut s = connected();
        s.create_session(items()).unwrap();
        sent(&mut s);
        assert_eq!(s.cancel_pending_creation(), Some(CancelOutcome::AwaitingAck));

        let update = s.handle(&ServerMessage::RoomCreated(payload(
            vec![member(local(), 1)],
            RoomProperties::for_poll(&items()),
        )));
        assert!(matches!(update, SessionUpdate::CreationCancelled));
        assert!(matches!(sent(&mut s).as_slice(), [ClientMessage::LeaveRoom]));

        // A peer matching in before LeftRoom is not treated as a member.
        let update = s.handle(&ServerMessage::PlayerEntered {
            player: member(peer(), 2),
        });
        assert!(matches!(update, SessionUpdate::Ignored));
        assert!(!s.voting_can_start());

        s.handle(&ServerMessage::LeftRoom);
        assert!(!s.in_room());
    }

    #[test]
    fn cancel_after_ack_leaves_half_empty_room() {
        let mut s = connected();
        s.create_session(items()).unwrap();
        s.handle(&ServerMessage::RoomCreated(payload(
            vec![member(local(), 1)],
            RoomProperties::for_poll(&items()),
        )));
        sent(&mut s);
        assert_eq!(s.cancel_pending_creation(), Some(CancelOutcome::LeavingRoom));
        assert!(matches!(sent(&mut s).as_slice(), [ClientMessage::LeaveRoom]));
        s.handle(&ServerMessage::LeftRoom);
        assert!(!s.in_room());
    }

    #[test]
    fn cancel_is_refused_once_room_is_full() {
        let mut s = connected();
        s.create_session(items()).unwrap();
        s.handle(&ServerMessage::RoomCreated(payload(
            vec![member(local(), 1)],
            RoomProperties::for_poll(&items()),
        )));
        s.handle(&ServerMessage::PlayerEntered {
            player: member(peer(), 2),
        });
        assert_eq!(s.cancel_pending_creation(), None);
    }

    #[test]
    fn cancelled_create_refusal_is_silent() {
        let mut s = connected();
        s.create_session(items()).unwrap();
        s.cancel_pending_creation();
        let update = s.handle(&ServerMessage::CreateRoomFailed {
            reason: "busy".into(),
            error_code: None,
        });
        assert!(matches!(update, SessionUpdate::CreationCancelled));
        assert!(!s.creation_pending());
    }

    #[test]
    fn joined_room_adopts_items_and_is_participant() {
        let mut s = connected();
        s.find_session().unwrap();
        let update = s.handle(&ServerMessage::RoomJoined(payload(
            vec![member(peer(), 1), member(local(), 2)],
            RoomProperties::for_poll(&items()),
        )));
        let SessionUpdate::RoomJoined {
            items: adopted,
            member_count,
            ..
        } = update
        else {
            panic!("expected RoomJoined");
        };
        assert_eq!(adopted, items());
        assert_eq!(member_count, 2);
        assert_eq!(s.local_role(), Some(Role::Participant));
        assert!(!s.voting_can_start());
    }

    #[test]
    fn joined_room_without_items_is_left() {
        let mut s = connected();
        s.find_session().unwrap();
        let update = s.handle(&ServerMessage::RoomJoined(payload(
            vec![member(peer(), 1), member(local(), 2)],
            RoomProperties::with_status(RoomStatus::Waiting),
        )));
        assert!(matches!(
            update,
            SessionUpdate::JoinFailed(PollError::JoinFailed { .. })
        ));
        assert!(matches!(sent(&mut s).last(), Some(ClientMessage::LeaveRoom)));
    }

    #[test]
    fn random_join_failure_is_no_match() {
        let mut s = connected();
        s.find_session().unwrap();
        let update = s.handle(&ServerMessage::JoinRandomFailed {
            reason: "no rooms".into(),
            error_code: Some(ErrorCode::NoMatchFound),
        });
        assert!(matches!(
            update,
            SessionUpdate::JoinFailed(PollError::NoMatch { .. })
        ));
        assert!(s.find_session().is_ok());
    }

    #[test]
    fn authority_is_promoted_by_join_order() {
        let mut s = connected();
        s.find_session().unwrap();
        s.handle(&ServerMessage::RoomJoined(payload(
            vec![member(peer(), 1), member(local(), 2)],
            RoomProperties::for_poll(&items()),
        )));
        assert!(!s.is_authority());
        let update = s.handle(&ServerMessage::PlayerLeft { player_id: peer() });
        assert!(matches!(update, SessionUpdate::PeerLeft { member_count: 1 }));
        assert!(s.is_authority());
    }

    #[test]
    fn rpc_from_other_room_is_ignored() {
        let mut s = connected();
        s.find_session().unwrap();
        s.handle(&ServerMessage::RoomJoined(payload(
            vec![member(peer(), 1), member(local(), 2)],
            RoomProperties::for_poll(&items()),
        )));
        let stale = s.handle(&ServerMessage::Rpc {
            room_id: Uuid::from_u128(7),
            from: peer(),
            target: RpcTarget::All,
            call: RpcCall::OpponentLeft,
        });
        assert!(matches!(stale, SessionUpdate::Ignored));

        let fresh = s.handle(&ServerMessage::Rpc {
            room_id: Uuid::from_u128(99),
            from: peer(),
            target: RpcTarget::All,
            call: RpcCall::OpponentLeft,
        });
        assert!(matches!(
            fresh,
            SessionUpdate::Rpc {
                from_authority: true,
                ..
            }
        ));
    }

    #[test]
    fn left_room_rejoins_lobby() {
        let mut s = connected();
        s.create_session(items()).unwrap();
        s.handle(&ServerMessage::RoomCreated(payload(
            vec![member(local(), 1)],
            RoomProperties::for_poll(&items()),
        )));
        assert_eq!(s.leave_session(), LeaveOutcome::Leaving);
        sent(&mut s);
        s.handle(&ServerMessage::LeftRoom);
        assert!(matches!(sent(&mut s).as_slice(), [ClientMessage::JoinLobby]));
        assert!(s.poll_items().is_none());
    }

    #[test]
    fn leave_without_room_is_noop() {
        let mut s = connected();
        assert_eq!(s.leave_session(), LeaveOutcome::NotInRoom);
        assert!(sent(&mut s).is_empty());
    }

    #[test]
    fn status_update_is_local_and_remote() {
        let mut s = connected();
        s.create_session(items()).unwrap();
        s.handle(&ServerMessage::RoomCreated(payload(
            vec![member(local(), 1)],
            RoomProperties::for_poll(&items()),
        )));
        sent(&mut s);
        s.set_room_status(RoomStatus::Playing);
        assert_eq!(
            s.room().unwrap().properties.status,
            Some(RoomStatus::Playing)
        );
        assert!(matches!(
            sent(&mut s).as_slice(),
            [ClientMessage::SetRoomProperties { .. }]
        ));
    }
}
