//! In-process session provider.
//!
//! [`MemoryHub`] implements the provider side of the session protocol
//! entirely in memory: handshake, lobby, two-member rooms with replicated
//! properties, random join by property filter, and RPC routing to all
//! members or to the room authority. Each [`MemoryTransport`] is one
//! connected client.
//!
//! Every client message is handled atomically under the hub lock and every
//! reply goes through a per-client FIFO channel, so all members of a room
//! observe room events in the same order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::PollError;
use crate::error_codes::ErrorCode;
use crate::protocol::{
    ClientMessage, ParticipantInfo, PlayerId, RoomId, RoomJoinedPayload, RoomOptions,
    RoomProperties, RpcCall, RpcTarget, ServerMessage,
};
use crate::transport::Transport;

// ── Hub state ───────────────────────────────────────────────────────

#[derive(Debug)]
struct Endpoint {
    name: Option<String>,
    tx: mpsc::UnboundedSender<String>,
    room: Option<RoomId>,
}

#[derive(Debug)]
struct Room {
    name: String,
    seq: u64,
    max_players: u8,
    is_open: bool,
    is_visible: bool,
    properties: RoomProperties,
    members: Vec<ParticipantInfo>,
    next_actor: u32,
}

impl Room {
    fn authority(&self) -> Option<PlayerId> {
        self.members
            .iter()
            .min_by_key(|m| m.actor_number)
            .map(|m| m.id)
    }

    fn member_ids(&self) -> Vec<PlayerId> {
        self.members.iter().map(|m| m.id).collect()
    }

    fn payload(&self, room_id: RoomId, player_id: PlayerId) -> Box<RoomJoinedPayload> {
        Box::new(RoomJoinedPayload {
            room_id,
            room_name: self.name.clone(),
            player_id,
            max_players: self.max_players,
            properties: self.properties.clone(),
            members: self.members.clone(),
        })
    }
}

#[derive(Debug, Default)]
struct HubState {
    endpoints: HashMap<PlayerId, Endpoint>,
    rooms: HashMap<RoomId, Room>,
    next_seq: u64,
}

impl HubState {
    fn deliver(&self, to: PlayerId, msg: &ServerMessage) {
        let Some(endpoint) = self.endpoints.get(&to) else {
            return;
        };
        match serde_json::to_string(msg) {
            Ok(json) => {
                if endpoint.tx.send(json).is_err() {
                    debug!(%to, "hub: client receiver gone");
                }
            }
            Err(e) => error!("hub: failed to serialize ServerMessage: {e}"),
        }
    }

    fn deliver_all(&self, to: &[PlayerId], msg: &ServerMessage) {
        for id in to {
            self.deliver(*id, msg);
        }
    }

    fn error(&self, to: PlayerId, code: ErrorCode) {
        self.deliver(
            to,
            &ServerMessage::Error {
                message: code.description().to_string(),
                error_code: Some(code),
            },
        );
    }

    fn handle(&mut self, from: PlayerId, msg: ClientMessage) {
        let Some(endpoint) = self.endpoints.get_mut(&from) else {
            return;
        };
        let handshaken = endpoint.name.is_some();
        let current_room = endpoint.room;
        match msg {
            ClientMessage::Connect { player_name, .. } => {
                if player_name.trim().is_empty() {
                    self.error(from, ErrorCode::InvalidPlayerName);
                    return;
                }
                endpoint.name = Some(player_name);
                self.deliver(from, &ServerMessage::ConnectedToMaster { player_id: from });
            }
            _ if !handshaken => self.error(from, ErrorCode::NotConnected),
            ClientMessage::JoinLobby => self.deliver(from, &ServerMessage::JoinedLobby),
            ClientMessage::Ping => self.deliver(from, &ServerMessage::Pong),
            ClientMessage::CreateRoom { room_name, options } => {
                self.create_room(from, current_room, room_name, options);
            }
            ClientMessage::JoinRandomRoom {
                expected_properties,
                max_players,
            } => self.join_random(from, current_room, &expected_properties, max_players),
            ClientMessage::LeaveRoom => match current_room {
                Some(room_id) => {
                    self.remove_member(from, room_id);
                    self.deliver(from, &ServerMessage::LeftRoom);
                }
                None => self.error(from, ErrorCode::NotInRoom),
            },
            ClientMessage::SetRoomProperties { properties } => {
                let Some(room) = current_room.and_then(|id| self.rooms.get_mut(&id)) else {
                    self.error(from, ErrorCode::NotInRoom);
                    return;
                };
                room.properties.merge(&properties);
                let update = ServerMessage::RoomPropertiesChanged {
                    properties: room.properties.clone(),
                };
                let members = room.member_ids();
                self.deliver_all(&members, &update);
            }
            ClientMessage::Rpc { target, call } => self.route_rpc(from, current_room, target, call),
        }
    }

    fn create_room(
        &mut self,
        from: PlayerId,
        current_room: Option<RoomId>,
        room_name: Option<String>,
        options: RoomOptions,
    ) {
        let refuse = |code: ErrorCode| ServerMessage::CreateRoomFailed {
            reason: code.description().to_string(),
            error_code: Some(code),
        };
        if current_room.is_some() {
            self.deliver(from, &refuse(ErrorCode::AlreadyInRoom));
            return;
        }
        if options.max_players == 0 {
            self.deliver(from, &refuse(ErrorCode::InvalidRoomOptions));
            return;
        }
        let room_id = Uuid::new_v4();
        self.next_seq += 1;
        let seq = self.next_seq;
        let creator = ParticipantInfo {
            id: from,
            name: self.player_name(from),
            actor_number: 1,
        };
        let room = Room {
            name: room_name.unwrap_or_else(|| format!("poll-{seq}")),
            seq,
            max_players: options.max_players,
            is_open: options.is_open,
            is_visible: options.is_visible,
            properties: options.properties,
            members: vec![creator],
            next_actor: 2,
        };
        let payload = room.payload(room_id, from);
        debug!(room = %room.name, "hub: room created");
        self.rooms.insert(room_id, room);
        if let Some(endpoint) = self.endpoints.get_mut(&from) {
            endpoint.room = Some(room_id);
        }
        self.deliver(from, &ServerMessage::RoomCreated(payload));
    }

    fn join_random(
        &mut self,
        from: PlayerId,
        current_room: Option<RoomId>,
        filter: &RoomProperties,
        max_players: u8,
    ) {
        if current_room.is_some() {
            self.deliver(
                from,
                &ServerMessage::JoinRandomFailed {
                    reason: ErrorCode::AlreadyInRoom.description().to_string(),
                    error_code: Some(ErrorCode::AlreadyInRoom),
                },
            );
            return;
        }
        // Oldest eligible room first.
        let candidate = self
            .rooms
            .iter()
            .filter(|(_, room)| {
                room.is_open
                    && room.is_visible
                    && room.members.len() < usize::from(room.max_players)
                    && (max_players == 0 || room.max_players == max_players)
                    && room.properties.matches(filter)
            })
            .min_by_key(|(_, room)| room.seq)
            .map(|(id, _)| *id);

        let Some(room_id) = candidate else {
            self.deliver(
                from,
                &ServerMessage::JoinRandomFailed {
                    reason: ErrorCode::NoMatchFound.description().to_string(),
                    error_code: Some(ErrorCode::NoMatchFound),
                },
            );
            return;
        };

        let name = self.player_name(from);
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        let joiner = ParticipantInfo {
            id: from,
            name,
            actor_number: room.next_actor,
        };
        room.next_actor += 1;
        let others = room.member_ids();
        room.members.push(joiner.clone());
        let payload = room.payload(room_id, from);
        debug!(room = %room.name, player = %joiner.name, "hub: random join");

        if let Some(endpoint) = self.endpoints.get_mut(&from) {
            endpoint.room = Some(room_id);
        }
        self.deliver_all(&others, &ServerMessage::PlayerEntered { player: joiner });
        self.deliver(from, &ServerMessage::RoomJoined(payload));
    }

    fn route_rpc(
        &self,
        from: PlayerId,
        current_room: Option<RoomId>,
        target: RpcTarget,
        call: RpcCall,
    ) {
        let Some((room_id, room)) =
            current_room.and_then(|id| self.rooms.get(&id).map(|room| (id, room)))
        else {
            self.error(from, ErrorCode::NotInRoom);
            return;
        };
        let recipients = match target {
            RpcTarget::All => room.member_ids(),
            RpcTarget::Authority => room.authority().into_iter().collect(),
        };
        let msg = ServerMessage::Rpc {
            room_id,
            from,
            target,
            call,
        };
        self.deliver_all(&recipients, &msg);
    }

    /// Take `player` out of `room_id`, notify the rest and drop the room
    /// once empty.
    fn remove_member(&mut self, player: PlayerId, room_id: RoomId) {
        if let Some(endpoint) = self.endpoints.get_mut(&player) {
            endpoint.room = None;
        }
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        room.members.retain(|m| m.id != player);
        if room.members.is_empty() {
            debug!(room = %room.name, "hub: room closed");
            self.rooms.remove(&room_id);
            return;
        }
        let remaining = room.member_ids();
        self.deliver_all(&remaining, &ServerMessage::PlayerLeft { player_id: player });
    }

    fn disconnect(&mut self, player: PlayerId) {
        let Some(endpoint) = self.endpoints.remove(&player) else {
            return;
        };
        debug!(%player, "hub: client disconnected");
        if let Some(room_id) = endpoint.room {
            self.remove_member(player, room_id);
        }
    }

    fn player_name(&self, id: PlayerId) -> String {
        self.endpoints
            .get(&id)
            .and_then(|e| e.name.clone())
            .unwrap_or_default()
    }
}

// ── Hub handle ──────────────────────────────────────────────────────

/// An in-process session provider shared by any number of clients.
///
/// Cloning yields another handle to the same provider.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new client connection with a fresh player id.
    pub fn connect(&self) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let player_id = Uuid::new_v4();
        self.lock().endpoints.insert(
            player_id,
            Endpoint {
                name: None,
                tx,
                room: None,
            },
        );
        MemoryTransport {
            player_id,
            hub: self.clone(),
            rx,
            closed: false,
        }
    }

    /// Drop a client's connection from the provider side, as a network
    /// failure would. The client's `recv` then yields `None`.
    pub fn drop_connection(&self, player_id: PlayerId) {
        self.lock().disconnect(player_id);
    }

    /// Number of open rooms.
    pub fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }

    /// Members of the room `player_id` is in, ordered by join.
    pub fn room_members(&self, player_id: PlayerId) -> Vec<PlayerId> {
        let state = self.lock();
        state
            .endpoints
            .get(&player_id)
            .and_then(|e| e.room)
            .and_then(|room_id| state.rooms.get(&room_id))
            .map(|room| {
                let mut members = room.members.clone();
                members.sort_by_key(|m| m.actor_number);
                members.into_iter().map(|m| m.id).collect()
            })
            .unwrap_or_default()
    }

    /// Current properties of the room `player_id` is in.
    pub fn room_properties(&self, player_id: PlayerId) -> Option<RoomProperties> {
        let state = self.lock();
        let room_id = state.endpoints.get(&player_id)?.room?;
        state.rooms.get(&room_id).map(|r| r.properties.clone())
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Client transport ────────────────────────────────────────────────

/// One client's connection to a [`MemoryHub`].
///
/// Dropping or closing it disconnects the client; the hub then removes it
/// from its room and notifies the remaining member.
#[derive(Debug)]
pub struct MemoryTransport {
    player_id: PlayerId,
    hub: MemoryHub,
    rx: mpsc::UnboundedReceiver<String>,
    closed: bool,
}

impl MemoryTransport {
    /// Player id the hub assigned to this connection.
    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, message: String) -> Result<(), PollError> {
        if self.closed {
            return Err(PollError::TransportClosed);
        }
        let mut state = self.hub.lock();
        match serde_json::from_str::<ClientMessage>(&message) {
            Ok(msg) => state.handle(self.player_id, msg),
            Err(e) => {
                warn!("hub: malformed client message: {e}");
                state.error(self.player_id, ErrorCode::InvalidInput);
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, PollError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), PollError> {
        if !self.closed {
            self.closed = true;
            self.hub.lock().disconnect(self.player_id);
            self.rx.close();
        }
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if !self.closed {
            self.hub.lock().disconnect(self.player_id);
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
    use crate::protocol::{PollItems, RoomStatus};

    async fn send(t: &mut MemoryTransport, msg: ClientMessage) {
        t.send(serde_json::to_string(&msg).unwrap()).await.unwrap();
    }

    async fn next(t: &mut MemoryTransport) -> ServerMessage {
        let text = t.recv().await.unwrap().unwrap();
        serde_json::from_str(&text).unwrap()
    }

    async fn handshake(hub: &MemoryHub, name: &str) -> MemoryTransport {
        let mut t = hub.connect();
        send(
            &mut t,
            ClientMessage::Connect {
                player_name: name.into(),
                sdk_version: None,
            },
        )
        .await;
        assert!(matches!(next(&mut t).await, ServerMessage::ConnectedToMaster { .. }));
        t
    }

    fn create_poll() -> ClientMessage {
        let items = PollItems::new("Pizza", "Sushi").unwrap();
        ClientMessage::CreateRoom {
            room_name: None,
            options: RoomOptions::for_poll(&items),
        }
    }

    fn join_waiting() -> ClientMessage {
        ClientMessage::JoinRandomRoom {
            expected_properties: RoomProperties::with_status(RoomStatus::Waiting),
            max_players: 2,
        }
    }

    #[tokio::test]
    async fn messages_before_handshake_are_refused() {
        let hub = MemoryHub::new();
        let mut t = hub.connect();
        send(&mut t, ClientMessage::JoinLobby).await;
        assert!(matches!(
            next(&mut t).await,
            ServerMessage::Error {
                error_code: Some(ErrorCode::NotConnected),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn random_join_with_no_rooms_fails() {
        let hub = MemoryHub::new();
        let mut bob = handshake(&hub, "bob").await;
        send(&mut bob, join_waiting()).await;
        assert!(matches!(
            next(&mut bob).await,
            ServerMessage::JoinRandomFailed {
                error_code: Some(ErrorCode::NoMatchFound),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn random_join_matches_waiting_room_and_notifies_creator() {
        let hub = MemoryHub::new();
        let mut alice = handshake(&hub, "alice").await;
        let mut bob = handshake(&hub, "bob").await;

        send(&mut alice, create_poll()).await;
        let ServerMessage::RoomCreated(created) = next(&mut alice).await else {
            panic!("expected RoomCreated");
        };
        assert_eq!(created.members.len(), 1);
        assert_eq!(created.members[0].actor_number, 1);

        send(&mut bob, join_waiting()).await;
        let ServerMessage::RoomJoined(joined) = next(&mut bob).await else {
            panic!("expected RoomJoined");
        };
        assert_eq!(joined.room_id, created.room_id);
        assert_eq!(joined.properties.item_a.as_deref(), Some("Pizza"));
        assert!(matches!(
            next(&mut alice).await,
            ServerMessage::PlayerEntered { player } if player.name == "bob" && player.actor_number == 2
        ));
        assert_eq!(
            hub.room_members(alice.player_id()),
            vec![alice.player_id(), bob.player_id()]
        );
    }

    #[tokio::test]
    async fn playing_rooms_are_hidden_from_random_join() {
        let hub = MemoryHub::new();
        let mut alice = handshake(&hub, "alice").await;
        let mut carol = handshake(&hub, "carol").await;
        send(&mut alice, create_poll()).await;
        next(&mut alice).await;
        send(
            &mut alice,
            ClientMessage::SetRoomProperties {
                properties: RoomProperties::with_status(RoomStatus::Playing),
            },
        )
        .await;
        assert!(matches!(
            next(&mut alice).await,
            ServerMessage::RoomPropertiesChanged { properties }
                if properties.status == Some(RoomStatus::Playing)
                    && properties.item_b.as_deref() == Some("Sushi")
        ));

        send(&mut carol, join_waiting()).await;
        assert!(matches!(
            next(&mut carol).await,
            ServerMessage::JoinRandomFailed { .. }
        ));
    }

    #[tokio::test]
    async fn rpc_routes_to_all_or_authority() {
        let hub = MemoryHub::new();
        let mut alice = handshake(&hub, "alice").await;
        let mut bob = handshake(&hub, "bob").await;
        send(&mut alice, create_poll()).await;
        next(&mut alice).await;
        send(&mut bob, join_waiting()).await;
        next(&mut bob).await;
        next(&mut alice).await; // PlayerEntered

        send(
            &mut bob,
            ClientMessage::Rpc {
                target: RpcTarget::Authority,
                call: RpcCall::SubmitVote {
                    item: "Sushi".into(),
                },
            },
        )
        .await;
        assert!(matches!(
            next(&mut alice).await,
            ServerMessage::Rpc { from, call: RpcCall::SubmitVote { .. }, .. } if from == bob.player_id()
        ));

        send(
            &mut alice,
            ClientMessage::Rpc {
                target: RpcTarget::All,
                call: RpcCall::OpponentLeft,
            },
        )
        .await;
        assert!(matches!(
            next(&mut alice).await,
            ServerMessage::Rpc { call: RpcCall::OpponentLeft, .. }
        ));
        assert!(matches!(
            next(&mut bob).await,
            ServerMessage::Rpc { call: RpcCall::OpponentLeft, .. }
        ));
    }

    #[tokio::test]
    async fn disconnect_notifies_remaining_member_and_closes_empty_rooms() {
        let hub = MemoryHub::new();
        let mut alice = handshake(&hub, "alice").await;
        let mut bob = handshake(&hub, "bob").await;
        send(&mut alice, create_poll()).await;
        next(&mut alice).await;
        send(&mut bob, join_waiting()).await;
        next(&mut bob).await;
        next(&mut alice).await;

        let bob_id = bob.player_id();
        drop(bob);
        assert!(matches!(
            next(&mut alice).await,
            ServerMessage::PlayerLeft { player_id } if player_id == bob_id
        ));
        assert_eq!(hub.room_count(), 1);

        send(&mut alice, ClientMessage::LeaveRoom).await;
        assert!(matches!(next(&mut alice).await, ServerMessage::LeftRoom));
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn dropped_connection_ends_recv() {
        let hub = MemoryHub::new();
        let mut alice = handshake(&hub, "alice").await;
        hub.drop_connection(alice.player_id());
        assert!(alice.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_is_transport_closed() {
        let hub = MemoryHub::new();
        let mut alice = handshake(&hub, "alice").await;
        alice.close().await.unwrap();
        alice.close().await.unwrap();
        assert!(matches!(
            alice.send("{}".into()).await,
            Err(PollError::TransportClosed)
        ));
    }
}
