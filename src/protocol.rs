//! Wire types for the room-based session protocol.
//!
//! Messages are JSON text, adjacently tagged as `{"type": ..., "data": ...}`.
//! RPC calls nested inside [`ClientMessage::Rpc`] / [`ServerMessage::Rpc`]
//! are tagged as `{"method": ..., "args": ...}`.
//!
//! Room custom properties use the keys `itemA`, `itemB` and `status` on the
//! wire so that discovery filters written against other clients keep working.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PollError, Result};
use crate::error_codes::ErrorCode;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for connected participants.
pub type PlayerId = Uuid;

/// Unique identifier for rooms.
pub type RoomId = Uuid;

/// Room capacity for a poll: the creator plus one voter.
pub const POLL_ROOM_CAPACITY: u8 = 2;

/// Room property key holding the first poll item.
pub const PROP_ITEM_A: &str = "itemA";
/// Room property key holding the second poll item.
pub const PROP_ITEM_B: &str = "itemB";
/// Room property key holding the [`RoomStatus`].
pub const PROP_STATUS: &str = "status";

// ── Poll items ──────────────────────────────────────────────────────

/// The two labeled choices of a poll.
///
/// Both labels must contain something other than whitespace. Identical
/// labels are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollItems {
    pub item_a: String,
    pub item_b: String,
}

impl PollItems {
    /// Validate and build a pair of poll items.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Validation`] if either label is empty or only
    /// whitespace.
    pub fn new(item_a: impl Into<String>, item_b: impl Into<String>) -> Result<Self> {
        let item_a = item_a.into();
        let item_b = item_b.into();
        if item_a.trim().is_empty() || item_b.trim().is_empty() {
            return Err(PollError::Validation(
                "both poll items must be filled in".into(),
            ));
        }
        Ok(Self { item_a, item_b })
    }

    /// Label for the given sign.
    pub fn label(&self, sign: SignIndex) -> &str {
        match sign {
            SignIndex::A => &self.item_a,
            SignIndex::B => &self.item_b,
        }
    }
}

/// Which of the two signs is highlighted. Serialized as `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SignIndex {
    A,
    B,
}

impl TryFrom<u8> for SignIndex {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::A),
            1 => Ok(Self::B),
            other => Err(format!("sign index must be 0 or 1, got {other}")),
        }
    }
}

impl From<SignIndex> for u8 {
    fn from(sign: SignIndex) -> Self {
        match sign {
            SignIndex::A => 0,
            SignIndex::B => 1,
        }
    }
}

// ── Room properties ─────────────────────────────────────────────────

/// Discovery status of a poll room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    /// Waiting for a second member; eligible for random join.
    #[default]
    Waiting,
    /// Full and voting; hidden from random join.
    Playing,
}

/// Replicated room custom properties.
///
/// Every field is optional so the same type serves as the full property set,
/// a partial update, and a discovery filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomProperties {
    #[serde(rename = "itemA", default, skip_serializing_if = "Option::is_none")]
    pub item_a: Option<String>,
    #[serde(rename = "itemB", default, skip_serializing_if = "Option::is_none")]
    pub item_b: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RoomStatus>,
}

impl RoomProperties {
    /// Initial properties of a freshly created poll room.
    pub fn for_poll(items: &PollItems) -> Self {
        Self {
            item_a: Some(items.item_a.clone()),
            item_b: Some(items.item_b.clone()),
            status: Some(RoomStatus::Waiting),
        }
    }

    /// A partial update (or filter) touching only `status`.
    pub fn with_status(status: RoomStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply a partial update; `None` fields in `update` are left untouched.
    pub fn merge(&mut self, update: &RoomProperties) {
        if let Some(item_a) = &update.item_a {
            self.item_a = Some(item_a.clone());
        }
        if let Some(item_b) = &update.item_b {
            self.item_b = Some(item_b.clone());
        }
        if let Some(status) = update.status {
            self.status = Some(status);
        }
    }

    /// Whether every field set in `filter` equals the corresponding field here.
    pub fn matches(&self, filter: &RoomProperties) -> bool {
        let item_a_ok = filter.item_a.is_none() || filter.item_a == self.item_a;
        let item_b_ok = filter.item_b.is_none() || filter.item_b == self.item_b;
        let status_ok = filter.status.is_none() || filter.status == self.status;
        item_a_ok && item_b_ok && status_ok
    }

    /// The poll items carried by these properties, if both are present and valid.
    pub fn poll_items(&self) -> Option<PollItems> {
        match (&self.item_a, &self.item_b) {
            (Some(a), Some(b)) => PollItems::new(a.clone(), b.clone()).ok(),
            _ => None,
        }
    }
}

/// Options for creating a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomOptions {
    pub max_players: u8,
    pub is_open: bool,
    pub is_visible: bool,
    pub properties: RoomProperties,
    /// Property keys exposed to discovery filters.
    #[serde(default)]
    pub lobby_properties: Vec<String>,
}

impl RoomOptions {
    /// Options for a discoverable two-member poll room.
    pub fn for_poll(items: &PollItems) -> Self {
        Self {
            max_players: POLL_ROOM_CAPACITY,
            is_open: true,
            is_visible: true,
            properties: RoomProperties::for_poll(items),
            lobby_properties: vec![
                PROP_ITEM_A.to_string(),
                PROP_ITEM_B.to_string(),
                PROP_STATUS.to_string(),
            ],
        }
    }
}

// ── Membership ──────────────────────────────────────────────────────

/// A member of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: PlayerId,
    pub name: String,
    /// Join order inside the room, assigned by the provider. The lowest
    /// number present is the room authority.
    pub actor_number: u32,
}

/// Payload for [`ServerMessage::RoomCreated`] and [`ServerMessage::RoomJoined`].
/// Boxed in `ServerMessage` to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomJoinedPayload {
    pub room_id: RoomId,
    pub room_name: String,
    pub player_id: PlayerId,
    pub max_players: u8,
    pub properties: RoomProperties,
    /// Current members in join order, including the local player.
    pub members: Vec<ParticipantInfo>,
}

// ── RPC ─────────────────────────────────────────────────────────────

/// Addressing of an RPC inside a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RpcTarget {
    /// Every member, sender included.
    All,
    /// The room authority only.
    Authority,
}

/// Remote procedure calls exchanged between room members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum RpcCall {
    /// Authority → all: the round starts now.
    StartVoting {
        /// Round length in seconds.
        duration: f64,
        item_a: String,
        item_b: String,
    },
    /// Participant → authority: the participant's choice.
    SubmitVote { item: String },
    /// Authority → all: the round's single outcome.
    AnnounceResult { outcome: String },
    /// Any member → all: the other member is gone.
    OpponentLeft,
    /// Advisory highlight of one sign. Never affects resolution.
    UpdateSignSelection { index: SignIndex },
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to session provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// Open the session (MUST be first message).
    Connect {
        player_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sdk_version: Option<String>,
    },
    /// Enter the lobby so random join sees the discovery listing.
    JoinLobby,
    /// Create a room; the creator becomes its authority.
    CreateRoom {
        /// `None` lets the provider generate a name.
        room_name: Option<String>,
        options: RoomOptions,
    },
    /// Join any open room whose properties match `expected_properties`.
    JoinRandomRoom {
        expected_properties: RoomProperties,
        max_players: u8,
    },
    /// Leave the current room.
    LeaveRoom,
    /// Merge a partial update into the current room's properties.
    SetRoomProperties { properties: RoomProperties },
    /// Call a procedure on room members.
    Rpc { target: RpcTarget, call: RpcCall },
    /// Heartbeat.
    Ping,
}

/// Message types sent from session provider to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// Handshake complete.
    ConnectedToMaster { player_id: PlayerId },
    /// Lobby entered.
    JoinedLobby,
    /// The requested room was created and the sender is its first member.
    RoomCreated(Box<RoomJoinedPayload>),
    /// Room creation was refused.
    CreateRoomFailed {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    /// Joined an existing room.
    RoomJoined(Box<RoomJoinedPayload>),
    /// Joining a named room failed.
    JoinRoomFailed {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    /// Random join found no eligible room.
    JoinRandomFailed {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    /// Another member entered the current room.
    PlayerEntered { player: ParticipantInfo },
    /// Another member left the current room.
    PlayerLeft { player_id: PlayerId },
    /// The local member left its room.
    LeftRoom,
    /// Full current properties after an update.
    RoomPropertiesChanged { properties: RoomProperties },
    /// An RPC addressed to this member.
    Rpc {
        room_id: RoomId,
        from: PlayerId,
        target: RpcTarget,
        call: RpcCall,
    },
    /// Heartbeat reply.
    Pong,
    /// Generic error.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
}
