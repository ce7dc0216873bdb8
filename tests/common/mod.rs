#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for duel-poll integration tests.
//!
//! Provides a channel-backed [`MockTransport`] driven by a [`MockServer`],
//! helpers for building server message JSON, and event-waiting helpers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use duel_poll::protocol::{
    ClientMessage, ParticipantInfo, PlayerId, PollItems, RoomId, RoomJoinedPayload,
    RoomProperties, RpcCall, RpcTarget, ServerMessage,
};
use duel_poll::{ErrorCode, PollError, PollEvent, Transport};
use tokio::sync::mpsc;

type Scripted = Option<Result<String, PollError>>;

// ── MockTransport ───────────────────────────────────────────────────

/// A mock transport for integration testing.
///
/// `recv()` yields whatever the paired [`MockServer`] pushes, in order. An
/// explicit `None` push is a clean close. Once the server handle is dropped
/// and the queue is empty, `recv()` hangs until shutdown.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Scripted>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Test-side handle of a [`MockTransport`].
pub struct MockServer {
    tx: mpsc::UnboundedSender<Scripted>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a transport plus the handle that feeds and inspects it.
    pub fn new() -> (Self, MockServer) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, MockServer { tx, sent, closed })
    }

    /// Create a transport with server messages already queued.
    pub fn scripted(incoming: Vec<Scripted>) -> (Self, MockServer) {
        let (transport, server) = Self::new();
        for item in incoming {
            server.push_raw(item);
        }
        (transport, server)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), PollError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, PollError>> {
        match self.incoming.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), PollError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl MockServer {
    /// Deliver a typed server message.
    pub fn push(&self, msg: &ServerMessage) {
        self.push_raw(Some(Ok(to_json(msg))));
    }

    /// Deliver a raw scripted item (text, error, or close).
    pub fn push_raw(&self, item: Scripted) {
        self.tx.send(item).expect("mock transport dropped");
    }

    /// Everything the client sent so far, decoded.
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| serde_json::from_str(m).expect("client sent invalid JSON"))
            .collect()
    }

    /// Raw JSON strings the client sent so far.
    pub fn sent_raw(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// RPCs the client sent so far.
    pub fn sent_rpcs(&self) -> Vec<(RpcTarget, RpcCall)> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Rpc { target, call } => Some((target, call)),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn alice() -> PlayerId {
    uuid::Uuid::from_u128(0xA11CE)
}

pub fn bob() -> PlayerId {
    uuid::Uuid::from_u128(0xB0B)
}

pub fn room_id() -> RoomId {
    uuid::Uuid::from_u128(0x5EA7)
}

pub fn member(id: PlayerId, name: &str, actor_number: u32) -> ParticipantInfo {
    ParticipantInfo {
        id,
        name: name.into(),
        actor_number,
    }
}

pub fn pizza_sushi() -> PollItems {
    PollItems::new("Pizza", "Sushi").expect("valid items")
}

fn payload(local: PlayerId, members: Vec<ParticipantInfo>) -> Box<RoomJoinedPayload> {
    Box::new(RoomJoinedPayload {
        room_id: room_id(),
        room_name: "poll-room".into(),
        player_id: local,
        max_players: 2,
        properties: RoomProperties::for_poll(&pizza_sushi()),
        members,
    })
}

// ── JSON helper functions ───────────────────────────────────────────

pub fn to_json(msg: &ServerMessage) -> String {
    serde_json::to_string(msg).expect("server message serialization")
}

pub fn connected_to_master(player_id: PlayerId) -> ServerMessage {
    ServerMessage::ConnectedToMaster { player_id }
}

/// `RoomCreated` for Alice as the only member.
pub fn room_created_for_alice() -> ServerMessage {
    ServerMessage::RoomCreated(payload(alice(), vec![member(alice(), "alice", 1)]))
}

/// `RoomJoined` for Bob joining Alice's room.
pub fn room_joined_for_bob() -> ServerMessage {
    ServerMessage::RoomJoined(payload(
        bob(),
        vec![member(alice(), "alice", 1), member(bob(), "bob", 2)],
    ))
}

pub fn rpc(from: PlayerId, target: RpcTarget, call: RpcCall) -> ServerMessage {
    ServerMessage::Rpc {
        room_id: room_id(),
        from,
        target,
        call,
    }
}

pub fn start_voting(duration: f64) -> RpcCall {
    RpcCall::StartVoting {
        duration,
        item_a: "Pizza".into(),
        item_b: "Sushi".into(),
    }
}

pub fn error_message(message: &str, error_code: Option<ErrorCode>) -> ServerMessage {
    ServerMessage::Error {
        message: message.into(),
        error_code,
    }
}

// ── Event helpers ───────────────────────────────────────────────────

/// Receive events until one matches `pred`. Panics after two seconds.
pub async fn wait_for_event(
    events: &mut mpsc::Receiver<PollEvent>,
    mut pred: impl FnMut(&PollEvent) -> bool,
) -> PollEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `cond` until it holds. Panics after two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}
