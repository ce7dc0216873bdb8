//! Async client that runs a poll session over a [`Transport`].
//!
//! [`PollClient`] is a thin handle. The poll state machines live in a
//! background loop task that owns the transport; the handle talks to it over
//! an unbounded MPSC channel. Events are emitted on a bounded channel
//! ([`tokio::sync::mpsc::Receiver<PollEvent>`]) returned from
//! [`PollClient::start`].
//!
//! # Example
//!
//! ```rust,no_run
//! use duel_poll::transports::MemoryHub;
//! use duel_poll::{PollClient, PollConfig, PollEvent};
//!
//! # async fn example() -> Result<(), duel_poll::PollError> {
//! let hub = MemoryHub::new();
//! let (mut client, mut events) = PollClient::start(hub.connect(), PollConfig::new("alice"));
//!
//! let mut created = false;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         PollEvent::Status { .. } if client.is_ready() && !created => {
//!             client.create_session("Pizza", "Sushi").await?;
//!             created = true;
//!         }
//!         PollEvent::ResultAnnounced { outcome } => println!("winner: {outcome}"),
//!         PollEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::config::PollConfig;
use crate::engine::{Intent, PollEngine};
use crate::error::{PollError, Result};
use crate::event::PollEvent;
use crate::phase::Phase;
use crate::protocol::{PlayerId, RoomId, ServerMessage, SignIndex};
use crate::transport::Transport;

// ── Shared state ────────────────────────────────────────────────────

/// Snapshot of the engine published by the client loop after every step.
struct ClientState {
    connected: AtomicBool,
    ready: AtomicBool,
    authority: AtomicBool,
    phase: AtomicU8,
    player_id: Mutex<Option<PlayerId>>,
    room_id: Mutex<Option<RoomId>>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            authority: AtomicBool::new(false),
            phase: AtomicU8::new(Phase::MainMenu.as_u8()),
            player_id: Mutex::new(None),
            room_id: Mutex::new(None),
        }
    }
}

/// A local intent plus the channel its verdict is returned on.
struct Command {
    intent: Intent,
    reply: oneshot::Sender<Result<()>>,
}

// ── Client handle ───────────────────────────────────────────────────

/// Async handle to a running poll session.
///
/// Created via [`PollClient::start`], which spawns the client loop and
/// returns this handle together with an event receiver.
///
/// Every intent method is applied by the loop in order with incoming
/// provider messages and timer deadlines. The returned future resolves once
/// the loop has applied the intent and flushed the resulting network
/// messages; outcomes that need the provider arrive later as [`PollEvent`]s.
pub struct PollClient {
    /// Sender half of the command channel to the client loop.
    cmd_tx: mpsc::UnboundedSender<Command>,
    /// Shared state updated by the client loop.
    state: Arc<ClientState>,
    /// Handle to the background client loop task.
    task: Option<tokio::task::JoinHandle<()>>,
    /// Oneshot sender to signal the client loop to shut down gracefully.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Timeout for the graceful shutdown.
    shutdown_timeout: Duration,
}

impl PollClient {
    /// Start the client loop and return a handle plus event receiver.
    ///
    /// The loop immediately sends a `Connect` handshake with
    /// [`PollConfig::player_name`] and emits [`PollEvent::Connected`].
    ///
    /// # Returns
    ///
    /// A tuple of `(client_handle, event_receiver)`. The event receiver yields
    /// [`PollEvent`]s until the transport closes or the client shuts down; the
    /// last event is always [`PollEvent::Disconnected`].
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(transport: impl Transport, config: PollConfig) -> (Self, mpsc::Receiver<PollEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<PollEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(ClientState::new());
        let shutdown_timeout = config.shutdown_timeout;

        let task = tokio::spawn(client_loop(
            transport,
            config,
            cmd_rx,
            event_tx,
            Arc::clone(&state),
            shutdown_rx,
        ));

        let client = Self {
            cmd_tx,
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };

        (client, event_rx)
    }

    // ── Public API methods ──────────────────────────────────────────

    /// Open the poll creation screen.
    ///
    /// # Errors
    ///
    /// [`PollError::InvalidPhase`] outside the main menu,
    /// [`PollError::NotConnected`] once the loop has stopped.
    pub async fn begin_poll_creation(&self) -> Result<()> {
        self.request(Intent::BeginPollCreation).await
    }

    /// Leave the poll creation screen without creating anything.
    ///
    /// # Errors
    ///
    /// [`PollError::InvalidPhase`] outside the creation screen,
    /// [`PollError::NotConnected`] once the loop has stopped.
    pub async fn back_to_menu(&self) -> Result<()> {
        self.request(Intent::BackToMenu).await
    }

    /// Create a discoverable two-member poll room for the given items.
    ///
    /// # Errors
    ///
    /// [`PollError::Validation`] if an item is blank, [`PollError::NotReady`]
    /// before the lobby is reached or while another request is pending, and
    /// [`PollError::InvalidPhase`] outside the menu screens. Provider refusals
    /// arrive as [`PollEvent::SessionFailed`].
    pub async fn create_session(
        &self,
        item_a: impl Into<String>,
        item_b: impl Into<String>,
    ) -> Result<()> {
        self.request(Intent::CreateSession {
            item_a: item_a.into(),
            item_b: item_b.into(),
        })
        .await
    }

    /// Join a random open poll room.
    ///
    /// # Errors
    ///
    /// [`PollError::NotReady`] before the lobby is reached and
    /// [`PollError::InvalidPhase`] outside the main menu. An empty lobby
    /// arrives as [`PollEvent::SessionFailed`] with
    /// [`FailureKind::NoMatch`](crate::error::FailureKind::NoMatch).
    pub async fn find_session(&self) -> Result<()> {
        self.request(Intent::FindSession).await
    }

    /// Abandon a room that is still waiting for an opponent.
    ///
    /// # Errors
    ///
    /// [`PollError::InvalidPhase`] when nothing is waiting.
    pub async fn cancel_pending_creation(&self) -> Result<()> {
        self.request(Intent::CancelPendingCreation).await
    }

    /// Leave the current room, or cancel a pending create or join.
    ///
    /// # Errors
    ///
    /// [`PollError::NotConnected`] once the loop has stopped.
    pub async fn leave_session(&self) -> Result<()> {
        self.request(Intent::LeaveSession).await
    }

    /// Submit the participant's vote to the authority.
    ///
    /// # Errors
    ///
    /// [`PollError::InvalidPhase`] outside a round and
    /// [`PollError::NotPermitted`] for the authority, which never votes.
    pub async fn submit_vote(&self, item: impl Into<String>) -> Result<()> {
        self.request(Intent::SubmitVote(item.into())).await
    }

    /// Highlight one of the two signs during a round.
    ///
    /// # Errors
    ///
    /// [`PollError::InvalidPhase`] outside a round.
    pub async fn select_sign(&self, index: SignIndex) -> Result<()> {
        self.request(Intent::SelectSign(index)).await
    }

    /// Shut down the client, closing the transport and stopping the loop.
    ///
    /// After calling this method, the event receiver will yield `None` once
    /// the loop exits.
    pub async fn shutdown(&mut self) {
        debug!("PollClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("client loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("client loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("client loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
        self.state.ready.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while the client loop is running.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// Returns `true` once the provider handshake and lobby join completed.
    pub fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::Acquire)
    }

    /// Returns `true` if the local member is the authority of its room.
    pub fn is_authority(&self) -> bool {
        self.state.authority.load(Ordering::Acquire)
    }

    /// The current UI phase.
    pub fn current_phase(&self) -> Phase {
        Phase::from_u8(self.state.phase.load(Ordering::Acquire))
    }

    /// Returns the current room ID, if the client is in a room.
    pub async fn current_room_id(&self) -> Option<RoomId> {
        *self.state.room_id.lock().await
    }

    /// Returns the player ID assigned by the provider.
    pub async fn current_player_id(&self) -> Option<PlayerId> {
        *self.state.player_id.lock().await
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Queue an intent and wait for the loop's verdict.
    async fn request(&self, intent: Intent) -> Result<()> {
        if !self.state.connected.load(Ordering::Acquire) {
            return Err(PollError::NotConnected);
        }
        let (reply, verdict) = oneshot::channel();
        self.cmd_tx
            .send(Command { intent, reply })
            .map_err(|_| PollError::NotConnected)?;
        verdict.await.map_err(|_| PollError::NotConnected)?
    }
}

impl std::fmt::Debug for PollClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollClient")
            .field("connected", &self.is_connected())
            .field("ready", &self.is_ready())
            .field("phase", &self.current_phase())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for PollClient {
    fn drop(&mut self) {
        // No executor to drive a graceful close from `Drop`; abort instead.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Client loop ─────────────────────────────────────────────────────

/// Why the client loop stopped.
enum Exit {
    /// Local shutdown; the transport was closed by us.
    Shutdown,
    /// The transport failed or was closed by the provider.
    Lost(Option<String>),
}

/// Background loop that multiplexes commands, provider messages and timer
/// deadlines via `tokio::select!`.
async fn client_loop(
    mut transport: impl Transport,
    config: PollConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<PollEvent>,
    state: Arc<ClientState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("client loop started");

    let mut engine = PollEngine::new(config, Vec::new());
    engine.connect();
    emit_event(&event_tx, PollEvent::Connected);

    let exit = loop {
        if let Err(reason) = flush(&mut engine, &mut transport, &event_tx, &state).await {
            break Exit::Lost(Some(reason));
        }

        let wakeup = engine
            .next_wakeup(now())
            .map(tokio::time::Instant::from_std);
        let mut reply = None;

        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command { intent, reply: tx }) => {
                        debug!(intent = intent.name(), "applying intent");
                        reply = Some((tx, engine.apply(intent)));
                    }
                    None => {
                        debug!("command channel closed, shutting down client loop");
                        let _ = transport.close().await;
                        break Exit::Shutdown;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                break Exit::Shutdown;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => engine.handle_server_message(now(), &msg),
                        Err(e) => warn!("failed to deserialize server message: {e}, raw: {text}"),
                    },
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        break Exit::Lost(Some(format!("transport receive error: {e}")));
                    }
                    None => {
                        debug!("transport closed by provider");
                        break Exit::Lost(None);
                    }
                }
            }

            () = sleep_until(wakeup) => engine.on_tick(now()),
        }

        if let Some((tx, result)) = reply {
            // Flush first so the caller observes the new phase on return.
            let flushed = flush(&mut engine, &mut transport, &event_tx, &state).await;
            let _ = tx.send(result);
            if let Err(reason) = flushed {
                break Exit::Lost(Some(reason));
            }
        }
    };

    let reason = match exit {
        Exit::Shutdown => Some("client shut down".to_string()),
        Exit::Lost(reason) => {
            engine.on_disconnected(reason.as_deref());
            forward_events(&mut engine, &event_tx);
            reason
        }
    };
    // Pending callers see NotConnected instead of waiting forever.
    drop(cmd_rx);
    emit_disconnected(&event_tx, &state, reason).await;

    debug!("client loop exited");
}

/// Send queued provider messages, forward presenter events, and publish the
/// engine snapshot.
async fn flush(
    engine: &mut PollEngine<Vec<PollEvent>>,
    transport: &mut impl Transport,
    event_tx: &mpsc::Sender<PollEvent>,
    state: &ClientState,
) -> std::result::Result<(), String> {
    for msg in engine.drain_outgoing() {
        match serde_json::to_string(&msg) {
            Ok(json) => {
                if let Err(e) = transport.send(json).await {
                    error!("transport send error: {e}");
                    return Err(format!("transport send error: {e}"));
                }
            }
            Err(e) => error!("failed to serialize ClientMessage: {e}"),
        }
    }
    update_state(engine, state).await;
    forward_events(engine, event_tx);
    Ok(())
}

fn forward_events(engine: &mut PollEngine<Vec<PollEvent>>, event_tx: &mpsc::Sender<PollEvent>) {
    for event in engine.presenter_mut().drain(..) {
        emit_event(event_tx, event);
    }
}

async fn update_state(engine: &PollEngine<Vec<PollEvent>>, state: &ClientState) {
    let session = engine.session();
    state.ready.store(session.is_ready(), Ordering::Release);
    state
        .authority
        .store(session.is_authority(), Ordering::Release);
    state.phase.store(engine.phase().as_u8(), Ordering::Release);
    *state.player_id.lock().await = session.local_id();
    *state.room_id.lock().await = session.room_id();
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Emit an event to the event channel. If the channel is full, log a warning
/// and drop the event to avoid blocking the client loop.
fn emit_event(event_tx: &mpsc::Sender<PollEvent>, event: PollEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!("event channel full, dropping event: {dropped:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit the final [`Disconnected`](PollEvent::Disconnected) event.
///
/// Uses `send().await` rather than `try_send` because it is always the last
/// event on the channel and must never be dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<PollEvent>,
    state: &ClientState,
    reason: Option<String>,
) {
    state.connected.store(false, Ordering::Release);
    state.ready.store(false, Ordering::Release);
    state.authority.store(false, Ordering::Release);
    if event_tx.send(PollEvent::Disconnected { reason }).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::protocol::{
        ClientMessage, ParticipantInfo, RoomJoinedPayload, RoomProperties, RpcCall, RpcTarget,
    };
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    // ── Mock transport ──────────────────────────────────────────────

    type Scripted = Option<std::result::Result<String, PollError>>;

    /// A transport whose incoming side is fed by the test through a channel.
    struct MockTransport {
        incoming: mpsc::UnboundedReceiver<Scripted>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    struct Server {
        tx: mpsc::UnboundedSender<Scripted>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl Server {
        fn push(&self, msg: &ServerMessage) {
            self.tx
                .send(Some(Ok(serde_json::to_string(msg).unwrap())))
                .unwrap();
        }

        fn push_raw(&self, item: Scripted) {
            self.tx.send(item).unwrap();
        }

        fn sent(&self) -> Vec<ClientMessage> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|m| serde_json::from_str(m).unwrap())
                .collect()
        }
    }

    fn mock() -> (MockTransport, Server) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = MockTransport {
            incoming,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, Server { tx, sent, closed })
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), PollError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, PollError>> {
            match self.incoming.recv().await {
                Some(item) => item,
                // Script exhausted: stay open until shutdown.
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> std::result::Result<(), PollError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn alice() -> PlayerId {
        Uuid::from_u128(1)
    }

    fn bob() -> PlayerId {
        Uuid::from_u128(2)
    }

    fn room() -> RoomId {
        Uuid::from_u128(77)
    }

    fn member(id: PlayerId, actor_number: u32) -> ParticipantInfo {
        ParticipantInfo {
            id,
            name: format!("p{actor_number}"),
            actor_number,
        }
    }

    fn room_created() -> ServerMessage {
        ServerMessage::RoomCreated(Box::new(RoomJoinedPayload {
            room_id: room(),
            room_name: "poll-77".into(),
            player_id: alice(),
            max_players: 2,
            properties: RoomProperties::for_poll(
                &crate::protocol::PollItems::new("Pizza", "Sushi").unwrap(),
            ),
            members: vec![member(alice(), 1)],
        }))
    }

    fn start(config: PollConfig) -> (PollClient, mpsc::Receiver<PollEvent>, Server) {
        let (transport, server) = mock();
        let (client, events) = PollClient::start(transport, config);
        (client, events, server)
    }

    async fn ready_client() -> (PollClient, mpsc::Receiver<PollEvent>, Server) {
        let (client, events, server) = start(PollConfig::new("alice"));
        server.push(&ServerMessage::ConnectedToMaster { player_id: alice() });
        server.push(&ServerMessage::JoinedLobby);
        wait_until(|| client.is_ready()).await;
        (client, events, server)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    async fn wait_for_event(
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
        .expect("event not received")
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn connected_is_first_event_and_connect_is_first_message() {
        let (mut client, mut events, server) = start(PollConfig::new("alice"));

        assert_eq!(events.recv().await, Some(PollEvent::Connected));
        wait_until(|| !server.sent().is_empty()).await;
        match &server.sent()[0] {
            ClientMessage::Connect { player_name, .. } => assert_eq!(player_name, "alice"),
            other => panic!("expected Connect, got {other:?}"),
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn handshake_makes_client_ready() {
        let (mut client, _events, server) = ready_client().await;

        assert!(client.is_connected());
        assert_eq!(client.current_phase(), Phase::MainMenu);
        assert_eq!(client.current_player_id().await, Some(alice()));
        assert!(client.current_room_id().await.is_none());
        assert!(server
            .sent()
            .iter()
            .any(|m| matches!(m, ClientMessage::JoinLobby)));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn find_before_ready_is_not_ready() {
        let (mut client, mut events, _server) = start(PollConfig::new("alice"));

        let err = client.find_session().await.unwrap_err();
        assert!(matches!(err, PollError::NotReady));
        wait_for_event(&mut events, |e| matches!(e, PollEvent::Popup { .. })).await;

        client.shutdown().await;
    }

    #[tokio::test]
    async fn blank_item_is_rejected_with_popup() {
        let (mut client, mut events, server) = ready_client().await;
        let before = server.sent().len();

        let err = client.create_session("Pizza", "").await.unwrap_err();
        assert!(matches!(err, PollError::Validation(_)));
        wait_for_event(&mut events, |e| matches!(e, PollEvent::Popup { .. })).await;
        assert_eq!(server.sent().len(), before);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn create_session_sends_create_room_and_waits() {
        let (mut client, _events, server) = ready_client().await;

        client.create_session("Pizza", "Sushi").await.unwrap();
        assert_eq!(client.current_phase(), Phase::WaitingForPlayer);
        match server.sent().last() {
            Some(ClientMessage::CreateRoom { options, .. }) => {
                assert_eq!(options.max_players, 2);
                assert_eq!(options.properties.item_a.as_deref(), Some("Pizza"));
            }
            other => panic!("expected CreateRoom, got {other:?}"),
        }

        server.push(&room_created());
        wait_until(|| client.is_authority()).await;
        assert_eq!(client.current_room_id().await, Some(room()));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_right_after_create_is_accepted() {
        let (mut client, _events, server) = ready_client().await;

        client.create_session("Pizza", "Sushi").await.unwrap();
        client.cancel_pending_creation().await.unwrap();
        assert_eq!(client.current_phase(), Phase::MainMenu);

        // The room arrives after the cancel and is left straight away.
        server.push(&room_created());
        wait_until(|| {
            server
                .sent()
                .iter()
                .any(|m| matches!(m, ClientMessage::LeaveRoom))
        })
        .await;
        assert_eq!(client.current_phase(), Phase::MainMenu);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn authority_starts_round_when_opponent_enters() {
        let (mut client, mut events, server) = ready_client().await;
        client.create_session("Pizza", "Sushi").await.unwrap();
        server.push(&room_created());
        server.push(&ServerMessage::PlayerEntered {
            player: member(bob(), 2),
        });

        wait_until(|| {
            server.sent().iter().any(|m| {
                matches!(
                    m,
                    ClientMessage::Rpc {
                        target: RpcTarget::All,
                        call: RpcCall::StartVoting { .. },
                    }
                )
            })
        })
        .await;

        // The provider echoes the All-targeted RPC back to its sender.
        server.push(&ServerMessage::Rpc {
            room_id: room(),
            from: alice(),
            target: RpcTarget::All,
            call: RpcCall::StartVoting {
                duration: 30.0,
                item_a: "Pizza".into(),
                item_b: "Sushi".into(),
            },
        });
        let tick = wait_for_event(&mut events, |e| matches!(e, PollEvent::TimerTick { .. })).await;
        assert_eq!(tick, PollEvent::TimerTick { remaining_secs: 30 });
        assert_eq!(client.current_phase(), Phase::Voting);

        let err = client.submit_vote("Pizza").await.unwrap_err();
        assert!(matches!(err, PollError::NotPermitted { .. }));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn disconnected_on_transport_close() {
        let (mut client, mut events, server) = ready_client().await;
        server.push_raw(None);

        let failed = wait_for_event(&mut events, |e| matches!(e, PollEvent::SessionFailed { .. })).await;
        assert!(matches!(
            failed,
            PollEvent::SessionFailed {
                kind: FailureKind::Disconnected,
                ..
            }
        ));
        let last = wait_for_event(&mut events, |e| matches!(e, PollEvent::Disconnected { .. })).await;
        assert_eq!(last, PollEvent::Disconnected { reason: None });
        assert!(events.recv().await.is_none());
        assert!(!client.is_connected());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn transport_recv_error_emits_disconnected() {
        let (mut client, mut events, server) = start(PollConfig::new("alice"));
        server.push_raw(Some(Err(PollError::TransportReceive("boom".into()))));

        let event = wait_for_event(&mut events, |e| matches!(e, PollEvent::Disconnected { .. })).await;
        match event {
            PollEvent::Disconnected { reason: Some(reason) } => assert!(reason.contains("boom")),
            other => panic!("unexpected {other:?}"),
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_server_message_is_skipped() {
        let (mut client, _events, server) = start(PollConfig::new("alice"));
        server.push_raw(Some(Ok("not json".into())));
        server.push(&ServerMessage::ConnectedToMaster { player_id: alice() });
        server.push(&ServerMessage::JoinedLobby);

        wait_until(|| client.is_ready()).await;
        assert!(client.is_connected());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn not_connected_error_after_shutdown() {
        let (mut client, _events, _server) = ready_client().await;
        client.shutdown().await;

        assert!(matches!(
            client.leave_session().await,
            Err(PollError::NotConnected)
        ));
        assert!(!client.is_ready());
    }

    #[tokio::test]
    async fn shutdown_closes_transport_and_emits_disconnected() {
        let (mut client, mut events, server) = start(PollConfig::new("alice"));
        let _ = events.recv().await; // Connected

        client.shutdown().await;

        assert!(server.closed.load(Ordering::Relaxed));
        let last = wait_for_event(&mut events, |e| matches!(e, PollEvent::Disconnected { .. })).await;
        assert_eq!(
            last,
            PollEvent::Disconnected {
                reason: Some("client shut down".into())
            }
        );
    }

    #[tokio::test]
    async fn double_shutdown_does_not_panic() {
        let (mut client, _events, _server) = start(PollConfig::new("alice"));
        client.shutdown().await;
        client.shutdown().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn drop_without_explicit_shutdown() {
        let (client, mut events, _server) = start(PollConfig::new("alice"));
        let _ = events.recv().await; // Connected
        drop(client);

        // The aborted task drops the sender, so the channel drains to None.
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while events.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }

    #[tokio::test]
    async fn small_event_channel_does_not_block_loop() {
        let config = PollConfig::new("alice").with_event_channel_capacity(1);
        let (mut client, _events, server) = start(config);

        // Nobody reads events; the loop must still make progress.
        server.push(&ServerMessage::ConnectedToMaster { player_id: alice() });
        server.push(&ServerMessage::JoinedLobby);
        wait_until(|| client.is_ready()).await;
        client.begin_poll_creation().await.unwrap();
        assert_eq!(client.current_phase(), Phase::CreatingPoll);

        client.shutdown().await;
    }

    /// A transport whose `close` never returns.
    struct StuckTransport;

    #[async_trait]
    impl Transport for StuckTransport {
        async fn send(&mut self, _message: String) -> std::result::Result<(), PollError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, PollError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), PollError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_timeout_aborts_stuck_transport() {
        let config = PollConfig::new("alice").with_shutdown_timeout(Duration::from_millis(100));
        let (mut client, _events) = PollClient::start(StuckTransport, config);

        client.shutdown().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn debug_impl_for_client() {
        let (mut client, _events, _server) = start(PollConfig::new("alice"));
        let rendered = format!("{client:?}");
        assert!(rendered.contains("PollClient"));
        assert!(rendered.contains("MainMenu"));
        client.shutdown().await;
    }
}
