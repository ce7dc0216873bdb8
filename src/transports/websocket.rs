//! WebSocket transport backed by `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] speaks the session protocol as WebSocket text
//! frames. `ws://` and `wss://` URLs both work; TLS is handled by
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! Only available with the `transport-websocket` feature (on by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), duel_poll::PollError> {
//! use duel_poll::{PollClient, PollConfig, WebSocketTransport};
//!
//! let transport = WebSocketTransport::connect("ws://localhost:9090/poll").await?;
//! let (client, mut events) = PollClient::start(transport, PollConfig::new("alice"));
//! # drop((client, events.recv().await));
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::error::PollError;
use crate::transport::Transport;

/// The underlying stream type accepted by [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] over one WebSocket connection.
///
/// Use [`connect`](Self::connect) or [`connect_with_timeout`](Self::connect_with_timeout)
/// for the common case. For custom TLS, proxies or headers, build the stream
/// yourself and wrap it with [`from_stream`](Self::from_stream).
///
/// [`recv`](Transport::recv) is cancel-safe: a dropped `recv` future loses no
/// frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Connect to a session provider at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Io`] if the URL is invalid or the connection
    /// fails. I/O error kinds are preserved; anything else maps to
    /// [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, PollError> {
        debug!(url = %url, "connecting to session provider");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            PollError::Io(std::io::Error::new(kind, e))
        })?;

        info!(url = %url, "session provider connected");

        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// Wrap an already-established stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// [`connect`](Self::connect) bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Timeout`] if the deadline elapses, or any
    /// error that [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, PollError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| PollError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), PollError> {
        if self.closed {
            return Err(PollError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| PollError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, PollError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(PollError::TransportReceive(e.to_string()))),
            };
            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    debug!(?frame, "provider closed the connection");
                    return None;
                }
                // tungstenite answers pings itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                Message::Binary(bytes) => {
                    warn!(len = bytes.len(), "binary frame skipped, protocol is text only");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), PollError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| PollError::TransportSend(e.to_string()))
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
    use crate::protocol::{ClientMessage, ServerMessage};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    type ServerStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

    /// Accept one connection on a local port and run `provider` on it.
    async fn spawn_provider<F, Fut>(provider: F) -> String
    where
        F: FnOnce(ServerStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            provider(ws).await;
        });
        format!("ws://{addr}")
    }

    fn text(msg: &ServerMessage) -> Message {
        Message::Text(serde_json::to_string(msg).unwrap().into())
    }

    #[test]
    fn websocket_transport_is_send_and_debug() {
        fn assert_bounds<T: Send + std::fmt::Debug>() {}
        assert_bounds::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-url").await.unwrap_err();
        assert!(matches!(err, PollError::Io(_)));
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // TEST-NET-1 is never routable.
        let err = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            std::time::Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::Timeout));
    }

    #[tokio::test]
    async fn handshake_round_trip() {
        let player_id = Uuid::from_u128(7);
        let url = spawn_provider(move |mut ws| async move {
            if let Some(Ok(Message::Text(raw))) = ws.next().await {
                let msg: ClientMessage = serde_json::from_str(raw.as_str()).unwrap();
                assert!(matches!(msg, ClientMessage::Connect { .. }));
                ws.send(text(&ServerMessage::ConnectedToMaster { player_id }))
                    .await
                    .unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let connect = ClientMessage::Connect {
            player_name: "alice".into(),
            sdk_version: None,
        };
        transport
            .send(serde_json::to_string(&connect).unwrap())
            .await
            .unwrap();

        let reply = transport.recv().await.unwrap().unwrap();
        let reply: ServerMessage = serde_json::from_str(&reply).unwrap();
        assert!(matches!(
            reply,
            ServerMessage::ConnectedToMaster { player_id: id } if id == player_id
        ));
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn binary_frames_are_skipped() {
        let url = spawn_provider(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(text(&ServerMessage::JoinedLobby)).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert!(msg.contains("JoinedLobby"));
    }

    #[tokio::test]
    async fn send_after_close_is_transport_closed() {
        let url =
            spawn_provider(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("{}".to_string()).await.unwrap_err();
        assert!(matches!(err, PollError::TransportClosed));
    }

    #[tokio::test]
    async fn from_stream_wraps_existing_connection() {
        let url = spawn_provider(|mut ws| async move {
            ws.send(text(&ServerMessage::Pong)).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let (stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let mut transport = WebSocketTransport::from_stream(stream);
        let msg = transport.recv().await.unwrap().unwrap();
        assert!(msg.contains("Pong"));
    }
}
