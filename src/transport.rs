//! Transport abstraction between a poll client and its session provider.
//!
//! The session protocol is a stream of JSON text messages
//! (see [`protocol`](crate::protocol)). A [`Transport`] moves those strings
//! in both directions and handles framing itself.
//!
//! Connection setup is not part of the trait. Build a connected transport
//! ([`WebSocketTransport::connect`](crate::transports::WebSocketTransport),
//! [`MemoryHub::connect`](crate::transports::MemoryHub::connect), or your
//! own) and hand it to [`PollClient::start`](crate::client::PollClient::start).
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use duel_poll::error::PollError;
//! use duel_poll::transport::Transport;
//! use tokio::sync::mpsc;
//!
//! struct ChannelTransport {
//!     outbound: mpsc::UnboundedSender<String>,
//!     inbound: mpsc::UnboundedReceiver<String>,
//! }
//!
//! #[async_trait]
//! impl Transport for ChannelTransport {
//!     async fn send(&mut self, message: String) -> Result<(), PollError> {
//!         self.outbound
//!             .send(message)
//!             .map_err(|e| PollError::TransportSend(e.to_string()))
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, PollError>> {
//!         self.inbound.recv().await.map(Ok)
//!     }
//!
//!     async fn close(&mut self) -> Result<(), PollError> {
//!         self.inbound.close();
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::PollError;

/// A bidirectional text message channel to a session provider.
///
/// Each [`send`](Transport::send) carries one serialized
/// [`ClientMessage`](crate::protocol::ClientMessage); each
/// [`recv`](Transport::recv) yields one serialized
/// [`ServerMessage`](crate::protocol::ServerMessage). The provider must
/// deliver messages of one room in the order it accepted them.
///
/// The trait is object-safe, so `Box<dyn Transport>` works too.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: the client loop polls it
/// inside `tokio::select!` alongside local commands and timer wakeups.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one JSON text message to the provider.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::TransportSend`] if the message could not be sent,
    /// or [`PollError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, message: String) -> Result<(), PollError>;

    /// Receive the next JSON text message.
    ///
    /// `Some(Ok(text))` is a message, `Some(Err(e))` a transport failure, and
    /// `None` a clean close by the provider.
    async fn recv(&mut self) -> Option<Result<String, PollError>>;

    /// Close the connection. Calling it twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails; resources are released
    /// regardless.
    async fn close(&mut self) -> Result<(), PollError>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&mut self, message: String) -> Result<(), PollError> {
        (**self).send(message).await
    }

    async fn recv(&mut self) -> Option<Result<String, PollError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), PollError> {
        (**self).close().await
    }
}
