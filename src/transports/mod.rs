//! Transport implementations.
//!
//! | Transport              | Availability                    |
//! |------------------------|---------------------------------|
//! | [`MemoryTransport`]    | always (in-process [`MemoryHub`]) |
//! | `WebSocketTransport`   | `transport-websocket` feature   |
//!
//! # Example
//!
//! ```rust
//! # async fn example() -> Result<(), duel_poll::PollError> {
//! use duel_poll::transports::MemoryHub;
//! use duel_poll::Transport;
//!
//! let hub = MemoryHub::new();
//! let mut transport = hub.connect();
//! transport
//!     .send(r#"{"type":"Connect","data":{"player_name":"alice"}}"#.to_string())
//!     .await?;
//! let reply = transport.recv().await;
//! assert!(matches!(reply, Some(Ok(text)) if text.contains("ConnectedToMaster")));
//! # Ok(())
//! # }
//! ```

pub mod memory;

pub use memory::{MemoryHub, MemoryTransport};

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketTransport;
