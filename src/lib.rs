//! # Duel Poll
//!
//! Two-participant timed polls on top of a room-based session provider.
//!
//! One member creates a poll with two labeled items; a second member finds it
//! through random matchmaking. Once both are in the room the authority (the
//! member with the lowest actor number) starts a timed round, the other
//! member votes, and the authority announces a single outcome: the vote, or a
//! "no selection" sentinel when the timer wins the race.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement the [`Transport`] trait for any backend
//! - **WebSocket built-in**: default `transport-websocket` feature provides `WebSocketTransport`
//! - **In-process provider**: [`MemoryHub`] runs the session protocol without a network
//! - **Sans-IO core**: [`PollEngine`](engine::PollEngine) is a synchronous state machine fed with instants
//! - **Event-driven**: receive typed [`PollEvent`]s via a channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use duel_poll::{MemoryHub, PollClient, PollConfig, PollEvent};
//!
//! # async fn example() -> Result<(), duel_poll::PollError> {
//! let hub = MemoryHub::new();
//! let (mut client, mut events) = PollClient::start(hub.connect(), PollConfig::new("alice"));
//!
//! while let Some(event) = events.recv().await {
//!     if let PollEvent::PhaseChanged { phase, .. } = event {
//!         println!("now in {phase:?}");
//!     }
//!     if client.is_ready() {
//!         client.find_session().await.ok();
//!         break;
//!     }
//! }
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod phase;
pub mod protocol;
pub mod session;
pub mod timer;
pub mod transport;
pub mod transports;
pub mod voting;

// Re-export primary types for ergonomic imports.
pub use client::PollClient;
pub use config::PollConfig;
pub use error::{FailureKind, PollError};
pub use error_codes::ErrorCode;
pub use event::{PollEvent, Presenter};
pub use phase::{Phase, Role};
pub use protocol::{ClientMessage, ServerMessage, SignIndex};
pub use transport::Transport;
pub use transports::{MemoryHub, MemoryTransport};

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
