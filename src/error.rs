//! Error types for the duel-poll client.

use thiserror::Error;

use crate::error_codes::ErrorCode;
use crate::phase::{Phase, Role};

/// Errors that can occur when using the duel-poll client.
#[derive(Debug, Error)]
pub enum PollError {
    /// The session provider is not connected (or not yet ready) for an
    /// operation that needs it. Retry once the client reports readiness.
    #[error("session provider not connected or not ready")]
    NotReady,

    /// Required local input was missing or malformed. No network call was made.
    #[error("validation error: {0}")]
    Validation(String),

    /// Random matchmaking found no eligible room.
    #[error("no open poll room found: {reason}")]
    NoMatch {
        /// Reason reported by the provider.
        reason: String,
    },

    /// The provider refused to create the room.
    #[error("room creation failed: {reason}")]
    CreateFailed {
        /// Reason reported by the provider.
        reason: String,
        /// Structured error code, if provided.
        error_code: Option<ErrorCode>,
    },

    /// Joining a room failed, or the joined room was unusable.
    #[error("room join failed: {reason}")]
    JoinFailed {
        /// Reason reported by the provider or detected locally.
        reason: String,
        /// Structured error code, if provided.
        error_code: Option<ErrorCode>,
    },

    /// The opponent left the room before the round finished.
    #[error("opponent left the room")]
    PeerDeparture,

    /// A local intent was issued in a phase that does not accept it.
    #[error("{operation} is not valid in phase {phase:?}")]
    InvalidPhase {
        /// Name of the rejected operation.
        operation: &'static str,
        /// Phase the client was in.
        phase: Phase,
    },

    /// A local intent is reserved for the other room role.
    #[error("{operation} is not permitted for role {role:?}")]
    NotPermitted {
        /// Name of the rejected operation.
        operation: &'static str,
        /// Local role in the room.
        role: Role,
    },

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client's background loop has stopped.
    #[error("not connected to session provider")]
    NotConnected,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PollError {
    /// Classifies errors that end a session attempt asynchronously.
    ///
    /// Returns `None` for local precondition and transport plumbing errors.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::NoMatch { .. } => Some(FailureKind::NoMatch),
            Self::CreateFailed { .. } => Some(FailureKind::CreateFailed),
            Self::JoinFailed { .. } => Some(FailureKind::JoinFailed),
            Self::PeerDeparture => Some(FailureKind::PeerDeparture),
            Self::TransportClosed | Self::TransportReceive(_) | Self::TransportSend(_) => {
                Some(FailureKind::Disconnected)
            }
            _ => None,
        }
    }
}

/// Kinds of asynchronous session failures reported through
/// [`PollEvent::SessionFailed`](crate::event::PollEvent::SessionFailed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Random join found nothing; create a poll instead.
    NoMatch,
    /// The provider refused to create the room.
    CreateFailed,
    /// Joining failed or the room was unusable.
    JoinFailed,
    /// The opponent left mid-session.
    PeerDeparture,
    /// The transport dropped.
    Disconnected,
}

/// A specialized [`Result`] type for duel-poll operations.
pub type Result<T> = std::result::Result<T, PollError>;
