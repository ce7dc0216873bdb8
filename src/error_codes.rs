//! Error codes for structured error handling in the session protocol.
//!
//! Codes serialize as `SCREAMING_SNAKE_CASE` strings (e.g. `"NO_MATCH_FOUND"`)
//! and travel in the provider's failure messages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes returned by a session provider.
///
/// [`description()`](ErrorCode::description) gives the user-facing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Connection errors
    NotConnected,
    InvalidPlayerName,

    // Validation errors
    InvalidInput,
    InvalidRoomOptions,

    // Room errors
    RoomNotFound,
    RoomFull,
    RoomClosed,
    AlreadyInRoom,
    NotInRoom,
    NoMatchFound,
    RoomCreationFailed,

    // RPC errors
    InvalidRpcTarget,

    // Server errors
    InternalError,
    ServiceUnavailable,
}

impl ErrorCode {
    /// Text shown to the user when the provider reports this code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NotConnected => {
                "The connection has not completed its handshake. Send Connect before any other message."
            }
            Self::InvalidPlayerName => {
                "The player name is invalid. Player names must be non-empty."
            }

            Self::InvalidInput => {
                "The provider could not parse the message it received."
            }
            Self::InvalidRoomOptions => {
                "The room options are invalid. Rooms need a positive player capacity."
            }

            Self::RoomNotFound => {
                "The requested room could not be found. It may have been closed already."
            }
            Self::RoomFull => {
                "The room has reached its maximum player capacity. Try a different room."
            }
            Self::RoomClosed => "The room is closed to new members.",
            Self::AlreadyInRoom => {
                "This connection is already a member of a room. Leave it first."
            }
            Self::NotInRoom => {
                "This connection is not a member of any room."
            }
            Self::NoMatchFound => {
                "No open room matched the requested properties. Create a new poll instead."
            }
            Self::RoomCreationFailed => {
                "Failed to create the room. Please try again."
            }

            Self::InvalidRpcTarget => "The RPC target is not present in the room.",

            Self::InternalError => {
                "The session provider hit an internal error."
            }
            Self::ServiceUnavailable => {
                "The session provider is not accepting requests right now."
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::NoMatchFound).unwrap();
        assert_eq!(json, "\"NO_MATCH_FOUND\"");
        let code: ErrorCode = serde_json::from_str("\"ROOM_FULL\"").unwrap();
        assert_eq!(code, ErrorCode::RoomFull);
    }

    #[test]
    fn display_uses_description() {
        assert_eq!(
            ErrorCode::RoomClosed.to_string(),
            ErrorCode::RoomClosed.description()
        );
    }
}
