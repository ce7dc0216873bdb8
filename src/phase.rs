//! Client phases and room roles.
//!
//! [`Phase`] is the local view of where a participant is in the poll cycle:
//!
//! ```text
//! MainMenu ─▶ CreatingPoll ─▶ WaitingForPlayer ─▶ Voting ─▶ Results
//!    ▲  └──────── find_session ───────▲                        │
//!    └──────────── teardown / failure / cancellation ◀─────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Phase of the local poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Idle, connected or not.
    #[default]
    MainMenu,
    /// Entering poll items locally. No network effect.
    CreatingPoll,
    /// A room is being created/joined, or is waiting for the second member.
    WaitingForPlayer,
    /// A round is running.
    Voting,
    /// The round's outcome has been announced; teardown is scheduled.
    Results,
}

impl Phase {
    /// Whether the transition `self → next` appears in the poll cycle.
    ///
    /// Every phase may fall back to [`Phase::MainMenu`]. Self-transitions are
    /// not transitions and return `false`.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (a, b) if a == b => false,
            (_, MainMenu) => true,
            (MainMenu, CreatingPoll) => true,
            (MainMenu, WaitingForPlayer) => true,
            (CreatingPoll, WaitingForPlayer) => true,
            (WaitingForPlayer, Voting) => true,
            (Voting, Results) => true,
            _ => false,
        }
    }

    /// Whether a peer departure in this phase interrupts the session.
    pub fn interrupted_by_peer_departure(self) -> bool {
        matches!(
            self,
            Phase::WaitingForPlayer | Phase::Voting | Phase::Results
        )
    }

    /// Stable index used when publishing the phase through an atomic.
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Phase::MainMenu => 0,
            Phase::CreatingPoll => 1,
            Phase::WaitingForPlayer => 2,
            Phase::Voting => 3,
            Phase::Results => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Phase {
        match value {
            1 => Phase::CreatingPoll,
            2 => Phase::WaitingForPlayer,
            3 => Phase::Voting,
            4 => Phase::Results,
            _ => Phase::MainMenu,
        }
    }
}

/// Role of the local participant inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Owns the round timer and announces results.
    Authority,
    /// Votes and waits for the authority's announcement.
    Participant,
}
