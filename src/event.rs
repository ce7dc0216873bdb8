//! Presentation feed.
//!
//! [`PollEvent`] is what a user interface observes. The engine publishes
//! events through the [`Presenter`] trait; the async client forwards them to
//! the bounded channel returned from
//! [`PollClient::start`](crate::client::PollClient::start).

use crate::error::FailureKind;
use crate::phase::Phase;
use crate::protocol::{PollItems, SignIndex};

/// Events observed by the user interface.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// Synthetic event emitted once the client loop starts.
    Connected,

    /// The local phase changed. Items are attached when known.
    PhaseChanged {
        phase: Phase,
        item_a: Option<String>,
        item_b: Option<String>,
    },

    /// The round's single outcome, as announced by the authority.
    ResultAnnounced { outcome: String },

    /// Whole seconds left in the round, emitted when the value changes.
    TimerTick { remaining_secs: u64 },

    /// Modal message for the user.
    Popup { message: String },

    /// Informational status line.
    Status { message: String },

    /// The authority highlighted a sign.
    SignSelected { index: SignIndex },

    /// A session attempt or running session ended abnormally.
    SessionFailed { kind: FailureKind, reason: String },

    /// The transport closed. Always the last event on the channel.
    Disconnected {
        /// Human-readable reason, if available.
        reason: Option<String>,
    },
}

impl PollEvent {
    /// Phase change carrying the given items, if any.
    pub fn phase_changed(phase: Phase, items: Option<&PollItems>) -> Self {
        Self::PhaseChanged {
            phase,
            item_a: items.map(|i| i.item_a.clone()),
            item_b: items.map(|i| i.item_b.clone()),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn popup(message: impl Into<String>) -> Self {
        Self::Popup {
            message: message.into(),
        }
    }
}

/// Sink for presentation events.
///
/// Injected into the engine so components never reach for a global UI.
pub trait Presenter {
    fn publish(&mut self, event: PollEvent);
}

/// Collects events in order; the client loop drains it after every step.
impl Presenter for Vec<PollEvent> {
    fn publish(&mut self, event: PollEvent) {
        self.push(event);
    }
}
