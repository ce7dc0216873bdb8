//! Client configuration.

use std::time::Duration;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default length of a voting round.
pub const DEFAULT_VOTE_DURATION: Duration = Duration::from_secs(30);

/// Shortest accepted voting round.
pub const MIN_VOTE_DURATION: Duration = Duration::from_secs(1);

/// Longest accepted voting round.
pub const MAX_VOTE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default delay between the result announcement and leaving the room.
pub const DEFAULT_RESULT_GRACE: Duration = Duration::from_secs(5);

/// Default delay between an opponent-left notice and leaving the room.
pub const DEFAULT_OPPONENT_LEFT_GRACE: Duration = Duration::from_secs(3);

/// Outcome announced when the round expires without a vote.
pub const DEFAULT_NO_SELECTION_LABEL: &str = "no selection";

/// Configuration for a [`PollClient`](crate::client::PollClient).
///
/// The only required field is `player_name`; all others have sensible
/// defaults.
///
/// # Example
///
/// ```
/// use duel_poll::config::PollConfig;
/// use std::time::Duration;
///
/// let config = PollConfig::new("alice")
///     .with_vote_duration(Duration::from_secs(10))
///     .with_event_channel_capacity(64);
/// assert_eq!(config.player_name, "alice");
/// assert_eq!(config.vote_duration, Duration::from_secs(10));
/// assert!(config.auto_submit_lead.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Display name sent in the `Connect` handshake.
    pub player_name: String,
    /// SDK version string sent during the handshake.
    /// Defaults to the crate version at compile time.
    pub sdk_version: Option<String>,
    /// Length of a voting round. Only the authority's value matters; it is
    /// carried to the participant inside `StartVoting`.
    ///
    /// Defaults to **30 seconds**. Values below 1 second are clamped.
    pub vote_duration: Duration,
    /// Delay before every member leaves after the result is announced.
    ///
    /// Defaults to **5 seconds**.
    pub result_grace: Duration,
    /// Delay before leaving after the opponent left.
    ///
    /// Defaults to **3 seconds**.
    pub opponent_left_grace: Duration,
    /// Outcome announced when no vote arrives in time.
    pub no_selection_label: String,
    /// When set, the participant submits its highlighted sign (or the
    /// no-selection label) this long before the round ends.
    ///
    /// Defaults to `None`: the participant only votes on request.
    pub auto_submit_lead: Option<Duration>,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped (with a warning
    /// logged) to avoid blocking the client loop. The `Disconnected` event is
    /// always delivered regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown.
    ///
    /// Defaults to **1 second**. A zero timeout aborts the client loop
    /// immediately.
    pub shutdown_timeout: Duration,
}

impl PollConfig {
    /// Create a new configuration with the given player name and default values.
    pub fn new(player_name: impl Into<String>) -> Self {
        Self {
            player_name: player_name.into(),
            sdk_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            vote_duration: DEFAULT_VOTE_DURATION,
            result_grace: DEFAULT_RESULT_GRACE,
            opponent_left_grace: DEFAULT_OPPONENT_LEFT_GRACE,
            no_selection_label: DEFAULT_NO_SELECTION_LABEL.to_string(),
            auto_submit_lead: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the round length, clamped to between 1 second and 24 hours.
    #[must_use]
    pub fn with_vote_duration(mut self, duration: Duration) -> Self {
        self.vote_duration = duration.clamp(MIN_VOTE_DURATION, MAX_VOTE_DURATION);
        self
    }

    #[must_use]
    pub fn with_result_grace(mut self, grace: Duration) -> Self {
        self.result_grace = grace;
        self
    }

    #[must_use]
    pub fn with_opponent_left_grace(mut self, grace: Duration) -> Self {
        self.opponent_left_grace = grace;
        self
    }

    /// Set the outcome announced when the round expires without a vote.
    #[must_use]
    pub fn with_no_selection_label(mut self, label: impl Into<String>) -> Self {
        self.no_selection_label = label.into();
        self
    }

    /// Enable participant auto-submit `lead` before the round ends.
    #[must_use]
    pub fn with_auto_submit_lead(mut self, lead: Duration) -> Self {
        self.auto_submit_lead = Some(lead);
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Round length as sent in `StartVoting`, clamped even when the field
    /// was set directly.
    pub(crate) fn effective_vote_duration(&self) -> Duration {
        self.vote_duration
            .clamp(MIN_VOTE_DURATION, MAX_VOTE_DURATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PollConfig::new("alice");
        assert_eq!(config.player_name, "alice");
        assert!(config.sdk_version.is_some());
        assert_eq!(config.vote_duration, Duration::from_secs(30));
        assert_eq!(config.result_grace, Duration::from_secs(5));
        assert_eq!(config.opponent_left_grace, Duration::from_secs(3));
        assert_eq!(config.no_selection_label, "no selection");
        assert!(config.auto_submit_lead.is_none());
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn vote_duration_is_clamped() {
        let config = PollConfig::new("alice").with_vote_duration(Duration::ZERO);
        assert_eq!(config.vote_duration, MIN_VOTE_DURATION);

        let mut direct = PollConfig::new("bob");
        direct.vote_duration = Duration::from_millis(10);
        assert_eq!(direct.effective_vote_duration(), MIN_VOTE_DURATION);

        let long = PollConfig::new("carol").with_vote_duration(Duration::MAX);
        assert_eq!(long.vote_duration, MAX_VOTE_DURATION);
        direct.vote_duration = Duration::MAX;
        assert_eq!(direct.effective_vote_duration(), MAX_VOTE_DURATION);
    }

    #[test]
    fn builder_overrides_round_settings() {
        let config = PollConfig::new("alice")
            .with_no_selection_label("nobody chose")
            .with_auto_submit_lead(Duration::from_secs(2));
        assert_eq!(config.no_selection_label, "nobody chose");
        assert_eq!(config.auto_submit_lead, Some(Duration::from_secs(2)));
    }

    #[test]
    fn channel_capacity_is_clamped() {
        let config = PollConfig::new("alice").with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }
}
