//! Transport connection states
// (c) 2025 Ross Younger

/// The state of a [`Transport`](super::Transport)
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportState {
    /// Idle. `connect()` leaves this state.
    #[default]
    Disconnected,
    /// Waiting for a usable credential
    Authorizing,
    /// The downchannel request is outstanding (or waiting to be retried)
    Connecting,
    /// The downchannel is up; the post-connect handshake is running
    PostConnecting,
    /// Fully connected
    Connected,
    /// Tearing down
    Disconnecting,
}

impl TransportState {
    /// Whether the state machine permits moving from `self` to `next`
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use TransportState::{
            Authorizing, Connected, Connecting, Disconnected, Disconnecting, PostConnecting,
        };
        matches!(
            (self, next),
            (Disconnected, Authorizing)
                | (Authorizing, Connecting)
                | (Connecting, Authorizing | PostConnecting)
                | (PostConnecting, Connected)
                | (
                    Authorizing | Connecting | PostConnecting | Connected,
                    Disconnecting
                )
                | (Disconnecting, Disconnected)
        )
    }
}
