//! Connection state.

/// Current state of the client's connection.
///
/// ```text
/// Disconnected --start--> Connecting --ok--> Connected
///                             |                  |
///                          failure             loss
///                             v                  v
///                        Reconnecting <--- Disconnected
/// ```
///
/// Without a reconnect policy, a failure or loss ends in `Disconnected`.
/// `dispose` always ends in `Disconnected`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connected and ready to send and receive.
    Connected,
    /// Waiting for or running a reconnect attempt.
    Reconnecting,
}

impl ConnectionState {
    /// Whether the client is between connections but still trying.
    pub fn is_retrying(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}
