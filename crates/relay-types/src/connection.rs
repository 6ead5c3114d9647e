//! Connection lifecycle states.

use std::fmt;

/// Lifecycle of a client connection.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Closing -> Closed
///      ^              |
///      +--- failure --+
/// ```
///
/// `Closed` is terminal; a closed client cannot reconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Returns true if publish and subscribe are allowed.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true once shutdown has started.
    #[must_use]
    pub fn is_shutting_down(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}
