//! Channel connection state.

use std::fmt;

/// Connection state of a remote channel.
///
/// Exactly one state is current at a time; transitions emit a status
/// event only when the state actually changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected and receiving data.
    Connected,
    /// A strategy started; waiting for the first data or confirmation.
    Connecting,
    /// Stop was requested; the strategy is winding down.
    Disconnecting,
    /// No strategy running.
    Disconnected,
    /// The transport reported a failure while in service.
    FailedToConnect,
    /// Deactivated and pooled; no status events are delivered.
    Empty,
}

impl ConnectionState {
    /// Returns true while the channel is in service (connected or
    /// connecting). Data and errors arriving outside these states belong
    /// to a superseded channel and are ignored.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Connected | Self::Connecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::FailedToConnect => write!(f, "Failed to connect"),
            Self::Empty => write!(f, ""),
        }
    }
}
