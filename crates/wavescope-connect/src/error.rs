//! Connection-layer error types.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the connection layer.
#[derive(Debug, Error, Clone)]
pub enum AcquireError {
    /// The connect-time probe failed; the channel was not cached.
    #[error("could not get connection to {name}: {message}")]
    ConnectFailed {
        /// The channel name that failed to connect.
        name: String,
        /// The transport failure message.
        message: String,
    },

    /// A channel URI carried an unknown protocol scheme.
    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    /// Polling or monitoring was requested but no async scheduler is
    /// available to run the strategy.
    #[error("no scheduler configured; start the channel from within a runtime")]
    NoScheduler,

    /// A transport-level failure while a strategy was running.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}
