//! The opaque remote-channel capability.
//!
//! The engine never speaks a wire protocol itself. A [`ChannelTransport`]
//! is whatever the integration provides: it must offer a blocking-style
//! `get` (also used as the connect-time probe), a push subscription with
//! data and connectivity callbacks, and a way to stop the subscription.
//!
//! Channel identity is `(name, protocol)`, parsed from `proto://name`
//! URIs with [`ChannelUri::parse`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use wavescope_core::SampleBatch;

use crate::error::AcquireError;

/// Callback receiving one decoded batch from the transport.
pub type BatchCallback = Arc<dyn Fn(SampleBatch) + Send + Sync>;

/// Callback receiving connectivity flips from a push subscription.
pub type ConnectivityCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Transport-level failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A previous request is still outstanding. Logged and dropped by the
    /// polling strategy, never retried immediately.
    #[error("request overlaps an outstanding operation")]
    Busy,

    /// The remote endpoint is unreachable.
    #[error("channel disconnected")]
    Disconnected,

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Any other transport failure.
    #[error("{0}")]
    Failed(String),
}

/// Options for a push subscription.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorOptions {
    /// Server-side queue depth hint; helps reduce dropped batches at
    /// high rates when the server honors it.
    pub queue_size: Option<usize>,
}

/// The per-channel capability offered by the transport boundary.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Fetches the current value. Also used as the connect-time probe and
    /// by the polling strategy.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on failure; [`TransportError::Busy`]
    /// when a previous get is still outstanding.
    async fn get(&self) -> Result<SampleBatch, TransportError>;

    /// Opens a push subscription. Batches go to `on_batch` and
    /// connectivity flips to `on_connectivity` until
    /// [`ChannelTransport::stop_monitor`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the subscription cannot be opened.
    async fn monitor(
        &self,
        on_batch: BatchCallback,
        on_connectivity: ConnectivityCallback,
        options: MonitorOptions,
    ) -> Result<(), TransportError>;

    /// Stops the push subscription.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the subscription cannot be stopped.
    async fn stop_monitor(&self) -> Result<(), TransportError>;
}

/// Factory creating one transport per channel identity.
pub type TransportFactory = Arc<dyn Fn(&ChannelUri) -> Arc<dyn ChannelTransport> + Send + Sync>;

/// Wire protocol of a remote channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// The structured pvAccess-style protocol.
    #[default]
    Pva,
    /// The scalar channel-access-style protocol.
    Ca,
}

impl FromStr for Protocol {
    type Err = AcquireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pva" => Ok(Self::Pva),
            "ca" => Ok(Self::Ca),
            other => Err(AcquireError::InvalidProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pva => write!(f, "pva"),
            Self::Ca => write!(f, "ca"),
        }
    }
}

/// A channel identity: name plus protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelUri {
    /// The remote channel name.
    pub name: String,
    /// The wire protocol.
    pub protocol: Protocol,
}

impl ChannelUri {
    /// Creates an identity directly.
    #[must_use]
    pub fn new(name: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            protocol,
        }
    }

    /// Parses `proto://name` or a bare name with a default protocol.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::InvalidProtocol`] for an unknown scheme.
    pub fn parse(input: &str, default_protocol: Protocol) -> Result<Self, AcquireError> {
        match input.split_once("://") {
            Some((proto, name)) => Ok(Self {
                name: name.to_string(),
                protocol: proto.trim().parse()?,
            }),
            None => Ok(Self {
                name: input.to_string(),
                protocol: default_protocol,
            }),
        }
    }
}

impl fmt::Display for ChannelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.name)
    }
}
