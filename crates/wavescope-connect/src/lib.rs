//! # Wavescope Connect
//!
//! The transport boundary for the wavescope acquisition engine: channel
//! lifecycle, acquisition strategies, and reconnection supervision over
//! an opaque remote-channel capability.
//!
//! ## Architecture
//!
//! ```text
//! ChannelTransport (capability: get / monitor / stop_monitor)
//!        │
//!        ▼
//!    Channel ◀── ChannelManager (identity cache, probe, pooling)
//!    │  state machine: Disconnected → Connecting → Connected
//!    │                └ FailedToConnect ──▶ ReconnectSupervisor
//!    ▼
//!  strategy (Poll at 1000/rate ms │ Monitor push subscription)
//!        │ batches
//!        ▼
//!  data callback (e.g. ScopeEngine::ingest)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use wavescope_connect::{ChannelManager, ChannelUri, Protocol};
//!
//! let manager = ChannelManager::new(transport_factory);
//! let uri = ChannelUri::parse("pva://DET1:Waveform", Protocol::Pva)?;
//! let channel = manager.connect(&uri, Some(status_cb), Some(error_cb), true).await?;
//!
//! // Push subscription; pass a rate instead for periodic polling.
//! channel.start(Some(Arc::new(move |batch| engine.ingest(&batch))), None, None)?;
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Common test patterns that are acceptable
#![cfg_attr(
    test,
    allow(
        clippy::float_cmp,
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation
    )
)]

/// Remote channel wrapper and its state machine.
pub mod channel;

/// Connection-layer error types.
pub mod error;

/// Channel manager with identity cache.
pub mod manager;

/// Channel connection state.
pub mod state;

mod strategy;

/// Reconnection supervision.
pub mod supervisor;

/// Testing utilities (mock transport, batch fixtures).
pub mod testing;

/// The opaque remote-channel capability.
pub mod transport;

pub use channel::{Channel, StatusCallback};
pub use error::AcquireError;
pub use manager::{ChannelManager, ErrorCallback, ManagerConfig};
pub use state::ConnectionState;
pub use supervisor::{ReconnectSupervisor, RecoveryCallback};
pub use transport::{
    BatchCallback, ChannelTransport, ChannelUri, ConnectivityCallback, MonitorOptions, Protocol,
    TransportError, TransportFactory,
};
