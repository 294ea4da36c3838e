//! Remote channel wrapper.
//!
//! A [`Channel`] owns the connection state machine for one remote
//! endpoint and the acquisition strategy feeding it. The status callback
//! fires on every real state transition; data and errors delivered for a
//! channel that is no longer in service are dropped, so stale callbacks
//! from a superseded channel can never corrupt current status.
//!
//! Channels are pooled by the manager: [`Channel::deactivate`] parks one
//! without closing the transport, [`Channel::reactivate`] brings it back
//! with a fresh status callback.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;

use wavescope_core::SampleBatch;

use crate::error::AcquireError;
use crate::state::ConnectionState;
use crate::strategy::{self, Strategy};
use crate::transport::{BatchCallback, ChannelTransport, ChannelUri, MonitorOptions};

/// Callback receiving `(state, message)` on every state transition.
pub type StatusCallback = Arc<dyn Fn(ConnectionState, Option<&str>) + Send + Sync>;

/// One remote endpoint: state machine plus acquisition strategy.
pub struct Channel {
    uri: ChannelUri,
    transport: Arc<dyn ChannelTransport>,
    scheduler: Option<Handle>,
    monitor_options: MonitorOptions,

    state: RwLock<ConnectionState>,
    status_callback: RwLock<Option<StatusCallback>>,
    data_callback: RwLock<Option<BatchCallback>>,
    rate: RwLock<Option<f64>>,
    strategy: Mutex<Option<Strategy>>,
}

impl Channel {
    /// Creates a disconnected channel.
    #[must_use]
    pub fn new(
        uri: ChannelUri,
        transport: Arc<dyn ChannelTransport>,
        scheduler: Option<Handle>,
        monitor_options: MonitorOptions,
        status_callback: Option<StatusCallback>,
    ) -> Self {
        Self {
            uri,
            transport,
            scheduler,
            monitor_options,
            state: RwLock::new(ConnectionState::Disconnected),
            status_callback: RwLock::new(status_callback),
            data_callback: RwLock::new(None),
            rate: RwLock::new(None),
            strategy: Mutex::new(None),
        }
    }

    /// Returns the channel identity.
    #[must_use]
    pub fn uri(&self) -> &ChannelUri {
        &self.uri
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Returns true while the channel is in service.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Returns true while an acquisition strategy is installed.
    #[must_use]
    pub fn has_strategy(&self) -> bool {
        self.strategy.lock().is_some()
    }

    pub(crate) fn transport(&self) -> &Arc<dyn ChannelTransport> {
        &self.transport
    }

    pub(crate) fn monitor_options(&self) -> MonitorOptions {
        self.monitor_options
    }

    pub(crate) fn scheduler(&self) -> Option<Handle> {
        self.scheduler
            .clone()
            .or_else(|| Handle::try_current().ok())
    }

    /// Transitions the state, emitting the status callback only when the
    /// state actually changed. The callback runs outside all locks.
    pub fn set_state(&self, state: ConnectionState, message: Option<&str>) {
        {
            let mut current = self.state.write();
            if *current == state {
                return;
            }
            *current = state;
        }
        let callback = self.status_callback.read().clone();
        if let Some(callback) = callback {
            callback(state, message);
        }
    }

    /// Reports a transport failure. Only a channel that is in service
    /// transitions to `FailedToConnect`; anything else is a stale error
    /// for a superseded channel and is ignored.
    pub fn notify_error(&self, message: Option<&str>) {
        if self.is_running() {
            self.set_state(ConnectionState::FailedToConnect, message);
        }
    }

    /// Delivers one batch from the active strategy.
    pub(crate) fn handle_batch(&self, batch: SampleBatch) {
        if !self.is_running() {
            return;
        }
        self.set_state(ConnectionState::Connected, None);
        let callback = self.data_callback.read().clone();
        if let Some(callback) = callback {
            callback(batch);
        }
    }

    /// Starts acquiring. A rate selects the polling strategy at
    /// `1000 / rate` ms per cycle; no rate selects a push subscription.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::NoScheduler`] when no async scheduler is
    /// available to run the strategy.
    pub fn start(
        self: &Arc<Self>,
        data_callback: Option<BatchCallback>,
        rate: Option<f64>,
        status_callback: Option<StatusCallback>,
    ) -> Result<(), AcquireError> {
        *self.data_callback.write() = data_callback;
        *self.rate.write() = rate;
        if let Some(callback) = status_callback {
            *self.status_callback.write() = Some(callback);
        }

        let handle = self.scheduler().ok_or(AcquireError::NoScheduler)?;

        self.set_state(ConnectionState::Connecting, None);
        let strategy = match rate {
            Some(rate) => strategy::start_poll(self, rate, &handle),
            None => strategy::start_monitor(self, &handle),
        };
        *self.strategy.lock() = Some(strategy);
        Ok(())
    }

    /// Stops acquiring. Idempotent, and safe to call from within the
    /// channel's own callbacks: strategy teardown is signalled, never
    /// unwound re-entrantly.
    pub fn stop(&self) {
        let strategy = self.strategy.lock().take();
        self.set_state(ConnectionState::Disconnecting, None);
        if let Some(strategy) = strategy {
            strategy.stop(self);
        }
        self.set_state(ConnectionState::Disconnected, None);
    }

    /// Stops and restarts the strategy with the stored callbacks and
    /// rate. Used by reconnection supervision.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::NoScheduler`] when no async scheduler is
    /// available.
    pub fn restart(self: &Arc<Self>) -> Result<(), AcquireError> {
        let data_callback = self.data_callback.read().clone();
        let rate = *self.rate.read();
        self.stop();
        self.start(data_callback, rate, None)
    }

    /// Parks the channel: the status callback is detached and no further
    /// events are delivered until reactivation.
    pub fn deactivate(&self) {
        *self.status_callback.write() = None;
        self.set_state(ConnectionState::Empty, None);
    }

    /// Restores a pooled channel with a fresh status callback, without
    /// reopening the transport.
    pub fn reactivate(&self, status_callback: Option<StatusCallback>) {
        *self.status_callback.write() = status_callback;
        self.set_state(ConnectionState::Disconnected, None);
    }

    /// Fetches the current value from the transport.
    ///
    /// # Errors
    ///
    /// Returns the transport failure; an in-service channel also
    /// transitions to `FailedToConnect`.
    pub async fn get(&self) -> Result<SampleBatch, AcquireError> {
        match self.transport.get().await {
            Ok(batch) => Ok(batch),
            Err(e) => {
                self.notify_error(Some(&e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Probes the channel and reports its flattened field names, used to
    /// offer time-field choices for a trigger source.
    ///
    /// # Errors
    ///
    /// Returns the transport failure from the probe.
    pub async fn probe_fields(&self) -> Result<Vec<String>, AcquireError> {
        Ok(self.get().await?.field_names())
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("uri", &self.uri.to_string())
            .field("state", &self.state())
            .field("has_strategy", &self.has_strategy())
            .finish()
    }
}
