//! Channel manager.
//!
//! Owns one [`Channel`] per remote identity. Repeated requests for the
//! same `(name, protocol)` reuse and reactivate the cached channel
//! instead of reconnecting; a failed connect-time probe surfaces an error
//! and caches nothing. The manager never hands out a half-initialized
//! channel.

use std::sync::Arc;
use std::time::Duration;

use fxhash::FxHashMap;
use parking_lot::RwLock;
use tokio::runtime::Handle;

use crate::channel::{Channel, StatusCallback};
use crate::error::AcquireError;
use crate::transport::{ChannelUri, MonitorOptions, TransportFactory};

/// Callback receiving a user-facing connect failure message.
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Manager tunables.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Server-side queue depth hint for push subscriptions.
    pub monitor_queue_size: Option<usize>,

    /// Period of the reconnection probe after a failure.
    pub reconnect_period: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            monitor_queue_size: None,
            reconnect_period: Duration::from_secs(5),
        }
    }
}

/// Owns and pools channels by identity.
pub struct ChannelManager {
    factory: TransportFactory,
    config: ManagerConfig,
    scheduler: Option<Handle>,
    cache: RwLock<FxHashMap<ChannelUri, Arc<Channel>>>,
    active: RwLock<Option<Arc<Channel>>>,
}

impl ChannelManager {
    /// Creates a manager with default configuration. The scheduler is
    /// captured from the ambient runtime when one exists.
    #[must_use]
    pub fn new(factory: TransportFactory) -> Self {
        Self::with_config(factory, ManagerConfig::default())
    }

    /// Creates a manager with explicit configuration.
    #[must_use]
    pub fn with_config(factory: TransportFactory, config: ManagerConfig) -> Self {
        Self {
            factory,
            config,
            scheduler: Handle::try_current().ok(),
            cache: RwLock::new(FxHashMap::default()),
            active: RwLock::new(None),
        }
    }

    /// Returns the manager configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Returns a channel for `uri`, reusing the cache when possible.
    ///
    /// A cached channel is reactivated with the new status callback. A
    /// new channel is probed first when `check_connection` is set; probe
    /// failure invokes `error_callback`, returns
    /// [`AcquireError::ConnectFailed`], and caches nothing.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::ConnectFailed`] when the probe fails.
    pub async fn connect(
        &self,
        uri: &ChannelUri,
        status_callback: Option<StatusCallback>,
        error_callback: Option<ErrorCallback>,
        check_connection: bool,
    ) -> Result<Arc<Channel>, AcquireError> {
        if let Some(channel) = self.cache.read().get(uri).cloned() {
            channel.reactivate(status_callback);
            return Ok(channel);
        }

        let transport = (self.factory)(uri);
        let channel = Arc::new(Channel::new(
            uri.clone(),
            transport,
            self.scheduler.clone(),
            MonitorOptions {
                queue_size: self.config.monitor_queue_size,
            },
            status_callback,
        ));

        if check_connection {
            if let Err(e) = channel.get().await {
                let message = format!("Could not get connection to {}.", uri.name);
                tracing::warn!(channel = %uri, error = %e, "connect probe failed");
                if let Some(callback) = error_callback {
                    callback(&message);
                }
                return Err(AcquireError::ConnectFailed {
                    name: uri.name.clone(),
                    message: e.to_string(),
                });
            }
        }

        self.cache.write().insert(uri.clone(), Arc::clone(&channel));
        Ok(channel)
    }

    /// Switches the active channel: stops the previous one, connects (or
    /// reuses) the new one, and marks it active.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::ConnectFailed`] when the probe fails; the
    /// previous channel stays stopped.
    pub async fn switch_to(
        &self,
        uri: &ChannelUri,
        status_callback: Option<StatusCallback>,
        error_callback: Option<ErrorCallback>,
        check_connection: bool,
    ) -> Result<Arc<Channel>, AcquireError> {
        if let Some(previous) = self.active.write().take() {
            previous.stop();
        }
        let channel = self
            .connect(uri, status_callback, error_callback, check_connection)
            .await?;
        *self.active.write() = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// Returns the active channel, if any.
    #[must_use]
    pub fn active(&self) -> Option<Arc<Channel>> {
        self.active.read().clone()
    }

    /// Tears a channel down and evicts it from the cache.
    pub fn remove(&self, uri: &ChannelUri) {
        let channel = self.cache.write().remove(uri);
        if let Some(channel) = channel {
            channel.stop();
            channel.deactivate();
            let mut active = self.active.write();
            if active
                .as_ref()
                .is_some_and(|a| Arc::ptr_eq(a, &channel))
            {
                *active = None;
            }
        }
    }

    /// Returns the number of pooled channels.
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.cache.read().len()
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("pooled", &self.pooled())
            .field("has_active", &self.active.read().is_some())
            .finish()
    }
}
