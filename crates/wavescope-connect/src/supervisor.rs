//! Reconnection supervision.
//!
//! When a channel fails while in service, the supervisor arms a periodic
//! lightweight probe against the transport. On the first successful
//! probe it disarms, restarts the channel's strategy if one was running,
//! and invokes the recovery callback so downstream layers can refresh
//! their field descriptions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use crate::channel::Channel;
use crate::state::ConnectionState;

/// Callback invoked after connectivity is restored.
pub type RecoveryCallback = Arc<dyn Fn() + Send + Sync>;

/// Periodic reconnection probe for one channel.
pub struct ReconnectSupervisor {
    channel: Arc<Channel>,
    period: Duration,
    on_recovered: RwLock<Option<RecoveryCallback>>,
    armed: Arc<AtomicBool>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl ReconnectSupervisor {
    /// Creates a disarmed supervisor probing every `period`.
    #[must_use]
    pub fn new(channel: Arc<Channel>, period: Duration) -> Self {
        Self {
            channel,
            period,
            on_recovered: RwLock::new(None),
            armed: Arc::new(AtomicBool::new(false)),
            shutdown: Mutex::new(None),
        }
    }

    /// Registers the recovery callback.
    pub fn on_recovered(&self, callback: RecoveryCallback) {
        *self.on_recovered.write() = Some(callback);
    }

    /// Returns true while the probe timer is running.
    #[must_use]
    pub fn armed(&self) -> bool {
        self.armed.load(Ordering::Relaxed)
    }

    /// Feeds a status transition; `FailedToConnect` arms the probe.
    /// Convenient to call from a channel status callback.
    pub fn handle_state(&self, state: ConnectionState) {
        if state == ConnectionState::FailedToConnect {
            self.arm();
        }
    }

    /// Starts the probe timer. Arming while armed is a no-op.
    pub fn arm(&self) {
        if self.armed.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(handle) = self.channel.scheduler() else {
            tracing::error!("no scheduler available for reconnection probes");
            self.armed.store(false, Ordering::SeqCst);
            return;
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown.lock() = Some(shutdown_tx);

        handle.spawn(probe_loop(
            Arc::clone(&self.channel),
            self.period,
            Arc::clone(&self.armed),
            self.on_recovered.read().clone(),
            shutdown_rx,
        ));
    }

    /// Cancels the probe timer.
    pub fn disarm(&self) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        self.armed.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ReconnectSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectSupervisor")
            .field("channel", &self.channel.uri().to_string())
            .field("period", &self.period)
            .field("armed", &self.armed())
            .finish()
    }
}

async fn probe_loop(
    channel: Arc<Channel>,
    period: Duration,
    armed: Arc<AtomicBool>,
    on_recovered: Option<RecoveryCallback>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => return,
            () = tokio::time::sleep(period) => {
                if channel.transport().get().await.is_ok() {
                    armed.store(false, Ordering::SeqCst);
                    tracing::info!(channel = %channel.uri(), "connection restored");
                    if channel.has_strategy() {
                        if let Err(e) = channel.restart() {
                            tracing::warn!(
                                channel = %channel.uri(),
                                error = %e,
                                "failed to restart strategy after reconnect"
                            );
                        }
                    }
                    if let Some(callback) = on_recovered {
                        callback();
                    }
                    return;
                }
                tracing::debug!(channel = %channel.uri(), "reconnect probe failed; will retry");
            }
        }
    }
}
