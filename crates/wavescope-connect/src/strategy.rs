//! Acquisition strategies.
//!
//! Two ways of getting data out of a remote channel, selected once at
//! [`Channel::start`] and never mutated mid-flight:
//!
//! - **Polling**: a fixed-interval timer issues a non-blocking get per
//!   cycle. A cycle that would overlap an outstanding get is logged and
//!   dropped, never retried.
//! - **Monitoring**: a single push subscription; the transport's
//!   connectivity callback flips the channel between `Connected` and
//!   `FailedToConnect`. A disconnect while running is an error, not a
//!   clean stop.
//!
//! Teardown is signal-based so stopping from inside a data callback never
//! unwinds the strategy re-entrantly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::channel::Channel;
use crate::state::ConnectionState;
use crate::transport::{BatchCallback, ConnectivityCallback, TransportError};

/// Which strategy is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StrategyKind {
    Poll,
    Monitor,
}

/// Handle to a running strategy.
#[derive(Debug)]
pub(crate) struct Strategy {
    kind: StrategyKind,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Strategy {
    /// Halts the strategy. Polling is signalled to exit; monitoring stops
    /// the transport subscription on a separate task.
    pub(crate) fn stop(mut self, channel: &Channel) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if self.kind == StrategyKind::Monitor {
            let transport = Arc::clone(channel.transport());
            let uri = channel.uri().to_string();
            if let Some(handle) = channel.scheduler() {
                handle.spawn(async move {
                    if let Err(e) = transport.stop_monitor().await {
                        tracing::error!(channel = %uri, error = %e, "failed to stop monitor");
                    }
                });
            } else {
                tracing::error!(channel = %uri, "no scheduler to stop monitor");
            }
        }
    }
}

/// Starts the polling strategy at `1000 / rate` ms per cycle.
pub(crate) fn start_poll(channel: &Arc<Channel>, rate: f64, handle: &Handle) -> Strategy {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let channel = Arc::clone(channel);

    handle.spawn(async move {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let period = Duration::from_millis((1000.0 / rate).max(1.0) as u64);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let in_flight = Arc::new(AtomicBool::new(false));

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    if in_flight.swap(true, Ordering::AcqRel) {
                        tracing::warn!(
                            channel = %channel.uri(),
                            "poll cycle overlaps an outstanding get; dropping it"
                        );
                        continue;
                    }
                    let poll_channel = Arc::clone(&channel);
                    let flag = Arc::clone(&in_flight);
                    tokio::spawn(async move {
                        let result = poll_channel.transport().get().await;
                        flag.store(false, Ordering::Release);
                        match result {
                            Ok(batch) => poll_channel.handle_batch(batch),
                            Err(TransportError::Busy) => {
                                tracing::warn!(
                                    channel = %poll_channel.uri(),
                                    "transport busy; poll result dropped"
                                );
                            }
                            Err(e) => poll_channel.notify_error(Some(&e.to_string())),
                        }
                    });
                }
            }
        }
    });

    Strategy {
        kind: StrategyKind::Poll,
        shutdown: Some(shutdown_tx),
    }
}

/// Starts the monitoring strategy: one push subscription whose callbacks
/// drive the channel state.
pub(crate) fn start_monitor(channel: &Arc<Channel>, handle: &Handle) -> Strategy {
    let subscribe_channel = Arc::clone(channel);

    handle.spawn(async move {
        let on_batch: BatchCallback = {
            let channel = Arc::clone(&subscribe_channel);
            Arc::new(move |batch| channel.handle_batch(batch))
        };
        let on_connectivity: ConnectivityCallback = {
            let channel = Arc::clone(&subscribe_channel);
            Arc::new(move |connected| {
                if connected {
                    channel.set_state(ConnectionState::Connected, None);
                } else if channel.is_running() {
                    // An unexpected disconnect while running is an error,
                    // not a clean stop.
                    channel.notify_error(None);
                }
            })
        };

        let options = subscribe_channel.monitor_options();
        if let Err(e) = subscribe_channel
            .transport()
            .monitor(on_batch, on_connectivity, options)
            .await
        {
            subscribe_channel.notify_error(Some(&e.to_string()));
        }
    });

    Strategy {
        kind: StrategyKind::Monitor,
        shutdown: None,
    }
}
