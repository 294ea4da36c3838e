//! Testing utilities for the connection layer.
//!
//! Provides a scriptable [`MockTransport`] and batch fixture helpers used
//! by this crate's tests and by integrations testing against the
//! transport boundary.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use wavescope_core::{flatten, SampleBatch, ScalarArray, Value};

use crate::transport::{
    BatchCallback, ChannelTransport, ConnectivityCallback, MonitorOptions, TransportError,
};

/// A scriptable in-memory transport.
///
/// `get` results can be scripted per call or defaulted; the captured
/// monitor sink lets tests push batches and connectivity flips as if the
/// remote end produced them.
pub struct MockTransport {
    scripted_gets: Mutex<VecDeque<Result<SampleBatch, TransportError>>>,
    default_get: Mutex<Result<SampleBatch, TransportError>>,
    get_delay: Mutex<Option<Duration>>,
    get_calls: AtomicUsize,
    concurrent_gets: AtomicUsize,
    max_concurrent_gets: AtomicUsize,
    monitor_sink: Mutex<Option<(BatchCallback, ConnectivityCallback)>>,
    monitor_starts: AtomicUsize,
    monitor_stops: AtomicUsize,
    last_monitor_options: Mutex<Option<MonitorOptions>>,
}

impl MockTransport {
    /// Creates a transport whose gets return an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripted_gets: Mutex::new(VecDeque::new()),
            default_get: Mutex::new(Ok(SampleBatch::new())),
            get_delay: Mutex::new(None),
            get_calls: AtomicUsize::new(0),
            concurrent_gets: AtomicUsize::new(0),
            max_concurrent_gets: AtomicUsize::new(0),
            monitor_sink: Mutex::new(None),
            monitor_starts: AtomicUsize::new(0),
            monitor_stops: AtomicUsize::new(0),
            last_monitor_options: Mutex::new(None),
        }
    }

    /// Scripts the result of the next get; scripted results are consumed
    /// in order before the default applies.
    pub fn script_get(&self, result: Result<SampleBatch, TransportError>) {
        self.scripted_gets.lock().push_back(result);
    }

    /// Scripts the next `n` gets to fail with `Disconnected`.
    pub fn fail_next_gets(&self, n: usize) {
        for _ in 0..n {
            self.script_get(Err(TransportError::Disconnected));
        }
    }

    /// Sets the result returned once the script is exhausted.
    pub fn set_default_get(&self, result: Result<SampleBatch, TransportError>) {
        *self.default_get.lock() = result;
    }

    /// Makes every get take this long, for overlap testing.
    pub fn set_get_delay(&self, delay: Duration) {
        *self.get_delay.lock() = Some(delay);
    }

    /// Returns how many gets were issued.
    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::Relaxed)
    }

    /// Returns the highest number of gets that were in flight at once.
    #[must_use]
    pub fn max_concurrent_gets(&self) -> usize {
        self.max_concurrent_gets.load(Ordering::Relaxed)
    }

    /// Returns true while a monitor subscription is open.
    #[must_use]
    pub fn monitoring(&self) -> bool {
        self.monitor_sink.lock().is_some()
    }

    /// Returns how many subscriptions were opened.
    #[must_use]
    pub fn monitor_starts(&self) -> usize {
        self.monitor_starts.load(Ordering::Relaxed)
    }

    /// Returns how many subscriptions were stopped.
    #[must_use]
    pub fn monitor_stops(&self) -> usize {
        self.monitor_stops.load(Ordering::Relaxed)
    }

    /// Returns the options the last subscription was opened with.
    #[must_use]
    pub fn last_monitor_options(&self) -> Option<MonitorOptions> {
        *self.last_monitor_options.lock()
    }

    /// Pushes one batch through the open monitor subscription.
    ///
    /// # Panics
    ///
    /// Panics if no subscription is open.
    pub fn deliver(&self, batch: SampleBatch) {
        let callback = {
            let sink = self.monitor_sink.lock();
            let (on_batch, _) = sink.as_ref().expect("no monitor subscription open");
            Arc::clone(on_batch)
        };
        callback(batch);
    }

    /// Flips connectivity on the open monitor subscription.
    ///
    /// # Panics
    ///
    /// Panics if no subscription is open.
    pub fn set_connected(&self, connected: bool) {
        let callback = {
            let sink = self.monitor_sink.lock();
            let (_, on_connectivity) = sink.as_ref().expect("no monitor subscription open");
            Arc::clone(on_connectivity)
        };
        callback(connected);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelTransport for MockTransport {
    async fn get(&self) -> Result<SampleBatch, TransportError> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        let now = self.concurrent_gets.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_gets.fetch_max(now, Ordering::SeqCst);

        let delay = *self.get_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = self
            .scripted_gets
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_get.lock().clone());

        self.concurrent_gets.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn monitor(
        &self,
        on_batch: BatchCallback,
        on_connectivity: ConnectivityCallback,
        options: MonitorOptions,
    ) -> Result<(), TransportError> {
        self.monitor_starts.fetch_add(1, Ordering::Relaxed);
        *self.last_monitor_options.lock() = Some(options);
        *self.monitor_sink.lock() = Some((on_batch, on_connectivity));
        Ok(())
    }

    async fn stop_monitor(&self) -> Result<(), TransportError> {
        self.monitor_stops.fetch_add(1, Ordering::Relaxed);
        *self.monitor_sink.lock() = None;
        Ok(())
    }
}

/// Builds a waveform batch with an `arrayId`, a `wave` array, and a
/// strictly increasing `time` array continuing across sequential ids.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn ramp_batch(id: i64, samples: usize) -> SampleBatch {
    let base = (id - 1) as f64 * samples as f64;
    let time: Vec<f64> = (0..samples).map(|i| base + i as f64 + 1.0).collect();
    let wave: Vec<f64> = time.iter().map(|t| t * 10.0).collect();
    flatten(&Value::Struct(vec![
        ("arrayId".into(), Value::Long(id)),
        ("wave".into(), Value::Array(ScalarArray::F64(wave))),
        ("time".into(), Value::Array(ScalarArray::F64(time))),
    ]))
}

/// Builds one trigger-stream update with a `value` and a structured
/// timestamp.
#[must_use]
pub fn trigger_update(value: f64, secs: i64, nanos: i64) -> SampleBatch {
    flatten(&Value::Struct(vec![
        ("value".into(), Value::Double(value)),
        (
            "timeStamp".into(),
            Value::Struct(vec![
                ("secondsPastEpoch".into(), Value::Long(secs)),
                ("nanoseconds".into(), Value::Long(nanos)),
            ]),
        ),
    ]))
}
