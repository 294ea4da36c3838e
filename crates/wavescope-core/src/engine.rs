//! Engine facade and shared-buffer discipline.
//!
//! [`ScopeEngine`] ties the ingestion store and the trigger engine
//! together behind a single mutex: ingest acquires it, processes the
//! batch, makes the draw decision, and releases before any callback runs.
//! The rendering consumer acquires the same mutex inside
//! [`ScopeEngine::frame`] only long enough to copy out the visible
//! window. Ingestion never blocks on rendering; if the consumer has not
//! picked up the previous frame when a new one is ready, the readable
//! state is simply overwritten (latest wins, no queueing).
//!
//! Callbacks are plain `Arc<dyn Fn>` handles; consumers hold this engine
//! by `Arc` and never a pointer back into its internals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::{Mutex, RwLock};

use crate::config::{ScopeConfig, TriggerCondition};
use crate::error::ScopeError;
use crate::metrics::{MetricsSnapshot, ScopeMetrics};
use crate::store::{AcquireMode, SampleStore};
use crate::trigger::{round_capacity_hint, DrawOutcome, TriggerEngine};
use crate::value::SampleBatch;

/// Callback invoked when the visible window changed.
pub type DrawCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback carrying a user-facing status warning.
pub type WarningCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Field name carrying the trigger value in a trigger-stream batch.
const TRIGGER_VALUE_FIELD: &str = "value";

/// Everything protected by the engine mutex.
struct EngineState {
    store: SampleStore,
    trigger: TriggerEngine,
    mode: AcquireMode,
    capture_active: bool,
}

/// One copied-out display frame.
#[derive(Debug, Clone, Default)]
pub struct FrameSnapshot {
    /// Visible samples, field path → values.
    pub fields: FxHashMap<String, Vec<f64>>,
    /// Trigger sample position inside the window, when a trigger emission
    /// is being displayed.
    pub trigger_marker: Option<usize>,
}

/// Statistics snapshot for the status layer.
#[derive(Debug, Clone)]
pub struct ScopeStatistics {
    /// Acquisition counters.
    pub metrics: MetricsSnapshot,
    /// Occupancy of the fullest live buffer.
    pub occupancy: usize,
    /// Configured buffer capacity.
    pub capacity: usize,
    /// Trigger status string.
    pub trigger_status: String,
    /// Newest trigger value seen.
    pub trigger_value: Option<f64>,
    /// Advisory buffer size after a missed trigger, rounded to three
    /// significant digits. Caller policy whether to apply it.
    pub recommended_capacity: Option<usize>,
}

/// The acquisition engine facade.
pub struct ScopeEngine {
    state: Mutex<EngineState>,
    metrics: ScopeMetrics,
    frozen: AtomicBool,
    draw_ready: RwLock<Option<DrawCallback>>,
    warning: RwLock<Option<WarningCallback>>,
}

impl ScopeEngine {
    /// Creates an engine from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::InvalidCapacity`] if the configured capacity
    /// is zero.
    pub fn new(config: &ScopeConfig) -> Result<Self, ScopeError> {
        let store = SampleStore::new(config)?;
        let mut trigger = TriggerEngine::new(config.capacity)?;
        trigger.set_condition(config.trigger_condition, config.trigger_level);
        trigger.set_trigger_time_field(config.trigger_time_field.clone());
        trigger.set_data_time_field(config.data_time_field.clone());

        Ok(Self {
            state: Mutex::new(EngineState {
                store,
                trigger,
                mode: AcquireMode::FreeRun,
                capture_active: false,
            }),
            metrics: ScopeMetrics::new(),
            frozen: AtomicBool::new(false),
            draw_ready: RwLock::new(None),
            warning: RwLock::new(None),
        })
    }

    /// Registers the draw-ready callback.
    pub fn on_draw_ready(&self, callback: DrawCallback) {
        *self.draw_ready.write() = Some(callback);
    }

    /// Registers the warning callback.
    pub fn on_warning(&self, callback: WarningCallback) {
        *self.warning.write() = Some(callback);
    }

    /// Ingests one batch from the acquisition strategy.
    ///
    /// Frozen batches still count toward the received total but are
    /// otherwise dropped.
    pub fn ingest(&self, batch: &SampleBatch) {
        self.metrics.record_received();
        if self.frozen.load(Ordering::Relaxed) {
            return;
        }

        let (outcome, free_running_data) = {
            let mut state = self.state.lock();
            let mode = state.mode;
            let EngineState { store, trigger, .. } = &mut *state;
            let summary = store.ingest(batch, mode, trigger);

            self.metrics.record_lost(summary.lost);
            if let Some(size) = summary.object_size {
                self.metrics.record_object_size(size);
            }

            let outcome = if summary.got_data {
                trigger.draw_decision()
            } else {
                DrawOutcome::default()
            };
            (
                outcome,
                summary.got_data && mode != AcquireMode::Triggered,
            )
        };

        self.dispatch(&outcome, free_running_data);
    }

    /// Handles one update from the companion trigger stream.
    ///
    /// The batch's `value` field is the trigger value; the timestamp is
    /// read from the configured trigger time field.
    pub fn handle_trigger_batch(&self, batch: &SampleBatch) {
        let Some(value) = batch.scalar(TRIGGER_VALUE_FIELD) else {
            tracing::warn!("trigger update carried no value field; ignoring");
            return;
        };

        let outcome = {
            let mut state = self.state.lock();
            let timestamp = state
                .trigger
                .trigger_time_field()
                .and_then(|field| batch.timestamp(field))
                .map(|ts| ts.as_secs_f64());
            state.trigger.handle_update(value, timestamp)
        };

        self.dispatch(&outcome, false);
    }

    /// Fires callbacks after the mutex was released.
    fn dispatch(&self, outcome: &DrawOutcome, free_running_data: bool) {
        if !outcome.warnings.is_empty() {
            let callback = self.warning.read().clone();
            for warning in &outcome.warnings {
                let message = warning.to_string();
                tracing::warn!(%message, "trigger warning");
                if let Some(callback) = &callback {
                    callback(&message);
                }
            }
        }

        if outcome.emitted || free_running_data {
            let callback = self.draw_ready.read().clone();
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    /// Copies out the visible window for rendering and re-arms the
    /// trigger (edge-triggered emission).
    #[must_use]
    pub fn frame(&self) -> FrameSnapshot {
        let mut state = self.state.lock();
        let fields = match state.mode {
            AcquireMode::FreeRun => state.store.live_snapshot(),
            AcquireMode::Sampling => state.store.sampling_snapshot(),
            AcquireMode::Triggered => state.trigger.emitted().clone(),
        };
        let trigger_marker = state.trigger.marker_index();
        state.trigger.finish_drawing();
        FrameSnapshot {
            fields,
            trigger_marker,
        }
    }

    /// Re-arms the trigger without reading a frame.
    pub fn finish_drawing(&self) {
        self.state.lock().trigger.finish_drawing();
    }

    /// Switches the acquisition mode, clearing the previous owner's
    /// buffers.
    pub fn set_mode(&self, mode: AcquireMode) {
        let mut state = self.state.lock();
        if state.mode == mode {
            return;
        }
        state.mode = mode;
        state.store.clear_buffers();
        state.trigger.clear_store();
        state.trigger.set_enabled(mode == AcquireMode::Triggered);
    }

    /// Returns the current acquisition mode.
    #[must_use]
    pub fn mode(&self) -> AcquireMode {
        self.state.lock().mode
    }

    /// Starts capture. In trigger mode the live buffers transfer to the
    /// trigger-local store.
    pub fn start_capture(&self) {
        let mut state = self.state.lock();
        state.capture_active = true;
        state.trigger.set_capture_active(true);
        if state.mode == AcquireMode::Triggered {
            let EngineState { store, trigger, .. } = &mut *state;
            trigger.transfer(store.live_mut());
        }
    }

    /// Stops capture and resets trigger state. Safe to call repeatedly.
    pub fn stop_capture(&self) {
        let mut state = self.state.lock();
        state.capture_active = false;
        state.trigger.set_capture_active(false);
        state.trigger.reset();
    }

    /// Returns true while capture is running.
    #[must_use]
    pub fn capture_active(&self) -> bool {
        self.state.lock().capture_active
    }

    /// Freezes or unfreezes ingestion without disturbing the buffers.
    pub fn set_frozen(&self, frozen: bool) {
        self.frozen.store(frozen, Ordering::Relaxed);
    }

    /// Changes the buffer capacity of both stores.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::InvalidCapacity`] for a zero capacity; no
    /// buffer is modified in that case.
    pub fn set_capacity(&self, capacity: usize) -> Result<(), ScopeError> {
        if capacity == 0 {
            return Err(ScopeError::InvalidCapacity(capacity));
        }
        let mut state = self.state.lock();
        state.store.set_capacity(capacity)?;
        state.trigger.set_capacity(capacity)
    }

    /// Selects the trigger qualification rule and level.
    pub fn set_trigger_condition(&self, condition: TriggerCondition, level: f64) {
        self.state.lock().trigger.set_condition(condition, level);
    }

    /// Sets the time-reference field used for trigger correlation.
    pub fn set_data_time_field(&self, field: Option<String>) {
        self.state.lock().trigger.set_data_time_field(field);
    }

    /// Sets the trigger-stream field carrying the structured timestamp.
    pub fn set_trigger_time_field(&self, field: Option<String>) {
        self.state.lock().trigger.set_trigger_time_field(field);
    }

    /// Resets the trigger delivery counter, as on trigger resubscription.
    pub fn reset_trigger(&self) {
        self.state.lock().trigger.reset();
    }

    /// Drops all data associated with a source name from every store.
    pub fn clear_field(&self, name: &str) {
        let mut state = self.state.lock();
        state.store.clear_field(name);
        state.trigger.clear_field(name);
    }

    /// Returns a statistics snapshot for the status layer.
    #[must_use]
    pub fn statistics(&self) -> ScopeStatistics {
        let state = self.state.lock();
        ScopeStatistics {
            metrics: self.metrics.snapshot(),
            occupancy: state.store.occupancy(),
            capacity: state.store.capacity(),
            trigger_status: state.trigger.status(),
            trigger_value: state.trigger.last_value(),
            recommended_capacity: state
                .trigger
                .recommended_capacity()
                .map(round_capacity_hint),
        }
    }
}

impl std::fmt::Debug for ScopeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.statistics();
        f.debug_struct("ScopeEngine")
            .field("mode", &self.mode())
            .field("arrays_received", &stats.metrics.arrays_received)
            .field("arrays_lost", &stats.metrics.arrays_lost)
            .field("occupancy", &stats.occupancy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{flatten, ScalarArray, Value};
    use std::sync::atomic::AtomicUsize;

    fn engine(capacity: usize) -> ScopeEngine {
        let mut config = ScopeConfig::with_capacity(capacity).unwrap();
        config.array_id_field = Some("arrayId".into());
        config.data_time_field = Some("time".into());
        ScopeEngine::new(&config).unwrap()
    }

    fn batch(id: i64, wave: Vec<f64>, time: Vec<f64>) -> SampleBatch {
        flatten(&Value::Struct(vec![
            ("arrayId".into(), Value::Long(id)),
            ("wave".into(), Value::Array(ScalarArray::F64(wave))),
            ("time".into(), Value::Array(ScalarArray::F64(time))),
        ]))
    }

    fn trigger_batch(value: f64, secs: i64) -> SampleBatch {
        flatten(&Value::Struct(vec![
            ("value".into(), Value::Double(value)),
            (
                "timeStamp".into(),
                Value::Struct(vec![
                    ("secondsPastEpoch".into(), Value::Long(secs)),
                    ("nanoseconds".into(), Value::Long(0)),
                ]),
            ),
        ]))
    }

    #[test]
    fn test_free_run_frame_is_buffer_tail() {
        let engine = engine(4);
        engine.ingest(&batch(1, vec![1.0, 2.0, 3.0], vec![0.1, 0.2, 0.3]));
        engine.ingest(&batch(2, vec![4.0, 5.0], vec![0.4, 0.5]));

        let frame = engine.frame();
        assert_eq!(frame.fields["wave"], vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(frame.trigger_marker, None);
    }

    #[test]
    fn test_draw_ready_fires_per_batch_in_free_run() {
        let engine = engine(8);
        let draws = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&draws);
        engine.on_draw_ready(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        engine.ingest(&batch(1, vec![1.0], vec![0.1]));
        engine.ingest(&batch(2, vec![2.0], vec![0.2]));
        assert_eq!(draws.load(Ordering::SeqCst), 2);

        // An id-only batch carries no array data and draws nothing.
        let id_only = flatten(&Value::Struct(vec![("arrayId".into(), Value::Long(3))]));
        engine.ingest(&id_only);
        assert_eq!(draws.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_frozen_batches_count_but_do_not_store() {
        let engine = engine(8);
        engine.set_frozen(true);
        engine.ingest(&batch(1, vec![1.0], vec![0.1]));
        engine.set_frozen(false);
        engine.ingest(&batch(2, vec![2.0], vec![0.2]));

        let stats = engine.statistics();
        assert_eq!(stats.metrics.arrays_received, 2);
        assert_eq!(engine.frame().fields["wave"], vec![2.0]);
    }

    #[test]
    fn test_lost_arrays_reach_statistics() {
        let engine = engine(8);
        engine.ingest(&batch(1, vec![1.0], vec![0.1]));
        engine.ingest(&batch(4, vec![2.0], vec![0.2]));

        let stats = engine.statistics();
        assert_eq!(stats.metrics.arrays_lost, 2);
        assert!(stats.metrics.object_size > 0);
    }

    #[test]
    fn test_triggered_window_end_to_end() {
        let engine = engine(6);
        engine.set_mode(AcquireMode::Triggered);
        engine.start_capture();

        let draws = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&draws);
        engine.on_draw_ready(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // Data accumulates in the trigger store; no draws yet.
        engine.ingest(&batch(1, vec![10.0, 20.0, 30.0], vec![1.0, 2.0, 3.0]));
        assert_eq!(draws.load(Ordering::SeqCst), 0);

        // First trigger delivery is the connection artifact.
        engine.handle_trigger_batch(&trigger_batch(1.0, 2));
        assert_eq!(draws.load(Ordering::SeqCst), 0);

        // Second delivery fires at t=2.0: idx 1, needs 3 past it.
        engine.handle_trigger_batch(&trigger_batch(2.0, 2));
        assert_eq!(draws.load(Ordering::SeqCst), 0);

        engine.ingest(&batch(2, vec![40.0], vec![4.0]));
        assert_eq!(draws.load(Ordering::SeqCst), 1);

        let frame = engine.frame();
        assert_eq!(frame.fields["time"], vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(frame.fields["wave"], vec![10.0, 20.0, 30.0, 40.0]);
        assert_eq!(frame.trigger_marker, Some(1));

        // Edge-triggered: the frame re-armed the engine, so more data
        // emits nothing until the next qualifying event.
        engine.ingest(&batch(3, vec![50.0], vec![5.0]));
        assert_eq!(draws.load(Ordering::SeqCst), 1);
        assert_eq!(engine.statistics().trigger_status, "Waiting for trigger");
    }

    #[test]
    fn test_warning_callback_receives_data_behind() {
        let engine = engine(6);
        engine.set_mode(AcquireMode::Triggered);
        engine.start_capture();

        let messages = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        engine.on_warning(Arc::new(move |msg: &str| {
            sink.lock().push(msg.to_string());
        }));

        engine.ingest(&batch(1, vec![1.0], vec![95.0]));
        engine.handle_trigger_batch(&trigger_batch(0.0, 100));
        engine.handle_trigger_batch(&trigger_batch(1.0, 100));

        let messages = messages.lock();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("behind trigger time"));
        assert_eq!(engine.statistics().trigger_status, "Waiting for new data");
    }

    #[test]
    fn test_mode_switch_clears_buffers() {
        let engine = engine(8);
        engine.ingest(&batch(1, vec![1.0, 2.0], vec![0.1, 0.2]));
        engine.set_mode(AcquireMode::Sampling);
        assert!(engine.frame().fields.is_empty());

        // Switching to the same mode is a no-op and keeps data.
        engine.ingest(&batch(2, vec![3.0], vec![0.3]));
        let before = engine.frame();
        engine.set_mode(AcquireMode::Sampling);
        assert_eq!(engine.frame().fields.len(), before.fields.len());
    }

    #[test]
    fn test_capacity_error_is_synchronous() {
        let engine = engine(8);
        engine.ingest(&batch(1, vec![1.0, 2.0], vec![0.1, 0.2]));
        assert_eq!(
            engine.set_capacity(0).unwrap_err(),
            ScopeError::InvalidCapacity(0)
        );
        // No partial mutation.
        assert_eq!(engine.frame().fields["wave"], vec![1.0, 2.0]);
        assert!(engine.set_capacity(3).is_ok());
    }

    #[test]
    fn test_clear_field_spans_all_stores() {
        let engine = engine(8);
        engine.ingest(&batch(1, vec![1.0], vec![0.1]));
        engine.clear_field("wave");
        assert!(!engine.frame().fields.contains_key("wave"));
    }

    #[test]
    fn test_recommended_capacity_is_rounded() {
        let engine = engine(5);
        engine.set_mode(AcquireMode::Triggered);
        engine.start_capture();

        // Full time buffer [10..14]; trigger at 8.0 was missed.
        engine.ingest(&batch(
            1,
            vec![0.0; 5],
            vec![10.0, 11.0, 12.0, 13.0, 14.0],
        ));
        engine.handle_trigger_batch(&trigger_batch(0.0, 8));
        engine.handle_trigger_batch(&trigger_batch(1.0, 8));

        // grow = 5 * 2 / 4 = 2.5, + capacity 5 = 7.5, rounded up to 8.
        assert_eq!(engine.statistics().recommended_capacity, Some(8));
        assert!(engine
            .statistics()
            .trigger_status
            .starts_with("Trig off by"));
    }

    #[test]
    fn test_stop_capture_resets_artifact_discard() {
        let engine = engine(6);
        engine.set_mode(AcquireMode::Triggered);
        engine.start_capture();
        engine.ingest(&batch(1, vec![1.0, 2.0, 3.0, 4.0], vec![1.0, 2.0, 3.0, 4.0]));

        engine.handle_trigger_batch(&trigger_batch(1.0, 2));
        engine.handle_trigger_batch(&trigger_batch(2.0, 2));
        assert_eq!(engine.statistics().trigger_status, "Collecting Data");

        engine.stop_capture();
        engine.start_capture();
        // After a restart the first delivery is discarded again.
        engine.handle_trigger_batch(&trigger_batch(3.0, 2));
        assert_eq!(engine.statistics().trigger_status, "Waiting for trigger");
    }
}
