//! Trigger correlation engine.
//!
//! In trigger mode the engine consumes a companion trigger-value stream,
//! decides when a trigger condition fires, accumulates samples in its own
//! trigger-local store, and correlates the trigger timestamp with the
//! buffered time-reference field to derive the display window.
//!
//! ## Phases
//!
//! - **Idle**: trigger mode off.
//! - **Armed**: mode on, waiting for a qualifying value.
//! - **Triggered**: an event is latched; post-trigger samples accumulate
//!   until half the buffer capacity exists past the trigger index, then a
//!   window is emitted. [`TriggerEngine::finish_drawing`] re-arms; one
//!   emission per qualifying event.
//! - **DataBehind**: the buffered time reference trails the trigger
//!   timestamp; qualification is suppressed until new data arrives.
//!
//! The very first value delivered after (re)subscription reflects the
//! initial connection, not a real change, and is discarded unconditionally.

use std::fmt;

use fxhash::FxHashMap;

use crate::buffer::FieldBuffer;
use crate::config::TriggerCondition;
use crate::error::ScopeError;

/// Observable phase of the trigger engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPhase {
    /// Trigger mode is off.
    Idle,
    /// Waiting for a qualifying trigger value.
    Armed,
    /// Event latched; accumulating post-trigger samples.
    Triggered,
    /// Buffered data trails the trigger timestamp.
    DataBehind,
}

/// Where a trigger timestamp falls relative to a time-reference array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    /// Before the oldest buffered sample (missed trigger).
    BeforeFirst,
    /// Past the newest buffered sample (data behind).
    AfterLast,
    /// Insertion index inside the buffered range.
    Inside(usize),
}

/// Locates `timestamp` in a sorted, always-increasing time array.
fn locate(time: &[f64], timestamp: f64) -> Location {
    if timestamp < time[0] {
        Location::BeforeFirst
    } else if timestamp > time[time.len() - 1] {
        Location::AfterLast
    } else {
        Location::Inside(time.partition_point(|&t| t < timestamp))
    }
}

/// Advisory condition raised by a draw decision.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerWarning {
    /// The configured data time field is absent from the trigger store.
    TimeFieldMissing,
    /// The trigger fired but carried no usable timestamp.
    TimestampUnset {
        /// The configured trigger time field.
        field: String,
    },
    /// The trigger preceded all buffered data and the buffer was full.
    MissedTrigger {
        /// Seconds between the trigger and the oldest buffered sample.
        behind_secs: f64,
        /// Advisory buffer size (samples) that would have held the trigger.
        recommended: f64,
    },
    /// The buffered time reference trails the trigger timestamp.
    DataBehind {
        /// Seconds of buffered data still missing.
        deficit_secs: f64,
    },
}

impl fmt::Display for TriggerWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeFieldMissing => {
                write!(f, "Data time field is absent in data. Ignoring it.")
            }
            Self::TimestampUnset { field } => {
                write!(
                    f,
                    "Trigger timestamp is not set. Check if the {field} field exists."
                )
            }
            Self::MissedTrigger {
                behind_secs,
                recommended,
            } => write!(
                f,
                "Trigger preceded buffered data by {behind_secs:.1} s; \
                 a buffer of {recommended:.0} samples would have held it."
            ),
            Self::DataBehind { deficit_secs } => write!(
                f,
                "Data is {deficit_secs:.6} seconds behind trigger time. \
                 Waiting for new data before starting triggering again."
            ),
        }
    }
}

/// Result of one draw decision.
#[derive(Debug, Default)]
pub struct DrawOutcome {
    /// True when a new display window was emitted.
    pub emitted: bool,
    /// Advisory conditions for the status layer.
    pub warnings: Vec<TriggerWarning>,
}

/// Rounds an advisory buffer-size recommendation up to three significant
/// decimal digits (12345 becomes 12400).
#[must_use]
pub fn round_capacity_hint(recommended: f64) -> usize {
    if recommended <= 0.0 {
        return 0;
    }
    let exp = recommended.log10().ceil();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let unit = 10f64.powi(((exp as i32) - 3).max(0));
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        ((recommended / unit).ceil() * unit) as usize
    }
}

/// The trigger correlation engine.
///
/// Owns the trigger-local field store while trigger mode is active; the
/// live store hands its buffers over via [`TriggerEngine::transfer`] so a
/// field is never owned by both at once.
#[derive(Debug)]
pub struct TriggerEngine {
    enabled: bool,
    capture_active: bool,
    condition: TriggerCondition,
    level: f64,
    trigger_time_field: Option<String>,
    data_time_field: Option<String>,

    capacity: usize,
    store: FxHashMap<String, FieldBuffer>,
    emitted: FxHashMap<String, Vec<f64>>,

    fire_count: u64,
    latched: bool,
    collect_done: bool,
    data_behind: bool,
    timestamp: Option<f64>,
    last_value: Option<f64>,

    trigger_index: usize,
    window_start: usize,
    marker_enabled: bool,

    missed_count: u64,
    missed_secs: f64,
    recommended_capacity: f64,
    time_field_warned: bool,
}

impl TriggerEngine {
    /// Creates an idle engine.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::InvalidCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, ScopeError> {
        if capacity == 0 {
            return Err(ScopeError::InvalidCapacity(capacity));
        }
        Ok(Self {
            enabled: false,
            capture_active: false,
            condition: TriggerCondition::OnChange,
            level: 0.0,
            trigger_time_field: None,
            data_time_field: None,
            capacity,
            store: FxHashMap::default(),
            emitted: FxHashMap::default(),
            fire_count: 0,
            latched: false,
            collect_done: true,
            data_behind: false,
            timestamp: None,
            last_value: None,
            trigger_index: 0,
            window_start: 0,
            marker_enabled: true,
            missed_count: 0,
            missed_secs: 0.0,
            recommended_capacity: 0.0,
            time_field_warned: false,
        })
    }

    /// Turns trigger mode on or off.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns true while trigger mode is on.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Marks capture as started or stopped. Qualifying values are ignored
    /// while capture is stopped.
    pub fn set_capture_active(&mut self, active: bool) {
        self.capture_active = active;
    }

    /// Selects the qualification rule and threshold level.
    pub fn set_condition(&mut self, condition: TriggerCondition, level: f64) {
        self.condition = condition;
        self.level = level;
    }

    /// Sets the field in the trigger stream carrying the timestamp.
    pub fn set_trigger_time_field(&mut self, field: Option<String>) {
        self.trigger_time_field = field;
    }

    /// Sets the time-reference field used for correlation and resets the
    /// missing-field warning latch.
    pub fn set_data_time_field(&mut self, field: Option<String>) {
        self.data_time_field = field;
        self.time_field_warned = false;
    }

    /// Returns the configured time-reference field.
    #[must_use]
    pub fn data_time_field(&self) -> Option<&str> {
        self.data_time_field.as_deref()
    }

    /// Returns the configured trigger time field.
    #[must_use]
    pub fn trigger_time_field(&self) -> Option<&str> {
        self.trigger_time_field.as_deref()
    }

    /// Changes the trigger-store capacity, truncating existing buffers.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::InvalidCapacity`] if `capacity` is zero.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), ScopeError> {
        if capacity == 0 {
            return Err(ScopeError::InvalidCapacity(capacity));
        }
        self.capacity = capacity;
        for buffer in self.store.values_mut() {
            buffer.set_capacity(capacity)?;
        }
        Ok(())
    }

    /// Returns true when an event is latched and trigger mode is on.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.enabled && self.latched
    }

    /// Returns the observable phase.
    #[must_use]
    pub fn phase(&self) -> TriggerPhase {
        if !self.enabled {
            TriggerPhase::Idle
        } else if self.data_behind {
            TriggerPhase::DataBehind
        } else if self.latched {
            TriggerPhase::Triggered
        } else {
            TriggerPhase::Armed
        }
    }

    /// Returns the newest trigger value seen, if any.
    #[must_use]
    pub fn last_value(&self) -> Option<f64> {
        self.last_value
    }

    /// Returns the advisory buffer-size recommendation from the last
    /// missed trigger, if one is pending.
    #[must_use]
    pub fn recommended_capacity(&self) -> Option<f64> {
        (self.missed_count > 0).then_some(self.recommended_capacity)
    }

    /// Returns the trigger marker position inside the emitted window,
    /// while an emission is pending consumption.
    #[must_use]
    pub fn marker_index(&self) -> Option<usize> {
        (self.is_triggered() && self.marker_enabled)
            .then(|| self.trigger_index - self.window_start)
    }

    /// Status string for the status layer.
    #[must_use]
    pub fn status(&self) -> String {
        if !self.enabled {
            "Off".to_string()
        } else if self.data_behind {
            "Waiting for new data".to_string()
        } else if self.missed_count > 0 {
            format!(
                "Trig off by {:.1} s (Set buf={:.1e})",
                self.missed_secs, self.recommended_capacity
            )
        } else if self.latched {
            "Collecting Data".to_string()
        } else {
            "Waiting for trigger".to_string()
        }
    }

    fn qualifies(&self, value: f64) -> bool {
        match self.condition {
            TriggerCondition::OnChange => true,
            TriggerCondition::GreaterThan => value > self.level,
            TriggerCondition::LessThan => value < self.level,
        }
    }

    /// Handles one update from the trigger stream.
    ///
    /// Counts the delivery, discards the first one after (re)subscription,
    /// and on qualification latches the event, captures the timestamp, and
    /// attempts an immediate draw so companion fields that already satisfy
    /// the window display without waiting for their own next sample.
    pub fn handle_update(&mut self, value: f64, timestamp: Option<f64>) -> DrawOutcome {
        self.fire_count += 1;
        if self.fire_count <= 1 {
            return DrawOutcome::default();
        }

        self.last_value = Some(value);

        if !self.capture_active
            || !self.collect_done
            || self.data_behind
            || !self.qualifies(value)
        {
            return DrawOutcome::default();
        }

        self.latched = true;
        self.collect_done = false;
        self.timestamp = timestamp;
        self.draw_decision()
    }

    /// Appends samples for one field to the trigger-local store.
    ///
    /// Any new data clears the data-behind latch so correlation can be
    /// attempted again.
    pub fn append(&mut self, field: &str, values: &[f64]) {
        let capacity = self.capacity;
        self.store
            .entry(field.to_string())
            .or_insert_with(|| {
                FieldBuffer::new(capacity).expect("capacity validated at construction")
            })
            .append(values);
        self.data_behind = false;
    }

    /// Moves the live store's buffers into the trigger store.
    ///
    /// Called when trigger capture starts so a field is never owned by
    /// both stores at once.
    pub fn transfer(&mut self, live: &mut FxHashMap<String, FieldBuffer>) {
        for (field, buffer) in live.drain() {
            self.append(&field, buffer.as_slice());
        }
    }

    /// Attempts to derive and emit a display window.
    ///
    /// Call after every batch that carried array data; the decision is a
    /// no-op unless an event is latched.
    pub fn draw_decision(&mut self) -> DrawOutcome {
        let mut outcome = DrawOutcome::default();

        if !self.is_triggered() {
            return outcome;
        }

        let time_field = self.data_time_field.clone();
        let time_buffer = time_field
            .as_deref()
            .and_then(|f| self.store.get(f));

        let Some(time_buffer) = time_buffer else {
            // No usable time reference: show the newest samples of every
            // field, warn once if a field was configured but is absent.
            if time_field.is_some() && !self.time_field_warned {
                outcome.warnings.push(TriggerWarning::TimeFieldMissing);
                self.time_field_warned = true;
            }
            self.emitted = self
                .store
                .iter()
                .map(|(k, v)| (k.clone(), v.as_slice().to_vec()))
                .collect();
            self.window_start = 0;
            self.trigger_index = 0;
            self.marker_enabled = false;
            outcome.emitted = true;
            return outcome;
        };

        self.time_field_warned = false;

        let Some(timestamp) = self.timestamp else {
            let field = self
                .trigger_time_field
                .clone()
                .unwrap_or_else(|| "trigger time".to_string());
            tracing::error!(field = %field, "trigger timestamp is not set; skipping draw");
            outcome.warnings.push(TriggerWarning::TimestampUnset { field });
            return outcome;
        };

        let time = time_buffer.as_slice();
        let time_len = time.len();
        let required = self.capacity / 2;
        self.marker_enabled = true;

        match locate(time, timestamp) {
            Location::Inside(idx) => {
                self.missed_count = 0;
                self.trigger_index = idx;
                let after = time_len - idx;
                if after >= required {
                    self.window_start = idx.saturating_sub(required);
                    let end = idx + required;
                    self.emitted = self
                        .store
                        .iter()
                        .filter(|(_, v)| v.len() == time_len)
                        .map(|(k, v)| (k.clone(), v.window(self.window_start, end)))
                        .collect();
                    outcome.emitted = true;
                } else {
                    tracing::debug!(
                        missing = required - after,
                        "waiting for more post-trigger samples"
                    );
                }
            }
            Location::BeforeFirst => {
                if time_len >= self.capacity {
                    // Full buffer and still missed: extrapolate how much
                    // more history would have been needed.
                    let span = time[time_len - 1] - time[0];
                    let deficit = time[0] - timestamp;
                    #[allow(clippy::cast_precision_loss)]
                    let grow = if span > 0.0 {
                        time_len as f64 * deficit / span
                    } else {
                        0.0
                    };
                    self.missed_count += 1;
                    self.missed_secs = deficit;
                    #[allow(clippy::cast_precision_loss)]
                    {
                        self.recommended_capacity = grow + self.capacity as f64;
                    }
                    outcome.warnings.push(TriggerWarning::MissedTrigger {
                        behind_secs: deficit,
                        recommended: self.recommended_capacity,
                    });
                } else {
                    // Not full yet: more history may still arrive in time.
                    self.missed_count = 0;
                }
                self.latched = false;
                self.collect_done = true;
            }
            Location::AfterLast => {
                let deficit = timestamp - time[time_len - 1];
                outcome.warnings.push(TriggerWarning::DataBehind {
                    deficit_secs: deficit,
                });
                self.data_behind = true;
            }
        }

        outcome
    }

    /// Re-arms after the rendering layer consumed an emission.
    ///
    /// Edge-triggered: one qualifying event yields exactly one emitted
    /// window; repeated calls without a new event are no-ops.
    pub fn finish_drawing(&mut self) {
        if self.enabled && self.latched {
            self.latched = false;
            self.collect_done = true;
        }
    }

    /// Resets trigger state on capture stop/start. The delivery counter
    /// restarts, so the next value after resubscription is discarded
    /// again. Stored samples are kept.
    pub fn reset(&mut self) {
        self.fire_count = 0;
        self.latched = false;
        self.collect_done = true;
        self.data_behind = false;
        self.last_value = None;
        self.missed_count = 0;
    }

    /// Returns the last emitted window, field path → samples.
    #[must_use]
    pub fn emitted(&self) -> &FxHashMap<String, Vec<f64>> {
        &self.emitted
    }

    /// Drops every trigger-store and emitted key containing `name`.
    pub fn clear_field(&mut self, name: &str) {
        self.store.retain(|k, _| !k.contains(name));
        self.emitted.retain(|k, _| !k.contains(name));
    }

    /// Drops all trigger-local data.
    pub fn clear_store(&mut self) {
        self.store.clear();
        self.emitted.clear();
    }

    /// Returns the current length of a trigger-store field.
    #[must_use]
    pub fn stored_len(&self, field: &str) -> usize {
        self.store.get(field).map_or(0, FieldBuffer::len)
    }
}
