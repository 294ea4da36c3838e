//! Bounded ingestion store.
//!
//! Receives flattened batches from the active acquisition strategy and
//! maintains one bounded [`FieldBuffer`] per field. Depending on the
//! acquisition mode a batch is appended to the live buffers (free
//! running), reduced to its newest element (sampling), or handed to the
//! trigger engine (triggered). A field is owned by exactly one store at
//! a time.
//!
//! The store also runs array-sequence loss detection over the configured
//! id fields and sizes the delivered object once, from the element width
//! and length of each array in the first batch.

use fxhash::FxHashMap;

use crate::buffer::FieldBuffer;
use crate::config::ScopeConfig;
use crate::error::ScopeError;
use crate::sequence::SequenceTracker;
use crate::trigger::TriggerEngine;
use crate::value::SampleBatch;

/// How incoming batches are retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquireMode {
    /// Continuous display of the most recent `capacity` samples.
    #[default]
    FreeRun,
    /// Keep only the newest element of each field per batch. For viewing
    /// several sources with different update rates side by side.
    Sampling,
    /// Forward samples to the trigger engine; display freezes around a
    /// trigger event.
    Triggered,
}

/// Per-batch ingestion result.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestSummary {
    /// True if at least one array-like field was present.
    pub got_data: bool,
    /// Arrays lost this batch, summed over all tracked id sources.
    pub lost: u64,
    /// Estimated object size, present only on the sizing batch.
    pub object_size: Option<u64>,
}

/// Bounded per-field sample store with loss accounting.
#[derive(Debug)]
pub struct SampleStore {
    capacity: usize,
    array_id_field: Option<String>,
    aux_id_fields: Vec<String>,
    trackers: FxHashMap<String, SequenceTracker>,
    live: FxHashMap<String, FieldBuffer>,
    latest: FxHashMap<String, f64>,
    object_size: Option<u64>,
}

impl SampleStore {
    /// Creates an empty store from the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::InvalidCapacity`] if the configured capacity
    /// is zero.
    pub fn new(config: &ScopeConfig) -> Result<Self, ScopeError> {
        config.validate()?;
        Ok(Self {
            capacity: config.capacity,
            array_id_field: config.array_id_field.clone(),
            aux_id_fields: config.aux_id_fields.clone(),
            trackers: FxHashMap::default(),
            live: FxHashMap::default(),
            latest: FxHashMap::default(),
            object_size: None,
        })
    }

    /// Returns the buffer capacity in samples.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the buffer capacity, truncating existing buffers.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::InvalidCapacity`] if `capacity` is zero; no
    /// buffer is touched in that case.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), ScopeError> {
        if capacity == 0 {
            return Err(ScopeError::InvalidCapacity(capacity));
        }
        self.capacity = capacity;
        for buffer in self.live.values_mut() {
            buffer.set_capacity(capacity)?;
        }
        Ok(())
    }

    /// Ingests one flattened batch under the engine lock.
    ///
    /// Sequence trackers update once per batch per id source; every other
    /// non-empty array field is retained according to `mode`. The object
    /// size estimate is computed on the first batch after a size-unknown
    /// state and reported in the summary exactly once.
    pub fn ingest(
        &mut self,
        batch: &SampleBatch,
        mode: AcquireMode,
        trigger: &mut TriggerEngine,
    ) -> IngestSummary {
        let mut summary = IngestSummary::default();
        let sizing = self.object_size.is_none();
        let mut new_size: u64 = 0;

        for (field, array) in batch.iter() {
            let is_main_id = self.array_id_field.as_deref() == Some(field.as_str());
            if is_main_id || self.aux_id_fields.iter().any(|f| f == field) {
                if let Some(&id) = array.values.last() {
                    #[allow(clippy::cast_possible_truncation)]
                    let skipped = self
                        .trackers
                        .entry(field.clone())
                        .or_default()
                        .observe(id as i64);
                    summary.lost += skipped;
                }
                if is_main_id {
                    if sizing {
                        new_size += 4;
                    }
                    // The id field is bookkeeping, not waveform data.
                    continue;
                }
            }

            if array.is_empty() {
                continue;
            }

            if sizing {
                new_size += (array.elem_width * array.len()) as u64;
            }
            summary.got_data = true;

            match mode {
                AcquireMode::Sampling => {
                    if let Some(&newest) = array.values.last() {
                        self.latest.insert(field.clone(), newest);
                    }
                }
                AcquireMode::Triggered => {
                    trigger.append(field, &array.values);
                }
                AcquireMode::FreeRun => {
                    let capacity = self.capacity;
                    self.live
                        .entry(field.clone())
                        .or_insert_with(|| {
                            FieldBuffer::new(capacity)
                                .expect("capacity validated at construction")
                        })
                        .append(&array.values);
                }
            }
        }

        if sizing && new_size > 0 {
            self.object_size = Some(new_size);
            summary.object_size = Some(new_size);
        }

        summary
    }

    /// Returns the live buffer for a field.
    #[must_use]
    pub fn live(&self, field: &str) -> Option<&FieldBuffer> {
        self.live.get(field)
    }

    /// Returns the live buffer map for hand-off to the trigger store.
    pub(crate) fn live_mut(&mut self) -> &mut FxHashMap<String, FieldBuffer> {
        &mut self.live
    }

    /// Copies the live buffers out, field path → samples.
    #[must_use]
    pub fn live_snapshot(&self) -> FxHashMap<String, Vec<f64>> {
        self.live
            .iter()
            .map(|(k, v)| (k.clone(), v.as_slice().to_vec()))
            .collect()
    }

    /// Advances the sampling histories by one frame and returns them.
    ///
    /// Each field's newest sampled value is appended to its history; a
    /// source that started later than the others is padded at the front
    /// with zeros up to the common length `min(longest + 1, capacity)`.
    #[must_use]
    pub fn sampling_snapshot(&mut self) -> FxHashMap<String, Vec<f64>> {
        let longest = self.live.values().map(FieldBuffer::len).max().unwrap_or(0);
        let frame_len = (longest + 1).min(self.capacity);

        let capacity = self.capacity;
        for (field, &value) in &self.latest {
            let buffer = self
                .live
                .entry(field.clone())
                .or_insert_with(|| {
                    FieldBuffer::new(capacity).expect("capacity validated at construction")
                });
            buffer.append(&[value]);
            if buffer.len() < frame_len {
                let mut padded = vec![0.0; frame_len - buffer.len()];
                padded.extend_from_slice(buffer.as_slice());
                buffer.clear();
                buffer.append(&padded);
            }
        }

        self.live_snapshot()
    }

    /// Drops every stored key containing `name` from the live buffers and
    /// the sampling map.
    pub fn clear_field(&mut self, name: &str) {
        self.live.retain(|k, _| !k.contains(name));
        self.latest.retain(|k, _| !k.contains(name));
    }

    /// Drops the buffered data but keeps loss tracking and sizing, as on
    /// an acquisition-mode switch.
    pub fn clear_buffers(&mut self) {
        self.live.clear();
        self.latest.clear();
    }

    /// Drops all stored data and restarts loss tracking and sizing.
    pub fn clear(&mut self) {
        self.live.clear();
        self.latest.clear();
        self.trackers.clear();
        self.object_size = None;
    }

    /// Returns the estimated object size, if sized.
    #[must_use]
    pub fn object_size(&self) -> Option<u64> {
        self.object_size
    }

    /// Returns the current occupancy of the fullest live buffer.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.live.values().map(FieldBuffer::len).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{flatten, ScalarArray, Value};

    fn config() -> ScopeConfig {
        let mut config = ScopeConfig::with_capacity(10).unwrap();
        config.array_id_field = Some("arrayId".into());
        config
    }

    fn trigger() -> TriggerEngine {
        TriggerEngine::new(10).unwrap()
    }

    fn batch(id: i64, wave: Vec<i16>) -> SampleBatch {
        flatten(&Value::Struct(vec![
            ("arrayId".into(), Value::Long(id)),
            ("wave".into(), Value::Array(ScalarArray::I16(wave))),
        ]))
    }

    #[test]
    fn test_free_run_append_truncates() {
        let mut store = SampleStore::new(&config()).unwrap();
        let mut trig = trigger();

        let wave: Vec<i16> = (1..=9).collect();
        store.ingest(&batch(1, wave), AcquireMode::FreeRun, &mut trig);
        store.ingest(&batch(2, vec![10, 11]), AcquireMode::FreeRun, &mut trig);

        let expected: Vec<f64> = (2..=11).map(f64::from).collect();
        assert_eq!(store.live("wave").unwrap().as_slice(), expected.as_slice());
        assert!(store.live("wave").unwrap().len() <= store.capacity());
    }

    #[test]
    fn test_loss_detection_main_id() {
        let mut store = SampleStore::new(&config()).unwrap();
        let mut trig = trigger();

        let mut lost = 0;
        for id in [1, 2, 4, 5] {
            lost += store
                .ingest(&batch(id, vec![0]), AcquireMode::FreeRun, &mut trig)
                .lost;
        }
        assert_eq!(lost, 1);
    }

    #[test]
    fn test_loss_detection_aux_ids_are_independent() {
        let mut cfg = config();
        cfg.aux_id_fields = vec!["det2.id".into()];
        let mut store = SampleStore::new(&cfg).unwrap();
        let mut trig = trigger();

        let make = |main: i64, aux: i64| {
            flatten(&Value::Struct(vec![
                ("arrayId".into(), Value::Long(main)),
                (
                    "det2".into(),
                    Value::Struct(vec![("id".into(), Value::Long(aux))]),
                ),
            ]))
        };

        let mut lost = 0;
        lost += store.ingest(&make(1, 10), AcquireMode::FreeRun, &mut trig).lost;
        // Main id skips one, aux id skips two: three lost in one batch.
        lost += store.ingest(&make(3, 13), AcquireMode::FreeRun, &mut trig).lost;
        assert_eq!(lost, 3);

        // Aux id fields still land in the live buffers as data.
        assert_eq!(store.live("det2.id").unwrap().as_slice(), &[10.0, 13.0]);
        // The main id field is bookkeeping only.
        assert!(store.live("arrayId").is_none());
    }

    #[test]
    fn test_object_size_estimated_once() {
        let mut store = SampleStore::new(&config()).unwrap();
        let mut trig = trigger();

        // 4 bytes for the id + 5 i16 samples.
        let summary = store.ingest(&batch(1, vec![1, 2, 3, 4, 5]), AcquireMode::FreeRun, &mut trig);
        assert_eq!(summary.object_size, Some(4 + 2 * 5));
        assert_eq!(store.object_size(), Some(14));

        // Later batches never re-size.
        let summary = store.ingest(&batch(2, vec![1; 100]), AcquireMode::FreeRun, &mut trig);
        assert_eq!(summary.object_size, None);
        assert_eq!(store.object_size(), Some(14));
    }

    #[test]
    fn test_sampling_keeps_newest_element() {
        let mut store = SampleStore::new(&config()).unwrap();
        let mut trig = trigger();

        store.ingest(&batch(1, vec![7, 8, 9]), AcquireMode::Sampling, &mut trig);
        let frame = store.sampling_snapshot();
        assert_eq!(frame["wave"], vec![9.0]);

        store.ingest(&batch(2, vec![4]), AcquireMode::Sampling, &mut trig);
        let frame = store.sampling_snapshot();
        assert_eq!(frame["wave"], vec![9.0, 4.0]);
    }

    #[test]
    fn test_sampling_pads_late_starters() {
        let mut store = SampleStore::new(&config()).unwrap();
        let mut trig = trigger();

        for i in 0..3 {
            store.ingest(&batch(i, vec![1]), AcquireMode::Sampling, &mut trig);
            store.sampling_snapshot();
        }

        // A second source appears late and is padded with zeros in front.
        let late = flatten(&Value::Struct(vec![(
            "late".into(),
            Value::Array(ScalarArray::F64(vec![5.0])),
        )]));
        store.ingest(&late, AcquireMode::Sampling, &mut trig);
        let frame = store.sampling_snapshot();

        assert_eq!(frame["wave"].len(), 4);
        assert_eq!(frame["late"], vec![0.0, 0.0, 0.0, 5.0]);
    }

    #[test]
    fn test_trigger_mode_forwards_to_trigger_store() {
        let mut store = SampleStore::new(&config()).unwrap();
        let mut trig = trigger();

        let summary = store.ingest(&batch(1, vec![1, 2, 3]), AcquireMode::Triggered, &mut trig);
        assert!(summary.got_data);
        assert!(store.live("wave").is_none());
        assert_eq!(trig.stored_len("wave"), 3);
    }

    #[test]
    fn test_got_data_false_for_id_only_batch() {
        let mut store = SampleStore::new(&config()).unwrap();
        let mut trig = trigger();

        let id_only = flatten(&Value::Struct(vec![("arrayId".into(), Value::Long(1))]));
        let summary = store.ingest(&id_only, AcquireMode::FreeRun, &mut trig);
        assert!(!summary.got_data);
    }

    #[test]
    fn test_clear_field_by_source_name() {
        let mut store = SampleStore::new(&config()).unwrap();
        let mut trig = trigger();

        store.ingest(&batch(1, vec![1]), AcquireMode::FreeRun, &mut trig);
        store.clear_field("wave");
        assert!(store.live("wave").is_none());
    }

    #[test]
    fn test_capacity_change_truncates() {
        let mut store = SampleStore::new(&config()).unwrap();
        let mut trig = trigger();

        store.ingest(&batch(1, (1..=8).collect()), AcquireMode::FreeRun, &mut trig);
        store.set_capacity(3).unwrap();
        assert_eq!(store.live("wave").unwrap().as_slice(), &[6.0, 7.0, 8.0]);

        assert!(store.set_capacity(0).is_err());
        assert_eq!(store.capacity(), 3);
    }

    #[test]
    fn test_clear_restarts_sizing_and_tracking() {
        let mut store = SampleStore::new(&config()).unwrap();
        let mut trig = trigger();

        store.ingest(&batch(5, vec![1]), AcquireMode::FreeRun, &mut trig);
        store.clear();
        assert_eq!(store.object_size(), None);
        assert_eq!(store.occupancy(), 0);

        // After the reset an id jump is a fresh first observation.
        let summary = store.ingest(&batch(50, vec![1]), AcquireMode::FreeRun, &mut trig);
        assert_eq!(summary.lost, 0);
        assert!(summary.object_size.is_some());
    }
}
