//! # Wavescope Core
//!
//! The acquisition core for trigger-synchronized instrument monitoring:
//! bounded per-field sample buffers, array-sequence loss detection, and
//! the trigger correlation engine that freezes a display window around a
//! trigger timestamp.
//!
//! Batches arrive as opaque `field path → array` maps from whatever
//! transport feeds the engine (see the `wavescope-connect` crate); this
//! crate owns everything from flattening onward.
//!
//! ## Architecture
//!
//! ```text
//! transport batch ──▶ flatten ──▶ ScopeEngine::ingest
//!                                    │  (one mutex: store + trigger)
//!                  ┌─────────────────┼─────────────────┐
//!                  ▼                 ▼                 ▼
//!              free run          sampling          triggered
//!           live FieldBuffers   newest element   trigger-local store
//!                  │                 │                 │ locate(timestamp)
//!                  └────────────▶ frame() ◀────────────┘
//!                             (copy-out, latest wins)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use wavescope_core::{ScopeConfig, ScopeEngine};
//!
//! let mut config = ScopeConfig::with_capacity(4096)?;
//! config.array_id_field = Some("arrayId".into());
//! let engine = ScopeEngine::new(&config)?;
//!
//! engine.on_draw_ready(Arc::new(|| redraw()));
//! engine.ingest(&batch);
//! let frame = engine.frame();
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
        clippy::cast_possible_truncation,
        clippy::unreadable_literal
    )
)]

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod sequence;
pub mod store;
pub mod trigger;
pub mod value;

pub use buffer::FieldBuffer;
pub use config::{ScopeConfig, TriggerCondition, DEFAULT_CAPACITY};
pub use engine::{DrawCallback, FrameSnapshot, ScopeEngine, ScopeStatistics, WarningCallback};
pub use error::ScopeError;
pub use metrics::{MetricsSnapshot, RateSample, RateTracker, RenderRate, ScopeMetrics};
pub use sequence::SequenceTracker;
pub use store::{AcquireMode, SampleStore};
pub use trigger::{
    round_capacity_hint, DrawOutcome, TriggerEngine, TriggerPhase, TriggerWarning,
};
pub use value::{flatten, FieldArray, SampleBatch, ScalarArray, Timestamp, Value};
