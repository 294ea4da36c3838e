//! Engine configuration.
//!
//! All tunables are carried by an explicit, immutable [`ScopeConfig`]
//! passed to constructors; there are no module-level mutable defaults.

use serde::{Deserialize, Serialize};

use crate::error::ScopeError;

/// Default buffer capacity in samples.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Default field carrying the structured trigger timestamp.
pub const DEFAULT_TRIGGER_TIME_FIELD: &str = "timeStamp";

/// Trigger qualification rule evaluated against each newly arrived
/// trigger value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCondition {
    /// Every value change qualifies.
    #[default]
    OnChange,
    /// Qualifies when the value exceeds the level.
    GreaterThan,
    /// Qualifies when the value is below the level.
    LessThan,
}

/// Immutable engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Buffer capacity in samples (`max_length`).
    pub capacity: usize,

    /// Field carrying the main monotonically increasing array id, used
    /// for loss detection.
    pub array_id_field: Option<String>,

    /// Additional per-waveform id fields, each tracked independently.
    pub aux_id_fields: Vec<String>,

    /// Time-reference field used to correlate trigger timestamps with
    /// buffered data.
    pub data_time_field: Option<String>,

    /// Field in the trigger stream carrying the structured timestamp.
    pub trigger_time_field: Option<String>,

    /// Trigger qualification rule.
    pub trigger_condition: TriggerCondition,

    /// Threshold level for the threshold-based qualification rules.
    pub trigger_level: f64,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            array_id_field: None,
            aux_id_fields: Vec::new(),
            data_time_field: None,
            trigger_time_field: Some(DEFAULT_TRIGGER_TIME_FIELD.to_string()),
            trigger_condition: TriggerCondition::OnChange,
            trigger_level: 0.0,
        }
    }
}

impl ScopeConfig {
    /// Creates a configuration with the given capacity and defaults
    /// elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::InvalidCapacity`] if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Result<Self, ScopeError> {
        if capacity == 0 {
            return Err(ScopeError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            ..Self::default()
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::InvalidCapacity`] if the capacity is zero.
    pub fn validate(&self) -> Result<(), ScopeError> {
        if self.capacity == 0 {
            return Err(ScopeError::InvalidCapacity(self.capacity));
        }
        Ok(())
    }
}
