//! Core engine error types.

use thiserror::Error;

/// Errors surfaced by the core engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// A buffer capacity request was invalid. Rejected synchronously with
    /// no partial mutation; any clamping is caller-side policy.
    #[error("invalid buffer capacity: {0} (must be at least 1 sample)")]
    InvalidCapacity(usize),

    /// The trigger timestamp could not be correlated with buffered data.
    #[error("trigger correlation failed: {0}")]
    Correlation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ScopeError::InvalidCapacity(0).to_string(),
            "invalid buffer capacity: 0 (must be at least 1 sample)"
        );
        assert!(ScopeError::Correlation("timestamp unset".into())
            .to_string()
            .contains("timestamp unset"));
    }
}
