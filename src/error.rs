//! Error types for kinfold.
//!
//! All errors are strongly typed using thiserror. The taxonomy separates
//! input validation from batch execution, and the top-level [`KinError`]
//! carries classification helpers so callers can route retry-vs-halt without
//! matching individual variants.

use thiserror::Error;

use crate::cluster::ClusterId;
use crate::record::RecordId;
use crate::scorer::ScorerError;
use crate::storage::StorageError;

/// Validation errors raised while checking inputs and configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Match probability {value} is out of range [0.0, 1.0]")]
    ProbabilityOutOfRange { value: f64 },

    #[error("Match threshold {value} is out of range [0.0, 1.0]")]
    ThresholdOutOfRange { value: f64 },

    #[error("Record id cannot be empty")]
    EmptyRecordId,

    #[error("Batch size must be at least 1")]
    BatchSizeZero,

    #[error("Max pairs per batch must be at least 1")]
    PairCapZero,

    #[error("Required placeholder '{placeholder}' is missing from the source query")]
    MissingPlaceholder { placeholder: String },

    #[error("Source query uses placeholder '{placeholder}' that no caller binds")]
    UnknownPlaceholder { placeholder: String },

    #[error("Source query does not select required column '{column}'")]
    MissingColumn { column: String },

    #[error("Staged record is missing required attribute '{attribute}'")]
    MissingAttribute { attribute: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },
}

/// Errors raised while executing the batch pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The candidate-edge count for a batch exceeded the configured maximum.
    /// Nothing was persisted; retry with a smaller batch size or a stricter
    /// match threshold.
    #[error("Guard tripped: {pairs} candidate pairs exceeds the configured maximum of {max_pairs}")]
    GuardTripped { pairs: usize, max_pairs: usize },

    /// The external scorer failed. The batch was aborted before any state
    /// change, so retrying the run is safe.
    #[error("Scorer error: {0}")]
    Scorer(#[from] ScorerError),

    /// A record was found under two distinct live clusters. This means the
    /// membership table is corrupt; processing halts rather than silently
    /// picking one.
    #[error("Invariant violation: record {record} belongs to both {first} and {second}")]
    InvariantViolation {
        record: RecordId,
        first: ClusterId,
        second: ClusterId,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Runtime queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Runtime worker disconnected")]
    WorkerDisconnected,

    #[error("Run did not complete within {duration_ms}ms")]
    JoinTimeout { duration_ms: u64 },
}

/// Top-level error type for kinfold.
#[derive(Debug, Error)]
pub enum KinError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl KinError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an engine error.
    #[must_use]
    pub const fn is_engine(&self) -> bool {
        matches!(self, Self::Engine(_))
    }

    /// Returns true if retrying the run may succeed.
    ///
    /// Guard trips (retry with a smaller batch), scorer failures (nothing was
    /// persisted), backend I/O failures, and runtime backpressure are
    /// retryable. Validation and corruption conditions are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Engine(e) => match e {
                EngineError::GuardTripped { .. }
                | EngineError::Scorer(_)
                | EngineError::QueueFull { .. }
                | EngineError::JoinTimeout { .. } => true,
                EngineError::Storage(s) => matches!(s, StorageError::BackendError(_)),
                EngineError::InvariantViolation { .. } | EngineError::WorkerDisconnected => false,
            },
        }
    }

    /// Returns true if this error signals corrupted persisted state that
    /// needs manual inspection before processing can continue.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        match self {
            Self::Engine(e) => match e {
                EngineError::InvariantViolation { .. } => true,
                EngineError::Storage(s) => matches!(
                    s,
                    StorageError::RetiredCluster(_) | StorageError::SequenceRegression { .. }
                ),
                _ => false,
            },
            Self::Validation(_) => false,
        }
    }
}

impl From<StorageError> for KinError {
    fn from(err: StorageError) -> Self {
        Self::Engine(EngineError::Storage(err))
    }
}

impl From<ScorerError> for KinError {
    fn from(err: ScorerError) -> Self {
        Self::Engine(EngineError::Scorer(err))
    }
}

/// Result type alias for kinfold operations.
pub type KinResult<T> = Result<T, KinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_probability() {
        let err = ValidationError::ProbabilityOutOfRange { value: 1.5 };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn test_guard_tripped_reports_counts() {
        let err = EngineError::GuardTripped {
            pairs: 4_000_001,
            max_pairs: 4_000_000,
        };
        let msg = format!("{err}");
        assert!(msg.contains("4000001"));
        assert!(msg.contains("4000000"));
    }

    #[test]
    fn test_invariant_violation_names_both_clusters() {
        let err = EngineError::InvariantViolation {
            record: RecordId::new("r-1"),
            first: ClusterId::new(1),
            second: ClusterId::new(2),
        };
        let msg = format!("{err}");
        assert!(msg.contains("r-1"));
        assert!(msg.contains("C1"));
        assert!(msg.contains("C2"));
    }

    #[test]
    fn test_guard_tripped_is_retryable_not_corruption() {
        let err: KinError = EngineError::GuardTripped {
            pairs: 10,
            max_pairs: 5,
        }
        .into();
        assert!(err.is_engine());
        assert!(err.is_retryable());
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_scorer_failure_is_retryable() {
        let err: KinError = EngineError::Scorer(ScorerError::Unavailable {
            message: "connection refused".to_string(),
        })
        .into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invariant_violation_is_fatal_corruption() {
        let err: KinError = EngineError::InvariantViolation {
            record: RecordId::new("r-1"),
            first: ClusterId::new(1),
            second: ClusterId::new(2),
        }
        .into();
        assert!(!err.is_retryable());
        assert!(err.is_corruption());
    }

    #[test]
    fn test_retired_cluster_is_corruption() {
        let err: KinError = StorageError::RetiredCluster(ClusterId::new(4)).into();
        assert!(err.is_corruption());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_backend_error_is_retryable() {
        let err: KinError = StorageError::BackendError("disk hiccup".to_string()).into();
        assert!(err.is_retryable());
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_validation_not_retryable() {
        let err: KinError = ValidationError::BatchSizeZero.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

}
