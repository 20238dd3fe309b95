//! The pairwise match scorer boundary.
//!
//! Scoring is an external concern: a trained probabilistic model compares the
//! batch against the full known population and emits candidate edges. The
//! engine only consumes that output, so the boundary is a small trait that
//! implementations (model services, precomputed edge sets, test doubles) can
//! satisfy.

use thiserror::Error;

use crate::edge::CandidateEdge;
use crate::record::StagedRecord;

/// Errors surfaced by scorer implementations.
///
/// All scorer failures abort the batch before any state change, so every
/// variant is safe to retry at the run level.
#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("Scorer unavailable: {message}")]
    Unavailable { message: String },

    #[error("Scoring failed: {message}")]
    Failed { message: String },

    #[error("Scoring timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

/// Produces scored candidate pairs for a batch of unprocessed records.
///
/// Implementations own the full staged population and compare new-vs-all:
/// every returned edge must touch at least one record of the given batch, but
/// the other endpoint may be any previously staged record. Edges below the
/// threshold may be returned; the engine filters again before counting pairs
/// for the guard.
///
/// The call is expected to block (scoring is I/O-bound against a model or a
/// comparison store) and is invoked from a single worker at a time.
pub trait PairScorer: Send + Sync {
    /// Scores one batch against the full population.
    ///
    /// # Errors
    /// Returns a [`ScorerError`] if the collaborator is unreachable, fails,
    /// or times out. The engine aborts the batch without persisting anything.
    fn score_batch(
        &self,
        batch: &[StagedRecord],
        threshold: f64,
    ) -> Result<Vec<CandidateEdge>, ScorerError>;
}
