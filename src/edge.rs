//! Scored candidate pairs.
//!
//! A candidate edge is the scorer's claim that two records may describe the
//! same entity, with a match probability in [0, 1]. Edges are transient: they
//! exist for the lifetime of one batch and are never persisted.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::record::RecordId;

/// An unordered scored pair of record identifiers.
///
/// Endpoints are stored in normalized order (`low <= high`) so that the same
/// pair compares equal regardless of the order the scorer emitted it in.
/// Construction validates the probability range; endpoint equality is allowed
/// and such self-pairs are ignored downstream by the graph builder.
///
/// # Examples
/// ```
/// use kinfold::CandidateEdge;
///
/// let edge = CandidateEdge::new("b", "a", 0.95).unwrap();
/// assert_eq!(edge.low().as_str(), "a");
/// assert_eq!(edge.high().as_str(), "b");
/// assert!(CandidateEdge::new("a", "b", 1.2).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEdge {
    low: RecordId,
    high: RecordId,
    probability: f64,
}

impl CandidateEdge {
    /// Creates an edge, normalizing endpoint order.
    ///
    /// # Errors
    /// Returns [`ValidationError::ProbabilityOutOfRange`] unless the
    /// probability is a finite value in [0, 1].
    pub fn new(
        a: impl Into<RecordId>,
        b: impl Into<RecordId>,
        probability: f64,
    ) -> Result<Self, ValidationError> {
        if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
            return Err(ValidationError::ProbabilityOutOfRange { value: probability });
        }

        let (a, b) = (a.into(), b.into());
        let (low, high) = if a <= b { (a, b) } else { (b, a) };

        Ok(Self {
            low,
            high,
            probability,
        })
    }

    /// The lexically smaller endpoint.
    #[must_use]
    pub fn low(&self) -> &RecordId {
        &self.low
    }

    /// The lexically larger endpoint.
    #[must_use]
    pub fn high(&self) -> &RecordId {
        &self.high
    }

    /// The match probability.
    #[must_use]
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Returns true when both endpoints name the same record.
    #[must_use]
    pub fn is_self_pair(&self) -> bool {
        self.low == self.high
    }
}
