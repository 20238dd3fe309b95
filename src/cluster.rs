//! Cluster identity, membership rows, and merge events.
//!
//! A cluster is the durable grouping of source records that resolve to the
//! same real-world entity. Its identifier (the CIF) comes from a monotonic
//! sequence and is never reissued: once a merge retires an identifier, that
//! identifier stays retired forever.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{BatchId, RecordId};

/// Persistent cluster key (CIF).
///
/// Minted from a durable monotonic sequence. Smaller values are older
/// clusters, which is why the merge policy keeps the smallest id as the
/// canonical survivor.
///
/// # Examples
/// ```
/// use kinfold::ClusterId;
///
/// let first = ClusterId::new(1);
/// assert_eq!(format!("{first}"), "C1");
/// assert!(first < ClusterId::new(2));
/// assert_eq!(first.next(), ClusterId::new(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(u64);

impl ClusterId {
    /// Wraps a raw sequence value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Returns the id that follows this one in the sequence.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

impl From<u64> for ClusterId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Persisted record-to-cluster mapping row.
///
/// One row per resolved record. `batch` and `updated_at` identify the commit
/// that last touched the row, so re-pointing caused by merges is auditable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    /// The resolved record.
    pub record: RecordId,
    /// Its current live cluster.
    pub cluster: ClusterId,
    /// Batch whose commit wrote this row.
    pub batch: BatchId,
    /// When that commit happened.
    pub updated_at: DateTime<Utc>,
}

/// A merge decision produced by the resolver: `absorbed` folds into
/// `canonical` and is retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeEvent {
    /// The retired identifier.
    pub absorbed: ClusterId,
    /// The surviving identifier (always the smaller of the two).
    pub canonical: ClusterId,
}

impl fmt::Display for MergeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.absorbed, self.canonical)
    }
}

/// Audit row for a committed merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// The retired identifier.
    pub absorbed: ClusterId,
    /// The surviving identifier.
    pub canonical: ClusterId,
    /// Batch whose commit performed the merge.
    pub batch: BatchId,
    /// When the merge committed.
    pub merged_at: DateTime<Utc>,
}
