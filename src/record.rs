//! Staged records and batch identity.
//!
//! A staged record is a cleaned source row awaiting cluster assignment:
//! - Identified by a source-stable primary key ([`RecordId`])
//! - Carries normalized attributes as opaque JSON
//! - Its cluster and processed fields stay unset until a batch commit

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::ClusterId;

/// Source-stable primary key of a staged record.
///
/// Ordering is plain string ordering, which is also the order in which
/// unprocessed records are paged out of the store.
///
/// # Examples
/// ```
/// use kinfold::RecordId;
///
/// let id = RecordId::new("3201011203990001");
/// assert_eq!(id.as_str(), "3201011203990001");
/// assert!(RecordId::new("a") < RecordId::new("b"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a record id from a source key.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the key is empty.
    ///
    /// Empty keys are rejected at staging time; this exists so stores can
    /// perform that check.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Correlation id for one resolution batch.
///
/// Stamped onto membership rows and merge audit rows so every mutation can be
/// traced back to the batch that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Generates a fresh batch id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil batch id, useful as a placeholder in tests.
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for BatchId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A cleaned record awaiting (or holding) a cluster assignment.
///
/// The `cluster` and `processed_at` fields are owned by the commit path:
/// they are `None` while the record is unresolved and are set together,
/// atomically, when the record's batch commits.
///
/// # Examples
/// ```
/// use kinfold::StagedRecord;
/// use serde_json::json;
///
/// let record = StagedRecord::new("r-001", json!({"name": "BUDI SANTOSO"}));
/// assert!(!record.is_processed());
/// assert!(record.cluster.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
    /// Source-stable primary key.
    pub id: RecordId,
    /// Normalized attributes, opaque to the engine.
    #[serde(default)]
    pub attributes: serde_json::Value,
    /// When the extraction pipeline staged this record.
    pub extracted_at: DateTime<Utc>,
    /// Assigned cluster, set at commit time.
    #[serde(default)]
    pub cluster: Option<ClusterId>,
    /// Processed marker, set at commit time.
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl StagedRecord {
    /// Creates an unprocessed record staged now.
    #[must_use]
    pub fn new(id: impl Into<RecordId>, attributes: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            attributes,
            extracted_at: Utc::now(),
            cluster: None,
            processed_at: None,
        }
    }

    /// Returns true once the record's batch has committed.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}
