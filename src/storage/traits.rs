//! Abstract storage trait for the resolution pipeline.
//!
//! The trait defines the contract that storage backends must implement.
//! By using a trait, we enable:
//! - In-memory backends for testing and embedded use
//! - Persistent backends for production
//! - External database backends for existing staging tables

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::{ClusterId, Membership, MergeRecord};
use crate::record::{RecordId, StagedRecord};
use crate::resolver::BatchCommit;

/// Errors that can occur during storage operations.
///
/// Commit-side validation failures (`RetiredCluster`, `MintCollision`,
/// `UnknownCluster`, `SequenceRegression`, `PartialMerge`,
/// `ProcessedWithoutAssignment`) mean the commit payload contradicts the
/// ledger and must not be retried as-is. `BackendError` is the one variant
/// worth retrying.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A record with this id is already staged.
    #[error("Record '{0}' is already staged")]
    DuplicateRecord(RecordId),

    /// The referenced record was never staged.
    #[error("Record '{0}' is not staged")]
    UnknownRecord(RecordId),

    /// Record ids must be non-empty.
    #[error("Record id is empty")]
    EmptyRecordId,

    /// An assignment targeted a cluster absorbed by an earlier merge.
    #[error("Cluster {0} is retired and can never be assigned again")]
    RetiredCluster(ClusterId),

    /// A commit tried to mint an identifier that is already live or retired.
    #[error("Cluster {0} already exists and cannot be minted")]
    MintCollision(ClusterId),

    /// An assignment targeted a cluster that is neither live nor minted by
    /// the same commit.
    #[error("Cluster {0} is neither live nor minted by this commit")]
    UnknownCluster(ClusterId),

    /// The committed sequence value moved backwards.
    #[error("Cluster sequence would regress (current {current}, proposed {proposed})")]
    SequenceRegression {
        /// Sequence value currently persisted.
        current: ClusterId,
        /// Smaller value the commit tried to install.
        proposed: ClusterId,
    },

    /// A merge left a member of the absorbed cluster pointing at the
    /// retired id.
    #[error("Merge retiring cluster {cluster} left record '{record}' behind")]
    PartialMerge {
        /// The cluster being retired.
        cluster: ClusterId,
        /// The member missing from the commit's assignments.
        record: RecordId,
    },

    /// A record was marked processed without receiving an assignment.
    #[error("Record '{0}' is marked processed without an assignment")]
    ProcessedWithoutAssignment(RecordId),

    /// A staged record is missing required attributes.
    #[error("Record '{record}' violates the staging contract: {reason}")]
    ContractViolation {
        /// The offending record.
        record: RecordId,
        /// Which part of the contract failed.
        reason: String,
    },

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Underlying backend failure (I/O, poisoned lock).
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Storage backend for staged records and the cluster ledger.
///
/// Implementations are shared across threads by the engine and the runtime,
/// so all methods take `&self`; interior mutability is the backend's concern.
/// The membership table, processed markers, and the cluster-id sequence are
/// mutated exclusively through [`commit_batch`](DedupeStore::commit_batch),
/// which applies the whole [`BatchCommit`] or nothing at all.
pub trait DedupeStore: Send + Sync {
    /// Stages a new record. Fails on duplicate or empty ids and enforces
    /// the attribute contract when one is configured.
    fn insert_staged(&self, record: StagedRecord) -> Result<(), StorageError>;

    /// Re-stages an existing record after an upstream change: replaces its
    /// attributes and clears the processed marker while any membership row
    /// survives, so the record re-enters the unprocessed page.
    fn restage(&self, record: &RecordId, attributes: serde_json::Value)
        -> Result<(), StorageError>;

    /// Gets one staged record by id.
    fn staged(&self, record: &RecordId) -> Result<Option<StagedRecord>, StorageError>;

    /// Next page of unprocessed records in id order, starting strictly
    /// after `after` when given. Returns at most `limit` records.
    fn next_unprocessed(
        &self,
        after: Option<&RecordId>,
        limit: usize,
    ) -> Result<Vec<StagedRecord>, StorageError>;

    /// Number of records still awaiting resolution.
    fn unprocessed_count(&self) -> Result<usize, StorageError>;

    /// All live membership rows, in record-id order.
    fn memberships(&self) -> Result<Vec<Membership>, StorageError>;

    /// Members of one live cluster, in record-id order. Empty when the
    /// cluster is unknown or retired.
    fn members_of(&self, cluster: ClusterId) -> Result<Vec<RecordId>, StorageError>;

    /// Identifiers of all live clusters, ascending.
    fn live_clusters(&self) -> Result<Vec<ClusterId>, StorageError>;

    /// Where a retired cluster's members went, if `cluster` was absorbed.
    fn retired_target(&self, cluster: ClusterId) -> Result<Option<ClusterId>, StorageError>;

    /// The next value of the durable cluster-id sequence.
    fn next_cluster_id(&self) -> Result<ClusterId, StorageError>;

    /// The append-only merge audit log, oldest first.
    fn merge_log(&self) -> Result<Vec<MergeRecord>, StorageError>;

    /// Validates and applies one batch commit atomically: membership
    /// upserts, retirements, processed markers, and the sequence advance
    /// land together or not at all.
    fn commit_batch(&self, commit: BatchCommit) -> Result<(), StorageError>;

    /// A full copy of the ledger, used for guard-safety checks and backups.
    fn snapshot(&self) -> Result<LedgerSnapshot, StorageError>;
}

/// Point-in-time copy of everything a store holds.
///
/// Snapshots of the same logical state compare equal regardless of backend.
/// Retired clusters are a list of `(absorbed, canonical)` pairs in ascending
/// order so the snapshot stays a plain JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Staged records in id order.
    pub records: Vec<StagedRecord>,
    /// Live membership rows in record-id order.
    pub memberships: Vec<Membership>,
    /// Retired clusters as `(absorbed, canonical)` pairs, ascending.
    pub retired: Vec<(ClusterId, ClusterId)>,
    /// Merge audit log, oldest first.
    pub merge_log: Vec<MergeRecord>,
    /// Next value of the cluster-id sequence.
    pub next_cluster: ClusterId,
}

impl LedgerSnapshot {
    /// An empty ledger whose sequence starts at `next_cluster`.
    #[must_use]
    pub fn empty(next_cluster: ClusterId) -> Self {
        Self {
            records: Vec::new(),
            memberships: Vec::new(),
            retired: Vec::new(),
            merge_log: Vec::new(),
            next_cluster,
        }
    }
}
