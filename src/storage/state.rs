//! Shared in-memory ledger shape.
//!
//! Both backends hold the same logical state: staged records, the membership
//! table with its reverse index, the retired map, the merge audit log, and
//! the cluster-id sequence. The in-memory store wraps a [`LedgerState`] in a
//! lock; the persistent store replays its WAL into one and appends before
//! mutating. Commit validation lives here so every backend enforces the
//! ledger rules identically: `validate_commit` checks a payload against
//! current state, `apply_commit` applies a payload blindly (replay relies on
//! entries having been validated when first written).

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use chrono::{DateTime, Utc};

use crate::cluster::{ClusterId, Membership, MergeRecord};
use crate::contract::AttributeContract;
use crate::record::{RecordId, StagedRecord};
use crate::resolver::BatchCommit;
use crate::storage::traits::{LedgerSnapshot, StorageError};

/// Checks a record against an optional attribute contract.
pub(crate) fn check_contract(
    contract: Option<&AttributeContract>,
    record: &StagedRecord,
) -> Result<(), StorageError> {
    let Some(contract) = contract else {
        return Ok(());
    };
    contract
        .check(&record.attributes)
        .map_err(|err| StorageError::ContractViolation {
            record: record.id.clone(),
            reason: err.to_string(),
        })
}

#[derive(Debug, Clone)]
pub(crate) struct LedgerState {
    records: BTreeMap<RecordId, StagedRecord>,
    memberships: BTreeMap<RecordId, Membership>,
    members: BTreeMap<ClusterId, BTreeSet<RecordId>>,
    retired: BTreeMap<ClusterId, ClusterId>,
    merge_log: Vec<MergeRecord>,
    next_cluster: ClusterId,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            memberships: BTreeMap::new(),
            members: BTreeMap::new(),
            retired: BTreeMap::new(),
            merge_log: Vec::new(),
            next_cluster: ClusterId::new(1),
        }
    }
}

impl LedgerState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // ---- staging -----------------------------------------------------

    pub(crate) fn check_insert(&self, record: &StagedRecord) -> Result<(), StorageError> {
        if record.id.is_empty() {
            return Err(StorageError::EmptyRecordId);
        }
        if self.records.contains_key(&record.id) {
            return Err(StorageError::DuplicateRecord(record.id.clone()));
        }
        Ok(())
    }

    /// Stages a record. Whatever the caller put in the resolution markers,
    /// records stage unresolved: those fields belong to the commit path.
    pub(crate) fn apply_insert(&mut self, mut record: StagedRecord) {
        record.cluster = None;
        record.processed_at = None;
        self.records.insert(record.id.clone(), record);
    }

    pub(crate) fn check_restage(&self, record: &RecordId) -> Result<(), StorageError> {
        if self.records.contains_key(record) {
            Ok(())
        } else {
            Err(StorageError::UnknownRecord(record.clone()))
        }
    }

    /// Re-stages a record: new attributes, fresh extraction timestamp, and
    /// cleared resolution markers. The membership row is left untouched so
    /// an unchanged record flows back into its existing cluster.
    pub(crate) fn apply_restage(
        &mut self,
        record: &RecordId,
        attributes: serde_json::Value,
        restaged_at: DateTime<Utc>,
    ) {
        if let Some(staged) = self.records.get_mut(record) {
            staged.attributes = attributes;
            staged.extracted_at = restaged_at;
            staged.cluster = None;
            staged.processed_at = None;
        }
    }

    // ---- queries -----------------------------------------------------

    pub(crate) fn record(&self, record: &RecordId) -> Option<StagedRecord> {
        self.records.get(record).cloned()
    }

    pub(crate) fn unprocessed_page(
        &self,
        after: Option<&RecordId>,
        limit: usize,
    ) -> Vec<StagedRecord> {
        let range = match after {
            Some(cursor) => self.records.range((Bound::Excluded(cursor), Bound::Unbounded)),
            None => self
                .records
                .range((Bound::<&RecordId>::Unbounded, Bound::Unbounded)),
        };
        range
            .filter(|(_, record)| !record.is_processed())
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub(crate) fn unprocessed_count(&self) -> usize {
        self.records
            .values()
            .filter(|record| !record.is_processed())
            .count()
    }

    pub(crate) fn membership_rows(&self) -> Vec<Membership> {
        self.memberships.values().cloned().collect()
    }

    pub(crate) fn members_of(&self, cluster: ClusterId) -> Vec<RecordId> {
        self.members
            .get(&cluster)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn live_clusters(&self) -> Vec<ClusterId> {
        self.members.keys().copied().collect()
    }

    pub(crate) fn retired_target(&self, cluster: ClusterId) -> Option<ClusterId> {
        self.retired.get(&cluster).copied()
    }

    pub(crate) fn next_cluster(&self) -> ClusterId {
        self.next_cluster
    }

    pub(crate) fn merge_log(&self) -> Vec<MergeRecord> {
        self.merge_log.clone()
    }

    // ---- commit ------------------------------------------------------

    /// Checks a commit payload against current state without mutating it.
    pub(crate) fn validate_commit(&self, commit: &BatchCommit) -> Result<(), StorageError> {
        if commit.next_cluster < self.next_cluster {
            return Err(StorageError::SequenceRegression {
                current: self.next_cluster,
                proposed: commit.next_cluster,
            });
        }

        for minted in &commit.minted {
            if self.members.contains_key(minted) || self.retired.contains_key(minted) {
                return Err(StorageError::MintCollision(*minted));
            }
        }

        let minted: BTreeSet<ClusterId> = commit.minted.iter().copied().collect();
        for (record, cluster) in &commit.assignments {
            if !self.records.contains_key(record) {
                return Err(StorageError::UnknownRecord(record.clone()));
            }
            if self.retired.contains_key(cluster) {
                return Err(StorageError::RetiredCluster(*cluster));
            }
            if !self.members.contains_key(cluster) && !minted.contains(cluster) {
                return Err(StorageError::UnknownCluster(*cluster));
            }
        }

        for merge in &commit.merges {
            if self.retired.contains_key(&merge.absorbed) {
                return Err(StorageError::RetiredCluster(merge.absorbed));
            }
            let Some(members) = self.members.get(&merge.absorbed) else {
                return Err(StorageError::UnknownCluster(merge.absorbed));
            };
            for member in members {
                match commit.assignments.get(member) {
                    Some(target) if *target == merge.canonical => {}
                    _ => {
                        return Err(StorageError::PartialMerge {
                            cluster: merge.absorbed,
                            record: member.clone(),
                        })
                    }
                }
            }
        }

        for record in &commit.processed {
            if !commit.assignments.contains_key(record) {
                return Err(StorageError::ProcessedWithoutAssignment(record.clone()));
            }
        }

        Ok(())
    }

    /// Applies a commit without validation.
    ///
    /// All timestamps come from the payload, so replaying the same sequence
    /// of commits reproduces the same state bit for bit.
    pub(crate) fn apply_commit(&mut self, commit: &BatchCommit) {
        for (record, cluster) in &commit.assignments {
            let changed = self
                .memberships
                .get(record)
                .map_or(true, |previous| previous.cluster != *cluster);
            if changed {
                let row = Membership {
                    record: record.clone(),
                    cluster: *cluster,
                    batch: commit.batch,
                    updated_at: commit.committed_at,
                };
                if let Some(previous) = self.memberships.insert(record.clone(), row) {
                    if let Some(set) = self.members.get_mut(&previous.cluster) {
                        set.remove(record);
                        if set.is_empty() {
                            self.members.remove(&previous.cluster);
                        }
                    }
                }
                self.members.entry(*cluster).or_default().insert(record.clone());
            }
            if let Some(staged) = self.records.get_mut(record) {
                staged.cluster = Some(*cluster);
            }
        }

        for record in &commit.processed {
            if let Some(staged) = self.records.get_mut(record) {
                staged.processed_at = Some(commit.committed_at);
            }
        }

        for merge in &commit.merges {
            self.members.remove(&merge.absorbed);
            self.retired.insert(merge.absorbed, merge.canonical);
            self.merge_log.push(MergeRecord {
                absorbed: merge.absorbed,
                canonical: merge.canonical,
                batch: commit.batch,
                merged_at: commit.committed_at,
            });
        }

        if commit.next_cluster > self.next_cluster {
            self.next_cluster = commit.next_cluster;
        }
    }

    // ---- snapshots ---------------------------------------------------

    pub(crate) fn to_snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            records: self.records.values().cloned().collect(),
            memberships: self.memberships.values().cloned().collect(),
            retired: self.retired.iter().map(|(a, c)| (*a, *c)).collect(),
            merge_log: self.merge_log.clone(),
            next_cluster: self.next_cluster,
        }
    }

    pub(crate) fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let mut members: BTreeMap<ClusterId, BTreeSet<RecordId>> = BTreeMap::new();
        for row in &snapshot.memberships {
            members
                .entry(row.cluster)
                .or_default()
                .insert(row.record.clone());
        }
        Self {
            records: snapshot
                .records
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect(),
            memberships: snapshot
                .memberships
                .into_iter()
                .map(|row| (row.record.clone(), row))
                .collect(),
            members,
            retired: snapshot.retired.into_iter().collect(),
            merge_log: snapshot.merge_log,
            next_cluster: snapshot.next_cluster,
        }
    }
}
