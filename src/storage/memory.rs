//! In-memory storage backend.
//!
//! Thread-safe implementation of [`DedupeStore`] over a single `RwLock`.
//! Intended for embedded usage, tests, and as the reference implementation:
//! commits validate against the [`LedgerState`] rules and mutate only after
//! the whole payload has passed.

use std::sync::RwLock;

use chrono::Utc;

use crate::cluster::{ClusterId, Membership, MergeRecord};
use crate::contract::AttributeContract;
use crate::record::{RecordId, StagedRecord};
use crate::resolver::BatchCommit;
use crate::storage::state::{check_contract, LedgerState};
use crate::storage::traits::{DedupeStore, LedgerSnapshot, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory dedupe store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<LedgerState>,
    contract: Option<AttributeContract>,
}

impl InMemoryStore {
    /// Creates a new empty store with no attribute contract.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that enforces `contract` on every staged record.
    #[must_use]
    pub fn with_contract(contract: AttributeContract) -> Self {
        Self {
            state: RwLock::new(LedgerState::new()),
            contract: Some(contract),
        }
    }
}

impl DedupeStore for InMemoryStore {
    fn insert_staged(&self, record: StagedRecord) -> Result<(), StorageError> {
        check_contract(self.contract.as_ref(), &record)?;
        let mut state = self.state.write().map_err(|_| lock_err("insert_staged"))?;
        state.check_insert(&record)?;
        state.apply_insert(record);
        Ok(())
    }

    fn restage(
        &self,
        record: &RecordId,
        attributes: serde_json::Value,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("restage"))?;
        state.check_restage(record)?;
        state.apply_restage(record, attributes, Utc::now());
        Ok(())
    }

    fn staged(&self, record: &RecordId) -> Result<Option<StagedRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("staged"))?;
        Ok(state.record(record))
    }

    fn next_unprocessed(
        &self,
        after: Option<&RecordId>,
        limit: usize,
    ) -> Result<Vec<StagedRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("next_unprocessed"))?;
        Ok(state.unprocessed_page(after, limit))
    }

    fn unprocessed_count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("unprocessed_count"))?;
        Ok(state.unprocessed_count())
    }

    fn memberships(&self) -> Result<Vec<Membership>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("memberships"))?;
        Ok(state.membership_rows())
    }

    fn members_of(&self, cluster: ClusterId) -> Result<Vec<RecordId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("members_of"))?;
        Ok(state.members_of(cluster))
    }

    fn live_clusters(&self) -> Result<Vec<ClusterId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("live_clusters"))?;
        Ok(state.live_clusters())
    }

    fn retired_target(&self, cluster: ClusterId) -> Result<Option<ClusterId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("retired_target"))?;
        Ok(state.retired_target(cluster))
    }

    fn next_cluster_id(&self) -> Result<ClusterId, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("next_cluster_id"))?;
        Ok(state.next_cluster())
    }

    fn merge_log(&self) -> Result<Vec<MergeRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("merge_log"))?;
        Ok(state.merge_log())
    }

    fn commit_batch(&self, commit: BatchCommit) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("commit_batch"))?;
        state.validate_commit(&commit)?;
        state.apply_commit(&commit);
        Ok(())
    }

    fn snapshot(&self) -> Result<LedgerSnapshot, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("snapshot"))?;
        Ok(state.to_snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BatchId;
    use serde_json::json;

    fn rec(id: &str) -> RecordId {
        RecordId::from(id)
    }

    fn staged(id: &str) -> StagedRecord {
        StagedRecord::new(id, json!({"full_name": id.to_uppercase()}))
    }

    #[test]
    fn test_insert_and_page() {
        let store = InMemoryStore::new();
        for id in ["r3", "r1", "r2"] {
            store.insert_staged(staged(id)).unwrap();
        }

        let page = store.next_unprocessed(None, 2).unwrap();
        let ids: Vec<&str> = page.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);

        let rest = store.next_unprocessed(Some(&rec("r2")), 2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, rec("r3"));
        assert_eq!(store.unprocessed_count().unwrap(), 3);
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let store = InMemoryStore::new();
        store.insert_staged(staged("r1")).unwrap();
        assert!(matches!(
            store.insert_staged(staged("r1")),
            Err(StorageError::DuplicateRecord(_))
        ));
    }

    #[test]
    fn test_contract_enforced_on_insert() {
        let store = InMemoryStore::with_contract(AttributeContract::new(["birth_date"]));
        let err = store.insert_staged(staged("r1")).unwrap_err();
        assert!(matches!(err, StorageError::ContractViolation { .. }));

        let record = StagedRecord::new("r2", json!({"birth_date": "1990-01-01"}));
        store.insert_staged(record).unwrap();
    }

    #[test]
    fn test_commit_is_atomic_on_validation_failure() {
        let store = InMemoryStore::new();
        store.insert_staged(staged("a")).unwrap();
        let before = store.snapshot().unwrap();

        // Mints C1 but marks a record processed without an assignment; the
        // whole commit must be discarded, minted cluster included.
        let commit = BatchCommit {
            batch: BatchId::nil(),
            assignments: [(rec("a"), ClusterId::new(1))].into_iter().collect(),
            minted: vec![ClusterId::new(1)],
            merges: Vec::new(),
            processed: [rec("a"), rec("ghost")].into_iter().collect(),
            next_cluster: ClusterId::new(2),
            committed_at: Utc::now(),
        };
        assert!(store.commit_batch(commit).is_err());

        assert_eq!(store.snapshot().unwrap(), before);
        assert!(store.live_clusters().unwrap().is_empty());
        assert_eq!(store.next_cluster_id().unwrap(), ClusterId::new(1));
    }

    #[test]
    fn test_commit_then_query_round_trip() {
        let store = InMemoryStore::new();
        for id in ["a", "b"] {
            store.insert_staged(staged(id)).unwrap();
        }
        let commit = BatchCommit {
            batch: BatchId::nil(),
            assignments: [
                (rec("a"), ClusterId::new(1)),
                (rec("b"), ClusterId::new(1)),
            ]
            .into_iter()
            .collect(),
            minted: vec![ClusterId::new(1)],
            merges: Vec::new(),
            processed: [rec("a"), rec("b")].into_iter().collect(),
            next_cluster: ClusterId::new(2),
            committed_at: Utc::now(),
        };
        store.commit_batch(commit).unwrap();

        assert_eq!(store.unprocessed_count().unwrap(), 0);
        assert_eq!(store.members_of(ClusterId::new(1)).unwrap().len(), 2);
        assert_eq!(store.memberships().unwrap().len(), 2);
        assert_eq!(store.staged(&rec("a")).unwrap().unwrap().cluster, Some(ClusterId::new(1)));
    }

    #[test]
    fn test_restage_reopens_record() {
        let store = InMemoryStore::new();
        store.insert_staged(staged("a")).unwrap();
        let commit = BatchCommit {
            batch: BatchId::nil(),
            assignments: [(rec("a"), ClusterId::new(1))].into_iter().collect(),
            minted: vec![ClusterId::new(1)],
            merges: Vec::new(),
            processed: [rec("a")].into_iter().collect(),
            next_cluster: ClusterId::new(2),
            committed_at: Utc::now(),
        };
        store.commit_batch(commit).unwrap();
        assert_eq!(store.unprocessed_count().unwrap(), 0);

        store.restage(&rec("a"), json!({"full_name": "A CHANGED"})).unwrap();
        assert_eq!(store.unprocessed_count().unwrap(), 1);
        // Membership row survives the restage.
        assert_eq!(store.members_of(ClusterId::new(1)).unwrap(), vec![rec("a")]);

        assert!(matches!(
            store.restage(&rec("nope"), json!({})),
            Err(StorageError::UnknownRecord(_))
        ));
    }
}
