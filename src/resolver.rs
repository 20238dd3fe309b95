//! Cluster assignment over resolved components.
//!
//! [`assign_clusters`] walks the components of a [`CandidateGraph`] in
//! order and decides, per component, whether to mint a fresh cluster, reuse
//! the single cluster the component touches, or merge several into the one
//! with the smallest identifier. The function is pure: it reads the view and
//! produces a [`BatchResolution`], and nothing is stored until the engine
//! commits the derived [`BatchCommit`] as one unit.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cluster::{ClusterId, MergeEvent};
use crate::graph::{CandidateGraph, ClusterView};
use crate::record::{BatchId, RecordId};

/// The outcome of resolving one batch, before it is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResolution {
    batch: BatchId,
    assignments: BTreeMap<RecordId, ClusterId>,
    minted: Vec<ClusterId>,
    reused: Vec<ClusterId>,
    merges: Vec<MergeEvent>,
    processed: BTreeSet<RecordId>,
    next_cluster: ClusterId,
    components_resolved: usize,
    components_skipped: usize,
}

impl BatchResolution {
    /// Identifier of the batch this resolution belongs to.
    #[must_use]
    pub fn batch(&self) -> BatchId {
        self.batch
    }

    /// Every record-to-cluster assignment this batch sets or confirms.
    ///
    /// Covers all members of every touched component, existing members
    /// included, so a merge always re-points the absorbed cluster in full.
    #[must_use]
    pub fn assignments(&self) -> &BTreeMap<RecordId, ClusterId> {
        &self.assignments
    }

    /// Fresh cluster identifiers minted by this batch, ascending.
    #[must_use]
    pub fn minted(&self) -> &[ClusterId] {
        &self.minted
    }

    /// Existing clusters reused unchanged as a component's identity.
    #[must_use]
    pub fn reused(&self) -> &[ClusterId] {
        &self.reused
    }

    /// Clusters retired into a canonical survivor, in resolution order.
    #[must_use]
    pub fn merges(&self) -> &[MergeEvent] {
        &self.merges
    }

    /// Batch records to be marked processed by the commit.
    #[must_use]
    pub fn processed(&self) -> &BTreeSet<RecordId> {
        &self.processed
    }

    /// The mint cursor after this batch, to be persisted with the commit.
    #[must_use]
    pub fn next_cluster(&self) -> ClusterId {
        self.next_cluster
    }

    /// Components that produced assignments.
    #[must_use]
    pub fn components_resolved(&self) -> usize {
        self.components_resolved
    }

    /// Components skipped because no batch record was a member.
    #[must_use]
    pub fn components_skipped(&self) -> usize {
        self.components_skipped
    }

    /// True when the batch resolved nothing and marks nothing processed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.processed.is_empty()
    }

    /// Freezes the resolution into the unit the store commits atomically.
    #[must_use]
    pub fn into_commit(self, committed_at: DateTime<Utc>) -> BatchCommit {
        BatchCommit {
            batch: self.batch,
            assignments: self.assignments,
            minted: self.minted,
            merges: self.merges,
            processed: self.processed,
            next_cluster: self.next_cluster,
            committed_at,
        }
    }
}

/// The atomic unit a store applies: assignments, processed markers, the
/// advanced mint cursor, and the merge log entries, all or nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCommit {
    /// Batch this commit belongs to.
    pub batch: BatchId,
    /// Record-to-cluster assignments to upsert.
    pub assignments: BTreeMap<RecordId, ClusterId>,
    /// Identifiers minted by this batch; must be fresh.
    pub minted: Vec<ClusterId>,
    /// Retirements to append to the merge log.
    pub merges: Vec<MergeEvent>,
    /// Records to mark processed; each must appear in `assignments`.
    pub processed: BTreeSet<RecordId>,
    /// Mint cursor after this batch; never moves backwards.
    pub next_cluster: ClusterId,
    /// Commit timestamp, also stamped on memberships and merge rows.
    pub committed_at: DateTime<Utc>,
}

/// Assigns a cluster to every component of `graph` that contains at least
/// one record of `batch`.
///
/// Decision per component, driven by the live clusters it touches:
/// none touched mints a fresh identifier from the view's cursor, exactly one
/// reuses it, and two or more merge into the smallest identifier while the
/// rest retire. Components are visited in graph order (smallest member
/// first), which fixes which identifiers get minted; identifiers of retired
/// clusters are never reissued because the cursor only moves forward.
#[must_use]
pub fn assign_clusters(
    batch_id: BatchId,
    batch: &BTreeSet<RecordId>,
    graph: &CandidateGraph,
    view: &ClusterView,
) -> BatchResolution {
    let mut assignments = BTreeMap::new();
    let mut minted = Vec::new();
    let mut reused = Vec::new();
    let mut merges = Vec::new();
    let mut cursor = view.next_cluster();
    let mut components_resolved = 0;
    let mut components_skipped = 0;

    for component in graph.components() {
        if !component.members().iter().any(|member| batch.contains(member)) {
            debug!(
                size = component.len(),
                "skipping component without a batch record"
            );
            components_skipped += 1;
            continue;
        }

        let mut touched = component.existing().iter().copied();
        let target = match (touched.next(), touched.next()) {
            (None, _) => {
                let id = cursor;
                cursor = cursor.next();
                minted.push(id);
                id
            }
            (Some(only), None) => {
                reused.push(only);
                only
            }
            (Some(smallest), Some(_)) => {
                for absorbed in component
                    .existing()
                    .iter()
                    .copied()
                    .filter(|cluster| *cluster != smallest)
                {
                    merges.push(MergeEvent {
                        absorbed,
                        canonical: smallest,
                    });
                }
                smallest
            }
        };

        for member in component.members() {
            assignments.insert(member.clone(), target);
        }
        components_resolved += 1;
    }

    BatchResolution {
        batch: batch_id,
        assignments,
        minted,
        reused,
        merges,
        processed: batch.iter().cloned().collect(),
        next_cluster: cursor,
        components_resolved,
        components_skipped,
    }
}
