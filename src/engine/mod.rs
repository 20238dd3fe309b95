//! Batch orchestrator and committer.
//!
//! [`DedupeEngine`] drives unprocessed records through the resolution
//! pipeline one page at a time: fetch, score, guard, build the candidate
//! graph, assign clusters, commit. Each page commits as a single atomic unit
//! through the store, so an interrupted run leaves only whole batches behind
//! and resumes from the unprocessed set on the next invocation.

pub mod runtime;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::cluster::ClusterId;
use crate::config::EngineConfig;
use crate::edge::CandidateEdge;
use crate::error::{EngineError, KinError, KinResult};
use crate::graph::{CandidateGraph, ClusterView};
use crate::record::{BatchId, RecordId};
use crate::resolver::{assign_clusters, BatchResolution};
use crate::scorer::PairScorer;
use crate::storage::DedupeStore;

/// Pipeline phase of one batch.
///
/// Batches move `Idle → FetchingPage → Scoring → Resolving → Committing →
/// Idle`; the guard and scorer failures take the `Aborted` edge instead, and
/// nothing is persisted on that path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    /// No batch in flight.
    Idle,
    /// Pulling the next unprocessed page.
    FetchingPage,
    /// Waiting on the external scorer.
    Scoring,
    /// Building the graph and assigning clusters.
    Resolving,
    /// Applying the atomic commit.
    Committing,
    /// Batch aborted with zero persistence.
    Aborted,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::FetchingPage => "fetching-page",
            Self::Scoring => "scoring",
            Self::Resolving => "resolving",
            Self::Committing => "committing",
            Self::Aborted => "aborted",
        };
        write!(f, "{name}")
    }
}

/// Summary of one committed batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Correlation id of the batch.
    pub batch: BatchId,
    /// Records in the page.
    pub records: usize,
    /// Edges the scorer returned, before filtering.
    pub edges_scored: usize,
    /// Edges at or above the threshold.
    pub edges_kept: usize,
    /// Components that produced assignments.
    pub components: usize,
    /// Clusters minted by the batch.
    pub minted: usize,
    /// Existing clusters reused unchanged.
    pub reused: usize,
    /// Clusters retired by merges.
    pub merged: usize,
    /// Final phase of the batch; committed batches end back at idle.
    pub phase: BatchPhase,
}

/// End-of-run summary across all committed batches.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Per-batch outcomes, in commit order.
    pub batches: Vec<BatchOutcome>,
    /// Records marked processed by this run.
    pub records_processed: usize,
    /// Clusters minted by this run.
    pub clusters_minted: usize,
    /// Merge events committed by this run.
    pub merges: usize,
    /// Live clusters after the run.
    pub live_clusters: usize,
    /// Records still unprocessed after the run.
    pub remaining_unprocessed: usize,
}

impl RunReport {
    /// Number of committed batches.
    #[must_use]
    pub fn batches_committed(&self) -> usize {
        self.batches.len()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "committed {} batch(es): {} record(s) processed, {} cluster(s) minted, \
             {} merge(s); {} live cluster(s), {} record(s) still unprocessed",
            self.batches.len(),
            self.records_processed,
            self.clusters_minted,
            self.merges,
            self.live_clusters,
            self.remaining_unprocessed,
        )
    }
}

/// The incremental resolution engine.
///
/// Owns a store and a scorer behind trait objects and exposes the two
/// primary operations, [`resolve_batch`](DedupeEngine::resolve_batch) and
/// [`commit`](DedupeEngine::commit), plus the [`run`](DedupeEngine::run)
/// loop that wraps them. All methods take `&self`; the single-writer
/// discipline comes from [`runtime::DedupeRuntime`], not from locks here.
pub struct DedupeEngine {
    store: Arc<dyn DedupeStore>,
    scorer: Arc<dyn PairScorer>,
    config: EngineConfig,
}

impl DedupeEngine {
    /// Creates an engine over the given collaborators.
    ///
    /// # Errors
    /// Returns a validation error when the configuration is out of range.
    pub fn new(
        store: Arc<dyn DedupeStore>,
        scorer: Arc<dyn PairScorer>,
        config: EngineConfig,
    ) -> KinResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            scorer,
            config,
        })
    }

    /// The store this engine commits through.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DedupeStore> {
        &self.store
    }

    /// The engine's operational parameters.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Assembles the existing-cluster lookup for one batch.
    ///
    /// Reads the full membership table and the sequence cursor. A record
    /// reported under two distinct live clusters means the membership table
    /// is corrupt and processing must halt.
    ///
    /// # Errors
    /// Surfaces storage failures and [`EngineError::InvariantViolation`].
    pub fn cluster_view(&self) -> KinResult<ClusterView> {
        let next_cluster = self.store.next_cluster_id()?;
        let mut view = ClusterView::new(next_cluster);
        let mut seen: HashMap<RecordId, ClusterId> = HashMap::new();

        for row in self.store.memberships()? {
            if let Some(&first) = seen.get(&row.record) {
                if first == row.cluster {
                    continue;
                }
                error!(
                    record = %row.record,
                    first = %first,
                    second = %row.cluster,
                    "membership table is corrupt, halting"
                );
                return Err(EngineError::InvariantViolation {
                    record: row.record,
                    first,
                    second: row.cluster,
                }
                .into());
            }
            seen.insert(row.record.clone(), row.cluster);
            view.insert_member(row.record, row.cluster);
        }

        Ok(view)
    }

    /// Resolves one batch without persisting anything.
    ///
    /// Filters the edges by the configured threshold, applies the pair
    /// guard, builds the candidate graph against the current cluster view,
    /// and assigns clusters. The result is deterministic for a given batch,
    /// edge set, and committed state.
    ///
    /// # Errors
    /// Returns [`EngineError::GuardTripped`] when the surviving edge count
    /// exceeds the configured maximum, plus storage and invariant errors
    /// from view assembly. Nothing is mutated on any error path.
    pub fn resolve_batch(
        &self,
        batch: &[RecordId],
        edges: &[CandidateEdge],
    ) -> KinResult<BatchResolution> {
        let kept: Vec<CandidateEdge> = edges
            .iter()
            .filter(|edge| edge.probability() >= self.config.match_threshold)
            .cloned()
            .collect();

        if kept.len() > self.config.max_pairs_per_batch {
            warn!(
                pairs = kept.len(),
                max_pairs = self.config.max_pairs_per_batch,
                "pair guard tripped, aborting batch"
            );
            return Err(EngineError::GuardTripped {
                pairs: kept.len(),
                max_pairs: self.config.max_pairs_per_batch,
            }
            .into());
        }

        let view = self.cluster_view()?;
        let graph = CandidateGraph::build(batch, &kept, &view);
        debug!(
            nodes = graph.node_count(),
            edges = graph.edges_applied(),
            components = graph.components().len(),
            "candidate graph built"
        );

        let batch_set = batch.iter().cloned().collect();
        Ok(assign_clusters(BatchId::new(), &batch_set, &graph, &view))
    }

    /// Commits one resolution atomically.
    ///
    /// Stamps the commit timestamp and hands the payload to the store,
    /// which applies membership upserts, retirements, processed markers,
    /// and the sequence advance together or not at all.
    ///
    /// # Errors
    /// Surfaces storage failures; validation failures on the commit payload
    /// are corruption signals, not retryable conditions.
    pub fn commit(&self, resolution: BatchResolution) -> KinResult<()> {
        let batch = resolution.batch();
        let commit = resolution.into_commit(Utc::now());
        self.store.commit_batch(commit)?;
        debug!(batch = %batch, "batch committed");
        Ok(())
    }

    /// Drives batches to completion until the unprocessed set or the run
    /// cap is exhausted.
    ///
    /// Pages are fetched, scored, resolved, and committed strictly in
    /// order; a failure anywhere aborts the run with the current batch
    /// discarded in full, and the committed batches before it stand.
    ///
    /// # Errors
    /// Guard trips and scorer failures are retryable (use a smaller batch
    /// size or a stricter threshold); invariant violations are corruption
    /// and must be inspected before processing resumes.
    pub fn run(&self) -> KinResult<RunReport> {
        let mut report = RunReport::default();
        let mut touched = 0_usize;

        loop {
            let page_size = match self.config.run_limit {
                Some(cap) => self.config.batch_size.min(cap.saturating_sub(touched)),
                None => self.config.batch_size,
            };
            if page_size == 0 {
                debug!(touched, "run cap reached");
                break;
            }

            debug!(phase = %BatchPhase::FetchingPage, "batch phase");
            let page = self.store.next_unprocessed(None, page_size)?;
            if page.is_empty() {
                break;
            }

            debug!(phase = %BatchPhase::Scoring, records = page.len(), "batch phase");
            let edges = match self.scorer.score_batch(&page, self.config.match_threshold) {
                Ok(edges) => edges,
                Err(err) => {
                    warn!(phase = %BatchPhase::Aborted, error = %err, "scorer failed, batch aborted");
                    return Err(KinError::from(err));
                }
            };
            let edges_scored = edges.len();
            let edges_kept = edges
                .iter()
                .filter(|edge| edge.probability() >= self.config.match_threshold)
                .count();

            debug!(phase = %BatchPhase::Resolving, "batch phase");
            let batch_ids: Vec<RecordId> = page.iter().map(|record| record.id.clone()).collect();
            let resolution = match self.resolve_batch(&batch_ids, &edges) {
                Ok(resolution) => resolution,
                Err(err) => {
                    warn!(phase = %BatchPhase::Aborted, error = %err, "batch aborted");
                    return Err(err);
                }
            };

            let outcome = BatchOutcome {
                batch: resolution.batch(),
                records: page.len(),
                edges_scored,
                edges_kept,
                components: resolution.components_resolved(),
                minted: resolution.minted().len(),
                reused: resolution.reused().len(),
                merged: resolution.merges().len(),
                phase: BatchPhase::Idle,
            };

            debug!(phase = %BatchPhase::Committing, batch = %outcome.batch, "batch phase");
            report.records_processed += resolution.processed().len();
            report.clusters_minted += resolution.minted().len();
            report.merges += resolution.merges().len();
            self.commit(resolution)?;

            info!(
                batch = %outcome.batch,
                records = outcome.records,
                edges_kept = outcome.edges_kept,
                components = outcome.components,
                minted = outcome.minted,
                merged = outcome.merged,
                "batch committed"
            );
            touched += outcome.records;
            report.batches.push(outcome);
        }

        report.live_clusters = self.store.live_clusters()?.len();
        report.remaining_unprocessed = self.store.unprocessed_count()?;
        info!(%report, "run finished");
        Ok(report)
    }
}
