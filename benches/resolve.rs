use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

use kinfold::{
    CandidateEdge, DedupeEngine, DedupeStore, EngineConfig, InMemoryStore, PairScorer,
    ScorerError, StagedRecord,
};

const BATCH: usize = 1_000;

struct FixedScorer {
    edges: Vec<CandidateEdge>,
}

impl PairScorer for FixedScorer {
    fn score_batch(
        &self,
        batch: &[StagedRecord],
        _threshold: f64,
    ) -> Result<Vec<CandidateEdge>, ScorerError> {
        Ok(self
            .edges
            .iter()
            .filter(|edge| {
                batch
                    .iter()
                    .any(|record| record.id == *edge.low() || record.id == *edge.high())
            })
            .cloned()
            .collect())
    }
}

fn staged_population(n: usize) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for i in 0..n {
        store
            .insert_staged(StagedRecord::new(
                format!("r{i:06}"),
                json!({"full_name": format!("PERSON {i}")}),
            ))
            .unwrap();
    }
    store
}

/// Every record chained to its neighbour: one giant component per batch.
fn chain_edges(n: usize) -> Vec<CandidateEdge> {
    (1..n)
        .map(|i| {
            CandidateEdge::new(format!("r{:06}", i - 1), format!("r{i:06}"), 0.95).unwrap()
        })
        .collect()
}

/// Neighbour pairs: many small components, no merges.
fn pair_edges(n: usize) -> Vec<CandidateEdge> {
    (0..n / 2)
        .map(|i| {
            CandidateEdge::new(format!("r{:06}", 2 * i), format!("r{:06}", 2 * i + 1), 0.95)
                .unwrap()
        })
        .collect()
}

fn engine_over(store: Arc<InMemoryStore>, edges: Vec<CandidateEdge>) -> DedupeEngine {
    DedupeEngine::new(
        store as Arc<dyn DedupeStore>,
        Arc::new(FixedScorer { edges }),
        EngineConfig {
            batch_size: BATCH,
            ..EngineConfig::default()
        },
    )
    .unwrap()
}

fn bench_resolve_pairs(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    group.throughput(Throughput::Elements(BATCH as u64));

    group.bench_function("pair_batches", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                // Fresh state per sample so accumulation does not leak
                // between samples.
                let store = staged_population(BATCH);
                let engine = engine_over(store, pair_edges(BATCH));
                let start = Instant::now();
                engine.run().unwrap();
                total += start.elapsed();
            }
            total
        });
    });

    group.bench_function("chain_batch", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                let store = staged_population(BATCH);
                let engine = engine_over(store, chain_edges(BATCH));
                let start = Instant::now();
                engine.run().unwrap();
                total += start.elapsed();
            }
            total
        });
    });

    group.finish();
}

fn bench_merge_heavy(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    group.throughput(Throughput::Elements(BATCH as u64));

    // Two runs: the first commits neighbour-pair clusters, the second
    // stages bridge records that merge adjacent clusters.
    group.bench_function("merge_heavy_second_run", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                let store = staged_population(BATCH);
                engine_over(Arc::clone(&store), pair_edges(BATCH))
                    .run()
                    .unwrap();

                let mut bridge_edges = Vec::new();
                for i in 0..BATCH / 4 {
                    let bridge = format!("bridge{i:06}");
                    store
                        .insert_staged(StagedRecord::new(
                            bridge.clone(),
                            json!({"full_name": format!("BRIDGE {i}")}),
                        ))
                        .unwrap();
                    bridge_edges.push(
                        CandidateEdge::new(bridge.clone(), format!("r{:06}", 4 * i), 0.95)
                            .unwrap(),
                    );
                    bridge_edges.push(
                        CandidateEdge::new(bridge, format!("r{:06}", 4 * i + 2), 0.95).unwrap(),
                    );
                }

                let engine = engine_over(Arc::clone(&store), bridge_edges);
                let start = Instant::now();
                engine.run().unwrap();
                total += start.elapsed();
            }
            total
        });
    });

    group.finish();
}

criterion_group!(benches, bench_resolve_pairs, bench_merge_heavy);
criterion_main!(benches);
