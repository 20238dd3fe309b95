//! # kinfold - incremental entity resolution
//!
//! kinfold resolves duplicate source records into stable clusters identified
//! by a durable cluster key. Records arrive in batches; a probabilistic
//! scorer (an external collaborator) claims which pairs look like the same
//! real-world entity, and the engine turns those claims plus the committed
//! clustering into connected components, assigns each component a cluster
//! identifier, and commits the batch atomically. When a batch bridges two
//! previously separate clusters, the smaller identifier survives and the
//! other is retired forever.
//!
//! ## Core Concepts
//!
//! - **StagedRecord**: a cleaned source row awaiting cluster assignment
//! - **CandidateEdge**: a scored pair claim from the external matcher
//! - **ClusterId**: the persistent cluster key, minted from a monotonic
//!   sequence and never reused once retired
//! - **BatchResolution**: one batch's assignments, merges, and minted ids,
//!   frozen into an atomic [`resolver::BatchCommit`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kinfold::{DedupeEngine, EngineConfig, InMemoryStore, StagedRecord};
//!
//! let store = Arc::new(InMemoryStore::new());
//! store.insert_staged(StagedRecord::new("r-001", attributes))?;
//!
//! let engine = DedupeEngine::new(store, scorer, EngineConfig::default())?;
//! let report = engine.run()?;
//! println!("{report}");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Domain types
pub mod cluster;
pub mod edge;
pub mod error;
pub mod record;

// Resolution pipeline
pub mod graph;
pub mod resolver;
pub mod scorer;

// Orchestration, configuration, and storage
pub mod config;
pub mod contract;
pub mod engine;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use cluster::{ClusterId, Membership, MergeEvent, MergeRecord};
pub use config::{DedupeConfig, EngineConfig, StagingConfig};
pub use contract::{AttributeContract, QueryContract, SourceQuery};
pub use edge::CandidateEdge;
pub use engine::runtime::{DedupeRuntime, RunHandle, RuntimeConfig};
pub use engine::{BatchOutcome, BatchPhase, DedupeEngine, RunReport};
pub use error::{EngineError, KinError, KinResult, ValidationError};
pub use graph::{CandidateGraph, ClusterView, Component};
pub use record::{BatchId, RecordId, StagedRecord};
pub use resolver::{assign_clusters, BatchCommit, BatchResolution};
pub use scorer::{PairScorer, ScorerError};
pub use storage::{DedupeStore, InMemoryStore, LedgerSnapshot, StorageError};
