//! Durable ledger backend.
//!
//! A WAL-backed [`PersistentStore`] with:
//! - Write-ahead logging for crash recovery
//! - File locking for single-process ownership
//! - CRC32 checksums for corruption detection
//! - Snapshot-based compaction to keep the WAL bounded
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   PersistentStore                    │
//! ├──────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌──────────────────────────┐   │
//! │  │ WriteAheadLog   │  │ Snapshot (full ledger +  │   │
//! │  │ (append-only)   │  │ WAL watermark)           │   │
//! │  └────────┬────────┘  └────────────┬─────────────┘   │
//! │           │                        │                 │
//! │           └──────────┬─────────────┘                 │
//! │                      ↓                               │
//! │           ┌─────────────────────┐                    │
//! │           │  FileLock (flock)   │                    │
//! │           └─────────────────────┘                    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation is appended to the WAL before it touches the in-memory
//! ledger; startup restores the latest snapshot and replays the WAL tail
//! above its watermark.

mod codec;
mod file_lock;
mod store;
mod wal;

pub use file_lock::FileLock;
pub use store::PersistentStore;
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use crate::storage::traits::StorageError;

/// Configuration for the persistent ledger.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
    /// WAL size in bytes past which a commit triggers compaction.
    pub compact_threshold_bytes: u64,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            compact_threshold_bytes: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl PersistentConfig {
    // 4 KiB minimum to avoid degenerate compact-every-commit loops.
    const MIN_COMPACT_THRESHOLD: u64 = 4 * 1024;

    /// Checks parameter ranges.
    ///
    /// # Errors
    /// Fails when the compaction threshold is small enough to compact on
    /// nearly every commit.
    pub fn validate(self) -> Result<Self, StorageError> {
        if self.compact_threshold_bytes < Self::MIN_COMPACT_THRESHOLD {
            return Err(StorageError::BackendError(format!(
                "compact_threshold_bytes must be at least {} bytes (got {})",
                Self::MIN_COMPACT_THRESHOLD,
                self.compact_threshold_bytes
            )));
        }
        Ok(self)
    }
}

/// Opens or creates a durable ledger in the given directory.
///
/// # Errors
/// - If the directory cannot be created or accessed
/// - If another process holds the lock
/// - If snapshot or WAL contents are corrupt
///
/// # Example
/// ```rust,ignore
/// use kinfold::storage::persistent::open_ledger;
///
/// let store = open_ledger("./dedupe.ledger", None)?;
/// let engine = DedupeEngine::new(Arc::new(store), scorer, config)?;
/// ```
pub fn open_ledger(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentStore, StorageError> {
    let cfg = config.unwrap_or_default().validate()?;
    PersistentStore::open(path.as_ref(), cfg)
}
