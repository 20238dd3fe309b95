//! Durable [`DedupeStore`] backend.
//!
//! The store keeps the whole ledger in memory (same [`LedgerState`] as the
//! in-memory backend) and makes every mutation durable by appending it to
//! the WAL before applying it. Startup restores the last snapshot, then
//! replays WAL entries whose sequence lies above the snapshot watermark, so
//! a crash anywhere between append, apply, snapshot, and truncate converges
//! to the same state on reopen.

use std::fs::{self, File};
use std::io::{BufReader, Error as IoError, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::{ClusterId, Membership, MergeRecord};
use crate::contract::AttributeContract;
use crate::record::{RecordId, StagedRecord};
use crate::resolver::BatchCommit;
use crate::storage::state::{check_contract, LedgerState};
use crate::storage::traits::{DedupeStore, LedgerSnapshot, StorageError};

use super::codec;
use super::file_lock::FileLock;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "ledger.wal";
const SNAPSHOT_FILE: &str = "ledger.snapshot";
const SNAPSHOT_TMP: &str = "ledger.snapshot.tmp";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn storage_io(context: &str, err: &IoError) -> StorageError {
    if err.kind() == ErrorKind::InvalidData {
        StorageError::SerializationError(format!("{context}: {err}"))
    } else {
        StorageError::BackendError(format!("{context}: {err}"))
    }
}

/// On-disk snapshot: the full ledger plus the WAL sequence it covers.
///
/// Replay applies only WAL entries with `sequence > wal_sequence`, which is
/// what makes a crash between snapshot install and WAL truncation harmless.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    wal_sequence: u64,
    ledger: LedgerSnapshot,
}

/// WAL-backed dedupe store for a single process.
///
/// Opening acquires an exclusive lock on the ledger directory; a second
/// open fails with a backend error until the first store is dropped.
pub struct PersistentStore {
    dir: PathBuf,
    _lock: FileLock,
    wal: WriteAheadLog,
    state: RwLock<LedgerState>,
    contract: Option<AttributeContract>,
    config: PersistentConfig,
}

impl PersistentStore {
    /// Opens or creates a ledger in `dir` with no attribute contract.
    ///
    /// # Errors
    /// Fails if the directory cannot be created, another process holds the
    /// lock, or the snapshot/WAL contents are corrupt.
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        Self::open_inner(dir, config, None)
    }

    /// Opens or creates a ledger that enforces `contract` on every staged
    /// record.
    ///
    /// # Errors
    /// Same conditions as [`open`](PersistentStore::open).
    pub fn open_with_contract(
        dir: &Path,
        config: PersistentConfig,
        contract: AttributeContract,
    ) -> Result<Self, StorageError> {
        Self::open_inner(dir, config, Some(contract))
    }

    fn open_inner(
        dir: &Path,
        config: PersistentConfig,
        contract: Option<AttributeContract>,
    ) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| storage_io("create ledger directory", &e))?;
        let lock = FileLock::acquire(dir).map_err(|e| storage_io("acquire ledger lock", &e))?;

        let (mut state, watermark) = match read_snapshot(&dir.join(SNAPSHOT_FILE))? {
            Some(snapshot) => (
                LedgerState::from_snapshot(snapshot.ledger),
                snapshot.wal_sequence,
            ),
            None => (LedgerState::new(), 0),
        };

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write, watermark)
            .map_err(|e| storage_io("open wal", &e))?;

        let mut replayed = 0_usize;
        let mut skipped = 0_usize;
        for entry in wal.iter().map_err(|e| storage_io("read wal", &e))? {
            let entry = entry.map_err(|e| storage_io("replay wal", &e))?;
            if entry.sequence <= watermark {
                skipped += 1;
                continue;
            }
            apply_entry(&mut state, entry.kind);
            replayed += 1;
        }
        if replayed > 0 || skipped > 0 {
            info!(replayed, skipped, watermark, "ledger wal replayed");
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            state: RwLock::new(state),
            contract,
            config,
        })
    }

    /// The ledger directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The sequence number of the most recent WAL entry.
    #[must_use]
    pub fn wal_sequence(&self) -> u64 {
        self.wal.current_sequence()
    }

    /// Folds the WAL into a fresh snapshot and truncates it.
    ///
    /// Called automatically once the WAL grows past the configured
    /// threshold; exposed for orderly shutdowns.
    ///
    /// # Errors
    /// Fails if the snapshot cannot be written or the WAL cannot be
    /// truncated; the ledger stays usable either way.
    pub fn compact(&self) -> Result<(), StorageError> {
        // The write lock is held across snapshot and truncate so no commit
        // can land between the two.
        let state = self.state.write().map_err(|_| lock_err("compact"))?;
        let watermark = self.wal.current_sequence();
        let snapshot = SnapshotFile {
            wal_sequence: watermark,
            ledger: state.to_snapshot(),
        };
        write_snapshot(&self.dir, &snapshot, self.config.sync_on_write)?;
        self.wal.truncate().map_err(|e| storage_io("truncate wal", &e))?;
        debug!(watermark, "ledger compacted");
        Ok(())
    }

    fn maybe_compact(&self) -> Result<(), StorageError> {
        let size = self.wal.size_bytes().map_err(|e| storage_io("wal size", &e))?;
        if size < self.config.compact_threshold_bytes {
            return Ok(());
        }
        self.compact()
    }
}

fn apply_entry(state: &mut LedgerState, kind: WalEntryKind) {
    match kind {
        WalEntryKind::StagedInsert(record) => state.apply_insert(record),
        WalEntryKind::Restage {
            record,
            attributes,
            restaged_at,
        } => state.apply_restage(&record, attributes, restaged_at),
        WalEntryKind::Commit(commit) => state.apply_commit(&commit),
    }
}

fn read_snapshot(path: &Path) -> Result<Option<SnapshotFile>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).map_err(|e| storage_io("open snapshot", &e))?;
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader).map_err(|e| storage_io("snapshot header", &e))?;
    let snapshot = codec::decode(&mut reader).map_err(|e| storage_io("decode snapshot", &e))?;
    Ok(Some(snapshot))
}

fn write_snapshot(dir: &Path, snapshot: &SnapshotFile, sync: bool) -> Result<(), StorageError> {
    let tmp_path = dir.join(SNAPSHOT_TMP);
    {
        let mut out = File::create(&tmp_path).map_err(|e| storage_io("create snapshot", &e))?;
        codec::write_header(&mut out).map_err(|e| storage_io("snapshot header", &e))?;
        let frame = codec::encode(snapshot).map_err(|e| storage_io("encode snapshot", &e))?;
        out.write_all(&frame)
            .map_err(|e| storage_io("write snapshot", &e))?;
        if sync {
            out.sync_all().map_err(|e| storage_io("sync snapshot", &e))?;
        }
    }
    // Install atomically over any previous snapshot.
    fs::rename(&tmp_path, dir.join(SNAPSHOT_FILE))
        .map_err(|e| storage_io("install snapshot", &e))?;
    Ok(())
}

impl DedupeStore for PersistentStore {
    fn insert_staged(&self, record: StagedRecord) -> Result<(), StorageError> {
        check_contract(self.contract.as_ref(), &record)?;
        let mut state = self.state.write().map_err(|_| lock_err("insert_staged"))?;
        state.check_insert(&record)?;
        self.wal
            .append(WalEntryKind::StagedInsert(record.clone()))
            .map_err(|e| storage_io("append insert", &e))?;
        state.apply_insert(record);
        Ok(())
    }

    fn restage(
        &self,
        record: &RecordId,
        attributes: serde_json::Value,
    ) -> Result<(), StorageError> {
        let restaged_at = Utc::now();
        let mut state = self.state.write().map_err(|_| lock_err("restage"))?;
        state.check_restage(record)?;
        self.wal
            .append(WalEntryKind::Restage {
                record: record.clone(),
                attributes: attributes.clone(),
                restaged_at,
            })
            .map_err(|e| storage_io("append restage", &e))?;
        state.apply_restage(record, attributes, restaged_at);
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
        {
            let mut state = self.state.write().map_err(|_| lock_err("commit_batch"))?;
            state.validate_commit(&commit)?;
            self.wal
                .append(WalEntryKind::Commit(commit.clone()))
                .map_err(|e| storage_io("append commit", &e))?;
            state.apply_commit(&commit);
        }
        self.maybe_compact()
    }

    fn snapshot(&self) -> Result<LedgerSnapshot, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("snapshot"))?;
        Ok(state.to_snapshot())
    }
}
