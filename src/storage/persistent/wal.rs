//! Write-ahead log for crash recovery.
//!
//! The WAL provides durability by:
//! 1. Writing every mutation to an append-only log before applying it
//! 2. Using fsync to ensure data reaches disk
//! 3. Replaying the log on startup to recover state
//!
//! Sequence numbers are monotonic for the lifetime of the ledger, not the
//! file: [`WriteAheadLog::open`] takes a floor (the snapshot watermark) and
//! [`truncate`](WriteAheadLog::truncate) keeps the counter, so an entry's
//! sequence says unambiguously whether a snapshot already contains it.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded WalEntry]
//! [ENTRY 2: codec-encoded WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::record::{RecordId, StagedRecord};
use crate::resolver::BatchCommit;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The operation being logged.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// A record entered staging.
    StagedInsert(StagedRecord),
    /// A staged record was re-extracted upstream.
    Restage {
        /// The record being re-staged.
        record: RecordId,
        /// Replacement attributes.
        attributes: serde_json::Value,
        /// Extraction timestamp, fixed here so replay is deterministic.
        restaged_at: DateTime<Utc>,
    },
    /// One atomic batch commit.
    Commit(BatchCommit),
}

/// Write-ahead log for crash recovery.
///
/// Thread-safe via internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    current_sequence: Mutex<u64>,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Opens or creates a WAL file.
    ///
    /// If the file exists, reads the last sequence number from it; the
    /// counter then continues from the larger of that value and `floor`.
    /// Pass the snapshot watermark as `floor` so sequences stay monotonic
    /// even when the log was truncated after a compaction.
    pub fn open(path: &Path, sync_on_write: bool, floor: u64) -> IoResult<Self> {
        let exists = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let found = if exists && file.metadata()?.len() >= 5 {
            // Read existing entries to find the last sequence
            Self::find_last_sequence(path)?
        } else {
            // New file, write the header
            let mut file = file;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            0
        };

        // Reopen for appending
        let file = OpenOptions::new().append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
            current_sequence: Mutex::new(found.max(floor)),
            sync_on_write,
        })
    }

    /// Appends an entry to the WAL.
    ///
    /// Returns the sequence number assigned to this entry.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self.writer.lock().unwrap();
        let mut seq_guard = self.current_sequence.lock().unwrap();

        let candidate = *seq_guard + 1;
        let entry = WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            kind,
        };

        let encoded = codec::encode(&entry)?;

        writer.write_all(&encoded)?;
        writer.flush()?;

        if self.sync_on_write {
            writer.get_ref().sync_all()?;
        }

        *seq_guard = candidate;

        Ok(candidate)
    }

    /// Iterates over all entries in the WAL.
    ///
    /// Used during recovery to replay mutations.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// The sequence number of the most recent entry.
    pub fn current_sequence(&self) -> u64 {
        *self.current_sequence.lock().unwrap()
    }

    /// The WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Truncates the WAL after its entries were folded into a snapshot.
    ///
    /// The sequence counter is deliberately left where it is: entries must
    /// keep numbering past the snapshot watermark, so replay can tell what
    /// the snapshot already contains.
    ///
    /// # Safety
    /// Only call this after a snapshot covering every current entry has
    /// been durably written.
    pub fn truncate(&self) -> IoResult<()> {
        let mut staged = self.path.clone().into_os_string();
        staged.push(".tmp");
        let staged_path = PathBuf::from(staged);

        let mut writer = self.writer.lock().unwrap();
        writer.flush()?;

        // Stage the empty replacement next to the live log so the rename
        // stays on one filesystem and a crash leaves at most a stale .tmp.
        {
            let mut staged_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&staged_path)?;
            codec::write_header(&mut staged_file)?;
            if self.sync_on_write {
                staged_file.sync_all()?;
            }
        }

        if let Err(err) = std::fs::rename(&staged_path, &self.path) {
            let _ = std::fs::remove_file(&staged_path);
            return Err(err);
        }

        // The old handle now points at the replaced inode; give the writer
        // a fresh append handle on the installed log.
        let file = OpenOptions::new().append(true).open(&self.path)?;
        *writer = BufWriter::new(file);

        Ok(())
    }

    fn find_last_sequence(path: &Path) -> IoResult<u64> {
        let mut last_seq = 0;

        for entry_result in WalIterator::new(path)? {
            match entry_result {
                Ok(entry) => last_seq = entry.sequence,
                Err(e) => {
                    // Tolerate a torn tail here; recovery replays up to the
                    // last valid entry and rejects anything worse.
                    warn!(after_sequence = last_seq, error = %e, "wal scan stopped early");
                    break;
                }
            }
        }

        Ok(last_seq)
    }
}

/// Iterator over WAL entries.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        // Skip header
        let _version = codec::read_header(&mut reader)?;

        Ok(Self { reader, file_size })
    }

    fn at_eof(&mut self) -> IoResult<bool> {
        let pos = self.reader.stream_position()?;
        Ok(pos >= self.file_size)
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        // A cleanly written file ends exactly at file_size
        match self.at_eof() {
            Ok(true) => return None,
            Ok(false) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(id: &str) -> StagedRecord {
        StagedRecord::new(id, json!({"full_name": id.to_uppercase()}))
    }

    #[test]
    fn test_wal_append_and_iterate() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("test.wal");

        let wal = WriteAheadLog::open(&wal_path, false, 0).unwrap();

        wal.append(WalEntryKind::StagedInsert(record("r1"))).unwrap();
        wal.append(WalEntryKind::Restage {
            record: RecordId::from("r1"),
            attributes: json!({"full_name": "R1 CHANGED"}),
            restaged_at: Utc::now(),
        })
        .unwrap();

        assert_eq!(wal.current_sequence(), 2);

        // Drop and reopen to ensure the file is properly flushed
        drop(wal);

        let wal = WriteAheadLog::open(&wal_path, false, 0).unwrap();

        let entries: Vec<_> = wal.iter().unwrap().collect();
        assert_eq!(entries.len(), 2);

        let first = entries[0].as_ref().unwrap();
        assert_eq!(first.sequence, 1);
        assert!(matches!(first.kind, WalEntryKind::StagedInsert(_)));
    }

    #[test]
    fn test_wal_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("persist.wal");

        {
            let wal = WriteAheadLog::open(&wal_path, true, 0).unwrap();
            wal.append(WalEntryKind::StagedInsert(record("r1"))).unwrap();
        }

        {
            let wal = WriteAheadLog::open(&wal_path, true, 0).unwrap();
            assert_eq!(wal.current_sequence(), 1);

            let entries: Vec<_> = wal.iter().unwrap().collect();
            assert_eq!(entries.len(), 1);
        }
    }

    #[test]
    fn test_floor_lifts_sequence_on_empty_log() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("floored.wal");

        let wal = WriteAheadLog::open(&wal_path, false, 41).unwrap();
        assert_eq!(wal.current_sequence(), 41);
        let seq = wal.append(WalEntryKind::StagedInsert(record("r1"))).unwrap();
        assert_eq!(seq, 42);
    }

    #[test]
    fn test_truncate_keeps_sequence_counter() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("trunc.wal");

        let wal = WriteAheadLog::open(&wal_path, false, 0).unwrap();
        wal.append(WalEntryKind::StagedInsert(record("r1"))).unwrap();
        wal.append(WalEntryKind::StagedInsert(record("r2"))).unwrap();

        wal.truncate().unwrap();
        assert_eq!(wal.iter().unwrap().count(), 0);
        assert_eq!(wal.current_sequence(), 2);

        let seq = wal.append(WalEntryKind::StagedInsert(record("r3"))).unwrap();
        assert_eq!(seq, 3);
    }

    #[test]
    fn test_truncate_stages_replacement_beside_the_log() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("staged.wal");

        let wal = WriteAheadLog::open(&wal_path, false, 0).unwrap();
        wal.append(WalEntryKind::StagedInsert(record("r1"))).unwrap();
        wal.truncate().unwrap();

        // The staged file is renamed over the log, never left behind.
        assert!(!dir.path().join("staged.wal.tmp").exists());
        assert!(wal_path.exists());

        // The installed log is append-ready.
        wal.append(WalEntryKind::StagedInsert(record("r2"))).unwrap();
        assert_eq!(wal.iter().unwrap().count(), 1);
    }

    #[test]
    fn test_torn_tail_stops_iteration_cleanly() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("torn.wal");

        {
            let wal = WriteAheadLog::open(&wal_path, false, 0).unwrap();
            wal.append(WalEntryKind::StagedInsert(record("r1"))).unwrap();
            wal.append(WalEntryKind::StagedInsert(record("r2"))).unwrap();
        }

        // Chop bytes off the final frame to simulate a crash mid-write.
        let bytes = std::fs::read(&wal_path).unwrap();
        std::fs::write(&wal_path, &bytes[..bytes.len() - 7]).unwrap();

        let wal = WriteAheadLog::open(&wal_path, false, 0).unwrap();
        let entries: Vec<_> = wal.iter().unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_ok());
        assert_eq!(wal.current_sequence(), 1);
    }
}
