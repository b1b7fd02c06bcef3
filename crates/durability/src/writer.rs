//! WAL segment file management and the fsync policy.

use crate::reader::scan_directory_max_lsn;
use crate::record::{WalRecord, WalRecordType};
use chimera_core::{Result, RowId, TxId};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Controls when `flush` (fsync) is forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// Never fsync explicitly.
    None,
    /// Fsync every `batch_size` records.
    Standard { batch_size: u64 },
    /// Fsync after every record. Required for the auto-commit contract: a
    /// COMMIT record and its preceding data record are flushed together.
    Always,
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Always
    }
}

struct SegmentState {
    file: File,
    path: PathBuf,
    writes_since_sync: u64,
}

/// Appends framed [`WalRecord`]s to `wal.<u64>` files under a directory,
/// assigning monotonically increasing LSNs.
pub struct WalWriter {
    dir: PathBuf,
    mode: DurabilityMode,
    next_lsn: AtomicU64,
    segment: Mutex<SegmentState>,
}

impl WalWriter {
    /// Scan `dir` for existing `wal.<n>` files, open a fresh segment numbered
    /// one past the highest found (or `wal.0` if the directory is empty), and
    /// position the LSN counter past the highest LSN seen in any existing file.
    pub fn open(dir: impl AsRef<Path>, mode: DurabilityMode) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let next_seq = find_latest_segment(&dir)?.map(|n| n + 1).unwrap_or(0);
        let path = dir.join(format!("wal.{next_seq}"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let max_lsn = scan_directory_max_lsn(&dir)?;
        info!(dir = %dir.display(), segment = next_seq, starting_lsn = max_lsn + 1, "WAL writer opened");

        Ok(Self {
            dir,
            mode,
            next_lsn: AtomicU64::new(max_lsn + 1),
            segment: Mutex::new(SegmentState {
                file,
                path,
                writes_since_sync: 0,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_lsn(&self) -> u64 {
        self.next_lsn.fetch_add(1, Ordering::SeqCst)
    }

    /// Build and append a record, assigning it the next LSN. Does not fsync;
    /// call [`WalWriter::flush`] (or rely on the durability-mode policy).
    pub fn append(
        &self,
        record_type: WalRecordType,
        tx_id: TxId,
        row_id: RowId,
        table_name: &str,
        data: Vec<u8>,
    ) -> Result<WalRecord> {
        let lsn = self.next_lsn();
        let record = WalRecord::new(record_type, tx_id, lsn, row_id, table_name, data);
        let bytes = record.to_bytes();

        let mut seg = self.segment.lock();
        seg.file.write_all(&bytes)?;
        seg.writes_since_sync += 1;

        match self.mode {
            DurabilityMode::None => {}
            DurabilityMode::Always => {
                seg.file.sync_data()?;
                seg.writes_since_sync = 0;
            }
            DurabilityMode::Standard { batch_size } => {
                if seg.writes_since_sync >= batch_size {
                    seg.file.sync_data()?;
                    seg.writes_since_sync = 0;
                }
            }
        }
        Ok(record)
    }

    /// Force the OS buffer to disk regardless of durability mode.
    pub fn flush(&self) -> Result<()> {
        let mut seg = self.segment.lock();
        seg.file.sync_data()?;
        seg.writes_since_sync = 0;
        Ok(())
    }

    pub fn current_segment_path(&self) -> PathBuf {
        self.segment.lock().path.clone()
    }

    pub fn list_segments(&self) -> Result<Vec<PathBuf>> {
        list_wal_files(&self.dir)
    }
}

fn find_latest_segment(dir: &Path) -> Result<Option<u64>> {
    let mut max = None;
    for path in list_wal_files(dir)? {
        if let Some(n) = segment_number(&path) {
            max = Some(max.map_or(n, |m: u64| m.max(n)));
        }
    }
    Ok(max)
}

pub(crate) fn segment_number(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix("wal.")?
        .parse::<u64>()
        .ok()
}

pub(crate) fn list_wal_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| segment_number(p).is_some())
        .collect();
    files.sort_by_key(|p| segment_number(p).unwrap());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_writer_opens_wal_0() {
        let dir = tempfile::tempdir().unwrap();
        let w = WalWriter::open(dir.path(), DurabilityMode::Always).unwrap();
        assert_eq!(w.current_segment_path(), dir.path().join("wal.0"));
    }

    #[test]
    fn reopening_continues_sequence_and_lsn() {
        let dir = tempfile::tempdir().unwrap();
        {
            let w = WalWriter::open(dir.path(), DurabilityMode::Always).unwrap();
            w.append(WalRecordType::InsertRow, 1, 1, "t", vec![1]).unwrap();
            w.append(WalRecordType::CommitTx, 1, 0, "", vec![]).unwrap();
        }
        let w2 = WalWriter::open(dir.path(), DurabilityMode::Always).unwrap();
        assert_eq!(w2.current_segment_path(), dir.path().join("wal.1"));
        let rec = w2.append(WalRecordType::InsertRow, 2, 2, "t", vec![2]).unwrap();
        assert!(rec.lsn > 1);
    }

    #[test]
    fn lsns_are_monotonic_within_a_segment() {
        let dir = tempfile::tempdir().unwrap();
        let w = WalWriter::open(dir.path(), DurabilityMode::None).unwrap();
        let r1 = w.append(WalRecordType::InsertRow, 1, 1, "t", vec![]).unwrap();
        let r2 = w.append(WalRecordType::InsertRow, 1, 2, "t", vec![]).unwrap();
        assert!(r2.lsn > r1.lsn);
    }
}
