//! Sequential WAL record reading with corruption tolerance.

use crate::record::WalRecord;
use crate::writer::list_wal_files;
use chimera_core::{Error, Result};
use std::path::Path;
use tracing::warn;

/// Result of scanning one WAL file: the records successfully parsed, and
/// whether a corrupted record was encountered (at which point scanning of
/// *this file* stopped; the caller moves on to the next file).
pub struct FileScan {
    pub records: Vec<WalRecord>,
    pub corrupted: bool,
}

/// Read every well-formed record from `path` front-to-back. Stops at the
/// first `ChecksumMismatch`, `BufferTooSmall`, or `InvalidRecordType` and
/// reports the file as corrupted from that point; any other I/O error is
/// propagated (fatal, per the recovery policy).
pub fn read_file(path: &Path) -> Result<FileScan> {
    let buf = std::fs::read(path)?;
    let mut records = Vec::new();
    let mut offset = 0usize;
    let mut corrupted = false;

    while offset < buf.len() {
        match WalRecord::from_bytes(&buf[offset..]) {
            Ok((record, consumed)) => {
                offset += consumed;
                records.push(record);
            }
            Err(e) if e.is_corruption() => {
                warn!(file = %path.display(), offset, error = %e, "stopping WAL scan at corrupted record");
                corrupted = true;
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(FileScan { records, corrupted })
}

/// The highest LSN present across every `wal.<n>` file in `dir`, or 0 if none
/// exist or all are empty. Used to position a fresh writer's LSN counter.
pub fn scan_directory_max_lsn(dir: &Path) -> Result<u64> {
    let mut max_lsn = 0u64;
    for path in list_wal_files(dir)? {
        let scan = match read_file(&path) {
            Ok(scan) => scan,
            Err(e) if matches!(e, Error::Io(_)) => {
                warn!(file = %path.display(), "failed to open WAL file while scanning for max LSN, skipping");
                continue;
            }
            Err(e) => return Err(e),
        };
        if let Some(last) = scan.records.last() {
            max_lsn = max_lsn.max(last.lsn);
        }
    }
    Ok(max_lsn)
}
