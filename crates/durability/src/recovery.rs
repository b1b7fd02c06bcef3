//! Two-pass WAL recovery: a status scan followed by an idempotent replay.

use crate::reader::read_file;
use crate::record::{decode_update_payload, WalRecord, WalRecordType};
use crate::writer::list_wal_files;
use chimera_core::{Result, Row, RowId, TxId, TxStatus};
use chimera_storage::persist::decode_row;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Applies replayed mutations to whatever table-storage backend owns the
/// actual tables. Implemented by the engine crate's table registry so that
/// this crate does not need to know how tables are stored or locked.
pub trait TableLookup {
    /// Idempotent insert: no-op if `row_id` already exists. Returns `false`
    /// if `table` does not exist.
    fn apply_insert(&self, table: &str, row_id: RowId, data: Row, xmin: TxId) -> bool;
    /// Idempotent delete: no-op if the row does not exist. Returns `false`
    /// if `table` does not exist.
    fn apply_delete(&self, table: &str, row_id: RowId, xid: TxId) -> bool;
    /// Idempotent update: replaces the row wholesale if present, inserts it
    /// fresh if absent. Returns `false` if `table` does not exist.
    fn apply_update(&self, table: &str, row_id: RowId, data: Row, xid: TxId) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryOutcome {
    pub files_scanned: usize,
    pub corrupted_records_skipped: usize,
    pub committed_txns: usize,
    pub rows_applied: usize,
    pub rows_skipped_missing_table: usize,
    pub max_tx_id: TxId,
}

/// Recover `dir` (a directory of `wal.<n>` files) onto `tables`. Absence of
/// the directory, or of any WAL files within it, recovers zero transactions
/// and is not an error.
pub fn recover(dir: &Path, tables: &impl TableLookup) -> Result<RecoveryOutcome> {
    let files = list_wal_files(dir)?;
    if files.is_empty() {
        info!(dir = %dir.display(), "no WAL files found, nothing to recover");
        return Ok(RecoveryOutcome::default());
    }

    let mut outcome = RecoveryOutcome::default();
    let mut all_records: Vec<WalRecord> = Vec::new();

    // Pass 1: status scan.
    let mut status: HashMap<TxId, TxStatus> = HashMap::new();
    for path in &files {
        let scan = match read_file(path) {
            Ok(scan) => scan,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "WAL file failed to open, skipping");
                continue;
            }
        };
        outcome.files_scanned += 1;
        if scan.corrupted {
            outcome.corrupted_records_skipped += 1;
        }
        for record in &scan.records {
            outcome.max_tx_id = outcome.max_tx_id.max(record.tx_id);
            match record.record_type {
                WalRecordType::CommitTx => {
                    status.insert(record.tx_id, TxStatus::Committed);
                }
                WalRecordType::RollbackTx => {
                    status.insert(record.tx_id, TxStatus::Aborted);
                }
                _ => {}
            }
        }
        all_records.extend(scan.records);
    }
    outcome.committed_txns = status.values().filter(|s| **s == TxStatus::Committed).count();

    // Pass 2: idempotent apply of committed transactions' data records.
    for record in &all_records {
        if status.get(&record.tx_id).copied() != Some(TxStatus::Committed) {
            continue;
        }
        let applied = match record.record_type {
            WalRecordType::InsertRow => {
                let row = decode_row(&record.data)?;
                tables.apply_insert(&record.table_name, record.row_id, row, record.tx_id)
            }
            WalRecordType::DeleteRow => {
                tables.apply_delete(&record.table_name, record.row_id, record.tx_id)
            }
            WalRecordType::UpdateRow => {
                let (_old, new_bytes) = decode_update_payload(&record.data)?;
                let row = decode_row(new_bytes)?;
                tables.apply_update(&record.table_name, record.row_id, row, record.tx_id)
            }
            WalRecordType::BeginTx
            | WalRecordType::CommitTx
            | WalRecordType::RollbackTx
            | WalRecordType::Checkpoint => continue,
        };
        if applied {
            outcome.rows_applied += 1;
        } else {
            warn!(
                table = %record.table_name,
                row_id = record.row_id,
                "WAL record references a table that no longer exists, skipping"
            );
            outcome.rows_skipped_missing_table += 1;
        }
    }

    info!(
        committed = outcome.committed_txns,
        rows_applied = outcome.rows_applied,
        corrupted = outcome.corrupted_records_skipped,
        "WAL recovery complete"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_update_payload;
    use crate::writer::{DurabilityMode, WalWriter};
    use chimera_storage::persist::encode_row;
    use chimera_storage::Table;
    use parking_lot::Mutex;
    use std::collections::HashMap as StdHashMap;

    struct FakeRegistry {
        tables: Mutex<StdHashMap<String, Table>>,
    }

    impl TableLookup for FakeRegistry {
        fn apply_insert(&self, table: &str, row_id: RowId, data: Row, xmin: TxId) -> bool {
            match self.tables.lock().get(table) {
                Some(t) => {
                    t.insert_if_absent(row_id, data, xmin);
                    true
                }
                None => false,
            }
        }
        fn apply_delete(&self, table: &str, row_id: RowId, xid: TxId) -> bool {
            match self.tables.lock().get(table) {
                Some(t) => {
                    t.replay_delete(row_id, xid);
                    true
                }
                None => false,
            }
        }
        fn apply_update(&self, table: &str, row_id: RowId, data: Row, xid: TxId) -> bool {
            match self.tables.lock().get(table) {
                Some(t) => {
                    t.replay_update(row_id, data, xid);
                    true
                }
                None => false,
            }
        }
    }

    fn row(name: &str) -> Row {
        let mut r = Row::new();
        r.insert("name".into(), chimera_core::Value::Text(name.into()));
        r
    }

    fn registry_with(table_name: &str) -> FakeRegistry {
        let mut map = StdHashMap::new();
        map.insert(
            table_name.to_string(),
            Table::new(table_name, vec![chimera_core::Column::new("name", chimera_core::ColumnType::Text)]),
        );
        FakeRegistry { tables: Mutex::new(map) }
    }

    #[test]
    fn no_wal_files_recovers_zero() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry_with("t");
        let outcome = recover(dir.path(), &reg).unwrap();
        assert_eq!(outcome.committed_txns, 0);
        assert_eq!(outcome.rows_applied, 0);
    }

    #[test]
    fn committed_transaction_is_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let w = WalWriter::open(dir.path(), DurabilityMode::Always).unwrap();
        w.append(WalRecordType::InsertRow, 1, 1, "t", encode_row(&row("Alice"))).unwrap();
        w.append(WalRecordType::CommitTx, 1, 0, "", vec![]).unwrap();

        let reg = registry_with("t");
        let outcome = recover(dir.path(), &reg).unwrap();
        assert_eq!(outcome.committed_txns, 1);
        assert_eq!(outcome.rows_applied, 1);
        assert_eq!(outcome.max_tx_id, 1);
    }

    #[test]
    fn uncommitted_transaction_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let w = WalWriter::open(dir.path(), DurabilityMode::Always).unwrap();
        w.append(WalRecordType::InsertRow, 1, 1, "t", encode_row(&row("Alice"))).unwrap();
        // No CommitTx record for txid 1.

        let reg = registry_with("t");
        let outcome = recover(dir.path(), &reg).unwrap();
        assert_eq!(outcome.committed_txns, 0);
        assert_eq!(outcome.rows_applied, 0);
        // max_tx_id still reflects the txid seen in the WAL, so the transaction
        // manager's counter advances past it and it is never reused.
        assert_eq!(outcome.max_tx_id, 1);
    }

    #[test]
    fn delete_of_missing_row_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let w = WalWriter::open(dir.path(), DurabilityMode::Always).unwrap();
        w.append(WalRecordType::DeleteRow, 1, 999, "t", vec![]).unwrap();
        w.append(WalRecordType::CommitTx, 1, 0, "", vec![]).unwrap();

        let reg = registry_with("t");
        let outcome = recover(dir.path(), &reg).unwrap();
        assert_eq!(outcome.rows_applied, 1);
    }

    #[test]
    fn update_on_absent_row_inserts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let w = WalWriter::open(dir.path(), DurabilityMode::Always).unwrap();
        let payload = encode_update_payload(&[], &encode_row(&row("Zed")));
        w.append(WalRecordType::UpdateRow, 1, 5, "t", payload).unwrap();
        w.append(WalRecordType::CommitTx, 1, 0, "", vec![]).unwrap();

        let reg = registry_with("t");
        let outcome = recover(dir.path(), &reg).unwrap();
        assert_eq!(outcome.rows_applied, 1);
        assert_eq!(reg.tables.lock().get("t").unwrap().row_count(), 1);
    }

    #[test]
    fn record_for_missing_table_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let w = WalWriter::open(dir.path(), DurabilityMode::Always).unwrap();
        w.append(WalRecordType::InsertRow, 1, 1, "ghost", encode_row(&row("Alice"))).unwrap();
        w.append(WalRecordType::CommitTx, 1, 0, "", vec![]).unwrap();

        let reg = registry_with("t"); // "ghost" does not exist
        let outcome = recover(dir.path(), &reg).unwrap();
        assert_eq!(outcome.rows_skipped_missing_table, 1);
        assert_eq!(outcome.rows_applied, 0);
    }
}
