//! Auto-commit envelope around table mutations, plus the auto-vacuum trigger
//! that runs after a commit (§4.10).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chimera_core::{Error, Result, Row, RowId};
use chimera_durability::record::encode_update_payload;
use chimera_durability::WalRecordType;
use chimera_engine::Database;
use chimera_storage::persist::encode_row;
use tracing::debug;

/// Wraps a [`Database`] with the statement-level transaction envelope: every
/// mutating call below runs inside its own begin/commit-or-rollback, WAL
/// records are written (if WAL is enabled) before the commit record lands in
/// the CLOG, and a commit may trigger auto-vacuum.
pub struct Executor {
    db: Arc<Database>,
    txns_since_vacuum: AtomicU64,
}

impl Executor {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            txns_since_vacuum: AtomicU64::new(0),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Run `body` inside an auto-commit transaction: begin, call `body` with
    /// the live transaction, commit on `Ok` (running auto-vacuum afterward),
    /// roll back on `Err`.
    pub fn execute<F, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&chimera_concurrency::Transaction) -> Result<T>,
    {
        let tx = self.db.begin();
        if let Some(wal) = self.db.wal() {
            wal.append(WalRecordType::BeginTx, tx.id, 0, "", vec![])?;
        }
        match body(&tx) {
            Ok(value) => {
                if let Some(wal) = self.db.wal() {
                    wal.append(WalRecordType::CommitTx, tx.id, 0, "", vec![])?;
                }
                self.db.commit(tx.id);
                self.maybe_auto_vacuum();
                Ok(value)
            }
            Err(e) => {
                if let Some(wal) = self.db.wal() {
                    wal.append(WalRecordType::RollbackTx, tx.id, 0, "", vec![])?;
                }
                self.db.rollback(tx.id);
                Err(e)
            }
        }
    }

    pub fn insert_row(&self, table: &str, row: Row) -> Result<RowId> {
        self.execute(|tx| {
            let t = self.db.table(table).ok_or_else(|| Error::TableNotFound(table.to_string()))?;
            let row_id = t.insert(row.clone(), tx.id);
            if let Some(wal) = self.db.wal() {
                wal.append(WalRecordType::InsertRow, tx.id, row_id, table, encode_row(&row))?;
            }
            Ok(row_id)
        })
    }

    pub fn update_row(&self, table: &str, row_id: RowId, new_row: Row) -> Result<()> {
        self.execute(|tx| {
            let t = self.db.table(table).ok_or_else(|| Error::TableNotFound(table.to_string()))?;
            let old = t.get(row_id, &tx.snapshot, self.db.clog()).ok_or(Error::RowNotFound(row_id))?;
            if !t.update(row_id, new_row.clone(), tx.id) {
                return Err(Error::RowNotFound(row_id));
            }
            if let Some(wal) = self.db.wal() {
                let payload = encode_update_payload(&encode_row(&old), &encode_row(&new_row));
                wal.append(WalRecordType::UpdateRow, tx.id, row_id, table, payload)?;
            }
            Ok(())
        })
    }

    pub fn delete_row(&self, table: &str, row_id: RowId) -> Result<()> {
        self.execute(|tx| {
            let t = self.db.table(table).ok_or_else(|| Error::TableNotFound(table.to_string()))?;
            if !t.delete(row_id, tx.id) {
                return Err(Error::RowNotFound(row_id));
            }
            if let Some(wal) = self.db.wal() {
                wal.append(WalRecordType::DeleteRow, tx.id, row_id, table, vec![])?;
            }
            Ok(())
        })
    }

    /// Point lookup under a fresh read snapshot. Reads still run inside a
    /// (trivially committing) transaction so their snapshot is taken the same
    /// way a write's would be.
    pub fn get_row(&self, table: &str, row_id: RowId) -> Result<Option<Row>> {
        self.execute(|tx| {
            let t = self.db.table(table).ok_or_else(|| Error::TableNotFound(table.to_string()))?;
            Ok(t.get(row_id, &tx.snapshot, self.db.clog()))
        })
    }

    pub fn scan_table(&self, table: &str) -> Result<Vec<(RowId, Row)>> {
        self.execute(|tx| {
            let t = self.db.table(table).ok_or_else(|| Error::TableNotFound(table.to_string()))?;
            Ok(t.scan(&tx.snapshot, self.db.clog()))
        })
    }

    /// Fires after every commit. Trigger: auto-vacuum enabled AND (the
    /// transaction count since the last vacuum reached `txn_interval`, OR any
    /// table's longest version chain exceeds `max_chain_length`).
    fn maybe_auto_vacuum(&self) {
        let cfg = &self.db.config().auto_vacuum;
        if !cfg.enabled {
            return;
        }
        let count = self.txns_since_vacuum.fetch_add(1, Ordering::SeqCst) + 1;
        let chain_exceeded = self.db.table_names().iter().any(|name| {
            self.db
                .table(name)
                .map(|t| t.longest_chain_len() > cfg.max_chain_length)
                .unwrap_or(false)
        });
        if count >= cfg.txn_interval || chain_exceeded {
            self.run_vacuum();
            self.txns_since_vacuum.store(0, Ordering::SeqCst);
        }
    }

    fn run_vacuum(&self) {
        let horizon = self.db.tx_manager().min_active_txid();
        for name in self.db.table_names() {
            if let Some(t) = self.db.table(&name) {
                let removed = t.vacuum(horizon, self.db.clog());
                if removed > 0 {
                    debug!(table = %name, removed, horizon, "auto-vacuum reclaimed dead versions");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_core::{AutoVacuumConfig, Column, ColumnType, DatabaseConfig, Value};

    fn row(name: &str) -> Row {
        let mut r = Row::new();
        r.insert("name".into(), Value::Text(name.into()));
        r
    }

    #[test]
    fn insert_then_get_round_trips() {
        let db = Arc::new(Database::new(DatabaseConfig::default()));
        db.create_table("users", vec![Column::new("name", ColumnType::Text)]);
        let exec = Executor::new(db.clone());

        let id = exec.insert_row("users", row("Alice")).unwrap();
        let fetched = exec.get_row("users", id).unwrap().unwrap();
        assert!(matches!(fetched.get("name"), Some(Value::Text(s)) if s == "Alice"));
    }

    #[test]
    fn update_then_delete_round_trips() {
        let db = Arc::new(Database::new(DatabaseConfig::default()));
        db.create_table("users", vec![Column::new("name", ColumnType::Text)]);
        let exec = Executor::new(db.clone());

        let id = exec.insert_row("users", row("Alice")).unwrap();
        exec.update_row("users", id, row("Alicia")).unwrap();
        let fetched = exec.get_row("users", id).unwrap().unwrap();
        assert!(matches!(fetched.get("name"), Some(Value::Text(s)) if s == "Alicia"));

        exec.delete_row("users", id).unwrap();
        assert!(exec.get_row("users", id).unwrap().is_none());
    }

    #[test]
    fn mutation_against_missing_table_rolls_back() {
        let db = Arc::new(Database::new(DatabaseConfig::default()));
        let exec = Executor::new(db);
        let err = exec.insert_row("ghost", row("Alice")).unwrap_err();
        assert!(matches!(err, Error::TableNotFound(_)));
    }

    #[test]
    fn wal_records_are_written_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::new(DatabaseConfig::default()));
        db.create_table("users", vec![Column::new("name", ColumnType::Text)]);
        db.enable_wal(dir.path()).unwrap();
        let exec = Executor::new(db.clone());

        exec.insert_row("users", row("Alice")).unwrap();
        let segments = db.wal().unwrap().list_segments().unwrap();
        assert!(!segments.is_empty());
    }

    #[test]
    fn auto_vacuum_fires_after_txn_interval() {
        let db = Arc::new(Database::new(DatabaseConfig {
            auto_vacuum: AutoVacuumConfig { enabled: true, txn_interval: 2, max_chain_length: 1_000 },
            ..DatabaseConfig::default()
        }));
        db.create_table("users", vec![Column::new("name", ColumnType::Text)]);
        let exec = Executor::new(db.clone());

        let id = exec.insert_row("users", row("Alice")).unwrap();
        exec.update_row("users", id, row("Bob")).unwrap();
        // After two committed transactions the interval trigger should have
        // vacuumed away the superseded "Alice" version.
        let t = db.table("users").unwrap();
        assert_eq!(t.longest_chain_len(), 1);
    }
}
