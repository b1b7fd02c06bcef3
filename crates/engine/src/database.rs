//! `Database`: the table/index registry plus the persistence orchestrator
//! (§4.9) — save/load of tables, CLOG, and vector indexes, WAL enablement,
//! and crash recovery.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chimera_concurrency::{Transaction, TransactionManager};
use chimera_core::{Clog, Column, ColumnType, DatabaseConfig, Error, Result, Row, RowId, Snapshot, TxId};
use chimera_durability::{recovery, DurabilityMode as WalDurabilityMode, RecoveryOutcome, TableLookup, WalWriter};
use chimera_index::{HnswConfig, HnswIndex};
use chimera_storage::persist as table_persist;
use chimera_storage::Table;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{info, warn};

const COMMITLOG_FILE: &str = "commitlog.zvdb";

/// A snapshot that can see every committed version regardless of when it was
/// written — used for full-table materialization (HNSW rebuild, table scans
/// driven directly off the registry rather than a live transaction).
fn omniscient_snapshot() -> Snapshot {
    Snapshot {
        xmin: 0,
        xmax: TxId::MAX,
        active_set: HashSet::new(),
    }
}

pub struct Database {
    tables: DashMap<String, Table>,
    indexes: DashMap<(String, String), HnswIndex>,
    clog: Arc<Clog>,
    tx_manager: Arc<TransactionManager>,
    wal: RwLock<Option<Arc<WalWriter>>>,
    config: DatabaseConfig,
    base_dir: RwLock<Option<PathBuf>>,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        let clog = Arc::new(Clog::new());
        // Bootstrap transaction: pre-existing (v2-loaded, xmin=0) rows are
        // always visible without needing a real commit record for txid 0.
        clog.set(0, chimera_core::TxStatus::Committed);
        Self {
            tables: DashMap::new(),
            indexes: DashMap::new(),
            tx_manager: Arc::new(TransactionManager::new(clog.clone())),
            clog,
            wal: RwLock::new(None),
            config,
            base_dir: RwLock::new(None),
        }
    }

    /// Bind to `dir` as the base directory for subsequent `saveAll`/`loadAll`
    /// calls that don't specify an explicit path, creating it if absent.
    pub fn open(dir: impl Into<PathBuf>, config: DatabaseConfig) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let db = Self::new(config);
        *db.base_dir.write() = Some(dir);
        Ok(db)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn tx_manager(&self) -> &Arc<TransactionManager> {
        &self.tx_manager
    }

    pub fn clog(&self) -> &Arc<Clog> {
        &self.clog
    }

    pub fn create_table(&self, name: impl Into<String>, columns: Vec<Column>) {
        let name = name.into();
        self.tables.entry(name.clone()).or_insert_with(|| Table::new(name, columns));
    }

    pub fn table(&self, name: &str) -> Option<dashmap::mapref::one::Ref<'_, String, Table>> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|e| e.key().clone()).collect()
    }

    pub fn vector_index(&self, table: &str, column: &str) -> Option<dashmap::mapref::one::Ref<'_, (String, String), HnswIndex>> {
        self.indexes.get(&(table.to_string(), column.to_string()))
    }

    /// Create (or replace) a vector index for `table.column`, using the
    /// database's default HNSW parameters unless `config` overrides them.
    pub fn create_vector_index(&self, table: &str, column: &str, config: Option<HnswConfig>) {
        let config = config.unwrap_or_else(|| HnswConfig::from(self.config.hnsw_defaults.clone()));
        self.indexes.insert((table.to_string(), column.to_string()), HnswIndex::new(config));
    }

    fn resolve_path(&self, dir: Option<&Path>) -> Result<PathBuf> {
        match dir {
            Some(d) => Ok(d.to_path_buf()),
            None => self
                .base_dir
                .read()
                .clone()
                .ok_or_else(|| Error::Corruption("no base directory bound; call Database::open or pass a path".into())),
        }
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    /// v2 save: newest-row-only, no MVCC history. Losing the version chain
    /// here is intentional — see the file-format note in `chimera_storage`.
    pub fn save_all(&self, dir: Option<&Path>) -> Result<()> {
        let dir = self.resolve_path(dir)?;
        std::fs::create_dir_all(&dir)?;
        for entry in self.tables.iter() {
            let path = dir.join(format!("{}.zvdb", entry.key()));
            table_persist::save_v2(entry.value(), &path)?;
        }
        self.save_vector_indexes(&dir)?;
        info!(dir = %dir.display(), tables = self.tables.len(), "saveAll complete");
        Ok(())
    }

    /// v3 save: full version chains plus the CLOG and a checkpoint txid, so
    /// a subsequent `loadAllMvcc` reconstructs exact MVCC visibility.
    pub fn save_all_mvcc(&self, dir: Option<&Path>) -> Result<()> {
        let dir = self.resolve_path(dir)?;
        std::fs::create_dir_all(&dir)?;
        let checkpoint_txid = self.tx_manager.next_tx_id_peek();
        for entry in self.tables.iter() {
            let path = dir.join(format!("{}.zvdb", entry.key()));
            table_persist::save_v3(entry.value(), checkpoint_txid, &path)?;
        }
        self.clog.save(&dir.join(COMMITLOG_FILE))?;
        self.save_vector_indexes(&dir)?;
        info!(dir = %dir.display(), tables = self.tables.len(), checkpoint_txid, "saveAllMvcc complete");
        Ok(())
    }

    fn save_vector_indexes(&self, dir: &Path) -> Result<()> {
        for entry in self.indexes.iter() {
            let (table, column) = entry.key();
            let path = dir.join(vector_index_filename(table, column, entry.value()));
            chimera_index::persist::save(entry.value(), &path)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------

    pub fn load_all(&self, dir: Option<&Path>) -> Result<()> {
        let dir = self.resolve_path(dir)?;
        self.load_tables(&dir)?;
        self.load_vector_indexes(&dir)?;
        info!(dir = %dir.display(), tables = self.tables.len(), "loadAll complete");
        Ok(())
    }

    pub fn load_all_mvcc(&self, dir: Option<&Path>) -> Result<()> {
        let dir = self.resolve_path(dir)?;
        self.clog.restore_from(&dir.join(COMMITLOG_FILE))?;
        let max_checkpoint = self.load_tables(&dir)?;
        self.tx_manager.advance_past(max_checkpoint);
        self.load_vector_indexes(&dir)?;
        info!(dir = %dir.display(), tables = self.tables.len(), "loadAllMvcc complete");
        Ok(())
    }

    /// Load every `<name>.zvdb` file in `dir` (v2 or v3, auto-probed by the
    /// storage crate). Returns the highest checkpoint txid seen, 0 if none
    /// carried one.
    fn load_tables(&self, dir: &Path) -> Result<TxId> {
        let mut max_checkpoint = 0u64;
        if !dir.exists() {
            return Ok(max_checkpoint);
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = table_file_name(&path) else { continue };
            if let Some(loaded) = table_persist::load(&path)? {
                max_checkpoint = max_checkpoint.max(loaded.checkpoint_txid.unwrap_or(0));
                self.tables.insert(name, loaded.table);
            }
        }
        Ok(max_checkpoint)
    }

    fn load_vector_indexes(&self, dir: &Path) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some((table, column)) = parse_vector_index_filename(&path) else { continue };
            if let Some(index) = chimera_index::persist::load(&path)? {
                self.indexes.insert((table, column), index);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // WAL + recovery
    // ------------------------------------------------------------------

    fn wal_durability_mode(&self) -> WalDurabilityMode {
        match self.config.durability {
            chimera_core::DurabilityMode::None => WalDurabilityMode::None,
            chimera_core::DurabilityMode::Always => WalDurabilityMode::Always,
            // The config surface models "periodic" without a knob for the
            // period; the durability crate's mode needs a concrete batch
            // size, so a fixed default is applied here.
            chimera_core::DurabilityMode::Standard => WalDurabilityMode::Standard { batch_size: 32 },
        }
    }

    pub fn enable_wal(&self, wal_dir: impl AsRef<Path>) -> Result<()> {
        if self.wal.read().is_some() {
            return Err(Error::WalAlreadyEnabled);
        }
        let writer = WalWriter::open(wal_dir.as_ref(), self.wal_durability_mode())?;
        *self.wal.write() = Some(Arc::new(writer));
        Ok(())
    }

    pub fn wal(&self) -> Option<Arc<WalWriter>> {
        self.wal.read().clone()
    }

    /// Two-pass recovery: replays every committed transaction's WAL records
    /// onto the current table registry, then advances the transaction
    /// counter past every txid observed so none are ever reused.
    pub fn recover_from_wal(&self, wal_dir: impl AsRef<Path>) -> Result<RecoveryOutcome> {
        let outcome = recovery::recover(wal_dir.as_ref(), self)?;
        self.tx_manager.advance_past(outcome.max_tx_id);
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Vector index maintenance
    // ------------------------------------------------------------------

    /// Drop and rebuild every registered vector index from the current,
    /// visible table contents. Used after WAL recovery, when a table's rows
    /// changed but its HNSW file (if any) was not itself journaled.
    pub fn rebuild_hnsw_from_tables(&self) -> Result<()> {
        let snapshot = omniscient_snapshot();
        let mut rebuilt = Vec::new();
        for table_entry in self.tables.iter() {
            let table_name = table_entry.key().clone();
            let table = table_entry.value();
            for column in &table.columns {
                if let ColumnType::Embedding { .. } = column.col_type {
                    let config = HnswConfig::from(self.config.hnsw_defaults.clone());
                    let index = HnswIndex::new(config);
                    for (row_id, row) in table.scan(&snapshot, &self.clog) {
                        if let Some(chimera_core::Value::Embedding(v)) = row.get(&column.name) {
                            index.insert(v.clone(), Some(row_id))?;
                        }
                    }
                    rebuilt.push(((table_name.clone(), column.name.clone()), index));
                }
            }
        }
        let count = rebuilt.len();
        for (key, index) in rebuilt {
            self.indexes.insert(key, index);
        }
        info!(indexes_rebuilt = count, "rebuildHnswFromTables complete");
        Ok(())
    }

    /// Turn on both MVCC persistence and, if `auto_save` is set, a save
    /// after every commit (the executor calls `maybe_auto_save` for this;
    /// the engine only records the directory and the flag here).
    pub fn enable_persistence(&self, dir: impl Into<PathBuf>, auto_save: bool) -> Result<()> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        *self.base_dir.write() = Some(dir.clone());
        if auto_save {
            // Tolerant of an empty/fresh directory: loaders no-op when their
            // files are absent rather than erroring.
            self.load_all_mvcc(Some(&dir))?;
        }
        Ok(())
    }

    pub fn begin(&self) -> Transaction {
        self.tx_manager.begin()
    }

    pub fn commit(&self, txid: TxId) {
        self.tx_manager.commit(txid);
    }

    pub fn rollback(&self, txid: TxId) {
        self.tx_manager.rollback(txid);
    }
}

impl TableLookup for Database {
    fn apply_insert(&self, table: &str, row_id: RowId, data: Row, xmin: TxId) -> bool {
        match self.tables.get(table) {
            Some(t) => {
                t.insert_if_absent(row_id, data, xmin);
                true
            }
            None => {
                warn!(table, "WAL replay referenced a table that does not exist in the registry");
                false
            }
        }
    }

    fn apply_delete(&self, table: &str, row_id: RowId, xid: TxId) -> bool {
        match self.tables.get(table) {
            Some(t) => {
                t.replay_delete(row_id, xid);
                true
            }
            None => false,
        }
    }

    fn apply_update(&self, table: &str, row_id: RowId, data: Row, xid: TxId) -> bool {
        match self.tables.get(table) {
            Some(t) => {
                t.replay_update(row_id, data, xid);
                true
            }
            None => false,
        }
    }
}

fn safe_column_name(column: &str) -> String {
    column.replace('/', "_")
}

fn vector_index_filename(table: &str, column: &str, index: &HnswIndex) -> String {
    let dim = index.dimension().unwrap_or(0);
    format!("{table}.vectors_{dim}_{}.hnsw", safe_column_name(column))
}

/// Parse `<table>.vectors_<dim>_<column>.hnsw`, tolerating the legacy
/// dimension-only names by mapping them to a synthetic `"embedding"` column.
fn parse_vector_index_filename(path: &Path) -> Option<(String, String)> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_suffix(".hnsw")?;
    let (table, rest) = rest.split_once(".vectors_")?;
    if rest.is_empty() {
        return None;
    }
    match rest.split_once('_') {
        Some((_dim, column)) if !column.is_empty() => Some((table.to_string(), column.to_string())),
        _ => Some((table.to_string(), "embedding".to_string())),
    }
}

fn table_file_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".zvdb")?;
    if stem == "commitlog" || name.contains(".vectors_") {
        return None;
    }
    Some(stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_core::{ColumnType, Value};

    fn row(name: &str) -> Row {
        let mut r = Row::new();
        r.insert("name".into(), Value::Text(name.into()));
        r
    }

    #[test]
    fn save_all_then_load_all_round_trips_live_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DatabaseConfig::default());
        db.create_table("users", vec![Column::new("name", ColumnType::Text)]);
        db.table("users").unwrap().insert(row("Alice"), 0);
        db.save_all(Some(dir.path())).unwrap();

        let db2 = Database::new(DatabaseConfig::default());
        db2.load_all(Some(dir.path())).unwrap();
        let snapshot = omniscient_snapshot();
        let rows = db2.table("users").unwrap().scan(&snapshot, db2.clog());
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn save_all_mvcc_then_load_all_mvcc_restores_clog_and_counter() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DatabaseConfig::default());
        db.create_table("users", vec![Column::new("name", ColumnType::Text)]);
        let tx = db.begin();
        db.table("users").unwrap().insert(row("Alice"), tx.id);
        db.commit(tx.id);
        db.save_all_mvcc(Some(dir.path())).unwrap();

        let db2 = Database::new(DatabaseConfig::default());
        db2.load_all_mvcc(Some(dir.path())).unwrap();
        assert!(db2.clog().is_committed(tx.id));
        assert!(db2.tx_manager().next_tx_id_peek() > tx.id);
    }

    #[test]
    fn enable_wal_rejects_double_enable() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DatabaseConfig::default());
        db.enable_wal(dir.path()).unwrap();
        let err = db.enable_wal(dir.path()).unwrap_err();
        assert!(matches!(err, Error::WalAlreadyEnabled));
    }

    #[test]
    fn rebuild_hnsw_indexes_visible_embedding_rows() {
        let db = Database::new(DatabaseConfig::default());
        db.create_table("docs", vec![Column::new("embedding", ColumnType::Embedding { dim: Some(2) })]);
        let mut r = Row::new();
        r.insert("embedding".into(), Value::Embedding(vec![1.0, 0.0]));
        db.table("docs").unwrap().insert(r, 0);

        db.rebuild_hnsw_from_tables().unwrap();
        let index = db.vector_index("docs", "embedding").unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn vector_index_filename_round_trips() {
        let db = Database::new(DatabaseConfig::default());
        db.create_vector_index("docs", "embedding", Some(HnswConfig { m: 16, ef_construction: 200, ef_search: 200, ml: 0.36 }));
        let index = db.vector_index("docs", "embedding").unwrap();
        let name = vector_index_filename("docs", "embedding", &index);
        assert_eq!(parse_vector_index_filename(Path::new(&name)), Some(("docs".to_string(), "embedding".to_string())));
    }
}
