//! [`ChimeraDb`]: the embeddable database handle (§6 CLI/embed interface).
//!
//! Statement parsing and JOIN/expression evaluation live outside this crate
//! by design — [`Statement`] models the structured instruction a SQL layer
//! would hand down after parsing, and `execute` dispatches it the same way
//! an auto-commit SQL engine would.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chimera_core::{Column, DatabaseConfig, Result, Row, RowId};
use chimera_durability::RecoveryOutcome;
use chimera_engine::Database;
use chimera_executor::Executor;
use chimera_index::{HnswConfig, SearchHit};

/// A structured statement, standing in for whatever a SQL parser/planner
/// would hand the core after parsing and name resolution.
#[derive(Debug, Clone)]
pub enum Statement {
    Insert { table: String, row: Row },
    Update { table: String, row_id: RowId, row: Row },
    Delete { table: String, row_id: RowId },
    Get { table: String, row_id: RowId },
    Scan { table: String },
    SimilaritySearch { table: String, column: String, query: Vec<f32>, k: usize },
}

/// Result of executing a [`Statement`].
#[derive(Debug, Clone)]
pub enum QueryResult {
    RowId(RowId),
    Row(Option<Row>),
    Rows(Vec<(RowId, Row)>),
    Hits(Vec<SearchHit>),
    Unit,
}

/// An open ChimeraDB database: table and vector-index registry, transaction
/// manager, and the persistence orchestrator, wrapped behind the
/// auto-commit statement executor.
pub struct ChimeraDb {
    executor: Executor,
}

impl ChimeraDb {
    /// Open (or create) a database rooted at `dir`, with default
    /// configuration. Does not load any existing table/CLOG files on its
    /// own — call [`ChimeraDb::load_all`] or [`ChimeraDb::enable_persistence`]
    /// to do that.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(dir, DatabaseConfig::default())
    }

    pub fn open_with_config(dir: impl AsRef<Path>, config: DatabaseConfig) -> Result<Self> {
        let db = Database::open(dir.as_ref().to_path_buf(), config)?;
        Ok(Self {
            executor: Executor::new(Arc::new(db)),
        })
    }

    /// An in-memory database with no base directory bound yet. `saveAll`/
    /// `loadAll` then require an explicit path.
    pub fn in_memory(config: DatabaseConfig) -> Self {
        Self {
            executor: Executor::new(Arc::new(Database::new(config))),
        }
    }

    fn db(&self) -> &Database {
        self.executor.database()
    }

    pub fn create_table(&self, name: impl Into<String>, columns: Vec<Column>) {
        self.db().create_table(name, columns);
    }

    pub fn create_vector_index(&self, table: &str, column: &str, config: Option<HnswConfig>) {
        self.db().create_vector_index(table, column, config);
    }

    /// Dispatch a structured statement through the auto-commit envelope.
    pub fn execute(&self, stmt: Statement) -> Result<QueryResult> {
        match stmt {
            Statement::Insert { table, row } => self.executor.insert_row(&table, row).map(QueryResult::RowId),
            Statement::Update { table, row_id, row } => {
                self.executor.update_row(&table, row_id, row).map(|_| QueryResult::Unit)
            }
            Statement::Delete { table, row_id } => self.executor.delete_row(&table, row_id).map(|_| QueryResult::Unit),
            Statement::Get { table, row_id } => self.executor.get_row(&table, row_id).map(QueryResult::Row),
            Statement::Scan { table } => self.executor.scan_table(&table).map(QueryResult::Rows),
            Statement::SimilaritySearch { table, column, query, k } => {
                let index = self
                    .db()
                    .vector_index(&table, &column)
                    .ok_or_else(|| chimera_core::Error::ColumnNotFound(format!("{table}.{column}")))?;
                index.search(&query, k).map(QueryResult::Hits)
            }
        }
    }

    pub fn save_all(&self, dir: Option<&Path>) -> Result<()> {
        self.db().save_all(dir)
    }

    pub fn save_all_mvcc(&self, dir: Option<&Path>) -> Result<()> {
        self.db().save_all_mvcc(dir)
    }

    pub fn load_all(&self, dir: Option<&Path>) -> Result<()> {
        self.db().load_all(dir)
    }

    pub fn load_all_mvcc(&self, dir: Option<&Path>) -> Result<()> {
        self.db().load_all_mvcc(dir)
    }

    pub fn enable_wal(&self, wal_dir: impl AsRef<Path>) -> Result<()> {
        self.db().enable_wal(wal_dir)
    }

    pub fn recover_from_wal(&self, wal_dir: impl AsRef<Path>) -> Result<RecoveryOutcome> {
        self.db().recover_from_wal(wal_dir)
    }

    pub fn rebuild_hnsw_from_tables(&self) -> Result<()> {
        self.db().rebuild_hnsw_from_tables()
    }

    pub fn enable_persistence(&self, dir: impl Into<PathBuf>, auto_save: bool) -> Result<()> {
        self.db().enable_persistence(dir, auto_save)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_core::{ColumnType, Value};

    #[test]
    fn insert_get_update_delete_round_trip_through_statements() {
        let db = ChimeraDb::in_memory(DatabaseConfig::default());
        db.create_table("docs", vec![Column::new("title", ColumnType::Text)]);

        let mut row = Row::new();
        row.insert("title".into(), Value::Text("hello".into()));
        let id = match db.execute(Statement::Insert { table: "docs".into(), row }).unwrap() {
            QueryResult::RowId(id) => id,
            other => panic!("unexpected result: {other:?}"),
        };

        let fetched = match db.execute(Statement::Get { table: "docs".into(), row_id: id }).unwrap() {
            QueryResult::Row(Some(r)) => r,
            other => panic!("unexpected result: {other:?}"),
        };
        assert!(matches!(fetched.get("title"), Some(Value::Text(s)) if s == "hello"));

        db.execute(Statement::Delete { table: "docs".into(), row_id: id }).unwrap();
        match db.execute(Statement::Get { table: "docs".into(), row_id: id }).unwrap() {
            QueryResult::Row(None) => {}
            other => panic!("expected row to be gone, got {other:?}"),
        }
    }

    #[test]
    fn similarity_search_over_statement_interface() {
        let db = ChimeraDb::in_memory(DatabaseConfig::default());
        db.create_table("docs", vec![Column::new("embedding", ColumnType::Embedding { dim: Some(2) })]);
        db.create_vector_index("docs", "embedding", None);

        let index = db.db().vector_index("docs", "embedding").unwrap();
        index.insert(vec![1.0, 0.0], None).unwrap();
        index.insert(vec![0.0, 1.0], None).unwrap();
        drop(index);

        let result = db
            .execute(Statement::SimilaritySearch {
                table: "docs".into(),
                column: "embedding".into(),
                query: vec![0.9, 0.1],
                k: 1,
            })
            .unwrap();
        let hits = match result {
            QueryResult::Hits(h) => h,
            other => panic!("unexpected result: {other:?}"),
        };
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].point, vec![1.0, 0.0]);
    }

    #[test]
    fn save_all_then_load_all_round_trips_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db = ChimeraDb::open(dir.path()).unwrap();
        db.create_table("docs", vec![Column::new("title", ColumnType::Text)]);
        let mut row = Row::new();
        row.insert("title".into(), Value::Text("hello".into()));
        db.execute(Statement::Insert { table: "docs".into(), row }).unwrap();
        db.save_all(None).unwrap();

        let db2 = ChimeraDb::open(dir.path()).unwrap();
        db2.load_all(None).unwrap();
        match db2.execute(Statement::Scan { table: "docs".into() }).unwrap() {
            QueryResult::Rows(rows) => assert_eq!(rows.len(), 1),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
