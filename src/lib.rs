//! # ChimeraDB
//!
//! An embeddable hybrid relational + vector database: ordinary tables with
//! MVCC snapshot isolation, sitting alongside HNSW approximate-nearest-
//! neighbor indexes over embedding-typed columns, backed by a write-ahead
//! log with crash recovery.
//!
//! A process links this library, opens a database by directory path, and
//! issues statements through [`ChimeraDb::execute`] — or reaches past it to
//! the table registry and vector indexes directly for lower-level access.
//! Parsing an actual SQL surface into [`Statement`] is explicitly outside
//! this crate; that's a thin layer meant to sit on top.
//!
//! # Quick Start
//!
//! ```no_run
//! use chimeradb::{ChimeraDb, Statement, QueryResult};
//! use chimera_core::{Column, ColumnType, Row, Value};
//!
//! fn main() -> chimera_core::Result<()> {
//!     let db = ChimeraDb::open("./my-data")?;
//!     db.create_table("docs", vec![
//!         Column::new("title", ColumnType::Text),
//!         Column::new("embedding", ColumnType::Embedding { dim: Some(384) }),
//!     ]);
//!     db.create_vector_index("docs", "embedding", None);
//!
//!     let mut row = Row::new();
//!     row.insert("title".into(), Value::Text("hello world".into()));
//!     db.execute(Statement::Insert { table: "docs".into(), row })?;
//!
//!     db.enable_wal("./my-data/wal")?;
//!     db.save_all_mvcc(None)?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! | Crate | Responsibility |
//! |-------|-----------------|
//! | `chimera-core` | values, rows, columns, config, the unified error type, MVCC vocabulary (CLOG, snapshot) |
//! | `chimera-storage` | per-table append-only version chains, visibility-filtered scans, vacuum |
//! | `chimera-concurrency` | transaction manager: txid issuance, active-set tracking, commit/rollback |
//! | `chimera-durability` | WAL record framing, segment files, two-pass crash recovery |
//! | `chimera-index` | HNSW approximate nearest-neighbor index with GraphRAG metadata and edges |
//! | `chimera-engine` | table/index registry and the save/load/WAL/recovery orchestrator |
//! | `chimera-executor` | column resolution, the auto-commit statement envelope, auto-vacuum |
//!
//! Only [`ChimeraDb`] and the re-exports below are meant for external use;
//! each crate above can also be depended on directly for finer control.

mod db;

pub use chimera_core::{
    AutoVacuumConfig, Column, ColumnType, DatabaseConfig, DurabilityMode, Error, HnswDefaults, Result, Row, RowId,
    TxId, Value,
};
pub use chimera_durability::RecoveryOutcome;
pub use chimera_engine::Database;
pub use chimera_executor::{ColumnResolver, Executor, Resolved, TrackedTable};
pub use chimera_index::{Edge, HnswConfig, HnswIndex, NodeMetadata, SearchHit};

pub use db::{ChimeraDb, QueryResult, Statement};
