//! Shared types for ChimeraDB: values, rows, columns, configuration, and errors.
//!
//! This crate has no knowledge of storage, transactions, or the WAL — it is
//! the vocabulary every other crate in the workspace speaks.

pub mod config;
pub mod error;
pub mod txn;
pub mod value;

pub use config::{AutoVacuumConfig, DatabaseConfig, DurabilityMode, HnswDefaults};
pub use error::{Error, Result};
pub use txn::{Clog, Snapshot, TxStatus};
pub use value::{Column, ColumnType, Row, Value};

/// Transaction identifier. Monotonically increasing, never reused within a process
/// lifetime (and never across restarts, since the counter is repositioned on recovery).
pub type TxId = u64;

/// Row identifier, unique within a single table.
pub type RowId = u64;

/// Log sequence number assigned by the WAL writer.
pub type Lsn = u64;
