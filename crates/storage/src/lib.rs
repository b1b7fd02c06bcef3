//! Per-table version-chain storage: MVCC row storage, vacuum, and the v2/v3
//! on-disk table formats.

pub mod persist;
pub mod table;

pub use table::{RowVersion, Table};
