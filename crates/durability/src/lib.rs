//! Write-ahead log: framed records, sequence-numbered segment files, and
//! two-pass crash recovery.

pub mod reader;
pub mod record;
pub mod recovery;
pub mod writer;

pub use record::{WalRecord, WalRecordType};
pub use recovery::{RecoveryOutcome, TableLookup};
pub use writer::{DurabilityMode, WalWriter};
