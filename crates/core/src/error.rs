//! Unified error type for ChimeraDB.
//!
//! Every fallible operation in the workspace returns [`Result<T>`]. Variants are
//! grouped by kind (not-found, duplicate, invalid-argument, corruption, I/O) so
//! callers can classify failures without matching on every variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("row not found: {0}")]
    RowNotFound(u64),

    #[error("external id not found: {0}")]
    ExternalIdNotFound(u64),

    #[error("duplicate external id: {0}")]
    DuplicateExternalId(u64),

    #[error("WAL already enabled")]
    WalAlreadyEnabled,

    #[error("invalid qualified column name: {0}")]
    InvalidQualifiedName(String),

    #[error("ambiguous column reference: {0}")]
    AmbiguousColumn(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("WAL checksum mismatch: expected {expected:#x}, computed {computed:#x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("WAL record buffer too short: needed {needed} bytes, had {had}")]
    BufferTooSmall { needed: usize, had: usize },

    #[error("invalid WAL record type: {0}")]
    InvalidRecordType(u8),

    #[error("unsupported persistence format version: {0}")]
    UnsupportedVersion(u32),

    #[error("persisted data is corrupted: {0}")]
    Corruption(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::TableNotFound(_)
                | Error::ColumnNotFound(_)
                | Error::RowNotFound(_)
                | Error::ExternalIdNotFound(_)
        )
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicateExternalId(_) | Error::WalAlreadyEnabled)
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Error::InvalidQualifiedName(_) | Error::AmbiguousColumn(_) | Error::DimensionMismatch { .. }
        )
    }

    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::ChecksumMismatch { .. }
                | Error::BufferTooSmall { .. }
                | Error::InvalidRecordType(_)
                | Error::UnsupportedVersion(_)
                | Error::Corruption(_)
        )
    }

    /// Corruption encountered while scanning the WAL is recoverable (the record is
    /// skipped and the scan continues); corruption encountered loading a table or
    /// HNSW file is fatal for that file.
    pub fn is_retryable(&self) -> bool {
        self.is_corruption()
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
