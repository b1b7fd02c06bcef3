//! Construction-time configuration surface.
//!
//! Parsing a config file (TOML, CLI flags, …) into this struct is outside the
//! core's scope; the core only ever consumes the resolved [`DatabaseConfig`].

/// Controls how aggressively the WAL writer fsyncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// Never fsync explicitly; rely on the OS to flush eventually. Fastest,
    /// least durable — suitable for scratch/ephemeral databases.
    None,
    /// Fsync periodically (every N commits or T milliseconds, whichever first).
    Standard,
    /// Fsync after every committed auto-commit transaction's COMMIT record.
    /// Required by the spec's durability contract; the default.
    Always,
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Always
    }
}

/// Auto-vacuum policy, consulted by the executor façade after every commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoVacuumConfig {
    pub enabled: bool,
    /// Run vacuum once this many transactions have committed since the last run.
    pub txn_interval: u64,
    /// Run vacuum if any table's longest version chain exceeds this length.
    pub max_chain_length: usize,
}

impl Default for AutoVacuumConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            txn_interval: 1000,
            max_chain_length: 50,
        }
    }
}

/// Default HNSW parameters applied when an embedding column's index is created
/// without explicit overrides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HnswDefaults {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswDefaults {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 200,
        }
    }
}

/// Top-level configuration for opening a database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub durability: DurabilityMode,
    pub auto_vacuum: AutoVacuumConfig,
    pub hnsw_defaults: HnswDefaults,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            durability: DurabilityMode::default(),
            auto_vacuum: AutoVacuumConfig::default(),
            hnsw_defaults: HnswDefaults::default(),
        }
    }
}
