//! Transaction manager: txid issuance, the active-transaction set, and the
//! auto-commit façade's thread-local "current transaction" binding.

pub mod manager;

pub use manager::{Transaction, TransactionManager, TxState};
