//! Classic MVCC transaction manager: a monotonic txid counter, an active-set
//! of in-progress transactions, and CLOG-backed commit/rollback.
//!
//! Unlike an optimistic-concurrency design, there is no read/write-set
//! validation at commit time here — a transaction's writes are visible the
//! moment CLOG marks it committed, and it is table storage (append-only
//! version chains) rather than the manager that arbitrates concurrent
//! mutation of a single row.

use chimera_core::{Clog, Snapshot, TxId, TxStatus};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TxId,
    pub snapshot: Snapshot,
    pub state: TxState,
}

thread_local! {
    static CURRENT_TX: RefCell<Option<TxId>> = RefCell::new(None);
}

pub struct TransactionManager {
    clog: Arc<Clog>,
    next_tx_id: AtomicU64,
    active: Mutex<BTreeSet<TxId>>,
    transactions: DashMap<TxId, Transaction>,
}

impl TransactionManager {
    pub fn new(clog: Arc<Clog>) -> Self {
        Self::starting_at(clog, 1)
    }

    /// Construct with the counter pre-positioned, as recovery does:
    /// `max(max_seen_in_WAL, persisted_checkpoint_txid) + 1`.
    pub fn starting_at(clog: Arc<Clog>, start: TxId) -> Self {
        Self {
            clog,
            next_tx_id: AtomicU64::new(start.max(1)),
            active: Mutex::new(BTreeSet::new()),
            transactions: DashMap::new(),
        }
    }

    pub fn clog(&self) -> &Arc<Clog> {
        &self.clog
    }

    pub fn next_tx_id_peek(&self) -> TxId {
        self.next_tx_id.load(Ordering::SeqCst)
    }

    /// Advance the counter past `max_tx_id` without ever decreasing it.
    /// Called by recovery after replaying the WAL.
    pub fn advance_past(&self, max_tx_id: TxId) {
        let target = max_tx_id + 1;
        let _ = self
            .next_tx_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                if cur >= target {
                    None
                } else {
                    Some(target)
                }
            });
    }

    /// Issue the next txid, snapshot the active set, and record it as active.
    pub fn begin(&self) -> Transaction {
        let mut active = self.active.lock();
        let id = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
        active.insert(id);
        let snapshot = Snapshot {
            xmin: *active.iter().next().unwrap(),
            xmax: id,
            active_set: active.iter().copied().collect(),
        };
        drop(active);

        self.clog.set(id, TxStatus::InProgress);
        let txn = Transaction {
            id,
            snapshot,
            state: TxState::Active,
        };
        self.transactions.insert(id, txn.clone());
        CURRENT_TX.with(|c| *c.borrow_mut() = Some(id));
        debug!(txid = id, "transaction begin");
        txn
    }

    pub fn commit(&self, txid: TxId) {
        self.clog.set(txid, TxStatus::Committed);
        self.active.lock().remove(&txid);
        if let Some(mut entry) = self.transactions.get_mut(&txid) {
            entry.state = TxState::Committed;
        }
        self.clear_current_if(txid);
        debug!(txid, "transaction commit");
    }

    pub fn rollback(&self, txid: TxId) {
        self.clog.set(txid, TxStatus::Aborted);
        self.active.lock().remove(&txid);
        if let Some(mut entry) = self.transactions.get_mut(&txid) {
            entry.state = TxState::Aborted;
        }
        self.clear_current_if(txid);
        debug!(txid, "transaction rollback");
    }

    fn clear_current_if(&self, txid: TxId) {
        CURRENT_TX.with(|c| {
            if *c.borrow() == Some(txid) {
                *c.borrow_mut() = None;
            }
        });
    }

    /// The transaction bound to the calling thread by the most recent `begin()`
    /// on that thread, if any is still active.
    pub fn current(&self) -> Option<Transaction> {
        CURRENT_TX.with(|c| *c.borrow()).and_then(|id| self.transactions.get(&id).map(|t| t.clone()))
    }

    /// Lowest txid of a still-in-progress transaction, or `next_tx_id` if none
    /// are active — the conservative upper bound vacuum uses as its horizon.
    pub fn min_active_txid(&self) -> TxId {
        let active = self.active.lock();
        active
            .iter()
            .next()
            .copied()
            .unwrap_or_else(|| self.next_tx_id.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TransactionManager {
        TransactionManager::new(Arc::new(Clog::new()))
    }

    #[test]
    fn begin_assigns_monotonic_ids() {
        let mgr = manager();
        let t1 = mgr.begin();
        mgr.commit(t1.id);
        let t2 = mgr.begin();
        assert!(t2.id > t1.id);
    }

    #[test]
    fn commit_marks_clog_and_clears_active() {
        let mgr = manager();
        let t1 = mgr.begin();
        assert_eq!(mgr.clog().get(t1.id), TxStatus::InProgress);
        mgr.commit(t1.id);
        assert_eq!(mgr.clog().get(t1.id), TxStatus::Committed);
        assert_eq!(mgr.min_active_txid(), mgr.next_tx_id_peek());
    }

    #[test]
    fn rollback_marks_aborted() {
        let mgr = manager();
        let t1 = mgr.begin();
        mgr.rollback(t1.id);
        assert_eq!(mgr.clog().get(t1.id), TxStatus::Aborted);
    }

    #[test]
    fn current_binding_follows_begin_and_clears_on_commit() {
        let mgr = manager();
        assert!(mgr.current().is_none());
        let t1 = mgr.begin();
        assert_eq!(mgr.current().unwrap().id, t1.id);
        mgr.commit(t1.id);
        assert!(mgr.current().is_none());
    }

    #[test]
    fn min_active_txid_reflects_oldest_open_transaction() {
        let mgr = manager();
        let t1 = mgr.begin();
        let t2 = mgr.begin();
        assert_eq!(mgr.min_active_txid(), t1.id);
        mgr.commit(t1.id);
        assert_eq!(mgr.min_active_txid(), t2.id);
    }

    #[test]
    fn advance_past_never_decreases_counter() {
        let mgr = manager();
        mgr.advance_past(100);
        assert_eq!(mgr.next_tx_id_peek(), 101);
        mgr.advance_past(5);
        assert_eq!(mgr.next_tx_id_peek(), 101);
    }
}
