//! Table: an ordered column schema plus a `row_id -> version chain` map.
//!
//! Chains are stored newest-first. Mutation always operates on the physical
//! head of a chain (the `update`/`delete` entry points assume the caller
//! already holds the table's current transaction and is not trying to
//! mutate a version some other snapshot is still reading — readers only
//! ever observe whichever version `Snapshot::version_visible` selects).

use chimera_core::{Clog, Column, Row, RowId, Snapshot, TxId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// One entry in a row's version chain.
#[derive(Debug, Clone)]
pub struct RowVersion {
    pub data: Row,
    pub xmin: TxId,
    pub xmax: Option<TxId>,
}

impl RowVersion {
    fn new(data: Row, xmin: TxId) -> Self {
        Self {
            data,
            xmin,
            xmax: None,
        }
    }
}

pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    next_id: AtomicU64,
    /// `row_id -> chain`, chain ordered newest-first (index 0 is the head).
    chains: Mutex<BTreeMap<RowId, Vec<RowVersion>>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            next_id: AtomicU64::new(1),
            chains: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn next_id_peek(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Bump `next_id` to at least `min`, never decreasing it. Used during WAL
    /// replay and table-file load, where row ids arrive out of the table's own
    /// allocation order.
    pub fn ensure_next_id_at_least(&self, min: u64) {
        let _ = self
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                if cur >= min {
                    None
                } else {
                    Some(min)
                }
            });
    }

    /// Insert a new row, assigning the next row id from the table's counter.
    pub fn insert(&self, data: Row, xmin: TxId) -> RowId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.insert_with_id(id, data, xmin);
        id
    }

    /// Insert at an explicit row id (WAL replay / v3 load), bumping `next_id`
    /// so future `insert` calls never collide with it.
    pub fn insert_with_id(&self, row_id: RowId, data: Row, xmin: TxId) {
        self.ensure_next_id_at_least(row_id + 1);
        let mut chains = self.chains.lock();
        chains.insert(row_id, vec![RowVersion::new(data, xmin)]);
    }

    /// Idempotent insert used by WAL replay: no-op if the row id already exists.
    pub fn insert_if_absent(&self, row_id: RowId, data: Row, xmin: TxId) {
        self.ensure_next_id_at_least(row_id + 1);
        let mut chains = self.chains.lock();
        chains
            .entry(row_id)
            .or_insert_with(|| vec![RowVersion::new(data, xmin)]);
    }

    /// Set `xmax` on the current head and prepend a new head version.
    /// Returns `false` if the row does not exist.
    pub fn update(&self, row_id: RowId, new_data: Row, xid: TxId) -> bool {
        let mut chains = self.chains.lock();
        match chains.get_mut(&row_id) {
            Some(chain) => {
                if let Some(head) = chain.first_mut() {
                    head.xmax = Some(xid);
                }
                chain.insert(0, RowVersion::new(new_data, xid));
                true
            }
            None => false,
        }
    }

    /// Idempotent replay variant: removes any existing row at `row_id` and
    /// inserts the replayed state fresh, matching the spec's "UPDATE during
    /// replay on absent row inserts the new state" rule.
    pub fn replay_update(&self, row_id: RowId, new_data: Row, xid: TxId) {
        self.ensure_next_id_at_least(row_id + 1);
        let mut chains = self.chains.lock();
        chains.insert(row_id, vec![RowVersion::new(new_data, xid)]);
    }

    /// Set `xmax` on the visible head; no new version. Returns `false` if the
    /// row does not exist.
    pub fn delete(&self, row_id: RowId, xid: TxId) -> bool {
        let mut chains = self.chains.lock();
        match chains.get_mut(&row_id).and_then(|c| c.first_mut()) {
            Some(head) => {
                head.xmax = Some(xid);
                true
            }
            None => false,
        }
    }

    /// Idempotent replay variant: no-op if the row does not exist.
    pub fn replay_delete(&self, row_id: RowId, xid: TxId) {
        let mut chains = self.chains.lock();
        if let Some(head) = chains.get_mut(&row_id).and_then(|c| c.first_mut()) {
            head.xmax = Some(xid);
        }
    }

    /// Walk the chain newest-first, returning the first version visible to `snapshot`.
    pub fn get(&self, row_id: RowId, snapshot: &Snapshot, clog: &Clog) -> Option<Row> {
        let chains = self.chains.lock();
        chains.get(&row_id).and_then(|chain| {
            chain
                .iter()
                .find(|v| snapshot.version_visible(v.xmin, v.xmax, clog))
                .map(|v| v.data.clone())
        })
    }

    /// Scan every row id, returning the visible version (if any) for each, in
    /// row-id order.
    pub fn scan(&self, snapshot: &Snapshot, clog: &Clog) -> Vec<(RowId, Row)> {
        let chains = self.chains.lock();
        chains
            .iter()
            .filter_map(|(id, chain)| {
                chain
                    .iter()
                    .find(|v| snapshot.version_visible(v.xmin, v.xmax, clog))
                    .map(|v| (*id, v.data.clone()))
            })
            .collect()
    }

    /// Remove versions whose `xmax` is committed and below `min_visible_txid`;
    /// rows whose entire chain becomes empty are dropped. Returns the number
    /// of versions removed.
    pub fn vacuum(&self, min_visible_txid: TxId, clog: &Clog) -> usize {
        let mut chains = self.chains.lock();
        let mut removed = 0usize;
        chains.retain(|_, chain| {
            let before = chain.len();
            chain.retain(|v| {
                !v.xmax
                    .map(|x| clog.is_committed(x) && x < min_visible_txid)
                    .unwrap_or(false)
            });
            removed += before - chain.len();
            !chain.is_empty()
        });
        removed
    }

    /// Length of the longest version chain, consulted by auto-vacuum.
    pub fn longest_chain_len(&self) -> usize {
        self.chains
            .lock()
            .values()
            .map(|c| c.len())
            .max()
            .unwrap_or(0)
    }

    pub fn row_count(&self) -> usize {
        self.chains.lock().len()
    }

    /// Full chain snapshot for v3 persistence, newest-first per row.
    pub fn chains_snapshot(&self) -> Vec<(RowId, Vec<RowVersion>)> {
        self.chains
            .lock()
            .iter()
            .map(|(id, chain)| (*id, chain.clone()))
            .collect()
    }

    /// Install version chains wholesale, as done when loading a v3 table file.
    pub fn install_chains(&self, rows: Vec<(RowId, Vec<RowVersion>)>) {
        let mut chains = self.chains.lock();
        let mut max_id = 0u64;
        for (id, chain) in rows {
            max_id = max_id.max(id);
            chains.insert(id, chain);
        }
        drop(chains);
        self.ensure_next_id_at_least(max_id + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_core::{ColumnType, Value};
    use std::collections::HashSet;

    fn row(name: &str) -> Row {
        let mut r = Row::new();
        r.insert("name".to_string(), Value::Text(name.to_string()));
        r
    }

    fn snap(xmax: TxId) -> Snapshot {
        Snapshot {
            xmin: 0,
            xmax,
            active_set: HashSet::new(),
        }
    }

    #[test]
    fn insert_then_get_visible() {
        let t = Table::new("users", vec![Column::new("name", ColumnType::Text)]);
        let clog = Clog::new();
        clog.set(1, chimera_core::TxStatus::Committed);
        let id = t.insert(row("Alice"), 1);
        assert_eq!(t.get(id, &snap(2), &clog).unwrap()["name"], Value::Text("Alice".into()));
    }

    #[test]
    fn update_preserves_old_version_for_old_snapshot() {
        let t = Table::new("users", vec![Column::new("name", ColumnType::Text)]);
        let clog = Clog::new();
        clog.set(1, chimera_core::TxStatus::Committed);
        clog.set(2, chimera_core::TxStatus::Committed);
        let id = t.insert(row("Alice"), 1);
        t.update(id, row("Alicia"), 2);

        let old_snapshot = snap(2); // xmax=2: txid 2's writes not yet visible
        let new_snapshot = snap(3);
        assert_eq!(t.get(id, &old_snapshot, &clog).unwrap()["name"], Value::Text("Alice".into()));
        assert_eq!(t.get(id, &new_snapshot, &clog).unwrap()["name"], Value::Text("Alicia".into()));
    }

    #[test]
    fn delete_hides_row_from_later_snapshots() {
        let t = Table::new("users", vec![Column::new("name", ColumnType::Text)]);
        let clog = Clog::new();
        clog.set(1, chimera_core::TxStatus::Committed);
        clog.set(2, chimera_core::TxStatus::Committed);
        let id = t.insert(row("Alice"), 1);
        t.delete(id, 2);

        assert!(t.get(id, &snap(2), &clog).is_some());
        assert!(t.get(id, &snap(3), &clog).is_none());
    }

    #[test]
    fn next_id_never_collides_after_replay() {
        let t = Table::new("users", vec![Column::new("name", ColumnType::Text)]);
        t.insert_if_absent(100, row("x"), 1);
        let id = t.insert(row("y"), 2);
        assert!(id > 100);
    }

    #[test]
    fn vacuum_removes_dead_versions_but_keeps_live_head() {
        let t = Table::new("users", vec![Column::new("name", ColumnType::Text)]);
        let clog = Clog::new();
        clog.set(1, chimera_core::TxStatus::Committed);
        clog.set(2, chimera_core::TxStatus::Committed);
        let id = t.insert(row("Alice"), 1);
        t.update(id, row("Alicia"), 2);
        assert_eq!(t.chains_snapshot()[0].1.len(), 2);

        let removed = t.vacuum(3, &clog);
        assert_eq!(removed, 1);
        assert_eq!(t.chains_snapshot()[0].1.len(), 1);
    }

    #[test]
    fn replay_update_on_absent_row_inserts_fresh() {
        let t = Table::new("users", vec![Column::new("name", ColumnType::Text)]);
        t.replay_update(7, row("Zed"), 1);
        assert_eq!(t.row_count(), 1);
    }

    #[test]
    fn replay_delete_on_absent_row_is_noop() {
        let t = Table::new("users", vec![Column::new("name", ColumnType::Text)]);
        t.replay_delete(7, 1);
        assert_eq!(t.row_count(), 0);
    }
}
