//! Shared MVCC vocabulary: commit status, the commit log, and snapshots.
//!
//! These types carry no transaction-lifecycle logic (that belongs to
//! `chimera-concurrency`'s `TransactionManager`) — they are the shapes that
//! both the concurrency crate and the storage crate's visibility checks need,
//! kept here to avoid a dependency cycle between the two.

use crate::TxId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::path::Path;

/// Terminal (or non-terminal) status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    InProgress,
    Committed,
    Aborted,
}

impl TxStatus {
    fn tag(self) -> u8 {
        match self {
            TxStatus::InProgress => 0,
            TxStatus::Committed => 1,
            TxStatus::Aborted => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(TxStatus::InProgress),
            1 => Some(TxStatus::Committed),
            2 => Some(TxStatus::Aborted),
            _ => None,
        }
    }
}

const CLOG_MAGIC: &[u8; 4] = b"CLOG";
const CLOG_VERSION: u32 = 1;

/// `txid -> status` map. A missing entry is treated as in-progress — this is
/// the conservative choice for crash-time safety (an unknown id is never
/// considered committed).
#[derive(Debug, Default)]
pub struct Clog {
    inner: RwLock<FxHashMap<TxId, TxStatus>>,
}

impl Clog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, txid: TxId, status: TxStatus) {
        self.inner.write().insert(txid, status);
    }

    pub fn get(&self, txid: TxId) -> TxStatus {
        self.inner
            .read()
            .get(&txid)
            .copied()
            .unwrap_or(TxStatus::InProgress)
    }

    pub fn is_committed(&self, txid: TxId) -> bool {
        self.get(txid) == TxStatus::Committed
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let guard = self.inner.read();
        let mut buf = Vec::with_capacity(12 + guard.len() * 9);
        buf.extend_from_slice(CLOG_MAGIC);
        buf.extend_from_slice(&CLOG_VERSION.to_le_bytes());
        buf.extend_from_slice(&(guard.len() as u64).to_le_bytes());
        for (txid, status) in guard.iter() {
            buf.extend_from_slice(&txid.to_le_bytes());
            buf.push(status.tag());
        }
        std::fs::write(path, buf)
    }

    /// Replace this CLOG's contents with whatever is stored at `path` (empty
    /// if the file doesn't exist). Used by database load to restore commit
    /// status in place, since the `Arc<Clog>` is shared with the transaction
    /// manager and can't simply be swapped for a freshly loaded one.
    pub fn restore_from(&self, path: &Path) -> io::Result<()> {
        let loaded = Self::load(path)?;
        *self.inner.write() = loaded.inner.into_inner();
        Ok(())
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut file = std::fs::File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        if buf.len() < 16 || &buf[0..4] != CLOG_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad CLOG magic"));
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != CLOG_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported CLOG version {version}"),
            ));
        }
        let count = u64::from_le_bytes(buf[8..16].try_into().unwrap()) as usize;
        let mut map = FxHashMap::default();
        let mut offset = 16;
        for _ in 0..count {
            if offset + 9 > buf.len() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated CLOG"));
            }
            let txid = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
            let tag = buf[offset + 8];
            let status = TxStatus::from_tag(tag)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad CLOG status tag"))?;
            map.insert(txid, status);
            offset += 9;
        }
        Ok(Self {
            inner: RwLock::new(map),
        })
    }
}

/// A point-in-time view used for repeatable-read visibility checks.
///
/// `xmin` is the lowest still-active txid at snapshot time, `xmax` is the
/// next txid that will be assigned (i.e. one past the highest committed id
/// this snapshot can see), and `active_set` is the full set of txids that
/// were in progress when the snapshot was taken.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub xmin: TxId,
    pub xmax: TxId,
    pub active_set: HashSet<TxId>,
}

impl Snapshot {
    /// A version created by `creator` is visible to this snapshot iff the
    /// creator committed before the snapshot was taken (and wasn't itself
    /// still active at that point).
    fn created_visible(&self, creator: TxId, clog: &Clog) -> bool {
        clog.is_committed(creator) && creator < self.xmax && !self.active_set.contains(&creator)
    }

    /// Apply the spec's visibility rule for one version:
    /// `xmin` committed-and-visible, AND (`xmax` absent, uncommitted, or
    /// itself not yet visible to this snapshot).
    pub fn version_visible(&self, xmin: TxId, xmax: Option<TxId>, clog: &Clog) -> bool {
        if !self.created_visible(xmin, clog) {
            return false;
        }
        match xmax {
            None => true,
            Some(deleter) => !self.created_visible(deleter, clog),
        }
    }
}
