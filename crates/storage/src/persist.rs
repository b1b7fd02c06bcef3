//! Byte-exact v2 (no-MVCC) and v3 (MVCC) table file formats.
//!
//! v2: `{magic, version=2, name_len, name, col_count, [col_name_len, name,
//! type_tag], row_count, [row_id, col_count, [col_name_len, name, type_tag,
//! value_bytes]]}`.
//!
//! v3: the v2 header with `version=3`, then `checkpoint_txid`, then per-row
//! `{row_id, version_count, [xmin, xmax_or_sentinel, row_bytes_as_in_v2]}`.

use crate::table::{RowVersion, Table};
use chimera_core::{Column, ColumnType, Error, Result, Row, TxId, Value};
use std::io::Write;
use std::path::Path;

const TABLE_MAGIC: &[u8; 4] = b"ZVTB";
const XMAX_SENTINEL: u64 = u64::MAX;

// ---------------------------------------------------------------------------
// Low-level value codec, shared by v2 and v3 row encoding.
// ---------------------------------------------------------------------------

fn write_col_type(buf: &mut Vec<u8>, t: &ColumnType) {
    buf.push(t.type_tag());
    if let ColumnType::Embedding { dim } = t {
        buf.extend_from_slice(&dim.unwrap_or(0).to_le_bytes());
    }
}

fn read_col_type(buf: &[u8], offset: &mut usize) -> Result<ColumnType> {
    let tag = read_u8(buf, offset)?;
    match tag {
        1 => Ok(ColumnType::Int),
        2 => Ok(ColumnType::Float),
        3 => Ok(ColumnType::Bool),
        4 => Ok(ColumnType::Text),
        5 => {
            let raw = read_u32(buf, offset)?;
            Ok(ColumnType::Embedding {
                dim: if raw == 0 { None } else { Some(raw) },
            })
        }
        other => Err(Error::Corruption(format!("unknown column type tag {other}"))),
    }
}

fn write_value(buf: &mut Vec<u8>, v: &Value) {
    buf.push(v.type_tag());
    match v {
        Value::Null => {}
        Value::Int(i) => buf.extend_from_slice(&i.to_le_bytes()),
        Value::Float(f) => buf.extend_from_slice(&f.to_le_bytes()),
        Value::Bool(b) => buf.push(*b as u8),
        Value::Text(s) => {
            buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Embedding(e) => {
            buf.extend_from_slice(&(e.len() as u32).to_le_bytes());
            for f in e {
                buf.extend_from_slice(&f.to_le_bytes());
            }
        }
    }
}

fn read_value(buf: &[u8], offset: &mut usize) -> Result<Value> {
    let tag = read_u8(buf, offset)?;
    Ok(match tag {
        0 => Value::Null,
        1 => Value::Int(read_i64(buf, offset)?),
        2 => Value::Float(read_f64(buf, offset)?),
        3 => Value::Bool(read_u8(buf, offset)? != 0),
        4 => {
            let len = read_u32(buf, offset)? as usize;
            let s = read_bytes(buf, offset, len)?;
            Value::Text(String::from_utf8(s.to_vec()).map_err(|e| Error::Corruption(e.to_string()))?)
        }
        5 => {
            let dim = read_u32(buf, offset)? as usize;
            let mut v = Vec::with_capacity(dim);
            for _ in 0..dim {
                v.push(read_f32(buf, offset)?);
            }
            Value::Embedding(v)
        }
        other => return Err(Error::Corruption(format!("unknown value type tag {other}"))),
    })
}

/// Encode a single row the same way row data is encoded inside a table file.
/// Used by the WAL to serialize INSERT/UPDATE payloads.
pub fn encode_row(row: &Row) -> Vec<u8> {
    let mut buf = Vec::new();
    write_row(&mut buf, row);
    buf
}

/// Decode a row previously produced by [`encode_row`].
pub fn decode_row(buf: &[u8]) -> Result<Row> {
    let mut offset = 0usize;
    read_row(buf, &mut offset)
}

fn write_row(buf: &mut Vec<u8>, row: &Row) {
    buf.extend_from_slice(&(row.len() as u32).to_le_bytes());
    for (name, value) in row.iter() {
        buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
        buf.extend_from_slice(name.as_bytes());
        write_value(buf, value);
    }
}

fn read_row(buf: &[u8], offset: &mut usize) -> Result<Row> {
    let col_count = read_u32(buf, offset)?;
    let mut row = Row::new();
    for _ in 0..col_count {
        let name_len = read_u32(buf, offset)? as usize;
        let name = String::from_utf8(read_bytes(buf, offset, name_len)?.to_vec())
            .map_err(|e| Error::Corruption(e.to_string()))?;
        let value = read_value(buf, offset)?;
        row.insert(name, value);
    }
    Ok(row)
}

fn read_u8(buf: &[u8], offset: &mut usize) -> Result<u8> {
    let b = *buf
        .get(*offset)
        .ok_or_else(|| Error::BufferTooSmall { needed: *offset + 1, had: buf.len() })?;
    *offset += 1;
    Ok(b)
}

fn read_bytes<'a>(buf: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    if *offset + len > buf.len() {
        return Err(Error::BufferTooSmall { needed: *offset + len, had: buf.len() });
    }
    let slice = &buf[*offset..*offset + len];
    *offset += len;
    Ok(slice)
}

fn read_u32(buf: &[u8], offset: &mut usize) -> Result<u32> {
    Ok(u32::from_le_bytes(read_bytes(buf, offset, 4)?.try_into().unwrap()))
}

fn read_u64(buf: &[u8], offset: &mut usize) -> Result<u64> {
    Ok(u64::from_le_bytes(read_bytes(buf, offset, 8)?.try_into().unwrap()))
}

fn read_i64(buf: &[u8], offset: &mut usize) -> Result<i64> {
    Ok(i64::from_le_bytes(read_bytes(buf, offset, 8)?.try_into().unwrap()))
}

fn read_f64(buf: &[u8], offset: &mut usize) -> Result<f64> {
    Ok(f64::from_le_bytes(read_bytes(buf, offset, 8)?.try_into().unwrap()))
}

fn read_f32(buf: &[u8], offset: &mut usize) -> Result<f32> {
    Ok(f32::from_le_bytes(read_bytes(buf, offset, 4)?.try_into().unwrap()))
}

fn write_header(buf: &mut Vec<u8>, version: u32, table: &Table) {
    buf.extend_from_slice(TABLE_MAGIC);
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(&(table.name.len() as u32).to_le_bytes());
    buf.extend_from_slice(table.name.as_bytes());
    buf.extend_from_slice(&(table.columns.len() as u32).to_le_bytes());
    for col in &table.columns {
        buf.extend_from_slice(&(col.name.len() as u32).to_le_bytes());
        buf.extend_from_slice(col.name.as_bytes());
        write_col_type(buf, &col.col_type);
    }
}

struct Header {
    version: u32,
    name: String,
    columns: Vec<Column>,
}

fn read_header(buf: &[u8], offset: &mut usize) -> Result<Header> {
    if buf.len() < 8 || &buf[0..4] != TABLE_MAGIC {
        return Err(Error::Corruption("bad table file magic".to_string()));
    }
    *offset = 4;
    let version = read_u32(buf, offset)?;
    if version != 2 && version != 3 {
        return Err(Error::UnsupportedVersion(version));
    }
    let name_len = read_u32(buf, offset)? as usize;
    let name = String::from_utf8(read_bytes(buf, offset, name_len)?.to_vec())
        .map_err(|e| Error::Corruption(e.to_string()))?;
    let col_count = read_u32(buf, offset)?;
    let mut columns = Vec::with_capacity(col_count as usize);
    for _ in 0..col_count {
        let cn_len = read_u32(buf, offset)? as usize;
        let cn = String::from_utf8(read_bytes(buf, offset, cn_len)?.to_vec())
            .map_err(|e| Error::Corruption(e.to_string()))?;
        let col_type = read_col_type(buf, offset)?;
        columns.push(Column::new(cn, col_type));
    }
    Ok(Header {
        version,
        name,
        columns,
    })
}

// ---------------------------------------------------------------------------
// v2: newest-visible-row-only snapshot. No MVCC history, no CLOG reference.
// ---------------------------------------------------------------------------

/// Save only each row's current live version (rows with a set `xmax` on
/// their head, i.e. logically deleted, are omitted). Loses version history.
pub fn save_v2(table: &Table, path: &Path) -> Result<()> {
    let mut buf = Vec::new();
    write_header(&mut buf, 2, table);
    let rows: Vec<(u64, Row)> = table
        .chains_snapshot()
        .into_iter()
        .filter_map(|(id, chain)| {
            chain
                .first()
                .filter(|head| head.xmax.is_none())
                .map(|head| (id, head.data.clone()))
        })
        .collect();
    buf.extend_from_slice(&(rows.len() as u32).to_le_bytes());
    for (id, row) in &rows {
        buf.extend_from_slice(&id.to_le_bytes());
        write_row(&mut buf, row);
    }
    write_atomic(path, &buf)
}

/// Full MVCC chains plus a checkpoint txid (the `next_tx_id` at save time,
/// used by recovery to know how far the WAL needs to be replayed past).
pub fn save_v3(table: &Table, checkpoint_txid: TxId, path: &Path) -> Result<()> {
    let mut buf = Vec::new();
    write_header(&mut buf, 3, table);
    buf.extend_from_slice(&checkpoint_txid.to_le_bytes());
    let chains = table.chains_snapshot();
    buf.extend_from_slice(&(chains.len() as u32).to_le_bytes());
    for (id, chain) in &chains {
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&(chain.len() as u32).to_le_bytes());
        for version in chain {
            buf.extend_from_slice(&version.xmin.to_le_bytes());
            buf.extend_from_slice(&version.xmax.unwrap_or(XMAX_SENTINEL).to_le_bytes());
            write_row(&mut buf, &version.data);
        }
    }
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, buf: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(buf)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// The table constructed from a loaded file, plus the checkpoint txid if the
/// file was v3 (`None` for v2, which carries no checkpoint).
pub struct LoadedTable {
    pub table: Table,
    pub checkpoint_txid: Option<TxId>,
}

/// Probe the file's version byte and load it. v3 files carry full chains;
/// v2 files are reconstructed as single-version chains with `xmin = 0`
/// (pre-MVCC data is treated as already committed by the bootstrap transaction).
pub fn load(path: &Path) -> Result<Option<LoadedTable>> {
    if !path.exists() {
        return Ok(None);
    }
    let buf = std::fs::read(path)?;
    let mut offset = 0usize;
    let header = read_header(&buf, &mut offset)?;
    let table = Table::new(header.name, header.columns);

    match header.version {
        2 => {
            let row_count = read_u32(&buf, &mut offset)?;
            for _ in 0..row_count {
                let id = read_u64(&buf, &mut offset)?;
                let row = read_row(&buf, &mut offset)?;
                table.insert_if_absent(id, row, 0);
            }
            Ok(Some(LoadedTable {
                table,
                checkpoint_txid: None,
            }))
        }
        3 => {
            let checkpoint_txid = read_u64(&buf, &mut offset)?;
            let row_count = read_u32(&buf, &mut offset)?;
            let mut rows = Vec::with_capacity(row_count as usize);
            for _ in 0..row_count {
                let id = read_u64(&buf, &mut offset)?;
                let version_count = read_u32(&buf, &mut offset)?;
                let mut chain = Vec::with_capacity(version_count as usize);
                for _ in 0..version_count {
                    let xmin = read_u64(&buf, &mut offset)?;
                    let xmax_raw = read_u64(&buf, &mut offset)?;
                    let xmax = if xmax_raw == XMAX_SENTINEL { None } else { Some(xmax_raw) };
                    let data = read_row(&buf, &mut offset)?;
                    chain.push(RowVersion { data, xmin, xmax });
                }
                rows.push((id, chain));
            }
            table.install_chains(rows);
            Ok(Some(LoadedTable {
                table,
                checkpoint_txid: Some(checkpoint_txid),
            }))
        }
        other => Err(Error::UnsupportedVersion(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_core::TxStatus;

    fn sample_table() -> Table {
        let t = Table::new(
            "users",
            vec![
                Column::new("id", ColumnType::Int),
                Column::new("name", ColumnType::Text),
            ],
        );
        let mut row = Row::new();
        row.insert("id".into(), Value::Int(1));
        row.insert("name".into(), Value::Text("Alice".into()));
        t.insert(row, 1);
        t
    }

    #[test]
    fn v2_roundtrip_preserves_live_row() {
        let t = sample_table();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.zvdb");
        save_v2(&t, &path).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.table.name, "users");
        assert_eq!(loaded.table.row_count(), 1);
        assert!(loaded.checkpoint_txid.is_none());
    }

    #[test]
    fn v2_skips_deleted_rows() {
        let t = sample_table();
        t.delete(1, 2);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.zvdb");
        save_v2(&t, &path).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.table.row_count(), 0);
    }

    #[test]
    fn v3_roundtrip_preserves_full_chain_and_checkpoint() {
        let t = sample_table();
        let mut updated = Row::new();
        updated.insert("id".into(), Value::Int(1));
        updated.insert("name".into(), Value::Text("Alicia".into()));
        t.update(1, updated, 2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.zvdb");
        save_v3(&t, 5, &path).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.checkpoint_txid, Some(5));
        let chain = &loaded.table.chains_snapshot()[0].1;
        assert_eq!(chain.len(), 2);

        let clog = chimera_core::Clog::new();
        clog.set(1, TxStatus::Committed);
        clog.set(2, TxStatus::Committed);
        let snap = chimera_core::Snapshot {
            xmin: 0,
            xmax: 3,
            active_set: Default::default(),
        };
        assert_eq!(
            loaded.table.get(1, &snap, &clog).unwrap()["name"],
            Value::Text("Alicia".into())
        );
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("nope.zvdb")).unwrap().is_none());
    }

    #[test]
    fn embedding_values_roundtrip() {
        let t = Table::new(
            "vecs",
            vec![Column::new("v", ColumnType::Embedding { dim: Some(3) })],
        );
        let mut row = Row::new();
        row.insert("v".into(), Value::Embedding(vec![1.0, 2.0, 3.0]));
        t.insert(row, 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vecs.zvdb");
        save_v2(&t, &path).unwrap();
        let loaded = load(&path).unwrap().unwrap();
        let chain = &loaded.table.chains_snapshot()[0].1;
        assert_eq!(chain[0].data["v"].as_embedding(), Some([1.0f32, 2.0, 3.0].as_slice()));
    }
}
