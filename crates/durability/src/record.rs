//! WAL record framing.
//!
//! On the wire: `{u32 total_len, u8 type, u64 tx_id, u64 lsn, u64 row_id,
//! u32 name_len, name_bytes, u32 data_len, data_bytes, u32 checksum_crc32}`,
//! all integers little-endian. `total_len` counts every byte from `type`
//! through `checksum` inclusive (i.e. the record's length minus the 4 bytes
//! of `total_len` itself). The checksum covers every field from `type`
//! through `data_bytes`.

use chimera_core::{Error, Result, RowId, TxId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalRecordType {
    BeginTx = 1,
    CommitTx = 2,
    RollbackTx = 3,
    InsertRow = 10,
    DeleteRow = 11,
    UpdateRow = 12,
    Checkpoint = 20,
}

impl WalRecordType {
    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => WalRecordType::BeginTx,
            2 => WalRecordType::CommitTx,
            3 => WalRecordType::RollbackTx,
            10 => WalRecordType::InsertRow,
            11 => WalRecordType::DeleteRow,
            12 => WalRecordType::UpdateRow,
            20 => WalRecordType::Checkpoint,
            other => return Err(Error::InvalidRecordType(other)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct WalRecord {
    pub record_type: WalRecordType,
    pub tx_id: TxId,
    pub lsn: u64,
    pub row_id: RowId,
    pub table_name: String,
    pub data: Vec<u8>,
}

impl WalRecord {
    pub fn new(
        record_type: WalRecordType,
        tx_id: TxId,
        lsn: u64,
        row_id: RowId,
        table_name: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            record_type,
            tx_id,
            lsn,
            row_id,
            table_name: table_name.into(),
            data,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(32 + self.table_name.len() + self.data.len());
        body.push(self.record_type as u8);
        body.extend_from_slice(&self.tx_id.to_le_bytes());
        body.extend_from_slice(&self.lsn.to_le_bytes());
        body.extend_from_slice(&self.row_id.to_le_bytes());
        body.extend_from_slice(&(self.table_name.len() as u32).to_le_bytes());
        body.extend_from_slice(self.table_name.as_bytes());
        body.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        body.extend_from_slice(&self.data);

        let checksum = crc32fast::hash(&body);
        let total_len = (body.len() + 4) as u32;

        let mut out = Vec::with_capacity(4 + body.len() + 4);
        out.extend_from_slice(&total_len.to_le_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Parse one record from the front of `buf`. Returns the record and the
    /// number of bytes consumed.
    pub fn from_bytes(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 4 {
            return Err(Error::BufferTooSmall { needed: 4, had: buf.len() });
        }
        let total_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        if buf.len() < 4 + total_len {
            return Err(Error::BufferTooSmall { needed: 4 + total_len, had: buf.len() });
        }
        if total_len < 4 {
            return Err(Error::BufferTooSmall { needed: 4, had: total_len });
        }

        let body_len = total_len - 4;
        let body = &buf[4..4 + body_len];
        let checksum_bytes = &buf[4 + body_len..4 + body_len + 4];
        let expected_checksum = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
        let computed_checksum = crc32fast::hash(body);
        if expected_checksum != computed_checksum {
            return Err(Error::ChecksumMismatch {
                expected: expected_checksum,
                computed: computed_checksum,
            });
        }

        let mut offset = 0usize;
        let record_type = WalRecordType::from_tag(read_u8(body, &mut offset)?)?;
        let tx_id = read_u64(body, &mut offset)?;
        let lsn = read_u64(body, &mut offset)?;
        let row_id = read_u64(body, &mut offset)?;
        let name_len = read_u32(body, &mut offset)? as usize;
        let table_name = String::from_utf8(read_slice(body, &mut offset, name_len)?.to_vec())
            .map_err(|e| Error::Corruption(e.to_string()))?;
        let data_len = read_u32(body, &mut offset)? as usize;
        let data = read_slice(body, &mut offset, data_len)?.to_vec();

        Ok((
            WalRecord {
                record_type,
                tx_id,
                lsn,
                row_id,
                table_name,
                data,
            },
            4 + total_len,
        ))
    }
}

fn read_u8(buf: &[u8], offset: &mut usize) -> Result<u8> {
    let b = *buf
        .get(*offset)
        .ok_or_else(|| Error::BufferTooSmall { needed: *offset + 1, had: buf.len() })?;
    *offset += 1;
    Ok(b)
}

fn read_slice<'a>(buf: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    if *offset + len > buf.len() {
        return Err(Error::BufferTooSmall { needed: *offset + len, had: buf.len() });
    }
    let s = &buf[*offset..*offset + len];
    *offset += len;
    Ok(s)
}

fn read_u32(buf: &[u8], offset: &mut usize) -> Result<u32> {
    Ok(u32::from_le_bytes(read_slice(buf, offset, 4)?.try_into().unwrap()))
}

fn read_u64(buf: &[u8], offset: &mut usize) -> Result<u64> {
    Ok(u64::from_le_bytes(read_slice(buf, offset, 8)?.try_into().unwrap()))
}

/// Encode the `[old_size | old_bytes | new_bytes]` payload used by UPDATE records.
pub fn encode_update_payload(old_bytes: &[u8], new_bytes: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + old_bytes.len() + new_bytes.len());
    buf.extend_from_slice(&(old_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(old_bytes);
    buf.extend_from_slice(new_bytes);
    buf
}

/// Split an UPDATE record's data payload back into `(old_bytes, new_bytes)`.
pub fn decode_update_payload(data: &[u8]) -> Result<(&[u8], &[u8])> {
    if data.len() < 4 {
        return Err(Error::BufferTooSmall { needed: 4, had: data.len() });
    }
    let old_size = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    if data.len() < 4 + old_size {
        return Err(Error::BufferTooSmall { needed: 4 + old_size, had: data.len() });
    }
    let old_bytes = &data[4..4 + old_size];
    let new_bytes = &data[4 + old_size..];
    Ok((old_bytes, new_bytes))
}
