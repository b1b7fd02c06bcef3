//! Binary HNSW file format: a versioned header followed by one record per
//! node (point, metadata, outgoing edges). Neighbor lists are not read back
//! on load — `HnswGraph::rebuild` re-derives an identical graph from the
//! point set and config deterministically, so persisting them would only
//! duplicate bytes already implied by the points and the insertion order.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chimera_core::{Error, Result};
use tracing::info;

use crate::graph::{HnswConfig, InternalId};
use crate::index::{ExternalId, HnswIndex};
use crate::metadata::{Edge, NodeMetadata};

const HNSW_MAGIC: &[u8; 4] = b"HNSW";
const HNSW_VERSION: u32 = 1;

pub(crate) struct IndexSnapshot {
    pub config: HnswConfig,
    pub points: BTreeMap<InternalId, Vec<f32>>,
    pub internal_to_external: BTreeMap<InternalId, ExternalId>,
    pub next_external_id: ExternalId,
    pub metadata: BTreeMap<InternalId, NodeMetadata>,
    pub outgoing_edges: BTreeMap<InternalId, Vec<Edge>>,
}

pub fn save(index: &HnswIndex, path: impl AsRef<Path>) -> Result<()> {
    let snapshot = index.snapshot();
    let buf = encode(&snapshot);
    let path = path.as_ref();
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &buf)?;
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), nodes = snapshot.points.len(), "HNSW index saved");
    Ok(())
}

pub fn load(path: impl AsRef<Path>) -> Result<Option<HnswIndex>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let buf = fs::read(path)?;
    let snapshot = decode(&buf)?;
    info!(path = %path.display(), nodes = snapshot.points.len(), "HNSW index loaded");
    Ok(Some(HnswIndex::from_snapshot(snapshot)))
}

fn encode(snapshot: &IndexSnapshot) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(HNSW_MAGIC);
    out.extend_from_slice(&HNSW_VERSION.to_le_bytes());
    out.extend_from_slice(&(snapshot.config.m as u32).to_le_bytes());
    out.extend_from_slice(&(snapshot.config.ef_construction as u32).to_le_bytes());
    out.extend_from_slice(&(snapshot.config.ef_search as u32).to_le_bytes());
    out.extend_from_slice(&snapshot.next_external_id.to_le_bytes());
    out.extend_from_slice(&(snapshot.points.len() as u64).to_le_bytes());

    for (&internal_id, point) in &snapshot.points {
        let external_id = snapshot.internal_to_external.get(&internal_id).copied().unwrap_or(internal_id);
        out.extend_from_slice(&internal_id.to_le_bytes());
        out.extend_from_slice(&external_id.to_le_bytes());
        out.extend_from_slice(&(point.len() as u32).to_le_bytes());
        for v in point {
            out.extend_from_slice(&v.to_le_bytes());
        }
        write_metadata(&mut out, snapshot.metadata.get(&internal_id));
        write_edges(&mut out, snapshot.outgoing_edges.get(&internal_id));
    }
    out
}

fn write_metadata(out: &mut Vec<u8>, meta: Option<&NodeMetadata>) {
    let empty = NodeMetadata::default();
    let meta = meta.unwrap_or(&empty);
    write_optional_string(out, meta.node_type.as_deref());
    write_optional_string(out, meta.file_path.as_deref());
    out.extend_from_slice(&(meta.attributes.len() as u32).to_le_bytes());
    for (k, v) in &meta.attributes {
        write_string(out, k);
        write_string(out, v);
    }
}

fn write_edges(out: &mut Vec<u8>, edges: Option<&Vec<Edge>>) {
    let empty = Vec::new();
    let edges = edges.unwrap_or(&empty);
    out.extend_from_slice(&(edges.len() as u32).to_le_bytes());
    for edge in edges {
        out.extend_from_slice(&edge.dst.to_le_bytes());
        write_string(out, &edge.label);
        out.extend_from_slice(&edge.weight.to_le_bytes());
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_optional_string(out: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => {
            out.push(1);
            write_string(out, s);
        }
        None => out.push(0),
    }
}

fn decode(buf: &[u8]) -> Result<IndexSnapshot> {
    let mut r = ByteReader { buf, offset: 0 };
    let magic = r.take(4)?;
    if magic != HNSW_MAGIC {
        return Err(Error::Corruption("bad HNSW file magic".into()));
    }
    let version = r.u32()?;
    if version != HNSW_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let m = r.u32()? as usize;
    let ef_construction = r.u32()? as usize;
    let ef_search = r.u32()? as usize;
    let next_external_id = r.u64()?;
    let node_count = r.u64()?;

    let config = HnswConfig { m, ef_construction, ef_search, ml: 1.0 / (m as f64).ln() };
    let mut points = BTreeMap::new();
    let mut internal_to_external = BTreeMap::new();
    let mut metadata = BTreeMap::new();
    let mut outgoing_edges = BTreeMap::new();

    for _ in 0..node_count {
        let internal_id = r.u64()?;
        let external_id = r.u64()?;
        let dim = r.u32()? as usize;
        let mut point = Vec::with_capacity(dim);
        for _ in 0..dim {
            point.push(r.f32()?);
        }
        let meta = read_metadata(&mut r)?;
        let edges = read_edges(&mut r)?;

        points.insert(internal_id, point);
        internal_to_external.insert(internal_id, external_id);
        metadata.insert(internal_id, meta);
        outgoing_edges.insert(internal_id, edges);
    }

    Ok(IndexSnapshot { config, points, internal_to_external, next_external_id, metadata, outgoing_edges })
}

fn read_metadata(r: &mut ByteReader) -> Result<NodeMetadata> {
    let node_type = read_optional_string(r)?;
    let file_path = read_optional_string(r)?;
    let attr_count = r.u32()?;
    let mut attributes = BTreeMap::new();
    for _ in 0..attr_count {
        let k = read_string(r)?;
        let v = read_string(r)?;
        attributes.insert(k, v);
    }
    Ok(NodeMetadata { node_type, file_path, attributes })
}

fn read_edges(r: &mut ByteReader) -> Result<Vec<Edge>> {
    let count = r.u32()?;
    let mut edges = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let dst = r.u64()?;
        let label = read_string(r)?;
        let weight = r.f64()?;
        edges.push(Edge { dst, label, weight });
    }
    Ok(edges)
}

fn read_string(r: &mut ByteReader) -> Result<String> {
    let len = r.u32()? as usize;
    let bytes = r.take(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::Corruption(e.to_string()))
}

fn read_optional_string(r: &mut ByteReader) -> Result<Option<String>> {
    match r.u8()? {
        0 => Ok(None),
        _ => Ok(Some(read_string(r)?)),
    }
}

struct ByteReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.offset + len > self.buf.len() {
            return Err(Error::BufferTooSmall { needed: self.offset + len, had: self.buf.len() });
        }
        let s = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::NodeMetadata;

    #[test]
    fn round_trip_preserves_external_ids_points_and_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors_2_embedding.hnsw");

        let idx = HnswIndex::new(HnswConfig { m: 16, ef_construction: 200, ef_search: 200, ml: 1.0 / (16f64).ln() });
        idx.insert_with_metadata(
            vec![1.0, 2.0],
            Some(100),
            NodeMetadata { node_type: Some("doc".into()), file_path: Some("a.rs".into()), attributes: Default::default() },
        )
        .unwrap();
        idx.insert(vec![3.0, 4.0], Some(200)).unwrap();
        idx.add_edge(100, 200, "references", 0.5).unwrap();

        save(&idx, &path).unwrap();
        let loaded = load(&path).unwrap().unwrap();

        assert!(loaded.contains(100));
        assert!(loaded.contains(200));
        assert_eq!(loaded.get_outgoing(100, None).unwrap(), vec![(200, "references".to_string(), 0.5)]);
        let hits = loaded.search(&[1.0, 2.0], 1).unwrap();
        assert_eq!(hits[0].external_id, 100);
        assert_eq!(hits[0].point, vec![1.0, 2.0]);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path().join("nope.hnsw")).unwrap().is_none());
    }

    #[test]
    fn next_external_id_sequence_survives_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.hnsw");
        let idx = HnswIndex::new(HnswConfig { m: 16, ef_construction: 200, ef_search: 200, ml: 1.0 / (16f64).ln() });
        idx.insert(vec![1.0], None).unwrap();
        idx.insert(vec![2.0], None).unwrap();
        save(&idx, &path).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        let next = loaded.insert(vec![3.0], None).unwrap();
        assert_eq!(next, 2);
    }
}
