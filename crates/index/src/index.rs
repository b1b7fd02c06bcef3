//! Public HNSW index facade: vector search plus GraphRAG metadata and edges
//! behind a single coarse lock, per the concurrency contract (a search never
//! observes a partially-linked node).

use std::collections::BTreeMap;

use chimera_core::{Error, Result};
use parking_lot::RwLock;

use crate::graph::{HnswConfig, HnswGraph, InternalId};
use crate::metadata::{Edge, MetadataStore, NodeMetadata};

pub type ExternalId = u64;

/// One search hit: external id, the stored point, and its cosine distance
/// from the query (non-negative, ascending order).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub external_id: ExternalId,
    pub point: Vec<f32>,
    pub distance: f32,
}

struct Inner {
    config: HnswConfig,
    dimension: Option<usize>,
    points: BTreeMap<InternalId, Vec<f32>>,
    graph: HnswGraph,
    metadata: MetadataStore,
    external_to_internal: BTreeMap<ExternalId, InternalId>,
    internal_to_external: BTreeMap<InternalId, ExternalId>,
    next_internal_id: InternalId,
    next_external_id: ExternalId,
}

pub struct HnswIndex {
    inner: RwLock<Inner>,
}

impl HnswIndex {
    pub fn new(config: HnswConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                config: config.clone(),
                dimension: None,
                points: BTreeMap::new(),
                graph: HnswGraph::new(config),
                metadata: MetadataStore::new(),
                external_to_internal: BTreeMap::new(),
                internal_to_external: BTreeMap::new(),
                next_internal_id: 0,
                next_external_id: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, external_id: ExternalId) -> bool {
        self.inner.read().external_to_internal.contains_key(&external_id)
    }

    /// Fetch the stored point for an external id, if it exists.
    pub fn get(&self, external_id: ExternalId) -> Option<Vec<f32>> {
        let inner = self.inner.read();
        let internal = *inner.external_to_internal.get(&external_id)?;
        inner.points.get(&internal).cloned()
    }

    /// Fetch the GraphRAG metadata attached to an external id, if it exists.
    pub fn get_metadata(&self, external_id: ExternalId) -> Option<NodeMetadata> {
        let inner = self.inner.read();
        let internal = *inner.external_to_internal.get(&external_id)?;
        inner.metadata.get(internal).cloned()
    }

    /// The embedding dimension fixed by this index's first insert, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.inner.read().dimension
    }

    pub fn insert(&self, point: Vec<f32>, external_id: Option<ExternalId>) -> Result<ExternalId> {
        self.insert_with_metadata(point, external_id, NodeMetadata::default())
    }

    pub fn insert_with_metadata(
        &self,
        point: Vec<f32>,
        external_id: Option<ExternalId>,
        metadata: NodeMetadata,
    ) -> Result<ExternalId> {
        let mut inner = self.inner.write();

        match inner.dimension {
            Some(d) if d != point.len() => {
                return Err(Error::DimensionMismatch { expected: d, actual: point.len() })
            }
            None => inner.dimension = Some(point.len()),
            _ => {}
        }

        let ext_id = match external_id {
            Some(id) => {
                if inner.external_to_internal.contains_key(&id) {
                    return Err(Error::DuplicateExternalId(id));
                }
                inner.next_external_id = inner.next_external_id.max(id + 1);
                id
            }
            None => {
                let id = inner.next_external_id;
                inner.next_external_id += 1;
                id
            }
        };

        let internal_id = inner.next_internal_id;
        inner.next_internal_id += 1;

        inner.points.insert(internal_id, point);
        inner.external_to_internal.insert(ext_id, internal_id);
        inner.internal_to_external.insert(internal_id, ext_id);
        inner.metadata.set(internal_id, metadata);

        let points = inner.points.clone();
        inner.graph.insert(internal_id, &points);

        Ok(ext_id)
    }

    pub fn update_metadata(&self, external_id: ExternalId, metadata: NodeMetadata) -> Result<()> {
        let mut inner = self.inner.write();
        let internal_id = *inner
            .external_to_internal
            .get(&external_id)
            .ok_or(Error::ExternalIdNotFound(external_id))?;
        inner.metadata.set(internal_id, metadata);
        Ok(())
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let inner = self.inner.read();
        self.check_dimension(&inner, query)?;
        Ok(inner
            .graph
            .search(query, k, &inner.points)
            .into_iter()
            .filter_map(|(internal_id, distance)| {
                let ext = *inner.internal_to_external.get(&internal_id)?;
                let point = inner.points.get(&internal_id)?.clone();
                Some(SearchHit { external_id: ext, point, distance })
            })
            .collect())
    }

    pub fn search_by_type(&self, query: &[f32], k: usize, node_type: &str) -> Result<Vec<SearchHit>> {
        let inner = self.inner.read();
        self.check_dimension(&inner, query)?;
        let allowed: std::collections::BTreeSet<InternalId> =
            inner.metadata.nodes_by_type(node_type).into_iter().collect();
        // Over-fetch since the ANN search has no type awareness, then filter.
        let over_fetch = (k * 4).max(k).max(allowed.len().min(inner.points.len()));
        let hits: Vec<SearchHit> = inner
            .graph
            .search(query, over_fetch, &inner.points)
            .into_iter()
            .filter(|(id, _)| allowed.contains(id))
            .take(k)
            .filter_map(|(internal_id, distance)| {
                let ext = *inner.internal_to_external.get(&internal_id)?;
                let point = inner.points.get(&internal_id)?.clone();
                Some(SearchHit { external_id: ext, point, distance })
            })
            .collect();
        Ok(hits)
    }

    /// Union of the ANN result set and a BFS traversal from each hit.
    pub fn search_then_traverse(
        &self,
        query: &[f32],
        k: usize,
        label: Option<&str>,
        depth: usize,
    ) -> Result<Vec<ExternalId>> {
        let inner = self.inner.read();
        self.check_dimension(&inner, query)?;
        let mut seen = std::collections::BTreeSet::new();
        for (internal_id, _) in inner.graph.search(query, k, &inner.points) {
            for reached in inner.metadata.traverse(internal_id, depth, label) {
                seen.insert(reached);
            }
        }
        Ok(seen
            .into_iter()
            .filter_map(|id| inner.internal_to_external.get(&id).copied())
            .collect())
    }

    pub fn get_nodes_by_type(&self, node_type: &str) -> Vec<ExternalId> {
        let inner = self.inner.read();
        inner
            .metadata
            .nodes_by_type(node_type)
            .into_iter()
            .filter_map(|id| inner.internal_to_external.get(&id).copied())
            .collect()
    }

    pub fn get_nodes_by_file_path(&self, file_path: &str) -> Vec<ExternalId> {
        let inner = self.inner.read();
        inner
            .metadata
            .nodes_by_file_path(file_path)
            .into_iter()
            .filter_map(|id| inner.internal_to_external.get(&id).copied())
            .collect()
    }

    pub fn add_edge(&self, src: ExternalId, dst: ExternalId, label: &str, weight: f64) -> Result<()> {
        let mut inner = self.inner.write();
        let src_internal = self.internal_id(&inner, src)?;
        let dst_internal = self.internal_id(&inner, dst)?;
        inner.metadata.add_edge(src_internal, dst_internal, label, weight);
        Ok(())
    }

    pub fn remove_edge(&self, src: ExternalId, dst: ExternalId, label: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        let src_internal = self.internal_id(&inner, src)?;
        let dst_internal = self.internal_id(&inner, dst)?;
        Ok(inner.metadata.remove_edge(src_internal, dst_internal, label))
    }

    pub fn get_edges(&self, id: ExternalId, label: Option<&str>) -> Result<Vec<(ExternalId, String, f64)>> {
        let inner = self.inner.read();
        let internal = self.internal_id(&inner, id)?;
        let mut edges = inner.metadata.outgoing(internal, label);
        edges.extend(inner.metadata.incoming(internal, label));
        Ok(self.translate_edges(&inner, edges))
    }

    pub fn get_outgoing(&self, id: ExternalId, label: Option<&str>) -> Result<Vec<(ExternalId, String, f64)>> {
        let inner = self.inner.read();
        let internal = self.internal_id(&inner, id)?;
        Ok(self.translate_edges(&inner, inner.metadata.outgoing(internal, label)))
    }

    pub fn get_incoming(&self, id: ExternalId, label: Option<&str>) -> Result<Vec<(ExternalId, String, f64)>> {
        let inner = self.inner.read();
        let internal = self.internal_id(&inner, id)?;
        Ok(self.translate_edges(&inner, inner.metadata.incoming(internal, label)))
    }

    pub fn get_neighbors(&self, id: ExternalId, label: Option<&str>) -> Result<Vec<ExternalId>> {
        let inner = self.inner.read();
        let internal = self.internal_id(&inner, id)?;
        Ok(inner
            .metadata
            .neighbors(internal, label)
            .into_iter()
            .filter_map(|id| inner.internal_to_external.get(&id).copied())
            .collect())
    }

    pub fn traverse(&self, start: ExternalId, depth: usize, label: Option<&str>) -> Result<Vec<ExternalId>> {
        let inner = self.inner.read();
        let internal = self.internal_id(&inner, start)?;
        Ok(inner
            .metadata
            .traverse(internal, depth, label)
            .into_iter()
            .filter_map(|id| inner.internal_to_external.get(&id).copied())
            .collect())
    }

    /// Drop the graph and reassign levels from scratch over the current
    /// point set, in internal-id order. Used when a table load has raw
    /// vectors but no separately persisted HNSW file.
    pub fn rebuild(&self) {
        let mut inner = self.inner.write();
        let points = inner.points.clone();
        inner.graph.rebuild(&points);
    }

    pub(crate) fn snapshot(&self) -> crate::persist::IndexSnapshot {
        let inner = self.inner.read();
        crate::persist::IndexSnapshot {
            config: inner.config.clone(),
            points: inner.points.clone(),
            internal_to_external: inner.internal_to_external.clone(),
            next_external_id: inner.next_external_id,
            metadata: inner.metadata.raw_metadata().clone(),
            outgoing_edges: inner.metadata.raw_outgoing().clone(),
        }
    }

    /// Rebuild an index from a loaded snapshot, re-deriving internal ids and
    /// the HNSW graph deterministically from the point set (see persist.rs
    /// module docs for why the graph itself is not persisted node-by-node).
    pub(crate) fn from_snapshot(snapshot: crate::persist::IndexSnapshot) -> Self {
        let mut points = BTreeMap::new();
        let mut external_to_internal = BTreeMap::new();
        for (internal_id, ext_id) in &snapshot.internal_to_external {
            external_to_internal.insert(*ext_id, *internal_id);
        }
        for (internal_id, point) in snapshot.points {
            points.insert(internal_id, point);
        }
        let next_internal_id = points.keys().next_back().map(|id| id + 1).unwrap_or(0);
        let mut graph = HnswGraph::new(snapshot.config.clone());
        graph.rebuild(&points);

        Self {
            inner: RwLock::new(Inner {
                config: snapshot.config,
                dimension: points.values().next().map(|p| p.len()),
                points,
                graph,
                metadata: MetadataStore::from_parts(snapshot.metadata, snapshot.outgoing_edges),
                external_to_internal,
                internal_to_external: snapshot.internal_to_external,
                next_internal_id,
                next_external_id: snapshot.next_external_id,
            }),
        }
    }

    fn internal_id(&self, inner: &Inner, external_id: ExternalId) -> Result<InternalId> {
        inner
            .external_to_internal
            .get(&external_id)
            .copied()
            .ok_or(Error::ExternalIdNotFound(external_id))
    }

    fn check_dimension(&self, inner: &Inner, query: &[f32]) -> Result<()> {
        if let Some(d) = inner.dimension {
            if d != query.len() {
                return Err(Error::DimensionMismatch { expected: d, actual: query.len() });
            }
        }
        Ok(())
    }

    fn translate_edges(&self, inner: &Inner, edges: Vec<Edge>) -> Vec<(ExternalId, String, f64)> {
        edges
            .into_iter()
            .filter_map(|e| {
                inner
                    .internal_to_external
                    .get(&e.dst)
                    .map(|&ext| (ext, e.label, e.weight))
            })
            .collect()
    }
}
