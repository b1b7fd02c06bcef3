//! The HNSW graph itself: layered neighbor lists, level assignment, and the
//! search/insert procedures. Does not own embeddings or external ids — those
//! live in [`crate::index::HnswIndex`], which passes a point map in.

use chimera_core::HnswDefaults;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use crate::distance::similarity_score;

pub type InternalId = u64;

#[derive(Debug, Clone)]
pub struct HnswConfig {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub ml: f64,
}

impl From<HnswDefaults> for HnswConfig {
    fn from(d: HnswDefaults) -> Self {
        Self {
            m: d.m,
            ef_construction: d.ef_construction,
            ef_search: d.ef_search,
            ml: 1.0 / (d.m as f64).ln(),
        }
    }
}

impl HnswConfig {
    fn max_connections_layer0(&self) -> usize {
        self.m * 2
    }

    fn max_connections(&self) -> usize {
        self.m
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HnswNode {
    pub neighbors: Vec<BTreeSet<InternalId>>,
    pub max_layer: usize,
}

impl HnswNode {
    fn new(max_layer: usize) -> Self {
        Self {
            neighbors: (0..=max_layer).map(|_| BTreeSet::new()).collect(),
            max_layer,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ScoredId {
    score: f32,
    id: InternalId,
}

impl Eq for ScoredId {}

impl PartialOrd for ScoredId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Graph-only HNSW structure, generic over an external point map keyed by
/// internal id. Deterministic: `BTreeMap`/`BTreeSet` everywhere, level
/// assignment seeded with a fixed splitmix64 sequence.
pub(crate) struct HnswGraph {
    config: HnswConfig,
    nodes: BTreeMap<InternalId, HnswNode>,
    entry_point: Option<InternalId>,
    max_level: usize,
    rng_seed: u64,
    rng_counter: u64,
}

impl HnswGraph {
    pub(crate) fn new(config: HnswConfig) -> Self {
        Self {
            config,
            nodes: BTreeMap::new(),
            entry_point: None,
            max_level: 0,
            rng_seed: 0x5EED_u64,
            rng_counter: 0,
        }
    }

    pub(crate) fn contains(&self, id: InternalId) -> bool {
        self.nodes.contains_key(&id)
    }

    fn splitmix64(&self, mut x: u64) -> u64 {
        x = x.wrapping_add(0x9e3779b97f4a7c15);
        x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
        x ^ (x >> 31)
    }

    fn assign_level(&mut self) -> usize {
        self.rng_counter += 1;
        let hash = self.splitmix64(self.rng_seed.wrapping_add(self.rng_counter));
        let uniform = ((hash as f64) / (u64::MAX as f64)).max(1e-15);
        (-uniform.ln() * self.config.ml) as usize
    }

    fn search_layer(
        &self,
        query: &[f32],
        entry_id: InternalId,
        ef: usize,
        layer: usize,
        points: &BTreeMap<InternalId, Vec<f32>>,
    ) -> Vec<ScoredId> {
        let entry_point = match points.get(&entry_id) {
            Some(p) => p,
            None => return Vec::new(),
        };
        let entry_score = similarity_score(query, entry_point);

        let mut visited = BTreeSet::new();
        visited.insert(entry_id);

        let mut candidates = BinaryHeap::new();
        candidates.push(ScoredId { score: entry_score, id: entry_id });

        let mut results: BinaryHeap<Reverse<ScoredId>> = BinaryHeap::new();
        results.push(Reverse(ScoredId { score: entry_score, id: entry_id }));

        while let Some(nearest) = candidates.pop() {
            let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
            if nearest.score < worst && results.len() >= ef {
                break;
            }

            if let Some(node) = self.nodes.get(&nearest.id) {
                if layer < node.neighbors.len() {
                    for &neighbor_id in &node.neighbors[layer] {
                        if visited.contains(&neighbor_id) {
                            continue;
                        }
                        visited.insert(neighbor_id);

                        if let Some(neighbor_point) = points.get(&neighbor_id) {
                            let score = similarity_score(query, neighbor_point);
                            let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
                            if results.len() < ef || score > worst {
                                candidates.push(ScoredId { score, id: neighbor_id });
                                results.push(Reverse(ScoredId { score, id: neighbor_id }));
                                if results.len() > ef {
                                    results.pop();
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut out: Vec<ScoredId> = results.into_iter().map(|r| r.0).collect();
        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }

    fn greedy_search_to_layer(
        &self,
        query: &[f32],
        entry_id: InternalId,
        from_layer: usize,
        to_layer: usize,
        points: &BTreeMap<InternalId, Vec<f32>>,
    ) -> InternalId {
        let mut current = entry_id;
        for layer in (to_layer..=from_layer).rev() {
            let mut improved = true;
            while improved {
                improved = false;
                let current_point = match points.get(&current) {
                    Some(p) => p,
                    None => break,
                };
                let current_score = similarity_score(query, current_point);
                let mut best_score = current_score;
                let mut best_id = current;

                if let Some(node) = self.nodes.get(&current) {
                    if layer < node.neighbors.len() {
                        for &neighbor_id in &node.neighbors[layer] {
                            if let Some(neighbor_point) = points.get(&neighbor_id) {
                                let score = similarity_score(query, neighbor_point);
                                if score > best_score || (score == best_score && neighbor_id < best_id) {
                                    best_score = score;
                                    best_id = neighbor_id;
                                }
                            }
                        }
                    }
                }
                if best_id != current {
                    current = best_id;
                    improved = true;
                }
            }
        }
        current
    }

    fn select_neighbors(&self, candidates: &[ScoredId], max_connections: usize) -> Vec<InternalId> {
        candidates.iter().take(max_connections).map(|s| s.id).collect()
    }

    fn prune_neighbors_for(
        &mut self,
        id: InternalId,
        layer: usize,
        max_connections: usize,
        points: &BTreeMap<InternalId, Vec<f32>>,
    ) {
        let point = match points.get(&id) {
            Some(p) => p.clone(),
            None => return,
        };
        let neighbors: Vec<InternalId> = match self.nodes.get(&id) {
            Some(node) if layer < node.neighbors.len() => node.neighbors[layer].iter().copied().collect(),
            _ => return,
        };

        let mut scored: Vec<ScoredId> = neighbors
            .iter()
            .filter_map(|&nid| points.get(&nid).map(|p| ScoredId { score: similarity_score(&point, p), id: nid }))
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let keep: BTreeSet<InternalId> = scored.into_iter().take(max_connections).map(|s| s.id).collect();
        if let Some(node) = self.nodes.get_mut(&id) {
            if layer < node.neighbors.len() {
                node.neighbors[layer] = keep;
            }
        }
    }

    /// Insert `id`'s point (already present in `points`) into the graph.
    pub(crate) fn insert(&mut self, id: InternalId, points: &BTreeMap<InternalId, Vec<f32>>) {
        let level = self.assign_level();
        self.nodes.insert(id, HnswNode::new(level));

        let entry_id = match self.entry_point {
            Some(e) => e,
            None => {
                self.entry_point = Some(id);
                self.max_level = level;
                return;
            }
        };

        let point = points.get(&id).expect("point must be inserted before graph insert").clone();

        let mut current_entry = entry_id;
        if self.max_level > level {
            current_entry = self.greedy_search_to_layer(&point, entry_id, self.max_level, level + 1, points);
        }

        let start_layer = level.min(self.max_level);
        for layer in (0..=start_layer).rev() {
            let candidates = self.search_layer(&point, current_entry, self.config.ef_construction, layer, points);
            let selected = self.select_neighbors(&candidates, self.config.m);

            if let Some(new_node) = self.nodes.get_mut(&id) {
                if layer < new_node.neighbors.len() {
                    for &neighbor_id in &selected {
                        new_node.neighbors[layer].insert(neighbor_id);
                    }
                }
            }

            let max_conn = if layer == 0 {
                self.config.max_connections_layer0()
            } else {
                self.config.max_connections()
            };

            for &neighbor_id in &selected {
                let needs_prune = if let Some(neighbor_node) = self.nodes.get_mut(&neighbor_id) {
                    if layer < neighbor_node.neighbors.len() {
                        neighbor_node.neighbors[layer].insert(id);
                        neighbor_node.neighbors[layer].len() > max_conn
                    } else {
                        false
                    }
                } else {
                    false
                };
                if needs_prune {
                    self.prune_neighbors_for(neighbor_id, layer, max_conn, points);
                }
            }

            if let Some(closest) = candidates.first() {
                current_entry = closest.id;
            }
        }

        if level > self.max_level {
            self.entry_point = Some(id);
            self.max_level = level;
        }
    }

    /// Nearest `k` internal ids by ascending distance, tie-broken by id.
    pub(crate) fn search(
        &self,
        query: &[f32],
        k: usize,
        points: &BTreeMap<InternalId, Vec<f32>>,
    ) -> Vec<(InternalId, f32)> {
        if k == 0 || self.nodes.is_empty() {
            return Vec::new();
        }
        let entry_id = match self.entry_point {
            Some(id) => id,
            None => return Vec::new(),
        };

        let mut current_entry = entry_id;
        if self.max_level > 0 {
            current_entry = self.greedy_search_to_layer(query, entry_id, self.max_level, 1, points);
        }

        let ef = self.config.ef_search.max(k);
        self.search_layer(query, current_entry, ef, 0, points)
            .into_iter()
            .take(k)
            .map(|s| (s.id, -s.score)) // convert similarity score back to distance
            .collect()
    }

    /// Deterministically rebuild the entire graph from a fresh point map, in
    /// id order, resetting the level-assignment counter. Used after loading
    /// a table/vector snapshot that has no separately persisted graph.
    pub(crate) fn rebuild(&mut self, points: &BTreeMap<InternalId, Vec<f32>>) {
        self.nodes.clear();
        self.entry_point = None;
        self.max_level = 0;
        self.rng_counter = 0;
        for &id in points.keys() {
            self.insert(id, points);
        }
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HnswConfig {
        HnswConfig::from(HnswDefaults::default())
    }

    #[test]
    fn search_returns_nearest_first_and_finds_self() {
        let mut graph = HnswGraph::new(config());
        let mut points = BTreeMap::new();
        for i in 0..20u64 {
            let v = vec![i as f32, (i * 2) as f32];
            points.insert(i, v);
            graph.insert(i, &points);
        }
        let results = graph.search(&[5.0, 10.0], 3, &points);
        assert_eq!(results[0].0, 5);
        assert!(results.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn single_node_graph_returns_itself() {
        let mut graph = HnswGraph::new(config());
        let mut points = BTreeMap::new();
        points.insert(0u64, vec![1.0, 0.0]);
        graph.insert(0, &points);
        let results = graph.search(&[1.0, 0.0], 5, &points);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 0);
    }

    #[test]
    fn empty_graph_search_is_empty() {
        let graph = HnswGraph::new(config());
        let points = BTreeMap::new();
        assert!(graph.search(&[1.0], 3, &points).is_empty());
    }

    #[test]
    fn rebuild_is_deterministic() {
        let mut points = BTreeMap::new();
        for i in 0..10u64 {
            points.insert(i, vec![i as f32]);
        }
        let mut g1 = HnswGraph::new(config());
        g1.rebuild(&points);
        let mut g2 = HnswGraph::new(config());
        g2.rebuild(&points);
        assert_eq!(g1.search(&[4.0], 3, &points), g2.search(&[4.0], 3, &points));
    }
}
