//! Native HNSW (Hierarchical Navigable Small World) vector index
//! (spec component E).
//!
//! Hand-rolled rather than wrapping a vendored ANN library: a layered
//! proximity graph built by greedy descent from the entry point down to
//! layer 0, where a beam search collects the `ef_search` best candidates.
//! Deletes are tombstones; [`HnswIndex::compact`] drops tombstoned nodes and
//! relinks their neighbours so search quality doesn't degrade under churn.
//! [`HnswIndex::rebuild`] reconstructs the whole graph from a fresh set of
//! (key, vector) pairs, for cold-start recovery from persisted entities.

use std::collections::{BinaryHeap, HashMap};
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default embedding width (spec default: 384 dimensions).
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Bidirectional connections per node at layers above 0.
pub const DEFAULT_M: usize = 16;

/// Candidate list size while building the graph.
pub const DEFAULT_EF_CONSTRUCTION: usize = 128;

/// Candidate list size while searching.
pub const DEFAULT_EF_SEARCH: usize = 64;

#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum VectorSearchError {
    IndexCreation(String),
    IndexAdd(String),
    IndexSearch(String),
    IndexPersistence(String),
    InvalidDimensions(usize, usize),
    KeyNotFound(String),
}

impl std::fmt::Display for VectorSearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorSearchError::IndexCreation(e) => write!(f, "index creation failed: {e}"),
            VectorSearchError::IndexAdd(e) => write!(f, "failed to add vector: {e}"),
            VectorSearchError::IndexSearch(e) => write!(f, "search failed: {e}"),
            VectorSearchError::IndexPersistence(e) => write!(f, "persistence failed: {e}"),
            VectorSearchError::InvalidDimensions(expected, got) => {
                write!(f, "invalid dimensions: expected {expected}, got {got}")
            }
            VectorSearchError::KeyNotFound(key) => write!(f, "key not found: {key}"),
        }
    }
}

impl std::error::Error for VectorSearchError {}

#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub dimensions: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorIndexStats {
    pub total_vectors: usize,
    pub tombstoned: usize,
    pub dimensions: usize,
    pub max_layer: usize,
    pub memory_bytes: usize,
}

/// Fraction of tombstoned nodes that triggers an automatic [`HnswIndex::compact`].
const AUTO_COMPACT_RATIO: f64 = 0.25;

#[derive(Clone, Serialize, Deserialize)]
struct Node {
    vector: Vec<f32>,
    /// `layers[l]` holds this node's neighbours at layer `l`.
    layers: Vec<Vec<usize>>,
    tombstoned: bool,
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0f32;
    let mut norm_a = 0f32;
    let mut norm_b = 0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Max-heap ordering on similarity for the neighbour candidate lists
/// (higher similarity = "greater" so `BinaryHeap` pops the best first).
#[derive(PartialEq)]
struct Candidate {
    id: usize,
    similarity: f32,
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.similarity.total_cmp(&other.similarity)
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    config_dimensions: usize,
    config_m: usize,
    config_ef_construction: usize,
    config_ef_search: usize,
    nodes: Vec<Node>,
    key_to_id: HashMap<String, usize>,
    entry_point: Option<usize>,
    max_layer: usize,
}

/// Hand-rolled HNSW index, keyed by opaque string keys (entity ids).
pub struct HnswIndex {
    config: VectorIndexConfig,
    nodes: Vec<Node>,
    key_to_id: HashMap<String, usize>,
    id_to_key: HashMap<usize, String>,
    entry_point: Option<usize>,
    max_layer: usize,
    tombstone_count: usize,
}

impl HnswIndex {
    pub fn new() -> Result<Self, VectorSearchError> {
        Self::with_config(VectorIndexConfig::default())
    }

    pub fn with_config(config: VectorIndexConfig) -> Result<Self, VectorSearchError> {
        if config.dimensions == 0 {
            return Err(VectorSearchError::IndexCreation("dimensions must be nonzero".into()));
        }
        Ok(Self {
            config,
            nodes: Vec::new(),
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            entry_point: None,
            max_layer: 0,
            tombstone_count: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.key_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_to_id.contains_key(key)
    }

    /// Draws a random max layer from a geometric distribution with
    /// parameter `ln(M)`, the standard HNSW layer-assignment rule.
    fn random_layer(&self) -> usize {
        let ml = 1.0 / (self.config.m as f64).ln();
        let r: f64 = rand::thread_rng().gen_range(f64::EPSILON..1.0);
        (-r.ln() * ml).floor() as usize
    }

    fn greedy_descend(&self, query: &[f32], from: usize, from_layer: usize, to_layer: usize) -> usize {
        let mut current = from;
        let mut current_sim = cosine_similarity(query, &self.nodes[current].vector);
        for layer in (to_layer..=from_layer).rev() {
            loop {
                let mut improved = false;
                let neighbors = self.nodes[current].layers.get(layer).cloned().unwrap_or_default();
                for n in neighbors {
                    if self.nodes[n].tombstoned {
                        continue;
                    }
                    let sim = cosine_similarity(query, &self.nodes[n].vector);
                    if sim > current_sim {
                        current = n;
                        current_sim = sim;
                        improved = true;
                    }
                }
                if !improved {
                    break;
                }
            }
        }
        current
    }

    /// Beam search at a single layer, returning up to `ef` best candidates.
    fn search_layer(&self, query: &[f32], entry: usize, layer: usize, ef: usize) -> Vec<Candidate> {
        let mut visited = vec![false; self.nodes.len()];
        visited[entry] = true;
        let entry_sim = cosine_similarity(query, &self.nodes[entry].vector);

        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut results: Vec<Candidate> = Vec::new();
        candidates.push(Candidate { id: entry, similarity: entry_sim });
        if !self.nodes[entry].tombstoned {
            results.push(Candidate { id: entry, similarity: entry_sim });
        }

        while let Some(Candidate { id, similarity }) = candidates.pop() {
            let worst = results
                .iter()
                .map(|c| c.similarity)
                .fold(f32::INFINITY, f32::min);
            if results.len() >= ef && similarity < worst {
                break;
            }
            let neighbors = self.nodes[id].layers.get(layer).cloned().unwrap_or_default();
            for n in neighbors {
                if visited[n] {
                    continue;
                }
                visited[n] = true;
                let sim = cosine_similarity(query, &self.nodes[n].vector);
                candidates.push(Candidate { id: n, similarity: sim });
                if !self.nodes[n].tombstoned {
                    results.push(Candidate { id: n, similarity: sim });
                }
            }
        }

        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(ef.max(1));
        results
    }

    /// Insert or update the vector under `key`.
    pub fn add(&mut self, key: &str, vector: &[f32]) -> Result<(), VectorSearchError> {
        if vector.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions(self.config.dimensions, vector.len()));
        }
        if let Some(&existing) = self.key_to_id.get(key) {
            self.remove_internal(existing);
        }

        let layer = self.random_layer();
        let id = self.nodes.len();
        self.nodes.push(Node { vector: vector.to_vec(), layers: vec![Vec::new(); layer + 1], tombstoned: false });
        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_layer = layer;
            return Ok(());
        };

        let mut cur = self.greedy_descend(vector, entry, self.max_layer, layer.min(self.max_layer) + 1);
        if layer.min(self.max_layer) + 1 > self.max_layer {
            cur = entry;
        }

        for l in (0..=layer.min(self.max_layer)).rev() {
            let candidates = self.search_layer(vector, cur, l, self.config.ef_construction);
            let m = self.config.m;
            let selected: Vec<usize> = candidates.iter().take(m).map(|c| c.id).collect();
            self.nodes[id].layers[l] = selected.clone();
            for &neighbor in &selected {
                let Some(mut back_ids) = self.nodes[neighbor].layers.get(l).cloned() else { continue };
                back_ids.push(id);
                if back_ids.len() > m * 2 {
                    let nv = self.nodes[neighbor].vector.clone();
                    back_ids.sort_by(|&a, &b| {
                        cosine_similarity(&nv, &self.nodes[b].vector)
                            .total_cmp(&cosine_similarity(&nv, &self.nodes[a].vector))
                    });
                    back_ids.truncate(m * 2);
                }
                self.nodes[neighbor].layers[l] = back_ids;
            }
            if let Some(&best) = candidates.first().map(|c| &c.id) {
                cur = best;
            }
        }

        if layer > self.max_layer {
            self.max_layer = layer;
            self.entry_point = Some(id);
        }
        Ok(())
    }

    fn remove_internal(&mut self, id: usize) {
        if !self.nodes[id].tombstoned {
            self.nodes[id].tombstoned = true;
            self.tombstone_count += 1;
        }
    }

    /// Tombstone the vector stored under `key`. Returns whether it existed.
    /// Auto-compacts once tombstones exceed [`AUTO_COMPACT_RATIO`] of live nodes.
    pub fn remove(&mut self, key: &str) -> Result<bool, VectorSearchError> {
        let Some(id) = self.key_to_id.remove(key) else { return Ok(false) };
        self.id_to_key.remove(&id);
        self.remove_internal(id);
        if !self.nodes.is_empty() && self.tombstone_count as f64 / self.nodes.len() as f64 > AUTO_COMPACT_RATIO {
            self.compact();
        }
        Ok(true)
    }

    /// Drop tombstoned nodes and relink survivors' neighbour lists around
    /// the holes they leave, renumbering internal ids.
    pub fn compact(&mut self) {
        let live_ids: Vec<usize> = (0..self.nodes.len()).filter(|&i| !self.nodes[i].tombstoned).collect();
        let mut remap: HashMap<usize, usize> = HashMap::new();
        for (new_id, &old_id) in live_ids.iter().enumerate() {
            remap.insert(old_id, new_id);
        }

        let mut new_nodes = Vec::with_capacity(live_ids.len());
        for &old_id in &live_ids {
            let old = &self.nodes[old_id];
            let layers = old
                .layers
                .iter()
                .map(|layer| layer.iter().filter_map(|n| remap.get(n).copied()).collect())
                .collect();
            new_nodes.push(Node { vector: old.vector.clone(), layers, tombstoned: false });
        }

        let mut new_key_to_id = HashMap::new();
        let mut new_id_to_key = HashMap::new();
        for (key, old_id) in self.key_to_id.drain() {
            if let Some(&new_id) = remap.get(&old_id) {
                new_id_to_key.insert(new_id, key.clone());
                new_key_to_id.insert(key, new_id);
            }
        }

        self.entry_point = self
            .entry_point
            .and_then(|e| remap.get(&e).copied())
            .or(if new_nodes.is_empty() { None } else { Some(0) });
        self.max_layer = new_nodes.iter().map(|n| n.layers.len().saturating_sub(1)).max().unwrap_or(0);
        self.nodes = new_nodes;
        self.key_to_id = new_key_to_id;
        self.id_to_key = new_id_to_key;
        self.tombstone_count = 0;
        tracing::debug!(remaining = self.nodes.len(), "hnsw index compacted");
    }

    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>, VectorSearchError> {
        if query.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions(self.config.dimensions, query.len()));
        }
        let Some(entry) = self.entry_point else { return Ok(Vec::new()) };
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let cur = self.greedy_descend(query, entry, self.max_layer, 1);
        let candidates = self.search_layer(query, cur, 0, self.config.ef_search.max(limit));
        Ok(candidates
            .into_iter()
            .filter_map(|c| self.id_to_key.get(&c.id).map(|k| (k.clone(), c.similarity)))
            .take(limit)
            .collect())
    }

    pub fn search_with_threshold(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(String, f32)>, VectorSearchError> {
        let results = self.search(query, limit)?;
        Ok(results.into_iter().filter(|(_, score)| *score >= min_similarity).collect())
    }

    /// Rebuild the whole graph from scratch out of persisted (key, vector)
    /// pairs, for cold-start recovery.
    pub fn rebuild(&mut self, entries: impl IntoIterator<Item = (String, Vec<f32>)>) -> Result<(), VectorSearchError> {
        let config = self.config.clone();
        *self = Self::with_config(config)?;
        for (key, vector) in entries {
            self.add(&key, &vector)?;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), VectorSearchError> {
        let persisted = PersistedIndex {
            config_dimensions: self.config.dimensions,
            config_m: self.config.m,
            config_ef_construction: self.config.ef_construction,
            config_ef_search: self.config.ef_search,
            nodes: self.nodes.clone(),
            key_to_id: self.key_to_id.clone(),
            entry_point: self.entry_point,
            max_layer: self.max_layer,
        };
        let bytes = bincode::serialize(&persisted)
            .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, VectorSearchError> {
        let bytes = std::fs::read(path).map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;
        let persisted: PersistedIndex =
            bincode::deserialize(&bytes).map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;
        let tombstone_count = persisted.nodes.iter().filter(|n| n.tombstoned).count();
        let id_to_key = persisted.key_to_id.iter().map(|(k, &v)| (v, k.clone())).collect();
        Ok(Self {
            config: VectorIndexConfig {
                dimensions: persisted.config_dimensions,
                m: persisted.config_m,
                ef_construction: persisted.config_ef_construction,
                ef_search: persisted.config_ef_search,
            },
            nodes: persisted.nodes,
            key_to_id: persisted.key_to_id,
            id_to_key,
            entry_point: persisted.entry_point,
            max_layer: persisted.max_layer,
            tombstone_count,
        })
    }

    pub fn stats(&self) -> VectorIndexStats {
        let memory_bytes = self.nodes.iter().map(|n| {
            n.vector.len() * std::mem::size_of::<f32>()
                + n.layers.iter().map(|l| l.len() * std::mem::size_of::<usize>()).sum::<usize>()
        }).sum();
        VectorIndexStats {
            total_vectors: self.len(),
            tombstoned: self.tombstone_count,
            dimensions: self.config.dimensions,
            max_layer: self.max_layer,
            memory_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vector(dims: usize, seed: f32) -> Vec<f32> {
        (0..dims).map(|i| ((i as f32 + seed) / dims as f32).sin()).collect()
    }

    fn small_index() -> HnswIndex {
        HnswIndex::with_config(VectorIndexConfig { dimensions: 8, m: 4, ef_construction: 32, ef_search: 16 }).unwrap()
    }

    #[test]
    fn add_and_search_returns_nearest_first() {
        let mut idx = small_index();
        let v1 = test_vector(8, 1.0);
        let v2 = test_vector(8, 2.0);
        let v3 = test_vector(8, 100.0);
        idx.add("a", &v1).unwrap();
        idx.add("b", &v2).unwrap();
        idx.add("c", &v3).unwrap();

        let results = idx.search(&v1, 3).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let mut idx = small_index();
        let wrong = vec![1.0, 2.0, 3.0];
        assert!(matches!(idx.add("x", &wrong), Err(VectorSearchError::InvalidDimensions(8, 3))));
    }

    #[test]
    fn remove_tombstones_and_excludes_from_search() {
        let mut idx = small_index();
        let v1 = test_vector(8, 1.0);
        idx.add("a", &v1).unwrap();
        assert!(idx.remove("a").unwrap());
        assert!(!idx.contains("a"));
        let results = idx.search(&v1, 5).unwrap();
        assert!(results.iter().all(|(k, _)| k != "a"));
    }

    #[test]
    fn compact_drops_tombstones_and_preserves_search() {
        let mut idx = small_index();
        for i in 0..20 {
            idx.add(&format!("v{i}"), &test_vector(8, i as f32)).unwrap();
        }
        for i in 0..10 {
            idx.remove(&format!("v{i}")).unwrap();
        }
        idx.compact();
        assert_eq!(idx.stats().tombstoned, 0);
        assert_eq!(idx.len(), 10);
        let results = idx.search(&test_vector(8, 15.0), 3).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn rebuild_reconstructs_from_persisted_entries() {
        let mut idx = small_index();
        let entries: Vec<(String, Vec<f32>)> =
            (0..5).map(|i| (format!("v{i}"), test_vector(8, i as f32))).collect();
        idx.rebuild(entries.clone()).unwrap();
        assert_eq!(idx.len(), 5);
        let results = idx.search(&entries[0].1, 1).unwrap();
        assert_eq!(results[0].0, "v0");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let mut idx = small_index();
        idx.add("a", &test_vector(8, 1.0)).unwrap();
        idx.add("b", &test_vector(8, 2.0)).unwrap();
        idx.save(&path).unwrap();

        let loaded = HnswIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains("a"));
    }

    #[test]
    fn search_with_threshold_filters_dissimilar() {
        let mut idx = small_index();
        let v1 = test_vector(8, 1.0);
        let v2 = test_vector(8, 500.0);
        idx.add("similar", &v1).unwrap();
        idx.add("different", &v2).unwrap();
        let results = idx.search_with_threshold(&v1, 10, 0.99).unwrap();
        assert!(results.iter().any(|(k, _)| k == "similar"));
    }
}
