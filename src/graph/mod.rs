//! Graph Adjacency Index (spec component F): in-memory bidirectional edge
//! map with paginated traversal, O(log n) duplicate-edge detection, and
//! rebuild-from-verb-store repair.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use uuid::Uuid;

use crate::types::{Verb, VerbType};

/// Graph-layer failure taxonomy.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("graph index is unhealthy: {0}")]
    Unhealthy(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;

/// Which side(s) of an edge to traverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Out,
    In,
    #[default]
    Both,
}

impl Direction {
    /// Accepts the legacy positional string form (`"out"`/`"in"`/`"both"`).
    pub fn parse(s: &str) -> Self {
        match s {
            "in" => Direction::In,
            "both" => Direction::Both,
            _ => Direction::Out,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub memory_bytes: usize,
}

/// Per-node adjacency lists are insertion-ordered so that pagination is
/// deterministic across calls with advancing offsets.
#[derive(Default)]
struct Adjacency {
    source_to_targets: HashMap<Uuid, Vec<Uuid>>,
    target_to_sources: HashMap<Uuid, Vec<Uuid>>,
    source_verbs: HashMap<Uuid, Vec<Uuid>>,
    target_verbs: HashMap<Uuid, Vec<Uuid>>,
    /// (source, target, type) -> verb id, for O(log n)-or-better duplicate detection.
    dup_index: HashMap<(Uuid, Uuid, VerbType), Uuid>,
    verbs: HashMap<Uuid, Verb>,
}

pub struct GraphIndex {
    inner: RwLock<Adjacency>,
    healthy: AtomicBool,
}

impl Default for GraphIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Adjacency::default()),
            healthy: AtomicBool::new(true),
        }
    }

    /// Insert a verb if `(source, target, type)` hasn't been seen, otherwise
    /// return the id of the existing verb (idempotent `relate`).
    pub fn add_verb(&self, verb: Verb) -> Uuid {
        let key = (verb.source_id, verb.target_id, verb.verb_type);
        let mut g = self.inner.write().unwrap();
        if let Some(existing) = g.dup_index.get(&key) {
            return *existing;
        }
        let id = verb.id;
        g.source_to_targets.entry(verb.source_id).or_default().push(verb.target_id);
        g.target_to_sources.entry(verb.target_id).or_default().push(verb.source_id);
        g.source_verbs.entry(verb.source_id).or_default().push(id);
        g.target_verbs.entry(verb.target_id).or_default().push(id);
        g.dup_index.insert(key, id);
        g.verbs.insert(id, verb);
        id
    }

    /// Remove a verb (and its adjacency entries) by id. No-op if missing.
    pub fn remove_verb(&self, verb_id: Uuid) {
        let mut g = self.inner.write().unwrap();
        let Some(verb) = g.verbs.remove(&verb_id) else { return };
        g.dup_index.remove(&(verb.source_id, verb.target_id, verb.verb_type));
        if let Some(v) = g.source_to_targets.get_mut(&verb.source_id) {
            if let Some(pos) = v.iter().position(|t| *t == verb.target_id) {
                v.remove(pos);
            }
        }
        if let Some(v) = g.target_to_sources.get_mut(&verb.target_id) {
            if let Some(pos) = v.iter().position(|s| *s == verb.source_id) {
                v.remove(pos);
            }
        }
        if let Some(v) = g.source_verbs.get_mut(&verb.source_id) {
            v.retain(|id| *id != verb_id);
        }
        if let Some(v) = g.target_verbs.get_mut(&verb.target_id) {
            v.retain(|id| *id != verb_id);
        }
    }

    /// Remove every verb incident to `node_id` (used by entity delete cascade).
    pub fn remove_node(&self, node_id: Uuid) {
        let incident: Vec<Uuid> = {
            let g = self.inner.read().unwrap();
            let mut ids: Vec<Uuid> = g.source_verbs.get(&node_id).cloned().unwrap_or_default();
            ids.extend(g.target_verbs.get(&node_id).cloned().unwrap_or_default());
            ids
        };
        for id in incident {
            self.remove_verb(id);
        }
    }

    pub fn get_verb(&self, verb_id: Uuid) -> Option<Verb> {
        self.inner.read().unwrap().verbs.get(&verb_id).cloned()
    }

    /// Check for an existing `(source, target, type)` triple without mutating.
    pub fn find_duplicate(&self, source: Uuid, target: Uuid, verb_type: VerbType) -> Option<Uuid> {
        self.inner.read().unwrap().dup_index.get(&(source, target, verb_type)).copied()
    }

    fn paginate(ids: &[Uuid], limit: Option<usize>, offset: usize) -> Vec<Uuid> {
        if offset >= ids.len() {
            return Vec::new();
        }
        let limit = limit.unwrap_or(ids.len() - offset);
        ids.iter().skip(offset).take(limit).copied().collect()
    }

    /// Paginated neighbour lookup. `limit=0` or `offset` beyond cardinality
    /// returns an empty page; pages never overlap when offsets advance by
    /// `limit`.
    pub fn get_neighbors(
        &self,
        node_id: Uuid,
        direction: Direction,
        limit: Option<usize>,
        offset: usize,
    ) -> Vec<Uuid> {
        if limit == Some(0) {
            return Vec::new();
        }
        let g = self.inner.read().unwrap();
        match direction {
            Direction::Out => {
                Self::paginate(g.source_to_targets.get(&node_id).map(Vec::as_slice).unwrap_or(&[]), limit, offset)
            }
            Direction::In => {
                Self::paginate(g.target_to_sources.get(&node_id).map(Vec::as_slice).unwrap_or(&[]), limit, offset)
            }
            Direction::Both => {
                let mut combined: Vec<Uuid> = g.source_to_targets.get(&node_id).cloned().unwrap_or_default();
                combined.extend(g.target_to_sources.get(&node_id).cloned().unwrap_or_default());
                Self::paginate(&combined, limit, offset)
            }
        }
    }

    pub fn get_verb_ids_by_source(&self, node_id: Uuid, limit: Option<usize>, offset: usize) -> Vec<Uuid> {
        if limit == Some(0) {
            return Vec::new();
        }
        let g = self.inner.read().unwrap();
        Self::paginate(g.source_verbs.get(&node_id).map(Vec::as_slice).unwrap_or(&[]), limit, offset)
    }

    pub fn get_verb_ids_by_target(&self, node_id: Uuid, limit: Option<usize>, offset: usize) -> Vec<Uuid> {
        if limit == Some(0) {
            return Vec::new();
        }
        let g = self.inner.read().unwrap();
        Self::paginate(g.target_verbs.get(&node_id).map(Vec::as_slice).unwrap_or(&[]), limit, offset)
    }

    /// Rescan the verb store and reconstruct both adjacency maps atomically.
    /// On partial failure marks the index unhealthy and propagates.
    pub fn rebuild(&self, verbs: impl IntoIterator<Item = Verb>) -> Result<()> {
        let mut fresh = Adjacency::default();
        for verb in verbs {
            let key = (verb.source_id, verb.target_id, verb.verb_type);
            if fresh.dup_index.contains_key(&key) {
                continue;
            }
            let id = verb.id;
            fresh.source_to_targets.entry(verb.source_id).or_default().push(verb.target_id);
            fresh.target_to_sources.entry(verb.target_id).or_default().push(verb.source_id);
            fresh.source_verbs.entry(verb.source_id).or_default().push(id);
            fresh.target_verbs.entry(verb.target_id).or_default().push(id);
            fresh.dup_index.insert(key, id);
            fresh.verbs.insert(id, verb);
        }
        match self.inner.write() {
            Ok(mut guard) => {
                *guard = fresh;
                self.healthy.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(_) => {
                self.healthy.store(false, Ordering::SeqCst);
                Err(GraphError::Unhealthy("adjacency lock poisoned during rebuild".into()))
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn get_stats(&self) -> GraphStats {
        let g = self.inner.read().unwrap();
        let node_count = g.source_to_targets.len().max(g.target_to_sources.len());
        let edge_count = g.verbs.len();
        let memory_bytes = edge_count * std::mem::size_of::<Verb>()
            + node_count * std::mem::size_of::<Uuid>() * 4;
        GraphStats { node_count, edge_count, memory_bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metadata;

    fn verb(source: Uuid, target: Uuid, t: VerbType) -> Verb {
        Verb { id: Uuid::new_v4(), source_id: source, target_id: target, verb_type: t, metadata: Metadata::new(), bidirectional: false }
    }

    #[test]
    fn duplicate_relate_is_idempotent() {
        let g = GraphIndex::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let v1 = verb(a, b, VerbType::MemberOf);
        let id1 = v1.id;
        let first = g.add_verb(v1);
        assert_eq!(first, id1);
        let second = g.add_verb(verb(a, b, VerbType::MemberOf));
        assert_eq!(second, first, "second relate returns the first verb's id");
        assert_eq!(g.get_verb_ids_by_source(a, None, 0).len(), 1);
    }

    #[test]
    fn pagination_offset_beyond_cardinality_is_empty() {
        let g = GraphIndex::new();
        let a = Uuid::new_v4();
        for _ in 0..3 {
            g.add_verb(verb(a, Uuid::new_v4(), VerbType::RelatesTo));
        }
        assert!(g.get_neighbors(a, Direction::Out, None, 1_000_000_000).is_empty());
        assert!(g.get_neighbors(a, Direction::Out, Some(0), 0).is_empty());
    }

    #[test]
    fn pages_do_not_overlap() {
        let g = GraphIndex::new();
        let a = Uuid::new_v4();
        let targets: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for t in &targets {
            g.add_verb(verb(a, *t, VerbType::RelatesTo));
        }
        let page1 = g.get_neighbors(a, Direction::Out, Some(2), 0);
        let page2 = g.get_neighbors(a, Direction::Out, Some(2), 2);
        assert_eq!(page1, &targets[0..2]);
        assert_eq!(page2, &targets[2..4]);
    }

    #[test]
    fn remove_node_clears_incident_edges() {
        let g = GraphIndex::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        g.add_verb(verb(a, b, VerbType::RelatesTo));
        g.remove_node(a);
        assert!(g.get_neighbors(a, Direction::Out, None, 0).is_empty());
        assert!(g.get_neighbors(b, Direction::In, None, 0).is_empty());
    }

    #[test]
    fn rebuild_reconstructs_adjacency() {
        let g = GraphIndex::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let v = verb(a, b, VerbType::RelatesTo);
        g.rebuild(vec![v]).unwrap();
        assert!(g.is_healthy());
        assert_eq!(g.get_neighbors(a, Direction::Out, None, 0), vec![b]);
    }
}
