//! Hybrid Query Engine (spec component H): combines vector similarity,
//! metadata filtering, graph connectivity, and keyword text matching behind
//! a single `find`/`similar` surface, fused per [`fusion::fuse`].

pub mod filter;
pub mod fusion;
pub mod highlight;
pub mod text;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

use crate::graph::Direction;
use crate::store::Store;
use crate::types::{Entity, NounType, VerbType};
use crate::Result;

pub use fusion::{FusionStrategy, FusionWeights};
pub use highlight::{Granularity, MatchType, Span};

/// The semantic phase (vector search + embedding the query) is the only
/// suspension point long enough to warrant a deadline; on timeout `find`
/// degrades to the text-only candidate set instead of failing outright.
const DEFAULT_SEMANTIC_TIMEOUT: Duration = Duration::from_millis(2_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Vector,
    Text,
    Metadata,
    Graph,
    Fused,
}

/// Forces (or lets the planner choose) which signals `find` gathers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    Auto,
    Text,
    Semantic,
    Vector,
    Hybrid,
}

/// Graph-traversal clause of a query: `connected: {from?, to?, type?,
/// depth?=1, direction?}` (spec §4.H). At least one of `from`/`to` must be
/// set or the clause matches nothing.
#[derive(Debug, Clone, Default)]
pub struct Connected {
    pub from: Option<Uuid>,
    pub to: Option<Uuid>,
    pub verb_types: Option<Vec<VerbType>>,
    pub depth: usize,
    pub direction: Direction,
}

impl Connected {
    pub fn new() -> Self {
        Self { depth: 1, ..Default::default() }
    }
}

/// Unified input to [`find`], per spec §4.H.
#[derive(Default)]
pub struct QueryInput {
    pub query: Option<String>,
    pub vector: Option<Vec<f32>>,
    pub r#where: Option<Value>,
    pub entity_type: Option<String>,
    pub service: Option<String>,
    pub connected: Option<Connected>,
    /// Entities whose vector lies within `radius` cosine distance of this
    /// entity's vector; `radius` defaults to `1.0 - threshold` when unset.
    pub near: Option<Uuid>,
    pub radius: Option<f32>,
    pub fusion: FusionStrategy,
    pub weights: FusionWeights,
    /// Weight of semantic vs. text signal in hybrid mode, `[0,1]`. Unset
    /// lets `search_mode: Auto` derive it from query length (short query ->
    /// 0.3, long query -> 0.7).
    pub hybrid_alpha: Option<f32>,
    pub search_mode: SearchMode,
    pub threshold: f32,
    pub limit: usize,
    pub offset: usize,
    /// Opaque pagination cursor; currently an encoded offset, accepted as
    /// an alternative to `offset`.
    pub cursor: Option<String>,
    pub explain: bool,
}

impl QueryInput {
    pub fn new() -> Self {
        Self { fusion: FusionStrategy::Adaptive, weights: FusionWeights::default(), limit: 10, ..Default::default() }
    }
}

/// Encodes a page's next offset as an opaque cursor string.
pub fn encode_cursor(next_offset: usize) -> String {
    next_offset.to_string()
}

fn decode_cursor(cursor: &str) -> Option<usize> {
    cursor.parse().ok()
}

/// `w_i` adjusted so vector/text follow `hybrid_alpha` (explicit, or
/// derived from query length under `SearchMode::Auto`/`Hybrid`), and
/// zeroed out for signals `search_mode` excludes entirely.
fn effective_weights(input: &QueryInput) -> FusionWeights {
    let mut weights = input.weights;
    match input.search_mode {
        SearchMode::Text => {
            weights.vector = 0.0;
        }
        SearchMode::Semantic | SearchMode::Vector => {
            weights.text = 0.0;
        }
        SearchMode::Auto | SearchMode::Hybrid => {}
    }
    let alpha = input.hybrid_alpha.or_else(|| match input.search_mode {
        SearchMode::Auto | SearchMode::Hybrid => {
            input.query.as_deref().map(|q| if text::tokenize(q).len() <= 3 { 0.3 } else { 0.7 })
        }
        _ => None,
    });
    if let Some(alpha) = alpha {
        if !matches!(input.search_mode, SearchMode::Text | SearchMode::Semantic | SearchMode::Vector) {
            weights.vector = alpha.clamp(0.0, 1.0);
            weights.text = (1.0 - alpha).clamp(0.0, 1.0);
        }
    }
    weights
}

pub struct QueryResult {
    pub id: Uuid,
    pub score: f32,
    pub entity: Entity,
    pub text_score: Option<f32>,
    pub semantic_score: Option<f32>,
    pub match_source: MatchSource,
    pub text_matches: Option<Vec<String>>,
    pub explanation: Option<String>,
    /// Set on the last item of a full page: pass back as `QueryInput.cursor`
    /// to fetch the next page.
    pub cursor: Option<String>,
}

/// Concatenates every string leaf in an entity's metadata into one blob for
/// keyword tokenisation and highlighting; the store persists no separate
/// raw-text column, so metadata is the only searchable surface (by
/// convention, callers put prose under `rawData` or a similarly named key).
pub fn entity_text(entity: &Entity) -> String {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) => out.push(s.clone()),
            Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
            Value::Object(map) => map.values().for_each(|v| walk(v, out)),
            _ => {}
        }
    }
    let mut parts = Vec::new();
    for v in entity.metadata.values() {
        walk(v, &mut parts);
    }
    parts.join(" ")
}

/// The query planner: orders component evaluation by selectivity so the
/// cheapest, most restrictive filter runs first. A single-signal query (only
/// `vector`, only `where`, etc.) skips fusion entirely and returns that
/// component's ranking untouched.
struct Plan {
    has_vector: bool,
    has_text: bool,
    has_where: bool,
    has_graph: bool,
    signal_count: usize,
}

fn plan_for(input: &QueryInput) -> Plan {
    let vector_excluded = matches!(input.search_mode, SearchMode::Text);
    let text_excluded = matches!(input.search_mode, SearchMode::Semantic | SearchMode::Vector);
    let has_vector = !vector_excluded && (input.vector.is_some() || input.query.is_some() || input.near.is_some());
    let has_text = !text_excluded && input.query.is_some();
    let has_where = input.r#where.is_some();
    let has_graph = input.connected.is_some();
    let signal_count = [has_vector, has_where, has_graph].iter().filter(|b| **b).count();
    Plan { has_vector, has_text, has_where, has_graph, signal_count }
}

/// Execute a hybrid query. Empty query (no `query`, `vector`, `where`,
/// `connected`, `near`) is a fast path: paginate every entity of
/// `entity_type` (or all types) by recency.
pub fn find(store: &Store, input: &QueryInput) -> Result<Vec<QueryResult>> {
    let entity_type = input.entity_type.as_deref().and_then(NounType::parse);
    let plan = plan_for(input);
    let offset = input.cursor.as_deref().and_then(decode_cursor).unwrap_or(input.offset);

    if !plan.has_vector && !plan.has_where && !plan.has_graph {
        let mut entities = store.scan_entities()?;
        entities.retain(|e| filter_passes(e, entity_type, input.service.as_deref(), None));
        entities.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        let total = entities.len();
        let mut results: Vec<QueryResult> =
            page(entities, offset, input.limit).into_iter().map(|e| simple_result(e, MatchSource::Metadata, input.explain)).collect();
        let next_cursor = (offset + results.len() < total).then(|| encode_cursor(offset + results.len()));
        if let Some(last) = results.last_mut() {
            last.cursor = next_cursor;
        }
        return Ok(results);
    }

    let connected: Option<HashSet<Uuid>> = input.connected.as_ref().map(|spec| traverse_connected(store, spec));

    let weights = effective_weights(input);

    let mut vector_ranked: Vec<(Uuid, f32)> = Vec::new();
    let mut semantic_degraded = false;
    if plan.has_vector {
        let started = Instant::now();
        let query_vector = match &input.vector {
            Some(v) => Some(v.clone()),
            None => match &input.near {
                Some(seed_id) => store.get(*seed_id, true)?.map(|e| e.vector).filter(|v| !v.is_empty()),
                None => input.query.as_deref().map(|q| store.embed(q)).transpose()?,
            },
        };
        if let Some(qv) = query_vector {
            if started.elapsed() < DEFAULT_SEMANTIC_TIMEOUT {
                vector_ranked = store.search_vectors(&qv, (input.limit + offset).max(50))?;
                if let Some(radius) = input.radius {
                    let min_similarity = 1.0 - radius;
                    vector_ranked.retain(|(_, score)| *score >= min_similarity);
                }
                if let Some(seed_id) = input.near {
                    vector_ranked.retain(|(id, _)| *id != seed_id);
                }
            } else {
                semantic_degraded = true;
            }
        }
    }

    let mut text_ranked: Vec<(Uuid, f32)> = Vec::new();
    let mut text_hits: std::collections::HashMap<Uuid, Vec<String>> = std::collections::HashMap::new();
    let mut metadata_ranked: Vec<(Uuid, f32)> = Vec::new();
    let mut all_entities: Option<Vec<Entity>> = None;

    if plan.has_text || plan.has_where || (!plan.has_vector && plan.signal_count == 0) || semantic_degraded {
        let entities = all_entities.get_or_insert_with(|| store.scan_entities().unwrap_or_default());
        for entity in entities.iter() {
            if !filter_passes(entity, entity_type, input.service.as_deref(), connected.as_ref()) {
                continue;
            }
            if plan.has_where {
                let clause = input.r#where.as_ref().unwrap();
                if !filter::matches_where(&entity.metadata, clause) {
                    continue;
                }
                metadata_ranked.push((entity.id, 1.0));
            }
            if plan.has_text {
                if let Some(q) = &input.query {
                    let m = text::score_text(q, &entity_text(entity));
                    if m.score > 0.0 {
                        text_ranked.push((entity.id, m.score));
                        text_hits.insert(entity.id, m.matched_tokens);
                    }
                }
            }
        }
    }

    let graph_ranked: Vec<(Uuid, f32)> = connected
        .as_ref()
        .map(|set| set.iter().map(|id| (*id, 1.0)).collect())
        .unwrap_or_default();

    let fused = if plan.signal_count <= 1 && !plan.has_text {
        let mut single = vector_ranked.clone();
        single.extend(metadata_ranked.iter().copied());
        single.extend(graph_ranked.iter().copied());
        single
    } else {
        fusion::fuse(input.fusion, weights, &vector_ranked, &metadata_ranked, &graph_ranked, &text_ranked)
    };

    let vector_scores: std::collections::HashMap<Uuid, f32> = vector_ranked.into_iter().collect();
    let text_scores: std::collections::HashMap<Uuid, f32> = text_ranked.into_iter().collect();

    let mut results = Vec::new();
    for (id, score) in fused {
        if score < input.threshold {
            continue;
        }
        let Some(entity) = store.get(id, false)? else { continue };
        if let Some(et) = entity_type {
            if entity.entity_type != et {
                continue;
            }
        }
        if let Some(set) = &connected {
            if !set.contains(&id) {
                continue;
            }
        }
        let match_source = match (vector_scores.contains_key(&id), text_scores.contains_key(&id)) {
            (true, true) => MatchSource::Fused,
            (true, false) => MatchSource::Vector,
            (false, true) => MatchSource::Text,
            (false, false) => MatchSource::Metadata,
        };
        results.push(QueryResult {
            id,
            score,
            text_score: text_scores.get(&id).copied(),
            semantic_score: vector_scores.get(&id).copied(),
            match_source,
            text_matches: text_hits.get(&id).cloned(),
            explanation: input.explain.then(|| {
                format!(
                    "score={score:.4} vector={:?} text={:?}",
                    vector_scores.get(&id),
                    text_scores.get(&id)
                )
            }),
            entity,
            cursor: None,
        });
    }

    let mut page_results = page(results, offset, input.limit);
    let filled_page = page_results.len() == input.limit.max(1);
    if filled_page {
        let next_cursor = encode_cursor(offset + page_results.len());
        if let Some(last) = page_results.last_mut() {
            last.cursor = Some(next_cursor);
        }
    }
    Ok(page_results)
}

/// BFS over graph adjacency up to `spec.depth` hops, filtered by
/// `spec.verb_types` and `spec.direction`. Needs at least one of `from`/`to`.
fn traverse_connected(store: &Store, spec: &Connected) -> HashSet<Uuid> {
    let mut frontier: HashSet<Uuid> = HashSet::new();
    if let Some(from) = spec.from {
        frontier.insert(from);
    }
    if let Some(to) = spec.to {
        frontier.insert(to);
    }
    if frontier.is_empty() {
        return HashSet::new();
    }

    let depth = spec.depth.max(1);
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut reached: HashSet<Uuid> = HashSet::new();
    for _ in 0..depth {
        let mut next = HashSet::new();
        for node in &frontier {
            if !visited.insert(*node) {
                continue;
            }
            for neighbor in connected_step(store, *node, spec.direction, spec.verb_types.as_deref()) {
                if reached.insert(neighbor) {
                    next.insert(neighbor);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    reached
}

fn connected_step(store: &Store, node: Uuid, direction: Direction, verb_types: Option<&[VerbType]>) -> Vec<Uuid> {
    let mut out = Vec::new();
    if direction == Direction::Out || direction == Direction::Both {
        out.extend(
            store
                .get_relations(Some(node), None, None, None, 0)
                .unwrap_or_default()
                .into_iter()
                .filter(|v| verb_types.is_none_or(|types| types.contains(&v.verb_type)))
                .map(|v| v.target_id),
        );
    }
    if direction == Direction::In || direction == Direction::Both {
        out.extend(
            store
                .get_relations(None, Some(node), None, None, 0)
                .unwrap_or_default()
                .into_iter()
                .filter(|v| verb_types.is_none_or(|types| types.contains(&v.verb_type)))
                .map(|v| v.source_id),
        );
    }
    out
}

/// Find entities whose vector is nearest to an existing entity's, per spec
/// §4.H `similar`. Excludes the seed entity itself.
pub fn similar(store: &Store, id: Uuid, limit: usize, threshold: f32) -> Result<Vec<QueryResult>> {
    let Some(seed) = store.get(id, true)? else { return Ok(Vec::new()) };
    if seed.vector.is_empty() {
        return Ok(Vec::new());
    }
    let ranked = store.search_vectors(&seed.vector, limit + 1)?;
    let mut out = Vec::new();
    for (candidate_id, score) in ranked {
        if candidate_id == id || score < threshold {
            continue;
        }
        let Some(entity) = store.get(candidate_id, false)? else { continue };
        out.push(QueryResult {
            id: candidate_id,
            score,
            entity,
            text_score: None,
            semantic_score: Some(score),
            match_source: MatchSource::Vector,
            text_matches: None,
            explanation: None,
            cursor: None,
        });
        if out.len() >= limit {
            break;
        }
    }
    Ok(out)
}

fn filter_passes(entity: &Entity, entity_type: Option<NounType>, service: Option<&str>, connected: Option<&HashSet<Uuid>>) -> bool {
    if let Some(et) = entity_type {
        if entity.entity_type != et {
            return false;
        }
    }
    if let Some(svc) = service {
        if entity.service.as_deref() != Some(svc) {
            return false;
        }
    }
    if let Some(set) = connected {
        if !set.contains(&entity.id) {
            return false;
        }
    }
    true
}

fn simple_result(entity: Entity, match_source: MatchSource, explain: bool) -> QueryResult {
    QueryResult {
        id: entity.id,
        score: 1.0,
        text_score: None,
        semantic_score: None,
        match_source,
        text_matches: None,
        explanation: explain.then(|| "unfiltered scan, ordered by recency".to_string()),
        entity,
        cursor: None,
    }
}

fn page<T>(items: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit.max(1)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{EmbeddingError, EmbeddingModel};
    use crate::storage::MemoryAdapter;
    use crate::store::AddParams;
    use serde_json::json;
    use std::sync::Arc;

    struct StubEmbedder;
    impl EmbeddingModel for StubEmbedder {
        fn dimensions(&self) -> usize {
            4
        }
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            let seed = text.len() as f32;
            Ok(vec![seed, seed * 0.5, seed * 0.25, seed * 0.1])
        }
    }

    fn test_store() -> Store {
        Store::new(Arc::new(MemoryAdapter::new()), Arc::new(StubEmbedder)).unwrap()
    }

    #[test]
    fn empty_query_paginates_by_recency() {
        let store = test_store();
        for name in ["Alice", "Bob", "Carol"] {
            store.add(AddParams { data: Some(json!(name)), entity_type: "Person".into(), ..Default::default() }).unwrap();
        }
        let mut input = QueryInput::new();
        input.limit = 2;
        let results = find(&store, &input).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn where_clause_filters_by_metadata() {
        let store = test_store();
        let mut meta_active = crate::types::Metadata::new();
        meta_active.insert("status".into(), json!("active"));
        store
            .add(AddParams { data: Some(json!("x")), entity_type: "Task".into(), metadata: Some(meta_active), ..Default::default() })
            .unwrap();
        let mut meta_done = crate::types::Metadata::new();
        meta_done.insert("status".into(), json!("done"));
        store
            .add(AddParams { data: Some(json!("y")), entity_type: "Task".into(), metadata: Some(meta_done), ..Default::default() })
            .unwrap();

        let mut input = QueryInput::new();
        input.r#where = Some(json!({"status": "active"}));
        input.limit = 10;
        let results = find(&store, &input).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entity.metadata.get("status").unwrap(), "active");
    }

    #[test]
    fn text_query_matches_keyword_content() {
        let store = test_store();
        let mut meta = crate::types::Metadata::new();
        meta.insert("rawData".into(), json!("David Smith is a software engineer at Google"));
        store.add(AddParams { data: Some(json!("David Smith")), entity_type: "Person".into(), metadata: Some(meta), ..Default::default() }).unwrap();

        let mut input = QueryInput::new();
        input.query = Some("David Smith".into());
        input.limit = 10;
        let results = find(&store, &input).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn similar_excludes_seed_entity() {
        let store = test_store();
        let a = store.add(AddParams { data: Some(json!("aaa")), entity_type: "Concept".into(), ..Default::default() }).unwrap();
        store.add(AddParams { data: Some(json!("aaa")), entity_type: "Concept".into(), ..Default::default() }).unwrap();
        let results = similar(&store, a, 10, 0.0).unwrap();
        assert!(results.iter().all(|r| r.id != a));
    }

    #[test]
    fn connected_traversal_respects_depth_and_type() {
        use crate::store::RelateParams;
        use crate::types::VerbType;

        let store = test_store();
        let alice = store.add(AddParams { data: Some(json!("Alice")), entity_type: "Person".into(), ..Default::default() }).unwrap();
        let acme = store.add(AddParams { data: Some(json!("Acme")), entity_type: "Organization".into(), ..Default::default() }).unwrap();
        let hq = store.add(AddParams { data: Some(json!("HQ")), entity_type: "Location".into(), ..Default::default() }).unwrap();
        store.relate(RelateParams { from: alice, to: acme, verb_type: "MemberOf".into(), ..Default::default() }).unwrap();
        store.relate(RelateParams { from: acme, to: hq, verb_type: "PartOf".into(), ..Default::default() }).unwrap();

        let mut input = QueryInput::new();
        input.limit = 10;
        input.connected = Some(Connected { from: Some(alice), depth: 1, ..Connected::new() });
        let one_hop: HashSet<Uuid> = find(&store, &input).unwrap().into_iter().map(|r| r.id).collect();
        assert!(one_hop.contains(&acme));
        assert!(!one_hop.contains(&hq));

        input.connected = Some(Connected { from: Some(alice), depth: 2, ..Connected::new() });
        let two_hop: HashSet<Uuid> = find(&store, &input).unwrap().into_iter().map(|r| r.id).collect();
        assert!(two_hop.contains(&hq));

        input.connected =
            Some(Connected { from: Some(alice), depth: 2, verb_types: Some(vec![VerbType::MemberOf]), ..Connected::new() });
        let filtered: HashSet<Uuid> = find(&store, &input).unwrap().into_iter().map(|r| r.id).collect();
        assert!(filtered.contains(&acme));
        assert!(!filtered.contains(&hq));
    }

    #[test]
    fn near_radius_filters_by_cosine_distance() {
        let store = test_store();
        let seed = store.add(AddParams { data: Some(json!("aaa")), entity_type: "Concept".into(), ..Default::default() }).unwrap();
        store.add(AddParams { data: Some(json!("aaa")), entity_type: "Concept".into(), ..Default::default() }).unwrap();
        store.add(AddParams { data: Some(json!("a really different piece of text entirely")), entity_type: "Concept".into(), ..Default::default() }).unwrap();

        let mut input = QueryInput::new();
        input.near = Some(seed);
        input.radius = Some(0.01);
        input.limit = 10;
        input.threshold = 0.0;
        let results = find(&store, &input).unwrap();
        assert!(results.iter().all(|r| r.id != seed));
        assert!(!results.is_empty());
    }

    #[test]
    fn hybrid_alpha_shifts_weight_toward_vector() {
        let mut input = QueryInput::new();
        input.query = Some("hi".into());
        input.search_mode = SearchMode::Hybrid;
        input.hybrid_alpha = Some(0.9);
        let weights = effective_weights(&input);
        assert!(weights.vector > weights.text);
    }
}
