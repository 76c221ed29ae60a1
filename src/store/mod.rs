//! Entity & Verb Store (spec component D): typed CRUD wiring storage (A/B),
//! the HNSW index (E), graph adjacency (F), and the metadata/type index (G)
//! into one consistent write path.
//!
//! Writes to E/F/G are serialised through [`Store`]'s single write mutex, per
//! the specification's concurrency model (§5): a write is visible to readers
//! only after persistence, HNSW insert, adjacency update, and counter bump
//! have all completed.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use lru::LruCache;
use serde_json::Value;
use uuid::Uuid;

use crate::embeddings::EmbeddingModel;
use crate::graph::{Direction, GraphIndex};
use crate::index::{FieldInferenceCache, FieldTypeInference, HnswIndex, TypeCounters, VectorIndexConfig};
use crate::storage::{BlobStore, StorageAdapter};
use crate::types::{parse_uuid, Entity, Metadata, NounType, Verb, VerbType};
use crate::{Error, Result};

const ENTITY_PREFIX: &str = "entity/";
const VERB_PREFIX: &str = "verb/";
const FIELD_CACHE_KEY: &str = "meta/field_cache";

/// Capacity of the in-process query-embedding cache.
const EMBED_CACHE_CAPACITY: usize = 100;

fn entity_key(id: Uuid) -> String {
    format!("{ENTITY_PREFIX}{id}")
}

fn verb_key(id: Uuid) -> String {
    format!("{VERB_PREFIX}{id}")
}

/// Input to [`Store::add`].
#[derive(Default)]
pub struct AddParams {
    pub data: Option<Value>,
    pub entity_type: String,
    pub metadata: Option<Metadata>,
    pub vector: Option<Vec<f32>>,
    pub id: Option<String>,
    pub service: Option<String>,
}

pub struct UpdateParams {
    pub id: Uuid,
    pub data: Option<Value>,
    pub metadata: Option<Metadata>,
    pub vector: Option<Vec<f32>>,
    /// `true` deep-merges metadata; `false` replaces it wholesale.
    pub merge: bool,
}

#[derive(Default)]
pub struct RelateParams {
    pub from: Uuid,
    pub to: Uuid,
    pub verb_type: String,
    pub metadata: Option<Metadata>,
    pub bidirectional: bool,
}

/// Outcome of a batch write: successes preserve input order, failures carry
/// back the offending input alongside the error, per spec §4.D.
pub struct BatchResult<T> {
    pub successful: Vec<T>,
    pub failed: Vec<(usize, Error)>,
}

fn canonical_text(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn deep_merge(base: &mut Metadata, incoming: Metadata) {
    for (k, v) in incoming {
        match (base.get_mut(&k), v) {
            (Some(Value::Object(existing)), Value::Object(new)) => deep_merge(existing, new),
            (_, v) => {
                base.insert(k, v);
            }
        }
    }
}

pub struct Store {
    adapter: Arc<dyn StorageAdapter>,
    blob: BlobStore,
    embedder: Arc<dyn EmbeddingModel>,
    hnsw: RwLock<HnswIndex>,
    graph: GraphIndex,
    counters: TypeCounters,
    /// Dimension established by the first vector ever written; subsequent
    /// writes must match or be rejected (spec §3 invariant).
    dimensions: OnceLock<usize>,
    /// Query-text -> embedding vector, so repeated `find`/`similar` calls
    /// with the same text don't re-run the embedding model.
    embed_cache: Mutex<LruCache<String, Vec<f32>>>,
    /// Per-field type inference, persisted across restarts (spec §4.G).
    field_cache: FieldInferenceCache,
    write_lock: Mutex<()>,
    closed: std::sync::atomic::AtomicBool,
}

impl Store {
    pub fn new(adapter: Arc<dyn StorageAdapter>, embedder: Arc<dyn EmbeddingModel>) -> Result<Self> {
        let store = Self::new_without_rebuild(adapter, embedder)?;
        store.rebuild_from_storage()?;
        Ok(store)
    }

    /// Opens storage without the cold-start rescan that reconstructs the
    /// HNSW index, graph adjacency, and type counters. The indices start
    /// empty; a caller that opts into this must repopulate them out of band.
    pub fn new_without_rebuild(adapter: Arc<dyn StorageAdapter>, embedder: Arc<dyn EmbeddingModel>) -> Result<Self> {
        adapter.init()?;
        let config = VectorIndexConfig { dimensions: embedder.dimensions(), ..Default::default() };
        Ok(Self {
            blob: BlobStore::new(adapter.clone()),
            adapter,
            embedder,
            hnsw: RwLock::new(HnswIndex::with_config(config).map_err(crate::index::IndexError::Vector)?),
            graph: GraphIndex::new(),
            counters: TypeCounters::new(),
            dimensions: OnceLock::new(),
            embed_cache: Mutex::new(LruCache::new(NonZeroUsize::new(EMBED_CACHE_CAPACITY).unwrap())),
            field_cache: FieldInferenceCache::new(),
            write_lock: Mutex::new(()),
            closed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Reloads the persisted field-type inference cache, if one was written
    /// by a previous `close()`. Silently skipped on first open.
    fn load_field_cache(&self) -> Result<()> {
        if let Some(bytes) = self.adapter.get(FIELD_CACHE_KEY)? {
            let value: Value = from_json_bytes(&bytes)?;
            self.field_cache.load_from_json(&value);
        }
        Ok(())
    }

    /// Folds an entity's metadata fields into the field-type inference
    /// cache, seeding each field's inferred type on first sight.
    fn learn_field_types(&self, metadata: &Metadata) {
        for (field, value) in metadata.iter() {
            self.field_cache.get_or_infer(field, std::slice::from_ref(value));
        }
    }

    /// Looks up the cached type inference for a metadata field, if any
    /// entity has supplied a value for it yet.
    pub fn field_type(&self, field: &str) -> Option<FieldTypeInference> {
        self.field_cache.get(field)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Cold-start reconstruction: rescans every persisted entity and verb to
    /// rebuild the HNSW index, graph adjacency, and type counters.
    fn rebuild_from_storage(&self) -> Result<()> {
        self.load_field_cache()?;
        let entities_page = self.adapter.list(ENTITY_PREFIX, None, None)?;
        let mut entries = Vec::new();
        let mut hnsw = self.hnsw.write().unwrap();
        for key in &entities_page.keys {
            let Some(bytes) = self.adapter.get(key)? else { continue };
            let entity: Entity = from_json_bytes(&bytes)?;
            if !entity.vector.is_empty() {
                if self.dimensions.get().is_none() {
                    let _ = self.dimensions.set(entity.vector.len());
                }
                entries.push((entity.id.to_string(), entity.vector.clone()));
            }
            let is_vfs = entity.metadata.contains_key("vfsType");
            self.counters.increment(entity.entity_type, is_vfs);
            self.learn_field_types(&entity.metadata);
        }
        hnsw.rebuild(entries).map_err(crate::index::IndexError::Vector)?;
        drop(hnsw);

        let verbs_page = self.adapter.list(VERB_PREFIX, None, None)?;
        let mut verbs = Vec::new();
        for key in &verbs_page.keys {
            if let Some(bytes) = self.adapter.get(key)? {
                verbs.push(from_json_bytes::<Verb>(&bytes)?);
            }
        }
        self.graph.rebuild(verbs)?;
        Ok(())
    }

    fn embed_if_needed(&self, data: Option<&Value>, vector: Option<Vec<f32>>) -> Result<Vec<f32>> {
        if let Some(v) = vector {
            return Ok(v);
        }
        match data {
            Some(d) => self
                .embedder
                .embed(&canonical_text(d))
                .map_err(|e| Error::Embedding(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    /// Pins the dimension invariant before any vector has been written.
    /// Fails if a different dimension was already established (e.g. by a
    /// cold-start rebuild that found existing vectors).
    pub fn pin_dimensions(&self, dimensions: usize) -> Result<()> {
        let actual = *self.dimensions.get_or_init(|| dimensions);
        if actual != dimensions {
            return Err(Error::DimensionMismatch { expected: actual, actual: dimensions });
        }
        Ok(())
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Ok(());
        }
        let expected = *self.dimensions.get_or_init(|| vector.len());
        if vector.len() != expected {
            return Err(Error::DimensionMismatch { expected, actual: vector.len() });
        }
        Ok(())
    }

    /// Add an entity. Validation: null/empty `data` when no vector is given,
    /// unknown `type`, and dimension mismatch are fatal; a custom `id` that
    /// already exists overwrites (documented, not a conflict).
    pub fn add(&self, params: AddParams) -> Result<Uuid> {
        self.check_open()?;
        let entity_type = NounType::parse(&params.entity_type)
            .ok_or_else(|| Error::invalid(format!("unknown entity type: {}", params.entity_type)))?;

        if params.vector.is_none() {
            match &params.data {
                None => return Err(Error::invalid("data is required when vector is not supplied")),
                Some(Value::String(s)) if s.is_empty() => {
                    return Err(Error::invalid("data must not be an empty string"))
                }
                Some(Value::Null) => return Err(Error::invalid("data must not be null")),
                _ => {}
            }
        }

        let id = match params.id {
            Some(s) => parse_uuid(&s)?,
            None => Uuid::new_v4(),
        };

        let vector = self.embed_if_needed(params.data.as_ref(), params.vector)?;
        self.check_dimensions(&vector)?;

        let mut metadata = params.metadata.unwrap_or_default();
        if let Some(data) = &params.data {
            metadata.entry("data").or_insert_with(|| data.clone());
        }

        let now = Entity::now_ms();
        let entity = Entity {
            id,
            entity_type,
            vector: vector.clone(),
            metadata,
            service: params.service,
            created_at: now,
            updated_at: now,
        };

        let _guard = self.write_lock.lock().unwrap();
        let previous = self.adapter.get(&entity_key(id))?;
        self.persist_entity(&entity)?;
        if !vector.is_empty() {
            self.hnsw
                .write()
                .unwrap()
                .add(&id.to_string(), &vector)
                .map_err(crate::index::IndexError::Vector)?;
        }
        if let Some(bytes) = previous {
            let old: Entity = from_json_bytes(&bytes)?;
            let old_is_vfs = old.metadata.contains_key("vfsType");
            self.counters.decrement(old.entity_type, old_is_vfs);
        }
        let is_vfs = entity.metadata.contains_key("vfsType");
        self.counters.increment(entity_type, is_vfs);
        self.learn_field_types(&entity.metadata);
        Ok(id)
    }

    fn persist_entity(&self, entity: &Entity) -> Result<()> {
        let bytes = to_json_bytes(entity)?;
        self.adapter.put(&entity_key(entity.id), &bytes)?;
        Ok(())
    }

    pub fn add_many(&self, items: Vec<AddParams>) -> BatchResult<Uuid> {
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            match self.add(item) {
                Ok(id) => successful.push(id),
                Err(e) => failed.push((i, e)),
            }
        }
        BatchResult { successful, failed }
    }

    /// `includeVectors` defaults to false (omit vector bytes for speed).
    pub fn get(&self, id: Uuid, include_vectors: bool) -> Result<Option<Entity>> {
        self.check_open()?;
        let Some(bytes) = self.adapter.get(&entity_key(id))? else { return Ok(None) };
        let mut entity: Entity = from_json_bytes(&bytes)?;
        if !include_vectors {
            entity.vector.clear();
        }
        Ok(Some(entity))
    }

    pub fn update(&self, params: UpdateParams) -> Result<Entity> {
        self.check_open()?;
        let _guard = self.write_lock.lock().unwrap();
        let Some(bytes) = self.adapter.get(&entity_key(params.id))? else {
            return Err(Error::not_found(format!("entity {} not found", params.id)));
        };
        let mut entity: Entity = from_json_bytes(&bytes)?;

        if let Some(metadata) = params.metadata {
            if params.merge {
                deep_merge(&mut entity.metadata, metadata);
            } else {
                entity.metadata = metadata;
            }
        }

        if params.vector.is_some() || params.data.is_some() {
            let vector = self.embed_if_needed(params.data.as_ref(), params.vector)?;
            self.check_dimensions(&vector)?;
            if !vector.is_empty() {
                self.hnsw
                    .write()
                    .unwrap()
                    .add(&entity.id.to_string(), &vector)
                    .map_err(crate::index::IndexError::Vector)?;
            }
            entity.vector = vector;
            if let Some(data) = &params.data {
                entity.metadata.insert("data".to_string(), data.clone());
            }
        }

        entity.updated_at = Entity::now_ms();
        self.persist_entity(&entity)?;
        self.learn_field_types(&entity.metadata);
        Ok(entity)
    }

    pub fn update_many(&self, items: Vec<UpdateParams>) -> BatchResult<Entity> {
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            match self.update(item) {
                Ok(e) => successful.push(e),
                Err(e) => failed.push((i, e)),
            }
        }
        BatchResult { successful, failed }
    }

    /// Idempotent: deleting a missing entity is a no-op, not an error.
    pub fn delete(&self, id: Uuid) -> Result<()> {
        self.check_open()?;
        let _guard = self.write_lock.lock().unwrap();
        let Some(bytes) = self.adapter.get(&entity_key(id))? else { return Ok(()) };
        let entity: Entity = from_json_bytes(&bytes)?;

        self.adapter.delete(&entity_key(id))?;
        if !entity.vector.is_empty() {
            let _ = self.hnsw.write().unwrap().remove(&id.to_string());
        }
        for verb_id in self.graph.get_verb_ids_by_source(id, None, 0) {
            self.adapter.delete(&verb_key(verb_id))?;
        }
        for verb_id in self.graph.get_verb_ids_by_target(id, None, 0) {
            self.adapter.delete(&verb_key(verb_id))?;
        }
        self.graph.remove_node(id);
        let is_vfs = entity.metadata.contains_key("vfsType");
        self.counters.decrement(entity.entity_type, is_vfs);
        Ok(())
    }

    pub fn delete_many(&self, ids: Vec<Uuid>) -> BatchResult<Uuid> {
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        for (i, id) in ids.into_iter().enumerate() {
            match self.delete(id) {
                Ok(()) => successful.push(id),
                Err(e) => failed.push((i, e)),
            }
        }
        BatchResult { successful, failed }
    }

    /// Wipe entities and/or relations wholesale. Used by test fixtures and
    /// by callers resetting a database in place rather than reopening it.
    pub fn clear(&self, entities: bool, relations: bool) -> Result<()> {
        self.check_open()?;
        let _guard = self.write_lock.lock().unwrap();
        if relations {
            let verbs_page = self.adapter.list(VERB_PREFIX, None, None)?;
            for key in &verbs_page.keys {
                self.adapter.delete(key)?;
            }
            self.graph.rebuild(Vec::new())?;
        }
        if entities {
            let entities_page = self.adapter.list(ENTITY_PREFIX, None, None)?;
            for key in &entities_page.keys {
                self.adapter.delete(key)?;
            }
            self.hnsw.write().unwrap().rebuild(Vec::new()).map_err(crate::index::IndexError::Vector)?;
            self.counters.reset();
        }
        Ok(())
    }

    /// Idempotent on `(from, to, type)`. A second `relate` with the same
    /// triple returns the existing verb's id.
    pub fn relate(&self, params: RelateParams) -> Result<Uuid> {
        self.check_open()?;
        let verb_type = VerbType::parse(&params.verb_type)
            .ok_or_else(|| Error::invalid(format!("unknown verb type: {}", params.verb_type)))?;

        let _guard = self.write_lock.lock().unwrap();
        if self.adapter.get(&entity_key(params.from))?.is_none() {
            return Err(Error::not_found(format!("entity {} not found", params.from)));
        }
        if self.adapter.get(&entity_key(params.to))?.is_none() {
            return Err(Error::not_found(format!("entity {} not found", params.to)));
        }

        if let Some(existing) = self.graph.find_duplicate(params.from, params.to, verb_type) {
            return Ok(existing);
        }

        let verb = Verb {
            id: Uuid::new_v4(),
            source_id: params.from,
            target_id: params.to,
            verb_type,
            metadata: params.metadata.unwrap_or_default(),
            bidirectional: params.bidirectional,
        };
        let bytes = to_json_bytes(&verb)?;
        self.adapter.put(&verb_key(verb.id), &bytes)?;
        Ok(self.graph.add_verb(verb))
    }

    pub fn relate_many(&self, items: Vec<RelateParams>) -> BatchResult<Uuid> {
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            match self.relate(item) {
                Ok(id) => successful.push(id),
                Err(e) => failed.push((i, e)),
            }
        }
        BatchResult { successful, failed }
    }

    /// No-op if the verb id doesn't exist.
    pub fn unrelate(&self, verb_id: Uuid) -> Result<()> {
        self.check_open()?;
        let _guard = self.write_lock.lock().unwrap();
        self.adapter.delete(&verb_key(verb_id))?;
        self.graph.remove_verb(verb_id);
        Ok(())
    }

    /// `from` and `to` both set is an exact-edge lookup.
    pub fn get_relations(
        &self,
        from: Option<Uuid>,
        to: Option<Uuid>,
        verb_type: Option<VerbType>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Verb>> {
        self.check_open()?;
        let ids: Vec<Uuid> = match (from, to) {
            (Some(f), Some(t)) => self
                .graph
                .get_verb_ids_by_source(f, None, 0)
                .into_iter()
                .filter(|id| self.graph.get_verb(*id).map(|v| v.target_id) == Some(t))
                .collect(),
            (Some(f), None) => self.graph.get_verb_ids_by_source(f, limit, offset),
            (None, Some(t)) => self.graph.get_verb_ids_by_target(t, limit, offset),
            (None, None) => Vec::new(),
        };
        Ok(ids
            .into_iter()
            .filter_map(|id| self.graph.get_verb(id))
            .filter(|v| verb_type.is_none_or(|t| v.verb_type == t))
            .collect())
    }

    pub fn get_neighbors(&self, id: Uuid, direction: Direction, limit: Option<usize>, offset: usize) -> Vec<Uuid> {
        self.graph.get_neighbors(id, direction, limit, offset)
    }

    pub fn counts_entities(&self) -> i64 {
        self.counters.total()
    }

    pub fn counts_by_type(&self, exclude_vfs: bool) -> std::collections::HashMap<String, i64> {
        self.counters.by_type(exclude_vfs)
    }

    pub fn search_vectors(&self, query: &[f32], limit: usize) -> Result<Vec<(Uuid, f32)>> {
        let results = self
            .hnsw
            .read()
            .unwrap()
            .search(query, limit)
            .map_err(crate::index::IndexError::Vector)?;
        Ok(results.into_iter().filter_map(|(k, s)| Uuid::parse_str(&k).ok().map(|id| (id, s))).collect())
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.embed_cache.lock().unwrap().get(text) {
            return Ok(cached.clone());
        }
        let vector = self.embedder.embed(text).map_err(|e| Error::Embedding(e.to_string()))?;
        self.embed_cache.lock().unwrap().put(text.to_string(), vector.clone());
        Ok(vector)
    }

    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embedder.embed_batch(texts).map_err(|e| Error::Embedding(e.to_string()))
    }

    pub fn hnsw_config(&self) -> VectorIndexConfig {
        VectorIndexConfig { dimensions: self.dimensions.get().copied().unwrap_or(self.embedder.dimensions()), ..Default::default() }
    }

    /// Waits for outstanding writes (acquiring then releasing the write
    /// lock), flushes storage, and marks the store closed; any write
    /// arriving afterward fails with `Closed`.
    pub fn close(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let bytes = to_json_bytes(&self.field_cache.to_json())?;
        self.adapter.put(FIELD_CACHE_KEY, &bytes)?;
        self.adapter.close()?;
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    /// Full entity scan, for the query engine's metadata/text phases. Not
    /// for the hot path: callers that only need vector proximity should use
    /// [`Store::search_vectors`] instead.
    pub fn scan_entities(&self) -> Result<Vec<Entity>> {
        self.check_open()?;
        let page = self.adapter.list(ENTITY_PREFIX, None, None)?;
        page.keys
            .iter()
            .filter_map(|key| self.adapter.get(key).transpose())
            .map(|bytes| from_json_bytes(&bytes?))
            .collect()
    }

    pub fn graph_ref(&self) -> &GraphIndex {
        &self.graph
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blob
    }
}

fn to_json_bytes<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Storage(crate::storage::StorageError::Serialization(e.to_string())))
}

fn from_json_bytes<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Storage(crate::storage::StorageError::Serialization(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingError;
    use crate::storage::MemoryAdapter;

    struct StubEmbedder;
    impl EmbeddingModel for StubEmbedder {
        fn dimensions(&self) -> usize {
            4
        }
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            let seed = text.len() as f32;
            Ok(vec![seed, seed * 2.0, seed * 3.0, seed * 4.0])
        }
    }

    fn test_store() -> Store {
        Store::new(Arc::new(MemoryAdapter::new()), Arc::new(StubEmbedder)).unwrap()
    }

    #[test]
    fn add_get_delete_round_trip() {
        let store = test_store();
        let id = store
            .add(AddParams { data: Some(Value::String("Python".into())), entity_type: "Concept".into(), ..Default::default() })
            .unwrap();
        let entity = store.get(id, false).unwrap().unwrap();
        assert_eq!(entity.metadata.get("data"), Some(&Value::String("Python".into())));
        store.delete(id).unwrap();
        assert!(store.get(id, false).unwrap().is_none());
    }

    #[test]
    fn type_counts_exclude_vfs_when_asked() {
        let store = test_store();
        for _ in 0..2 {
            store.add(AddParams { data: Some(Value::String("x".into())), entity_type: "Person".into(), ..Default::default() }).unwrap();
        }
        for _ in 0..3 {
            store.add(AddParams { data: Some(Value::String("y".into())), entity_type: "Concept".into(), ..Default::default() }).unwrap();
        }
        let counts = store.counts_by_type(true);
        assert_eq!(counts.get("Person"), Some(&2));
        assert_eq!(counts.get("Concept"), Some(&3));
    }

    #[test]
    fn overwriting_an_entity_with_a_different_type_keeps_counters_accurate() {
        let store = test_store();
        let id = Uuid::new_v4();
        store
            .add(AddParams {
                data: Some(Value::String("x".into())),
                entity_type: "Person".into(),
                id: Some(id.to_string()),
                ..Default::default()
            })
            .unwrap();
        store
            .add(AddParams {
                data: Some(Value::String("y".into())),
                entity_type: "Concept".into(),
                id: Some(id.to_string()),
                ..Default::default()
            })
            .unwrap();
        let counts = store.counts_by_type(false);
        assert_eq!(counts.get("Person"), None);
        assert_eq!(counts.get("Concept"), Some(&1));
        assert_eq!(store.counts_entities(), 1);
    }

    #[test]
    fn field_type_cache_survives_close_and_reopen() {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = Store::new(adapter.clone(), Arc::new(StubEmbedder)).unwrap();
        let mut meta = Metadata::new();
        meta.insert("extractedAt".to_string(), Value::from(1_700_000_000_000i64));
        store
            .add(AddParams { data: Some(Value::String("x".into())), entity_type: "Document".into(), metadata: Some(meta), ..Default::default() })
            .unwrap();
        assert_eq!(store.field_type("extractedAt").map(|i| i.field_type), Some(crate::index::FieldType::TimestampMs));
        store.close().unwrap();

        let reopened = Store::new(adapter, Arc::new(StubEmbedder)).unwrap();
        assert_eq!(reopened.field_type("extractedAt").map(|i| i.field_type), Some(crate::index::FieldType::TimestampMs));
    }

    #[test]
    fn idempotent_relate_returns_same_id() {
        let store = test_store();
        let alice = store.add(AddParams { data: Some(Value::String("Alice".into())), entity_type: "Person".into(), ..Default::default() }).unwrap();
        let acme = store.add(AddParams { data: Some(Value::String("Acme".into())), entity_type: "Organization".into(), ..Default::default() }).unwrap();
        let v1 = store.relate(RelateParams { from: alice, to: acme, verb_type: "MemberOf".into(), ..Default::default() }).unwrap();
        let v2 = store.relate(RelateParams { from: alice, to: acme, verb_type: "MemberOf".into(), ..Default::default() }).unwrap();
        assert_eq!(v1, v2);
        assert_eq!(store.get_relations(Some(alice), None, None, None, 0).unwrap().len(), 1);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let store = test_store();
        let err = store.add(AddParams { data: Some(Value::String("x".into())), entity_type: "NotAType".into(), ..Default::default() });
        assert!(err.is_err());
    }

    #[test]
    fn dimension_mismatch_rejected_on_second_write() {
        let store = test_store();
        store
            .add(AddParams { vector: Some(vec![1.0, 2.0, 3.0, 4.0]), entity_type: "Concept".into(), ..Default::default() })
            .unwrap();
        let err = store.add(AddParams { vector: Some(vec![1.0, 2.0]), entity_type: "Concept".into(), ..Default::default() });
        assert!(matches!(err, Err(Error::DimensionMismatch { expected: 4, actual: 2 })));
    }

    #[test]
    fn writes_after_close_fail() {
        let store = test_store();
        store.close().unwrap();
        let err = store.add(AddParams { data: Some(Value::String("x".into())), entity_type: "Concept".into(), ..Default::default() });
        assert!(matches!(err, Err(Error::Closed)));
    }

    #[test]
    fn repeated_embed_calls_hit_the_cache() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingEmbedder(AtomicUsize);
        impl EmbeddingModel for CountingEmbedder {
            fn dimensions(&self) -> usize {
                4
            }
            fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                let seed = text.len() as f32;
                Ok(vec![seed; 4])
            }
        }

        let embedder = Arc::new(CountingEmbedder(AtomicUsize::new(0)));
        let store = Store::new(Arc::new(MemoryAdapter::new()), embedder.clone()).unwrap();
        let v1 = store.embed("hello world").unwrap();
        let v2 = store.embed("hello world").unwrap();
        assert_eq!(v1, v2);
        assert_eq!(embedder.0.load(Ordering::SeqCst), 1, "second call should hit the cache");
    }
}
