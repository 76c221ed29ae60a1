//! # graphite-db
//!
//! An embeddable vector-plus-graph knowledge database: typed entities
//! ("nouns") and relationships ("verbs"), a native HNSW vector index, graph
//! adjacency traversal, a hybrid query engine fusing vector/text/metadata/
//! graph signals, a durable LSM-tree-backed filesystem adapter, and a
//! POSIX-like virtual filesystem layered over the entity graph.
//!
//! ```rust,no_run
//! use graphite_db::{Database, Config};
//!
//! # fn main() -> graphite_db::Result<()> {
//! let db = Database::init(Config::in_memory())?;
//! let id = db.add(graphite_db::AddParams {
//!     data: Some(serde_json::json!("Python")),
//!     entity_type: "Concept".into(),
//!     ..Default::default()
//! })?;
//! let entity = db.get(id, false)?.unwrap();
//! assert_eq!(entity.metadata.get("data"), Some(&serde_json::json!("Python")));
//! db.close()?;
//! # Ok(())
//! # }
//! ```

pub mod embeddings;
pub mod error;
pub mod graph;
pub mod index;
pub mod plugins;
pub mod query;
pub mod storage;
pub mod store;
pub mod types;
pub mod vfs;

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

pub use error::{Error, Result};
pub use query::{find, similar, Granularity, MatchSource, MatchType, QueryInput, QueryResult, Span};
pub use store::{AddParams, BatchResult, RelateParams, UpdateParams};
pub use types::{Entity, Metadata, NounType, Verb, VerbType};
pub use vfs::{BulkOp, DirEntry, SemanticPath, Vfs, VfsError};

use embeddings::EmbeddingModel;
use graph::Direction;
use plugins::{Plugin, PluginRegistry};
use storage::{FilesystemAdapter, MemoryAdapter, StorageAdapter};
use store::Store;

/// Which storage backend to open. Object-store variants (`gcs`/`s3`/`r2`/
/// `azure`) are wired in by a `storage:<name>` plugin implementing
/// [`StorageAdapter`]; the core ships `Memory` and `Filesystem`.
pub enum StorageConfig {
    Memory,
    Filesystem { path: PathBuf },
}

/// Optional cross-cutting layers the constructor may enable. The core
/// always logs structurally via `tracing` regardless of these flags; they
/// gate opt-in extras (a query cache, metrics counters, pretty console
/// output, a background health monitor).
#[derive(Debug, Clone, Copy, Default)]
pub struct Augmentations {
    pub cache: bool,
    pub metrics: bool,
    pub display: bool,
    pub monitoring: bool,
}

/// Constructor configuration, per the specification's external interface.
pub struct Config {
    pub storage: StorageConfig,
    /// Overrides the bundled local embedding model. Required when the
    /// `embeddings` feature is disabled.
    pub embedding_model: Option<Arc<dyn EmbeddingModel>>,
    /// Pins the dimension invariant (spec §3) before any vector is ever
    /// written, so a mismatched `embedding_model` or caller-supplied vector
    /// is rejected at the first write instead of silently establishing
    /// whatever dimension happens to arrive first.
    pub embedding_dimensions: Option<usize>,
    pub silent: bool,
    pub disable_auto_rebuild: bool,
    pub plugins: Vec<Box<dyn Plugin>>,
    pub augmentations: Augmentations,
}

impl Config {
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig::Memory,
            embedding_model: None,
            embedding_dimensions: None,
            silent: false,
            disable_auto_rebuild: false,
            plugins: Vec::new(),
            augmentations: Augmentations::default(),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>) -> Self {
        Self { storage: StorageConfig::Filesystem { path: path.into() }, ..Self::in_memory() }
    }
}

/// The top-level handle: wires storage, the HNSW/graph/metadata indices
/// (via [`Store`]), the plugin registry, and the VFS namespace into the
/// public API surface described by the specification.
pub struct Database {
    store: Store,
    plugins: PluginRegistry,
}

impl Database {
    /// Opens (or creates) the database. Cold-starts the HNSW index and
    /// graph adjacency from persisted entities/verbs unless
    /// `disable_auto_rebuild` is set, in which case they start empty and a
    /// caller must repopulate them explicitly (used by tooling that
    /// rebuilds indices out of band).
    pub fn init(config: Config) -> Result<Self> {
        let adapter: Arc<dyn StorageAdapter> = match config.storage {
            StorageConfig::Memory => Arc::new(MemoryAdapter::new()),
            StorageConfig::Filesystem { path } => Arc::new(FilesystemAdapter::open(path)?),
        };
        let embedder: Arc<dyn EmbeddingModel> = match config.embedding_model {
            Some(m) => m,
            #[cfg(feature = "embeddings")]
            None => Arc::new(embeddings::LocalEmbeddingModel::new()),
            #[cfg(not(feature = "embeddings"))]
            None => {
                return Err(Error::invalid(
                    "no embedding_model supplied and the `embeddings` feature is disabled",
                ))
            }
        };

        let store = if config.disable_auto_rebuild {
            Store::new_without_rebuild(adapter, embedder)?
        } else {
            Store::new(adapter, embedder)?
        };
        if let Some(dimensions) = config.embedding_dimensions {
            store.pin_dimensions(dimensions)?;
        }

        let plugins = PluginRegistry::new();
        for plugin in config.plugins {
            plugins.register(plugin);
        }
        let db = Self { store, plugins };
        db.vfs().ensure_root()?;
        if !config.silent {
            tracing::info!("graphite-db initialized");
        }
        Ok(db)
    }

    pub fn close(&self) -> Result<()> {
        self.plugins.deactivate_all();
        self.store.close()
    }

    pub fn r#use(&self, plugin: Box<dyn Plugin>) {
        self.plugins.register(plugin);
        self.plugins.activate_all();
    }

    pub fn get_active_plugins(&self) -> Vec<String> {
        self.plugins.get_active_plugins()
    }

    // ---- Data --------------------------------------------------------

    pub fn add(&self, params: AddParams) -> Result<Uuid> {
        self.store.add(params)
    }

    pub fn add_many(&self, items: Vec<AddParams>) -> BatchResult<Uuid> {
        self.store.add_many(items)
    }

    pub fn get(&self, id: Uuid, include_vectors: bool) -> Result<Option<Entity>> {
        self.store.get(id, include_vectors)
    }

    pub fn update(&self, params: UpdateParams) -> Result<Entity> {
        self.store.update(params)
    }

    pub fn update_many(&self, items: Vec<UpdateParams>) -> BatchResult<Entity> {
        self.store.update_many(items)
    }

    pub fn delete(&self, id: Uuid) -> Result<()> {
        self.store.delete(id)
    }

    pub fn delete_many(&self, ids: Vec<Uuid>) -> BatchResult<Uuid> {
        self.store.delete_many(ids)
    }

    pub fn clear(&self, entities: bool, relations: bool) -> Result<()> {
        self.store.clear(entities, relations)
    }

    // ---- Graph ---------------------------------------------------------

    pub fn relate(&self, params: RelateParams) -> Result<Uuid> {
        self.store.relate(params)
    }

    pub fn relate_many(&self, items: Vec<RelateParams>) -> BatchResult<Uuid> {
        self.store.relate_many(items)
    }

    pub fn unrelate(&self, verb_id: Uuid) -> Result<()> {
        self.store.unrelate(verb_id)
    }

    pub fn get_relations(
        &self,
        from: Option<Uuid>,
        to: Option<Uuid>,
        verb_type: Option<VerbType>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Verb>> {
        self.store.get_relations(from, to, verb_type, limit, offset)
    }

    pub fn get_neighbors(&self, id: Uuid, direction: Direction, limit: Option<usize>, offset: usize) -> Vec<Uuid> {
        self.store.get_neighbors(id, direction, limit, offset)
    }

    // ---- Query -----------------------------------------------------------

    pub fn find(&self, input: &QueryInput) -> Result<Vec<QueryResult>> {
        query::find(&self.store, input)
    }

    pub fn similar(&self, to: Uuid, limit: usize, threshold: f32) -> Result<Vec<QueryResult>> {
        query::similar(&self.store, to, limit, threshold)
    }

    /// Highlights exact-token matches for `query_text` against `text`, plus
    /// semantic spans: each `granularity` chunk of `text` is embedded and
    /// compared to `query_text`'s embedding, so a paraphrase that shares no
    /// tokens with the query can still surface as a `MatchType::Semantic`
    /// span above `threshold`.
    pub fn highlight(
        &self,
        query_text: &str,
        text: &str,
        granularity: Granularity,
        threshold: f32,
        content_type: Option<query::highlight::ContentType>,
    ) -> Result<Vec<Span>> {
        let query_vector = self.store.embed(query_text)?;
        let candidates = query::highlight::candidate_spans(text, granularity, content_type);
        let mut semantic_spans = Vec::with_capacity(candidates.len());
        for (start, end, snippet) in candidates {
            if snippet.trim().is_empty() {
                continue;
            }
            let span_vector = self.store.embed(&snippet)?;
            let score = index::hnsw::cosine_similarity(&query_vector, &span_vector);
            semantic_spans.push((start, end, score));
        }
        Ok(query::highlight::highlight(query_text, text, granularity, threshold, content_type, &semantic_spans))
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.store.embed(text)
    }

    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.store.embed_batch(texts)
    }

    // ---- Counts ------------------------------------------------------

    pub fn counts_entities(&self) -> i64 {
        self.store.counts_entities()
    }

    pub fn counts_by_type(&self, exclude_vfs: bool) -> std::collections::HashMap<String, i64> {
        self.store.counts_by_type(exclude_vfs)
    }

    /// The inferred type (and bucket size, for temporal fields) of a
    /// metadata field, learned from values seen across every `add`/`update`
    /// so far and persisted across restarts (spec §4.G).
    pub fn field_type(&self, field: &str) -> Option<index::FieldTypeInference> {
        self.store.field_type(field)
    }

    // ---- VFS -----------------------------------------------------------

    /// Borrowed handle onto the filesystem namespace layered over this
    /// database's entities and `Contains` edges.
    pub fn vfs(&self) -> Vfs<'_> {
        Vfs::new(&self.store)
    }
}

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        AddParams, Augmentations, BatchResult, Config, Database, Entity, Error, Metadata,
        NounType, QueryInput, QueryResult, RelateParams, Result, StorageConfig, UpdateParams,
        Verb, VerbType, Vfs,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use embeddings::EmbeddingError;
    use serde_json::json;

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

    fn stub_config() -> Config {
        Config { embedding_model: Some(Arc::new(StubEmbedder)), ..Config::in_memory() }
    }

    fn stub_config_fs(path: impl Into<PathBuf>) -> Config {
        Config { embedding_model: Some(Arc::new(StubEmbedder)), ..Config::filesystem(path) }
    }

    #[test]
    fn add_get_delete_round_trip() {
        let db = Database::init(stub_config()).unwrap();
        let id = db.add(AddParams { data: Some(json!("Python")), entity_type: "Concept".into(), ..Default::default() }).unwrap();
        let entity = db.get(id, false).unwrap().unwrap();
        assert_eq!(entity.metadata.get("data"), Some(&json!("Python")));
        db.delete(id).unwrap();
        assert!(db.get(id, false).unwrap().is_none());
    }

    #[test]
    fn type_counts_seed_scenario() {
        let db = Database::init(stub_config()).unwrap();
        for _ in 0..2 {
            db.add(AddParams { data: Some(json!("p")), entity_type: "Person".into(), ..Default::default() }).unwrap();
        }
        for _ in 0..3 {
            db.add(AddParams { data: Some(json!("c")), entity_type: "Concept".into(), ..Default::default() }).unwrap();
        }
        let counts = db.counts_by_type(true);
        assert_eq!(counts.get("Person"), Some(&2));
        assert_eq!(counts.get("Concept"), Some(&3));
    }

    #[test]
    fn vfs_survives_close_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::init(stub_config_fs(dir.path())).unwrap();
            db.vfs().write_file("/notes/todo.txt", b"buy milk").unwrap();
            db.close().unwrap();
        }
        let db = Database::init(stub_config_fs(dir.path())).unwrap();
        assert_eq!(db.vfs().read_file("/notes/todo.txt").unwrap(), b"buy milk");
    }

    #[test]
    fn find_with_empty_store_returns_empty() {
        let db = Database::init(stub_config()).unwrap();
        let results = db.find(&QueryInput { entity_type: Some("Concept".into()), ..QueryInput::new() }).unwrap();
        assert!(results.is_empty());
    }
}
