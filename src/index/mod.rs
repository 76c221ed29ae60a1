//! Vector search and metadata indexing (spec components E and G).

pub mod hnsw;
pub mod metadata;

pub use hnsw::{HnswIndex, VectorIndexConfig, VectorIndexStats, VectorSearchError};
pub use metadata::{FieldInferenceCache, FieldType, FieldTypeInference, TypeCounters};

/// Index-layer failure taxonomy, surfaced through the crate-level `Error`.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("vector index error: {0}")]
    Vector(#[from] VectorSearchError),
    #[error("index is unhealthy: {0}")]
    Unhealthy(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
