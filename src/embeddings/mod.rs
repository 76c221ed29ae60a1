//! Embedding model integration.
//!
//! The embedding model itself is an external collaborator per the
//! specification: its only contract is `embed(text) -> f32[D]` /
//! `embed_batch(text[]) -> f32[D][]`. This module defines that contract
//! ([`EmbeddingModel`]) plus the bundled local default backed by fastembed.

#[cfg(feature = "embeddings")]
mod local;

#[cfg(feature = "embeddings")]
pub use local::{cosine_similarity, EmbeddingError, EmbeddingModel, LocalEmbeddingModel, EMBEDDING_DIMENSIONS};

#[cfg(not(feature = "embeddings"))]
mod fallback {
    #[non_exhaustive]
    #[derive(Debug, Clone)]
    pub enum EmbeddingError {
        ModelInit(String),
        EmbeddingFailed(String),
        InvalidInput(String),
    }

    impl std::fmt::Display for EmbeddingError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }
    impl std::error::Error for EmbeddingError {}

    pub const EMBEDDING_DIMENSIONS: usize = 384;

    pub trait EmbeddingModel: Send + Sync {
        fn dimensions(&self) -> usize;
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }
    }

    #[inline]
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }
        let mut dot = 0.0_f32;
        let mut norm_a = 0.0_f32;
        let mut norm_b = 0.0_f32;
        for (x, y) in a.iter().zip(b.iter()) {
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }
        let denom = (norm_a * norm_b).sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

#[cfg(not(feature = "embeddings"))]
pub use fallback::{cosine_similarity, EmbeddingError, EmbeddingModel, EMBEDDING_DIMENSIONS};
