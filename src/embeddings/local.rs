//! Local semantic embeddings via fastembed (ONNX-based, 100% local).
//!
//! The embedding model is an external collaborator per the data model: its
//! only contract is `embed(text) -> f32[D]` / `embed_batch(text[]) -> f32[D][]`.
//! [`LocalEmbeddingModel`] is the default implementation of [`EmbeddingModel`];
//! callers may swap in their own.

use fastembed::{EmbeddingModel as FastembedModel, InitOptions, TextEmbedding};
use std::sync::{Mutex, OnceLock};

/// Default embedding width (BGE-small-en-v1.5 is natively 384-dimensional,
/// matching the specification's default).
pub const EMBEDDING_DIMENSIONS: usize = 384;

pub const MAX_TEXT_LENGTH: usize = 8192;
pub const BATCH_SIZE: usize = 32;

#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum EmbeddingError {
    ModelInit(String),
    EmbeddingFailed(String),
    InvalidInput(String),
}

impl std::fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingError::ModelInit(e) => write!(f, "model initialization failed: {e}"),
            EmbeddingError::EmbeddingFailed(e) => write!(f, "embedding generation failed: {e}"),
            EmbeddingError::InvalidInput(e) => write!(f, "invalid input: {e}"),
        }
    }
}

impl std::error::Error for EmbeddingError {}

/// Pure `text -> vector` contract. The core treats this as an external
/// collaborator; [`LocalEmbeddingModel`] is the bundled default.
pub trait EmbeddingModel: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

fn get_cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "graphite", "db") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().join(".cache/graphite-db/fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

/// fastembed-backed [`EmbeddingModel`] using BGE-small-en-v1.5 (384 dimensions).
pub struct LocalEmbeddingModel {
    model: OnceLock<Result<Mutex<TextEmbedding>, String>>,
}

impl Default for LocalEmbeddingModel {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEmbeddingModel {
    pub fn new() -> Self {
        Self { model: OnceLock::new() }
    }

    fn model(&self) -> Result<std::sync::MutexGuard<'_, TextEmbedding>, EmbeddingError> {
        let result = self.model.get_or_init(|| {
            let cache_dir = get_cache_dir();
            if let Err(e) = std::fs::create_dir_all(&cache_dir) {
                tracing::warn!(?cache_dir, error = %e, "failed to create fastembed cache dir");
            }
            let options = InitOptions::new(FastembedModel::BGESmallENV15)
                .with_show_download_progress(true)
                .with_cache_dir(cache_dir);
            TextEmbedding::try_new(options)
                .map(Mutex::new)
                .map_err(|e| format!("failed to initialize bge-small-en-v1.5: {e}"))
        });
        match result {
            Ok(model) => model.lock().map_err(|e| EmbeddingError::ModelInit(format!("lock poisoned: {e}"))),
            Err(err) => Err(EmbeddingError::ModelInit(err.clone())),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.model().is_ok()
    }
}

impl EmbeddingModel for LocalEmbeddingModel {
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }
        let mut model = self.model()?;
        let text = if text.len() > MAX_TEXT_LENGTH { &text[..MAX_TEXT_LENGTH] } else { text };
        let embeddings = model.embed(vec![text], None).map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("no embedding generated".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = self.model()?;
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> =
                chunk.iter().map(|t| if t.len() > MAX_TEXT_LENGTH { &t[..MAX_TEXT_LENGTH] } else { *t }).collect();
            let embeddings = model.embed(truncated, None).map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
            out.extend(embeddings);
        }
        Ok(out)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-4);
    }
}
