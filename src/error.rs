//! Crate-wide error taxonomy
//!
//! Each subsystem (storage, HNSW index, graph adjacency, query engine, VFS)
//! defines its own `#[non_exhaustive]` error enum; this module wraps them into
//! one `Error` for the public API surface, matching the kinds enumerated by
//! the database specification: invalid input, not-found, dimension mismatch,
//! transient/fatal storage faults, closed-after-shutdown, timeout, and plugin
//! unavailability.

use crate::graph::GraphError;
use crate::index::IndexError;
use crate::storage::StorageError;
use crate::vfs::VfsError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type returned by the public API.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed parameters: null/empty data, unknown entity or verb type, a
    /// custom id that isn't a valid UUID.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Entity or verb does not exist. `get` surfaces this as `None` instead;
    /// `update`/`relate` surface it as this variant.
    #[error("not found: {0}")]
    NotFound(String),

    /// A written vector's length differs from the dimension established by
    /// the first vector ever written to this database.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension established by the first write.
        expected: usize,
        /// Dimension of the rejected write.
        actual: usize,
    },

    /// Storage-layer fault.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// HNSW index fault.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Graph adjacency fault.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// VFS fault.
    #[error("vfs error: {0}")]
    Vfs(#[from] VfsError),

    /// Embedding generation failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Operation issued after `close()`.
    #[error("database is closed")]
    Closed,

    /// Operation deadline exceeded. Some operations (hybrid find) degrade to
    /// a partial result instead of returning this.
    #[error("operation timed out")]
    Timeout,

    /// A plugin factory failed to activate; the core fell back to its
    /// built-in implementation and logged a warning. Surfaced only to
    /// callers that explicitly inspect plugin activation results.
    #[error("plugin unavailable: {0}")]
    PluginUnavailable(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}
