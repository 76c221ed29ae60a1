//! Virtual File System (spec component K): a POSIX-like namespace over
//! entities and `Contains` verbs. The root entity id is fixed; every
//! directory's children are defined solely by its outgoing `Contains`
//! edges — never by path string matching.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::graph::Direction;
use crate::store::{AddParams, RelateParams, Store, UpdateParams};
use crate::types::Metadata;
use crate::{Error, Result};

/// Fixed root entity id, per spec §4.K.
pub const ROOT_ID: Uuid = Uuid::nil();

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("path already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
}

fn normalize(path: &str) -> Vec<String> {
    path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect()
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub id: Uuid,
    pub name: String,
    pub is_dir: bool,
}

/// A single `writeFile`/`mkdir` operation for [`Vfs::bulk_write`].
pub enum BulkOp {
    Mkdir { path: String },
    WriteFile { path: String, bytes: Vec<u8> },
}

pub struct Vfs<'a> {
    store: &'a Store,
}

impl<'a> Vfs<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Ensure the root directory entity exists, for a freshly initialized store.
    pub fn ensure_root(&self) -> Result<()> {
        if self.store.get(ROOT_ID, false)?.is_some() {
            return Ok(());
        }
        let mut metadata = Metadata::new();
        metadata.insert("vfsType".into(), json!("directory"));
        metadata.insert("path".into(), json!("/"));
        metadata.insert("name".into(), json!(""));
        self.store.add(AddParams {
            data: Some(json!("/")),
            entity_type: "Directory".into(),
            metadata: Some(metadata),
            id: Some(ROOT_ID.to_string()),
            ..Default::default()
        })?;
        Ok(())
    }

    fn find_child(&self, parent: Uuid, name: &str) -> Result<Option<Uuid>> {
        for child in self.store.get_neighbors(parent, Direction::Out, None, 0) {
            if let Some(entity) = self.store.get(child, false)? {
                if entity.metadata.get("name").and_then(Value::as_str) == Some(name) {
                    return Ok(Some(child));
                }
            }
        }
        Ok(None)
    }

    /// Resolve or create the directory chain down to `segments`, returning
    /// the final directory entity id.
    fn ensure_dir_chain(&self, segments: &[String]) -> Result<Uuid> {
        self.ensure_root()?;
        let mut current = ROOT_ID;
        let mut path_so_far = String::new();
        for segment in segments {
            path_so_far.push('/');
            path_so_far.push_str(segment);
            current = match self.find_child(current, segment)? {
                Some(existing) => existing,
                None => self.mkdir_entity(current, segment, &path_so_far)?,
            };
        }
        Ok(current)
    }

    fn mkdir_entity(&self, parent: Uuid, name: &str, full_path: &str) -> Result<Uuid> {
        let mut metadata = Metadata::new();
        metadata.insert("vfsType".into(), json!("directory"));
        metadata.insert("path".into(), json!(full_path));
        metadata.insert("name".into(), json!(name));
        let id = self.store.add(AddParams {
            data: Some(json!(full_path)),
            entity_type: "Directory".into(),
            metadata: Some(metadata),
            ..Default::default()
        })?;
        self.store.relate(RelateParams { from: parent, to: id, verb_type: "Contains".into(), ..Default::default() })?;
        Ok(id)
    }

    /// Create `path` and every missing ancestor. `recursive: true` is
    /// idempotent: creating the same directory twice is a no-op.
    pub fn mkdir(&self, path: &str, recursive: bool) -> Result<Uuid> {
        let segments = normalize(path);
        if !recursive && segments.len() > 1 {
            let parent_dir = self.resolve(&format!("/{}", segments[..segments.len() - 1].join("/")))?;
            if parent_dir.is_none() {
                return Err(Error::Vfs(VfsError::NotFound(path.to_string())));
            }
        }
        self.ensure_dir_chain(&segments)
    }

    /// Writes a file, creating parent directories as needed. Upserts the
    /// `Contains` edge from parent to child even when the file already
    /// exists (the orphaned-file fix: a prior write must not have skipped
    /// relinking on update).
    pub fn write_file(&self, path: &str, bytes: &[u8]) -> Result<Uuid> {
        let segments = normalize(path);
        let Some((name, dir_segments)) = segments.split_last() else {
            return Err(Error::invalid("cannot write to the root path"));
        };
        let parent = self.ensure_dir_chain(dir_segments)?;
        let full_path = format!("/{}", segments.join("/"));

        let blob = self.store.blob_store();
        let (storage_ref, inline_text) = if bytes.len() > crate::storage::BLOB_THRESHOLD {
            (Some(blob.put(bytes)?), None)
        } else {
            (None, Some(String::from_utf8_lossy(bytes).to_string()))
        };

        let mut metadata = Metadata::new();
        metadata.insert("vfsType".into(), json!("file"));
        metadata.insert("path".into(), json!(full_path));
        metadata.insert("name".into(), json!(name));
        metadata.insert("size".into(), json!(bytes.len()));
        if let Some(storage_ref) = &storage_ref {
            metadata.insert("storage".into(), serde_json::to_value(storage_ref).unwrap());
        }
        if let Some(text) = &inline_text {
            metadata.insert("rawData".into(), json!(text));
        }

        let existing = self.find_child(parent, name)?;
        let id = if let Some(existing) = existing {
            self.store.update(UpdateParams {
                id: existing,
                data: inline_text.as_ref().map(|t| json!(t)),
                metadata: Some(metadata),
                vector: None,
                merge: false,
            })?;
            existing
        } else {
            self.store.add(AddParams {
                data: inline_text.as_ref().map(|t| json!(t)).or(Some(json!(full_path))),
                entity_type: "Document".into(),
                metadata: Some(metadata),
                ..Default::default()
            })?
        };

        // Always upsert the Contains edge, even on update: a prior bug
        // dropped it on the update path and left orphaned files.
        self.store.relate(RelateParams { from: parent, to: id, verb_type: "Contains".into(), ..Default::default() })?;
        Ok(id)
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let id = self.resolve(path)?.ok_or_else(|| Error::Vfs(VfsError::NotFound(path.to_string())))?;
        let entity = self.store.get(id, false)?.ok_or_else(|| Error::Vfs(VfsError::NotFound(path.to_string())))?;
        if let Some(storage) = entity.metadata.get("storage") {
            let blob_ref: crate::storage::BlobRef = serde_json::from_value(storage.clone())
                .map_err(|e| Error::invalid(format!("corrupt blob ref: {e}")))?;
            return Ok(self.store.blob_store().get(&blob_ref)?);
        }
        Ok(entity.metadata.get("rawData").and_then(Value::as_str).unwrap_or_default().as_bytes().to_vec())
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        let Some(id) = self.resolve(path)? else { return Ok(()) };
        self.store.delete(id)
    }

    /// Resolve a path to the entity that lives there, by walking `Contains`
    /// edges from the root — never by matching path strings.
    pub fn resolve(&self, path: &str) -> Result<Option<Uuid>> {
        let segments = normalize(path);
        let mut current = ROOT_ID;
        if segments.is_empty() {
            return Ok(Some(ROOT_ID));
        }
        for segment in &segments {
            match self.find_child(current, segment)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.is_some())
    }

    /// Enumerates children strictly via outgoing `Contains` edges of the
    /// directory entity; a directory never appears as its own child.
    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let dir_id = self.resolve(path)?.ok_or_else(|| Error::Vfs(VfsError::NotFound(path.to_string())))?;
        let mut out = Vec::new();
        for child in self.store.get_neighbors(dir_id, Direction::Out, None, 0) {
            if child == dir_id {
                continue;
            }
            if let Some(entity) = self.store.get(child, false)? {
                let name = entity.metadata.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let is_dir = entity.metadata.get("vfsType").and_then(Value::as_str) == Some("directory");
                out.push(DirEntry { id: child, name, is_dir });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Relocates the `Contains` edge from the old parent to the new one;
    /// the entity itself (and its id) is untouched.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let id = self.resolve(from)?.ok_or_else(|| Error::Vfs(VfsError::NotFound(from.to_string())))?;
        let old_parent_segments = normalize(from);
        let old_parent = self.resolve(&format!("/{}", old_parent_segments[..old_parent_segments.len().saturating_sub(1)].join("/")))?;

        let to_segments = normalize(to);
        let Some((new_name, new_dir_segments)) = to_segments.split_last() else {
            return Err(Error::invalid("cannot rename to the root path"));
        };
        let new_parent = self.ensure_dir_chain(new_dir_segments)?;

        if let Some(old_parent) = old_parent {
            for verb in self.store.get_relations(Some(old_parent), Some(id), None, None, 0)? {
                self.store.unrelate(verb.id)?;
            }
        }
        self.store.relate(RelateParams { from: new_parent, to: id, verb_type: "Contains".into(), ..Default::default() })?;

        let new_path = format!("/{}", to_segments.join("/"));
        let mut metadata = Metadata::new();
        metadata.insert("path".into(), json!(new_path));
        metadata.insert("name".into(), json!(new_name));
        self.store.update(UpdateParams { id, data: None, metadata: Some(metadata), vector: None, merge: true })?;
        Ok(())
    }

    /// Applies mkdirs first, shallowest-depth-first and sequentially (closing
    /// the mkdir race window where parallel mkdir+write for the same parent
    /// creates duplicate directory entities), then the remaining writes.
    pub fn bulk_write(&self, mut ops: Vec<BulkOp>) -> Result<Vec<Result<Uuid>>> {
        ops.sort_by_key(|op| match op {
            BulkOp::Mkdir { path } => (0, normalize(path).len()),
            BulkOp::WriteFile { .. } => (1, 0),
        });
        Ok(ops
            .into_iter()
            .map(|op| match op {
                BulkOp::Mkdir { path } => self.mkdir(&path, true),
                BulkOp::WriteFile { path, bytes } => self.write_file(&path, &bytes),
            })
            .collect())
    }

    /// Parses the semantic-path dimensions (`/by-concept/X`, `/by-author/X`,
    /// `/as-of/DATE`, `/related-to/P/depth-N`, `/similar-to/P/threshold-T`,
    /// `/by-tag/T`) into a query dimension, or `None` for a concrete path.
    pub fn parse_semantic_path(path: &str) -> Option<SemanticPath> {
        let segments = normalize(path);
        match segments.first().map(String::as_str) {
            Some("by-concept") => segments.get(1).map(|v| SemanticPath::ByConcept(v.clone())),
            Some("by-author") => segments.get(1).map(|v| SemanticPath::ByAuthor(v.clone())),
            Some("by-tag") => segments.get(1).map(|v| SemanticPath::ByTag(v.clone())),
            Some("as-of") => segments.get(1).map(|v| SemanticPath::AsOf(v.clone())),
            Some("related-to") => {
                let id = segments.get(1)?;
                let depth = segments.get(2).and_then(|s| s.strip_prefix("depth-")).and_then(|n| n.parse().ok()).unwrap_or(1);
                Some(SemanticPath::RelatedTo { id: id.clone(), depth })
            }
            Some("similar-to") => {
                let id = segments.get(1)?;
                let threshold =
                    segments.get(2).and_then(|s| s.strip_prefix("threshold-")).and_then(|n| n.parse().ok()).unwrap_or(0.7);
                Some(SemanticPath::SimilarTo { id: id.clone(), threshold })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SemanticPath {
    ByConcept(String),
    ByAuthor(String),
    ByTag(String),
    AsOf(String),
    RelatedTo { id: String, depth: u32 },
    SimilarTo { id: String, threshold: f32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{EmbeddingError, EmbeddingModel};
    use crate::storage::{FilesystemAdapter, MemoryAdapter};
    use std::sync::Arc;

    struct StubEmbedder;
    impl EmbeddingModel for StubEmbedder {
        fn dimensions(&self) -> usize {
            4
        }
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            let seed = text.len() as f32;
            Ok(vec![seed; 4])
        }
    }

    #[test]
    fn write_then_readdir_shows_file() {
        let store = Store::new(Arc::new(MemoryAdapter::new()), Arc::new(StubEmbedder)).unwrap();
        let vfs = Vfs::new(&store);
        vfs.write_file("/chapter-1.txt", b"Once upon a time").unwrap();
        let entries = vfs.readdir("/").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "chapter-1.txt");
    }

    #[test]
    fn restart_survives_close_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::new(Arc::new(FilesystemAdapter::open(dir.path().to_path_buf()).unwrap()), Arc::new(StubEmbedder)).unwrap();
            let vfs = Vfs::new(&store);
            vfs.write_file("/chapter-1.txt", b"Once upon a time").unwrap();
            store.close().unwrap();
        }
        let store = Store::new(Arc::new(FilesystemAdapter::open(dir.path().to_path_buf()).unwrap()), Arc::new(StubEmbedder)).unwrap();
        let vfs = Vfs::new(&store);
        let entries = vfs.readdir("/").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "chapter-1.txt");
        assert!(!store.get_relations(Some(ROOT_ID), None, Some(crate::types::VerbType::Contains), None, 0).unwrap().is_empty());
    }

    #[test]
    fn rewrite_upserts_contains_edge() {
        let store = Store::new(Arc::new(MemoryAdapter::new()), Arc::new(StubEmbedder)).unwrap();
        let vfs = Vfs::new(&store);
        vfs.write_file("/a.txt", b"v1").unwrap();
        vfs.write_file("/a.txt", b"v2").unwrap();
        assert_eq!(vfs.readdir("/").unwrap().len(), 1);
        assert_eq!(vfs.read_file("/a.txt").unwrap(), b"v2");
    }

    #[test]
    fn bulk_write_sorts_mkdirs_shallowest_first() {
        let store = Store::new(Arc::new(MemoryAdapter::new()), Arc::new(StubEmbedder)).unwrap();
        let vfs = Vfs::new(&store);
        let ops = vec![
            BulkOp::WriteFile { path: "/a/b/f.txt".into(), bytes: b"x".to_vec() },
            BulkOp::Mkdir { path: "/a/b".into() },
            BulkOp::Mkdir { path: "/a".into() },
        ];
        let results = vfs.bulk_write(ops).unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(vfs.exists("/a/b/f.txt").unwrap());
    }

    #[test]
    fn semantic_path_parsing() {
        assert_eq!(Vfs::parse_semantic_path("/by-concept/rust"), Some(SemanticPath::ByConcept("rust".into())));
        assert_eq!(
            Vfs::parse_semantic_path("/related-to/abc/depth-2"),
            Some(SemanticPath::RelatedTo { id: "abc".into(), depth: 2 })
        );
        assert_eq!(Vfs::parse_semantic_path("/chapter-1.txt"), None);
    }
}
