//! Blob store (spec component C): content-addressed out-of-band payloads.
//!
//! Large payloads (file contents beyond [`BLOB_THRESHOLD`]) are stored under
//! their SHA-256 hash instead of inline in entity metadata; the entity
//! carries a `storage: {type: "blob", ref}` descriptor and re-hydrates lazily
//! on read.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{StorageAdapter, StorageError};

/// Payloads at or below this size are kept inline in entity metadata.
pub const BLOB_THRESHOLD: usize = 4096;

/// A reference to a blob, suitable for embedding in `metadata.storage`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobRef {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub hash: String,
    pub size: usize,
}

pub struct BlobStore {
    adapter: Arc<dyn StorageAdapter>,
}

fn blob_key(hash: &str) -> String {
    format!("blobs/{hash}")
}

impl BlobStore {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { adapter }
    }

    /// Store `bytes` under its content hash, returning a reference.
    /// Idempotent: storing identical bytes twice reuses the same key.
    pub fn put(&self, bytes: &[u8]) -> super::Result<BlobRef> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let hash = hex::encode(hasher.finalize());
        self.adapter.put(&blob_key(&hash), bytes)?;
        Ok(BlobRef {
            kind: "blob".to_string(),
            hash,
            size: bytes.len(),
        })
    }

    pub fn get(&self, blob_ref: &BlobRef) -> super::Result<Vec<u8>> {
        self.adapter
            .get(&blob_key(&blob_ref.hash))?
            .ok_or_else(|| StorageError::NotFound(blob_ref.hash.clone()))
    }
}

// Minimal hex encoder so we don't pull in a dedicated `hex` crate for one call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(s, "{b:02x}").unwrap();
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAdapter;

    #[test]
    fn put_get_round_trip() {
        let store = BlobStore::new(Arc::new(MemoryAdapter::new()));
        let data = b"hello world, this is blob content".to_vec();
        let r = store.put(&data).unwrap();
        assert_eq!(r.size, data.len());
        assert_eq!(store.get(&r).unwrap(), data);
    }

    #[test]
    fn identical_bytes_share_a_hash() {
        let store = BlobStore::new(Arc::new(MemoryAdapter::new()));
        let r1 = store.put(b"same").unwrap();
        let r2 = store.put(b"same").unwrap();
        assert_eq!(r1.hash, r2.hash);
    }
}
