//! Immutable, sorted, on-disk run of an LSM tree.
//!
//! Layout: a bincode-encoded [`SSTableFile`] (sorted entries plus a header
//! carrying min/max key, record count, and a SHA-256 checksum over the
//! entry payload) written atomically via temp-file + rename.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::memtable::Record;
use crate::storage::{Result, StorageError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    key: String,
    value: Option<Vec<u8>>,
    seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SSTableFile {
    min_key: String,
    max_key: String,
    checksum: [u8; 32],
    entries: Vec<Entry>,
}

/// Metadata about a flushed SSTable, kept resident so reads can skip files
/// whose key range can't contain the lookup key without touching disk.
#[derive(Debug, Clone)]
pub struct SSTableHandle {
    pub path: PathBuf,
    pub seq: u64,
    pub min_key: String,
    pub max_key: String,
    pub record_count: usize,
}

fn checksum(entries: &[Entry]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for e in entries {
        hasher.update(e.key.as_bytes());
        hasher.update(e.seq.to_le_bytes());
        match &e.value {
            Some(v) => {
                hasher.update([1u8]);
                hasher.update(v);
            }
            None => hasher.update([0u8]),
        }
    }
    hasher.finalize().into()
}

/// Write a frozen memtable's contents to `path`, returning a resident handle.
pub fn write(path: &Path, seq: u64, data: &BTreeMap<String, Record>) -> Result<SSTableHandle> {
    let entries: Vec<Entry> = data
        .iter()
        .map(|(k, r)| Entry {
            key: k.clone(),
            value: r.value.clone(),
            seq: r.seq,
        })
        .collect();
    let min_key = entries.first().map(|e| e.key.clone()).unwrap_or_default();
    let max_key = entries.last().map(|e| e.key.clone()).unwrap_or_default();
    let file = SSTableFile {
        min_key: min_key.clone(),
        max_key: max_key.clone(),
        checksum: checksum(&entries),
        entries,
    };
    let bytes = bincode::serialize(&file)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let tmp_path = path.with_extension("sst.tmp");
    fs::write(&tmp_path, &bytes)?;
    fs::rename(&tmp_path, path)?;

    Ok(SSTableHandle {
        path: path.to_path_buf(),
        seq,
        min_key,
        max_key,
        record_count: file.entries.len(),
    })
}

fn load(path: &Path) -> Result<SSTableFile> {
    let bytes = fs::read(path)?;
    let file: SSTableFile =
        bincode::deserialize(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))?;
    if checksum(&file.entries) != file.checksum {
        return Err(StorageError::Fatal(format!(
            "checksum mismatch in sstable {}",
            path.display()
        )));
    }
    Ok(file)
}

/// Re-derive a resident handle for an SSTable already on disk (used on open).
pub fn reopen(path: &Path, seq: u64) -> Result<SSTableHandle> {
    let file = load(path)?;
    Ok(SSTableHandle {
        path: path.to_path_buf(),
        seq,
        min_key: file.min_key,
        max_key: file.max_key,
        record_count: file.entries.len(),
    })
}

impl SSTableHandle {
    /// Point lookup. `None` means not present in this table (distinct from a
    /// tombstone, which is `Some(Record { value: None, .. })`).
    pub fn get(&self, key: &str) -> Result<Option<Record>> {
        if key < self.min_key.as_str() || key > self.max_key.as_str() {
            return Ok(None);
        }
        let file = load(&self.path)?;
        match file.entries.binary_search_by(|e| e.key.as_str().cmp(key)) {
            Ok(idx) => Ok(Some(Record {
                value: file.entries[idx].value.clone(),
                seq: file.entries[idx].seq,
            })),
            Err(_) => Ok(None),
        }
    }

    /// All entries with key >= `prefix`-compatible range, used by compaction
    /// and prefix listing.
    pub fn load_entries(&self) -> Result<Vec<(String, Record)>> {
        let file = load(&self.path)?;
        Ok(file
            .entries
            .into_iter()
            .map(|e| (e.key, Record { value: e.value, seq: e.seq }))
            .collect())
    }
}
