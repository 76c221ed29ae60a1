//! Bounded in-memory write buffer for the LSM tree.

use std::collections::BTreeMap;

/// A single versioned record. `value: None` is a tombstone.
#[derive(Debug, Clone)]
pub struct Record {
    pub value: Option<Vec<u8>>,
    pub seq: u64,
}

impl Record {
    fn size(&self) -> usize {
        self.value.as_ref().map(|v| v.len()).unwrap_or(0) + 16
    }
}

/// Default MemTable size threshold before a flush is triggered (1 MiB).
pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024;

pub struct MemTable {
    data: BTreeMap<String, Record>,
    size_bytes: usize,
    max_bytes: usize,
}

impl MemTable {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            data: BTreeMap::new(),
            size_bytes: 0,
            max_bytes,
        }
    }

    pub fn put(&mut self, key: String, value: Vec<u8>, seq: u64) {
        self.insert(key, Record { value: Some(value), seq });
    }

    pub fn delete(&mut self, key: String, seq: u64) {
        self.insert(key, Record { value: None, seq });
    }

    fn insert(&mut self, key: String, record: Record) {
        let new_size = record.size();
        if let Some(old) = self.data.insert(key, record) {
            self.size_bytes = self.size_bytes.saturating_sub(old.size());
        }
        self.size_bytes += new_size;
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.data.get(key)
    }

    pub fn should_flush(&self) -> bool {
        self.size_bytes >= self.max_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Record)> {
        self.data.iter()
    }

    pub fn take(&mut self) -> BTreeMap<String, Record> {
        self.size_bytes = 0;
        std::mem::take(&mut self.data)
    }
}
