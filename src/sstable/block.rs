//! Data blocks: the atomic read unit of an SSTable.
//!
//! A block is an ordered run of adjacent key-value entries, serialized as
//! one record and Snappy-compressed as a unit. Lookups within a block are a
//! linear scan; the block size keeps that cheap.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::skiplist::Value;

/// One key-value entry. A `None` value is a tombstone and shadows older
/// tables' entries for the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: Value,
}

/// An in-memory data block, either being filled by the writer or decoded by
/// a reader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    entries: Vec<Entry>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry. The writer feeds keys in ascending order.
    pub fn push(&mut self, key: String, value: Value) {
        self.entries.push(Entry { key, value });
    }

    /// Linear scan for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    pub fn first_key(&self) -> Option<&str> {
        self.entries.first().map(|entry| entry.key.as_str())
    }

    pub fn last_key(&self) -> Option<&str> {
        self.entries.last().map(|entry| entry.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Serializes and compresses the block into its on-disk bytes (without
    /// the varint length prefix).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let raw = bincode::serialize(self)?;
        snap::raw::Encoder::new()
            .compress_vec(&raw)
            .map_err(|e| Error::Corruption(e.to_string()))
    }

    /// Inverse of [`Block::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let raw = snap::raw::Decoder::new()
            .decompress_vec(bytes)
            .map_err(|e| Error::Corruption(e.to_string()))?;
        Ok(bincode::deserialize(&raw)?)
    }
}
