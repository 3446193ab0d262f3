//! Range index mapping key intervals to data block positions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Describes one data block: the keys it spans and where its bytes live.
/// `offset` is absolute from the file start; `size` covers the block's
/// varint length prefix plus its compressed bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub start_key: String,
    pub end_key: String,
    pub offset: u64,
    pub size: u64,
}

/// Ordered list of block entries, with a start-key map for O(1) update
/// while the writer appends blocks in ascending key order.
#[derive(Debug, Default)]
pub struct Index {
    entries: Vec<IndexEntry>,
    by_start: HashMap<String, usize>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the entry with this `start_key` in place, or appends a new
    /// one. Appends assume monotonically increasing start keys, which holds
    /// because blocks are emitted from a sorted memtable walk.
    pub fn update(&mut self, start_key: String, end_key: String, offset: u64, size: u64) {
        match self.by_start.get(&start_key) {
            Some(&i) => {
                let entry = &mut self.entries[i];
                entry.end_key = end_key;
                entry.offset = offset;
                entry.size = size;
            }
            None => {
                self.by_start.insert(start_key.clone(), self.entries.len());
                self.entries.push(IndexEntry {
                    start_key,
                    end_key,
                    offset,
                    size,
                });
            }
        }
    }

    /// Finds the block that may hold `key`, returning its `(offset, size)`.
    ///
    /// Returns `None` when the key sorts before the first block, after the
    /// last block, or in the gap between two adjacent blocks.
    pub fn get_offset(&self, key: &str) -> Option<(u64, u64)> {
        if let Some(&i) = self.by_start.get(key) {
            let entry = &self.entries[i];
            return Some((entry.offset, entry.size));
        }
        for entry in &self.entries {
            if key >= entry.start_key.as_str() && key <= entry.end_key.as_str() {
                return Some((entry.offset, entry.size));
            }
            // Beyond the previous block's end key but before this block's
            // start key: the key is in no block.
            if key < entry.start_key.as_str() {
                return None;
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.entries)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let entries: Vec<IndexEntry> = bincode::deserialize(bytes)?;
        let by_start = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.start_key.clone(), i))
            .collect();
        Ok(Self { entries, by_start })
    }
}
