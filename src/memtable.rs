//! In-memory mutable table: a skip list paired with a write-ahead log.
//!
//! Every mutation is appended to the WAL before it touches the skip list;
//! if the append fails, the memtable is untouched and the write simply did
//! not happen. Deletions are recorded as tombstones (`None` values) so they
//! shadow older values in flushed tables until compaction drops them.
//!
//! A memtable is mutated only by the single foreground writer. Once it is
//! handed to the flush worker it is read-only, which is what makes the
//! unsynchronized skip list safe to share.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::skiplist::{self, SkipList, Value};
use crate::wal::Wal;

/// A single mutation as carried in a WAL record's data payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Mutation {
    pub key: String,
    /// `None` marks a deletion.
    pub value: Value,
}

pub struct Memtable {
    list: SkipList,
    wal: Wal,
    /// Accumulated `key.len() + value.len()` over all mutations. Overwrites
    /// are not subtracted, so this is an upper-biased estimate of resident
    /// data; the flush threshold trips slightly early, never late.
    total_bytes: usize,
}

impl Memtable {
    /// Creates an empty memtable with a fresh WAL file under `wal_dir`.
    pub fn create(wal_dir: &Path, strict: bool) -> Result<Self> {
        Ok(Self {
            list: SkipList::new(),
            wal: Wal::create(wal_dir, strict)?,
            total_bytes: 0,
        })
    }

    /// Rebuilds a memtable from an existing WAL file by applying its records
    /// to the skip list directly, without re-appending them. Replay stops at
    /// a torn or undecodable tail record, keeping everything before it.
    pub fn replay(path: &Path) -> Result<Self> {
        let wal = Wal::open(path)?;
        let mut list = SkipList::new();
        let mut total_bytes = 0;
        let mut last_seq = 0;

        for record in wal.replay()? {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(
                        wal = %path.display(),
                        error = %e,
                        "stopping wal replay at undecodable record"
                    );
                    break;
                }
            };
            let mutation: Mutation = match bincode::deserialize(&record.data) {
                Ok(mutation) => mutation,
                Err(e) => {
                    tracing::warn!(
                        wal = %path.display(),
                        error = %e,
                        "stopping wal replay at undecodable mutation"
                    );
                    break;
                }
            };

            total_bytes += mutation.key.len() + mutation.value.as_ref().map_or(0, |v| v.len());
            last_seq = record.seq;
            list.upsert(mutation.key, mutation.value);
        }
        wal.restore_seq(last_seq)?;

        Ok(Self {
            list,
            wal,
            total_bytes,
        })
    }

    /// Writes `key` with `value`. The empty value is a legitimate value, not
    /// a deletion.
    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.apply(key, Some(value.to_vec()))
    }

    /// Records a tombstone for `key`.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.apply(key, None)
    }

    fn apply(&mut self, key: &str, value: Value) -> Result<()> {
        let written = key.len() + value.as_ref().map_or(0, |v| v.len());
        let mutation = Mutation {
            key: key.to_string(),
            value,
        };
        let payload = bincode::serialize(&mutation)?;

        // WAL first: on failure the skip list is untouched and the write
        // did not happen.
        self.wal.append(&payload)?;

        self.list.upsert(mutation.key, mutation.value);
        self.total_bytes += written;
        Ok(())
    }

    /// Point lookup. The outer `None` means the key is unknown here;
    /// `Some(None)` is a tombstone.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.list.search(key).cloned()
    }

    /// All entries in ascending key order, tombstones included.
    pub fn iter(&self) -> skiplist::Iter<'_> {
        self.list.iter()
    }

    pub fn size_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn wal(&self) -> &Wal {
        &self.wal
    }
}
