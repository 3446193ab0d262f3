//! Embedded LSM-tree key-value storage engine.
//!
//! Writes land in an in-memory skip list (the memtable) after being recorded
//! in a per-memtable write-ahead log. When a memtable grows past its size
//! limit it is handed to a background worker that serializes it into an
//! immutable, block-compressed sorted table (SSTable) and retires its WAL.
//! Reads merge the active memtable, the memtables queued for flushing, and
//! the on-disk tables, newest first.
//!
//! ```text
//!  put/delete                get
//!      │                      │
//!      ▼                      ▼
//! ┌──────────┐   append  ┌──────────────────┐
//! │   WAL    │◄──────────┤ Active Memtable  │
//! │  (file)  │           │   (skip list)    │
//! └──────────┘           └────────┬─────────┘
//!                                 │ freeze at size limit
//!                                 ▼
//!                        ┌──────────────────┐
//!                        │   Flush queue    │
//!                        │ (frozen tables)  │
//!                        └────────┬─────────┘
//!                                 │ background flush
//!                                 ▼
//!                        ┌──────────────────┐
//!                        │     SSTables     │
//!                        │ (newest..oldest) │
//!                        └──────────────────┘
//! ```

pub mod compaction;
pub mod config;
pub mod db;
pub mod encoding;
pub mod error;
pub mod memtable;
pub mod skiplist;
pub mod sstable;
pub mod wal;

#[cfg(test)]
pub mod tmpfs;

pub use config::Options;
pub use db::Database;
pub use error::{Error, Result};
