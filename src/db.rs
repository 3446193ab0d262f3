//! Database façade: the public write/read surface of the engine.
//!
//! A database owns exactly one active memtable and a background flusher.
//! Mutations go through the active memtable (WAL first); once its
//! accumulated bytes reach the configured threshold it is frozen, handed to
//! the flusher, and replaced with a fresh one. Lookups merge the layers
//! newest first: active memtable, then queued memtables, then SSTables in
//! reverse chronological order. The most recent entry for a key wins, and a
//! tombstone settles the lookup as "not found" without consulting older
//! layers.
//!
//! The engine assumes a single foreground writer, which the API encodes by
//! taking `&mut self` for mutations.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::compaction::Flusher;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::memtable::Memtable;
use crate::sstable::{self, TableReader};
use crate::wal;

pub struct Database {
    options: Options,
    wal_dir: PathBuf,
    sstable_dir: PathBuf,
    mem: Memtable,
    flusher: Flusher,
}

impl Database {
    /// Opens (or creates) a database under `options.db_dir`.
    ///
    /// Creates the `wal/` and `sstable/` subdirectories, routes engine logs
    /// to `db.log`, and recovers any WAL files left behind by a previous
    /// run: each is rebuilt into a memtable and queued for flushing, oldest
    /// first, so on-disk recency stays consistent.
    pub fn open(options: Options) -> Result<Self> {
        let wal_dir = options.db_dir.join("wal");
        let sstable_dir = options.db_dir.join("sstable");
        fs::create_dir_all(&wal_dir)?;
        fs::create_dir_all(&sstable_dir)?;

        init_logging(&options)?;

        let flusher = Flusher::spawn(sstable_dir.clone(), options.sstable_datablock_size_byte)?;

        for path in wal_files_oldest_first(&wal_dir)? {
            let mem = Memtable::replay(&path)?;
            if mem.is_empty() {
                // A crash right after a rotation leaves an empty WAL behind.
                mem.wal().delete()?;
                continue;
            }
            tracing::info!(
                wal = %path.display(),
                entries = mem.len(),
                "recovered memtable from wal"
            );
            flusher.enqueue(Arc::new(mem))?;
        }

        let mem = Memtable::create(&wal_dir, options.wal_strict_mode)?;
        Ok(Self {
            options,
            wal_dir,
            sstable_dir,
            mem,
            flusher,
        })
    }

    /// Writes a value. Durable once this returns (subject to the WAL's
    /// durability mode).
    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        check_key(key)?;
        self.mem.put(key, value)?;
        self.maybe_rotate()
    }

    /// Deletes a key by recording a tombstone. The tombstone counts toward
    /// the flush threshold like any other write.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        check_key(key)?;
        self.mem.delete(key)?;
        self.maybe_rotate()
    }

    /// Reads the most recent value for `key`, or `None` if the key was
    /// never written or has been deleted.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        check_key(key)?;

        // A hit at any layer, value or tombstone, settles the lookup.
        if let Some(value) = self.mem.get(key) {
            return Ok(value);
        }
        for mem in self.flusher.queued() {
            if let Some(value) = mem.get(key) {
                return Ok(value);
            }
        }
        for path in self.sstable_paths_newest_first()? {
            let mut reader = TableReader::open(&path)?;
            if let Some(value) = reader.get(key)? {
                return Ok(value);
            }
        }
        Ok(None)
    }

    fn maybe_rotate(&mut self) -> Result<()> {
        let size = self.mem.size_bytes();
        if size < self.options.memtable_size_byte {
            return Ok(());
        }

        let fresh = Memtable::create(&self.wal_dir, self.options.wal_strict_mode)?;
        let full = std::mem::replace(&mut self.mem, fresh);
        self.flusher.enqueue(Arc::new(full))?;
        tracing::info!(
            size,
            limit = self.options.memtable_size_byte,
            "memtable over size limit, enqueued for flush"
        );
        Ok(())
    }

    /// Lists the SSTable files in reverse chronological order. Tolerates
    /// files appearing concurrently (the flusher writes while readers list).
    fn sstable_paths_newest_first(&self) -> Result<Vec<PathBuf>> {
        let mut tables: Vec<(u128, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.sstable_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(ts) = sstable::file_timestamp(&name.to_string_lossy()) {
                tables.push((ts, entry.path()));
            }
        }
        tables.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(tables.into_iter().map(|(_, path)| path).collect())
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::EmptyKey);
    }
    Ok(())
}

fn wal_files_oldest_first(wal_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<(u128, PathBuf)> = Vec::new();
    for entry in fs::read_dir(wal_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let ts = name
            .to_string_lossy()
            .strip_prefix(wal::FILE_PREFIX)
            .and_then(|suffix| suffix.parse::<u128>().ok());
        if let Some(ts) = ts {
            files.push((ts, entry.path()));
        }
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// Routes engine logs to `<db_dir>/db.log` at the configured level. If a
/// global subscriber is already installed, it stays.
fn init_logging(options: &Options) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(options.db_dir.join("db.log"))?;
    let _ = tracing_subscriber::fmt()
        .with_max_level(options.log_level)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .try_init();
    Ok(())
}
