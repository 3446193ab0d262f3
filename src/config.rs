use std::path::PathBuf;

use tracing::Level;

/// Configuration for a [`Database`](crate::Database) instance.
#[derive(Debug, Clone)]
pub struct Options {
    /// Root directory for the WAL and SSTable subdirectories (default: ./db)
    pub db_dir: PathBuf,

    /// If true, every WAL write is flushed to the storage device before the
    /// append returns, instead of being buffered in the kernel's page cache.
    /// Roughly 4x slower for small records; turn it on only when no write
    /// may be lost on system failure. (default: false)
    pub wal_strict_mode: bool,

    /// How much key and value data (in bytes) a memtable may accumulate
    /// before it is flushed to disk. (default: 4 MiB)
    pub memtable_size_byte: usize,

    /// Target size (in bytes) of each data block in an SSTable file.
    /// (default: 4 KiB)
    pub sstable_datablock_size_byte: usize,

    /// Engine log verbosity, written to `<db_dir>/db.log`. (default: WARN)
    pub log_level: Level,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            db_dir: PathBuf::from("./db"),
            wal_strict_mode: false,
            memtable_size_byte: 4 * 1024 * 1024,
            sstable_datablock_size_byte: 4 * 1024,
            log_level: Level::WARN,
        }
    }
}

impl Options {
    /// Create options rooted at the given directory.
    pub fn new(db_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_dir: db_dir.into(),
            ..Default::default()
        }
    }

    /// Set strict WAL durability mode.
    pub fn wal_strict_mode(mut self, on: bool) -> Self {
        self.wal_strict_mode = on;
        self
    }

    /// Set the memtable flush threshold in bytes.
    pub fn memtable_size_byte(mut self, size: usize) -> Self {
        self.memtable_size_byte = size;
        self
    }

    /// Set the SSTable data block target size in bytes.
    pub fn sstable_datablock_size_byte(mut self, size: usize) -> Self {
        self.sstable_datablock_size_byte = size;
        self
    }

    /// Set the engine log level.
    pub fn log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = Options::default();
        assert_eq!(options.db_dir, PathBuf::from("./db"));
        assert!(!options.wal_strict_mode);
        assert_eq!(options.memtable_size_byte, 4 * 1024 * 1024);
        assert_eq!(options.sstable_datablock_size_byte, 4 * 1024);
        assert_eq!(options.log_level, Level::WARN);
    }

    #[test]
    fn test_options_builder() {
        let options = Options::new("/tmp/test")
            .wal_strict_mode(true)
            .memtable_size_byte(512)
            .sstable_datablock_size_byte(128)
            .log_level(Level::INFO);

        assert_eq!(options.db_dir, PathBuf::from("/tmp/test"));
        assert!(options.wal_strict_mode);
        assert_eq!(options.memtable_size_byte, 512);
        assert_eq!(options.sstable_datablock_size_byte, 128);
        assert_eq!(options.log_level, Level::INFO);
    }
}
