//! SSTable writer and reader.
//!
//! The writer serializes one frozen memtable into a new table file; the
//! reader serves point lookups against an existing file through the range
//! index and a bounded cache of decoded blocks. See the module docs in
//! [`super`] for the file layout.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use lru::LruCache;

use super::block::Block;
use super::index::Index;
use super::FILE_PREFIX;
use crate::encoding::{self, MAX_VARINT_LEN};
use crate::error::{Error, Result, TableOp};
use crate::memtable::Memtable;
use crate::skiplist::Value;

/// How many decoded blocks each reader keeps in memory.
const BLOCK_CACHE_SIZE: usize = 64;

/// Writes one memtable into a new SSTable file.
///
/// The table is built under a temporary `.tmp` name and renamed into place
/// once sealed; directory listings taken by concurrent readers therefore
/// only ever see complete tables.
pub struct TableWriter {
    file: File,
    path: PathBuf,
    tmp_path: PathBuf,
    index: Index,
    block_size: usize,
}

impl TableWriter {
    /// Creates a new timestamped table file under `sstable_dir`, retrying
    /// the name on a same-nanosecond collision.
    pub fn create(sstable_dir: &Path, block_size: usize) -> Result<Self> {
        let (file, path, tmp_path) = loop {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let path = sstable_dir.join(format!("{FILE_PREFIX}{nanos}"));
            let tmp_path = path.with_extension("tmp");
            // The final name must be fresh too: the rename at seal time
            // replaces silently.
            if path.exists() {
                continue;
            }
            match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&tmp_path)
            {
                Ok(file) => break (file, path, tmp_path),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::table(TableOp::CreateFile, e)),
            }
        };

        Ok(Self {
            file,
            path,
            tmp_path,
            index: Index::new(),
            block_size,
        })
    }

    /// The path the sealed table will live at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes the memtable's entries, in ascending key order, into the
    /// table file and seals it.
    ///
    /// Blocks are cut once their accumulated raw key and value bytes reach
    /// the configured block size; a trailing undersized block is written for
    /// whatever remains. The data region's true size is patched into the
    /// fixed header slot afterwards, and the file is fsynced before this
    /// returns so the caller may retire the memtable's WAL.
    pub fn dump(mut self, mem: &Memtable) -> Result<()> {
        self.file
            .write_all(&[0u8; MAX_VARINT_LEN])
            .map_err(|e| Error::table(TableOp::WriteData, e))?;

        let mut block = Block::new();
        let mut acc = 0usize;
        let mut data_bytes = 0u64;
        for (key, value) in mem.iter() {
            acc += key.len() + value.as_ref().map_or(0, |v| v.len());
            block.push(key.to_string(), value.clone());
            if acc >= self.block_size {
                self.emit_block(&mut block, &mut data_bytes)?;
                acc = 0;
            }
        }
        if !block.is_empty() {
            self.emit_block(&mut block, &mut data_bytes)?;
        }

        let mut slot = [0u8; MAX_VARINT_LEN];
        encoding::put_uvarint(&mut slot, data_bytes);
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&slot))
            .and_then(|_| self.file.seek(SeekFrom::End(0)).map(|_| ()))
            .map_err(|e| Error::table(TableOp::WriteData, e))?;

        let index_bytes = self
            .index
            .encode()
            .map_err(|e| Error::table(TableOp::WriteIndex, e))?;
        encoding::write_length_prefixed(&mut self.file, &index_bytes)
            .map_err(|e| Error::table(TableOp::WriteIndex, e))?;

        self.file
            .sync_all()
            .map_err(|e| Error::table(TableOp::WriteData, e))?;
        std::fs::rename(&self.tmp_path, &self.path)
            .map_err(|e| Error::table(TableOp::WriteData, e))?;
        Ok(())
    }

    fn emit_block(&mut self, block: &mut Block, data_bytes: &mut u64) -> Result<()> {
        let (start, end) = match (block.first_key(), block.last_key()) {
            (Some(start), Some(end)) => (start.to_string(), end.to_string()),
            _ => return Err(Error::Corruption("emitting an empty data block".to_string())),
        };

        let encoded = block
            .encode()
            .map_err(|e| Error::table(TableOp::WriteData, e))?;
        let written = encoding::write_length_prefixed(&mut self.file, &encoded)
            .map_err(|e| Error::table(TableOp::WriteData, e))?;

        self.index
            .update(start, end, MAX_VARINT_LEN as u64 + *data_bytes, written as u64);
        *data_bytes += written as u64;
        block.clear();
        Ok(())
    }
}

/// Serves point lookups against one sealed SSTable file.
pub struct TableReader {
    file: File,
    path: PathBuf,
    index: Index,
    cache: LruCache<u64, Block>,
}

impl TableReader {
    /// Opens a table read-only and loads its index into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| Error::table(TableOp::ReadFile, e))?;

        let mut slot = [0u8; MAX_VARINT_LEN];
        file.read_exact(&mut slot)
            .map_err(|e| Error::table(TableOp::LoadIndex, e))?;
        let data_bytes = encoding::read_uvarint(&mut slot.as_slice())
            .map_err(|e| Error::table(TableOp::LoadIndex, e))?;

        file.seek(SeekFrom::Start(MAX_VARINT_LEN as u64 + data_bytes))
            .map_err(|e| Error::table(TableOp::LoadIndex, e))?;
        let mut reader = BufReader::new(&file);
        let mut buf = Vec::new();
        encoding::read_length_prefixed(&mut reader, &mut buf)
            .map_err(|e| Error::table(TableOp::LoadIndex, e))?;
        let index = Index::decode(&buf).map_err(|e| Error::table(TableOp::LoadIndex, e))?;

        let cache_size = NonZeroUsize::new(BLOCK_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            file,
            path: path.to_path_buf(),
            index,
            cache: LruCache::new(cache_size),
        })
    }

    /// Point lookup. The outer `None` means the key is not in this table;
    /// `Some(None)` is a tombstone.
    pub fn get(&mut self, key: &str) -> Result<Option<Value>> {
        let Some((offset, size)) = self.index.get_offset(key) else {
            return Ok(None);
        };

        if let Some(block) = self.cache.get(&offset) {
            return Ok(block.get(key).cloned());
        }

        let block = self.load_block(offset, size)?;
        let value = block.get(key).cloned();
        self.cache.put(offset, block);
        Ok(value)
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_block(&mut self, offset: u64, size: u64) -> Result<Block> {
        let mut raw = vec![0u8; size as usize];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut raw))
            .map_err(|e| Error::table(TableOp::LoadDatablock, e))?;

        let mut payload = Vec::new();
        encoding::read_length_prefixed(&mut raw.as_slice(), &mut payload)
            .map_err(|e| Error::table(TableOp::LoadDatablock, e))?;
        Block::decode(&payload).map_err(|e| Error::table(TableOp::LoadDatablock, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    fn test_memtable(dir: &TempDir, entries: usize) -> Memtable {
        let mut mem = Memtable::create(dir.path(), false).expect("failed to create memtable");
        for i in 0..entries {
            mem.put(&format!("key-{i:03}"), format!("value-{i:03}").as_bytes())
                .expect("put failed");
        }
        mem
    }

    fn dump_to_table(dir: &TempDir, mem: &Memtable, block_size: usize) -> PathBuf {
        let writer = TableWriter::create(dir.path(), block_size).expect("failed to create writer");
        let path = writer.path().to_path_buf();
        writer.dump(mem).expect("dump failed");
        path
    }

    #[test]
    fn test_create_names_file_with_timestamp() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let writer = TableWriter::create(dir.path(), 4096).expect("failed to create writer");

        let name = writer.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(super::super::file_timestamp(&name).is_some());

        // Until the dump seals it, only the temporary file exists, and its
        // name must be invisible to directory listings.
        assert!(writer.tmp_path.exists());
        assert!(!writer.path().exists());
        let tmp_name = writer.tmp_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(super::super::file_timestamp(&tmp_name).is_none());
    }

    #[test]
    fn test_dump_renames_table_into_place() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mem = test_memtable(&dir, 10);

        let writer = TableWriter::create(dir.path(), 4096).expect("failed to create writer");
        let path = writer.path().to_path_buf();
        let tmp_path = writer.tmp_path.clone();
        writer.dump(&mem).expect("dump failed");

        assert!(path.exists());
        assert!(!tmp_path.exists());
    }

    #[test]
    fn test_dump_and_read_back_multiple_blocks() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mem = test_memtable(&dir, 100);
        // 16 bytes per record and a 50-byte block target forces many blocks.
        let path = dump_to_table(&dir, &mem, 50);

        let mut reader = TableReader::open(&path).expect("open failed");
        assert!(reader.index().len() > 1, "expected multiple blocks");

        for i in 0..100 {
            let value = reader
                .get(&format!("key-{i:03}"))
                .expect("get failed")
                .expect("key missing");
            assert_eq!(value, Some(format!("value-{i:03}").into_bytes()));
        }
        assert_eq!(reader.get("key-100").expect("get failed"), None);
        assert_eq!(reader.get("zzz").expect("get failed"), None);
    }

    #[test]
    fn test_dump_smaller_than_block_size_writes_single_block() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mem = test_memtable(&dir, 100);
        let path = dump_to_table(&dir, &mem, 400 * 1024);

        let mut reader = TableReader::open(&path).expect("open failed");
        assert_eq!(reader.index().len(), 1);

        let entry = &reader.index().entries()[0];
        assert_eq!(entry.offset, MAX_VARINT_LEN as u64);
        assert_eq!(entry.start_key, "key-000");
        assert_eq!(entry.end_key, "key-099");

        let value = reader
            .get("key-055")
            .expect("get failed")
            .expect("key missing");
        assert_eq!(value, Some(b"value-055".to_vec()));
    }

    #[test]
    fn test_index_blocks_are_contiguous() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mem = test_memtable(&dir, 200);
        let path = dump_to_table(&dir, &mem, 64);

        let reader = TableReader::open(&path).expect("open failed");
        let entries = reader.index().entries();
        assert!(entries.len() > 1);

        // Blocks must tile the data region exactly, starting right after the
        // fixed header slot.
        assert_eq!(entries[0].offset, MAX_VARINT_LEN as u64);
        for pair in entries.windows(2) {
            assert_eq!(pair[0].offset + pair[0].size, pair[1].offset);
        }
    }

    #[test]
    fn test_tombstones_survive_dump() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut mem = Memtable::create(dir.path(), false).expect("failed to create memtable");
        mem.put("alive", b"yes").expect("put failed");
        mem.delete("dead").expect("delete failed");

        let path = dump_to_table(&dir, &mem, 4096);
        let mut reader = TableReader::open(&path).expect("open failed");

        assert_eq!(
            reader.get("alive").expect("get failed"),
            Some(Some(b"yes".to_vec()))
        );
        assert_eq!(reader.get("dead").expect("get failed"), Some(None));
        assert_eq!(reader.get("unknown").expect("get failed"), None);
    }

    #[test]
    fn test_reader_caches_blocks_by_offset() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mem = test_memtable(&dir, 100);
        let path = dump_to_table(&dir, &mem, 50);

        let mut reader = TableReader::open(&path).expect("open failed");
        assert_eq!(reader.cache.len(), 0);

        reader.get("key-000").expect("get failed");
        assert_eq!(reader.cache.len(), 1);

        // Same block again: served from cache, not reloaded.
        reader.get("key-001").expect("get failed");
        assert_eq!(reader.cache.len(), 1);

        reader.get("key-099").expect("get failed");
        assert_eq!(reader.cache.len(), 2);
    }

    #[test]
    fn test_empty_memtable_dumps_empty_table() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mem = Memtable::create(dir.path(), false).expect("failed to create memtable");
        let path = dump_to_table(&dir, &mem, 4096);

        let mut reader = TableReader::open(&path).expect("open failed");
        assert!(reader.index().is_empty());
        assert_eq!(reader.get("anything").expect("get failed"), None);
    }

    #[test]
    fn test_empty_values_roundtrip() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut mem = Memtable::create(dir.path(), false).expect("failed to create memtable");
        mem.put("empty", b"").expect("put failed");

        let path = dump_to_table(&dir, &mem, 4096);
        let mut reader = TableReader::open(&path).expect("open failed");
        assert_eq!(
            reader.get("empty").expect("get failed"),
            Some(Some(Vec::new()))
        );
    }
}
