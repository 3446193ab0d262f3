//! Write-ahead log: crash-atomic append with rollback on partial writes.
//!
//! Every memtable owns exactly one WAL file, named `wal_<unix_nanos>`. A
//! mutation is recorded here before it touches the skip list, so the log is
//! the source of truth for durability until the memtable is flushed to an
//! SSTable, after which the file is deleted.
//!
//! # Record format
//!
//! ```text
//! +--------------+---------------------------------+
//! | varint (len) | payload { seq: u32, data }      |
//! +--------------+---------------------------------+
//! ```
//!
//! `seq` starts at 0 and each successful append stamps and commits `seq + 1`.
//! `data` is an opaque payload; the memtable stores its serialized mutation
//! record there.
//!
//! # Atomicity
//!
//! An append either commits fully or leaves no trace: on a write error or a
//! short write the file is truncated back to its pre-append size and `seq`
//! is left unchanged. Appends and deletion are serialized by one mutex.
//!
//! # Durability modes
//!
//! By default writes land in the kernel's page cache, so a crash can lose
//! the most recent appends. In strict mode the file is opened with `O_SYNC`
//! and every append reaches the device before returning, at roughly 4x the
//! cost for small records.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::encoding;
use crate::error::{Error, Result, WalOp};

pub const FILE_PREFIX: &str = "wal_";

/// One log record as laid out on disk, minus the varint length prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u32,
    pub data: Vec<u8>,
}

pub struct Wal {
    /// Owns the open file; used for size queries and truncation. The write
    /// cursor is shared with `Inner::writer` through `try_clone`.
    file: File,
    path: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    writer: Box<dyn Write + Send>,
    /// Sequence number of the last committed record; 0 before any append.
    seq: u32,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal").field("path", &self.path).finish()
    }
}

impl Wal {
    /// Creates a fresh WAL file under `wal_dir`, retrying the timestamped
    /// name on a same-nanosecond collision.
    pub fn create(wal_dir: &Path, strict: bool) -> Result<Self> {
        let (file, path) = loop {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let path = wal_dir.join(format!("{FILE_PREFIX}{nanos}"));

            let mut opts = OpenOptions::new();
            opts.read(true).write(true).create_new(true);
            #[cfg(unix)]
            if strict {
                use std::os::unix::fs::OpenOptionsExt;
                opts.custom_flags(libc::O_SYNC);
            }
            #[cfg(not(unix))]
            let _ = strict;

            match opts.open(&path) {
                Ok(file) => break (file, path),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::wal(WalOp::CreateFile, 0, e)),
            }
        };

        let writer = file
            .try_clone()
            .map_err(|e| Error::wal(WalOp::CreateFile, 0, e))?;
        Ok(Self {
            file,
            path,
            inner: Mutex::new(Inner {
                writer: Box::new(writer),
                seq: 0,
            }),
        })
    }

    /// Opens an existing WAL file, positioned for appends at the end. Used
    /// during startup recovery.
    pub fn open(path: &Path) -> Result<Self> {
        let open = |p: &Path| -> std::io::Result<(File, File)> {
            let mut file = OpenOptions::new().read(true).write(true).open(p)?;
            file.seek(SeekFrom::End(0))?;
            let writer = file.try_clone()?;
            Ok((file, writer))
        };
        let (file, writer) = open(path).map_err(|e| Error::wal(WalOp::ReadFile, 0, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                writer: Box::new(writer),
                seq: 0,
            }),
        })
    }

    /// Atomically appends one record and returns its sequence number.
    ///
    /// On failure the file is truncated back to its pre-append size and the
    /// error carries [`WalOp::Append`]; if that truncation itself fails,
    /// [`WalOp::Rollback`] supersedes. `seq` advances only on full success.
    pub fn append(&self, data: &[u8]) -> Result<u32> {
        let mut inner = self.inner.lock()?;

        let before = self
            .file
            .metadata()
            .map_err(|e| Error::wal(WalOp::Append, inner.seq, e))?
            .len();

        let record = WalRecord {
            seq: inner.seq + 1,
            data: data.to_vec(),
        };
        let payload = bincode::serialize(&record)?;

        if let Err(e) = encoding::write_length_prefixed(&mut inner.writer, &payload) {
            let rollback = self
                .file
                .set_len(before)
                .and_then(|_| (&self.file).seek(SeekFrom::Start(before)).map(|_| ()));
            return match rollback {
                Ok(()) => Err(Error::wal(WalOp::Append, inner.seq, e)),
                Err(te) => Err(Error::wal(WalOp::Rollback, inner.seq, te)),
            };
        }

        inner.seq += 1;
        Ok(inner.seq)
    }

    /// Removes the underlying file. Called by the flush worker once the
    /// memtable's SSTable is sealed.
    pub fn delete(&self) -> Result<()> {
        let inner = self.inner.lock()?;
        std::fs::remove_file(&self.path).map_err(|e| Error::wal(WalOp::Delete, inner.seq, e))
    }

    /// Sequence number of the last committed record.
    pub fn seq(&self) -> u32 {
        self.inner.lock().map(|inner| inner.seq).unwrap_or(0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterates the records currently on disk, in append order.
    pub fn replay(&self) -> Result<ReplayIterator> {
        ReplayIterator::open(&self.path)
    }

    /// Restores the sequence counter after a replay, so later errors report
    /// the correct last committed sequence.
    pub(crate) fn restore_seq(&self, seq: u32) -> Result<()> {
        self.inner.lock()?.seq = seq;
        Ok(())
    }

    /// Builds a WAL around an injected writer. Lets tests simulate write
    /// failures mid-record.
    #[cfg(test)]
    pub(crate) fn with_writer(file: File, path: PathBuf, writer: Box<dyn Write + Send>) -> Self {
        Self {
            file,
            path,
            inner: Mutex::new(Inner { writer, seq: 0 }),
        }
    }
}

/// Decodes WAL records in order, ending at EOF or a torn length prefix and
/// surfacing the first payload decode error.
pub struct ReplayIterator {
    reader: BufReader<File>,
    done: bool,
}

impl ReplayIterator {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::wal(WalOp::ReadFile, 0, e))?;
        Ok(Self {
            reader: BufReader::new(file),
            done: false,
        })
    }

    fn read_record(&mut self) -> Result<Option<WalRecord>> {
        let len = match encoding::read_uvarint(&mut self.reader) {
            Ok(len) => len as usize,
            // EOF in the length prefix is the end of the log, clean or torn.
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut payload = vec![0u8; len];
        self.reader
            .read_exact(&mut payload)
            .map_err(|e| Error::wal(WalOp::ReadFile, 0, e))?;

        Ok(Some(bincode::deserialize(&payload)?))
    }
}

impl Iterator for ReplayIterator {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
