//! Minor compaction: flushing frozen memtables to SSTables.
//!
//! One background worker receives frozen memtables over a bounded handoff
//! channel, serializes each into a new SSTable, and then deletes the
//! memtable's WAL. Memtables awaiting flush stay visible to the read path
//! through a shared FIFO queue: they are appended *before* the channel send
//! and removed only *after* their table is sealed, so a concurrent lookup
//! can never miss an in-flight memtable.
//!
//! Flushes happen in arrival order, which keeps on-disk recency (by file
//! timestamp) consistent with logical recency.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};

use crate::error::{Error, Result};
use crate::memtable::Memtable;
use crate::sstable::TableWriter;

pub struct Flusher {
    queue: Arc<Mutex<VecDeque<Arc<Memtable>>>>,
    sender: Option<Sender<Arc<Memtable>>>,
    worker: Option<JoinHandle<()>>,
}

impl Flusher {
    /// Starts the flush worker for the given SSTable directory.
    pub fn spawn(sstable_dir: PathBuf, block_size: usize) -> Result<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let (sender, receiver) = bounded::<Arc<Memtable>>(1);

        let worker_queue = Arc::clone(&queue);
        let worker = thread::Builder::new()
            .name("cinderdb-flush".to_string())
            .spawn(move || {
                while let Ok(mem) = receiver.recv() {
                    flush_one(&sstable_dir, block_size, &mem, &worker_queue);
                }
            })
            .map_err(Error::Io)?;

        Ok(Self {
            queue,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Transfers ownership of a frozen memtable to the worker. Blocks while
    /// a previous handoff is still pending in the channel.
    pub fn enqueue(&self, mem: Arc<Memtable>) -> Result<()> {
        // Queue append happens before the send: readers must see the
        // memtable for the whole window until its SSTable is sealed.
        self.queue.lock()?.push_back(Arc::clone(&mem));

        let Some(sender) = &self.sender else {
            return Err(Error::Corruption("flush worker is shut down".to_string()));
        };
        sender
            .send(mem)
            .map_err(|_| Error::Corruption("flush worker exited".to_string()))
    }

    /// Snapshot of the memtables awaiting flush, newest first.
    pub fn queued(&self) -> Vec<Arc<Memtable>> {
        self.queue
            .lock()
            .map(|queue| queue.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain anything already handed
        // off, then exit; join so the last flush completes before we return.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn flush_one(
    sstable_dir: &Path,
    block_size: usize,
    mem: &Arc<Memtable>,
    queue: &Mutex<VecDeque<Arc<Memtable>>>,
) {
    let writer = match TableWriter::create(sstable_dir, block_size) {
        Ok(writer) => writer,
        Err(e) => fatal(&e),
    };
    let table_path = writer.path().to_path_buf();
    if let Err(e) = writer.dump(mem) {
        fatal(&e);
    }
    tracing::info!(table = %table_path.display(), "serialized memtable to sstable");

    // The table is sealed; only now may the memtable leave the read path.
    if let Ok(mut queue) = queue.lock() {
        queue.pop_front();
    }

    match mem.wal().delete() {
        Ok(()) => {
            tracing::info!(wal = %mem.wal().path().display(), "deleted wal file");
        }
        Err(e) => {
            tracing::warn!(
                wal = %mem.wal().path().display(),
                error = %e,
                "failed to delete wal file after flush"
            );
        }
    }
}

/// A failed flush is unrecoverable in-process. The memtable's WAL is still
/// on disk, so the data survives for recovery at the next open.
fn fatal(err: &Error) -> ! {
    tracing::error!(error = %err, "failed to serialize memtable to sstable");
    std::process::exit(1);
}
