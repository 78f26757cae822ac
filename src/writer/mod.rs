//! Writer pipeline (spec §2/§4.2/§5): four OS threads coupled by bounded
//! [`crate::queue::SlotQueue`]s. The walker is the *driving* thread — it
//! runs on the caller's thread and owns the source-tree traversal;
//! compressor, finisher, and (optionally) the history sink each get a
//! spawned thread. A single `End` sentinel, pushed by the walker once
//! the tree is exhausted, propagates downstream and unwinds every
//! thread in turn.
//!
//! Grounded on `examples/original_source/ftbwriter.h`/`ftbwriter.cpp`
//! (`write_file`/`write_regular`/`write_directory`, `compr_thread`,
//! `write_thread`, `hash_xor_blocks`), reusing this crate's
//! `SlotQueue<T>` (itself grounded on the reference's `SlotQueue<T>`
//! template) for every inter-thread hand-off.

mod compressor;
mod finisher;
mod walker;

pub use walker::WalkStats;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::block::Baseline;
use crate::crypto::{Cipher, Hasher};
use crate::error::WriterError;
use crate::fsaccess::FSAccess;
use crate::history::{HistorySink, NullHistorySink};
use crate::queue::SlotQueue;

/// One producer→compressor slot. The reference's four-valued `dty` tag
/// (`HEADER_PASSTHROUGH`/`DATA_PASSTHROUGH`/`DATA_COMPRESS_OWNED`/
/// `DATA_COMPRESS_POOLED`) collapses here into two stream roles —
/// headers always bypass the deflate stream and reset `hdroffs`
/// bookkeeping, every other buffer is deflated — plus a `pooled` flag
/// carrying the ownership-transfer bit the reference used the tag's
/// OWNED/POOLED split for (see `DESIGN.md`).
pub(crate) enum ProducerSlot {
    /// A file header record (§3), never compressed: the compressor
    /// flushes and restarts the deflate stream around it.
    Header(Vec<u8>),
    /// Payload bytes (file content, directory child list, symlink
    /// target, device rdev, hardlink fileno) fed through deflate.
    Data { buf: Vec<u8>, pooled: bool },
    End,
}

/// A finished, fixed-size block body ready for XOR accumulation and
/// on-disk framing. `hdroffs` is body-relative, 0 if no header starts
/// in this block.
pub(crate) struct FilledBlock {
    pub body: Vec<u8>,
    pub hdroffs: u32,
}

/// Tunables for one backup run (spec §3/§6).
#[derive(Clone)]
pub struct WriterOptions {
    pub block_size: u32,
    pub xorgc: u8,
    pub xorsc: u8,
    pub segment_size: u64,
    pub since_ns: u64,
    pub cipher: Option<Arc<dyn Cipher>>,
    /// Mutex-wrapped: the hasher is stateful (`update`/`finish_into` take
    /// `&mut self`) but only the finisher thread ever touches it.
    pub hasher: Arc<Mutex<Box<dyn Hasher>>>,
    pub key: Option<Vec<u8>>,
    pub verbose: bool,
    pub verbose_period_secs: u64,
}

impl WriterOptions {
    pub fn baseline(&self) -> Baseline {
        Baseline { l2bs: self.block_size.trailing_zeros() as u8, xorgc: self.xorgc, xorsc: self.xorsc }
    }
}

/// Summary returned once a backup run completes.
#[derive(Debug, Default, Clone)]
pub struct BackupStats {
    pub files: u64,
    pub dirs: u64,
    pub bytes_read: u64,
    pub data_blocks: u64,
    pub parity_blocks: u64,
    pub segments: u32,
}

/// Run one full backup: walk `root` through `fs`, write the saveset
/// rooted at `saveset_base` (segment suffixes appended as needed).
pub fn backup(
    root: &Path,
    saveset_base: &Path,
    fs: &dyn FSAccess,
    opts: &WriterOptions,
    history: Option<Box<dyn HistorySink>>,
) -> Result<BackupStats, WriterError> {
    let producer_q: Arc<SlotQueue<ProducerSlot>> = Arc::new(SlotQueue::new());
    let free_q: Arc<SlotQueue<Vec<u8>>> = Arc::new(SlotQueue::new());
    let block_q: Arc<SlotQueue<Option<FilledBlock>>> = Arc::new(SlotQueue::new());
    let history_q: Arc<SlotQueue<Option<crate::history::HistoryRecord>>> = Arc::new(SlotQueue::new());

    let body_len = {
        let hasher = opts.hasher.lock().unwrap();
        opts.block_size as usize
            - crate::block::BLOCK_HEADER_SIZE
            - crate::crypto::hash_tail_size(hasher.as_ref(), opts.cipher.as_deref())
    };

    let saveset_id = saveset_base.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

    let compressor_q = producer_q.clone();
    let compressor_free_q = free_q.clone();
    let compressor_block_q = block_q.clone();
    let compressor_history_q = history_q.clone();
    let compressor_handle = thread::spawn(move || {
        compressor::run(
            &compressor_q,
            &compressor_free_q,
            &compressor_block_q,
            &compressor_history_q,
            body_len,
            &saveset_id,
        )
    });

    let finisher_opts = opts.clone();
    let finisher_block_q = block_q.clone();
    let finisher_base: PathBuf = saveset_base.to_path_buf();
    let finisher_handle =
        thread::spawn(move || finisher::run(&finisher_block_q, &finisher_base, &finisher_opts));

    let mut history = history.unwrap_or_else(|| Box::new(NullHistorySink));
    let history_handle_q = history_q.clone();
    let history_handle = thread::spawn(move || {
        loop {
            match history_handle_q.dequeue() {
                Some(rec) => {
                    let _ = history.record(rec);
                }
                None => break,
            }
        }
        let _ = history.close();
    });

    let walk_result = walker::walk(root, fs, opts, &producer_q, &free_q);

    // Walker always pushes End, even on error, so downstream threads
    // terminate; join before propagating the walker's own error.
    producer_q.enqueue(ProducerSlot::End);

    compressor_handle.join().map_err(|_| WriterError::WorkerPanicked)?;
    let finisher_stats = finisher_handle.join().map_err(|_| WriterError::WorkerPanicked)??;
    history_handle.join().map_err(|_| WriterError::WorkerPanicked)?;

    let walk_stats = walk_result?;

    Ok(BackupStats {
        files: walk_stats.files,
        dirs: walk_stats.dirs,
        bytes_read: walk_stats.bytes_read,
        data_blocks: finisher_stats.data_blocks,
        parity_blocks: finisher_stats.parity_blocks,
        segments: finisher_stats.segments,
    })
}
