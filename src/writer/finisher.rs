//! The block finisher: dequeues filled block bodies, folds each data
//! block into its rotating XOR parity accumulator, stamps the 40-byte
//! header, hashes and optionally encrypts the result, and streams it to
//! the current segment file (spec §4.1/§4.2 "Block finisher
//! responsibilities").

use std::fs::File;
use std::io::Write;
use std::path::Path;

use rand::RngCore;

use crate::block::{BlockHeader, BLOCK_HEADER_SIZE, ENCRYPT_REGION_OFFSET};
use crate::crypto::cbc_encrypt_region;
use crate::error::WriterError;
use crate::perf::WriteBuffer;
use crate::queue::SlotQueue;
use crate::segment;
use crate::writer::{FilledBlock, WriterOptions};
use crate::xor::WriterXorState;

/// Counts returned to [`super::backup`] once the finisher thread exits.
#[derive(Debug, Default, Clone)]
pub(crate) struct FinisherStats {
    pub data_blocks: u64,
    pub parity_blocks: u64,
    pub segments: u32,
}

struct SegmentWriter<'a> {
    base: &'a Path,
    opts: &'a WriterOptions,
    current_no: u32,
    out: WriteBuffer<File>,
    bytes_in_segment: u64,
}

impl<'a> SegmentWriter<'a> {
    fn open(base: &'a Path, opts: &'a WriterOptions, no: u32) -> std::io::Result<Self> {
        let path = if opts.segment_size == 0 { base.to_path_buf() } else { segment::segment_path(base, no) };
        let file = File::create(path)?;
        Ok(Self { base, opts, current_no: no, out: WriteBuffer::new(file, opts.block_size as usize * 4), bytes_in_segment: 0 })
    }

    fn write_block(&mut self, block: &[u8]) -> std::io::Result<()> {
        self.out.write_all(block)?;
        self.bytes_in_segment += block.len() as u64;
        Ok(())
    }

    /// Roll to the next segment file if the configured size has been
    /// reached. Only called at span boundaries, so the reader never has
    /// to reason about XOR accumulators spanning a segment split.
    fn maybe_roll(&mut self) -> std::io::Result<bool> {
        if self.opts.segment_size == 0 || self.bytes_in_segment < self.opts.segment_size {
            return Ok(false);
        }
        self.out.flush()?;
        self.current_no += 1;
        let path = segment::segment_path(self.base, self.current_no);
        let file = File::create(path)?;
        self.out = WriteBuffer::new(file, self.opts.block_size as usize * 4);
        self.bytes_in_segment = 0;
        Ok(true)
    }

    fn close(mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}

/// Stamp, hash, and optionally encrypt one block. `hdroffs`/`xorbc` are
/// zero for parity blocks; `xorno` is zero for data blocks (spec §4.1).
fn build_block(
    opts: &WriterOptions,
    seqno: u32,
    xorno: u32,
    hdroffs: u32,
    xorbc: u8,
    body: &[u8],
) -> Result<Vec<u8>, WriterError> {
    let baseline = opts.baseline();
    let total = opts.block_size as usize;
    let mut buf = vec![0u8; total];

    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);

    let header = BlockHeader {
        seqno,
        xorno,
        nonce,
        hdroffs,
        l2bs: baseline.l2bs,
        xorbc,
        xorgc: baseline.xorgc,
        xorsc: baseline.xorsc,
    };
    header.write(&mut buf[..BLOCK_HEADER_SIZE]);
    buf[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + body.len()].copy_from_slice(body);

    let tail_start = BLOCK_HEADER_SIZE + body.len();
    {
        let mut hasher = opts.hasher.lock().unwrap();
        if let Some(key) = &opts.key {
            hasher.set_key(key);
        }
        let digest_size = hasher.digest_size();
        hasher.update(&buf[..tail_start]);
        hasher.finish_into(&mut buf[tail_start..tail_start + digest_size]);
    }

    if let Some(cipher) = &opts.cipher {
        cbc_encrypt_region(cipher.as_ref(), &nonce, &mut buf[ENCRYPT_REGION_OFFSET..])?;
    }

    Ok(buf)
}

pub(crate) fn run(
    block_q: &SlotQueue<Option<FilledBlock>>,
    saveset_base: &Path,
    opts: &WriterOptions,
) -> Result<FinisherStats, WriterError> {
    let baseline = opts.baseline();
    let body_len = {
        let hasher = opts.hasher.lock().unwrap();
        opts.block_size as usize
            - BLOCK_HEADER_SIZE
            - crate::crypto::hash_tail_size(hasher.as_ref(), opts.cipher.as_deref())
    };

    let mut xor = WriterXorState::new(baseline, body_len);
    let mut seg = SegmentWriter::open(saveset_base, opts, 1)?;
    let mut stats = FinisherStats { segments: 1, ..Default::default() };
    // Dense across data blocks only (spec §3/§8): a parity block's own
    // `seqno` field is never consulted by the reader (it dispatches parity
    // purely off `xorno`), so parity blocks are stamped with the seqno of
    // the last data block rather than consuming a seqno of their own —
    // advancing it per parity block would desync the dense-seqno invariant
    // data blocks must keep.
    let mut seqno = 0u32;

    loop {
        let Some(filled) = block_q.dequeue() else { break };
        seqno += 1;
        let block = build_block(opts, seqno, 0, filled.hdroffs, 0, &filled.body)?;
        seg.write_block(&block)?;
        stats.data_blocks += 1;
        xor.accumulate(seqno, &filled.body);

        let span_boundary = if baseline.xorgc == 0 {
            seqno % baseline.xorsc.max(1) as u32 == 0
        } else {
            xor.span_closes(seqno)
        };

        if baseline.xorgc != 0 && span_boundary {
            for parity in xor.close_span() {
                let pblock = build_block(opts, seqno, parity.xorno, 0, parity.xorbc, &parity.body)?;
                seg.write_block(&pblock)?;
                stats.parity_blocks += 1;
            }
        }

        if span_boundary && seg.maybe_roll()? {
            stats.segments += 1;
        }
    }

    seg.close()?;
    Ok(stats)
}
