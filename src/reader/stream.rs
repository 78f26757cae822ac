//! Single-threaded saveset block stream: opens segment files in order,
//! verifies and decrypts each block, folds data blocks into the XOR
//! recovery machine, and exposes the result as two pull primitives —
//! raw (header) bytes and inflated (payload) bytes — to
//! [`super::restore`] (spec §4.3 "Reading a saveset").
//!
//! Grounded on `examples/original_source/ftbreader.h`/`ftbreader.cpp`
//! (`read_block`, `hash_xor_blocks`'s reader half, `resync`); the
//! forward-scan-for-a-landmark shape of [`Stream::resync`] borrows from
//! `sixcy::recovery::scanner::scan`'s block-by-block health walk.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use flate2::{Decompress, FlushDecompress, Status};

use crate::block::{self, Baseline, BlockHeader, BLOCK_HEADER_SIZE, ENCRYPT_REGION_OFFSET};
use crate::crypto::{cbc_decrypt_region, Cipher, Hasher};
use crate::error::{ReaderError, SsError};
use crate::header::{self, HeaderRecord};
use crate::segment;
use crate::simrderrs::SimRdErrs;
use crate::xor::{GroupOutcome, ReaderXorState};

/// Tunables the reader must be told out of band — block size and the
/// crypto/hash choice are not recoverable from an encrypted block's own
/// header, since decrypting it requires already knowing the cipher's
/// block size to size the read. These normally come from the same
/// `-blocksize`/`-encrypt`/`-hash` flags the backup run used.
#[derive(Clone)]
pub struct StreamConfig {
    pub block_size: u32,
    pub cipher: Option<Arc<dyn Cipher>>,
    pub hasher: Arc<Mutex<Box<dyn Hasher>>>,
    pub key: Option<Vec<u8>>,
}

enum RawBlock {
    Data { seqno: u32, body: Vec<u8>, hdroffs: u32 },
    Parity { xorno: u32, xorbc: u8, body: Vec<u8> },
}

/// Reads successive whole blocks across one or more segment files,
/// resolves XOR recovery, and yields data blocks in dense seqno order.
/// Parity blocks never escape this layer.
struct RawBlockCursor {
    base: PathBuf,
    cfg: StreamConfig,
    baseline: Baseline,
    body_len: usize,
    tail_len: usize,
    file: File,
    segno: u32,
    single_file: bool,
    simrderrs: SimRdErrs,
    xor: ReaderXorState,
    expected_seqno: u32,
    pending: BTreeMap<u32, Vec<u8>>,
    hdroffs_for: HashMap<u32, u32>,
    seen: HashMap<(u32, usize), HashSet<u32>>,
    lost: HashSet<u32>,
}

impl RawBlockCursor {
    fn open(base: &Path, cfg: StreamConfig, simrderrs: SimRdErrs) -> Result<Self, ReaderError> {
        let (file, single_file) = match File::open(base) {
            Ok(f) => (f, true),
            Err(_) => (File::open(segment::segment_path(base, 1))?, false),
        };

        let mut cursor = Self {
            base: base.to_path_buf(),
            cfg,
            baseline: Baseline { l2bs: 0, xorgc: 0, xorsc: 0 },
            body_len: 0,
            tail_len: 0,
            file,
            segno: 1,
            single_file,
            simrderrs,
            xor: ReaderXorState::new(Baseline { l2bs: 0, xorgc: 0, xorsc: 0 }, 0),
            expected_seqno: 1,
            pending: BTreeMap::new(),
            hdroffs_for: HashMap::new(),
            seen: HashMap::new(),
            lost: HashSet::new(),
        };

        let first = cursor
            .read_verified_block()?
            .ok_or_else(|| ReaderError::Ss(SsError::BadBlock("empty saveset".into())))?;
        let baseline = first.0.baseline();
        if baseline.l2bs as u32 != cursor.cfg.block_size.trailing_zeros() {
            return Err(ReaderError::Ss(SsError::BadBlock("block size does not match configured baseline".into())));
        }
        let tail_len = {
            let hasher = cursor.cfg.hasher.lock().unwrap();
            crate::crypto::hash_tail_size(hasher.as_ref(), cursor.cfg.cipher.as_deref())
        };
        cursor.baseline = baseline;
        cursor.body_len = baseline.block_size() - BLOCK_HEADER_SIZE - tail_len;
        cursor.tail_len = tail_len;
        cursor.xor = ReaderXorState::new(baseline, cursor.body_len);
        cursor.ingest_verified(first.0, first.1, first.2);

        Ok(cursor)
    }

    /// Read, decrypt, and hash-verify one whole block. `None` at clean
    /// end of saveset (no more segments). A failed hash (real or
    /// simulated via `simrderrs`) is reported as `Ok(Some(.., false))` —
    /// the header fields are trusted regardless, since `magic`/`seqno`/
    /// `xorno`/`nonce` never leave the clear (spec §4.1).
    fn read_verified_block(&mut self) -> Result<Option<(BlockHeader, Vec<u8>, bool)>, ReaderError> {
        let block_size = if self.body_len == 0 { self.cfg.block_size as usize } else { self.baseline.block_size() };
        loop {
            let offset = self.file.stream_position().unwrap_or(0);
            let mut raw = vec![0u8; block_size];
            match read_exact_or_eof(&mut self.file, &mut raw)? {
                false if self.single_file => return Ok(None),
                false => {
                    self.segno += 1;
                    match File::open(segment::segment_path(&self.base, self.segno)) {
                        Ok(f) => {
                            self.file = f;
                            continue;
                        }
                        Err(_) => return Ok(None),
                    }
                }
                true => {
                    // First parse gets at the cleartext nonce (needed as
                    // the CBC IV); the fields from `hdroffs` on are still
                    // ciphertext until decrypted, so header is re-parsed
                    // below once `raw` holds plaintext throughout.
                    let header = BlockHeader::read(&raw)?;
                    let simulated = self.simrderrs.should_fail(offset);
                    if let Some(cipher) = &self.cfg.cipher {
                        cbc_decrypt_region(cipher.as_ref(), &header.nonce, &mut raw[ENCRYPT_REGION_OFFSET..])?;
                    }
                    let header = BlockHeader::read(&raw)?;
                    let body_len = if self.body_len == 0 {
                        block_size - BLOCK_HEADER_SIZE - crate::crypto::hash_tail_size(
                            self.cfg.hasher.lock().unwrap().as_ref(),
                            self.cfg.cipher.as_deref(),
                        )
                    } else {
                        self.body_len
                    };
                    let body = raw[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + body_len].to_vec();
                    let mut ok = !simulated && self.verify_hash(&raw, body_len);
                    if ok && self.body_len != 0 && block::validate(&header, &self.baseline, &body).is_err() {
                        ok = false;
                    }
                    return Ok(Some((header, body, ok)));
                }
            }
        }
    }

    fn verify_hash(&self, raw: &[u8], body_len: usize) -> bool {
        let tail_start = BLOCK_HEADER_SIZE + body_len;
        let mut hasher = self.cfg.hasher.lock().unwrap();
        if let Some(key) = &self.cfg.key {
            hasher.set_key(key);
        }
        let digest_size = hasher.digest_size();
        let mut computed = vec![0u8; digest_size];
        hasher.update(&raw[..tail_start]);
        hasher.finish_into(&mut computed);
        computed == raw[tail_start..tail_start + digest_size]
    }

    fn note_seen(&mut self, seqno: u32) {
        let xorgc = self.baseline.xorgc.max(1) as u32;
        let span_data = self.baseline.span_data_blocks().max(1);
        let span = (seqno - 1) / span_data;
        let g = ((seqno - 1) % xorgc) as usize;
        self.seen.entry((span, g)).or_default().insert(seqno);
    }

    fn expected_in_group(&self, span: u32, g: usize) -> Vec<u32> {
        let xorgc = self.baseline.xorgc.max(1) as u32;
        let span_data = self.baseline.span_data_blocks();
        let base = span * span_data + g as u32 + 1;
        (0..self.baseline.xorsc as u32).map(|k| base + k * xorgc).collect()
    }

    fn resolve_group(&mut self, span: u32, g: usize, outcome: Option<GroupOutcome>) {
        let expected = self.expected_in_group(span, g);
        let seen = self.seen.remove(&(span, g)).unwrap_or_default();
        let missing: Vec<u32> = expected.into_iter().filter(|s| !seen.contains(s)).collect();
        match outcome {
            Some(GroupOutcome::Recovered(body)) => {
                if let Some(&seqno) = missing.first() {
                    // The lost block's own hdroffs can't be recovered —
                    // recovered data never anchors a resync landmark.
                    self.hdroffs_for.insert(seqno, 0);
                    self.pending.insert(seqno, body);
                }
            }
            Some(GroupOutcome::Verified) => {}
            Some(GroupOutcome::Mismatch) | Some(GroupOutcome::Unrecoverable) | None => {
                for seqno in missing {
                    self.lost.insert(seqno);
                }
            }
        }
    }

    fn ingest_verified(&mut self, header: BlockHeader, body: Vec<u8>, ok: bool) {
        let xorgc = self.baseline.xorgc.max(1) as u32;
        if !header.is_parity() {
            if ok {
                // Fold into the parity accumulator immediately — a
                // group's parity block may arrive before this data
                // block is actually popped off `pending` by the
                // consumer, so recovery math can't wait for that.
                self.xor.observe_data(header.seqno, &body);
                self.note_seen(header.seqno);
                self.hdroffs_for.insert(header.seqno, header.hdroffs);
                self.pending.insert(header.seqno, body);
            }
            // A data block that fails verification is simply never
            // marked seen; its absence is resolved when the group's
            // parity block is (or isn't) later read.
        } else {
            let span = (header.xorno - 1) / xorgc;
            let g = ((header.xorno - 1) % xorgc) as usize;
            if ok {
                let outcome = self.xor.observe_parity(header.xorno, header.xorbc, &body);
                self.resolve_group(span, g, Some(outcome));
            } else {
                self.resolve_group(span, g, None);
            }
        }
    }

    /// Discard the data block currently stuck at `expected_seqno` and
    /// advance past it, used once a caller has accepted a
    /// [`SsError::BlockLost`] and is resyncing.
    fn skip_lost(&mut self) {
        self.lost.remove(&self.expected_seqno);
        self.expected_seqno += 1;
    }

    /// Pop the next data block in dense seqno order, reading and
    /// resolving further raw blocks as needed.
    fn next_data_block(&mut self) -> Result<(u32, Vec<u8>, u32), ReaderError> {
        loop {
            if let Some(body) = self.pending.remove(&self.expected_seqno) {
                let hdroffs = self.hdroffs_for.remove(&self.expected_seqno).unwrap_or(0);
                let seqno = self.expected_seqno;
                self.expected_seqno += 1;
                return Ok((seqno, body, hdroffs));
            }
            if self.lost.contains(&self.expected_seqno) {
                return Err(ReaderError::Ss(SsError::BlockLost(self.expected_seqno)));
            }
            match self.read_verified_block()? {
                None => return Err(ReaderError::Ss(SsError::SavesetEnded)),
                Some((header, body, ok)) => self.ingest_verified(header, body, ok),
            }
        }
    }
}

fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut total = 0usize;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            if total == 0 {
                return Ok(false);
            }
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated block"));
        }
        total += n;
    }
    Ok(true)
}

/// Header/payload layer over [`RawBlockCursor`]: headers are read raw
/// (never compressed); every payload that follows one is inflated
/// through a deflate stream that restarts fresh after each header, per
/// the compressor's framing (spec §4.2).
pub struct Stream {
    cursor: RawBlockCursor,
    inflate: Option<Decompress>,
    cur_body: Vec<u8>,
    cur_off: usize,
}

impl Stream {
    pub fn open(base: &Path, cfg: StreamConfig, simrderrs: SimRdErrs) -> Result<Self, ReaderError> {
        Ok(Self { cursor: RawBlockCursor::open(base, cfg, simrderrs)?, inflate: None, cur_body: Vec::new(), cur_off: 0 })
    }

    fn fill_body(&mut self) -> Result<(), ReaderError> {
        if self.cur_off < self.cur_body.len() {
            return Ok(());
        }
        match self.cursor.next_data_block() {
            Ok((_, body, _)) => {
                self.cur_body = body;
                self.cur_off = 0;
                Ok(())
            }
            Err(ReaderError::Ss(SsError::BlockLost(_))) => self.resync(),
            Err(e) => Err(e),
        }
    }

    /// Drop the current inflater and skip forward past lost blocks until
    /// a block carrying a non-zero `hdroffs` is found — the next
    /// reliable header boundary (spec §9 open question, reinit-on-resync
    /// per `DESIGN.md`).
    fn resync(&mut self) -> Result<(), ReaderError> {
        loop {
            match self.cursor.next_data_block() {
                Ok((_, body, hdroffs)) if hdroffs != 0 => {
                    self.cur_body = body;
                    self.cur_off = hdroffs as usize;
                    self.inflate = None;
                    return Ok(());
                }
                Ok(_) => continue,
                Err(ReaderError::Ss(SsError::BlockLost(_))) => {
                    self.cursor.skip_lost();
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn read_raw(&mut self, n: usize) -> Result<Vec<u8>, ReaderError> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            self.fill_body()?;
            let avail = self.cur_body.len() - self.cur_off;
            let take = avail.min(n - out.len());
            out.extend_from_slice(&self.cur_body[self.cur_off..self.cur_off + take]);
            self.cur_off += take;
        }
        Ok(out)
    }

    fn read_inflated(&mut self, n: usize) -> Result<Vec<u8>, ReaderError> {
        let mut out = vec![0u8; n];
        let mut produced = 0usize;
        if self.inflate.is_none() {
            self.inflate = Some(Decompress::new(false));
        }
        while produced < n {
            self.fill_body()?;
            let inflater = self.inflate.as_mut().unwrap();
            let before_in = inflater.total_in();
            let before_out = inflater.total_out();
            let status = inflater
                .decompress(&self.cur_body[self.cur_off..], &mut out[produced..], FlushDecompress::None)
                .map_err(|_| ReaderError::Ss(SsError::BadBlock("inflate error".into())))?;
            self.cur_off += (inflater.total_in() - before_in) as usize;
            produced += (inflater.total_out() - before_out) as usize;
            if status == Status::StreamEnd {
                self.inflate = Some(Decompress::new(false));
            }
        }
        Ok(out)
    }

    /// Read the next file-header record, consuming its raw bytes and
    /// restarting the inflater for whatever payload follows.
    pub fn next_header(&mut self) -> Result<HeaderRecord, ReaderError> {
        let mut buf = self.read_raw(header::HEADER_FIXED_SIZE)?;
        let nameln = u16::from_le_bytes(buf[56..58].try_into().unwrap()) as usize;
        if nameln > 0 {
            buf.extend_from_slice(&self.read_raw(nameln)?);
        }
        let (rec, _) = header::decode(&buf)?;
        self.inflate = None;
        Ok(rec)
    }

    /// Read exactly `len` bytes of this header's payload.
    pub fn read_payload(&mut self, len: usize) -> Result<Vec<u8>, ReaderError> {
        self.read_inflated(len)
    }
}
