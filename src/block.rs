//! Block format — fully self-describing, fixed-size, hashed and optionally
//! encrypted.
//!
//! # On-disk layout (40-byte header, all multi-byte fields little-endian)
//!
//! ```text
//! Offset  Size  Field                           Encrypted?
//!    0      8   magic        = "ftbackup"       no
//!    8      4   seqno        monotonic, from 1  no
//!   12      4   xorno        0 for data blocks  no
//!   16     16   nonce        random per-block IV  no (it IS the IV)
//!   32      4   hdroffs      offset of 1st header in body, or 0  yes
//!   36      1   l2bs         log2(block size)                   yes
//!   37      1   xorbc        data blocks XORed into this parity block  yes
//!   38      1   xorgc        parity group count                 yes
//!   39      1   xorsc        span count (data blocks per group per span) yes
//!   40      *   body         compressed data or parity payload  yes
//!    *       *   hash tail   keyed hash, variable size           yes
//! ```
//!
//! `magic`/`seqno`/`xorno` never leave the clear — the reader must be able
//! to sort and locate blocks without the decryption key. `nonce` also stays
//! in the clear: it is the CBC initialization vector, not itself a target
//! of encryption (encrypting it under itself would make the first
//! ciphertext chunk constant regardless of the nonce's value). Everything
//! from `hdroffs` onward — through the body and the hash tail — is covered
//! by the encryption transform when a cipher is active (see
//! [`crate::crypto`]).

use crate::error::SsError;

/// Magic stamped into every block, data or parity. Never encrypted.
pub const BLOCK_MAGIC: &[u8; 8] = b"ftbackup";

/// Magic stamped at the start of every file header record (see `header.rs`).
pub const HEADER_MAGIC: &[u8; 8] = b"ftbheder";

/// Fixed byte size of the in-clear-plus-encrypted block header, before body.
pub const BLOCK_HEADER_SIZE: usize = 40;

/// Byte offset where the encryption transform begins (the `hdroffs` field).
/// `nonce` (bytes 16..32) precedes it and stays in the clear as the CBC IV.
pub const ENCRYPT_REGION_OFFSET: usize = 32;

/// Smallest permitted block size (4 KiB).
pub const MIN_BLOCK_SIZE: u32 = 4096;

/// Largest permitted block size (1 GiB).
pub const MAX_BLOCK_SIZE: u64 = 1 << 30;

/// Default block size (32 KiB), matching the historical reference default.
pub const DEFAULT_BLOCK_SIZE: u32 = 32768;

/// Default span length (data blocks per parity block per group).
pub const DEFAULT_XORSC: u8 = 31;

/// Default parity group count.
pub const DEFAULT_XORGC: u8 = 2;

/// The block-format parameters that must be identical across an entire
/// saveset. Captured from the first block the reader validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub l2bs: u8,
    pub xorgc: u8,
    pub xorsc: u8,
}

impl Baseline {
    pub fn block_size(&self) -> usize {
        1usize << self.l2bs
    }

    /// Number of data blocks in a full span across all groups.
    pub fn span_data_blocks(&self) -> u32 {
        self.xorgc as u32 * self.xorsc as u32
    }
}

/// A decoded block header (everything before the body).
#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub seqno: u32,
    pub xorno: u32,
    pub nonce: [u8; 16],
    pub hdroffs: u32,
    pub l2bs: u8,
    pub xorbc: u8,
    pub xorgc: u8,
    pub xorsc: u8,
}

impl BlockHeader {
    /// `true` when this is a parity (XOR) block rather than a data block.
    pub fn is_parity(&self) -> bool {
        self.xorno != 0
    }

    pub fn baseline(&self) -> Baseline {
        Baseline { l2bs: self.l2bs, xorgc: self.xorgc, xorsc: self.xorsc }
    }

    /// Write the 40-byte header into the front of `block` (which must be
    /// at least `BLOCK_HEADER_SIZE` bytes long).
    pub fn write(&self, block: &mut [u8]) {
        assert!(block.len() >= BLOCK_HEADER_SIZE);
        block[0..8].copy_from_slice(BLOCK_MAGIC);
        block[8..12].copy_from_slice(&self.seqno.to_le_bytes());
        block[12..16].copy_from_slice(&self.xorno.to_le_bytes());
        block[16..32].copy_from_slice(&self.nonce);
        block[32..36].copy_from_slice(&self.hdroffs.to_le_bytes());
        block[36] = self.l2bs;
        block[37] = self.xorbc;
        block[38] = self.xorgc;
        block[39] = self.xorsc;
    }

    /// Parse the 40-byte header from the front of `block`. Does not
    /// validate consistency against a baseline — see [`validate`].
    pub fn read(block: &[u8]) -> Result<Self, SsError> {
        if block.len() < BLOCK_HEADER_SIZE {
            return Err(SsError::BadBlock("block shorter than header".into()));
        }
        if &block[0..8] != BLOCK_MAGIC {
            return Err(SsError::BadBlock("bad block magic".into()));
        }
        let seqno = u32::from_le_bytes(block[8..12].try_into().unwrap());
        let xorno = u32::from_le_bytes(block[12..16].try_into().unwrap());
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&block[16..32]);
        let hdroffs = u32::from_le_bytes(block[32..36].try_into().unwrap());
        let l2bs = block[36];
        let xorbc = block[37];
        let xorgc = block[38];
        let xorsc = block[39];
        Ok(Self { seqno, xorno, nonce, hdroffs, l2bs, xorbc, xorgc, xorsc })
    }
}

/// Byte range of the body within a block of the given baseline and hash
/// tail size. The body runs from the end of the fixed header to the start
/// of the hash tail.
pub fn body_range(baseline: &Baseline, tail_size: usize) -> std::ops::Range<usize> {
    BLOCK_HEADER_SIZE..baseline.block_size() - tail_size
}

/// Structural validation per spec §4.1. Hash verification is the caller's
/// responsibility and must happen first; this only checks the fields that
/// remain once the block is known to be authentic.
pub fn validate(header: &BlockHeader, baseline: &Baseline, body: &[u8]) -> Result<(), SsError> {
    if header.l2bs != baseline.l2bs || header.xorgc != baseline.xorgc || header.xorsc != baseline.xorsc {
        return Err(SsError::BadBlock("block parameters differ from baseline".into()));
    }
    if header.xorbc > header.xorsc {
        return Err(SsError::BadBlock("xorbc exceeds xorsc".into()));
    }
    if header.hdroffs != 0 {
        let offs = header.hdroffs as usize;
        if offs >= body.len() {
            return Err(SsError::BadBlock("hdroffs out of range".into()));
        }
        let remaining = body.len() - offs;
        let check_len = remaining.min(HEADER_MAGIC.len());
        if &body[offs..offs + check_len] != &HEADER_MAGIC[..check_len] {
            return Err(SsError::BadBlock("hdroffs does not point at a header".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BlockHeader {
        BlockHeader {
            seqno: 7,
            xorno: 0,
            nonce: [0x42; 16],
            hdroffs: 128,
            l2bs: 15,
            xorbc: 0,
            xorgc: 2,
            xorsc: 31,
        }
    }

    #[test]
    fn header_roundtrip() {
        let h = sample();
        let mut buf = vec![0u8; BLOCK_HEADER_SIZE];
        h.write(&mut buf);
        let back = BlockHeader::read(&buf).unwrap();
        assert_eq!(back.seqno, h.seqno);
        assert_eq!(back.xorno, h.xorno);
        assert_eq!(back.nonce, h.nonce);
        assert_eq!(back.hdroffs, h.hdroffs);
        assert_eq!(back.l2bs, h.l2bs);
        assert_eq!(back.xorgc, h.xorgc);
        assert_eq!(back.xorsc, h.xorsc);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut buf = vec![0u8; BLOCK_HEADER_SIZE];
        sample().write(&mut buf);
        buf[0] = b'x';
        assert!(BlockHeader::read(&buf).is_err());
    }

    #[test]
    fn validate_checks_baseline() {
        let h = sample();
        let baseline = h.baseline();
        let body = vec![0u8; 1000];
        assert!(validate(&h, &baseline, &body).is_err()); // hdroffs 128 but no magic there
        let mut body2 = vec![0u8; 1000];
        body2[128..136].copy_from_slice(HEADER_MAGIC);
        assert!(validate(&h, &baseline, &body2).is_ok());

        let mut wrong = baseline;
        wrong.xorgc = 9;
        assert!(validate(&h, &wrong, &body2).is_err());
    }

    #[test]
    fn xorbc_exceeding_xorsc_rejected() {
        let mut h = sample();
        h.xorbc = 99;
        let baseline = h.baseline();
        assert!(validate(&h, &baseline, &vec![0u8; 100]).is_err());
    }
}
