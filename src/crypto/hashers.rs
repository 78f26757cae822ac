//! Keyed hasher implementations of the [`super::Hasher`] trait.
//!
//! "Keyed" here follows spec §6: the key material is folded into the
//! hash input ahead of the block data, so two parties without the key
//! cannot forge a block hash even though the hash function itself
//! (SHA-1/SHA-256) is not a dedicated MAC. `Blake3Hasher` uses the
//! algorithm's native keyed mode instead, which is a real keyed MAC.

use sha1::{Digest as Sha1Digest, Sha1};
use sha2::{Digest as Sha256Digest, Sha256};

use super::Hasher;

pub struct Sha1Hasher {
    key: Vec<u8>,
    buf: Vec<u8>,
}

impl Sha1Hasher {
    pub fn new() -> Self {
        Self { key: Vec::new(), buf: Vec::new() }
    }
}

impl Hasher for Sha1Hasher {
    fn name(&self) -> &'static str {
        "SHA1"
    }
    fn digest_size(&self) -> usize {
        20
    }
    fn set_key(&mut self, key: &[u8]) {
        self.key = key.to_vec();
    }
    fn update(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }
    fn finish_into(&mut self, out: &mut [u8]) {
        let mut h = Sha1::new();
        h.update(&self.key);
        h.update(&self.buf);
        out.copy_from_slice(&h.finalize());
        self.buf.clear();
    }
}

pub struct Sha256Hasher {
    key: Vec<u8>,
    buf: Vec<u8>,
}

impl Sha256Hasher {
    pub fn new() -> Self {
        Self { key: Vec::new(), buf: Vec::new() }
    }
}

impl Hasher for Sha256Hasher {
    fn name(&self) -> &'static str {
        "SHA256"
    }
    fn digest_size(&self) -> usize {
        32
    }
    fn set_key(&mut self, key: &[u8]) {
        self.key = key.to_vec();
    }
    fn update(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }
    fn finish_into(&mut self, out: &mut [u8]) {
        let mut h = Sha256::new();
        h.update(&self.key);
        h.update(&self.buf);
        out.copy_from_slice(&h.finalize());
        self.buf.clear();
    }
}

pub struct Blake3Hasher {
    key: [u8; 32],
    buf: Vec<u8>,
}

impl Blake3Hasher {
    pub fn new() -> Self {
        Self { key: [0u8; 32], buf: Vec::new() }
    }
}

impl Hasher for Blake3Hasher {
    fn name(&self) -> &'static str {
        "BLAKE3"
    }
    fn digest_size(&self) -> usize {
        32
    }
    fn set_key(&mut self, key: &[u8]) {
        let mut k = [0u8; 32];
        let n = key.len().min(32);
        k[..n].copy_from_slice(&key[..n]);
        self.key = k;
    }
    fn update(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }
    fn finish_into(&mut self, out: &mut [u8]) {
        let hash = blake3::keyed_hash(&self.key, &self.buf);
        out.copy_from_slice(hash.as_bytes());
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_deterministic() {
        let mut h = Sha1Hasher::new();
        h.set_key(b"k");
        h.update(b"abc");
        let mut out = vec![0u8; 20];
        h.finish_into(&mut out);
        let mut h2 = Sha1Hasher::new();
        h2.set_key(b"k");
        h2.update(b"abc");
        let mut out2 = vec![0u8; 20];
        h2.finish_into(&mut out2);
        assert_eq!(out, out2);
    }

    #[test]
    fn blake3_key_changes_digest() {
        let mut h1 = Blake3Hasher::new();
        h1.set_key(&[1u8; 32]);
        h1.update(b"data");
        let mut d1 = vec![0u8; 32];
        h1.finish_into(&mut d1);

        let mut h2 = Blake3Hasher::new();
        h2.set_key(&[2u8; 32]);
        h2.update(b"data");
        let mut d2 = vec![0u8; 32];
        h2.finish_into(&mut d2);

        assert_ne!(d1, d2);
    }

    #[test]
    fn reuse_after_finish_resets_buffer() {
        let mut h = Sha256Hasher::new();
        h.update(b"first");
        let mut out1 = vec![0u8; 32];
        h.finish_into(&mut out1);
        h.update(b"second");
        let mut out2 = vec![0u8; 32];
        h.finish_into(&mut out2);
        assert_ne!(out1, out2);
    }
}
