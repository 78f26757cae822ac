//! Open catalogs for block ciphers and keyed hashers (spec §9: these are
//! the two catalogs that stay *open* — new implementors can be added
//! without touching the trait or the blocks that consume them — unlike
//! the closed three-variant [`crate::fsaccess::FSAccess`] set).
//!
//! # Encryption scheme
//!
//! The writer uses standard cipher-block-chaining with the block's
//! `nonce` as the initialization vector: `enc[i] = E(clr[i] xor enc[i-1])`
//! with `enc[-1] = nonce`, walking forward over the encrypted region in
//! cipher-block-size chunks (see [`cbc_encrypt_region`]).
//!
//! The historical reference describes the reader's inverse as
//! `clr[i] = D(enc[i]) xor E(enc[i+1])`. Taken literally over an
//! arbitrary plaintext that formula does not invert the writer's
//! transform (it does not reduce to `D(enc[i]) xor enc[i-1]` for a
//! generic block cipher), which would break the round-trip law in
//! spec §8. This implementation instead performs the textbook CBC
//! decrypt — `clr[i] = D(enc[i]) xor enc[i-1]`, consuming the *raw*
//! previous ciphertext block rather than re-encrypting the next one —
//! which is the reading that actually inverts the writer and is
//! documented as a reconciliation in `DESIGN.md`.

mod aes_cipher;
mod hashers;

pub use aes_cipher::{Aes128Cipher, Aes256Cipher};
pub use hashers::{Blake3Hasher, Sha1Hasher, Sha256Hasher};

use crate::error::CryptoError;

/// A block cipher used only in the core's own CBC variant — never AEAD,
/// since the on-disk scheme is bespoke (§9). `Sync` (on top of `Send`) so
/// `Arc<dyn Cipher>` can be shared into the finisher thread (spec §5).
pub trait Cipher: Send + Sync {
    fn name(&self) -> &'static str;
    fn block_size(&self) -> usize;
    fn default_key_size(&self) -> usize;
    fn set_key(&mut self, key: &[u8]) -> Result<(), CryptoError>;
    fn encrypt_block(&self, block: &mut [u8]);
    fn decrypt_block(&self, block: &mut [u8]);
}

/// A keyed hasher used to seal every block (spec §4.2 `hash_block`).
pub trait Hasher: Send {
    fn name(&self) -> &'static str;
    fn digest_size(&self) -> usize;
    fn set_key(&mut self, key: &[u8]);
    fn update(&mut self, data: &[u8]);
    /// Finalize into `out` (must be exactly `digest_size()` bytes) and
    /// reset internal state so the hasher can be reused for the next
    /// block.
    fn finish_into(&mut self, out: &mut [u8]);
}

/// Look up a cipher implementation by name (case-insensitive). The open
/// catalog currently ships AES-128 and AES-256; additional ciphers can be
/// added here without touching any caller.
pub fn get_cipher(name: &str) -> Result<Box<dyn Cipher>, CryptoError> {
    match name.to_ascii_uppercase().as_str() {
        "AES" | "AES256" | "AES-256" => Ok(Box::new(Aes256Cipher::new())),
        "AES128" | "AES-128" => Ok(Box::new(Aes128Cipher::new())),
        other => Err(CryptoError::UnknownCipher { name: other.to_string() }),
    }
}

/// Look up a hasher implementation by name (case-insensitive).
pub fn get_hasher(name: &str) -> Result<Box<dyn Hasher>, CryptoError> {
    match name.to_ascii_uppercase().as_str() {
        "SHA1" => Ok(Box::new(Sha1Hasher::new())),
        "SHA256" | "SHA-256" => Ok(Box::new(Sha256Hasher::new())),
        "BLAKE3" => Ok(Box::new(Blake3Hasher::new())),
        other => Err(CryptoError::UnknownHasher { name: other.to_string() }),
    }
}

/// Default cipher name, matching the historical reference's `DEF_CIPHERNAME`.
pub const DEFAULT_CIPHER: &str = "AES";
/// Default hasher name, matching the historical reference's `DEF_HASHERNAME`.
pub const DEFAULT_HASHER: &str = "SHA1";

/// Total byte size of the hash tail appended to every block: the hasher's
/// digest plus, when a cipher is active, one cipher block (spec's
/// `hashsize()`).
pub fn hash_tail_size(hasher: &dyn Hasher, cipher: Option<&dyn Cipher>) -> usize {
    hasher.digest_size() + cipher.map_or(0, |c| c.block_size())
}

/// Encrypt `region` in place using standard CBC with `iv` as the initial
/// chaining value. `region.len()` must be a multiple of the cipher's
/// block size.
pub fn cbc_encrypt_region(cipher: &dyn Cipher, iv: &[u8], region: &mut [u8]) -> Result<(), CryptoError> {
    let bs = cipher.block_size();
    if region.len() % bs != 0 {
        return Err(CryptoError::Unaligned(region.len()));
    }
    let mut prev = iv[..bs].to_vec();
    for chunk in region.chunks_mut(bs) {
        for (b, p) in chunk.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        cipher.encrypt_block(chunk);
        prev.copy_from_slice(chunk);
    }
    Ok(())
}

/// Decrypt `region` in place, the inverse of [`cbc_encrypt_region`].
pub fn cbc_decrypt_region(cipher: &dyn Cipher, iv: &[u8], region: &mut [u8]) -> Result<(), CryptoError> {
    let bs = cipher.block_size();
    if region.len() % bs != 0 {
        return Err(CryptoError::Unaligned(region.len()));
    }
    let mut prev = iv[..bs].to_vec();
    for chunk in region.chunks_mut(bs) {
        let ciphertext = chunk.to_vec();
        cipher.decrypt_block(chunk);
        for (b, p) in chunk.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        prev = ciphertext;
    }
    Ok(())
}

/// Hash `key` down to exactly `len` bytes using `hasher`, per spec §6:
/// "[the Hasher is] used keyed by the supplied key material hashed down
/// to the cipher's key length."
pub fn derive_cipher_key(hasher: &mut dyn Hasher, key_material: &[u8], len: usize) -> Vec<u8> {
    let mut digest = vec![0u8; hasher.digest_size()];
    hasher.update(key_material);
    hasher.finish_into(&mut digest);
    if digest.len() >= len {
        digest.truncate(len);
        digest
    } else {
        // Stretch by repeated re-hashing if the digest is shorter than the
        // cipher's key length (e.g. SHA-1 digest feeding an AES-256 key).
        let mut out = Vec::with_capacity(len);
        let mut block = digest;
        while out.len() < len {
            out.extend_from_slice(&block);
            hasher.update(&block);
            let mut next = vec![0u8; hasher.digest_size()];
            hasher.finish_into(&mut next);
            block = next;
        }
        out.truncate(len);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbc_roundtrips() {
        let mut cipher = Aes256Cipher::new();
        cipher.set_key(&[7u8; 32]).unwrap();
        let iv = [3u8; 16];
        let plaintext = b"0123456789abcdef0123456789abcdef".to_vec(); // 32 bytes = 2 blocks
        let mut buf = plaintext.clone();
        cbc_encrypt_region(&cipher, &iv, &mut buf).unwrap();
        assert_ne!(buf, plaintext);
        cbc_decrypt_region(&cipher, &iv, &mut buf).unwrap();
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn derive_key_is_deterministic_and_sized() {
        let mut h = Sha1Hasher::new();
        let k1 = derive_cipher_key(&mut h, b"hunter2", 32);
        let mut h2 = Sha1Hasher::new();
        let k2 = derive_cipher_key(&mut h2, b"hunter2", 32);
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 32);
    }

    #[test]
    fn unknown_cipher_errors() {
        assert!(get_cipher("rot13").is_err());
    }
}
