//! AES block-cipher implementations of the [`super::Cipher`] trait, built
//! on raw `aes`/`cipher` block primitives rather than an AEAD mode — the
//! core drives its own bespoke CBC chaining (see `crypto::mod`).

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};

use super::Cipher;
use crate::error::CryptoError;

pub struct Aes128Cipher {
    inner: Option<Aes128>,
}

impl Aes128Cipher {
    pub fn new() -> Self {
        Self { inner: None }
    }
}

impl Cipher for Aes128Cipher {
    fn name(&self) -> &'static str {
        "AES128"
    }

    fn block_size(&self) -> usize {
        16
    }

    fn default_key_size(&self) -> usize {
        16
    }

    fn set_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        if key.len() != 16 {
            return Err(CryptoError::BadKeyLength { got: key.len(), want: 16 });
        }
        self.inner = Some(Aes128::new(GenericArray::from_slice(key)));
        Ok(())
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        let cipher = self.inner.as_ref().expect("key not set");
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        let cipher = self.inner.as_ref().expect("key not set");
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

pub struct Aes256Cipher {
    inner: Option<Aes256>,
}

impl Aes256Cipher {
    pub fn new() -> Self {
        Self { inner: None }
    }
}

impl Cipher for Aes256Cipher {
    fn name(&self) -> &'static str {
        "AES256"
    }

    fn block_size(&self) -> usize {
        16
    }

    fn default_key_size(&self) -> usize {
        32
    }

    fn set_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        if key.len() != 32 {
            return Err(CryptoError::BadKeyLength { got: key.len(), want: 32 });
        }
        self.inner = Some(Aes256::new(GenericArray::from_slice(key)));
        Ok(())
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        let cipher = self.inner.as_ref().expect("key not set");
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        let cipher = self.inner.as_ref().expect("key not set");
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
}
