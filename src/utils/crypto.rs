//! XChaCha20-Poly1305 authenticated encryption with caller-supplied key and nonce.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use std::fmt;
use std::io;

use crate::error::{ProtocolError, Result};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 tag appended to every ciphertext
pub const TAG_SIZE: usize = 16;

pub struct Crypto {
    cipher: XChaCha20Poly1305,
}

impl Crypto {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// # Errors
    /// Returns `ProtocolError::EncryptionFailure` if the cipher rejects the input
    pub fn encrypt(&self, data: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(XNonce::from_slice(nonce), data)
            .map_err(|_| ProtocolError::EncryptionFailure)
    }

    /// # Errors
    /// Returns `ProtocolError::DecryptionFailure` on authentication failure
    pub fn decrypt(&self, data: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(XNonce::from_slice(nonce), data)
            .map_err(|_| ProtocolError::DecryptionFailure)
    }

    pub fn generate_nonce() -> Result<[u8; NONCE_SIZE]> {
        let mut nonce = [0u8; NONCE_SIZE];
        fill_random(&mut nonce)?;
        Ok(nonce)
    }

    pub fn generate_key() -> Result<[u8; KEY_SIZE]> {
        let mut key = [0u8; KEY_SIZE];
        fill_random(&mut key)?;
        Ok(key)
    }
}

impl fmt::Debug for Crypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crypto").finish_non_exhaustive()
    }
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::fill(buf).map_err(|e| ProtocolError::Io(io::Error::other(e.to_string())))
}
