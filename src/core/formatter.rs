//! # Formatters
//!
//! Stateless byte-to-byte transforms applied to complete, already delimited blocks.
//!
//! For every formatter `f` and every byte sequence `x`, `f.decode(&f.encode(x)?)?`
//! yields `x`. A decode applied to bytes that did not come from the matching
//! encode fails with a format error (`DecryptionFailure`, `DecompressionFailure`)
//! instead of returning garbage.
//!
//! ## Formatters
//! - [`DefaultFormatter`]: identity
//! - [`CompressionFormatter`]: LZ4 or Zstd
//! - [`EncryptionFormatter`]: XChaCha20-Poly1305 with a key and nonce fixed per instance
//! - [`CombinedFormatter`]: members applied in order on encode, in reverse on decode
//!
//! Formatters are `Send + Sync` and shared as `Arc<dyn Formatter>`.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::utils::compression::{self, CompressionKind, DEFAULT_ZSTD_LEVEL};
use crate::utils::crypto::{Crypto, KEY_SIZE, NONCE_SIZE};

/// A reversible transform over a whole byte block.
pub trait Formatter: Send + Sync + fmt::Debug {
    fn encode(&self, original: &[u8]) -> Result<Vec<u8>>;
    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>>;
}

/// Leaves bytes untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFormatter;

impl Formatter for DefaultFormatter {
    fn encode(&self, original: &[u8]) -> Result<Vec<u8>> {
        Ok(original.to_vec())
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        Ok(encoded.to_vec())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompressionFormatter {
    kind: CompressionKind,
    level: i32,
}

impl CompressionFormatter {
    pub fn new(kind: CompressionKind) -> Self {
        Self {
            kind,
            level: DEFAULT_ZSTD_LEVEL,
        }
    }

    /// Zstd level; ignored by LZ4.
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn kind(&self) -> CompressionKind {
        self.kind
    }
}

impl Formatter for CompressionFormatter {
    fn encode(&self, original: &[u8]) -> Result<Vec<u8>> {
        compression::compress_with_level(original, &self.kind, self.level)
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        compression::decompress(encoded, &self.kind)
    }
}

/// Symmetric authenticated encryption with a fixed key and nonce.
///
/// The nonce is part of the formatter, not of the output, so both endpoints
/// must be built with the same pair. Reusing one pair for many blocks leaks
/// equality of plaintexts; use one formatter per session key.
pub struct EncryptionFormatter {
    crypto: Crypto,
    nonce: [u8; NONCE_SIZE],
}

impl EncryptionFormatter {
    pub fn new(key: &[u8; KEY_SIZE], nonce: [u8; NONCE_SIZE]) -> Self {
        Self {
            crypto: Crypto::new(key),
            nonce,
        }
    }

    /// Random key and nonce. Returns them alongside the formatter so the peer
    /// can be configured with the same pair.
    pub fn generate() -> Result<(Self, [u8; KEY_SIZE], [u8; NONCE_SIZE])> {
        let key = Crypto::generate_key()?;
        let nonce = Crypto::generate_nonce()?;
        Ok((Self::new(&key, nonce), key, nonce))
    }
}

impl fmt::Debug for EncryptionFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionFormatter").finish_non_exhaustive()
    }
}

impl Formatter for EncryptionFormatter {
    fn encode(&self, original: &[u8]) -> Result<Vec<u8>> {
        self.crypto.encrypt(original, &self.nonce)
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        self.crypto.decrypt(encoded, &self.nonce)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CombinedFormatter {
    formatters: Vec<Arc<dyn Formatter>>,
}

impl CombinedFormatter {
    /// The first formatter runs first while encoding and last while decoding.
    pub fn new(formatters: Vec<Arc<dyn Formatter>>) -> Self {
        Self { formatters }
    }

    pub fn push(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatters.push(formatter);
        self
    }

    pub fn len(&self) -> usize {
        self.formatters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formatters.is_empty()
    }
}

impl Formatter for CombinedFormatter {
    fn encode(&self, original: &[u8]) -> Result<Vec<u8>> {
        let mut bytes = original.to_vec();
        for formatter in &self.formatters {
            bytes = formatter.encode(&bytes)?;
        }
        Ok(bytes)
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        let mut bytes = encoded.to_vec();
        for formatter in self.formatters.iter().rev() {
            bytes = formatter.decode(&bytes)?;
        }
        Ok(bytes)
    }
}

/// Apply an optional formatter's encode.
pub(crate) fn encode_with(formatter: Option<&dyn Formatter>, bytes: Vec<u8>) -> Result<Vec<u8>> {
    match formatter {
        Some(f) => f.encode(&bytes),
        None => Ok(bytes),
    }
}

/// Apply an optional formatter's decode.
pub(crate) fn decode_with(formatter: Option<&dyn Formatter>, bytes: Vec<u8>) -> Result<Vec<u8>> {
    match formatter {
        Some(f) => f.decode(&bytes),
        None => Ok(bytes),
    }
}
