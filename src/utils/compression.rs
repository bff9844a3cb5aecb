use serde::{Deserialize, Serialize};

use crate::config::MAX_FRAME_SIZE;
use crate::error::{ProtocolError, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    Lz4,
    Zstd,
}

impl CompressionKind {
    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::Lz4 => "lz4",
            CompressionKind::Zstd => "zstd",
        }
    }
}

/// Default zstd level
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Maximum output size for decompression, aligned with the frame limit
const MAX_DECOMPRESSION_SIZE: usize = MAX_FRAME_SIZE;

/// Compresses data using the specified compression algorithm
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: &CompressionKind) -> Result<Vec<u8>> {
    compress_with_level(data, kind, DEFAULT_ZSTD_LEVEL)
}

/// Like [`compress`], with an explicit zstd level. LZ4 ignores the level.
pub fn compress_with_level(data: &[u8], kind: &CompressionKind, level: i32) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, level)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            Ok(out)
        }
    }
}

/// Decompresses data that was compressed with the specified algorithm
///
/// Output is capped at the maximum frame size so a small malicious block
/// cannot expand into an unbounded allocation.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if:
/// - Decompression fails
/// - Output size exceeds the frame limit
pub fn decompress(data: &[u8], kind: &CompressionKind) -> Result<Vec<u8>> {
    match *kind {
        CompressionKind::Lz4 => {
            if data.len() < 4 {
                return Err(ProtocolError::DecompressionFailure);
            }

            // lz4_flex prepends the uncompressed size as u32 LE; check it before it allocates
            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > MAX_DECOMPRESSION_SIZE {
                return Err(ProtocolError::DecompressionFailure);
            }

            lz4_flex::decompress_size_prepended(data)
                .map_err(|_| ProtocolError::DecompressionFailure)
        }
        CompressionKind::Zstd => {
            use std::io::Read;

            let mut out = Vec::new();
            let mut reader = zstd::stream::Decoder::new(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;

            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        out.extend_from_slice(&buffer[..n]);
                        if out.len() > MAX_DECOMPRESSION_SIZE {
                            return Err(ProtocolError::DecompressionFailure);
                        }
                    }
                    Err(_) => return Err(ProtocolError::DecompressionFailure),
                }
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_lz4_compression_roundtrip() {
        let original = b"storage blob storage blob storage blob";
        let compressed = compress(original, &CompressionKind::Lz4).unwrap();
        let decompressed = decompress(&compressed, &CompressionKind::Lz4).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_zstd_levels_roundtrip() {
        let original = vec![7u8; 4096];
        for level in [1, 3, 19] {
            let compressed = compress_with_level(&original, &CompressionKind::Zstd, level).unwrap();
            assert!(compressed.len() < original.len());
            let decompressed = decompress(&compressed, &CompressionKind::Zstd).unwrap();
            assert_eq!(original, decompressed);
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_empty_input() {
        for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
            let compressed = compress(&[], &kind).unwrap();
            assert!(decompress(&compressed, &kind).unwrap().is_empty());
        }
    }

    #[test]
    fn test_lz4_claimed_size_over_limit() {
        let claimed_size = (MAX_DECOMPRESSION_SIZE + 1) as u32;
        let mut malicious = claimed_size.to_le_bytes().to_vec();
        malicious.extend_from_slice(&[0u8; 16]);

        let result = decompress(&malicious, &CompressionKind::Lz4);
        assert!(matches!(result, Err(ProtocolError::DecompressionFailure)));
    }

    #[test]
    fn test_lz4_short_input_rejection() {
        let result = decompress(&[0x2b, 0x60], &CompressionKind::Lz4);
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_compressed_data() {
        let malformed = vec![0x10, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff];
        assert!(decompress(&malformed, &CompressionKind::Lz4).is_err());
        assert!(decompress(&malformed, &CompressionKind::Zstd).is_err());
    }
}
