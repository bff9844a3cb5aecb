//! # Error Types
//!
//! Error handling for the value codec, the packet protocol and the storage format.
//!
//! Every fallible operation in this crate returns [`Result`], whose error type
//! [`ProtocolError`] groups the failure modes into a small taxonomy:
//!
//! ## Error Categories
//! - **Configuration**: caller bugs such as writing a packet whose type was never
//!   registered. Surfaced immediately and never retried.
//! - **Truncation**: fewer bytes available than a read requires. Recoverable only
//!   when it coincides with an expected shutdown.
//! - **Unknown identifier**: a packet id or member tag missing from the registry,
//!   which means the two endpoints disagree on the protocol.
//! - **Format**: a formatter could not undo its transform (failed authentication,
//!   malformed compressed data) or decoded bytes do not fit the declared layout.
//!
//! ## Example Usage
//! ```rust
//! use wirekit::error::{ProtocolError, Result};
//! use tracing::error;
//!
//! fn require(len: usize, needed: usize) -> Result<()> {
//!     if len < needed {
//!         return Err(ProtocolError::Truncated { needed, available: len });
//!     }
//!     Ok(())
//! }
//!
//! if let Err(e) = require(2, 4) {
//!     assert!(e.is_truncation());
//!     error!(error = %e, "short read");
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry lock errors
    pub const ERR_REGISTRY_WRITE_LOCK: &str = "Failed to acquire write lock on packet registry";
    pub const ERR_REGISTRY_READ_LOCK: &str = "Failed to acquire read lock on packet registry";

    /// Dispatcher lock errors
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Server connection table lock errors
    pub const ERR_CONNECTIONS_WRITE_LOCK: &str = "Failed to acquire write lock on server connections";
    pub const ERR_CONNECTIONS_READ_LOCK: &str = "Failed to acquire read lock on server connections";

    /// Configuration errors
    pub const ERR_NOT_REGISTERED: &str = "packet is not registered";
    pub const ERR_REGISTRY_FULL: &str = "packet identifier space exhausted";
    pub const ERR_FIXED_SIZE_MISMATCH: &str = "Fixed size doesn't match the actual size";
    pub const ERR_LENGTH_OVERFLOW: &str = "Value is too long for a 4-byte length prefix";
    pub const ERR_ZERO_SIZE_ELEMENT: &str = "List and map entries cannot have a zero-size kind";

    /// Storage errors
    pub const ERR_EMPTY_PATH: &str = "Storage path cannot be empty";
    pub const ERR_INVALID_KEY: &str = "Invalid key, cannot be empty or contain dots";
    pub const ERR_NOT_A_PARENT: &str = "Found a conflicting non-container member on the path";
    pub const ERR_LIST_ELEMENT: &str = "List element type does not match the list";
    pub const ERR_TOO_DEEP: &str = "Storage nesting exceeds the maximum depth";
}

/// ProtocolError is the primary error type for all codec, protocol and storage operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A caller bug: unregistered packet, layout mismatch on write, bad setup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Fewer bytes were available than a fixed-size or length-prefixed read requires.
    #[error("Truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// The transport ended in the middle of (or exactly before) a frame.
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Unknown packet identifier: {0}, is it registered?")]
    UnknownPacketId(u32),

    #[error("Unknown storage member tag: {0:#04x}")]
    UnknownMemberTag(u8),

    #[error("Field {index} mismatch: expected {expected}, found {found}")]
    FieldMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("Invalid UTF-8 in text value")]
    InvalidUtf8,

    #[error("{0} trailing bytes after decoded value")]
    TrailingBytes(usize),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("No handler for packet {0}")]
    UnexpectedPacket(&'static str),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Synchronization primitive poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl ProtocolError {
    /// Whether this error means "ran out of bytes" rather than "bytes were wrong".
    ///
    /// Receive loops treat these as an expected shutdown when the session has
    /// already been marked closed.
    pub fn is_truncation(&self) -> bool {
        match self {
            ProtocolError::Truncated { .. }
            | ProtocolError::UnexpectedEof
            | ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Whether the error came out of a formatter or a layout check.
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            ProtocolError::DecryptionFailure
                | ProtocolError::EncryptionFailure
                | ProtocolError::CompressionFailure
                | ProtocolError::DecompressionFailure
                | ProtocolError::InvalidUtf8
                | ProtocolError::FieldMismatch { .. }
                | ProtocolError::TrailingBytes(_)
                | ProtocolError::OversizedFrame(_)
        )
    }

    pub(crate) fn field_mismatch(
        index: usize,
        expected: impl std::fmt::Display,
        found: impl std::fmt::Display,
    ) -> Self {
        ProtocolError::FieldMismatch {
            index,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_family() {
        assert!(ProtocolError::Truncated {
            needed: 4,
            available: 1
        }
        .is_truncation());
        assert!(ProtocolError::UnexpectedEof.is_truncation());
        assert!(ProtocolError::Io(io::Error::from(io::ErrorKind::UnexpectedEof)).is_truncation());
        assert!(!ProtocolError::UnknownPacketId(7).is_truncation());
        assert!(!ProtocolError::DecryptionFailure.is_truncation());
    }

    #[test]
    fn test_format_family() {
        assert!(ProtocolError::DecompressionFailure.is_format());
        assert!(ProtocolError::TrailingBytes(3).is_format());
        assert!(!ProtocolError::Configuration("x".into()).is_format());
    }

    #[test]
    fn test_messages() {
        let e = ProtocolError::UnknownMemberTag(0x2a);
        assert_eq!(e.to_string(), "Unknown storage member tag: 0x2a");
        let e = ProtocolError::UnknownPacketId(9);
        assert!(e.to_string().contains("is it registered?"));
    }
}
