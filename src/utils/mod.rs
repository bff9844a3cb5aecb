//! # Utility Modules
//!
//! Supporting utilities used by the formatters, the protocol and storage.
//!
//! ## Components
//! - **Compression**: LZ4 and Zstd with a decompression size limit
//! - **Crypto**: XChaCha20-Poly1305 AEAD with a fixed key and nonce
//! - **Logging**: `tracing-subscriber` initialisation from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: Thread-safe wire counters and operation timers
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom) for keys and nonces
//! - Decompression bomb protection (16MB limit)

pub mod compression;
pub mod crypto;
pub mod logging;
pub mod metrics;

pub use metrics::{MetricsSnapshot, WireMetrics};
