//! # Core Codec Components
//!
//! Typed values, reducers, formatters and the framed stream reader/writer that the
//! packet protocol and the storage format are built on.
//!
//! ## Components
//! - **Value**: atomic value descriptors and their byte encodings
//! - **Reducer**: ordered composites with a declared field layout
//! - **Formatter**: reversible whole-block transforms (compression, encryption)
//! - **Stream**: staging writer and cursor reader with length-prefixed frames
//! - **Codec**: Tokio codec for the same frames over async byte streams
//!
//! ## Wire Format
//! ```text
//! [Length(4, LE)] [Formatter output(N)]
//! ```
//!
//! ## Security
//! - Maximum frame size: 16MB by default (prevents memory exhaustion)
//! - Length validation before allocation

pub mod codec;
pub mod formatter;
pub mod reducer;
pub mod stream;
pub mod value;
