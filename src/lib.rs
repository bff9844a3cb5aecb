//! # wirekit
//!
//! Typed binary values, a length-framed packet protocol, and a hierarchical
//! storage format, sharing one codec and one pluggable formatter chain.
//!
//! ## Layers
//! - [`core`]: atomic values, reducers, formatters, framed stream reader/writer
//! - [`protocol`]: packet registry, network framing, receive loops, dispatch
//! - [`storage`]: tree of fields, containers and lists saved as one frame
//! - [`transport`]: async TCP connections and server
//! - [`config`], [`error`], [`utils`]: configuration, errors, compression,
//!   encryption, logging and metrics
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use wirekit::core::reducer::{Fields, Layout, Reducer};
//! use wirekit::core::value::{Value, ValueKind};
//! use wirekit::error::Result;
//! use wirekit::protocol::network::Protocol;
//! use wirekit::protocol::packet::Packet;
//! use wirekit::protocol::registry::PacketRegistry;
//!
//! #[derive(Debug, PartialEq)]
//! struct Ping {
//!     seq: u32,
//! }
//!
//! impl Reducer for Ping {
//!     fn format() -> Layout {
//!         vec![ValueKind::U32]
//!     }
//!     fn to_fields(&self) -> Vec<Value> {
//!         vec![self.seq.into()]
//!     }
//!     fn from_fields(mut fields: Fields) -> Result<Self> {
//!         Ok(Ping { seq: fields.u32()? })
//!     }
//! }
//!
//! impl Packet for Ping {}
//!
//! let registry = Arc::new(PacketRegistry::new());
//! registry.register::<Ping>()?;
//! let protocol = Protocol::new(registry);
//!
//! let body = protocol.encode(&Ping { seq: 7 })?;
//! let packet = protocol.decode(&body)?;
//! assert_eq!(packet.downcast_ref::<Ping>(), Some(&Ping { seq: 7 }));
//! # Ok::<(), wirekit::error::ProtocolError>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod storage;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
