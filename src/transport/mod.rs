//! # Transport Layer
//!
//! Async network transports carrying framed packets.
//!
//! ## Available Transports
//! - **TCP**: tokio TCP with one receive task per connection and a shared,
//!   lock-serialised writer
//!
//! All transports use the frame format of [`FrameCodec`](crate::core::codec::FrameCodec)
//! and the packet encoding of [`Protocol`](crate::protocol::network::Protocol), so a
//! blocking [`NetworkReader`](crate::protocol::network::NetworkReader) can read what
//! they write.

pub mod tcp;

pub use tcp::{Connection, ConnectionId, PacketSender, Server, ServerHandle};
