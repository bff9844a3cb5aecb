//! # Packet Protocol
//!
//! Registrable packets, the registry that assigns their identifiers, and the
//! framing and receive loop that move them across a connection.
//!
//! ## Components
//! - **Packet**: reducer with optional per-packet formatter and hooks
//! - **Registry**: type to identifier bijection, layouts and factories
//! - **Network**: payload encoding, blocking writer/reader, receive loops
//! - **Dispatcher**: routes decoded packets to typed handlers
//!
//! ## Formatting layers
//! A packet's own formatter wraps only its fields. The connection formatter wraps
//! the whole frame body. Either, both, or neither may be present.

pub mod dispatcher;
pub mod network;
pub mod packet;
pub mod registry;

#[cfg(test)]
mod tests;
