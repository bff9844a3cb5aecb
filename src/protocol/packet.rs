//! # Packets
//!
//! A packet is a [`Reducer`] that can be registered in a
//! [`PacketRegistry`](crate::protocol::registry::PacketRegistry) and sent over a
//! connection. On top of its field layout it may declare a formatter applied only
//! to its own fields, and hooks that run before encoding and after decoding.
//!
//! Decoded packets come back type-erased as `Box<dyn AnyPacket>`; use
//! [`downcast_ref`](AnyPacket::downcast_ref) or a
//! [`Dispatcher`](crate::protocol::dispatcher::Dispatcher) to get the concrete type.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::core::formatter::Formatter;
use crate::core::reducer::{Fields, Layout, Reducer};
use crate::core::value::{Value, ValueKind};
use crate::error::Result;

/// A registrable, identifier-tagged reducer.
pub trait Packet: Reducer + Any + Send + Sync + fmt::Debug {
    /// Formatter applied to this packet's field bytes, inside any connection-wide
    /// formatter. Read once, at registration.
    fn formatter() -> Option<Arc<dyn Formatter>> {
        None
    }

    /// Runs right before the fields are taken for encoding.
    fn before_encode(&self) {}

    /// Runs right after the packet was rebuilt from decoded fields.
    fn after_decode(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Object-safe view of any [`Packet`].
pub trait AnyPacket: Any + Send + Sync + fmt::Debug {
    fn packet_name(&self) -> &'static str;
    fn packet_fields(&self) -> Vec<Value>;
    fn prepare_encode(&self);
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<P: Packet> AnyPacket for P {
    fn packet_name(&self) -> &'static str {
        std::any::type_name::<P>()
    }

    fn packet_fields(&self) -> Vec<Value> {
        self.to_fields()
    }

    fn prepare_encode(&self) {
        self.before_encode();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

impl dyn AnyPacket {
    /// Type id of the concrete packet (not of the box).
    pub fn packet_type(&self) -> TypeId {
        self.as_any().type_id()
    }

    pub fn is<P: Packet>(&self) -> bool {
        self.as_any().is::<P>()
    }

    pub fn downcast_ref<P: Packet>(&self) -> Option<&P> {
        self.as_any().downcast_ref::<P>()
    }

    pub fn downcast<P: Packet>(self: Box<Self>) -> Option<Box<P>> {
        self.into_any().downcast::<P>().ok()
    }
}

/// Build a packet from decoded fields and run its decode hook.
pub(crate) fn create_erased<P: Packet>(fields: Fields) -> Result<Box<dyn AnyPacket>> {
    let mut packet = P::from_fields(fields)?;
    packet.after_decode()?;
    Ok(Box::new(packet))
}

/// Built-in packet announcing that the sender is closing the connection.
///
/// Always registered at identifier 0 by
/// [`PacketRegistry::new`](crate::protocol::registry::PacketRegistry::new).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disconnect {
    /// Optional opaque data, e.g. a reason code.
    pub reason: Vec<u8>,
}

impl Disconnect {
    pub fn new(reason: impl Into<Vec<u8>>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Reducer for Disconnect {
    fn format() -> Layout {
        vec![ValueKind::Bytes]
    }

    fn to_fields(&self) -> Vec<Value> {
        vec![Value::Bytes(self.reason.clone())]
    }

    fn from_fields(mut fields: Fields) -> Result<Self> {
        Ok(Self {
            reason: fields.bytes()?,
        })
    }
}

impl Packet for Disconnect {}
