//! # Packet Registry
//!
//! Bijection between packet types and numeric identifiers, plus each type's field
//! layout, optional per-packet formatter and factory.
//!
//! Identifiers are assigned in registration order starting at 0 and never change.
//! Both endpoints must register the same types in the same order.
//!
//! The registry is an explicit value: build one during startup, wrap it in an
//! `Arc`, and hand it to every writer, reader and connection. Lookups take a read
//! lock; registration after startup is allowed but takes the write lock.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error};

use crate::core::formatter::Formatter;
use crate::core::reducer::{Fields, Layout};
use crate::core::value::Value;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::packet::{create_erased, AnyPacket, Disconnect, Packet};

/// Identifier of the built-in [`Disconnect`] packet.
pub const DISCONNECT_ID: u32 = 0;

type CreateFn = fn(Fields) -> Result<Box<dyn AnyPacket>>;

struct PacketEntry {
    name: &'static str,
    layout: Layout,
    formatter: Option<Arc<dyn Formatter>>,
    create: CreateFn,
}

impl PacketEntry {
    fn of<P: Packet>() -> Self {
        Self {
            name: std::any::type_name::<P>(),
            layout: P::format(),
            formatter: P::formatter(),
            create: create_erased::<P>,
        }
    }
}

/// Everything needed to encode one packet type.
#[derive(Debug, Clone)]
pub(crate) struct EncodePlan {
    pub id: u32,
    pub layout: Layout,
    pub formatter: Option<Arc<dyn Formatter>>,
}

/// Everything needed to decode one packet identifier.
#[derive(Clone)]
pub(crate) struct DecodePlan {
    pub layout: Layout,
    pub formatter: Option<Arc<dyn Formatter>>,
    pub create: CreateFn,
}

#[derive(Default)]
struct RegistryInner {
    entries: Vec<PacketEntry>,
    ids: HashMap<TypeId, u32>,
}

impl RegistryInner {
    fn insert<P: Packet>(&mut self) -> Result<u32> {
        let type_id = TypeId::of::<P>();
        if let Some(&id) = self.ids.get(&type_id) {
            return Ok(id);
        }

        let id = u32::try_from(self.entries.len())
            .map_err(|_| ProtocolError::Configuration(constants::ERR_REGISTRY_FULL.to_string()))?;
        let entry = PacketEntry::of::<P>();
        debug!(
            packet_id = id,
            packet = entry.name,
            fields = entry.layout.len(),
            formatted = entry.formatter.is_some(),
            "Packet registered"
        );
        self.entries.push(entry);
        self.ids.insert(type_id, id);
        Ok(id)
    }

    fn entry(&self, id: u32) -> Result<&PacketEntry> {
        self.entries.get(id as usize).ok_or_else(|| {
            error!(packet_id = id, "Unknown packet identifier");
            ProtocolError::UnknownPacketId(id)
        })
    }
}

pub struct PacketRegistry {
    inner: RwLock<RegistryInner>,
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl PacketRegistry {
    /// A registry holding the built-in [`Disconnect`] packet at [`DISCONNECT_ID`].
    pub fn new() -> Self {
        let mut inner = RegistryInner::default();
        inner.entries.push(PacketEntry::of::<Disconnect>());
        inner.ids.insert(TypeId::of::<Disconnect>(), DISCONNECT_ID);
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// A registry without built-in packets.
    pub fn empty() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Assign the next identifier to `P`. Registering a type again returns its
    /// existing identifier and leaves its layout untouched.
    pub fn register<P: Packet>(&self) -> Result<u32> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_REGISTRY_WRITE_LOCK))?;
        inner.insert::<P>()
    }

    /// Identifier of `P`.
    ///
    /// # Errors
    /// `Configuration` if `P` was never registered.
    pub fn id_of<P: Packet>(&self) -> Result<u32> {
        self.id_of_type(TypeId::of::<P>())
    }

    pub fn id_of_type(&self, type_id: TypeId) -> Result<u32> {
        self.read()?
            .ids
            .get(&type_id)
            .copied()
            .ok_or_else(|| ProtocolError::Configuration(constants::ERR_NOT_REGISTERED.to_string()))
    }

    /// Identifier of `P`, if registered.
    pub fn lookup<P: Packet>(&self) -> Option<u32> {
        self.id_of::<P>().ok()
    }

    pub fn is_registered<P: Packet>(&self) -> bool {
        self.lookup::<P>().is_some()
    }

    pub fn format_of(&self, id: u32) -> Result<Layout> {
        Ok(self.read()?.entry(id)?.layout.clone())
    }

    pub fn formatter_of(&self, id: u32) -> Result<Option<Arc<dyn Formatter>>> {
        Ok(self.read()?.entry(id)?.formatter.clone())
    }

    pub fn name_of(&self, id: u32) -> Result<&'static str> {
        Ok(self.read()?.entry(id)?.name)
    }

    /// Rebuild a packet from decoded field values.
    pub fn create(&self, id: u32, values: Vec<Value>) -> Result<Box<dyn AnyPacket>> {
        let create = self.read()?.entry(id)?.create;
        create(Fields::new(values))
    }

    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn encode_plan(&self, packet: &dyn AnyPacket) -> Result<EncodePlan> {
        let inner = self.read()?;
        let id = inner.ids.get(&packet.packet_type()).copied().ok_or_else(|| {
            ProtocolError::Configuration(format!(
                "{}: {}",
                constants::ERR_NOT_REGISTERED,
                packet.packet_name()
            ))
        })?;
        let entry = inner.entry(id)?;
        Ok(EncodePlan {
            id,
            layout: entry.layout.clone(),
            formatter: entry.formatter.clone(),
        })
    }

    pub(crate) fn decode_plan(&self, id: u32) -> Result<DecodePlan> {
        let inner = self.read()?;
        let entry = inner.entry(id)?;
        Ok(DecodePlan {
            layout: entry.layout.clone(),
            formatter: entry.formatter.clone(),
            create: entry.create,
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, RegistryInner>> {
        self.inner
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_REGISTRY_READ_LOCK))
    }
}
