use crate::error::{constants, ProtocolError, Result};
use crate::protocol::packet::{AnyPacket, Packet};
use std::any::TypeId;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(&dyn AnyPacket) -> Result<ControlFlow<()>> + Send + Sync + 'static;

/// Routes decoded packets to typed handlers by their concrete packet type.
///
/// Cloning shares the handler table, so a dispatcher can be handed to several
/// receive loops.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<TypeId, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Route packets of type `P` to `handler`, replacing any previous handler for `P`.
    pub fn on<P, F>(&self, handler: F) -> Result<()>
    where
        P: Packet,
        F: Fn(&P) -> Result<ControlFlow<()>> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_DISPATCHER_WRITE_LOCK))?;

        handlers.insert(
            TypeId::of::<P>(),
            Box::new(move |packet: &dyn AnyPacket| match packet.downcast_ref::<P>() {
                Some(packet) => handler(packet),
                None => Err(ProtocolError::UnexpectedPacket(packet.packet_name())),
            }),
        );
        Ok(())
    }

    /// Whether a handler is registered for `P`.
    pub fn handles<P: Packet>(&self) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(&TypeId::of::<P>()))
            .unwrap_or(false)
    }

    /// # Errors
    /// `UnexpectedPacket` when no handler is registered for the packet's type;
    /// otherwise whatever the handler returns.
    pub fn dispatch(&self, packet: &dyn AnyPacket) -> Result<ControlFlow<()>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_DISPATCHER_READ_LOCK))?;

        handlers
            .get(&packet.packet_type())
            .ok_or(ProtocolError::UnexpectedPacket(packet.packet_name()))
            .and_then(|handler| handler(packet))
    }

    /// Adapter for the receive loops, which hand over owned packets.
    pub fn handler(&self) -> impl FnMut(Box<dyn AnyPacket>) -> Result<ControlFlow<()>> + Send {
        let dispatcher = self.clone();
        move |packet| dispatcher.dispatch(packet.as_ref())
    }
}
