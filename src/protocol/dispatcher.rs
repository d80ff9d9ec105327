use crate::core::attribute::{self, PacketObject};
use crate::core::packet::{format_type, type_name, NodeId, Packet, TypeTag};
use crate::error::{constants, ProtocolError, Result};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

type HandlerFn = dyn Fn(NodeId, &[u8]) -> Result<()> + Send + Sync + 'static;

/// Outcome of handing a packet to a [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A handler decoded the payload and returned `Ok`
    Handled,
    /// No handler is registered for the packet's type
    Unhandled,
    /// The payload did not decode, or the handler failed or panicked
    Failed,
}

/// Packet type registry keyed by the canonical 4-byte tag.
///
/// Each entry decodes the payload into a fresh instance of its registered type and
/// invokes the handler with the packet's source id. Handlers are looked up under a read
/// lock and called after it is released, so a handler may itself register or
/// unregister types.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<TypeTag, Arc<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register the handler for `T`'s packet type.
    ///
    /// Fails with [`ProtocolError::DuplicateType`] if the tag is taken.
    pub fn register<T, F>(&self, handler: F) -> Result<()>
    where
        T: PacketObject,
        F: Fn(NodeId, T) -> Result<()> + Send + Sync + 'static,
    {
        let tag = T::packet_type();
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        if handlers.contains_key(&tag) {
            return Err(ProtocolError::DuplicateType(type_name(&tag)));
        }

        let erased = move |source: NodeId, payload: &[u8]| -> Result<()> {
            let value = attribute::decode::<T>(payload)?;
            handler(source, value)
        };
        handlers.insert(tag, Arc::new(erased));
        Ok(())
    }

    /// Remove the handler for `tag`; unknown tags are ignored.
    pub fn unregister(&self, tag: &str) -> Result<()> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;
        handlers.remove(&format_type(tag));
        Ok(())
    }

    pub fn unregister_type<T: PacketObject>(&self) -> Result<()> {
        self.unregister(T::PACKET_TYPE)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(&format_type(tag)))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode and deliver `packet` to its handler.
    ///
    /// Never fails: missing handlers, decode errors and handler errors or panics are
    /// logged and reported through [`Delivery`].
    pub fn dispatch(&self, packet: &Packet) -> Delivery {
        let handler = match self.handlers.read() {
            Ok(handlers) => handlers.get(&packet.packet_type).cloned(),
            Err(_) => {
                warn!(error = constants::ERR_DISPATCHER_READ_LOCK, "Dispatch skipped");
                return Delivery::Failed;
            }
        };

        let Some(handler) = handler else {
            debug!(
                packet_type = %packet.type_name(),
                source = packet.source,
                "No handler registered, packet ignored"
            );
            return Delivery::Unhandled;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(packet.source, &packet.payload))) {
            Ok(Ok(())) => Delivery::Handled,
            Ok(Err(e)) => {
                warn!(
                    packet_type = %packet.type_name(),
                    source = packet.source,
                    error = %e,
                    "Packet handler failed"
                );
                Delivery::Failed
            }
            Err(_) => {
                warn!(
                    packet_type = %packet.type_name(),
                    source = packet.source,
                    "Packet handler panicked"
                );
                Delivery::Failed
            }
        }
    }
}
