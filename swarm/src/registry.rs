//! The protocol-handler registry.
//!
//! A [`ProtocolHandler`] is registered for the protocol names it announces
//! via `UpgradeInfo`; every inbound substream that negotiates one of them
//! is handed to a clone of the handler, which owns the stream for its
//! lifetime.

use crate::substream::Substream;
use crate::{ProtocolId, SwarmError};
use async_trait::async_trait;
use fnv::FnvHashMap;
use up2p_core::upgrade::{ProtocolName, UpgradeInfo};

/// A handler for inbound substreams of one or more protocols.
#[async_trait]
pub trait ProtocolHandler: UpgradeInfo<Info = ProtocolId> {
    /// Handles an inbound substream that negotiated `info`. The handler
    /// owns the stream; the swarm never times it out.
    async fn handle(&mut self, stream: Substream, info: ProtocolId) -> Result<(), SwarmError>;

    fn box_clone(&self) -> IProtocolHandler;
}

pub type IProtocolHandler = Box<dyn ProtocolHandler + Send>;

impl Clone for IProtocolHandler {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Implementation of `ProtocolHandler` that doesn't handle anything.
#[derive(Clone, Default)]
pub struct DummyProtocolHandler;

impl DummyProtocolHandler {
    pub fn new() -> Self {
        DummyProtocolHandler
    }
}

impl UpgradeInfo for DummyProtocolHandler {
    type Info = ProtocolId;

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/dummy/1.0.0"]
    }
}

#[async_trait]
impl ProtocolHandler for DummyProtocolHandler {
    async fn handle(&mut self, stream: Substream, info: ProtocolId) -> Result<(), SwarmError> {
        log::trace!("dummy protocol handling inbound {:?} {:?}", stream, info.protocol_name_str());
        Ok(())
    }

    fn box_clone(&self) -> IProtocolHandler {
        Box::new(self.clone())
    }
}

/// Maps protocol names to their handlers.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: FnvHashMap<ProtocolId, IProtocolHandler>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers `handler` for every protocol it announces.
    pub fn add_handler(&mut self, handler: IProtocolHandler) {
        for proto in handler.protocol_info() {
            self.handlers.insert(proto, handler.clone());
        }
    }

    /// The protocols inbound streams may negotiate.
    pub fn protocols(&self) -> Vec<ProtocolId> {
        self.handlers.keys().copied().collect()
    }

    /// A fresh clone of the handler registered for `proto`.
    pub fn get(&self, proto: ProtocolId) -> Option<IProtocolHandler> {
        self.handlers.get(proto).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_look_up() {
        let mut registry = Registry::new();
        registry.add_handler(Box::new(DummyProtocolHandler::new()));
        assert_eq!(registry.protocols(), vec![b"/dummy/1.0.0".as_ref()]);
        assert!(registry.get(b"/dummy/1.0.0").is_some());
        assert!(registry.get(b"/other/1.0.0").is_none());
    }
}
