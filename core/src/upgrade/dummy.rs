use crate::transport::TransportError;
use crate::upgrade::{UpgradeInfo, Upgrader};
use async_trait::async_trait;

/// An upgrader that upgrades to nothing: the output is the input.
///
/// Useful as a stand-in in tests of the upgrade machinery.
#[derive(Debug, Clone, Default)]
pub struct DummyUpgrader;

impl DummyUpgrader {
    pub fn new() -> Self {
        DummyUpgrader
    }
}

impl UpgradeInfo for DummyUpgrader {
    type Info = &'static [u8];

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/dummy/1.0.0"]
    }
}

#[async_trait]
impl<C: Send + 'static> Upgrader<C> for DummyUpgrader {
    type Output = C;

    async fn upgrade_inbound(self, socket: C, _info: Self::Info) -> Result<Self::Output, TransportError> {
        Ok(socket)
    }

    async fn upgrade_outbound(self, socket: C, _info: Self::Info) -> Result<Self::Output, TransportError> {
        Ok(socket)
    }
}
