use crate::multistream::Negotiator;
use crate::transport::TransportError;
use crate::upgrade::Upgrader;
use log::trace;
use up2p_traits::{ReadEx, WriteEx};

/// Pairs an [`Upgrader`] with the multistream-select negotiation that
/// agrees on one of its protocols before the upgrade runs.
///
/// The protocols announced first by the upgrader have a higher priority.
#[derive(Debug, Clone)]
pub struct Multistream<U> {
    inner: U,
}

impl<U> Multistream<U> {
    /// Add `Multistream` on top of any `Upgrader`.
    pub fn new(inner: U) -> Self {
        Self { inner }
    }
}

impl<U> Multistream<U> {
    pub(crate) async fn select_inbound<C>(self, socket: C) -> Result<U::Output, TransportError>
    where
        C: ReadEx + WriteEx + Send,
        U: Upgrader<C> + Send,
    {
        trace!("starting multistream select for inbound...");
        let protocols = self.inner.protocol_info();
        let neg = Negotiator::new_with_protocols(protocols);
        let (proto, socket) = neg.negotiate(socket).await?;
        self.inner.upgrade_inbound(socket, proto).await
    }

    pub(crate) async fn select_outbound<C>(self, socket: C) -> Result<U::Output, TransportError>
    where
        C: ReadEx + WriteEx + Send,
        U: Upgrader<C> + Send,
    {
        trace!("starting multistream select for outbound...");
        let protocols = self.inner.protocol_info();
        let neg = Negotiator::new_with_protocols(protocols);
        let (proto, socket) = neg.select_one(socket).await?;
        self.inner.upgrade_outbound(socket, proto).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::Chan;
    use crate::upgrade::DummyUpgrader;
    use async_std::task;

    #[test]
    fn select_then_upgrade() {
        let (a, b) = Chan::pair();

        let listener = task::spawn(async move {
            Multistream::new(DummyUpgrader::new()).select_inbound(b).await.unwrap();
        });

        task::block_on(async move {
            Multistream::new(DummyUpgrader::new()).select_outbound(a).await.unwrap();
            listener.await;
        });
    }
}
