use crate::connection::ConnectionId;
use crate::substream::{StreamId, Substream};
use crate::{ProtocolId, SwarmError};
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, SinkExt};
use futures_timer::Delay;
use std::time::Duration;
use up2p_core::peerstore::PeerStore;
use up2p_core::{Multiaddr, PeerId};

/// Commands a [`Control`] sends into the swarm's event loop.
pub(crate) enum SwarmControlCmd {
    /// Ensure a connection to the peer exists, dialing if necessary.
    NewConnection(PeerId, oneshot::Sender<Result<(), SwarmError>>),
    /// Open a substream to the peer, dialing a connection if necessary.
    NewStream(PeerId, Vec<ProtocolId>, oneshot::Sender<Result<Substream, SwarmError>>),
    /// Close every connection to the peer.
    CloseConnection(PeerId, oneshot::Sender<Result<(), SwarmError>>),
    /// A substream was closed by its owner.
    CloseStream(ConnectionId, StreamId),
    /// Shut the swarm down.
    CloseSwarm,
}

/// A cloneable handle for talking to a running swarm.
#[derive(Clone)]
pub struct Control {
    pub(crate) ctrl_tx: mpsc::Sender<SwarmControlCmd>,
    peerstore: PeerStore,
    default_timeout: Duration,
}

impl Control {
    pub(crate) fn new(ctrl_tx: mpsc::Sender<SwarmControlCmd>, peerstore: PeerStore, default_timeout: Duration) -> Self {
        Control {
            ctrl_tx,
            peerstore,
            default_timeout,
        }
    }

    /// The peerstore of the swarm; the way to seed dialable addresses.
    pub fn peerstore(&self) -> &PeerStore {
        &self.peerstore
    }

    /// Adds a known address for a peer.
    pub fn add_addr(&self, peer: &PeerId, addr: Multiaddr, ttl: Duration) {
        self.peerstore.add_addr(peer, addr, ttl);
    }

    /// Ensures a connection to `peer` exists, with the default deadline.
    pub async fn new_connection(&mut self, peer: PeerId) -> Result<(), SwarmError> {
        let timeout = self.default_timeout;
        self.new_connection_with_timeout(peer, timeout).await
    }

    pub async fn new_connection_with_timeout(&mut self, peer: PeerId, timeout: Duration) -> Result<(), SwarmError> {
        let (tx, rx) = oneshot::channel();
        self.ctrl_tx
            .send(SwarmControlCmd::NewConnection(peer, tx))
            .await
            .map_err(|_| SwarmError::Closed)?;
        with_deadline(rx, timeout).await?
    }

    /// Opens a substream to `peer` speaking the first of `protos` the
    /// remote supports, with the default deadline.
    pub async fn new_stream(&mut self, peer: PeerId, protos: Vec<ProtocolId>) -> Result<Substream, SwarmError> {
        let timeout = self.default_timeout;
        self.new_stream_with_timeout(peer, protos, timeout).await
    }

    pub async fn new_stream_with_timeout(
        &mut self,
        peer: PeerId,
        protos: Vec<ProtocolId>,
        timeout: Duration,
    ) -> Result<Substream, SwarmError> {
        let (tx, rx) = oneshot::channel();
        self.ctrl_tx
            .send(SwarmControlCmd::NewStream(peer, protos, tx))
            .await
            .map_err(|_| SwarmError::Closed)?;
        with_deadline(rx, timeout).await?
    }

    /// Closes every connection to `peer`.
    pub async fn disconnect(&mut self, peer: PeerId) -> Result<(), SwarmError> {
        let (tx, rx) = oneshot::channel();
        self.ctrl_tx
            .send(SwarmControlCmd::CloseConnection(peer, tx))
            .await
            .map_err(|_| SwarmError::Closed)?;
        rx.await.map_err(|_| SwarmError::Closed)?
    }

    /// Shuts the swarm down.
    pub async fn close(&mut self) {
        let _ = self.ctrl_tx.send(SwarmControlCmd::CloseSwarm).await;
    }
}

/// Awaits `rx` up to `timeout`. Dropping the receiver on timeout is what
/// propagates cancellation into the dial or negotiation behind it.
async fn with_deadline<T>(rx: oneshot::Receiver<T>, timeout: Duration) -> Result<T, SwarmError> {
    let mut rx = rx.fuse();
    let mut delay = Delay::new(timeout).fuse();
    futures::select! {
        out = rx => out.map_err(|_| SwarmError::Closed),
        _ = delay => Err(SwarmError::Timeout),
    }
}
