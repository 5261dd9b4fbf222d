// Copyright 2020 Netwarps Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! High level manager of the network.
//!
//! A [`Swarm`] owns the connection table and drives the full upgrade
//! pipeline: transport dial or accept, channel security, stream muxing.
//! Once a connection is up, a cloneable [`Control`] opens outbound
//! substreams by protocol name, and the [`registry::ProtocolHandler`]s
//! registered with the swarm receive the inbound ones. Peer lifecycle is
//! published on an [`eventbus::EventBus`], which also feeds the peerstore
//! manager evicting peers that stay disconnected past a grace period.

pub mod cleanup;
pub mod connection;
pub mod eventbus;
pub mod registry;
pub mod substream;

mod control;

pub use connection::{Connection, ConnectionId, Direction};
pub use control::Control;
pub use registry::{DummyProtocolHandler, IProtocolHandler, ProtocolHandler};
pub use substream::{StreamId, Substream};

use async_std::task;
use cleanup::{CleanupConfig, PeerstoreManager};
use control::SwarmControlCmd;
use eventbus::{Connectedness, Event, EventBus};
use fnv::FnvHashMap;
use futures::channel::{mpsc, oneshot};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use log::{debug, info, trace};
use registry::Registry;
use std::time::Duration;
use thiserror::Error;
use up2p_core::identity::Keypair;
use up2p_core::muxing::IStreamMuxer;
use up2p_core::peerstore::{PeerStore, ADDRESS_TTL};
use up2p_core::transport::{ITransport, TransportError};
use up2p_core::{Multiaddr, Multihash, PeerId, Protocol};

/// A protocol identifier, e.g. `b"/echo/1.0.0"`.
pub type ProtocolId = &'static [u8];

/// Default deadline applied to user-initiated operations that do not
/// bring their own.
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors a swarm operation may surface.
#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("no known addresses for peer {0}")]
    NoAddresses(PeerId),

    #[error("all dial attempts to {0} failed: {1:?}")]
    DialFailed(PeerId, Vec<(Multiaddr, TransportError)>),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("connection rejected by the gater")]
    Gated,

    #[error("the muxer session is shut down")]
    SessionShutdown,

    #[error("operation timed out")]
    Timeout,

    #[error("the swarm is closed")]
    Closed,
}

/// A predicate consulted after the security handshake of every inbound
/// and outbound connection; `false` closes the connection.
pub trait ConnectionGater: Send + Sync {
    fn intercept_secured(&self, peer: &PeerId, dir: Direction, remote_addr: &Multiaddr) -> bool;
}

/// What a dial was started for.
enum DialRequest {
    Connection(oneshot::Sender<Result<(), SwarmError>>),
    Stream(Vec<ProtocolId>, oneshot::Sender<Result<Substream, SwarmError>>),
}

/// Events flowing from listener, dialer and connection tasks into the
/// swarm's event loop.
pub(crate) enum SwarmEvent {
    ConnectionEstablished {
        muxer: IStreamMuxer,
        dir: Direction,
        request: Option<DialRequest>,
    },
    ConnectionClosed {
        cid: ConnectionId,
        peer: PeerId,
    },
    ListenerClosed {
        addr: Multiaddr,
    },
}

/// Contains the state of the network, plus the way it should behave.
pub struct Swarm {
    local_peer_id: PeerId,
    #[allow(dead_code)]
    keypair: Keypair,
    transport: Option<ITransport<IStreamMuxer>>,
    listen_addrs: Vec<Multiaddr>,
    conns: FnvHashMap<ConnectionId, Connection>,
    next_cid: usize,
    registry: Registry,
    gater: Option<Box<dyn ConnectionGater>>,
    peerstore: PeerStore,
    bus: EventBus,
    cleanup_config: CleanupConfig,
    event_tx: mpsc::UnboundedSender<SwarmEvent>,
    event_rx: mpsc::UnboundedReceiver<SwarmEvent>,
    ctrl_tx: mpsc::Sender<SwarmControlCmd>,
    ctrl_rx: mpsc::Receiver<SwarmControlCmd>,
}

impl Swarm {
    /// Creates a swarm with the given identity. A transport must be added
    /// with [`Swarm::with_transport`] before anything can be dialed.
    pub fn new(keypair: Keypair) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded();
        let (ctrl_tx, ctrl_rx) = mpsc::channel(32);
        Swarm {
            local_peer_id: keypair.public().into_peer_id(),
            keypair,
            transport: None,
            listen_addrs: Vec::new(),
            conns: FnvHashMap::default(),
            next_cid: 0,
            registry: Registry::new(),
            gater: None,
            peerstore: PeerStore::default(),
            bus: EventBus::new(),
            cleanup_config: CleanupConfig::default(),
            event_tx,
            event_rx,
            ctrl_tx,
            ctrl_rx,
        }
    }

    /// Installs the fully upgraded transport (security and muxer layered
    /// on top of the raw transport).
    pub fn with_transport(mut self, transport: ITransport<IStreamMuxer>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Registers a handler for the protocols it announces.
    pub fn with_protocol_handler(mut self, handler: IProtocolHandler) -> Self {
        self.registry.add_handler(handler);
        self
    }

    pub fn with_connection_gater(mut self, gater: Box<dyn ConnectionGater>) -> Self {
        self.gater = Some(gater);
        self
    }

    pub fn with_cleanup_config(mut self, config: CleanupConfig) -> Self {
        self.cleanup_config = config;
        self
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    pub fn peer_store(&self) -> PeerStore {
        self.peerstore.clone()
    }

    pub fn event_bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// The addresses the swarm is listening on.
    pub fn listen_addrs(&self) -> &[Multiaddr] {
        &self.listen_addrs
    }

    /// A handle for talking to the swarm once it is started.
    pub fn control(&self) -> Control {
        Control::new(self.ctrl_tx.clone(), self.peerstore.clone(), DEFAULT_OP_TIMEOUT)
    }

    /// Starts listening on the given addresses. Port-zero addresses
    /// resolve to the actual bound port.
    pub async fn listen_on(&mut self, addrs: Vec<Multiaddr>) -> Result<(), SwarmError> {
        let transport = self.transport.as_mut().ok_or(SwarmError::Closed)?;
        for addr in addrs {
            let mut listener = transport.listen_on(addr).await?;
            let actual = listener.multi_addr();
            info!("swarm listening on {}", actual);
            self.listen_addrs.push(actual.clone());

            let event_tx = self.event_tx.clone();
            task::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok(muxer) => {
                            let _ = event_tx.unbounded_send(SwarmEvent::ConnectionEstablished {
                                muxer,
                                dir: Direction::Inbound,
                                request: None,
                            });
                        }
                        // A failed upgrade only loses that connection.
                        Err(TransportError::Closed) => {
                            debug!("listener on {} closed", actual);
                            let _ = event_tx.unbounded_send(SwarmEvent::ListenerClosed { addr: actual });
                            break;
                        }
                        Err(e) => debug!("inbound upgrade on {} failed: {}", actual, e),
                    }
                }
            });
        }
        self.bus.publish(Event::LocalAddressesUpdated(self.listen_addrs.clone()));
        Ok(())
    }

    /// Starts the swarm: spawns the event loop and the peerstore manager.
    pub fn start(self) {
        let manager = PeerstoreManager::start(self.bus.subscribe(), self.peerstore.clone(), self.cleanup_config.clone());
        task::spawn(self.run(manager));
    }

    async fn run(mut self, manager: PeerstoreManager) {
        enum Wake {
            Ctrl(Option<SwarmControlCmd>),
            Event(Option<SwarmEvent>),
        }
        loop {
            let wake = futures::select! {
                cmd = self.ctrl_rx.next() => Wake::Ctrl(cmd),
                ev = self.event_rx.next() => Wake::Event(ev),
            };
            match wake {
                Wake::Ctrl(Some(SwarmControlCmd::CloseSwarm)) | Wake::Ctrl(None) => break,
                Wake::Ctrl(Some(cmd)) => self.on_control(cmd),
                Wake::Event(Some(ev)) => self.on_event(ev),
                Wake::Event(None) => break,
            }
        }
        info!("swarm shutting down");
        for conn in self.conns.values() {
            conn.close();
        }
        manager.stop().await;
    }

    fn on_control(&mut self, cmd: SwarmControlCmd) {
        match cmd {
            SwarmControlCmd::NewConnection(peer, reply) => {
                if self.best_connection(&peer).is_some() {
                    let _ = reply.send(Ok(()));
                } else {
                    self.dial(peer, DialRequest::Connection(reply));
                }
            }
            SwarmControlCmd::NewStream(peer, protos, reply) => {
                if let Some((protos, reply)) = self.open_on_existing(&peer, protos, reply) {
                    self.dial(peer, DialRequest::Stream(protos, reply));
                }
            }
            SwarmControlCmd::CloseConnection(peer, reply) => {
                for conn in self.conns.values().filter(|c| c.remote_peer() == peer) {
                    conn.close();
                }
                let _ = reply.send(Ok(()));
            }
            SwarmControlCmd::CloseStream(cid, sid) => {
                trace!("{:?}: substream {:?} closed by owner", cid, sid);
            }
            // Dispatched in `run` before reaching here.
            SwarmControlCmd::CloseSwarm => {}
        }
    }

    fn on_event(&mut self, ev: SwarmEvent) {
        match ev {
            SwarmEvent::ConnectionEstablished { muxer, dir, request } => self.on_connection(muxer, dir, request),
            SwarmEvent::ConnectionClosed { cid, peer } => {
                if self.conns.remove(&cid).is_some() {
                    debug!("{:?} to {} closed", cid, peer);
                    if self.connection_count(&peer) == 0 {
                        self.bus.publish(Event::PeerConnectednessChanged {
                            peer,
                            connectedness: Connectedness::NotConnected,
                        });
                    }
                }
            }
            SwarmEvent::ListenerClosed { addr } => {
                self.listen_addrs.retain(|a| a != &addr);
                self.bus.publish(Event::LocalAddressesUpdated(self.listen_addrs.clone()));
            }
        }
    }

    /// Admission of a fully upgraded connection: gating, deduplication,
    /// book-keeping, events: then any pending stream request runs on it.
    fn on_connection(&mut self, muxer: IStreamMuxer, dir: Direction, request: Option<DialRequest>) {
        let peer = muxer.remote_peer();

        if let Some(gater) = &self.gater {
            if !gater.intercept_secured(&peer, dir, &muxer.remote_multiaddr()) {
                debug!("connection to {} gated, closing", peer);
                close_muxer(muxer);
                if let Some(request) = request {
                    fail_request(request, SwarmError::Gated);
                }
                return;
            }
        }

        // At most one connection per (peer, direction) survives the
        // handshake; the earlier one (lower session id) wins.
        if let Some(existing) = self
            .conns
            .values()
            .filter(|c| c.remote_peer() == peer && c.dir() == dir)
            .map(|c| c.id())
            .min()
        {
            debug!("duplicate {:?} connection to {}, keeping {:?}", dir, peer, existing);
            close_muxer(muxer);
            if let Some(request) = request {
                self.finish_request(&peer, request);
            }
            return;
        }

        let cid = ConnectionId(self.next_cid);
        self.next_cid += 1;
        let mut conn = Connection::new(cid, muxer, dir, self.event_tx.clone(), self.ctrl_tx.clone());
        conn.start(self.registry.clone());

        if dir == Direction::Outbound {
            // Only peers we reached out to enter the peerstore: inbound
            // source addresses are ephemeral ports and not dialable.
            self.peerstore.add_key(&peer, conn.remote_pub_key());
            self.peerstore.add_addr(&peer, conn.remote_multiaddr(), ADDRESS_TTL);
        }

        let first = self.connection_count(&peer) == 0;
        info!("{:?} connection to {} established ({:?})", dir, peer, cid);
        self.conns.insert(cid, conn);
        if first {
            self.bus.publish(Event::PeerConnectednessChanged {
                peer: peer.clone(),
                connectedness: Connectedness::Connected,
            });
        }

        if let Some(request) = request {
            self.finish_request(&peer, request);
        }
    }

    /// Dials every known address of `peer` concurrently; the first
    /// success wins and the losers are dropped.
    fn dial(&mut self, peer: PeerId, request: DialRequest) {
        let addrs = match self.peerstore.get_addrs(&peer) {
            Some(addrs) if !addrs.is_empty() => addrs,
            _ => {
                fail_request(request, SwarmError::NoAddresses(peer));
                return;
            }
        };
        let transport = match &self.transport {
            Some(transport) => transport.clone(),
            None => {
                fail_request(request, SwarmError::Closed);
                return;
            }
        };
        let event_tx = self.event_tx.clone();

        task::spawn(async move {
            let mut request = request;
            let mut attempts: FuturesUnordered<_> = addrs
                .into_iter()
                .map(|addr| {
                    let mut transport = transport.clone();
                    let dial_addr = with_expected_peer(addr.clone(), &peer);
                    async move { (addr, transport.dial(dial_addr).await) }
                })
                .collect();

            let mut errors = Vec::new();
            let mut winner = None;
            loop {
                let cancelled = match &mut request {
                    DialRequest::Connection(reply) => futures::future::Either::Left(reply.cancellation()),
                    DialRequest::Stream(_, reply) => futures::future::Either::Right(reply.cancellation()),
                }
                .fuse();
                futures::pin_mut!(cancelled);
                futures::select! {
                    _ = cancelled => {
                        debug!("dial to {} cancelled by the caller", peer);
                        return;
                    }
                    next = attempts.next() => match next {
                        Some((addr, Ok(muxer))) => {
                            trace!("dial to {} via {} won the race", peer, addr);
                            winner = Some(muxer);
                            break;
                        }
                        Some((addr, Err(e))) => {
                            debug!("dial attempt to {} via {} failed: {}", peer, addr, e);
                            errors.push((addr, e));
                        }
                        None => break,
                    }
                }
            }
            // Losing dials still in flight are cancelled here.
            drop(attempts);

            match winner {
                Some(muxer) => {
                    let _ = event_tx.unbounded_send(SwarmEvent::ConnectionEstablished {
                        muxer,
                        dir: Direction::Outbound,
                        request: Some(request),
                    });
                }
                None => {
                    let error = match errors.pop() {
                        // A single failed address surfaces its error as-is.
                        Some((_, e)) if errors.is_empty() => SwarmError::Transport(e),
                        Some(pair) => {
                            errors.push(pair);
                            SwarmError::DialFailed(peer, errors)
                        }
                        None => SwarmError::DialFailed(peer, errors),
                    };
                    fail_request(request, error);
                }
            }
        });
    }

    /// Opens the stream on a live connection to `peer` if there is one;
    /// otherwise hands the request back to the caller.
    fn open_on_existing(
        &mut self,
        peer: &PeerId,
        protos: Vec<ProtocolId>,
        reply: oneshot::Sender<Result<Substream, SwarmError>>,
    ) -> Option<(Vec<ProtocolId>, oneshot::Sender<Result<Substream, SwarmError>>)> {
        if let Some(cid) = self.best_connection(peer) {
            if let Some(conn) = self.conns.get_mut(&cid) {
                conn.open_stream(protos, reply);
                return None;
            }
        }
        Some((protos, reply))
    }

    /// Completes a dial request against the connection table.
    fn finish_request(&mut self, peer: &PeerId, request: DialRequest) {
        match request {
            DialRequest::Connection(reply) => {
                let _ = reply.send(Ok(()));
            }
            DialRequest::Stream(protos, reply) => {
                if let Some((_, reply)) = self.open_on_existing(peer, protos, reply) {
                    // The connection vanished between admission and use.
                    let _ = reply.send(Err(SwarmError::SessionShutdown));
                }
            }
        }
    }

    fn best_connection(&self, peer: &PeerId) -> Option<ConnectionId> {
        self.conns
            .values()
            .filter(|c| c.remote_peer() == *peer)
            .map(|c| c.id())
            .min()
    }

    fn connection_count(&self, peer: &PeerId) -> usize {
        self.conns.values().filter(|c| c.remote_peer() == *peer).count()
    }
}

/// Appends `/p2p/<peer>` so the security upgrade verifies the remote
/// identity against the peer we meant to reach.
fn with_expected_peer(addr: Multiaddr, peer: &PeerId) -> Multiaddr {
    if addr.peer_id_part().is_some() {
        return addr;
    }
    addr.with(Protocol::P2p(Multihash::from(peer.clone())))
}

/// Closes a session the swarm never adopted. Its driver task has not been
/// spawned yet, so it must run here for the close to be processed.
fn close_muxer(mut muxer: IStreamMuxer) {
    if let Some(driver) = muxer.task() {
        task::spawn(driver);
    }
    task::spawn(async move {
        let _ = muxer.close().await;
    });
}

fn fail_request(request: DialRequest, error: SwarmError) {
    match request {
        DialRequest::Connection(reply) => {
            let _ = reply.send(Err(error));
        }
        DialRequest::Stream(_, reply) => {
            let _ = reply.send(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_peer_is_appended_once() {
        let peer = PeerId::random();
        let addr: Multiaddr = "/ip4/127.0.0.1/udp/1/udx".parse().unwrap();
        let with = with_expected_peer(addr, &peer);
        assert!(with.peer_id_part().is_some());
        let again = with_expected_peer(with.clone(), &peer);
        assert_eq!(again, with);
    }
}
