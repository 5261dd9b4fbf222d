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

//! Communication channel to a remote peer.
//!
//! A [`Connection`] owns exactly one muxed, secured session. It spawns the
//! session's background task and an accept loop that negotiates every
//! inbound substream against the handler registry and dispatches it, in
//! the order the remote opened them.

use async_std::task;
use async_std::task::JoinHandle;
use futures::channel::{mpsc, oneshot};
use log::{debug, trace};
use std::fmt;
use std::time::Instant;

use crate::control::SwarmControlCmd;
use crate::registry::Registry;
use crate::substream::Substream;
use crate::{ProtocolId, SwarmError, SwarmEvent};
use up2p_core::multistream::Negotiator;
use up2p_core::muxing::IStreamMuxer;
use up2p_core::transport::TransportError;
use up2p_core::upgrade::ProtocolName;
use up2p_core::{Multiaddr, PeerId, PublicKey};

/// The direction of a peer-to-peer communication channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The socket comes from a dialer.
    Outbound,
    /// The socket comes from a listener.
    Inbound,
}

/// The session id of a connection, monotonic within its swarm.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) usize);

/// A muxed connection to a peer with associated substreams.
pub struct Connection {
    /// The unique id of the connection.
    id: ConnectionId,
    /// The muxed session; clones share its control channel.
    stream_muxer: IStreamMuxer,
    /// Direction of this connection.
    dir: Direction,
    /// When the connection completed its upgrades.
    opened_at: Instant,
    /// The tx channel for sending connection events to the swarm.
    event_tx: mpsc::UnboundedSender<SwarmEvent>,
    /// The control channel handed to substreams.
    ctrl_tx: mpsc::Sender<SwarmControlCmd>,
    /// The task driving the muxer session I/O.
    handle: Option<JoinHandle<()>>,
    /// The task accepting and dispatching inbound substreams.
    accept_handle: Option<JoinHandle<()>>,
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("muxer", &self.stream_muxer)
            .field("dir", &self.dir)
            .finish()
    }
}

impl Connection {
    /// Builds a new `Connection` from an upgraded muxer session.
    pub(crate) fn new(
        id: ConnectionId,
        stream_muxer: IStreamMuxer,
        dir: Direction,
        event_tx: mpsc::UnboundedSender<SwarmEvent>,
        ctrl_tx: mpsc::Sender<SwarmControlCmd>,
    ) -> Self {
        Connection {
            id,
            stream_muxer,
            dir,
            opened_at: Instant::now(),
            event_tx,
            ctrl_tx,
            handle: None,
            accept_handle: None,
        }
    }

    /// Returns the unique id of the connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn dir(&self) -> Direction {
        self.dir
    }

    /// When both upgrades of this connection completed.
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn remote_peer(&self) -> PeerId {
        self.stream_muxer.remote_peer()
    }

    pub fn remote_pub_key(&self) -> PublicKey {
        self.stream_muxer.remote_pub_key()
    }

    pub fn local_multiaddr(&self) -> Multiaddr {
        self.stream_muxer.local_multiaddr()
    }

    pub fn remote_multiaddr(&self) -> Multiaddr {
        self.stream_muxer.remote_multiaddr()
    }

    /// Spawns the session driver and the inbound-substream accept loop.
    pub(crate) fn start(&mut self, registry: Registry) {
        if let Some(muxer_task) = self.stream_muxer.task() {
            let event_tx = self.event_tx.clone();
            let cid = self.id;
            let peer = self.remote_peer();
            self.handle = Some(task::spawn(async move {
                muxer_task.await;
                let _ = event_tx.unbounded_send(SwarmEvent::ConnectionClosed { cid, peer });
            }));
        }

        let mut muxer = self.stream_muxer.clone();
        let ctrl = self.ctrl_tx.clone();
        let cid = self.id;
        let la = self.local_multiaddr();
        let ra = self.remote_multiaddr();
        self.accept_handle = Some(task::spawn(async move {
            loop {
                let raw = match muxer.accept_stream().await {
                    Ok(raw) => raw,
                    Err(e) => {
                        trace!("{:?}: accept loop ends: {}", cid, e);
                        break;
                    }
                };
                let neg = Negotiator::new_with_protocols(registry.protocols());
                match neg.negotiate(raw).await {
                    Ok((proto, raw)) => {
                        trace!("{:?}: inbound substream negotiated {}", cid, proto.protocol_name_str());
                        let stream = Substream::new(raw, Direction::Inbound, proto, cid, la.clone(), ra.clone(), ctrl.clone());
                        if let Some(mut handler) = registry.get(proto) {
                            task::spawn(async move {
                                if let Err(e) = handler.handle(stream, proto).await {
                                    debug!("handler for {} failed: {}", proto.protocol_name_str(), e);
                                }
                            });
                        }
                    }
                    Err(e) => debug!("{:?}: inbound substream negotiation failed: {}", cid, e),
                }
            }
        }));
    }

    /// Opens an outbound substream and negotiates one of `protos` on it.
    /// Runs on its own task; the outcome lands in `reply`.
    pub(crate) fn open_stream(
        &mut self,
        protos: Vec<ProtocolId>,
        reply: oneshot::Sender<Result<Substream, SwarmError>>,
    ) {
        let mut muxer = self.stream_muxer.clone();
        let ctrl = self.ctrl_tx.clone();
        let cid = self.id;
        let la = self.local_multiaddr();
        let ra = self.remote_multiaddr();
        task::spawn(async move {
            let result = async move {
                let raw = muxer.open_stream().await.map_err(|e| match e {
                    TransportError::StreamMuxerError(_) => SwarmError::SessionShutdown,
                    e => SwarmError::Transport(e),
                })?;
                let neg = Negotiator::new_with_protocols(protos);
                let (proto, raw) = neg
                    .select_one(raw)
                    .await
                    .map_err(|e| SwarmError::Transport(TransportError::NegotiationError(e)))?;
                trace!("{:?}: outbound substream negotiated {}", cid, proto.protocol_name_str());
                Ok(Substream::new(raw, Direction::Outbound, proto, cid, la, ra, ctrl))
            }
            .await;
            let _ = reply.send(result);
        });
    }

    /// Initiates a graceful close of the muxer session. The
    /// `ConnectionClosed` event follows once the session task unwinds.
    pub(crate) fn close(&self) {
        let mut muxer = self.stream_muxer.clone();
        task::spawn(async move {
            let _ = muxer.close().await;
        });
    }
}
