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

//! Transport upgrader.
//!
//! A `TransportUpgrade` wraps a raw transport and applies the upgrade
//! pipeline to every inbound and outbound connection: first the channel
//! security upgrade, then the stream-muxer upgrade, each preceded by its own
//! multistream-select negotiation. Only fully upgraded connections, i.e.
//! muxed sessions bound to a verified remote identity, ever leave this
//! module.

use crate::muxing::{IStreamMuxer, StreamMuxerEx};
use crate::secure_io::SecureInfo;
use crate::transport::{ConnectionInfo, IListener, ITransport, Transport, TransportError, TransportListener};
use crate::upgrade::multistream::Multistream;
use crate::upgrade::Upgrader;
use crate::{Multiaddr, PeerId};
use async_trait::async_trait;
use log::{debug, trace};
use std::convert::TryFrom;
use up2p_traits::SplittableReadWrite;

/// A `TransportUpgrade` is a `Transport` that wraps another `Transport` and
/// adds upgrade capabilities to all inbound and outbound connection attempts.
#[derive(Debug, Clone)]
pub struct TransportUpgrade<InnerTrans, TSecUp, TMuxUp> {
    inner: InnerTrans,
    security: Multistream<TSecUp>,
    mux: Multistream<TMuxUp>,
}

impl<InnerTrans, TSecUp, TMuxUp> TransportUpgrade<InnerTrans, TSecUp, TMuxUp> {
    /// Wraps around a `Transport` to add upgrade capabilities.
    pub fn new(inner: InnerTrans, security: TSecUp, mux: TMuxUp) -> Self {
        TransportUpgrade {
            inner,
            security: Multistream::new(security),
            mux: Multistream::new(mux),
        }
    }
}

#[async_trait]
impl<InnerTrans, TSecUp, TMuxUp> Transport for TransportUpgrade<InnerTrans, TSecUp, TMuxUp>
where
    InnerTrans: Transport + Clone + Send + 'static,
    InnerTrans::Output: ConnectionInfo + SplittableReadWrite,
    TSecUp: Upgrader<InnerTrans::Output> + Send + Sync + 'static,
    TSecUp::Output: SecureInfo + SplittableReadWrite,
    TMuxUp: Upgrader<TSecUp::Output> + Send + Sync + 'static,
    TMuxUp::Output: StreamMuxerEx + 'static,
{
    type Output = IStreamMuxer;

    async fn listen_on(&mut self, addr: Multiaddr) -> Result<IListener<Self::Output>, TransportError> {
        let inner_listener = self.inner.listen_on(addr).await?;
        Ok(Box::new(ListenerUpgrade {
            inner: inner_listener,
            security: self.security.clone(),
            mux: self.mux.clone(),
        }))
    }

    async fn dial(&mut self, addr: Multiaddr) -> Result<Self::Output, TransportError> {
        // A trailing /p2p component names the peer we expect to find.
        let expected = addr
            .peer_id_part()
            .and_then(|mh| PeerId::try_from(mh).ok());
        let raw_addr = addr.without_peer_id();

        let socket = self.inner.dial(raw_addr).await?;
        trace!("dialed {}, securing...", addr);
        let sec_socket = self.security.clone().select_outbound(socket).await?;

        if let Some(expected) = expected {
            let got = sec_socket.remote_peer();
            if got != expected {
                debug!("peer identity mismatch on {}: expected {}, got {}", addr, expected, got);
                return Err(TransportError::PeerIdMismatch { expected, got });
            }
        }

        let muxer = self.mux.clone().select_outbound(sec_socket).await?;
        Ok(Box::new(muxer))
    }

    fn box_clone(&self) -> ITransport<Self::Output> {
        Box::new(self.clone())
    }

    fn protocols(&self) -> Vec<u32> {
        self.inner.protocols()
    }
}

pub struct ListenerUpgrade<InnerListener, TSecUp, TMuxUp> {
    inner: InnerListener,
    security: Multistream<TSecUp>,
    mux: Multistream<TMuxUp>,
}

#[async_trait]
impl<InnerListener, TSecUp, TMuxUp> TransportListener for ListenerUpgrade<InnerListener, TSecUp, TMuxUp>
where
    InnerListener: TransportListener + Send,
    InnerListener::Output: ConnectionInfo + SplittableReadWrite,
    TSecUp: Upgrader<InnerListener::Output> + Send + Sync + 'static,
    TSecUp::Output: SecureInfo + SplittableReadWrite,
    TMuxUp: Upgrader<TSecUp::Output> + Send + Sync + 'static,
    TMuxUp::Output: StreamMuxerEx + 'static,
{
    type Output = IStreamMuxer;

    async fn accept(&mut self) -> Result<Self::Output, TransportError> {
        let socket = self.inner.accept().await?;
        trace!("got a new connection, upgrading...");
        let sec_socket = self.security.clone().select_inbound(socket).await?;
        let muxer = self.mux.clone().select_inbound(sec_socket).await?;
        Ok(Box::new(muxer) as IStreamMuxer)
    }

    fn multi_addr(&self) -> Multiaddr {
        self.inner.multi_addr()
    }
}
