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

//! Connection-oriented communication channels.
//!
//! A [`Transport`] turns a [`Multiaddr`] into a raw byte-stream, either by
//! dialing or by accepting on a listener. Everything above it, security,
//! multiplexing, protocol selection, is layered on by
//! [`upgrade::TransportUpgrade`].

pub mod memory;
pub mod upgrade;

use crate::multistream::NegotiationError;
use crate::{Multiaddr, PeerId};
use async_trait::async_trait;
use std::error::Error;
use std::io;
use thiserror::Error;

/// A transport provides connection-oriented communication between two peers.
///
/// Connections are established either by listening or by dialing.
/// To allow the transport to be erased into [`ITransport`], the listener is
/// handed out boxed as an [`IListener`].
#[async_trait]
pub trait Transport: Send {
    /// The output of the transport: a byte-stream, at whatever level of
    /// upgrade this transport has applied.
    type Output;

    /// Listens on the given multiaddr, producing a listener that yields
    /// an unbounded sequence of inbound connections.
    async fn listen_on(&mut self, addr: Multiaddr) -> Result<IListener<Self::Output>, TransportError>;

    /// Dials the given multiaddr.
    async fn dial(&mut self, addr: Multiaddr) -> Result<Self::Output, TransportError>;

    /// Clones this transport into a boxed trait object.
    fn box_clone(&self) -> ITransport<Self::Output>;

    /// The multiaddr protocol codes this transport recognises.
    fn protocols(&self) -> Vec<u32>;
}

pub type ITransport<TOutput> = Box<dyn Transport<Output = TOutput> + Send>;
pub type IListener<TOutput> = Box<dyn TransportListener<Output = TOutput> + Send>;

impl<TOutput> Clone for ITransport<TOutput> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// The listener side of a [`Transport`].
#[async_trait]
pub trait TransportListener: Send {
    /// The type of connections yielded by this listener.
    type Output;

    /// Blocks until an inbound connection arrives.
    async fn accept(&mut self) -> Result<Self::Output, TransportError>;

    /// The multiaddr this listener is bound to. For port-zero listen
    /// addresses this reports the actual local port.
    fn multi_addr(&self) -> Multiaddr;
}

#[async_trait]
impl<T> TransportListener for Box<T>
where
    T: TransportListener + ?Sized,
{
    type Output = T::Output;

    async fn accept(&mut self) -> Result<Self::Output, TransportError> {
        (**self).accept().await
    }

    fn multi_addr(&self) -> Multiaddr {
        (**self).multi_addr()
    }
}

/// The endpoint addresses of an established connection.
pub trait ConnectionInfo: Send {
    fn local_multiaddr(&self) -> Multiaddr;
    fn remote_multiaddr(&self) -> Multiaddr;
}

/// Errors raised by transports and the upgrade pipeline built on them.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("multiaddr is not supported: {0}")]
    MultiaddrNotSupported(Multiaddr),

    #[error("i/o error: {0}")]
    IoError(#[from] io::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("connection refused by the remote")]
    ConnectionRefused,

    #[error("connection reset")]
    ConnectionReset,

    #[error("transport or listener closed")]
    Closed,

    #[error("security handshake failed: {0}")]
    SecurityError(Box<dyn Error + Send + Sync>),

    #[error("remote peer identity mismatch: expected {expected}, got {got}")]
    PeerIdMismatch { expected: PeerId, got: PeerId },

    #[error("stream muxer error: {0}")]
    StreamMuxerError(Box<dyn Error + Send + Sync>),

    #[error("protocol negotiation failed: {0}")]
    NegotiationError(#[from] NegotiationError),

    #[error("transport internal error: {0}")]
    Internal(&'static str),
}
