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

//! The stream-muxer capability.
//!
//! A muxer carves one secured connection into many logical byte-streams.
//! The swarm only ever sees the boxed forms: [`IStreamMuxer`] for sessions
//! and [`IReadWrite`] for the substreams they hand out.

use crate::secure_io::SecureInfo;
use crate::transport::{ConnectionInfo, TransportError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use up2p_traits::{ReadEx, WriteEx};

/// Identity of a logical stream within its muxer session.
pub trait StreamInfo: Send {
    /// The muxer-assigned stream id.
    fn id(&self) -> usize;
}

/// A logical byte-stream handed out by a muxer.
#[async_trait]
pub trait ReadWriteEx: ReadEx + WriteEx + StreamInfo + Unpin + fmt::Debug {
    /// Aborts the stream: the peer observes a reset instead of a clean
    /// close. The owning session stays usable.
    async fn reset(&mut self) -> std::io::Result<()>;

    fn box_clone(&self) -> IReadWrite;
}

pub type IReadWrite = Box<dyn ReadWriteEx + Send>;

impl Clone for IReadWrite {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

#[async_trait]
impl ReadEx for IReadWrite {
    async fn read2(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.as_mut().read2(buf).await
    }
}

#[async_trait]
impl WriteEx for IReadWrite {
    async fn write2(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.as_mut().write2(buf).await
    }

    async fn flush2(&mut self) -> std::io::Result<()> {
        self.as_mut().flush2().await
    }

    async fn close2(&mut self) -> std::io::Result<()> {
        self.as_mut().close2().await
    }
}

/// A stream muxer session over a secured connection.
#[async_trait]
pub trait StreamMuxer: Send {
    /// Opens a new outbound logical stream.
    async fn open_stream(&mut self) -> Result<IReadWrite, TransportError>;

    /// Blocks until the remote opens a new inbound logical stream.
    async fn accept_stream(&mut self) -> Result<IReadWrite, TransportError>;

    /// Closes the session. Open streams observe end-of-stream; opening
    /// further streams fails.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Returns the background task that drives the session I/O, if it has
    /// not been taken yet. The caller must spawn it.
    fn task(&mut self) -> Option<BoxFuture<'static, ()>>;

    fn box_clone(&self) -> IStreamMuxer;
}

/// The full capability set of a muxed, secured connection.
pub trait StreamMuxerEx: StreamMuxer + SecureInfo + ConnectionInfo + fmt::Debug {}

pub type IStreamMuxer = Box<dyn StreamMuxerEx + Send>;

impl Clone for IStreamMuxer {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
