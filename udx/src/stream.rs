//! Stream handles.
//!
//! A [`UdxStream`] is a pair of halves talking to the socket driver task:
//! the write half submits byte chunks and awaits their admission into the
//! send buffer (which is how back-pressure reaches the caller), the read
//! half consumes ordered chunks from a per-stream channel and reports
//! consumption back so the advertised window reopens.

use crate::socket::SocketCommand;
use crate::UdxError;
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use std::io;
use std::net::SocketAddr;
use up2p_traits::{ReadEx, SplitEx, WriteEx};

/// A reliable, ordered byte-stream over UDP datagrams.
#[derive(Debug)]
pub struct UdxStream {
    read: UdxReadHalf,
    write: UdxWriteHalf,
}

impl UdxStream {
    pub(crate) fn new(
        id: u32,
        cmd: mpsc::UnboundedSender<SocketCommand>,
        incoming: mpsc::UnboundedReceiver<Result<Bytes, UdxError>>,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> Self {
        UdxStream {
            read: UdxReadHalf {
                id,
                cmd: cmd.clone(),
                incoming,
                buffer: Bytes::new(),
                failed: None,
                local_addr,
                remote_addr,
            },
            write: UdxWriteHalf {
                id,
                cmd,
                closed: false,
            },
        }
    }

    /// The stream id on the local socket.
    pub fn id(&self) -> u32 {
        self.read.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.read.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.read.remote_addr
    }

    /// Aborts the stream: a RST is sent and the peer's next read or write
    /// fails.
    pub fn reset(&mut self) {
        self.write.closed = true;
        let _ = self.write.cmd.unbounded_send(SocketCommand::Reset { id: self.write.id });
    }
}

#[async_trait]
impl ReadEx for UdxStream {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read.read2(buf).await
    }
}

#[async_trait]
impl WriteEx for UdxStream {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write.write2(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        self.write.flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.write.close2().await
    }
}

impl SplitEx for UdxStream {
    type Reader = UdxReadHalf;
    type Writer = UdxWriteHalf;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (self.read, self.write)
    }
}

/// The receive half of a [`UdxStream`].
#[derive(Debug)]
pub struct UdxReadHalf {
    id: u32,
    cmd: mpsc::UnboundedSender<SocketCommand>,
    incoming: mpsc::UnboundedReceiver<Result<Bytes, UdxError>>,
    buffer: Bytes,
    failed: Option<UdxError>,
    pub(crate) local_addr: SocketAddr,
    pub(crate) remote_addr: SocketAddr,
}

#[async_trait]
impl ReadEx for UdxReadHalf {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(e) = self.failed {
            return Err(e.into());
        }
        loop {
            if !self.buffer.is_empty() {
                let n = std::cmp::min(buf.len(), self.buffer.len());
                buf[..n].copy_from_slice(&self.buffer[..n]);
                self.buffer.advance(n);
                // Let the driver reopen the advertised window.
                let _ = self.cmd.unbounded_send(SocketCommand::Consumed { id: self.id, n });
                return Ok(n);
            }
            match self.incoming.next().await {
                Some(Ok(bytes)) => self.buffer = bytes,
                Some(Err(e)) => {
                    self.failed = Some(e);
                    return Err(e.into());
                }
                // Channel gone after a clean FIN: end-of-stream.
                None => return Ok(0),
            }
        }
    }
}

/// The send half of a [`UdxStream`].
#[derive(Debug)]
pub struct UdxWriteHalf {
    id: u32,
    cmd: mpsc::UnboundedSender<SocketCommand>,
    closed: bool,
}

#[async_trait]
impl WriteEx for UdxWriteHalf {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::ErrorKind::WriteZero.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let (tx, rx) = oneshot::channel();
        self.cmd
            .unbounded_send(SocketCommand::Outgoing {
                id: self.id,
                data: Bytes::copy_from_slice(buf),
                reply: tx,
            })
            .map_err(|_| io::Error::from(io::ErrorKind::NotConnected))?;
        match rx.await {
            Ok(Ok(())) => Ok(buf.len()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(UdxError::ConnectionReset.into()),
        }
    }

    async fn flush2(&mut self) -> io::Result<()> {
        // Segments are transmitted eagerly; there is no write-side buffer
        // beyond the retransmission queue.
        Ok(())
    }

    async fn close2(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            let _ = self.cmd.unbounded_send(SocketCommand::Shutdown { id: self.id });
        }
        Ok(())
    }
}

impl Drop for UdxWriteHalf {
    fn drop(&mut self) {
        // A dropped, never-closed stream aborts instead of leaking: the
        // peer observes a RST rather than silence.
        if !self.closed {
            let _ = self.cmd.unbounded_send(SocketCommand::Reset { id: self.id });
        }
    }
}
