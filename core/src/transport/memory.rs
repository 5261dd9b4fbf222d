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

//! In-process transport, `/memory/<port>`.
//!
//! A logical connection is a pair of unbounded channels. Used as the test
//! double underneath the security and muxer layers.

use crate::transport::{ConnectionInfo, IListener, ITransport, Transport, TransportError, TransportListener};
use crate::Multiaddr;
use async_trait::async_trait;
use fnv::FnvHashMap;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::io;
use up2p_multiaddr::Protocol;
use up2p_traits::{ReadEx, SplitEx, WriteEx};

lazy_static! {
    static ref HUB: Mutex<FnvHashMap<u64, mpsc::UnboundedSender<Chan>>> = Mutex::new(FnvHashMap::default());
}

/// An in-process transport.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport;

#[async_trait]
impl Transport for MemoryTransport {
    type Output = Chan;

    async fn listen_on(&mut self, addr: Multiaddr) -> Result<IListener<Self::Output>, TransportError> {
        let mut port = parse_memory_addr(&addr).ok_or_else(|| TransportError::MultiaddrNotSupported(addr.clone()))?;
        let (tx, rx) = mpsc::unbounded();
        {
            let mut hub = HUB.lock();
            if port == 0 {
                port = loop {
                    let candidate = rand::random::<u64>().saturating_add(1);
                    if !hub.contains_key(&candidate) {
                        break candidate;
                    }
                };
            } else if hub.contains_key(&port) {
                return Err(TransportError::IoError(io::ErrorKind::AddrInUse.into()));
            }
            hub.insert(port, tx);
        }
        let actual_addr = Multiaddr::from(Protocol::Memory(port));
        Ok(Box::new(MemoryListener { port, addr: actual_addr, rx }))
    }

    async fn dial(&mut self, addr: Multiaddr) -> Result<Self::Output, TransportError> {
        let port = parse_memory_addr(&addr).ok_or_else(|| TransportError::MultiaddrNotSupported(addr.clone()))?;
        let mut listener = {
            let hub = HUB.lock();
            hub.get(&port).cloned().ok_or(TransportError::ConnectionRefused)?
        };
        let (mut local, remote) = Chan::pair();
        local.la = Multiaddr::from(Protocol::Memory(0));
        local.ra = addr.clone();
        let mut remote = remote;
        remote.la = addr;
        remote.ra = Multiaddr::from(Protocol::Memory(0));
        listener.send(remote).await.map_err(|_| TransportError::ConnectionRefused)?;
        Ok(local)
    }

    fn box_clone(&self) -> ITransport<Self::Output> {
        Box::new(self.clone())
    }

    fn protocols(&self) -> Vec<u32> {
        vec![up2p_multiaddr::protocol::MEMORY]
    }
}

fn parse_memory_addr(addr: &Multiaddr) -> Option<u64> {
    let mut iter = addr.iter();
    let port = match iter.next() {
        Some(Protocol::Memory(port)) => port,
        _ => return None,
    };
    if iter.next().is_some() {
        return None;
    }
    Some(port)
}

pub struct MemoryListener {
    port: u64,
    addr: Multiaddr,
    rx: mpsc::UnboundedReceiver<Chan>,
}

#[async_trait]
impl TransportListener for MemoryListener {
    type Output = Chan;

    async fn accept(&mut self) -> Result<Self::Output, TransportError> {
        self.rx.next().await.ok_or(TransportError::Closed)
    }

    fn multi_addr(&self) -> Multiaddr {
        self.addr.clone()
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        HUB.lock().remove(&self.port);
    }
}

/// One endpoint of an established in-memory connection.
pub struct Chan {
    reader: ChanReader,
    writer: ChanWriter,
    la: Multiaddr,
    ra: Multiaddr,
}

impl Chan {
    /// Creates a connected pair of endpoints.
    pub fn pair() -> (Chan, Chan) {
        let (a_tx, a_rx) = mpsc::unbounded();
        let (b_tx, b_rx) = mpsc::unbounded();
        let a = Chan {
            reader: ChanReader { incoming: a_rx, buffer: Vec::new(), offset: 0 },
            writer: ChanWriter { outgoing: b_tx },
            la: Multiaddr::empty(),
            ra: Multiaddr::empty(),
        };
        let b = Chan {
            reader: ChanReader { incoming: b_rx, buffer: Vec::new(), offset: 0 },
            writer: ChanWriter { outgoing: a_tx },
            la: Multiaddr::empty(),
            ra: Multiaddr::empty(),
        };
        (a, b)
    }
}

impl std::fmt::Debug for Chan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chan").field("la", &self.la).field("ra", &self.ra).finish()
    }
}

#[async_trait]
impl ReadEx for Chan {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read2(buf).await
    }
}

#[async_trait]
impl WriteEx for Chan {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write2(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        self.writer.flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.writer.close2().await
    }
}

impl SplitEx for Chan {
    type Reader = ChanReader;
    type Writer = ChanWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }
}

impl ConnectionInfo for Chan {
    fn local_multiaddr(&self) -> Multiaddr {
        self.la.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.ra.clone()
    }
}

pub struct ChanReader {
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    buffer: Vec<u8>,
    offset: usize,
}

#[async_trait]
impl ReadEx for ChanReader {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.offset < self.buffer.len() {
                let n = std::cmp::min(buf.len(), self.buffer.len() - self.offset);
                buf[..n].copy_from_slice(&self.buffer[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }
            match self.incoming.next().await {
                Some(bytes) => {
                    self.buffer = bytes;
                    self.offset = 0;
                }
                // Sender gone: end-of-stream.
                None => return Ok(0),
            }
        }
    }
}

pub struct ChanWriter {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl WriteEx for ChanWriter {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing
            .send(buf.to_vec())
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionReset))?;
        Ok(buf.len())
    }

    async fn flush2(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.outgoing.close_channel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;

    #[test]
    fn pair_transfers_bytes() {
        let (mut a, mut b) = Chan::pair();
        task::block_on(async move {
            a.write_all2(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            b.read_exact2(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
        });
    }

    #[test]
    fn close_is_eof() {
        let (mut a, mut b) = Chan::pair();
        task::block_on(async move {
            a.write_all2(b"bye").await.unwrap();
            a.close2().await.unwrap();
            let mut buf = [0u8; 3];
            b.read_exact2(&mut buf).await.unwrap();
            assert_eq!(b.read2(&mut buf).await.unwrap(), 0);
        });
    }

    #[test]
    fn listen_and_dial() {
        task::block_on(async move {
            let mut transport = MemoryTransport;
            let mut listener = transport.listen_on("/memory/0".parse().unwrap()).await.unwrap();
            let addr = listener.multi_addr();

            let dialer = task::spawn(async move {
                let mut transport = MemoryTransport;
                let mut chan = transport.dial(addr).await.unwrap();
                chan.write_all2(b"hello").await.unwrap();
            });

            let mut inbound = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            inbound.read_exact2(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
            dialer.await;
        });
    }

    #[test]
    fn dial_unbound_port_refused() {
        task::block_on(async move {
            let mut transport = MemoryTransport;
            match transport.dial("/memory/1".parse().unwrap()).await {
                Err(TransportError::ConnectionRefused) => {}
                _ => panic!("expected refusal"),
            }
        });
    }
}
