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

//! Noise protocol I/O after the handshake.
//!
//! Each direction of a secured connection has its own key material inside
//! the shared (stateless) transport state and its own nonce counter, so the
//! two halves can live on independent reader/writer tasks. On the wire,
//! every record is a ciphertext (plaintext + 16-byte tag) behind a 2-byte
//! big-endian length prefix.

use crate::error::NoiseError;
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use log::trace;
use snow::StatelessTransportState;
use std::cmp::min;
use std::io;
use std::sync::Arc;
use up2p_core::identity::Keypair;
use up2p_core::secure_io::SecureInfo;
use up2p_core::transport::ConnectionInfo;
use up2p_core::{Multiaddr, PeerId, PublicKey};
use up2p_traits::{ReadEx, SplitEx, WriteEx};

/// Max. size of an on-the-wire record.
pub const MAX_FRAME_LEN: usize = 65535;

/// Poly1305 authentication tag size.
pub const TAG_LEN: usize = 16;

/// Max. plaintext carried by a single record.
pub const MAX_PLAINTEXT_LEN: usize = MAX_FRAME_LEN - TAG_LEN;

/// A secured session to a remote, generic over the socket it upgraded.
pub struct NoiseOutput<T: SplitEx> {
    read: NoiseReadHalf<T::Reader>,
    write: NoiseWriteHalf<T::Writer>,
    la: Multiaddr,
    ra: Multiaddr,
    local_priv_key: Keypair,
    remote_pub_key: PublicKey,
}

impl<T: SplitEx> NoiseOutput<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        reader: T::Reader,
        writer: T::Writer,
        cipher: Arc<StatelessTransportState>,
        la: Multiaddr,
        ra: Multiaddr,
        local_priv_key: Keypair,
        remote_pub_key: PublicKey,
    ) -> Self {
        NoiseOutput {
            read: NoiseReadHalf {
                io: reader,
                cipher: cipher.clone(),
                nonce: 0,
                recv_buffer: Bytes::new(),
            },
            write: NoiseWriteHalf { io: writer, cipher, nonce: 0 },
            la,
            ra,
            local_priv_key,
            remote_pub_key,
        }
    }
}

impl<T: SplitEx> SecureInfo for NoiseOutput<T> {
    fn local_peer(&self) -> PeerId {
        self.local_priv_key.public().into_peer_id()
    }

    fn remote_peer(&self) -> PeerId {
        self.remote_pub_key.clone().into_peer_id()
    }

    fn local_priv_key(&self) -> Keypair {
        self.local_priv_key.clone()
    }

    fn remote_pub_key(&self) -> PublicKey {
        self.remote_pub_key.clone()
    }
}

impl<T: SplitEx> ConnectionInfo for NoiseOutput<T> {
    fn local_multiaddr(&self) -> Multiaddr {
        self.la.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.ra.clone()
    }
}

#[async_trait]
impl<T: SplitEx + Send> ReadEx for NoiseOutput<T> {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read.read2(buf).await
    }
}

#[async_trait]
impl<T: SplitEx + Send> WriteEx for NoiseOutput<T> {
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

impl<T: SplitEx> SplitEx for NoiseOutput<T> {
    type Reader = NoiseReadHalf<T::Reader>;
    type Writer = NoiseWriteHalf<T::Writer>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (self.read, self.write)
    }
}

/// The receive half: decrypts one record per frame and serves the
/// plaintext out of an internal buffer.
pub struct NoiseReadHalf<R> {
    io: R,
    cipher: Arc<StatelessTransportState>,
    nonce: u64,
    recv_buffer: Bytes,
}

#[async_trait]
impl<R: ReadEx + Unpin + Send + 'static> ReadEx for NoiseReadHalf<R> {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if !self.recv_buffer.is_empty() {
                let n = min(self.recv_buffer.len(), buf.len());
                buf[..n].copy_from_slice(&self.recv_buffer[..n]);
                trace!("read: copied {}/{} bytes", n, self.recv_buffer.len());
                self.recv_buffer.advance(n);
                return Ok(n);
            }

            // Next frame. A clean EOF on the frame boundary ends the stream.
            let mut len_buf = [0u8; 2];
            let n = self.io.read2(&mut len_buf[..1]).await?;
            if n == 0 {
                return Ok(0);
            }
            self.io.read_exact2(&mut len_buf[1..]).await?;
            let frame_len = u16::from_be_bytes(len_buf) as usize;
            if frame_len == 0 {
                // Zero-length records are keepalive no-ops.
                continue;
            }

            let mut frame = vec![0u8; frame_len];
            self.io.read_exact2(&mut frame).await?;

            if self.nonce == u64::max_value() {
                return Err(NoiseError::NonceOverflow.into());
            }
            let mut plain = vec![0u8; frame_len];
            let n = self
                .cipher
                .read_message(self.nonce, &frame, &mut plain)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "authentication tag mismatch"))?;
            self.nonce += 1;
            plain.truncate(n);
            self.recv_buffer = Bytes::from(plain);
        }
    }
}

/// The send half: encrypts at most [`MAX_PLAINTEXT_LEN`] bytes per record.
pub struct NoiseWriteHalf<W> {
    io: W,
    cipher: Arc<StatelessTransportState>,
    nonce: u64,
}

#[async_trait]
impl<W: WriteEx + Unpin + Send + 'static> WriteEx for NoiseWriteHalf<W> {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = min(buf.len(), MAX_PLAINTEXT_LEN);
        if self.nonce == u64::max_value() {
            return Err(NoiseError::NonceOverflow.into());
        }
        let mut record = vec![0u8; 2 + n + TAG_LEN];
        let len = self
            .cipher
            .write_message(self.nonce, &buf[..n], &mut record[2..])
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        self.nonce += 1;
        record[..2].copy_from_slice(&(len as u16).to_be_bytes());
        record.truncate(2 + len);
        self.io.write_all2(&record).await?;
        trace!("write: sent a record of {} bytes", len);
        Ok(n)
    }

    async fn flush2(&mut self) -> io::Result<()> {
        self.io.flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.io.close2().await
    }
}
