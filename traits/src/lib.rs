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

//! The async I/O vocabulary of the up2p stack.
//!
//! Every byte-stream in the stack, raw UDX streams, secured Noise channels
//! and multiplexed Yamux substreams alike, speaks [`ReadEx`] and [`WriteEx`]
//! rather than the poll-based `AsyncRead`/`AsyncWrite` traits. Blanket
//! implementations bridge any `AsyncRead`/`AsyncWrite` type into this
//! vocabulary, so e.g. TCP sockets and in-memory pipes fit in without glue.
//!
//! [`SplitEx`] separates a full-duplex stream into independently owned read
//! and write halves, which is how the muxer runs its single reader task and
//! single writer task over one secure channel.

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::io;

/// Read methods on an async byte-stream.
#[async_trait]
pub trait ReadEx: Send {
    /// Reads some bytes into `buf`, returning how many were read.
    ///
    /// A return value of `Ok(0)` signals end-of-stream.
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads exactly `buf.len()` bytes.
    async fn read_exact2<'a>(&'a mut self, buf: &'a mut [u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = self.read2(&mut buf[offset..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            offset += n;
        }
        Ok(())
    }

    /// Reads a single unsigned varint.
    async fn read_varint(&mut self) -> io::Result<usize> {
        let mut buf = unsigned_varint::encode::usize_buffer();
        for i in 0..buf.len() {
            self.read_exact2(&mut buf[i..=i]).await?;
            match unsigned_varint::decode::usize(&buf[..=i]) {
                Ok((value, _)) => return Ok(value),
                Err(unsigned_varint::decode::Error::Insufficient) => continue,
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            }
        }
        Err(io::Error::new(io::ErrorKind::InvalidData, "varint too long"))
    }

    /// Reads one varint length-prefixed message of at most `max_size` bytes.
    async fn read_one(&mut self, max_size: usize) -> io::Result<Vec<u8>> {
        let len = self.read_varint().await?;
        if len > max_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message of {} bytes exceeds limit of {} bytes", len, max_size),
            ));
        }
        let mut buf = vec![0; len];
        self.read_exact2(&mut buf).await?;
        Ok(buf)
    }
}

/// Write methods on an async byte-stream.
#[async_trait]
pub trait WriteEx: Send {
    /// Writes some bytes from `buf`, returning how many were written.
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Writes the whole of `buf`.
    async fn write_all2(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = self.write2(&buf[offset..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            offset += n;
        }
        Ok(())
    }

    /// Writes a single unsigned varint.
    async fn write_varint(&mut self, value: usize) -> io::Result<()> {
        let mut buf = unsigned_varint::encode::usize_buffer();
        let encoded = unsigned_varint::encode::usize(value, &mut buf);
        self.write_all2(encoded).await
    }

    /// Writes `buf` as one varint length-prefixed message.
    async fn write_one(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_varint(buf.len()).await?;
        self.write_all2(buf).await
    }

    /// Flushes buffered data to the underlying transport.
    async fn flush2(&mut self) -> io::Result<()>;

    /// Closes the write side of the stream.
    async fn close2(&mut self) -> io::Result<()>;
}

#[async_trait]
impl<T: AsyncRead + Unpin + Send> ReadEx for T {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }
}

#[async_trait]
impl<T: AsyncWrite + Unpin + Send> WriteEx for T {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        AsyncWriteExt::write(self, buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        AsyncWriteExt::flush(self).await
    }

    async fn close2(&mut self) -> io::Result<()> {
        AsyncWriteExt::close(self).await
    }
}

/// Splits a full-duplex stream into independently owned halves.
pub trait SplitEx {
    type Reader: ReadEx + Unpin + Send + 'static;
    type Writer: WriteEx + Unpin + Send + 'static;

    fn split(self) -> (Self::Reader, Self::Writer);
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> SplitEx for T {
    type Reader = futures::io::ReadHalf<T>;
    type Writer = futures::io::WriteHalf<T>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        AsyncReadExt::split(self)
    }
}

/// A full-duplex, splittable byte-stream. The bound every layer of the
/// upgrade pipeline places on the stream it is handed.
pub trait SplittableReadWrite: ReadEx + WriteEx + SplitEx + Unpin + Send + 'static {}

impl<T: ReadEx + WriteEx + SplitEx + Unpin + Send + 'static> SplittableReadWrite for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    #[test]
    fn varint_round_trip() {
        futures::executor::block_on(async {
            for value in &[0usize, 1, 127, 128, 300, 16384, 1 << 20] {
                let mut buf = Vec::new();
                buf.write_varint(*value).await.unwrap();
                let mut cursor = Cursor::new(buf);
                assert_eq!(cursor.read_varint().await.unwrap(), *value);
            }
        });
    }

    #[test]
    fn one_message_round_trip() {
        futures::executor::block_on(async {
            let mut buf = Vec::new();
            buf.write_one(b"hello up2p").await.unwrap();
            let mut cursor = Cursor::new(buf);
            let msg = cursor.read_one(1024).await.unwrap();
            assert_eq!(msg, b"hello up2p");
        });
    }

    #[test]
    fn one_message_too_large() {
        futures::executor::block_on(async {
            let mut buf = Vec::new();
            buf.write_one(&[0u8; 64]).await.unwrap();
            let mut cursor = Cursor::new(buf);
            assert!(cursor.read_one(16).await.is_err());
        });
    }
}
