use super::header::{self, Tag, HEADER_SIZE};
use super::Frame;
use bytes::Bytes;
use std::io;
use thiserror::Error;
use up2p_traits::{ReadEx, WriteEx};

/// Reads whole frames off the wire.
pub(crate) struct FrameReader<R> {
    io: R,
    max_body_len: usize,
}

impl<R: ReadEx> FrameReader<R> {
    pub(crate) fn new(io: R, max_body_len: usize) -> Self {
        FrameReader { io, max_body_len }
    }

    /// Reads the next frame. Data frame bodies are read in full.
    pub(crate) async fn recv_frame(&mut self) -> Result<Frame<()>, FrameDecodeError> {
        let mut header_buf = [0u8; HEADER_SIZE];
        self.io.read_exact2(&mut header_buf).await?;
        let header = header::decode(&header_buf)?;

        if header.tag() == Tag::Data {
            let len = header.len() as usize;
            if len > self.max_body_len {
                return Err(FrameDecodeError::FrameTooLarge(len));
            }
            let mut body = vec![0u8; len];
            self.io.read_exact2(&mut body).await?;
            let mut frame = Frame::new(header);
            frame.body = Bytes::from(body);
            return Ok(frame);
        }

        Ok(Frame::new(header))
    }
}

/// Writes whole frames to the wire.
pub(crate) struct FrameWriter<W> {
    io: W,
}

impl<W: WriteEx> FrameWriter<W> {
    pub(crate) fn new(io: W) -> Self {
        FrameWriter { io }
    }

    pub(crate) async fn send_frame<T>(&mut self, frame: &Frame<T>) -> io::Result<()> {
        let header = header::encode(frame.header());
        self.io.write_all2(&header).await?;
        if !frame.body().is_empty() {
            self.io.write_all2(frame.body()).await?;
        }
        self.io.flush2().await
    }

    pub(crate) async fn close(&mut self) -> io::Result<()> {
        self.io.close2().await
    }
}

/// Possible errors while decoding a frame.
#[derive(Error, Debug)]
pub enum FrameDecodeError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid frame header: {0}")]
    Header(#[from] header::HeaderDecodeError),
    #[error("frame body of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
}
