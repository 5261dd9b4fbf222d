use crate::frame::io::FrameDecodeError;
use std::io;
use thiserror::Error;

/// The various error cases a yamux session may encounter.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("frame decode error: {0}")]
    Decode(#[from] FrameDecodeError),

    #[error("the stream id space is exhausted")]
    NoMoreStreamIds,

    #[error("session is closed")]
    Closed,

    #[error("too many concurrent streams")]
    TooManyStreams,

    #[error("keepalive ping went unanswered")]
    Timeout,

    #[error("remote violated the protocol: {0}")]
    ProtocolViolation(&'static str),
}
