use std::io;
use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Error types of the multiaddr crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("multiaddr data is shorter than the encoded length")]
    DataLessThanLen,
    #[error("invalid multiaddr")]
    InvalidMultiaddr,
    #[error("invalid protocol string")]
    InvalidProtocolString,
    #[error("unknown protocol id {0}")]
    UnknownProtocolId(u32),
    #[error("unknown protocol string {0}")]
    UnknownProtocolString(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("varint decoding error: {0}")]
    InvalidUvar(#[from] unsigned_varint::decode::Error),
}
