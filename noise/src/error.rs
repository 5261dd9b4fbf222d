use std::io;
use thiserror::Error;

/// Errors of the Noise security layer.
#[derive(Error, Debug)]
pub enum NoiseError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("noise protocol error: {0}")]
    Noise(#[from] snow::Error),

    #[error("malformed handshake payload: {0}")]
    InvalidPayload(#[from] prost::DecodeError),

    #[error("the identity signature in the handshake payload is invalid")]
    BadSignature,

    #[error("invalid or missing public key material")]
    InvalidKey,

    #[error("signing the handshake payload failed")]
    SigningFailed,

    #[error("the nonce counter would wrap; connection must be closed")]
    NonceOverflow,
}

impl From<NoiseError> for io::Error {
    fn from(e: NoiseError) -> io::Error {
        match e {
            NoiseError::Io(e) => e,
            NoiseError::Noise(_) => io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
            e => io::Error::new(io::ErrorKind::Other, e.to_string()),
        }
    }
}
