// Copyright (c) 2018-2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0 or MIT license, at your option.
//
// A copy of the Apache License, Version 2.0 is included in the software as
// LICENSE-APACHE and a copy of the MIT license is included in the software
// as LICENSE-MIT. You may also obtain a copy of the Apache License, Version 2.0
// at https://www.apache.org/licenses/LICENSE-2.0 and a copy of the MIT license
// at https://opensource.org/licenses/MIT.

//! The yamux frame header: 12 bytes, fields big-endian,
//! `version(1) | type(1) | flags(2) | stream-id(4) | length(4)`.

use std::fmt;
use thiserror::Error;

pub(crate) const HEADER_SIZE: usize = 12;

/// The protocol version this implementation speaks.
const VERSION: u8 = 0;

/// A tagged yamux frame header. The type parameter tracks the frame type
/// statically where it is known.
#[derive(Clone, PartialEq, Eq)]
pub struct Header<T> {
    tag: Tag,
    flags: Flags,
    stream_id: StreamId,
    length: u32,
    _marker: std::marker::PhantomData<T>,
}

impl<T> fmt::Debug for Header<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(Header {:?} {} {:?} len={})",
            self.tag, self.stream_id, self.flags, self.length
        )
    }
}

impl<T> Header<T> {
    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// The value of the length field: the body length for data frames,
    /// the credit delta for window updates, the opaque token for pings
    /// and the reason code for go-away.
    pub fn len(&self) -> u32 {
        self.length
    }

    pub(crate) fn set_len(&mut self, n: u32) {
        self.length = n
    }

    pub fn syn(&mut self) {
        self.flags.0 |= SYN.0
    }

    pub fn ack(&mut self) {
        self.flags.0 |= ACK.0
    }

    pub fn fin(&mut self) {
        self.flags.0 |= FIN.0
    }

    pub fn rst(&mut self) {
        self.flags.0 |= RST.0
    }

    /// Reinterprets the statically known frame type.
    pub(crate) fn cast<U>(self) -> Header<U> {
        Header {
            tag: self.tag,
            flags: self.flags,
            stream_id: self.stream_id,
            length: self.length,
            _marker: std::marker::PhantomData,
        }
    }
}

impl Header<Data> {
    pub fn data(id: StreamId, len: u32) -> Self {
        Header {
            tag: Tag::Data,
            flags: Flags(0),
            stream_id: id,
            length: len,
            _marker: std::marker::PhantomData,
        }
    }
}

impl Header<WindowUpdate> {
    pub fn window_update(id: StreamId, credit: u32) -> Self {
        Header {
            tag: Tag::WindowUpdate,
            flags: Flags(0),
            stream_id: id,
            length: credit,
            _marker: std::marker::PhantomData,
        }
    }
}

impl Header<Ping> {
    pub fn ping(nonce: u32) -> Self {
        Header {
            tag: Tag::Ping,
            flags: Flags(0),
            stream_id: StreamId::SESSION,
            length: nonce,
            _marker: std::marker::PhantomData,
        }
    }
}

impl Header<GoAway> {
    pub fn go_away(code: GoAwayCode) -> Self {
        Header {
            tag: Tag::GoAway,
            flags: Flags(0),
            stream_id: StreamId::SESSION,
            length: code as u32,
            _marker: std::marker::PhantomData,
        }
    }
}

/// Frame type markers.
#[derive(Clone, Debug)]
pub enum Data {}
#[derive(Clone, Debug)]
pub enum WindowUpdate {}
#[derive(Clone, Debug)]
pub enum Ping {}
#[derive(Clone, Debug)]
pub enum GoAway {}

/// The type field of a frame header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Tag {
    Data = 0,
    WindowUpdate = 1,
    Ping = 2,
    GoAway = 3,
}

/// Reason codes of a go-away frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GoAwayCode {
    Normal = 0,
    ProtocolError = 1,
    InternalError = 2,
}

/// The flags field of a frame header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Flags(pub(crate) u16);

impl Flags {
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn val(self) -> u16 {
        self.0
    }
}

pub const SYN: Flags = Flags(1);
pub const ACK: Flags = Flags(2);
pub const FIN: Flags = Flags(4);
pub const RST: Flags = Flags(8);

/// The identifier of a logical stream within a session.
///
/// The session itself uses id 0; the client side of the underlying
/// connection allocates odd ids, the server side even ones.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u32);

impl StreamId {
    pub(crate) const SESSION: StreamId = StreamId(0);

    pub(crate) fn new(val: u32) -> Self {
        StreamId(val)
    }

    pub fn is_session(self) -> bool {
        self.0 == 0
    }

    pub fn is_client(self) -> bool {
        self.0 % 2 == 1
    }

    pub fn is_server(self) -> bool {
        !self.is_session() && self.0 % 2 == 0
    }

    pub fn val(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encodes a header to its 12-byte wire representation.
pub(crate) fn encode<T>(hdr: &Header<T>) -> [u8; HEADER_SIZE] {
    let mut buf = [0; HEADER_SIZE];
    buf[0] = VERSION;
    buf[1] = hdr.tag as u8;
    buf[2..4].copy_from_slice(&hdr.flags.0.to_be_bytes());
    buf[4..8].copy_from_slice(&hdr.stream_id.0.to_be_bytes());
    buf[8..12].copy_from_slice(&hdr.length.to_be_bytes());
    buf
}

/// Decodes a header from its 12-byte wire representation.
pub(crate) fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Header<()>, HeaderDecodeError> {
    if buf[0] != VERSION {
        return Err(HeaderDecodeError::Version(buf[0]));
    }
    let tag = match buf[1] {
        0 => Tag::Data,
        1 => Tag::WindowUpdate,
        2 => Tag::Ping,
        3 => Tag::GoAway,
        t => return Err(HeaderDecodeError::Type(t)),
    };
    let flags = Flags(u16::from_be_bytes([buf[2], buf[3]]));
    let stream_id = StreamId(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]));
    let length = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
    Ok(Header {
        tag,
        flags,
        stream_id,
        length,
        _marker: std::marker::PhantomData,
    })
}

/// Possible errors while decoding a frame header.
#[derive(Error, Debug)]
pub enum HeaderDecodeError {
    #[error("unknown version {0}")]
    Version(u8),
    #[error("unknown frame type {0}")]
    Type(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encode_decode_identity() {
        let mut hdr = Header::data(StreamId::new(7), 12345);
        hdr.syn();
        hdr.fin();
        let bytes = encode(&hdr);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.tag(), Tag::Data);
        assert_eq!(decoded.stream_id(), StreamId::new(7));
        assert_eq!(decoded.len(), 12345);
        assert!(decoded.flags().contains(SYN));
        assert!(decoded.flags().contains(FIN));
        assert!(!decoded.flags().contains(RST));
    }

    #[test]
    fn decode_rejects_bad_version() {
        let hdr = Header::ping(1);
        let mut bytes = encode(&hdr);
        bytes[0] = 9;
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let hdr = Header::ping(1);
        let mut bytes = encode(&hdr);
        bytes[1] = 42;
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn stream_id_parity() {
        assert!(StreamId::new(1).is_client());
        assert!(StreamId::new(2).is_server());
        assert!(StreamId::new(0).is_session());
        assert!(!StreamId::new(0).is_server());
    }
}
