// Copyright (c) 2018-2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0 or MIT license, at your option.
//
// A copy of the Apache License, Version 2.0 is included in the software as
// LICENSE-APACHE and a copy of the MIT license is included in the software
// as LICENSE-MIT. You may also obtain a copy of the Apache License, Version 2.0
// at https://www.apache.org/licenses/LICENSE-2.0 and a copy of the MIT license
// at https://opensource.org/licenses/MIT.

pub mod header;
pub(crate) mod io;

pub use self::io::FrameDecodeError;

use bytes::Bytes;
use header::{Data, GoAway, GoAwayCode, Header, Ping, StreamId, WindowUpdate};

/// A yamux frame: a header plus, for data frames, a body.
#[derive(Clone, Debug)]
pub struct Frame<T> {
    header: Header<T>,
    body: Bytes,
}

impl<T> Frame<T> {
    pub fn new(header: Header<T>) -> Self {
        Frame { header, body: Bytes::new() }
    }

    pub fn header(&self) -> &Header<T> {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header<T> {
        &mut self.header
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Reinterprets the statically known frame type.
    pub(crate) fn cast<U>(self) -> Frame<U> {
        Frame {
            header: self.header.cast(),
            body: self.body,
        }
    }
}

impl Frame<Data> {
    pub fn data(id: StreamId, body: Bytes) -> Self {
        Frame {
            header: Header::data(id, body.len() as u32),
            body,
        }
    }

    /// A zero-length data frame carrying the FIN flag: a half-close.
    pub fn close_stream(id: StreamId, ack: bool) -> Self {
        let mut header = Header::data(id, 0);
        header.fin();
        if ack {
            header.ack()
        }
        Frame { header, body: Bytes::new() }
    }

    /// A zero-length data frame carrying the RST flag: an abortive close.
    pub fn reset_stream(id: StreamId) -> Self {
        let mut header = Header::data(id, 0);
        header.rst();
        Frame { header, body: Bytes::new() }
    }
}

impl Frame<WindowUpdate> {
    pub fn window_update(id: StreamId, credit: u32) -> Self {
        Frame::new(Header::window_update(id, credit))
    }
}

impl Frame<Ping> {
    pub fn ping(nonce: u32) -> Self {
        Frame::new(Header::ping(nonce))
    }
}

impl Frame<GoAway> {
    pub fn go_away(code: GoAwayCode) -> Self {
        Frame::new(Header::go_away(code))
    }
}
