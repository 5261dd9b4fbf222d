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

//! Upgraders turn a plain byte-stream into something richer: a secured
//! channel, a muxed session. Which upgrade runs on a fresh stream is agreed
//! with multistream-select, driven by [`multistream::Multistream`].

mod dummy;
pub mod multistream;

pub use dummy::DummyUpgrader;

use crate::transport::TransportError;
use async_trait::async_trait;
use std::borrow::Cow;

/// The name of an upgrade protocol as negotiated on the wire.
pub trait ProtocolName {
    /// The bytes of the protocol name, e.g. `/noise` or `/yamux/1.0.0`.
    ///
    /// Transmitted on the wire; must be unambiguous for this protocol.
    fn protocol_name(&self) -> &[u8];

    /// The name rendered for logs.
    fn protocol_name_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.protocol_name())
    }
}

impl<T: AsRef<[u8]>> ProtocolName for T {
    fn protocol_name(&self) -> &[u8] {
        self.as_ref()
    }
}

/// Types which announce the protocol(s) they speak.
pub trait UpgradeInfo: Send {
    type Info: ProtocolName + Clone + Send + Sync + 'static;

    /// The list of supported protocols, ordered by decreasing preference.
    fn protocol_info(&self) -> Vec<Self::Info>;
}

/// An upgrade applied to a freshly established stream `C`.
#[async_trait]
pub trait Upgrader<C>: UpgradeInfo + Clone {
    type Output: Send;

    /// Upgrades the stream on the accepting side.
    async fn upgrade_inbound(self, socket: C, info: Self::Info) -> Result<Self::Output, TransportError>;

    /// Upgrades the stream on the dialing side.
    async fn upgrade_outbound(self, socket: C, info: Self::Info) -> Result<Self::Output, TransportError>;
}
