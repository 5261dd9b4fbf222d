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

//! The `/multistream/1.0.0` line protocol.
//!
//! Every line on the wire is a length-prefixed UTF-8 string terminated by
//! `\n`; the length is an unsigned varint counting the bytes including the
//! `\n`. The dialer proposes protocols one at a time, the listener echoes
//! the first one it supports or answers `na`.

use crate::upgrade::ProtocolName;
use std::io;
use thiserror::Error;
use up2p_traits::{ReadEx, WriteEx};

const MSG_MULTISTREAM: &[u8] = b"/multistream/1.0.0";
const MSG_NA: &[u8] = b"na";
const MSG_LS: &[u8] = b"ls";

/// An arbitrary limit on the length of a single negotiation line.
const MAX_LINE_LENGTH: usize = 1024;

/// Errors of the multistream-select negotiation.
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("i/o error during negotiation: {0}")]
    Io(#[from] io::Error),

    #[error("none of the proposed protocols was accepted")]
    Failed,

    #[error("invalid negotiation message received")]
    InvalidMessage,
}

/// Drives a multistream-select negotiation over a fresh stream.
#[derive(Debug, Clone)]
pub struct Negotiator<TProto> {
    protocols: Vec<TProto>,
}

impl<TProto: ProtocolName + Clone> Negotiator<TProto> {
    pub fn new_with_protocols(protocols: Vec<TProto>) -> Self {
        Negotiator { protocols }
    }

    /// Dialer side: proposes the protocols in order and settles on the
    /// first one the listener echoes.
    pub async fn select_one<TSocket>(&self, mut socket: TSocket) -> Result<(TProto, TSocket), NegotiationError>
    where
        TSocket: ReadEx + WriteEx + Send,
    {
        exchange_headers(&mut socket).await?;

        for proto in &self.protocols {
            send_line(&mut socket, proto.protocol_name()).await?;
            let response = recv_line(&mut socket).await?;
            if response == proto.protocol_name() {
                log::debug!("selected protocol {}", proto.protocol_name_str());
                return Ok((proto.clone(), socket));
            } else if response == MSG_NA {
                log::trace!("protocol {} refused by remote", proto.protocol_name_str());
            } else {
                return Err(NegotiationError::InvalidMessage);
            }
        }
        Err(NegotiationError::Failed)
    }

    /// Listener side: answers proposals until one matches a supported
    /// protocol, answering `na` otherwise and listing on `ls`.
    pub async fn negotiate<TSocket>(&self, mut socket: TSocket) -> Result<(TProto, TSocket), NegotiationError>
    where
        TSocket: ReadEx + WriteEx + Send,
    {
        exchange_headers(&mut socket).await?;

        loop {
            let line = recv_line(&mut socket).await?;
            if line == MSG_LS {
                let mut listing = Vec::new();
                for proto in &self.protocols {
                    listing.extend_from_slice(proto.protocol_name());
                    listing.push(b'\n');
                }
                send_line(&mut socket, &listing[..listing.len().saturating_sub(1)]).await?;
                continue;
            }
            if let Some(proto) = self.protocols.iter().find(|p| p.protocol_name() == &line[..]) {
                send_line(&mut socket, proto.protocol_name()).await?;
                log::debug!("negotiated protocol {}", proto.protocol_name_str());
                return Ok((proto.clone(), socket));
            }
            send_line(&mut socket, MSG_NA).await?;
        }
    }
}

/// Both parties start by announcing the multistream protocol itself.
async fn exchange_headers<TSocket>(socket: &mut TSocket) -> Result<(), NegotiationError>
where
    TSocket: ReadEx + WriteEx + Send,
{
    send_line(socket, MSG_MULTISTREAM).await?;
    let header = recv_line(socket).await?;
    if header != MSG_MULTISTREAM {
        return Err(NegotiationError::InvalidMessage);
    }
    Ok(())
}

async fn send_line<TSocket: WriteEx + Send>(socket: &mut TSocket, line: &[u8]) -> Result<(), NegotiationError> {
    let mut msg = Vec::with_capacity(line.len() + 1);
    msg.extend_from_slice(line);
    msg.push(b'\n');
    socket.write_one(&msg).await?;
    socket.flush2().await?;
    Ok(())
}

async fn recv_line<TSocket: ReadEx + Send>(socket: &mut TSocket) -> Result<Vec<u8>, NegotiationError> {
    let mut msg = socket.read_one(MAX_LINE_LENGTH).await?;
    if msg.pop() != Some(b'\n') {
        return Err(NegotiationError::InvalidMessage);
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::Chan;
    use async_std::task;

    #[test]
    fn select_supported_protocol() {
        let (a, b) = Chan::pair();

        let server = task::spawn(async move {
            let neg = Negotiator::new_with_protocols(vec![b"/echo/1.0.0".as_ref(), b"/chat/1.0.0".as_ref()]);
            let (proto, _socket) = neg.negotiate(b).await.unwrap();
            proto.to_vec()
        });

        task::block_on(async move {
            let neg = Negotiator::new_with_protocols(vec![b"/chat/1.0.0".as_ref()]);
            let (proto, _socket) = neg.select_one(a).await.unwrap();
            assert_eq!(proto, b"/chat/1.0.0");
            assert_eq!(server.await, b"/chat/1.0.0".to_vec());
        });
    }

    #[test]
    fn refuse_then_accept() {
        let (a, b) = Chan::pair();

        let server = task::spawn(async move {
            let neg = Negotiator::new_with_protocols(vec![b"/second/1.0.0".as_ref()]);
            neg.negotiate(b).await.unwrap();
        });

        task::block_on(async move {
            let neg = Negotiator::new_with_protocols(vec![b"/first/1.0.0".as_ref(), b"/second/1.0.0".as_ref()]);
            let (proto, _socket) = neg.select_one(a).await.unwrap();
            assert_eq!(proto, b"/second/1.0.0");
            server.await;
        });
    }

    #[test]
    fn all_refused_fails() {
        let (a, b) = Chan::pair();

        // Listener supporting nothing the dialer wants; it will keep
        // answering na until the dialer gives up and drops the stream.
        task::spawn(async move {
            let neg = Negotiator::new_with_protocols(vec![b"/other/1.0.0".as_ref()]);
            let _ = neg.negotiate(b).await;
        });

        task::block_on(async move {
            let neg = Negotiator::new_with_protocols(vec![b"/first/1.0.0".as_ref()]);
            match neg.select_one(a).await {
                Err(NegotiationError::Failed) => {}
                other => panic!("unexpected outcome: {:?}", other.map(|(p, _)| p.to_vec())),
            }
        });
    }
}
