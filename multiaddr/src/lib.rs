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

//! Implementation of the multiaddr format, restricted to the protocols the
//! up2p stack consumes: `ip4`, `ip6`, `udp`, `udx` and `p2p`.

mod errors;
pub mod protocol;

pub use self::errors::{Error, Result};
pub use self::protocol::Protocol;
pub use multihash::Multihash;

use std::{
    convert::TryFrom,
    fmt, iter,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

/// Representation of a multiaddr.
///
/// A multiaddr is stored in its binary encoding; equality and hashing are
/// structural, i.e. over the encoded bytes.
#[derive(PartialEq, Eq, Clone, Hash, Default)]
pub struct Multiaddr {
    bytes: Vec<u8>,
}

impl Multiaddr {
    /// Create a new, empty multiaddress.
    pub fn empty() -> Self {
        Self { bytes: Vec::new() }
    }

    /// The length in bytes of this multiaddress.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether this multiaddress contains no components.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Return a copy of this multiaddr's byte representation.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Adds an already-parsed address component to the end of this multiaddr.
    pub fn push(&mut self, p: Protocol) {
        p.write_bytes(&mut self.bytes).expect("writing to a Vec never fails")
    }

    /// Pops the last `Protocol` of this multiaddr, or `None` if the multiaddr
    /// is empty.
    pub fn pop(&mut self) -> Option<Protocol> {
        let mut slices = Vec::new();
        let mut rest: &[u8] = &self.bytes;
        while !rest.is_empty() {
            let before = rest;
            let (p, r) = Protocol::from_bytes(rest).expect("own bytes are valid");
            slices.push((p, before.len() - r.len()));
            rest = r;
        }
        let (last, consumed) = slices.pop()?;
        let new_len = self.bytes.len() - consumed;
        self.bytes.truncate(new_len);
        Some(last)
    }

    /// Like [`Multiaddr::push`] but consumes `self`.
    pub fn with(mut self, p: Protocol) -> Self {
        self.push(p);
        self
    }

    /// Returns the components of this multiaddress.
    pub fn iter(&self) -> Iter<'_> {
        Iter(&self.bytes)
    }

    /// Returns the trailing `/p2p/...` component, if any.
    pub fn peer_id_part(&self) -> Option<Multihash> {
        match self.iter().last() {
            Some(Protocol::P2p(mh)) => Some(mh),
            _ => None,
        }
    }

    /// Returns this address with any trailing `/p2p/...` component removed.
    pub fn without_peer_id(&self) -> Multiaddr {
        let mut addr = self.clone();
        if let Some(Protocol::P2p(_)) = addr.iter().last() {
            addr.pop();
        }
        addr
    }
}

/// Iterator over `Multiaddr` components.
pub struct Iter<'a>(&'a [u8]);

impl<'a> Iterator for Iter<'a> {
    type Item = Protocol;

    fn next(&mut self) -> Option<Self::Item> {
        if self.0.is_empty() {
            return None;
        }
        let (p, rest) = Protocol::from_bytes(self.0).expect("own bytes are valid");
        self.0 = rest;
        Some(p)
    }
}

impl<'a> IntoIterator for &'a Multiaddr {
    type Item = Protocol;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl iter::FromIterator<Protocol> for Multiaddr {
    fn from_iter<T: IntoIterator<Item = Protocol>>(iter: T) -> Self {
        let mut addr = Multiaddr::empty();
        for p in iter {
            addr.push(p);
        }
        addr
    }
}

impl fmt::Debug for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_string().fmt(f)
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in self.iter() {
            p.fmt(f)?;
        }
        Ok(())
    }
}

impl FromStr for Multiaddr {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let mut addr = Multiaddr::empty();
        let mut parts = input.split('/').peekable();
        if Some("") != parts.next() {
            // A multiaddr must start with `/`.
            return Err(Error::InvalidMultiaddr);
        }
        while parts.peek().is_some() {
            addr.push(Protocol::from_str_parts(&mut parts)?);
        }
        Ok(addr)
    }
}

impl TryFrom<Vec<u8>> for Multiaddr {
    type Error = Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        // Validate the whole byte sequence before accepting it.
        let mut rest: &[u8] = &bytes;
        while !rest.is_empty() {
            let (_, r) = Protocol::from_bytes(rest)?;
            rest = r;
        }
        Ok(Multiaddr { bytes })
    }
}

impl From<IpAddr> for Multiaddr {
    fn from(v: IpAddr) -> Multiaddr {
        match v {
            IpAddr::V4(a) => a.into(),
            IpAddr::V6(a) => a.into(),
        }
    }
}

impl From<Ipv4Addr> for Multiaddr {
    fn from(v: Ipv4Addr) -> Multiaddr {
        Multiaddr::empty().with(Protocol::Ip4(v))
    }
}

impl From<Ipv6Addr> for Multiaddr {
    fn from(v: Ipv6Addr) -> Multiaddr {
        Multiaddr::empty().with(Protocol::Ip6(v))
    }
}

impl From<Protocol> for Multiaddr {
    fn from(p: Protocol) -> Multiaddr {
        Multiaddr::empty().with(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(s: &str) {
        let addr: Multiaddr = s.parse().expect("parses");
        assert_eq!(addr.to_string(), s);
        let bytes = addr.to_vec();
        let decoded = Multiaddr::try_from(bytes).expect("decodes");
        assert_eq!(decoded, addr);
    }

    #[test]
    fn parse_serialize_identity() {
        round_trip("/ip4/127.0.0.1/udp/4001/udx");
        round_trip("/ip6/::1/udp/0/udx");
        round_trip("/ip4/10.0.0.2/udp/9000");
    }

    #[test]
    fn parse_with_peer_id() {
        let addr: Multiaddr = "/ip4/127.0.0.1/udp/4001/udx/p2p/QmcgpsyWgH8Y8ajJz1Cu72KnS5uo2Aa2LpzU7kinSupNKC"
            .parse()
            .expect("parses");
        assert!(addr.peer_id_part().is_some());
        let stripped = addr.without_peer_id();
        assert_eq!(stripped.to_string(), "/ip4/127.0.0.1/udp/4001/udx");
        assert!(stripped.peer_id_part().is_none());
    }

    #[test]
    fn invalid_addresses_rejected() {
        assert!("ip4/127.0.0.1".parse::<Multiaddr>().is_err());
        assert!("/ip4/300.0.0.1".parse::<Multiaddr>().is_err());
        assert!("/tcp/8080".parse::<Multiaddr>().is_err());
        assert!("/udp/notaport".parse::<Multiaddr>().is_err());
    }

    quickcheck::quickcheck! {
        fn udx_addr_round_trips(a: u8, b: u8, c: u8, d: u8, port: u16) -> bool {
            let addr = Multiaddr::from(std::net::Ipv4Addr::new(a, b, c, d))
                .with(Protocol::Udp(port))
                .with(Protocol::Udx);
            let reparsed: Multiaddr = addr.to_string().parse().unwrap();
            let redecoded = Multiaddr::try_from(addr.to_vec()).unwrap();
            reparsed == addr && redecoded == addr
        }
    }

    #[test]
    fn push_pop() {
        let mut addr: Multiaddr = "/ip4/127.0.0.1/udp/4001".parse().unwrap();
        addr.push(Protocol::Udx);
        assert_eq!(addr.to_string(), "/ip4/127.0.0.1/udp/4001/udx");
        assert_eq!(addr.pop(), Some(Protocol::Udx));
        assert_eq!(addr.pop(), Some(Protocol::Udp(4001)));
        assert_eq!(addr.pop(), Some(Protocol::Ip4("127.0.0.1".parse().unwrap())));
        assert_eq!(addr.pop(), None);
    }
}
