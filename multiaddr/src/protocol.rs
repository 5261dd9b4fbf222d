use crate::{Error, Result};
use arrayref::array_ref;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use multihash::Multihash;
use std::{
    fmt,
    io::{Cursor, Write},
    net::{Ipv4Addr, Ipv6Addr},
    str::FromStr,
};
use unsigned_varint::{decode, encode};

pub const IP4: u32 = 4;
pub const IP6: u32 = 41;
pub const UDP: u32 = 273;
// Not yet assigned in the multicodec table; private-use code shared by all
// udx peers.
pub const UDX: u32 = 300;
pub const P2P: u32 = 421;
pub const MEMORY: u32 = 777;

/// `Protocol` describes the multiaddress protocols the stack consumes.
#[derive(PartialEq, Eq, Clone, Debug, Hash)]
pub enum Protocol {
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    Udp(u16),
    Udx,
    P2p(Multihash),
    /// In-process transport endpoint; the value is the "port" to contact,
    /// 0 meaning "assign me a port".
    Memory(u64),
}

impl Protocol {
    /// Parse a protocol value from the given iterator of string slices.
    ///
    /// The parsing only consumes the minimum amount of string slices
    /// necessary to produce a well formed protocol. The same iterator can
    /// thus be used to parse a sequence of protocols in succession.
    pub fn from_str_parts<'a, I>(mut iter: I) -> Result<Self>
    where
        I: Iterator<Item = &'a str>,
    {
        match iter.next().ok_or(Error::InvalidProtocolString)? {
            "ip4" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                Ok(Protocol::Ip4(Ipv4Addr::from_str(s).map_err(|_| Error::InvalidProtocolString)?))
            }
            "ip6" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                Ok(Protocol::Ip6(Ipv6Addr::from_str(s).map_err(|_| Error::InvalidProtocolString)?))
            }
            "udp" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                Ok(Protocol::Udp(s.parse().map_err(|_| Error::InvalidProtocolString)?))
            }
            "udx" => Ok(Protocol::Udx),
            "memory" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                Ok(Protocol::Memory(s.parse().map_err(|_| Error::InvalidProtocolString)?))
            }
            "p2p" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                let decoded = bs58::decode(s).into_vec().map_err(|_| Error::InvalidProtocolString)?;
                let mh = Multihash::from_bytes(&decoded).map_err(|_| Error::InvalidMultiaddr)?;
                Ok(Protocol::P2p(mh))
            }
            unknown => Err(Error::UnknownProtocolString(unknown.to_string())),
        }
    }

    /// Parse a single `Protocol` from its raw byte representation,
    /// returning the protocol as well as the remaining byte slice.
    pub fn from_bytes(input: &[u8]) -> Result<(Self, &[u8])> {
        fn split_at(n: usize, input: &[u8]) -> Result<(&[u8], &[u8])> {
            if input.len() < n {
                return Err(Error::DataLessThanLen);
            }
            Ok(input.split_at(n))
        }
        let (id, input) = decode::u32(input)?;
        match id {
            IP4 => {
                let (data, rest) = split_at(4, input)?;
                Ok((Protocol::Ip4(Ipv4Addr::from(*array_ref!(data, 0, 4))), rest))
            }
            IP6 => {
                let (data, rest) = split_at(16, input)?;
                let mut rdr = Cursor::new(data);
                let mut seg = [0u16; 8];
                for x in seg.iter_mut() {
                    *x = rdr.read_u16::<BigEndian>().map_err(|_| Error::InvalidMultiaddr)?;
                }
                let addr = Ipv6Addr::new(seg[0], seg[1], seg[2], seg[3], seg[4], seg[5], seg[6], seg[7]);
                Ok((Protocol::Ip6(addr), rest))
            }
            UDP => {
                let (data, rest) = split_at(2, input)?;
                Ok((Protocol::Udp(BigEndian::read_u16(data)), rest))
            }
            UDX => Ok((Protocol::Udx, input)),
            MEMORY => {
                let (data, rest) = split_at(8, input)?;
                let mut rdr = Cursor::new(data);
                let port = rdr.read_u64::<BigEndian>().map_err(|_| Error::InvalidMultiaddr)?;
                Ok((Protocol::Memory(port), rest))
            }
            P2P => {
                let (n, input) = decode::usize(input)?;
                let (data, rest) = split_at(n, input)?;
                let mh = Multihash::from_bytes(data).map_err(|_| Error::InvalidMultiaddr)?;
                Ok((Protocol::P2p(mh), rest))
            }
            _ => Err(Error::UnknownProtocolId(id)),
        }
    }

    /// Encode this protocol by writing its binary representation into
    /// the given `Write` impl.
    pub fn write_bytes<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut buf = encode::u32_buffer();
        match self {
            Protocol::Ip4(addr) => {
                w.write_all(encode::u32(IP4, &mut buf))?;
                w.write_all(&addr.octets())?
            }
            Protocol::Ip6(addr) => {
                w.write_all(encode::u32(IP6, &mut buf))?;
                for &segment in &addr.segments() {
                    w.write_u16::<BigEndian>(segment)?
                }
            }
            Protocol::Udp(port) => {
                w.write_all(encode::u32(UDP, &mut buf))?;
                w.write_u16::<BigEndian>(*port)?
            }
            Protocol::Udx => w.write_all(encode::u32(UDX, &mut buf))?,
            Protocol::Memory(port) => {
                w.write_all(encode::u32(MEMORY, &mut buf))?;
                w.write_u64::<BigEndian>(*port)?
            }
            Protocol::P2p(mh) => {
                w.write_all(encode::u32(P2P, &mut buf))?;
                let bytes = mh.to_bytes();
                let mut len_buf = encode::usize_buffer();
                w.write_all(encode::usize(bytes.len(), &mut len_buf))?;
                w.write_all(&bytes)?
            }
        }
        Ok(())
    }

    /// The multicodec code of this protocol.
    pub fn code(&self) -> u32 {
        match self {
            Protocol::Ip4(_) => IP4,
            Protocol::Ip6(_) => IP6,
            Protocol::Udp(_) => UDP,
            Protocol::Udx => UDX,
            Protocol::P2p(_) => P2P,
            Protocol::Memory(_) => MEMORY,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use self::Protocol::*;
        match self {
            Ip4(addr) => write!(f, "/ip4/{}", addr),
            Ip6(addr) => write!(f, "/ip6/{}", addr),
            Udp(port) => write!(f, "/udp/{}", port),
            Udx => f.write_str("/udx"),
            P2p(mh) => write!(f, "/p2p/{}", bs58::encode(mh.to_bytes()).into_string()),
            Memory(port) => write!(f, "/memory/{}", port),
        }
    }
}

impl From<Ipv4Addr> for Protocol {
    fn from(addr: Ipv4Addr) -> Self {
        Protocol::Ip4(addr)
    }
}

impl From<Ipv6Addr> for Protocol {
    fn from(addr: Ipv6Addr) -> Self {
        Protocol::Ip6(addr)
    }
}

impl From<std::net::IpAddr> for Protocol {
    fn from(addr: std::net::IpAddr) -> Self {
        match addr {
            std::net::IpAddr::V4(a) => Protocol::Ip4(a),
            std::net::IpAddr::V6(a) => Protocol::Ip6(a),
        }
    }
}
