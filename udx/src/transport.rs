//! The transport adapter: multiaddrs in, UDX streams out.
//!
//! Recognises multiaddrs of the form `/ip4/../udp/<port>/udx` (and the
//! `ip6` equivalent); a trailing `/p2p/..` component is tolerated and
//! ignored, identity is the business of the layers above.

use crate::socket::UdxSocket;
use crate::stream::UdxStream;
use crate::{UdxConfig, UdxError};
use async_trait::async_trait;
use log::debug;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use up2p_core::transport::{ConnectionInfo, IListener, ITransport, Transport, TransportError, TransportListener};
use up2p_core::{Multiaddr, Protocol};

/// The UDX transport.
#[derive(Debug, Clone, Default)]
pub struct UdxTransport {
    config: UdxConfig,
}

#[async_trait]
impl Transport for UdxTransport {
    type Output = UdxStream;

    async fn listen_on(&mut self, addr: Multiaddr) -> Result<IListener<Self::Output>, TransportError> {
        let socket_addr =
            multiaddr_to_socketaddr(&addr).ok_or_else(|| TransportError::MultiaddrNotSupported(addr.clone()))?;
        let socket = UdxSocket::bind_with_config(socket_addr, self.config.clone()).await?;
        debug!("udx listening on {}", socket.local_addr());
        Ok(Box::new(UdxListener { socket }))
    }

    async fn dial(&mut self, addr: Multiaddr) -> Result<Self::Output, TransportError> {
        let socket_addr =
            multiaddr_to_socketaddr(&addr).ok_or_else(|| TransportError::MultiaddrNotSupported(addr.clone()))?;
        let bind_addr = if socket_addr.is_ipv4() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        };
        let socket = UdxSocket::bind_with_config(bind_addr, self.config.clone()).await?;
        debug!("udx dialing {}", socket_addr);
        let stream = socket.connect(socket_addr).await?;
        Ok(stream)
    }

    fn box_clone(&self) -> ITransport<Self::Output> {
        Box::new(self.clone())
    }

    fn protocols(&self) -> Vec<u32> {
        vec![Protocol::Udx.code()]
    }
}

impl UdxTransport {
    pub fn new(config: UdxConfig) -> Self {
        UdxTransport { config }
    }
}

/// A bound UDX listener.
pub struct UdxListener {
    socket: UdxSocket,
}

#[async_trait]
impl TransportListener for UdxListener {
    type Output = UdxStream;

    async fn accept(&mut self) -> Result<Self::Output, TransportError> {
        let stream = self.socket.accept().await?;
        Ok(stream)
    }

    fn multi_addr(&self) -> Multiaddr {
        socketaddr_to_multiaddr(self.socket.local_addr())
    }
}

impl From<UdxError> for TransportError {
    fn from(e: UdxError) -> Self {
        match e {
            UdxError::ConnectionRefused => TransportError::ConnectionRefused,
            UdxError::ConnectionReset => TransportError::ConnectionReset,
            UdxError::Closed => TransportError::Closed,
        }
    }
}

impl ConnectionInfo for UdxStream {
    fn local_multiaddr(&self) -> Multiaddr {
        socketaddr_to_multiaddr(self.local_addr())
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        socketaddr_to_multiaddr(self.remote_addr())
    }
}

/// `/ipX/../udp/<port>/udx[/p2p/..]` to a socket address.
pub fn multiaddr_to_socketaddr(addr: &Multiaddr) -> Option<SocketAddr> {
    let mut iter = addr.iter();
    let ip: IpAddr = match iter.next()? {
        Protocol::Ip4(a) => a.into(),
        Protocol::Ip6(a) => a.into(),
        _ => return None,
    };
    let port = match iter.next()? {
        Protocol::Udp(port) => port,
        _ => return None,
    };
    match iter.next()? {
        Protocol::Udx => {}
        _ => return None,
    }
    match iter.next() {
        None | Some(Protocol::P2p(_)) => Some(SocketAddr::new(ip, port)),
        _ => None,
    }
}

/// A socket address to `/ipX/../udp/<port>/udx`.
pub fn socketaddr_to_multiaddr(addr: SocketAddr) -> Multiaddr {
    Multiaddr::from(addr.ip())
        .with(Protocol::Udp(addr.port()))
        .with(Protocol::Udx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiaddr_conversions() {
        let addr: Multiaddr = "/ip4/127.0.0.1/udp/4001/udx".parse().unwrap();
        let sa = multiaddr_to_socketaddr(&addr).unwrap();
        assert_eq!(sa, "127.0.0.1:4001".parse::<SocketAddr>().unwrap());
        assert_eq!(socketaddr_to_multiaddr(sa), addr);
    }

    #[test]
    fn peer_id_suffix_is_tolerated() {
        let addr: Multiaddr = "/ip4/127.0.0.1/udp/4001/udx/p2p/QmcgpsyWgH8Y8ajJz1Cu72KnS5uo2Aa2LpzU7kinSupNKC"
            .parse()
            .unwrap();
        assert!(multiaddr_to_socketaddr(&addr).is_some());
    }

    #[test]
    fn non_udx_addrs_are_rejected() {
        let addr: Multiaddr = "/ip4/127.0.0.1/udp/4001".parse().unwrap();
        assert!(multiaddr_to_socketaddr(&addr).is_none());
        let addr: Multiaddr = "/memory/5".parse().unwrap();
        assert!(multiaddr_to_socketaddr(&addr).is_none());
    }
}
