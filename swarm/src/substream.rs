use async_trait::async_trait;
use futures::channel::mpsc;
use futures::SinkExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::{fmt, io};

use crate::connection::{ConnectionId, Direction};
use crate::control::SwarmControlCmd;
use crate::ProtocolId;
use up2p_core::muxing::IReadWrite;
use up2p_core::upgrade::ProtocolName;
use up2p_core::Multiaddr;
use up2p_traits::{ReadEx, WriteEx};

/// The id of a substream, assigned by the muxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub(crate) usize);

#[derive(Debug, Default)]
pub struct SubstreamStats {
    /// The accumulative counter of packets sent.
    pkt_sent: AtomicUsize,
    /// The accumulative counter of packets received.
    pkt_recv: AtomicUsize,
    /// The accumulative counter of bytes sent.
    byte_sent: AtomicUsize,
    /// The accumulative counter of bytes received.
    byte_recv: AtomicUsize,
}

impl SubstreamStats {
    pub fn bytes_sent(&self) -> usize {
        self.byte_sent.load(Ordering::SeqCst)
    }

    pub fn bytes_received(&self) -> usize {
        self.byte_recv.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct SubstreamInfo {
    /// The protocol of the substream.
    pub protocol: ProtocolId,
    /// The direction of the substream.
    pub dir: Direction,
}

#[derive(Debug)]
struct SubstreamMeta {
    /// The protocol of the substream.
    protocol: ProtocolId,
    /// The direction of the substream.
    dir: Direction,
    /// The connection the substream belongs to; it can be used to back
    /// track to the stream muxer.
    cid: ConnectionId,
    /// The local multiaddr of the substream.
    la: Multiaddr,
    /// The remote multiaddr of the substream.
    ra: Multiaddr,
}

/// A negotiated, protocol-bound logical stream on a connection.
#[derive(Clone)]
pub struct Substream {
    /// The inner stream, created by the stream muxer.
    inner: IReadWrite,
    /// The shared metadata of the substream.
    info: Arc<SubstreamMeta>,
    /// The control channel, used to notify the swarm on close.
    ctrl: mpsc::Sender<SwarmControlCmd>,
    /// The statistics of the substream.
    stats: Arc<SubstreamStats>,
}

impl fmt::Debug for Substream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Substream")
            .field("id", &self.id())
            .field("protocol", &self.info.protocol.protocol_name_str())
            .field("dir", &self.info.dir)
            .field("cid", &self.info.cid)
            .finish()
    }
}

impl Substream {
    pub(crate) fn new(
        inner: IReadWrite,
        dir: Direction,
        protocol: ProtocolId,
        cid: ConnectionId,
        la: Multiaddr,
        ra: Multiaddr,
        ctrl: mpsc::Sender<SwarmControlCmd>,
    ) -> Self {
        Self {
            inner,
            info: Arc::new(SubstreamMeta {
                protocol,
                dir,
                cid,
                la,
                ra,
            }),
            ctrl,
            stats: Arc::new(SubstreamStats::default()),
        }
    }

    /// The protocol negotiated on the substream.
    pub fn protocol(&self) -> ProtocolId {
        self.info.protocol
    }

    /// The direction of the substream.
    pub fn dir(&self) -> Direction {
        self.info.dir
    }

    /// The connection id of the owning connection.
    pub fn cid(&self) -> ConnectionId {
        self.info.cid
    }

    /// The substream id.
    pub fn id(&self) -> StreamId {
        StreamId(self.inner.id())
    }

    /// The local multiaddr of the substream.
    pub fn local_multiaddr(&self) -> Multiaddr {
        self.info.la.clone()
    }

    /// The remote multiaddr of the substream.
    pub fn remote_multiaddr(&self) -> Multiaddr {
        self.info.ra.clone()
    }

    /// The statistics of the substream.
    pub fn stats(&self) -> &SubstreamStats {
        &self.stats
    }

    pub fn info(&self) -> SubstreamInfo {
        SubstreamInfo {
            protocol: self.protocol(),
            dir: self.dir(),
        }
    }

    /// Aborts the substream: the peer observes a reset; the owning
    /// connection stays usable.
    pub async fn reset(&mut self) -> io::Result<()> {
        self.inner.reset().await
    }
}

#[async_trait]
impl ReadEx for Substream {
    async fn read2(&mut self, buf: &mut [u8]) -> Result<usize, io::Error> {
        self.inner.read2(buf).await.map(|n| {
            self.stats.byte_recv.fetch_add(n, Ordering::SeqCst);
            self.stats.pkt_recv.fetch_add(1, Ordering::SeqCst);
            n
        })
    }
}

#[async_trait]
impl WriteEx for Substream {
    async fn write2(&mut self, buf: &[u8]) -> Result<usize, io::Error> {
        self.inner.write2(buf).await.map(|n| {
            self.stats.byte_sent.fetch_add(n, Ordering::SeqCst);
            self.stats.pkt_sent.fetch_add(1, Ordering::SeqCst);
            n
        })
    }

    async fn flush2(&mut self) -> Result<(), io::Error> {
        self.inner.flush2().await
    }

    // Ask the swarm to forget the stream, then close the inner stream.
    async fn close2(&mut self) -> Result<(), io::Error> {
        let cid = self.cid();
        let sid = self.id();
        let _ = self.ctrl.send(SwarmControlCmd::CloseStream(cid, sid)).await;
        self.inner.close2().await
    }
}
