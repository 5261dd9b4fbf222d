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

//! Yamux stream multiplexing over a secured connection.

pub mod connection;
pub mod error;
pub mod frame;

mod chunks;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{info, trace};
use std::fmt;
use std::time::Duration;

pub use connection::{control::Control, stream::Stream, Connection, Id, Mode};
pub use error::ConnectionError;

use up2p_core::identity::Keypair;
use up2p_core::muxing::{IReadWrite, IStreamMuxer, ReadWriteEx, StreamInfo, StreamMuxer, StreamMuxerEx};
use up2p_core::secure_io::SecureInfo;
use up2p_core::transport::{ConnectionInfo, TransportError};
use up2p_core::upgrade::{UpgradeInfo, Upgrader};
use up2p_core::{Multiaddr, PeerId, PublicKey};
use up2p_traits::SplittableReadWrite;

/// The initial receive window of every stream, as per the yamux
/// specification.
pub const DEFAULT_CREDIT: u32 = 256 * 1024;

/// Specifies when window update frames are sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowUpdateMode {
    /// Grant window credit back as soon as data arrives.
    ///
    /// This prevents head-of-line blocking but exercises no back-pressure
    /// on senders: a slow reader accumulates data in its buffer up to
    /// `max_buffer_size`.
    OnReceive,

    /// Grant window credit only as the receiving stream handle consumes
    /// data.
    ///
    /// This keeps buffer usage low and makes a sender writing into a
    /// stream nobody reads block once the window is exhausted.
    OnRead,
}

/// Yamux configuration.
///
/// The default configuration values are as follows:
///
/// - receive window = 256 KiB
/// - max. buffer size (per stream) = 1 MiB
/// - max. number of streams = 8192
/// - max. message size = 64 KiB
/// - window update mode = on read
/// - read after close = true
/// - lazy open = false
/// - keepalive interval = 30 s, ping timeout = 10 s
#[derive(Debug, Clone)]
pub struct Config {
    receive_window: u32,
    max_buffer_size: usize,
    max_num_streams: usize,
    max_message_size: usize,
    window_update_mode: WindowUpdateMode,
    read_after_close: bool,
    lazy_open: bool,
    keepalive_interval: Option<Duration>,
    ping_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            receive_window: DEFAULT_CREDIT,
            max_buffer_size: 1024 * 1024,
            max_num_streams: 8192,
            max_message_size: 64 * 1024,
            window_update_mode: WindowUpdateMode::OnRead,
            read_after_close: true,
            lazy_open: false,
            keepalive_interval: Some(Duration::from_secs(30)),
            ping_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// Set the receive window (must be >= 256 KiB).
    ///
    /// # Panics
    ///
    /// If the given receive window is < 256 KiB.
    pub fn set_receive_window(&mut self, n: u32) -> &mut Self {
        assert!(n >= DEFAULT_CREDIT);
        self.receive_window = n;
        self
    }

    /// Set the max. buffer size per stream.
    pub fn set_max_buffer_size(&mut self, n: usize) -> &mut Self {
        self.max_buffer_size = n;
        self
    }

    /// Set the max. number of streams.
    pub fn set_max_num_streams(&mut self, n: usize) -> &mut Self {
        self.max_num_streams = n;
        self
    }

    /// Set the max. size of a single data frame body.
    pub fn set_max_message_size(&mut self, n: usize) -> &mut Self {
        self.max_message_size = n;
        self
    }

    /// Set the window update mode to use.
    pub fn set_window_update_mode(&mut self, m: WindowUpdateMode) -> &mut Self {
        self.window_update_mode = m;
        self
    }

    /// Allow or disallow streams to read buffered data after
    /// the connection has been closed.
    pub fn set_read_after_close(&mut self, b: bool) -> &mut Self {
        self.read_after_close = b;
        self
    }

    /// Enable or disable deferring the initial SYN until the first
    /// outbound data frame of a new stream.
    pub fn set_lazy_open(&mut self, b: bool) -> &mut Self {
        self.lazy_open = b;
        self
    }

    /// Set the keepalive ping interval; `None` disables keepalive.
    pub fn set_keepalive_interval(&mut self, interval: Option<Duration>) -> &mut Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set how long to wait for a keepalive ping to be answered before the
    /// session fails with a timeout.
    pub fn set_ping_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.ping_timeout = timeout;
        self
    }
}

/// A yamux session in the shape the swarm consumes: a [`StreamMuxer`]
/// carrying the connection and identity facts of the socket it upgraded.
pub struct Yamux<C: up2p_traits::SplitEx> {
    /// The session state machine; taken by [`StreamMuxer::task`].
    connection: Option<Connection<C>>,
    /// Handle to control the session.
    control: Control,
    /// For debug purposes.
    id: Id,
    /// The local multiaddr of this connection.
    la: Multiaddr,
    /// The remote multiaddr of this connection.
    ra: Multiaddr,
    /// The private key of the local node.
    local_priv_key: Keypair,
    /// For convenience, the local peer ID, generated from the local
    /// public key.
    local_peer_id: PeerId,
    /// The public key of the remote.
    remote_pub_key: PublicKey,
    /// For convenience, the remote peer ID, derived from the remote
    /// public key.
    remote_peer_id: PeerId,
}

impl<C: up2p_traits::SplitEx> Clone for Yamux<C> {
    fn clone(&self) -> Self {
        Yamux {
            connection: None,
            control: self.control.clone(),
            id: self.id,
            la: self.la.clone(),
            ra: self.ra.clone(),
            local_priv_key: self.local_priv_key.clone(),
            local_peer_id: self.local_peer_id.clone(),
            remote_pub_key: self.remote_pub_key.clone(),
            remote_peer_id: self.remote_peer_id.clone(),
        }
    }
}

impl<C: up2p_traits::SplitEx> fmt::Debug for Yamux<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Yamux")
            .field("id", &self.id)
            .field("ra", &self.ra)
            .field("rid", &self.remote_peer_id)
            .finish()
    }
}

impl<C: ConnectionInfo + SecureInfo + SplittableReadWrite> Yamux<C> {
    /// Create a new yamux session over a secured connection.
    pub fn new(io: C, mut cfg: Config, mode: Mode) -> Self {
        cfg.set_read_after_close(false);

        // `io` is moved into the Connection; copy out its metadata first.
        let local_priv_key = io.local_priv_key();
        let local_peer_id = io.local_peer();
        let remote_pub_key = io.remote_pub_key();
        let remote_peer_id = io.remote_peer();
        let la = io.local_multiaddr();
        let ra = io.remote_multiaddr();

        let conn = Connection::new(io, cfg, mode);
        let id = conn.id();
        let control = conn.control();
        Yamux {
            connection: Some(conn),
            control,
            id,
            la,
            ra,
            local_priv_key,
            local_peer_id,
            remote_pub_key,
            remote_peer_id,
        }
    }
}

impl<C: up2p_traits::SplitEx + Send> SecureInfo for Yamux<C> {
    fn local_peer(&self) -> PeerId {
        self.local_peer_id.clone()
    }

    fn remote_peer(&self) -> PeerId {
        self.remote_peer_id.clone()
    }

    fn local_priv_key(&self) -> Keypair {
        self.local_priv_key.clone()
    }

    fn remote_pub_key(&self) -> PublicKey {
        self.remote_pub_key.clone()
    }
}

impl<C: up2p_traits::SplitEx + Send> ConnectionInfo for Yamux<C> {
    fn local_multiaddr(&self) -> Multiaddr {
        self.la.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.ra.clone()
    }
}

impl StreamInfo for Stream {
    fn id(&self) -> usize {
        Stream::id(self) as usize
    }
}

#[async_trait]
impl ReadWriteEx for Stream {
    async fn reset(&mut self) -> std::io::Result<()> {
        Stream::reset(self).await
    }

    fn box_clone(&self) -> IReadWrite {
        Box::new(self.clone())
    }
}

impl<C: SplittableReadWrite> StreamMuxerEx for Yamux<C> {}

#[async_trait]
impl<C: SplittableReadWrite> StreamMuxer for Yamux<C> {
    async fn open_stream(&mut self) -> Result<IReadWrite, TransportError> {
        let s = self.control.open_stream().await?;
        trace!("a new outbound substream {:?} opened for yamux...", s);
        Ok(Box::new(s))
    }

    async fn accept_stream(&mut self) -> Result<IReadWrite, TransportError> {
        let s = self.control.accept_stream().await?;
        trace!("a new inbound substream {:?} accepted for yamux...", s);
        Ok(Box::new(s))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.control.close().await?;
        Ok(())
    }

    fn task(&mut self) -> Option<BoxFuture<'static, ()>> {
        if let Some(mut conn) = self.connection.take() {
            return Some(
                async move {
                    while conn.next_stream().await.is_ok() {}
                    info!("{:?} background-task exiting...", conn.id());
                }
                .boxed(),
            );
        }
        None
    }

    fn box_clone(&self) -> IStreamMuxer {
        Box::new(self.clone())
    }
}

impl UpgradeInfo for Config {
    type Info = &'static [u8];

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/yamux/1.0.0"]
    }
}

#[async_trait]
impl<T> Upgrader<T> for Config
where
    T: ConnectionInfo + SecureInfo + SplittableReadWrite,
{
    type Output = Yamux<T>;

    async fn upgrade_inbound(self, socket: T, _info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError> {
        trace!("upgrading yamux inbound");
        Ok(Yamux::new(socket, self, Mode::Server))
    }

    async fn upgrade_outbound(self, socket: T, _info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError> {
        trace!("upgrading yamux outbound");
        Ok(Yamux::new(socket, self, Mode::Client))
    }
}

impl From<ConnectionError> for TransportError {
    fn from(e: ConnectionError) -> Self {
        TransportError::StreamMuxerError(Box::new(e))
    }
}
