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

//! UDX: reliable, ordered, connection-oriented byte-streams over UDP.
//!
//! A [`UdxSocket`] binds one UDP socket and multiplexes any number of
//! logical [`UdxStream`]s over it, identified by a pair of 32-bit stream
//! ids carried in every packet. Reliability is per stream: a send buffer
//! of unacked segments, a receive buffer reordering out-of-order segments,
//! RTO-driven retransmission with smoothed RTT estimation, fast retransmit
//! on three duplicate acks, and a window-based congestion controller
//! (slow start, then congestion avoidance with multiplicative decrease).
//!
//! [`UdxTransport`] adapts all of this to the transport interface of the
//! stack, for multiaddrs of the form `/ip4/../udp/<port>/udx`.

mod packet;
mod rtt;
mod socket;
mod stream;
mod transport;

pub use socket::UdxSocket;
pub use stream::{UdxReadHalf, UdxStream, UdxWriteHalf};
pub use transport::{UdxListener, UdxTransport};

use std::time::Duration;
use thiserror::Error;

/// Max. payload bytes per datagram; fits common MTUs with headroom.
pub const MSS: usize = 1350;

/// Stream-level failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdxError {
    /// No SYN-ACK within the retry budget.
    #[error("connection refused")]
    ConnectionRefused,

    /// RST received, or the peer stopped acknowledging.
    #[error("connection reset")]
    ConnectionReset,

    /// The stream or its socket was closed locally.
    #[error("stream closed")]
    Closed,
}

impl From<UdxError> for std::io::Error {
    fn from(e: UdxError) -> Self {
        let kind = match e {
            UdxError::ConnectionRefused => std::io::ErrorKind::ConnectionRefused,
            UdxError::ConnectionReset => std::io::ErrorKind::ConnectionReset,
            UdxError::Closed => std::io::ErrorKind::NotConnected,
        };
        std::io::Error::new(kind, e.to_string())
    }
}

/// Tunables of a UDX endpoint.
///
/// The defaults are:
///
/// - receive buffer (per stream) = 1 MiB
/// - send buffer bound (per stream) = 1 MiB
/// - initial congestion window = 10 segments, max = 1 MiB
/// - RTO in [200 ms, 30 s], initially 1 s
/// - 5 SYN retries
/// - dead-peer interval = 10 s
#[derive(Debug, Clone)]
pub struct UdxConfig {
    recv_buffer: u32,
    send_buffer: usize,
    initial_cwnd: usize,
    max_cwnd: usize,
    initial_rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
    syn_retries: u32,
    dead_peer_timeout: Duration,
}

impl Default for UdxConfig {
    fn default() -> Self {
        UdxConfig {
            recv_buffer: 1024 * 1024,
            send_buffer: 1024 * 1024,
            initial_cwnd: 10 * MSS,
            max_cwnd: 1024 * 1024,
            initial_rto: Duration::from_secs(1),
            min_rto: Duration::from_millis(200),
            max_rto: Duration::from_secs(30),
            syn_retries: 5,
            dead_peer_timeout: Duration::from_secs(10),
        }
    }
}

impl UdxConfig {
    pub fn new() -> Self {
        UdxConfig::default()
    }

    /// Set the per-stream receive buffer, which bounds reordering and
    /// caps the advertised window.
    pub fn set_recv_buffer(&mut self, n: u32) -> &mut Self {
        self.recv_buffer = n;
        self
    }

    /// Set the per-stream bound on buffered unsent bytes; writes block
    /// beyond it.
    pub fn set_send_buffer(&mut self, n: usize) -> &mut Self {
        self.send_buffer = n;
        self
    }

    /// Set the retransmission timeout clamp and initial value.
    pub fn set_rto(&mut self, initial: Duration, min: Duration, max: Duration) -> &mut Self {
        self.initial_rto = initial;
        self.min_rto = min;
        self.max_rto = max;
        self
    }

    /// Set how often an unanswered SYN is retried before the dial fails.
    pub fn set_syn_retries(&mut self, n: u32) -> &mut Self {
        self.syn_retries = n;
        self
    }

    /// Set how long a stream with outstanding data may go without any
    /// acknowledgement before it fails.
    pub fn set_dead_peer_timeout(&mut self, d: Duration) -> &mut Self {
        self.dead_peer_timeout = d;
        self
    }
}
