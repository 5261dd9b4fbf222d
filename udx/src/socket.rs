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

//! The UDX endpoint driver.
//!
//! One task per bound UDP socket owns every piece of per-stream state: the
//! send and reorder buffers, the RTT estimators, the congestion windows and
//! all timers. Stream handles talk to it exclusively over a command
//! channel, so no state is ever shared across tasks.

use crate::packet::{seq_le, seq_lt, Packet, ACK, DATA, FIN, MAX_SACK_RANGES, RST, SACK, SYN};
use crate::rtt::RttEstimator;
use crate::stream::UdxStream;
use crate::{UdxConfig, UdxError, MSS};
use async_std::net::UdpSocket;
use async_std::task;
use bytes::Bytes;
use fnv::FnvHashMap;
use futures::channel::{mpsc, oneshot};
use futures::lock::Mutex as AsyncMutex;
use futures::{FutureExt, StreamExt};
use futures_timer::Delay;
use log::{debug, trace};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Commands from stream handles and the socket handle to the driver.
pub(crate) enum SocketCommand {
    Connect {
        remote: SocketAddr,
        reply: oneshot::Sender<Result<UdxStream, UdxError>>,
    },
    Outgoing {
        id: u32,
        data: Bytes,
        reply: oneshot::Sender<Result<(), UdxError>>,
    },
    Consumed {
        id: u32,
        n: usize,
    },
    Shutdown {
        id: u32,
    },
    Reset {
        id: u32,
    },
    Close,
}

/// A bound UDX endpoint: dials and accepts [`UdxStream`]s over one UDP
/// socket.
#[derive(Clone)]
pub struct UdxSocket {
    inner: Arc<Inner>,
    incoming: Arc<AsyncMutex<mpsc::UnboundedReceiver<UdxStream>>>,
}

struct Inner {
    cmd_tx: mpsc::UnboundedSender<SocketCommand>,
    local_addr: SocketAddr,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.cmd_tx.unbounded_send(SocketCommand::Close);
    }
}

impl UdxSocket {
    /// Binds a UDP socket (port 0 picks a free port) and spawns its driver.
    pub async fn bind(addr: SocketAddr) -> io::Result<UdxSocket> {
        Self::bind_with_config(addr, UdxConfig::default()).await
    }

    pub async fn bind_with_config(addr: SocketAddr, config: UdxConfig) -> io::Result<UdxSocket> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded();
        let (accept_tx, accept_rx) = mpsc::unbounded();

        let driver = Driver {
            socket,
            local_addr,
            config,
            cmd_tx: cmd_tx.clone(),
            cmd_rx,
            accept_tx: Some(accept_tx),
            streams: FnvHashMap::default(),
            by_remote: HashMap::new(),
            next_id: 1,
            closed: false,
        };
        task::spawn(driver.run());

        Ok(UdxSocket {
            inner: Arc::new(Inner { cmd_tx, local_addr }),
            incoming: Arc::new(AsyncMutex::new(accept_rx)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Opens a stream to a remote UDX endpoint. Resolves once the
    /// three-way handshake completes.
    pub async fn connect(&self, remote: SocketAddr) -> Result<UdxStream, UdxError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .cmd_tx
            .unbounded_send(SocketCommand::Connect { remote, reply: tx })
            .map_err(|_| UdxError::Closed)?;
        rx.await.map_err(|_| UdxError::Closed)?
    }

    /// Waits for an inbound stream.
    pub async fn accept(&self) -> Result<UdxStream, UdxError> {
        let mut incoming = self.incoming.lock().await;
        incoming.next().await.ok_or(UdxError::Closed)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    SynSent,
    SynRcvd,
    Established,
}

struct Segment {
    seq: u32,
    payload: Bytes,
    syn: bool,
    fin: bool,
    /// First-transmission timestamp; cleared on retransmission so the
    /// sample is never taken from an ambiguous ack (Karn's rule).
    sent_at: Option<Instant>,
    sacked: bool,
}

impl Segment {
    fn seq_len(&self) -> u32 {
        self.payload.len() as u32 + self.syn as u32 + self.fin as u32
    }

    fn end(&self) -> u32 {
        self.seq.wrapping_add(self.seq_len())
    }
}

struct StreamEntry {
    local_id: u32,
    remote_id: u32,
    remote: SocketAddr,
    state: State,
    // Send side.
    iss: u32,
    snd_una: u32,
    snd_nxt: u32,
    send_queue: VecDeque<Segment>,
    flight: VecDeque<Segment>,
    queued_bytes: usize,
    flight_bytes: usize,
    write_waiters: VecDeque<oneshot::Sender<Result<(), UdxError>>>,
    local_fin_queued: bool,
    // Receive side.
    rcv_nxt: u32,
    reorder: BTreeMap<u32, Bytes>,
    reorder_bytes: usize,
    delivered_unconsumed: usize,
    incoming_tx: Option<mpsc::UnboundedSender<Result<Bytes, UdxError>>>,
    remote_fin: Option<u32>,
    remote_done: bool,
    last_advertised: u32,
    // Congestion control and timers.
    cwnd: usize,
    ssthresh: usize,
    peer_window: u32,
    dup_acks: u32,
    rtt: RttEstimator,
    rto_at: Option<Instant>,
    last_ack_rx: Instant,
    syn_retries: u32,
    // Establishment plumbing.
    connect_reply: Option<oneshot::Sender<Result<UdxStream, UdxError>>>,
    pending_handle: Option<UdxStream>,
}

impl StreamEntry {
    fn new(config: &UdxConfig, local_id: u32, remote: SocketAddr, state: State, iss: u32) -> Self {
        StreamEntry {
            local_id,
            remote_id: 0,
            remote,
            state,
            iss,
            snd_una: iss,
            snd_nxt: iss.wrapping_add(1),
            send_queue: VecDeque::new(),
            flight: VecDeque::new(),
            queued_bytes: 0,
            flight_bytes: 0,
            write_waiters: VecDeque::new(),
            local_fin_queued: false,
            rcv_nxt: 0,
            reorder: BTreeMap::new(),
            reorder_bytes: 0,
            delivered_unconsumed: 0,
            incoming_tx: None,
            remote_fin: None,
            remote_done: false,
            last_advertised: config.recv_buffer,
            cwnd: config.initial_cwnd,
            ssthresh: config.max_cwnd,
            peer_window: 0,
            dup_acks: 0,
            rtt: RttEstimator::new(config.initial_rto, config.min_rto, config.max_rto),
            rto_at: None,
            last_ack_rx: Instant::now(),
            syn_retries: 0,
            connect_reply: None,
            pending_handle: None,
        }
    }

    fn advertised_window(&self, config: &UdxConfig) -> u32 {
        config
            .recv_buffer
            .saturating_sub(self.delivered_unconsumed as u32)
            .saturating_sub(self.reorder_bytes as u32)
    }

    fn buffered(&self) -> usize {
        self.queued_bytes + self.flight_bytes
    }

    fn effective_send_window(&self) -> usize {
        std::cmp::min(self.cwnd, self.peer_window as usize)
    }

    fn fully_closed(&self) -> bool {
        self.local_fin_queued && self.send_queue.is_empty() && self.flight.is_empty() && self.remote_done
    }

    /// Fails every side of the stream with `err`.
    fn fail(&mut self, err: UdxError) {
        if let Some(tx) = self.incoming_tx.take() {
            let _ = tx.unbounded_send(Err(err));
        }
        for tx in self.write_waiters.drain(..) {
            let _ = tx.send(Err(err));
        }
        if let Some(tx) = self.connect_reply.take() {
            let _ = tx.send(Err(err));
        }
        self.pending_handle = None;
    }

    fn enqueue_data(&mut self, mut data: Bytes) {
        while !data.is_empty() {
            let chunk = data.split_to(std::cmp::min(MSS, data.len()));
            let len = chunk.len();
            let seg = Segment {
                seq: self.snd_nxt,
                payload: chunk,
                syn: false,
                fin: false,
                sent_at: None,
                sacked: false,
            };
            self.snd_nxt = self.snd_nxt.wrapping_add(len as u32);
            self.queued_bytes += len;
            self.send_queue.push_back(seg);
        }
    }

    fn enqueue_fin(&mut self) {
        let seg = Segment {
            seq: self.snd_nxt,
            payload: Bytes::new(),
            syn: false,
            fin: true,
            sent_at: None,
            sacked: false,
        };
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        self.send_queue.push_back(seg);
        self.local_fin_queued = true;
    }

    /// Delivers in-order bytes to the stream handle.
    fn deliver(&mut self, bytes: Bytes) {
        if self.remote_done || bytes.is_empty() {
            return;
        }
        let len = bytes.len();
        if let Some(tx) = &self.incoming_tx {
            if tx.unbounded_send(Ok(bytes)).is_ok() {
                self.delivered_unconsumed += len;
            }
            // If the read half is gone the bytes evaporate and the window
            // stays open.
        }
    }

    /// Pulls contiguous segments out of the reorder buffer.
    fn drain_reorder(&mut self) {
        loop {
            let (&seq, len) = match self.reorder.iter().next() {
                Some((seq, payload)) => (seq, payload.len() as u32),
                None => break,
            };
            let end = seq.wrapping_add(len);
            if seq_le(end, self.rcv_nxt) {
                // Entirely duplicate.
                self.reorder.remove(&seq);
                self.reorder_bytes -= len as usize;
            } else if seq_le(seq, self.rcv_nxt) {
                let payload = match self.reorder.remove(&seq) {
                    Some(payload) => payload,
                    None => break,
                };
                self.reorder_bytes -= len as usize;
                let skip = self.rcv_nxt.wrapping_sub(seq) as usize;
                self.deliver(payload.slice(skip..));
                self.rcv_nxt = end;
            } else {
                break;
            }
        }
    }

    /// Consumes the remote FIN once every byte before it was delivered.
    fn check_fin(&mut self) {
        if let Some(fin_seq) = self.remote_fin {
            if self.rcv_nxt == fin_seq && !self.remote_done {
                self.rcv_nxt = fin_seq.wrapping_add(1);
                self.remote_done = true;
                // Dropping the sender is the end-of-stream signal.
                self.incoming_tx = None;
            }
        }
    }

    /// The SACK ranges describing the current reorder buffer.
    fn sack_ranges(&self) -> Vec<(u32, u32)> {
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for (&seq, payload) in self.reorder.iter() {
            let end = seq.wrapping_add(payload.len() as u32);
            match ranges.last_mut() {
                Some((_, last_end)) if *last_end == seq => *last_end = end,
                _ => {
                    if ranges.len() == MAX_SACK_RANGES {
                        break;
                    }
                    ranges.push((seq, end));
                }
            }
        }
        ranges
    }
}

struct Driver {
    socket: UdpSocket,
    local_addr: SocketAddr,
    config: UdxConfig,
    cmd_tx: mpsc::UnboundedSender<SocketCommand>,
    cmd_rx: mpsc::UnboundedReceiver<SocketCommand>,
    accept_tx: Option<mpsc::UnboundedSender<UdxStream>>,
    streams: FnvHashMap<u32, StreamEntry>,
    /// `(peer address, peer stream id) -> local id`, for SYN idempotence.
    by_remote: HashMap<(SocketAddr, u32), u32>,
    next_id: u32,
    closed: bool,
}

enum Wake {
    Packet(io::Result<(usize, SocketAddr)>),
    Cmd(Option<SocketCommand>),
    Timer,
}

impl Driver {
    async fn run(mut self) {
        let mut recv_buf = vec![0u8; 64 * 1024];
        loop {
            if self.closed && self.streams.is_empty() {
                break;
            }
            let timeout = self.next_timeout();
            let wake = {
                let packet = self.socket.recv_from(&mut recv_buf);
                futures::pin_mut!(packet);
                let mut packet = packet.fuse();
                let mut timer = Delay::new(timeout).fuse();
                futures::select! {
                    res = packet => Wake::Packet(res),
                    cmd = self.cmd_rx.next() => Wake::Cmd(cmd),
                    _ = timer => Wake::Timer,
                }
            };
            match wake {
                Wake::Packet(Ok((n, from))) => {
                    let bytes = recv_buf[..n].to_vec();
                    self.on_packet(&bytes, from).await;
                }
                Wake::Packet(Err(e)) => {
                    // Transient receive errors (e.g. ICMP-induced) are
                    // dropped with the datagram that caused them.
                    trace!("udx recv error: {}", e);
                }
                Wake::Cmd(Some(cmd)) => self.on_command(cmd).await,
                Wake::Cmd(None) => break,
                Wake::Timer => self.on_timers().await,
            }
        }
        debug!("udx driver on {} exiting", self.local_addr);
    }

    fn next_timeout(&self) -> Duration {
        let now = Instant::now();
        self.streams
            .values()
            .filter_map(|e| e.rto_at)
            .min()
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or_else(|| Duration::from_secs(3600))
    }

    fn alloc_id(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id == 0 {
                self.next_id = 1;
            }
            if id != 0 && !self.streams.contains_key(&id) {
                return id;
            }
        }
    }

    async fn on_packet(&mut self, data: &[u8], from: SocketAddr) {
        let pkt = match Packet::decode(data) {
            Some(pkt) => pkt,
            None => return,
        };

        // A SYN with no destination id opens a new inbound stream.
        if pkt.dst == 0 && pkt.has(SYN) {
            self.on_syn(pkt, from).await;
            return;
        }

        let id = pkt.dst;
        if !self.streams.contains_key(&id) {
            // Unknown stream. Pure acks of late retransmissions are
            // ignored; anything carrying data or control gets a RST.
            if !pkt.has(RST) && (pkt.has(SYN) || pkt.has(FIN) || !pkt.payload.is_empty()) {
                let rst = Packet {
                    flags: RST,
                    src: id,
                    dst: pkt.src,
                    seq: 0,
                    ack: 0,
                    window: 0,
                    sacks: Vec::new(),
                    payload: Bytes::new(),
                };
                send_datagram(&self.socket, from, &rst).await;
            }
            return;
        }

        if pkt.has(RST) {
            if let Some(mut entry) = self.streams.remove(&id) {
                debug!("udx stream {} reset by remote", id);
                self.by_remote.remove(&(entry.remote, entry.remote_id));
                entry.fail(UdxError::ConnectionReset);
            }
            return;
        }

        let config = self.config.clone();
        let mut established_now = false;
        let mut remove = false;

        {
            let entry = match self.streams.get_mut(&id) {
                Some(entry) => entry,
                None => return,
            };
            entry.last_ack_rx = Instant::now();

            // Completion of our active open.
            if entry.state == State::SynSent {
                if pkt.has(SYN) && pkt.has(ACK) && pkt.ack == entry.iss.wrapping_add(1) {
                    entry.remote_id = pkt.src;
                    entry.rcv_nxt = pkt.seq.wrapping_add(1);
                    entry.snd_una = pkt.ack;
                    entry.peer_window = pkt.window;
                    entry.rto_at = None;
                    entry.state = State::Established;
                    established_now = true;
                    send_ack(&self.socket, &config, entry).await;
                }
                // Anything else in SynSent is a stray; the RTO path
                // retries the SYN.
            } else {
                if pkt.has(ACK) {
                    on_ack(&self.socket, &config, entry, &pkt).await;
                    if entry.state == State::SynRcvd && seq_lt(entry.iss, entry.snd_una) {
                        entry.state = State::Established;
                        established_now = true;
                    }
                }
                let should_ack = on_data(entry, &config, &pkt);
                if should_ack {
                    send_ack(&self.socket, &config, entry).await;
                }
                if entry.fully_closed() {
                    remove = true;
                }
            }
        }

        if established_now {
            self.on_established(id).await;
        }
        if remove {
            if let Some(entry) = self.streams.remove(&id) {
                trace!("udx stream {} fully closed", id);
                self.by_remote.remove(&(entry.remote, entry.remote_id));
            }
        }
    }

    /// Moves a freshly established stream into the hands of its owner.
    async fn on_established(&mut self, id: u32) {
        let mut reset = false;
        if let Some(entry) = self.streams.get_mut(&id) {
            trace!("udx stream {} established with {}", id, entry.remote);
            let handle = entry.pending_handle.take();
            let reply = entry.connect_reply.take();
            match (reply, handle) {
                (Some(reply), Some(handle)) => {
                    if reply.send(Ok(handle)).is_err() {
                        // The dialer went away (cancelled); abort the stream.
                        reset = true;
                    }
                }
                (Some(reply), None) => {
                    // The handle is gone; the dial cannot complete.
                    let _ = reply.send(Err(UdxError::Closed));
                    reset = true;
                }
                (None, Some(handle)) => match &self.accept_tx {
                    Some(tx) => {
                        if tx.unbounded_send(handle).is_err() {
                            reset = true;
                        }
                    }
                    None => reset = true,
                },
                (None, None) => {}
            }
        }
        if reset {
            self.reset_stream(id).await;
        }
    }

    async fn on_syn(&mut self, pkt: Packet, from: SocketAddr) {
        let key = (from, pkt.src);
        if let Some(&lid) = self.by_remote.get(&key) {
            // Duplicate SYN: idempotently re-answer.
            let config = self.config.clone();
            if let Some(entry) = self.streams.get_mut(&lid) {
                match entry.state {
                    State::SynRcvd => send_syn_ack(&self.socket, &config, entry).await,
                    _ => send_ack(&self.socket, &config, entry).await,
                }
            }
            return;
        }

        if self.closed || self.accept_tx.is_none() {
            let rst = Packet {
                flags: RST,
                src: 0,
                dst: pkt.src,
                seq: 0,
                ack: 0,
                window: 0,
                sacks: Vec::new(),
                payload: Bytes::new(),
            };
            send_datagram(&self.socket, from, &rst).await;
            return;
        }

        let lid = self.alloc_id();
        let iss = rand::random::<u32>() >> 1;
        let (in_tx, in_rx) = mpsc::unbounded();
        let handle = UdxStream::new(lid, self.cmd_tx.clone(), in_rx, self.local_addr, from);

        let mut entry = StreamEntry::new(&self.config, lid, from, State::SynRcvd, iss);
        entry.remote_id = pkt.src;
        entry.rcv_nxt = pkt.seq.wrapping_add(1);
        entry.peer_window = pkt.window;
        entry.incoming_tx = Some(in_tx);
        entry.pending_handle = Some(handle);
        entry.rto_at = Some(Instant::now() + entry.rtt.rto());

        let config = self.config.clone();
        send_syn_ack(&self.socket, &config, &mut entry).await;

        trace!("udx inbound stream {} from {} (their id {})", lid, from, pkt.src);
        self.by_remote.insert(key, lid);
        self.streams.insert(lid, entry);
    }

    async fn on_command(&mut self, cmd: SocketCommand) {
        let config = self.config.clone();
        match cmd {
            SocketCommand::Connect { remote, reply } => {
                if self.closed {
                    let _ = reply.send(Err(UdxError::Closed));
                    return;
                }
                let lid = self.alloc_id();
                let iss = rand::random::<u32>() >> 1;
                let (in_tx, in_rx) = mpsc::unbounded();
                let handle = UdxStream::new(lid, self.cmd_tx.clone(), in_rx, self.local_addr, remote);

                let mut entry = StreamEntry::new(&self.config, lid, remote, State::SynSent, iss);
                entry.incoming_tx = Some(in_tx);
                entry.pending_handle = Some(handle);
                entry.connect_reply = Some(reply);
                entry.rto_at = Some(Instant::now() + entry.rtt.rto());

                send_syn(&self.socket, &config, &mut entry).await;
                trace!("udx dialing {} as stream {}", remote, lid);
                self.streams.insert(lid, entry);
            }
            SocketCommand::Outgoing { id, data, reply } => {
                match self.streams.get_mut(&id) {
                    Some(entry) if !entry.local_fin_queued => {
                        entry.enqueue_data(data);
                        if entry.buffered() <= config.send_buffer {
                            let _ = reply.send(Ok(()));
                        } else {
                            // Admission control: the writer stays blocked
                            // until acks drain the buffer.
                            entry.write_waiters.push_back(reply);
                        }
                        pump_send(&self.socket, &config, entry).await;
                    }
                    Some(_) => {
                        let _ = reply.send(Err(UdxError::Closed));
                    }
                    None => {
                        let _ = reply.send(Err(UdxError::Closed));
                    }
                }
            }
            SocketCommand::Consumed { id, n } => {
                if let Some(entry) = self.streams.get_mut(&id) {
                    entry.delivered_unconsumed = entry.delivered_unconsumed.saturating_sub(n);
                    let free = entry.advertised_window(&config);
                    let reopened = (entry.last_advertised == 0 && free > 0)
                        || (entry.last_advertised < config.recv_buffer / 2 && free >= config.recv_buffer / 2);
                    if reopened {
                        send_ack(&self.socket, &config, entry).await;
                    }
                }
            }
            SocketCommand::Shutdown { id } => {
                let mut remove = false;
                if let Some(entry) = self.streams.get_mut(&id) {
                    if !entry.local_fin_queued {
                        entry.enqueue_fin();
                        pump_send(&self.socket, &config, entry).await;
                    }
                    remove = entry.fully_closed();
                }
                if remove {
                    if let Some(entry) = self.streams.remove(&id) {
                        self.by_remote.remove(&(entry.remote, entry.remote_id));
                    }
                }
            }
            SocketCommand::Reset { id } => {
                self.reset_stream(id).await;
            }
            SocketCommand::Close => {
                self.closed = true;
                self.accept_tx = None;
            }
        }
    }

    /// Aborts a stream locally: RST on the wire, everything resolved.
    async fn reset_stream(&mut self, id: u32) {
        if let Some(mut entry) = self.streams.remove(&id) {
            self.by_remote.remove(&(entry.remote, entry.remote_id));
            let rst = Packet {
                flags: RST,
                src: entry.local_id,
                dst: entry.remote_id,
                seq: entry.snd_nxt,
                ack: entry.rcv_nxt,
                window: 0,
                sacks: Vec::new(),
                payload: Bytes::new(),
            };
            send_datagram(&self.socket, entry.remote, &rst).await;
            entry.fail(UdxError::Closed);
        }
    }

    async fn on_timers(&mut self) {
        let now = Instant::now();
        let config = self.config.clone();
        let due: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, e)| e.rto_at.map(|at| at <= now).unwrap_or(false))
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            let mut failure = None;
            let mut give_up = false;
            {
                let entry = match self.streams.get_mut(&id) {
                    Some(entry) => entry,
                    None => continue,
                };
                match entry.state {
                    State::SynSent | State::SynRcvd => {
                        if entry.syn_retries >= config.syn_retries {
                            failure = Some(UdxError::ConnectionRefused);
                            give_up = true;
                        } else {
                            entry.syn_retries += 1;
                            entry.rtt.backoff();
                            entry.rto_at = Some(now + entry.rtt.rto());
                            if entry.state == State::SynSent {
                                send_syn(&self.socket, &config, entry).await;
                            } else {
                                send_syn_ack(&self.socket, &config, entry).await;
                            }
                        }
                    }
                    State::Established => {
                        if now.duration_since(entry.last_ack_rx) > config.dead_peer_timeout {
                            debug!("udx stream {}: peer stopped acking, giving up", id);
                            failure = Some(UdxError::ConnectionReset);
                            give_up = true;
                        } else if !entry.flight.is_empty() {
                            // Retransmission timeout: collapse the window.
                            entry.ssthresh = std::cmp::max(entry.flight_bytes / 2, 2 * MSS);
                            entry.cwnd = MSS;
                            entry.rtt.backoff();
                            entry.rto_at = Some(now + entry.rtt.rto());
                            retransmit_first(&self.socket, &config, entry).await;
                        } else if let Some(seg) = entry.send_queue.pop_front() {
                            // Window probe: push one segment past the
                            // window; the ack it provokes carries the
                            // peer's current window.
                            entry.queued_bytes -= seg.payload.len();
                            entry.flight_bytes += seg.payload.len();
                            entry.flight.push_back(seg);
                            let idx = entry.flight.len() - 1;
                            transmit_flight(&self.socket, &config, entry, idx, true).await;
                            entry.rtt.backoff();
                            entry.rto_at = Some(now + entry.rtt.rto());
                        } else {
                            entry.rto_at = None;
                        }
                    }
                }
            }
            if give_up {
                if let Some(mut entry) = self.streams.remove(&id) {
                    self.by_remote.remove(&(entry.remote, entry.remote_id));
                    entry.fail(failure.unwrap_or(UdxError::ConnectionReset));
                }
            }
        }
    }
}

/// Acknowledgement processing: cumulative ack, RTT sampling, congestion
/// window growth, fast retransmit and SACK marking.
async fn on_ack(socket: &UdpSocket, config: &UdxConfig, entry: &mut StreamEntry, pkt: &Packet) {
    let now = Instant::now();
    let prev_window = entry.peer_window;
    entry.peer_window = pkt.window;
    let ack = pkt.ack;

    if seq_lt(entry.snd_una, ack) && seq_le(ack, entry.snd_nxt) {
        let mut acked_bytes = 0usize;
        let mut newest_sample = None;
        loop {
            let fully_acked = match entry.flight.front() {
                Some(front) => seq_le(front.end(), ack),
                None => false,
            };
            if !fully_acked {
                break;
            }
            if let Some(seg) = entry.flight.pop_front() {
                acked_bytes += seg.payload.len();
                entry.flight_bytes -= seg.payload.len();
                if let Some(sent_at) = seg.sent_at {
                    newest_sample = Some(now.duration_since(sent_at));
                }
            }
        }
        entry.snd_una = ack;
        entry.dup_acks = 0;
        if let Some(sample) = newest_sample {
            entry.rtt.sample(sample);
        }
        if acked_bytes > 0 {
            if entry.cwnd < entry.ssthresh {
                // Slow start.
                entry.cwnd = std::cmp::min(entry.cwnd + acked_bytes, config.max_cwnd);
            } else {
                // Congestion avoidance, ~one MSS per RTT.
                entry.cwnd = std::cmp::min(entry.cwnd + std::cmp::max(MSS * MSS / entry.cwnd, 1), config.max_cwnd);
            }
        }
        entry.rto_at = if entry.flight.is_empty() && entry.send_queue.is_empty() {
            None
        } else {
            Some(now + entry.rtt.rto())
        };
        while entry.buffered() <= config.send_buffer {
            match entry.write_waiters.pop_front() {
                Some(tx) => {
                    let _ = tx.send(Ok(()));
                }
                None => break,
            }
        }
    } else if ack == entry.snd_una && !entry.flight.is_empty() && pkt.payload.is_empty() && pkt.window == prev_window {
        // Same ack, same window, nothing piggy-backed: a genuine
        // duplicate, not a window update.
        entry.dup_acks += 1;
        if entry.dup_acks == 3 {
            trace!("udx stream {}: fast retransmit at {}", entry.local_id, ack);
            entry.ssthresh = std::cmp::max(entry.flight_bytes / 2, 2 * MSS);
            entry.cwnd = std::cmp::min(entry.ssthresh + 3 * MSS, config.max_cwnd);
            retransmit_first(socket, config, entry).await;
            entry.rto_at = Some(now + entry.rtt.rto());
        }
    }

    if pkt.has(SACK) {
        for (start, end) in &pkt.sacks {
            for seg in entry.flight.iter_mut() {
                if seq_le(*start, seg.seq) && seq_le(seg.end(), *end) {
                    seg.sacked = true;
                }
            }
        }
    }

    pump_send(socket, config, entry).await;
}

/// Receive-path processing of payload, FIN and reordering. Returns whether
/// an acknowledgement should be sent.
fn on_data(entry: &mut StreamEntry, config: &UdxConfig, pkt: &Packet) -> bool {
    // SYN-bearing duplicates are re-acked so a lost establishing ack does
    // not strand the peer.
    let mut should_ack = pkt.has(FIN) || pkt.has(SYN) || !pkt.payload.is_empty();

    if !pkt.payload.is_empty() {
        let seq = pkt.seq;
        let len = pkt.payload.len() as u32;
        let end = seq.wrapping_add(len);

        if seq_le(end, entry.rcv_nxt) {
            // Entirely duplicate; the re-ack tells the sender.
        } else if seq_le(seq, entry.rcv_nxt) {
            let skip = entry.rcv_nxt.wrapping_sub(seq) as usize;
            entry.deliver(pkt.payload.slice(skip..));
            entry.rcv_nxt = end;
            entry.drain_reorder();
        } else {
            // A hole precedes this segment: park it, bounded by the
            // receive window. Anything beyond is dropped un-acked.
            let distance = seq.wrapping_sub(entry.rcv_nxt) as usize;
            let within = distance + len as usize <= config.recv_buffer as usize
                && entry.reorder_bytes + len as usize <= config.recv_buffer as usize;
            if within {
                if !entry.reorder.contains_key(&seq) {
                    entry.reorder_bytes += len as usize;
                    entry.reorder.insert(seq, pkt.payload.clone());
                }
            } else {
                should_ack = false;
            }
        }
    }

    if pkt.has(FIN) {
        entry.remote_fin = Some(pkt.seq.wrapping_add(pkt.payload.len() as u32));
    }
    entry.check_fin();
    should_ack
}

/// Moves segments from the send queue into flight as far as the
/// congestion window and the peer's receive window allow.
async fn pump_send(socket: &UdpSocket, config: &UdxConfig, entry: &mut StreamEntry) {
    if entry.state == State::SynSent || entry.state == State::SynRcvd {
        return;
    }
    loop {
        let payload_len = match entry.send_queue.front() {
            Some(seg) => seg.payload.len(),
            None => break,
        };
        if entry.flight_bytes + payload_len > entry.effective_send_window() && payload_len > 0 {
            break;
        }
        let seg = match entry.send_queue.pop_front() {
            Some(seg) => seg,
            None => break,
        };
        entry.queued_bytes -= seg.payload.len();
        entry.flight_bytes += seg.payload.len();
        entry.flight.push_back(seg);
        let idx = entry.flight.len() - 1;
        transmit_flight(socket, config, entry, idx, true).await;
    }
    if (!entry.flight.is_empty() || !entry.send_queue.is_empty()) && entry.rto_at.is_none() {
        entry.rto_at = Some(Instant::now() + entry.rtt.rto());
    }
}

/// (Re)transmits the flight segment at `idx`.
async fn transmit_flight(socket: &UdpSocket, config: &UdxConfig, entry: &mut StreamEntry, idx: usize, first: bool) {
    let window = entry.advertised_window(config);
    let (src, dst, ack, remote) = (entry.local_id, entry.remote_id, entry.rcv_nxt, entry.remote);
    let sacks = entry.sack_ranges();
    let seg = &mut entry.flight[idx];

    let mut flags = ACK;
    if !seg.payload.is_empty() {
        flags |= DATA;
    }
    if seg.syn {
        flags |= SYN;
    }
    if seg.fin {
        flags |= FIN;
    }
    if !sacks.is_empty() {
        flags |= SACK;
    }
    let pkt = Packet {
        flags,
        src,
        dst,
        seq: seg.seq,
        ack,
        window,
        sacks,
        payload: seg.payload.clone(),
    };
    seg.sent_at = if first { Some(Instant::now()) } else { None };
    entry.last_advertised = window;
    send_datagram(socket, remote, &pkt).await;
}

/// Retransmits the oldest segment not yet selectively acknowledged.
async fn retransmit_first(socket: &UdpSocket, config: &UdxConfig, entry: &mut StreamEntry) {
    if let Some(idx) = entry.flight.iter().position(|seg| !seg.sacked) {
        transmit_flight(socket, config, entry, idx, false).await;
    }
}

/// A bare acknowledgement, also the window-update and zero-window-probe
/// packet.
async fn send_ack(socket: &UdpSocket, config: &UdxConfig, entry: &mut StreamEntry) {
    let window = entry.advertised_window(config);
    let sacks = entry.sack_ranges();
    let mut flags = ACK;
    if !sacks.is_empty() {
        flags |= SACK;
    }
    let pkt = Packet {
        flags,
        src: entry.local_id,
        dst: entry.remote_id,
        seq: entry.snd_nxt,
        ack: entry.rcv_nxt,
        window,
        sacks,
        payload: Bytes::new(),
    };
    entry.last_advertised = window;
    send_datagram(socket, entry.remote, &pkt).await;
}

async fn send_syn(socket: &UdpSocket, config: &UdxConfig, entry: &mut StreamEntry) {
    let window = entry.advertised_window(config);
    let pkt = Packet {
        flags: SYN,
        src: entry.local_id,
        dst: 0,
        seq: entry.iss,
        ack: 0,
        window,
        sacks: Vec::new(),
        payload: Bytes::new(),
    };
    entry.last_advertised = window;
    send_datagram(socket, entry.remote, &pkt).await;
}

async fn send_syn_ack(socket: &UdpSocket, config: &UdxConfig, entry: &mut StreamEntry) {
    let window = entry.advertised_window(config);
    let pkt = Packet {
        flags: SYN | ACK,
        src: entry.local_id,
        dst: entry.remote_id,
        seq: entry.iss,
        ack: entry.rcv_nxt,
        window,
        sacks: Vec::new(),
        payload: Bytes::new(),
    };
    entry.last_advertised = window;
    send_datagram(socket, entry.remote, &pkt).await;
}

async fn send_datagram(socket: &UdpSocket, to: SocketAddr, pkt: &Packet) {
    if let Err(e) = socket.send_to(&pkt.encode(), to).await {
        trace!("udx send to {} failed: {}", to, e);
    }
}
