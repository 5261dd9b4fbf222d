// Copyright (c) 2018-2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0 or MIT license, at your option.
//
// A copy of the Apache License, Version 2.0 is included in the software as
// LICENSE-APACHE and a copy of the MIT license is included in the software
// as LICENSE-MIT. You may also obtain a copy of the Apache License, Version 2.0
// at https://www.apache.org/licenses/LICENSE-2.0 and a copy of the MIT license
// at https://opensource.org/licenses/MIT.

//! The yamux session state machine.
//!
//! A [`Connection`] is an actor driven by repeatedly awaiting
//! [`Connection::next_stream`]. One iteration handles exactly one event:
//! a frame from the remote, a command from a stream handle, a command from
//! a [`Control`] handle, or a keepalive timer tick. All outbound frames are
//! written here and nowhere else, which keeps the wire framing intact
//! without further locking.
//!
//! The socket's read half is owned by a dedicated task that forwards whole
//! decoded frames over a channel; cancelling a channel read (as the event
//! loop's select does all the time) never tears a frame apart.

pub mod control;
pub mod stream;

use crate::error::ConnectionError;
use crate::frame::header::{Data, GoAwayCode, Ping, StreamId, Tag, WindowUpdate, ACK, FIN, RST, SYN};
use crate::frame::io::{FrameDecodeError, FrameReader, FrameWriter};
use crate::frame::Frame;
use crate::{Config, WindowUpdateMode, DEFAULT_CREDIT};
use async_std::task;
use control::Control;
use fnv::FnvHashMap;
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, SinkExt, StreamExt};
use futures_timer::Delay;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stream::{Flag, Shared, State, Stream};
use up2p_traits::{ReadEx, SplitEx, SplittableReadWrite};

/// How many decoded inbound frames may be buffered between the reader task
/// and the event loop.
const FRAME_CHANNEL_CAPACITY: usize = 32;

/// How many commands the stream handles of a session may buffer.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// An identifier of a session, for logging.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Id(u32);

impl Id {
    fn random() -> Self {
        Id(rand::random())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection {:08x}", self.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Whether this endpoint dialed or accepted the underlying connection;
/// decides stream id parity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Dialer of the underlying connection: odd stream ids.
    Client,
    /// Listener of the underlying connection: even stream ids.
    Server,
}

/// Commands sent by stream handles to the event loop.
pub(crate) enum StreamCommand {
    /// Write a frame to the wire.
    SendFrame(Frame<()>),
    /// Write a FIN frame, half-closing the stream.
    CloseStream { id: StreamId, ack: bool },
    /// Write a RST frame, aborting the stream.
    ResetStream { id: StreamId },
}

/// Commands sent by [`Control`] handles to the event loop.
pub(crate) enum ControlCommand {
    OpenStream(oneshot::Sender<Result<Stream, ConnectionError>>),
    AcceptStream(oneshot::Sender<Result<Stream, ConnectionError>>),
    CloseConnection(oneshot::Sender<()>),
}

/// The outcome of one round of the event-loop select.
enum Action {
    Frame(Option<Result<Frame<()>, FrameDecodeError>>),
    Stream(Option<StreamCommand>),
    Control(Option<ControlCommand>),
    Timer,
}

/// A yamux session over a full-duplex byte-stream.
pub struct Connection<C: SplitEx> {
    id: Id,
    mode: Mode,
    config: Arc<Config>,
    writer: FrameWriter<C::Writer>,
    frame_receiver: mpsc::Receiver<Result<Frame<()>, FrameDecodeError>>,
    stream_sender: mpsc::Sender<StreamCommand>,
    stream_receiver: mpsc::Receiver<StreamCommand>,
    control_sender: mpsc::Sender<ControlCommand>,
    control_receiver: mpsc::Receiver<ControlCommand>,
    streams: FnvHashMap<u32, Arc<Mutex<Shared>>>,
    pending_inbound: VecDeque<Stream>,
    pending_accepts: VecDeque<oneshot::Sender<Result<Stream, ConnectionError>>>,
    next_id: u32,
    local_goaway: bool,
    remote_goaway: bool,
    is_closed: bool,
    next_ping_at: Option<Instant>,
    outstanding_ping: Option<(u32, Instant)>,
    next_ping_nonce: u32,
}

impl<C: SplittableReadWrite> Connection<C> {
    /// Creates a new session over `io` and spawns its reader task.
    pub fn new(io: C, config: Config, mode: Mode) -> Self {
        let id = Id::random();
        let config = Arc::new(config);
        let (reader, writer) = io.split();
        let reader = FrameReader::new(reader, config.receive_window as usize);

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        task::spawn(read_loop(id, reader, frame_tx));

        let (stream_sender, stream_receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (control_sender, control_receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        debug!("{:?}: new {:?} session", id, mode);

        Connection {
            id,
            mode,
            next_ping_at: config.keepalive_interval.map(|d| Instant::now() + d),
            config,
            writer: FrameWriter::new(writer),
            frame_receiver: frame_rx,
            stream_sender,
            stream_receiver,
            control_sender,
            control_receiver,
            streams: FnvHashMap::default(),
            pending_inbound: VecDeque::new(),
            pending_accepts: VecDeque::new(),
            next_id: match mode {
                Mode::Client => 1,
                Mode::Server => 2,
            },
            local_goaway: false,
            remote_goaway: false,
            is_closed: false,
            outstanding_ping: None,
            next_ping_nonce: 0,
        }
    }

    /// The session identifier, for logging.
    pub fn id(&self) -> Id {
        self.id
    }

    /// A new handle to control this session.
    pub fn control(&self) -> Control {
        Control::new(self.control_sender.clone())
    }

    /// Drives the session one event forward. The caller is expected to loop
    /// over this until it returns an error.
    pub async fn next_stream(&mut self) -> Result<(), ConnectionError> {
        if self.is_closed {
            return Err(ConnectionError::Closed);
        }
        match self.next().await {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("{:?}: session error: {}", self.id, e);
                self.terminate();
                Err(e)
            }
        }
    }

    async fn next(&mut self) -> Result<(), ConnectionError> {
        let timeout = self.next_timer_timeout();
        let action = {
            let mut timer = Delay::new(timeout).fuse();
            futures::select! {
                frame = self.frame_receiver.next() => Action::Frame(frame),
                cmd = self.stream_receiver.next() => Action::Stream(cmd),
                cmd = self.control_receiver.next() => Action::Control(cmd),
                _ = timer => Action::Timer,
            }
        };
        match action {
            Action::Frame(Some(Ok(frame))) => self.on_frame(frame).await,
            Action::Frame(Some(Err(e))) => Err(e.into()),
            Action::Frame(None) => Err(ConnectionError::Closed),
            Action::Stream(Some(cmd)) => self.on_stream_command(cmd).await,
            Action::Stream(None) => Ok(()),
            Action::Control(Some(cmd)) => self.on_control_command(cmd).await,
            Action::Control(None) => Ok(()),
            Action::Timer => self.on_timer().await,
        }
    }

    fn next_timer_timeout(&self) -> Duration {
        let now = Instant::now();
        let mut deadline = None;
        if let Some(at) = self.next_ping_at {
            deadline = Some(at);
        }
        if let Some((_, at)) = self.outstanding_ping {
            deadline = Some(deadline.map_or(at, |d: Instant| d.min(at)));
        }
        match deadline {
            Some(at) => at.saturating_duration_since(now),
            // No keepalive configured; only wake for real events.
            None => Duration::from_secs(3600),
        }
    }

    async fn on_timer(&mut self) -> Result<(), ConnectionError> {
        let now = Instant::now();
        if let Some((nonce, deadline)) = self.outstanding_ping {
            if now >= deadline {
                debug!("{:?}: keepalive ping {} went unanswered", self.id, nonce);
                return Err(ConnectionError::Timeout);
            }
        }
        if let (Some(at), Some(interval)) = (self.next_ping_at, self.config.keepalive_interval) {
            if now >= at {
                self.next_ping_at = Some(now + interval);
                if self.outstanding_ping.is_none() {
                    let nonce = self.next_ping_nonce;
                    self.next_ping_nonce = self.next_ping_nonce.wrapping_add(1);
                    let mut frame = Frame::ping(nonce);
                    frame.header_mut().syn();
                    trace!("{:?}: sending keepalive ping {}", self.id, nonce);
                    self.writer.send_frame(&frame).await?;
                    self.outstanding_ping = Some((nonce, now + self.config.ping_timeout));
                }
            }
        }
        Ok(())
    }

    async fn on_frame(&mut self, frame: Frame<()>) -> Result<(), ConnectionError> {
        match frame.header().tag() {
            Tag::Data => self.on_data(frame.cast()).await,
            Tag::WindowUpdate => self.on_window_update(frame.cast()).await,
            Tag::Ping => self.on_ping(frame.cast()).await,
            Tag::GoAway => {
                let code = frame.header().len();
                debug!("{:?}: remote sent go-away (code {})", self.id, code);
                self.remote_goaway = true;
                Ok(())
            }
        }
    }

    async fn on_data(&mut self, frame: Frame<Data>) -> Result<(), ConnectionError> {
        let id = frame.header().stream_id();
        let flags = frame.header().flags();

        if id.is_session() {
            self.writer.send_frame(&Frame::go_away(GoAwayCode::ProtocolError)).await?;
            return Err(ConnectionError::ProtocolViolation("data frame for the session id"));
        }

        if flags.contains(RST) {
            self.reset_remote(id);
            return Ok(());
        }

        if flags.contains(SYN) && !self.on_inbound_syn(id, DEFAULT_CREDIT).await? {
            return Ok(());
        }

        let mut reply = None;
        let mut kill = false;
        let mut violation = false;
        if let Some(shared) = self.streams.get(&id.val()) {
            let mut s = shared.lock();
            let len = frame.body().len() as u32;
            if len > s.window {
                violation = true;
            } else if s.buffer.len() + len as usize > self.config.max_buffer_size {
                // The consumer is too slow; kill the stream, not the session.
                debug!("{:?}/{}: buffer limit exceeded, resetting stream", self.id, id);
                s.update_state(State::Closed);
                s.reset = true;
                s.wake_all();
                kill = true;
            } else {
                s.window -= len;
                if flags.contains(FIN) {
                    s.update_state(State::RecvClosed);
                }
                s.buffer.push(frame.into_body());
                s.wake_reader();
                if self.config.window_update_mode == WindowUpdateMode::OnReceive && len > 0 {
                    s.window += len;
                    reply = Some(Frame::window_update(id, len));
                }
            }
        } else {
            trace!("{:?}/{}: data frame for unknown stream, dropping", self.id, id);
        }

        if violation {
            self.writer.send_frame(&Frame::go_away(GoAwayCode::ProtocolError)).await?;
            return Err(ConnectionError::ProtocolViolation("data exceeds the advertised window"));
        }
        if kill {
            self.streams.remove(&id.val());
            self.writer.send_frame(&Frame::reset_stream(id)).await?;
        }
        if let Some(frame) = reply {
            self.writer.send_frame(&frame).await?;
        }
        Ok(())
    }

    async fn on_window_update(&mut self, frame: Frame<WindowUpdate>) -> Result<(), ConnectionError> {
        let id = frame.header().stream_id();
        let flags = frame.header().flags();

        if flags.contains(RST) {
            self.reset_remote(id);
            return Ok(());
        }

        if flags.contains(SYN) {
            self.on_inbound_syn(id, DEFAULT_CREDIT.saturating_add(frame.header().len())).await?;
            return Ok(());
        }

        if let Some(shared) = self.streams.get(&id.val()) {
            let mut s = shared.lock();
            // A window update of zero is a no-op.
            s.credit = s.credit.saturating_add(frame.header().len());
            if flags.contains(FIN) {
                s.update_state(State::RecvClosed);
                s.wake_reader();
            }
            s.wake_writer();
        } else {
            trace!("{:?}/{}: window update for unknown stream, dropping", self.id, id);
        }
        Ok(())
    }

    async fn on_ping(&mut self, frame: Frame<Ping>) -> Result<(), ConnectionError> {
        let flags = frame.header().flags();
        let nonce = frame.header().len();
        if flags.contains(ACK) {
            if let Some((expected, _)) = self.outstanding_ping {
                if expected == nonce {
                    trace!("{:?}: keepalive ping {} answered", self.id, nonce);
                    self.outstanding_ping = None;
                }
            }
            return Ok(());
        }
        // Echo the opaque token back.
        let mut pong = Frame::ping(nonce);
        pong.header_mut().ack();
        self.writer.send_frame(&pong).await?;
        Ok(())
    }

    /// Handles a SYN for stream `id`. Returns `Ok(true)` if the stream was
    /// created and regular frame processing should continue.
    async fn on_inbound_syn(&mut self, id: StreamId, credit: u32) -> Result<bool, ConnectionError> {
        if !self.is_valid_remote_id(id) {
            self.writer.send_frame(&Frame::go_away(GoAwayCode::ProtocolError)).await?;
            return Err(ConnectionError::ProtocolViolation("invalid stream id parity"));
        }
        if self.streams.contains_key(&id.val()) {
            self.writer.send_frame(&Frame::go_away(GoAwayCode::ProtocolError)).await?;
            return Err(ConnectionError::ProtocolViolation("SYN for an existing stream id"));
        }
        if self.local_goaway {
            trace!("{:?}/{}: inbound stream after local go-away, resetting", self.id, id);
            self.writer.send_frame(&Frame::reset_stream(id)).await?;
            return Ok(false);
        }
        if self.streams.len() >= self.config.max_num_streams {
            debug!("{:?}: maximum number of streams reached", self.id);
            self.writer.send_frame(&Frame::reset_stream(id)).await?;
            return Ok(false);
        }
        let stream = self.make_stream(id, credit, Flag::Ack);
        trace!("{:?}/{}: new inbound stream", self.id, id);
        self.deliver_inbound(stream);
        Ok(true)
    }

    async fn on_stream_command(&mut self, cmd: StreamCommand) -> Result<(), ConnectionError> {
        match cmd {
            StreamCommand::SendFrame(frame) => self.writer.send_frame(&frame).await?,
            StreamCommand::CloseStream { id, ack } => {
                self.writer.send_frame(&Frame::close_stream(id, ack)).await?;
                self.garbage_collect(id);
            }
            StreamCommand::ResetStream { id } => {
                self.writer.send_frame(&Frame::reset_stream(id)).await?;
                self.streams.remove(&id.val());
            }
        }
        Ok(())
    }

    async fn on_control_command(&mut self, cmd: ControlCommand) -> Result<(), ConnectionError> {
        match cmd {
            ControlCommand::OpenStream(reply) => self.on_open_stream(reply).await,
            ControlCommand::AcceptStream(reply) => {
                if self.is_closed {
                    let _ = reply.send(Err(ConnectionError::Closed));
                } else if let Some(stream) = self.pending_inbound.pop_front() {
                    let _ = reply.send(Ok(stream));
                } else {
                    self.pending_accepts.push_back(reply);
                }
                Ok(())
            }
            ControlCommand::CloseConnection(reply) => {
                self.close_gracefully().await;
                let _ = reply.send(());
                Ok(())
            }
        }
    }

    async fn on_open_stream(
        &mut self,
        reply: oneshot::Sender<Result<Stream, ConnectionError>>,
    ) -> Result<(), ConnectionError> {
        if self.is_closed || self.local_goaway || self.remote_goaway {
            let _ = reply.send(Err(ConnectionError::Closed));
            return Ok(());
        }
        if self.streams.len() >= self.config.max_num_streams {
            let _ = reply.send(Err(ConnectionError::TooManyStreams));
            return Ok(());
        }
        let id = match self.next_id.checked_add(2) {
            Some(next) => {
                let id = StreamId::new(self.next_id);
                self.next_id = next;
                id
            }
            None => {
                let _ = reply.send(Err(ConnectionError::NoMoreStreamIds));
                return Ok(());
            }
        };

        let flag = if self.config.lazy_open { Flag::Syn } else { Flag::None };
        let stream = self.make_stream(id, DEFAULT_CREDIT, flag);

        if !self.config.lazy_open {
            // Announce the stream, advertising any extra receive window
            // beyond the protocol default.
            let mut frame = Frame::window_update(id, self.config.receive_window - DEFAULT_CREDIT);
            frame.header_mut().syn();
            if let Err(e) = self.writer.send_frame(&frame).await {
                let _ = reply.send(Err(ConnectionError::Closed));
                return Err(e.into());
            }
        }

        trace!("{:?}/{}: new outbound stream", self.id, id);
        let _ = reply.send(Ok(stream));
        Ok(())
    }

    async fn close_gracefully(&mut self) {
        debug!("{:?}: closing session", self.id);
        self.local_goaway = true;
        let _ = self.writer.send_frame(&Frame::go_away(GoAwayCode::Normal)).await;
        for shared in self.streams.values() {
            let mut s = shared.lock();
            s.update_state(State::Closed);
            if !self.config.read_after_close {
                s.buffer.clear();
            }
            s.wake_all();
        }
        self.streams.clear();
        self.pending_inbound.clear();
        for tx in self.pending_accepts.drain(..) {
            let _ = tx.send(Err(ConnectionError::Closed));
        }
        let _ = self.writer.close().await;
        self.is_closed = true;
    }

    /// Abnormal teardown: every stream observes a reset.
    fn terminate(&mut self) {
        for shared in self.streams.values() {
            let mut s = shared.lock();
            s.update_state(State::Closed);
            s.reset = true;
            s.wake_all();
        }
        self.streams.clear();
        self.pending_inbound.clear();
        for tx in self.pending_accepts.drain(..) {
            let _ = tx.send(Err(ConnectionError::Closed));
        }
        self.is_closed = true;
    }

    fn reset_remote(&mut self, id: StreamId) {
        if let Some(shared) = self.streams.remove(&id.val()) {
            trace!("{:?}/{}: stream reset by remote", self.id, id);
            let mut s = shared.lock();
            s.update_state(State::Closed);
            s.reset = true;
            s.wake_all();
        }
    }

    /// Removes the book-keeping of fully closed streams.
    fn garbage_collect(&mut self, id: StreamId) {
        let closed = self
            .streams
            .get(&id.val())
            .map(|shared| shared.lock().state == State::Closed)
            .unwrap_or(false);
        if closed {
            self.streams.remove(&id.val());
        }
    }

    fn make_stream(&mut self, id: StreamId, credit: u32, flag: Flag) -> Stream {
        let shared = Arc::new(Mutex::new(Shared::new(self.config.receive_window, credit)));
        self.streams.insert(id.val(), shared.clone());
        let mut stream = Stream::new(id, self.id, self.config.clone(), self.stream_sender.clone(), shared);
        stream.set_flag(flag);
        stream
    }

    fn deliver_inbound(&mut self, mut stream: Stream) {
        while let Some(tx) = self.pending_accepts.pop_front() {
            match tx.send(Ok(stream)) {
                Ok(()) => return,
                // The acceptor went away; try the next one.
                Err(Ok(returned)) => stream = returned,
                // We only ever send Ok; nothing to recover here.
                Err(Err(_)) => return,
            }
        }
        self.pending_inbound.push_back(stream);
    }

    fn is_valid_remote_id(&self, id: StreamId) -> bool {
        match self.mode {
            Mode::Client => id.is_server(),
            Mode::Server => id.is_client(),
        }
    }
}

impl<C: SplitEx> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("streams", &self.streams.len())
            .finish()
    }
}

/// The dedicated reader: decodes frames off the socket and forwards them.
async fn read_loop<R: ReadEx + Unpin + Send>(
    id: Id,
    mut reader: FrameReader<R>,
    mut tx: mpsc::Sender<Result<Frame<()>, FrameDecodeError>>,
) {
    loop {
        let res = reader.recv_frame().await;
        let done = res.is_err();
        if tx.send(res).await.is_err() {
            break;
        }
        if done {
            break;
        }
    }
    trace!("{:?}: reader task exiting", id);
}
