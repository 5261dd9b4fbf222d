// Copyright (c) 2018-2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0 or MIT license, at your option.
//
// A copy of the Apache License, Version 2.0 is included in the software as
// LICENSE-APACHE and a copy of the MIT license is included in the software
// as LICENSE-MIT. You may also obtain a copy of the Apache License, Version 2.0
// at https://www.apache.org/licenses/LICENSE-2.0 and a copy of the MIT license
// at https://opensource.org/licenses/MIT.

use crate::{
    chunks::Chunks,
    connection::{self, StreamCommand},
    frame::{
        header::{StreamId, WindowUpdate},
        Frame,
    },
    Config,
};
use bytes::Bytes;
use futures::channel::mpsc;
use futures::io::{AsyncRead, AsyncWrite};
use futures::ready;
use futures::SinkExt;
use log::trace;
use parking_lot::Mutex;
use std::{
    fmt, io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

/// The state of a yamux stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Open bidirectionally.
    Open,
    /// Open for incoming messages.
    SendClosed,
    /// Open for outgoing messages.
    RecvClosed,
    /// Closed (terminal state).
    Closed,
}

impl State {
    /// Can we receive messages over this stream?
    pub fn can_read(self) -> bool {
        !matches!(self, State::RecvClosed | State::Closed)
    }

    /// Can we send messages over this stream?
    pub fn can_write(self) -> bool {
        !matches!(self, State::SendClosed | State::Closed)
    }
}

/// Indicate if a flag still needs to be set on an outbound header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Flag {
    /// No flag needs to be set.
    None,
    /// The stream was opened lazily, so set the initial SYN flag.
    Syn,
    /// The stream still needs acknowledgement, so set the ACK flag.
    Ack,
}

/// A multiplexed yamux stream.
///
/// Streams are created either outbound via [`crate::Control::open_stream`]
/// or inbound via [`crate::Control::accept_stream`].
///
/// `Stream` implements [`AsyncRead`] and [`AsyncWrite`]; writes block once
/// the peer's receive window is exhausted and resume when a window update
/// arrives.
pub struct Stream {
    id: StreamId,
    conn: connection::Id,
    config: Arc<Config>,
    sender: mpsc::Sender<StreamCommand>,
    pending: Option<Frame<WindowUpdate>>,
    flag: Flag,
    shared: Arc<Mutex<Shared>>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id.val())
            .field("connection", &self.conn)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Stream {}/{})", self.conn, self.id.val())
    }
}

impl Clone for Stream {
    fn clone(&self) -> Self {
        Stream {
            id: self.id,
            conn: self.conn,
            config: self.config.clone(),
            sender: self.sender.clone(),
            pending: None,
            flag: Flag::None,
            shared: self.shared.clone(),
        }
    }
}

impl Stream {
    pub(crate) fn new(
        id: StreamId,
        conn: connection::Id,
        config: Arc<Config>,
        sender: mpsc::Sender<StreamCommand>,
        shared: Arc<Mutex<Shared>>,
    ) -> Self {
        Stream {
            id,
            conn,
            config,
            sender,
            pending: None,
            flag: Flag::None,
            shared,
        }
    }

    /// The stream id assigned by the muxer.
    pub fn id(&self) -> u32 {
        self.id.val()
    }

    /// The current state of this stream.
    pub fn state(&self) -> State {
        self.shared.lock().state
    }

    pub(crate) fn set_flag(&mut self, flag: Flag) {
        self.flag = flag
    }

    /// Aborts the stream: the remote observes a RST and both directions
    /// stop immediately. The session remains usable.
    pub async fn reset(&mut self) -> io::Result<()> {
        {
            let mut shared = self.shared.lock();
            shared.update_state(State::Closed);
            shared.reset = true;
            shared.wake_all();
        }
        self.sender
            .send(StreamCommand::ResetStream { id: self.id })
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionReset))
    }

    /// Applies and clears the deferred SYN/ACK flag.
    fn add_flag(&mut self, header: &mut crate::frame::header::Header<crate::frame::header::Data>) {
        match self.flag {
            Flag::None => {}
            Flag::Syn => {
                header.syn();
                self.flag = Flag::None;
            }
            Flag::Ack => {
                header.ack();
                self.flag = Flag::None;
            }
        }
    }

    /// Tries to send a previously generated window update frame.
    fn flush_pending(&mut self, cx: &mut Context<'_>) {
        if self.pending.is_none() {
            return;
        }
        if self.sender.poll_ready(cx).is_ready() {
            if let Some(frame) = self.pending.take() {
                let _ = self.sender.start_send(StreamCommand::SendFrame(frame.cast()));
            }
        }
    }

    /// After consuming bytes, decide whether to grant the remote new
    /// window credit. Credit is granted once the unconsumed backlog drops
    /// to half of the configured receive window.
    fn maybe_grant_credit(&mut self, cx: &mut Context<'_>) {
        if self.pending.is_some() {
            self.flush_pending(cx);
            return;
        }
        let max = self.config.receive_window;
        let mut shared = self.shared.lock();
        if !shared.state.can_read() {
            return;
        }
        let backlog = shared.buffer.len() as u32;
        if shared.window <= max / 2 && backlog <= max / 2 {
            let delta = max - shared.window - backlog;
            if delta > 0 {
                shared.window += delta;
                drop(shared);
                trace!("{}: granting {} bytes of window credit", self, delta);
                self.pending = Some(Frame::window_update(self.id, delta));
                self.flush_pending(cx);
            }
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        self.flush_pending(cx);

        let n = {
            let mut shared = self.shared.lock();
            if !shared.buffer.is_empty() {
                shared.buffer.read_into(buf)
            } else {
                if shared.reset {
                    return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()));
                }
                if !shared.state.can_read() {
                    // EOF after a clean half-close.
                    return Poll::Ready(Ok(0));
                }
                shared.reader = Some(cx.waker().clone());
                return Poll::Pending;
            }
        };

        self.maybe_grant_credit(cx);
        Poll::Ready(Ok(n))
    }
}

impl AsyncWrite for Stream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.flush_pending(cx);
        ready!(self.sender.poll_ready(cx)).map_err(|_| io::Error::from(io::ErrorKind::ConnectionReset))?;

        let n = {
            let mut shared = self.shared.lock();
            if shared.reset {
                return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()));
            }
            if !shared.state.can_write() {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            if shared.credit == 0 {
                // Receive window of the peer is exhausted: block until a
                // window update arrives.
                shared.writer = Some(cx.waker().clone());
                return Poll::Pending;
            }
            let n = std::cmp::min(shared.credit as usize, buf.len());
            let n = std::cmp::min(n, self.config.max_message_size);
            shared.credit -= n as u32;
            n
        };

        let mut frame = Frame::data(self.id, Bytes::copy_from_slice(&buf[..n]));
        self.add_flag(frame.header_mut());
        self.sender
            .start_send(StreamCommand::SendFrame(frame.cast()))
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionReset))?;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.sender
            .poll_flush_unpin(cx)
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionReset))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.sender.poll_ready(cx)).map_err(|_| io::Error::from(io::ErrorKind::ConnectionReset))?;

        let ack = if self.flag == Flag::Ack {
            self.flag = Flag::None;
            true
        } else {
            false
        };

        {
            let mut shared = self.shared.lock();
            if !shared.state.can_write() {
                // Already half-closed locally; nothing more to send.
                return Poll::Ready(Ok(()));
            }
            let next = match shared.state {
                State::Open => State::SendClosed,
                State::RecvClosed => State::Closed,
                state => state,
            };
            shared.update_state(next);
        }

        let id = self.id;
        self.sender
            .start_send(StreamCommand::CloseStream { id, ack })
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionReset))?;
        Poll::Ready(Ok(()))
    }
}

/// The state of a stream shared between its handle and the connection.
pub(crate) struct Shared {
    pub(crate) state: State,
    /// Remaining credit we have granted to the remote.
    pub(crate) window: u32,
    /// Remaining credit the remote has granted to us.
    pub(crate) credit: u32,
    /// Received bytes not yet consumed by the stream handle.
    pub(crate) buffer: Chunks,
    /// Set when the stream was torn down by a RST, ours or theirs.
    pub(crate) reset: bool,
    pub(crate) reader: Option<Waker>,
    pub(crate) writer: Option<Waker>,
}

impl Shared {
    pub(crate) fn new(window: u32, credit: u32) -> Self {
        Shared {
            state: State::Open,
            window,
            credit,
            buffer: Chunks::new(),
            reset: false,
            reader: None,
            writer: None,
        }
    }

    /// Advances the stream state. Transitions are monotonic: a closed
    /// stream never reopens, a half-close never reverts.
    pub(crate) fn update_state(&mut self, next: State) -> State {
        use self::State::*;
        let current = self.state;
        match (current, next) {
            (Closed, _) => {}
            (Open, _) => self.state = next,
            (SendClosed, RecvClosed) | (SendClosed, Closed) => self.state = Closed,
            (RecvClosed, SendClosed) | (RecvClosed, Closed) => self.state = Closed,
            (SendClosed, Open) | (SendClosed, SendClosed) => {}
            (RecvClosed, Open) | (RecvClosed, RecvClosed) => {}
        }
        current
    }

    pub(crate) fn wake_reader(&mut self) {
        if let Some(waker) = self.reader.take() {
            waker.wake();
        }
    }

    pub(crate) fn wake_writer(&mut self) {
        if let Some(waker) = self.writer.take() {
            waker.wake();
        }
    }

    pub(crate) fn wake_all(&mut self) {
        self.wake_reader();
        self.wake_writer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_are_monotonic() {
        let mut shared = Shared::new(256 * 1024, 256 * 1024);
        assert_eq!(shared.state, State::Open);
        shared.update_state(State::SendClosed);
        assert_eq!(shared.state, State::SendClosed);
        shared.update_state(State::RecvClosed);
        assert_eq!(shared.state, State::Closed);
        shared.update_state(State::Open);
        assert_eq!(shared.state, State::Closed);
    }
}
