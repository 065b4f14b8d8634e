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

//! The Yamux session: one task owning the socket, every stream talking to
//! it through channels.
//!
//! A single event loop multiplexes four sources: frames off the socket,
//! frame-send commands from streams, control commands (open, accept,
//! close) and the keepalive timer. All outbound frames funnel through the
//! loop, so header and body of one frame never interleave with another
//! stream's bytes.

pub mod control;
pub mod stream;

use crate::error::ConnectionError;
use crate::frame::{self, Frame, FrameDecodeError, FrameIo, StreamId, Tag};
use crate::Config;
use control::Control;
use futures::channel::{mpsc, oneshot};
use futures::future::BoxFuture;
use futures::prelude::*;
use futures::stream::{BoxStream, Fuse};
use futures_timer::Delay;
use log::{debug, info, trace};
use peerlink_traits::SplitEx;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use std::{fmt, io};
use stream::{State, Stream};

/// How the connection side was established.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// The side that dialed; allocates odd stream ids.
    Client,
    /// The side that accepted; allocates even stream ids.
    Server,
}

/// Random connection id for log correlation.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Id(u32);

impl Id {
    pub(crate) fn random() -> Self {
        Id(rand::random())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

pub(crate) enum StreamCommand {
    /// Emit a frame on behalf of a stream.
    SendFrame(Frame),
    /// Send FIN for the stream.
    CloseStream { id: StreamId },
    /// Send RST for the stream.
    ResetStream { id: StreamId },
}

pub(crate) enum ControlCommand {
    OpenStream(oneshot::Sender<Result<Stream, ConnectionError>>),
    AcceptStream(oneshot::Sender<Result<Stream, ConnectionError>>),
    CloseConnection(oneshot::Sender<()>),
}

enum Event {
    Frame(Option<Result<Frame, FrameDecodeError>>),
    StreamCommand(Option<StreamCommand>),
    Control(Option<ControlCommand>),
    PingTime,
    PongDeadline,
}

/// A Yamux session over a split duplex socket.
pub struct Connection<C: SplitEx> {
    id: Id,
    mode: Mode,
    config: Arc<Config>,
    frames: Fuse<BoxStream<'static, Result<Frame, FrameDecodeError>>>,
    writer: FrameIo<C::Writer>,
    next_stream_id: u32,
    last_remote_id: u32,
    streams: HashMap<u32, Stream>,
    stream_sender: mpsc::Sender<StreamCommand>,
    stream_receiver: mpsc::Receiver<StreamCommand>,
    control_sender: mpsc::Sender<ControlCommand>,
    control_receiver: mpsc::Receiver<ControlCommand>,
    waiting_accept: VecDeque<oneshot::Sender<Result<Stream, ConnectionError>>>,
    pending_inbound: VecDeque<Stream>,
    pending_pong: Option<u32>,
    next_ping_nonce: u32,
    local_closing: bool,
    remote_goaway: bool,
    is_closed: bool,
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

impl<C: SplitEx> Connection<C> {
    pub fn new(socket: C, config: Config, mode: Mode) -> Self {
        let id = Id::random();
        let config = Arc::new(config);
        let (reader, writer) = socket.split();

        // The frame reader keeps its partial-read state across loop
        // iterations, so dropping an unresolved poll loses no bytes. The
        // stream ends when the remote closes between frames.
        let max_body = config.receive_window as usize;
        let frames = futures::stream::unfold(FrameIo::new(id, reader, max_body), |mut io| async move {
            match io.recv_frame().await {
                Ok(None) => None,
                Ok(Some(frame)) => Some((Ok(frame), io)),
                Err(e) => Some((Err(e), io)),
            }
        })
        .boxed()
        .fuse();

        let (stream_sender, stream_receiver) = mpsc::channel(32);
        let (control_sender, control_receiver) = mpsc::channel(8);

        debug!("{}: new connection: {:?}", id, mode);
        Connection {
            id,
            mode,
            config: config.clone(),
            frames,
            writer: FrameIo::new(id, writer, usize::max_value()),
            next_stream_id: match mode {
                Mode::Client => 1,
                Mode::Server => 2,
            },
            last_remote_id: 0,
            streams: HashMap::new(),
            stream_sender,
            stream_receiver,
            control_sender,
            control_receiver,
            waiting_accept: VecDeque::new(),
            pending_inbound: VecDeque::new(),
            pending_pong: None,
            next_ping_nonce: 0,
            local_closing: false,
            remote_goaway: false,
            is_closed: false,
        }
    }

    /// The connection id, for log correlation.
    pub fn id(&self) -> Id {
        self.id
    }

    /// A handle for opening and accepting streams from other tasks.
    pub fn control(&self) -> Control {
        Control::new(self.control_sender.clone())
    }

    /// Drives the session until it closes or fails.
    ///
    /// Must be polled continuously; every stream and control operation
    /// depends on this loop making progress.
    pub async fn run(&mut self) -> Result<(), ConnectionError> {
        if self.is_closed {
            return Err(ConnectionError::Closed);
        }
        let result = self.event_loop().await;
        if let Err(e) = &result {
            debug!("{}: connection failed: {}", self.id, e);
            if let ConnectionError::Protocol(_) = e {
                // Best effort: tell the offender why the session dies.
                let _ = self.send_frame(Frame::go_away(frame::GO_AWAY_PROTOCOL_ERROR)).await;
            }
        }
        self.terminate().await;
        result
    }

    async fn event_loop(&mut self) -> Result<(), ConnectionError> {
        let mut keepalive = sleep_or_pending(self.config.keepalive_interval);
        let mut pong_deadline = sleep_or_pending(None);

        loop {
            let event = futures::select! {
                frame = self.frames.next() => Event::Frame(frame),
                command = self.stream_receiver.next() => Event::StreamCommand(command),
                command = self.control_receiver.next() => Event::Control(command),
                _ = keepalive => Event::PingTime,
                _ = pong_deadline => Event::PongDeadline,
            };

            match event {
                Event::Frame(Some(Ok(frame))) => self.on_frame(frame).await?,
                Event::Frame(Some(Err(e))) => return Err(e.into()),
                // End of stream: the remote is gone.
                Event::Frame(None) => return Ok(()),
                Event::StreamCommand(Some(command)) => self.on_stream_command(command).await?,
                Event::StreamCommand(None) => {}
                Event::Control(Some(ControlCommand::CloseConnection(reply))) => {
                    self.on_close(reply).await?;
                    return Ok(());
                }
                Event::Control(Some(command)) => self.on_control_command(command).await?,
                Event::Control(None) => {}
                Event::PingTime => {
                    let nonce = self.next_ping_nonce;
                    self.next_ping_nonce = self.next_ping_nonce.wrapping_add(1);
                    trace!("{}: sending keepalive ping {}", self.id, nonce);
                    self.send_frame(Frame::ping(nonce)).await?;
                    self.pending_pong = Some(nonce);
                    pong_deadline = sleep_or_pending(Some(self.config.keepalive_timeout));
                    keepalive = sleep_or_pending(self.config.keepalive_interval);
                }
                Event::PongDeadline => {
                    if self.pending_pong.is_some() {
                        return Err(ConnectionError::KeepAliveTimeout);
                    }
                    pong_deadline = sleep_or_pending(None);
                }
            }
        }
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        self.writer.send_frame(&frame).await.map_err(ConnectionError::Io)
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        match frame.header.tag() {
            Tag::Data => self.on_data(frame).await,
            Tag::WindowUpdate => self.on_window_update(frame).await,
            Tag::Ping => self.on_ping(frame).await,
            Tag::GoAway => self.on_go_away(frame),
        }
    }

    async fn on_data(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        let id = frame.header.stream_id();
        if id.is_session() {
            return Err(ConnectionError::Protocol("data frame addressing the session"));
        }
        let flags = frame.header.flags();

        if flags.contains(frame::header::RST) {
            self.on_remote_reset(id).await;
            return Ok(());
        }
        if flags.contains(frame::header::SYN) {
            self.on_inbound_syn(id).await?;
        }

        let stream = match self.lookup(id)? {
            Some(stream) => stream,
            None => {
                trace!("{}: dropping frame for vanished stream {}", self.id, id);
                return Ok(());
            }
        };

        let mut reset = false;
        {
            let mut shared = stream.shared().await;
            if !frame.body.is_empty() {
                if !shared.state().can_receive() {
                    debug!("{}/{}: data after FIN", self.id, id);
                    reset = true;
                } else if frame.body.len() as u32 > shared.recv_window {
                    debug!("{}/{}: data exceeds the receive window", self.id, id);
                    reset = true;
                } else if shared.buffer.len() + frame.body.len() > self.config.max_buffer_size {
                    debug!("{}/{}: receive buffer is full", self.id, id);
                    reset = true;
                } else {
                    shared.recv_window -= frame.body.len() as u32;
                    shared.buffer.push(frame.body);
                    shared.wake_reader();
                }
            }
            if !reset {
                if flags.contains(frame::header::ACK) {
                    shared.on_recv_ack(self.id, id);
                }
                if flags.contains(frame::header::FIN) {
                    shared.on_recv_fin(self.id, id);
                }
            }
        }

        if reset {
            self.reset_stream(id).await?;
        } else {
            self.gc_stream(id).await;
        }
        Ok(())
    }

    async fn on_window_update(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        let id = frame.header.stream_id();
        if id.is_session() {
            return Err(ConnectionError::Protocol("window update addressing the session"));
        }
        let flags = frame.header.flags();

        if flags.contains(frame::header::RST) {
            self.on_remote_reset(id).await;
            return Ok(());
        }
        if flags.contains(frame::header::SYN) {
            self.on_inbound_syn(id).await?;
        }

        let stream = match self.lookup(id)? {
            Some(stream) => stream,
            None => {
                trace!("{}: dropping frame for vanished stream {}", self.id, id);
                return Ok(());
            }
        };

        {
            let mut shared = stream.shared().await;
            let delta = frame.header.length();
            // A zero delta is a no-op carrier for flags.
            if delta > 0 {
                shared.send_window = shared.send_window.saturating_add(delta);
                shared.wake_writer();
            }
            if flags.contains(frame::header::ACK) {
                shared.on_recv_ack(self.id, id);
            }
            if flags.contains(frame::header::FIN) {
                shared.on_recv_fin(self.id, id);
            }
        }
        self.gc_stream(id).await;
        Ok(())
    }

    async fn on_ping(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        let nonce = frame.header.length();
        if frame.header.flags().contains(frame::header::ACK) {
            if self.pending_pong == Some(nonce) {
                trace!("{}: pong {} received", self.id, nonce);
                self.pending_pong = None;
            }
            return Ok(());
        }
        self.send_frame(Frame::pong(nonce)).await
    }

    fn on_go_away(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        let code = frame.header.length();
        info!("{}: remote sent go-away (code {})", self.id, code);
        self.remote_goaway = true;
        // No new inbound streams will arrive; pending acceptors are done.
        for waiter in self.waiting_accept.drain(..) {
            let _ = waiter.send(Err(ConnectionError::Closed));
        }
        Ok(())
    }

    /// Handles a SYN for a new remote stream.
    async fn on_inbound_syn(&mut self, id: StreamId) -> Result<(), ConnectionError> {
        let valid_parity = match self.mode {
            Mode::Client => id.is_server(),
            Mode::Server => id.is_client(),
        };
        if !valid_parity {
            return Err(ConnectionError::Protocol("SYN with the wrong stream id parity"));
        }
        if id.val() <= self.last_remote_id {
            return Err(ConnectionError::Protocol("SYN for an already-used stream id"));
        }
        self.last_remote_id = id.val();

        if self.local_closing {
            debug!("{}: refusing inbound stream {} while closing", self.id, id);
            return self.send_frame(Frame::reset(id)).await;
        }
        if self.streams.len() >= self.config.max_num_streams {
            debug!("{}: maximum number of streams reached, resetting {}", self.id, id);
            return self.send_frame(Frame::reset(id)).await;
        }

        let stream = Stream::new(
            id,
            self.id,
            self.config.clone(),
            self.config.receive_window,
            self.config.receive_window,
            self.stream_sender.clone(),
        );
        {
            let mut shared = stream.shared().await;
            shared.on_recv_syn(self.id, id);
            shared.on_send_ack(self.id, id);
        }
        self.streams.insert(id.val(), stream.clone());

        let mut frame = Frame::window_update(id, 0);
        frame.header.ack();
        self.send_frame(frame).await?;

        trace!("{}: new inbound stream {}", self.id, id);
        if let Some(waiter) = self.waiting_accept.pop_front() {
            if waiter.send(Ok(stream)).is_err() {
                // The acceptor went away in the meantime.
                self.reset_stream(id).await?;
            }
        } else {
            self.pending_inbound.push_back(stream);
        }
        Ok(())
    }

    async fn on_stream_command(&mut self, command: StreamCommand) -> Result<(), ConnectionError> {
        match command {
            StreamCommand::SendFrame(frame) => self.send_frame(frame).await,
            StreamCommand::CloseStream { id } => {
                // The stream already moved its own state.
                let mut frame = Frame::data(id, Vec::new());
                frame.header.fin();
                self.send_frame(frame).await?;
                self.gc_stream(id).await;
                Ok(())
            }
            StreamCommand::ResetStream { id } => {
                self.send_frame(Frame::reset(id)).await?;
                self.streams.remove(&id.val());
                Ok(())
            }
        }
    }

    async fn on_control_command(&mut self, command: ControlCommand) -> Result<(), ConnectionError> {
        match command {
            ControlCommand::OpenStream(reply) => self.on_open_stream(reply).await,
            ControlCommand::AcceptStream(reply) => {
                if let Some(stream) = self.pending_inbound.pop_front() {
                    let _ = reply.send(Ok(stream));
                } else if self.remote_goaway || self.local_closing {
                    let _ = reply.send(Err(ConnectionError::Closed));
                } else {
                    self.waiting_accept.push_back(reply);
                }
                Ok(())
            }
            // Close is intercepted by the event loop; answering here means
            // the loop is already winding down.
            ControlCommand::CloseConnection(reply) => {
                let _ = reply.send(());
                Ok(())
            }
        }
    }

    async fn on_open_stream(&mut self, reply: oneshot::Sender<Result<Stream, ConnectionError>>) -> Result<(), ConnectionError> {
        if self.local_closing || self.remote_goaway {
            let _ = reply.send(Err(ConnectionError::Closed));
            return Ok(());
        }
        if self.streams.len() >= self.config.max_num_streams {
            let _ = reply.send(Err(ConnectionError::TooManyStreams));
            return Ok(());
        }
        let id = match self.next_stream_id.checked_add(2) {
            Some(next) => {
                let id = self.next_stream_id;
                self.next_stream_id = next;
                StreamId::new(id)
            }
            None => {
                let _ = reply.send(Err(ConnectionError::NoMoreStreamIds));
                return Ok(());
            }
        };

        let stream = Stream::new(
            id,
            self.id,
            self.config.clone(),
            self.config.receive_window,
            self.config.receive_window,
            self.stream_sender.clone(),
        );
        stream.shared().await.on_send_syn(self.id, id);
        self.streams.insert(id.val(), stream.clone());

        let mut frame = Frame::window_update(id, 0);
        frame.header.syn();
        self.send_frame(frame).await?;

        trace!("{}: new outbound stream {}", self.id, id);
        if reply.send(Ok(stream)).is_err() {
            // The opener cancelled; the SYN is out, so reset.
            debug!("{}: open_stream cancelled, resetting {}", self.id, id);
            self.reset_stream(id).await?;
        }
        Ok(())
    }

    async fn on_close(&mut self, reply: oneshot::Sender<()>) -> Result<(), ConnectionError> {
        debug!("{}: closing connection", self.id);
        self.local_closing = true;

        for waiter in self.waiting_accept.drain(..) {
            let _ = waiter.send(Err(ConnectionError::Closed));
        }

        self.send_frame(Frame::go_away(frame::GO_AWAY_NORMAL)).await?;

        let streams: Vec<Stream> = self.streams.values().cloned().collect();
        for stream in streams {
            let id = stream.id();
            let fin_needed = {
                let mut shared = stream.shared().await;
                let can_send = shared.state().can_send();
                if can_send {
                    shared.on_send_fin(self.id, id);
                }
                can_send
            };
            if fin_needed {
                let mut frame = Frame::data(id, Vec::new());
                frame.header.fin();
                self.send_frame(frame).await?;
            }
        }

        self.writer.close().await?;
        let _ = reply.send(());
        Ok(())
    }

    /// Local protocol-level reset of one stream.
    async fn reset_stream(&mut self, id: StreamId) -> Result<(), ConnectionError> {
        if let Some(stream) = self.streams.remove(&id.val()) {
            stream.shared().await.on_reset(self.id, id);
        }
        self.send_frame(Frame::reset(id)).await
    }

    /// The remote reset one of our streams.
    async fn on_remote_reset(&mut self, id: StreamId) {
        if let Some(stream) = self.streams.remove(&id.val()) {
            debug!("{}/{}: remote reset", self.id, id);
            stream.shared().await.on_reset(self.id, id);
        }
    }

    /// Looks up a live stream; distinguishes dead-but-legal ids from
    /// protocol violations.
    fn lookup(&mut self, id: StreamId) -> Result<Option<Stream>, ConnectionError> {
        if let Some(stream) = self.streams.get(&id.val()) {
            return Ok(Some(stream.clone()));
        }
        let local_parity = match self.mode {
            Mode::Client => id.is_client(),
            Mode::Server => id.is_server(),
        };
        let known = if local_parity {
            id.val() < self.next_stream_id
        } else {
            id.val() <= self.last_remote_id
        };
        if known {
            Ok(None)
        } else {
            Err(ConnectionError::Protocol("frame for an unknown stream"))
        }
    }

    /// Removes a stream whose state machine has terminated.
    async fn gc_stream(&mut self, id: StreamId) {
        let done = match self.streams.get(&id.val()) {
            Some(stream) => matches!(stream.shared().await.state(), State::Closed | State::Reset),
            None => false,
        };
        if done {
            trace!("{}: garbage collecting stream {}", self.id, id);
            self.streams.remove(&id.val());
        }
    }

    /// Winds the connection down after the event loop has exited.
    async fn terminate(&mut self) {
        self.is_closed = true;

        // Refuse everything still queued, then stop accepting commands.
        self.control_receiver.close();
        while let Ok(Some(command)) = self.control_receiver.try_next() {
            match command {
                ControlCommand::OpenStream(reply) | ControlCommand::AcceptStream(reply) => {
                    let _ = reply.send(Err(ConnectionError::Closed));
                }
                ControlCommand::CloseConnection(reply) => {
                    let _ = reply.send(());
                }
            }
        }
        self.stream_receiver.close();

        for waiter in self.waiting_accept.drain(..) {
            let _ = waiter.send(Err(ConnectionError::Closed));
        }
        self.pending_inbound.clear();

        for (_, stream) in self.streams.drain() {
            let id = stream.id();
            stream.shared().await.on_session_close(self.id, id);
        }
        info!("{}: connection is closed", self.id);
    }
}

fn sleep_or_pending(duration: Option<Duration>) -> future::Fuse<BoxFuture<'static, ()>> {
    match duration {
        Some(duration) => Delay::new(duration).boxed().fuse(),
        None => future::pending().boxed().fuse(),
    }
}

impl From<ConnectionError> for io::Error {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::Io(e) => e,
            ConnectionError::Closed => io::Error::new(io::ErrorKind::ConnectionAborted, "connection is closed"),
            e => io::Error::new(io::ErrorKind::Other, e.to_string()),
        }
    }
}
