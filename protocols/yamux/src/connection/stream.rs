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

use crate::chunks::Chunks;
use crate::connection::{self, StreamCommand};
use crate::frame::{Frame, StreamId};
use crate::Config;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::lock::{Mutex, MutexGuard};
use futures::prelude::*;
use peerlink_core::muxing::{IReadWrite, ReadWriteEx, StreamInfo};
use peerlink_traits::{ReadEx, WriteEx};
use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

/// The state of a Yamux stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Created, no SYN exchanged yet.
    Idle,
    /// We sent SYN, awaiting the ACK.
    SynSent,
    /// We received a SYN, the ACK is not out yet.
    SynReceived,
    /// Open in both directions.
    Established,
    /// We sent FIN; the remote may still send.
    LocalClosed,
    /// The remote sent FIN; we may still send.
    RemoteClosed,
    /// Closed in both directions (terminal, buffered data readable).
    Closed,
    /// Hard-reset (terminal, buffered data discarded).
    Reset,
}

impl State {
    /// Can more data arrive from the remote?
    pub fn can_receive(self) -> bool {
        !matches!(self, State::RemoteClosed | State::Closed | State::Reset)
    }

    /// Can we still send data?
    pub fn can_send(self) -> bool {
        !matches!(self, State::LocalClosed | State::Closed | State::Reset)
    }
}

/// A multiplexed Yamux stream.
///
/// Streams are created either outbound via [`crate::connection::control::Control::open_stream`]
/// or inbound via [`crate::connection::control::Control::accept_stream`].
pub struct Stream {
    id: StreamId,
    conn: connection::Id,
    config: Arc<Config>,
    sender: mpsc::Sender<StreamCommand>,
    shared: Arc<Mutex<Shared>>,
}

impl Clone for Stream {
    fn clone(&self) -> Self {
        Stream {
            id: self.id,
            conn: self.conn,
            config: self.config.clone(),
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id.val())
            .field("connection", &self.conn)
            .finish()
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "(Stream {}/{})", self.conn, self.id.val())
    }
}

impl Stream {
    pub(crate) fn new(
        id: StreamId,
        conn: connection::Id,
        config: Arc<Config>,
        window: u32,
        credit: u32,
        sender: mpsc::Sender<StreamCommand>,
    ) -> Self {
        Stream {
            id,
            conn,
            config,
            sender,
            shared: Arc::new(Mutex::new(Shared::new(window, credit))),
        }
    }

    /// Get this stream's identifier.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Get this stream's state.
    pub async fn state(&self) -> State {
        self.shared().await.state()
    }

    pub(crate) async fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().await
    }

    /// Hard-resets the stream: RST goes out, buffered unread data is
    /// discarded, subsequent reads fail. A no-op after close or reset.
    pub async fn reset(&mut self) -> io::Result<()> {
        {
            let mut shared = self.shared().await;
            if matches!(shared.state(), State::Closed | State::Reset) {
                return Ok(());
            }
            shared.on_reset(self.conn, self.id);
        }
        // A failed send means the session is gone, which resets implicitly.
        let _ = self.sender.send(StreamCommand::ResetStream { id: self.id }).await;
        Ok(())
    }

    async fn read_stream(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let outcome = {
                let mut shared = self.shared().await;
                if !shared.buffer.is_empty() {
                    let n = shared.buffer.drain_into(buf);
                    log::trace!("{}/{}: read {} bytes", self.conn, self.id, n);
                    shared.recv_consumed += n as u32;
                    if shared.state() != State::Reset && shared.recv_consumed >= shared.recv_window / 2 {
                        let delta = shared.recv_consumed;
                        shared.recv_consumed = 0;
                        shared.recv_window += delta;
                        Outcome::Read(n, Some(delta))
                    } else {
                        Outcome::Read(n, None)
                    }
                } else {
                    match shared.state() {
                        State::Reset => Outcome::Reset,
                        state if !state.can_receive() => Outcome::Eof,
                        _ => Outcome::Park,
                    }
                }
            };

            match outcome {
                Outcome::Read(n, None) => return Ok(n),
                Outcome::Read(n, Some(delta)) => {
                    log::trace!("{}/{}: refunding {} bytes of window", self.conn, self.id, delta);
                    let frame = Frame::window_update(self.id, delta);
                    // If the session is gone the refund does not matter.
                    let _ = self.sender.send(StreamCommand::SendFrame(frame)).await;
                    return Ok(n);
                }
                Outcome::Eof => {
                    log::debug!("{}/{}: eof", self.conn, self.id);
                    return Ok(0);
                }
                Outcome::Reset => {
                    return Err(io::Error::new(io::ErrorKind::ConnectionReset, "stream reset"));
                }
                Outcome::Park => {
                    log::trace!("{}/{}: empty buffer, waiting", self.conn, self.id);
                    Readable { shared: self.shared.clone() }.await;
                }
            }
        }
    }

    async fn write_stream(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let (frame, n) = loop {
            {
                let mut shared = self.shared().await;
                match shared.state() {
                    State::Reset => {
                        return Err(io::Error::new(io::ErrorKind::ConnectionReset, "stream reset"));
                    }
                    state if !state.can_send() => {
                        log::debug!("{}/{}: can no longer write", self.conn, self.id);
                        return Err(self.write_zero_err());
                    }
                    _ => {}
                }
                if shared.send_window > 0 {
                    let k = shared.send_window as usize;
                    let k = std::cmp::min(k, std::cmp::min(buf.len(), self.config.max_message_size));
                    shared.send_window -= k as u32;
                    break (Frame::data(self.id, buf[..k].to_vec()), k);
                }
            }
            if self.sender.is_closed() {
                return Err(self.write_zero_err());
            }
            log::debug!("{}/{}: no more credit left, waiting", self.conn, self.id);
            Writable { shared: self.shared.clone() }.await;
        };

        log::trace!("{}/{}: write {} bytes", self.conn, self.id, n);
        self.sender
            .send(StreamCommand::SendFrame(frame))
            .await
            .map_err(|_| self.write_zero_err())?;
        Ok(n)
    }

    async fn close_stream(&mut self) -> io::Result<()> {
        {
            let mut shared = self.shared().await;
            if matches!(shared.state(), State::LocalClosed | State::Closed | State::Reset) {
                return Ok(());
            }
            shared.on_send_fin(self.conn, self.id);
        }
        log::trace!("{}/{}: close", self.conn, self.id);
        self.sender
            .send(StreamCommand::CloseStream { id: self.id })
            .await
            .map_err(|_| self.write_zero_err())?;
        Ok(())
    }

    fn write_zero_err(&self) -> io::Error {
        let msg = format!("{}/{}: connection is closed", self.conn, self.id);
        io::Error::new(io::ErrorKind::WriteZero, msg)
    }
}

enum Outcome {
    Read(usize, Option<u32>),
    Eof,
    Reset,
    Park,
}

#[async_trait]
impl ReadEx for Stream {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_stream(buf).await
    }
}

#[async_trait]
impl WriteEx for Stream {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_stream(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.close_stream().await
    }
}

impl StreamInfo for Stream {
    fn id(&self) -> usize {
        self.id.val() as usize
    }
}

#[async_trait]
impl ReadWriteEx for Stream {
    fn box_clone(&self) -> IReadWrite {
        Box::new(self.clone())
    }
}

/// Resolves when the stream has buffered data, or can no longer receive.
struct Readable {
    shared: Arc<Mutex<Shared>>,
}

impl Future for Readable {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.shared.try_lock() {
            Some(mut shared) => {
                if !shared.buffer.is_empty() || !shared.state().can_receive() {
                    Poll::Ready(())
                } else {
                    shared.reader = Some(cx.waker().clone());
                    Poll::Pending
                }
            }
            None => {
                // Lock is briefly held elsewhere, try again promptly.
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }
}

/// Resolves when send credit is available, or the stream can no longer send.
struct Writable {
    shared: Arc<Mutex<Shared>>,
}

impl Future for Writable {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.shared.try_lock() {
            Some(mut shared) => {
                if shared.send_window > 0 || !shared.state().can_send() {
                    Poll::Ready(())
                } else {
                    shared.writer = Some(cx.waker().clone());
                    Poll::Pending
                }
            }
            None => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    state: State,
    /// Bytes we may still send before the remote must refund credit.
    pub(crate) send_window: u32,
    /// Bytes the remote may still send into us.
    pub(crate) recv_window: u32,
    /// Bytes the reader drained but has not refunded yet.
    pub(crate) recv_consumed: u32,
    pub(crate) buffer: Chunks,
    pub(crate) reader: Option<Waker>,
    pub(crate) writer: Option<Waker>,
}

impl Shared {
    fn new(window: u32, credit: u32) -> Self {
        Shared {
            state: State::Idle,
            send_window: credit,
            recv_window: window,
            recv_consumed: 0,
            buffer: Chunks::new(),
            reader: None,
            writer: None,
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
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

    pub(crate) fn on_send_syn(&mut self, cid: connection::Id, sid: StreamId) {
        self.transition(cid, sid, match self.state {
            State::Idle => State::SynSent,
            s => s,
        })
    }

    pub(crate) fn on_recv_syn(&mut self, cid: connection::Id, sid: StreamId) {
        self.transition(cid, sid, match self.state {
            State::Idle => State::SynReceived,
            s => s,
        })
    }

    pub(crate) fn on_send_ack(&mut self, cid: connection::Id, sid: StreamId) {
        self.transition(cid, sid, match self.state {
            State::SynReceived => State::Established,
            s => s,
        })
    }

    pub(crate) fn on_recv_ack(&mut self, cid: connection::Id, sid: StreamId) {
        self.transition(cid, sid, match self.state {
            State::SynSent => State::Established,
            s => s,
        })
    }

    pub(crate) fn on_send_fin(&mut self, cid: connection::Id, sid: StreamId) {
        let next = match self.state {
            State::Idle | State::SynSent | State::SynReceived | State::Established => State::LocalClosed,
            State::RemoteClosed => State::Closed,
            s => s,
        };
        self.transition(cid, sid, next);
        self.wake_writer();
    }

    pub(crate) fn on_recv_fin(&mut self, cid: connection::Id, sid: StreamId) {
        let next = match self.state {
            State::Idle | State::SynSent | State::SynReceived | State::Established => State::RemoteClosed,
            State::LocalClosed => State::Closed,
            s => s,
        };
        self.transition(cid, sid, next);
        self.wake_reader();
    }

    /// Terminal: RST was sent or received.
    pub(crate) fn on_reset(&mut self, cid: connection::Id, sid: StreamId) {
        self.buffer.clear();
        self.transition(cid, sid, State::Reset);
        self.wake_reader();
        self.wake_writer();
    }

    /// The session ended; the stream keeps its buffered data readable.
    pub(crate) fn on_session_close(&mut self, cid: connection::Id, sid: StreamId) {
        if self.state != State::Reset {
            self.transition(cid, sid, State::Closed);
        }
        self.wake_reader();
        self.wake_writer();
    }

    fn transition(&mut self, cid: connection::Id, sid: StreamId, next: State) {
        if self.state != next {
            log::trace!("{}/{}: state {:?} -> {:?}", cid, sid, self.state, next);
            self.state = next;
        }
    }
}
