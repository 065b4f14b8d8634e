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

use crate::connection::{stream::Stream, ControlCommand};
use crate::error::ConnectionError;
use futures::channel::{mpsc, oneshot};
use futures::prelude::*;

/// A handle to the connection, usable from any task.
#[derive(Clone, Debug)]
pub struct Control {
    sender: mpsc::Sender<ControlCommand>,
}

impl Control {
    pub(crate) fn new(sender: mpsc::Sender<ControlCommand>) -> Self {
        Control { sender }
    }

    /// Opens a new outbound stream towards the remote.
    pub async fn open_stream(&mut self) -> Result<Stream, ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(ControlCommand::OpenStream(reply))
            .await
            .map_err(|_| ConnectionError::Closed)?;
        rx.await?
    }

    /// Waits for the remote to open a stream.
    pub async fn accept_stream(&mut self) -> Result<Stream, ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(ControlCommand::AcceptStream(reply))
            .await
            .map_err(|_| ConnectionError::Closed)?;
        rx.await?
    }

    /// Closes the connection: a normal go-away is sent, every open stream
    /// is FINed, and further `open_stream`/`accept_stream` calls fail.
    ///
    /// Closing an already-closed connection is a no-op.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        let (reply, rx) = oneshot::channel();
        if self.sender.send(ControlCommand::CloseConnection(reply)).await.is_err() {
            // Already closed.
            return Ok(());
        }
        // A dropped reply also means the connection wound down.
        let _ = rx.await;
        Ok(())
    }
}
