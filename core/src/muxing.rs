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

//! The multiplexed-connection interface produced by the upgrade pipeline.

use crate::secure_io::SecureInfo;
use crate::transport::{ConnectionInfo, TransportError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use peerlink_traits::{ReadEx, WriteEx};
use std::io;

/// Identification of a substream within its parent session.
pub trait StreamInfo: Send {
    /// Returns the identity of the stream.
    fn id(&self) -> usize;
}

/// A multiplexed substream: an ordered, bidirectional byte stream that can
/// be cloned into additional handles.
#[async_trait]
pub trait ReadWriteEx: ReadEx + WriteEx + StreamInfo {
    fn box_clone(&self) -> IReadWrite;
}

pub type IReadWrite = Box<dyn ReadWriteEx + Send>;

#[async_trait]
impl ReadEx for IReadWrite {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read2(buf).await
    }
}

#[async_trait]
impl WriteEx for IReadWrite {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write2(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        (**self).flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        (**self).close2().await
    }
}

impl StreamInfo for IReadWrite {
    fn id(&self) -> usize {
        (**self).id()
    }
}

impl Clone for IReadWrite {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// A stream muxer coordinates concurrent substreams over one secured
/// connection.
#[async_trait]
pub trait StreamMuxer: Send {
    /// Opens a new outbound substream.
    async fn open_stream(&mut self) -> Result<IReadWrite, TransportError>;

    /// Waits for the remote to open a substream.
    async fn accept_stream(&mut self) -> Result<IReadWrite, TransportError>;

    /// Closes the session: no new streams are admitted, existing streams
    /// are wound down in order.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// The background task driving the session, if it has not been taken
    /// yet. Must be spawned by the caller.
    fn task(&mut self) -> Option<BoxFuture<'static, ()>>;

    fn box_clone(&self) -> IStreamMuxer;
}

/// The full muxed-connection surface: stream muxing plus identity and
/// addressing information.
pub trait StreamMuxerEx: StreamMuxer + SecureInfo + ConnectionInfo {}

pub type IStreamMuxer = Box<dyn StreamMuxerEx>;

impl Clone for IStreamMuxer {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
