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

use std::io;

use crate::connection::Id;
use crate::frame::{header, Frame, Tag};
use peerlink_traits::{ReadEx, WriteEx};

pub(crate) struct FrameIo<T> {
    id: Id,
    io: T,
    max_body_len: usize,
}

impl<T> FrameIo<T> {
    pub(crate) fn new(id: Id, io: T, max_body_len: usize) -> Self {
        FrameIo { id, io, max_body_len }
    }
}

impl<T: ReadEx> FrameIo<T> {
    /// Reads one frame; `None` on a clean end-of-stream between frames.
    /// EOF in the middle of a frame is an error.
    pub(crate) async fn recv_frame(&mut self) -> Result<Option<Frame>, FrameDecodeError> {
        let mut buf = [0u8; header::HEADER_SIZE];
        let first = self.io.read2(&mut buf[..1]).await?;
        if first == 0 {
            return Ok(None);
        }
        self.io.read_exact2(&mut buf[1..]).await?;
        let header = header::decode(&buf)?;

        log::trace!("{}: read frame header: {}", self.id, header);

        if header.tag() != Tag::Data {
            return Ok(Some(Frame { header, body: Vec::new() }));
        }

        let len = header.length() as usize;
        if len > self.max_body_len {
            return Err(FrameDecodeError::FrameTooLarge(len));
        }
        if len == 0 {
            return Ok(Some(Frame { header, body: Vec::new() }));
        }

        let mut body = vec![0; len];
        self.io.read_exact2(&mut body).await?;
        Ok(Some(Frame { header, body }))
    }
}

impl<T: WriteEx> FrameIo<T> {
    pub(crate) async fn send_frame(&mut self, frame: &Frame) -> io::Result<()> {
        log::trace!("{}: write frame, header: {}, len {}", self.id, frame.header, frame.body.len());

        let hdr = header::encode(&frame.header);
        self.io.write_all2(&hdr).await?;
        if !frame.body.is_empty() {
            self.io.write_all2(&frame.body).await?;
        }
        self.io.flush2().await
    }

    pub(crate) async fn close(&mut self) -> io::Result<()> {
        self.io.close2().await
    }
}

/// Possible errors while decoding a message frame.
#[non_exhaustive]
#[derive(Debug)]
pub enum FrameDecodeError {
    /// An I/O error.
    Io(io::Error),
    /// Decoding the frame header failed.
    Header(header::HeaderDecodeError),
    /// A data frame body length is larger than the configured maximum.
    FrameTooLarge(usize),
}

impl std::fmt::Display for FrameDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameDecodeError::Io(e) => write!(f, "i/o error: {}", e),
            FrameDecodeError::Header(e) => write!(f, "decode error: {}", e),
            FrameDecodeError::FrameTooLarge(n) => write!(f, "frame body is too large ({})", n),
        }
    }
}

impl std::error::Error for FrameDecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameDecodeError::Io(e) => Some(e),
            FrameDecodeError::Header(e) => Some(e),
            FrameDecodeError::FrameTooLarge(_) => None,
        }
    }
}

impl From<std::io::Error> for FrameDecodeError {
    fn from(e: std::io::Error) -> Self {
        FrameDecodeError::Io(e)
    }
}

impl From<header::HeaderDecodeError> for FrameDecodeError {
    fn from(e: header::HeaderDecodeError) -> Self {
        FrameDecodeError::Header(e)
    }
}
