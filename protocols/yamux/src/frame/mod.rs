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

pub mod header;
mod io;

pub use header::{Header, HeaderDecodeError, StreamId, Tag};
pub(crate) use io::FrameIo;
pub use io::FrameDecodeError;

/// Error code of an orderly shutdown.
pub const GO_AWAY_NORMAL: u32 = 0;
/// Error code signalling a protocol violation by the peer.
pub const GO_AWAY_PROTOCOL_ERROR: u32 = 1;
/// Error code signalling an internal failure.
pub const GO_AWAY_INTERNAL_ERROR: u32 = 2;

/// A Yamux message frame: a header plus, for data frames, a body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub body: Vec<u8>,
}

impl Frame {
    /// A data frame carrying `body` on `id`.
    pub fn data(id: StreamId, body: Vec<u8>) -> Self {
        Frame {
            header: Header::new(Tag::Data, id, body.len() as u32),
            body,
        }
    }

    /// A window update granting `credit` more bytes on `id`.
    pub fn window_update(id: StreamId, credit: u32) -> Self {
        Frame {
            header: Header::new(Tag::WindowUpdate, id, credit),
            body: Vec::new(),
        }
    }

    /// A keepalive ping carrying an opaque `nonce`.
    pub fn ping(nonce: u32) -> Self {
        Frame {
            header: Header::new(Tag::Ping, StreamId::session(), nonce),
            body: Vec::new(),
        }
    }

    /// The response to a ping, echoing its `nonce`.
    pub fn pong(nonce: u32) -> Self {
        let mut frame = Frame::ping(nonce);
        frame.header.ack();
        frame
    }

    /// A session-level go-away with the given error `code`.
    pub fn go_away(code: u32) -> Self {
        Frame {
            header: Header::new(Tag::GoAway, StreamId::session(), code),
            body: Vec::new(),
        }
    }

    /// A stream reset: a zero-delta window update flagged RST.
    pub fn reset(id: StreamId) -> Self {
        let mut frame = Frame::window_update(id, 0);
        frame.header.rst();
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_codec_roundtrip() {
        let mut data = Frame::data(StreamId::new(5), b"payload".to_vec());
        data.header.syn();
        for frame in vec![
            data,
            Frame::window_update(StreamId::new(4), 128 * 1024),
            Frame::ping(7),
            Frame::pong(7),
            Frame::go_away(GO_AWAY_NORMAL),
            Frame::reset(StreamId::new(9)),
        ] {
            let bytes = header::encode(&frame.header);
            let decoded = header::decode(&bytes).unwrap();
            assert_eq!(decoded, frame.header);
            assert_eq!(Frame { header: decoded, body: frame.body.clone() }, frame);
        }
    }
}
