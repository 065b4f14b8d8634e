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

//! The 12-byte Yamux frame header.
//!
//! ```text
//! | version (1) | type (1) | flags (2) | stream id (4) | length (4) |
//! ```
//!
//! All fields big-endian, version always 0.

use std::fmt;

pub const HEADER_SIZE: usize = 12;

/// A Yamux stream identifier.
///
/// The connection initiator allocates odd ids starting at 1, the responder
/// even ids starting at 2. Id 0 addresses the session itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u32);

impl StreamId {
    pub(crate) fn new(val: u32) -> Self {
        StreamId(val)
    }

    /// The id addressing the session, used by ping and go-away frames.
    pub fn session() -> Self {
        StreamId(0)
    }

    pub fn is_session(self) -> bool {
        self.0 == 0
    }

    /// Was this stream opened by the connection initiator?
    pub fn is_client(self) -> bool {
        self.0 % 2 == 1
    }

    /// Was this stream opened by the connection responder?
    pub fn is_server(self) -> bool {
        !self.is_session() && self.0 % 2 == 0
    }

    pub fn val(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The message type of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    Data = 0,
    WindowUpdate = 1,
    Ping = 2,
    GoAway = 3,
}

/// Header flag bitmask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags(u16);

/// Marks the first frame of a new stream.
pub const SYN: Flags = Flags(1);
/// Acknowledges a new stream.
pub const ACK: Flags = Flags(2);
/// Half-closes the sender's direction.
pub const FIN: Flags = Flags(4);
/// Hard-resets the stream.
pub const RST: Flags = Flags(8);

const KNOWN_FLAGS: u16 = 0xf;

impl Flags {
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: Flags) {
        self.0 |= other.0
    }

    pub fn val(self) -> u16 {
        self.0
    }
}

/// A frame header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub(crate) tag: Tag,
    pub(crate) flags: Flags,
    pub(crate) stream_id: StreamId,
    pub(crate) length: u32,
}

impl Header {
    pub fn new(tag: Tag, stream_id: StreamId, length: u32) -> Self {
        Header {
            tag,
            flags: Flags::default(),
            stream_id,
            length,
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Payload length for data frames, credit delta for window updates,
    /// opaque nonce for pings, error code for go-away.
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn syn(&mut self) {
        self.flags.set(SYN)
    }

    pub fn ack(&mut self) {
        self.flags.set(ACK)
    }

    pub fn fin(&mut self) {
        self.flags.set(FIN)
    }

    pub fn rst(&mut self) {
        self.flags.set(RST)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(Header {:?} stream {} flags {:#x} len {})",
            self.tag, self.stream_id, self.flags.val(), self.length
        )
    }
}

/// Encodes a header into its 12-byte wire representation.
pub fn encode(hdr: &Header) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0] = 0;
    buf[1] = hdr.tag as u8;
    buf[2..4].copy_from_slice(&hdr.flags.val().to_be_bytes());
    buf[4..8].copy_from_slice(&hdr.stream_id.val().to_be_bytes());
    buf[8..12].copy_from_slice(&hdr.length.to_be_bytes());
    buf
}

/// Decodes a header from its 12-byte wire representation.
pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Header, HeaderDecodeError> {
    if buf[0] != 0 {
        return Err(HeaderDecodeError::Version(buf[0]));
    }

    let tag = match buf[1] {
        0 => Tag::Data,
        1 => Tag::WindowUpdate,
        2 => Tag::Ping,
        3 => Tag::GoAway,
        t => return Err(HeaderDecodeError::Type(t)),
    };

    let flags = u16::from_be_bytes([buf[2], buf[3]]);
    if flags & !KNOWN_FLAGS != 0 {
        return Err(HeaderDecodeError::Flags(flags));
    }

    Ok(Header {
        tag,
        flags: Flags(flags),
        stream_id: StreamId(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]])),
        length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
    })
}

/// Possible errors while decoding a frame header.
#[non_exhaustive]
#[derive(Debug)]
pub enum HeaderDecodeError {
    /// Unknown protocol version.
    Version(u8),
    /// An unknown frame type.
    Type(u8),
    /// An unknown combination of flag bits.
    Flags(u16),
}

impl std::fmt::Display for HeaderDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            HeaderDecodeError::Version(v) => write!(f, "unknown version: {}", v),
            HeaderDecodeError::Type(t) => write!(f, "unknown frame type: {}", t),
            HeaderDecodeError::Flags(flags) => write!(f, "unknown flags: {:#x}", flags),
        }
    }
}

impl std::error::Error for HeaderDecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_shapes() {
        let mut headers = vec![
            Header::new(Tag::Data, StreamId(1), 4096),
            Header::new(Tag::WindowUpdate, StreamId(2), 256 * 1024),
            Header::new(Tag::Ping, StreamId::session(), 0xdead_beef),
            Header::new(Tag::GoAway, StreamId::session(), 0),
        ];
        headers[0].syn();
        headers[1].ack();
        headers[2].fin();
        headers[3].rst();

        for hdr in headers {
            let bytes = encode(&hdr);
            assert_eq!(decode(&bytes).unwrap(), hdr);
        }
    }

    #[test]
    fn version_must_be_zero() {
        let mut bytes = encode(&Header::new(Tag::Data, StreamId(1), 0));
        bytes[0] = 1;
        match decode(&bytes) {
            Err(HeaderDecodeError::Version(1)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut bytes = encode(&Header::new(Tag::Data, StreamId(1), 0));
        bytes[1] = 9;
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn unknown_flag_bits_are_rejected() {
        let mut bytes = encode(&Header::new(Tag::Data, StreamId(1), 0));
        bytes[2] = 0x10;
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn id_parity() {
        assert!(StreamId(1).is_client());
        assert!(StreamId(2).is_server());
        assert!(StreamId(0).is_session());
        assert!(!StreamId(0).is_server());
    }
}
