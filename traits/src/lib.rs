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

//! Asynchronous byte-stream traits.
//!
//! Every layer of the stack, from raw transport sockets up to multiplexed
//! substreams, talks through [`ReadEx`] and [`WriteEx`]. Unlike the `poll`
//! based `AsyncRead`/`AsyncWrite` pair, these traits are expressed as
//! `async fn`s, which keeps the upgrade and protocol code free of hand
//! written futures. Any `AsyncRead`/`AsyncWrite` object gets both traits
//! for free through blanket impls.
//!
//! [`SplitEx`] separates a duplex stream into independently owned reader
//! and writer halves, so that the two directions of a connection never
//! contend on a lock.

use async_trait::async_trait;
use futures::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use futures::prelude::*;
use std::io;

/// Maximum length, in bytes, of the LEB128 encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Converts a decoded varint to `usize`, failing instead of truncating.
pub fn varint_to_usize(value: u64) -> io::Result<usize> {
    use std::convert::TryFrom;
    usize::try_from(value).map_err(|_| invalid_data(format!("varint {} exceeds usize", value)))
}

/// Read support for async byte streams.
#[async_trait]
pub trait ReadEx: Send {
    /// Reads some bytes into `buf`, returning how many were read.
    ///
    /// A return value of `0` signals end-of-stream, i.e. the peer has
    /// half-closed its sending direction.
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads exactly `buf.len()` bytes, failing with `UnexpectedEof` if the
    /// stream ends first.
    async fn read_exact2(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = self.read2(&mut buf[offset..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            offset += n;
        }
        Ok(())
    }

    /// Reads an unsigned LEB128 varint, one byte at a time.
    ///
    /// Fails with `InvalidData` if more than [`MAX_VARINT_LEN`] bytes carry
    /// a continuation bit or the final byte pushes the value past 64 bits.
    async fn read_varint(&mut self) -> io::Result<u64> {
        let mut buf = unsigned_varint::encode::u64_buffer();
        for i in 0..MAX_VARINT_LEN {
            self.read_exact2(&mut buf[i..=i]).await?;
            if buf[i] & 0x80 == 0 {
                let (value, _) = unsigned_varint::decode::u64(&buf[..=i])
                    .map_err(|e| invalid_data(format!("invalid varint: {}", e)))?;
                return Ok(value);
            }
        }
        Err(invalid_data("varint overflows 64 bits".to_string()))
    }

    /// Reads one varint-length-prefixed frame.
    ///
    /// The declared length is checked against `max` before any allocation
    /// takes place.
    async fn read_one(&mut self, max: usize) -> io::Result<Vec<u8>> {
        let len = varint_to_usize(self.read_varint().await?)?;
        if len > max {
            return Err(invalid_data(format!("frame too large ({} > {})", len, max)));
        }
        let mut body = vec![0u8; len];
        self.read_exact2(&mut body).await?;
        Ok(body)
    }
}

/// Write support for async byte streams.
#[async_trait]
pub trait WriteEx: Send {
    /// Writes some bytes from `buf`, returning how many were accepted.
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Writes the whole of `buf`.
    async fn write_all2(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = self.write2(&buf[offset..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            offset += n;
        }
        Ok(())
    }

    /// Writes `value` as an unsigned LEB128 varint.
    async fn write_varint(&mut self, value: u64) -> io::Result<()> {
        let mut buf = unsigned_varint::encode::u64_buffer();
        let bytes = unsigned_varint::encode::u64(value, &mut buf);
        self.write_all2(bytes).await
    }

    /// Writes one varint-length-prefixed frame.
    async fn write_one(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_varint(buf.len() as u64).await?;
        self.write_all2(buf).await
    }

    /// Flushes buffered data down to the transport.
    async fn flush2(&mut self) -> io::Result<()>;

    /// Closes the writing direction of the stream.
    async fn close2(&mut self) -> io::Result<()>;
}

#[async_trait]
impl<T: AsyncRead + Send + Unpin> ReadEx for T {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }
}

#[async_trait]
impl<T: AsyncWrite + Send + Unpin> WriteEx for T {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        AsyncWriteExt::write(self, buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        AsyncWriteExt::flush(self).await
    }

    async fn close2(&mut self) -> io::Result<()> {
        AsyncWriteExt::close(self).await
    }
}

/// A duplex stream that can be separated into its two directions.
pub trait SplitEx {
    type Reader: ReadEx + Unpin + 'static;
    type Writer: WriteEx + Unpin + 'static;

    fn split(self) -> (Self::Reader, Self::Writer);
}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> SplitEx for T {
    type Reader = ReadHalf<T>;
    type Writer = WriteHalf<T>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        AsyncReadExt::split(self)
    }
}

/// Shorthand for the full set of bounds a connection must satisfy before it
/// can carry an upgrade.
pub trait SplittableReadWrite: ReadEx + WriteEx + SplitEx + Send + Unpin + 'static {}

impl<T: ReadEx + WriteEx + SplitEx + Send + Unpin + 'static> SplittableReadWrite for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::io::Cursor;

    fn encoded(value: u64) -> Vec<u8> {
        let mut buf = unsigned_varint::encode::u64_buffer();
        unsigned_varint::encode::u64(value, &mut buf).to_vec()
    }

    #[test]
    fn varint_boundaries() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(127), vec![0x7f]);
        assert_eq!(encoded(128), vec![0x80, 0x01]);
        assert_eq!(encoded(16383), vec![0xff, 0x7f]);
        assert_eq!(encoded(16384), vec![0x80, 0x80, 0x01]);

        let max = encoded(u64::max_value());
        assert_eq!(max.len(), MAX_VARINT_LEN);
        assert_eq!(max[0], 0xff);
        assert_eq!(max[MAX_VARINT_LEN - 1], 0x01);
    }

    #[test]
    fn varint_roundtrip() {
        block_on(async {
            for &v in &[0u64, 1, 127, 128, 300, 16383, 16384, 1 << 32, u64::max_value()] {
                let bytes = encoded(v);
                let mut cursor = Cursor::new(bytes);
                assert_eq!(cursor.read_varint().await.unwrap(), v);
            }
        })
    }

    #[test]
    fn varint_overflow() {
        block_on(async {
            // Eleven continuation bytes can never be a valid u64.
            let mut cursor = Cursor::new(vec![0xff; 11]);
            assert!(cursor.read_varint().await.is_err());

            // Ten bytes whose final byte pushes past 64 bits.
            let mut bytes = vec![0xff; 9];
            bytes.push(0x7f);
            let mut cursor = Cursor::new(bytes);
            assert!(cursor.read_varint().await.is_err());
        })
    }

    #[test]
    fn length_prefix_roundtrip() {
        block_on(async {
            let mut buf = Vec::new();
            buf.write_one(b"hello world").await.unwrap();

            let mut cursor = Cursor::new(buf);
            let frame = cursor.read_one(1024).await.unwrap();
            assert_eq!(frame, b"hello world");
        })
    }

    #[test]
    fn length_prefix_respects_cap() {
        block_on(async {
            let mut buf = Vec::new();
            buf.write_one(&[0u8; 64]).await.unwrap();

            let mut cursor = Cursor::new(buf);
            assert!(cursor.read_one(32).await.is_err());
        })
    }

    #[test]
    fn read_exact_hits_eof() {
        block_on(async {
            let mut cursor = Cursor::new(vec![1u8, 2, 3]);
            let mut buf = [0u8; 8];
            assert_eq!(
                cursor.read_exact2(&mut buf).await.unwrap_err().kind(),
                io::ErrorKind::UnexpectedEof
            );
        })
    }
}
