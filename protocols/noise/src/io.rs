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

//! Post-handshake secured connection I/O.
//!
//! The two directions are fully independent: each half owns its cipher
//! state outright, so reads and writes never contend on a lock and the
//! connection supports full-duplex throughput.

use crate::error::NoiseError;
use crate::protocol::{CipherState, MAX_PLAINTEXT_LEN, TAG_LEN};
use log::trace;
use peerlink_core::identity::Keypair;
use peerlink_core::secure_io::SecureInfo;
use peerlink_core::transport::ConnectionInfo;
use peerlink_core::upgrade::EarlyMuxing;
use peerlink_core::{Multiaddr, PeerId, PublicKey};
use peerlink_traits::{ReadEx, SplitEx, WriteEx};
use async_trait::async_trait;
use std::io;

/// The receive buffer compacts once this many consumed bytes pile up at
/// its head.
const COMPACT_THRESHOLD: usize = 64 * 1024;

/// A noise session to a remote.
///
/// `T` is the type of the underlying I/O resource.
pub struct NoiseOutput<T: SplitEx> {
    reader: NoiseReader<T::Reader>,
    writer: NoiseWriter<T::Writer>,
    la: Multiaddr,
    ra: Multiaddr,
    local_priv_key: Keypair,
    remote_pub_key: PublicKey,
}

impl<T: SplitEx> NoiseOutput<T> {
    pub(crate) fn new(
        io: T,
        send_cipher: CipherState,
        recv_cipher: CipherState,
        max_frame_len: usize,
        la: Multiaddr,
        ra: Multiaddr,
        local_priv_key: Keypair,
        remote_pub_key: PublicKey,
    ) -> Self {
        let (reader, writer) = io.split();
        NoiseOutput {
            reader: NoiseReader {
                io: reader,
                cipher: recv_cipher,
                max_frame_len,
                recv_buf: Vec::new(),
                recv_offset: 0,
                closed: false,
            },
            writer: NoiseWriter {
                io: writer,
                cipher: send_cipher,
                max_frame_len,
            },
            la,
            ra,
            local_priv_key,
            remote_pub_key,
        }
    }

    #[cfg(test)]
    pub(crate) fn counters(&self) -> (u64, u64) {
        (self.writer.cipher.nonce(), self.reader.cipher.nonce())
    }
}

impl<T: SplitEx> std::fmt::Debug for NoiseOutput<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseOutput").field("remote", &self.ra).finish()
    }
}

#[async_trait]
impl<T: SplitEx + Send> ReadEx for NoiseOutput<T> {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read2(buf).await
    }
}

#[async_trait]
impl<T: SplitEx + Send> WriteEx for NoiseOutput<T> {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write2(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        self.writer.flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.writer.close2().await
    }
}

impl<T: SplitEx> SplitEx for NoiseOutput<T> {
    type Reader = NoiseReader<T::Reader>;
    type Writer = NoiseWriter<T::Writer>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }
}

impl<T: SplitEx> ConnectionInfo for NoiseOutput<T> {
    fn local_multiaddr(&self) -> Multiaddr {
        self.la.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.ra.clone()
    }
}

impl<T: SplitEx> SecureInfo for NoiseOutput<T> {
    fn local_peer(&self) -> PeerId {
        self.local_priv_key.public().into_peer_id()
    }

    fn remote_peer(&self) -> PeerId {
        self.remote_pub_key.clone().into_peer_id()
    }

    fn local_priv_key(&self) -> Keypair {
        self.local_priv_key.clone()
    }

    fn remote_pub_key(&self) -> PublicKey {
        self.remote_pub_key.clone()
    }
}

/// The noise handshake itself never learns a muxer.
impl<T: SplitEx> EarlyMuxing for NoiseOutput<T> {}

/// The decrypting half of a secured connection.
pub struct NoiseReader<R> {
    io: R,
    cipher: CipherState,
    max_frame_len: usize,
    /// Decrypted plaintext not yet handed to the caller, with a head
    /// offset instead of eager draining.
    recv_buf: Vec<u8>,
    recv_offset: usize,
    closed: bool,
}

#[async_trait]
impl<R: ReadEx> ReadEx for NoiseReader<R> {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "secured connection is closed"));
        }
        loop {
            // Serve buffered plaintext first.
            if self.recv_offset < self.recv_buf.len() {
                let n = std::cmp::min(buf.len(), self.recv_buf.len() - self.recv_offset);
                buf[..n].copy_from_slice(&self.recv_buf[self.recv_offset..self.recv_offset + n]);
                self.recv_offset += n;
                trace!("read: copied {}/{} bytes", self.recv_offset, self.recv_buf.len());
                if self.recv_offset == self.recv_buf.len() {
                    self.recv_buf.clear();
                    self.recv_offset = 0;
                } else if self.recv_offset >= COMPACT_THRESHOLD {
                    self.recv_buf.drain(..self.recv_offset);
                    self.recv_offset = 0;
                }
                return Ok(n);
            }

            // Parse and decrypt the next frame.
            let mut len_buf = [0u8; 2];
            let first = self.io.read2(&mut len_buf[..1]).await?;
            if first == 0 {
                // Clean end-of-stream at a frame boundary.
                return Ok(0);
            }
            self.io.read_exact2(&mut len_buf[1..]).await?;
            let len = u16::from_be_bytes(len_buf) as usize;
            if len > self.max_frame_len {
                self.fail();
                return Err(NoiseError::FrameTooLarge(len).into());
            }
            let mut frame = vec![0u8; len];
            self.io.read_exact2(&mut frame).await?;

            match self.cipher.decrypt_with_ad(&[], &frame) {
                Ok(plaintext) => {
                    trace!("read: decrypted frame of {} bytes", plaintext.len());
                    self.recv_buf.extend_from_slice(&plaintext);
                }
                Err(e) => {
                    self.fail();
                    return Err(e.into());
                }
            }
        }
    }
}

impl<R> NoiseReader<R> {
    fn fail(&mut self) {
        self.closed = true;
        self.recv_buf.clear();
        self.recv_offset = 0;
    }
}

/// The encrypting half of a secured connection.
pub struct NoiseWriter<W> {
    io: W,
    cipher: CipherState,
    max_frame_len: usize,
}

#[async_trait]
impl<W: WriteEx> WriteEx for NoiseWriter<W> {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        let max_plaintext = std::cmp::min(MAX_PLAINTEXT_LEN, self.max_frame_len - TAG_LEN);
        let n = std::cmp::min(buf.len(), max_plaintext);
        let ciphertext = self.cipher.encrypt_with_ad(&[], &buf[..n]).map_err(io::Error::from)?;

        trace!("write: sending frame of {} bytes", ciphertext.len());
        self.io.write_all2(&(ciphertext.len() as u16).to_be_bytes()).await?;
        self.io.write_all2(&ciphertext).await?;
        Ok(n)
    }

    async fn flush2(&mut self) -> io::Result<()> {
        self.io.flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.io.close2().await
    }
}
