//! An in-memory duplex pipe.
//!
//! A lossless, ordered byte pipe connecting two endpoints in the same
//! process. This is the transport used by loopback tests across the stack;
//! it is deliberately not a `Transport` implementation.

use crate::transport::ConnectionInfo;
use crate::Multiaddr;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::prelude::*;
use peerlink_multiaddr::Protocol;
use peerlink_traits::{ReadEx, SplitEx, WriteEx};
use std::io;

/// Creates a connected pair of pipe endpoints.
pub fn pipe() -> (PipeEnd, PipeEnd) {
    let (tx_ab, rx_ab) = mpsc::unbounded();
    let (tx_ba, rx_ba) = mpsc::unbounded();

    let addr_a = Multiaddr::from(Protocol::Memory(rand::random::<u32>() as u64));
    let addr_b = Multiaddr::from(Protocol::Memory(rand::random::<u32>() as u64));

    let a = PipeEnd {
        reader: PipeReader {
            receiver: rx_ba,
            buffer: Vec::new(),
            offset: 0,
        },
        writer: PipeWriter { sender: tx_ab },
        local_addr: addr_a.clone(),
        remote_addr: addr_b.clone(),
    };
    let b = PipeEnd {
        reader: PipeReader {
            receiver: rx_ab,
            buffer: Vec::new(),
            offset: 0,
        },
        writer: PipeWriter { sender: tx_ba },
        local_addr: addr_b,
        remote_addr: addr_a,
    };
    (a, b)
}

/// One endpoint of an in-memory duplex pipe.
pub struct PipeEnd {
    reader: PipeReader,
    writer: PipeWriter,
    local_addr: Multiaddr,
    remote_addr: Multiaddr,
}

#[async_trait]
impl ReadEx for PipeEnd {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read2(buf).await
    }
}

#[async_trait]
impl WriteEx for PipeEnd {
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

impl SplitEx for PipeEnd {
    type Reader = PipeReader;
    type Writer = PipeWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }
}

impl ConnectionInfo for PipeEnd {
    fn local_multiaddr(&self) -> Multiaddr {
        self.local_addr.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.remote_addr.clone()
    }
}

/// The reading half of a pipe endpoint.
pub struct PipeReader {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    buffer: Vec<u8>,
    offset: usize,
}

#[async_trait]
impl ReadEx for PipeReader {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.offset == self.buffer.len() {
            match self.receiver.next().await {
                Some(chunk) => {
                    self.buffer = chunk;
                    self.offset = 0;
                }
                // The sending side is gone: clean end-of-stream.
                None => return Ok(0),
            }
        }
        let n = std::cmp::min(buf.len(), self.buffer.len() - self.offset);
        buf[..n].copy_from_slice(&self.buffer[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

/// The writing half of a pipe endpoint.
pub struct PipeWriter {
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl WriteEx for PipeWriter {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.sender
            .unbounded_send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    async fn flush2(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.sender.close_channel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;

    #[test]
    fn bytes_cross_in_order() {
        task::block_on(async {
            let (mut a, mut b) = pipe();
            a.write_all2(b"hello").await.unwrap();
            a.write_all2(b" world").await.unwrap();

            let mut buf = [0u8; 11];
            b.read_exact2(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello world");
        })
    }

    #[test]
    fn close_signals_eof() {
        task::block_on(async {
            let (mut a, mut b) = pipe();
            a.write_all2(b"bye").await.unwrap();
            a.close2().await.unwrap();

            let mut buf = [0u8; 3];
            b.read_exact2(&mut buf).await.unwrap();
            assert_eq!(b.read2(&mut buf).await.unwrap(), 0);
        })
    }

    #[test]
    fn split_halves_work_independently() {
        task::block_on(async {
            let (a, mut b) = pipe();
            let (mut ra, mut wa) = a.split();

            b.write_all2(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            ra.read_exact2(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");

            wa.write_all2(b"pong").await.unwrap();
            b.read_exact2(&mut buf).await.unwrap();
            assert_eq!(&buf, b"pong");
        })
    }
}
