//! Length-prefixed framing of handshake messages.
//!
//! Every noise message travels as `[2 bytes big-endian length][content]`,
//! content at most 65 535 bytes.

use crate::error::NoiseError;
use crate::protocol::MAX_FRAME_LEN;
use log::trace;
use peerlink_traits::{ReadEx, WriteEx};

/// Frame-oriented view of the raw connection, used during the handshake.
pub(crate) struct NoiseFramed<T> {
    io: T,
    max_frame_len: usize,
}

impl<T> NoiseFramed<T> {
    pub(crate) fn new(io: T, max_frame_len: usize) -> Self {
        NoiseFramed {
            io,
            max_frame_len: std::cmp::min(max_frame_len, MAX_FRAME_LEN),
        }
    }

    pub(crate) fn into_inner(self) -> T {
        self.io
    }
}

impl<T: ReadEx> NoiseFramed<T> {
    pub(crate) async fn recv_frame(&mut self) -> Result<Vec<u8>, NoiseError> {
        let mut len_buf = [0u8; 2];
        self.io.read_exact2(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf) as usize;
        if len > self.max_frame_len {
            return Err(NoiseError::FrameTooLarge(len));
        }
        trace!("receiving noise frame of {} bytes", len);
        let mut frame = vec![0u8; len];
        self.io.read_exact2(&mut frame).await?;
        Ok(frame)
    }
}

impl<T: WriteEx> NoiseFramed<T> {
    pub(crate) async fn send_frame(&mut self, frame: &[u8]) -> Result<(), NoiseError> {
        if frame.len() > self.max_frame_len {
            return Err(NoiseError::FrameTooLarge(frame.len()));
        }
        trace!("sending noise frame of {} bytes", frame.len());
        self.io.write_all2(&(frame.len() as u16).to_be_bytes()).await?;
        self.io.write_all2(frame).await?;
        self.io.flush2().await?;
        Ok(())
    }
}
