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

//! Connection-oriented transport abstraction.
//!
//! Transports themselves (TCP, QUIC, ...) live outside this crate; they
//! plug in through [`Transport`] and [`TransportListener`] and hand raw
//! connections to the [upgrade machinery](crate::transport::upgrade).

pub mod upgrade;

use crate::Multiaddr;
use async_trait::async_trait;
use std::{error, fmt, io};

/// A transport provides connection-oriented communication between two
/// peers through ordered streams of data (i.e. connections).
#[async_trait]
pub trait Transport: Send {
    /// The raw connection produced by this transport.
    type Output: Send;
    /// The listener handed out by `listen_on`.
    type Listener: TransportListener<Output = Self::Output>;

    /// Listens on the given multiaddr.
    fn listen_on(self, addr: Multiaddr) -> Result<Self::Listener, TransportError>;

    /// Dials the given multiaddr.
    async fn dial(self, addr: Multiaddr) -> Result<Self::Output, TransportError>;
}

/// A listener for incoming connections of a transport.
#[async_trait]
pub trait TransportListener: Send {
    /// The raw connection produced by this listener.
    type Output: Send;

    /// Accepts the next pending incoming connection.
    async fn accept(&mut self) -> Result<Self::Output, TransportError>;

    /// The multiaddr this listener is bound to.
    fn multi_addr(&self) -> Multiaddr;
}

/// Addressing information of a connection, at any layer of the stack.
pub trait ConnectionInfo {
    fn local_multiaddr(&self) -> Multiaddr;
    fn remote_multiaddr(&self) -> Multiaddr;
}

/// Errors raised while setting up or upgrading a connection.
#[derive(Debug)]
pub enum TransportError {
    /// An I/O error on the underlying socket.
    Io(io::Error),
    /// The given multiaddr is not supported by this transport.
    MultiaddrNotSupported(Multiaddr),
    /// No protocol could be agreed upon.
    NegotiationFailed,
    /// The security handshake did not finish within the configured deadline.
    Timeout,
    /// The authenticated remote identity does not match the expected peer.
    PeerIdMismatch,
    /// The security upgrade failed; the raw connection has been closed.
    SecurityError(Box<dyn error::Error + Send + Sync>),
    /// The stream muxer reported a fatal session error.
    StreamMuxerError(Box<dyn error::Error + Send + Sync>),
    /// The connection or session has been shut down.
    ConnectionClosed,
    /// An unclassified internal error.
    Internal,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "i/o error: {}", e),
            TransportError::MultiaddrNotSupported(a) => write!(f, "multiaddr not supported: {}", a),
            TransportError::NegotiationFailed => f.write_str("protocol negotiation failed"),
            TransportError::Timeout => f.write_str("handshake timed out"),
            TransportError::PeerIdMismatch => f.write_str("remote peer id does not match expectation"),
            TransportError::SecurityError(e) => write!(f, "security upgrade failed: {}", e),
            TransportError::StreamMuxerError(e) => write!(f, "stream muxer failed: {}", e),
            TransportError::ConnectionClosed => f.write_str("connection is closed"),
            TransportError::Internal => f.write_str("internal error"),
        }
    }
}

impl error::Error for TransportError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            TransportError::SecurityError(e) => Some(&**e),
            TransportError::StreamMuxerError(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}
