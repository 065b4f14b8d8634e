use peerlink_core::identity::DecodingError;
use peerlink_core::transport::TransportError;
use std::{error, fmt, io};

/// Errors of the Noise handshake and transport phases.
#[derive(Debug)]
pub enum NoiseError {
    /// An I/O error on the underlying connection.
    Io(io::Error),
    /// The remote deviated from the handshake pattern.
    Protocol(&'static str),
    /// AEAD authentication failed while decrypting.
    DecryptFailed,
    /// The per-direction nonce counter would wrap; the channel is dead.
    NonceOverflow,
    /// A frame exceeded the configured maximum length.
    FrameTooLarge(usize),
    /// The identity payload could not be decoded.
    InvalidPayload(prost::DecodeError),
    /// The identity key inside the payload could not be decoded.
    InvalidKey(DecodingError),
    /// The static-key signature in the identity payload did not verify.
    BadSignature,
    /// The authenticated peer is not the peer the caller expected.
    PeerIdMismatch,
    /// Signing the local identity payload failed.
    SigningFailed(String),
}

impl fmt::Display for NoiseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseError::Io(e) => write!(f, "i/o error: {}", e),
            NoiseError::Protocol(msg) => write!(f, "handshake protocol violation: {}", msg),
            NoiseError::DecryptFailed => f.write_str("message authentication failed"),
            NoiseError::NonceOverflow => f.write_str("cipher nonce exhausted"),
            NoiseError::FrameTooLarge(n) => write!(f, "noise frame is too large ({})", n),
            NoiseError::InvalidPayload(e) => write!(f, "malformed identity payload: {}", e),
            NoiseError::InvalidKey(e) => write!(f, "malformed identity key: {}", e),
            NoiseError::BadSignature => f.write_str("identity signature verification failed"),
            NoiseError::PeerIdMismatch => f.write_str("authenticated peer is not the expected peer"),
            NoiseError::SigningFailed(msg) => write!(f, "cannot sign identity payload: {}", msg),
        }
    }
}

impl error::Error for NoiseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            NoiseError::Io(e) => Some(e),
            NoiseError::InvalidPayload(e) => Some(e),
            NoiseError::InvalidKey(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for NoiseError {
    fn from(e: io::Error) -> Self {
        NoiseError::Io(e)
    }
}

impl From<prost::DecodeError> for NoiseError {
    fn from(e: prost::DecodeError) -> Self {
        NoiseError::InvalidPayload(e)
    }
}

impl From<NoiseError> for TransportError {
    fn from(e: NoiseError) -> Self {
        match e {
            NoiseError::PeerIdMismatch => TransportError::PeerIdMismatch,
            NoiseError::Io(e) => TransportError::Io(e),
            e => TransportError::SecurityError(Box::new(e)),
        }
    }
}

impl From<NoiseError> for io::Error {
    fn from(e: NoiseError) -> Self {
        match e {
            NoiseError::Io(e) => e,
            e => io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
        }
    }
}
