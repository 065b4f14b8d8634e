use peerlink_core::identity::DecodingError;
use peerlink_core::transport::TransportError;
use std::{error, fmt, io};

/// Errors of the plaintext exchange.
#[derive(Debug)]
pub enum PlaintextError {
    /// An I/O error on the underlying connection.
    Io(io::Error),
    /// The exchange message could not be decoded.
    InvalidExchange(prost::DecodeError),
    /// The exchange message lacked a public key or id.
    MissingKey,
    /// The public key inside the exchange could not be decoded.
    InvalidKey(DecodingError),
    /// The claimed peer id does not match the presented public key.
    PeerIdMismatch,
}

impl fmt::Display for PlaintextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaintextError::Io(e) => write!(f, "i/o error: {}", e),
            PlaintextError::InvalidExchange(e) => write!(f, "malformed exchange message: {}", e),
            PlaintextError::MissingKey => f.write_str("exchange message carries no key"),
            PlaintextError::InvalidKey(e) => write!(f, "malformed public key: {}", e),
            PlaintextError::PeerIdMismatch => f.write_str("claimed peer id does not match the public key"),
        }
    }
}

impl error::Error for PlaintextError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            PlaintextError::Io(e) => Some(e),
            PlaintextError::InvalidExchange(e) => Some(e),
            PlaintextError::InvalidKey(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PlaintextError {
    fn from(e: io::Error) -> Self {
        PlaintextError::Io(e)
    }
}

impl From<prost::DecodeError> for PlaintextError {
    fn from(e: prost::DecodeError) -> Self {
        PlaintextError::InvalidExchange(e)
    }
}

impl From<PlaintextError> for TransportError {
    fn from(e: PlaintextError) -> Self {
        match e {
            PlaintextError::Io(e) => TransportError::Io(e),
            PlaintextError::PeerIdMismatch => TransportError::PeerIdMismatch,
            e => TransportError::SecurityError(Box::new(e)),
        }
    }
}
