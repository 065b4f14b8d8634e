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

use crate::PublicKey;
use multihash::{Code, Multihash, Sha2_256};
use std::{cmp, convert::TryFrom, fmt, str::FromStr};

/// Public keys whose protobuf encoding is at most this long are embedded
/// verbatim in the peer id via the identity multihash code.
const MAX_INLINE_KEY_LENGTH: usize = 42;

/// Identifier of a peer of the network.
///
/// The data is a multihash of the protobuf-encoded public key of the peer.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerId {
    multihash: Multihash,
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerId").field(&self.to_base58()).finish()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_base58().fmt(f)
    }
}

impl PeerId {
    /// Builds a `PeerId` from a public key.
    pub fn from_public_key(key: PublicKey) -> PeerId {
        let key_enc = key.into_protobuf_encoding();
        let multihash = if key_enc.len() <= MAX_INLINE_KEY_LENGTH {
            multihash::wrap(Code::Identity, &key_enc)
        } else {
            Sha2_256::digest(&key_enc)
        };
        PeerId { multihash }
    }

    /// Checks whether `data` is a valid `PeerId`. If so, returns the `PeerId`.
    /// If not, returns back the data as an error.
    pub fn from_bytes(data: Vec<u8>) -> Result<PeerId, Vec<u8>> {
        match Multihash::from_bytes(data) {
            Ok(multihash) => PeerId::from_multihash(multihash).map_err(Multihash::into_bytes),
            Err(err) => Err(err.data),
        }
    }

    /// Tries to turn a `Multihash` into a `PeerId`.
    ///
    /// Only the SHA-256 and identity codes name peers; everything else is
    /// handed back unchanged.
    pub fn from_multihash(multihash: Multihash) -> Result<PeerId, Multihash> {
        match multihash.algorithm() {
            Code::Sha2_256 => Ok(PeerId { multihash }),
            Code::Identity if multihash.digest().len() <= MAX_INLINE_KEY_LENGTH => Ok(PeerId { multihash }),
            _ => Err(multihash),
        }
    }

    /// Returns a raw bytes representation of this `PeerId`.
    pub fn into_bytes(self) -> Vec<u8> {
        self.multihash.into_bytes()
    }

    /// Returns a raw bytes representation of this `PeerId`.
    pub fn as_bytes(&self) -> &[u8] {
        self.multihash.as_bytes()
    }

    /// Returns a base-58 encoded string of this `PeerId`.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.as_bytes()).into_string()
    }

    /// Checks whether the public key passed as parameter matches the
    /// public key of this `PeerId`.
    pub fn is_public_key(&self, public_key: &PublicKey) -> bool {
        *self == PeerId::from_public_key(public_key.clone())
    }

    /// Recovers the public key embedded in this `PeerId`.
    ///
    /// Only succeeds if the peer id was built with the identity code, i.e.
    /// the key was short enough to inline.
    pub fn extract_public_key(&self) -> Option<PublicKey> {
        if self.multihash.algorithm() != Code::Identity {
            return None;
        }
        PublicKey::from_protobuf_encoding(self.multihash.digest()).ok()
    }
}

impl From<PublicKey> for PeerId {
    fn from(key: PublicKey) -> PeerId {
        PeerId::from_public_key(key)
    }
}

impl TryFrom<Vec<u8>> for PeerId {
    type Error = Vec<u8>;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        PeerId::from_bytes(value)
    }
}

impl TryFrom<Multihash> for PeerId {
    type Error = Multihash;

    fn try_from(value: Multihash) -> Result<Self, Self::Error> {
        PeerId::from_multihash(value)
    }
}

impl PartialOrd for PeerId {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerId {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl FromStr for PeerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s).into_vec().map_err(|_| ParseError::Base58)?;
        PeerId::from_bytes(bytes).map_err(|_| ParseError::MultihashInvalid)
    }
}

/// Error when parsing a `PeerId` from a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Base58,
    MultihashInvalid,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Base58 => f.write_str("base-58 decode error"),
            ParseError::MultihashInvalid => f.write_str("decoded bytes are not a valid peer id"),
        }
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ed25519, Keypair};

    #[test]
    fn peer_id_is_public_key() {
        let key = Keypair::generate_ed25519().public();
        let peer_id = key.clone().into_peer_id();
        assert!(peer_id.is_public_key(&key));
    }

    #[test]
    fn peer_id_into_bytes_then_from_bytes() {
        let peer_id = Keypair::generate_ed25519().public().into_peer_id();
        let again = PeerId::from_bytes(peer_id.clone().into_bytes()).unwrap();
        assert_eq!(again, peer_id);
    }

    #[test]
    fn peer_id_to_base58_then_back() {
        let peer_id = Keypair::generate_ecdsa().public().into_peer_id();
        let second: PeerId = peer_id.to_base58().parse().unwrap();
        assert_eq!(peer_id, second);
    }

    #[test]
    fn extract_public_key_only_for_inline_keys() {
        // Ed25519 keys are short enough to inline.
        let key = Keypair::generate_ed25519().public();
        let peer_id = key.clone().into_peer_id();
        assert_eq!(peer_id.extract_public_key(), Some(key));

        // An ECDSA SEC1 point pushes the encoding past the inline limit.
        let key = Keypair::generate_ecdsa().public();
        let peer_id = key.into_peer_id();
        assert_eq!(peer_id.extract_public_key(), None);
    }

    #[test]
    fn ordering_is_lexicographic_over_bytes() {
        let a = Keypair::generate_ed25519().public().into_peer_id();
        let b = Keypair::generate_ed25519().public().into_peer_id();
        assert_eq!(a.cmp(&b), a.as_bytes().cmp(b.as_bytes()));
    }

    #[test]
    fn well_known_ed25519_peer_id() {
        // An all-zero Ed25519 point: protobuf form is 08 01 12 20 || 32 zero
        // bytes, inlined via the identity code.
        let key = ed25519::PublicKey::decode(&[0u8; 32]).unwrap();
        let public = PublicKey::Ed25519(key);

        let encoded = public.clone().into_protobuf_encoding();
        assert_eq!(&encoded[..4], &[0x08, 0x01, 0x12, 0x20]);
        assert_eq!(encoded.len(), 36);

        let peer_id = public.into_peer_id();
        assert_eq!(peer_id.as_bytes()[..2], [0x00, 0x24]);
        assert_eq!(peer_id.to_base58(), "12D3KooW9pNAk8aiBuGVQtWRdbkLmo5qVL3e2h5UxbN2Nz9ttwiw");
    }
}
