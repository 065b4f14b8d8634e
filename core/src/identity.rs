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

//! Node identity keys.
//!
//! A node's identity is a [`Keypair`]; its public half travels the wire in
//! a protobuf envelope whose bytes also seed the [`PeerId`] derivation, so
//! the encoding must stay byte-for-byte stable.

pub mod ecdsa;
pub mod ed25519;

use crate::keys_proto;
use crate::PeerId;
use prost::Message;
use std::{error, fmt};

/// Identity keypair of a node.
///
/// Ed25519 and ECDSA P-256 can sign and verify. Secp256k1 and RSA public
/// keys are accepted off the wire for interop but no local signing with
/// them ever takes place.
#[derive(Clone)]
pub enum Keypair {
    Ed25519(ed25519::Keypair),
    Ecdsa(ecdsa::Keypair),
}

impl Keypair {
    /// Generate a new Ed25519 keypair.
    pub fn generate_ed25519() -> Keypair {
        Keypair::Ed25519(ed25519::Keypair::generate())
    }

    /// Generate a new ECDSA P-256 keypair.
    pub fn generate_ecdsa() -> Keypair {
        Keypair::Ecdsa(ecdsa::Keypair::generate())
    }

    /// Sign a message with this keypair.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, SigningError> {
        match self {
            Keypair::Ed25519(k) => Ok(k.sign(msg)),
            Keypair::Ecdsa(k) => Ok(k.sign(msg)),
        }
    }

    /// Get the public half of this keypair.
    pub fn public(&self) -> PublicKey {
        match self {
            Keypair::Ed25519(k) => PublicKey::Ed25519(k.public()),
            Keypair::Ecdsa(k) => PublicKey::Ecdsa(k.public()),
        }
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Keypair::Ed25519(_) => f.write_str("Keypair::Ed25519(..)"),
            Keypair::Ecdsa(_) => f.write_str("Keypair::Ecdsa(..)"),
        }
    }
}

/// The public key of a node identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    Ed25519(ed25519::PublicKey),
    Ecdsa(ecdsa::PublicKey),
    /// Carried verbatim; verification always reports failure.
    Secp256k1(Vec<u8>),
    /// Carried verbatim; verification always reports failure.
    Rsa(Vec<u8>),
}

impl PublicKey {
    /// Verify a signature for a message with this key.
    ///
    /// Key types without local algorithm support never validate anything.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        match self {
            PublicKey::Ed25519(k) => k.verify(msg, sig),
            PublicKey::Ecdsa(k) => k.verify(msg, sig),
            PublicKey::Secp256k1(_) | PublicKey::Rsa(_) => false,
        }
    }

    /// The canonical protobuf encoding of this key.
    ///
    /// `PeerId` derivation hashes exactly these bytes.
    pub fn into_protobuf_encoding(self) -> Vec<u8> {
        let proto = match self {
            PublicKey::Ed25519(key) => keys_proto::PublicKey {
                r#type: keys_proto::KeyType::Ed25519 as i32,
                data: key.encode().to_vec(),
            },
            PublicKey::Ecdsa(key) => keys_proto::PublicKey {
                r#type: keys_proto::KeyType::Ecdsa as i32,
                data: key.encode(),
            },
            PublicKey::Secp256k1(data) => keys_proto::PublicKey {
                r#type: keys_proto::KeyType::Secp256k1 as i32,
                data,
            },
            PublicKey::Rsa(data) => keys_proto::PublicKey {
                r#type: keys_proto::KeyType::Rsa as i32,
                data,
            },
        };
        proto.encode_to_vec()
    }

    /// Decode a public key from its protobuf encoding.
    pub fn from_protobuf_encoding(bytes: &[u8]) -> Result<PublicKey, DecodingError> {
        let pubkey = keys_proto::PublicKey::decode(bytes)
            .map_err(|e| DecodingError::new(format!("malformed public key protobuf: {}", e)))?;

        let key_type = keys_proto::KeyType::from_i32(pubkey.r#type)
            .ok_or_else(|| DecodingError::new(format!("unknown key type: {}", pubkey.r#type)))?;

        match key_type {
            keys_proto::KeyType::Ed25519 => ed25519::PublicKey::decode(&pubkey.data).map(PublicKey::Ed25519),
            keys_proto::KeyType::Ecdsa => ecdsa::PublicKey::decode(&pubkey.data).map(PublicKey::Ecdsa),
            keys_proto::KeyType::Secp256k1 => Ok(PublicKey::Secp256k1(pubkey.data)),
            keys_proto::KeyType::Rsa => Ok(PublicKey::Rsa(pubkey.data)),
        }
    }

    /// Derive the `PeerId` of this key.
    pub fn into_peer_id(self) -> PeerId {
        self.into()
    }
}

/// An error during decoding of key material.
#[derive(Debug)]
pub struct DecodingError {
    msg: String,
}

impl DecodingError {
    pub(crate) fn new(msg: String) -> Self {
        DecodingError { msg }
    }
}

impl fmt::Display for DecodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key decoding error: {}", self.msg)
    }
}

impl error::Error for DecodingError {}

/// An error during signing of a message.
#[derive(Debug)]
pub struct SigningError {
    msg: String,
}

impl fmt::Display for SigningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key signing error: {}", self.msg)
    }
}

impl error::Error for SigningError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_sign_verify() {
        let keypair = Keypair::generate_ed25519();
        let msg = b"a message to authenticate";
        let sig = keypair.sign(msg).unwrap();

        let public = keypair.public();
        assert!(public.verify(msg, &sig));
        assert!(!public.verify(b"a different message", &sig));
        assert!(!public.verify(msg, &[0u8; 64]));
    }

    #[test]
    fn ecdsa_sign_verify() {
        let keypair = Keypair::generate_ecdsa();
        let msg = b"a message to authenticate";
        let sig = keypair.sign(msg).unwrap();

        let public = keypair.public();
        assert!(public.verify(msg, &sig));
        assert!(!public.verify(b"a different message", &sig));
    }

    #[test]
    fn protobuf_roundtrip() {
        for keypair in &[Keypair::generate_ed25519(), Keypair::generate_ecdsa()] {
            let public = keypair.public();
            let encoded = public.clone().into_protobuf_encoding();
            let decoded = PublicKey::from_protobuf_encoding(&encoded).unwrap();
            assert_eq!(decoded, public);
            // Stable bytes: encoding twice yields the same output.
            assert_eq!(decoded.into_protobuf_encoding(), encoded);
        }
    }

    #[test]
    fn foreign_key_types_never_verify() {
        let key = PublicKey::Secp256k1(vec![2u8; 33]);
        assert!(!key.verify(b"msg", &[0u8; 64]));

        let encoded = key.clone().into_protobuf_encoding();
        assert_eq!(PublicKey::from_protobuf_encoding(&encoded).unwrap(), key);
    }
}
