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

//! ECDSA P-256 keys.
//!
//! Signatures are emitted in ASN.1 DER; verification also accepts the
//! fixed-size form. Public keys travel as SEC1 uncompressed points.

use super::DecodingError;
use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use std::fmt;

/// An ECDSA P-256 keypair.
#[derive(Clone)]
pub struct Keypair {
    secret: SigningKey,
}

impl Keypair {
    /// Generate a new random ECDSA keypair.
    pub fn generate() -> Keypair {
        Keypair {
            secret: SigningKey::random(&mut OsRng),
        }
    }

    /// Sign a message, producing a DER-encoded signature.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let signature: Signature = self.secret.sign(msg);
        signature.to_der().as_bytes().to_vec()
    }

    /// Get the public key of this keypair.
    pub fn public(&self) -> PublicKey {
        PublicKey(*self.secret.verifying_key())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair").field("public", &self.public()).finish()
    }
}

/// An ECDSA P-256 public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Verify a signature on a message. Accepts DER and fixed-size encodings.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        Signature::from_der(sig)
            .or_else(|_| Signature::from_slice(sig))
            .map(|s| self.0.verify(msg, &s).is_ok())
            .unwrap_or(false)
    }

    /// Encode the public key as a SEC1 uncompressed point.
    pub fn encode(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Decode a public key from a SEC1 point.
    pub fn decode(k: &[u8]) -> Result<PublicKey, DecodingError> {
        VerifyingKey::from_sec1_bytes(k)
            .map(PublicKey)
            .map_err(|e| DecodingError::new(format!("invalid ecdsa public key: {}", e)))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(ecdsa) ")?;
        for byte in self.encode().iter() {
            write!(f, "{:x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_encode_decode_roundtrip() {
        let keypair = Keypair::generate();
        let public = keypair.public();
        let encoded = public.encode();
        assert_eq!(encoded.len(), 65);
        assert_eq!(PublicKey::decode(&encoded).unwrap(), public);
    }

    #[test]
    fn fixed_size_signature_also_verifies() {
        let keypair = Keypair::generate();
        let msg = b"message";
        let signature: Signature = keypair.secret.sign(msg);
        assert!(keypair.public().verify(msg, &signature.to_vec()));
    }
}
