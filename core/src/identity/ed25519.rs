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

//! Ed25519 keys.

use super::DecodingError;
use ed25519_dalek::{Signer as _, Verifier as _};
use rand::rngs::OsRng;
use std::convert::TryInto;
use std::fmt;
use zeroize::Zeroize;

/// An Ed25519 keypair.
#[derive(Clone)]
pub struct Keypair(ed25519_dalek::SigningKey);

impl Keypair {
    /// Generate a new Ed25519 keypair.
    pub fn generate() -> Keypair {
        Keypair(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }

    /// Encode the keypair into a byte array by concatenating the bytes
    /// of the secret scalar and the compressed public point.
    pub fn encode(&self) -> [u8; 64] {
        self.0.to_keypair_bytes()
    }

    /// Decode a keypair from the format produced by `encode`,
    /// zeroing the input on success.
    pub fn decode(kp: &mut [u8]) -> Result<Keypair, DecodingError> {
        let bytes: [u8; 64] = (&*kp)
            .try_into()
            .map_err(|_| DecodingError::new("expected 64 bytes of ed25519 keypair".to_string()))?;
        let keypair = ed25519_dalek::SigningKey::from_keypair_bytes(&bytes)
            .map(Keypair)
            .map_err(|e| DecodingError::new(format!("invalid ed25519 keypair: {}", e)))?;
        kp.zeroize();
        Ok(keypair)
    }

    /// Sign a message using the private key of this keypair.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.0.sign(msg).to_bytes().to_vec()
    }

    /// Get the public key of this keypair.
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair").field("public", &self.public()).finish()
    }
}

/// An Ed25519 public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(ed25519_dalek::VerifyingKey);

impl PublicKey {
    /// Verify the Ed25519 signature on a message using the public key.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        ed25519_dalek::Signature::from_slice(sig)
            .and_then(|s| self.0.verify(msg, &s))
            .is_ok()
    }

    /// Encode the public key into a byte array in compressed form.
    pub fn encode(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Decode a public key from a byte array as produced by `encode`.
    pub fn decode(k: &[u8]) -> Result<PublicKey, DecodingError> {
        let bytes: [u8; 32] = k
            .try_into()
            .map_err(|_| DecodingError::new("expected 32 bytes of ed25519 public key".to_string()))?;
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map(PublicKey)
            .map_err(|e| DecodingError::new(format!("invalid ed25519 public key: {}", e)))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(ed25519) ")?;
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
    fn keypair_encode_decode_roundtrip() {
        let keypair = Keypair::generate();
        let public = keypair.public();
        let mut encoded = keypair.encode();

        let decoded = Keypair::decode(&mut encoded).unwrap();
        assert_eq!(decoded.public(), public);
        // The input buffer is wiped after a successful decode.
        assert_eq!(encoded, [0u8; 64]);
    }

    #[test]
    fn public_key_decode_rejects_garbage() {
        assert!(PublicKey::decode(&[1, 2, 3]).is_err());
    }
}
