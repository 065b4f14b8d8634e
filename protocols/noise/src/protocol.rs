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

//! The Noise XX handshake state machine and its cipher primitives.
//!
//! Pattern:
//!
//! ```text
//! -> e
//! <- e, ee, s, es
//! -> s, se
//! ```
//!
//! Curve25519 DH, ChaCha20-Poly1305 AEAD, SHA-256 hashing, HKDF key
//! derivation. Message semantics follow the Noise specification; nothing
//! here does I/O.

use crate::error::NoiseError;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// The exact protocol name hashed into the initial symmetric state.
pub const PROTOCOL_NAME: &[u8] = b"Noise_XX_25519_ChaChaPoly_SHA256";

/// Maximum length of one noise frame on the wire, tag included.
pub const MAX_FRAME_LEN: usize = 65535;

/// Poly1305 authentication tag length.
pub const TAG_LEN: usize = 16;

/// Maximum plaintext length fitting into one frame.
pub const MAX_PLAINTEXT_LEN: usize = MAX_FRAME_LEN - TAG_LEN;

const DH_LEN: usize = 32;

/// Which side of the handshake we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// A Curve25519 keypair, used for both static and ephemeral handshake keys.
pub struct DhKeypair {
    secret: x25519_dalek::StaticSecret,
    public: [u8; DH_LEN],
}

impl DhKeypair {
    pub fn generate() -> Self {
        let secret = x25519_dalek::StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = *x25519_dalek::PublicKey::from(&secret).as_bytes();
        DhKeypair { secret, public }
    }

    pub fn public(&self) -> &[u8; DH_LEN] {
        &self.public
    }

    fn dh(&self, remote: &[u8; DH_LEN]) -> [u8; DH_LEN] {
        *self
            .secret
            .diffie_hellman(&x25519_dalek::PublicKey::from(*remote))
            .as_bytes()
    }
}

/// An AEAD key plus the per-direction 64-bit nonce counter.
///
/// The nonce is read and incremented in the same call, and only on
/// success for decryption, so every authenticated message consumes the
/// counter exactly once. Counter exhaustion fails closed.
pub struct CipherState {
    key: Option<[u8; 32]>,
    nonce: u64,
}

impl CipherState {
    fn empty() -> Self {
        CipherState { key: None, nonce: 0 }
    }

    fn with_key(key: [u8; 32]) -> Self {
        CipherState { key: Some(key), nonce: 0 }
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// The number of messages processed in this direction.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Encrypts `plaintext` under the current nonce with `ad` authenticated.
    ///
    /// Without a key this is the identity function (pre-key handshake
    /// messages travel in the clear, but are still hashed).
    pub fn encrypt_with_ad(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let key = match &self.key {
            Some(key) => key,
            None => return Ok(plaintext.to_vec()),
        };
        if self.nonce == u64::max_value() {
            return Err(NoiseError::NonceOverflow);
        }
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes(self.nonce)), Payload { msg: plaintext, aad: ad })
            .map_err(|_| NoiseError::DecryptFailed)?;
        self.nonce += 1;
        Ok(ciphertext)
    }

    /// Decrypts `ciphertext`; the counter advances only when the tag
    /// verifies.
    pub fn decrypt_with_ad(&mut self, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let key = match &self.key {
            Some(key) => key,
            None => return Ok(ciphertext.to_vec()),
        };
        if self.nonce == u64::max_value() {
            return Err(NoiseError::NonceOverflow);
        }
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes(self.nonce)), Payload { msg: ciphertext, aad: ad })
            .map_err(|_| NoiseError::DecryptFailed)?;
        self.nonce += 1;
        Ok(plaintext)
    }
}

impl Drop for CipherState {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// 96-bit AEAD nonce: 32 zero bits, then the counter in little endian.
fn nonce_bytes(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// The symmetric half of the handshake: chaining key, transcript hash and
/// the current message cipher.
pub struct SymmetricState {
    ck: [u8; 32],
    h: [u8; 32],
    cipher: CipherState,
}

impl SymmetricState {
    pub fn new(protocol_name: &[u8]) -> Self {
        let h = if protocol_name.len() <= 32 {
            let mut h = [0u8; 32];
            h[..protocol_name.len()].copy_from_slice(protocol_name);
            h
        } else {
            Sha256::digest(protocol_name).into()
        };
        SymmetricState {
            ck: h,
            h,
            cipher: CipherState::empty(),
        }
    }

    pub fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(&self.h);
        hasher.update(data);
        self.h = hasher.finalize().into();
    }

    pub fn mix_key(&mut self, ikm: &[u8]) {
        let (ck, temp_key) = hkdf2(&self.ck, ikm);
        self.ck = ck;
        self.cipher = CipherState::with_key(temp_key);
    }

    pub fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let h = self.h;
        let ciphertext = self.cipher.encrypt_with_ad(&h, plaintext)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    pub fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let h = self.h;
        let plaintext = self.cipher.decrypt_with_ad(&h, ciphertext)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// Derives the two transport cipher states. The first encrypts
    /// initiator-to-responder traffic, the second the other direction.
    pub fn split(&self) -> (CipherState, CipherState) {
        let (k1, k2) = hkdf2(&self.ck, &[]);
        (CipherState::with_key(k1), CipherState::with_key(k2))
    }

    /// The current transcript hash, for tests and channel binding.
    pub fn handshake_hash(&self) -> &[u8; 32] {
        &self.h
    }
}

impl Drop for SymmetricState {
    fn drop(&mut self) {
        self.ck.zeroize();
    }
}

fn hkdf2(ck: &[u8; 32], ikm: &[u8]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(Some(&ck[..]), ikm);
    let mut okm = [0u8; 64];
    hk.expand(&[], &mut okm).expect("64 bytes is a valid hkdf output length");
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..]);
    okm.zeroize();
    (first, second)
}

/// The full XX handshake state of one party.
pub struct HandshakeState {
    symmetric: SymmetricState,
    role: Role,
    local_static: DhKeypair,
    local_ephemeral: Option<DhKeypair>,
    remote_static: Option<[u8; DH_LEN]>,
    remote_ephemeral: Option<[u8; DH_LEN]>,
}

impl HandshakeState {
    pub fn new(role: Role, local_static: DhKeypair) -> Self {
        let mut symmetric = SymmetricState::new(PROTOCOL_NAME);
        // Empty prologue.
        symmetric.mix_hash(&[]);
        HandshakeState {
            symmetric,
            role,
            local_static,
            local_ephemeral: None,
            remote_static: None,
            remote_ephemeral: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The public half of the local static key.
    pub fn local_static_public(&self) -> &[u8; DH_LEN] {
        self.local_static.public()
    }

    /// The remote static key, known after message 2 (initiator) or
    /// message 3 (responder).
    pub fn remote_static(&self) -> Option<&[u8; DH_LEN]> {
        self.remote_static.as_ref()
    }

    /// `-> e`
    pub fn write_message_1(&mut self, payload: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.role != Role::Initiator {
            return Err(NoiseError::Protocol("only the initiator writes message 1"));
        }
        let e = DhKeypair::generate();
        let mut message = e.public().to_vec();
        self.symmetric.mix_hash(e.public());
        self.local_ephemeral = Some(e);
        message.extend(self.symmetric.encrypt_and_hash(payload)?);
        Ok(message)
    }

    /// `-> e`, receiving side.
    pub fn read_message_1(&mut self, message: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.role != Role::Responder {
            return Err(NoiseError::Protocol("only the responder reads message 1"));
        }
        let (re, rest) = take_dh(message)?;
        self.symmetric.mix_hash(&re);
        self.remote_ephemeral = Some(re);
        self.symmetric.decrypt_and_hash(rest)
    }

    /// `<- e, ee, s, es`
    pub fn write_message_2(&mut self, payload: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.role != Role::Responder {
            return Err(NoiseError::Protocol("only the responder writes message 2"));
        }
        let remote_ephemeral = self.remote_ephemeral.ok_or(NoiseError::Protocol("message 1 not received"))?;

        let e = DhKeypair::generate();
        let mut message = e.public().to_vec();
        self.symmetric.mix_hash(e.public());

        self.symmetric.mix_key(&e.dh(&remote_ephemeral));
        self.local_ephemeral = Some(e);

        message.extend(self.symmetric.encrypt_and_hash(&self.local_static.public)?);
        self.symmetric.mix_key(&self.local_static.dh(&remote_ephemeral));
        message.extend(self.symmetric.encrypt_and_hash(payload)?);
        Ok(message)
    }

    /// `<- e, ee, s, es`, receiving side.
    pub fn read_message_2(&mut self, message: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.role != Role::Initiator {
            return Err(NoiseError::Protocol("only the initiator reads message 2"));
        }
        let local_ephemeral = self.local_ephemeral.take().ok_or(NoiseError::Protocol("message 1 not sent"))?;

        let (re, rest) = take_dh(message)?;
        self.symmetric.mix_hash(&re);
        self.remote_ephemeral = Some(re);

        self.symmetric.mix_key(&local_ephemeral.dh(&re));

        if rest.len() < DH_LEN + TAG_LEN {
            return Err(NoiseError::Protocol("message 2 is too short"));
        }
        let (static_ct, rest) = rest.split_at(DH_LEN + TAG_LEN);
        let rs = to_dh(&self.symmetric.decrypt_and_hash(static_ct)?)?;
        self.remote_static = Some(rs);

        self.symmetric.mix_key(&local_ephemeral.dh(&rs));
        self.local_ephemeral = Some(local_ephemeral);
        self.symmetric.decrypt_and_hash(rest)
    }

    /// `-> s, se`
    pub fn write_message_3(&mut self, payload: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.role != Role::Initiator {
            return Err(NoiseError::Protocol("only the initiator writes message 3"));
        }
        let remote_ephemeral = self.remote_ephemeral.ok_or(NoiseError::Protocol("message 2 not received"))?;

        let mut message = self.symmetric.encrypt_and_hash(&self.local_static.public)?;
        self.symmetric.mix_key(&self.local_static.dh(&remote_ephemeral));
        message.extend(self.symmetric.encrypt_and_hash(payload)?);
        Ok(message)
    }

    /// `-> s, se`, receiving side.
    pub fn read_message_3(&mut self, message: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.role != Role::Responder {
            return Err(NoiseError::Protocol("only the responder reads message 3"));
        }
        let local_ephemeral = self.local_ephemeral.take().ok_or(NoiseError::Protocol("message 2 not sent"))?;

        if message.len() < DH_LEN + TAG_LEN {
            return Err(NoiseError::Protocol("message 3 is too short"));
        }
        let (static_ct, rest) = message.split_at(DH_LEN + TAG_LEN);
        let rs = to_dh(&self.symmetric.decrypt_and_hash(static_ct)?)?;
        self.remote_static = Some(rs);

        self.symmetric.mix_key(&local_ephemeral.dh(&rs));
        self.local_ephemeral = Some(local_ephemeral);
        self.symmetric.decrypt_and_hash(rest)
    }

    /// Finishes the handshake, yielding `(send, receive)` transport cipher
    /// states for this role.
    pub fn into_transport(self) -> Result<(CipherState, CipherState), NoiseError> {
        if self.remote_static.is_none() {
            return Err(NoiseError::Protocol("handshake is not complete"));
        }
        let (initiator_to_responder, responder_to_initiator) = self.symmetric.split();
        match self.role {
            Role::Initiator => Ok((initiator_to_responder, responder_to_initiator)),
            Role::Responder => Ok((responder_to_initiator, initiator_to_responder)),
        }
    }
}

fn take_dh(message: &[u8]) -> Result<([u8; DH_LEN], &[u8]), NoiseError> {
    if message.len() < DH_LEN {
        return Err(NoiseError::Protocol("message is shorter than a public key"));
    }
    let (key, rest) = message.split_at(DH_LEN);
    Ok((to_dh(key)?, rest))
}

fn to_dh(bytes: &[u8]) -> Result<[u8; DH_LEN], NoiseError> {
    if bytes.len() != DH_LEN {
        return Err(NoiseError::Protocol("public key has the wrong length"));
    }
    let mut key = [0u8; DH_LEN];
    key.copy_from_slice(bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_handshake() -> (HandshakeState, HandshakeState) {
        let mut initiator = HandshakeState::new(Role::Initiator, DhKeypair::generate());
        let mut responder = HandshakeState::new(Role::Responder, DhKeypair::generate());

        let m1 = initiator.write_message_1(b"").unwrap();
        assert_eq!(responder.read_message_1(&m1).unwrap(), b"");

        let m2 = responder.write_message_2(b"resp-payload").unwrap();
        assert_eq!(initiator.read_message_2(&m2).unwrap(), b"resp-payload");

        let m3 = initiator.write_message_3(b"init-payload").unwrap();
        assert_eq!(responder.read_message_3(&m3).unwrap(), b"init-payload");

        (initiator, responder)
    }

    #[test]
    fn handshake_authenticates_static_keys() {
        let (initiator, responder) = run_handshake();
        assert_eq!(initiator.remote_static(), Some(responder.local_static.public()));
        assert_eq!(responder.remote_static(), Some(initiator.local_static.public()));
        assert_eq!(initiator.symmetric.handshake_hash(), responder.symmetric.handshake_hash());
    }

    #[test]
    fn transport_ciphers_are_mirrored() {
        let (initiator, responder) = run_handshake();
        let (mut i_send, mut i_recv) = initiator.into_transport().unwrap();
        let (mut r_send, mut r_recv) = responder.into_transport().unwrap();

        let ct = i_send.encrypt_with_ad(&[], b"hello").unwrap();
        assert_ne!(&ct[..5], b"hello");
        assert_eq!(r_recv.decrypt_with_ad(&[], &ct).unwrap(), b"hello");

        let ct = r_send.encrypt_with_ad(&[], b"world").unwrap();
        assert_eq!(i_recv.decrypt_with_ad(&[], &ct).unwrap(), b"world");

        // Each direction consumed its counter exactly once.
        assert_eq!(i_send.nonce(), 1);
        assert_eq!(r_recv.nonce(), 1);
        assert_eq!(r_send.nonce(), 1);
        assert_eq!(i_recv.nonce(), 1);
    }

    #[test]
    fn nonces_are_strictly_monotonic() {
        let (initiator, responder) = run_handshake();
        let (mut i_send, _) = initiator.into_transport().unwrap();
        let (_, mut r_recv) = responder.into_transport().unwrap();

        for n in 0..5u64 {
            assert_eq!(i_send.nonce(), n);
            let ct = i_send.encrypt_with_ad(&[], b"x").unwrap();
            assert_eq!(r_recv.decrypt_with_ad(&[], &ct).unwrap(), b"x");
        }
        assert_eq!(i_send.nonce(), 5);
        assert_eq!(r_recv.nonce(), 5);
    }

    #[test]
    fn failed_decrypt_does_not_consume_the_counter() {
        let (initiator, responder) = run_handshake();
        let (mut i_send, _) = initiator.into_transport().unwrap();
        let (_, mut r_recv) = responder.into_transport().unwrap();

        let mut ct = i_send.encrypt_with_ad(&[], b"payload").unwrap();
        ct[0] ^= 0xff;
        assert!(r_recv.decrypt_with_ad(&[], &ct).is_err());
        assert_eq!(r_recv.nonce(), 0);

        // The untampered message still decrypts afterwards.
        ct[0] ^= 0xff;
        assert_eq!(r_recv.decrypt_with_ad(&[], &ct).unwrap(), b"payload");
        assert_eq!(r_recv.nonce(), 1);
    }

    #[test]
    fn tampered_handshake_message_fails() {
        let mut initiator = HandshakeState::new(Role::Initiator, DhKeypair::generate());
        let mut responder = HandshakeState::new(Role::Responder, DhKeypair::generate());

        let m1 = initiator.write_message_1(b"").unwrap();
        responder.read_message_1(&m1).unwrap();

        let mut m2 = responder.write_message_2(b"").unwrap();
        let last = m2.len() - 1;
        m2[last] ^= 0x01;
        assert!(initiator.read_message_2(&m2).is_err());
    }

    #[test]
    fn protocol_name_is_exactly_32_bytes() {
        // The initial h is the unhashed name only in that case.
        assert_eq!(PROTOCOL_NAME.len(), 32);
    }
}
