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

//! The `/noise` security upgrade: a Noise XX handshake authenticating
//! libp2p identities, followed by a framed, encrypted connection.

mod error;
mod framed;
mod handshake;
mod io;
mod payload_proto;
pub mod protocol;

pub use error::NoiseError;
pub use io::{NoiseOutput, NoiseReader, NoiseWriter};
pub use protocol::Role;

use async_trait::async_trait;
use peerlink_core::identity::Keypair;
use peerlink_core::transport::{ConnectionInfo, TransportError};
use peerlink_core::upgrade::{UpgradeInfo, Upgrader};
use peerlink_core::PeerId;
use peerlink_traits::SplittableReadWrite;

/// Config for the noise security upgrade.
#[derive(Clone)]
pub struct Config {
    pub(crate) key: Keypair,
    pub(crate) expected_peer: Option<PeerId>,
    pub(crate) max_frame_len: usize,
}

impl Config {
    /// Creates a config with the local identity keypair.
    pub fn new(key: Keypair) -> Self {
        Config {
            key,
            expected_peer: None,
            max_frame_len: protocol::MAX_FRAME_LEN,
        }
    }

    /// Requires the authenticated remote to be exactly this peer.
    pub fn set_expected_peer(mut self, peer: PeerId) -> Self {
        self.expected_peer = Some(peer);
        self
    }

    /// Caps the length of noise frames, below the protocol maximum. A cap
    /// must leave room for at least the authentication tag and one byte.
    pub fn set_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max.max(protocol::TAG_LEN + 1).min(protocol::MAX_FRAME_LEN);
        self
    }

    /// Attempts to perform a handshake on the given socket.
    ///
    /// On success, produces a [`NoiseOutput`] carrying the authenticated
    /// identities of both endpoints.
    pub async fn handshake<T>(self, socket: T, role: Role) -> Result<NoiseOutput<T>, NoiseError>
    where
        T: ConnectionInfo + SplittableReadWrite,
    {
        handshake::handshake(socket, self, role).await
    }
}

impl UpgradeInfo for Config {
    type Info = &'static [u8];

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/noise"]
    }
}

#[async_trait]
impl<T> Upgrader<T> for Config
where
    T: ConnectionInfo + SplittableReadWrite,
{
    type Output = NoiseOutput<T>;

    async fn upgrade_inbound(self, socket: T, _info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError> {
        Ok(self.handshake(socket, Role::Responder).await?)
    }

    async fn upgrade_outbound(self, socket: T, _info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError> {
        Ok(self.handshake(socket, Role::Initiator).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;
    use peerlink_core::pipe::pipe;
    use peerlink_core::secure_io::SecureInfo;
    use peerlink_traits::{ReadEx, WriteEx};

    #[test]
    fn loopback_handshake_and_roundtrip() {
        task::block_on(async {
            let initiator_key = Keypair::generate_ed25519();
            let responder_key = Keypair::generate_ed25519();
            let initiator_peer = initiator_key.public().into_peer_id();
            let responder_peer = responder_key.public().into_peer_id();

            let (a, b) = pipe();

            let responder = task::spawn({
                let responder_key = responder_key.clone();
                async move {
                    let mut out = Config::new(responder_key).handshake(b, Role::Responder).await.unwrap();
                    let mut buf = [0u8; 5];
                    out.read_exact2(&mut buf).await.unwrap();
                    out.write_all2(&buf).await.unwrap();
                    (out.local_peer(), out.remote_peer())
                }
            });

            let mut out = Config::new(initiator_key).handshake(a, Role::Initiator).await.unwrap();
            assert_eq!(out.remote_peer(), responder_peer);
            assert_eq!(out.local_peer(), initiator_peer);

            out.write_all2(b"hello").await.unwrap();
            // Exactly one transport frame has been sent so far.
            assert_eq!(out.counters().0, 1);

            let mut buf = [0u8; 5];
            out.read_exact2(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
            assert_eq!(out.counters().1, 1);

            let (resp_local, resp_remote) = responder.await;
            assert_eq!(resp_local, responder_peer);
            assert_eq!(resp_remote, initiator_peer);
        })
    }

    #[test]
    fn expected_peer_mismatch_is_fatal() {
        task::block_on(async {
            let initiator_key = Keypair::generate_ed25519();
            let responder_key = Keypair::generate_ed25519();
            let unrelated_peer = Keypair::generate_ed25519().public().into_peer_id();

            let (a, b) = pipe();

            let responder = task::spawn(async move {
                Config::new(responder_key).handshake(b, Role::Responder).await
            });

            let res = Config::new(initiator_key)
                .set_expected_peer(unrelated_peer)
                .handshake(a, Role::Initiator)
                .await;

            match res {
                Err(NoiseError::PeerIdMismatch) => {}
                other => panic!("unexpected: {:?}", other.map(|_| ())),
            }
            // The responder itself finishes: message 3 was already sent.
            let _ = responder.await;
        })
    }

    #[test]
    fn large_writes_are_chunked() {
        task::block_on(async {
            let (a, b) = pipe();

            let responder = task::spawn(async move {
                let mut out = Config::new(Keypair::generate_ed25519())
                    .handshake(b, Role::Responder)
                    .await
                    .unwrap();
                let mut buf = vec![0u8; 100_000];
                out.read_exact2(&mut buf).await.unwrap();
                buf
            });

            let mut out = Config::new(Keypair::generate_ed25519())
                .handshake(a, Role::Initiator)
                .await
                .unwrap();

            let data: Vec<u8> = (0..100_000u32).map(|i| i as u8).collect();
            out.write_all2(&data).await.unwrap();
            // 100 kB does not fit one frame.
            assert!(out.counters().0 >= 2);

            assert_eq!(responder.await, data);
        })
    }

    #[test]
    fn ecdsa_identities_also_authenticate() {
        task::block_on(async {
            let initiator_key = Keypair::generate_ecdsa();
            let responder_key = Keypair::generate_ecdsa();
            let responder_peer = responder_key.public().into_peer_id();

            let (a, b) = pipe();

            let responder = task::spawn(async move {
                Config::new(responder_key).handshake(b, Role::Responder).await.unwrap()
            });

            let out = Config::new(initiator_key).handshake(a, Role::Initiator).await.unwrap();
            assert_eq!(out.remote_peer(), responder_peer);
            let _ = responder.await;
        })
    }
}
