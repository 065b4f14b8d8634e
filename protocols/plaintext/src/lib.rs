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

//! The `/plaintext/2.0.0` security upgrade.
//!
//! Both sides exchange their identity in the clear and the connection then
//! passes bytes through unchanged. No confidentiality, no integrity; the
//! exchange only establishes *claimed* identities. Useful for tests and
//! private networks.

mod error;
mod structs_proto;

pub use error::PlaintextError;

use async_trait::async_trait;
use log::{debug, trace};
use peerlink_core::identity::Keypair;
use peerlink_core::secure_io::SecureInfo;
use peerlink_core::transport::{ConnectionInfo, TransportError};
use peerlink_core::upgrade::{EarlyMuxing, UpgradeInfo, Upgrader};
use peerlink_core::{Multiaddr, PeerId, PublicKey};
use peerlink_traits::{ReadEx, SplitEx, SplittableReadWrite, WriteEx};
use prost::Message;
use std::io;
use structs_proto::Exchange;

/// An exchange message is a protobuf-encoded key plus an id; anything
/// beyond this length is hostile.
const MAX_EXCHANGE_LEN: usize = 4096;

/// Config for the plaintext security upgrade.
#[derive(Clone)]
pub struct PlainTextConfig {
    pub(crate) key: Keypair,
}

impl PlainTextConfig {
    pub fn new(key: Keypair) -> Self {
        PlainTextConfig { key }
    }

    /// Runs the exchange on the given socket.
    pub async fn handshake<T>(self, socket: T) -> Result<PlainTextOutput<T>, PlaintextError>
    where
        T: ConnectionInfo + SplittableReadWrite,
    {
        let la = socket.local_multiaddr();
        let ra = socket.remote_multiaddr();
        let mut socket = socket;

        let local_public = self.key.public();
        let exchange = Exchange {
            id: Some(local_public.clone().into_peer_id().into_bytes()),
            pubkey: Some(peerlink_core::keys_proto::PublicKey::decode(
                &local_public.into_protobuf_encoding()[..],
            )?),
        };
        socket.write_one(&exchange.encode_to_vec()).await?;
        socket.flush2().await?;

        let remote_bytes = socket.read_one(MAX_EXCHANGE_LEN).await?;
        let remote: Exchange = Exchange::decode(&remote_bytes[..])?;
        trace!("received remote exchange message");

        let remote_key_proto = remote.pubkey.ok_or(PlaintextError::MissingKey)?;
        let remote_pub_key = PublicKey::from_protobuf_encoding(&remote_key_proto.encode_to_vec())
            .map_err(PlaintextError::InvalidKey)?;

        let derived = remote_pub_key.clone().into_peer_id();
        let claimed = remote.id.ok_or(PlaintextError::MissingKey)?;
        if claimed != derived.clone().into_bytes() {
            debug!("remote id does not match its public key");
            let _ = socket.close2().await;
            return Err(PlaintextError::PeerIdMismatch);
        }

        Ok(PlainTextOutput {
            io: socket,
            local_priv_key: self.key,
            remote_pub_key,
            la,
            ra,
        })
    }
}

impl UpgradeInfo for PlainTextConfig {
    type Info = &'static [u8];

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/plaintext/2.0.0"]
    }
}

#[async_trait]
impl<T> Upgrader<T> for PlainTextConfig
where
    T: ConnectionInfo + SplittableReadWrite,
{
    type Output = PlainTextOutput<T>;

    async fn upgrade_inbound(self, socket: T, _info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError> {
        Ok(self.handshake(socket).await?)
    }

    async fn upgrade_outbound(self, socket: T, _info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError> {
        Ok(self.handshake(socket).await?)
    }
}

/// Output of the plaintext exchange: the raw connection plus claimed
/// identities.
pub struct PlainTextOutput<T> {
    io: T,
    local_priv_key: Keypair,
    remote_pub_key: PublicKey,
    la: Multiaddr,
    ra: Multiaddr,
}

#[async_trait]
impl<T: ReadEx + Send> ReadEx for PlainTextOutput<T> {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.io.read2(buf).await
    }
}

#[async_trait]
impl<T: WriteEx + Send> WriteEx for PlainTextOutput<T> {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io.write2(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        self.io.flush2().await
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.io.close2().await
    }
}

impl<T: SplitEx> SplitEx for PlainTextOutput<T> {
    type Reader = T::Reader;
    type Writer = T::Writer;

    fn split(self) -> (Self::Reader, Self::Writer) {
        self.io.split()
    }
}

impl<T> SecureInfo for PlainTextOutput<T> {
    fn local_peer(&self) -> PeerId {
        self.local_priv_key.public().into_peer_id()
    }

    fn remote_peer(&self) -> PeerId {
        self.remote_pub_key.clone().into_peer_id()
    }

    fn local_priv_key(&self) -> Keypair {
        self.local_priv_key.clone()
    }

    fn remote_pub_key(&self) -> PublicKey {
        self.remote_pub_key.clone()
    }
}

impl<T> ConnectionInfo for PlainTextOutput<T> {
    fn local_multiaddr(&self) -> Multiaddr {
        self.la.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.ra.clone()
    }
}

impl<T> EarlyMuxing for PlainTextOutput<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;
    use peerlink_core::pipe::pipe;

    #[test]
    fn exchange_establishes_identities() {
        task::block_on(async {
            let key_a = Keypair::generate_ed25519();
            let key_b = Keypair::generate_ed25519();
            let peer_a = key_a.public().into_peer_id();
            let peer_b = key_b.public().into_peer_id();

            let (a, b) = pipe();

            let other = task::spawn(async move {
                let mut out = PlainTextConfig::new(key_b).handshake(b).await.unwrap();
                let mut buf = [0u8; 4];
                out.read_exact2(&mut buf).await.unwrap();
                assert_eq!(&buf, b"ping");
                out.remote_peer()
            });

            let mut out = PlainTextConfig::new(key_a).handshake(a).await.unwrap();
            assert_eq!(out.remote_peer(), peer_b);
            out.write_all2(b"ping").await.unwrap();

            assert_eq!(other.await, peer_a);
        })
    }

    #[test]
    fn oversized_exchange_is_refused() {
        task::block_on(async {
            let (a, mut b) = pipe();

            // Announce a gigantic exchange message.
            b.write_varint(1 << 20).await.unwrap();

            let res = PlainTextConfig::new(Keypair::generate_ed25519()).handshake(a).await;
            assert!(res.is_err());
        })
    }

    #[test]
    fn mismatched_id_is_refused() {
        task::block_on(async {
            let key_a = Keypair::generate_ed25519();
            let key_b = Keypair::generate_ed25519();
            let bogus_peer = Keypair::generate_ed25519().public().into_peer_id();

            let (a, mut b) = pipe();

            let exchange = Exchange {
                id: Some(bogus_peer.into_bytes()),
                pubkey: Some(
                    peerlink_core::keys_proto::PublicKey::decode(
                        &key_b.public().into_protobuf_encoding()[..],
                    )
                    .unwrap(),
                ),
            };
            b.write_one(&exchange.encode_to_vec()).await.unwrap();

            let res = PlainTextConfig::new(key_a).handshake(a).await;
            match res {
                Err(PlaintextError::PeerIdMismatch) => {}
                other => panic!("unexpected: {:?}", other.map(|_| ())),
            }
        })
    }
}
