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

//! The handshake procedure: drives the XX pattern over the wire and
//! authenticates the libp2p identity payload.

use crate::error::NoiseError;
use crate::framed::NoiseFramed;
use crate::io::NoiseOutput;
use crate::payload_proto::NoiseHandshakePayload;
use crate::protocol::{DhKeypair, HandshakeState, Role};
use crate::Config;
use log::{debug, trace};
use peerlink_core::PublicKey;
use peerlink_core::transport::ConnectionInfo;
use peerlink_traits::{SplittableReadWrite, WriteEx};
use prost::Message;

/// The domain separator of the static-key signature.
const STATIC_KEY_DOMAIN: &[u8] = b"noise-libp2p-static-key:";

/// Performs a handshake on the given socket.
///
/// The remote identity key carried in the encrypted payload is verified
/// against the remote's static noise key. Any mismatch, or an
/// authenticated peer other than `config.expected_peer`, closes the raw
/// connection and fails.
pub(crate) async fn handshake<T>(socket: T, config: Config, role: Role) -> Result<NoiseOutput<T>, NoiseError>
where
    T: ConnectionInfo + SplittableReadWrite,
{
    let la = socket.local_multiaddr();
    let ra = socket.remote_multiaddr();
    let mut io = NoiseFramed::new(socket, config.max_frame_len);

    let mut state = HandshakeState::new(role, DhKeypair::generate());
    trace!("starting noise handshake, role {:?}", role);

    // Sign the static key under the local identity.
    let mut to_sign = STATIC_KEY_DOMAIN.to_vec();
    to_sign.extend_from_slice(state.local_static_public());
    let identity_sig = config
        .key
        .sign(&to_sign)
        .map_err(|e| NoiseError::SigningFailed(e.to_string()))?;
    let payload = NoiseHandshakePayload {
        identity_key: config.key.public().into_protobuf_encoding(),
        identity_sig,
        data: Vec::new(),
    }
    .encode_to_vec();

    let remote_payload = match role {
        Role::Initiator => {
            io.send_frame(&state.write_message_1(&[])?).await?;

            let m2 = io.recv_frame().await?;
            let remote_payload = state.read_message_2(&m2)?;

            io.send_frame(&state.write_message_3(&payload)?).await?;
            remote_payload
        }
        Role::Responder => {
            let m1 = io.recv_frame().await?;
            state.read_message_1(&m1)?;

            io.send_frame(&state.write_message_2(&payload)?).await?;

            let m3 = io.recv_frame().await?;
            state.read_message_3(&m3)?
        }
    };

    let remote_static = *state
        .remote_static()
        .ok_or(NoiseError::Protocol("handshake finished without a remote static key"))?;

    let remote_pub_key = match verify_identity(&remote_payload, &remote_static) {
        Ok(key) => key,
        Err(e) => {
            let mut socket = io.into_inner();
            let _ = socket.close2().await;
            return Err(e);
        }
    };

    if let Some(expected) = &config.expected_peer {
        let authenticated = remote_pub_key.clone().into_peer_id();
        if *expected != authenticated {
            debug!("expected peer {}, authenticated {}", expected, authenticated);
            let mut socket = io.into_inner();
            let _ = socket.close2().await;
            return Err(NoiseError::PeerIdMismatch);
        }
    }

    trace!("noise handshake complete, remote peer {}", remote_pub_key.clone().into_peer_id());

    let (send_cipher, recv_cipher) = state.into_transport()?;
    Ok(NoiseOutput::new(
        io.into_inner(),
        send_cipher,
        recv_cipher,
        config.max_frame_len,
        la,
        ra,
        config.key,
        remote_pub_key,
    ))
}

/// Decodes the identity payload and checks its signature over the sender's
/// static noise key.
fn verify_identity(payload: &[u8], remote_static: &[u8; 32]) -> Result<PublicKey, NoiseError> {
    let payload = NoiseHandshakePayload::decode(payload)?;
    let identity_key = PublicKey::from_protobuf_encoding(&payload.identity_key).map_err(NoiseError::InvalidKey)?;

    let mut signed_data = STATIC_KEY_DOMAIN.to_vec();
    signed_data.extend_from_slice(remote_static);
    if !identity_key.verify(&signed_data, &payload.identity_sig) {
        debug!("failed to verify the remote's identity signature");
        return Err(NoiseError::BadSignature);
    }

    Ok(identity_key)
}
