//! End-to-end upgrade pipeline: a raw in-memory connection is negotiated,
//! secured and multiplexed, and streams flow across the result.

use async_std::task;
use peerlink_core::identity::Keypair;
use peerlink_core::muxing::StreamMuxer;
use peerlink_core::pipe::pipe;
use peerlink_core::secure_io::SecureInfo;
use peerlink_core::transport::upgrade::{apply_inbound, apply_outbound, DEFAULT_HANDSHAKE_TIMEOUT};
use peerlink_core::transport::TransportError;
use peerlink_core::upgrade::{Multistream, Selector};
use peerlink_noise::Config as NoiseConfig;
use peerlink_plaintext::PlainTextConfig;
use peerlink_traits::{ReadEx, WriteEx};
use peerlink_yamux::Config as YamuxConfig;

fn yamux_config() -> YamuxConfig {
    let mut cfg = YamuxConfig::new();
    cfg.set_keepalive_interval(None);
    cfg
}

#[test]
fn noise_then_yamux_over_one_pipe() {
    task::block_on(async {
        let key_a = Keypair::generate_ed25519();
        let key_b = Keypair::generate_ed25519();
        let peer_a = key_a.public().into_peer_id();
        let peer_b = key_b.public().into_peer_id();

        let (a, b) = pipe();

        let listener = task::spawn(async move {
            let mut muxer = apply_inbound(
                b,
                Multistream::new(NoiseConfig::new(key_b)),
                Multistream::new(yamux_config()),
                DEFAULT_HANDSHAKE_TIMEOUT,
            )
            .await
            .unwrap();

            let driver = muxer.task().unwrap();
            task::spawn(driver);

            let mut stream = muxer.accept_stream().await.unwrap();
            let mut buf = [0u8; 10];
            stream.read_exact2(&mut buf).await.unwrap();
            stream.write_all2(&buf).await.unwrap();
            muxer.remote_peer()
        });

        let mut muxer = apply_outbound(
            a,
            Multistream::new(NoiseConfig::new(key_a)),
            Multistream::new(yamux_config()),
            DEFAULT_HANDSHAKE_TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(muxer.remote_peer(), peer_b);

        let driver = muxer.task().unwrap();
        task::spawn(driver);

        let mut stream = muxer.open_stream().await.unwrap();
        stream.write_all2(b"0123456789").await.unwrap();
        let mut buf = [0u8; 10];
        stream.read_exact2(&mut buf).await.unwrap();
        assert_eq!(&buf, b"0123456789");

        muxer.close().await.unwrap();
        match muxer.open_stream().await {
            Err(TransportError::ConnectionClosed) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }

        assert_eq!(listener.await, peer_a);
    })
}

#[test]
fn security_priority_list_falls_back() {
    task::block_on(async {
        let key_a = Keypair::generate_ed25519();
        let key_b = Keypair::generate_ed25519();
        let peer_b = key_b.public().into_peer_id();

        let (a, b) = pipe();

        // The listener only speaks plaintext; the dialer prefers noise.
        let listener = task::spawn(async move {
            let mut muxer = apply_inbound(
                b,
                Multistream::new(PlainTextConfig::new(key_b)),
                Multistream::new(yamux_config()),
                DEFAULT_HANDSHAKE_TIMEOUT,
            )
            .await
            .unwrap();

            let driver = muxer.task().unwrap();
            task::spawn(driver);

            let mut stream = muxer.accept_stream().await.unwrap();
            let mut buf = [0u8; 2];
            stream.read_exact2(&mut buf).await.unwrap();
            buf
        });

        let mut muxer = apply_outbound(
            a,
            Multistream::new(Selector::new(NoiseConfig::new(key_a.clone()), PlainTextConfig::new(key_a))),
            Multistream::new(yamux_config()),
            DEFAULT_HANDSHAKE_TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(muxer.remote_peer(), peer_b);

        let driver = muxer.task().unwrap();
        task::spawn(driver);

        let mut stream = muxer.open_stream().await.unwrap();
        stream.write_all2(b"ok").await.unwrap();

        assert_eq!(&listener.await, b"ok");
    })
}
