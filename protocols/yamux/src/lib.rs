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

//! The `/yamux/1.0.0` stream muxer: hundreds of logical streams over one
//! secured connection, with credit-based flow control, keepalive and
//! orderly teardown.

pub mod connection;
pub mod error;
mod chunks;
mod frame;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, trace};
use std::fmt;
use std::time::Duration;

use connection::{control::Control, Connection, Id, Mode};
use error::ConnectionError;
use peerlink_core::identity::Keypair;
use peerlink_core::muxing::{IReadWrite, IStreamMuxer, StreamMuxer, StreamMuxerEx};
use peerlink_core::secure_io::SecureInfo;
use peerlink_core::transport::{ConnectionInfo, TransportError};
use peerlink_core::upgrade::{UpgradeInfo, Upgrader};
use peerlink_core::{Multiaddr, PeerId, PublicKey};
use peerlink_traits::{SplitEx, SplittableReadWrite};

/// Initial per-stream window, per the yamux specification.
const DEFAULT_CREDIT: u32 = 256 * 1024;

/// Largest body of a single outbound data frame.
const MAX_MSG_SIZE: usize = 64 * 1024;

/// Yamux configuration.
///
/// The default configuration values are as follows:
///
/// - receive window = 256 KiB
/// - max. buffer size (per stream) = 1 MiB
/// - max. number of streams = 256
/// - max. message size = 64 KiB
/// - keepalive pings every 30 s, pong deadline 60 s
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) receive_window: u32,
    pub(crate) max_message_size: usize,
    pub(crate) max_num_streams: usize,
    pub(crate) max_buffer_size: usize,
    pub(crate) keepalive_interval: Option<Duration>,
    pub(crate) keepalive_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            receive_window: DEFAULT_CREDIT,
            max_message_size: MAX_MSG_SIZE,
            max_num_streams: 256,
            max_buffer_size: 1024 * 1024,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// make a default yamux config
    pub fn new() -> Self {
        Config::default()
    }

    /// Set the receive window (must be >= 256 KiB).
    ///
    /// # Panics
    ///
    /// If the given receive window is < 256 KiB.
    pub fn set_receive_window(&mut self, n: u32) -> &mut Self {
        assert!(n >= DEFAULT_CREDIT);
        self.receive_window = n;
        self
    }

    /// Set the max. buffer size per stream.
    pub fn set_max_buffer_size(&mut self, n: usize) -> &mut Self {
        self.max_buffer_size = n;
        self
    }

    /// Set the max. number of streams per session.
    pub fn set_max_num_streams(&mut self, n: usize) -> &mut Self {
        self.max_num_streams = n;
        self
    }

    /// Set the max. size of a single outbound data frame body.
    pub fn set_max_message_size(&mut self, n: usize) -> &mut Self {
        self.max_message_size = n;
        self
    }

    /// Set the keepalive ping cadence; `None` disables keepalive.
    pub fn set_keepalive_interval(&mut self, interval: Option<Duration>) -> &mut Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set how long a pong may take before the session is considered dead.
    pub fn set_keepalive_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.keepalive_timeout = timeout;
        self
    }
}

/// A Yamux session on top of a secured connection.
pub struct Yamux<C: SplitEx> {
    /// The connection driving this session, until its task is taken.
    connection: Option<Connection<C>>,
    /// Handle to control the connection.
    control: Control,
    /// For debug purpose
    id: Id,
    /// The local multiaddr of this connection
    pub la: Multiaddr,
    /// The remote multiaddr of this connection
    pub ra: Multiaddr,
    /// The private key of the local
    pub local_priv_key: Keypair,
    /// For convenience, the local peer ID, generated from local pub key
    pub local_peer_id: PeerId,
    /// The public key of the remote.
    pub remote_pub_key: PublicKey,
    /// For convenience, put a PeerId here, which is actually calculated from remote_key
    pub remote_peer_id: PeerId,
}

impl<C: SplitEx> Clone for Yamux<C> {
    fn clone(&self) -> Self {
        Yamux {
            connection: None,
            control: self.control.clone(),
            id: self.id,
            la: self.la.clone(),
            ra: self.ra.clone(),
            local_priv_key: self.local_priv_key.clone(),
            local_peer_id: self.local_peer_id.clone(),
            remote_pub_key: self.remote_pub_key.clone(),
            remote_peer_id: self.remote_peer_id.clone(),
        }
    }
}

impl<C: SplitEx> fmt::Debug for Yamux<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Yamux")
            .field("Id", &self.id)
            .field("Ra", &self.ra)
            .field("Rid", &self.remote_peer_id)
            .finish()
    }
}

impl<C: ConnectionInfo + SecureInfo + SplittableReadWrite> Yamux<C> {
    /// Create a new Yamux connection.
    pub fn new(io: C, cfg: Config, mode: Mode) -> Self {
        // `io` is moved into the connection; copy the identity first.
        let local_priv_key = io.local_priv_key();
        let local_peer_id = io.local_peer();
        let remote_pub_key = io.remote_pub_key();
        let remote_peer_id = io.remote_peer();
        let la = io.local_multiaddr();
        let ra = io.remote_multiaddr();

        let connection = Connection::new(io, cfg, mode);
        let id = connection.id();
        let control = connection.control();
        Yamux {
            connection: Some(connection),
            control,
            id,
            la,
            ra,
            local_priv_key,
            local_peer_id,
            remote_pub_key,
            remote_peer_id,
        }
    }
}

impl<C: SplitEx> SecureInfo for Yamux<C> {
    fn local_peer(&self) -> PeerId {
        self.local_peer_id.clone()
    }

    fn remote_peer(&self) -> PeerId {
        self.remote_peer_id.clone()
    }

    fn local_priv_key(&self) -> Keypair {
        self.local_priv_key.clone()
    }

    fn remote_pub_key(&self) -> PublicKey {
        self.remote_pub_key.clone()
    }
}

impl<C: SplitEx> ConnectionInfo for Yamux<C> {
    fn local_multiaddr(&self) -> Multiaddr {
        self.la.clone()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.ra.clone()
    }
}

impl<C: SplittableReadWrite> StreamMuxerEx for Yamux<C> {}

#[async_trait]
impl<C: SplittableReadWrite> StreamMuxer for Yamux<C> {
    async fn open_stream(&mut self) -> Result<IReadWrite, TransportError> {
        let stream = self.control.open_stream().await?;
        trace!("a new outbound substream {:?} opened for yamux...", stream);
        Ok(Box::new(stream))
    }

    async fn accept_stream(&mut self) -> Result<IReadWrite, TransportError> {
        let stream = self.control.accept_stream().await?;
        trace!("a new inbound substream {:?} accepted for yamux...", stream);
        Ok(Box::new(stream))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.control.close().await?;
        Ok(())
    }

    fn task(&mut self) -> Option<BoxFuture<'static, ()>> {
        if let Some(mut connection) = self.connection.take() {
            return Some(
                async move {
                    if let Err(e) = connection.run().await {
                        debug!("{} background-task exiting: {}", connection.id(), e);
                    }
                }
                .boxed(),
            );
        }
        None
    }

    fn box_clone(&self) -> IStreamMuxer {
        Box::new(self.clone())
    }
}

impl UpgradeInfo for Config {
    type Info = &'static [u8];

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/yamux/1.0.0"]
    }
}

#[async_trait]
impl<T> Upgrader<T> for Config
where
    T: ConnectionInfo + SecureInfo + SplittableReadWrite,
{
    type Output = Yamux<T>;

    async fn upgrade_inbound(self, socket: T, _info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError> {
        trace!("upgrading yamux inbound");
        Ok(Yamux::new(socket, self, Mode::Server))
    }

    async fn upgrade_outbound(self, socket: T, _info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError> {
        trace!("upgrading yamux outbound");
        Ok(Yamux::new(socket, self, Mode::Client))
    }
}

impl From<ConnectionError> for TransportError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::Closed => TransportError::ConnectionClosed,
            e => TransportError::StreamMuxerError(Box::new(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::stream::Stream;
    use async_std::task;
    use futures::pin_mut;
    use futures_timer::Delay;
    use peerlink_core::pipe::pipe;
    use peerlink_traits::{ReadEx, WriteEx};

    fn quiet_config() -> Config {
        let mut cfg = Config::new();
        cfg.set_keepalive_interval(None);
        cfg
    }

    fn session_pair(cfg_a: Config, cfg_b: Config) -> (Control, Control) {
        let (a, b) = pipe();
        let mut conn_a = Connection::new(a, cfg_a, Mode::Client);
        let mut conn_b = Connection::new(b, cfg_b, Mode::Server);
        let ctrl_a = conn_a.control();
        let ctrl_b = conn_b.control();
        task::spawn(async move {
            let _ = conn_a.run().await;
        });
        task::spawn(async move {
            let _ = conn_b.run().await;
        });
        (ctrl_a, ctrl_b)
    }

    async fn read_to_end(stream: &mut Stream) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read2(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn bytes_cross_byte_exact_per_stream() {
        task::block_on(async {
            let (mut a, mut b) = session_pair(quiet_config(), quiet_config());

            let echo = task::spawn(async move {
                let mut stream = b.accept_stream().await.unwrap();
                let mut buf = [0u8; 256];
                loop {
                    let n = stream.read2(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    stream.write_all2(&buf[..n]).await.unwrap();
                }
                stream.close2().await.unwrap();
            });

            let mut stream = a.open_stream().await.unwrap();
            assert_eq!(stream.id().val(), 1);

            let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
            stream.write_all2(&payload).await.unwrap();
            stream.close2().await.unwrap();

            let echoed = read_to_end(&mut stream).await.unwrap();
            assert_eq!(echoed, payload);
            echo.await;
        })
    }

    #[test]
    fn streams_allocate_from_their_parity_space() {
        task::block_on(async {
            let (mut a, mut b) = session_pair(quiet_config(), quiet_config());

            let first = a.open_stream().await.unwrap();
            let second = a.open_stream().await.unwrap();
            assert_eq!(first.id().val(), 1);
            assert_eq!(second.id().val(), 3);

            let from_b = b.open_stream().await.unwrap();
            assert_eq!(from_b.id().val(), 2);
        })
    }

    #[test]
    fn window_refund_after_half_window_read() {
        task::block_on(async {
            let (mut a, mut b) = session_pair(quiet_config(), quiet_config());

            let reader = task::spawn(async move {
                let mut stream = b.accept_stream().await.unwrap();
                // Let the whole transfer land in the stream buffer, then
                // drain exactly 128 KiB in one go.
                Delay::new(Duration::from_millis(250)).await;
                let mut buf = vec![0u8; 128 * 1024];
                stream.read_exact2(&mut buf).await.unwrap();
                stream
            });

            let mut stream = a.open_stream().await.unwrap();
            let payload = vec![7u8; 128 * 1024 + 1];
            stream.write_all2(&payload).await.unwrap();

            // 256 KiB - (128 KiB + 1) spent.
            assert_eq!(stream.shared().await.send_window, DEFAULT_CREDIT - 128 * 1024 - 1);

            // The reader drains half the window, triggering a refund of
            // exactly the consumed bytes.
            let _guard = reader.await;
            for _ in 0..100 {
                if stream.shared().await.send_window == DEFAULT_CREDIT - 1 {
                    break;
                }
                Delay::new(Duration::from_millis(10)).await;
            }
            assert_eq!(stream.shared().await.send_window, DEFAULT_CREDIT - 1);
        })
    }

    #[test]
    fn writer_suspends_on_exhausted_window() {
        task::block_on(async {
            let (mut a, _b) = session_pair(quiet_config(), quiet_config());

            let mut stream = a.open_stream().await.unwrap();

            // Exactly the whole window goes through without suspension.
            let payload = vec![1u8; DEFAULT_CREDIT as usize];
            stream.write_all2(&payload).await.unwrap();
            assert_eq!(stream.shared().await.send_window, 0);

            // One more byte parks until a window update arrives, which it
            // never does because nobody reads.
            let write = stream.write2(&[1u8]);
            pin_mut!(write);
            let timeout = Delay::new(Duration::from_millis(200));
            pin_mut!(timeout);
            match futures::future::select(write, timeout).await {
                futures::future::Either::Left(_) => panic!("write should have suspended"),
                futures::future::Either::Right(_) => {}
            }
        })
    }

    #[test]
    fn reset_discards_data_and_fails_reads() {
        task::block_on(async {
            let (mut a, mut b) = session_pair(quiet_config(), quiet_config());

            let victim = task::spawn(async move {
                let mut stream = b.accept_stream().await.unwrap();
                // Keep reading until the reset surfaces.
                loop {
                    let mut buf = [0u8; 64];
                    match stream.read2(&mut buf).await {
                        Ok(_) => continue,
                        Err(e) => return e,
                    }
                }
            });

            let mut stream = a.open_stream().await.unwrap();
            stream.write_all2(b"some bytes").await.unwrap();
            stream.reset().await.unwrap();

            let err = victim.await;
            assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);

            // Reset after close/reset is a no-op.
            stream.reset().await.unwrap();
            stream.close2().await.unwrap();
        })
    }

    #[test]
    fn close_twice_is_a_no_op() {
        task::block_on(async {
            let (mut a, mut b) = session_pair(quiet_config(), quiet_config());

            let other = task::spawn(async move {
                let mut stream = b.accept_stream().await.unwrap();
                read_to_end(&mut stream).await.unwrap()
            });

            let mut stream = a.open_stream().await.unwrap();
            stream.write_all2(b"x").await.unwrap();
            stream.close2().await.unwrap();
            stream.close2().await.unwrap();

            assert_eq!(other.await, b"x");
        })
    }

    #[test]
    fn graceful_shutdown_drains_cleanly() {
        task::block_on(async {
            let (mut a, mut b) = session_pair(quiet_config(), quiet_config());

            let acceptor = task::spawn(async move {
                let mut collected = Vec::new();
                for _ in 0..3 {
                    let mut stream = b.accept_stream().await.unwrap();
                    collected.push(read_to_end(&mut stream).await.unwrap());
                }
                (b, collected)
            });

            let mut streams = Vec::new();
            for i in 0..3u8 {
                let mut stream = a.open_stream().await.unwrap();
                stream.write_all2(&[i; 100]).await.unwrap();
                streams.push(stream);
            }
            a.close().await.unwrap();

            let (mut b, collected) = acceptor.await;
            for (i, data) in collected.iter().enumerate() {
                assert_eq!(data, &vec![i as u8; 100]);
            }

            // New streams are refused on both sides.
            match a.open_stream().await {
                Err(ConnectionError::Closed) => {}
                other => panic!("unexpected: {:?}", other.map(|_| ())),
            }
            for _ in 0..100 {
                match b.open_stream().await {
                    Err(ConnectionError::Closed) => return,
                    Ok(_) => Delay::new(Duration::from_millis(10)).await,
                    Err(e) => panic!("unexpected: {}", e),
                }
            }
            panic!("responder kept accepting new streams");
        })
    }

    #[test]
    fn open_side_stream_cap() {
        task::block_on(async {
            let mut cfg = quiet_config();
            cfg.set_max_num_streams(2);
            let (mut a, _b) = session_pair(cfg, quiet_config());

            let _s1 = a.open_stream().await.unwrap();
            let _s2 = a.open_stream().await.unwrap();
            match a.open_stream().await {
                Err(ConnectionError::TooManyStreams) => {}
                other => panic!("unexpected: {:?}", other.map(|_| ())),
            }
        })
    }

    #[test]
    fn accept_side_stream_cap_resets_excess() {
        task::block_on(async {
            let mut cfg_b = quiet_config();
            cfg_b.set_max_num_streams(1);
            let (mut a, _b) = session_pair(quiet_config(), cfg_b);

            let _accepted = a.open_stream().await.unwrap();
            let mut refused = a.open_stream().await.unwrap();

            // The second SYN exceeds the remote cap and is reset.
            let mut buf = [0u8; 16];
            let mut saw_reset = false;
            for _ in 0..100 {
                match refused.read2(&mut buf).await {
                    Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                        saw_reset = true;
                        break;
                    }
                    Err(e) => panic!("unexpected error: {}", e),
                    Ok(0) => break,
                    Ok(_) => {}
                }
            }
            assert!(saw_reset);
        })
    }

    #[test]
    fn keepalive_fails_without_pongs() {
        task::block_on(async {
            let (a, _b) = pipe();

            let mut cfg = Config::new();
            cfg.set_keepalive_interval(Some(Duration::from_millis(10)));
            cfg.set_keepalive_timeout(Duration::from_millis(50));

            // The other end never answers pings.
            let mut connection = Connection::new(a, cfg, Mode::Client);
            match connection.run().await {
                Err(ConnectionError::KeepAliveTimeout) => {}
                other => panic!("unexpected: {:?}", other),
            }
        })
    }

    #[test]
    fn sessions_survive_when_keepalive_is_answered() {
        task::block_on(async {
            let mut cfg = Config::new();
            cfg.set_keepalive_interval(Some(Duration::from_millis(10)));
            cfg.set_keepalive_timeout(Duration::from_millis(100));

            let (mut a, mut b) = session_pair(cfg.clone(), cfg);

            // Outlive several keepalive rounds, then transfer data.
            Delay::new(Duration::from_millis(200)).await;

            let other = task::spawn(async move {
                let mut stream = b.accept_stream().await.unwrap();
                read_to_end(&mut stream).await.unwrap()
            });

            let mut stream = a.open_stream().await.unwrap();
            stream.write_all2(b"still alive").await.unwrap();
            stream.close2().await.unwrap();
            assert_eq!(other.await, b"still alive");
        })
    }
}
