//! Transport upgrader: composes protocol negotiation, the security
//! handshake and the muxer handshake into a single dial/accept path.
//!
//! Order of operations on a fresh raw connection:
//!
//! 1. multistream-select over the caller's security priority list;
//! 2. the chosen security upgrader runs its handshake, yielding an
//!    authenticated connection;
//! 3. if the security handshake already pinned a muxer (ALPN-style early
//!    negotiation), that muxer upgrader runs directly;
//! 4. otherwise a second multistream-select over the secured connection
//!    picks the muxer.
//!
//! Between every step, bytes the previous layer over-read are carried
//! forward in a [`Prefixed`] wrapper. The security steps (1) and (2) run
//! under a single configurable deadline.

use crate::transport::{Transport, TransportError, TransportListener};
use crate::upgrade::{EarlyMuxing, Multistream, Prefixed, Upgrader};
use crate::Multiaddr;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::FutureExt;
use futures::pin_mut;
use futures_timer::Delay;
use log::trace;
use peerlink_traits::{ReadEx, WriteEx};
use std::future::Future;
use std::time::Duration;

/// Default ceiling on the whole security upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// A `TransportUpgrade` is a `Transport` that wraps another `Transport` and adds
/// upgrade capabilities to all inbound and outbound connection attempts.
#[derive(Debug, Clone)]
pub struct TransportUpgrade<InnerTrans, TSec, TMux> {
    inner: InnerTrans,
    secure: Multistream<TSec>,
    mux: Multistream<TMux>,
    timeout: Duration,
}

impl<InnerTrans, TSec, TMux> TransportUpgrade<InnerTrans, TSec, TMux> {
    /// Wraps around a `Transport` to add upgrade capabilities.
    pub fn new(inner: InnerTrans, secure: TSec, mux: TMux) -> Self {
        TransportUpgrade {
            inner,
            secure: Multistream::new(secure),
            mux: Multistream::new(mux),
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Sets the ceiling on the security upgrade of each new connection.
    pub fn set_handshake_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl<InnerTrans, TSec, TMux> Transport for TransportUpgrade<InnerTrans, TSec, TMux>
where
    InnerTrans: Transport + Send,
    InnerTrans::Output: ReadEx + WriteEx + Send + 'static,
    TSec: Upgrader<Prefixed<InnerTrans::Output>> + Clone + Send + Sync + 'static,
    TSec::Output: EarlyMuxing + ReadEx + WriteEx + Send + 'static,
    TMux: Upgrader<Prefixed<TSec::Output>> + Clone + Send + Sync + 'static,
{
    type Output = TMux::Output;
    type Listener = ListenerUpgrade<InnerTrans::Listener, TSec, TMux>;

    fn listen_on(self, addr: Multiaddr) -> Result<Self::Listener, TransportError> {
        let inner_listener = self.inner.listen_on(addr)?;
        Ok(ListenerUpgrade {
            inner: inner_listener,
            secure: self.secure,
            mux: self.mux,
            timeout: self.timeout,
        })
    }

    async fn dial(self, addr: Multiaddr) -> Result<Self::Output, TransportError> {
        let socket = self.inner.dial(addr).await?;
        apply_outbound(socket, self.secure, self.mux, self.timeout).await
    }
}

/// Runs the full outbound upgrade (security, then muxer) on an open raw
/// connection.
pub async fn apply_outbound<C, TSec, TMux>(
    socket: C,
    secure: Multistream<TSec>,
    mux: Multistream<TMux>,
    timeout: Duration,
) -> Result<TMux::Output, TransportError>
where
    C: ReadEx + WriteEx + Send + 'static,
    TSec: Upgrader<Prefixed<C>> + Send,
    TSec::Output: EarlyMuxing + ReadEx + WriteEx + Send,
    TMux: Upgrader<Prefixed<TSec::Output>> + Send,
{
    let secured = with_timeout(timeout, secure.select_outbound(socket)).await?;

    if let Some(id) = secured.early_muxer() {
        if let Some(info) = mux.match_protocol(id.as_bytes()) {
            trace!("security handshake pinned muxer {}, skipping negotiation", id);
            return mux.into_inner().upgrade_outbound(Prefixed::new(secured, Bytes::new()), info).await;
        }
    }

    mux.select_outbound(secured).await
}

/// Runs the full inbound upgrade (security, then muxer) on an accepted raw
/// connection.
pub async fn apply_inbound<C, TSec, TMux>(
    socket: C,
    secure: Multistream<TSec>,
    mux: Multistream<TMux>,
    timeout: Duration,
) -> Result<TMux::Output, TransportError>
where
    C: ReadEx + WriteEx + Send + 'static,
    TSec: Upgrader<Prefixed<C>> + Send,
    TSec::Output: EarlyMuxing + ReadEx + WriteEx + Send,
    TMux: Upgrader<Prefixed<TSec::Output>> + Send,
{
    let secured = with_timeout(timeout, secure.select_inbound(socket)).await?;

    if let Some(id) = secured.early_muxer() {
        if let Some(info) = mux.match_protocol(id.as_bytes()) {
            trace!("security handshake pinned muxer {}, skipping negotiation", id);
            return mux.into_inner().upgrade_inbound(Prefixed::new(secured, Bytes::new()), info).await;
        }
    }

    mux.select_inbound(secured).await
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>> + Send,
{
    let fut = fut.fuse();
    let delay = Delay::new(timeout).fuse();
    pin_mut!(fut, delay);

    futures::select! {
        res = fut => res,
        _ = delay => Err(TransportError::Timeout),
    }
}

/// The listener of a [`TransportUpgrade`]: upgrades every accepted raw
/// connection before handing it out.
pub struct ListenerUpgrade<InnerListener, TSec, TMux> {
    inner: InnerListener,
    secure: Multistream<TSec>,
    mux: Multistream<TMux>,
    timeout: Duration,
}

#[async_trait]
impl<InnerListener, TSec, TMux> TransportListener for ListenerUpgrade<InnerListener, TSec, TMux>
where
    InnerListener: TransportListener + Send,
    InnerListener::Output: ReadEx + WriteEx + Send + 'static,
    TSec: Upgrader<Prefixed<InnerListener::Output>> + Clone + Send + Sync + 'static,
    TSec::Output: EarlyMuxing + ReadEx + WriteEx + Send + 'static,
    TMux: Upgrader<Prefixed<TSec::Output>> + Clone + Send + Sync + 'static,
{
    type Output = TMux::Output;

    async fn accept(&mut self) -> Result<Self::Output, TransportError> {
        let socket = self.inner.accept().await?;
        trace!("got a new connection, upgrading...");
        apply_inbound(socket, self.secure.clone(), self.mux.clone(), self.timeout).await
    }

    fn multi_addr(&self) -> Multiaddr {
        self.inner.multi_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipe;
    use crate::upgrade::DummyUpgrader;
    use async_std::task;

    // A dummy security output has no early-muxer capability.
    impl EarlyMuxing for crate::pipe::PipeEnd {}

    #[test]
    fn upgrade_runs_both_negotiations() {
        task::block_on(async {
            let (a, b) = pipe();

            let listener = task::spawn(async move {
                apply_inbound(
                    b,
                    Multistream::new(DummyUpgrader::new(b"/plaintext/2.0.0")),
                    Multistream::new(DummyUpgrader::new(b"/yamux/1.0.0")),
                    DEFAULT_HANDSHAKE_TIMEOUT,
                )
                .await
            });

            let out = apply_outbound(
                a,
                Multistream::new(DummyUpgrader::new(b"/plaintext/2.0.0")),
                Multistream::new(DummyUpgrader::new(b"/yamux/1.0.0")),
                DEFAULT_HANDSHAKE_TIMEOUT,
            )
            .await;

            assert!(out.is_ok());
            assert!(listener.await.is_ok());
        })
    }

    #[test]
    fn security_handshake_times_out() {
        task::block_on(async {
            // The remote never answers the negotiation.
            let (a, _b) = pipe();

            let res = apply_outbound(
                a,
                Multistream::new(DummyUpgrader::new(b"/plaintext/2.0.0")),
                Multistream::new(DummyUpgrader::new(b"/yamux/1.0.0")),
                Duration::from_millis(50),
            )
            .await;

            match res {
                Err(TransportError::Timeout) => {}
                other => panic!("unexpected: {:?}", other.map(|_| ())),
            }
        })
    }
}
