//! Multistream-select: line-oriented protocol negotiation with a strict
//! "remainder" contract.
//!
//! Every message on the wire is `[uvarint length][id]\n`, the length
//! covering the trailing newline. The negotiator reads the socket in
//! chunks, so it may pull in bytes beyond the message that concluded the
//! negotiation, e.g. when the remote packs its protocol confirmation and
//! the first protocol payload into a single segment. Those bytes are never
//! dropped: they are handed to the next layer through [`Prefixed`], which
//! serves them ahead of any further socket read.

use crate::secure_io::SecureInfo;
use crate::transport::{ConnectionInfo, TransportError};
use crate::upgrade::{EarlyMuxing, ProtocolName, UpgradeInfo, Upgrader};
use crate::Multiaddr;
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace};
use peerlink_traits::{ReadEx, SplitEx, WriteEx};
use std::{error, fmt, io};

/// The multistream-select handshake line.
pub const PROTOCOL_ID: &[u8] = b"/multistream/1.0.0";

const MSG_NA: &[u8] = b"na";
const MSG_LS: &[u8] = b"ls";

/// Negotiation messages are short protocol ids; anything longer is abuse.
const MAX_MESSAGE_LEN: usize = 1024;

/// Refill granularity of the internal read buffer.
const RECV_CHUNK_LEN: usize = 512;

/// Errors raised while negotiating a protocol.
#[derive(Debug)]
pub enum NegotiationError {
    /// An I/O error on the underlying socket.
    Io(io::Error),
    /// All proposed protocols were refused by the remote.
    Failed,
    /// The remote sent something that is not valid multistream-select.
    ProtocolViolation,
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationError::Io(e) => write!(f, "i/o error: {}", e),
            NegotiationError::Failed => f.write_str("no protocol could be agreed upon"),
            NegotiationError::ProtocolViolation => f.write_str("remote violated the negotiation protocol"),
        }
    }
}

impl error::Error for NegotiationError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        if let NegotiationError::Io(e) = self {
            Some(e)
        } else {
            None
        }
    }
}

impl From<io::Error> for NegotiationError {
    fn from(e: io::Error) -> Self {
        NegotiationError::Io(e)
    }
}

impl From<NegotiationError> for TransportError {
    fn from(e: NegotiationError) -> Self {
        match e {
            NegotiationError::Io(e) => TransportError::Io(e),
            NegotiationError::Failed => TransportError::NegotiationFailed,
            NegotiationError::ProtocolViolation => TransportError::NegotiationFailed,
        }
    }
}

/// Protocol negotiation over an arbitrary byte stream.
pub struct Negotiator<T> {
    io: T,
    buffer: BytesMut,
}

impl<T: ReadEx + WriteEx + Send> Negotiator<T> {
    pub fn new(io: T) -> Self {
        Negotiator {
            io,
            buffer: BytesMut::new(),
        }
    }

    /// Proposes `protocols` one by one until the remote echoes one back.
    ///
    /// Returns the accepted protocol and the socket wrapped with whatever
    /// bytes were buffered past the accepting line.
    pub async fn negotiate_outbound<P>(mut self, protocols: Vec<P>) -> Result<(P, Prefixed<T>), NegotiationError>
    where
        P: ProtocolName + Send,
    {
        self.send_message(PROTOCOL_ID).await?;
        let header = self.recv_message().await?;
        if header != PROTOCOL_ID {
            debug!("unexpected negotiation header: {:?}", header);
            return Err(NegotiationError::ProtocolViolation);
        }

        for protocol in protocols {
            let name = protocol.protocol_name();
            trace!("proposing protocol {}", protocol.protocol_name_str());
            self.send_message(name).await?;

            let reply = self.recv_message().await?;
            if reply == name {
                trace!("protocol {} accepted", protocol.protocol_name_str());
                return Ok((protocol, self.into_prefixed()));
            }
            if reply == MSG_NA {
                continue;
            }
            debug!("unexpected negotiation reply: {:?}", reply);
            return Err(NegotiationError::ProtocolViolation);
        }

        Err(NegotiationError::Failed)
    }

    /// Answers the remote's proposals until one matches `protocols`.
    pub async fn negotiate_inbound<P>(mut self, mut protocols: Vec<P>) -> Result<(P, Prefixed<T>), NegotiationError>
    where
        P: ProtocolName + Send,
    {
        let header = self.recv_message().await?;
        if header != PROTOCOL_ID {
            debug!("unexpected negotiation header: {:?}", header);
            return Err(NegotiationError::ProtocolViolation);
        }
        self.send_message(PROTOCOL_ID).await?;

        loop {
            let proposal = self.recv_message().await?;
            if proposal == MSG_LS {
                for protocol in &protocols {
                    self.send_message(protocol.protocol_name()).await?;
                }
                continue;
            }
            if let Some(pos) = protocols.iter().position(|p| p.protocol_name() == &proposal[..]) {
                let protocol = protocols.swap_remove(pos);
                trace!("accepting protocol {}", protocol.protocol_name_str());
                self.send_message(protocol.protocol_name()).await?;
                return Ok((protocol, self.into_prefixed()));
            }
            trace!("refusing unknown proposal {:?}", proposal);
            self.send_message(MSG_NA).await?;
        }
    }

    fn into_prefixed(self) -> Prefixed<T> {
        Prefixed::new(self.io, self.buffer.freeze())
    }

    async fn send_message(&mut self, msg: &[u8]) -> Result<(), NegotiationError> {
        self.io.write_varint(msg.len() as u64 + 1).await?;
        self.io.write_all2(msg).await?;
        self.io.write_all2(b"\n").await?;
        self.io.flush2().await?;
        Ok(())
    }

    /// Reads one negotiation message, without its trailing newline.
    async fn recv_message(&mut self) -> Result<Vec<u8>, NegotiationError> {
        loop {
            if let Some(message) = self.parse_message()? {
                return Ok(message);
            }
            // Not enough buffered bytes for a full message yet.
            let mut chunk = [0u8; RECV_CHUNK_LEN];
            let n = self.io.read2(&mut chunk).await?;
            if n == 0 {
                return Err(NegotiationError::Io(io::ErrorKind::UnexpectedEof.into()));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn parse_message(&mut self) -> Result<Option<Vec<u8>>, NegotiationError> {
        let (len, varint_len) = match unsigned_varint::decode::u64(&self.buffer) {
            Ok((len, rest)) => (len as usize, self.buffer.len() - rest.len()),
            Err(unsigned_varint::decode::Error::Insufficient) => return Ok(None),
            Err(_) => return Err(NegotiationError::ProtocolViolation),
        };
        if len == 0 || len > MAX_MESSAGE_LEN {
            return Err(NegotiationError::ProtocolViolation);
        }
        if self.buffer.len() < varint_len + len {
            return Ok(None);
        }
        self.buffer.advance(varint_len);
        let mut message = self.buffer.split_to(len).to_vec();
        if message.pop() != Some(b'\n') {
            return Err(NegotiationError::ProtocolViolation);
        }
        Ok(Some(message))
    }
}

/// An I/O object with a remainder buffer served ahead of the socket.
pub struct Prefixed<T> {
    io: T,
    buffer: Bytes,
}

impl<T> Prefixed<T> {
    pub fn new(io: T, buffer: Bytes) -> Self {
        Prefixed { io, buffer }
    }

    /// The bytes still to be served before the socket is read again.
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> (T, Bytes) {
        (self.io, self.buffer)
    }
}

impl<T> fmt::Debug for Prefixed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prefixed").field("buffered", &self.buffer.len()).finish()
    }
}

#[async_trait]
impl<T: ReadEx> ReadEx for Prefixed<T> {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.buffer.is_empty() {
            let n = std::cmp::min(self.buffer.len(), buf.len());
            buf[..n].copy_from_slice(&self.buffer[..n]);
            self.buffer.advance(n);
            return Ok(n);
        }
        self.io.read2(buf).await
    }
}

#[async_trait]
impl<T: WriteEx + Send> WriteEx for Prefixed<T> {
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

impl<T: SplitEx> SplitEx for Prefixed<T> {
    type Reader = PrefixedReader<T::Reader>;
    type Writer = T::Writer;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (reader, writer) = self.io.split();
        (
            PrefixedReader {
                io: reader,
                buffer: self.buffer,
            },
            writer,
        )
    }
}

impl<T: ConnectionInfo> ConnectionInfo for Prefixed<T> {
    fn local_multiaddr(&self) -> Multiaddr {
        self.io.local_multiaddr()
    }

    fn remote_multiaddr(&self) -> Multiaddr {
        self.io.remote_multiaddr()
    }
}

impl<T: SecureInfo> SecureInfo for Prefixed<T> {
    fn local_peer(&self) -> crate::PeerId {
        self.io.local_peer()
    }

    fn remote_peer(&self) -> crate::PeerId {
        self.io.remote_peer()
    }

    fn local_priv_key(&self) -> crate::identity::Keypair {
        self.io.local_priv_key()
    }

    fn remote_pub_key(&self) -> crate::PublicKey {
        self.io.remote_pub_key()
    }
}

/// The reading half of a [`Prefixed`] I/O object.
pub struct PrefixedReader<R> {
    io: R,
    buffer: Bytes,
}

#[async_trait]
impl<R: ReadEx> ReadEx for PrefixedReader<R> {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.buffer.is_empty() {
            let n = std::cmp::min(self.buffer.len(), buf.len());
            buf[..n].copy_from_slice(&self.buffer[..n]);
            self.buffer.advance(n);
            return Ok(n);
        }
        self.io.read2(buf).await
    }
}

/// Multistream uses multistream-select to pick the protocol an [`Upgrader`]
/// is then run over.
///
/// The protocols supported by the upgrader are proposed (outbound) or
/// answered (inbound) in the order of its `protocol_info`.
#[derive(Debug, Clone)]
pub struct Multistream<U> {
    inner: U,
}

impl<U> Multistream<U> {
    /// Add `Multistream` on top of any `Upgrader`.
    pub fn new(inner: U) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> U {
        self.inner
    }
}

impl<U: UpgradeInfo> Multistream<U> {
    /// Looks up the upgrader's protocol info matching `name`, if any.
    pub fn match_protocol(&self, name: &[u8]) -> Option<U::Info> {
        self.inner.protocol_info().into_iter().find(|i| i.protocol_name() == name)
    }
}

impl<U> Multistream<U> {
    pub(crate) async fn select_inbound<C>(self, socket: C) -> Result<U::Output, TransportError>
    where
        U: Upgrader<Prefixed<C>> + Send,
        C: ReadEx + WriteEx + Send,
    {
        trace!("starting multistream select for inbound...");
        let protocols = self.inner.protocol_info();
        let (info, socket) = Negotiator::new(socket).negotiate_inbound(protocols).await?;
        self.inner.upgrade_inbound(socket, info).await
    }

    pub(crate) async fn select_outbound<C>(self, socket: C) -> Result<U::Output, TransportError>
    where
        U: Upgrader<Prefixed<C>> + Send,
        C: ReadEx + WriteEx + Send,
    {
        trace!("starting multistream select for outbound...");
        let protocols = self.inner.protocol_info();
        let (info, socket) = Negotiator::new(socket).negotiate_outbound(protocols).await?;
        self.inner.upgrade_outbound(socket, info).await
    }
}

impl<T: EarlyMuxing> EarlyMuxing for Prefixed<T> {
    fn early_muxer(&self) -> Option<String> {
        self.io.early_muxer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipe;
    use async_std::task;

    fn encode_message(msg: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = unsigned_varint::encode::u64_buffer();
        out.extend_from_slice(unsigned_varint::encode::u64(msg.len() as u64 + 1, &mut buf));
        out.extend_from_slice(msg);
        out.push(b'\n');
        out
    }

    #[test]
    fn negotiate_both_sides() {
        task::block_on(async {
            let (a, b) = pipe();

            let listener = task::spawn(async move {
                let (proto, _io) = Negotiator::new(b)
                    .negotiate_inbound(vec![&b"/other/1.0.0"[..], &b"/noise"[..]])
                    .await
                    .unwrap();
                proto.to_vec()
            });

            let (proto, _io) = Negotiator::new(a)
                .negotiate_outbound(vec![&b"/noise"[..]])
                .await
                .unwrap();

            assert_eq!(proto, b"/noise");
            assert_eq!(listener.await, b"/noise".to_vec());
        })
    }

    #[test]
    fn listener_refuses_unknown_protocols() {
        task::block_on(async {
            let (a, b) = pipe();

            let listener = task::spawn(async move {
                Negotiator::new(b).negotiate_inbound(vec![&b"/noise"[..]]).await
            });

            let res = Negotiator::new(a)
                .negotiate_outbound(vec![&b"/tls/1.0.0"[..], &b"/noise"[..]])
                .await;
            let (proto, _) = res.unwrap();
            assert_eq!(proto, b"/noise");
            assert!(listener.await.is_ok());
        })
    }

    #[test]
    fn all_proposals_refused() {
        task::block_on(async {
            let (a, b) = pipe();

            let listener = task::spawn(async move {
                // The listener supports nothing the dialer wants; it keeps
                // answering na until the dialer goes away.
                let _ = Negotiator::new(b).negotiate_inbound(vec![&b"/nothing"[..]]).await;
            });

            let res = Negotiator::new(a).negotiate_outbound(vec![&b"/noise"[..]]).await;
            match res {
                Err(NegotiationError::Failed) => {}
                other => panic!("unexpected: {:?}", other.map(|_| ())),
            }
            listener.await;
        })
    }

    #[test]
    fn remainder_is_preserved() {
        task::block_on(async {
            let (a, mut b) = pipe();

            // The responder packs header, confirmation and the first bytes
            // of the next protocol into one chunk.
            let mut packed = Vec::new();
            packed.extend_from_slice(&encode_message(PROTOCOL_ID));
            packed.extend_from_slice(&encode_message(b"/noise"));
            packed.extend_from_slice(b"AB");
            b.write_all2(&packed).await.unwrap();

            let (proto, mut io) = Negotiator::new(a)
                .negotiate_outbound(vec![&b"/noise"[..]])
                .await
                .unwrap();

            assert_eq!(proto, b"/noise");
            assert_eq!(io.remainder(), b"AB");

            let mut next = [0u8; 2];
            io.read_exact2(&mut next).await.unwrap();
            assert_eq!(&next, b"AB");

            // Drain the two messages the dialer sent, then check nothing else.
            let header = b.read_one(64).await;
            assert!(header.is_ok());
        })
    }

    #[test]
    fn prefixed_serves_buffer_before_socket() {
        task::block_on(async {
            let (a, mut b) = pipe();
            b.write_all2(b"yz").await.unwrap();

            let mut prefixed = Prefixed::new(a, Bytes::from_static(b"wx"));
            let mut buf = [0u8; 4];
            prefixed.read_exact2(&mut buf).await.unwrap();
            assert_eq!(&buf, b"wxyz");
        })
    }
}
