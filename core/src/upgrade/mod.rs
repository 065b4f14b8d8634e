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

//! Connection upgrades: protocol negotiation plus the upgraders that turn
//! a raw connection into a secured one, and a secured connection into a
//! multiplexed one.

mod dummy;
mod multistream;
mod select;

pub use dummy::DummyUpgrader;
pub use multistream::{Multistream, NegotiationError, Negotiator, Prefixed, PrefixedReader};
pub use select::Selector;

use crate::transport::TransportError;
use async_trait::async_trait;

/// Types serving as protocol names.
pub trait ProtocolName {
    /// The protocol id to present to the remote, e.g. `/noise` or
    /// `/yamux/1.0.0`. Case-sensitive, compared byte for byte.
    fn protocol_name(&self) -> &[u8];

    /// The protocol id as a lossy string, for logging.
    fn protocol_name_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.protocol_name())
    }
}

impl<T: AsRef<[u8]>> ProtocolName for T {
    fn protocol_name(&self) -> &[u8] {
        self.as_ref()
    }
}

/// Common interface of upgraders: the protocols they can be negotiated over.
pub trait UpgradeInfo: Send {
    type Info: ProtocolName + Clone + Send + Sync + std::fmt::Debug;

    /// The list of supported protocol ids, in priority order.
    fn protocol_info(&self) -> Vec<Self::Info>;
}

/// An upgrader turns a connection of type `C` into its output type, after
/// a protocol from its `protocol_info` has been negotiated.
#[async_trait]
pub trait Upgrader<C>: UpgradeInfo {
    type Output: Send;

    /// Upgrades the connection from the listening side.
    async fn upgrade_inbound(self, socket: C, info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError>;

    /// Upgrades the connection from the dialing side.
    async fn upgrade_outbound(self, socket: C, info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError>;
}

/// Implemented by secured connections whose security handshake may already
/// have pinned the stream muxer, e.g. through TLS ALPN tokens. The upgrade
/// pipeline skips the muxer negotiation round when a muxer was pinned.
pub trait EarlyMuxing {
    /// The muxer protocol id learned during the security handshake, if any.
    fn early_muxer(&self) -> Option<String> {
        None
    }
}

/// Extracts a muxer protocol id from a list of negotiated ALPN tokens.
///
/// Tokens of the form `libp2p/<muxer-id>` pin that muxer. The bare
/// `libp2p` token (and anything else) expresses no preference, leaving the
/// choice to ordinary negotiation.
pub fn muxer_from_alpn<'a, I>(tokens: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    for token in tokens {
        if let Some(rest) = token.strip_prefix("libp2p/") {
            if !rest.is_empty() {
                return Some(format!("/{}", rest.trim_start_matches('/')));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_token_pins_muxer() {
        assert_eq!(muxer_from_alpn(vec!["libp2p/yamux/1.0.0"]), Some("/yamux/1.0.0".to_string()));
        assert_eq!(muxer_from_alpn(vec!["h2", "libp2p/mplex/6.7.0"]), Some("/mplex/6.7.0".to_string()));
    }

    #[test]
    fn bare_libp2p_token_is_a_fallback() {
        assert_eq!(muxer_from_alpn(vec!["libp2p"]), None);
        assert_eq!(muxer_from_alpn(Vec::<&str>::new()), None);
    }
}
