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

//! Implementation of the multiaddr format: ordered, immutable sequences of
//! typed address components with a canonical binary and textual form.

mod errors;
mod protocol;

pub use self::errors::{Error, Result};
pub use self::protocol::Protocol;

use std::{
    convert::TryFrom,
    fmt, iter,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
    sync::Arc,
};

/// Representation of a multiaddr.
#[derive(PartialEq, Eq, Clone, Hash, Default)]
pub struct Multiaddr {
    bytes: Arc<Vec<u8>>,
}

impl Multiaddr {
    /// Create a new, empty multiaddress.
    pub fn empty() -> Self {
        Self { bytes: Arc::new(Vec::new()) }
    }

    /// Create a new, empty multiaddress with the given capacity.
    pub fn with_capacity(n: usize) -> Self {
        Self { bytes: Arc::new(Vec::with_capacity(n)) }
    }

    /// Return the length in bytes of this multiaddress.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the length of this multiaddress is 0.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Return a copy of this [`Multiaddr`]'s byte representation.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Adds an already-parsed address component to the end of this multiaddr.
    pub fn push(&mut self, p: Protocol<'_>) {
        let mut w = Vec::clone(&self.bytes);
        p.write_bytes(&mut w).expect("writing to a Vec never fails");
        self.bytes = Arc::new(w);
    }

    /// Pops the last `Protocol` of this multiaddr, or `None` if the multiaddr is empty.
    pub fn pop<'a>(&mut self) -> Option<Protocol<'a>> {
        let mut slice = &self.bytes[..]; // the remaining multiaddr slice
        if slice.is_empty() {
            return None;
        }
        let protocol = loop {
            let (p, s) = Protocol::from_bytes(slice).expect("`self.bytes` is a valid multiaddr");
            if s.is_empty() {
                break p.acquire();
            }
            slice = s
        };
        let remaining_len = self.bytes.len() - slice.len();
        let mut bytes = Vec::clone(&self.bytes);
        bytes.truncate(remaining_len);
        self.bytes = Arc::new(bytes);
        Some(protocol)
    }

    /// Like [`Multiaddr::push`] but consumes `self`.
    pub fn with(mut self, p: Protocol<'_>) -> Self {
        self.push(p);
        self
    }

    /// Returns the components of this multiaddress.
    pub fn iter(&self) -> Iter<'_> {
        Iter(&self.bytes)
    }

    /// Returns the first component, if any.
    pub fn first<'a>(&'a self) -> Option<Protocol<'a>> {
        self.iter().next()
    }
}

impl fmt::Debug for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_string().fmt(f)
    }
}

impl fmt::Display for Multiaddr {
    /// Convert a Multiaddr to a string.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in self.iter() {
            s.fmt(f)?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Multiaddr {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<'a> IntoIterator for &'a Multiaddr {
    type Item = Protocol<'a>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        Iter(&self.bytes)
    }
}

impl<'a> iter::FromIterator<Protocol<'a>> for Multiaddr {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Protocol<'a>>,
    {
        let mut writer = Vec::new();
        for cmp in iter {
            cmp.write_bytes(&mut writer).expect("writing to a Vec never fails");
        }
        Multiaddr { bytes: Arc::new(writer) }
    }
}

impl FromStr for Multiaddr {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let mut writer = Vec::new();
        let mut parts = input.split('/').peekable();

        if Some("") != parts.next() {
            // A multiaddr must start with `/`
            return Err(Error::InvalidMultiaddr);
        }

        while parts.peek().is_some() {
            let p = Protocol::from_str_parts(&mut parts)?;
            p.write_bytes(&mut writer).expect("writing to a Vec never fails");
        }

        Ok(Multiaddr { bytes: Arc::new(writer) })
    }
}

/// Iterator over `Multiaddr` components.
pub struct Iter<'a>(&'a [u8]);

impl<'a> Iterator for Iter<'a> {
    type Item = Protocol<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.0.is_empty() {
            return None;
        }
        let (p, next_data) = Protocol::from_bytes(self.0).expect("`Multiaddr` is known to be valid");
        self.0 = next_data;
        Some(p)
    }
}

impl<'a> From<Protocol<'a>> for Multiaddr {
    fn from(p: Protocol<'a>) -> Multiaddr {
        let mut w = Vec::new();
        p.write_bytes(&mut w).expect("writing to a Vec never fails");
        Multiaddr { bytes: Arc::new(w) }
    }
}

impl From<IpAddr> for Multiaddr {
    fn from(v: IpAddr) -> Multiaddr {
        match v {
            IpAddr::V4(a) => a.into(),
            IpAddr::V6(a) => a.into(),
        }
    }
}

impl From<Ipv4Addr> for Multiaddr {
    fn from(v: Ipv4Addr) -> Multiaddr {
        Protocol::Ip4(v).into()
    }
}

impl From<Ipv6Addr> for Multiaddr {
    fn from(v: Ipv6Addr) -> Multiaddr {
        Protocol::Ip6(v).into()
    }
}

impl TryFrom<Vec<u8>> for Multiaddr {
    type Error = Error;

    fn try_from(v: Vec<u8>) -> Result<Self> {
        // Check if the argument is a valid multiaddr by iterating over
        // all its components.
        let mut slice = &v[..];
        while !slice.is_empty() {
            let (_, s) = Protocol::from_bytes(slice)?;
            slice = s
        }
        Ok(Multiaddr { bytes: Arc::new(v) })
    }
}

impl TryFrom<String> for Multiaddr {
    type Error = Error;

    fn try_from(s: String) -> Result<Multiaddr> {
        s.parse()
    }
}

impl<'a> TryFrom<&'a str> for Multiaddr {
    type Error = Error;

    fn try_from(s: &'a str) -> Result<Multiaddr> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_roundtrip() {
        for text in &[
            "/ip4/127.0.0.1/tcp/4001",
            "/ip6/::1/tcp/4001/ws",
            "/dns4/example.com/tcp/443/wss",
            "/ip4/10.0.0.1/udp/4001/quic-v1",
            "/ip4/10.0.0.1/udp/4001/quic-v1/webtransport",
            "/memory/1234",
            "/ip4/1.2.3.4/tcp/4001/p2p-circuit",
        ] {
            let addr: Multiaddr = text.parse().unwrap();
            assert_eq!(&addr.to_string(), text);
        }
    }

    #[test]
    fn bytes_roundtrip() {
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001/quic".parse().unwrap();
        let bytes = addr.to_vec();
        let decoded = Multiaddr::try_from(bytes).unwrap();
        assert_eq!(decoded, addr);
    }

    #[test]
    fn push_pop() {
        let mut addr: Multiaddr = "/ip4/127.0.0.1".parse().unwrap();
        addr.push(Protocol::Tcp(4001));
        assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/4001");
        assert_eq!(addr.pop(), Some(Protocol::Tcp(4001)));
        assert_eq!(addr.to_string(), "/ip4/127.0.0.1");
        assert_eq!(addr.pop(), Some(Protocol::Ip4(Ipv4Addr::new(127, 0, 0, 1))));
        assert_eq!(addr.pop(), None);
    }

    #[test]
    fn p2p_component() {
        let peer = multihash::Sha2_256::digest(b"some public key");
        let addr = Multiaddr::from(Protocol::Ip4(Ipv4Addr::new(104, 131, 131, 82)))
            .with(Protocol::Tcp(4001))
            .with(Protocol::P2p(peer.clone()));
        let parsed: Multiaddr = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(parsed.iter().last(), Some(Protocol::P2p(peer)));
    }

    #[test]
    fn must_start_with_slash() {
        assert!("ip4/127.0.0.1".parse::<Multiaddr>().is_err());
    }
}
