use crate::{Error, Result};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use data_encoding::BASE64URL_NOPAD;
use multihash::Multihash;
use std::{
    borrow::Cow,
    convert::From,
    fmt,
    io::{Cursor, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::{self, FromStr},
};
use unsigned_varint::{decode, encode};

pub const CERTHASH: u32 = 466;
pub const DNS: u32 = 53;
pub const DNS4: u32 = 54;
pub const DNS6: u32 = 55;
pub const IP4: u32 = 4;
pub const IP6: u32 = 41;
pub const MEMORY: u32 = 777;
pub const P2P: u32 = 421;
pub const P2P_CIRCUIT: u32 = 290;
pub const QUIC: u32 = 460;
pub const QUIC_V1: u32 = 461;
pub const TCP: u32 = 6;
pub const UDP: u32 = 273;
pub const WEBTRANSPORT: u32 = 465;
pub const WS: u32 = 477;
pub const WSS: u32 = 478;

/// `Protocol` describes all possible multiaddress protocols.
///
/// The set is closed: every component a transport or upgrade layer can
/// express appears here, and nothing else parses.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Protocol<'a> {
    Certhash(Multihash),
    Dns(Cow<'a, str>),
    Dns4(Cow<'a, str>),
    Dns6(Cow<'a, str>),
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    /// Contains the "port" to contact. Similar to TCP or UDP, 0 means "assign me a port".
    Memory(u64),
    P2p(Multihash),
    P2pCircuit,
    Quic,
    QuicV1,
    Tcp(u16),
    Udp(u16),
    WebTransport,
    Ws,
    Wss,
}

impl<'a> Protocol<'a> {
    /// Parse a protocol value from the given iterator of string slices.
    ///
    /// The parsing only consumes the minimum amount of string slices necessary to
    /// produce a well-formed protocol. The same iterator can thus be used to parse
    /// a sequence of protocols in succession. It is up to client code to check
    /// that iteration has finished whenever appropriate.
    pub fn from_str_parts<I>(mut iter: I) -> Result<Self>
    where
        I: Iterator<Item = &'a str>,
    {
        match iter.next().ok_or(Error::InvalidProtocolString)? {
            "ip4" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                Ok(Protocol::Ip4(Ipv4Addr::from_str(s)?))
            }
            "ip6" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                Ok(Protocol::Ip6(Ipv6Addr::from_str(s)?))
            }
            "tcp" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                Ok(Protocol::Tcp(s.parse()?))
            }
            "udp" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                Ok(Protocol::Udp(s.parse()?))
            }
            "dns" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                Ok(Protocol::Dns(Cow::Borrowed(s)))
            }
            "dns4" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                Ok(Protocol::Dns4(Cow::Borrowed(s)))
            }
            "dns6" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                Ok(Protocol::Dns6(Cow::Borrowed(s)))
            }
            "p2p" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                let decoded = bs58::decode(s).into_vec()?;
                Ok(Protocol::P2p(Multihash::from_bytes(decoded)?))
            }
            "certhash" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                // Multibase, restricted to the base64url alphabet ('u').
                if !s.starts_with('u') {
                    return Err(Error::InvalidProtocolString);
                }
                let decoded = BASE64URL_NOPAD.decode(s[1..].as_bytes())?;
                Ok(Protocol::Certhash(Multihash::from_bytes(decoded)?))
            }
            "quic" => Ok(Protocol::Quic),
            "quic-v1" => Ok(Protocol::QuicV1),
            "ws" => Ok(Protocol::Ws),
            "wss" => Ok(Protocol::Wss),
            "webtransport" => Ok(Protocol::WebTransport),
            "p2p-circuit" => Ok(Protocol::P2pCircuit),
            "memory" => {
                let s = iter.next().ok_or(Error::InvalidProtocolString)?;
                Ok(Protocol::Memory(s.parse()?))
            }
            unknown => Err(Error::UnknownProtocolString(unknown.to_string())),
        }
    }

    /// Parse a single `Protocol` from its byte slice representation,
    /// returning the protocol as well as the remaining byte slice.
    pub fn from_bytes(input: &'a [u8]) -> Result<(Self, &'a [u8])> {
        fn split_at(n: usize, input: &[u8]) -> Result<(&[u8], &[u8])> {
            if input.len() < n {
                return Err(Error::DataLessThanLen);
            }
            Ok(input.split_at(n))
        }
        let (id, input) = decode::u32(input)?;
        match id {
            IP4 => {
                let (data, rest) = split_at(4, input)?;
                Ok((Protocol::Ip4(Ipv4Addr::new(data[0], data[1], data[2], data[3])), rest))
            }
            IP6 => {
                let (data, rest) = split_at(16, input)?;
                let mut rdr = Cursor::new(data);
                let mut seg = [0u16; 8];
                for x in seg.iter_mut() {
                    *x = rdr.read_u16::<BigEndian>().map_err(|e| Error::ParsingError(e.into()))?;
                }
                let addr = Ipv6Addr::new(seg[0], seg[1], seg[2], seg[3], seg[4], seg[5], seg[6], seg[7]);
                Ok((Protocol::Ip6(addr), rest))
            }
            TCP => {
                let (data, rest) = split_at(2, input)?;
                Ok((Protocol::Tcp(BigEndian::read_u16(data)), rest))
            }
            UDP => {
                let (data, rest) = split_at(2, input)?;
                Ok((Protocol::Udp(BigEndian::read_u16(data)), rest))
            }
            DNS => {
                let (n, input) = decode::usize(input)?;
                let (data, rest) = split_at(n, input)?;
                Ok((Protocol::Dns(Cow::Borrowed(str::from_utf8(data)?)), rest))
            }
            DNS4 => {
                let (n, input) = decode::usize(input)?;
                let (data, rest) = split_at(n, input)?;
                Ok((Protocol::Dns4(Cow::Borrowed(str::from_utf8(data)?)), rest))
            }
            DNS6 => {
                let (n, input) = decode::usize(input)?;
                let (data, rest) = split_at(n, input)?;
                Ok((Protocol::Dns6(Cow::Borrowed(str::from_utf8(data)?)), rest))
            }
            P2P => {
                let (n, input) = decode::usize(input)?;
                let (data, rest) = split_at(n, input)?;
                Ok((Protocol::P2p(Multihash::from_bytes(data.to_owned())?), rest))
            }
            CERTHASH => {
                let (n, input) = decode::usize(input)?;
                let (data, rest) = split_at(n, input)?;
                Ok((Protocol::Certhash(Multihash::from_bytes(data.to_owned())?), rest))
            }
            QUIC => Ok((Protocol::Quic, input)),
            QUIC_V1 => Ok((Protocol::QuicV1, input)),
            WS => Ok((Protocol::Ws, input)),
            WSS => Ok((Protocol::Wss, input)),
            WEBTRANSPORT => Ok((Protocol::WebTransport, input)),
            P2P_CIRCUIT => Ok((Protocol::P2pCircuit, input)),
            MEMORY => {
                let (data, rest) = split_at(8, input)?;
                Ok((Protocol::Memory(BigEndian::read_u64(data)), rest))
            }
            _ => Err(Error::UnknownProtocolId(id)),
        }
    }

    /// Encode this protocol by writing its binary representation into
    /// the given `Write` impl.
    pub fn write_bytes<W: Write>(&self, w: &mut W) -> Result<()> {
        fn io_err(e: std::io::Error) -> Error {
            Error::ParsingError(e.into())
        }
        fn write_sized<W: Write>(w: &mut W, id: u32, data: &[u8]) -> std::io::Result<()> {
            let mut buf = encode::u32_buffer();
            w.write_all(encode::u32(id, &mut buf))?;
            let mut len_buf = encode::usize_buffer();
            w.write_all(encode::usize(data.len(), &mut len_buf))?;
            w.write_all(data)
        }
        let mut buf = encode::u32_buffer();
        match self {
            Protocol::Ip4(addr) => {
                w.write_all(encode::u32(IP4, &mut buf)).map_err(io_err)?;
                w.write_all(&addr.octets()).map_err(io_err)
            }
            Protocol::Ip6(addr) => {
                w.write_all(encode::u32(IP6, &mut buf)).map_err(io_err)?;
                for &segment in &addr.segments() {
                    w.write_u16::<BigEndian>(segment).map_err(io_err)?;
                }
                Ok(())
            }
            Protocol::Tcp(port) => {
                w.write_all(encode::u32(TCP, &mut buf)).map_err(io_err)?;
                w.write_u16::<BigEndian>(*port).map_err(io_err)
            }
            Protocol::Udp(port) => {
                w.write_all(encode::u32(UDP, &mut buf)).map_err(io_err)?;
                w.write_u16::<BigEndian>(*port).map_err(io_err)
            }
            Protocol::Dns(s) => write_sized(w, DNS, s.as_bytes()).map_err(io_err),
            Protocol::Dns4(s) => write_sized(w, DNS4, s.as_bytes()).map_err(io_err),
            Protocol::Dns6(s) => write_sized(w, DNS6, s.as_bytes()).map_err(io_err),
            Protocol::P2p(multihash) => write_sized(w, P2P, multihash.as_bytes()).map_err(io_err),
            Protocol::Certhash(multihash) => write_sized(w, CERTHASH, multihash.as_bytes()).map_err(io_err),
            Protocol::Quic => w.write_all(encode::u32(QUIC, &mut buf)).map_err(io_err),
            Protocol::QuicV1 => w.write_all(encode::u32(QUIC_V1, &mut buf)).map_err(io_err),
            Protocol::Ws => w.write_all(encode::u32(WS, &mut buf)).map_err(io_err),
            Protocol::Wss => w.write_all(encode::u32(WSS, &mut buf)).map_err(io_err),
            Protocol::WebTransport => w.write_all(encode::u32(WEBTRANSPORT, &mut buf)).map_err(io_err),
            Protocol::P2pCircuit => w.write_all(encode::u32(P2P_CIRCUIT, &mut buf)).map_err(io_err),
            Protocol::Memory(port) => {
                w.write_all(encode::u32(MEMORY, &mut buf)).map_err(io_err)?;
                w.write_u64::<BigEndian>(*port).map_err(io_err)
            }
        }
    }

    /// Turn this `Protocol` into one that owns its data, thus being valid for any lifetime.
    pub fn acquire<'b>(self) -> Protocol<'b> {
        match self {
            Protocol::Certhash(h) => Protocol::Certhash(h),
            Protocol::Dns(s) => Protocol::Dns(Cow::Owned(s.into_owned())),
            Protocol::Dns4(s) => Protocol::Dns4(Cow::Owned(s.into_owned())),
            Protocol::Dns6(s) => Protocol::Dns6(Cow::Owned(s.into_owned())),
            Protocol::Ip4(addr) => Protocol::Ip4(addr),
            Protocol::Ip6(addr) => Protocol::Ip6(addr),
            Protocol::Memory(port) => Protocol::Memory(port),
            Protocol::P2p(h) => Protocol::P2p(h),
            Protocol::P2pCircuit => Protocol::P2pCircuit,
            Protocol::Quic => Protocol::Quic,
            Protocol::QuicV1 => Protocol::QuicV1,
            Protocol::Tcp(port) => Protocol::Tcp(port),
            Protocol::Udp(port) => Protocol::Udp(port),
            Protocol::WebTransport => Protocol::WebTransport,
            Protocol::Ws => Protocol::Ws,
            Protocol::Wss => Protocol::Wss,
        }
    }
}

impl<'a> fmt::Display for Protocol<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::Protocol::*;
        match self {
            Certhash(h) => write!(f, "/certhash/u{}", BASE64URL_NOPAD.encode(h.as_bytes())),
            Dns(s) => write!(f, "/dns/{}", s),
            Dns4(s) => write!(f, "/dns4/{}", s),
            Dns6(s) => write!(f, "/dns6/{}", s),
            Ip4(addr) => write!(f, "/ip4/{}", addr),
            Ip6(addr) => write!(f, "/ip6/{}", addr),
            Memory(port) => write!(f, "/memory/{}", port),
            P2p(h) => write!(f, "/p2p/{}", bs58::encode(h.as_bytes()).into_string()),
            P2pCircuit => f.write_str("/p2p-circuit"),
            Quic => f.write_str("/quic"),
            QuicV1 => f.write_str("/quic-v1"),
            Tcp(port) => write!(f, "/tcp/{}", port),
            Udp(port) => write!(f, "/udp/{}", port),
            WebTransport => f.write_str("/webtransport"),
            Ws => f.write_str("/ws"),
            Wss => f.write_str("/wss"),
        }
    }
}

impl<'a> From<IpAddr> for Protocol<'a> {
    #[inline]
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(addr) => Protocol::Ip4(addr),
            IpAddr::V6(addr) => Protocol::Ip6(addr),
        }
    }
}

impl<'a> From<Ipv4Addr> for Protocol<'a> {
    #[inline]
    fn from(addr: Ipv4Addr) -> Self {
        Protocol::Ip4(addr)
    }
}

impl<'a> From<Ipv6Addr> for Protocol<'a> {
    #[inline]
    fn from(addr: Ipv6Addr) -> Self {
        Protocol::Ip6(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(proto: Protocol) {
        let mut bytes = Vec::new();
        proto.write_bytes(&mut bytes).unwrap();
        let (decoded, rest) = Protocol::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, proto);
        assert!(rest.is_empty());
    }

    #[test]
    fn byte_roundtrips() {
        roundtrip(Protocol::Ip4(Ipv4Addr::new(127, 0, 0, 1)));
        roundtrip(Protocol::Ip6(Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0xc00a, 0x2ff)));
        roundtrip(Protocol::Tcp(4001));
        roundtrip(Protocol::Udp(4001));
        roundtrip(Protocol::Dns(Cow::Borrowed("example.com")));
        roundtrip(Protocol::Quic);
        roundtrip(Protocol::QuicV1);
        roundtrip(Protocol::Ws);
        roundtrip(Protocol::Wss);
        roundtrip(Protocol::WebTransport);
        roundtrip(Protocol::P2pCircuit);
        roundtrip(Protocol::Memory(1234567));
    }

    #[test]
    fn unknown_protocol_id() {
        let mut buf = encode::u32_buffer();
        let bytes = encode::u32(9999, &mut buf);
        match Protocol::from_bytes(bytes) {
            Err(Error::UnknownProtocolId(9999)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn certhash_text_form() {
        let hash = multihash::Sha2_256::digest(b"certificate");
        let proto = Protocol::Certhash(hash.clone());
        let text = proto.to_string();
        assert!(text.starts_with("/certhash/u"));

        let parsed = Protocol::from_str_parts(text.split('/').skip(1)).unwrap();
        assert_eq!(parsed, Protocol::Certhash(hash));
    }
}
