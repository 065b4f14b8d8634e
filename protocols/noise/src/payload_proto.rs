//! The identity payload exchanged inside the encrypted portion of the
//! second and third handshake messages.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NoiseHandshakePayload {
    /// The protobuf-encoded identity public key of the sender.
    #[prost(bytes = "vec", tag = "1")]
    pub identity_key: ::prost::alloc::vec::Vec<u8>,
    /// Signature over `"noise-libp2p-static-key:" || static_public_key`.
    #[prost(bytes = "vec", tag = "2")]
    pub identity_sig: ::prost::alloc::vec::Vec<u8>,
    /// Reserved extension data.
    #[prost(bytes = "vec", tag = "3")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
