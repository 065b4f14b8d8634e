//! The exchange message sent by both sides right after negotiation.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Exchange {
    /// The sender's peer id bytes.
    #[prost(bytes = "vec", optional, tag = "1")]
    pub id: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
    /// The sender's public key.
    #[prost(message, optional, tag = "2")]
    pub pubkey: ::core::option::Option<peerlink_core::keys_proto::PublicKey>,
}
