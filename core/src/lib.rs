//! Core traits, identity and upgrade machinery of *peerlink*.
//!
//! The main concepts are:
//!
//! - A [`PeerId`] is a unique global identifier for a node on the network.
//!   Each node must have a different `PeerId`. Normally, a `PeerId` is the
//!   hash of the public key used to negotiate encryption on the
//!   communication channel, thereby guaranteeing that they cannot be spoofed.
//! - A raw connection (anything `ReadEx + WriteEx`) is turned into a
//!   secured and then multiplexed connection by the
//!   [upgrade pipeline](transport::upgrade), negotiating each layer with
//!   multistream-select.

pub mod keys_proto;

pub mod either;
pub mod eventbus;
pub mod identity;
pub mod muxing;
pub mod peer_id;
pub mod pipe;
pub mod secure_io;
pub mod transport;
pub mod upgrade;

pub use identity::PublicKey;
pub use peer_id::PeerId;
pub use peerlink_multiaddr::Multiaddr;
