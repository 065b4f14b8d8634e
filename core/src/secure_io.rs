use crate::identity::Keypair;
use crate::{PeerId, PublicKey};

/// Information about an authenticated connection.
///
/// Implemented by every secured connection and everything layered on top of
/// one, so upper layers can always name both endpoints.
pub trait SecureInfo {
    /// The local peer id.
    fn local_peer(&self) -> PeerId;

    /// The remote peer id, derived from the authenticated remote key.
    fn remote_peer(&self) -> PeerId;

    /// The local identity keypair.
    fn local_priv_key(&self) -> Keypair;

    /// The authenticated public key of the remote.
    fn remote_pub_key(&self) -> PublicKey;
}
