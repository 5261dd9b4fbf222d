use crate::identity::Keypair;
use crate::{PeerId, PublicKey};

/// The identity facts established by a security handshake.
///
/// Implemented by secured streams and by the muxers layered on top of them,
/// so the swarm can always recover who is on the other end.
pub trait SecureInfo: Send {
    fn local_peer(&self) -> PeerId;

    fn remote_peer(&self) -> PeerId;

    fn local_priv_key(&self) -> Keypair;

    fn remote_pub_key(&self) -> PublicKey;
}
