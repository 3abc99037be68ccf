//! Overlay identity derivation.
//!
//! The overlay identity is the server signing key. Deriving it from the same
//! 32-byte seed means the peer ID is stable across restarts and is the same
//! key remote servers already know, so there is never a second identity to
//! manage.

use crate::error::OverlayError;
use libp2p::PeerId;
use libp2p::identity::Keypair;

/// Build the libp2p keypair for a signing seed.
///
/// # Errors
///
/// Returns [`OverlayError::Identity`] if the seed is rejected.
pub fn keypair_from_seed(seed: [u8; 32]) -> Result<Keypair, OverlayError> {
    let mut bytes = seed;
    Keypair::ed25519_from_bytes(&mut bytes).map_err(|e| OverlayError::Identity(e.to_string()))
}

/// Peer ID a signing seed maps to.
///
/// # Errors
///
/// Returns [`OverlayError::Identity`] if the seed is rejected.
pub fn peer_id_from_seed(seed: [u8; 32]) -> Result<PeerId, OverlayError> {
    Ok(keypair_from_seed(seed)?.public().to_peer_id())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use plinth_core::SigningKeyMaterial;

    #[test]
    fn derivation_is_deterministic() {
        let a = peer_id_from_seed([9u8; 32]).unwrap();
        let b = peer_id_from_seed([9u8; 32]).unwrap();
        let c = peer_id_from_seed([10u8; 32]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn overlay_key_matches_signing_key() {
        let signing = SigningKeyMaterial::from_seed("ed25519:a", [4u8; 32]).unwrap();
        let keypair = keypair_from_seed(signing.seed()).unwrap();
        let public = keypair.public().try_into_ed25519().unwrap();
        assert_eq!(public.to_bytes(), signing.public_key());
    }

    #[test]
    fn peer_id_is_textual_overlay_name() {
        let peer = peer_id_from_seed([1u8; 32]).unwrap().to_string();
        assert!(peer.starts_with("12D3KooW"));
    }
}
