//! Node identity.
//!
//! A node's identity is an ed25519 keypair. With a seed phrase the key is
//! deterministic (SHA-256 of the phrase becomes the signing key bytes), so a
//! node keeps the same peer id across restarts; without one, a fresh random
//! key is generated.

use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

/// An ed25519 node identity.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    signing: SigningKey,
}

impl NodeIdentity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    /// Derive a deterministic identity from a seed phrase.
    pub fn from_seed_phrase(phrase: &str) -> Self {
        let digest: [u8; 32] = Sha256::digest(phrase.as_bytes()).into();
        Self {
            signing: SigningKey::from_bytes(&digest),
        }
    }

    /// Derive from an optional seed; random when absent.
    pub fn from_optional_seed(seed: Option<&str>) -> Self {
        match seed {
            Some(phrase) => Self::from_seed_phrase(phrase),
            None => Self::generate(),
        }
    }

    /// The public half of the identity.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Hex form of the public key, used as the node's peer id.
    pub fn peer_id(&self) -> String {
        hex::encode(self.verifying_key().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_phrase_is_deterministic() {
        let a = NodeIdentity::from_seed_phrase("correct horse battery staple");
        let b = NodeIdentity::from_seed_phrase("correct horse battery staple");
        assert_eq!(a.peer_id(), b.peer_id());

        let c = NodeIdentity::from_seed_phrase("different phrase");
        assert_ne!(a.peer_id(), c.peer_id());
    }

    #[test]
    fn test_generated_identities_differ() {
        let a = NodeIdentity::generate();
        let b = NodeIdentity::generate();
        assert_ne!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn test_peer_id_is_hex_of_public_key() {
        let identity = NodeIdentity::from_seed_phrase("seed");
        let peer_id = identity.peer_id();
        assert_eq!(peer_id.len(), 64);
        assert!(peer_id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
