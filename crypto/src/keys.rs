//! Ed25519 key generation.

use ed25519_dalek::SigningKey;
use orv_types::{KeyPair, PrivateKey, PublicKey};

/// Generate a new Ed25519 key pair from the operating system's entropy source.
///
/// # Panics
///
/// Panics if the operating system cannot provide randomness.
pub fn generate_keypair() -> KeyPair {
    let mut seed = [0u8; 32];
    getrandom::getrandom(&mut seed).expect("operating system entropy source unavailable");
    keypair_from_seed(&seed)
}

/// Derive a key pair from a 32-byte seed. The dev genesis key and test
/// representatives are built this way.
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    let signing_key = SigningKey::from_bytes(seed);
    KeyPair {
        public: PublicKey(signing_key.verifying_key().to_bytes()),
        private: PrivateKey(signing_key.to_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        let a = generate_keypair();
        let b = generate_keypair();
        assert_ne!(a.public, b.public);
        assert!(!a.account().is_zero());
    }

    #[test]
    fn seed_derivation_is_deterministic() {
        let a = keypair_from_seed(&[42u8; 32]);
        let b = keypair_from_seed(&[42u8; 32]);
        assert_eq!(a.public, b.public);
        assert_eq!(a.private.0, b.private.0);
        assert_ne!(a.public, keypair_from_seed(&[43u8; 32]).public);
    }
}
