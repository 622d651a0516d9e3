//! Cryptographic primitives for the ORV node.
//!
//! - **Ed25519** for signing and signature verification
//! - **Batched verification** spread over the rayon thread pool
//! - **Blake2b-256** for vote digests

pub mod hash;
pub mod keys;
pub mod sign;

pub use hash::{blake2b_256, blake2b_256_multi};
pub use keys::{generate_keypair, keypair_from_seed};
pub use sign::{
    sign_block, sign_message, validate_block_signature, verify_batch, verify_signature,
    VerifyItem,
};
