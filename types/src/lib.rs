//! Fundamental types for the ORV node.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! hashes and roots, accounts and signatures, amounts, the five block variants,
//! and the explicit network-parameters object.

pub mod amount;
pub mod block;
pub mod error;
pub mod hash;
pub mod keys;
pub mod network;
pub mod time;

pub use amount::Amount;
pub use block::{
    Block, BlockType, ChangeBlock, ChangeHashables, Link, OpenBlock, OpenHashables, ReceiveBlock,
    ReceiveHashables, SendBlock, SendHashables, StateBlock, StateHashables,
};
pub use error::TypesError;
pub use hash::{BlockHash, QualifiedRoot, Root};
pub use keys::{Account, KeyPair, PrivateKey, PublicKey, Signature};
pub use network::{NetworkId, NetworkParams};
pub use time::milliseconds_since_epoch;
