//! 32-byte identifiers: block hashes, roots and qualified roots.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::keys::PublicKey;

/// A 32-byte block hash. Identifies a block in an account's chain.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub const ZERO: Self = Self([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl From<u64> for BlockHash {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// The contested chain position of a block: the previous block's hash, or
/// the account itself for the first block of a chain.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Root([u8; 32]);

impl Root {
    pub const ZERO: Self = Self([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Interpret the root as a block hash (the previous block).
    pub fn as_block_hash(&self) -> BlockHash {
        BlockHash(self.0)
    }

    /// Interpret the root as an account (an open block's root).
    pub fn as_account(&self) -> PublicKey {
        PublicKey(self.0)
    }
}

impl From<BlockHash> for Root {
    fn from(hash: BlockHash) -> Self {
        Self(hash.0)
    }
}

impl From<PublicKey> for Root {
    fn from(account: PublicKey) -> Self {
        Self(account.0)
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Root({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// `(root, previous)`: addresses one contested ledger position regardless of
/// which competing block currently occupies it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct QualifiedRoot {
    pub root: Root,
    pub previous: BlockHash,
}

impl QualifiedRoot {
    pub fn new(root: Root, previous: BlockHash) -> Self {
        Self { root, previous }
    }
}

impl fmt::Debug for QualifiedRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QualifiedRoot({}\u{2026}, {}\u{2026})",
            hex::encode(&self.root.0[..4]),
            hex::encode(&self.previous.0[..4])
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_hash_from_u64_is_big_endian() {
        let hash = BlockHash::from(1);
        assert_eq!(hash.as_bytes()[31], 1);
        assert!(hash.as_bytes()[..31].iter().all(|b| *b == 0));
    }

    #[test]
    fn root_round_trips_through_hash_and_account() {
        let hash = BlockHash::new([7; 32]);
        let root = Root::from(hash);
        assert_eq!(root.as_block_hash(), hash);
        assert_eq!(root.as_account(), PublicKey([7; 32]));
    }

    #[test]
    fn qualified_roots_differ_by_previous() {
        let root = Root::new([1; 32]);
        let a = QualifiedRoot::new(root, BlockHash::new([2; 32]));
        let b = QualifiedRoot::new(root, BlockHash::new([3; 32]));
        assert_ne!(a, b);
    }

    #[test]
    fn display_is_full_hex() {
        let hash = BlockHash::new([0xab; 32]);
        assert_eq!(hash.to_string(), "ab".repeat(32));
    }
}
