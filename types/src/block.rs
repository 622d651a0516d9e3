//! The five block variants of the account-chain ledger.
//!
//! Each variant keeps its hashable fields in a `*Hashables` struct. The block
//! hash is computed on first use and memoised; the only way to mutate hashable
//! fields is through `hashables_mut()`, which drops the memoised value.

use blake2::digest::consts::U32;
use bincode::Options;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::amount::Amount;
use crate::error::TypesError;
use crate::hash::{BlockHash, QualifiedRoot, Root};
use crate::keys::{Account, Signature};

type Blake2b256 = Blake2b<U32>;

/// Upper bound on an encoded block.
const MAX_BLOCK_SIZE: u64 = 512;

fn finish(hasher: Blake2b256) -> BlockHash {
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    BlockHash::new(output)
}

/// Wire tag of a block variant. `NotABlock` marks a payload of bare hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockType {
    NotABlock = 1,
    Send = 2,
    Receive = 3,
    Open = 4,
    Change = 5,
    State = 6,
}

impl BlockType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::NotABlock),
            2 => Some(Self::Send),
            3 => Some(Self::Receive),
            4 => Some(Self::Open),
            5 => Some(Self::Change),
            6 => Some(Self::State),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotABlock => "not_a_block",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Open => "open",
            Self::Change => "change",
            Self::State => "state",
        }
    }
}

/// State block link: a destination account for sends, a source hash for
/// receives, zero for representative changes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Link([u8; 32]);

impl Link {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_block_hash(&self) -> BlockHash {
        BlockHash::new(self.0)
    }

    pub fn as_account(&self) -> Account {
        Account::from_bytes(self.0)
    }
}

impl From<BlockHash> for Link {
    fn from(hash: BlockHash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl From<Account> for Link {
    fn from(account: Account) -> Self {
        Self(account.0)
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

/// Memoised block hash. Equality ignores it so that derived `PartialEq` on
/// blocks compares content only.
#[derive(Clone, Default)]
pub struct LazyBlockHash(OnceLock<BlockHash>);

impl LazyBlockHash {
    fn get_or_compute(&self, compute: impl FnOnce() -> BlockHash) -> BlockHash {
        *self.0.get_or_init(compute)
    }

    fn clear(&mut self) {
        self.0 = OnceLock::new();
    }
}

impl PartialEq for LazyBlockHash {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for LazyBlockHash {}

impl fmt::Debug for LazyBlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get() {
            Some(hash) => write!(f, "{:?}", hash),
            None => write!(f, "<not computed>"),
        }
    }
}

macro_rules! block_variant {
    ($block:ident, $hashables:ident, $tag:expr) => {
        impl $block {
            pub fn new(hashables: $hashables) -> Self {
                Self {
                    hashables,
                    signature: Signature::ZERO,
                    work: 0,
                    hash: LazyBlockHash::default(),
                }
            }

            pub fn hashables(&self) -> &$hashables {
                &self.hashables
            }

            /// Mutable access to the hashed fields. Invalidates the memoised hash.
            pub fn hashables_mut(&mut self) -> &mut $hashables {
                self.hash.clear();
                &mut self.hashables
            }

            pub fn hash(&self) -> BlockHash {
                self.hash.get_or_compute(|| {
                    let mut hasher = Blake2b256::new();
                    self.hashables.feed(&mut hasher);
                    finish(hasher)
                })
            }

            pub fn block_type(&self) -> BlockType {
                $tag
            }
        }
    };
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendHashables {
    pub previous: BlockHash,
    pub destination: Account,
    pub balance: Amount,
}

impl SendHashables {
    fn feed(&self, hasher: &mut Blake2b256) {
        hasher.update(self.previous.as_bytes());
        hasher.update(self.destination.as_bytes());
        hasher.update(self.balance.to_be_bytes());
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendBlock {
    hashables: SendHashables,
    pub signature: Signature,
    pub work: u64,
    #[serde(skip)]
    hash: LazyBlockHash,
}

block_variant!(SendBlock, SendHashables, BlockType::Send);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveHashables {
    pub previous: BlockHash,
    pub source: BlockHash,
}

impl ReceiveHashables {
    fn feed(&self, hasher: &mut Blake2b256) {
        hasher.update(self.previous.as_bytes());
        hasher.update(self.source.as_bytes());
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBlock {
    hashables: ReceiveHashables,
    pub signature: Signature,
    pub work: u64,
    #[serde(skip)]
    hash: LazyBlockHash,
}

block_variant!(ReceiveBlock, ReceiveHashables, BlockType::Receive);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenHashables {
    pub source: BlockHash,
    pub representative: Account,
    pub account: Account,
}

impl OpenHashables {
    fn feed(&self, hasher: &mut Blake2b256) {
        hasher.update(self.source.as_bytes());
        hasher.update(self.representative.as_bytes());
        hasher.update(self.account.as_bytes());
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenBlock {
    hashables: OpenHashables,
    pub signature: Signature,
    pub work: u64,
    #[serde(skip)]
    hash: LazyBlockHash,
}

block_variant!(OpenBlock, OpenHashables, BlockType::Open);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeHashables {
    pub previous: BlockHash,
    pub representative: Account,
}

impl ChangeHashables {
    fn feed(&self, hasher: &mut Blake2b256) {
        hasher.update(self.previous.as_bytes());
        hasher.update(self.representative.as_bytes());
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBlock {
    hashables: ChangeHashables,
    pub signature: Signature,
    pub work: u64,
    #[serde(skip)]
    hash: LazyBlockHash,
}

block_variant!(ChangeBlock, ChangeHashables, BlockType::Change);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateHashables {
    pub account: Account,
    pub previous: BlockHash,
    pub representative: Account,
    pub balance: Amount,
    pub link: Link,
}

impl StateHashables {
    fn feed(&self, hasher: &mut Blake2b256) {
        let mut preamble = [0u8; 32];
        preamble[31] = BlockType::State as u8;
        hasher.update(preamble);
        hasher.update(self.account.as_bytes());
        hasher.update(self.previous.as_bytes());
        hasher.update(self.representative.as_bytes());
        hasher.update(self.balance.to_be_bytes());
        hasher.update(self.link.as_bytes());
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBlock {
    hashables: StateHashables,
    pub signature: Signature,
    pub work: u64,
    #[serde(skip)]
    hash: LazyBlockHash,
}

block_variant!(StateBlock, StateHashables, BlockType::State);

/// A ledger block. Shared between elections as `Arc<Block>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Send(SendBlock),
    Receive(ReceiveBlock),
    Open(OpenBlock),
    Change(ChangeBlock),
    State(StateBlock),
}

impl Block {
    pub fn new_send(previous: BlockHash, destination: Account, balance: Amount) -> Self {
        Self::Send(SendBlock::new(SendHashables {
            previous,
            destination,
            balance,
        }))
    }

    pub fn new_receive(previous: BlockHash, source: BlockHash) -> Self {
        Self::Receive(ReceiveBlock::new(ReceiveHashables { previous, source }))
    }

    pub fn new_open(source: BlockHash, representative: Account, account: Account) -> Self {
        Self::Open(OpenBlock::new(OpenHashables {
            source,
            representative,
            account,
        }))
    }

    pub fn new_change(previous: BlockHash, representative: Account) -> Self {
        Self::Change(ChangeBlock::new(ChangeHashables {
            previous,
            representative,
        }))
    }

    pub fn new_state(
        account: Account,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
        link: Link,
    ) -> Self {
        Self::State(StateBlock::new(StateHashables {
            account,
            previous,
            representative,
            balance,
            link,
        }))
    }

    pub fn block_type(&self) -> BlockType {
        match self {
            Self::Send(b) => b.block_type(),
            Self::Receive(b) => b.block_type(),
            Self::Open(b) => b.block_type(),
            Self::Change(b) => b.block_type(),
            Self::State(b) => b.block_type(),
        }
    }

    pub fn hash(&self) -> BlockHash {
        match self {
            Self::Send(b) => b.hash(),
            Self::Receive(b) => b.hash(),
            Self::Open(b) => b.hash(),
            Self::Change(b) => b.hash(),
            Self::State(b) => b.hash(),
        }
    }

    /// Hash over the block hash, signature and work. Distinguishes copies of
    /// the same block that differ only in non-hashed fields.
    pub fn full_hash(&self) -> BlockHash {
        let mut hasher = Blake2b256::new();
        hasher.update(self.hash().as_bytes());
        hasher.update(self.signature().as_bytes());
        hasher.update(self.work().to_le_bytes());
        finish(hasher)
    }

    /// Previous block in the account chain; zero for open blocks and for the
    /// first state block of an account.
    pub fn previous(&self) -> BlockHash {
        match self {
            Self::Send(b) => b.hashables.previous,
            Self::Receive(b) => b.hashables.previous,
            Self::Open(_) => BlockHash::ZERO,
            Self::Change(b) => b.hashables.previous,
            Self::State(b) => b.hashables.previous,
        }
    }

    pub fn root(&self) -> Root {
        match self {
            Self::Open(b) => Root::from(b.hashables.account),
            Self::State(b) if b.hashables.previous.is_zero() => Root::from(b.hashables.account),
            _ => Root::from(self.previous()),
        }
    }

    pub fn qualified_root(&self) -> QualifiedRoot {
        QualifiedRoot::new(self.root(), self.previous())
    }

    /// The account field, present only on open and state blocks.
    pub fn account_field(&self) -> Option<Account> {
        match self {
            Self::Open(b) => Some(b.hashables.account),
            Self::State(b) => Some(b.hashables.account),
            _ => None,
        }
    }

    /// The balance field, present only on send and state blocks.
    pub fn balance_field(&self) -> Option<Amount> {
        match self {
            Self::Send(b) => Some(b.hashables.balance),
            Self::State(b) => Some(b.hashables.balance),
            _ => None,
        }
    }

    pub fn representative_field(&self) -> Option<Account> {
        match self {
            Self::Open(b) => Some(b.hashables.representative),
            Self::Change(b) => Some(b.hashables.representative),
            Self::State(b) => Some(b.hashables.representative),
            _ => None,
        }
    }

    /// The source hash of legacy receive and open blocks.
    pub fn source_field(&self) -> Option<BlockHash> {
        match self {
            Self::Receive(b) => Some(b.hashables.source),
            Self::Open(b) => Some(b.hashables.source),
            _ => None,
        }
    }

    pub fn destination_field(&self) -> Option<Account> {
        match self {
            Self::Send(b) => Some(b.hashables.destination),
            _ => None,
        }
    }

    pub fn link_field(&self) -> Option<Link> {
        match self {
            Self::State(b) => Some(b.hashables.link),
            _ => None,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Self::Send(b) => &b.signature,
            Self::Receive(b) => &b.signature,
            Self::Open(b) => &b.signature,
            Self::Change(b) => &b.signature,
            Self::State(b) => &b.signature,
        }
    }

    pub fn set_signature(&mut self, signature: Signature) {
        match self {
            Self::Send(b) => b.signature = signature,
            Self::Receive(b) => b.signature = signature,
            Self::Open(b) => b.signature = signature,
            Self::Change(b) => b.signature = signature,
            Self::State(b) => b.signature = signature,
        }
    }

    pub fn work(&self) -> u64 {
        match self {
            Self::Send(b) => b.work,
            Self::Receive(b) => b.work,
            Self::Open(b) => b.work,
            Self::Change(b) => b.work,
            Self::State(b) => b.work,
        }
    }

    pub fn set_work(&mut self, work: u64) {
        match self {
            Self::Send(b) => b.work = work,
            Self::Receive(b) => b.work = work,
            Self::Open(b) => b.work = work,
            Self::Change(b) => b.work = work,
            Self::State(b) => b.work = work,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        bincode::serialize(self).map_err(|e| TypesError::Serialization(e.to_string()))
    }

    /// Decode one block from the front of `bytes`, returning it with the
    /// number of bytes consumed. Length prefixes larger than a block can be
    /// are rejected before anything is allocated.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), TypesError> {
        let mut cursor = std::io::Cursor::new(bytes);
        let block: Block = bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .allow_trailing_bytes()
            .with_limit(MAX_BLOCK_SIZE)
            .deserialize_from(&mut cursor)
            .map_err(|e| TypesError::Serialization(e.to_string()))?;
        Ok((block, cursor.position() as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(byte: u8) -> Account {
        Account::from_bytes([byte; 32])
    }

    fn make_hash(byte: u8) -> BlockHash {
        BlockHash::new([byte; 32])
    }

    #[test]
    fn hash_is_memoised_and_invalidated_on_mutation() {
        let mut block = SendBlock::new(SendHashables {
            previous: make_hash(1),
            destination: account(2),
            balance: Amount::raw(100),
        });
        let first = block.hash();
        assert_eq!(first, block.hash());

        block.hashables_mut().balance = Amount::raw(99);
        assert_ne!(first, block.hash());
    }

    #[test]
    fn signature_and_work_do_not_change_hash() {
        let mut block = Block::new_change(make_hash(1), account(3));
        let hash = block.hash();
        block.set_signature(Signature([9; 64]));
        block.set_work(42);
        assert_eq!(hash, block.hash());
        assert_ne!(
            Block::new_change(make_hash(1), account(3)).full_hash(),
            block.full_hash()
        );
    }

    #[test]
    fn open_block_root_is_account() {
        let block = Block::new_open(make_hash(1), account(2), account(3));
        assert_eq!(block.root(), Root::from(account(3)));
        assert!(block.previous().is_zero());
        assert_eq!(block.qualified_root(), QualifiedRoot::new(Root::from(account(3)), BlockHash::ZERO));
    }

    #[test]
    fn first_state_block_root_is_account() {
        let block = Block::new_state(account(1), BlockHash::ZERO, account(1), Amount::raw(5), Link::ZERO);
        assert_eq!(block.root(), Root::from(account(1)));

        let next = Block::new_state(account(1), make_hash(4), account(1), Amount::raw(5), Link::ZERO);
        assert_eq!(next.root(), Root::from(make_hash(4)));
    }

    #[test]
    fn conflicting_sends_share_qualified_root() {
        let a = Block::new_send(make_hash(1), account(2), Amount::raw(10));
        let b = Block::new_send(make_hash(1), account(3), Amount::raw(10));
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.qualified_root(), b.qualified_root());
    }

    #[test]
    fn variants_hash_differently() {
        let receive = Block::new_receive(make_hash(1), make_hash(2));
        let change = Block::new_change(make_hash(1), account(2));
        assert_ne!(receive.hash(), change.hash());
    }

    #[test]
    fn bytes_round_trip_preserves_hash() {
        let mut block = Block::new_state(account(1), make_hash(2), account(3), Amount::raw(7), Link::from(make_hash(4)));
        block.set_signature(Signature([1; 64]));
        let bytes = block.to_bytes().unwrap();
        let (decoded, consumed) = Block::from_bytes(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(), block.hash());
    }

    #[test]
    fn truncated_bytes_fail() {
        let block = Block::new_send(make_hash(1), account(2), Amount::raw(10));
        let bytes = block.to_bytes().unwrap();
        assert!(Block::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
