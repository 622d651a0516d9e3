//! Genesis and ledger-wide constants per network.
//!
//! The genesis block is a legacy open block whose source field carries the
//! genesis account itself (there is no sending block). It holds the entire
//! supply and is cemented from the start.

use orv_crypto::{keypair_from_seed, sign_block};
use orv_types::{Account, Amount, Block, BlockHash, KeyPair, NetworkId};
use std::sync::Arc;

/// Seed of the well-known dev network genesis key.
pub const DEV_GENESIS_SEED: [u8; 32] = [0x34; 32];

/// The dev network genesis key pair. Tests use it to sign the first sends.
pub fn dev_genesis_key() -> KeyPair {
    keypair_from_seed(&DEV_GENESIS_SEED)
}

#[derive(Clone, Debug)]
pub struct LedgerConstants {
    pub network: NetworkId,
    pub genesis: Arc<Block>,
    pub genesis_account: Account,
    pub genesis_amount: Amount,
    /// While fewer blocks than this are cemented the ledger counts as young:
    /// frontier confirmation runs without an optimistic election budget.
    pub bootstrap_weight_max_blocks: u64,
}

impl LedgerConstants {
    pub fn new(network: NetworkId, genesis_key: &KeyPair) -> Self {
        let genesis_account = genesis_key.account();
        let mut genesis = Block::new_open(
            BlockHash::new(*genesis_account.as_bytes()),
            genesis_account,
            genesis_account,
        );
        sign_block(&mut genesis, &genesis_key.private);
        Self {
            network,
            genesis: Arc::new(genesis),
            genesis_account,
            genesis_amount: Amount::MAX,
            bootstrap_weight_max_blocks: match network {
                NetworkId::Dev => 2,
                NetworkId::Test | NetworkId::Live => 250_000,
            },
        }
    }

    pub fn dev() -> Self {
        Self::new(NetworkId::Dev, &dev_genesis_key())
    }

    pub fn genesis_hash(&self) -> BlockHash {
        self.genesis.hash()
    }
}
