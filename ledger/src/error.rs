use orv_types::{Account, BlockHash};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("block not found: {0}")]
    BlockNotFound(BlockHash),

    #[error("account not found: {0}")]
    AccountNotFound(Account),

    #[error("block {0} is cemented and cannot be rolled back")]
    RollbackCemented(BlockHash),

    #[error("block {hash} does not belong to account {account}")]
    AccountMismatch { hash: BlockHash, account: Account },

    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(String),
}
