//! Account-chain ledger.
//!
//! Each account has its own chain (block-lattice). Sends and receives are
//! asynchronous; consensus is only needed to resolve forks. This crate holds
//! the in-memory ledger the election core consults, the single-writer queue
//! and the confirmation height processor that cements confirmed blocks.

pub mod confirmation_height;
pub mod constants;
pub mod error;
pub mod ledger;
pub mod rep_weights;
pub mod write_queue;

pub use confirmation_height::{
    BlockCallback, BlockHashCallback, ConfirmationHeightConfig, ConfirmationHeightMode,
    ConfirmationHeightProcessor, UNBOUNDED_CUTOFF,
};
pub use constants::{dev_genesis_key, LedgerConstants, DEV_GENESIS_SEED};
pub use error::LedgerError;
pub use ledger::{
    AccountInfo, BlockSideband, ConfirmationHeightInfo, Ledger, ProcessResult, SavedBlock,
};
pub use rep_weights::RepWeights;
pub use write_queue::{WriteGuard, WriteQueue, Writer};
