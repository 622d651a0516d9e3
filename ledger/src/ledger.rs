//! In-memory account-chain ledger.
//!
//! Validates and applies the five block variants, keeps representative
//! weights current, tracks receivable sends and records per-account
//! confirmation heights. Signatures are verified; proof of work is not.

use orv_crypto::validate_block_signature;
use orv_types::{Account, Amount, Block, BlockHash};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::constants::LedgerConstants;
use crate::error::LedgerError;
use crate::rep_weights::RepWeights;
use crate::write_queue::WriteGuard;

/// Outcome of [`Ledger::process`]. Only `Progress` changes the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessResult {
    Progress,
    /// Already in the ledger.
    Old,
    /// Another block already occupies this block's root.
    Fork,
    GapPrevious,
    GapSource,
    BadSignature,
    NegativeSpend,
    /// The referenced send does not exist or was already received.
    Unreceivable,
    BalanceMismatch,
    /// Previous block belongs to a different account.
    BlockPosition,
}

impl ProcessResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Old => "old",
            Self::Fork => "fork",
            Self::GapPrevious => "gap_previous",
            Self::GapSource => "gap_source",
            Self::BadSignature => "bad_signature",
            Self::NegativeSpend => "negative_spend",
            Self::Unreceivable => "unreceivable",
            Self::BalanceMismatch => "balance_mismatch",
            Self::BlockPosition => "block_position",
        }
    }
}

/// Ledger-derived facts stored alongside every block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSideband {
    pub height: u64,
    pub account: Account,
    /// Account balance after this block.
    pub balance: Amount,
    /// Next block in the chain, zero at the head.
    pub successor: BlockHash,
}

#[derive(Clone, Debug)]
pub struct SavedBlock {
    pub block: Arc<Block>,
    pub sideband: BlockSideband,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub head: BlockHash,
    pub representative: Account,
    pub open_block: BlockHash,
    pub balance: Amount,
    pub block_count: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationHeightInfo {
    pub height: u64,
    pub frontier: BlockHash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PendingKey {
    account: Account,
    send: BlockHash,
}

#[derive(Clone, Copy, Debug)]
struct PendingInfo {
    source: Account,
    amount: Amount,
}

#[derive(Default)]
struct LedgerState {
    blocks: HashMap<BlockHash, SavedBlock>,
    accounts: BTreeMap<Account, AccountInfo>,
    confirmation_heights: HashMap<Account, ConfirmationHeightInfo>,
    pending: HashMap<PendingKey, PendingInfo>,
    /// send hash → the block that received it.
    receivers: HashMap<BlockHash, BlockHash>,
    rep_weights: RepWeights,
    cemented_count: u64,
}

pub struct Ledger {
    constants: LedgerConstants,
    state: RwLock<LedgerState>,
    final_votes_canary: AtomicBool,
}

impl Ledger {
    /// A ledger holding only the cemented genesis block.
    pub fn new(constants: LedgerConstants) -> Self {
        let genesis = Arc::clone(&constants.genesis);
        let account = constants.genesis_account;
        let hash = genesis.hash();
        let mut state = LedgerState::default();
        state.blocks.insert(
            hash,
            SavedBlock {
                block: genesis,
                sideband: BlockSideband {
                    height: 1,
                    account,
                    balance: constants.genesis_amount,
                    successor: BlockHash::ZERO,
                },
            },
        );
        state.accounts.insert(
            account,
            AccountInfo {
                head: hash,
                representative: account,
                open_block: hash,
                balance: constants.genesis_amount,
                block_count: 1,
            },
        );
        state.confirmation_heights.insert(
            account,
            ConfirmationHeightInfo {
                height: 1,
                frontier: hash,
            },
        );
        state.rep_weights.add(&account, constants.genesis_amount);
        state.cemented_count = 1;

        Self {
            constants,
            state: RwLock::new(state),
            final_votes_canary: AtomicBool::new(false),
        }
    }

    pub fn constants(&self) -> &LedgerConstants {
        &self.constants
    }

    /// Validate `block` and append it to its account chain.
    pub fn process(&self, block: &Arc<Block>) -> ProcessResult {
        let result = self.state.write().unwrap().process(block);
        debug!(hash = %block.hash(), result = result.as_str(), "block processed");
        result
    }

    /// Remove `hash` and every block built on it, including receives of any
    /// rolled-back send in other accounts. Returns the removed blocks, most
    /// recent first.
    pub fn rollback(&self, hash: &BlockHash) -> Result<Vec<Arc<Block>>, LedgerError> {
        let mut removed = Vec::new();
        let result = self.state.write().unwrap().rollback(hash, &mut removed);
        match &result {
            Ok(()) => debug!(%hash, count = removed.len(), "rolled back"),
            Err(e) => warn!(%hash, error = %e, "rollback failed"),
        }
        result.map(|()| removed)
    }

    pub fn block(&self, hash: &BlockHash) -> Option<Arc<Block>> {
        self.state
            .read()
            .unwrap()
            .blocks
            .get(hash)
            .map(|s| Arc::clone(&s.block))
    }

    pub fn saved_block(&self, hash: &BlockHash) -> Option<SavedBlock> {
        self.state.read().unwrap().blocks.get(hash).cloned()
    }

    pub fn block_exists(&self, hash: &BlockHash) -> bool {
        self.state.read().unwrap().blocks.contains_key(hash)
    }

    pub fn block_account(&self, hash: &BlockHash) -> Option<Account> {
        self.state
            .read()
            .unwrap()
            .blocks
            .get(hash)
            .map(|s| s.sideband.account)
    }

    pub fn block_height(&self, hash: &BlockHash) -> Option<u64> {
        self.state
            .read()
            .unwrap()
            .blocks
            .get(hash)
            .map(|s| s.sideband.height)
    }

    /// Account balance after `hash`.
    pub fn balance(&self, hash: &BlockHash) -> Option<Amount> {
        self.state
            .read()
            .unwrap()
            .blocks
            .get(hash)
            .map(|s| s.sideband.balance)
    }

    /// Whether `hash` is at or below its account's confirmation height.
    pub fn block_confirmed(&self, hash: &BlockHash) -> bool {
        self.state.read().unwrap().block_confirmed(hash)
    }

    pub fn successor(&self, hash: &BlockHash) -> Option<BlockHash> {
        self.state
            .read()
            .unwrap()
            .blocks
            .get(hash)
            .map(|s| s.sideband.successor)
            .filter(|s| !s.is_zero())
    }

    pub fn account_info(&self, account: &Account) -> Option<AccountInfo> {
        self.state.read().unwrap().accounts.get(account).cloned()
    }

    pub fn confirmation_height(&self, account: &Account) -> ConfirmationHeightInfo {
        self.state
            .read()
            .unwrap()
            .confirmation_heights
            .get(account)
            .copied()
            .unwrap_or_default()
    }

    /// Voting weight delegated to `representative`.
    pub fn weight(&self, representative: &Account) -> Amount {
        self.state.read().unwrap().rep_weights.weight(representative)
    }

    /// Snapshot of every representative with non-zero weight.
    pub fn rep_weights(&self) -> HashMap<Account, Amount> {
        self.state.read().unwrap().rep_weights.all().clone()
    }

    /// Sender and amount of the unreceived `send` destined to `account`.
    pub fn receivable(&self, account: &Account, send: &BlockHash) -> Option<(Account, Amount)> {
        self.state
            .read()
            .unwrap()
            .pending
            .get(&PendingKey {
                account: *account,
                send: *send,
            })
            .map(|p| (p.source, p.amount))
    }

    /// The send block a receiving `block` pulls funds from, if any.
    pub fn receive_source(&self, block: &Block) -> Option<BlockHash> {
        self.state.read().unwrap().receive_source(block)
    }

    /// Whether everything `block` depends on (its previous block and the
    /// send it receives) is cemented.
    pub fn dependents_confirmed(&self, block: &Block) -> bool {
        let state = self.state.read().unwrap();
        let previous = block.previous();
        if !previous.is_zero() && !state.block_confirmed(&previous) {
            return false;
        }
        match state.receive_source(block) {
            Some(source) => state.block_confirmed(&source),
            None => true,
        }
    }

    /// Balance of the account before `block`. Zero for the first block.
    pub fn previous_balance(&self, block: &Block) -> Option<Amount> {
        let previous = block.previous();
        if previous.is_zero() {
            return Some(Amount::ZERO);
        }
        self.balance(&previous)
    }

    /// The block currently in the ledger at `block`'s root, which may be
    /// `block` itself.
    pub fn forked_block(&self, block: &Block) -> Option<Arc<Block>> {
        let state = self.state.read().unwrap();
        let previous = block.previous();
        let hash = if previous.is_zero() {
            let account = block.account_field()?;
            state.accounts.get(&account)?.open_block
        } else {
            let successor = state.blocks.get(&previous)?.sideband.successor;
            if successor.is_zero() {
                return None;
            }
            successor
        };
        state.blocks.get(&hash).map(|s| Arc::clone(&s.block))
    }

    pub fn cemented_count(&self) -> u64 {
        self.state.read().unwrap().cemented_count
    }

    pub fn block_count(&self) -> u64 {
        self.state.read().unwrap().blocks.len() as u64
    }

    pub fn account_count(&self) -> u64 {
        self.state.read().unwrap().accounts.len() as u64
    }

    /// Up to `max` accounts in key order, starting at `start` inclusive.
    pub fn accounts_from(&self, start: &Account, max: usize) -> Vec<(Account, AccountInfo)> {
        self.state
            .read()
            .unwrap()
            .accounts
            .range((Bound::Included(*start), Bound::Unbounded))
            .take(max)
            .map(|(a, i)| (*a, i.clone()))
            .collect()
    }

    /// When set, elections additionally need final-vote quorum to confirm.
    pub fn final_votes_canary(&self) -> bool {
        self.final_votes_canary.load(Ordering::SeqCst)
    }

    pub fn set_final_votes_canary(&self, enabled: bool) {
        self.final_votes_canary.store(enabled, Ordering::SeqCst);
    }

    /// Uncemented blocks of `account` from above `above_height` up to and
    /// including `top`, lowest first.
    pub fn chain_segment(
        &self,
        account: &Account,
        top: &BlockHash,
        above_height: u64,
    ) -> Result<Vec<Arc<Block>>, LedgerError> {
        self.state
            .read()
            .unwrap()
            .chain_segment(account, top, above_height)
    }

    /// Raise `account`'s confirmation height to `top`. Returns the newly
    /// cemented blocks, lowest first; empty if `top` was already cemented.
    pub fn confirm(
        &self,
        _guard: &WriteGuard,
        account: &Account,
        top: &BlockHash,
    ) -> Result<Vec<Arc<Block>>, LedgerError> {
        let mut state = self.state.write().unwrap();
        let current = state
            .confirmation_heights
            .get(account)
            .copied()
            .unwrap_or_default();
        let cemented = state.chain_segment(account, top, current.height)?;
        if let Some(last) = cemented.last() {
            let height = current.height + cemented.len() as u64;
            state.confirmation_heights.insert(
                *account,
                ConfirmationHeightInfo {
                    height,
                    frontier: last.hash(),
                },
            );
            state.cemented_count += cemented.len() as u64;
        }
        Ok(cemented)
    }
}

impl LedgerState {
    fn block_confirmed(&self, hash: &BlockHash) -> bool {
        let Some(saved) = self.blocks.get(hash) else {
            return false;
        };
        let confirmed = self
            .confirmation_heights
            .get(&saved.sideband.account)
            .map(|c| c.height)
            .unwrap_or(0);
        saved.sideband.height <= confirmed
    }

    fn previous_balance(&self, block: &Block) -> Option<Amount> {
        let previous = block.previous();
        if previous.is_zero() {
            Some(Amount::ZERO)
        } else {
            self.blocks.get(&previous).map(|s| s.sideband.balance)
        }
    }

    fn receive_source(&self, block: &Block) -> Option<BlockHash> {
        match block {
            Block::Receive(_) | Block::Open(_) => block.source_field(),
            Block::State(_) => {
                let balance = block.balance_field()?;
                let previous_balance = self.previous_balance(block)?;
                let link = block.link_field()?;
                (balance > previous_balance && !link.is_zero()).then(|| link.as_block_hash())
            }
            Block::Send(_) | Block::Change(_) => None,
        }
    }

    /// Representative in effect after `hash`. Legacy send and receive blocks
    /// carry none, so walk back to the last one that does.
    fn representative_at(&self, hash: &BlockHash) -> Option<Account> {
        let mut current = *hash;
        loop {
            let saved = self.blocks.get(&current)?;
            if let Some(rep) = saved.block.representative_field() {
                return Some(rep);
            }
            current = saved.block.previous();
        }
    }

    fn chain_segment(
        &self,
        account: &Account,
        top: &BlockHash,
        above_height: u64,
    ) -> Result<Vec<Arc<Block>>, LedgerError> {
        let saved = self
            .blocks
            .get(top)
            .ok_or(LedgerError::BlockNotFound(*top))?;
        if saved.sideband.account != *account {
            return Err(LedgerError::AccountMismatch {
                hash: *top,
                account: *account,
            });
        }
        let mut segment = Vec::new();
        let mut current = saved;
        while current.sideband.height > above_height {
            segment.push(Arc::clone(&current.block));
            let previous = current.block.previous();
            if previous.is_zero() {
                break;
            }
            current = self
                .blocks
                .get(&previous)
                .ok_or(LedgerError::BlockNotFound(previous))?;
        }
        segment.reverse();
        Ok(segment)
    }

    fn process(&mut self, block: &Arc<Block>) -> ProcessResult {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return ProcessResult::Old;
        }

        let previous = block.previous();
        let opening = previous.is_zero();

        // Resolve the owning account and the chain state the block builds on.
        let (account, previous_height, previous_balance, previous_rep) = if opening {
            let Some(account) = block.account_field() else {
                return ProcessResult::GapPrevious;
            };
            if !validate_block_signature(block, &account) {
                return ProcessResult::BadSignature;
            }
            if self.accounts.contains_key(&account) {
                return ProcessResult::Fork;
            }
            (account, 0, Amount::ZERO, None)
        } else {
            let Some(prev) = self.blocks.get(&previous) else {
                return ProcessResult::GapPrevious;
            };
            let account = prev.sideband.account;
            if block.account_field().is_some_and(|a| a != account) {
                return ProcessResult::BlockPosition;
            }
            if !validate_block_signature(block, &account) {
                return ProcessResult::BadSignature;
            }
            let Some(info) = self.accounts.get(&account) else {
                return ProcessResult::GapPrevious;
            };
            if info.head != previous {
                return ProcessResult::Fork;
            }
            (
                account,
                prev.sideband.height,
                prev.sideband.balance,
                Some(info.representative),
            )
        };

        let representative = block
            .representative_field()
            .or(previous_rep)
            .unwrap_or(account);

        // Work out the balance change and the receivable it creates or consumes.
        let (balance, created, consumed) = match &**block {
            Block::Send(_) => {
                let balance = block.balance_field().unwrap_or(Amount::ZERO);
                if balance > previous_balance {
                    return ProcessResult::NegativeSpend;
                }
                let destination = block.destination_field().unwrap_or(Account::ZERO);
                (balance, Some((destination, previous_balance - balance)), None)
            }
            Block::Receive(_) | Block::Open(_) => {
                let source = block.source_field().unwrap_or(BlockHash::ZERO);
                if !self.blocks.contains_key(&source) {
                    return ProcessResult::GapSource;
                }
                let key = PendingKey { account, send: source };
                let Some(pending) = self.pending.get(&key) else {
                    return ProcessResult::Unreceivable;
                };
                (previous_balance.saturating_add(pending.amount), None, Some(key))
            }
            Block::Change(_) => (previous_balance, None, None),
            Block::State(_) => {
                let balance = block.balance_field().unwrap_or(Amount::ZERO);
                let link = block.link_field().unwrap_or_default();
                if balance < previous_balance {
                    (balance, Some((link.as_account(), previous_balance - balance)), None)
                } else if balance > previous_balance {
                    let source = link.as_block_hash();
                    if !self.blocks.contains_key(&source) {
                        return ProcessResult::GapSource;
                    }
                    let key = PendingKey { account, send: source };
                    let Some(pending) = self.pending.get(&key) else {
                        return ProcessResult::Unreceivable;
                    };
                    if pending.amount != balance - previous_balance {
                        return ProcessResult::BalanceMismatch;
                    }
                    (balance, None, Some(key))
                } else if opening {
                    return ProcessResult::Unreceivable;
                } else if !link.is_zero() {
                    return ProcessResult::BalanceMismatch;
                } else {
                    (balance, None, None)
                }
            }
        };

        if let Some((destination, amount)) = created {
            self.pending.insert(
                PendingKey {
                    account: destination,
                    send: hash,
                },
                PendingInfo {
                    source: account,
                    amount,
                },
            );
        }
        if let Some(key) = consumed {
            self.pending.remove(&key);
            self.receivers.insert(key.send, hash);
        }

        if let Some(old_rep) = previous_rep {
            self.rep_weights.sub(&old_rep, previous_balance);
        }
        self.rep_weights.add(&representative, balance);

        if let Some(prev) = self.blocks.get_mut(&previous) {
            prev.sideband.successor = hash;
        }
        self.blocks.insert(
            hash,
            SavedBlock {
                block: Arc::clone(block),
                sideband: BlockSideband {
                    height: previous_height + 1,
                    account,
                    balance,
                    successor: BlockHash::ZERO,
                },
            },
        );
        let info = self.accounts.entry(account).or_insert_with(|| AccountInfo {
            head: hash,
            representative,
            open_block: hash,
            balance,
            block_count: 0,
        });
        info.head = hash;
        info.representative = representative;
        info.balance = balance;
        info.block_count += 1;

        ProcessResult::Progress
    }

    fn rollback(
        &mut self,
        hash: &BlockHash,
        removed: &mut Vec<Arc<Block>>,
    ) -> Result<(), LedgerError> {
        let saved = self
            .blocks
            .get(hash)
            .ok_or(LedgerError::BlockNotFound(*hash))?;
        if self.block_confirmed(hash) {
            return Err(LedgerError::RollbackCemented(*hash));
        }
        let account = saved.sideband.account;
        let target_height = saved.sideband.height;

        while self.blocks.contains_key(hash) {
            let head = self
                .accounts
                .get(&account)
                .map(|i| i.head)
                .ok_or(LedgerError::AccountNotFound(account))?;
            let head_height = self
                .blocks
                .get(&head)
                .map(|s| s.sideband.height)
                .ok_or(LedgerError::BlockNotFound(head))?;
            debug_assert!(head_height >= target_height);
            self.roll_back_head(account, removed)?;
        }
        Ok(())
    }

    fn roll_back_head(
        &mut self,
        account: Account,
        removed: &mut Vec<Arc<Block>>,
    ) -> Result<(), LedgerError> {
        let info = self
            .accounts
            .get(&account)
            .cloned()
            .ok_or(LedgerError::AccountNotFound(account))?;
        let head = info.head;
        let saved = self
            .blocks
            .get(&head)
            .cloned()
            .ok_or(LedgerError::BlockNotFound(head))?;
        if self.block_confirmed(&head) {
            return Err(LedgerError::RollbackCemented(head));
        }

        let block = &saved.block;
        let previous = block.previous();
        let balance = saved.sideband.balance;
        let previous_balance = self.previous_balance(block).unwrap_or(Amount::ZERO);
        let previous_rep = if previous.is_zero() {
            None
        } else {
            self.representative_at(&previous)
        };

        if balance < previous_balance {
            // A send: undo the receive on the other side first.
            let destination = match &**block {
                Block::Send(_) => block.destination_field().unwrap_or(Account::ZERO),
                _ => block.link_field().unwrap_or_default().as_account(),
            };
            let key = PendingKey {
                account: destination,
                send: head,
            };
            if !self.pending.contains_key(&key) {
                if let Some(receiver) = self.receivers.get(&head).copied() {
                    self.rollback(&receiver, removed)?;
                }
            }
            self.pending.remove(&key);
        } else if let Some(source) = self.receive_source(block) {
            let source_account = self
                .blocks
                .get(&source)
                .map(|s| s.sideband.account)
                .unwrap_or(Account::ZERO);
            self.pending.insert(
                PendingKey {
                    account,
                    send: source,
                },
                PendingInfo {
                    source: source_account,
                    amount: balance - previous_balance,
                },
            );
            self.receivers.remove(&source);
        }

        self.rep_weights.sub(&info.representative, balance);
        if let Some(rep) = previous_rep {
            self.rep_weights.add(&rep, previous_balance);
        }

        self.blocks.remove(&head);
        if previous.is_zero() {
            self.accounts.remove(&account);
        } else {
            if let Some(prev) = self.blocks.get_mut(&previous) {
                prev.sideband.successor = BlockHash::ZERO;
            }
            if let Some(info) = self.accounts.get_mut(&account) {
                info.head = previous;
                info.balance = previous_balance;
                info.representative = previous_rep.unwrap_or(info.representative);
                info.block_count -= 1;
            }
        }
        removed.push(saved.block);
        Ok(())
    }
}
