//! Dependency-ordered walk of the uncemented blocks below a confirmed block.
//!
//! Cementing a block cements its whole account chain down to the current
//! confirmation height. Any receive in that range depends on its send, so the
//! sending chain is cemented first. The walk keeps an explicit stack instead
//! of recursing so long receive chains cannot overflow the thread stack.

use orv_types::{Account, Block, BlockHash};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::LedgerError;
use crate::ledger::Ledger;

/// One account chain segment to cement, lowest block first.
#[derive(Debug)]
pub(crate) struct CementStep {
    pub account: Account,
    pub blocks: Vec<Arc<Block>>,
}

impl CementStep {
    pub fn top(&self) -> Option<BlockHash> {
        self.blocks.last().map(|b| b.hash())
    }
}

/// Steps that cement `target` and everything it depends on, dependencies
/// first. Empty when `target` is already cemented.
pub(crate) fn collect_cement_steps(
    ledger: &Ledger,
    target: &BlockHash,
) -> Result<Vec<CementStep>, LedgerError> {
    let mut steps = Vec::new();
    // Height each account will reach once the steps so far are written.
    let mut planned: HashMap<Account, u64> = HashMap::new();
    let mut stack = vec![*target];

    while let Some(&top) = stack.last() {
        let saved = ledger
            .saved_block(&top)
            .ok_or(LedgerError::BlockNotFound(top))?;
        let account = saved.sideband.account;
        let cemented = planned
            .get(&account)
            .copied()
            .unwrap_or_else(|| ledger.confirmation_height(&account).height);
        if saved.sideband.height <= cemented {
            stack.pop();
            continue;
        }

        let segment = ledger.chain_segment(&account, &top, cemented)?;
        let unmet_source = segment.iter().find_map(|block| {
            let source = ledger.receive_source(block)?;
            let source_block = ledger.saved_block(&source)?;
            let source_account = source_block.sideband.account;
            let source_cemented = planned
                .get(&source_account)
                .copied()
                .unwrap_or_else(|| ledger.confirmation_height(&source_account).height);
            (source_block.sideband.height > source_cemented).then_some(source)
        });

        match unmet_source {
            Some(source) => stack.push(source),
            None => {
                planned.insert(account, saved.sideband.height);
                steps.push(CementStep {
                    account,
                    blocks: segment,
                });
                stack.pop();
            }
        }
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{dev_genesis_key, LedgerConstants};
    use crate::ledger::ProcessResult;
    use orv_crypto::{keypair_from_seed, sign_block};
    use orv_types::{Amount, KeyPair, Link};

    fn signed(mut block: Block, key: &KeyPair) -> Arc<Block> {
        sign_block(&mut block, &key.private);
        Arc::new(block)
    }

    #[test]
    fn cemented_target_needs_no_steps() {
        let ledger = Ledger::new(LedgerConstants::dev());
        let genesis = ledger.constants().genesis_hash();
        assert!(collect_cement_steps(&ledger, &genesis).unwrap().is_empty());
    }

    #[test]
    fn receive_cements_sender_first() {
        let ledger = Ledger::new(LedgerConstants::dev());
        let genesis = dev_genesis_key();
        let dest = keypair_from_seed(&[7; 32]);

        let send1 = signed(
            Block::new_state(genesis.account(), ledger.constants().genesis_hash(), genesis.account(), Amount::MAX - Amount::raw(10), Link::from(dest.account())),
            &genesis,
        );
        let send2 = signed(
            Block::new_state(genesis.account(), send1.hash(), genesis.account(), Amount::MAX - Amount::raw(20), Link::from(dest.account())),
            &genesis,
        );
        let open = signed(
            Block::new_state(dest.account(), BlockHash::ZERO, dest.account(), Amount::raw(10), Link::from(send1.hash())),
            &dest,
        );
        let receive = signed(
            Block::new_state(dest.account(), open.hash(), dest.account(), Amount::raw(20), Link::from(send2.hash())),
            &dest,
        );
        for block in [&send1, &send2, &open, &receive] {
            assert_eq!(ledger.process(block), ProcessResult::Progress);
        }

        let steps = collect_cement_steps(&ledger, &receive.hash()).unwrap();
        let tops: Vec<_> = steps.iter().map(|s| (s.account, s.top())).collect();
        assert_eq!(
            tops,
            vec![
                (genesis.account(), Some(send1.hash())),
                (genesis.account(), Some(send2.hash())),
                (dest.account(), Some(receive.hash())),
            ]
        );
        assert_eq!(steps[1].blocks.len(), 1);
        assert_eq!(steps[2].blocks.len(), 2);
    }

    #[test]
    fn missing_block_is_error() {
        let ledger = Ledger::new(LedgerConstants::dev());
        assert_eq!(
            collect_cement_steps(&ledger, &BlockHash::from(9)).unwrap_err(),
            LedgerError::BlockNotFound(BlockHash::from(9))
        );
    }
}
