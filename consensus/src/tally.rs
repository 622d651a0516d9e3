//! Weight tally over an election's latest votes.

use orv_types::{Account, Amount, Block, BlockHash};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::election::ElectionData;

/// Candidate blocks with the weight behind them, heaviest first.
pub type Tally = Vec<(Amount, Arc<Block>)>;

/// Sum the voting weight behind each block in the election and rank them.
///
/// Only blocks the election still holds are ranked. Ties go to the current
/// winner, then to the lower hash, so the order is stable between calls.
/// Updates `last_tally` and the final-vote weight behind the leader.
pub fn tally(data: &mut ElectionData, weight: impl Fn(&Account) -> Amount) -> Tally {
    let mut block_weights: HashMap<BlockHash, Amount> = HashMap::new();
    let mut final_weights: HashMap<BlockHash, Amount> = HashMap::new();

    for (account, info) in &data.last_votes {
        let rep_weight = weight(account);
        let entry = block_weights.entry(info.hash).or_default();
        *entry = entry.saturating_add(rep_weight);
        if info.is_final() {
            let entry = final_weights.entry(info.hash).or_default();
            *entry = entry.saturating_add(rep_weight);
        }
    }

    let winner = data.winner_hash();
    let mut result: Tally = block_weights
        .iter()
        .filter_map(|(hash, amount)| {
            data.last_blocks
                .get(hash)
                .map(|block| (*amount, Arc::clone(block)))
        })
        .collect();
    result.sort_by(|(a_weight, a), (b_weight, b)| {
        b_weight.cmp(a_weight).then_with(|| {
            let (a, b) = (a.hash(), b.hash());
            match (a == winner, b == winner) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => a.cmp(&b),
            }
        })
    });

    data.final_weight = result
        .first()
        .and_then(|(_, block)| final_weights.get(&block.hash()).copied())
        .unwrap_or_default();
    data.last_tally = block_weights;
    result
}

/// Whether the leader is ahead of the runner-up by at least `delta`.
pub fn have_quorum(tally: &Tally, delta: Amount) -> bool {
    let first = tally.first().map(|(w, _)| *w).unwrap_or_default();
    let second = tally.get(1).map(|(w, _)| *w).unwrap_or_default();
    debug_assert!(first >= second);
    first.saturating_sub(second) >= delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::{Election, ElectionBehavior, VoteInfo};
    use orv_messages::Vote;
    use orv_types::Link;
    use proptest::prelude::*;
    use std::time::{Duration, Instant};

    fn make_hash(byte: u8) -> BlockHash {
        BlockHash::new([byte; 32])
    }

    fn fork(balance: u128) -> Arc<Block> {
        Arc::new(Block::new_state(
            Account::from(1),
            make_hash(1),
            Account::from(1),
            Amount::raw(balance),
            Link::ZERO,
        ))
    }

    fn election_with_forks(forks: &[Arc<Block>]) -> Election {
        let election = Election::new(
            1,
            Arc::clone(&forks[0]),
            ElectionBehavior::Normal,
            None,
            None,
            Instant::now(),
            Duration::from_millis(25),
        );
        {
            let mut data = election.lock();
            for block in &forks[1..] {
                data.last_blocks.insert(block.hash(), Arc::clone(block));
            }
        }
        election
    }

    fn cast(data: &mut ElectionData, rep: u64, hash: BlockHash, timestamp: u64) {
        data.last_votes.insert(
            Account::from(rep),
            VoteInfo {
                time: Instant::now(),
                timestamp,
                hash,
            },
        );
    }

    fn weight_of(account: &Account) -> Amount {
        match *account {
            a if a == Account::from(1) => Amount::raw(60),
            a if a == Account::from(2) => Amount::raw(30),
            a if a == Account::from(3) => Amount::raw(10),
            _ => Amount::ZERO,
        }
    }

    #[test]
    fn ranks_heaviest_first() {
        let (a, b) = (fork(1), fork(2));
        let election = election_with_forks(&[Arc::clone(&a), Arc::clone(&b)]);
        let mut data = election.lock();
        cast(&mut data, 1, b.hash(), 1);
        cast(&mut data, 2, a.hash(), 1);
        cast(&mut data, 3, a.hash(), 1);

        let result = tally(&mut data, weight_of);
        assert_eq!(result[0], (Amount::raw(60), Arc::clone(&b)));
        assert_eq!(result[1], (Amount::raw(40), Arc::clone(&a)));
        assert_eq!(data.last_tally[&b.hash()], Amount::raw(60));
    }

    #[test]
    fn tie_goes_to_current_winner() {
        let (mut a, mut b) = (fork(1), fork(2));
        if a.hash() < b.hash() {
            std::mem::swap(&mut a, &mut b);
        }
        // `a` is the initial winner despite the higher hash.
        let election = election_with_forks(&[Arc::clone(&a), Arc::clone(&b)]);
        let mut data = election.lock();
        cast(&mut data, 4, b.hash(), 1);

        let result = tally(&mut data, weight_of);
        assert_eq!(result[0].1.hash(), a.hash());
        assert_eq!(result[1].1.hash(), b.hash());
    }

    #[test]
    fn votes_for_unknown_blocks_are_not_ranked() {
        let a = fork(1);
        let election = election_with_forks(&[Arc::clone(&a)]);
        let mut data = election.lock();
        cast(&mut data, 1, make_hash(9), 1);
        let result = tally(&mut data, weight_of);
        assert_eq!(result.len(), 1);
        assert_eq!(data.last_tally[&make_hash(9)], Amount::raw(60));
    }

    #[test]
    fn final_weight_follows_leader() {
        let (a, b) = (fork(1), fork(2));
        let election = election_with_forks(&[Arc::clone(&a), Arc::clone(&b)]);
        let mut data = election.lock();
        cast(&mut data, 1, a.hash(), Vote::TIMESTAMP_MAX);
        cast(&mut data, 3, a.hash(), 5);
        cast(&mut data, 2, b.hash(), Vote::TIMESTAMP_MAX);
        tally(&mut data, weight_of);
        assert_eq!(data.final_weight, Amount::raw(60));
    }

    #[test]
    fn quorum_needs_margin_over_runner_up() {
        let (a, b) = (fork(1), fork(2));
        let tally = vec![(Amount::raw(70), a), (Amount::raw(20), b)];
        assert!(have_quorum(&tally, Amount::raw(50)));
        assert!(!have_quorum(&tally, Amount::raw(51)));
        assert!(have_quorum(&Vec::new(), Amount::ZERO));
    }

    proptest! {
        #[test]
        fn tally_is_sorted_descending(votes in proptest::collection::vec((1u64..6, 0usize..3), 0..20)) {
            let forks = [fork(1), fork(2), fork(3)];
            let election = election_with_forks(&forks);
            let mut data = election.lock();
            for (rep, choice) in votes {
                cast(&mut data, rep, forks[choice].hash(), 1);
            }
            let result = tally(&mut data, weight_of);
            prop_assert!(result.windows(2).all(|w| w[0].0 >= w[1].0));
            let total: Amount = result.iter().map(|(w, _)| *w).sum();
            prop_assert!(total <= Amount::raw(100));
        }
    }
}
