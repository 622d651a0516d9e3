//! Adding competing blocks to an existing election.

use orv_messages::Message;
use orv_types::{Amount, Block, BlockHash};
use std::sync::Arc;
use tracing::debug;

use super::ActiveElections;
use crate::election::{Election, ElectionData};
use crate::stats::{DetailType, StatType};

impl ActiveElections {
    /// Offer `block` to the election for its root. Returns true when the
    /// block was rejected: no election, already confirmed, already known, or
    /// the election is full and the block does not outweigh a candidate.
    pub fn publish(&self, block: &Arc<Block>) -> bool {
        let Some(election) = self.election(&block.qualified_root()) else {
            return true;
        };
        let rejected = self.publish_to_election(&election, block);
        if !rejected {
            let hash = block.hash();
            if !self.index_candidate(&election, hash) {
                debug!(%hash, root = ?election.qualified_root, "election erased while publishing");
                return true;
            }
            self.apply_cached_votes(&election, &hash);
            self.stats
                .inc(StatType::ActiveElections, DetailType::ElectionBlockConflict);
            debug!(%hash, root = ?election.qualified_root, "fork added to election");
        }
        rejected
    }

    /// Index `hash` as a candidate of `election`, unless the election was
    /// erased in the meantime. Returns whether the hash was indexed.
    pub(super) fn index_candidate(&self, election: &Arc<Election>, hash: BlockHash) -> bool {
        let mut state = self.state.lock().unwrap();
        let live = state
            .roots
            .get(&election.qualified_root)
            .is_some_and(|current| Arc::ptr_eq(current, election));
        if live {
            state.blocks.insert(hash, Arc::clone(election));
        }
        live
    }

    fn publish_to_election(&self, election: &Arc<Election>, block: &Arc<Block>) -> bool {
        let hash = block.hash();
        {
            let data = election.lock();
            if data.state.is_confirmed() || data.state.is_expired() {
                return true;
            }
            let full = data.last_blocks.len() >= self.params.election_max_blocks;
            if full && !data.last_blocks.contains_key(&hash) {
                drop(data);
                if !self.replace_by_weight(election, &hash) {
                    self.network.clear_publish_filter(block);
                    return true;
                }
            }
        }

        let mut guard = election.lock();
        let data = &mut *guard;
        if data.state.is_confirmed() {
            return true;
        }
        if let Some(existing) = data.last_blocks.get_mut(&hash) {
            *existing = Arc::clone(block);
            if data.status.winner.hash() == hash {
                data.status.winner = Arc::clone(block);
                self.network.flood(&Message::Publish(Arc::clone(block)), 1.0);
            }
            return true;
        }
        data.last_blocks.insert(hash, Arc::clone(block));
        false
    }

    /// Make room in a full election for `hash` if the vote cache shows more
    /// weight behind it than behind a current non-winning candidate.
    fn replace_by_weight(&self, election: &Arc<Election>, hash: &BlockHash) -> bool {
        let (mut sorted, winner, candidates) = {
            let data = election.lock();
            let sorted: Vec<(BlockHash, Amount)> =
                data.last_tally.iter().map(|(h, w)| (*h, *w)).collect();
            let candidates: Vec<BlockHash> = data.last_blocks.keys().copied().collect();
            (sorted, data.winner_hash(), candidates)
        };
        // Lightest first
        sorted.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let inactive_tally = self.vote_cache.lock().unwrap().tally(hash);
        if inactive_tally.is_zero() {
            return false;
        }

        let mut replaced = None;
        if sorted.len() < self.params.election_max_blocks {
            // A candidate nobody voted for goes first.
            replaced = candidates
                .iter()
                .find(|candidate| {
                    **candidate != winner && !sorted.iter().any(|(h, _)| h == *candidate)
                })
                .copied();
        }
        if replaced.is_none() {
            if let Some(&(lightest, weight)) = sorted.first() {
                if inactive_tally > weight {
                    if lightest != winner {
                        replaced = Some(lightest);
                    } else if let Some(&(second, second_weight)) = sorted.get(1) {
                        if inactive_tally > second_weight {
                            replaced = Some(second);
                        }
                    }
                }
            }
        }

        let Some(replaced) = replaced else {
            return false;
        };
        let removed = {
            let mut state = self.state.lock().unwrap();
            let mut data = election.lock();
            let removed = self.remove_block(election, &mut data, &replaced);
            if removed.is_some()
                && state
                    .blocks
                    .get(&replaced)
                    .is_some_and(|indexed| Arc::ptr_eq(indexed, election))
            {
                state.blocks.remove(&replaced);
            }
            removed
        };
        if let Some(block) = removed {
            self.network.clear_publish_filter(&block);
            self.notify_active_stopped(replaced);
        }
        self.stats
            .inc(StatType::ActiveElections, DetailType::ReplaceByWeight);
        debug!(%hash, %replaced, "candidate replaced by weight");
        true
    }

    fn remove_block(
        &self,
        election: &Election,
        data: &mut ElectionData,
        hash: &BlockHash,
    ) -> Option<Arc<Block>> {
        if data.winner_hash() == *hash {
            return None;
        }
        let block = data.last_blocks.remove(hash)?;
        data.last_votes.retain(|_, vote| vote.hash != *hash);
        data.last_tally.remove(hash);
        self.history.erase(&election.root);
        Some(block)
    }
}
