//! Quorum detection, confirmation and the hand-off to cementing.

use orv_types::{milliseconds_since_epoch, Amount, Block, BlockHash};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::ActiveElections;
use crate::election::{Election, ElectionData, ElectionState, ElectionStatus, ElectionStatusType};
use crate::stats::{DetailType, StatType};
use crate::tally::{have_quorum, tally};

/// Retries of a confirmed winner that has not reached the ledger yet.
const PROCESS_CONFIRMED_MAX_ATTEMPTS: u32 = 50;

impl ActiveElections {
    /// Tally the election and confirm it if the leader has quorum. Switches
    /// the winner first when enough weight backs another fork.
    ///
    /// Runs with the election lock held. Returns the status to publish once
    /// the lock is released.
    pub(super) fn confirm_if_quorum(
        &self,
        election: &Arc<Election>,
        data: &mut ElectionData,
    ) -> Option<ElectionStatus> {
        let ranking = tally(data, |account| self.ledger.weight(account));
        let (top_weight, top_block) = ranking.first().cloned()?;
        data.status.tally = top_weight;
        data.status.final_tally = data.final_weight;

        let sum: Amount = ranking.iter().map(|(weight, _)| *weight).sum();
        let delta = self.online_reps.delta();
        let old_winner = data.winner_hash();
        if sum >= delta && top_block.hash() != old_winner {
            info!(
                root = ?election.qualified_root,
                from = %old_winner,
                to = %top_block.hash(),
                "fork switch"
            );
            data.status.winner = Arc::clone(&top_block);
            self.remove_local_votes(election, &mut data.last_votes, &old_winner);
            self.notify_force_process(&top_block);
            self.stats.inc(StatType::Election, DetailType::ForkSwitch);
        }

        if have_quorum(&ranking, delta) {
            let canary = self.ledger.final_votes_canary();
            if canary
                && !election.set_quorum()
                && self.enable_voting
                && !self.wallets.voting_reps().is_empty()
            {
                self.final_generator
                    .add(election.root, data.winner_hash());
            }
            if !canary || data.final_weight >= delta {
                return self.confirm_once(election, data, ElectionStatusType::ActiveConfirmedQuorum);
            }
        }
        None
    }

    /// Move the election to confirmed exactly once. Returns the final status
    /// when this call made the transition.
    pub(super) fn confirm_once(
        &self,
        election: &Arc<Election>,
        data: &mut ElectionData,
        status_type: ElectionStatusType,
    ) -> Option<ElectionStatus> {
        let winner = data.winner_hash();
        if !data.state.can_transition_to(ElectionState::Confirmed) {
            self.stats.inc(StatType::Election, DetailType::ConfirmOnceFailed);
            return None;
        }
        {
            let mut winners = self.election_winner_details.lock().unwrap();
            if winners.contains_key(&winner) {
                self.stats.inc(StatType::Election, DetailType::ConfirmOnceFailed);
                return None;
            }
            winners.insert(winner, Arc::clone(election));
        }

        let now = self.clock.now();
        let from = data.state;
        if election
            .state_change(data, from, ElectionState::Confirmed, now)
            .is_err()
        {
            self.election_winner_details.lock().unwrap().remove(&winner);
            return None;
        }

        data.status.election_end = milliseconds_since_epoch();
        data.status.election_duration = now.saturating_duration_since(election.election_start);
        data.status.confirmation_request_count = election.confirmation_request_count();
        data.status.block_count = data.last_blocks.len() as u32;
        data.status.voter_count = data.last_votes.len() as u32;
        data.status.status_type = status_type;
        self.stats.inc(StatType::Election, DetailType::ConfirmOnce);
        Some(data.status.clone())
    }

    /// Publish a confirmation after the election lock is released.
    pub(super) fn on_confirmed(&self, election: &Arc<Election>, status: ElectionStatus) {
        let hash = status.winner.hash();
        self.recently_confirmed
            .put(election.qualified_root, hash);
        self.stats.inc(StatType::ActiveConfirmed, election.behavior.into());
        let detail = match status.status_type {
            ElectionStatusType::ActiveConfirmationHeight => DetailType::ConfirmedHeight,
            _ => DetailType::ConfirmedQuorum,
        };
        self.stats.inc(StatType::Election, detail);
        info!(
            %hash,
            tally = %status.tally,
            voters = status.voter_count,
            blocks = status.block_count,
            duration_ms = status.election_duration.as_millis() as u64,
            kind = status.status_type.as_str(),
            "election confirmed"
        );

        self.process_confirmed(status.clone(), 0);

        for observer in self.observers.election_confirmed.lock().unwrap().iter() {
            observer(&status);
        }
        if let Some(action) = election.confirmation_action() {
            action(&status.winner);
        }
    }

    /// Hand the winner to the confirmation height processor, or retry later
    /// if it has not been written to the ledger yet.
    fn process_confirmed(&self, status: ElectionStatus, attempts: u32) {
        let hash = status.winner.hash();
        if let Some(block) = self.ledger.block(&hash) {
            self.confirmation_height.add(block);
        } else if attempts < PROCESS_CONFIRMED_MAX_ATTEMPTS {
            self.stats.inc(StatType::Election, DetailType::ProcessConfirmedRetry);
            self.pending_confirmed
                .lock()
                .unwrap()
                .push((status, attempts + 1));
        } else {
            warn!(%hash, attempts, "confirmed winner never reached the ledger");
            self.stats.inc(StatType::Election, DetailType::ProcessConfirmedGiveUp);
            self.remove_election_winner_details(&hash);
        }
    }

    pub(super) fn retry_pending_confirmed(&self) {
        let pending = std::mem::take(&mut *self.pending_confirmed.lock().unwrap());
        for (status, attempts) in pending {
            self.process_confirmed(status, attempts);
        }
    }

    /// Cementing finished for `block`.
    pub fn block_cemented_callback(&self, block: &Arc<Block>) {
        let hash = block.hash();
        // A cemented root can no longer fork.
        self.final_generator.remove_final_vote(&block.qualified_root());
        let status_type = if self.confirmation_height.is_processing_block(&hash) {
            Some(ElectionStatusType::ActiveConfirmedQuorum)
        } else {
            self.confirm_block(block)
        };

        match status_type {
            None => {}
            Some(ElectionStatusType::InactiveConfirmationHeight) => {
                self.stats.inc(StatType::Election, DetailType::ConfirmedInactive);
                let status = ElectionStatus::inactive(Arc::clone(block));
                self.notify_block_cemented(&status);
            }
            Some(_) => {
                let Some(election) = self.remove_election_winner_details(&hash) else {
                    return;
                };
                let status = {
                    let data = election.lock();
                    (data.state.is_confirmed() && data.winner_hash() == hash)
                        .then(|| data.status.clone())
                };
                if let Some(status) = status {
                    {
                        let mut cemented = self.recently_cemented.lock().unwrap();
                        cemented.push_back(status.clone());
                        while cemented.len() > self.config.confirmation_history_size {
                            cemented.pop_front();
                        }
                    }
                    debug!(%hash, "confirmed winner cemented");
                    self.notify_block_cemented(&status);
                    self.erase(&election.qualified_root);
                }
            }
        }
    }

    /// The block was already cemented when the processor reached it.
    pub fn block_already_cemented_callback(&self, hash: BlockHash) {
        self.remove_election_winner_details(&hash);
    }

    fn notify_block_cemented(&self, status: &ElectionStatus) {
        for observer in self.observers.block_cemented.lock().unwrap().iter() {
            observer(status);
        }
    }

    /// A block was cemented as a dependency of some other winner. Confirm
    /// its election if it is that election's winner.
    fn confirm_block(&self, block: &Arc<Block>) -> Option<ElectionStatusType> {
        let hash = block.hash();
        let election = self.state.lock().unwrap().blocks.get(&hash).cloned();
        match election {
            None => Some(ElectionStatusType::InactiveConfirmationHeight),
            Some(election) => self.try_confirm(&election, &hash),
        }
    }

    pub(super) fn try_confirm(&self, election: &Arc<Election>, hash: &BlockHash) -> Option<ElectionStatusType> {
        let confirmed = {
            let mut data = election.lock();
            if data.winner_hash() != *hash {
                return None;
            }
            if data.state.is_confirmed() {
                return Some(ElectionStatusType::ActiveConfirmedQuorum);
            }
            self.confirm_once(election, &mut data, ElectionStatusType::ActiveConfirmationHeight)
        };
        if let Some(status) = confirmed {
            self.on_confirmed(election, status);
        }
        Some(ElectionStatusType::ActiveConfirmationHeight)
    }
}
