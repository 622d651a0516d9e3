//! The request loop: a periodic pass over every election that advances its
//! state, rebroadcasts winners, asks representatives for votes and drops
//! elections that are done.

use orv_messages::PeerRepresentative;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use super::ActiveElections;
use crate::confirmation_solicitor::ConfirmationSolicitor;
use crate::election::{
    Election, ElectionBehavior, ElectionData, ElectionState, ElectionStatusType,
    BLOCK_BROADCAST_FACTOR, CONFIRMED_DURATION_FACTOR, PASSIVE_DURATION_FACTOR,
};
use crate::error::ConsensusError;
use crate::stats::{DetailType, StatType};
use crate::tally::{have_quorum, tally};

impl ActiveElections {
    /// Start the request loop and both vote generators.
    pub fn start(self: &Arc<Self>) -> Result<(), ConsensusError> {
        self.generator.start()?;
        self.final_generator.start()?;
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("Request loop".into())
            .spawn(move || this.request_loop())
            .map_err(|e| ConsensusError::ThreadSpawn(e.to_string()))?;
        *self.thread.lock().unwrap() = Some(handle);
        info!(size = self.config.size, "active elections started");
        Ok(())
    }

    /// Stop the loop and drop every remaining election.
    pub fn stop(&self) {
        self.state.lock().unwrap().stopped = true;
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("request loop thread panicked");
            }
        }
        self.generator.stop();
        self.final_generator.stop();
        self.clear();
        info!("active elections stopped");
    }

    /// Remove all elections.
    pub fn clear(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.roots.clear();
            state.order.clear();
            state.blocks.clear();
            state.count_by_behavior.clear();
        }
        self.vote_cache.lock().unwrap().clear();
        self.notify_vacancy_update();
    }

    fn request_loop(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.stopped {
            let stamp = Instant::now();
            drop(state);
            self.stats.inc(StatType::ActiveElections, DetailType::Loop);
            self.request_confirm();

            state = self.state.lock().unwrap();
            if !state.stopped {
                let interval = self.params.request_interval;
                let wakeup = (stamp + interval).max(Instant::now() + interval / 2);
                let timeout = wakeup.saturating_duration_since(Instant::now());
                state = self
                    .condition
                    .wait_timeout_while(state, timeout, |s| !s.stopped)
                    .unwrap()
                    .0;
            }
        }
    }

    /// One pass over all elections.
    pub fn request_confirm(&self) {
        let elections = self.list_active(usize::MAX);
        let minimum = self.online_reps.minimum_principal_weight();
        let representatives: Vec<PeerRepresentative> = self
            .network
            .representatives()
            .into_iter()
            .filter(|rep| {
                let weight = self.ledger.weight(&rep.account);
                !weight.is_zero() && weight >= minimum
            })
            .collect();

        let mut solicitor = ConfirmationSolicitor::new(self.network.as_ref(), &self.params);
        solicitor.prepare(representatives);
        for election in &elections {
            if self.transition_time(election, &mut solicitor) {
                self.erase(&election.qualified_root);
            }
        }
        solicitor.flush();

        self.retry_pending_confirmed();
        self.trim();
        self.vote_cache.lock().unwrap().cleanup();
        if self.should_do_frontiers_confirmation() {
            self.frontiers_confirmation();
        }
    }

    /// Advance one election. Returns true when it should be erased.
    fn transition_time(&self, election: &Arc<Election>, solicitor: &mut ConfirmationSolicitor<'_>) -> bool {
        let now = self.clock.now();
        let base_latency = election.base_latency();
        let mut guard = election.lock();
        let data = &mut *guard;
        let mut erase = false;

        match data.state {
            ElectionState::Passive => {
                if now.saturating_duration_since(data.state_start) > base_latency * PASSIVE_DURATION_FACTOR {
                    if let Err(error) =
                        election.state_change(data, ElectionState::Passive, ElectionState::Active, now)
                    {
                        trace!(%error, root = ?election.qualified_root, "passive election not activated");
                    }
                }
            }
            ElectionState::Active => {
                self.broadcast_vote(election, data, now);
                self.broadcast_block(data, solicitor, now);
                self.send_confirm_req(election, data, solicitor, now);
            }
            ElectionState::Confirmed => {
                if now.saturating_duration_since(data.state_start) > base_latency * CONFIRMED_DURATION_FACTOR {
                    erase = true;
                    self.broadcast_block(data, solicitor, now);
                    if let Err(error) = election.state_change(
                        data,
                        ElectionState::Confirmed,
                        ElectionState::ExpiredConfirmed,
                        now,
                    ) {
                        trace!(%error, root = ?election.qualified_root, "confirmed election not expired");
                    }
                }
            }
            ElectionState::ExpiredConfirmed | ElectionState::ExpiredUnconfirmed => erase = true,
        }

        if !data.state.is_confirmed()
            && !data.state.is_expired()
            && now.saturating_duration_since(election.election_start) > election.time_to_live()
        {
            let from = data.state;
            if election
                .state_change(data, from, ElectionState::ExpiredUnconfirmed, now)
                .is_ok()
            {
                erase = true;
                data.status.status_type = ElectionStatusType::Stopped;
                debug!(
                    root = ?election.qualified_root,
                    behavior = election.behavior.as_str(),
                    "election expired"
                );
            }
        }
        erase
    }

    fn broadcast_vote(&self, election: &Election, data: &mut ElectionData, now: Instant) {
        let due = data.last_vote.map_or(true, |last| {
            now.saturating_duration_since(last) >= self.params.vote_broadcast_interval
        });
        if !due {
            return;
        }
        if self.enable_voting && !self.wallets.voting_reps().is_empty() {
            self.stats.inc(StatType::Election, DetailType::GenerateVote);
            let winner = data.winner_hash();
            let ranking = tally(data, |account| self.ledger.weight(account));
            if data.state.is_confirmed() || have_quorum(&ranking, self.online_reps.delta()) {
                self.stats.inc(StatType::Election, DetailType::GenerateVoteFinal);
                self.final_generator.add(election.root, winner);
            } else {
                self.stats.inc(StatType::Election, DetailType::GenerateVoteNormal);
                self.generator.add(election.root, winner);
            }
        }
        data.last_vote = Some(now);
    }

    fn broadcast_block(&self, data: &mut ElectionData, solicitor: &mut ConfirmationSolicitor<'_>, now: Instant) {
        let interval = self.params.base_latency * BLOCK_BROADCAST_FACTOR;
        let due = data
            .last_block
            .map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if due && solicitor.broadcast(data) {
            self.stats.inc(StatType::ConfirmationSolicitor, DetailType::Broadcast);
            data.last_block = Some(now);
        }
    }

    fn send_confirm_req(
        &self,
        election: &Election,
        data: &mut ElectionData,
        solicitor: &mut ConfirmationSolicitor<'_>,
        now: Instant,
    ) {
        let due = data.last_req.map_or(true, |last| {
            now.saturating_duration_since(last) >= election.confirm_req_time()
        });
        if due && solicitor.add(election, data) {
            self.stats.inc(StatType::ConfirmationSolicitor, DetailType::Request);
            data.last_req = Some(now);
            election.inc_confirmation_request_count();
        }
    }

    /// Erase elections until the container is back within its size,
    /// optimistic ones first, oldest first.
    pub fn trim(&self) {
        loop {
            let victim = {
                let state = self.state.lock().unwrap();
                if self.vacancy_locked(&state) >= 0 {
                    break;
                }
                let victim = state
                    .ordered()
                    .find(|e| e.behavior == ElectionBehavior::Optimistic)
                    .or_else(|| state.ordered().next())
                    .cloned();
                victim
            };
            let Some(victim) = victim else {
                break;
            };
            self.stats.inc(StatType::ActiveElections, DetailType::Trim);
            self.erase(&victim.qualified_root);
        }
    }
}
