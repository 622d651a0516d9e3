//! Confirmation solicitation: ask representatives to vote on elections that
//! are still missing their votes, and push the current winner to them.
//!
//! One solicitor is prepared per request-loop pass. Elections are added while
//! the pass walks the container; requests are grouped per channel and sent in
//! `ConfirmReq` batches on [`ConfirmationSolicitor::flush`].

use orv_messages::{ChannelId, ConfirmReq, Message, Network, PeerRepresentative};
use orv_types::{BlockHash, NetworkParams, Root};
use std::collections::BTreeMap;
use tracing::trace;

use crate::election::{Election, ElectionData};

/// ConfirmReq batches a single channel may receive per pass.
const CONFIRM_REQ_BATCHES_MAX: usize = 20;

pub struct ConfirmationSolicitor<'a> {
    network: &'a dyn Network,
    max_block_broadcasts: usize,
    max_election_requests: usize,
    max_election_broadcasts: usize,
    confirm_req_hashes_max: usize,
    representatives_requests: Vec<PeerRepresentative>,
    representatives_broadcasts: Vec<PeerRepresentative>,
    requests: BTreeMap<ChannelId, Vec<(BlockHash, Root)>>,
    rebroadcasted: usize,
    prepared: bool,
}

impl<'a> ConfirmationSolicitor<'a> {
    pub fn new(network: &'a dyn Network, params: &NetworkParams) -> Self {
        Self {
            network,
            max_block_broadcasts: params.max_block_broadcasts,
            max_election_requests: params.max_election_requests,
            max_election_broadcasts: (network.fanout(1.0) / 2).max(1),
            confirm_req_hashes_max: params.confirm_req_hashes_max,
            representatives_requests: Vec::new(),
            representatives_broadcasts: Vec::new(),
            requests: BTreeMap::new(),
            rebroadcasted: 0,
            prepared: false,
        }
    }

    /// Start a pass with the principal representatives currently reachable.
    pub fn prepare(&mut self, representatives: Vec<PeerRepresentative>) {
        debug_assert!(!self.prepared);
        self.requests.clear();
        self.rebroadcasted = 0;
        self.representatives_broadcasts = representatives.clone();
        self.representatives_requests = representatives;
        self.prepared = true;
    }

    /// Send the election's winner to representatives that have not voted for
    /// it, then flood it. Returns false once the per-pass budget is spent.
    pub fn broadcast(&mut self, data: &ElectionData) -> bool {
        debug_assert!(self.prepared);
        if self.rebroadcasted >= self.max_block_broadcasts {
            return false;
        }
        self.rebroadcasted += 1;

        let winner = &data.status.winner;
        let hash = winner.hash();
        let message = Message::Publish(winner.clone());
        let mut count = 0;
        for rep in &self.representatives_broadcasts {
            if count >= self.max_election_broadcasts {
                break;
            }
            let voted_for_winner = data
                .last_votes
                .get(&rep.account)
                .is_some_and(|vote| vote.hash == hash);
            if !voted_for_winner {
                self.network.send(rep.channel, &message);
                count += 1;
            }
        }
        self.network.flood(&message, 0.5);
        trace!(%hash, directed = count, "winner broadcast");
        true
    }

    /// Queue confirmation requests for representatives whose vote on the
    /// winner is missing, not final, or for another block. Returns whether
    /// anything was queued.
    pub fn add(&mut self, election: &Election, data: &ElectionData) -> bool {
        debug_assert!(self.prepared);
        let max_channel_requests = CONFIRM_REQ_BATCHES_MAX * self.confirm_req_hashes_max;
        let winner = &data.status.winner;
        let hash = winner.hash();
        let mut count = 0;
        let mut full = Vec::new();

        for rep in &self.representatives_requests {
            if count >= self.max_election_requests {
                break;
            }
            let existing = data.last_votes.get(&rep.account);
            let exists = existing.is_some();
            let is_final =
                existing.is_some_and(|vote| !election.is_quorum() || vote.is_final());
            let different = existing.is_some_and(|vote| vote.hash != hash);
            if exists && is_final && !different {
                continue;
            }
            if self.network.channel_full(rep.channel) {
                full.push(rep.channel);
                continue;
            }
            let queue = self.requests.entry(rep.channel).or_default();
            if queue.len() < max_channel_requests {
                queue.push((hash, winner.root()));
                if !different {
                    count += 1;
                }
            }
        }
        if !full.is_empty() {
            self.representatives_requests
                .retain(|rep| !full.contains(&rep.channel));
        }
        count > 0
    }

    /// Send the queued requests and end the pass.
    pub fn flush(&mut self) {
        debug_assert!(self.prepared);
        for (channel, queue) in std::mem::take(&mut self.requests) {
            for chunk in queue.chunks(self.confirm_req_hashes_max.max(1)) {
                let message = Message::ConfirmReq(ConfirmReq::new(chunk.to_vec()));
                self.network.send(channel, &message);
            }
        }
        self.prepared = false;
    }
}
