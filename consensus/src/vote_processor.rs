//! Vote processor: an admission-controlled queue of incoming votes, verified
//! in batches on a dedicated thread and routed into the active elections.
//!
//! Admission is tiered on queue occupancy so that a flood of votes from
//! light or unknown accounts can never crowd out principal representatives:
//!
//! | occupancy       | admitted                  |
//! |-----------------|---------------------------|
//! | below 6/9       | everyone                  |
//! | up to 7/9       | tier 1 (0.1%) and above   |
//! | up to 8/9       | tier 2 (1%) and above     |
//! | below capacity  | tier 3 (5%)               |
//! | at capacity     | nobody                    |

use orv_crypto::{verify_batch, VerifyItem};
use orv_messages::{ChannelId, Vote};
use orv_types::BlockHash;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::active_elections::ActiveElections;
use crate::config::VoteProcessorConfig;
use crate::election::{VoteCode, VoteSource};
use crate::error::ConsensusError;
use crate::rep_tiers::{RepTier, RepTiers};
use crate::stats::{DetailType, StatType, Stats};
use crate::uniquer::VoteUniquer;

/// Upper bound on a single flush wait.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(60);

pub type VoteProcessedCallback = Box<dyn Fn(&Arc<Vote>, ChannelId, VoteCode) + Send + Sync>;

#[derive(Default)]
struct ProcessorState {
    votes: VecDeque<(Arc<Vote>, ChannelId)>,
    /// Size of the batch being verified, zero when idle.
    in_flight: usize,
    total_processed: u64,
    stopped: bool,
}

struct ProcessorShared {
    config: VoteProcessorConfig,
    active: Arc<ActiveElections>,
    rep_tiers: Arc<RepTiers>,
    uniquer: VoteUniquer,
    stats: Arc<Stats>,
    state: Mutex<ProcessorState>,
    condition: Condvar,
    observers: Mutex<Vec<VoteProcessedCallback>>,
}

pub struct VoteProcessor {
    shared: Arc<ProcessorShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl VoteProcessor {
    pub fn new(
        config: VoteProcessorConfig,
        active: Arc<ActiveElections>,
        rep_tiers: Arc<RepTiers>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            shared: Arc::new(ProcessorShared {
                config,
                active,
                rep_tiers,
                uniquer: VoteUniquer::new(),
                stats,
                state: Mutex::new(ProcessorState::default()),
                condition: Condvar::new(),
                observers: Mutex::new(Vec::new()),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<(), ConsensusError> {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("Vote processing".into())
            .spawn(move || shared.run())
            .map_err(|e| ConsensusError::ThreadSpawn(e.to_string()))?;
        *self.thread.lock().unwrap() = Some(handle);
        debug!(max_votes = self.shared.config.max_votes, "vote processor started");
        Ok(())
    }

    pub fn stop(&self) {
        self.shared.state.lock().unwrap().stopped = true;
        self.shared.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("vote processing thread panicked");
            }
        }
    }

    /// Called with the outcome of every processed vote.
    pub fn add_vote_processed_observer(&self, observer: VoteProcessedCallback) {
        self.shared.observers.lock().unwrap().push(observer);
    }

    /// Queue `vote` for verification. Returns true when it was dropped
    /// because the queue is too full for the voter's tier.
    pub fn vote(&self, vote: &Arc<Vote>, channel: ChannelId) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        if state.stopped {
            return true;
        }
        if !self.shared.admit(state.votes.len(), vote) {
            drop(state);
            self.shared.stats.inc(StatType::VoteProcessor, DetailType::VoteOverflow);
            trace!(rep = %vote.voting_account, "vote dropped, queue full for tier");
            return true;
        }
        let vote = self.shared.uniquer.unique(vote);
        state.votes.push_back((vote, channel));
        drop(state);
        self.shared.condition.notify_all();
        false
    }

    /// Apply `vote` synchronously, bypassing the queue. The signature is
    /// checked unless `validated` is set.
    pub fn vote_blocking(&self, vote: &Arc<Vote>, channel: ChannelId, validated: bool) -> VoteCode {
        self.shared.vote_blocking(vote, channel, validated)
    }

    /// Block until every vote queued before this call has been processed.
    pub fn flush(&self) {
        let state = self.shared.state.lock().unwrap();
        let target = state.total_processed + (state.votes.len() + state.in_flight) as u64;
        let (guard, timeout) = self
            .shared
            .condition
            .wait_timeout_while(state, FLUSH_TIMEOUT, |s| {
                !s.stopped && s.total_processed < target
            })
            .unwrap();
        drop(guard);
        if timeout.timed_out() {
            warn!("vote processor flush timed out");
        }
    }

    /// Block until the queue is empty and no batch is being verified.
    pub fn flush_active(&self) {
        let state = self.shared.state.lock().unwrap();
        let (guard, timeout) = self
            .shared
            .condition
            .wait_timeout_while(state, FLUSH_TIMEOUT, |s| {
                !s.stopped && (!s.votes.is_empty() || s.in_flight > 0)
            })
            .unwrap();
        drop(guard);
        if timeout.timed_out() {
            warn!("vote processor flush_active timed out");
        }
    }

    /// Recompute representative tiers used for admission.
    pub fn calculate_weights(&self) {
        self.shared.rep_tiers.calculate_weights();
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_processed(&self) -> u64 {
        self.shared.state.lock().unwrap().total_processed
    }
}

impl Drop for VoteProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ProcessorShared {
    fn admit(&self, size: usize, vote: &Vote) -> bool {
        let max = self.config.max_votes;
        if size * 9 < max * 6 {
            return true;
        }
        if size >= max {
            return false;
        }
        let required = if size * 9 <= max * 7 {
            RepTier::Tier1
        } else if size * 9 <= max * 8 {
            RepTier::Tier2
        } else {
            RepTier::Tier3
        };
        self.rep_tiers.tier(&vote.voting_account) >= required
    }

    fn run(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.stopped {
            if state.votes.is_empty() {
                state = self
                    .condition
                    .wait_while(state, |s| !s.stopped && s.votes.is_empty())
                    .unwrap();
                continue;
            }
            let batch: Vec<_> = std::mem::take(&mut state.votes).into();
            state.in_flight = batch.len();
            drop(state);

            self.verify_votes(&batch);

            state = self.state.lock().unwrap();
            state.in_flight = 0;
            state.total_processed += batch.len() as u64;
            self.condition.notify_all();
        }
    }

    fn verify_votes(&self, batch: &[(Arc<Vote>, ChannelId)]) {
        let hashes: Vec<BlockHash> = batch.iter().map(|(vote, _)| vote.hash()).collect();
        let items: Vec<VerifyItem<'_>> = batch
            .iter()
            .zip(&hashes)
            .map(|((vote, _), hash)| VerifyItem {
                message: hash.as_bytes(),
                signature: &vote.signature,
                public_key: &vote.voting_account,
            })
            .collect();
        let valid = verify_batch(&items);
        for ((vote, channel), valid) in batch.iter().zip(valid) {
            if valid {
                self.vote_blocking(vote, *channel, true);
            } else {
                self.finish(vote, *channel, VoteCode::Invalid);
            }
        }
        trace!(count = batch.len(), "vote batch processed");
    }

    fn vote_blocking(&self, vote: &Arc<Vote>, channel: ChannelId, validated: bool) -> VoteCode {
        let code = if validated || vote.validate() {
            self.active.vote(vote, VoteSource::Live)
        } else {
            VoteCode::Invalid
        };
        self.finish(vote, channel, code);
        code
    }

    fn finish(&self, vote: &Arc<Vote>, channel: ChannelId, code: VoteCode) {
        let detail = match code {
            VoteCode::Vote => DetailType::VoteValid,
            VoteCode::Replay => DetailType::VoteReplay,
            VoteCode::Indeterminate => DetailType::VoteIndeterminate,
            VoteCode::Invalid => DetailType::VoteInvalid,
            VoteCode::Ignored => DetailType::VoteIgnored,
        };
        self.stats.inc(StatType::Vote, detail);
        for observer in self.observers.lock().unwrap().iter() {
            observer(vote, channel, code);
        }
    }
}
