//! Local vote generation.
//!
//! Two instances run side by side: one signs normal votes with the current
//! time, the other signs final votes. Candidates are queued by
//! [`VoteGenerator::add`] and signed in batches of up to
//! [`Vote::MAX_HASHES`] distinct roots, either when a batch fills up or when
//! the generator delay elapses.
//!
//! The final generator remembers which hash it committed to per qualified
//! root and never signs a final vote for a different one. The commitment is
//! dropped once the root is cemented.

use orv_ledger::Ledger;
use orv_messages::{Message, Network, Vote};
use orv_nullables::SteadyClock;
use orv_types::{milliseconds_since_epoch, BlockHash, NetworkParams, QualifiedRoot, Root};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::ConsensusError;
use crate::local_vote_history::LocalVoteHistory;
use crate::stats::{DetailType, StatType, Stats};
use crate::vote_spacing::VoteSpacing;
use crate::wallets::Wallets;

/// Duration code carried by normal votes.
const NORMAL_VOTE_DURATION: u8 = 0x9;
/// Candidates waiting beyond this are dropped.
const MAX_CANDIDATES: usize = 16 * 1024;

pub type VoteCallback = Box<dyn Fn(&Arc<Vote>) + Send + Sync>;

#[derive(Default)]
struct GeneratorState {
    candidates: VecDeque<(Root, BlockHash)>,
    stopped: bool,
}

struct GeneratorShared {
    is_final: bool,
    ledger: Arc<Ledger>,
    wallets: Arc<dyn Wallets>,
    network: Arc<dyn Network>,
    history: Arc<LocalVoteHistory>,
    stats: Arc<Stats>,
    delay: Duration,
    max_hashes: usize,
    spacing: Mutex<VoteSpacing>,
    final_votes: Mutex<HashMap<QualifiedRoot, BlockHash>>,
    state: Mutex<GeneratorState>,
    condition: Condvar,
    observers: Mutex<Vec<VoteCallback>>,
}

pub struct VoteGenerator {
    shared: Arc<GeneratorShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl VoteGenerator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        is_final: bool,
        ledger: Arc<Ledger>,
        wallets: Arc<dyn Wallets>,
        network: Arc<dyn Network>,
        history: Arc<LocalVoteHistory>,
        stats: Arc<Stats>,
        params: &NetworkParams,
        clock: SteadyClock,
    ) -> Self {
        Self {
            shared: Arc::new(GeneratorShared {
                is_final,
                ledger,
                wallets,
                network,
                history,
                stats,
                delay: params.vote_generator_delay,
                max_hashes: params.max_hashes_per_vote.min(Vote::MAX_HASHES),
                spacing: Mutex::new(VoteSpacing::new(params.vote_broadcast_interval, clock)),
                final_votes: Mutex::new(HashMap::new()),
                state: Mutex::new(GeneratorState::default()),
                condition: Condvar::new(),
                observers: Mutex::new(Vec::new()),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<(), ConsensusError> {
        let shared = Arc::clone(&self.shared);
        let name = if self.shared.is_final {
            "Voting final"
        } else {
            "Voting"
        };
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || shared.run())
            .map_err(|e| ConsensusError::ThreadSpawn(e.to_string()))?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.shared.state.lock().unwrap().stopped = true;
        self.shared.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!(is_final = self.shared.is_final, "vote generator thread panicked");
            }
        }
    }

    /// Called for every vote this generator broadcasts.
    pub fn add_vote_observer(&self, observer: VoteCallback) {
        self.shared.observers.lock().unwrap().push(observer);
    }

    /// Queue a vote for `hash` on `root`. Votes already in the local history
    /// are rebroadcast instead of signed again.
    pub fn add(&self, root: Root, hash: BlockHash) {
        self.shared.add(root, hash);
    }

    /// Sign and broadcast everything queued, without waiting for the thread.
    pub fn process_pending(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while !state.candidates.is_empty() {
            state = self.shared.broadcast(state);
        }
    }

    pub fn is_final(&self) -> bool {
        self.shared.is_final
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().unwrap().candidates.len()
    }

    /// The hash a final vote was committed to on `root`, if any.
    pub fn final_vote(&self, root: &QualifiedRoot) -> Option<BlockHash> {
        self.shared.final_votes.lock().unwrap().get(root).copied()
    }

    /// Forget the final vote commitment on a cemented `root`.
    pub fn remove_final_vote(&self, root: &QualifiedRoot) -> Option<BlockHash> {
        self.shared.final_votes.lock().unwrap().remove(root)
    }

    pub fn final_votes_len(&self) -> usize {
        self.shared.final_votes.lock().unwrap().len()
    }
}

impl Drop for VoteGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl GeneratorShared {
    fn add(&self, root: Root, hash: BlockHash) {
        let cached = self.history.votes(&root, &hash, self.is_final);
        if !cached.is_empty() {
            for vote in cached {
                self.broadcast_action(&vote);
            }
            self.stats.inc(StatType::VoteGenerator, DetailType::GeneratorCached);
            return;
        }

        let Some(block) = self.ledger.block(&hash) else {
            return;
        };
        if !self.ledger.dependents_confirmed(&block) {
            trace!(%hash, "dependents unconfirmed, not voting");
            return;
        }
        if self.is_final {
            let mut final_votes = self.final_votes.lock().unwrap();
            match final_votes.entry(block.qualified_root()) {
                Entry::Occupied(entry) if *entry.get() != hash => {
                    debug!(%hash, committed = %entry.get(), "final vote already cast for another block");
                    return;
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(entry) => {
                    entry.insert(hash);
                }
            }
        }

        let mut state = self.state.lock().unwrap();
        if state.candidates.len() >= MAX_CANDIDATES {
            return;
        }
        state.candidates.push_back((root, hash));
        if state.candidates.len() >= self.max_hashes {
            self.condition.notify_all();
        }
    }

    fn run(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.stopped {
            if state.candidates.len() >= self.max_hashes {
                state = self.broadcast(state);
            } else {
                let max_hashes = self.max_hashes;
                state = self
                    .condition
                    .wait_timeout_while(state, self.delay, |s| {
                        !s.stopped && s.candidates.len() < max_hashes
                    })
                    .unwrap()
                    .0;
                if !state.stopped && !state.candidates.is_empty() {
                    state = self.broadcast(state);
                }
            }
        }
    }

    /// Take one batch of votable candidates and sign it. The state lock is
    /// released while signing.
    fn broadcast<'a>(
        &'a self,
        mut state: MutexGuard<'a, GeneratorState>,
    ) -> MutexGuard<'a, GeneratorState> {
        let mut roots = Vec::with_capacity(self.max_hashes);
        let mut hashes = Vec::with_capacity(self.max_hashes);
        let mut seen = HashSet::new();
        {
            let spacing = self.spacing.lock().unwrap();
            while roots.len() < self.max_hashes {
                let Some((root, hash)) = state.candidates.pop_front() else {
                    break;
                };
                if !seen.insert(root) {
                    continue;
                }
                if spacing.votable(&root, &hash) {
                    roots.push(root);
                    hashes.push(hash);
                } else {
                    self.stats.inc(StatType::VoteGenerator, DetailType::GeneratorSpacing);
                }
            }
        }
        if !hashes.is_empty() {
            drop(state);
            self.vote(&roots, hashes);
            state = self.state.lock().unwrap();
        }
        state
    }

    fn vote(&self, roots: &[Root], hashes: Vec<BlockHash>) {
        let (timestamp, duration) = if self.is_final {
            (Vote::TIMESTAMP_MAX, Vote::DURATION_MAX)
        } else {
            (milliseconds_since_epoch(), NORMAL_VOTE_DURATION)
        };
        let packed = Vote::packed_timestamp(timestamp, duration);
        let digest = Vote::signing_hash(packed, &hashes);

        let mut votes = Vec::new();
        for account in self.wallets.voting_reps() {
            if let Some(signature) = self.wallets.sign(&account, &digest) {
                votes.push(Arc::new(Vote::from_parts(account, signature, packed, hashes.clone())));
            }
        }
        for vote in votes {
            {
                let mut spacing = self.spacing.lock().unwrap();
                for (root, hash) in roots.iter().zip(&hashes) {
                    self.history.add(*root, *hash, &vote);
                    spacing.flag(*root, *hash);
                }
            }
            self.broadcast_action(&vote);
        }
    }

    fn broadcast_action(&self, vote: &Arc<Vote>) {
        self.network.flood(&Message::ConfirmAck(Arc::clone(vote)), 2.0);
        self.stats.inc(StatType::VoteGenerator, DetailType::GeneratorBroadcasts);
        for observer in self.observers.lock().unwrap().iter() {
            observer(vote);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::online_reps::OnlineReps;
    use crate::wallets::KeyWallets;
    use orv_ledger::{dev_genesis_key, LedgerConstants};
    use orv_messages::MessageType;
    use orv_nullables::NullNetwork;

    struct Fixture {
        ledger: Arc<Ledger>,
        network: Arc<NullNetwork>,
        history: Arc<LocalVoteHistory>,
        clock: SteadyClock,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                ledger: Arc::new(Ledger::new(LedgerConstants::dev())),
                network: Arc::new(NullNetwork::new()),
                history: Arc::new(LocalVoteHistory::new(1024)),
                clock: SteadyClock::new_null(),
            }
        }

        fn generator(&self, is_final: bool, with_key: bool) -> VoteGenerator {
            let params = NetworkParams::dev();
            let online = Arc::new(OnlineReps::new(Arc::clone(&self.ledger), params.clone(), self.clock.clone()));
            let wallets = KeyWallets::new(Arc::clone(&self.ledger), online);
            if with_key {
                wallets.insert(dev_genesis_key());
            }
            VoteGenerator::new(
                is_final,
                Arc::clone(&self.ledger),
                Arc::new(wallets),
                self.network.clone(),
                Arc::clone(&self.history),
                Arc::new(Stats::new()),
                &params,
                self.clock.clone(),
            )
        }

        fn genesis(&self) -> (Root, BlockHash) {
            let hash = self.ledger.constants().genesis_hash();
            let block = self.ledger.block(&hash).unwrap();
            (block.root(), hash)
        }
    }

    #[test]
    fn signs_and_floods_queued_candidates() {
        let fixture = Fixture::new();
        let generator = fixture.generator(false, true);
        let votes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&votes);
        generator.add_vote_observer(Box::new(move |vote| sink.lock().unwrap().push(Arc::clone(vote))));

        let (root, hash) = fixture.genesis();
        generator.add(root, hash);
        assert_eq!(generator.queue_len(), 1);
        generator.process_pending();

        let votes = votes.lock().unwrap();
        assert_eq!(votes.len(), 1);
        assert!(votes[0].validate());
        assert!(!votes[0].is_final());
        assert_eq!(votes[0].hashes(), &[hash]);
        assert_eq!(fixture.network.count(MessageType::ConfirmAck), 1);
        assert_eq!(fixture.history.votes(&root, &hash, false).len(), 1);
    }

    #[test]
    fn final_generator_signs_final_votes() {
        let fixture = Fixture::new();
        let generator = fixture.generator(true, true);
        let (root, hash) = fixture.genesis();
        generator.add(root, hash);
        generator.process_pending();

        let votes = fixture.history.votes(&root, &hash, true);
        assert_eq!(votes.len(), 1);
        assert!(votes[0].is_final());
        assert!(votes[0].validate());
    }

    #[test]
    fn final_commitment_is_kept_until_removed() {
        let fixture = Fixture::new();
        let generator = fixture.generator(true, true);
        let hash = fixture.ledger.constants().genesis_hash();
        let root = fixture.ledger.block(&hash).unwrap().qualified_root();
        let (vote_root, _) = fixture.genesis();
        generator.add(vote_root, hash);
        assert_eq!(generator.final_vote(&root), Some(hash));
        assert_eq!(generator.final_votes_len(), 1);

        assert_eq!(generator.remove_final_vote(&root), Some(hash));
        assert_eq!(generator.final_vote(&root), None);
        assert_eq!(generator.final_votes_len(), 0);
    }

    #[test]
    fn history_is_rebroadcast_without_queueing() {
        let fixture = Fixture::new();
        let generator = fixture.generator(false, true);
        let (root, hash) = fixture.genesis();
        generator.add(root, hash);
        generator.process_pending();
        fixture.network.reset();

        generator.add(root, hash);
        assert_eq!(generator.queue_len(), 0);
        assert_eq!(fixture.network.count(MessageType::ConfirmAck), 1);
    }

    #[test]
    fn unknown_block_is_not_queued() {
        let fixture = Fixture::new();
        let generator = fixture.generator(false, true);
        generator.add(Root::new([1; 32]), BlockHash::new([2; 32]));
        assert_eq!(generator.queue_len(), 0);
    }

    #[test]
    fn no_voting_keys_no_votes() {
        let fixture = Fixture::new();
        let generator = fixture.generator(false, false);
        let (root, hash) = fixture.genesis();
        generator.add(root, hash);
        generator.process_pending();
        assert_eq!(fixture.network.count(MessageType::ConfirmAck), 0);
    }

    #[test]
    fn thread_flushes_after_delay() {
        let fixture = Fixture::new();
        let generator = fixture.generator(false, true);
        generator.start().unwrap();
        let (root, hash) = fixture.genesis();
        generator.add(root, hash);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while fixture.network.count(MessageType::ConfirmAck) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        generator.stop();
        assert_eq!(fixture.network.count(MessageType::ConfirmAck), 1);
    }
}
