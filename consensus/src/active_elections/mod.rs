//! Active elections container.
//!
//! Holds every ongoing election, indexed by qualified root and by each
//! candidate block hash, routes incoming votes to them and drives their
//! lifecycle from a dedicated request-loop thread.
//!
//! Lock order: the container mutex may be held while taking an election's
//! mutex, never the reverse. The winner-details map, the recently confirmed
//! ring, the local vote history and the vote cache are leaves and never take
//! another lock. Candidate hashes are indexed only while the container mutex
//! shows their election still owns its root.

mod confirmation;
mod frontiers;
mod publish;
mod request_loop;

use orv_ledger::{ConfirmationHeightProcessor, Ledger};
use orv_messages::{Message, Network, Vote};
use orv_nullables::SteadyClock;
use orv_types::{Account, Amount, Block, BlockHash, NetworkParams, QualifiedRoot};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use tracing::{debug, trace};

use crate::config::{ActiveElectionsConfig, VoteCacheConfig};
use crate::election::{
    ConfirmationAction, Election, ElectionBehavior, ElectionState, ElectionStatus, VoteCode,
    VoteInfo, VoteSource,
};
use crate::local_vote_history::LocalVoteHistory;
use crate::online_reps::OnlineReps;
use crate::recently_confirmed::RecentlyConfirmed;
use crate::stats::{DetailType, StatType, Stats};
use crate::vote_cache::VoteCache;
use crate::vote_generator::VoteGenerator;
use crate::wallets::Wallets;

use frontiers::FrontierState;

/// Roots kept in the local vote history.
const LOCAL_VOTE_HISTORY_MAX_ROOTS: usize = 64 * 1024;

pub type ElectionStatusCallback = Box<dyn Fn(&ElectionStatus) + Send + Sync>;
pub type BlockHashCallback = Box<dyn Fn(BlockHash) + Send + Sync>;
pub type AccountCallback = Box<dyn Fn(Account) + Send + Sync>;
pub type BlockCallback = Box<dyn Fn(Arc<Block>) + Send + Sync>;
pub type VacancyCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Observers {
    election_confirmed: Mutex<Vec<ElectionStatusCallback>>,
    block_cemented: Mutex<Vec<ElectionStatusCallback>>,
    active_started: Mutex<Vec<BlockHashCallback>>,
    active_stopped: Mutex<Vec<BlockHashCallback>>,
    vacancy_update: Mutex<Vec<VacancyCallback>>,
    live_vote: Mutex<Vec<AccountCallback>>,
    force_process: Mutex<Vec<BlockCallback>>,
}

#[derive(Default)]
struct ActiveState {
    stopped: bool,
    next_id: u64,
    roots: HashMap<QualifiedRoot, Arc<Election>>,
    /// Insertion order, oldest first.
    order: BTreeMap<u64, QualifiedRoot>,
    blocks: HashMap<BlockHash, Arc<Election>>,
    count_by_behavior: HashMap<ElectionBehavior, usize>,
    frontiers: FrontierState,
}

impl ActiveState {
    fn count(&self, behavior: ElectionBehavior) -> usize {
        self.count_by_behavior.get(&behavior).copied().unwrap_or(0)
    }

    fn ordered(&self) -> impl Iterator<Item = &Arc<Election>> + '_ {
        self.order.values().filter_map(|root| self.roots.get(root))
    }
}

/// Vote outcome inside a single election.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ElectionVote {
    Processed,
    Replay,
    Ignored,
}

pub struct ActiveElections {
    config: ActiveElectionsConfig,
    params: NetworkParams,
    enable_voting: bool,
    ledger: Arc<Ledger>,
    network: Arc<dyn Network>,
    wallets: Arc<dyn Wallets>,
    online_reps: Arc<OnlineReps>,
    confirmation_height: Arc<ConfirmationHeightProcessor>,
    stats: Arc<Stats>,
    clock: SteadyClock,
    history: Arc<LocalVoteHistory>,
    generator: Arc<VoteGenerator>,
    final_generator: Arc<VoteGenerator>,
    state: Mutex<ActiveState>,
    condition: Condvar,
    election_winner_details: Mutex<HashMap<BlockHash, Arc<Election>>>,
    recently_confirmed: RecentlyConfirmed,
    recently_cemented: Mutex<VecDeque<ElectionStatus>>,
    vote_cache: Mutex<VoteCache>,
    /// Confirmed winners not yet in the ledger, with their retry count.
    pending_confirmed: Mutex<Vec<(ElectionStatus, u32)>>,
    observers: Observers,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveElections {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ActiveElectionsConfig,
        vote_cache_config: VoteCacheConfig,
        params: NetworkParams,
        enable_voting: bool,
        ledger: Arc<Ledger>,
        network: Arc<dyn Network>,
        wallets: Arc<dyn Wallets>,
        online_reps: Arc<OnlineReps>,
        confirmation_height: Arc<ConfirmationHeightProcessor>,
        stats: Arc<Stats>,
        clock: SteadyClock,
    ) -> Self {
        let history = Arc::new(LocalVoteHistory::new(LOCAL_VOTE_HISTORY_MAX_ROOTS));
        let make_generator = |is_final| {
            Arc::new(VoteGenerator::new(
                is_final,
                Arc::clone(&ledger),
                Arc::clone(&wallets),
                Arc::clone(&network),
                Arc::clone(&history),
                Arc::clone(&stats),
                &params,
                clock.clone(),
            ))
        };
        let generator = make_generator(false);
        let final_generator = make_generator(true);

        Self {
            recently_confirmed: RecentlyConfirmed::new(config.confirmation_cache),
            config,
            params,
            enable_voting,
            ledger,
            network,
            wallets,
            online_reps,
            confirmation_height,
            stats,
            clock,
            history,
            generator,
            final_generator,
            state: Mutex::new(ActiveState::default()),
            condition: Condvar::new(),
            election_winner_details: Mutex::new(HashMap::new()),
            recently_cemented: Mutex::new(VecDeque::new()),
            vote_cache: Mutex::new(VoteCache::new(vote_cache_config)),
            pending_confirmed: Mutex::new(Vec::new()),
            observers: Observers::default(),
            thread: Mutex::new(None),
        }
    }

    /// Route cementing notifications from the confirmation height processor
    /// back into the container.
    pub fn connect_confirmation_height(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.confirmation_height
            .add_cemented_observer(Box::new(move |block| {
                if let Some(active) = weak.upgrade() {
                    active.block_cemented_callback(block);
                }
            }));
        let weak: Weak<Self> = Arc::downgrade(self);
        self.confirmation_height
            .add_already_cemented_observer(Box::new(move |hash| {
                if let Some(active) = weak.upgrade() {
                    active.block_already_cemented_callback(hash);
                }
            }));
    }

    // ── Observers ──

    /// Called once per election when it reaches confirmation.
    pub fn add_election_confirmed_observer(&self, observer: ElectionStatusCallback) {
        self.observers.election_confirmed.lock().unwrap().push(observer);
    }

    /// Called when a confirmed winner, or a block without an election, is cemented.
    pub fn add_block_cemented_observer(&self, observer: ElectionStatusCallback) {
        self.observers.block_cemented.lock().unwrap().push(observer);
    }

    pub fn add_active_started_observer(&self, observer: BlockHashCallback) {
        self.observers.active_started.lock().unwrap().push(observer);
    }

    pub fn add_active_stopped_observer(&self, observer: BlockHashCallback) {
        self.observers.active_stopped.lock().unwrap().push(observer);
    }

    /// Called whenever an election is inserted or removed.
    pub fn add_vacancy_update_observer(&self, observer: VacancyCallback) {
        self.observers.vacancy_update.lock().unwrap().push(observer);
    }

    /// Called with the voting account of every live vote applied to an election.
    pub fn add_live_vote_observer(&self, observer: AccountCallback) {
        self.observers.live_vote.lock().unwrap().push(observer);
    }

    /// Called when a fork switch needs the new winner forced into the ledger.
    pub fn add_force_process_observer(&self, observer: BlockCallback) {
        self.observers.force_process.lock().unwrap().push(observer);
    }

    fn notify_vacancy_update(&self) {
        for observer in self.observers.vacancy_update.lock().unwrap().iter() {
            observer();
        }
    }

    fn notify_active_started(&self, hash: BlockHash) {
        for observer in self.observers.active_started.lock().unwrap().iter() {
            observer(hash);
        }
    }

    fn notify_active_stopped(&self, hash: BlockHash) {
        for observer in self.observers.active_stopped.lock().unwrap().iter() {
            observer(hash);
        }
    }

    fn notify_live_vote(&self, account: Account) {
        for observer in self.observers.live_vote.lock().unwrap().iter() {
            observer(account);
        }
    }

    fn notify_force_process(&self, block: &Arc<Block>) {
        for observer in self.observers.force_process.lock().unwrap().iter() {
            observer(Arc::clone(block));
        }
    }

    // ── Insertion ──

    /// Start an election for `block`'s root.
    ///
    /// Returns the election for the root and whether it was created by this
    /// call. Nothing is created once the container is stopped, when the root
    /// was recently confirmed, or when there is no vacancy (manual elections
    /// excepted).
    pub fn insert(
        &self,
        block: &Arc<Block>,
        previous_balance: Option<Amount>,
        behavior: ElectionBehavior,
        confirmation_action: Option<ConfirmationAction>,
    ) -> (Option<Arc<Election>>, bool) {
        let hash = block.hash();
        let root = block.qualified_root();
        let election = {
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                return (None, false);
            }
            if let Some(existing) = state.roots.get(&root) {
                return (Some(Arc::clone(existing)), false);
            }
            if self.recently_confirmed.root_exists(&root) {
                return (None, false);
            }
            if behavior != ElectionBehavior::Manual && self.vacancy_locked(&state) <= 0 {
                self.stats.inc(StatType::ActiveElections, DetailType::InsertFailed);
                return (None, false);
            }

            state.next_id += 1;
            let election = Arc::new(Election::new(
                state.next_id,
                Arc::clone(block),
                behavior,
                previous_balance,
                confirmation_action,
                self.clock.now(),
                self.params.base_latency,
            ));
            state.roots.insert(root, Arc::clone(&election));
            state.order.insert(election.id, root);
            state.blocks.insert(hash, Arc::clone(&election));
            *state.count_by_behavior.entry(behavior).or_default() += 1;
            election
        };

        self.stats.inc(StatType::ActiveStarted, behavior.into());
        debug!(%hash, behavior = behavior.as_str(), "election started");
        self.notify_active_started(hash);
        self.apply_cached_votes(&election, &hash);
        self.notify_vacancy_update();
        (Some(election), true)
    }

    fn apply_cached_votes(&self, election: &Arc<Election>, hash: &BlockHash) {
        let cached = self.vote_cache.lock().unwrap().find(hash);
        for vote in cached {
            self.vote_for_election(election, &vote, *hash, VoteSource::Cache);
            self.stats.inc(StatType::VoteCache, DetailType::Replay);
        }
    }

    // ── Votes ──

    /// Apply `vote` to every election holding one of its hashes. Hashes
    /// without an election are kept in the vote cache for later.
    pub fn vote(&self, vote: &Arc<Vote>, source: VoteSource) -> VoteCode {
        let mut process = Vec::new();
        let mut inactive = Vec::new();
        let mut recently_confirmed = 0;
        {
            let state = self.state.lock().unwrap();
            for hash in vote.hashes() {
                if let Some(election) = state.blocks.get(hash) {
                    process.push((Arc::clone(election), *hash));
                } else if self.recently_confirmed.exists(hash) {
                    recently_confirmed += 1;
                } else {
                    inactive.push(*hash);
                }
            }
        }

        for hash in inactive {
            self.add_inactive_vote(hash, vote);
        }

        if process.is_empty() {
            return if recently_confirmed == vote.hashes().len() {
                VoteCode::Replay
            } else {
                VoteCode::Indeterminate
            };
        }

        let mut processed = false;
        let mut replay = false;
        for (election, hash) in process {
            match self.vote_for_election(&election, vote, hash, source) {
                ElectionVote::Processed => processed = true,
                ElectionVote::Replay => replay = true,
                ElectionVote::Ignored => {}
            }
        }

        if processed {
            if source == VoteSource::Live
                && !self.wallets.have_half_rep()
                && !self.wallets.exists(&vote.voting_account)
            {
                self.network
                    .flood(&Message::ConfirmAck(Arc::clone(vote)), 0.5);
                self.stats.inc(StatType::Vote, DetailType::Republish);
            }
            VoteCode::Vote
        } else if replay {
            VoteCode::Replay
        } else {
            VoteCode::Ignored
        }
    }

    fn add_inactive_vote(&self, hash: BlockHash, vote: &Arc<Vote>) {
        let weight = self.ledger.weight(&vote.voting_account);
        if weight.is_zero() {
            return;
        }
        if !self.params.is_dev_network() && weight < self.online_reps.minimum_principal_weight() {
            return;
        }
        if self.vote_cache.lock().unwrap().insert(hash, vote, weight) {
            self.stats.inc(StatType::VoteCache, DetailType::Insert);
        }
    }

    /// Apply one hash of a vote to one election.
    fn vote_for_election(
        &self,
        election: &Arc<Election>,
        vote: &Arc<Vote>,
        hash: BlockHash,
        source: VoteSource,
    ) -> ElectionVote {
        let rep = vote.voting_account;
        let timestamp = vote.timestamp();
        let weight = self.ledger.weight(&rep);
        if !self.params.is_dev_network() && weight < self.online_reps.minimum_principal_weight() {
            return ElectionVote::Ignored;
        }

        let now = self.clock.now();
        let confirmed = {
            let mut data = election.lock();
            if let Some(last) = data.last_votes.get(&rep) {
                if last.timestamp > timestamp {
                    return ElectionVote::Replay;
                }
                if last.timestamp == timestamp && last.hash >= hash {
                    return ElectionVote::Replay;
                }
                let max_vote = timestamp == Vote::TIMESTAMP_MAX && last.timestamp < timestamp;
                let past_cooldown = source != VoteSource::Live
                    || now.saturating_duration_since(last.time)
                        >= Election::cooldown_time(weight, self.online_reps.trended());
                if !max_vote && !past_cooldown {
                    return ElectionVote::Replay;
                }
            }
            data.last_votes.insert(
                rep,
                VoteInfo {
                    time: now,
                    timestamp,
                    hash,
                },
            );
            let detail = match source {
                VoteSource::Live => DetailType::VoteNew,
                VoteSource::Cache => DetailType::VoteCached,
            };
            self.stats.inc(StatType::Election, detail);
            trace!(%hash, %rep, timestamp, "vote applied");

            if data.state.is_confirmed() {
                None
            } else {
                self.confirm_if_quorum(election, &mut data)
            }
        };

        if source == VoteSource::Live {
            self.notify_live_vote(rep);
        }
        if let Some(status) = confirmed {
            self.on_confirmed(election, status);
        }
        ElectionVote::Processed
    }

    /// Drop the votes local representatives cast for `hash` so they can vote
    /// again after a fork switch.
    fn remove_local_votes(&self, election: &Election, votes: &mut HashMap<Account, VoteInfo>, hash: &BlockHash) {
        if !self.enable_voting || self.wallets.voting_reps().is_empty() {
            return;
        }
        for vote in self.history.votes(&election.root, hash, false) {
            votes.remove(&vote.voting_account);
        }
        self.history.erase(&election.root);
    }

    // ── Removal ──

    /// Remove the election for `root`. Returns false if there is none.
    pub fn erase(&self, root: &QualifiedRoot) -> bool {
        let state = self.state.lock().unwrap();
        match state.roots.get(root).cloned() {
            Some(election) => {
                self.cleanup_election(state, &election);
                true
            }
            None => false,
        }
    }

    pub fn erase_block(&self, block: &Block) -> bool {
        self.erase(&block.qualified_root())
    }

    fn cleanup_election(&self, mut state: MutexGuard<'_, ActiveState>, election: &Arc<Election>) {
        let (blocks, confirmed, expired, winner) = {
            let data = election.lock();
            (
                data.last_blocks.clone(),
                data.state.is_confirmed(),
                data.state == ElectionState::ExpiredUnconfirmed,
                Arc::clone(&data.status.winner),
            )
        };
        for hash in blocks.keys() {
            if state
                .blocks
                .get(hash)
                .is_some_and(|e| Arc::ptr_eq(e, election))
            {
                state.blocks.remove(hash);
            }
        }
        state.roots.remove(&election.qualified_root);
        state.order.remove(&election.id);
        if let Some(count) = state.count_by_behavior.get_mut(&election.behavior) {
            *count = count.saturating_sub(1);
        }
        if !confirmed && election.behavior == ElectionBehavior::Optimistic {
            let account = self
                .ledger
                .block_account(&winner.hash())
                .or_else(|| winner.account_field());
            if let Some(account) = account {
                state.frontiers.expired_optimistic.insert(account, self.clock.now());
            }
        }
        drop(state);

        {
            let mut cache = self.vote_cache.lock().unwrap();
            for hash in blocks.keys() {
                cache.erase(hash);
            }
        }
        self.notify_vacancy_update();

        let winner_hash = winner.hash();
        for (hash, block) in &blocks {
            if !confirmed || *hash != winner_hash {
                self.notify_active_stopped(*hash);
            }
            if !confirmed {
                self.network.clear_publish_filter(block);
            }
        }

        if !confirmed {
            let stat = if expired {
                StatType::ActiveExpired
            } else {
                StatType::ActiveDropped
            };
            self.stats.inc(stat, election.behavior.into());
        }
        debug!(
            root = ?election.qualified_root,
            winner = %winner_hash,
            confirmed,
            blocks = blocks.len(),
            "election erased"
        );
    }

    /// Stop tracking the winner of a cemented or abandoned election.
    pub fn remove_election_winner_details(&self, hash: &BlockHash) -> Option<Arc<Election>> {
        self.election_winner_details.lock().unwrap().remove(hash)
    }

    // ── Queries ──

    pub fn active_root(&self, root: &QualifiedRoot) -> bool {
        self.state.lock().unwrap().roots.contains_key(root)
    }

    /// Whether `block` itself is a candidate in an ongoing election.
    pub fn active(&self, block: &Block) -> bool {
        let state = self.state.lock().unwrap();
        state.roots.contains_key(&block.qualified_root()) && state.blocks.contains_key(&block.hash())
    }

    pub fn active_hash(&self, hash: &BlockHash) -> bool {
        self.state.lock().unwrap().blocks.contains_key(hash)
    }

    pub fn election(&self, root: &QualifiedRoot) -> Option<Arc<Election>> {
        self.state.lock().unwrap().roots.get(root).cloned()
    }

    pub fn election_for_block(&self, hash: &BlockHash) -> Option<Arc<Election>> {
        self.state.lock().unwrap().blocks.get(hash).cloned()
    }

    /// Up to `max` elections, oldest first.
    pub fn list_active(&self, max: usize) -> Vec<Arc<Election>> {
        self.state.lock().unwrap().ordered().take(max).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_by_behavior(&self, behavior: ElectionBehavior) -> usize {
        self.state.lock().unwrap().count(behavior)
    }

    /// Free election slots; negative when manual inserts overfilled the container.
    pub fn vacancy(&self) -> i64 {
        let state = self.state.lock().unwrap();
        self.vacancy_locked(&state)
    }

    fn vacancy_locked(&self, state: &ActiveState) -> i64 {
        self.config.size as i64 - state.roots.len() as i64
    }

    pub fn recently_confirmed(&self) -> &RecentlyConfirmed {
        &self.recently_confirmed
    }

    /// Most recently cemented election statuses, newest last.
    pub fn recently_cemented(&self) -> Vec<ElectionStatus> {
        self.recently_cemented.lock().unwrap().iter().cloned().collect()
    }

    pub fn election_winner_details_len(&self) -> usize {
        self.election_winner_details.lock().unwrap().len()
    }

    pub fn vote_cache(&self) -> MutexGuard<'_, VoteCache> {
        self.vote_cache.lock().unwrap()
    }

    pub fn generator(&self) -> &Arc<VoteGenerator> {
        &self.generator
    }

    pub fn final_generator(&self) -> &Arc<VoteGenerator> {
        &self.final_generator
    }

    pub fn history(&self) -> &Arc<LocalVoteHistory> {
        &self.history
    }

    pub fn clock(&self) -> &SteadyClock {
        &self.clock
    }
}
