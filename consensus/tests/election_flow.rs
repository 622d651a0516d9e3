//! Scheduler, container, vote processor and cementing working together on
//! their own threads.

use orv_consensus::{
    ActiveElections, ActiveElectionsConfig, DetailType, ElectionBehavior, ElectionScheduler,
    ElectionSchedulerConfig, ElectionStatus, FrontiersConfirmationMode, KeyWallets, OnlineReps,
    RepTiers, StatType, Stats, VoteCacheConfig, VoteCode, VoteProcessor, VoteProcessorConfig,
};
use orv_crypto::sign_block;
use orv_ledger::{
    dev_genesis_key, ConfirmationHeightConfig, ConfirmationHeightProcessor, Ledger,
    LedgerConstants, ProcessResult, WriteQueue,
};
use orv_messages::{ChannelId, Vote};
use orv_nullables::{NullNetwork, SteadyClock};
use orv_types::{Account, Amount, Block, BlockHash, Link, NetworkParams};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Harness {
    ledger: Arc<Ledger>,
    stats: Arc<Stats>,
    confirmation_height: Arc<ConfirmationHeightProcessor>,
    active: Arc<ActiveElections>,
    scheduler: Arc<ElectionScheduler>,
    vote_processor: Arc<VoteProcessor>,
}

impl Harness {
    fn start() -> Self {
        let params = NetworkParams::dev();
        let clock = SteadyClock::new_null();
        let ledger = Arc::new(Ledger::new(LedgerConstants::dev()));
        let stats = Arc::new(Stats::new());
        let online_reps = Arc::new(OnlineReps::new(Arc::clone(&ledger), params.clone(), clock.clone()));
        let wallets = Arc::new(KeyWallets::new(Arc::clone(&ledger), Arc::clone(&online_reps)));
        let rep_tiers = Arc::new(RepTiers::new(Arc::clone(&ledger), Arc::clone(&online_reps)));
        let confirmation_height = Arc::new(ConfirmationHeightProcessor::new(
            Arc::clone(&ledger),
            WriteQueue::new(),
            ConfirmationHeightConfig::default(),
        ));
        let active = Arc::new(ActiveElections::new(
            ActiveElectionsConfig {
                frontier_confirmation: FrontiersConfirmationMode::Disabled,
                ..Default::default()
            },
            VoteCacheConfig::default(),
            params,
            false,
            Arc::clone(&ledger),
            Arc::new(NullNetwork::new()),
            wallets,
            online_reps,
            Arc::clone(&confirmation_height),
            Arc::clone(&stats),
            clock,
        ));
        active.connect_confirmation_height();
        let scheduler = Arc::new(ElectionScheduler::new(
            ElectionSchedulerConfig::default(),
            Arc::clone(&ledger),
            Arc::clone(&active),
            Arc::clone(&stats),
        ));
        let vote_processor = Arc::new(VoteProcessor::new(
            VoteProcessorConfig::default(),
            Arc::clone(&active),
            rep_tiers,
            Arc::clone(&stats),
        ));

        let weak = Arc::downgrade(&scheduler);
        active.add_vacancy_update_observer(Box::new(move || {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.notify();
            }
        }));

        confirmation_height.start().unwrap();
        vote_processor.start().unwrap();
        scheduler.start().unwrap();
        active.start().unwrap();
        Self {
            ledger,
            stats,
            confirmation_height,
            active,
            scheduler,
            vote_processor,
        }
    }

    fn stop(&self) {
        self.active.stop();
        self.scheduler.stop();
        self.vote_processor.stop();
        self.confirmation_height.stop();
    }

    fn send(&self, previous: BlockHash, balance: u128, destination: u64) -> Arc<Block> {
        let key = dev_genesis_key();
        let mut block = Block::new_state(
            key.account(),
            previous,
            key.account(),
            Amount::raw(balance),
            Link::from(Account::from(destination)),
        );
        sign_block(&mut block, &key.private);
        let block = Arc::new(block);
        assert_eq!(self.ledger.process(&block), ProcessResult::Progress);
        block
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn activated_chain_is_confirmed_block_by_block() {
    let h = Harness::start();
    let cemented: Arc<Mutex<Vec<ElectionStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&cemented);
    h.active
        .add_block_cemented_observer(Box::new(move |status| sink.lock().unwrap().push(status.clone())));

    let genesis = h.ledger.constants().genesis_hash();
    let first = h.send(genesis, u128::MAX - 1, 1);
    let second = h.send(first.hash(), u128::MAX - 2, 2);
    let account = dev_genesis_key().account();

    // Only the first uncemented block is eligible.
    assert!(h.scheduler.activate(&account));
    wait_until(|| h.active.active(&first));
    assert!(!h.active.active(&second));

    let vote = Arc::new(Vote::new_final(&dev_genesis_key(), vec![first.hash()]));
    assert!(!h.vote_processor.vote(&vote, ChannelId(1)));
    wait_until(|| h.ledger.block_confirmed(&first.hash()));

    assert!(h.scheduler.activate(&account));
    wait_until(|| h.active.active(&second));
    let vote = Arc::new(Vote::new_final(&dev_genesis_key(), vec![second.hash()]));
    assert_eq!(
        h.vote_processor.vote_blocking(&vote, ChannelId(1), false),
        VoteCode::Vote
    );
    wait_until(|| h.ledger.block_confirmed(&second.hash()));
    wait_until(|| cemented.lock().unwrap().len() == 2);

    let winners: Vec<_> = cemented.lock().unwrap().iter().map(|s| s.winner.hash()).collect();
    assert_eq!(winners, vec![first.hash(), second.hash()]);
    wait_until(|| h.active.is_empty());
    assert_eq!(h.active.recently_cemented().len(), 2);
    assert_eq!(
        h.stats.count(StatType::ElectionScheduler, DetailType::InsertPriority),
        2
    );
    h.stop();
}

#[test]
fn manual_election_ignores_vacancy() {
    let h = Harness::start();
    let genesis = h.ledger.constants().genesis_hash();
    let send = h.send(genesis, u128::MAX - 1, 1);
    h.scheduler
        .manual(Arc::clone(&send), None, ElectionBehavior::Manual, None);
    wait_until(|| h.active.active(&send));
    assert_eq!(h.active.count_by_behavior(ElectionBehavior::Manual), 1);
    h.stop();
}
