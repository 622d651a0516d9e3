//! The node: wires the ledger, elections, vote processing and cementing
//! together and owns their threads.

use orv_consensus::{
    ActiveElections, ElectionScheduler, KeyWallets, OnlineReps, RepTiers, Stats, VoteProcessor,
    Wallets,
};
use orv_ledger::{ConfirmationHeightProcessor, Ledger, LedgerConstants, ProcessResult, WriteQueue};
use orv_messages::{ChannelId, Network};
use orv_nullables::SteadyClock;
use orv_types::{Block, NetworkParams};
use prometheus::{Encoder, TextEncoder};
use std::sync::{Arc, Weak};
use tracing::info;

use crate::block_processor::{BlockProcessor, BlockSource};
use crate::config::NodeConfig;
use crate::online_weight::OnlineWeightSampler;
use crate::NodeError;

/// A running node.
pub struct Node {
    config: NodeConfig,
    params: NetworkParams,
    clock: SteadyClock,
    stats: Arc<Stats>,
    ledger: Arc<Ledger>,
    wallets: Arc<KeyWallets>,
    online_reps: Arc<OnlineReps>,
    confirmation_height: Arc<ConfirmationHeightProcessor>,
    active: Arc<ActiveElections>,
    vote_processor: Arc<VoteProcessor>,
    scheduler: Arc<ElectionScheduler>,
    block_processor: Arc<BlockProcessor>,
    online_weight: OnlineWeightSampler,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        constants: LedgerConstants,
        network: Arc<dyn Network>,
    ) -> Result<Self, NodeError> {
        Self::with_clock(config, constants, network, SteadyClock::new())
    }

    /// Build a node on an explicit clock. Tests pass a null clock to drive
    /// cooldowns and election timeouts by hand.
    pub fn with_clock(
        config: NodeConfig,
        constants: LedgerConstants,
        network: Arc<dyn Network>,
        clock: SteadyClock,
    ) -> Result<Self, NodeError> {
        let params = config.network_params();
        let stats = Arc::new(Stats::new());
        let ledger = Arc::new(Ledger::new(constants));
        let online_reps = Arc::new(OnlineReps::new(
            Arc::clone(&ledger),
            params.clone(),
            clock.clone(),
        ));
        let wallets = Arc::new(KeyWallets::new(Arc::clone(&ledger), Arc::clone(&online_reps)));
        let rep_tiers = Arc::new(RepTiers::new(Arc::clone(&ledger), Arc::clone(&online_reps)));
        let confirmation_height = Arc::new(ConfirmationHeightProcessor::new(
            Arc::clone(&ledger),
            WriteQueue::new(),
            config.confirmation_height.clone(),
        ));
        let active = Arc::new(ActiveElections::new(
            config.active_elections.clone(),
            config.vote_cache.clone(),
            params.clone(),
            config.enable_voting,
            Arc::clone(&ledger),
            network,
            Arc::clone(&wallets) as Arc<dyn Wallets>,
            Arc::clone(&online_reps),
            Arc::clone(&confirmation_height),
            Arc::clone(&stats),
            clock.clone(),
        ));
        let vote_processor = Arc::new(VoteProcessor::new(
            config.vote_processor.clone(),
            Arc::clone(&active),
            Arc::clone(&rep_tiers),
            Arc::clone(&stats),
        ));
        let scheduler = Arc::new(ElectionScheduler::new(
            config.scheduler.clone(),
            Arc::clone(&ledger),
            Arc::clone(&active),
            Arc::clone(&stats),
        ));
        let block_processor = Arc::new(BlockProcessor::new(
            config.block_processor.clone(),
            Arc::clone(&ledger),
            Arc::clone(&active),
            Arc::clone(&scheduler),
            Arc::clone(&stats),
        ));
        let online_weight = OnlineWeightSampler::new(
            Arc::clone(&online_reps),
            rep_tiers,
            Arc::clone(&stats),
            params.online_weight_period,
        );

        let node = Self {
            config,
            params,
            clock,
            stats,
            ledger,
            wallets,
            online_reps,
            confirmation_height,
            active,
            vote_processor,
            scheduler,
            block_processor,
            online_weight,
        };
        node.connect();
        Ok(node)
    }

    /// Observer wiring between components. Back edges hold weak references.
    fn connect(&self) {
        self.active.connect_confirmation_height();

        let scheduler: Weak<ElectionScheduler> = Arc::downgrade(&self.scheduler);
        self.active.add_vacancy_update_observer(Box::new(move || {
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.notify();
            }
        }));

        // Cementing unblocks the next block of the chain and any receive of a send.
        let scheduler: Weak<ElectionScheduler> = Arc::downgrade(&self.scheduler);
        let ledger = Arc::clone(&self.ledger);
        self.active.add_block_cemented_observer(Box::new(move |status| {
            let Some(scheduler) = scheduler.upgrade() else {
                return;
            };
            let winner = &status.winner;
            if let Some(account) = ledger.block_account(&winner.hash()) {
                scheduler.activate(&account);
            }
            let destination = winner
                .destination_field()
                .or_else(|| winner.link_field().map(|link| link.as_account()));
            if let Some(destination) = destination.filter(|d| !d.is_zero()) {
                scheduler.activate(&destination);
            }
        }));

        let online_reps = Arc::clone(&self.online_reps);
        self.active
            .add_live_vote_observer(Box::new(move |rep| online_reps.observe(&rep)));

        let block_processor: Weak<BlockProcessor> = Arc::downgrade(&self.block_processor);
        self.active.add_force_process_observer(Box::new(move |block| {
            if let Some(block_processor) = block_processor.upgrade() {
                block_processor.force(&block);
            }
        }));

        for generator in [self.active.generator(), self.active.final_generator()] {
            let vote_processor: Weak<VoteProcessor> = Arc::downgrade(&self.vote_processor);
            generator.add_vote_observer(Box::new(move |vote| {
                if let Some(vote_processor) = vote_processor.upgrade() {
                    vote_processor.vote(vote, ChannelId::LOOPBACK);
                }
            }));
        }
    }

    pub fn start(&self) -> Result<(), NodeError> {
        self.confirmation_height.start()?;
        self.vote_processor.start()?;
        self.scheduler.start()?;
        self.block_processor.start()?;
        self.active.start()?;
        self.online_weight.start()?;
        info!(
            network = self.params.network.as_str(),
            voting = self.config.enable_voting,
            blocks = self.ledger.block_count(),
            cemented = self.ledger.cemented_count(),
            "node started"
        );
        Ok(())
    }

    pub fn stop(&self) {
        self.online_weight.stop();
        self.active.stop();
        self.block_processor.stop();
        self.scheduler.stop();
        self.vote_processor.stop();
        self.confirmation_height.stop();
        info!("node stopped");
    }

    /// Apply a locally created block right away.
    pub fn process_local(&self, block: &Arc<Block>) -> ProcessResult {
        self.block_processor.process_blocking(block, BlockSource::Local)
    }

    /// Queue a block received from the network.
    pub fn process_live(&self, block: &Arc<Block>) -> bool {
        self.block_processor.add(block, BlockSource::Live)
    }

    /// Statistics in the prometheus text exposition format.
    pub fn metrics_text(&self) -> Result<String, NodeError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.stats.registry().gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub fn clock(&self) -> &SteadyClock {
        &self.clock
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn wallets(&self) -> &Arc<KeyWallets> {
        &self.wallets
    }

    pub fn online_reps(&self) -> &Arc<OnlineReps> {
        &self.online_reps
    }

    pub fn confirmation_height(&self) -> &Arc<ConfirmationHeightProcessor> {
        &self.confirmation_height
    }

    pub fn active(&self) -> &Arc<ActiveElections> {
        &self.active
    }

    pub fn vote_processor(&self) -> &Arc<VoteProcessor> {
        &self.vote_processor
    }

    pub fn scheduler(&self) -> &Arc<ElectionScheduler> {
        &self.scheduler
    }

    pub fn block_processor(&self) -> &Arc<BlockProcessor> {
        &self.block_processor
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}
