//! Block processing pipeline.
//!
//! Blocks are queued by source and applied to the ledger on a dedicated
//! thread. The outcome decides what happens next for elections:
//!
//! - `Progress`: the account is offered to the election scheduler.
//! - `Fork`: an election is started for the block occupying the root and
//!   the competitor is published into it.
//! - Forced blocks (winners of a fork switch) first roll back whatever
//!   occupies their root.

use orv_consensus::{
    ActiveElections, BlockUniquer, DetailType, ElectionBehavior, ElectionScheduler, StatType, Stats,
};
use orv_ledger::{Ledger, ProcessResult};
use orv_types::Block;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::config::BlockProcessorConfig;
use crate::NodeError;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(60);
/// Blocks processed per queue lock.
const BATCH_SIZE: usize = 256;

/// Where an incoming block originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSource {
    /// Received from a peer.
    Live,
    /// Submitted locally.
    Local,
    /// Winner of a fork switch that must replace the ledger's block.
    Forced,
}

pub type BlockProcessedCallback = Box<dyn Fn(ProcessResult, &Arc<Block>) + Send + Sync>;

/// Queue with backpressure. Forced blocks come first, then local ones, so
/// that flood traffic never starves them.
#[derive(Default)]
struct ProcessingQueue {
    forced: VecDeque<Arc<Block>>,
    local: VecDeque<Arc<Block>>,
    live: VecDeque<Arc<Block>>,
}

impl ProcessingQueue {
    fn push(&mut self, block: Arc<Block>, source: BlockSource) {
        match source {
            BlockSource::Forced => self.forced.push_back(block),
            BlockSource::Local => self.local.push_back(block),
            BlockSource::Live => self.live.push_back(block),
        }
    }

    fn pop(&mut self) -> Option<(Arc<Block>, BlockSource)> {
        self.forced
            .pop_front()
            .map(|b| (b, BlockSource::Forced))
            .or_else(|| self.local.pop_front().map(|b| (b, BlockSource::Local)))
            .or_else(|| self.live.pop_front().map(|b| (b, BlockSource::Live)))
    }

    fn len(&self) -> usize {
        self.forced.len() + self.local.len() + self.live.len()
    }

    fn is_empty(&self) -> bool {
        self.forced.is_empty() && self.local.is_empty() && self.live.is_empty()
    }
}

#[derive(Default)]
struct ProcessorState {
    queue: ProcessingQueue,
    processing: bool,
    stopped: bool,
}

struct ProcessorShared {
    config: BlockProcessorConfig,
    ledger: Arc<Ledger>,
    active: Arc<ActiveElections>,
    scheduler: Arc<ElectionScheduler>,
    stats: Arc<Stats>,
    uniquer: BlockUniquer,
    state: Mutex<ProcessorState>,
    condition: Condvar,
    observers: Mutex<Vec<BlockProcessedCallback>>,
}

pub struct BlockProcessor {
    shared: Arc<ProcessorShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BlockProcessor {
    pub fn new(
        config: BlockProcessorConfig,
        ledger: Arc<Ledger>,
        active: Arc<ActiveElections>,
        scheduler: Arc<ElectionScheduler>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            shared: Arc::new(ProcessorShared {
                config,
                ledger,
                active,
                scheduler,
                stats,
                uniquer: BlockUniquer::new(),
                state: Mutex::new(ProcessorState::default()),
                condition: Condvar::new(),
                observers: Mutex::new(Vec::new()),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<(), NodeError> {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("Blck processing".into())
            .spawn(move || shared.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.shared.state.lock().unwrap().stopped = true;
        self.shared.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("block processing thread panicked");
            }
        }
    }

    pub fn add_block_processed_observer(&self, observer: BlockProcessedCallback) {
        self.shared.observers.lock().unwrap().push(observer);
    }

    /// Queue `block`. Returns false when the queue is full.
    pub fn add(&self, block: &Arc<Block>, source: BlockSource) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        if state.stopped {
            return false;
        }
        if source != BlockSource::Forced && state.queue.len() >= self.shared.config.max_queue {
            drop(state);
            self.shared.stats.inc(StatType::BlockProcessor, DetailType::Overflow);
            return false;
        }
        let block = self.shared.uniquer.unique(block);
        state.queue.push(block, source);
        drop(state);
        self.shared.condition.notify_all();
        true
    }

    /// Queue a fork winner that must replace the ledger's block.
    pub fn force(&self, block: &Arc<Block>) {
        self.shared.stats.inc(StatType::BlockProcessor, DetailType::Force);
        self.add(block, BlockSource::Forced);
    }

    /// Process `block` on the calling thread.
    pub fn process_blocking(&self, block: &Arc<Block>, source: BlockSource) -> ProcessResult {
        self.shared.process_one(block, source)
    }

    /// Block until the queue is empty and nothing is being processed.
    pub fn flush(&self) {
        let state = self.shared.state.lock().unwrap();
        let (guard, timeout) = self
            .shared
            .condition
            .wait_timeout_while(state, FLUSH_TIMEOUT, |s| {
                !s.stopped && (s.processing || !s.queue.is_empty())
            })
            .unwrap();
        drop(guard);
        if timeout.timed_out() {
            warn!("block processor flush timed out");
        }
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for BlockProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ProcessorShared {
    fn run(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.stopped {
            if state.queue.is_empty() {
                state = self
                    .condition
                    .wait_while(state, |s| !s.stopped && s.queue.is_empty())
                    .unwrap();
                continue;
            }
            let batch: Vec<_> = (0..BATCH_SIZE).map_while(|_| state.queue.pop()).collect();
            state.processing = true;
            drop(state);

            for (block, source) in &batch {
                self.process_one(block, *source);
            }

            state = self.state.lock().unwrap();
            state.processing = false;
            self.condition.notify_all();
        }
    }

    fn process_one(&self, block: &Arc<Block>, source: BlockSource) -> ProcessResult {
        let hash = block.hash();
        if source == BlockSource::Forced {
            self.rollback_competitor(block);
        }
        let result = self.ledger.process(block);
        self.stats.inc(StatType::BlockProcessor, DetailType::Process);
        trace!(%hash, result = result.as_str(), "block processed");

        match result {
            ProcessResult::Progress => {
                self.stats.inc(StatType::BlockProcessor, DetailType::Progress);
                if let Some(account) = self.ledger.block_account(&hash) {
                    self.scheduler.activate(&account);
                }
            }
            ProcessResult::Fork => {
                self.stats.inc(StatType::BlockProcessor, DetailType::Fork);
                self.process_fork(block);
            }
            _ => {}
        }

        for observer in self.observers.lock().unwrap().iter() {
            observer(result, block);
        }
        result
    }

    /// Start an election for the block holding the root and offer the
    /// competitor to it.
    fn process_fork(&self, block: &Arc<Block>) {
        let Some(existing) = self.ledger.forked_block(block) else {
            return;
        };
        if !self.ledger.block_confirmed(&existing.hash()) {
            let previous_balance = self.ledger.previous_balance(&existing);
            self.active
                .insert(&existing, previous_balance, ElectionBehavior::Manual, None);
        }
        if !self.active.publish(block) {
            debug!(fork = %block.hash(), existing = %existing.hash(), "fork published");
        }
    }

    /// Remove the ledger's block at `block`'s root, and everything built on
    /// it, so `block` can take its place.
    fn rollback_competitor(&self, block: &Arc<Block>) {
        let Some(existing) = self.ledger.forked_block(block) else {
            return;
        };
        if existing.hash() == block.hash() {
            return;
        }
        match self.ledger.rollback(&existing.hash()) {
            Ok(removed) => {
                self.stats.inc(StatType::BlockProcessor, DetailType::Rollback);
                let root = block.qualified_root();
                for rolled_back in &removed {
                    // The election deciding this root stays.
                    if rolled_back.qualified_root() != root {
                        self.active.erase_block(rolled_back);
                    }
                }
                debug!(
                    winner = %block.hash(),
                    loser = %existing.hash(),
                    count = removed.len(),
                    "competitor rolled back"
                );
            }
            Err(e) => {
                self.stats.inc(StatType::BlockProcessor, DetailType::RollbackFailed);
                warn!(winner = %block.hash(), loser = %existing.hash(), error = %e, "rollback failed");
            }
        }
    }
}
