//! Confirmation height processor.
//!
//! Consumes confirmed election winners and raises the ledger's per-account
//! confirmation heights (cementing) for the winner and everything it depends
//! on. Runs on its own thread; callers only enqueue.
//!
//! Two write strategies share one dependency walker. Small backlogs use the
//! unbounded strategy (one write pass); once the number of uncemented blocks
//! reaches [`UNBOUNDED_CUTOFF`] the bounded strategy takes over.

mod bounded;
mod unbounded;
mod walker;

use orv_types::{Block, BlockHash};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::write_queue::WriteQueue;

/// Uncemented block count at which automatic mode switches to bounded writes.
pub const UNBOUNDED_CUTOFF: u64 = 16384;

pub type BlockCallback = Box<dyn Fn(&Arc<Block>) + Send + Sync>;
pub type BlockHashCallback = Box<dyn Fn(BlockHash) + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationHeightMode {
    #[default]
    Automatic,
    Bounded,
    Unbounded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationHeightConfig {
    #[serde(default)]
    pub mode: ConfirmationHeightMode,
    #[serde(default = "default_batch_write_size")]
    pub batch_write_size: usize,
    #[serde(default = "default_batch_separate_pending_min_time_ms")]
    pub batch_separate_pending_min_time_ms: u64,
}

// ── Serde default helpers ──

fn default_batch_write_size() -> usize {
    16384
}
fn default_batch_separate_pending_min_time_ms() -> u64 {
    50
}

impl Default for ConfirmationHeightConfig {
    fn default() -> Self {
        Self {
            mode: ConfirmationHeightMode::Automatic,
            batch_write_size: default_batch_write_size(),
            batch_separate_pending_min_time_ms: default_batch_separate_pending_min_time_ms(),
        }
    }
}

#[derive(Default)]
struct ProcessorState {
    awaiting: VecDeque<Arc<Block>>,
    awaiting_hashes: HashSet<BlockHash>,
    current: Option<BlockHash>,
    paused: bool,
    stopped: bool,
}

struct Shared {
    ledger: Arc<Ledger>,
    write_queue: WriteQueue,
    config: ConfirmationHeightConfig,
    state: Mutex<ProcessorState>,
    condition: Condvar,
    cemented_observers: Mutex<Vec<BlockCallback>>,
    already_cemented_observers: Mutex<Vec<BlockHashCallback>>,
}

pub struct ConfirmationHeightProcessor {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ConfirmationHeightProcessor {
    pub fn new(ledger: Arc<Ledger>, write_queue: WriteQueue, config: ConfirmationHeightConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                ledger,
                write_queue,
                config,
                state: Mutex::new(ProcessorState::default()),
                condition: Condvar::new(),
                cemented_observers: Mutex::new(Vec::new()),
                already_cemented_observers: Mutex::new(Vec::new()),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<(), LedgerError> {
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("Conf height".to_string())
            .spawn(move || shared.run())
            .map_err(|e| LedgerError::ThreadSpawn(e.to_string()))?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.shared.state.lock().unwrap().stopped = true;
        self.shared.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("confirmation height thread panicked");
            }
        }
    }

    /// Called for every block this processor cements, in cementing order.
    pub fn add_cemented_observer(&self, observer: BlockCallback) {
        self.shared.cemented_observers.lock().unwrap().push(observer);
    }

    /// Called with the hash of a queued block that turned out to be cemented
    /// already.
    pub fn add_already_cemented_observer(&self, observer: BlockHashCallback) {
        self.shared
            .already_cemented_observers
            .lock()
            .unwrap()
            .push(observer);
    }

    /// Queue a confirmed block for cementing. Duplicates are ignored.
    pub fn add(&self, block: Arc<Block>) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if !state.awaiting_hashes.insert(block.hash()) {
                return;
            }
            state.awaiting.push_back(block);
        }
        self.shared.condition.notify_all();
    }

    /// Queued or being cemented right now.
    pub fn is_processing_block(&self, hash: &BlockHash) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.current == Some(*hash) || state.awaiting_hashes.contains(hash)
    }

    /// Queued and not yet picked up.
    pub fn is_processing_added_block(&self, hash: &BlockHash) -> bool {
        self.shared
            .state
            .lock()
            .unwrap()
            .awaiting_hashes
            .contains(hash)
    }

    pub fn current(&self) -> Option<BlockHash> {
        self.shared.state.lock().unwrap().current
    }

    pub fn awaiting_processing_size(&self) -> usize {
        self.shared.state.lock().unwrap().awaiting.len()
    }

    pub fn pause(&self) {
        self.shared.state.lock().unwrap().paused = true;
    }

    pub fn unpause(&self) {
        self.shared.state.lock().unwrap().paused = false;
        self.shared.condition.notify_all();
    }

    /// Block until the queue is empty and nothing is being cemented.
    pub fn flush(&self) {
        let state = self.shared.state.lock().unwrap();
        let _state = self
            .shared
            .condition
            .wait_while(state, |s| {
                !s.stopped && !s.paused && (!s.awaiting.is_empty() || s.current.is_some())
            })
            .unwrap();
    }
}

impl Drop for ConfirmationHeightProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn run(&self) {
        info!("confirmation height processor started");
        let mut state = self.state.lock().unwrap();
        loop {
            state = self
                .condition
                .wait_while(state, |s| !s.stopped && (s.paused || s.awaiting.is_empty()))
                .unwrap();
            if state.stopped {
                break;
            }
            let Some(block) = state.awaiting.pop_front() else {
                continue;
            };
            let hash = block.hash();
            state.awaiting_hashes.remove(&hash);
            state.current = Some(hash);
            drop(state);

            self.process(&hash);

            state = self.state.lock().unwrap();
            state.current = None;
            self.condition.notify_all();
        }
        info!("confirmation height processor stopped");
    }

    fn mode(&self) -> ConfirmationHeightMode {
        match self.config.mode {
            ConfirmationHeightMode::Automatic => {
                let uncemented = self
                    .ledger
                    .block_count()
                    .saturating_sub(self.ledger.cemented_count());
                if uncemented < UNBOUNDED_CUTOFF {
                    ConfirmationHeightMode::Unbounded
                } else {
                    ConfirmationHeightMode::Bounded
                }
            }
            mode => mode,
        }
    }

    fn process(&self, hash: &BlockHash) {
        let steps = match walker::collect_cement_steps(&self.ledger, hash) {
            Ok(steps) => steps,
            Err(e) => {
                warn!(%hash, error = %e, "cannot cement block");
                return;
            }
        };
        if steps.is_empty() {
            debug!(%hash, "block already cemented");
            for observer in self.already_cemented_observers.lock().unwrap().iter() {
                observer(*hash);
            }
            return;
        }

        let mut notify = |blocks: Vec<Arc<Block>>| {
            let observers = self.cemented_observers.lock().unwrap();
            for block in &blocks {
                for observer in observers.iter() {
                    observer(block);
                }
            }
        };
        let mode = self.mode();
        let result = match mode {
            ConfirmationHeightMode::Bounded => bounded::cement(
                &self.ledger,
                &self.write_queue,
                &steps,
                self.config.batch_write_size,
                &mut notify,
            ),
            _ => unbounded::cement(
                &self.ledger,
                &self.write_queue,
                &steps,
                self.config.batch_write_size,
                Duration::from_millis(self.config.batch_separate_pending_min_time_ms),
                &mut notify,
            ),
        };
        match result {
            Ok(count) => debug!(%hash, count, ?mode, "cemented"),
            Err(e) => warn!(%hash, error = %e, "cementing failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{dev_genesis_key, LedgerConstants};
    use crate::ledger::ProcessResult;
    use orv_crypto::sign_block;
    use orv_types::{Amount, Link};
    use std::sync::mpsc;

    fn setup(mode: ConfirmationHeightMode, batch_write_size: usize) -> (Arc<Ledger>, ConfirmationHeightProcessor) {
        let ledger = Arc::new(Ledger::new(LedgerConstants::dev()));
        let processor = ConfirmationHeightProcessor::new(
            Arc::clone(&ledger),
            WriteQueue::new(),
            ConfirmationHeightConfig {
                mode,
                batch_write_size,
                batch_separate_pending_min_time_ms: 0,
            },
        );
        (ledger, processor)
    }

    /// Append `count` sends from genesis, returning them in chain order.
    fn genesis_chain(ledger: &Ledger, count: u64) -> Vec<Arc<Block>> {
        let key = dev_genesis_key();
        let mut previous = ledger.constants().genesis_hash();
        let mut blocks = Vec::new();
        for i in 1..=count {
            let mut block = Block::new_state(
                key.account(),
                previous,
                key.account(),
                Amount::MAX - Amount::raw(i as u128),
                Link::from(orv_types::Account::from(i)),
            );
            sign_block(&mut block, &key.private);
            let block = Arc::new(block);
            assert_eq!(ledger.process(&block), ProcessResult::Progress);
            previous = block.hash();
            blocks.push(block);
        }
        blocks
    }

    fn cement_and_collect(mode: ConfirmationHeightMode, batch: usize) {
        let (ledger, processor) = setup(mode, batch);
        let chain = genesis_chain(&ledger, 5);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        processor.add_cemented_observer(Box::new(move |block| {
            let _ = tx.lock().unwrap().send(block.hash());
        }));
        processor.start().unwrap();
        processor.add(Arc::clone(&chain[4]));
        processor.flush();

        let cemented: Vec<_> = rx.try_iter().collect();
        let expected: Vec<_> = chain.iter().map(|b| b.hash()).collect();
        assert_eq!(cemented, expected);
        assert_eq!(ledger.cemented_count(), 6);
        processor.stop();
    }

    #[test]
    fn unbounded_cements_whole_chain_in_order() {
        cement_and_collect(ConfirmationHeightMode::Unbounded, 16384);
    }

    #[test]
    fn bounded_cements_in_small_batches() {
        cement_and_collect(ConfirmationHeightMode::Bounded, 2);
    }

    #[test]
    fn already_cemented_notifies_hash() {
        let (ledger, processor) = setup(ConfirmationHeightMode::Automatic, 16384);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        processor.add_already_cemented_observer(Box::new(move |hash| {
            let _ = tx.lock().unwrap().send(hash);
        }));
        processor.start().unwrap();
        processor.add(Arc::clone(&ledger.constants().genesis));
        processor.flush();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            ledger.constants().genesis_hash()
        );
    }

    #[test]
    fn paused_processor_keeps_blocks_queued() {
        let (ledger, processor) = setup(ConfirmationHeightMode::Automatic, 16384);
        let chain = genesis_chain(&ledger, 1);
        processor.start().unwrap();
        processor.pause();
        processor.add(Arc::clone(&chain[0]));
        processor.add(Arc::clone(&chain[0]));
        assert_eq!(processor.awaiting_processing_size(), 1);
        assert!(processor.is_processing_added_block(&chain[0].hash()));
        assert!(processor.is_processing_block(&chain[0].hash()));

        processor.unpause();
        processor.flush();
        assert!(!processor.is_processing_block(&chain[0].hash()));
        assert!(ledger.block_confirmed(&chain[0].hash()));
    }
}
