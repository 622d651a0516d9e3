//! Election scheduler.
//!
//! Keeps a backlog of blocks that are ready for an election but wait for
//! room in the active elections container. Priority entries are ordered by
//! account balance, highest first; manual entries are served first and
//! ignore vacancy.

use orv_ledger::Ledger;
use orv_types::{Account, Amount, Block, BlockHash};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::active_elections::ActiveElections;
use crate::config::ElectionSchedulerConfig;
use crate::election::{ConfirmationAction, ElectionBehavior};
use crate::error::ConsensusError;
use crate::stats::{DetailType, StatType, Stats};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(60);

struct ManualEntry {
    block: Arc<Block>,
    previous_balance: Option<Amount>,
    behavior: ElectionBehavior,
    action: Option<ConfirmationAction>,
}

#[derive(Default)]
struct SchedulerState {
    /// Keyed by descending priority, then arrival.
    priority: BTreeMap<(Reverse<Amount>, u64), Arc<Block>>,
    queued: HashSet<BlockHash>,
    manual: VecDeque<ManualEntry>,
    sequence: u64,
    /// An entry was popped and is being inserted.
    inserting: bool,
    stopped: bool,
}

impl SchedulerState {
    fn has_work(&self, vacancy: impl FnOnce() -> i64) -> bool {
        !self.manual.is_empty() || (!self.priority.is_empty() && vacancy() > 0)
    }
}

struct SchedulerShared {
    config: ElectionSchedulerConfig,
    ledger: Arc<Ledger>,
    active: Arc<ActiveElections>,
    stats: Arc<Stats>,
    state: Mutex<SchedulerState>,
    condition: Condvar,
}

pub struct ElectionScheduler {
    shared: Arc<SchedulerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ElectionScheduler {
    pub fn new(
        config: ElectionSchedulerConfig,
        ledger: Arc<Ledger>,
        active: Arc<ActiveElections>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                config,
                ledger,
                active,
                stats,
                state: Mutex::new(SchedulerState::default()),
                condition: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<(), ConsensusError> {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("Sched Priority".into())
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
                warn!("scheduler thread panicked");
            }
        }
    }

    /// Queue the next uncemented block of `account` if its dependencies
    /// are cemented. Returns true when something was queued.
    pub fn activate(&self, account: &Account) -> bool {
        let ledger = &self.shared.ledger;
        let Some(info) = ledger.account_info(account) else {
            return false;
        };
        let conf = ledger.confirmation_height(account);
        if conf.height >= info.block_count {
            return false;
        }
        let hash = if conf.height == 0 {
            Some(info.open_block)
        } else {
            ledger.successor(&conf.frontier)
        };
        let Some(block) = hash.and_then(|hash| ledger.block(&hash)) else {
            return false;
        };
        if !ledger.dependents_confirmed(&block) {
            trace!(%account, "dependents of next block not cemented");
            return false;
        }
        let balance = ledger.balance(&block.hash()).unwrap_or(Amount::ZERO);
        let previous = ledger.previous_balance(&block).unwrap_or(Amount::ZERO);
        let queued = self.shared.push_priority(block, balance.max(previous));
        if queued {
            self.shared.stats.inc(StatType::ElectionScheduler, DetailType::Activated);
            trace!(%account, "account activated");
        }
        queued
    }

    /// Queue `block` for an election regardless of vacancy.
    pub fn manual(
        &self,
        block: Arc<Block>,
        previous_balance: Option<Amount>,
        behavior: ElectionBehavior,
        action: Option<ConfirmationAction>,
    ) {
        self.shared
            .state
            .lock()
            .unwrap()
            .manual
            .push_back(ManualEntry {
                block,
                previous_balance,
                behavior,
                action,
            });
        self.shared.condition.notify_all();
    }

    /// Wake the scheduler thread, e.g. after vacancy changed.
    pub fn notify(&self) {
        drop(self.shared.state.lock().unwrap());
        self.shared.condition.notify_all();
    }

    /// Block until the backlog is drained or nothing more can be inserted
    /// for lack of vacancy.
    pub fn flush(&self) {
        let state = self.shared.state.lock().unwrap();
        let (guard, timeout) = self
            .shared
            .condition
            .wait_timeout_while(state, FLUSH_TIMEOUT, |s| {
                !s.stopped && (s.inserting || s.has_work(|| self.shared.active.vacancy()))
            })
            .unwrap();
        drop(guard);
        if timeout.timed_out() {
            warn!("scheduler flush timed out");
        }
    }

    pub fn len(&self) -> usize {
        let state = self.shared.state.lock().unwrap();
        state.priority.len() + state.manual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn priority_queue_len(&self) -> usize {
        self.shared.state.lock().unwrap().priority.len()
    }

    pub fn manual_queue_len(&self) -> usize {
        self.shared.state.lock().unwrap().manual.len()
    }
}

impl Drop for ElectionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SchedulerShared {
    /// Insert into the bounded priority backlog. A full backlog only takes
    /// entries that outrank its lowest one, which is then dropped.
    fn push_priority(&self, block: Arc<Block>, priority: Amount) -> bool {
        let hash = block.hash();
        let mut state = self.state.lock().unwrap();
        if state.queued.contains(&hash) {
            return false;
        }
        if state.priority.len() >= self.config.max_backlog {
            let lowest = state.priority.last_key_value().map(|(key, _)| key.0 .0);
            match lowest {
                Some(lowest) if priority > lowest => {
                    if let Some((_, evicted)) = state.priority.pop_last() {
                        state.queued.remove(&evicted.hash());
                    }
                }
                _ => {
                    drop(state);
                    self.stats.inc(StatType::ElectionScheduler, DetailType::Overfill);
                    return false;
                }
            }
        }
        state.sequence += 1;
        let key = (Reverse(priority), state.sequence);
        state.priority.insert(key, block);
        state.queued.insert(hash);
        drop(state);
        self.condition.notify_all();
        true
    }

    fn run(&self) {
        let mut state = self.state.lock().unwrap();
        loop {
            state = self
                .condition
                .wait_while(state, |s| !s.stopped && !s.has_work(|| self.active.vacancy()))
                .unwrap();
            if state.stopped {
                break;
            }

            if let Some(entry) = state.manual.pop_front() {
                state.inserting = true;
                drop(state);
                self.stats.inc(StatType::ElectionScheduler, DetailType::InsertManual);
                let hash = entry.block.hash();
                let (_, inserted) = self.active.insert(
                    &entry.block,
                    entry.previous_balance,
                    entry.behavior,
                    entry.action,
                );
                debug!(%hash, inserted, "manual election requested");
            } else if let Some((_, block)) = state.priority.pop_first() {
                state.queued.remove(&block.hash());
                state.inserting = true;
                drop(state);
                let (election, inserted) =
                    self.active.insert(&block, None, ElectionBehavior::Normal, None);
                if inserted {
                    if let Some(election) = election {
                        election.transition_active(self.active.clock().now());
                    }
                    self.stats.inc(StatType::ElectionScheduler, DetailType::InsertPriority);
                }
            } else {
                continue;
            }

            state = self.state.lock().unwrap();
            state.inserting = false;
            self.condition.notify_all();
        }
    }
}
