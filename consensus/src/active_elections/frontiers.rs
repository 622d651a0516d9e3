//! Frontier confirmation: optimistic elections for account heads that have
//! uncemented blocks, so chains nobody is voting on still get cemented.
//!
//! A bounded scan of the ledger (and of local wallet accounts first) ranks
//! accounts by their uncemented block count. Heads of the highest-ranked
//! accounts are then started as optimistic elections within the optimistic
//! budget. Accounts whose optimistic election expired unconfirmed are skipped
//! for a while.

use orv_types::Account;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::debug;

use super::ActiveElections;
use crate::config::FrontiersConfirmationMode;
use crate::election::ElectionBehavior;
use crate::stats::{DetailType, StatType};

/// Frontier confirmation pauses while the cementing queue is this long.
const MAX_PENDING_CEMENTING: usize = 10_000;
/// Accounts read from the ledger per scan step.
const SCAN_BATCH: usize = 1024;
/// Optimistic elections started per pass.
const MAX_ELECTIONS_PER_PASS: usize = 1000;

/// Accounts ordered by uncemented block count, highest first.
#[derive(Default)]
pub(super) struct CementableSet {
    by_account: HashMap<Account, u64>,
    ordered: BTreeSet<(Reverse<u64>, Account)>,
}

impl CementableSet {
    /// Insert or update `account`. When full, the account only gets in by
    /// displacing one with fewer uncemented blocks.
    pub fn prioritize(&mut self, account: Account, uncemented: u64, max: usize) {
        if let Some(&old) = self.by_account.get(&account) {
            if old == uncemented {
                return;
            }
            self.ordered.remove(&(Reverse(old), account));
        } else if self.by_account.len() >= max {
            let Some(&(Reverse(lowest), lowest_account)) = self.ordered.iter().next_back() else {
                return;
            };
            if uncemented <= lowest {
                return;
            }
            self.ordered.remove(&(Reverse(lowest), lowest_account));
            self.by_account.remove(&lowest_account);
        }
        self.by_account.insert(account, uncemented);
        self.ordered.insert((Reverse(uncemented), account));
    }

    pub fn pop_front(&mut self) -> Option<(Account, u64)> {
        let (Reverse(uncemented), account) = self.ordered.pop_first()?;
        self.by_account.remove(&account);
        Some((account, uncemented))
    }

    pub fn len(&self) -> usize {
        self.by_account.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_account.is_empty()
    }
}

/// Accounts whose optimistic election expired, with the expiry time.
#[derive(Default)]
pub(super) struct ExpiredOptimistic {
    by_account: HashMap<Account, Instant>,
    by_time: BTreeSet<(Instant, Account)>,
}

impl ExpiredOptimistic {
    pub fn insert(&mut self, account: Account, now: Instant) {
        if let Some(old) = self.by_account.insert(account, now) {
            self.by_time.remove(&(old, account));
        }
        self.by_time.insert((now, account));
    }

    pub fn contains(&self, account: &Account) -> bool {
        self.by_account.contains_key(account)
    }

    /// Forget accounts that have waited out `dwell`.
    pub fn purge(&mut self, now: Instant, dwell: Duration) {
        while let Some(&(time, account)) = self.by_time.first() {
            if now.saturating_duration_since(time) < dwell {
                break;
            }
            self.by_time.pop_first();
            self.by_account.remove(&account);
        }
    }

    pub fn len(&self) -> usize {
        self.by_account.len()
    }
}

#[derive(Default)]
pub(super) struct FrontierState {
    pub ledger_frontiers: CementableSet,
    pub wallet_frontiers: CementableSet,
    pub expired_optimistic: ExpiredOptimistic,
    /// Where the next ledger scan resumes.
    pub next_frontier_account: Account,
    pub skip_wallets: bool,
    pub next_check: Option<Instant>,
}

impl ActiveElections {
    pub(super) fn should_do_frontiers_confirmation(&self) -> bool {
        self.config.frontier_confirmation != FrontiersConfirmationMode::Disabled
            && self.confirmation_height.awaiting_processing_size() < MAX_PENDING_CEMENTING
            && self.ledger.block_count() != self.ledger.cemented_count()
    }

    pub(super) fn frontiers_confirmation(&self) {
        let max_time = if self.params.is_dev_network() {
            Duration::from_millis(50)
        } else if self.len() < 1000 {
            self.params.request_interval / 2
        } else {
            self.params.request_interval / 10
        };
        self.prioritize_frontiers_for_confirmation(max_time);
        self.confirm_prioritized_frontiers();
    }

    /// Optimistic elections allowed at once. Unlimited while the ledger is
    /// still within bootstrap size.
    pub fn max_optimistic(&self) -> usize {
        if self.ledger.cemented_count() < self.ledger.constants().bootstrap_weight_max_blocks {
            usize::MAX
        } else {
            self.config.optimistic_budget
        }
    }

    /// Accounts currently ranked for frontier confirmation.
    pub fn priority_cementable_frontiers_size(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.frontiers.ledger_frontiers.len() + state.frontiers.wallet_frontiers.len()
    }

    pub fn expired_optimistic_len(&self) -> usize {
        self.state.lock().unwrap().frontiers.expired_optimistic.len()
    }

    fn uncemented_count(&self, account: &Account) -> Option<u64> {
        let info = self.ledger.account_info(account)?;
        let cemented = self.ledger.confirmation_height(account).height;
        (info.block_count > cemented && !self.confirmation_height.is_processing_block(&info.head))
            .then(|| info.block_count - cemented)
    }

    fn prioritize_frontiers_for_confirmation(&self, max_time: Duration) {
        let now = self.clock.now();
        let max = self.config.max_priority_cementable_frontiers;
        let dwell = Duration::from_secs(self.config.expired_optimistic_dwell_secs);
        let (start, skip_wallets) = {
            let mut state = self.state.lock().unwrap();
            state.frontiers.expired_optimistic.purge(now, dwell);
            (state.frontiers.next_frontier_account, state.frontiers.skip_wallets)
        };

        if !skip_wallets {
            for account in self.wallets.accounts() {
                if let Some(uncemented) = self.uncemented_count(&account) {
                    let mut state = self.state.lock().unwrap();
                    state
                        .frontiers
                        .wallet_frontiers
                        .prioritize(account, uncemented, max);
                }
            }
            self.state.lock().unwrap().frontiers.skip_wallets = true;
        }

        let timer = Instant::now();
        let batch = self.ledger.accounts_from(&start, SCAN_BATCH);
        let mut reached_end = batch.len() < SCAN_BATCH;
        let mut last = None;
        for (account, _) in &batch {
            last = Some(*account);
            let expired = self
                .state
                .lock()
                .unwrap()
                .frontiers
                .expired_optimistic
                .contains(account);
            if !expired {
                if let Some(uncemented) = self.uncemented_count(account) {
                    let mut state = self.state.lock().unwrap();
                    state
                        .frontiers
                        .ledger_frontiers
                        .prioritize(*account, uncemented, max);
                }
            }
            if timer.elapsed() >= max_time {
                reached_end = false;
                break;
            }
        }

        let mut state = self.state.lock().unwrap();
        match last.and_then(|account| next_account(&account)) {
            Some(next) if !reached_end => state.frontiers.next_frontier_account = next,
            _ => {
                state.frontiers.next_frontier_account = Account::ZERO;
                state.frontiers.skip_wallets = false;
            }
        }
    }

    fn confirm_prioritized_frontiers(&self) {
        let now = self.clock.now();
        let voting = self.enable_voting && !self.wallets.voting_reps().is_empty();
        let aggressive = (voting && self.wallets.have_half_rep())
            || self.config.frontier_confirmation == FrontiersConfirmationMode::Always;
        let max_active = self.config.size / 20;

        let (roots, check_due, wallets_pending) = {
            let state = self.state.lock().unwrap();
            (
                state.roots.len(),
                state.frontiers.next_check.map_or(true, |next| now >= next),
                !state.frontiers.skip_wallets || !state.frontiers.wallet_frontiers.is_empty(),
            )
        };
        let wallets_check_required = wallets_pending && !aggressive;
        let eager = !self.params.is_dev_network() && roots < 1000 && aggressive;
        if roots > max_active || !(check_due || wallets_check_required || eager) {
            return;
        }

        let max_optimistic = self.max_optimistic();
        let mut started = 0;
        for from_wallets in [true, false] {
            while started < MAX_ELECTIONS_PER_PASS {
                let next = {
                    let mut state = self.state.lock().unwrap();
                    if state.count(ElectionBehavior::Optimistic) >= max_optimistic {
                        break;
                    }
                    let set = if from_wallets {
                        &mut state.frontiers.wallet_frontiers
                    } else {
                        &mut state.frontiers.ledger_frontiers
                    };
                    set.pop_front()
                };
                let Some((account, _)) = next else {
                    break;
                };
                if self.insert_frontier(&account) {
                    started += 1;
                }
            }
        }

        let factor = if aggressive { 20 } else { 60 };
        let mut pause = self.params.request_interval * factor;
        if self.params.is_dev_network() {
            pause /= 1000;
        }
        self.state.lock().unwrap().frontiers.next_check = Some(now + pause);
        if started > 0 {
            self.stats.add(
                StatType::ActiveElections,
                DetailType::FrontierConfirmation,
                started as u64,
            );
            debug!(started, "frontier confirmation started optimistic elections");
        }
    }

    fn insert_frontier(&self, account: &Account) -> bool {
        let expired = self
            .state
            .lock()
            .unwrap()
            .frontiers
            .expired_optimistic
            .contains(account);
        if expired {
            return false;
        }
        let Some(info) = self.ledger.account_info(account) else {
            return false;
        };
        if self.uncemented_count(account).is_none() {
            return false;
        }
        let Some(block) = self.ledger.block(&info.head) else {
            return false;
        };
        let previous_balance = self.ledger.previous_balance(&block);
        let (election, inserted) =
            self.insert(&block, previous_balance, ElectionBehavior::Optimistic, None);
        if let (Some(election), true) = (election, inserted) {
            election.transition_active(self.clock.now());
            return true;
        }
        false
    }
}

/// The account key right after `account`, or `None` past the last key.
fn next_account(account: &Account) -> Option<Account> {
    let mut bytes = *account.as_bytes();
    for byte in bytes.iter_mut().rev() {
        let (value, overflow) = byte.overflowing_add(1);
        *byte = value;
        if !overflow {
            return Some(Account::from_bytes(bytes));
        }
    }
    None
}
