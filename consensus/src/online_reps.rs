//! Online weight tracking: which representatives are actively voting.
//!
//! Quorum is calculated against *online* voting weight, not total delegated
//! weight. A representative counts as online if one of its votes was seen
//! within the weight period. This keeps permanently offline representatives
//! from inflating the quorum denominator.
//!
//! - **Minimum weight floor**: quorum never collapses when very few
//!   representatives are online.
//! - **Trended weight**: the median of periodic online-weight samples, which
//!   smooths temporary dips.
//! - **Principal representatives**: weight at or above trended / 1000.

use orv_ledger::Ledger;
use orv_nullables::SteadyClock;
use orv_types::{Account, Amount, NetworkParams};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

/// Samples kept for the trend on production networks (two weeks at one
/// sample per five minutes).
pub const MAX_SAMPLES: usize = 4032;

/// Samples kept on the dev network.
pub const MAX_SAMPLES_DEV: usize = 288;

struct OnlineState {
    /// Representative → time its latest vote was observed.
    reps: HashMap<Account, Instant>,
    online: Amount,
    trended: Amount,
    samples: VecDeque<Amount>,
}

pub struct OnlineReps {
    ledger: Arc<Ledger>,
    clock: SteadyClock,
    params: NetworkParams,
    minimum: Amount,
    max_samples: usize,
    state: Mutex<OnlineState>,
}

impl OnlineReps {
    pub fn new(ledger: Arc<Ledger>, params: NetworkParams, clock: SteadyClock) -> Self {
        let max_samples = if params.is_dev_network() {
            MAX_SAMPLES_DEV
        } else {
            MAX_SAMPLES
        };
        // Without samples the trend is the floor.
        let minimum = params.online_weight_minimum;
        Self {
            ledger,
            clock,
            minimum,
            max_samples,
            params,
            state: Mutex::new(OnlineState {
                reps: HashMap::new(),
                online: Amount::ZERO,
                trended: minimum,
                samples: VecDeque::new(),
            }),
        }
    }

    /// Record that `rep` just voted. Representatives without weight are
    /// ignored.
    pub fn observe(&self, rep: &Account) {
        if self.ledger.weight(rep).is_zero() {
            return;
        }
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        let new_insert = state.reps.insert(*rep, now).is_none();
        let period = self.params.online_weight_period;
        let before = state.reps.len();
        state
            .reps
            .retain(|_, seen| now.saturating_duration_since(*seen) < period);
        let trimmed = state.reps.len() != before;
        if new_insert || trimmed {
            state.online = self.calculate_online(&state.reps);
        }
    }

    fn calculate_online(&self, reps: &HashMap<Account, Instant>) -> Amount {
        reps.keys().map(|rep| self.ledger.weight(rep)).sum()
    }

    /// Push the current online weight as a new sample and recompute the
    /// trend.
    pub fn sample(&self) {
        let mut state = self.state.lock().unwrap();
        let online = state.online;
        while state.samples.len() >= self.max_samples {
            state.samples.pop_front();
        }
        state.samples.push_back(online);
        state.trended = self.calculate_trend(&state.samples);
        debug!(online = %online, trended = %state.trended, "online weight sampled");
    }

    /// Median of the samples with the minimum floor mixed in.
    fn calculate_trend(&self, samples: &VecDeque<Amount>) -> Amount {
        let mut items: Vec<Amount> = Vec::with_capacity(samples.len() + 1);
        items.push(self.minimum);
        items.extend(samples.iter().copied());
        let median = items.len() / 2;
        let (_, value, _) = items.select_nth_unstable(median);
        *value
    }

    pub fn online(&self) -> Amount {
        self.state.lock().unwrap().online
    }

    pub fn trended(&self) -> Amount {
        self.state.lock().unwrap().trended
    }

    pub fn minimum(&self) -> Amount {
        self.minimum
    }

    /// Weight a winner must lead by (and the final tally must reach) for an
    /// election to confirm.
    pub fn delta(&self) -> Amount {
        let state = self.state.lock().unwrap();
        let weight = state.online.max(state.trended).max(self.minimum);
        weight.scaled(self.params.online_weight_quorum as u128, 100)
    }

    /// Weight below which a representative's votes are not considered.
    pub fn minimum_principal_weight(&self) -> Amount {
        self.trended()
            .scaled(1, self.params.principal_weight_factor)
    }

    /// Representatives currently considered online.
    pub fn list(&self) -> Vec<Account> {
        self.state.lock().unwrap().reps.keys().copied().collect()
    }

    pub fn sample_count(&self) -> usize {
        self.state.lock().unwrap().samples.len()
    }

    pub fn set_online(&self, online: Amount) {
        self.state.lock().unwrap().online = online;
    }

    pub fn set_trended(&self, trended: Amount) {
        self.state.lock().unwrap().trended = trended;
    }
}
