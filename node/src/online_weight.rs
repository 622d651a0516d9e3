//! Periodic online weight sampling.
//!
//! Each period the current online weight is pushed into the trend kept by
//! [`OnlineReps`], and the representative tiers used for vote admission are
//! recomputed against the new trend.

use orv_consensus::{DetailType, OnlineReps, RepTiers, StatType, Stats};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{trace, warn};

use crate::NodeError;

struct SamplerShared {
    online_reps: Arc<OnlineReps>,
    rep_tiers: Arc<RepTiers>,
    stats: Arc<Stats>,
    period: Duration,
    stopped: Mutex<bool>,
    condition: Condvar,
}

pub struct OnlineWeightSampler {
    shared: Arc<SamplerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl OnlineWeightSampler {
    pub fn new(
        online_reps: Arc<OnlineReps>,
        rep_tiers: Arc<RepTiers>,
        stats: Arc<Stats>,
        period: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(SamplerShared {
                online_reps,
                rep_tiers,
                stats,
                period,
                stopped: Mutex::new(false),
                condition: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<(), NodeError> {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("Online reps".into())
            .spawn(move || shared.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        *self.shared.stopped.lock().unwrap() = true;
        self.shared.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("online weight sampling thread panicked");
            }
        }
    }

    /// Take one sample now.
    pub fn sample(&self) {
        self.shared.sample();
    }
}

impl Drop for OnlineWeightSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SamplerShared {
    fn run(&self) {
        self.rep_tiers.calculate_weights();
        let mut stopped = self.stopped.lock().unwrap();
        while !*stopped {
            stopped = self
                .condition
                .wait_timeout_while(stopped, self.period, |s| !*s)
                .unwrap()
                .0;
            if *stopped {
                break;
            }
            drop(stopped);
            self.sample();
            stopped = self.stopped.lock().unwrap();
        }
    }

    fn sample(&self) {
        self.online_reps.sample();
        self.rep_tiers.calculate_weights();
        self.stats.inc(StatType::OnlineReps, DetailType::Sample);
        trace!(trended = %self.online_reps.trended(), "online weight sample taken");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orv_consensus::RepTier;
    use orv_ledger::{dev_genesis_key, Ledger, LedgerConstants};
    use orv_nullables::SteadyClock;
    use orv_types::NetworkParams;

    #[test]
    fn sample_updates_trend_and_tiers() {
        let ledger = Arc::new(Ledger::new(LedgerConstants::dev()));
        let online_reps = Arc::new(OnlineReps::new(
            Arc::clone(&ledger),
            NetworkParams::dev(),
            SteadyClock::new_null(),
        ));
        let rep_tiers = Arc::new(RepTiers::new(Arc::clone(&ledger), Arc::clone(&online_reps)));
        let stats = Arc::new(Stats::new());
        let sampler = OnlineWeightSampler::new(
            Arc::clone(&online_reps),
            Arc::clone(&rep_tiers),
            Arc::clone(&stats),
            Duration::from_secs(3600),
        );

        let genesis = dev_genesis_key().account();
        online_reps.observe(&genesis);
        assert_eq!(rep_tiers.tier(&genesis), RepTier::None);

        sampler.sample();
        assert_eq!(online_reps.sample_count(), 1);
        assert_eq!(online_reps.trended(), ledger.weight(&genesis));
        assert_eq!(rep_tiers.tier(&genesis), RepTier::Tier3);
        assert_eq!(stats.count(StatType::OnlineReps, DetailType::Sample), 1);
    }

    #[test]
    fn stop_interrupts_the_wait() {
        let ledger = Arc::new(Ledger::new(LedgerConstants::dev()));
        let online_reps = Arc::new(OnlineReps::new(
            Arc::clone(&ledger),
            NetworkParams::dev(),
            SteadyClock::new_null(),
        ));
        let rep_tiers = Arc::new(RepTiers::new(Arc::clone(&ledger), Arc::clone(&online_reps)));
        let sampler = OnlineWeightSampler::new(
            online_reps,
            rep_tiers,
            Arc::new(Stats::new()),
            Duration::from_secs(3600),
        );
        sampler.start().unwrap();
        sampler.stop();
    }
}
