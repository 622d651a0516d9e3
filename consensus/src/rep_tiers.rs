//! Representative weight tiers used for vote queue admission.
//!
//! Tiers are recomputed periodically from the ledger's representative
//! weights relative to trended online weight, never per vote.

use orv_ledger::Ledger;
use orv_types::{Account, Amount};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::online_reps::OnlineReps;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RepTier {
    None,
    /// At least 0.1% of trended online weight.
    Tier1,
    /// At least 1%.
    Tier2,
    /// At least 5%.
    Tier3,
}

#[derive(Default)]
struct Tiers {
    tier1: HashSet<Account>,
    tier2: HashSet<Account>,
    tier3: HashSet<Account>,
}

pub struct RepTiers {
    ledger: Arc<Ledger>,
    online_reps: Arc<OnlineReps>,
    tiers: Mutex<Tiers>,
}

impl RepTiers {
    pub fn new(ledger: Arc<Ledger>, online_reps: Arc<OnlineReps>) -> Self {
        Self {
            ledger,
            online_reps,
            tiers: Mutex::new(Tiers::default()),
        }
    }

    /// Rebuild the tier sets from current weights.
    pub fn calculate_weights(&self) {
        let trended = self.online_reps.trended();
        let tier1_min = trended.scaled(1, 1000);
        let tier2_min = trended.scaled(1, 100);
        let tier3_min = trended.scaled(1, 20);

        let mut tiers = Tiers::default();
        for (rep, weight) in self.ledger.rep_weights() {
            if weight.is_zero() || weight < tier1_min {
                continue;
            }
            tiers.tier1.insert(rep);
            if weight >= tier2_min {
                tiers.tier2.insert(rep);
                if weight >= tier3_min {
                    tiers.tier3.insert(rep);
                }
            }
        }
        debug!(
            tier1 = tiers.tier1.len(),
            tier2 = tiers.tier2.len(),
            tier3 = tiers.tier3.len(),
            "representative tiers recalculated"
        );
        *self.tiers.lock().unwrap() = tiers;
    }

    pub fn tier(&self, rep: &Account) -> RepTier {
        let tiers = self.tiers.lock().unwrap();
        if tiers.tier3.contains(rep) {
            RepTier::Tier3
        } else if tiers.tier2.contains(rep) {
            RepTier::Tier2
        } else if tiers.tier1.contains(rep) {
            RepTier::Tier1
        } else {
            RepTier::None
        }
    }

    /// Weight needed for `tier` at the current trend.
    pub fn threshold(&self, tier: RepTier) -> Amount {
        let trended = self.online_reps.trended();
        match tier {
            RepTier::None => Amount::ZERO,
            RepTier::Tier1 => trended.scaled(1, 1000),
            RepTier::Tier2 => trended.scaled(1, 100),
            RepTier::Tier3 => trended.scaled(1, 20),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orv_crypto::{keypair_from_seed, sign_block};
    use orv_ledger::{dev_genesis_key, LedgerConstants, ProcessResult};
    use orv_nullables::SteadyClock;
    use orv_types::{Block, KeyPair, Link, NetworkParams};

    struct Fixture {
        ledger: Arc<Ledger>,
        online_reps: Arc<OnlineReps>,
        tiers: RepTiers,
    }

    fn setup() -> Fixture {
        let ledger = Arc::new(Ledger::new(LedgerConstants::dev()));
        let online_reps = Arc::new(OnlineReps::new(
            Arc::clone(&ledger),
            NetworkParams::dev(),
            SteadyClock::new_null(),
        ));
        let tiers = RepTiers::new(Arc::clone(&ledger), Arc::clone(&online_reps));
        Fixture {
            ledger,
            online_reps,
            tiers,
        }
    }

    /// Send `amount` from genesis to a fresh account that opens with itself
    /// as representative.
    fn fund(ledger: &Ledger, seed: u8, amount: Amount) -> KeyPair {
        let genesis = dev_genesis_key();
        let dest = keypair_from_seed(&[seed; 32]);
        let info = ledger.account_info(&genesis.account()).unwrap();
        let mut send = Block::new_state(
            genesis.account(),
            info.head,
            genesis.account(),
            info.balance - amount,
            Link::from(dest.account()),
        );
        sign_block(&mut send, &genesis.private);
        let send = Arc::new(send);
        assert_eq!(ledger.process(&send), ProcessResult::Progress);
        let mut open = Block::new_state(
            dest.account(),
            orv_types::BlockHash::ZERO,
            dest.account(),
            amount,
            Link::from(send.hash()),
        );
        sign_block(&mut open, &dest.private);
        assert_eq!(ledger.process(&Arc::new(open)), ProcessResult::Progress);
        dest
    }

    #[test]
    fn unknown_account_has_no_tier() {
        let f = setup();
        f.tiers.calculate_weights();
        assert_eq!(f.tiers.tier(&Account::from(1)), RepTier::None);
    }

    #[test]
    fn tiers_follow_trended_weight() {
        let f = setup();
        f.online_reps.set_trended(Amount::raw(100_000));
        let small = fund(&f.ledger, 1, Amount::raw(99));
        let tier1 = fund(&f.ledger, 2, Amount::raw(100));
        let tier2 = fund(&f.ledger, 3, Amount::raw(1_000));
        let tier3 = fund(&f.ledger, 4, Amount::raw(5_000));
        f.tiers.calculate_weights();

        assert_eq!(f.tiers.tier(&small.account()), RepTier::None);
        assert_eq!(f.tiers.tier(&tier1.account()), RepTier::Tier1);
        assert_eq!(f.tiers.tier(&tier2.account()), RepTier::Tier2);
        assert_eq!(f.tiers.tier(&tier3.account()), RepTier::Tier3);
        assert_eq!(f.tiers.tier(&dev_genesis_key().account()), RepTier::Tier3);
    }

    #[test]
    fn tiers_are_not_live() {
        let f = setup();
        f.online_reps.set_trended(Amount::raw(100_000));
        let rep = fund(&f.ledger, 1, Amount::raw(5_000));
        assert_eq!(f.tiers.tier(&rep.account()), RepTier::None);
        f.tiers.calculate_weights();
        assert_eq!(f.tiers.tier(&rep.account()), RepTier::Tier3);
    }

    #[test]
    fn thresholds() {
        let f = setup();
        f.online_reps.set_trended(Amount::raw(100_000));
        assert_eq!(f.tiers.threshold(RepTier::Tier1), Amount::raw(100));
        assert_eq!(f.tiers.threshold(RepTier::Tier2), Amount::raw(1_000));
        assert_eq!(f.tiers.threshold(RepTier::Tier3), Amount::raw(5_000));
    }
}
