//! Representative weights, maintained incrementally as blocks are processed
//! and rolled back.
//!
//! Avoids scanning all accounts to compute a representative's total delegated
//! weight. Each account's balance counts towards the representative named by
//! its head block.

use orv_types::{Account, Amount};
use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct RepWeights {
    /// representative → total delegated balance.
    weights: HashMap<Account, Amount>,
    /// Total weight across all representatives.
    total_weight: Amount,
}

impl RepWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add weight to a representative (an account delegates to them).
    pub fn add(&mut self, rep: &Account, weight: Amount) {
        if weight.is_zero() {
            return;
        }
        let entry = self.weights.entry(*rep).or_insert(Amount::ZERO);
        *entry = entry.saturating_add(weight);
        self.total_weight = self.total_weight.saturating_add(weight);
    }

    /// Remove weight from a representative (an account changes rep or spends).
    pub fn sub(&mut self, rep: &Account, weight: Amount) {
        if let Some(entry) = self.weights.get_mut(rep) {
            let removed = weight.min(*entry);
            *entry -= removed;
            self.total_weight = self.total_weight.saturating_sub(removed);
            if entry.is_zero() {
                self.weights.remove(rep);
            }
        }
    }

    /// A representative's current weight. Zero if unknown.
    pub fn weight(&self, rep: &Account) -> Amount {
        self.weights.get(rep).copied().unwrap_or(Amount::ZERO)
    }

    pub fn total_weight(&self) -> Amount {
        self.total_weight
    }

    pub fn all(&self) -> &HashMap<Account, Amount> {
        &self.weights
    }

    pub fn rep_count(&self) -> usize {
        self.weights.len()
    }
}
