//! Configuration sections for the election core components.
//!
//! Each section deserializes from its own TOML table in the node config and
//! falls back to the documented defaults for any missing field.

use serde::{Deserialize, Serialize};

/// When the active elections container starts optimistic elections for
/// uncemented account frontiers on its own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontiersConfirmationMode {
    /// Aggressive when this node hosts a principal representative,
    /// otherwise on a slower cadence.
    #[default]
    Automatic,
    Always,
    Disabled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveElectionsConfig {
    /// Soft bound on simultaneous elections.
    #[serde(default = "default_size")]
    pub size: usize,
    /// Cemented election statuses kept for inspection.
    #[serde(default = "default_confirmation_history_size")]
    pub confirmation_history_size: usize,
    /// Capacity of the recently confirmed ring.
    #[serde(default = "default_confirmation_cache")]
    pub confirmation_cache: usize,
    #[serde(default)]
    pub frontier_confirmation: FrontiersConfirmationMode,
    /// Optimistic elections allowed at once once the ledger is past
    /// bootstrap size.
    #[serde(default = "default_optimistic_budget")]
    pub optimistic_budget: usize,
    /// How long an account whose optimistic election expired is skipped by
    /// frontier confirmation.
    #[serde(default = "default_expired_optimistic_dwell_secs")]
    pub expired_optimistic_dwell_secs: u64,
    #[serde(default = "default_max_priority_cementable_frontiers")]
    pub max_priority_cementable_frontiers: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteProcessorConfig {
    /// Queue capacity; tiered admission applies from 6/9 of it.
    #[serde(default = "default_max_votes")]
    pub max_votes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSchedulerConfig {
    #[serde(default = "default_max_backlog")]
    pub max_backlog: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCacheConfig {
    #[serde(default = "default_vote_cache_max_size")]
    pub max_size: usize,
    #[serde(default = "default_vote_cache_max_voters")]
    pub max_voters: usize,
    #[serde(default = "default_vote_cache_age_cutoff_secs")]
    pub age_cutoff_secs: u64,
}

// ── Serde default helpers ──

fn default_size() -> usize {
    5000
}
fn default_confirmation_history_size() -> usize {
    2048
}
fn default_confirmation_cache() -> usize {
    65536
}
fn default_optimistic_budget() -> usize {
    50
}
fn default_expired_optimistic_dwell_secs() -> u64 {
    3600
}
fn default_max_priority_cementable_frontiers() -> usize {
    100_000
}
fn default_max_votes() -> usize {
    144 * 1024
}
fn default_max_backlog() -> usize {
    65536
}
fn default_vote_cache_max_size() -> usize {
    65536
}
fn default_vote_cache_max_voters() -> usize {
    64
}
fn default_vote_cache_age_cutoff_secs() -> u64 {
    15 * 60
}

impl Default for ActiveElectionsConfig {
    fn default() -> Self {
        Self {
            size: default_size(),
            confirmation_history_size: default_confirmation_history_size(),
            confirmation_cache: default_confirmation_cache(),
            frontier_confirmation: FrontiersConfirmationMode::Automatic,
            optimistic_budget: default_optimistic_budget(),
            expired_optimistic_dwell_secs: default_expired_optimistic_dwell_secs(),
            max_priority_cementable_frontiers: default_max_priority_cementable_frontiers(),
        }
    }
}

impl Default for VoteProcessorConfig {
    fn default() -> Self {
        Self {
            max_votes: default_max_votes(),
        }
    }
}

impl Default for ElectionSchedulerConfig {
    fn default() -> Self {
        Self {
            max_backlog: default_max_backlog(),
        }
    }
}

impl Default for VoteCacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_vote_cache_max_size(),
            max_voters: default_vote_cache_max_voters(),
            age_cutoff_secs: default_vote_cache_age_cutoff_secs(),
        }
    }
}
